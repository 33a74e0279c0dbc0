//! Full epochs through the driver: configuration in, heavy hitters out.

use std::collections::HashMap;

use countcraft::config::ConfigFile;
use countcraft::driver::Driver;
use countcraft::{FlowKey, StreamRecord};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

type Key = FlowKey<4>;

fn key(tag: u32) -> Key {
    FlowKey::new(tag.to_le_bytes())
}

/// Hot flows with `hot_mass` packets each, light flows with 1..=5, in a
/// deterministic shuffle.
fn synth_stream(hot: &[Key], hot_mass: u32, lights: usize, seed: u64) -> (Vec<StreamRecord<4>>, HashMap<Key, i64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut truth = HashMap::new();
    let mut records = Vec::new();
    for &k in hot {
        for _ in 0..hot_mass {
            records.push(StreamRecord::new(k, 100));
        }
        truth.insert(k, i64::from(hot_mass));
    }
    for i in 0..lights {
        let k = key(1000 + i as u32);
        let reps = rng.gen_range(1..=5u32);
        for _ in 0..reps {
            records.push(StreamRecord::new(k, 100));
        }
        truth.insert(k, i64::from(reps));
    }
    records.shuffle(&mut rng);
    (records, truth)
}

#[test]
fn count_min_epoch_over_an_uncompressed_pool_is_exact() {
    let cfg = ConfigFile::from_toml_str(
        r#"
        [acs.config]
        k = 1
        ratio = 1
        iternum = 2
        clip = 0
        init_val = 0.1
        step_val = 2.0
        cnt_method = "InPacket"
        get_method = "THETA_METHOD"
        sketch = ["CM"]
        seed = 31

        [acs.cm.para]
        depth = 3
        width = 512
    "#,
    )
    .unwrap();

    let mut driver: Driver<4, i64> = Driver::from_config(&cfg.acs).unwrap();
    let hot: Vec<Key> = (1..=5).map(key).collect();
    let (records, truth) = synth_stream(&hot, 400, 50, 9);
    driver.run_epoch(&records);

    // ratio 1, one group: the pool is exact, so every estimate is the
    // plain Count-Min answer and cannot undershoot
    for (k, &count) in &truth {
        let est = driver.query(0, k);
        assert!(est >= count, "estimate {est} under truth {count}");
    }
}

#[test]
fn length_accounting_scales_with_record_size() {
    let cfg = ConfigFile::from_toml_str(
        r#"
        [acs.config]
        k = 1
        ratio = 1
        iternum = 2
        clip = 0
        init_val = 0.1
        step_val = 2.0
        cnt_method = "InLength"
        get_method = "THETA_METHOD"
        sketch = ["CM"]

        [acs.cm.para]
        depth = 3
        width = 256
    "#,
    )
    .unwrap();

    let mut driver: Driver<4, i64> = Driver::from_config(&cfg.acs).unwrap();
    let k0 = key(1);
    let records = vec![
        StreamRecord::new(k0, 1500),
        StreamRecord::new(k0, 40),
        StreamRecord::new(k0, 60),
    ];
    driver.run_epoch(&records);
    assert_eq!(driver.query(0, &k0), 1600);
}

#[test]
fn four_sketches_share_one_pool() {
    let cfg = ConfigFile::from_toml_str(
        r#"
        [acs.config]
        k = 4
        ratio = 2
        iternum = 2
        clip = 0
        init_val = 0.1
        step_val = 2.0
        cnt_method = "InPacket"
        get_method = "THETA_METHOD"
        sketch = ["CM", "FR", "HP", "DT"]
        seed = 1

        [acs.cm.para]
        depth = 3
        width = 256

        [acs.flowradar.para]
        flow_filter_bit = 8192
        flow_filter_hash = 3
        count_table_num = 512
        count_table_hash = 3
        heavy_thre = 300.0

        [acs.hashpipe.para]
        depth = 4
        width = 128
        heavy_thre = 50.0

        [acs.deltoid.para]
        num_hash = 2
        num_group = 64
        heavy_thre = 300.0
    "#,
    )
    .unwrap();

    let mut driver: Driver<4, i64> = Driver::from_config(&cfg.acs).unwrap();
    assert_eq!(driver.sketch_names(), vec!["CM", "FR", "HP", "DT"]);

    let hot: Vec<Key> = (1..=5).map(key).collect();
    let (records, truth) = synth_stream(&hot, 1000, 200, 3);
    driver.run_epoch(&records);

    // Count-Min: elephants restore in their own neighborhood
    for k in &hot {
        let est = driver.query(0, k);
        assert!(est >= 400, "hot flow underestimated: {est}");
        assert!(est <= 3000, "hot flow overestimated: {est}");
    }

    // HashPipe: eviction accounting on a compressed pool is coarse (a
    // swap can hollow out one group view of a slot), so an elephant
    // evicted late in the stream may restore far under its mass; the
    // bulk of them must still be reported
    let hp = driver.heavy_hitters(2);
    let hp_found = hot.iter().filter(|k| hp.iter().any(|(hk, _)| hk == *k)).count();
    assert!(hp_found >= 3, "only {hp_found} of 5 hot flows in HashPipe report");

    // Deltoid: bit votes recover every elephant key
    let dt = driver.heavy_hitters(3);
    for k in &hot {
        assert!(dt.iter().any(|(dk, _)| dk == k), "hot flow missing from Deltoid report");
    }

    // Flow Radar: whatever peels out is sane
    for (_, v) in driver.heavy_hitters(1) {
        assert!(v >= 300);
    }

    // reports() covers the three sketches with finite thresholds
    let reports = driver.reports();
    let names: Vec<_> = reports.iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["FR", "HP", "DT"]);

    // pool-level sanity: everything restored, nothing negative
    let pool = driver.pool();
    for v in 0..pool.virtual_len() {
        assert!(pool.query(v) >= 0);
    }
    let _ = truth;
}

#[test]
fn flow_radar_decodes_a_full_epoch_exactly() {
    let cfg = ConfigFile::from_toml_str(
        r#"
        [acs.config]
        k = 1
        ratio = 1
        iternum = 2
        clip = 0
        init_val = 0.1
        step_val = 2.0
        cnt_method = "InPacket"
        get_method = "THETA_METHOD"
        sketch = ["FR"]
        seed = 5

        [acs.flowradar.para]
        flow_filter_bit = 4096
        flow_filter_hash = 3
        count_table_num = 256
        count_table_hash = 3
    "#,
    )
    .unwrap();

    let mut driver: Driver<4, i64> = Driver::from_config(&cfg.acs).unwrap();
    let (records, truth) = synth_stream(&(1..=3).map(key).collect::<Vec<_>>(), 50, 60, 17);
    driver.run_epoch(&records);

    let decoded: HashMap<Key, i64> = driver.heavy_hitters(1).into_iter().collect();
    assert_eq!(decoded, truth);
}

#[test]
fn driver_dumps_the_restored_array() {
    let cfg = ConfigFile::from_toml_str(
        r#"
        [acs.config]
        k = 2
        ratio = 2
        iternum = 1
        clip = 0
        init_val = 0.1
        step_val = 2.0
        cnt_method = "InPacket"
        get_method = "THETA_METHOD"
        sketch = ["CM"]

        [acs.cm.para]
        depth = 2
        width = 128
    "#,
    )
    .unwrap();

    let mut driver: Driver<4, i64> = Driver::from_config(&cfg.acs).unwrap();
    driver.run_epoch(&[StreamRecord::new(key(9), 64)]);

    let mut buf = Vec::new();
    driver.dump_results(&mut buf).unwrap();
    let text = String::from_utf8(buf).unwrap();
    assert_eq!(
        text.split_whitespace().count(),
        driver.pool().virtual_len()
    );
}

#[test]
fn config_errors_abort_before_the_epoch() {
    // unknown tag
    let bad = r#"
        [acs.config]
        k = 2
        ratio = 2
        iternum = 1
        clip = 0
        init_val = 0.1
        step_val = 2.0
        cnt_method = "InPacket"
        get_method = "THETA_METHOD"
        sketch = ["ZZ"]
    "#;
    assert!(ConfigFile::from_toml_str(bad).is_err());

    // known tag, missing parameter table
    let missing = bad.replace("\"ZZ\"", "\"HP\"");
    assert!(ConfigFile::from_toml_str(&missing).is_err());
}
