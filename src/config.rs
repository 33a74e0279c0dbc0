//! Configuration tree for the epoch driver.
//!
//! The driver is configured from a TOML document with one engine section
//! and one `para` table per participating sketch, addressed the way the
//! engine reads them (`acs.config`, `acs.cm.para`, ...):
//!
//! ```toml
//! [acs.config]
//! k = 6
//! ratio = 8
//! iternum = 2
//! clip = 0
//! init_val = 0.1
//! step_val = 2.0
//! cnt_method = "InPacket"
//! get_method = "THETA_METHOD"
//! sketch = ["CM", "HP"]
//!
//! [acs.cm.para]
//! depth = 4
//! width = 1024
//!
//! [acs.hashpipe.para]
//! depth = 4
//! width = 256
//! heavy_thre = 100.0
//! ```
//!
//! Missing required keys and unknown sketch tags are configuration
//! errors; the driver reports them and never starts the epoch.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::core::flow::CntMethod;
use crate::error::{CountCraftError, Result};
use crate::pool::ThresholdMethod;

/// Root of the configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    /// The engine's configuration tree.
    pub acs: AcsConfig,
}

impl ConfigFile {
    /// Loads and validates a configuration from a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text)?;
        file.acs.validate()?;
        Ok(file)
    }
}

/// The `acs` configuration tree: engine settings plus per-sketch tables.
#[derive(Debug, Clone, Deserialize)]
pub struct AcsConfig {
    /// Engine-wide settings (`acs.config`).
    pub config: EngineSettings,
    /// Count-Min parameters (`acs.cm.para`).
    #[serde(default)]
    pub cm: Option<SketchSection<CountMinParams>>,
    /// Flow Radar parameters (`acs.flowradar.para`).
    #[serde(default)]
    pub flowradar: Option<SketchSection<FlowRadarParams>>,
    /// HashPipe parameters (`acs.hashpipe.para`).
    #[serde(default)]
    pub hashpipe: Option<SketchSection<HashPipeParams>>,
    /// Deltoid parameters (`acs.deltoid.para`).
    #[serde(default)]
    pub deltoid: Option<SketchSection<DeltoidParams>>,
}

/// Wrapper matching the `<sketch>.para` nesting of the document.
#[derive(Debug, Clone, Deserialize)]
pub struct SketchSection<P> {
    /// The sketch's parameter table.
    pub para: P,
}

/// Engine-wide settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// Number of counter groups (`K`).
    pub k: usize,
    /// Virtual-to-physical compression: the physical budget is
    /// `total_virtual / ratio`.
    pub ratio: usize,
    /// Large-counter extraction rounds.
    pub iternum: u32,
    /// Per-side trim of the large-counter estimator (`2·clip < k`).
    pub clip: u32,
    /// First-round threshold parameter.
    pub init_val: f64,
    /// Per-round threshold change.
    pub step_val: f64,
    /// Packet or byte accounting.
    pub cnt_method: CntMethod,
    /// Threshold rule for large-counter rounds.
    pub get_method: ThresholdMethod,
    /// Participating sketches, in binding order.
    pub sketch: Vec<String>,
    /// Shadow counter width in bits; 0 disables the channel.
    #[serde(default)]
    pub shadow_bits: u32,
    /// Base seed for all hash families.
    #[serde(default)]
    pub seed: u64,
    /// Input trace path; consumed by whatever feeds the driver, not by
    /// the engine itself.
    #[serde(default)]
    pub data: Option<PathBuf>,
    /// Record layout of the trace; passed through untouched.
    #[serde(default)]
    pub format: Option<toml::Value>,
}

/// Count-Min parameters.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CountMinParams {
    /// Hash rows.
    pub depth: usize,
    /// Requested row width; forced up to a prime.
    pub width: usize,
}

/// Flow Radar parameters.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FlowRadarParams {
    /// Flow filter size in bits.
    pub flow_filter_bit: usize,
    /// Flow filter probe count.
    pub flow_filter_hash: usize,
    /// Count table cells.
    pub count_table_num: usize,
    /// Count table probe count.
    pub count_table_hash: usize,
    /// Decode report cut-off; 0 reports every decoded flow.
    #[serde(default)]
    pub heavy_thre: f64,
}

/// HashPipe parameters.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HashPipeParams {
    /// Pipeline stages.
    pub depth: usize,
    /// Requested stage width; forced up to a prime.
    pub width: usize,
    /// Heavy-hitter report threshold.
    #[serde(default)]
    pub heavy_thre: f64,
}

/// Deltoid parameters.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DeltoidParams {
    /// Hash rows.
    pub num_hash: usize,
    /// Requested buckets per row; forced up to a prime.
    pub num_group: usize,
    /// Heavy-hitter report threshold.
    #[serde(default)]
    pub heavy_thre: f64,
}

/// Tags of the participating sketches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SketchTag {
    /// Count-Min (`"CM"`).
    CountMin,
    /// Flow Radar (`"FR"`).
    FlowRadar,
    /// HashPipe (`"HP"`).
    HashPipe,
    /// Deltoid (`"DT"`).
    Deltoid,
}

impl FromStr for SketchTag {
    type Err = CountCraftError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CM" => Ok(SketchTag::CountMin),
            "FR" => Ok(SketchTag::FlowRadar),
            "HP" => Ok(SketchTag::HashPipe),
            "DT" => Ok(SketchTag::Deltoid),
            other => Err(CountCraftError::unknown_sketch(other)),
        }
    }
}

impl AcsConfig {
    /// Checks cross-field constraints: known sketch tags with their
    /// parameter tables present, a sane compression ratio, and a clip
    /// the group count can absorb.
    pub fn validate(&self) -> Result<()> {
        let s = &self.config;
        if s.sketch.is_empty() {
            return Err(CountCraftError::invalid_parameters(
                "no sketches configured",
            ));
        }
        if s.ratio == 0 {
            return Err(CountCraftError::invalid_parameters("ratio must be >= 1"));
        }
        if 2 * s.clip as usize >= s.k {
            return Err(CountCraftError::invalid_parameters(format!(
                "clip {} too large for {} groups",
                s.clip, s.k
            )));
        }
        for tag in &s.sketch {
            match tag.parse::<SketchTag>()? {
                SketchTag::CountMin if self.cm.is_none() => {
                    return Err(CountCraftError::MissingKey { key: "acs.cm.para" })
                }
                SketchTag::FlowRadar if self.flowradar.is_none() => {
                    return Err(CountCraftError::MissingKey { key: "acs.flowradar.para" })
                }
                SketchTag::HashPipe if self.hashpipe.is_none() => {
                    return Err(CountCraftError::MissingKey { key: "acs.hashpipe.para" })
                }
                SketchTag::Deltoid if self.deltoid.is_none() => {
                    return Err(CountCraftError::MissingKey { key: "acs.deltoid.para" })
                }
                _ => {}
            }
        }
        Ok(())
    }
}
