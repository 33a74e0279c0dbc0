//! Error types for CountCraft operations.
//!
//! All fallible operations in the crate return [`Result<T>`] with
//! [`CountCraftError`] as the error type. Errors are limited to
//! configuration and construction problems: the data path (`update`,
//! `restore`, `query`) has no I/O to fail on, and contract violations
//! there (an out-of-range counter index, a second `init`, a query before
//! restore) are programming errors handled by assertions, not by this
//! enum.
//!
//! # Error Propagation
//!
//! ```
//! use countcraft::{CountCraftError, Result};
//! use countcraft::pool::PoolConfig;
//!
//! fn layout(n: usize, m: usize, k: usize) -> Result<PoolConfig> {
//!     PoolConfig::new(n, m, k)
//! }
//! assert!(layout(256, 120, 6).is_ok());
//! assert!(layout(256, 120, 0).is_err());
//! ```

use thiserror::Error;

/// Result type alias for CountCraft operations.
pub type Result<T> = std::result::Result<T, CountCraftError>;

/// Errors that can occur while configuring or constructing the engine.
#[derive(Debug, Error)]
pub enum CountCraftError {
    /// Pool or sketch parameters violate a mathematical constraint.
    ///
    /// Examples: `k = 0`, `⌊m/k⌋ < 2`, `2·clip ≥ k`, a sketch with zero
    /// rows.
    #[error("invalid parameters: {message}")]
    InvalidParameters {
        /// Human-readable description of what's invalid.
        message: String,
    },

    /// A sketch tag in the configuration is not one of the known tags.
    #[error("unknown sketch tag {tag:?} (expected one of \"CM\", \"FR\", \"HP\", \"DT\")")]
    UnknownSketch {
        /// The offending tag.
        tag: String,
    },

    /// A required configuration key is missing.
    #[error("missing configuration key {key:?}")]
    MissingKey {
        /// Dotted path of the missing key.
        key: &'static str,
    },

    /// The configuration file could not be read.
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML (or does not match the
    /// expected tree shape).
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

impl CountCraftError {
    /// Shorthand for [`CountCraftError::InvalidParameters`].
    pub fn invalid_parameters(message: impl Into<String>) -> Self {
        CountCraftError::InvalidParameters {
            message: message.into(),
        }
    }

    /// Shorthand for [`CountCraftError::UnknownSketch`].
    pub fn unknown_sketch(tag: impl Into<String>) -> Self {
        CountCraftError::UnknownSketch { tag: tag.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_problem() {
        let err = CountCraftError::invalid_parameters("clip too large for k = 2");
        assert!(err.to_string().contains("clip too large"));

        let err = CountCraftError::unknown_sketch("CMH");
        assert!(err.to_string().contains("CMH"));
    }
}
