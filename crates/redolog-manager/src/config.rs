//! Redo (consistency) configuration for a changefeed.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::RedoError;

/// Default log-file rotation threshold, in MiB.
pub const DEFAULT_MAX_LOG_SIZE: u64 = 64;

/// Default flush tick period, in milliseconds.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 2000;

/// Smallest accepted flush tick period, in milliseconds. Anything lower
/// turns the flush path into a busy loop against remote storage.
pub const MIN_FLUSH_INTERVAL_MS: u64 = 50;

/// How long a single flush may run before skipped ticks start warning that
/// the manager looks stuck.
pub const FLUSH_WARN_THRESHOLD: Duration = Duration::from_secs(20);

/// Bytes per MiB, for converting [`ConsistentConfig::max_log_size`].
pub const MEGABYTE: u64 = 1024 * 1024;

/// Consistency level of a changefeed.
///
/// Anything other than [`ConsistentLevel::Eventual`] leaves redo logging
/// disabled: the managers become no-ops and no writer is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistentLevel {
    /// Redo logging disabled.
    #[default]
    None,
    /// Events are replayable from the redo log after a crash.
    Eventual,
}

impl ConsistentLevel {
    /// Whether this level enables redo logging.
    #[must_use]
    pub fn is_enabled(self) -> bool {
        matches!(self, Self::Eventual)
    }
}

impl FromStr for ConsistentLevel {
    type Err = RedoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "eventual" => Ok(Self::Eventual),
            other => Err(RedoError::InvalidConfig(format!(
                "unknown consistent level: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for ConsistentLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Eventual => write!(f, "eventual"),
        }
    }
}

/// Replication consistency configuration for a changefeed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ConsistentConfig {
    /// Consistency level; gates the whole redo subsystem.
    pub level: ConsistentLevel,
    /// Log-file rotation threshold in MiB. 0 means "use the default".
    pub max_log_size: u64,
    /// Flush tick period in milliseconds. 0 means "use the default".
    #[serde(rename = "flush-interval")]
    pub flush_interval_ms: u64,
    /// Storage URI for the redo log.
    pub storage: String,
}

impl Default for ConsistentConfig {
    fn default() -> Self {
        Self {
            level: ConsistentLevel::None,
            max_log_size: DEFAULT_MAX_LOG_SIZE,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            storage: String::new(),
        }
    }
}

impl ConsistentConfig {
    /// Validates the configuration, filling defaults for zero-valued fields.
    ///
    /// A disabled config is always valid. For an enabled one the flush
    /// interval must be at least [`MIN_FLUSH_INTERVAL_MS`] and the storage
    /// URI must parse.
    ///
    /// # Errors
    ///
    /// Returns [`RedoError::InvalidConfig`] describing the offending field.
    pub fn validate_and_adjust(&mut self) -> Result<(), RedoError> {
        if !self.level.is_enabled() {
            return Ok(());
        }

        if self.max_log_size == 0 {
            self.max_log_size = DEFAULT_MAX_LOG_SIZE;
        }
        if self.flush_interval_ms == 0 {
            self.flush_interval_ms = DEFAULT_FLUSH_INTERVAL_MS;
        }
        if self.flush_interval_ms < MIN_FLUSH_INTERVAL_MS {
            return Err(RedoError::InvalidConfig(format!(
                "flush-interval {} must be at least {MIN_FLUSH_INTERVAL_MS}ms",
                self.flush_interval_ms
            )));
        }

        Url::parse(&self.storage).map_err(|e| {
            RedoError::InvalidConfig(format!("invalid storage uri {}: {e}", self.storage))
        })?;
        Ok(())
    }

    /// Flush tick period as a [`Duration`].
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Rotation threshold in bytes.
    #[must_use]
    pub fn max_log_size_bytes(&self) -> u64 {
        self.max_log_size * MEGABYTE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_config_skips_validation() {
        let mut cfg = ConsistentConfig {
            storage: "definitely not a uri".into(),
            ..ConsistentConfig::default()
        };
        assert!(cfg.validate_and_adjust().is_ok());
    }

    #[test]
    fn zero_fields_get_defaults() {
        let mut cfg = ConsistentConfig {
            level: ConsistentLevel::Eventual,
            max_log_size: 0,
            flush_interval_ms: 0,
            storage: "memory://".into(),
        };
        cfg.validate_and_adjust().unwrap();
        assert_eq!(cfg.max_log_size, DEFAULT_MAX_LOG_SIZE);
        assert_eq!(cfg.flush_interval_ms, DEFAULT_FLUSH_INTERVAL_MS);
    }

    #[test]
    fn tiny_flush_interval_is_rejected() {
        let mut cfg = ConsistentConfig {
            level: ConsistentLevel::Eventual,
            flush_interval_ms: 10,
            storage: "memory://".into(),
            ..ConsistentConfig::default()
        };
        assert!(matches!(
            cfg.validate_and_adjust(),
            Err(RedoError::InvalidConfig(_))
        ));
    }

    #[test]
    fn bad_storage_uri_is_rejected() {
        let mut cfg = ConsistentConfig {
            level: ConsistentLevel::Eventual,
            storage: "no scheme here".into(),
            ..ConsistentConfig::default()
        };
        assert!(matches!(
            cfg.validate_and_adjust(),
            Err(RedoError::InvalidConfig(_))
        ));
    }

    #[test]
    fn level_parses_from_str() {
        assert_eq!(
            "eventual".parse::<ConsistentLevel>().unwrap(),
            ConsistentLevel::Eventual
        );
        assert!(!"none".parse::<ConsistentLevel>().unwrap().is_enabled());
        assert!("strict".parse::<ConsistentLevel>().is_err());
    }
}
