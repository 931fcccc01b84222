use crate::constants::TEMP_DIR_PREFIX;
use crate::errors::{AppError, AppResult};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Resolved configuration with all values filled in.
///
/// Every field has a concrete default, so the struct can be used directly or
/// overlaid by a TOML file. Unknown keys are rejected to catch typos.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolvedConfig {
    /// Maximum number of XML events published per chunk by the parser task.
    pub event_chunk_size: usize,
    /// Number of compressed chunks buffered between the zip producer and its consumer.
    pub archive_channel_capacity: usize,
    /// Read size in bytes when streaming entry data into the archive writer.
    pub read_chunk_size: usize,
    /// Prefix for per-import temporary extraction directories.
    pub temp_dir_prefix: String,
    /// Upper bound on commit retries after an unknown commit result.
    /// `None` retries until the driver gives a definitive answer.
    pub commit_retry_limit: Option<u32>,
    /// Upper bound on whole-transaction replays after transient errors.
    pub transaction_retry_limit: Option<u32>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            event_chunk_size: 64,
            archive_channel_capacity: 4,
            read_chunk_size: 64 * 1024,
            temp_dir_prefix: TEMP_DIR_PREFIX.to_string(),
            commit_retry_limit: None,
            transaction_retry_limit: None,
        }
    }
}

impl ResolvedConfig {
    /// Loads and validates configuration from a TOML file.
    ///
    /// Missing keys fall back to [`ResolvedConfig::default`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the TOML is malformed, unknown keys are present,
    /// or any chunk size or channel capacity is zero.
    pub fn from_toml_file(path: &Path) -> AppResult<Self> {
        let contents = fs::read_to_string(path)?;
        let config: ResolvedConfig = toml::from_str(&contents)
            .map_err(|e| AppError::InvalidInput(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.event_chunk_size == 0 {
            return Err(AppError::InvalidInput(
                "Event chunk size must be greater than 0".into(),
            ));
        }
        if self.archive_channel_capacity == 0 {
            return Err(AppError::InvalidInput(
                "Archive channel capacity must be greater than 0".into(),
            ));
        }
        if self.read_chunk_size == 0 {
            return Err(AppError::InvalidInput(
                "Read chunk size must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn default_config_values() {
        let config = ResolvedConfig::default();
        assert_eq!(config.event_chunk_size, 64);
        assert_eq!(config.archive_channel_capacity, 4);
        assert_eq!(config.temp_dir_prefix, TEMP_DIR_PREFIX);
        assert!(config.commit_retry_limit.is_none());
        assert!(config.transaction_retry_limit.is_none());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(
            tmp,
            r#"
            event_chunk_size = 8
            commit_retry_limit = 10
            "#,
        )
        .unwrap();

        let config = ResolvedConfig::from_toml_file(tmp.path()).unwrap();
        assert_eq!(config.event_chunk_size, 8);
        assert_eq!(config.commit_retry_limit, Some(10));
        assert_eq!(config.archive_channel_capacity, 4);
    }

    #[test]
    fn unknown_key_errors() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(tmp, "extra_flag = true\n").unwrap();
        assert!(ResolvedConfig::from_toml_file(tmp.path()).is_err());
    }

    #[test]
    fn zero_capacity_errors() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(tmp, "archive_channel_capacity = 0\n").unwrap();
        match ResolvedConfig::from_toml_file(tmp.path()) {
            Err(AppError::InvalidInput(msg)) => assert!(msg.contains("capacity")),
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }
}
