//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Extra recompute attempts after a version conflict
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Cached reputations older than this are recomputed (0 = never by age)
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// Skip votes whose voter or target has no user record
    #[serde(default = "default_true")]
    pub verify_user_refs: bool,
}

fn default_max_retries() -> u32 { 3 }
fn default_max_age_secs() -> u64 { 24 * 60 * 60 }
fn default_true() -> bool { true }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_age_secs: default_max_age_secs(),
            verify_user_refs: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigFileError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Total recompute attempts per request, first try included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_gives_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.max_attempts(), 4);
    }

    #[test]
    fn fields_override_defaults() {
        let config = EngineConfig::from_toml_str("max_retries = 1\nmax_age_secs = 0\n").unwrap();
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.max_age_secs, 0);
        assert!(config.verify_user_refs);
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "verify_user_refs = false").unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert!(!config.verify_user_refs);
    }

    #[test]
    fn bad_types_are_rejected() {
        assert!(matches!(
            EngineConfig::from_toml_str("max_retries = \"three\""),
            Err(ConfigFileError::Parse(_))
        ));
        assert!(matches!(
            EngineConfig::load("/definitely/not/here.toml"),
            Err(ConfigFileError::Io(_))
        ));
    }
}
