use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Directory holding the config file and the default database.
pub const CONFIG_DIR: &str = ".veritas";
pub const CONFIG_FILE: &str = "config.toml";

/// Top-level Veritas configuration, matching `.veritas/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VeritasConfig {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub ingest: IngestSection,
    #[serde(default)]
    pub validate: ValidateSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Database path, relative to the directory containing `.veritas/`.
    pub path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from(CONFIG_DIR).join("graph.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSection {
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    /// Extraction threads; `0` uses the number of available cores.
    pub workers: usize,
    /// Parse + extraction budget per file.
    pub file_budget_ms: u64,
    /// Attempts after a `WriteConflict` before the file is marked failed.
    pub write_retries: u32,
    /// Initial backoff between write retries, doubled on each attempt.
    pub retry_backoff_ms: u64,
    /// Leading directories stripped when computing module paths.
    pub source_roots: Vec<String>,
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            include_patterns: vec!["**/*.py".into(), "**/*.pyi".into()],
            exclude_patterns: vec![
                "**/.git/**".into(),
                "**/.venv/**".into(),
                "**/venv/**".into(),
                "**/__pycache__/**".into(),
                "**/site-packages/**".into(),
                "**/node_modules/**".into(),
                "**/.tox/**".into(),
                "**/build/**".into(),
                "**/dist/**".into(),
            ],
            workers: 0,
            file_budget_ms: 5_000,
            write_retries: 3,
            retry_backoff_ms: 25,
            source_roots: vec!["src".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidateSection {
    /// Wall-clock budget for validating one script.
    pub budget_ms: u64,
    /// Maximum "did you mean" suggestions per verdict.
    pub suggestion_limit: usize,
    /// Minimum similarity ratio (0..=1) for a name to be suggested.
    pub similarity_threshold: f32,
}

impl Default for ValidateSection {
    fn default() -> Self {
        Self {
            budget_ms: 30_000,
            suggestion_limit: 3,
            similarity_threshold: 0.6,
        }
    }
}

impl VeritasConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    /// Load from a file that must exist.
    pub fn load_required(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        Self::load(path)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reject values that parse but make no sense.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ingest.include_patterns.is_empty() {
            return Err(ConfigError::Invalid(
                "ingest.include_patterns must not be empty".into(),
            ));
        }
        if self.ingest.file_budget_ms == 0 {
            return Err(ConfigError::Invalid(
                "ingest.file_budget_ms must be positive".into(),
            ));
        }
        if self.validate.budget_ms == 0 {
            return Err(ConfigError::Invalid(
                "validate.budget_ms must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.validate.similarity_threshold) {
            return Err(ConfigError::Invalid(format!(
                "validate.similarity_threshold must be within 0..=1, got {}",
                self.validate.similarity_threshold
            )));
        }
        Ok(())
    }

    /// Number of extraction threads to use.
    pub fn worker_count(&self) -> usize {
        if self.ingest.workers > 0 {
            self.ingest.workers
        } else {
            std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
        }
    }

    /// Absolute database path for a workspace rooted at `root`.
    pub fn db_path(&self, root: &Path) -> PathBuf {
        if self.store.path.is_absolute() {
            self.store.path.clone()
        } else {
            root.join(&self.store.path)
        }
    }
}

/// Config file location for a workspace root.
pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_DIR).join(CONFIG_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = VeritasConfig::load(Path::new("/nonexistent/veritas/config.toml")).unwrap();
        assert_eq!(config.ingest.write_retries, 3);
        assert_eq!(config.validate.suggestion_limit, 3);
        assert_eq!(config.ingest.source_roots, vec!["src"]);
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config = VeritasConfig::from_toml(
            r#"
[ingest]
workers = 2
exclude_patterns = ["**/tests/**"]

[validate]
budget_ms = 500
"#,
        )
        .unwrap();
        assert_eq!(config.worker_count(), 2);
        assert_eq!(config.ingest.exclude_patterns, vec!["**/tests/**"]);
        assert_eq!(config.ingest.include_patterns, vec!["**/*.py", "**/*.pyi"]);
        assert_eq!(config.validate.budget_ms, 500);
        assert!((config.validate.similarity_threshold - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = VeritasConfig::from_toml("[ingest\nworkers = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = VeritasConfig::from_toml("[validate]\nsimilarity_threshold = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = VeritasConfig::from_toml("[ingest]\ninclude_patterns = []\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let text = VeritasConfig::default().to_toml().unwrap();
        let parsed = VeritasConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.store.path, StoreSection::default().path);
        assert_eq!(parsed.ingest.file_budget_ms, 5_000);
    }

    #[test]
    fn relative_db_path_is_joined_to_root() {
        let config = VeritasConfig::default();
        assert_eq!(
            config.db_path(Path::new("/work")),
            PathBuf::from("/work/.veritas/graph.db")
        );
    }
}
