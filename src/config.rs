use crate::error::{EngineError, Result, ResultExt as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_DISABLE_RUNTIME: &str = "TABWRIGHT_DISABLE_RUNTIME";
pub const ENV_DATA_DIR: &str = "TABWRIGHT_DATA_DIR";

const MAX_AUDIT_ENTRIES: usize = 1000;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    /// `"runtime"` or `"memory"`.
    pub path: String,
    pub details: String,
}

/// Operations applied to a session, oldest first.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        action: impl Into<String>,
        path: impl Into<String>,
        details: impl Into<String>,
    ) {
        self.entries.push(AuditEntry {
            timestamp: Utc::now(),
            action: action.into(),
            path: path.into(),
            details: details.into(),
        });

        // Keep only last 1000 entries
        if self.entries.len() > MAX_AUDIT_ENTRIES {
            self.entries
                .drain(0..self.entries.len() - MAX_AUDIT_ENTRIES);
        }
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// When false the bridge never leaves Idle.
    pub enabled: bool,
    /// Components installed after load. Empty means the loader's defaults.
    pub components: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            components: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PreviewConfig {
    /// Rows shown by `preview_imputation`.
    pub impute_rows: usize,
    /// Converted and failed samples kept by `preview_coerce_numeric`.
    pub coercion_samples: usize,
    /// Rows listed by `missing_rows`.
    pub missing_rows: usize,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            impute_rows: 10,
            coercion_samples: 5,
            missing_rows: 20,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SnapshotConfig {
    pub capacity: usize,
    /// Capture a snapshot before every destructive operation.
    pub auto_capture: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            capacity: 1,
            auto_capture: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Root of the blob store. `None` uses the platform data directory.
    pub root: Option<PathBuf>,
    pub namespace: String,
    pub schema_version: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            root: None,
            namespace: "files".to_owned(),
            schema_version: 1,
        }
    }
}

impl PersistenceConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(default_data_dir)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub runtime: RuntimeConfig,
    pub preview: PreviewConfig,
    pub snapshot: SnapshotConfig,
    pub persistence: PersistenceConfig,
    /// Share of non-missing values that must parse for a column to count
    /// as numeric on the in-memory path.
    pub numeric_threshold: f64,
    pub refresh_summary_after_mutation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            preview: PreviewConfig::default(),
            snapshot: SnapshotConfig::default(),
            persistence: PersistenceConfig::default(),
            numeric_threshold: 0.6,
            refresh_summary_after_mutation: true,
        }
    }
}

impl EngineConfig {
    /// Checks ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.numeric_threshold) {
            return Err(EngineError::Config(format!(
                "numeric_threshold must be within 0..=1, got {}",
                self.numeric_threshold
            )));
        }
        if self.snapshot.capacity == 0 {
            return Err(EngineError::Config(
                "snapshot.capacity must be at least 1".to_owned(),
            ));
        }
        if self.persistence.namespace.trim().is_empty() {
            return Err(EngineError::Config(
                "persistence.namespace must not be empty".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if var(ENV_DISABLE_RUNTIME)
            .is_some_and(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        {
            self.runtime.enabled = false;
        }
        if let Some(dir) = var(ENV_DATA_DIR).filter(|v| !v.trim().is_empty()) {
            self.persistence.root = Some(PathBuf::from(dir));
        }
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tabwright")
}

pub fn get_config_path() -> PathBuf {
    default_data_dir().join("config.json")
}

/// Reads `path` (or the default config path) and applies environment
/// overrides. A missing file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let path = path.map_or_else(get_config_path, Path::to_path_buf);
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str::<EngineConfig>(&content)?
    } else {
        EngineConfig::default()
    };
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

pub fn save_config(config: &EngineConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
