//! Configuration management
//!
//! Settings live in `settings.json` inside the tally directory:
//! ```json
//! {
//!   "app": { "lookupTimeoutMs": 5000, ... },
//!   "statementProfiles": { "hdfc": { "columns": { ... } } }
//! }
//! ```
//! Fields the core does not manage are preserved on save.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

const DEFAULT_LOOKUP_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_LOOKUP_RETRIES: u32 = 3;
const DEFAULT_PROJECTION_CONCURRENCY: usize = 4;

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    app: AppSettings,
    #[serde(default)]
    statement_profiles: HashMap<String, StatementProfile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppSettings {
    lookup_timeout_ms: Option<u64>,
    max_lookup_retries: Option<u32>,
    projection_concurrency: Option<usize>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

/// Saved column mapping for one bank's statement CSV export
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementProfile {
    pub columns: ColumnMappings,
}

/// Which CSV headers carry the candidate fields
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMappings {
    pub date: String,
    pub description: String,
    pub amount: String,
    /// Column naming the transaction kind; rows default to expense when
    /// absent
    pub kind: Option<String>,
}

impl Default for ColumnMappings {
    fn default() -> Self {
        Self {
            date: "date".to_string(),
            description: "description".to_string(),
            amount: "amount".to_string(),
            kind: Some("type".to_string()),
        }
    }
}

/// Tally configuration (simplified view of settings)
#[derive(Debug, Clone)]
pub struct Config {
    /// Deadline for a single store lookup
    pub lookup_timeout_ms: u64,
    /// Bounded retries for a failed candidate lookup before it is reported
    /// as failed-pending-retry
    pub max_lookup_retries: u32,
    /// Concurrent per-account projections per request
    pub projection_concurrency: usize,
    pub statement_profiles: HashMap<String, StatementProfile>,
    // Keep the raw settings for preservation when saving
    _raw_settings: SettingsFile,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lookup_timeout_ms: DEFAULT_LOOKUP_TIMEOUT_MS,
            max_lookup_retries: DEFAULT_MAX_LOOKUP_RETRIES,
            projection_concurrency: DEFAULT_PROJECTION_CONCURRENCY,
            statement_profiles: HashMap::new(),
            _raw_settings: SettingsFile::default(),
        }
    }
}

impl Config {
    /// Load config from the tally directory
    ///
    /// The lookup timeout can be overridden via TALLY_LOOKUP_TIMEOUT_MS
    /// (for CI/testing).
    pub fn load(tally_dir: &Path) -> Result<Self> {
        let settings_path = tally_dir.join("settings.json");

        let raw: SettingsFile = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str(&content).unwrap_or_default()
        } else {
            SettingsFile::default()
        };

        let lookup_timeout_ms = std::env::var("TALLY_LOOKUP_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(raw.app.lookup_timeout_ms)
            .unwrap_or(DEFAULT_LOOKUP_TIMEOUT_MS);

        Ok(Self {
            lookup_timeout_ms,
            max_lookup_retries: raw
                .app
                .max_lookup_retries
                .unwrap_or(DEFAULT_MAX_LOOKUP_RETRIES),
            projection_concurrency: raw
                .app
                .projection_concurrency
                .unwrap_or(DEFAULT_PROJECTION_CONCURRENCY)
                .max(1),
            statement_profiles: raw.statement_profiles.clone(),
            _raw_settings: raw,
        })
    }

    /// Save config to the tally directory, preserving settings the core
    /// doesn't manage
    pub fn save(&self, tally_dir: &Path) -> Result<()> {
        let settings_path = tally_dir.join("settings.json");

        let mut settings = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str::<SettingsFile>(&content).unwrap_or_default()
        } else {
            SettingsFile::default()
        };

        settings.app.lookup_timeout_ms = Some(self.lookup_timeout_ms);
        settings.app.max_lookup_retries = Some(self.max_lookup_retries);
        settings.app.projection_concurrency = Some(self.projection_concurrency);
        settings.statement_profiles = self.statement_profiles.clone();

        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&settings_path, content)?;
        Ok(())
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_when_missing() {
        let dir = tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();

        assert_eq!(config.lookup_timeout_ms, DEFAULT_LOOKUP_TIMEOUT_MS);
        assert_eq!(config.max_lookup_retries, DEFAULT_MAX_LOOKUP_RETRIES);
        assert_eq!(config.projection_concurrency, DEFAULT_PROJECTION_CONCURRENCY);
        assert!(config.statement_profiles.is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();

        let mut config = Config::default();
        config.max_lookup_retries = 7;
        config.statement_profiles.insert(
            "hdfc".to_string(),
            StatementProfile {
                columns: ColumnMappings {
                    date: "Txn Date".to_string(),
                    description: "Narration".to_string(),
                    amount: "Withdrawal Amt".to_string(),
                    kind: None,
                },
            },
        );
        config.save(dir.path()).unwrap();

        let reloaded = Config::load(dir.path()).unwrap();
        assert_eq!(reloaded.max_lookup_retries, 7);
        let profile = reloaded.statement_profiles.get("hdfc").unwrap();
        assert_eq!(profile.columns.description, "Narration");
        assert!(profile.columns.kind.is_none());
    }

    #[test]
    fn test_save_preserves_unmanaged_fields() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("settings.json"),
            r#"{"app": {"theme": "dark"}}"#,
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();
        config.save(dir.path()).unwrap();

        let content = std::fs::read_to_string(dir.path().join("settings.json")).unwrap();
        assert!(content.contains("theme"));
    }
}
