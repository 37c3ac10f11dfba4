use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Vault root directory.  Empty means "auto-detect via
    /// `OBSIDIAN_VAULT_PATH`"; construction never fails when the vault is
    /// absent — the store reports `vault_available = false` instead.
    pub path: String,
    /// Subdirectory under the root that holds per-date note directories.
    pub daily_dir: String,
    /// Marker directory whose presence identifies a real vault root.
    pub marker: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            daily_dir: "daily".to_string(),
            marker: ".obsidian".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Debounce window in seconds: events arriving within one window are
    /// coalesced into a single note.
    pub debounce_window_secs: u64,
    /// Hard cap on queued events awaiting flush.
    pub max_pending: usize,
    /// Interval for the periodic backup probe, in hours.  0 disables it.
    pub backup_interval_hours: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_window_secs: 3,
            max_pending: 10_000,
            backup_interval_hours: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
        }
    }
}

/// Maps a queued event type to a belief-tracker observation.  Events whose
/// type matches no rule produce no observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationRule {
    pub event_type: String,
    /// Development phase the observation is attributed to.
    pub phase: String,
    /// Event-data key holding the observed five-dimension vector.
    pub vector_key: String,
    /// Event-data key holding the outcome flag.
    pub success_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeliefConfig {
    /// Project name used for the persisted belief file
    /// (`<state_dir>/bayesian/<project>.json`).
    pub project: String,
    /// Observation derivation table.  Empty by default — the mapping is
    /// deployment configuration, not something the core guesses at.
    pub observation_rules: Vec<ObservationRule>,
}

impl Default for BeliefConfig {
    fn default() -> Self {
        Self {
            project: "default".to_string(),
            observation_rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub vault: VaultConfig,
    pub sync: SyncConfig,
    pub cache: CacheConfig,
    pub breaker: BreakerConfig,
    pub belief: BeliefConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if config.vault.path.is_empty() {
            if let Ok(value) = env::var("OBSIDIAN_VAULT_PATH") {
                if !value.is_empty() {
                    config.vault.path = value;
                }
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn observation_rule(&self, event_type: &str) -> Option<&ObservationRule> {
        self.belief
            .observation_rules
            .iter()
            .find(|rule| rule.event_type == event_type)
    }
}

/// Resolve the state directory for persisted predictor/coordinator state.
///
/// Precedence: `UDO_STORAGE_DIR`, then `UDO_HOME`, then `<home>/.udo`.
/// Falls back to a relative `.udo` when no home directory can be determined
/// so the core keeps working in containers without `$HOME`.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = env::var("UDO_STORAGE_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    if let Ok(dir) = env::var("UDO_HOME") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    match env::var("HOME").or_else(|_| env::var("USERPROFILE")) {
        Ok(home) if !home.is_empty() => PathBuf::from(home).join(".udo"),
        _ => PathBuf::from(".udo"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.sync.debounce_window_secs, 3);
        assert_eq!(config.sync.max_pending, 10_000);
        assert_eq!(config.cache.max_bytes, 50 * 1024 * 1024);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.recovery_timeout_secs, 60);
        assert_eq!(config.vault.daily_dir, "daily");
    }

    #[test]
    fn round_trips_through_toml() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.vault.path = "/tmp/vault".to_string();
        config.belief.observation_rules.push(ObservationRule {
            event_type: "phase_transition".to_string(),
            phase: "design".to_string(),
            vector_key: "observed".to_string(),
            success_key: "success".to_string(),
        });
        config.save_to(&path)?;

        let loaded = AppConfig::load_from(&path)?;
        assert_eq!(loaded.vault.path, "/tmp/vault");
        assert_eq!(loaded.belief.observation_rules.len(), 1);
        assert!(loaded.observation_rule("phase_transition").is_some());
        assert!(loaded.observation_rule("git_commit").is_none());
        Ok(())
    }

    #[test]
    fn missing_file_yields_defaults() -> Result<()> {
        let loaded = AppConfig::load_from("/nonexistent/udo-config.toml")?;
        assert_eq!(loaded.sync.debounce_window_secs, 3);
        Ok(())
    }
}
