use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::ranker::{RankerSettings, DEFAULT_TOP_K};
use crate::scoring::{ScoringTables, DEFAULT_PRIORITY_WEIGHTS, FALLBACK_PRIORITY_WEIGHT};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_repository_timeout_ms")]
    pub repository_timeout_ms: u64,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    #[serde(default = "default_persist_queue_capacity")]
    pub persist_queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoringConfig {
    /// Weights for priorities 1 through 5, in order.
    #[serde(default = "default_priority_weights")]
    pub priority_weights: [f64; 5],
    #[serde(default = "default_fallback_priority_weight")]
    pub default_priority_weight: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db_path: Option<String>,
    pub top_k: Option<usize>,
}

impl Config {
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config/rapid-dispatch/config.toml")
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(Self::default_path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("failed reading config: {}", path.display()))?;
        let parsed: Self = toml::from_str(&data)
            .with_context(|| format!("failed parsing TOML config: {}", path.display()))?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dispatch.top_k == 0 {
            return Err(anyhow!("dispatch.top_k must be at least 1"));
        }
        if self.dispatch.repository_timeout_ms == 0 || self.dispatch.store_timeout_ms == 0 {
            return Err(anyhow!(
                "dispatch.repository_timeout_ms and dispatch.store_timeout_ms must be positive"
            ));
        }
        let weights_ok = self
            .scoring
            .priority_weights
            .iter()
            .chain(std::iter::once(&self.scoring.default_priority_weight))
            .all(|w| w.is_finite() && *w >= 0.0);
        if !weights_ok {
            return Err(anyhow!("scoring weights must be finite and non-negative"));
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(host) = overrides.host {
            self.server.host = host;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(db_path) = overrides.db_path {
            self.storage.db_path = db_path;
        }
        if let Some(top_k) = overrides.top_k {
            self.dispatch.top_k = top_k;
        }
    }

    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed creating config directory: {}", parent.display())
            })?;
        }
        fs::write(path, Self::default_template())
            .with_context(|| format!("failed writing config template: {}", path.display()))
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    pub fn scoring_tables(&self) -> ScoringTables {
        ScoringTables::new(
            self.scoring.priority_weights,
            self.scoring.default_priority_weight,
        )
    }

    pub fn ranker_settings(&self) -> RankerSettings {
        RankerSettings {
            top_k: self.dispatch.top_k.max(1),
            repository_timeout: Duration::from_millis(self.dispatch.repository_timeout_ms),
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch.store_timeout_ms)
    }

    pub fn default_template() -> String {
        let template = r#"[server]
host = "0.0.0.0"
port = 8000

[storage]
db_path = "~/.local/share/rapid-dispatch/dispatch.db"

[dispatch]
top_k = 3
repository_timeout_ms = 5000
store_timeout_ms = 5000
persist_queue_capacity = 256

[scoring]
# weights for priorities 1..5; anything else uses default_priority_weight
priority_weights = [0.25, 0.5, 0.75, 0.9, 1.0]
default_priority_weight = 0.5
"#;
        template.to_string()
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            repository_timeout_ms: default_repository_timeout_ms(),
            store_timeout_ms: default_store_timeout_ms(),
            persist_queue_capacity: default_persist_queue_capacity(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            priority_weights: default_priority_weights(),
            default_priority_weight: default_fallback_priority_weight(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_db_path() -> String {
    "~/.local/share/rapid-dispatch/dispatch.db".to_string()
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_repository_timeout_ms() -> u64 {
    5_000
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

fn default_persist_queue_capacity() -> usize {
    256
}

fn default_priority_weights() -> [f64; 5] {
    DEFAULT_PRIORITY_WEIGHTS
}

fn default_fallback_priority_weight() -> f64 {
    FALLBACK_PRIORITY_WEIGHT
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Config, ConfigOverrides};
    use crate::scoring::ScoringTables;

    #[test]
    fn template_parses_to_defaults() {
        let parsed: Config = toml::from_str(&Config::default_template()).expect("template");
        assert_eq!(parsed, Config::default());
        assert_eq!(parsed.scoring_tables(), ScoringTables::default());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::load(Some(&dir.path().join("absent.toml"))).expect("load");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.dispatch.top_k, 3);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[dispatch]\ntop_k = 5\nrepository_timeout_ms = 250\n")
            .expect("write");
        let config = Config::load(Some(&path)).expect("load");
        assert_eq!(config.dispatch.top_k, 5);
        assert_eq!(
            config.ranker_settings().repository_timeout,
            Duration::from_millis(250)
        );
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn rejects_zero_top_k() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[dispatch]\ntop_k = 0\n").expect("write");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn rejects_zero_timeouts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        for body in [
            "[dispatch]\nrepository_timeout_ms = 0\n",
            "[dispatch]\nstore_timeout_ms = 0\n",
        ] {
            std::fs::write(&path, body).expect("write");
            let err = Config::load(Some(&path)).expect_err("zero timeout");
            assert!(err.to_string().contains("timeout_ms"));
        }
    }

    #[test]
    fn overrides_replace_loaded_values() {
        let mut config = Config::default();
        config.apply_overrides(ConfigOverrides {
            port: Some(9100),
            db_path: Some("/tmp/dispatch.db".to_string()),
            ..ConfigOverrides::default()
        });
        assert_eq!(config.server.port, 9100);
        assert_eq!(
            config.resolved_db_path(),
            std::path::PathBuf::from("/tmp/dispatch.db")
        );
    }
}
