//! CLI command implementations for `sluice`.
//!
//! - [`ingest`] -- One stream, printed as it arrives.
//! - [`presets`] -- Resolved configuration dump.
//! - [`serve`] -- HTTP API with the rate-limit sweeper.

pub mod ingest;
pub mod presets;
pub mod serve;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sluice_core::StreamIngestor;
use sluice_llm::HttpStreamProvider;
use sluice_types::Config;

/// Env var naming a config file.
pub const CONFIG_ENV: &str = "SLUICE_CONFIG";

/// Find the config file to load.
///
/// 1. `SLUICE_CONFIG` env var (returned even if the file is missing)
/// 2. `~/.sluice/config.json`, if it exists
pub fn discover_config_path(env_value: Option<String>, home_dir: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = env_value.filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    let path = home_dir?.join(".sluice").join("config.json");
    path.exists().then_some(path)
}

/// Load configuration from the given path override or via discovery.
///
/// Returns a default `Config` if no config file is found.
pub async fn load_config(config_override: Option<&str>) -> anyhow::Result<Config> {
    let path = match config_override {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!("config file not found: {path_str}");
            }
            Some(path.to_path_buf())
        }
        None => discover_config_path(std::env::var(CONFIG_ENV).ok(), dirs::home_dir()),
    };

    let Some(path) = path else {
        tracing::debug!("no config file found, using defaults");
        return Ok(Config::default());
    };

    let raw = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
    let config = Config::from_json_str(&raw)
        .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?;
    tracing::debug!(path = %path.display(), "config loaded");
    Ok(config)
}

/// Ingestor for the HTTP provider in `config`, with `url` taking
/// precedence over the configured endpoint.
pub fn build_ingestor(mut config: Config, url: Option<String>) -> anyhow::Result<StreamIngestor> {
    if let Some(url) = url {
        config.provider.url = Some(url);
    }
    let provider = HttpStreamProvider::new(config.provider.clone())?;
    let ingestor = StreamIngestor::from_config(Arc::new(provider), &config)?;
    Ok(ingestor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_wins_even_when_missing() {
        let path = discover_config_path(Some("/nowhere/cfg.json".into()), None);
        assert_eq!(path, Some(PathBuf::from("/nowhere/cfg.json")));
    }

    #[test]
    fn home_config_used_only_when_present() {
        let home = tempfile::tempdir().unwrap();
        assert!(discover_config_path(None, Some(home.path().to_path_buf())).is_none());

        let dir = home.path().join(".sluice");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("config.json"), "{}").unwrap();
        assert_eq!(
            discover_config_path(Some(String::new()), Some(home.path().to_path_buf())),
            Some(dir.join("config.json"))
        );
    }

    #[tokio::test]
    async fn explicit_config_is_loaded_and_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"retry": {"maxRetries": 5}}"#).unwrap();
        let config = load_config(path.to_str()).await.unwrap();
        assert_eq!(config.retry.max_retries, 5);

        std::fs::write(&path, r#"{"stream": {"checkpointInterval": 0}}"#).unwrap();
        assert!(load_config(path.to_str()).await.is_err());
    }

    #[tokio::test]
    async fn missing_explicit_config_is_an_error() {
        let err = load_config(Some("/definitely/not/here.json"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn url_override_reaches_the_provider() {
        let ingestor = build_ingestor(Config::default(), Some("http://127.0.0.1:1/s".into())).unwrap();
        assert_eq!(ingestor.provider().name(), "llm-provider");
    }
}
