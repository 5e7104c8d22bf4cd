use crate::error::{Result, ServerError};
use rollbux_coinflip::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_PORT: u16 = 5000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Seconds between attempts to settle quarantined wagers. 0 disables.
    pub reconcile_interval_secs: u64,
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("rollbux"),
            reconcile_interval_secs: 30,
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read a JSON config file. Missing keys keep their defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&raw).map_err(|e| {
            ServerError::config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Apply a `PORT` value from the environment.
    pub fn with_port_env(mut self, value: Option<&str>) -> Result<Self> {
        if let Some(raw) = value {
            self.port = raw
                .trim()
                .parse()
                .map_err(|_| ServerError::config(format!("Invalid PORT value '{}'", raw)))?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ServerError::config("Listen host cannot be empty"));
        }

        self.engine.validate()?;
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("rollbux.db")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.data_dir.ends_with("rollbux"));
        config.validate().unwrap();
    }

    #[test]
    fn test_port_env_override() {
        let config = ServerConfig::default().with_port_env(Some("7000")).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.listen_addr(), "0.0.0.0:7000");

        let config = ServerConfig::default().with_port_env(None).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);

        assert!(ServerConfig::default().with_port_env(Some("http")).is_err());
    }

    #[tokio::test]
    async fn test_load_partial_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("rollbux.json");
        tokio::fs::write(
            &path,
            r#"{"port": 6001, "engine": {"starting_balance": 100}}"#,
        )
        .await
        .unwrap();

        let config = ServerConfig::load(&path).await.unwrap();
        assert_eq!(config.port, 6001);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.engine.starting_balance, 100);
        assert_eq!(config.engine.payout_attempts, 5);

        tokio::fs::write(&path, "not json").await.unwrap();
        assert!(matches!(
            ServerConfig::load(&path).await,
            Err(ServerError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_engine_config() {
        let mut config = ServerConfig::default();
        config.engine.payout_attempts = 0;
        assert!(config.validate().is_err());
    }
}
