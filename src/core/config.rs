use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::core::PeerIdentity;
use crate::utils::{P2PError, Result};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// `host:port` this node listens on and announces as its origin.
    pub address: String,
    pub neighbors_file: PathBuf,
    pub shared_dir: PathBuf,
    /// Where downloads land. Falls back to `shared_dir`.
    pub download_dir: Option<PathBuf>,
    /// Connect and read timeout for every outbound call.
    pub request_timeout: Duration,
    /// Ceiling for one received line, `FILE` payloads included.
    pub max_message_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:5000".to_string(),
            neighbors_file: PathBuf::from("./neighbors.txt"),
            shared_dir: PathBuf::from("./shared"),
            download_dir: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl Config {
    /// Check the startup arguments and return the parsed local identity.
    pub fn validate(&self) -> Result<PeerIdentity> {
        let identity: PeerIdentity = self.address.parse().map_err(|_| {
            P2PError::ConfigError(format!(
                "Invalid address:port format '{}'",
                self.address
            ))
        })?;

        if !self.neighbors_file.is_file() {
            return Err(P2PError::ConfigError(format!(
                "Neighbors file '{}' not found",
                self.neighbors_file.display()
            )));
        }

        if !self.shared_dir.is_dir() {
            return Err(P2PError::ConfigError(format!(
                "Shared directory '{}' not found or invalid",
                self.shared_dir.display()
            )));
        }

        if self.request_timeout.is_zero() {
            return Err(P2PError::ConfigError(
                "Request timeout must be greater than zero".to_string(),
            ));
        }

        if self.max_message_size == 0 {
            return Err(P2PError::ConfigError(
                "Maximum message size must be greater than zero".to_string(),
            ));
        }

        Ok(identity)
    }

    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .unwrap_or_else(|| self.shared_dir.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config(dir: &tempfile::TempDir) -> Config {
        let neighbors = dir.path().join("neighbors.txt");
        std::fs::write(&neighbors, "127.0.0.1:5001\n").unwrap();
        Config {
            address: "127.0.0.1:5000".to_string(),
            neighbors_file: neighbors,
            shared_dir: dir.path().to_path_buf(),
            ..Config::default()
        }
    }

    #[test]
    fn test_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = valid_config(&dir);
        let identity = config.validate().unwrap();
        assert_eq!(identity, PeerIdentity::new("127.0.0.1", 5000));
        assert_eq!(config.download_dir(), dir.path());
    }

    #[test]
    fn test_rejects_bad_address() {
        let dir = tempfile::tempdir().unwrap();
        for address in ["127.0.0.1", "127.0.0.1:http", "a:b:5000"] {
            let config = Config {
                address: address.to_string(),
                ..valid_config(&dir)
            };
            assert!(matches!(config.validate(), Err(P2PError::ConfigError(_))));
        }
    }

    #[test]
    fn test_rejects_missing_paths() {
        let dir = tempfile::tempdir().unwrap();

        let config = Config {
            neighbors_file: dir.path().join("missing.txt"),
            ..valid_config(&dir)
        };
        assert!(config.validate().is_err());

        let config = Config {
            shared_dir: dir.path().join("missing"),
            ..valid_config(&dir)
        };
        assert!(config.validate().is_err());
    }
}
