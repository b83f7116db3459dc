//! Node configuration: a TOML file layered over defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use umbra_network::NetworkConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// The top-level umbrad configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UmbradConfig {
    /// P2P settings.
    pub network: NetworkConfig,
    /// State storage settings.
    pub state: umbra_state::Config,
    /// A tracing filter directive, e.g. `info` or `umbra_network=debug`.
    pub tracing_filter: Option<String>,
}

impl UmbradConfig {
    /// Load from `path`, or fall back to defaults when no file exists.
    pub fn load(path: Option<&Path>) -> Result<UmbradConfig, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match UmbradConfig::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(UmbradConfig::default()),
            },
        };
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// `$XDG_CONFIG_HOME/umbrad/umbrad.toml` (platform equivalent).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("umbrad").join("umbrad.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_explicit_file_is_an_error_and_defaults_are_sane() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonexistent.toml");
        assert!(UmbradConfig::load(Some(&path)).is_err());

        let config = UmbradConfig::default();
        assert_eq!(config.network.listen_addr.port(), 8655);
        assert!(config.state.cache_dir.is_none());
        assert!(config.tracing_filter.is_none());
    }

    #[test]
    fn parses_a_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("umbrad.toml");
        std::fs::write(
            &path,
            r#"
tracing_filter = "debug"

[network]
network = "Testnet"
listen_addr = "127.0.0.1:18655"
initial_peers = ["127.0.0.1:28655"]

[state]
cache_dir = "/tmp/umbra-test"
"#,
        )
        .unwrap();
        let config = UmbradConfig::load(Some(&path)).unwrap();
        assert_eq!(config.tracing_filter.as_deref(), Some("debug"));
        assert_eq!(
            config.network.network,
            umbra_chain::parameters::Network::Testnet
        );
        assert_eq!(config.network.initial_peers.len(), 1);
        assert_eq!(
            config.state.cache_dir.as_deref(),
            Some(Path::new("/tmp/umbra-test"))
        );
    }
}
