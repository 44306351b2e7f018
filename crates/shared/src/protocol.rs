//! Network-wide protocol constants.
//!
//! Every validator must run with the same values, so they are either taken
//! from the defaults below, a local TOML file, or the network's published
//! JSON configuration.

use crate::models::benchmark::BenchmarkShape;
use anyhow::{Context as _, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(feature = "testnet")]
const PUBLISHED_CONFIG_FILE: &str = "config/testnet.json";
#[cfg(not(feature = "testnet"))]
const PUBLISHED_CONFIG_FILE: &str = "config/mainnet.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TermConfig {
    pub origin_block: u64,
    pub blocks_per_term: u64,
    pub blocks_share_seed: u64,
    pub blocks_start_benchmark: u64,
    pub blocks_per_group: u64,
    pub blocks_seedhash_start: u64,
    pub blocks_seedhash_end: u64,
    pub validator_min_stake: f64,
    pub benchmark_shape: BenchmarkShape,
    pub group_size: usize,
}

impl Default for TermConfig {
    fn default() -> Self {
        Self {
            origin_block: 0,
            blocks_per_term: 400,
            blocks_share_seed: 10,
            blocks_start_benchmark: 20,
            blocks_per_group: 5,
            blocks_seedhash_start: 150,
            blocks_seedhash_end: 200,
            validator_min_stake: 10.0,
            benchmark_shape: BenchmarkShape::default(),
            group_size: 4,
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum ConfigError {
    ZeroLength(&'static str),
    WindowOrder {
        earlier: &'static str,
        later: &'static str,
    },
    WindowPastTermEnd(&'static str),
    InvalidShape(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroLength(field) => write!(f, "{field} must be greater than zero"),
            ConfigError::WindowOrder { earlier, later } => {
                write!(f, "{earlier} must come before {later}")
            }
            ConfigError::WindowPastTermEnd(field) => {
                write!(f, "{field} must not exceed blocks_per_term")
            }
            ConfigError::InvalidShape(shape) => {
                write!(f, "benchmark_shape {shape} has no valid payload size")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl TermConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.blocks_per_term == 0 {
            return Err(ConfigError::ZeroLength("blocks_per_term"));
        }
        if self.blocks_per_group == 0 {
            return Err(ConfigError::ZeroLength("blocks_per_group"));
        }
        if self.group_size == 0 {
            return Err(ConfigError::ZeroLength("group_size"));
        }
        if !matches!(self.benchmark_shape.payload_bytes(), Some(size) if size > 0) {
            return Err(ConfigError::InvalidShape(self.benchmark_shape.to_string()));
        }
        if self.blocks_share_seed > self.blocks_start_benchmark {
            return Err(ConfigError::WindowOrder {
                earlier: "blocks_share_seed",
                later: "blocks_start_benchmark",
            });
        }
        if self.blocks_start_benchmark >= self.blocks_seedhash_start {
            return Err(ConfigError::WindowOrder {
                earlier: "blocks_start_benchmark",
                later: "blocks_seedhash_start",
            });
        }
        if self.blocks_seedhash_start >= self.blocks_seedhash_end {
            return Err(ConfigError::WindowOrder {
                earlier: "blocks_seedhash_start",
                later: "blocks_seedhash_end",
            });
        }
        if self.blocks_seedhash_end > self.blocks_per_term {
            return Err(ConfigError::WindowPastTermEnd("blocks_seedhash_end"));
        }
        Ok(())
    }

    /// Reads a TOML file. Missing keys fall back to the defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: TermConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Fetches the configuration the network publishes under `base_url`.
    pub async fn fetch(base_url: &url::Url) -> Result<Self> {
        let url = base_url
            .join(PUBLISHED_CONFIG_FILE)
            .context("invalid config url")?;
        let response = reqwest::get(url.clone())
            .await
            .with_context(|| format!("failed to fetch config from {url}"))?
            .error_for_status()?;
        let config: TermConfig = response.json().await.context("invalid config payload")?;
        config.validate()?;
        info!("Loaded configuration from {url}: {config:?}");
        Ok(config)
    }

    /// Probe timeout in seconds: eight seconds per group block, kept within
    /// [50, 100].
    pub fn probe_timeout_secs(&self) -> u64 {
        (self.blocks_per_group * 8).clamp(50, 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_defaults_are_valid() {
        assert_eq!(TermConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_rejects_shapes_without_payload_size() {
        for dims in [vec![0, 4], vec![usize::MAX, 2]] {
            let config = TermConfig {
                benchmark_shape: BenchmarkShape(dims),
                ..Default::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidShape(_))
            ));
        }
    }

    #[test]
    fn test_rejects_overlapping_windows() {
        let config = TermConfig {
            blocks_start_benchmark: 160,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::WindowOrder {
                earlier: "blocks_start_benchmark",
                later: "blocks_seedhash_start",
            })
        );

        let config = TermConfig {
            blocks_seedhash_end: 401,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::WindowPastTermEnd("blocks_seedhash_end"))
        );
    }

    #[test]
    fn test_probe_timeout_is_clamped() {
        let mut config = TermConfig::default();
        assert_eq!(config.probe_timeout_secs(), 50);
        config.blocks_per_group = 10;
        assert_eq!(config.probe_timeout_secs(), 80);
        config.blocks_per_group = 40;
        assert_eq!(config.probe_timeout_secs(), 100);
    }

    #[test]
    fn test_load_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "blocks_per_term = 100").unwrap();
        writeln!(file, "blocks_per_group = 10").unwrap();
        writeln!(file, "blocks_seedhash_start = 60").unwrap();
        writeln!(file, "blocks_seedhash_end = 80").unwrap();
        writeln!(file, "benchmark_shape = [2, 8]").unwrap();

        let config = TermConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.blocks_per_term, 100);
        assert_eq!(config.blocks_start_benchmark, 20);
        assert_eq!(config.benchmark_shape, BenchmarkShape(vec![2, 8]));
    }

    #[tokio::test]
    async fn test_fetch_published_config() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", format!("/{PUBLISHED_CONFIG_FILE}").as_str())
            .with_status(200)
            .with_body(r#"{"blocks_per_term": 360, "validator_min_stake": 5000}"#)
            .create_async()
            .await;

        let base = url::Url::parse(&format!("{}/", server.url())).unwrap();
        let config = TermConfig::fetch(&base).await.unwrap();
        assert_eq!(config.blocks_per_term, 360);
        assert_eq!(config.validator_min_stake, 5000.0);
        mock.assert_async().await;
    }
}
