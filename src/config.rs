//! Configuration file management for the exporter.
//!
//! Settings come from three layers, later layers overriding earlier ones:
//! built-in defaults, an optional TOML file (`--config`) and command-line
//! flags. The merged [`Config`] is then resolved into validated [`Settings`].
//!
//! # File format
//!
//! ```toml
//! listen_address = ":9180"
//! metrics_path = "/metrics"
//! region = "ap-southeast-2"
//! query_interval = "60m"
//! trust_store_arns = [
//!     "arn:aws:elasticloadbalancing:ap-southeast-2:123456789012:truststore/clients/0123456789abcdef",
//! ]
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// One configuration layer. Unset fields defer to the layer below.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// Address to listen on for the web interface and telemetry
    pub listen_address: Option<String>,
    /// Path under which to expose metrics
    pub metrics_path: Option<String>,
    /// AWS region to query; auto-discovered when absent
    pub region: Option<String>,
    /// Interval between refreshes, as a duration such as "60m" or "1h30m"
    pub query_interval: Option<String>,
    /// Trust stores to monitor; all trust stores when absent
    pub trust_store_arns: Option<Vec<String>>,
}

/// Validated settings the exporter runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub listen_address: SocketAddr,
    pub metrics_path: String,
    pub region: Option<String>,
    pub query_interval: Duration,
    pub trust_store_arns: Vec<String>,
}

impl Default for Config {
    /// The bottom layer:
    ///
    /// - `listen_address`: ":9180"
    /// - `metrics_path`: "/metrics"
    /// - `region`: None (auto-discovered)
    /// - `query_interval`: "60m"
    /// - `trust_store_arns`: None (every trust store in the region)
    fn default() -> Self {
        Config {
            listen_address: Some(":9180".to_string()),
            metrics_path: Some("/metrics".to_string()),
            region: None,
            query_interval: Some("60m".to_string()),
            trust_store_arns: None,
        }
    }
}

impl Config {
    /// Reads a configuration layer from the TOML file at `path`.
    ///
    /// Fails with `ConfigError::Io` when the file cannot be read and with
    /// `ConfigError::Parse` when it is not a valid configuration.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Lays `other` on top of `self`: every field set in `other` wins.
    ///
    /// ```
    /// # use elb_trust_store_exporter::config::Config;
    /// let cli = Config::from_cli_args(None, None, Some("eu-west-1".to_string()), None, None);
    /// let merged = Config::default().merge_with(cli);
    /// assert_eq!(merged.region.as_deref(), Some("eu-west-1"));
    /// ```
    pub fn merge_with(mut self, other: Config) -> Self {
        if other.listen_address.is_some() {
            self.listen_address = other.listen_address;
        }
        if other.metrics_path.is_some() {
            self.metrics_path = other.metrics_path;
        }
        if other.region.is_some() {
            self.region = other.region;
        }
        if other.query_interval.is_some() {
            self.query_interval = other.query_interval;
        }
        if other.trust_store_arns.is_some() {
            self.trust_store_arns = other.trust_store_arns;
        }
        self
    }

    /// The command-line layer.
    pub fn from_cli_args(
        listen_address: Option<String>,
        metrics_path: Option<String>,
        region: Option<String>,
        query_interval: Option<String>,
        trust_store_arns: Option<Vec<String>>,
    ) -> Self {
        Config {
            listen_address,
            metrics_path,
            region,
            query_interval,
            trust_store_arns,
        }
    }

    /// A complete configuration file, printed by `--print-example-config`.
    pub fn example_toml() -> String {
        let example = Config {
            listen_address: Some(":9180".to_string()),
            metrics_path: Some("/metrics".to_string()),
            region: Some("ap-southeast-2".to_string()),
            query_interval: Some("60m".to_string()),
            trust_store_arns: Some(vec![
                "arn:aws:elasticloadbalancing:ap-southeast-2:123456789012:truststore/clients/0123456789abcdef"
                    .to_string(),
            ]),
        };

        toml::to_string_pretty(&example)
            .unwrap_or_else(|err| format!("# cannot render example: {}", err))
    }

    /// Validates the merged configuration.
    ///
    /// # Returns
    ///
    /// * `Ok(Settings)` - Every value is usable
    /// * `Err(ConfigError::Validation)` - A value is missing or invalid
    pub fn resolve(self) -> Result<Settings, ConfigError> {
        let listen_address = self
            .listen_address
            .ok_or_else(|| ConfigError::Validation("listen address is required".to_string()))?;
        let listen_address = parse_listen_address(&listen_address)?;

        let metrics_path = self.metrics_path.unwrap_or_else(|| "/metrics".to_string());
        if !metrics_path.starts_with('/') || metrics_path == "/" {
            return Err(ConfigError::Validation(format!(
                "metrics path must start with '/' and not be the root: {}",
                metrics_path
            )));
        }

        let query_interval = self
            .query_interval
            .ok_or_else(|| ConfigError::Validation("query interval is required".to_string()))?;
        let query_interval = parse_duration(&query_interval)?;
        if query_interval.is_zero() {
            return Err(ConfigError::Validation(
                "query interval must be greater than zero".to_string(),
            ));
        }

        let region = self
            .region
            .map(|region| region.trim().to_string())
            .filter(|region| !region.is_empty());

        let trust_store_arns = self
            .trust_store_arns
            .unwrap_or_default()
            .into_iter()
            .map(|arn| arn.trim().to_string())
            .filter(|arn| !arn.is_empty())
            .collect();

        Ok(Settings {
            listen_address,
            metrics_path,
            region,
            query_interval,
            trust_store_arns,
        })
    }
}

/// Parses `host:port`; a bare `:port` listens on every interface.
fn parse_listen_address(address: &str) -> Result<SocketAddr, ConfigError> {
    let address = if address.starts_with(':') {
        format!("0.0.0.0{}", address)
    } else {
        address.to_string()
    };

    address
        .to_socket_addrs()
        .map_err(|e| ConfigError::Validation(format!("invalid listen address {}: {}", address, e)))?
        .next()
        .ok_or_else(|| ConfigError::Validation(format!("listen address {} resolves to nothing", address)))
}

/// Parses a duration such as `300ms`, `90s`, `60m` or `1h30m`.
///
/// Units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`; numbers may carry a
/// fraction (`1.5h`). A bare `0` is accepted.
pub fn parse_duration(text: &str) -> Result<Duration, ConfigError> {
    let text = text.trim();
    if text == "0" {
        return Ok(Duration::ZERO);
    }
    if text.is_empty() {
        return Err(ConfigError::Validation("empty duration".to_string()));
    }

    let invalid = |reason: &str| ConfigError::Validation(format!("invalid duration {:?}: {}", text, reason));
    let mut seconds = 0f64;
    let mut rest = text;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(invalid("expected a number"));
        }
        let number: f64 = rest[..number_len]
            .parse()
            .map_err(|_| invalid("malformed number"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => return Err(invalid("missing unit")),
            _ => return Err(invalid("unknown unit")),
        };
        seconds += number * scale;
        rest = &rest[unit_len..];
    }

    Duration::try_from_secs_f64(seconds).map_err(|_| invalid("out of range"))
}

/// Failure to load or validate the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("IO Error: {0}")]
    Io(String),
    /// The configuration file is not valid TOML or a value has the wrong type
    #[error("Parse Error: {0}")]
    Parse(String),
    /// A value is missing or unusable
    #[error("Validation Error: {0}")]
    Validation(String),
}
