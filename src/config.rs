//! Command line and configuration file handling.
//!
//! The configuration file is JSON:
//!
//! ```json
//! {
//!     "batteries": ["A4:C1:38:00:11:22", "A4:C1:38:00:33:44"],
//!     "update_interval": 60,
//!     "vendor": "liontron",
//!     "base_topic": "liontron",
//!     "log_level": "info"
//! }
//! ```
//!
//! Values given on the command line take precedence over the file.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const DEFAULT_UPDATE_INTERVAL_S: u64 = 60;
const DEFAULT_VENDOR: &str = "liontron";
const DEFAULT_BASE_TOPIC: &str = "liontron";
const DEFAULT_LOG_LEVEL: &str = "info";

/// The Bluetooth address of a BMS in canonical `AA:BB:CC:DD:EE:FF` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The address as 12 lower case hex digits, e.g. `a4c138001122`.
    pub fn compact(&self) -> String {
        self.0.replace(':', "").to_lowercase()
    }
}

impl FromStr for DeviceAddress {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let octets: Vec<&str> = s.trim().split(':').collect();
        let valid = octets.len() == 6
            && octets
                .iter()
                .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
        if !valid {
            return Err(ConfigError::InvalidAddress(s.to_string()));
        }

        Ok(Self(octets.join(":").to_uppercase()))
    }
}

impl TryFrom<String> for DeviceAddress {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceAddress> for String {
    fn from(address: DeviceAddress) -> Self {
        address.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Parser, Debug, Default)]
#[command(name = "bmsread")]
#[command(about = "Poll BLE battery management systems and publish their telemetry")]
pub struct Cli {
    /// JSON configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address of a BMS to poll, may be given more than once
    #[arg(short, long = "device", value_name = "ADDR")]
    pub devices: Vec<DeviceAddress>,

    /// Seconds to wait between polling cycles
    #[arg(short, long, value_name = "SECS")]
    pub interval: Option<u64>,

    /// Prefix of the published device names
    #[arg(long)]
    pub vendor: Option<String>,

    /// Root of the published topics
    #[arg(long)]
    pub base_topic: Option<String>,

    /// One of error, warn, info, debug, trace. RUST_LOG takes precedence.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Poll every device once and exit
    #[arg(long)]
    pub once: bool,
}

/// Contents of the configuration file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub batteries: Vec<DeviceAddress>,
    pub update_interval: Option<u64>,
    pub vendor: Option<String>,
    pub base_topic: Option<String>,
    pub log_level: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }
}

/// The effective configuration of the poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub devices: Vec<DeviceAddress>,
    pub interval: Duration,
    pub vendor: String,
    pub base_topic: String,
    pub log_level: String,
    pub once: bool,
}

impl Config {
    /// Read the configuration file named on the command line, if any, and merge the two.
    pub fn load(cli: Cli) -> anyhow::Result<Self> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };

        Ok(Self::merge(file, cli)?)
    }

    pub fn merge(file: FileConfig, cli: Cli) -> Result<Self, ConfigError> {
        let devices = if cli.devices.is_empty() {
            file.batteries
        } else {
            cli.devices
        };
        if devices.is_empty() {
            return Err(ConfigError::NoDevices);
        }

        let interval = cli
            .interval
            .or(file.update_interval)
            .unwrap_or(DEFAULT_UPDATE_INTERVAL_S);
        if interval == 0 {
            return Err(ConfigError::ZeroInterval);
        }

        Ok(Self {
            devices,
            interval: Duration::from_secs(interval),
            vendor: cli
                .vendor
                .or(file.vendor)
                .unwrap_or_else(|| DEFAULT_VENDOR.to_string()),
            base_topic: cli
                .base_topic
                .or(file.base_topic)
                .unwrap_or_else(|| DEFAULT_BASE_TOPIC.to_string()),
            log_level: cli
                .log_level
                .or(file.log_level)
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            once: cli.once,
        })
    }
}

#[test]
fn test_parse_address() {
    let address: DeviceAddress = "a4:c1:38:0a:bb:cc".parse().unwrap();
    assert_eq!(address.as_str(), "A4:C1:38:0A:BB:CC");
    assert_eq!(address.compact(), "a4c1380abbcc");
}

#[test]
fn test_parse_address_invalid() {
    for bad in ["", "A4:C1:38:0A:BB", "A4:C1:38:0A:BB:CC:DD", "A4-C1-38-0A-BB-CC", "G4:C1:38:0A:BB:CC"] {
        assert_eq!(
            bad.parse::<DeviceAddress>(),
            Err(ConfigError::InvalidAddress(bad.to_string()))
        );
    }
}

#[test]
fn test_file_config() {
    let file: FileConfig = serde_json::from_str(
        r#"{"batteries": ["a4:c1:38:00:11:22"], "update_interval": 30, "vendor": "acme"}"#,
    )
    .unwrap();
    let config = Config::merge(file, Cli::default()).unwrap();
    assert_eq!(config.devices, vec!["A4:C1:38:00:11:22".parse().unwrap()]);
    assert_eq!(config.interval, Duration::from_secs(30));
    assert_eq!(config.vendor, "acme");
    assert_eq!(config.base_topic, "liontron");
    assert_eq!(config.log_level, "info");
}

#[test]
fn test_file_config_rejects_bad_address() {
    let result = serde_json::from_str::<FileConfig>(r#"{"batteries": ["nope"]}"#);
    assert!(result.is_err());
}

#[test]
fn test_cli_overrides_file() {
    let file: FileConfig = serde_json::from_str(
        r#"{"batteries": ["a4:c1:38:00:11:22"], "update_interval": 30}"#,
    )
    .unwrap();
    let cli = Cli::parse_from([
        "bmsread",
        "--device",
        "A4:C1:38:00:33:44",
        "-d",
        "A4:C1:38:00:55:66",
        "--interval",
        "5",
        "--once",
    ]);
    let config = Config::merge(file, cli).unwrap();
    assert_eq!(config.devices.len(), 2);
    assert_eq!(config.devices[0].as_str(), "A4:C1:38:00:33:44");
    assert_eq!(config.interval, Duration::from_secs(5));
    assert!(config.once);
}

#[test]
fn test_config_validation() {
    assert_eq!(
        Config::merge(FileConfig::default(), Cli::default()),
        Err(ConfigError::NoDevices)
    );

    let cli = Cli::parse_from(["bmsread", "-d", "A4:C1:38:00:33:44", "-i", "0"]);
    assert_eq!(
        Config::merge(FileConfig::default(), cli),
        Err(ConfigError::ZeroInterval)
    );
}
