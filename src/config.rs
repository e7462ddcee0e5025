use crate::device_client::{Credentials, DeviceInfo};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};
use tracing::info;

/// Settings document version written by this crate.
pub const CONFIG_VERSION: u32 = 2;

pub const DEFAULT_POLLING_INTERVAL_SECS: u64 = 10;

/// Fully populated runtime configuration for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub version: u32,
    pub host: String,
    pub password: String,
    #[serde(rename = "pollingInterval")]
    pub polling_interval_secs: u64,
    pub filter_readings: bool,
    #[serde(flatten)]
    pub device_info: DeviceInfo,
}

/// Settings as stored on disk; any field may be missing in older documents.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSettings {
    version: Option<u32>,
    #[serde(alias = "youLessIp")]
    host: Option<String>,
    password: Option<String>,
    polling_interval: Option<u64>,
    filter_readings: Option<bool>,
    model: Option<String>,
    firmware: Option<String>,
    mac: Option<String>,
    has_p1_meter: Option<String>,
    has_gas_meter: Option<String>,
    has_s0_meter: Option<String>,
}

impl StoredSettings {
    /// Backfills missing fields once so the runtime never has to check for them.
    fn migrate(self) -> Config {
        if self.version.is_none() {
            info!("migrating legacy settings to version {CONFIG_VERSION}");
        }
        Config {
            version: CONFIG_VERSION,
            host: self.host.unwrap_or_default(),
            password: self.password.unwrap_or_default(),
            polling_interval_secs: self
                .polling_interval
                .unwrap_or(DEFAULT_POLLING_INTERVAL_SECS),
            filter_readings: self.filter_readings.unwrap_or(false),
            device_info: DeviceInfo {
                model: self.model.unwrap_or_default(),
                firmware: self.firmware.unwrap_or_default(),
                mac: self.mac.unwrap_or_default(),
                has_p1_meter: self.has_p1_meter.unwrap_or_default(),
                has_gas_meter: self.has_gas_meter.unwrap_or_default(),
                has_s0_meter: self.has_s0_meter.unwrap_or_default(),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        StoredSettings::default().migrate()
    }
}

impl Config {
    /// Loads a settings document, migrates it, then applies environment overrides.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        let mut cfg = Self::from_json(&raw)?;
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Builds a configuration from environment variables only.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let stored: StoredSettings = serde_json::from_str(raw).context("parsing settings")?;
        Ok(stored.migrate())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            host: self.host.clone(),
            password: self.password.clone(),
        }
    }

    fn apply_env(&mut self) {
        if let Ok(host) = env::var("YOULESS_HOST") {
            self.host = host;
        }
        if let Ok(password) = env::var("YOULESS_PASSWORD") {
            self.password = password;
        }
        if let Some(interval) = env::var("YOULESS_POLL_INTERVAL")
            .ok()
            .and_then(|v| v.trim().parse().ok())
        {
            self.polling_interval_secs = interval;
        }
        if let Ok(filter) = env::var("YOULESS_FILTER_READINGS") {
            self.filter_readings = parse_bool_safe(Some(filter));
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.host.trim().is_empty(), "device host must be set");
        anyhow::ensure!(
            self.polling_interval_secs >= 1,
            "polling interval must be at least one second"
        );
        Ok(())
    }
}

/// Safely parses a boolean from an optional string, defaulting to false
fn parse_bool_safe(val: Option<String>) -> bool {
    val.unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
        .parse()
        .unwrap_or_default()
}
