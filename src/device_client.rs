use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Session credentials for the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub host: String,
    pub password: String,
}

/// Cumulative gas counter as reported by the gas submeter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GasReading {
    pub cumulative_m3: f64,
    /// Epoch seconds of the submeter's last reading.
    pub timestamp: i64,
}

/// One fetched set of raw readings.
///
/// Tariff split counters are absent when the device has no P1 meter attached,
/// and `gas` is absent without a gas submeter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSnapshot {
    /// Epoch seconds of the cumulative energy reading.
    pub timestamp: i64,
    pub power: f64,
    pub average_power: Option<f64>,
    pub cumulative_energy: f64,
    pub energy_peak: Option<f64>,
    pub energy_offpeak: Option<f64>,
    pub energy_peak_produced: Option<f64>,
    pub energy_offpeak_produced: Option<f64>,
    pub gas: Option<GasReading>,
    pub offpeak_now: Option<bool>,
}

/// Device metadata mirrored into the settings surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceInfo {
    pub model: String,
    pub firmware: String,
    pub mac: String,
    pub has_p1_meter: String,
    pub has_gas_meter: String,
    pub has_s0_meter: String,
}

impl DeviceInfo {
    /// Settings keys paired with their current values.
    pub fn fields(&self) -> [(&'static str, &str); 6] {
        [
            ("model", &self.model),
            ("firmware", &self.firmware),
            ("mac", &self.mac),
            ("hasP1Meter", &self.has_p1_meter),
            ("hasGasMeter", &self.has_gas_meter),
            ("hasS0Meter", &self.has_s0_meter),
        ]
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields()
            .into_iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    pub fn set_field(&mut self, key: &str, value: String) {
        match key {
            "model" => self.model = value,
            "firmware" => self.firmware = value,
            "mac" => self.mac = value,
            "hasP1Meter" => self.has_p1_meter = value,
            "hasGasMeter" => self.has_gas_meter = value,
            "hasS0Meter" => self.has_s0_meter = value,
            _ => {}
        }
    }
}

/// Transport and session capability for one metering device.
#[async_trait]
pub trait DeviceClient: Send {
    /// Establishes a fresh session with the given credentials.
    async fn login(&mut self, credentials: &Credentials) -> anyhow::Result<()>;

    fn logged_in(&self) -> bool;

    async fn fetch_advanced_status(&mut self) -> anyhow::Result<RawSnapshot>;

    async fn reboot(&mut self) -> anyhow::Result<()>;

    /// Pushes the host's clock to the device.
    async fn sync_time(&mut self) -> anyhow::Result<()>;

    /// Metadata last reported by the device. Blank fields are unknown.
    fn info(&self) -> DeviceInfo;
}
