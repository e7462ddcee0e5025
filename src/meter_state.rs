use crate::device_client::RawSnapshot;

/// Length of the averaging interval for power derived from cumulative energy.
pub const INTERVAL_SECS: i64 = 120;

const SECONDS_PER_HOUR: f64 = 3600.0;
const WATT_SECONDS_PER_KWH: f64 = 3_600_000.0;

/// Latest derived readings for one device. Everything is `None` until the
/// first valid reading has been committed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeterState {
    pub instantaneous_power_w: Option<f64>,
    pub average_power_w: Option<f64>,
    pub cumulative_energy_kwh: Option<f64>,
    pub cumulative_energy_peak_kwh: Option<f64>,
    pub cumulative_energy_offpeak_kwh: Option<f64>,
    pub cumulative_energy_peak_produced_kwh: Option<f64>,
    pub cumulative_energy_offpeak_produced_kwh: Option<f64>,
    pub cumulative_energy_timestamp: Option<i64>,
    /// Cumulative energy captured at the last interval boundary.
    pub interval_energy_kwh: Option<f64>,
    pub interval_timestamp: Option<i64>,
    /// Gas flow in m3 per hour.
    pub instantaneous_gas_m3: Option<f64>,
    pub cumulative_gas_m3: Option<f64>,
    pub cumulative_gas_timestamp: Option<i64>,
    pub is_offpeak_now: Option<bool>,
}

impl MeterState {
    /// Builds the state that follows `self` once `raw` is accepted.
    pub fn derive(&self, raw: &RawSnapshot) -> MeterState {
        let mut next = MeterState {
            instantaneous_power_w: Some(raw.power),
            average_power_w: self.average_power_w,
            cumulative_energy_kwh: Some(raw.cumulative_energy),
            cumulative_energy_peak_kwh: raw.energy_peak,
            cumulative_energy_offpeak_kwh: raw.energy_offpeak,
            cumulative_energy_peak_produced_kwh: raw.energy_peak_produced,
            cumulative_energy_offpeak_produced_kwh: raw.energy_offpeak_produced,
            cumulative_energy_timestamp: Some(raw.timestamp),
            interval_energy_kwh: self.interval_energy_kwh,
            interval_timestamp: self.interval_timestamp,
            instantaneous_gas_m3: None,
            cumulative_gas_m3: None,
            cumulative_gas_timestamp: None,
            is_offpeak_now: raw.offpeak_now,
        };

        if self.interval_advanced(raw.timestamp) {
            if let (Some(energy), Some(since)) = (self.interval_energy_kwh, self.interval_timestamp)
            {
                let elapsed = raw.timestamp - since;
                if elapsed > 0 {
                    next.average_power_w = Some(
                        (raw.cumulative_energy - energy) * WATT_SECONDS_PER_KWH / elapsed as f64,
                    );
                }
            }
            next.interval_energy_kwh = Some(raw.cumulative_energy);
            next.interval_timestamp = Some(raw.timestamp);
        }
        if raw.average_power.is_some() {
            next.average_power_w = raw.average_power;
        }

        if let Some(gas) = raw.gas {
            next.instantaneous_gas_m3 = match (self.cumulative_gas_m3, self.cumulative_gas_timestamp)
            {
                (Some(previous), Some(since)) if gas.timestamp > since => Some(
                    (gas.cumulative_m3 - previous) * SECONDS_PER_HOUR
                        / (gas.timestamp - since) as f64,
                ),
                _ => self.instantaneous_gas_m3.or(Some(0.0)),
            };
            next.cumulative_gas_m3 = Some(gas.cumulative_m3);
            next.cumulative_gas_timestamp = Some(gas.timestamp);
        }

        next
    }

    /// True once `timestamp` lies in a later interval than the stored boundary.
    fn interval_advanced(&self, timestamp: i64) -> bool {
        match self.interval_timestamp {
            None => true,
            Some(stored) => interval_start(timestamp) > stored,
        }
    }
}

fn interval_start(timestamp: i64) -> i64 {
    timestamp - timestamp.rem_euclid(INTERVAL_SECS)
}
