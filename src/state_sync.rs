use crate::meter_state::MeterState;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};
use tracing::warn;

/// Host-platform capabilities fed from [`MeterState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    MeasurePower,
    MeterOffPeak,
    MeasureGas,
    MeterGas,
    MeterPower,
    MeterPowerPeak,
    MeterPowerOffPeak,
    MeterPowerProducedPeak,
    MeterPowerProducedOffPeak,
}

impl Capability {
    pub fn id(self) -> &'static str {
        match self {
            Capability::MeasurePower => "measure_power",
            Capability::MeterOffPeak => "meter_offPeak",
            Capability::MeasureGas => "measure_gas",
            Capability::MeterGas => "meter_gas",
            Capability::MeterPower => "meter_power",
            Capability::MeterPowerPeak => "meter_power.peak",
            Capability::MeterPowerOffPeak => "meter_power.offPeak",
            Capability::MeterPowerProducedPeak => "meter_power.producedPeak",
            Capability::MeterPowerProducedOffPeak => "meter_power.producedOffPeak",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CapabilityValue {
    Number(Option<f64>),
    Flag(Option<bool>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trigger {
    TariffChanged { offpeak: bool },
    PowerChanged { power_w: f64 },
}

impl Trigger {
    pub fn id(&self) -> &'static str {
        match self {
            Trigger::TariffChanged { .. } => "tariff_changed",
            Trigger::PowerChanged { .. } => "power_changed",
        }
    }
}

/// Everything the poller reports to the host platform.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Capability(Capability, CapabilityValue),
    Available,
    Unavailable(String),
    Trigger(Trigger),
    SettingChanged { key: &'static str, value: String },
}

/// Sending half of the host-platform event channel.
#[derive(Debug, Clone)]
pub struct StateSync {
    sender: Sender<SyncEvent>,
}

impl StateSync {
    pub fn new(sender: Sender<SyncEvent>) -> Self {
        Self { sender }
    }

    pub fn channel(capacity: usize) -> (Self, Receiver<SyncEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Pushes every capability backed by `state`.
    pub fn push_meter_state(&self, state: &MeterState) {
        let values = [
            (
                Capability::MeasurePower,
                CapabilityValue::Number(state.instantaneous_power_w),
            ),
            (
                Capability::MeterOffPeak,
                CapabilityValue::Flag(state.is_offpeak_now),
            ),
            (
                Capability::MeasureGas,
                CapabilityValue::Number(state.instantaneous_gas_m3),
            ),
            (
                Capability::MeterGas,
                CapabilityValue::Number(state.cumulative_gas_m3),
            ),
            (
                Capability::MeterPower,
                CapabilityValue::Number(state.cumulative_energy_kwh),
            ),
            (
                Capability::MeterPowerPeak,
                CapabilityValue::Number(state.cumulative_energy_peak_kwh),
            ),
            (
                Capability::MeterPowerOffPeak,
                CapabilityValue::Number(state.cumulative_energy_offpeak_kwh),
            ),
            (
                Capability::MeterPowerProducedPeak,
                CapabilityValue::Number(state.cumulative_energy_peak_produced_kwh),
            ),
            (
                Capability::MeterPowerProducedOffPeak,
                CapabilityValue::Number(state.cumulative_energy_offpeak_produced_kwh),
            ),
        ];
        for (capability, value) in values {
            self.send(SyncEvent::Capability(capability, value));
        }
    }

    pub fn set_available(&self) {
        self.send(SyncEvent::Available);
    }

    pub fn set_unavailable(&self, reason: impl Into<String>) {
        self.send(SyncEvent::Unavailable(reason.into()));
    }

    pub fn trigger(&self, trigger: Trigger) {
        self.send(SyncEvent::Trigger(trigger));
    }

    pub fn setting_changed(&self, key: &'static str, value: String) {
        self.send(SyncEvent::SettingChanged { key, value });
    }

    /// Never waits on the consumer; events that do not fit are dropped.
    fn send(&self, event: SyncEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(?event, "state sync consumer lagging, dropping event")
            }
            Err(TrySendError::Closed(event)) => {
                warn!(?event, "state sync receiver closed, dropping event")
            }
        }
    }
}
