use crate::device_client::RawSnapshot;
use crate::meter_state::MeterState;
use crate::validator;

/// Validation and derivation rules injected into the poll engine.
pub trait ReadingHandler: Send + Sync {
    fn validate(&self, raw: &RawSnapshot, prev: &MeterState) -> Result<(), String>;

    fn derive(&self, raw: &RawSnapshot, prev: &MeterState) -> MeterState;
}

/// Monotonic counter validation and the standard meter derivation.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardReadings;

impl ReadingHandler for StandardReadings {
    fn validate(&self, raw: &RawSnapshot, prev: &MeterState) -> Result<(), String> {
        match validator::rejection_reason(raw, prev) {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }

    fn derive(&self, raw: &RawSnapshot, prev: &MeterState) -> MeterState {
        prev.derive(raw)
    }
}
