use crate::device_client::RawSnapshot;
use crate::meter_state::MeterState;

/// Largest decrease of a cumulative counter still treated as unchanged.
pub const DECREASE_TOLERANCE: f64 = 1e-9;

/// Decides whether `raw` is a plausible successor of `prev`.
pub fn is_valid(raw: &RawSnapshot, prev: &MeterState) -> bool {
    rejection_reason(raw, prev).is_none()
}

/// Describes why `raw` is not a plausible successor of `prev`, if it isn't.
pub fn rejection_reason(raw: &RawSnapshot, prev: &MeterState) -> Option<String> {
    let numbers = [
        ("power", Some(raw.power)),
        ("average power", raw.average_power),
        ("energy", Some(raw.cumulative_energy)),
        ("peak energy", raw.energy_peak),
        ("off-peak energy", raw.energy_offpeak),
        ("peak production", raw.energy_peak_produced),
        ("off-peak production", raw.energy_offpeak_produced),
        ("gas", raw.gas.map(|gas| gas.cumulative_m3)),
    ];
    if let Some((name, _)) = numbers
        .iter()
        .find(|(_, value)| value.is_some_and(|v| !v.is_finite()))
    {
        return Some(format!("{name} is not a finite number"));
    }

    if let Some(previous) = prev.cumulative_energy_timestamp {
        if raw.timestamp <= previous {
            return Some(format!(
                "timestamp {} is not newer than {previous}",
                raw.timestamp
            ));
        }
    }

    let counters = [
        (
            "energy",
            prev.cumulative_energy_kwh,
            Some(raw.cumulative_energy),
        ),
        (
            "peak energy",
            prev.cumulative_energy_peak_kwh,
            raw.energy_peak,
        ),
        (
            "off-peak energy",
            prev.cumulative_energy_offpeak_kwh,
            raw.energy_offpeak,
        ),
        (
            "peak production",
            prev.cumulative_energy_peak_produced_kwh,
            raw.energy_peak_produced,
        ),
        (
            "off-peak production",
            prev.cumulative_energy_offpeak_produced_kwh,
            raw.energy_offpeak_produced,
        ),
        (
            "gas",
            prev.cumulative_gas_m3,
            raw.gas.map(|gas| gas.cumulative_m3),
        ),
    ];
    for (name, previous, current) in counters {
        match (previous, current) {
            (Some(_), None) => return Some(format!("{name} counter missing from reading")),
            (Some(previous), Some(current)) if current < previous - DECREASE_TOLERANCE => {
                return Some(format!(
                    "{name} counter went backwards from {previous} to {current}"
                ))
            }
            _ => {}
        }
    }

    None
}
