//! YouLess Poller Library
//!
//! Keeps the readings of a local YouLess LS120 energy monitor synchronized with
//! a consuming application: periodic polling, reading validation, derived meter
//! state and watchdog-driven recovery.

pub mod config;
pub mod device_client;
pub mod error;
pub mod meter_state;
pub mod poll_engine;
pub mod readings;
pub mod state_sync;
pub mod supervisor;
pub mod validator;
pub mod watchdog;
pub mod youless_client;

#[cfg(test)]
mod mock_device;

// Re-export commonly used types for easier access
pub use config::Config;
pub use device_client::{Credentials, DeviceClient, DeviceInfo, GasReading, RawSnapshot};
pub use error::PollError;
pub use meter_state::MeterState;
pub use poll_engine::{PollEngine, TickOutcome};
pub use readings::{ReadingHandler, StandardReadings};
pub use state_sync::{Capability, CapabilityValue, StateSync, SyncEvent, Trigger};
pub use supervisor::{LifecycleState, LifecycleSupervisor};
pub use youless_client::YoulessClient;
