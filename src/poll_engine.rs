use crate::config::Config;
use crate::device_client::{Credentials, DeviceClient, DeviceInfo};
use crate::error::PollError;
use crate::meter_state::MeterState;
use crate::readings::ReadingHandler;
use crate::state_sync::{StateSync, Trigger};
use crate::watchdog::Watchdog;
use tracing::{debug, info, warn};

/// Result of a single tick.
#[derive(Debug)]
pub enum TickOutcome {
    Committed,
    Failed(PollError),
}

impl TickOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, TickOutcome::Committed)
    }
}

/// Runs poll cycles against one device and owns everything derived from them.
pub struct PollEngine {
    client: Box<dyn DeviceClient>,
    readings: Box<dyn ReadingHandler>,
    sync: StateSync,
    credentials: Credentials,
    filter_readings: bool,
    device_info: DeviceInfo,
    meters: MeterState,
    watchdog: Watchdog,
    // Last availability reported, with the reason when unavailable.
    availability: Option<Result<(), String>>,
}

impl PollEngine {
    pub fn new(
        client: Box<dyn DeviceClient>,
        readings: Box<dyn ReadingHandler>,
        sync: StateSync,
        config: &Config,
    ) -> Self {
        Self {
            client,
            readings,
            sync,
            credentials: config.credentials(),
            filter_readings: config.filter_readings,
            device_info: config.device_info.clone(),
            meters: MeterState::default(),
            watchdog: Watchdog::new(),
            availability: None,
        }
    }

    /// Adopts new settings for subsequent sessions and cycles.
    pub fn configure(&mut self, config: &Config) {
        self.credentials = config.credentials();
        self.filter_readings = config.filter_readings;
        self.device_info = config.device_info.clone();
    }

    pub fn meter_state(&self) -> &MeterState {
        &self.meters
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    /// Establishes a fresh session and syncs the device clock. The watchdog
    /// starts from a full budget either way.
    pub async fn initialize(&mut self) -> Result<(), PollError> {
        self.watchdog.reset();
        if let Err(e) = self.client.login(&self.credentials).await {
            let error = PollError::Login(e);
            self.mark_unavailable(error.to_string());
            return Err(error);
        }
        if let Err(e) = self.client.sync_time().await {
            warn!(error = %e, "syncing device clock failed");
        }
        info!(host = %self.credentials.host, "device session established");
        Ok(())
    }

    /// Checks `credentials` against the device by logging in with them.
    pub async fn verify_credentials(&mut self, credentials: &Credentials) -> Result<(), PollError> {
        self.client
            .login(credentials)
            .await
            .map_err(PollError::Login)
    }

    pub async fn reboot(&mut self) -> Result<(), PollError> {
        self.client.reboot().await.map_err(PollError::Reboot)?;
        info!("device rebooting");
        self.mark_unavailable("rebooting now".to_string());
        Ok(())
    }

    /// Runs one poll cycle. Failures are counted and reported, never returned
    /// as errors.
    pub async fn tick(&mut self) -> TickOutcome {
        match self.poll_cycle().await {
            Ok(()) => TickOutcome::Committed,
            Err(error) => {
                let remaining = self.record_failure();
                warn!(watchdog = remaining, error = %error, "poll cycle failed");
                TickOutcome::Failed(error)
            }
        }
    }

    /// Counts one failed cycle against the watchdog.
    pub fn record_failure(&mut self) -> i32 {
        self.watchdog.decrement()
    }

    async fn poll_cycle(&mut self) -> Result<(), PollError> {
        if !self.client.logged_in() {
            if let Err(e) = self.client.login(&self.credentials).await {
                let error = PollError::Login(e);
                self.mark_unavailable(error.to_string());
                return Err(error);
            }
        }

        let raw = match self.client.fetch_advanced_status().await {
            Ok(raw) => raw,
            Err(e) => {
                let error = PollError::Fetch(e);
                self.mark_unavailable(error.to_string());
                return Err(error);
            }
        };
        self.mark_available();

        if self.filter_readings {
            self.readings
                .validate(&raw, &self.meters)
                .map_err(PollError::ValidationRejected)?;
        }

        let next = self.readings.derive(&raw, &self.meters);
        self.commit(next);
        Ok(())
    }

    fn commit(&mut self, next: MeterState) {
        let previous = std::mem::replace(&mut self.meters, next);
        self.watchdog.reset();
        self.sync.push_meter_state(&self.meters);

        if let (Some(before), Some(now)) = (previous.is_offpeak_now, self.meters.is_offpeak_now) {
            if before != now {
                info!(offpeak = now, "tariff changed");
                self.sync.trigger(Trigger::TariffChanged { offpeak: now });
            }
        }
        if let (Some(before), Some(now)) = (
            previous.instantaneous_power_w,
            self.meters.instantaneous_power_w,
        ) {
            if before != now {
                debug!(power_w = now, "power changed");
                self.sync.trigger(Trigger::PowerChanged { power_w: now });
            }
        }

        self.sync_device_info();
    }

    fn sync_device_info(&mut self) {
        let reported = self.client.info();
        for (key, value) in reported.fields() {
            if value.is_empty() || self.device_info.get(key) == Some(value) {
                continue;
            }
            info!(key, value, "device information changed");
            self.device_info.set_field(key, value.to_string());
            self.sync.setting_changed(key, value.to_string());
        }
    }

    fn mark_available(&mut self) {
        if self.availability != Some(Ok(())) {
            self.availability = Some(Ok(()));
            self.sync.set_available();
        }
    }

    fn mark_unavailable(&mut self, reason: String) {
        let state = Some(Err(reason.clone()));
        if self.availability != state {
            self.availability = state;
            self.sync.set_unavailable(reason);
        }
    }
}
