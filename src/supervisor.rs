use crate::config::Config;
use crate::error::PollError;
use crate::poll_engine::PollEngine;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{error, info, warn};

/// Delay before re-initializing after a restart request.
pub const RESTART_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Initializing,
    Polling,
    RestartPending,
}

/// Lifecycle bookkeeping shared with the polling task.
#[derive(Debug)]
struct Status {
    state: StdMutex<LifecycleState>,
    // Bumped whenever the polling task is replaced; stale tasks stop writing.
    generation: AtomicU64,
    restarts: AtomicU32,
}

impl Status {
    fn new() -> Self {
        Self {
            state: StdMutex::new(LifecycleState::Stopped),
            generation: AtomicU64::new(0),
            restarts: AtomicU32::new(0),
        }
    }

    fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn force(&self, state: LifecycleState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Records `state` only if `generation` still owns the lifecycle.
    fn set(&self, generation: u64, state: LifecycleState) -> bool {
        let mut current = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        *current = state;
        true
    }
}

/// Owns the polling timer for one device and drives start, stop and restart.
pub struct LifecycleSupervisor {
    engine: Arc<Mutex<PollEngine>>,
    config: Config,
    status: Arc<Status>,
    poll_task: Option<JoinHandle<()>>,
}

impl LifecycleSupervisor {
    pub fn new(engine: PollEngine, config: Config) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            config,
            status: Arc::new(Status::new()),
            poll_task: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.status.state()
    }

    /// Number of restarts since construction, whether requested or forced by
    /// the watchdog.
    pub fn restart_count(&self) -> u32 {
        self.status.restarts.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared handle to the engine, mainly for inspection.
    pub fn engine(&self) -> Arc<Mutex<PollEngine>> {
        self.engine.clone()
    }

    /// Applies `config` and starts polling. A running poll task is replaced.
    pub async fn start(&mut self, config: Config) {
        self.engine.lock().await.configure(&config);
        self.config = config;
        self.spawn_polling(None);
    }

    /// Cancels polling. Safe to call when already stopped.
    pub fn stop(&mut self) {
        self.cancel_polling();
        self.status.force(LifecycleState::Stopped);
        info!("polling stopped");
    }

    /// Cancels polling and starts again after [`RESTART_BACKOFF`].
    pub fn restart(&mut self) {
        self.status.restarts.fetch_add(1, Ordering::SeqCst);
        self.spawn_polling(Some(RESTART_BACKOFF));
    }

    /// Verifies new credentials against the device and restarts with `config`
    /// when they work. On failure the current settings stay in effect.
    pub async fn apply_settings(&mut self, config: Config) -> Result<(), PollError> {
        {
            let mut engine = self.engine.lock().await;
            engine.verify_credentials(&config.credentials()).await?;
            engine.configure(&config);
        }
        info!(host = %config.host, "device settings changed");
        self.config = config;
        self.restart();
        Ok(())
    }

    /// Reboots the device on request of an automation.
    pub async fn reboot(&self) -> Result<(), PollError> {
        info!("reboot of device requested");
        let result = self.engine.lock().await.reboot().await;
        if let Err(e) = &result {
            warn!(error = %e, "rebooting failed");
        }
        result
    }

    /// Condition query: is the off-peak tariff active right now.
    pub async fn is_offpeak_now(&self) -> bool {
        self.engine
            .lock()
            .await
            .meter_state()
            .is_offpeak_now
            .unwrap_or(false)
    }

    fn cancel_polling(&mut self) {
        self.status.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
    }

    fn spawn_polling(&mut self, delay: Option<Duration>) {
        self.cancel_polling();
        let generation = self.status.generation.load(Ordering::SeqCst);
        let initial = if delay.is_some() {
            LifecycleState::RestartPending
        } else {
            LifecycleState::Initializing
        };
        self.status.set(generation, initial);

        let engine = self.engine.clone();
        let status = self.status.clone();
        let period = Duration::from_secs(self.config.polling_interval_secs.max(1));
        self.poll_task = Some(tokio::spawn(async move {
            run_polling(engine, status, generation, period, delay).await;
        }));
    }
}

impl Drop for LifecycleSupervisor {
    fn drop(&mut self) {
        self.cancel_polling();
    }
}

/// Initializes the session and ticks until the watchdog runs out, then backs
/// off and starts over.
async fn run_polling(
    engine: Arc<Mutex<PollEngine>>,
    status: Arc<Status>,
    generation: u64,
    period: Duration,
    mut delay: Option<Duration>,
) {
    loop {
        if let Some(backoff) = delay.take() {
            status.set(generation, LifecycleState::RestartPending);
            sleep(backoff).await;
        }

        if !status.set(generation, LifecycleState::Initializing) {
            return;
        }
        if let Err(e) = engine.lock().await.initialize().await {
            // Ticks keep retrying the login and count against the watchdog
            warn!(error = %e, "initializing device session failed");
        }

        if !status.set(generation, LifecycleState::Polling) {
            return;
        }
        info!(interval_secs = period.as_secs(), "polling started");
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let mut poller = engine.lock().await;
            if poller.watchdog().is_exhausted() {
                let error = PollError::WatchdogExhausted {
                    failures: poller.watchdog().failures(),
                };
                error!(error = %error, "watchdog triggered, restarting device");
                break;
            }
            let outcome = AssertUnwindSafe(poller.tick()).catch_unwind().await;
            if outcome.is_err() {
                let remaining = poller.record_failure();
                error!(watchdog = remaining, "poll tick panicked");
            }
        }

        status.restarts.fetch_add(1, Ordering::SeqCst);
        delay = Some(RESTART_BACKOFF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_client::RawSnapshot;
    use crate::mock_device::MockDevice;
    use crate::readings::StandardReadings;
    use crate::state_sync::{StateSync, SyncEvent};
    use crate::watchdog::WATCHDOG_BUDGET;
    use tokio::sync::mpsc::Receiver;

    fn config(host: &str) -> Config {
        Config {
            host: host.to_string(),
            polling_interval_secs: 10,
            filter_readings: true,
            ..Default::default()
        }
    }

    fn supervisor(device: &MockDevice) -> (LifecycleSupervisor, Receiver<SyncEvent>) {
        let (sync, rx) = StateSync::channel(4096);
        let cfg = config("youless.local");
        let engine = PollEngine::new(device.boxed(), Box::new(StandardReadings), sync, &cfg);
        (LifecycleSupervisor::new(engine, cfg), rx)
    }

    fn steady() -> RawSnapshot {
        RawSnapshot {
            timestamp: 1_700_000_000,
            power: 500.0,
            cumulative_energy: 120.5,
            offpeak_now: Some(true),
            ..Default::default()
        }
    }

    async fn advance_to(start: tokio::time::Instant, secs: u64) {
        tokio::time::sleep_until(start + Duration::from_secs(secs)).await;
    }

    async fn watchdog(supervisor: &LifecycleSupervisor) -> i32 {
        supervisor.engine().lock().await.watchdog().remaining()
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_initializes_and_polls() {
        let device = MockDevice::new();
        device.set_steady(steady());
        let (mut supervisor, _rx) = supervisor(&device);
        assert_eq!(supervisor.state(), LifecycleState::Stopped);

        let start = tokio::time::Instant::now();
        supervisor.start(config("youless.local")).await;
        advance_to(start, 25).await;

        assert_eq!(supervisor.state(), LifecycleState::Polling);
        assert_eq!(device.login_calls(), 1);
        assert_eq!(device.sync_time_calls(), 1);
        // ticks at 0s, 10s and 20s
        assert_eq!(device.fetch_calls(), 3);
        assert!(supervisor.is_offpeak_now().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let device = MockDevice::new();
        device.set_steady(steady());
        let (mut supervisor, _rx) = supervisor(&device);

        supervisor.stop();
        assert_eq!(supervisor.state(), LifecycleState::Stopped);

        let start = tokio::time::Instant::now();
        supervisor.start(config("youless.local")).await;
        advance_to(start, 15).await;
        let fetches = device.fetch_calls();

        supervisor.stop();
        supervisor.stop();
        assert_eq!(supervisor.state(), LifecycleState::Stopped);

        advance_to(start, 100).await;
        assert_eq!(device.fetch_calls(), fetches);
        assert_eq!(supervisor.state(), LifecycleState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_exhaustion_restarts_exactly_once() {
        let device = MockDevice::new();
        device.set_fail_fetch(true);
        let (mut supervisor, _rx) = supervisor(&device);

        let start = tokio::time::Instant::now();
        supervisor.start(config("youless.local")).await;

        // ten failed ticks at 0s..90s use up the budget
        advance_to(start, 95).await;
        assert_eq!(device.fetch_calls(), WATCHDOG_BUDGET as u32);
        assert_eq!(watchdog(&supervisor).await, 0);
        assert_eq!(supervisor.restart_count(), 0);

        // the tick at 100s sees the exhausted watchdog and backs off
        advance_to(start, 105).await;
        assert_eq!(supervisor.restart_count(), 1);
        assert_eq!(supervisor.state(), LifecycleState::RestartPending);
        assert_eq!(device.fetch_calls(), WATCHDOG_BUDGET as u32);

        device.set_fail_fetch(false);
        device.set_steady(steady());

        // re-initialized at 110s with a fresh session and budget
        advance_to(start, 115).await;
        assert_eq!(supervisor.state(), LifecycleState::Polling);
        assert_eq!(device.login_calls(), 2);
        assert_eq!(watchdog(&supervisor).await, WATCHDOG_BUDGET);

        advance_to(start, 300).await;
        assert_eq!(supervisor.restart_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_restart_backs_off_before_reinitializing() {
        let device = MockDevice::new();
        device.set_steady(steady());
        let (mut supervisor, _rx) = supervisor(&device);

        let start = tokio::time::Instant::now();
        supervisor.start(config("youless.local")).await;
        advance_to(start, 5).await;

        supervisor.restart();
        assert_eq!(supervisor.state(), LifecycleState::RestartPending);
        assert_eq!(supervisor.restart_count(), 1);

        advance_to(start, 14).await;
        assert_eq!(supervisor.state(), LifecycleState::RestartPending);
        assert_eq!(device.login_calls(), 1);

        advance_to(start, 16).await;
        assert_eq!(supervisor.state(), LifecycleState::Polling);
        assert_eq!(device.login_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_tick_counts_against_watchdog() {
        let device = MockDevice::new();
        device.set_panic_on_fetch(true);
        let (mut supervisor, _rx) = supervisor(&device);

        let start = tokio::time::Instant::now();
        supervisor.start(config("youless.local")).await;
        advance_to(start, 25).await;

        assert_eq!(supervisor.state(), LifecycleState::Polling);
        assert_eq!(watchdog(&supervisor).await, WATCHDOG_BUDGET - 3);

        device.set_panic_on_fetch(false);
        device.set_steady(steady());
        advance_to(start, 35).await;
        assert_eq!(watchdog(&supervisor).await, WATCHDOG_BUDGET);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_settings_keep_current_session() {
        let device = MockDevice::new();
        device.set_steady(steady());
        let (mut supervisor, _rx) = supervisor(&device);

        let start = tokio::time::Instant::now();
        supervisor.start(config("youless.local")).await;
        advance_to(start, 5).await;

        device.set_fail_login(true);
        let result = supervisor.apply_settings(config("192.168.1.99")).await;

        assert!(matches!(result, Err(PollError::Login(_))));
        assert_eq!(supervisor.restart_count(), 0);
        assert_eq!(supervisor.config().host, "youless.local");
        assert_eq!(supervisor.state(), LifecycleState::Polling);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepted_settings_restart_with_new_credentials() {
        let device = MockDevice::new();
        device.set_steady(steady());
        let (mut supervisor, _rx) = supervisor(&device);

        let start = tokio::time::Instant::now();
        supervisor.start(config("youless.local")).await;
        advance_to(start, 5).await;

        tokio_test::assert_ok!(supervisor.apply_settings(config("192.168.1.99")).await);
        assert_eq!(supervisor.restart_count(), 1);
        assert_eq!(supervisor.state(), LifecycleState::RestartPending);

        advance_to(start, 20).await;
        assert_eq!(supervisor.state(), LifecycleState::Polling);
        assert_eq!(device.last_credentials().unwrap().host, "192.168.1.99");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reboot_action_calls_device() {
        let device = MockDevice::new();
        device.set_steady(steady());
        let (mut supervisor, mut rx) = supervisor(&device);

        let start = tokio::time::Instant::now();
        supervisor.start(config("youless.local")).await;
        advance_to(start, 5).await;

        tokio_test::assert_ok!(supervisor.reboot().await);
        assert_eq!(device.reboot_calls(), 1);

        let mut saw_rebooting = false;
        while let Ok(event) = rx.try_recv() {
            saw_rebooting |= event == SyncEvent::Unavailable("rebooting now".to_string());
        }
        assert!(saw_rebooting);

        device.set_fail_reboot(true);
        assert!(matches!(
            supervisor.reboot().await,
            Err(PollError::Reboot(_))
        ));
    }
}
