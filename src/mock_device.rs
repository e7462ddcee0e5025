use crate::device_client::{Credentials, DeviceClient, DeviceInfo, RawSnapshot};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MockState {
    queued: VecDeque<anyhow::Result<RawSnapshot>>,
    steady: Option<RawSnapshot>,
    fail_fetch: bool,
    fail_login: bool,
    fail_reboot: bool,
    panic_on_fetch: bool,
    logged_in: bool,
    info: DeviceInfo,
    last_credentials: Option<Credentials>,
    login_calls: u32,
    fetch_calls: u32,
    reboot_calls: u32,
    sync_time_calls: u32,
}

/// Scriptable device shared between a test and the engine that polls it.
#[derive(Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boxed(&self) -> Box<dyn DeviceClient> {
        Box::new(self.clone())
    }

    fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn push_snapshot(&self, raw: RawSnapshot) {
        self.with(|s| s.queued.push_back(Ok(raw)));
    }

    pub fn push_fetch_error(&self, message: &'static str) {
        self.with(|s| s.queued.push_back(Err(anyhow::anyhow!(message))));
    }

    /// Serves `raw` on every unscripted fetch, advancing its clock and counters.
    pub fn set_steady(&self, raw: RawSnapshot) {
        self.with(|s| s.steady = Some(raw));
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.with(|s| s.fail_fetch = fail);
    }

    pub fn set_fail_login(&self, fail: bool) {
        self.with(|s| s.fail_login = fail);
    }

    pub fn set_fail_reboot(&self, fail: bool) {
        self.with(|s| s.fail_reboot = fail);
    }

    pub fn set_panic_on_fetch(&self, panic: bool) {
        self.with(|s| s.panic_on_fetch = panic);
    }

    pub fn set_info(&self, info: DeviceInfo) {
        self.with(|s| s.info = info);
    }

    pub fn drop_session(&self) {
        self.with(|s| s.logged_in = false);
    }

    pub fn last_credentials(&self) -> Option<Credentials> {
        self.with(|s| s.last_credentials.clone())
    }

    pub fn login_calls(&self) -> u32 {
        self.with(|s| s.login_calls)
    }

    pub fn fetch_calls(&self) -> u32 {
        self.with(|s| s.fetch_calls)
    }

    pub fn reboot_calls(&self) -> u32 {
        self.with(|s| s.reboot_calls)
    }

    pub fn sync_time_calls(&self) -> u32 {
        self.with(|s| s.sync_time_calls)
    }
}

#[async_trait]
impl DeviceClient for MockDevice {
    async fn login(&mut self, credentials: &Credentials) -> anyhow::Result<()> {
        self.with(|s| {
            s.login_calls += 1;
            s.last_credentials = Some(credentials.clone());
            if s.fail_login {
                s.logged_in = false;
                anyhow::bail!("wrong password");
            }
            s.logged_in = true;
            Ok(())
        })
    }

    fn logged_in(&self) -> bool {
        self.with(|s| s.logged_in)
    }

    async fn fetch_advanced_status(&mut self) -> anyhow::Result<RawSnapshot> {
        let panic = self.with(|s| {
            s.fetch_calls += 1;
            s.panic_on_fetch
        });
        if panic {
            panic!("device returned garbage");
        }
        self.with(|s| {
            if let Some(result) = s.queued.pop_front() {
                return result;
            }
            if s.fail_fetch {
                anyhow::bail!("connection refused");
            }
            match s.steady.as_mut() {
                Some(steady) => {
                    let current = steady.clone();
                    steady.timestamp += 10;
                    steady.cumulative_energy += 0.01;
                    Ok(current)
                }
                None => anyhow::bail!("no reading available"),
            }
        })
    }

    async fn reboot(&mut self) -> anyhow::Result<()> {
        self.with(|s| {
            s.reboot_calls += 1;
            if s.fail_reboot {
                anyhow::bail!("reboot refused");
            }
            s.logged_in = false;
            Ok(())
        })
    }

    async fn sync_time(&mut self) -> anyhow::Result<()> {
        self.with(|s| s.sync_time_calls += 1);
        Ok(())
    }

    fn info(&self) -> DeviceInfo {
        self.with(|s| s.info.clone())
    }
}
