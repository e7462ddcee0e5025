use crate::device_client::{Credentials, DeviceClient, DeviceInfo, GasReading, RawSnapshot};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, TimeZone};
use reqwest::{header, Response, StatusCode, Url};
use serde_derive::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Upper bound for a single request, so a hung device fails the cycle.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client for a YouLess LS120 energy monitor on the local network.
pub struct YoulessClient {
    base_url: String,
    cookie: Option<String>,
    logged_in: bool,
    info: DeviceInfo,
    client: reqwest::Client,
}

impl YoulessClient {
    pub fn new(host: &str) -> anyhow::Result<Self> {
        Self::with_timeout(host, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(host: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building http client")?;
        Ok(Self {
            base_url: base_url(host),
            cookie: None,
            logged_in: false,
            info: DeviceInfo::default(),
            client,
        })
    }

    async fn send(&self, url: Url, cookie: Option<&str>) -> anyhow::Result<Response> {
        let mut request = self.client.get(url);
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        Ok(request.send().await?)
    }

    /// Requests `path` within the current session.
    async fn get(&mut self, path: &str, params: &[(&str, &str)]) -> anyhow::Result<Response> {
        let url = device_url(&self.base_url, path, params)?;
        let response = self.send(url, self.cookie.as_deref()).await?;
        if response.status() == StatusCode::FORBIDDEN {
            self.logged_in = false;
        }
        checked(response)
    }
}

#[async_trait]
impl DeviceClient for YoulessClient {
    /// Opens a session for `credentials`. The current session is only
    /// replaced once the new one is fully established.
    async fn login(&mut self, credentials: &Credentials) -> anyhow::Result<()> {
        let base_url = base_url(&credentials.host);
        let mut cookie = None;

        if !credentials.password.is_empty() {
            let url = device_url(&base_url, "/L", &[("w", credentials.password.as_str())])?;
            let response = self
                .send(url, None)
                .await
                .and_then(checked)
                .context("login request failed")?;
            cookie = response
                .headers()
                .get(header::SET_COOKIE)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(';').next())
                .map(|cookie| cookie.trim().to_string());
        }

        let url = device_url(&base_url, "/d", &[])?;
        let response = self
            .send(url, cookie.as_deref())
            .await
            .and_then(checked)
            .context("reading device info failed")?;
        let device: DeviceResponse = response
            .json()
            .await
            .context("reading device info failed")?;

        self.base_url = base_url;
        self.cookie = cookie;
        self.info.model = device.model.unwrap_or_default();
        self.info.mac = device.mac.unwrap_or_default();
        self.info.firmware = device.fw.unwrap_or_default();
        self.logged_in = true;
        debug!(base_url = %self.base_url, model = %self.info.model, "logged in to device");
        Ok(())
    }

    fn logged_in(&self) -> bool {
        self.logged_in
    }

    async fn fetch_advanced_status(&mut self) -> anyhow::Result<RawSnapshot> {
        let statuses: Vec<AdvancedStatus> = self.get("/e", &[("f", "j")]).await?.json().await?;
        let status = statuses
            .into_iter()
            .next()
            .context("device returned an empty status list")?;

        self.info.has_p1_meter = status.p1.is_some().to_string();
        self.info.has_gas_meter = status.gas.is_some().to_string();
        self.info.has_s0_meter = status.cs0.is_some().to_string();
        Ok(status.into_snapshot())
    }

    async fn reboot(&mut self) -> anyhow::Result<()> {
        self.get("/S", &[("rb", "")]).await?;
        self.logged_in = false;
        Ok(())
    }

    async fn sync_time(&mut self) -> anyhow::Result<()> {
        let now = Local::now().timestamp().to_string();
        self.get("/S", &[("t", now.as_str())]).await?;
        Ok(())
    }

    fn info(&self) -> DeviceInfo {
        self.info.clone()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
struct DeviceResponse {
    model: Option<String>,
    mac: Option<String>,
    fw: Option<String>,
}

/// One entry of the `/e` status list.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
struct AdvancedStatus {
    tm: i64,
    pwr: f64,
    net: f64,
    p1: Option<f64>,
    p2: Option<f64>,
    n1: Option<f64>,
    n2: Option<f64>,
    gas: Option<f64>,
    gts: Option<i64>,
    cs0: Option<f64>,
    tr: Option<u8>,
}

impl AdvancedStatus {
    fn into_snapshot(self) -> RawSnapshot {
        let gas = self.gas.map(|cumulative_m3| GasReading {
            cumulative_m3,
            timestamp: self.gts.and_then(gas_timestamp).unwrap_or(self.tm),
        });
        RawSnapshot {
            timestamp: self.tm,
            power: self.pwr,
            average_power: None,
            cumulative_energy: self.net,
            // tariff 1 is the low (off-peak) tariff
            energy_offpeak: self.p1,
            energy_peak: self.p2,
            energy_offpeak_produced: self.n1,
            energy_peak_produced: self.n2,
            gas,
            offpeak_now: self.tr.map(|tariff| tariff == 1),
        }
    }
}

fn device_url(base_url: &str, path: &str, params: &[(&str, &str)]) -> anyhow::Result<Url> {
    let url = format!("{base_url}{path}");
    let parsed = if params.is_empty() {
        Url::parse(&url)
    } else {
        Url::parse_with_params(&url, params)
    };
    parsed.with_context(|| format!("invalid device url {url}"))
}

/// Turns error statuses into errors; a 403 means the session is gone.
fn checked(response: Response) -> anyhow::Result<Response> {
    if response.status() == StatusCode::FORBIDDEN {
        anyhow::bail!("device refused the request, not logged in");
    }
    Ok(response.error_for_status()?)
}

/// Converts the gas meter's `yymmddhhmm` local timestamp into epoch seconds.
fn gas_timestamp(gts: i64) -> Option<i64> {
    let naive = NaiveDateTime::parse_from_str(&format!("{gts:010}"), "%y%m%d%H%M").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|time| time.timestamp())
}

fn base_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}
