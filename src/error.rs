use thiserror::Error;

/// Failures a poll cycle can run into. None of them escape a tick; they are
/// logged, counted against the watchdog and surfaced as unavailability.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("login failed: {0}")]
    Login(#[source] anyhow::Error),
    #[error("fetching status failed: {0}")]
    Fetch(#[source] anyhow::Error),
    #[error("reading rejected: {0}")]
    ValidationRejected(String),
    #[error("watchdog exhausted after {failures} failed cycles")]
    WatchdogExhausted { failures: u32 },
    #[error("reboot failed: {0}")]
    Reboot(#[source] anyhow::Error),
}
