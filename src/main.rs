use tokio::sync::mpsc::Receiver;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use youless_poller::{
    CapabilityValue, Config, LifecycleSupervisor, PollEngine, StandardReadings, StateSync,
    SyncEvent, YoulessClient,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting YouLess poller");
    let config = match std::env::var("APP_CONFIG") {
        Ok(path) => Config::load(&path)?,
        Err(_) => Config::from_env()?,
    };
    info!(
        host = %config.host,
        interval_secs = config.polling_interval_secs,
        filter_readings = config.filter_readings,
        "loaded config"
    );

    let (state_sync, events) = StateSync::channel(128);
    tokio::spawn(async move {
        report_events(events).await;
    });

    let client = YoulessClient::new(&config.host)?;
    let engine = PollEngine::new(
        Box::new(client),
        Box::new(StandardReadings),
        state_sync,
        &config,
    );
    let mut supervisor = LifecycleSupervisor::new(engine, config.clone());
    supervisor.start(config).await;

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    supervisor.stop();
    Ok(())
}

/// Logs everything the poller reports for the host platform.
async fn report_events(mut events: Receiver<SyncEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SyncEvent::Capability(capability, CapabilityValue::Number(Some(value))) => {
                info!(capability = capability.id(), value, "capability updated")
            }
            SyncEvent::Capability(capability, CapabilityValue::Flag(Some(value))) => {
                info!(capability = capability.id(), value, "capability updated")
            }
            SyncEvent::Capability(..) => {}
            SyncEvent::Available => info!("device available"),
            SyncEvent::Unavailable(reason) => warn!(%reason, "device unavailable"),
            SyncEvent::Trigger(trigger) => info!(trigger = trigger.id(), ?trigger, "flow triggered"),
            SyncEvent::SettingChanged { key, value } => info!(key, %value, "setting changed"),
        }
    }
}
