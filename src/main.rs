use std::path::PathBuf;

use color_eyre::{eyre::eyre, Result};
use roomsense::alarm::ThresholdControl;
use roomsense::config::CONFIG_ENV;
use roomsense::mqtt::{handoff_channel, MqttLink};
use roomsense::pipeline::{IngestionPipeline, PipelineEvent};
use roomsense::store::MessageStore;
use roomsense::AppConfig;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const STARTUP_HISTORY_ROWS: u32 = 500;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = config_path();
    AppConfig::ensure_default_config(&config_path).await?;
    let config = AppConfig::load(&config_path).await?;
    info!(
        "Loaded {} with {} rooms",
        config_path.display(),
        config.rooms.len()
    );

    let store = MessageStore::open(&config.storage.path).await?;
    log_history(&store, &config).await;

    let (handoff_tx, handoff_rx) = handoff_channel(config.pipeline.channel_capacity);
    let link = MqttLink::create(config.broker.clone(), config.subscription(), handoff_tx);

    // Operator handle; the pipeline sees every change from the next message on.
    let (_thresholds, thresholds_rx) = ThresholdControl::new(config.thresholds);

    let pipeline = IngestionPipeline::from_config(&config, store, link.publisher(), thresholds_rx);
    let _observer = tokio::spawn(log_events(pipeline.subscribe()));
    let pipeline_handle = pipeline.spawn(handoff_rx);

    let link = link
        .connect()
        .await
        .map_err(|e| eyre!("Failed to start MQTT link: {}", e))?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    let stopped = link.disconnect().await?;
    // Dropping the last sender lets the pipeline drain what is queued and exit.
    drop(stopped);

    match pipeline_handle.await {
        Ok(pipeline) => info!("Final status: {}", pipeline.status()),
        Err(e) => error!("Pipeline task failed: {}", e),
    }
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

/// First CLI argument, then `ROOMSENSE_CONFIG`, then the platform default.
fn config_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .unwrap_or_else(AppConfig::default_path)
}

async fn log_history(store: &MessageStore, config: &AppConfig) {
    match store.count().await {
        Ok(count) => info!("Message store holds {} messages", count),
        Err(e) => warn!("Could not count stored messages: {}", e),
    }
    match store.statistics(&config.fields, STARTUP_HISTORY_ROWS).await {
        Ok(stats) => debug!("Recent history:\n{}", stats),
        Err(e) => warn!("Could not summarise history: {}", e),
    }
}

async fn log_events(mut events: broadcast::Receiver<PipelineEvent>) {
    loop {
        match events.recv().await {
            Ok(PipelineEvent::ReadingUpdated(reading)) => {
                debug!("{} {}: {}", reading.room, reading.metric, reading.value)
            }
            Ok(PipelineEvent::Alarm(alarm)) => info!("Alarm raised: {}", alarm),
            Ok(PipelineEvent::Unresolved { topic }) => debug!("No room for {}", topic),
            Ok(PipelineEvent::ConnectionChanged(state)) => info!("Broker link: {:?}", state),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Event observer lagged, {} events skipped", missed)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
