// Bootstrap utilities for binary initialization

use crate::config::Settings;
use crate::diagnostics::TracingDiagnostics;
use crate::handler::EventHandler;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Open the schedule handler against the configured NATS server
///
/// # Errors
/// Returns error if the configuration is rejected or the connection fails
#[tracing::instrument(skip(settings))]
pub async fn init_event_handler(settings: &Settings) -> Result<EventHandler> {
    info!("Initializing schedule handler");

    let handler = EventHandler::open_with_config(
        settings.nats_config(),
        &settings.handler.history_topic,
        Arc::new(TracingDiagnostics),
    )
    .await
    .context("Failed to open schedule handler")?;

    info!(handler = %handler, "Schedule handler initialized");
    Ok(handler)
}

/// Subscribe to the subject the scheduler publishes trigger events on
///
/// # Errors
/// Returns error if the NATS connection or the subscription fails
#[tracing::instrument(skip(settings))]
pub async fn init_trigger_subscriber(settings: &Settings) -> Result<async_nats::Subscriber> {
    info!(
        subject = %settings.handler.trigger_subject,
        "Subscribing to trigger events"
    );

    let client = async_nats::ConnectOptions::new()
        .name(format!("{}-triggers", settings.nats.connection_name))
        .connect(settings.nats.url.as_str())
        .await
        .context("Failed to connect to NATS for trigger events")?;

    let subscriber = client
        .subscribe(settings.handler.trigger_subject.clone())
        .await
        .context("Failed to subscribe to trigger subject")?;

    info!("Trigger subscription ready");
    Ok(subscriber)
}
