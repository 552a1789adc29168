// Runner binary: feeds trigger events from NATS into the schedule handler

use anyhow::Context;
use common::bootstrap::{init_event_handler, init_trigger_subscriber};
use common::config::Settings;
use common::telemetry;
use common::trigger::TriggerEnvelope;
use futures::StreamExt;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;
    settings
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid configuration")?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;
    telemetry::init_metrics(settings.observability.metrics_port)?;

    info!(
        nats_url = %settings.nats.url,
        history_topic = %settings.handler.history_topic,
        trigger_subject = %settings.handler.trigger_subject,
        "Configuration loaded"
    );

    let handler = init_event_handler(&settings).await.map_err(|e| {
        error!(error = %e, "Failed to initialize schedule handler");
        e
    })?;
    let mut triggers = init_trigger_subscriber(&settings).await?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            message = triggers.next() => match message {
                Some(message) => match TriggerEnvelope::decode(&message.payload) {
                    Ok(event) => handler.handle(event).await,
                    Err(e) => warn!(
                        subject = %message.subject,
                        error = %e,
                        "Dropping undecodable trigger event"
                    ),
                },
                None => {
                    warn!("Trigger subscription ended");
                    break;
                }
            },
            _ = &mut shutdown => {
                info!("Received Ctrl+C signal, initiating graceful shutdown");
                break;
            }
        }
    }

    handler.close().await;
    telemetry::shutdown_tracer();

    info!("Runner stopped");
    Ok(())
}
