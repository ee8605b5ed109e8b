mod api;
mod config;
mod discord;
mod docker;
mod logs;
mod poller;
mod reconciler;
mod runner;
#[cfg(test)]
mod testing;
mod view;

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use shared::protocol::location_prefix;
use crate::api::routes::{AppState, ControlMap};
use crate::api::signature::SignatureVerifier;
use crate::config::Config;
use crate::discord::client::DiscordClient;
use crate::discord::publisher::DiscordPublisher;
use crate::docker::DockerCli;
use crate::logs::relay::{LogSink, WebhookRelay};
use crate::reconciler::{Reconciler, ReconcilerHandle};
use crate::runner::TokioRunner;
use crate::view::ViewPublisher;

#[tokio::main]
async fn main() -> Result<()> {
    // .env may also carry DEBUG, so load it before the subscriber
    let dotenv_result = dotenv::dotenv();

    let default_filter = if std::env::var_os("DEBUG").is_some() {
        "seeding_controld=debug"
    } else {
        "seeding_controld=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter))
        )
        .init();

    if let Err(e) = dotenv_result {
        tracing::warn!("No .env file loaded: {}", e);
    }

    tracing::info!("Starting seeding-controld");

    let config = Config::from_env().context("Invalid configuration")?;
    let services = config.service_descriptors();
    let location = location_prefix(&config.server_name);
    tracing::info!(
        "Controlling {} services for {} (controls suffixed -{})",
        services.len(),
        config.server_name,
        location
    );

    let runner = Arc::new(TokioRunner::new(config.runtime.command_timeout()));
    let docker = DockerCli::new(runner, &config.runtime);

    let client = Arc::new(DiscordClient::new(&config.discord)?);
    let verifier = SignatureVerifier::from_hex(&config.discord.public_key)
        .context("Invalid APPLICATION_PUBLIC_KEY")?;

    // Resolve registered channels; only the primary one is mandatory
    let primary = client
        .get_channel(&config.discord.channel_id)
        .await
        .with_context(|| format!("Failed to fetch channel {}", config.discord.channel_id))?;
    tracing::info!("Primary channel {} ({})", primary.id, primary.name.as_deref().unwrap_or("unnamed"));
    let mut channels = vec![primary.id];

    if let Some(secondary_id) = &config.discord.channel_id_2 {
        match client.get_channel(secondary_id).await {
            Ok(secondary) => {
                tracing::info!(
                    "Secondary channel {} ({})",
                    secondary.id,
                    secondary.name.as_deref().unwrap_or("unnamed")
                );
                channels.push(secondary.id);
            }
            Err(e) => tracing::error!("Error fetching CHANNEL_ID_2 {}: {:#}", secondary_id, e),
        }
    }

    let publisher = Arc::new(DiscordPublisher::new(client.clone(), channels));

    let relay = match &config.log_relay_url {
        Some(url) => {
            tracing::info!("Relaying container logs to webhook");
            Some(Arc::new(WebhookRelay::new(url.as_str())?) as Arc<dyn LogSink>)
        }
        None => None,
    };

    let reconciler = Arc::new(Reconciler::new(
        docker,
        services.clone(),
        publisher.clone() as Arc<dyn ViewPublisher>,
        relay,
        &config.server_name,
    ));

    // Fresh channels, then the first view
    publisher.reset().await;
    reconciler.refresh().await;
    tracing::info!(
        "Bot started for {} in {} channel(s)",
        config.server_name,
        publisher.channels().len()
    );

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Spawn reconciler loop
    let (trigger_tx, trigger_rx) = mpsc::channel(64);
    let loop_cancel = cancel.clone();
    let loop_reconciler = reconciler.clone();
    let loop_handle = tokio::spawn(async move {
        if let Err(e) = crate::reconciler::run(loop_reconciler, trigger_rx, loop_cancel).await {
            tracing::error!("Reconciler error: {}", e);
        }
    });

    // Build interactions router
    let app_state = AppState {
        reconciler: ReconcilerHandle::new(trigger_tx),
        client: client.clone(),
        controls: Arc::new(ControlMap::new(&services, &location)),
        snapshot_rx: reconciler.subscribe(),
        verifier: Arc::new(verifier),
    };
    let app = api::routes::router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.interactions_listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.interactions_listen))?;

    tracing::info!("Interactions endpoint listening on {}", config.interactions_listen);

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    shutdown_signal().await?;

    tracing::info!("Shutting down...");

    cancel.cancel();

    // In-flight commands get a bounded grace period inside the reconciler
    let _ = tokio::join!(loop_handle, server_handle);

    // Last holder of the REST client; dropping it closes pooled connections
    drop(publisher);
    drop(reconciler);
    drop(client);

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to listen for ctrl-c")?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    Ok(())
}
