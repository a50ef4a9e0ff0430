//! Daemon assembly: wires configuration, transport, sink and dispatcher
//! together and runs until interrupted.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cli::{Args, LogLevel};
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::hw::{BleCentral, real_central};
use crate::sink::{OpenhabSink, TelemetrySink};
use crate::supervisor::Supervisor;
use crate::telemetry::initialise_tracing;

/// Runs the daemon with the real BLE transport and the configured sink.
///
/// # Errors
///
/// Returns an error when logging, configuration, the sink client or the BLE
/// transport cannot be set up. Runtime faults are logged and retried, not
/// returned.
pub async fn run(args: Args) -> anyhow::Result<()> {
    initialise_tracing(true, args.log_level.map(LogLevel::as_level_filter))
        .context("failed to initialise logging")?;

    let config = Config::from_path(&args.config).with_context(|| {
        format!(
            "failed to load configuration from `{}`",
            args.config.display()
        )
    })?;
    let sink = Arc::new(
        OpenhabSink::new(
            config.sink.base_url.clone(),
            config.sink.api_token.clone(),
            config.sink.request_timeout,
        )
        .context("failed to build the sink HTTP client")?,
    );
    let central = real_central()
        .await
        .context("failed to initialise the BLE transport")?;

    run_with_clients(&config, central, sink).await
}

/// Runs the daemon against caller-provided transport and sink.
///
/// # Errors
///
/// Currently infallible past setup; the signature leaves room for runtime
/// teardown errors.
pub async fn run_with_clients(
    config: &Config,
    central: Box<dyn BleCentral>,
    sink: Arc<dyn TelemetrySink>,
) -> anyhow::Result<()> {
    let supervisors = config
        .device_profiles()
        .into_iter()
        .map(|profile| Supervisor::new(profile, Arc::clone(&sink)))
        .collect();
    let mut dispatcher = Dispatcher::new(
        central,
        supervisors,
        config.scan.scan_timeout,
        config.scan.poll_interval,
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(error) = tokio::signal::ctrl_c().await {
                error!(%error, "could not listen for the shutdown signal");
                return;
            }
            info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    dispatcher.run(shutdown).await;
    Ok(())
}
