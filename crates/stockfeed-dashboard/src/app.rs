//! Main application orchestration.
//!
//! Creates the hub session, quote client, registry and controller, then
//! runs the controller until ctrl-c, `quit`, or end of input.

use crate::command::read_commands;
use crate::config::AppConfig;
use crate::controller::DashboardController;
use crate::error::{AppError, AppResult};
use crate::presenter::TracingPresenter;
use std::sync::Arc;
use std::time::Duration;
use stockfeed_feed::SubscriptionRegistry;
use stockfeed_quote::QuoteClient;
use stockfeed_ws::{ConnectionSession, SessionEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Main application.
pub struct Application {
    config: AppConfig,
}

impl Application {
    /// Create a new application from a validated configuration.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Run until shutdown.
    pub async fn run(self) -> AppResult<()> {
        let config = self.config;
        info!(
            hub = %config.hub.url,
            api_root = %config.quote.api_root,
            window_capacity = config.dashboard.window_capacity,
            "Starting dashboard"
        );

        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(1000);
        let session = Arc::new(ConnectionSession::new(config.hub.clone(), event_tx));

        let quotes = Arc::new(QuoteClient::with_timeout(
            &config.quote.api_root,
            &config.quote.path,
            Duration::from_millis(config.quote.timeout_ms),
        )?);

        let registry = SubscriptionRegistry::new(config.dashboard.window_capacity)
            .map_err(|e| AppError::Config(e.to_string()))?;

        let controller = DashboardController::new(
            registry,
            session.clone(),
            quotes,
            Box::new(TracingPresenter::new(config.dashboard.padding_fraction)),
            config.dashboard.initial_keys.clone(),
        );

        let shutdown = CancellationToken::new();

        let (command_tx, command_rx) = mpsc::channel(32);
        let stdin_shutdown = shutdown.clone();
        tokio::spawn(async move {
            read_commands(tokio::io::stdin(), command_tx, stdin_shutdown).await;
        });

        let signal_shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Ctrl-C received");
                    signal_shutdown.cancel();
                }
                Err(e) => error!(?e, "Failed to listen for ctrl-c"),
            }
        });

        tokio::select! {
            result = session.connect() => match result {
                Ok(state) => info!(%state, "Hub session started"),
                Err(e) => warn!(error = %e, "Initial hub connection failed, retrying in background"),
            },
            () = shutdown.cancelled() => info!("Shutdown requested before the hub connected"),
        }

        controller.run(event_rx, command_rx, shutdown.clone()).await;

        shutdown.cancel();
        session.close().await;
        info!("Dashboard stopped");
        Ok(())
    }
}
