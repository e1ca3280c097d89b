//! Gateway application: adapter, state machine and event log wired together

use std::sync::Arc;

use blegate_ble::BleLink;
use blegate_core::EventSink;
use blegate_runtime::{GatewayBuilder, GatewayHandle};
use tokio::io::{stdin, stdout, BufReader};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::{CliError, Result};
use crate::event_log::FileEventLog;
use crate::interactive::run_interactive;

/// Why the foreground loop ended
enum Exit {
    Interrupted,
    Quit,
    GatewayStopped(std::result::Result<(), tokio::task::JoinError>),
}

/// Main blegate application
pub struct GatewayApp {
    config: AppConfig,
    event_log: Option<Arc<FileEventLog>>,
}

impl GatewayApp {
    /// Create the application, opening the event log if one is configured
    pub fn new(config: AppConfig) -> Result<Self> {
        let event_log = match &config.log.event_log {
            Some(path) => {
                let log = FileEventLog::open(path)?;
                info!("Event log: {}", log.path().display());
                Some(Arc::new(log))
            }
            None => None,
        };
        Ok(Self { config, event_log })
    }

    /// Open the adapter and run the gateway until Ctrl-C (or `quit` in interactive mode)
    pub async fn run(&self, interactive: bool) -> Result<()> {
        let link = BleLink::open(self.config.ble.clone(), self.config.gateway.characteristic).await?;

        let mut builder = GatewayBuilder::new(self.config.gateway.clone());
        if let Some(log) = &self.event_log {
            builder = builder.with_sink(log.clone() as Arc<dyn EventSink>);
        }
        let (handle, mut task) = builder.spawn(Arc::new(link))?;
        self.note("Gateway started");

        let exit = if interactive {
            tokio::select! {
                _ = signal::ctrl_c() => Exit::Interrupted,
                result = run_interactive(&handle, BufReader::new(stdin()), stdout()) => {
                    result?;
                    Exit::Quit
                }
                joined = &mut task => Exit::GatewayStopped(joined),
            }
        } else {
            info!("Gateway running, press Ctrl-C to stop");
            tokio::select! {
                _ = signal::ctrl_c() => Exit::Interrupted,
                joined = &mut task => Exit::GatewayStopped(joined),
            }
        };

        let result = match exit {
            Exit::Interrupted => {
                info!("Interrupted, shutting down");
                Self::stop(&handle, task).await
            }
            Exit::Quit => Self::stop(&handle, task).await,
            Exit::GatewayStopped(joined) => {
                error!("Gateway task ended unexpectedly");
                joined.map_err(|e| CliError::Task(e.to_string()))
            }
        };

        let stats = handle.stats();
        info!(
            "Processed {} notification(s), {} send(s) ok, {} failed",
            stats.notifications_received, stats.sends_succeeded, stats.sends_failed
        );
        self.note("Gateway stopped");
        result
    }

    async fn stop(handle: &GatewayHandle, task: JoinHandle<()>) -> Result<()> {
        handle.shutdown();
        task.await.map_err(|e| CliError::Task(e.to_string()))
    }

    fn note(&self, text: &str) {
        if let Some(log) = &self.event_log {
            if let Err(e) = log.append(text) {
                warn!("Failed to write event log: {}", e);
            }
        }
    }
}
