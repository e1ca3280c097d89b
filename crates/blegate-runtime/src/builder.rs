//! Gateway builder
//!
//! Validates configuration, wires the channels between the arbiter and its handles,
//! and spawns the state machine onto the current tokio runtime.

use std::sync::Arc;

use blegate_core::{
    CommandRouter, EventSink, GatewayConfig, GatewayMode, GatewayResult, PeripheralLink,
    RequestIds,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::arbiter::{Arbiter, ArbiterChannels};
use crate::intake::{intake_channel, GatewayHandle};
use crate::monitor::Monitor;
use crate::radio::RadioGuard;

// ----------------------------------------------------------------------------
// Gateway Builder
// ----------------------------------------------------------------------------

/// Builder for a gateway around one [`PeripheralLink`]
pub struct GatewayBuilder {
    config: GatewayConfig,
    sinks: Vec<Arc<dyn EventSink>>,
    radio: RadioGuard,
}

impl GatewayBuilder {
    /// Create a builder with the given configuration
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            sinks: Vec::new(),
            radio: RadioGuard::new(),
        }
    }

    /// Register an event sink
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Share an existing radio guard, e.g. to inspect ownership from tests
    pub fn with_radio_guard(mut self, radio: RadioGuard) -> Self {
        self.radio = radio;
        self
    }

    /// Validate configuration and build the state machine without starting it
    pub fn build<L: PeripheralLink>(
        self,
        link: Arc<L>,
    ) -> GatewayResult<(Arbiter<L>, GatewayHandle)> {
        self.config.validate()?;
        let listener_address = self.config.listener_address()?;

        let ids = RequestIds::new();
        let router = CommandRouter::new(&self.config.routes, ids.clone());
        let monitor = Arc::new(Monitor::new(self.sinks));

        let (intake_tx, intake_rx) = intake_channel(self.config.queue_capacity);
        let (link_events_tx, link_events_rx) = mpsc::channel(self.config.notification_buffer);
        let (mode_tx, mode_rx) = watch::channel(GatewayMode::Idle);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = GatewayHandle::new(
            intake_tx.clone(),
            ids,
            mode_rx,
            shutdown_tx,
            monitor.clone(),
        );

        let arbiter = Arbiter::new(
            link,
            self.config,
            listener_address,
            router,
            self.radio,
            monitor,
            ArbiterChannels {
                intake_tx,
                intake_rx,
                link_events_tx,
                link_events_rx,
                mode_tx,
                shutdown_rx,
            },
        );

        Ok((arbiter, handle))
    }

    /// Build and spawn the state machine
    pub fn spawn<L: PeripheralLink>(
        self,
        link: Arc<L>,
    ) -> GatewayResult<(GatewayHandle, JoinHandle<()>)> {
        let (arbiter, handle) = self.build(link)?;
        info!("Spawning gateway state machine");
        let task = tokio::spawn(arbiter.run());
        Ok((handle, task))
    }
}
