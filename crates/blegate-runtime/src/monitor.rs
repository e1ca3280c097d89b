//! Event fan-out and counters shared between the state machine and its handles

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use blegate_core::{EventSink, GatewayEvent};
use parking_lot::Mutex;

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

/// Running counters of gateway activity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayStats {
    /// Notifications received from the listener
    pub notifications_received: u64,
    /// Notifications that matched a command token
    pub messages_classified: u64,
    /// Requests produced by the command router
    pub requests_routed: u64,
    /// Requests accepted from the control-plane intake
    pub requests_submitted: u64,
    pub sends_succeeded: u64,
    pub sends_failed: u64,
    /// Successful listener connects, including the first one
    pub listener_connects: u64,
    pub listener_connect_failures: u64,
    /// Listener links dropped by the peripheral
    pub listener_lost: u64,
}

// ----------------------------------------------------------------------------
// Monitor
// ----------------------------------------------------------------------------

/// Shared sinks, statistics and queue depth
pub struct Monitor {
    sinks: Vec<Arc<dyn EventSink>>,
    stats: Mutex<GatewayStats>,
    queued: AtomicUsize,
}

impl Monitor {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self {
            sinks,
            stats: Mutex::new(GatewayStats::default()),
            queued: AtomicUsize::new(0),
        }
    }

    /// Trace an event and hand it to every sink
    pub fn emit(&self, event: GatewayEvent) {
        event.trace();
        for sink in &self.sinks {
            sink.record(&event);
        }
    }

    pub fn update_stats(&self, update: impl FnOnce(&mut GatewayStats)) {
        update(&mut self.stats.lock());
    }

    pub fn stats(&self) -> GatewayStats {
        self.stats.lock().clone()
    }

    /// Count a request entering the queue, returning the new depth
    pub fn request_queued(&self) -> usize {
        self.queued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Count a request leaving the queue
    pub fn request_dequeued(&self) {
        let _ = self
            .queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn queue_depth(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }
}
