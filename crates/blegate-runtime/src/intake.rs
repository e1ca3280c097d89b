//! External request intake and the public gateway handle
//!
//! Submission never waits for the radio: a request is pushed onto the FIFO intake
//! queue and the caller gets a [`SendTicket`] it may await. The queue is shared with
//! router-originated requests so both sources are drained in arrival order.

use std::sync::Arc;

use blegate_core::{
    GatewayError, GatewayEvent, GatewayMode, GatewayResult, PeripheralAddress, RequestIds,
    RequestOrigin, SendReceipt, SendRequest, SendTicket,
};
use tokio::sync::{mpsc, watch};

use crate::monitor::{GatewayStats, Monitor};

// ----------------------------------------------------------------------------
// Intake Queue
// ----------------------------------------------------------------------------

/// Sending half of the request queue
#[derive(Debug, Clone)]
pub(crate) enum IntakeSender {
    Bounded {
        tx: mpsc::Sender<SendRequest>,
        capacity: usize,
    },
    Unbounded(mpsc::UnboundedSender<SendRequest>),
}

/// Receiving half of the request queue
#[derive(Debug)]
pub(crate) enum IntakeReceiver {
    Bounded(mpsc::Receiver<SendRequest>),
    Unbounded(mpsc::UnboundedReceiver<SendRequest>),
}

/// Create the request queue, bounded when a capacity is given
pub(crate) fn intake_channel(capacity: Option<usize>) -> (IntakeSender, IntakeReceiver) {
    match capacity {
        Some(capacity) => {
            let (tx, rx) = mpsc::channel(capacity);
            (
                IntakeSender::Bounded { tx, capacity },
                IntakeReceiver::Bounded(rx),
            )
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (IntakeSender::Unbounded(tx), IntakeReceiver::Unbounded(rx))
        }
    }
}

impl IntakeSender {
    /// Enqueue without waiting, handing the request back on failure
    pub(crate) fn try_send(&self, request: SendRequest) -> Result<(), (SendRequest, GatewayError)> {
        match self {
            IntakeSender::Bounded { tx, capacity } => tx.try_send(request).map_err(|e| match e {
                mpsc::error::TrySendError::Full(r) => (
                    r,
                    GatewayError::QueueFull {
                        capacity: *capacity,
                    },
                ),
                mpsc::error::TrySendError::Closed(r) => (r, GatewayError::Shutdown),
            }),
            IntakeSender::Unbounded(tx) => tx.send(request).map_err(|e| (e.0, GatewayError::Shutdown)),
        }
    }
}

impl IntakeReceiver {
    pub(crate) async fn recv(&mut self) -> Option<SendRequest> {
        match self {
            IntakeReceiver::Bounded(rx) => rx.recv().await,
            IntakeReceiver::Unbounded(rx) => rx.recv().await,
        }
    }

    pub(crate) fn try_recv(&mut self) -> Option<SendRequest> {
        match self {
            IntakeReceiver::Bounded(rx) => rx.try_recv().ok(),
            IntakeReceiver::Unbounded(rx) => rx.try_recv().ok(),
        }
    }

    pub(crate) fn close(&mut self) {
        match self {
            IntakeReceiver::Bounded(rx) => rx.close(),
            IntakeReceiver::Unbounded(rx) => rx.close(),
        }
    }
}

// ----------------------------------------------------------------------------
// Gateway Handle
// ----------------------------------------------------------------------------

/// Cloneable handle to a running gateway
///
/// Dropping every handle shuts the gateway down.
#[derive(Clone)]
pub struct GatewayHandle {
    intake: IntakeSender,
    ids: RequestIds,
    mode: watch::Receiver<GatewayMode>,
    shutdown: Arc<watch::Sender<bool>>,
    monitor: Arc<Monitor>,
}

impl GatewayHandle {
    pub(crate) fn new(
        intake: IntakeSender,
        ids: RequestIds,
        mode: watch::Receiver<GatewayMode>,
        shutdown: watch::Sender<bool>,
        monitor: Arc<Monitor>,
    ) -> Self {
        Self {
            intake,
            ids,
            mode,
            shutdown: Arc::new(shutdown),
            monitor,
        }
    }

    /// Queue a payload for `target` and return a ticket for its completion
    pub fn enqueue(&self, target: PeripheralAddress, payload: Vec<u8>) -> GatewayResult<SendTicket> {
        if *self.shutdown.borrow() {
            return Err(GatewayError::Shutdown);
        }

        let (request, ticket) =
            SendRequest::new(self.ids.next_id(), target, payload, RequestOrigin::External)
                .with_ticket();
        let request_id = request.id();

        // Counted before it becomes visible to the dequeue side
        let queue_len = self.monitor.request_queued();
        if let Err((_, e)) = self.intake.try_send(request) {
            self.monitor.request_dequeued();
            return Err(e);
        }

        self.monitor.update_stats(|s| s.requests_submitted += 1);
        self.monitor.emit(GatewayEvent::SendQueued {
            request_id,
            target,
            origin: RequestOrigin::External.to_string(),
            queue_len,
        });
        Ok(ticket)
    }

    /// Control-plane entry point: send `payload` to `target_address` and wait for the outcome
    ///
    /// Not deduplicated; callers may retry on failure.
    pub async fn submit_send(
        &self,
        target_address: &str,
        payload: &str,
    ) -> GatewayResult<SendReceipt> {
        let target: PeripheralAddress = target_address.parse()?;
        self.enqueue(target, payload.as_bytes().to_vec())?.await
    }

    /// Current mode of the state machine
    pub fn mode(&self) -> GatewayMode {
        *self.mode.borrow()
    }

    /// Wait until the state machine reaches `mode`
    pub async fn wait_for_mode(&self, mode: GatewayMode) -> GatewayResult<()> {
        let mut rx = self.mode.clone();
        rx.wait_for(|current| *current == mode)
            .await
            .map(|_| ())
            .map_err(|_| GatewayError::Shutdown)
    }

    /// Subscribe to mode changes
    pub fn watch_mode(&self) -> watch::Receiver<GatewayMode> {
        self.mode.clone()
    }

    pub fn stats(&self) -> GatewayStats {
        self.monitor.stats()
    }

    /// Requests waiting for the radio, not counting the one being served
    pub fn queue_depth(&self) -> usize {
        self.monitor.queue_depth()
    }

    /// Ask the gateway to stop; queued requests fail with `Shutdown`
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }
}
