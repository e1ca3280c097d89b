//! Send requests and their completion signals

use core::fmt;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::errors::{GatewayError, GatewayResult};
use crate::types::{PeripheralAddress, Timestamp};

/// Identifier assigned to each request at creation
pub type RequestId = u64;

/// Shared allocator of request identifiers
#[derive(Debug, Clone, Default)]
pub struct RequestIds(Arc<AtomicU64>);

impl RequestIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next identifier, starting at 1
    pub fn next_id(&self) -> RequestId {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Where a send request came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOrigin {
    /// Submitted through the control-plane intake
    External,
    /// Produced by the command router from a classified notification
    Routed { category: String },
}

impl fmt::Display for RequestOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestOrigin::External => write!(f, "external"),
            RequestOrigin::Routed { category } => write!(f, "routed:{}", category),
        }
    }
}

/// Proof of a completed send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub request_id: RequestId,
    pub target: PeripheralAddress,
    pub bytes_written: usize,
    pub attempts: u32,
    pub completed_at: Timestamp,
}

/// A payload waiting for the radio
#[derive(Debug)]
pub struct SendRequest {
    id: RequestId,
    target: PeripheralAddress,
    payload: Vec<u8>,
    submitted_at: Timestamp,
    origin: RequestOrigin,
    completion: Option<oneshot::Sender<GatewayResult<SendReceipt>>>,
}

impl SendRequest {
    /// Create a request without a completion signal
    pub fn new(
        id: RequestId,
        target: PeripheralAddress,
        payload: Vec<u8>,
        origin: RequestOrigin,
    ) -> Self {
        Self {
            id,
            target,
            payload,
            submitted_at: Timestamp::now(),
            origin,
            completion: None,
        }
    }

    /// Attach a completion signal and return the ticket observing it
    pub fn with_ticket(mut self) -> (Self, SendTicket) {
        let (tx, rx) = oneshot::channel();
        self.completion = Some(tx);
        let ticket = SendTicket {
            request_id: self.id,
            receiver: rx,
        };
        (self, ticket)
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn target(&self) -> PeripheralAddress {
        self.target
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn submitted_at(&self) -> Timestamp {
        self.submitted_at
    }

    pub fn origin(&self) -> &RequestOrigin {
        &self.origin
    }

    pub fn has_completion(&self) -> bool {
        self.completion.is_some()
    }

    /// Report the outcome to the submitter, consuming the request
    ///
    /// A submitter that stopped waiting is not an error.
    pub fn complete(mut self, outcome: GatewayResult<SendReceipt>) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(outcome);
        }
    }
}

/// Awaitable completion of a submitted request
#[derive(Debug)]
pub struct SendTicket {
    request_id: RequestId,
    receiver: oneshot::Receiver<GatewayResult<SendReceipt>>,
}

impl SendTicket {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }
}

impl Future for SendTicket {
    type Output = GatewayResult<SendReceipt>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // Sender dropped without reporting: the gateway went away
            Poll::Ready(Err(_)) => Poll::Ready(Err(GatewayError::Shutdown)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    fn target() -> PeripheralAddress {
        PeripheralAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF])
    }

    #[test]
    fn test_ticket_resolves_on_complete() {
        let (request, ticket) =
            SendRequest::new(7, target(), b"|ON@".to_vec(), RequestOrigin::External).with_ticket();
        let mut ticket = task::spawn(ticket);
        assert_pending!(ticket.poll());

        request.complete(Ok(SendReceipt {
            request_id: 7,
            target: target(),
            bytes_written: 4,
            attempts: 1,
            completed_at: Timestamp::new(0),
        }));

        let receipt = assert_ready!(ticket.poll()).unwrap();
        assert_eq!(receipt.request_id, 7);
        assert_eq!(receipt.bytes_written, 4);
    }

    #[test]
    fn test_dropped_request_reports_shutdown() {
        let (request, ticket) =
            SendRequest::new(1, target(), b"x".to_vec(), RequestOrigin::External).with_ticket();
        drop(request);
        let mut ticket = task::spawn(ticket);
        assert_eq!(assert_ready!(ticket.poll()), Err(GatewayError::Shutdown));
    }

    #[test]
    fn test_request_ids_are_shared() {
        let ids = RequestIds::new();
        let clone = ids.clone();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(clone.next_id(), 2);
    }

    #[test]
    fn test_complete_without_ticket_is_noop() {
        let request = SendRequest::new(
            2,
            target(),
            b"x".to_vec(),
            RequestOrigin::Routed {
                category: "on".into(),
            },
        );
        assert!(!request.has_completion());
        request.complete(Err(GatewayError::Shutdown));
    }
}
