//! Connection-arbitration state machine
//!
//! The arbiter is the single owner of the radio. It keeps a long-lived listener
//! session open, and for every queued [`SendRequest`] it walks
//! `Listening -> Suspending -> Sending -> Resuming -> Listening`: the listener is
//! torn down first, the sender connects, writes and disconnects, and only then is the
//! listener re-established. Requests are served strictly one at a time in arrival
//! order.
//!
//! When the listener cannot be reached the machine sits in `Idle` and retries on a
//! fixed delay. Queued sends are still served from `Idle` since the radio is free.

use std::sync::Arc;
use std::time::Duration;

use blegate_core::{
    CommandRouter, ConnectError, Connection, ConnectionId, GatewayConfig, GatewayError,
    GatewayEvent, GatewayMode, LinkEvent, LinkEventReceiver, LinkEventSender,
    NotificationDecoder, PeripheralAddress, PeripheralLink, PeripheralRole, RawNotification,
    RetryPolicy, SendFailure, SendReceipt, SendRequest, Timestamp, WriteError, WriteMode,
};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::intake::{IntakeReceiver, IntakeSender};
use crate::monitor::Monitor;
use crate::radio::{RadioGuard, RadioLease};

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Whether the main loop keeps going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Shutdown,
}

/// Result of waiting out a listener retry delay
enum IdleWait {
    Elapsed,
    Request(SendRequest),
    Shutdown,
}

/// The open listener connection together with its radio lease
struct ListenerSession {
    connection: Connection,
    _lease: RadioLease,
}

/// Channels wiring the arbiter to its handles and the link
pub(crate) struct ArbiterChannels {
    pub intake_tx: IntakeSender,
    pub intake_rx: IntakeReceiver,
    pub link_events_tx: LinkEventSender,
    pub link_events_rx: LinkEventReceiver,
    pub mode_tx: watch::Sender<GatewayMode>,
    pub shutdown_rx: watch::Receiver<bool>,
}

// ----------------------------------------------------------------------------
// Arbiter
// ----------------------------------------------------------------------------

/// Single-radio arbitration state machine
pub struct Arbiter<L: PeripheralLink> {
    link: Arc<L>,
    config: GatewayConfig,
    listener_address: PeripheralAddress,
    decoder: NotificationDecoder,
    router: CommandRouter,
    listener_policy: RetryPolicy,
    sender_policy: RetryPolicy,
    radio: RadioGuard,
    monitor: Arc<Monitor>,

    intake_tx: IntakeSender,
    intake_rx: IntakeReceiver,
    link_events_tx: LinkEventSender,
    link_events_rx: LinkEventReceiver,
    mode_tx: watch::Sender<GatewayMode>,
    shutdown_rx: watch::Receiver<bool>,

    listener: Option<ListenerSession>,
    listener_failures: u32,
    /// Set after a failed or lost listener; the next bring-up waits out the retry delay
    listener_backoff: bool,
}

impl<L: PeripheralLink> Arbiter<L> {
    pub(crate) fn new(
        link: Arc<L>,
        config: GatewayConfig,
        listener_address: PeripheralAddress,
        router: CommandRouter,
        radio: RadioGuard,
        monitor: Arc<Monitor>,
        channels: ArbiterChannels,
    ) -> Self {
        Self {
            link,
            decoder: NotificationDecoder::new(config.commands.clone()),
            listener_policy: RetryPolicy::listener(&config.retry),
            sender_policy: RetryPolicy::sender(&config.retry),
            listener_address,
            router,
            radio,
            monitor,
            config,
            intake_tx: channels.intake_tx,
            intake_rx: channels.intake_rx,
            link_events_tx: channels.link_events_tx,
            link_events_rx: channels.link_events_rx,
            mode_tx: channels.mode_tx,
            shutdown_rx: channels.shutdown_rx,
            listener: None,
            listener_failures: 0,
            listener_backoff: false,
        }
    }

    /// Current mode
    pub fn mode(&self) -> GatewayMode {
        *self.mode_tx.borrow()
    }

    /// Drive the state machine until shutdown
    pub async fn run(mut self) {
        info!(
            "Gateway starting, listener {} characteristic {}",
            self.listener_address, self.config.characteristic
        );

        loop {
            if self.shutdown_requested() {
                break;
            }

            let flow = match self.mode() {
                GatewayMode::Idle => self.run_idle().await,
                GatewayMode::Listening => self.run_listening().await,
                other => {
                    // Transient modes are only entered inside a send cycle
                    warn!("Main loop found transient mode {}, resetting", other);
                    self.transition(GatewayMode::Idle);
                    Flow::Continue
                }
            };

            if flow == Flow::Shutdown {
                break;
            }
        }

        self.shutdown().await;
        info!("Gateway stopped");
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    // ------------------------------------------------------------------------
    // Mode Handling
    // ------------------------------------------------------------------------

    fn transition(&mut self, next: GatewayMode) {
        let from = self.mode();
        if from == next {
            return;
        }
        if !from.can_transition_to(next) {
            warn!("Unexpected mode transition {} -> {}", from, next);
        }
        // Recorded before publishing so observers of the mode see a complete trail
        self.monitor.emit(GatewayEvent::ModeChanged { from, to: next });
        self.mode_tx.send_replace(next);
    }

    /// Idle: wait out any pending retry delay, then try to bring the listener up
    async fn run_idle(&mut self) -> Flow {
        if self.listener_backoff {
            match self.wait_idle(self.listener_policy.delay()).await {
                IdleWait::Elapsed => {}
                IdleWait::Request(request) => {
                    self.monitor.request_dequeued();
                    self.transition(GatewayMode::Sending);
                    self.send_with_retries(request).await;
                    self.transition(GatewayMode::Resuming);
                    self.resume().await;
                    return Flow::Continue;
                }
                IdleWait::Shutdown => return Flow::Shutdown,
            }
        }

        if self.listener_established().await {
            self.transition(GatewayMode::Listening);
        }
        Flow::Continue
    }

    async fn wait_idle(&mut self, delay: Duration) -> IdleWait {
        let delay = sleep(delay);
        tokio::pin!(delay);

        tokio::select! {
            biased;
            changed = self.shutdown_rx.changed() => {
                if changed.is_err() || *self.shutdown_rx.borrow() {
                    IdleWait::Shutdown
                } else {
                    IdleWait::Elapsed
                }
            }
            request = self.intake_rx.recv() => match request {
                Some(request) => IdleWait::Request(request),
                None => IdleWait::Shutdown,
            },
            _ = &mut delay => IdleWait::Elapsed,
        }
    }

    /// Listening: process notifications until a send request or shutdown arrives
    async fn run_listening(&mut self) -> Flow {
        loop {
            tokio::select! {
                biased;
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        return Flow::Shutdown;
                    }
                }
                event = self.link_events_rx.recv() => match event {
                    Some(LinkEvent::Notification(notification)) => {
                        self.handle_notification(notification);
                    }
                    Some(LinkEvent::Disconnected { connection_id, address }) => {
                        if self.is_current_listener(connection_id) {
                            self.listener_lost(address).await;
                            return Flow::Continue;
                        }
                        debug!("Ignoring stale disconnect of {} (connection {})", address, connection_id);
                    }
                    None => return Flow::Shutdown,
                },
                request = self.intake_rx.recv() => match request {
                    Some(request) => {
                        self.monitor.request_dequeued();
                        self.serve(request).await;
                        return Flow::Continue;
                    }
                    None => return Flow::Shutdown,
                },
            }
        }
    }

    /// One full send cycle starting from Listening
    async fn serve(&mut self, request: SendRequest) {
        self.transition(GatewayMode::Suspending);
        self.suspend_listener().await;

        self.transition(GatewayMode::Sending);
        self.send_with_retries(request).await;

        self.transition(GatewayMode::Resuming);
        self.resume().await;
    }

    /// Settle, then re-establish the listener or fall back to Idle
    async fn resume(&mut self) {
        sleep(self.config.timing.settle_delay()).await;

        if self.listener_established().await {
            self.transition(GatewayMode::Listening);
        } else {
            self.transition(GatewayMode::Idle);
        }
    }

    // ------------------------------------------------------------------------
    // Listener Session
    // ------------------------------------------------------------------------

    /// Try once to open and subscribe the listener, recording the outcome
    async fn listener_established(&mut self) -> bool {
        let address = self.listener_address;
        debug!("Connecting listener {}", address);
        match self.open_listener().await {
            Ok(session) => {
                self.listener = Some(session);
                self.listener_failures = 0;
                self.listener_backoff = false;
                self.monitor.update_stats(|s| s.listener_connects += 1);
                self.monitor.emit(GatewayEvent::Connected {
                    address,
                    role: PeripheralRole::Listener,
                });
                true
            }
            Err(e) => {
                self.listener_failures = self.listener_failures.saturating_add(1);
                self.listener_backoff = true;
                self.monitor.update_stats(|s| s.listener_connect_failures += 1);
                self.monitor.emit(GatewayEvent::ConnectFailed {
                    address,
                    role: PeripheralRole::Listener,
                    attempt: self.listener_failures,
                    error: e.to_string(),
                });
                // Listener retries never give up
                self.monitor.emit(GatewayEvent::RetryScheduled {
                    address,
                    role: PeripheralRole::Listener,
                    attempt: self.listener_failures,
                    delay_ms: self.listener_policy.delay().as_millis() as u64,
                });
                false
            }
        }
    }

    async fn open_listener(&mut self) -> Result<ListenerSession, ConnectError> {
        let address = self.listener_address;
        let lease = self.radio.claim(address, PeripheralRole::Listener)?;
        let mut connection = self.bounded_connect(address, PeripheralRole::Listener).await?;

        if let Err(e) = self
            .link
            .subscribe(&connection, self.link_events_tx.clone())
            .await
        {
            self.bounded_disconnect(&mut connection).await;
            return Err(e);
        }

        Ok(ListenerSession {
            connection,
            _lease: lease,
        })
    }

    fn is_current_listener(&self, connection_id: ConnectionId) -> bool {
        self.listener
            .as_ref()
            .map(|s| s.connection.id() == connection_id)
            .unwrap_or(false)
    }

    /// The peripheral dropped the listener link on its own
    async fn listener_lost(&mut self, address: PeripheralAddress) {
        if let Some(mut session) = self.listener.take() {
            // Releases whatever the link still holds for the dead connection
            self.bounded_disconnect(&mut session.connection).await;
        }
        self.listener_backoff = true;
        self.monitor.update_stats(|s| s.listener_lost += 1);
        self.monitor.emit(GatewayEvent::ListenerLost { address });
        self.transition(GatewayMode::Idle);
    }

    /// Tear the listener down and let its notification buffers flush
    async fn suspend_listener(&mut self) {
        if let Some(mut session) = self.listener.take() {
            self.link.unsubscribe(&session.connection).await;
            self.bounded_disconnect(&mut session.connection).await;
            self.monitor.emit(GatewayEvent::Disconnected {
                address: session.connection.address(),
                role: PeripheralRole::Listener,
            });
            // Lease released here, before the grace period
            drop(session);
        }
        sleep(self.config.timing.suspend_grace()).await;
    }

    fn handle_notification(&mut self, notification: RawNotification) {
        let message = self.decoder.decode(notification.origin, &notification.value);
        let classified = message.classification().is_some();
        self.monitor.update_stats(|s| {
            s.notifications_received += 1;
            if classified {
                s.messages_classified += 1;
            }
        });
        self.monitor.emit(GatewayEvent::NotificationReceived {
            origin: message.origin(),
            text: message.text().to_string(),
            classification: message.classification().map(str::to_string),
        });

        let Some(request) = self.router.route(&message) else {
            return;
        };

        let request_id = request.id();
        let target = request.target();
        let origin = request.origin().to_string();
        // Counted before it becomes visible to the dequeue side
        let queue_len = self.monitor.request_queued();
        match self.intake_tx.try_send(request) {
            Ok(()) => {
                self.monitor.update_stats(|s| s.requests_routed += 1);
                self.monitor.emit(GatewayEvent::SendQueued {
                    request_id,
                    target,
                    origin,
                    queue_len,
                });
            }
            Err((request, e)) => {
                self.monitor.request_dequeued();
                self.monitor.update_stats(|s| s.sends_failed += 1);
                self.monitor.emit(GatewayEvent::SendFailed {
                    request_id,
                    target,
                    attempts: 0,
                    error: e.to_string(),
                });
                request.complete(Err(e));
            }
        }
    }

    // ------------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------------

    /// Run a request through the sender retry policy and report the outcome
    async fn send_with_retries(&mut self, request: SendRequest) {
        let target = request.target();
        let mut attempts = 0u32;

        let outcome = loop {
            attempts += 1;
            match self.send_once(&request).await {
                Ok(bytes_written) => break Ok(bytes_written),
                Err(failure) => {
                    self.record_send_failure(&request, attempts, &failure);
                    if !self.sender_policy.should_retry(attempts) {
                        break Err(failure);
                    }
                    self.monitor.emit(GatewayEvent::RetryScheduled {
                        address: target,
                        role: PeripheralRole::Sender,
                        attempt: attempts,
                        delay_ms: self.sender_policy.delay().as_millis() as u64,
                    });
                    sleep(self.sender_policy.delay()).await;
                }
            }
        };

        match outcome {
            Ok(bytes_written) => {
                self.monitor.update_stats(|s| s.sends_succeeded += 1);
                self.monitor.emit(GatewayEvent::SendCompleted {
                    request_id: request.id(),
                    target,
                    attempts,
                });
                let receipt = SendReceipt {
                    request_id: request.id(),
                    target,
                    bytes_written,
                    attempts,
                    completed_at: Timestamp::now(),
                };
                request.complete(Ok(receipt));
            }
            Err(failure) => {
                let error = failure.into_gateway_error(attempts);
                self.monitor.update_stats(|s| s.sends_failed += 1);
                self.monitor.emit(GatewayEvent::SendFailed {
                    request_id: request.id(),
                    target,
                    attempts,
                    error: error.to_string(),
                });
                request.complete(Err(error));
            }
        }
    }

    fn record_send_failure(&self, request: &SendRequest, attempt: u32, failure: &SendFailure) {
        let event = match failure {
            SendFailure::Connect(e) => GatewayEvent::ConnectFailed {
                address: request.target(),
                role: PeripheralRole::Sender,
                attempt,
                error: e.to_string(),
            },
            SendFailure::Write(e) => GatewayEvent::WriteFailed {
                request_id: request.id(),
                target: request.target(),
                attempt,
                error: e.to_string(),
            },
        };
        self.monitor.emit(event);
    }

    /// Connect, write and disconnect once; the sender is always disconnected
    async fn send_once(&self, request: &SendRequest) -> Result<usize, SendFailure> {
        let target = request.target();
        let _lease = self.radio.claim(target, PeripheralRole::Sender)?;
        let mut connection = self.bounded_connect(target, PeripheralRole::Sender).await?;
        self.monitor.emit(GatewayEvent::Connected {
            address: target,
            role: PeripheralRole::Sender,
        });

        // Target modules drop bytes written right after connect or right before disconnect
        let inter_op = self.config.timing.inter_op_delay();
        sleep(inter_op).await;
        let written = self.bounded_write(&connection, request.payload()).await;
        if written.is_ok() {
            sleep(inter_op).await;
        }

        self.bounded_disconnect(&mut connection).await;
        self.monitor.emit(GatewayEvent::Disconnected {
            address: target,
            role: PeripheralRole::Sender,
        });

        written?;
        debug!(
            "Wrote {} byte(s) to {} for request #{}",
            request.payload().len(),
            target,
            request.id()
        );
        Ok(request.payload().len())
    }

    // ------------------------------------------------------------------------
    // Bounded Link Operations
    // ------------------------------------------------------------------------

    /// Connect within the timeout; a timed-out attempt is aborted before returning
    ///
    /// Callers hold the radio lease across this call, so the lease outlives the abort.
    async fn bounded_connect(
        &self,
        address: PeripheralAddress,
        role: PeripheralRole,
    ) -> Result<Connection, ConnectError> {
        let limit = self.config.timing.connect_timeout();
        match timeout(limit, self.link.connect(address, role)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Connect to {} as {} timed out after {}ms", address, role, limit.as_millis());
                self.force_teardown(address).await;
                Err(ConnectError::Timeout {
                    duration_ms: limit.as_millis() as u64,
                })
            }
        }
    }

    async fn bounded_write(&self, connection: &Connection, payload: &[u8]) -> Result<(), WriteError> {
        let limit = self.config.timing.write_timeout();
        let write = async {
            match self.config.write_mode {
                WriteMode::Atomic => self.link.write(connection, payload).await,
                WriteMode::PerCharacter { delay_ms } => {
                    let delay = Duration::from_millis(delay_ms);
                    for (index, byte) in payload.iter().enumerate() {
                        if index > 0 {
                            sleep(delay).await;
                        }
                        self.link.write(connection, core::slice::from_ref(byte)).await?;
                    }
                    Ok(())
                }
            }
        };

        match timeout(limit, write).await {
            Ok(result) => result,
            Err(_) => Err(WriteError::Timeout {
                duration_ms: limit.as_millis() as u64,
            }),
        }
    }

    /// Disconnect, forcing the local state closed if the link does not answer in time
    async fn bounded_disconnect(&self, connection: &mut Connection) {
        let limit = self.config.timing.connect_timeout();
        if timeout(limit, self.link.disconnect(connection)).await.is_err() {
            warn!(
                "Disconnect of {} timed out after {}ms, forcing closed",
                connection.address(),
                limit.as_millis()
            );
            connection.mark_disconnected();
            self.force_teardown(connection.address()).await;
        }
    }

    /// Abort any half-open link to `address`
    async fn force_teardown(&self, address: PeripheralAddress) {
        let limit = self.config.timing.connect_timeout();
        if timeout(limit, self.link.abort(address)).await.is_err() {
            warn!("Abort of {} did not finish within {}ms", address, limit.as_millis());
        }
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    async fn shutdown(&mut self) {
        if let Some(mut session) = self.listener.take() {
            self.link.unsubscribe(&session.connection).await;
            self.bounded_disconnect(&mut session.connection).await;
            self.monitor.emit(GatewayEvent::Disconnected {
                address: session.connection.address(),
                role: PeripheralRole::Listener,
            });
        }
        self.transition(GatewayMode::Idle);

        self.intake_rx.close();
        let mut dropped = 0usize;
        while let Some(request) = self.intake_rx.try_recv() {
            self.monitor.request_dequeued();
            request.complete(Err(GatewayError::Shutdown));
            dropped += 1;
        }
        if dropped > 0 {
            info!("Failed {} queued request(s) on shutdown", dropped);
        }
    }
}
