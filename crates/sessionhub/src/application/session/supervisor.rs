//! SessionSupervisor: the actor that owns one session.
//!
//! # Event loop
//!
//! The supervisor is a single task that waits on seven sources at once:
//!
//! ```text
//!   shutdown watch ──┐
//!   commands ────────┤
//!   transport events ┤                ┌─► transport link (send / probe / close)
//!   connect results ─┼─► supervisor ──┼─► credential store (load / save / delete)
//!   delivery results ┤                └─► event bus (status, logs, subscribers)
//!   health reports ──┤
//!   timers ──────────┘  (reconnect deadline, next drain step)
//! ```
//!
//! Connect attempts, message deliveries and health probes run in their own
//! tasks and report back over channels, so the loop stays responsive to
//! status queries while the network is slow.  Every attempt and every link
//! is tagged with a `generation`; results carrying an older generation are
//! discarded, which guarantees at most one live transport handle per session.
//!
//! # Deliveries
//!
//! At most one send is on the wire at a time.  While it is, new messages
//! queue and the drain timer is held, so per-session order is kept.  A
//! direct send's caller gets its reply when the delivery result comes back.
//! A result from an older generation still counts (the message did or did
//! not go out) but no longer drives the link state.
//!
//! # Pairing
//!
//! A session without credentials never connects on its own.  Only an
//! explicit `RequestPairing` starts a connect with `allow_pairing = true`.
//! A pairing challenge that arrives without such a request means the
//! transport no longer accepts the stored credentials, which is terminal.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sessionhub_core::{
    BackoffScheduler, CredentialBlob, CredentialsRef, Destination, DisconnectReason, EnqueueOutcome,
    HealthTracker, HealthVerdict, LogLevel, PairingChallenge, Payload, QueuedMessage, RejectReason,
    SendOutcome, SessionId, SessionPolicy, SessionSnapshot, SessionState, SessionStatus,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, timeout_at, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use super::command::{PairingError, SessionCommand};
use super::handle::SupervisorHandle;
use crate::application::dispatcher::{Admission, MessageDispatcher, RetryOutcome};
use crate::application::events::{EventBus, SessionEvent};
use crate::application::health_monitor::{HealthMonitor, HealthReport, ProbeOutcome};
use crate::application::ports::{
    ConnectOutcome, CredentialStore, TransportDriver, TransportError, TransportEvent, TransportLink,
};

const COMMAND_CHANNEL_CAPACITY: usize = 64;
const INTERNAL_CHANNEL_CAPACITY: usize = 8;
const PAIRING_REQUIRED: &str = "pairing required";

/// Everything a supervisor needs at spawn time.
pub struct SupervisorConfig {
    pub id: SessionId,
    pub policy: Arc<SessionPolicy>,
    pub driver: Arc<dyn TransportDriver>,
    pub credentials: Arc<dyn CredentialStore>,
    pub bus: EventBus,
    /// Persisted counters from a previous run, if any.
    pub seed: Option<SessionSnapshot>,
}

struct ConnectAttempt {
    generation: u64,
    result: Result<ConnectOutcome, TransportError>,
}

/// The one send currently on the wire.
struct InFlight {
    generation: u64,
    msg: QueuedMessage,
    /// Caller of a direct send; drained messages have none.
    reply: Option<oneshot::Sender<SendOutcome>>,
    task: JoinHandle<()>,
}

struct DeliveryResult {
    message_id: Uuid,
    result: Result<(), TransportError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub struct SessionSupervisor {
    id: SessionId,
    policy: Arc<SessionPolicy>,
    driver: Arc<dyn TransportDriver>,
    credential_store: Arc<dyn CredentialStore>,
    bus: EventBus,

    // Session record
    state: SessionState,
    last_error: Option<String>,
    connected_at: Option<DateTime<Utc>>,
    last_reconnect_attempt: Option<DateTime<Utc>>,
    credentials: Option<CredentialsRef>,

    // Pairing
    pairing_requested: bool,
    challenge: Option<PairingChallenge>,
    pairing_waiters: Vec<oneshot::Sender<Result<PairingChallenge, PairingError>>>,

    // Transport
    link: Option<Arc<dyn TransportLink>>,
    events: Option<mpsc::Receiver<TransportEvent>>,
    generation: u64,
    connect_task: Option<JoinHandle<()>>,
    connect_tx: mpsc::Sender<ConnectAttempt>,
    connect_rx: mpsc::Receiver<ConnectAttempt>,

    // Supervision
    backoff: BackoffScheduler,
    health: HealthTracker,
    health_monitor: Option<HealthMonitor>,
    health_tx: mpsc::Sender<HealthReport>,
    health_rx: mpsc::Receiver<HealthReport>,

    dispatcher: MessageDispatcher,
    in_flight: Option<InFlight>,
    delivery_tx: mpsc::Sender<DeliveryResult>,
    delivery_rx: mpsc::Receiver<DeliveryResult>,

    // Communication
    command_rx: mpsc::Receiver<SessionCommand>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SessionSupervisor {
    /// Spawns the supervisor task.
    ///
    /// The task loads credentials (and connects if it finds any) before it
    /// processes the first command, so the first status query already sees
    /// the outcome of that bootstrap.
    pub fn spawn(config: SupervisorConfig, shutdown_rx: watch::Receiver<bool>) -> (SupervisorHandle, JoinHandle<()>) {
        let (tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (connect_tx, connect_rx) = mpsc::channel(INTERNAL_CHANNEL_CAPACITY);
        let (health_tx, health_rx) = mpsc::channel(INTERNAL_CHANNEL_CAPACITY);
        let (delivery_tx, delivery_rx) = mpsc::channel(INTERNAL_CHANNEL_CAPACITY);
        let policy = config.policy;

        let supervisor = Self {
            id: config.id.clone(),
            backoff: BackoffScheduler::from_policy(&policy),
            health: HealthTracker::new(policy.health_failure_threshold),
            dispatcher: MessageDispatcher::new(&policy),
            policy,
            driver: config.driver,
            credential_store: config.credentials,
            bus: config.bus,
            state: SessionState::Uninitialized,
            last_error: None,
            connected_at: None,
            last_reconnect_attempt: None,
            credentials: None,
            pairing_requested: false,
            challenge: None,
            pairing_waiters: Vec::new(),
            link: None,
            events: None,
            generation: 0,
            connect_task: None,
            connect_tx,
            connect_rx,
            health_monitor: None,
            health_tx,
            health_rx,
            in_flight: None,
            delivery_tx,
            delivery_rx,
            command_rx,
            shutdown_rx,
        };

        let task = tokio::spawn(supervisor.run(config.seed));
        (SupervisorHandle::new(config.id, tx), task)
    }

    async fn run(mut self, seed: Option<SessionSnapshot>) {
        debug!(session_id = %self.id, "supervisor started");
        self.bootstrap(seed).await;

        loop {
            let reconnect_at = self.backoff.deadline().map(Instant::from_std);
            let drain_at = match self.in_flight {
                Some(_) => None,
                None => self.dispatcher.next_drain_at(),
            };

            let flow = tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    let stopping = changed.is_err() || *self.shutdown_rx.borrow();
                    if stopping {
                        self.stop(false).await;
                        Flow::Stop
                    } else {
                        Flow::Continue
                    }
                }

                cmd = self.command_rx.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd).await,
                    None => {
                        debug!(session_id = %self.id, "all handles dropped");
                        self.stop(false).await;
                        Flow::Stop
                    }
                },

                event = next_event(&mut self.events) => self.on_transport_event(event).await,

                Some(attempt) = self.connect_rx.recv() => self.on_connect_result(attempt).await,

                Some(delivery) = self.delivery_rx.recv() => self.on_delivery_result(delivery).await,

                Some(report) = self.health_rx.recv() => self.on_health_report(report).await,

                _ = sleep_until_opt(reconnect_at) => {
                    self.on_reconnect_due().await;
                    Flow::Continue
                }

                _ = sleep_until_opt(drain_at) => {
                    self.drain_step();
                    Flow::Continue
                }
            };

            if flow == Flow::Stop {
                break;
            }
        }

        debug!(session_id = %self.id, state = %self.state, "supervisor stopped");
    }

    async fn bootstrap(&mut self, seed: Option<SessionSnapshot>) {
        if let Some(seed) = seed {
            self.dispatcher.restore(&seed);
            self.backoff.restore_attempts(seed.reconnect_attempts);
            self.last_reconnect_attempt = seed.last_reconnect_attempt;
            self.log(LogLevel::Debug, "restored counters from snapshot").await;
        }

        match self.credential_store.load(&self.id).await {
            Ok(Some(credentials)) => {
                self.credentials = Some(credentials);
                self.transition(SessionState::Connecting, Some("using stored credentials".to_string()))
                    .await;
                self.begin_connect(false);
            }
            Ok(None) => {
                self.last_error = Some(PAIRING_REQUIRED.to_string());
                self.log(LogLevel::Info, "no stored credentials; waiting for a pairing request")
                    .await;
            }
            Err(e) => {
                let reason = format!("credential store: {e}");
                self.log(LogLevel::Error, format!("could not load credentials: {e}")).await;
                self.last_error = Some(reason);
            }
        }
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    async fn on_command(&mut self, cmd: SessionCommand) -> Flow {
        match cmd {
            SessionCommand::GetStatus { reply } => {
                let _ = reply.send(self.status());
            }
            SessionCommand::Send {
                destination,
                payload,
                reply,
            } => self.on_send(destination, payload, reply).await,
            SessionCommand::RequestPairing { reply } => self.on_request_pairing(reply).await,
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            SessionCommand::Shutdown { logout, reply } => {
                self.stop(logout).await;
                let _ = reply.send(());
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    /// Replies at once unless the message goes straight to the wire, in
    /// which case [`Self::on_delivery_result`] replies.
    async fn on_send(&mut self, destination: Destination, payload: Payload, reply: oneshot::Sender<SendOutcome>) {
        let rejected = match self.state {
            SessionState::Failed => Some(RejectReason::SessionFailed),
            SessionState::LoggedOut => Some(RejectReason::ShuttingDown),
            _ => None,
        };
        if let Some(reason) = rejected {
            let _ = reply.send(SendOutcome::rejected(reason));
            return;
        }

        let msg = QueuedMessage::new(destination, payload);
        let now = Instant::now();
        let link = match (&self.link, &self.in_flight) {
            (Some(link), None) if self.state.is_connected() => Some(Arc::clone(link)),
            _ => None,
        };

        match (self.dispatcher.admit(link.is_some(), now), link) {
            (Admission::SendNow, Some(link)) => self.begin_delivery(link, msg, Some(reply)),
            _ => {
                let outcome = self.dispatcher.enqueue(msg);
                self.report_drop(outcome).await;
                if self.state.is_connected() {
                    self.dispatcher.schedule_drain(now);
                }
                let _ = reply.send(SendOutcome::Queued);
            }
        }
    }

    async fn on_request_pairing(&mut self, reply: oneshot::Sender<Result<PairingChallenge, PairingError>>) {
        match self.state {
            SessionState::Connected | SessionState::Authenticated => {
                let _ = reply.send(Err(PairingError::AlreadyPaired));
            }
            SessionState::Failed => {
                let _ = reply.send(Err(PairingError::SessionFailed));
            }
            SessionState::LoggedOut => {
                let _ = reply.send(Err(PairingError::ShuttingDown));
            }
            SessionState::WaitingPairing if self.challenge.is_some() => {
                let _ = reply.send(self.challenge.clone().ok_or(PairingError::ShuttingDown));
            }
            SessionState::WaitingPairing | SessionState::Connecting => {
                self.pairing_requested = true;
                self.pairing_waiters.push(reply);
            }
            SessionState::Uninitialized | SessionState::Disconnected | SessionState::Reconnecting => {
                self.pairing_waiters.push(reply);
                self.pairing_requested = true;
                self.backoff.cancel();
                self.transition(SessionState::Connecting, Some("pairing requested".to_string()))
                    .await;
                self.begin_connect(true);
            }
        }
    }

    // ── Transport ─────────────────────────────────────────────────────────────

    /// Starts a connect attempt in the background, tearing down any previous
    /// link or attempt first.
    fn begin_connect(&mut self, allow_pairing: bool) {
        self.teardown_link();
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }

        let generation = self.generation;
        let driver = Arc::clone(&self.driver);
        let id = self.id.clone();
        let credentials = self.credentials.clone();
        let limit = self.policy.connect_timeout;
        let tx = self.connect_tx.clone();

        self.connect_task = Some(tokio::spawn(async move {
            let result = match timeout(limit, driver.connect(&id, credentials, allow_pairing)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            };
            let _ = tx.send(ConnectAttempt { generation, result }).await;
        }));
    }

    async fn on_connect_result(&mut self, attempt: ConnectAttempt) -> Flow {
        if attempt.generation != self.generation {
            if let Ok(ConnectOutcome::Established(stale)) = attempt.result {
                close_in_background(stale.link, self.policy.shutdown_timeout);
            }
            return Flow::Continue;
        }
        self.connect_task = None;

        match attempt.result {
            Ok(ConnectOutcome::Established(conn)) => {
                debug!(session_id = %self.id, generation = self.generation, "transport link established");
                self.link = Some(conn.link);
                self.events = Some(conn.events);
            }
            Ok(ConnectOutcome::PairingRequired) => {
                if self.credentials.is_some() {
                    self.fail("credentials rejected; pairing required").await;
                } else {
                    self.fail_waiters(PairingError::Transport(
                        "transport did not offer a pairing challenge".to_string(),
                    ));
                    self.await_pairing(PAIRING_REQUIRED.to_string()).await;
                }
            }
            Err(TransportError::Auth(detail)) => {
                self.fail(format!("authentication failed: {detail}")).await;
            }
            Err(e) => {
                if self.credentials.is_some() {
                    return self.on_disconnect(DisconnectReason::recoverable(e.to_string())).await;
                }
                self.fail_waiters(PairingError::Transport(e.to_string()));
                self.await_pairing(e.to_string()).await;
            }
        }
        Flow::Continue
    }

    async fn on_transport_event(&mut self, event: Option<TransportEvent>) -> Flow {
        let Some(event) = event else {
            self.events = None;
            return self
                .on_disconnect(DisconnectReason::recoverable("transport event stream closed"))
                .await;
        };

        match event {
            TransportEvent::PairingChallenge(challenge) => self.on_pairing_challenge(challenge).await,
            TransportEvent::CredentialsReady(blob) => self.on_credentials_ready(blob).await,
            TransportEvent::Connected => self.on_connected().await,
            TransportEvent::Disconnected(reason) => return self.on_disconnect(reason).await,
        }
        Flow::Continue
    }

    async fn on_pairing_challenge(&mut self, challenge: PairingChallenge) {
        if !self.pairing_requested {
            self.fail("transport requested pairing; stored credentials are no longer accepted")
                .await;
            return;
        }

        self.challenge = Some(challenge.clone());
        self.transition(SessionState::WaitingPairing, None).await;
        for waiter in self.pairing_waiters.drain(..) {
            let _ = waiter.send(Ok(challenge.clone()));
        }
        self.publish(SessionEvent::PairingChallengeIssued {
            session_id: self.id.clone(),
            challenge,
        })
        .await;
    }

    async fn on_credentials_ready(&mut self, blob: CredentialBlob) {
        if let Err(e) = self.credential_store.save(&self.id, &blob).await {
            self.log(LogLevel::Error, format!("failed to persist credentials: {e}")).await;
        }
        self.credentials = Some(CredentialsRef::from(blob));
        self.challenge = None;
        self.pairing_requested = false;
        self.transition(SessionState::Authenticated, None).await;
    }

    async fn on_connected(&mut self) {
        if self.state.is_connected() {
            return;
        }
        let now = Utc::now();
        self.connected_at = Some(now);
        self.last_error = None;
        self.challenge = None;
        self.pairing_requested = false;
        self.backoff.reset();
        self.health.mark_connected(now);
        self.fail_waiters(PairingError::AlreadyPaired);
        self.start_health_monitor();

        self.transition(SessionState::Connected, None).await;
        self.dispatcher.schedule_drain(Instant::now());
    }

    /// Handles a transport-reported (or synthesised) disconnect.
    async fn on_disconnect(&mut self, reason: DisconnectReason) -> Flow {
        self.teardown_link();
        self.dispatcher.cancel_drain();
        self.connected_at = None;
        self.challenge = None;
        self.health.mark_disconnected();
        self.last_error = Some(reason.detail.clone());
        self.fail_waiters(PairingError::Transport(reason.detail.clone()));
        self.transition(SessionState::Disconnected, Some(reason.to_string())).await;

        if reason.is_terminal() {
            return self.log_out().await;
        }
        if self.credentials.is_none() {
            self.await_pairing(PAIRING_REQUIRED.to_string()).await;
            return Flow::Continue;
        }
        self.schedule_reconnect().await;
        Flow::Continue
    }

    async fn schedule_reconnect(&mut self) {
        match self.backoff.schedule(Instant::now().into_std()) {
            Ok(delay) => {
                let detail = format!(
                    "attempt {}/{} in {:?}",
                    self.backoff.attempts(),
                    self.backoff.max_attempts(),
                    delay
                );
                self.transition(SessionState::Reconnecting, Some(detail)).await;
            }
            Err(exhausted) => self.fail(exhausted.to_string()).await,
        }
    }

    async fn on_reconnect_due(&mut self) {
        if !self.backoff.take_due(Instant::now().into_std()) || self.state != SessionState::Reconnecting {
            return;
        }
        self.last_reconnect_attempt = Some(Utc::now());
        self.dispatcher.record_reconnect();
        let detail = format!("reconnect attempt {}", self.backoff.attempts());
        self.transition(SessionState::Connecting, Some(detail)).await;
        self.begin_connect(false);
    }

    /// Terminal logout: forget credentials and end the actor.
    async fn log_out(&mut self) -> Flow {
        self.abandon_in_flight();
        self.backoff.cancel();
        self.credentials = None;
        if let Err(e) = self.credential_store.delete(&self.id).await {
            self.log(LogLevel::Warning, format!("failed to delete credentials: {e}")).await;
        }
        let discarded = self.dispatcher.discard_queue();
        if discarded > 0 {
            self.log(LogLevel::Warning, format!("discarded {discarded} queued messages")).await;
        }
        self.transition(SessionState::LoggedOut, None).await;
        self.publish(SessionEvent::Removed {
            session_id: self.id.clone(),
        })
        .await;
        Flow::Stop
    }

    /// Moves to the terminal `Failed` state.
    async fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        self.teardown_link();
        self.backoff.cancel();
        self.dispatcher.cancel_drain();
        self.connected_at = None;
        self.challenge = None;
        self.pairing_requested = false;
        self.health.mark_disconnected();
        self.fail_waiters(PairingError::SessionFailed);
        self.last_error = Some(reason.clone());
        self.transition(SessionState::Failed, Some(reason)).await;
    }

    /// Back to `Uninitialized`: nothing to connect with until pairing.
    async fn await_pairing(&mut self, reason: String) {
        self.teardown_link();
        self.pairing_requested = false;
        self.challenge = None;
        self.last_error = Some(reason.clone());
        self.transition(SessionState::Uninitialized, Some(reason)).await;
    }

    /// Drops the current link without waiting for it to close.
    fn teardown_link(&mut self) {
        self.generation += 1;
        self.stop_health_monitor();
        self.events = None;
        if let Some(link) = self.link.take() {
            close_in_background(link, self.policy.shutdown_timeout);
        }
    }

    /// Orderly stop, bounded by the shutdown timeout.
    async fn stop(&mut self, logout: bool) {
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        self.abandon_in_flight();
        self.backoff.cancel();
        self.dispatcher.cancel_drain();
        self.stop_health_monitor();
        self.events = None;
        self.fail_waiters(PairingError::ShuttingDown);

        let Some(link) = self.link.take() else {
            return;
        };
        let deadline = Instant::now() + self.policy.shutdown_timeout;
        if logout {
            match timeout_at(deadline, link.logout()).await {
                Ok(Ok(())) => debug!(session_id = %self.id, "logged out from transport"),
                Ok(Err(e)) => warn!(session_id = %self.id, error = %e, "transport logout failed"),
                Err(_) => warn!(session_id = %self.id, "transport logout timed out"),
            }
        }
        if timeout_at(deadline, link.close()).await.is_err() {
            warn!(session_id = %self.id, "transport close timed out; abandoning link");
        }
    }

    // ── Health ────────────────────────────────────────────────────────────────

    fn start_health_monitor(&mut self) {
        self.stop_health_monitor();
        if let Some(link) = &self.link {
            self.health_monitor = Some(HealthMonitor::spawn(
                Arc::clone(link),
                self.policy.health_check_interval,
                self.policy.health_probe_timeout,
                self.generation,
                self.health_tx.clone(),
            ));
        }
    }

    fn stop_health_monitor(&mut self) {
        if let Some(monitor) = self.health_monitor.take() {
            monitor.stop();
        }
    }

    async fn on_health_report(&mut self, report: HealthReport) -> Flow {
        if report.generation != self.generation || !self.state.is_connected() {
            return Flow::Continue;
        }
        let now = Utc::now();
        let error = match report.outcome {
            ProbeOutcome::Alive => {
                self.health.record_success(now);
                return Flow::Continue;
            }
            ProbeOutcome::Failed(error) => error,
        };

        match self.health.record_failure(now) {
            HealthVerdict::Healthy => Flow::Continue,
            HealthVerdict::Degraded {
                consecutive_failures,
            } => {
                self.publish(SessionEvent::HealthCheckFailed {
                    session_id: self.id.clone(),
                    consecutive_failures,
                })
                .await;
                Flow::Continue
            }
            HealthVerdict::Unhealthy {
                consecutive_failures,
            } => {
                self.publish(SessionEvent::HealthCheckFailed {
                    session_id: self.id.clone(),
                    consecutive_failures,
                })
                .await;
                let detail = format!("{consecutive_failures} consecutive health checks failed: {error}");
                self.on_disconnect(DisconnectReason::recoverable(detail)).await
            }
        }
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    fn drain_step(&mut self) {
        let link = match (&self.link, self.state.is_connected()) {
            (Some(link), true) => Arc::clone(link),
            _ => {
                self.dispatcher.cancel_drain();
                return;
            }
        };
        if let Some(msg) = self.dispatcher.begin_drain_step(Instant::now()) {
            self.begin_delivery(link, msg, None);
        }
    }

    /// Puts `msg` on the wire in a background task.
    fn begin_delivery(
        &mut self,
        link: Arc<dyn TransportLink>,
        msg: QueuedMessage,
        reply: Option<oneshot::Sender<SendOutcome>>,
    ) {
        let send = self.dispatcher.deliver(link, &msg);
        let message_id = msg.id;
        let tx = self.delivery_tx.clone();
        let task = tokio::spawn(async move {
            let result = send.await;
            let _ = tx.send(DeliveryResult { message_id, result }).await;
        });
        self.in_flight = Some(InFlight {
            generation: self.generation,
            msg,
            reply,
            task,
        });
    }

    async fn on_delivery_result(&mut self, delivery: DeliveryResult) -> Flow {
        let Some(in_flight) = self.in_flight.take() else {
            return Flow::Continue;
        };
        if in_flight.msg.id != delivery.message_id {
            self.in_flight = Some(in_flight);
            return Flow::Continue;
        }
        let InFlight {
            generation,
            msg,
            reply,
            ..
        } = in_flight;
        let drained = reply.is_none();
        let current = generation == self.generation;

        let outcome = match delivery.result {
            Ok(()) => {
                self.dispatcher.record_sent();
                self.publish(SessionEvent::MessageDispatched {
                    session_id: self.id.clone(),
                    message_id: msg.id,
                })
                .await;
                SendOutcome::Sent
            }
            Err(e) => {
                self.on_delivery_failure(msg, e, current).await;
                SendOutcome::Queued
            }
        };
        if let Some(reply) = reply {
            let _ = reply.send(outcome);
        }

        if self.state.is_connected() {
            let now = Instant::now();
            if drained {
                self.dispatcher.finish_drain_step(now);
            } else {
                self.dispatcher.schedule_drain(now);
            }
        }
        Flow::Continue
    }

    /// Cancels the send on the wire, if any, for an actor that is ending.
    fn abandon_in_flight(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.task.abort();
            if let Some(reply) = in_flight.reply {
                let _ = reply.send(SendOutcome::rejected(RejectReason::ShuttingDown));
            }
        }
    }

    /// `current` is false for a send that started on an older link.
    async fn on_delivery_failure(&mut self, msg: QueuedMessage, error: TransportError, current: bool) {
        let message_id = msg.id;
        let (outcome, displaced) = self.dispatcher.retry_or_abandon(msg);
        let event = match outcome {
            RetryOutcome::Requeued { retry_count } => SessionEvent::MessageRequeued {
                session_id: self.id.clone(),
                message_id,
                retry_count,
                error: error.to_string(),
            },
            RetryOutcome::Abandoned => SessionEvent::MessageFailed {
                session_id: self.id.clone(),
                message_id,
                error: error.to_string(),
            },
        };
        self.publish(event).await;
        if let Some(displaced) = displaced {
            self.report_drop(displaced).await;
        }

        if current && error == TransportError::NotConnected && self.state.is_connected() {
            // Recoverable by construction; never ends the actor.
            let _ = self
                .on_disconnect(DisconnectReason::recoverable("link lost during send"))
                .await;
        }
    }

    async fn report_drop(&self, outcome: EnqueueOutcome) {
        if let EnqueueOutcome::DroppedOldest { dropped, exhausted } = outcome {
            self.publish(SessionEvent::MessageDropped {
                session_id: self.id.clone(),
                message_id: dropped.id,
                exhausted,
            })
            .await;
        }
    }

    // ── Views ─────────────────────────────────────────────────────────────────

    fn status(&self) -> SessionStatus {
        let uptime_ms = self
            .connected_at
            .map(|at| (Utc::now() - at).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        let connected = self.state.is_connected();

        SessionStatus {
            id: self.id.clone(),
            state: self.state,
            is_ready: connected,
            is_connected: connected && self.link.is_some(),
            pairing_code: match self.state {
                SessionState::WaitingPairing => self.challenge.as_ref().map(|c| c.code.clone()),
                _ => None,
            },
            connected_at: self.connected_at,
            last_error: self.last_error.clone(),
            reconnect_attempts: self.backoff.attempts(),
            last_reconnect_attempt: self.last_reconnect_attempt,
            queue_size: self.dispatcher.queue_len(),
            uptime_ms,
            health: self.health.snapshot(),
            stats: self.dispatcher.stats().clone(),
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            stats: self.dispatcher.stats().clone(),
            reconnect_attempts: self.backoff.attempts(),
            last_reconnect_attempt: self.last_reconnect_attempt,
            connected_at: self.connected_at,
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    async fn transition(&mut self, to: SessionState, detail: Option<String>) {
        if self.state == to {
            return;
        }
        let from = std::mem::replace(&mut self.state, to);
        self.publish(SessionEvent::StatusChanged {
            session_id: self.id.clone(),
            from,
            to,
            detail,
            at: Utc::now(),
        })
        .await;
    }

    fn fail_waiters(&mut self, error: PairingError) {
        for waiter in self.pairing_waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
    }

    async fn publish(&self, event: SessionEvent) {
        self.bus.publish(event).await;
    }

    async fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.bus.record(level, Some(self.id.clone()), message).await;
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<TransportEvent>>) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn close_in_background(link: Arc<dyn TransportLink>, limit: std::time::Duration) {
    tokio::spawn(async move {
        let _ = timeout(limit, link.close()).await;
    });
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{CredentialStoreError, MockCredentialStore};
    use crate::infrastructure::storage::memory::InMemoryCredentialStore;
    use crate::infrastructure::transport::mock::MockTransport;
    use std::time::Duration;

    struct Harness {
        handle: SupervisorHandle,
        transport: MockTransport,
        bus: EventBus,
        _shutdown: watch::Sender<bool>,
    }

    fn spawn_with(store: Arc<dyn CredentialStore>, transport: MockTransport) -> Harness {
        let bus = EventBus::new(100);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, _task) = SessionSupervisor::spawn(
            SupervisorConfig {
                id: SessionId::new("s1"),
                policy: Arc::new(SessionPolicy::default()),
                driver: Arc::new(transport.clone()),
                credentials: store,
                bus: bus.clone(),
                seed: None,
            },
            shutdown_rx,
        );
        Harness {
            handle,
            transport,
            bus,
            _shutdown: shutdown_tx,
        }
    }

    async fn wait_for(handle: &SupervisorHandle, state: SessionState) -> SessionStatus {
        for _ in 0..500 {
            let status = handle.status().await.unwrap();
            if status.state == state {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session never reached {state}");
    }

    fn store_without_credentials() -> MockCredentialStore {
        let mut store = MockCredentialStore::new();
        store.expect_load().returning(|_| Ok(None));
        store
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_credentials_waits_for_pairing() {
        // Arrange / Act
        let h = spawn_with(Arc::new(store_without_credentials()), MockTransport::new());
        let status = h.handle.status().await.unwrap();

        // Assert
        assert_eq!(status.state, SessionState::Uninitialized);
        assert_eq!(status.last_error.as_deref(), Some("pairing required"));
        assert_eq!(h.transport.connect_count(&SessionId::new("s1")), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_credential_load_error_is_reported_not_fatal() {
        let mut store = MockCredentialStore::new();
        store
            .expect_load()
            .returning(|_| Err(CredentialStoreError::Unavailable("disk offline".to_string())));

        let h = spawn_with(Arc::new(store), MockTransport::new());
        let status = h.handle.status().await.unwrap();

        assert_eq!(status.state, SessionState::Uninitialized);
        assert!(status.last_error.unwrap().contains("disk offline"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_credential_save_failure_does_not_block_connect() {
        // Arrange
        let mut store = store_without_credentials();
        store
            .expect_save()
            .times(1)
            .returning(|_, _| Err(CredentialStoreError::Unavailable("read-only".to_string())));
        let h = spawn_with(Arc::new(store), MockTransport::new());
        let id = SessionId::new("s1");

        // Act
        let challenge = h.handle.request_pairing().await.unwrap();
        assert!(h.transport.complete_pairing(&id, b"blob"));
        let status = wait_for(&h.handle, SessionState::Connected).await;

        // Assert
        assert!(!challenge.code.is_empty());
        assert!(status.is_ready);
        let logs = h.bus.logs(Some(&id), 100).await;
        assert!(logs.iter().any(|e| e.message.contains("failed to persist credentials")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_pairing_while_waiting_returns_same_challenge() {
        let h = spawn_with(Arc::new(store_without_credentials()), MockTransport::new());

        let first = h.handle.request_pairing().await.unwrap();
        let second = h.handle.request_pairing().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(h.transport.connect_count(&SessionId::new("s1")), 1);
        let status = h.handle.status().await.unwrap();
        assert_eq!(status.pairing_code, Some(first.code));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrequested_pairing_challenge_fails_session() {
        // Arrange – stored credentials, but the link never reports live
        let store = InMemoryCredentialStore::new();
        store.insert(SessionId::new("s1"), b"stale".to_vec()).await;
        let transport = MockTransport::new();
        transport.set_auto_connect(false);
        let h = spawn_with(Arc::new(store), transport);
        let id = SessionId::new("s1");
        wait_for(&h.handle, SessionState::Connecting).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Act
        assert!(h
            .transport
            .emit(&id, TransportEvent::PairingChallenge(PairingChallenge::new("XYZ"))));
        let status = wait_for(&h.handle, SessionState::Failed).await;

        // Assert
        assert!(status.last_error.unwrap().contains("no longer accepted"));
        assert_eq!(
            h.handle.send(Destination::new_unchecked("1"), Payload::text("x")).await.unwrap(),
            SendOutcome::rejected(RejectReason::SessionFailed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_on_connect_is_terminal() {
        let store = InMemoryCredentialStore::new();
        store.insert(SessionId::new("s1"), b"revoked".to_vec()).await;
        let transport = MockTransport::new();
        transport.set_reject_credentials(true);

        let h = spawn_with(Arc::new(store), transport);
        let status = wait_for(&h.handle, SessionState::Failed).await;

        assert!(status.last_error.unwrap().starts_with("authentication failed"));
        assert_eq!(status.reconnect_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_with_logout_calls_transport_logout() {
        // Arrange
        let store = InMemoryCredentialStore::new();
        store.insert(SessionId::new("s1"), b"ok".to_vec()).await;
        let h = spawn_with(Arc::new(store), MockTransport::new());
        let id = SessionId::new("s1");
        wait_for(&h.handle, SessionState::Connected).await;

        // Act
        h.handle.shutdown(true).await.unwrap();

        // Assert
        assert_eq!(h.transport.logout_count(&id), 1);
        assert_eq!(h.transport.close_count(&id), 1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(h.handle.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_shutdown_stops_supervisor() {
        let store = InMemoryCredentialStore::new();
        store.insert(SessionId::new("s1"), b"ok".to_vec()).await;
        let bus = EventBus::new(100);
        let transport = MockTransport::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, task) = SessionSupervisor::spawn(
            SupervisorConfig {
                id: SessionId::new("s1"),
                policy: Arc::new(SessionPolicy::default()),
                driver: Arc::new(transport.clone()),
                credentials: Arc::new(store),
                bus,
                seed: None,
            },
            shutdown_rx,
        );
        wait_for(&handle, SessionState::Connected).await;

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        assert!(handle.is_closed());
        assert_eq!(transport.close_count(&SessionId::new("s1")), 1);
        assert_eq!(transport.logout_count(&SessionId::new("s1")), 0);
    }
}
