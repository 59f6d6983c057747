//! Connection driver
//!
//! One task per running connection. It owns the [`SessionState`] and the
//! heartbeat of the current physical connection and reacts to three sources:
//! inbound transport events, the heartbeat timer and lifecycle commands from
//! the handle. All writes go through the shared send queue.

use super::backoff::Backoff;
use super::gateway::{Shared, Termination};
use super::heartbeat::Heartbeater;
use super::session::{SequenceUpdate, SessionState};
use super::state::ConnectionState;
use crate::error::{GatewayError, GatewayResult};
use crate::events::{DispatchEvent, GatewayEvent};
use crate::protocol::{
    describe_close, ClosePolicy, GatewayMessage, IdentifyPayload, OpCode, RESUMED_EVENT,
};
use crate::transport::{Frame, TransportEvent};
use std::future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Close code used when the client tears a connection down itself; the
/// gateway keeps the session resumable
const CLIENT_CLOSE_CODE: u16 = 4000;

type Ack = oneshot::Sender<GatewayResult<()>>;

/// Lifecycle requests from the handle
#[derive(Debug)]
pub(crate) enum Command {
    /// Reconnect now; the sender learns whether the new transport opened
    Reconnect(Ack),
    Close,
}

/// Why one physical connection ended
enum Exit {
    Reconnect { resume: bool, ack: Option<Ack> },
    Close,
    Fatal(Termination),
}

impl Exit {
    fn reconnect(resume: bool) -> Self {
        Self::Reconnect { resume, ack: None }
    }
}

enum Reopen {
    Opened(mpsc::UnboundedReceiver<TransportEvent>),
    Stopped(Termination),
}

pub(crate) struct Driver {
    shared: Arc<Shared>,
    session: SessionState,
    commands: mpsc::UnboundedReceiver<Command>,
    backoff: Backoff,
}

impl Driver {
    pub(crate) fn new(
        shared: Arc<Shared>,
        session: SessionState,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let backoff = Backoff::new(shared.settings.reconnect);
        Self {
            shared,
            session,
            commands,
            backoff,
        }
    }

    /// Drive physical connections until the connection stops; returns the
    /// session so a later `connect()` can resume it
    pub(crate) async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> SessionState {
        let termination = loop {
            match self.drive(&mut events).await {
                Exit::Close => break Termination::Closed,
                Exit::Fatal(termination) => break termination,
                Exit::Reconnect { resume, ack } => {
                    if !resume && self.session.can_resume() {
                        tracing::info!("Discarding session; next handshake identifies");
                        self.session.invalidate();
                    }

                    match self.reopen(ack).await {
                        Reopen::Opened(next) => events = next,
                        Reopen::Stopped(termination) => break termination,
                    }
                }
            }
        };

        self.finish(termination);
        self.session
    }

    /// Run one physical connection until it has to end, then tear it down
    async fn drive(&mut self, events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Exit {
        let mut heartbeat: Option<Heartbeater> = None;
        let mut peer_closed = false;

        let exit = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Frame(frame)) => {
                        if let Some(exit) = self.on_frame(&frame, &mut heartbeat) {
                            break exit;
                        }
                    }
                    Some(TransportEvent::Closed { code }) => {
                        peer_closed = true;
                        break self.on_close(code);
                    }
                    None => {
                        peer_closed = true;
                        break self.on_close(None);
                    }
                },
                () = next_beat(heartbeat.as_ref()) => {
                    if let Some(exit) = self.on_heartbeat_due(&mut heartbeat) {
                        break exit;
                    }
                }
                command = self.commands.recv() => match command {
                    Some(Command::Reconnect(ack)) => {
                        tracing::info!("Reconnect requested");
                        break Exit::Reconnect { resume: true, ack: Some(ack) };
                    }
                    // A dropped handle stops the connection too
                    Some(Command::Close) | None => break Exit::Close,
                },
            }
        };

        // The timer must be gone before the sink is released
        if let Some(heartbeat) = heartbeat.as_mut() {
            heartbeat.close();
        }
        self.teardown((!peer_closed).then_some(CLIENT_CLOSE_CODE)).await;
        exit
    }

    fn on_frame(&mut self, frame: &Frame, heartbeat: &mut Option<Heartbeater>) -> Option<Exit> {
        let message = match self.shared.codec.decode(frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable frame");
                self.shared.emit(GatewayEvent::Error(e.to_string()));
                return None;
            }
        };

        tracing::debug!(op = %message.op, t = ?message.t, s = ?message.s, "Received");

        match message.op {
            OpCode::Hello => self.on_hello(&message, heartbeat),
            OpCode::Dispatch => {
                self.on_dispatch(message);
                None
            }
            OpCode::HeartbeatAck => {
                let latency = heartbeat.as_mut().and_then(Heartbeater::ack);
                tracing::trace!(latency_ms = ?latency.map(|l| l.as_millis()), "Heartbeat acknowledged");
                self.shared.emit(GatewayEvent::Ack { latency });
                None
            }
            OpCode::Heartbeat => {
                tracing::debug!("Heartbeat requested by gateway");
                self.beat(heartbeat);
                None
            }
            OpCode::InvalidSession => {
                let resumable = message.as_invalid_session().unwrap_or(false);
                tracing::warn!(resumable, "Session invalidated by gateway");
                self.shared.emit(GatewayEvent::Warn(format!(
                    "Invalid session (resumable: {resumable}); reconnecting"
                )));
                Some(Exit::reconnect(true))
            }
            OpCode::Reconnect => {
                tracing::info!("Gateway requested reconnect");
                Some(Exit::reconnect(true))
            }
            op => {
                tracing::debug!(op = %op, "Ignoring client opcode sent by gateway");
                None
            }
        }
    }

    fn on_hello(
        &mut self,
        message: &GatewayMessage,
        heartbeat: &mut Option<Heartbeater>,
    ) -> Option<Exit> {
        let interval = match message.as_hello() {
            Some(hello) if hello.heartbeat_interval > 0 => hello.heartbeat_interval,
            _ => {
                tracing::warn!("Hello without a usable heartbeat interval");
                self.shared.emit(GatewayEvent::Error("Malformed Hello".to_string()));
                return None;
            }
        };

        if let Some(previous) = heartbeat.as_mut() {
            tracing::warn!("Duplicate Hello; restarting heartbeat");
            previous.close();
        }

        self.session.set_connected(true);
        self.shared.set_state(ConnectionState::Handshaking);
        *heartbeat = Some(Heartbeater::start(
            Duration::from_millis(interval),
            self.shared.settings.jitter.clone(),
        ));

        match self.handshake() {
            Ok(()) => {
                self.shared.set_state(ConnectionState::Connected);
                None
            }
            Err(reason) => {
                tracing::error!(error = %reason, "Failed to build handshake");
                Some(Exit::Fatal(Termination::Handshake(reason)))
            }
        }
    }

    /// Queue Resume when a session is saved, Identify otherwise
    fn handshake(&mut self) -> Result<(), String> {
        let settings = &self.shared.settings;

        let message = match self.session.resume_payload(&settings.token) {
            Some(payload) => {
                tracing::info!(seq = payload.seq, "Resuming session");
                GatewayMessage::resume(&payload)
            }
            None => {
                tracing::info!(intents = settings.intents.bits(), "Identifying");
                self.session.begin_identify();
                GatewayMessage::identify(&IdentifyPayload {
                    token: settings.token.clone(),
                    intents: settings.intents,
                    properties: settings.properties.clone(),
                    presence: settings.presence.clone(),
                    large_threshold: settings.large_threshold,
                })
            }
        }
        .map_err(|e| e.to_string())?;

        self.send_control(message);
        Ok(())
    }

    /// Queue a frame the driver itself originates and report a failed write
    ///
    /// A write dropped because the connection was already replaced or closed
    /// is left to the close path.
    fn send_control(&self, message: GatewayMessage) {
        let op = message.op;
        let receipt = self.shared.queue.enqueue(message);
        let shared = self.shared.clone();

        tokio::spawn(async move {
            match receipt.written().await {
                Ok(()) | Err(GatewayError::NotConnected | GatewayError::Closed) => {}
                Err(e) => {
                    tracing::warn!(%op, error = %e, "Failed to send control frame");
                    shared.emit(GatewayEvent::Error(format!("Failed to send {op}: {e}")));
                }
            }
        });
    }

    fn on_dispatch(&mut self, message: GatewayMessage) {
        if let Some(sequence) = message.s {
            if let SequenceUpdate::Stale { current } = self.session.observe_sequence(sequence) {
                tracing::warn!(received = sequence, current, "Dispatch sequence moved backwards");
            }
        }

        if let Some(ready) = message.as_ready() {
            tracing::info!(resume_url = ?ready.resume_gateway_url, "Session established");
            self.session.establish(ready.session_id, ready.resume_gateway_url);
        } else if message.t.as_deref() == Some(RESUMED_EVENT) {
            tracing::info!(seq = self.session.sequence(), "Session resumed");
        }

        let Some(name) = message.t else {
            tracing::debug!("Dispatch without event name");
            return;
        };
        self.shared.emit(GatewayEvent::Dispatch(DispatchEvent {
            name,
            sequence: message.s,
            data: message.d,
        }));
    }

    /// Queue a heartbeat with the last sequence and re-arm the timer
    fn beat(&self, heartbeat: &mut Option<Heartbeater>) {
        self.send_control(GatewayMessage::heartbeat(self.session.last_sequence()));
        if let Some(heartbeat) = heartbeat.as_mut() {
            heartbeat.ping();
        }
    }

    fn on_heartbeat_due(&mut self, heartbeat: &mut Option<Heartbeater>) -> Option<Exit> {
        let missed = heartbeat.as_ref().is_some_and(Heartbeater::awaiting_ack);
        if missed && self.shared.settings.missed_ack_reconnect {
            tracing::warn!("Heartbeat not acknowledged; reconnecting");
            self.shared.emit(GatewayEvent::Warn(
                "Heartbeat not acknowledged; reconnecting".to_string(),
            ));
            return Some(Exit::reconnect(true));
        }

        self.beat(heartbeat);
        None
    }

    fn on_close(&mut self, code: Option<u16>) -> Exit {
        let Some(code) = code else {
            tracing::warn!("Transport closed without a close code; reconnecting");
            self.shared.emit(GatewayEvent::Closed {
                code: None,
                reconnecting: true,
            });
            return Exit::reconnect(true);
        };

        let reason = describe_close(code);
        match ClosePolicy::classify(code) {
            ClosePolicy::Reconnect { resume } => {
                tracing::warn!(code, reason = %reason, resume, "Gateway closed the connection; reconnecting");
                self.shared.emit(GatewayEvent::Error(reason));
                self.shared.emit(GatewayEvent::Closed {
                    code: Some(code),
                    reconnecting: true,
                });
                Exit::reconnect(resume)
            }
            ClosePolicy::NotGateway => {
                tracing::info!(code, "Transport closed; reconnecting");
                self.shared.emit(GatewayEvent::Closed {
                    code: Some(code),
                    reconnecting: true,
                });
                Exit::reconnect(true)
            }
            ClosePolicy::Terminal => {
                tracing::error!(code, reason = %reason, "Gateway closed the connection for good");
                self.shared.emit(GatewayEvent::Closed {
                    code: Some(code),
                    reconnecting: false,
                });
                Exit::Fatal(Termination::Fatal { code, reason })
            }
        }
    }

    /// Release the physical connection; `close_code` is `None` when the peer
    /// already closed it
    async fn teardown(&mut self, close_code: Option<u16>) {
        self.session.set_connected(false);
        self.shared.set_state(ConnectionState::Closing);

        let Some(mut sink) = self.shared.queue.detach().await else {
            return;
        };
        if let Some(code) = close_code {
            if let Err(e) = sink.close(code).await {
                tracing::debug!(error = %e, "Transport close failed");
            }
        }
    }

    /// Open a new physical connection, backing off between failed attempts
    async fn reopen(&mut self, ack: Option<Ack>) -> Reopen {
        let mut waiters: Vec<Ack> = ack.into_iter().collect();
        let mut attempt: u32 = 0;
        let shared = self.shared.clone();

        loop {
            shared.set_state(ConnectionState::Connecting);

            let result = {
                let open = shared.open(&self.session);
                tokio::pin!(open);
                loop {
                    tokio::select! {
                        result = &mut open => break result,
                        command = self.commands.recv() => match command {
                            Some(Command::Reconnect(ack)) => waiters.push(ack),
                            Some(Command::Close) | None => {
                                notify(waiters, || Err(GatewayError::Closed));
                                return Reopen::Stopped(Termination::Closed);
                            }
                        },
                    }
                }
            };

            let error = match result {
                Ok(events) => {
                    notify(waiters, || Ok(()));
                    return Reopen::Opened(events);
                }
                Err(e) => e,
            };

            attempt += 1;
            tracing::warn!(attempt, error = %error, "Reconnect attempt failed");
            self.shared.emit(GatewayEvent::Error(format!(
                "Reconnect attempt {attempt} failed: {error}"
            )));

            if self.backoff.exhausted(attempt) {
                notify(waiters, || Err(GatewayError::ReconnectExhausted { attempts: attempt }));
                return Reopen::Stopped(Termination::Exhausted { attempts: attempt });
            }

            let delay = self.backoff.delay(attempt);
            tracing::debug!(delay_ms = delay.as_millis() as u64, "Waiting before next reconnect attempt");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                command = self.commands.recv() => match command {
                    // Skip the rest of the delay
                    Some(Command::Reconnect(ack)) => waiters.push(ack),
                    Some(Command::Close) | None => {
                        notify(waiters, || Err(GatewayError::Closed));
                        return Reopen::Stopped(Termination::Closed);
                    }
                },
            }
        }
    }

    fn finish(&self, termination: Termination) {
        if let Some(event) = termination.fatal_event() {
            self.shared.emit(event);
        }
        tracing::info!(termination = ?termination, "Gateway connection stopped");

        self.shared.terminate(termination);
        self.shared.set_state(ConnectionState::Idle);
    }
}

/// Resolves when the next heartbeat is due; never without a heartbeat
async fn next_beat(heartbeat: Option<&Heartbeater>) {
    match heartbeat {
        Some(heartbeat) => heartbeat.tick().await,
        None => future::pending().await,
    }
}

fn notify(waiters: Vec<Ack>, result: impl Fn() -> GatewayResult<()>) {
    for waiter in waiters {
        let _ = waiter.send(result());
    }
}
