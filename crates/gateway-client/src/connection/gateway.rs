//! Gateway connection
//!
//! The public handle. Lifecycle calls (`connect`, `reconnect`, `close`) are
//! serialized through a runner lock; the physical connection itself is driven
//! by a background [`Driver`](super::driver) task that owns the session state.

use super::driver::{Command, Driver};
use super::heartbeat::{random_jitter, Jitter};
use super::queue::SendQueue;
use super::session::SessionState;
use super::state::ConnectionState;
use crate::codec::{Codec, JsonCodec};
use crate::error::{GatewayError, GatewayResult};
use crate::events::GatewayEvent;
use crate::protocol::{GatewayMessage, IdentifyProperties, Intents, GATEWAY_VERSION};
use crate::resolver::{gateway_url, EndpointResolver, HttpResolver, StaticResolver};
use crate::transport::{Transport, TransportEvent, WebSocketTransport};
use gateway_common::{ClientConfig, ReconnectConfig};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

/// Capacity of the subscriber channel; slow subscribers lose the oldest events
const EVENT_BUFFER_SIZE: usize = 256;

/// Handshake and policy settings fixed at construction
pub(crate) struct ClientSettings {
    pub token: String,
    pub intents: Intents,
    pub properties: IdentifyProperties,
    pub presence: Option<Value>,
    pub large_threshold: Option<u8>,
    pub version: u8,
    pub missed_ack_reconnect: bool,
    pub reconnect: ReconnectConfig,
    pub jitter: Jitter,
}

/// How a driver run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Termination {
    /// Stopped by `close()` or by dropping the connection
    Closed,
    /// Terminal close code from the gateway
    Fatal { code: u16, reason: String },
    /// The handshake could not be built
    Handshake(String),
    /// Automatic reconnect gave up
    Exhausted { attempts: u32 },
}

impl Termination {
    pub(crate) fn into_result(self) -> GatewayResult<()> {
        match self {
            Self::Closed => Ok(()),
            Self::Fatal { code, reason } => Err(GatewayError::FatalClose { code, reason }),
            Self::Handshake(reason) => Err(GatewayError::Handshake(reason)),
            Self::Exhausted { attempts } => Err(GatewayError::ReconnectExhausted { attempts }),
        }
    }

    /// Event announcing a fatal termination
    pub(crate) fn fatal_event(&self) -> Option<GatewayEvent> {
        match self {
            Self::Closed => None,
            Self::Fatal { code, reason } => Some(GatewayEvent::Fatal {
                code: Some(*code),
                reason: reason.clone(),
            }),
            other => other.clone().into_result().err().map(|e| GatewayEvent::Fatal {
                code: None,
                reason: e.to_string(),
            }),
        }
    }
}

/// State shared between the handle and its driver task
pub(crate) struct Shared {
    pub settings: ClientSettings,
    pub transport: Arc<dyn Transport>,
    pub resolver: Arc<dyn EndpointResolver>,
    pub codec: Arc<dyn Codec>,
    pub queue: SendQueue,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<GatewayEvent>,
    termination: parking_lot::Mutex<Option<Termination>>,
}

impl Shared {
    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            tracing::debug!(from = %current, to = %next, "Connection state changed");
            *current = next;
            true
        });
    }

    /// Publish to subscribers; having none is fine
    pub(crate) fn emit(&self, event: GatewayEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn terminate(&self, termination: Termination) {
        *self.termination.lock() = Some(termination);
    }

    /// Open a physical connection for `session` and attach it to the send queue
    ///
    /// A resumable session goes back to the endpoint READY announced; anything
    /// else asks the resolver.
    pub(crate) async fn open(
        &self,
        session: &SessionState,
    ) -> GatewayResult<mpsc::UnboundedReceiver<TransportEvent>> {
        let base = match session.resume_url() {
            Some(url) => url.to_string(),
            None => self.resolver.resolve().await?,
        };
        let url = gateway_url(&base, self.settings.version, self.codec.encoding());

        tracing::info!(url = %url, resume = session.can_resume(), "Opening gateway connection");
        let link = self.transport.open(&url).await?;
        let generation = self.queue.attach(link.sink).await;
        tracing::debug!(generation, "Transport open");

        self.set_state(ConnectionState::AwaitingHello);
        Ok(link.events)
    }
}

#[derive(Default)]
struct Runner {
    /// Session parked while no driver is running
    session: SessionState,
    task: Option<JoinHandle<SessionState>>,
    commands: Option<mpsc::UnboundedSender<Command>>,
}

impl Runner {
    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Take the session back from a finished driver
    async fn reclaim(&mut self) {
        self.commands = None;
        if let Some(task) = self.task.take() {
            self.session = join_driver(task).await;
        }
    }
}

async fn join_driver(task: JoinHandle<SessionState>) -> SessionState {
    match task.await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(error = %e, "Connection driver panicked; session discarded");
            SessionState::new()
        }
    }
}

/// A resumable connection to the gateway
///
/// # Example
///
/// ```no_run
/// # async fn run() -> gateway_client::GatewayResult<()> {
/// use gateway_client::{GatewayConnection, GatewayEvent, Intents};
///
/// let gateway = GatewayConnection::builder("token")
///     .intents(Intents::GUILDS | Intents::GUILD_MESSAGES)
///     .build();
/// let mut events = gateway.subscribe();
/// gateway.connect().await?;
///
/// while let Ok(event) = events.recv().await {
///     if let GatewayEvent::Dispatch(dispatch) = event {
///         println!("{} {}", dispatch.name, dispatch.data);
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct GatewayConnection {
    shared: Arc<Shared>,
    runner: Mutex<Runner>,
}

impl GatewayConnection {
    /// Start configuring a connection authenticated with `token`
    #[must_use]
    pub fn builder(token: impl Into<String>) -> GatewayConnectionBuilder {
        GatewayConnectionBuilder::new(token)
    }

    /// Build a connection from environment configuration
    ///
    /// A configured `url` is used as-is; otherwise the endpoint is looked up
    /// from `api_base` on every connect.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        let gateway = &config.gateway;
        let builder = Self::builder(gateway.token.clone())
            .intents(Intents::from_bits_retain(gateway.intents))
            .properties(IdentifyProperties::new(&gateway.client_name, &gateway.device_name))
            .version(gateway.version)
            .reconnect_config(config.reconnect)
            .missed_ack_reconnect(config.heartbeat.missed_ack_reconnect);

        let builder = match &gateway.url {
            Some(url) => builder.resolver(StaticResolver::new(url)),
            None => builder.resolver(HttpResolver::new(&gateway.api_base)),
        };
        builder.build()
    }

    /// Resolve the endpoint and open the transport
    ///
    /// Returns once the transport is open; the handshake continues in the
    /// background. A saved session is resumed.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` if a connection is active, or the resolver/transport
    /// error that prevented opening.
    pub async fn connect(&self) -> GatewayResult<()> {
        let mut runner = self.runner.lock().await;
        if runner.is_running() {
            return Err(GatewayError::AlreadyRunning);
        }
        runner.reclaim().await;

        self.shared.termination.lock().take();
        self.shared.set_state(ConnectionState::Connecting);

        let events = match self.shared.open(&runner.session).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to open gateway connection");
                self.shared.set_state(ConnectionState::Idle);
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let session = std::mem::take(&mut runner.session);
        let driver = Driver::new(self.shared.clone(), session, rx);

        runner.task = Some(tokio::spawn(driver.run(events)));
        runner.commands = Some(tx);
        Ok(())
    }

    /// Write a message; resolves once it has been written to the transport
    ///
    /// # Errors
    ///
    /// `NotConnected` before the handshake completes or after close, without
    /// queueing anything.
    pub async fn send(&self, message: GatewayMessage) -> GatewayResult<()> {
        if !self.state().is_connected() {
            return Err(GatewayError::NotConnected);
        }
        self.shared.queue.enqueue(message).written().await
    }

    /// Send a presence update
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub async fn set_presence(&self, presence: Value) -> GatewayResult<()> {
        self.send(GatewayMessage::presence_update(presence)).await
    }

    /// Close the current transport and open a new one, resuming if possible
    ///
    /// Starts a connection if none is running.
    ///
    /// # Errors
    ///
    /// The error that prevented reopening.
    pub async fn reconnect(&self) -> GatewayResult<()> {
        let runner = self.runner.lock().await;
        let commands = runner
            .commands
            .clone()
            .filter(|_| runner.is_running());
        drop(runner);

        let Some(commands) = commands else {
            return self.connect().await;
        };

        let (ack, done) = oneshot::channel();
        if commands.send(Command::Reconnect(ack)).is_err() {
            return self.connect().await;
        }
        done.await.unwrap_or(Err(GatewayError::Closed))
    }

    /// Close the transport and stop the heartbeat
    ///
    /// The session is kept, so a later `connect()` resumes. Calling this on a
    /// connection that is not running does nothing.
    pub async fn close(&self) {
        let mut runner = self.runner.lock().await;
        let Some(task) = runner.task.take() else {
            return;
        };

        if let Some(commands) = runner.commands.take() {
            let _ = commands.send(Command::Close);
        }
        runner.session = join_driver(task).await;
        self.shared.set_state(ConnectionState::Idle);
    }

    /// Wait until the connection stops
    ///
    /// # Errors
    ///
    /// The terminal error (fatal close code, exhausted reconnects) when the
    /// connection did not stop through `close()`.
    pub async fn closed(&self) -> GatewayResult<()> {
        let mut state = self.shared.state.subscribe();
        // The sender lives in `shared`, so this only returns once idle
        let _ = state.wait_for(|state| *state == ConnectionState::Idle).await;

        self.shared
            .termination
            .lock()
            .clone()
            .map_or(Ok(()), Termination::into_result)
    }

    /// Receive every event published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.shared.events.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Observe state transitions
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }
}

impl fmt::Debug for GatewayConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConnection")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Builder for [`GatewayConnection`]
pub struct GatewayConnectionBuilder {
    token: String,
    intents: Intents,
    properties: IdentifyProperties,
    presence: Option<Value>,
    large_threshold: Option<u8>,
    version: u8,
    missed_ack_reconnect: bool,
    reconnect: ReconnectConfig,
    jitter: Jitter,
    transport: Option<Arc<dyn Transport>>,
    resolver: Option<Arc<dyn EndpointResolver>>,
    codec: Option<Arc<dyn Codec>>,
}

impl GatewayConnectionBuilder {
    fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            intents: Intents::default(),
            properties: IdentifyProperties::default(),
            presence: None,
            large_threshold: None,
            version: GATEWAY_VERSION,
            missed_ack_reconnect: true,
            reconnect: ReconnectConfig::default(),
            jitter: random_jitter(),
            transport: None,
            resolver: None,
            codec: None,
        }
    }

    #[must_use]
    pub fn intents(mut self, intents: Intents) -> Self {
        self.intents = intents;
        self
    }

    #[must_use]
    pub fn properties(mut self, properties: IdentifyProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Presence sent with Identify
    #[must_use]
    pub fn presence(mut self, presence: Value) -> Self {
        self.presence = Some(presence);
        self
    }

    #[must_use]
    pub fn large_threshold(mut self, threshold: u8) -> Self {
        self.large_threshold = Some(threshold);
        self
    }

    #[must_use]
    pub fn version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    /// Reconnect when a heartbeat comes due while the last one is unacknowledged
    #[must_use]
    pub fn missed_ack_reconnect(mut self, enabled: bool) -> Self {
        self.missed_ack_reconnect = enabled;
        self
    }

    #[must_use]
    pub fn reconnect_config(mut self, config: ReconnectConfig) -> Self {
        self.reconnect = config;
        self
    }

    /// Replace the heartbeat jitter source (factors in `[0, 1)`)
    #[must_use]
    pub fn jitter(mut self, jitter: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        self.jitter = Arc::new(jitter);
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    #[must_use]
    pub fn resolver(mut self, resolver: impl EndpointResolver + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    #[must_use]
    pub fn codec(mut self, codec: impl Codec + 'static) -> Self {
        self.codec = Some(Arc::new(codec));
        self
    }

    /// Build the connection without connecting
    ///
    /// Must be called inside a Tokio runtime; the send queue spawns its writer.
    #[must_use]
    pub fn build(self) -> GatewayConnection {
        let codec = self.codec.unwrap_or_else(|| Arc::new(JsonCodec));
        let (state, _) = watch::channel(ConnectionState::Idle);
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);

        let shared = Shared {
            settings: ClientSettings {
                token: self.token,
                intents: self.intents,
                properties: self.properties,
                presence: self.presence,
                large_threshold: self.large_threshold,
                version: self.version,
                missed_ack_reconnect: self.missed_ack_reconnect,
                reconnect: self.reconnect,
                jitter: self.jitter,
            },
            transport: self
                .transport
                .unwrap_or_else(|| Arc::new(WebSocketTransport)),
            resolver: self
                .resolver
                .unwrap_or_else(|| Arc::new(StaticResolver::default())),
            queue: SendQueue::new(codec.clone()),
            codec,
            state,
            events,
            termination: parking_lot::Mutex::new(None),
        };

        GatewayConnection {
            shared: Arc::new(shared),
            runner: Mutex::new(Runner::default()),
        }
    }
}

impl fmt::Debug for GatewayConnectionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConnectionBuilder")
            .field("token", &"[redacted]")
            .field("intents", &self.intents)
            .field("version", &self.version)
            .field("missed_ack_reconnect", &self.missed_ack_reconnect)
            .field("reconnect", &self.reconnect)
            .finish_non_exhaustive()
    }
}
