/*!
 * Spa session: the connection state machine and the tasks around it.
 *
 * A session owns one transport, one retry engine, one structure store
 * and four background tasks: the dispatch loop routing inbound messages,
 * the keepalive monitor, the write pump turning queued value changes
 * into pack commands, and the handshake task that walks the state
 * machine from `HelloSent` to `Connected`.
 *
 * The state machine is one-way. A failed handshake, an unknown platform
 * or an exhausted connect window all land in the terminal `Error` state;
 * recovery means dropping the session and building a new one.
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn, Instrument};

use spalink_core::config::ProtocolConfig;
use spalink_core::types::Value;
use spalink_packs::layout::StructLayout;
use spalink_packs::registry::PackRegistry;

use crate::descriptor::SpaDescriptor;
use crate::error::{Error, Result};
use crate::event::SessionEvent;
use crate::exchange::{ExchangeConfig, ExchangeEngine};
use crate::keepalive::{KeepaliveConfig, KeepaliveMonitor};
use crate::message::{BlockChange, Message, PackCommandKind};
use crate::structure::{StructureStore, ValueChange};
use crate::transport::Transport;

/// States of the connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// No connection attempt has been started
    Disconnected,
    /// Hello sent, handshake about to start
    HelloSent,
    /// Awaiting the firmware version response
    AwaitingVersion,
    /// Awaiting the radio channel response
    AwaitingChannel,
    /// Awaiting the config file response
    AwaitingConfig,
    /// Awaiting the first full status block
    AwaitingInitialStatus,
    /// Handshake complete, structure live
    Connected,
    /// Terminal failure state
    Error,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::HelloSent => "HelloSent",
            SessionState::AwaitingVersion => "AwaitingVersion",
            SessionState::AwaitingChannel => "AwaitingChannel",
            SessionState::AwaitingConfig => "AwaitingConfig",
            SessionState::AwaitingInitialStatus => "AwaitingInitialStatus",
            SessionState::Connected => "Connected",
            SessionState::Error => "Error",
        };
        write!(f, "{}", name)
    }
}

/// Session tunables
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Wall-clock window for the whole handshake
    pub connect_timeout: Duration,
    /// Retry-request tunables
    pub exchange: ExchangeConfig,
    /// Keepalive tunables
    pub keepalive: KeepaliveConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            exchange: ExchangeConfig::default(),
            keepalive: KeepaliveConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Build from the loaded protocol configuration
    pub fn from_protocol(config: &ProtocolConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            exchange: ExchangeConfig::from(config),
            keepalive: KeepaliveConfig::from(config),
        }
    }
}

/// Identity details learned during the handshake
#[derive(Debug, Clone, Default, Serialize)]
pub struct SpaIdentity {
    /// Display-facing firmware version
    pub display_version: Option<String>,
    /// Controller-facing firmware version
    pub controller_version: Option<String>,
    /// Radio channel in use
    pub channel: Option<u8>,
    /// Signal strength in percent
    pub signal_strength: Option<u8>,
    /// Platform key reported by the device
    pub platform_key: Option<String>,
    /// Config layout revision in use
    pub config_revision: Option<u16>,
    /// Log layout revision in use
    pub log_revision: Option<u16>,
    /// Pack type from the resolved pack descriptor
    pub pack_type: Option<u8>,
    /// Model string read from the live structure
    pub model: Option<String>,
    /// Derived version string, "{conf id} v{rev}.{rel}"
    pub version: Option<String>,
    /// Configuration number read from the live structure
    pub config_number: Option<u16>,
}

#[derive(Debug)]
struct SessionShared {
    descriptor: SpaDescriptor,
    transport: Arc<dyn Transport>,
    engine: ExchangeEngine,
    structure: StructureStore,
    registry: Arc<PackRegistry>,
    config: SessionConfig,
    state: StdRwLock<SessionState>,
    identity: StdRwLock<SpaIdentity>,
    config_layout: StdRwLock<Option<Arc<StructLayout>>>,
    log_layout: StdRwLock<Option<Arc<StructLayout>>>,
    connect_started: StdRwLock<Option<Instant>>,
    failed: AtomicBool,
    last_ping_response: Arc<StdRwLock<Instant>>,
    responding: Arc<AtomicBool>,
    events: broadcast::Sender<SessionEvent>,
    shutdown: watch::Sender<bool>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

/// Handle to a spa session; clones share the same session
#[derive(Debug, Clone)]
pub struct SpaSession {
    shared: Arc<SessionShared>,
    writes: Arc<tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<ValueChange>>>>,
}

impl SpaSession {
    /// Create a session over `transport` for the spa in `descriptor`.
    /// Nothing is sent until [`Self::start_connect`].
    pub fn new(
        descriptor: SpaDescriptor,
        transport: Arc<dyn Transport>,
        registry: Arc<PackRegistry>,
        config: SessionConfig,
    ) -> Self {
        let (writes_tx, writes_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(64);
        let (shutdown, _) = watch::channel(false);
        let engine = ExchangeEngine::new(Arc::clone(&transport), config.exchange.clone());
        Self {
            shared: Arc::new(SessionShared {
                descriptor,
                transport,
                engine,
                structure: StructureStore::new(writes_tx),
                registry,
                config,
                state: StdRwLock::new(SessionState::Disconnected),
                identity: StdRwLock::new(SpaIdentity::default()),
                config_layout: StdRwLock::new(None),
                log_layout: StdRwLock::new(None),
                connect_started: StdRwLock::new(None),
                failed: AtomicBool::new(false),
                last_ping_response: Arc::new(StdRwLock::new(Instant::now())),
                responding: Arc::new(AtomicBool::new(true)),
                events,
                shutdown,
                tasks: StdMutex::new(Vec::new()),
            }),
            writes: Arc::new(tokio::sync::Mutex::new(Some(writes_rx))),
        }
    }

    /// The descriptor this session was built from
    pub fn descriptor(&self) -> &SpaDescriptor {
        &self.shared.descriptor
    }

    /// Current state of the connection state machine
    pub fn state(&self) -> SessionState {
        *self.shared.state.read().unwrap()
    }

    /// Identity details learned so far
    pub fn identity(&self) -> SpaIdentity {
        self.shared.identity.read().unwrap().clone()
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// The structure store, for direct read access
    pub fn structure(&self) -> &StructureStore {
        &self.shared.structure
    }

    /// Connection progress check.
    ///
    /// `Ok(true)` once connected, `Ok(false)` while the handshake is
    /// still inside its window. Past the window the session is marked
    /// failed and this returns a connect-timeout error; once failed,
    /// every later call reports the terminal state.
    pub fn is_connected(&self) -> Result<bool> {
        if self.shared.failed.load(Ordering::SeqCst) {
            return Err(Error::session_failed(format!(
                "{} is in its terminal error state",
                self.shared.descriptor
            )));
        }
        if self.state() == SessionState::Connected {
            return Ok(true);
        }
        if let Some(started) = *self.shared.connect_started.read().unwrap() {
            if started.elapsed() > self.shared.config.connect_timeout {
                warn!("{} took too long to connect", self.shared.descriptor);
                self.mark_failed();
                return Err(Error::connect_timeout(format!(
                    "{} did not connect within {:?}",
                    self.shared.descriptor, self.shared.config.connect_timeout
                )));
            }
        }
        Ok(false)
    }

    /// Open the transport, send the hello and spawn the session tasks.
    /// Returns immediately; watch [`Self::is_connected`] or the event
    /// channel for progress.
    pub async fn start_connect(&self) -> Result<()> {
        // Claiming the write-pump receiver makes this single-shot; a
        // second call must not touch the transport or spawn anything
        let writes = self
            .writes
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::other("session already started"))?;

        info!("Starting connection handshake with {}", self.shared.descriptor);
        self.shared.transport.open().await?;
        *self.shared.connect_started.write().unwrap() = Some(Instant::now());

        self.shared
            .transport
            .send(
                Message::Hello {
                    client_identifier: self.shared.descriptor.client_identifier.clone(),
                },
                self.shared.descriptor.destination,
            )
            .await?;
        self.set_state(SessionState::HelloSent);

        let mut tasks = Vec::new();

        let dispatcher = self.clone();
        tasks.push(tokio::spawn(async move { dispatcher.run_dispatch().await }));

        tasks.push(
            KeepaliveMonitor::new(
                Arc::clone(&self.shared.transport),
                self.shared.descriptor.destination,
                Arc::clone(&self.shared.last_ping_response),
                Arc::clone(&self.shared.responding),
                self.shared.events.clone(),
                self.shared.shutdown.subscribe(),
                self.shared.config.keepalive.clone(),
            )
            .spawn(),
        );

        let pump = self.clone();
        tasks.push(tokio::spawn(async move { pump.run_write_pump(writes).await }));

        let handshaker = self.clone();
        let span = spalink_core::logging::session_span(&self.shared.descriptor.name);
        tasks.push(tokio::spawn(
            async move {
                if let Err(e) = handshaker.run_handshake().await {
                    error!(
                        "Connection handshake with {} failed: {}",
                        handshaker.shared.descriptor, e
                    );
                    handshaker.mark_failed();
                }
            }
            .instrument(span),
        ));

        self.shared.tasks.lock().unwrap().extend(tasks);
        Ok(())
    }

    /// Poll [`Self::is_connected`] until it settles
    pub async fn wait_until_connected(&self) -> Result<()> {
        while !self.is_connected()? {
            sleep(Duration::from_millis(25)).await;
        }
        Ok(())
    }

    /// Decode the current value of the named field
    pub fn read(&self, name: &str) -> Result<Value> {
        self.shared.structure.read(name)
    }

    /// Write a value to the named field. The command goes to the device;
    /// the local value changes when the device confirms with a partial
    /// status update.
    pub fn write(&self, name: &str, value: &Value) -> Result<()> {
        self.shared.structure.write(name, value)
    }

    /// Send a keypad press to the device
    pub async fn press(&self, key: u8) -> Result<()> {
        let (pack_type, config_revision, log_revision) = self.framing()?;
        let seq = self.shared.transport.next_sequence();
        self.shared
            .transport
            .send(
                Message::PackCommand {
                    seq,
                    pack_type,
                    config_revision,
                    log_revision,
                    command: PackCommandKind::KeyPress { key },
                },
                self.shared.descriptor.destination,
            )
            .await
    }

    /// Re-poll the log range of the status structure
    pub async fn refresh(&self) -> Result<()> {
        if !self.is_connected()? {
            debug!("Can't refresh {} before it is connected", self.shared.descriptor);
            return Ok(());
        }
        let log = self
            .shared
            .log_layout
            .read()
            .unwrap()
            .clone()
            .ok_or(Error::NotConnected)?;
        let response = self
            .request_status_block(log.begin as u16, log.end as u16)
            .await?;
        if let Message::StatusBlockResponse { start, data, .. } = response {
            self.shared
                .structure
                .apply_full_block(start as usize, &data)?;
        }
        Ok(())
    }

    /// Close the session: stop the tasks, close the transport and wait
    /// for everything to finish
    pub async fn close(&self) -> Result<()> {
        debug!("Closing session with {}", self.shared.descriptor);
        let _ = self.shared.shutdown.send(true);
        self.shared.engine.cancel_all();
        self.shared.transport.close().await?;
        let tasks: Vec<_> = std::mem::take(&mut *self.shared.tasks.lock().unwrap());
        for task in tasks {
            let _ = task.await;
        }
        info!("Session with {} closed", self.shared.descriptor);
        Ok(())
    }

    fn set_state(&self, new: SessionState) {
        let old = {
            let mut state = self.shared.state.write().unwrap();
            let old = *state;
            // Error is terminal; a still-running handshake cannot leave it
            if old == new || old == SessionState::Error {
                return;
            }
            *state = new;
            old
        };
        debug!("{} moved from {} to {}", self.shared.descriptor, old, new);
        let _ = self.shared.events.send(SessionEvent::StateChanged { old, new });
    }

    fn mark_failed(&self) {
        self.shared.failed.store(true, Ordering::SeqCst);
        self.set_state(SessionState::Error);
    }

    fn check_still_connecting(&self) -> Result<()> {
        if self.shared.failed.load(Ordering::SeqCst) {
            Err(Error::session_failed("connection attempt abandoned"))
        } else {
            Ok(())
        }
    }

    fn framing(&self) -> Result<(u8, u16, u16)> {
        let identity = self.shared.identity.read().unwrap();
        match (
            identity.pack_type,
            identity.config_revision,
            identity.log_revision,
        ) {
            (Some(pack_type), Some(config_revision), Some(log_revision)) => {
                Ok((pack_type, config_revision, log_revision))
            }
            _ => Err(Error::NotConnected),
        }
    }

    async fn request_status_block(&self, start: u16, end: u16) -> Result<Message> {
        let seq = self.shared.transport.next_sequence();
        self.shared
            .engine
            .retry_request(
                Message::StatusBlockRequest { seq, start, end },
                self.shared.descriptor.destination,
            )
            .await
    }

    async fn run_handshake(&self) -> Result<()> {
        let destination = self.shared.descriptor.destination;

        self.set_state(SessionState::AwaitingVersion);
        let seq = self.shared.transport.next_sequence();
        let response = self
            .shared
            .engine
            .retry_request(Message::VersionRequest { seq }, destination)
            .await?;
        if let Message::VersionResponse {
            display: display_version,
            controller: controller_version,
            ..
        } = response
        {
            debug!(
                "Got software versions {} / {}, now get the channel",
                display_version, controller_version
            );
            let mut identity = self.shared.identity.write().unwrap();
            identity.display_version = Some(display_version.to_string());
            identity.controller_version = Some(controller_version.to_string());
        }

        self.check_still_connecting()?;
        self.set_state(SessionState::AwaitingChannel);
        let seq = self.shared.transport.next_sequence();
        let response = self
            .shared
            .engine
            .retry_request(Message::ChannelRequest { seq }, destination)
            .await?;
        if let Message::ChannelResponse {
            channel,
            signal_strength,
            ..
        } = response
        {
            debug!(
                "Got channel {} at {}% signal, now get the config file",
                channel, signal_strength
            );
            let mut identity = self.shared.identity.write().unwrap();
            identity.channel = Some(channel);
            identity.signal_strength = Some(signal_strength);
        }

        self.check_still_connecting()?;
        self.set_state(SessionState::AwaitingConfig);
        let seq = self.shared.transport.next_sequence();
        let response = self
            .shared
            .engine
            .retry_request(Message::ConfigFileRequest { seq }, destination)
            .await?;
        let (platform_key, config_revision, log_revision) = match response {
            Message::ConfigFileResponse {
                platform_key,
                config_revision,
                log_revision,
                ..
            } => (platform_key, config_revision, log_revision),
            other => {
                return Err(Error::other(format!(
                    "unexpected {:?} while awaiting the config file",
                    other.kind()
                )))
            }
        };
        debug!(
            "Device is a {} pack, CFG {} / LOG {}",
            platform_key, config_revision, log_revision
        );

        let pack = self.shared.registry.resolve_pack(&platform_key)?;
        let config_layout = self
            .shared
            .registry
            .resolve_config(&platform_key, config_revision)?;
        let log_layout = self
            .shared
            .registry
            .resolve_log(&platform_key, log_revision)?;
        {
            let mut identity = self.shared.identity.write().unwrap();
            identity.platform_key = Some(platform_key);
            identity.config_revision = Some(config_revision);
            identity.log_revision = Some(log_revision);
            identity.pack_type = Some(pack.pack_type);
        }
        *self.shared.config_layout.write().unwrap() = Some(Arc::clone(&config_layout));
        *self.shared.log_layout.write().unwrap() = Some(Arc::clone(&log_layout));

        self.check_still_connecting()?;
        self.set_state(SessionState::AwaitingInitialStatus);
        let start = config_layout.begin.min(log_layout.begin) as u16;
        let end = config_layout.end.max(log_layout.end) as u16;
        let response = self.request_status_block(start, end).await?;
        if let Message::StatusBlockResponse { start, data, .. } = response {
            self.shared
                .structure
                .apply_full_block(start as usize, &data)?;
        }

        self.check_still_connecting()?;
        self.finalize_connect(&config_layout, &log_layout)
    }

    fn finalize_connect(&self, config_layout: &StructLayout, log_layout: &StructLayout) -> Result<()> {
        debug!("Got the initial status block, building accessors");
        self.shared
            .structure
            .build_accessors(config_layout, log_layout)?;

        let model = self.shared.structure.read("PackType")?.to_string();
        let version = format!(
            "{} v{}.{}",
            self.shared.structure.read("PackConfID")?,
            self.shared.structure.read("PackConfRev")?,
            self.shared.structure.read("PackConfRel")?
        );
        let config_number = self.shared.structure.read("ConfigNumber")?.as_number();
        {
            let mut identity = self.shared.identity.write().unwrap();
            identity.model = Some(model);
            identity.version = Some(version);
            identity.config_number = config_number;
        }

        self.set_state(SessionState::Connected);
        info!("{} is now connected", self.shared.descriptor);
        Ok(())
    }

    async fn run_dispatch(self) {
        let mut shutdown = self.shared.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = self.shared.transport.recv() => match received {
                    None => break,
                    Some((message, _sender)) => self.on_message(message),
                },
            }
        }
        debug!("Dispatch task finished");
    }

    fn on_message(&self, message: Message) {
        match message {
            Message::PartialStatusUpdate { changes } => self.on_partial_update(changes),
            Message::PingResponse { .. } => {
                *self.shared.last_ping_response.write().unwrap() = Instant::now();
            }
            other => {
                if !self.shared.engine.dispatch(&other) {
                    trace!("Dropped unmatched {:?} message", other.kind());
                }
            }
        }
    }

    fn on_partial_update(&self, changes: Vec<BlockChange>) {
        for change in changes {
            match self
                .shared
                .structure
                .apply_partial_update(change.offset as usize, &change.data)
            {
                Ok(field_changes) => {
                    for field_change in field_changes {
                        info!(
                            "Value of {} changed from {} to {}",
                            field_change.name, field_change.old, field_change.new
                        );
                        let _ = self.shared.events.send(SessionEvent::ValueChanged {
                            name: field_change.name,
                            old: field_change.old,
                            new: field_change.new,
                        });
                    }
                }
                Err(e) => {
                    warn!(
                        "Dropped partial status update at offset {}: {}",
                        change.offset, e
                    );
                }
            }
        }
    }

    async fn run_write_pump(self, mut writes: mpsc::UnboundedReceiver<ValueChange>) {
        let mut shutdown = self.shared.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                change = writes.recv() => match change {
                    None => break,
                    Some(change) => self.send_set_value(change).await,
                },
            }
        }
        debug!("Write pump finished");
    }

    async fn send_set_value(&self, change: ValueChange) {
        let (pack_type, config_revision, log_revision) = match self.framing() {
            Ok(framing) => framing,
            Err(_) => {
                warn!("Dropped a write queued before the pack identity was known");
                return;
            }
        };
        let seq = self.shared.transport.next_sequence();
        let command = Message::PackCommand {
            seq,
            pack_type,
            config_revision,
            log_revision,
            command: PackCommandKind::SetValue {
                offset: change.offset,
                data: change.data,
            },
        };
        if let Err(e) = self
            .shared
            .transport
            .send(command, self.shared.descriptor.destination)
            .await
        {
            warn!("Failed to send set-value command: {}", e);
        }
    }
}
