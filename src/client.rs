//! The NatNet session: connection lifecycle, message dispatch, and the
//! synchronous / asynchronous receive pumps.

use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use num_traits::FromPrimitive as _;

use crate::protocol::{
    DataDescriptions, DataFrame, FromPacket, MessageId, PacketBuffer, ProtocolError, ServerInfo,
    Version, DEFAULT_COMMAND_PORT, DEFAULT_DATA_PORT, DEFAULT_MULTICAST_GROUP, HEADER_SIZE,
};

mod event;
mod transport;

pub use event::{Event, HandlerId};
pub use transport::SocketRole;

use transport::{Transport, RECV_BUFFER_SIZE};

/// How long [`NatNetClient::connect`] waits for the server's handshake
/// reply.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between polls of the command socket during the handshake.
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// An error encountered by a [NatNetClient].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A socket could not be created, bound, joined, read, or written.
    #[error(
        "{socket} socket error in {} mode (check that the server streams in the mode you requested): {source}",
        if *multicast { "multicast" } else { "unicast" }
    )]
    Network {
        /// Which of the session's sockets failed.
        socket: SocketRole,
        /// Whether the session was configured for multicast.
        multicast: bool,
        /// The underlying OS error.
        source: io::Error,
    },
    /// A protocol-level failure, like a malformed packet or a rejected
    /// version change.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// The server did not answer the handshake within the configured window.
    #[error("timed out waiting for the server info reply")]
    Timeout,
    /// The operation is not valid in the session's current state.
    #[error("invalid operation: {0}")]
    State(&'static str),
}

/// The result of a [NatNetClient] operation.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Configuration for a client session.
#[derive(Debug, Copy, Clone)]
pub struct ClientConfig {
    /// Address of the server.
    pub server_ip: Ipv4Addr,
    /// Local interface to bind and to join the multicast group on.
    pub local_ip: Ipv4Addr,
    /// Group the data socket joins, where applicable.
    pub multicast_group: Ipv4Addr,
    /// Port the server listens on for commands.
    pub command_port: u16,
    /// Port the server publishes frame data on.
    pub data_port: u16,
    /// Whether the server streams in multicast or unicast mode.
    pub use_multicast: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_ip: Ipv4Addr::LOCALHOST,
            local_ip: Ipv4Addr::LOCALHOST,
            multicast_group: DEFAULT_MULTICAST_GROUP,
            command_port: DEFAULT_COMMAND_PORT,
            data_port: DEFAULT_DATA_PORT,
            use_multicast: true,
        }
    }
}

/// Lifecycle of a client session.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SessionState {
    /// No connection has been attempted yet.
    Init,
    /// Sockets are being created and bound.
    Opening,
    /// The handshake request went out; waiting for the server's reply.
    AwaitingServerInfo,
    /// Connected and streaming.
    Ready,
    /// Shut down. Terminal.
    Closed,
}

// State shared with the worker threads. Decoded records are dispatched from
// here, on whichever thread received the packet.
struct Session {
    stop: AtomicBool,
    server_info: Mutex<Option<ServerInfo>>,
    protocol_version: Mutex<Option<Version>>,
    frame_event: Event<DataFrame>,
    descriptions_event: Event<DataDescriptions>,
}

impl Session {
    fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
            server_info: Mutex::new(None),
            protocol_version: Mutex::new(None),
            frame_event: Event::new(),
            descriptions_event: Event::new(),
        }
    }

    fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.lock().unwrap().clone()
    }

    fn protocol_version(&self) -> Option<Version> {
        *self.protocol_version.lock().unwrap()
    }

    /// Decodes one received packet and fires the matching event. A packet
    /// that fails to decode is dropped with a warning; the session stays
    /// intact.
    fn process_message(&self, data: &[u8]) {
        if let Err(err) = self.dispatch(data) {
            log::warn!("dropping undecodable packet: {err}");
        }
    }

    fn dispatch(&self, data: &[u8]) -> std::result::Result<(), ProtocolError> {
        let mut buf = PacketBuffer::new(data);
        let raw_id = buf.read_u16()?;
        let declared_size = buf.read_u16()? as usize;
        if data.len() - HEADER_SIZE != declared_size {
            log::warn!(
                "actual packet size ({}) not consistent with packet size in the header ({})",
                data.len() - HEADER_SIZE,
                declared_size,
            );
        }

        let id = MessageId::from_u16(raw_id).ok_or(ProtocolError::UnknownMessageId(raw_id))?;
        if id == MessageId::ServerInfo {
            let info = ServerInfo::read(&mut buf, self.protocol_version().unwrap_or_default())?;
            log::info!(
                "received server info: {} (server {}, protocol {})",
                info.application_name,
                info.server_version,
                info.nat_net_protocol_version,
            );
            *self.protocol_version.lock().unwrap() = Some(info.nat_net_protocol_version);
            *self.server_info.lock().unwrap() = Some(info);
            return Ok(());
        }

        // Nothing else can be interpreted until the handshake has fixed the
        // protocol version.
        let Some(version) = self.protocol_version() else {
            log::warn!("dropping message {id:?}: server info has not been received yet");
            return Ok(());
        };

        match id {
            MessageId::FrameOfData => {
                let frame = DataFrame::read(&mut buf, version)?;
                self.frame_event.emit(&frame);
            }
            MessageId::ModelDef => {
                let descriptions = DataDescriptions::read(&mut buf, version)?;
                self.descriptions_event.emit(&descriptions);
            }
            other => log::debug!("ignoring message {other:?}"),
        }

        Ok(())
    }
}

/// A NatNet client.
///
/// ```no_run
/// use natnet::{ClientConfig, NatNetClient};
///
/// # fn main() -> natnet::client::Result<()> {
/// let mut client = NatNetClient::new(ClientConfig {
///     use_multicast: false,
///     ..ClientConfig::default()
/// });
///
/// client.data_frame_event().subscribe(|frame| {
///     println!("frame {}", frame.frame_number());
/// });
///
/// client.connect()?;
/// client.run_async()?;
/// // ... the subscription fires on the worker threads ...
/// client.shutdown();
/// # Ok(())
/// # }
/// ```
pub struct NatNetClient {
    config: ClientConfig,
    state: SessionState,
    session: Arc<Session>,
    transport: Option<Transport>,
    workers: Vec<JoinHandle<Result<()>>>,
}

impl std::fmt::Debug for NatNetClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatNetClient")
            .field("state", &self.state)
            .field("server_ip", &self.config.server_ip)
            .finish()
    }
}

impl Default for NatNetClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl NatNetClient {
    /// Creates an unconnected client.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            state: SessionState::Init,
            session: Arc::new(Session::new()),
            transport: None,
            workers: Vec::new(),
        }
    }

    /// Opens both sockets and performs the handshake, waiting up to
    /// [`DEFAULT_CONNECT_TIMEOUT`] for the server's reply.
    pub fn connect(&mut self) -> Result<()> {
        self.connect_with_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    /// Like [`connect`](Self::connect), with an explicit handshake window.
    ///
    /// On failure the session is shut down: both sockets are closed and the
    /// state is [`SessionState::Closed`].
    pub fn connect_with_timeout(&mut self, timeout: Duration) -> Result<()> {
        match self.state {
            SessionState::Init => {}
            SessionState::Ready => return Ok(()),
            _ => return Err(ClientError::State("session is closed")),
        }

        self.state = SessionState::Opening;
        match self.try_connect(timeout) {
            Ok(()) => {
                self.state = SessionState::Ready;
                Ok(())
            }
            Err(err) => {
                self.shutdown();
                Err(err)
            }
        }
    }

    fn try_connect(&mut self, timeout: Duration) -> Result<()> {
        log::info!(
            "connecting to NatNet server at {}:{}",
            self.config.server_ip,
            self.config.command_port,
        );
        self.transport = Some(Transport::open(&self.config)?);

        self.send_request(MessageId::Connect, "")?;
        self.state = SessionState::AwaitingServerInfo;

        let keep_alive = !self.config.use_multicast;
        let mut buf = vec![0; RECV_BUFFER_SIZE];
        let deadline = Instant::now() + timeout;
        loop {
            self.pump_socket(SocketRole::Command, keep_alive, &mut buf)?;
            if self.session.server_info().is_some() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ClientError::Timeout);
            }
            thread::sleep(CONNECT_POLL_INTERVAL);
        }
    }

    /// Whether the session is open and the handshake has completed.
    pub fn connected(&self) -> bool {
        self.transport.is_some() && self.session.server_info().is_some()
    }

    /// Where the session is in its lifecycle.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The configuration this client was created with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// What the server reported about itself, once connected.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.session.server_info()
    }

    /// The protocol version inbound packets are decoded at.
    pub fn protocol_version(&self) -> Option<Version> {
        self.session.protocol_version()
    }

    /// Fired for every decoded frame of tracking data.
    pub fn data_frame_event(&self) -> &Event<DataFrame> {
        &self.session.frame_event
    }

    /// Fired for every decoded scene description.
    pub fn data_descriptions_event(&self) -> &Event<DataDescriptions> {
        &self.session.descriptions_event
    }

    /// Asks the server to push the scene description.
    pub fn request_modeldef(&self) -> Result<()> {
        self.send_request(MessageId::RequestModelDef, "").map(|_| ())
    }

    /// Asks the server to push a single frame.
    pub fn request_frame_of_data(&self) -> Result<()> {
        self.send_request(MessageId::RequestFrameOfData, "")
            .map(|_| ())
    }

    /// Passes a command string to the server's scripting interface.
    /// Returns the number of bytes sent.
    pub fn send_command(&self, command: &str) -> Result<usize> {
        if !self.connected() {
            return Err(ClientError::State("client is not connected to a server"));
        }

        self.send_request(MessageId::Request, command)
    }

    /// Whether [`set_protocol_version`](Self::set_protocol_version) is
    /// available: the server must speak protocol 4 or newer and the session
    /// must be unicast.
    pub fn can_change_protocol_version(&self) -> bool {
        !self.config.use_multicast
            && self
                .session
                .server_info()
                .is_some_and(|info| info.nat_net_protocol_version >= Version::from_parts(&[4]))
    }

    /// Asks the server to re-frame its stream at `desired`, truncated to
    /// major.minor.
    ///
    /// On success the client decodes subsequent packets at the new version.
    /// The current version is left untouched on failure.
    pub fn set_protocol_version(&mut self, desired: Version) -> Result<()> {
        if !self.can_change_protocol_version() {
            return Err(ClientError::State(
                "server does not support changing the protocol version",
            ));
        }

        let desired = desired.truncate(2);
        let current = self.session.protocol_version().unwrap_or_default();
        if desired == current.truncate(2) {
            return Ok(());
        }

        if self.send_command(&format!("Bitstream,{desired}")).is_err() {
            return Err(ProtocolError::VersionChangeRejected.into());
        }
        *self.session.protocol_version.lock().unwrap() = Some(desired);

        // Recovery sequence after a bitstream change, as issued by the
        // vendor sample client.
        self.send_command("TimelinePlay")?;
        thread::sleep(Duration::from_millis(100));
        for command in [
            "TimelinePlay",
            "TimelineStop",
            "SetPlaybackCurrentFrame,0",
            "TimelineStop",
        ] {
            self.send_command(command)?;
        }
        thread::sleep(Duration::from_secs(2));

        Ok(())
    }

    /// Drains both sockets on the calling thread, dispatching every packet
    /// that is already waiting. Call once per application tick.
    ///
    /// # Panics
    ///
    /// Panics if the worker threads are running.
    pub fn update_sync(&self) -> Result<()> {
        assert!(
            !self.running_asynchronously(),
            "cannot update synchronously while running asynchronously"
        );

        let keep_alive = !self.config.use_multicast;
        let mut buf = vec![0; RECV_BUFFER_SIZE];
        while self.pump_socket(SocketRole::Data, false, &mut buf)? {}
        while self.pump_socket(SocketRole::Command, keep_alive, &mut buf)? {}

        Ok(())
    }

    /// Spawns the two receive workers, one per socket.
    ///
    /// Frame handlers then run on the data worker and description handlers
    /// on the command worker. The command worker also emits keep-alives on
    /// unicast sessions.
    pub fn run_async(&mut self) -> Result<()> {
        if self.running_asynchronously() {
            return Ok(());
        }

        let transport = self
            .transport
            .as_ref()
            .ok_or(ClientError::State("session is not open"))?
            .clone();

        self.session.stop.store(false, Ordering::Relaxed);
        for role in [SocketRole::Data, SocketRole::Command] {
            transport
                .set_worker_mode(role, true)
                .map_err(|source| self.network_error(role, source))?;
        }

        let keep_alive = !self.config.use_multicast;
        for (role, send_keep_alive) in [(SocketRole::Data, false), (SocketRole::Command, keep_alive)]
        {
            let transport = transport.clone();
            let session = Arc::clone(&self.session);
            let multicast = self.config.use_multicast;

            let worker = thread::Builder::new()
                .name(format!("natnet-{role}"))
                .spawn(move || {
                    let mut buf = vec![0; RECV_BUFFER_SIZE];
                    while !session.stop.load(Ordering::Relaxed) {
                        pump(&transport, &session, role, multicast, send_keep_alive, &mut buf)?;
                    }
                    Ok(())
                })
                .map_err(|source| self.network_error(role, source))?;

            self.workers.push(worker);
        }

        Ok(())
    }

    /// Stops and joins the receive workers, surfacing the first error either
    /// of them hit.
    pub fn stop_async(&mut self) -> Result<()> {
        if !self.running_asynchronously() {
            return Ok(());
        }

        self.session.stop.store(true, Ordering::Relaxed);

        let mut result = Ok(());
        for worker in self.workers.drain(..) {
            match worker.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if result.is_ok() {
                        result = Err(err);
                    }
                }
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }

        if let Some(transport) = &self.transport {
            for role in [SocketRole::Data, SocketRole::Command] {
                if let Err(source) = transport.set_worker_mode(role, false) {
                    if result.is_ok() {
                        result = Err(self.network_error(role, source));
                    }
                }
            }
        }

        result
    }

    /// Whether the receive workers are running.
    pub fn running_asynchronously(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Stops the workers if they are running, closes both sockets, and
    /// clears the server info. The session cannot be reopened.
    pub fn shutdown(&mut self) {
        if let Err(err) = self.stop_async() {
            log::warn!("receive worker failed during shutdown: {err}");
        }

        self.transport = None;
        *self.session.server_info.lock().unwrap() = None;
        self.state = SessionState::Closed;
    }

    fn send_request(&self, id: MessageId, payload: &str) -> Result<usize> {
        let transport = self
            .transport
            .as_ref()
            .ok_or(ClientError::State("session is not open"))?;

        transport
            .send_request(id, payload)
            .map_err(|source| self.network_error(SocketRole::Command, source))
    }

    fn pump_socket(&self, role: SocketRole, send_keep_alive: bool, buf: &mut [u8]) -> Result<bool> {
        let transport = self
            .transport
            .as_ref()
            .ok_or(ClientError::State("session is not open"))?;

        pump(
            transport,
            &self.session,
            role,
            self.config.use_multicast,
            send_keep_alive,
            buf,
        )
    }

    fn network_error(&self, socket: SocketRole, source: io::Error) -> ClientError {
        ClientError::Network {
            socket,
            multicast: self.config.use_multicast,
            source,
        }
    }
}

impl Drop for NatNetClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Emits a keep-alive if asked to, then attempts one receive. Returns true
/// when a packet was consumed.
fn pump(
    transport: &Transport,
    session: &Session,
    role: SocketRole,
    multicast: bool,
    send_keep_alive: bool,
    buf: &mut [u8],
) -> Result<bool> {
    let network_error = |socket, source| ClientError::Network {
        socket,
        multicast,
        source,
    };

    if send_keep_alive {
        transport
            .send_request(MessageId::KeepAlive, "")
            .map_err(|source| network_error(SocketRole::Command, source))?;
    }

    match transport.recv(role, buf) {
        Ok(Some(len)) if len > 0 => {
            session.process_message(&buf[..len]);
            Ok(true)
        }
        Ok(_) => Ok(false),
        // A receive error on a socket that shutdown closed under us is not
        // worth reporting.
        Err(_) if session.stop.load(Ordering::Relaxed) => Ok(false),
        Err(source) => Err(network_error(role, source)),
    }
}
