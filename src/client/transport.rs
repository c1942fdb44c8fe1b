//! The UDP socket pair backing a session.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::protocol::{self, MessageId};

use super::{ClientConfig, ClientError};

/// Largest datagram the receive path accepts.
pub(super) const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Read timeout applied to both sockets while the worker threads run, so
/// they notice the stop flag promptly.
const WORKER_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Which of a session's two sockets an error relates to.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SocketRole {
    /// The socket requests, replies, and keep-alives travel over.
    Command,
    /// The socket frame data arrives on.
    Data,
}

impl fmt::Display for SocketRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Command => "command",
            Self::Data => "data",
        })
    }
}

/// The two sockets of an open session, shareable with worker threads.
#[derive(Debug, Clone)]
pub(super) struct Transport {
    command: Arc<UdpSocket>,
    data: Arc<UdpSocket>,
    server_addr: SocketAddr,
}

impl Transport {
    /// Creates and binds both sockets per the configured mode.
    pub(super) fn open(config: &ClientConfig) -> Result<Self, ClientError> {
        let network_error = |socket| {
            move |source| ClientError::Network {
                socket,
                multicast: config.use_multicast,
                source,
            }
        };

        let data = create_data_socket(config).map_err(network_error(SocketRole::Data))?;
        let command = create_command_socket(config).map_err(network_error(SocketRole::Command))?;

        Ok(Self {
            command: Arc::new(command),
            data: Arc::new(data),
            server_addr: SocketAddr::V4(SocketAddrV4::new(config.server_ip, config.command_port)),
        })
    }

    fn socket(&self, role: SocketRole) -> &UdpSocket {
        match role {
            SocketRole::Command => &self.command,
            SocketRole::Data => &self.data,
        }
    }

    /// Frames and sends one request to the server's command address.
    pub(super) fn send_request(&self, id: MessageId, payload: &str) -> io::Result<usize> {
        let packet = protocol::encode_request(id, payload);
        self.command.send_to(&packet, self.server_addr)
    }

    /// Receives one datagram, or `None` when nothing arrives within the
    /// socket's current timeout.
    pub(super) fn recv(&self, role: SocketRole, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.socket(role).recv_from(buf) {
            Ok((len, _)) => Ok(Some(len)),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Switches a socket between the non-blocking mode the synchronous pump
    /// needs and the bounded-blocking mode the workers need.
    pub(super) fn set_worker_mode(&self, role: SocketRole, workers: bool) -> io::Result<()> {
        let socket = self.socket(role);
        if workers {
            socket.set_nonblocking(false)?;
            socket.set_read_timeout(Some(WORKER_READ_TIMEOUT))
        } else {
            socket.set_nonblocking(true)
        }
    }
}

fn create_socket(bind_addr: SocketAddrV4) -> io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    // Let multiple clients on one machine share the group address and port.
    socket.set_reuse_address(true)?;
    socket.bind(&bind_addr.into())?;
    Ok(socket)
}

fn create_command_socket(config: &ClientConfig) -> io::Result<UdpSocket> {
    let bind_ip = if config.use_multicast {
        Ipv4Addr::UNSPECIFIED
    } else {
        config.local_ip
    };

    let socket = create_socket(SocketAddrV4::new(bind_ip, 0))?;
    if config.use_multicast {
        socket.set_broadcast(true)?;
    }

    into_std(socket)
}

fn create_data_socket(config: &ClientConfig) -> io::Result<UdpSocket> {
    let bind_addr = if config.use_multicast {
        SocketAddrV4::new(config.multicast_group, config.data_port)
    } else {
        SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)
    };

    let socket = create_socket(bind_addr)?;

    // A unicast session still joins the group, unless the group is left at
    // the broadcast address to opt out.
    if config.use_multicast || config.multicast_group != Ipv4Addr::BROADCAST {
        socket.join_multicast_v4(&config.multicast_group, &config.local_ip)?;
    }

    into_std(socket)
}

fn into_std(socket: Socket) -> io::Result<UdpSocket> {
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}
