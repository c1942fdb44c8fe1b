//! An implementation of the NatNet wire protocol.
//!
//! Every packet, in either direction, starts with a 4-byte header: a u16
//! message id followed by a u16 payload length, both little-endian. Inbound
//! payloads are decoded with [`PacketBuffer`] by types implementing
//! [`FromPacket`]; the layout of most records depends on the protocol
//! version the server advertised during the handshake, so every decoder
//! receives the negotiated [`Version`].

pub mod descriptions;
pub mod frame;
pub mod server_info;

mod buffer;
mod error;
mod version;

use std::net::Ipv4Addr;

use enum_primitive_derive::Primitive;

pub use buffer::*;
pub use descriptions::*;
pub use error::*;
pub use frame::*;
pub use server_info::*;
pub use version::*;

/// Width of the packet header (message id + payload length).
pub const HEADER_SIZE: usize = 4;

/// Port the server listens on for command traffic, unless reconfigured.
pub const DEFAULT_COMMAND_PORT: u16 = 1510;

/// Port the server publishes frame data on, unless reconfigured.
pub const DEFAULT_DATA_PORT: u16 = 1511;

/// Multicast group Motive streams to out of the box.
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 42, 99);

/// A position in tracking space, metres, dense little-endian on the wire.
pub type Vec3 = [f32; 3];

/// An orientation quaternion (x, y, z, w), dense little-endian on the wire.
pub type Vec4 = [f32; 4];

/// Message ids used in the packet header, both directions.
#[repr(u16)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Primitive)]
pub enum MessageId {
    /// Client handshake request; the body is always "Ping".
    Connect = 0,
    /// Server handshake reply, carrying [`ServerInfo`].
    ServerInfo = 1,
    /// A command string passed through to the server's scripting interface.
    Request = 2,
    /// Server reply to a [`MessageId::Request`].
    Response = 3,
    /// Asks the server to push the scene description.
    RequestModelDef = 4,
    /// Scene description, carrying [`DataDescriptions`].
    ModelDef = 5,
    /// Asks the server to push a single frame.
    RequestFrameOfData = 6,
    /// One frame of tracking data, carrying [`DataFrame`].
    FrameOfData = 7,
    /// A printable message from the server.
    MessageString = 8,
    /// Client farewell.
    Disconnect = 9,
    /// Idle-path heartbeat, required on unicast sessions.
    KeepAlive = 10,
    /// The server did not understand the last request.
    UnrecognizedRequest = 100,
}

/// Implemented by records that decode from a packet at a protocol version.
///
/// A decoder consumes exactly the bytes the wire layout reserves for the
/// given version and never reads a field introduced by a later version.
pub trait FromPacket: Sized {
    /// Reads one record from `buf` under the layout rules of `version`.
    fn read(buf: &mut PacketBuffer<'_>, version: Version) -> Result<Self, ProtocolError>;
}

/// Reads a u32 element count followed by that many records.
pub(crate) fn read_counted<T: FromPacket>(
    buf: &mut PacketBuffer<'_>,
    version: Version,
) -> Result<Vec<T>, ProtocolError> {
    let count = buf.read_u32()?;
    let mut items = Vec::new();
    for _ in 0..count {
        items.push(T::read(buf, version)?);
    }
    Ok(items)
}

/// Frames an outbound request packet.
///
/// The body is the UTF-8 payload plus a trailing NUL, and the header's
/// length field counts that NUL. For [`MessageId::RequestModelDef`],
/// [`MessageId::RequestFrameOfData`] and [`MessageId::KeepAlive`] the
/// payload is forced empty; for [`MessageId::Connect`] it is forced to
/// "Ping".
pub fn encode_request(id: MessageId, payload: &str) -> Vec<u8> {
    let payload = match id {
        MessageId::RequestModelDef | MessageId::RequestFrameOfData | MessageId::KeepAlive => "",
        MessageId::Connect => "Ping",
        _ => payload,
    };

    let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + 1);
    data.extend_from_slice(&(id as u16).to_le_bytes());
    data.extend_from_slice(&(payload.len() as u16 + 1).to_le_bytes());
    data.extend_from_slice(payload.as_bytes());
    data.push(0);
    data
}


#[cfg(test)]
mod tests {
    use num_traits::FromPrimitive as _;
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse_request(data: &[u8]) -> (u16, u16, &[u8]) {
        let mut buf = PacketBuffer::new(data);
        let id = buf.read_u16().unwrap();
        let len = buf.read_u16().unwrap();
        (id, len, &data[HEADER_SIZE..])
    }

    #[test]
    fn request_framing_roundtrip() {
        let data = encode_request(MessageId::Request, "TimelinePlay");
        let (id, len, body) = parse_request(&data);

        assert_eq!(id, MessageId::Request as u16);
        assert_eq!(len as usize, "TimelinePlay".len() + 1);
        assert_eq!(body, b"TimelinePlay\0");
    }

    #[test]
    fn connect_body_is_forced_to_ping() {
        let data = encode_request(MessageId::Connect, "ignored");
        let (id, len, body) = parse_request(&data);

        assert_eq!(id, 0);
        assert_eq!(len, 5);
        assert_eq!(body, b"Ping\0");
    }

    #[test]
    fn parameterless_requests_have_empty_bodies() {
        for id in [
            MessageId::RequestModelDef,
            MessageId::RequestFrameOfData,
            MessageId::KeepAlive,
        ] {
            let data = encode_request(id, "ignored");
            let (_, len, body) = parse_request(&data);

            assert_eq!(len, 1);
            assert_eq!(body, b"\0");
        }
    }

    #[test]
    fn message_ids_match_the_wire() {
        assert_eq!(MessageId::from_u16(7), Some(MessageId::FrameOfData));
        assert_eq!(MessageId::from_u16(100), Some(MessageId::UnrecognizedRequest));
        assert_eq!(MessageId::from_u16(11), None);
    }
}
