//! The server's handshake reply.

use super::{FromPacket, PacketBuffer, ProtocolError, Version};

/// What the server reports about itself in reply to a `Connect` request.
///
/// This is the first message of every session; the
/// [`nat_net_protocol_version`](Self::nat_net_protocol_version) it carries
/// governs the layout of every packet that follows.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ServerInfo {
    /// Name of the server application, e.g. "Motive".
    pub application_name: String,
    /// Product version of the server application.
    pub server_version: Version,
    /// NatNet protocol version the server streams at.
    pub nat_net_protocol_version: Version,
}

impl FromPacket for ServerInfo {
    fn read(buf: &mut PacketBuffer<'_>, _version: Version) -> Result<Self, ProtocolError> {
        let application_name = buf.read_fixed_string(256)?;
        let server_version = read_version_quad(buf)?;
        let nat_net_protocol_version = read_version_quad(buf)?;

        Ok(Self {
            application_name,
            server_version,
            nat_net_protocol_version,
        })
    }
}

// Versions ride the wire as four single-byte components.
fn read_version_quad(buf: &mut PacketBuffer<'_>) -> Result<Version, ProtocolError> {
    let mut parts = [0; 4];
    for part in parts.iter_mut() {
        *part = u32::from(buf.read_u8()?);
    }

    Ok(Version::from_parts(&parts))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::protocol::test_util::{decode_all, PacketBuilder};

    #[test]
    fn server_info_decodes_name_and_versions() {
        let data = PacketBuilder::new()
            .fixed_string("Motive", 256)
            .u8(3)
            .u8(0)
            .u8(0)
            .u8(0)
            .u8(3)
            .u8(1)
            .u8(0)
            .u8(0)
            .build();

        let info: ServerInfo = decode_all(&data, Version::default());

        assert_eq!(info.application_name, "Motive");
        assert_eq!(info.server_version, Version::from_parts(&[3, 0, 0, 0]));
        assert_eq!(
            info.nat_net_protocol_version,
            Version::from_parts(&[3, 1, 0, 0])
        );
    }

    #[test]
    fn truncated_server_info_is_an_error() {
        let data = PacketBuilder::new().fixed_string("Motive", 256).build();
        let mut buf = PacketBuffer::new(&data);

        assert!(ServerInfo::read(&mut buf, Version::default()).is_err());
    }
}
