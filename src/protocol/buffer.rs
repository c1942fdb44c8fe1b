//! A cursor over the raw bytes of one datagram.

use byteorder::{ByteOrder, LittleEndian};

use super::{ProtocolError, Vec3, Vec4};

/// A read cursor over the bytes of a single received packet.
///
/// All reads are little-endian and advance the cursor by exactly the wire
/// width of the value read. A read that would run past the end of the packet
/// fails without moving the cursor, so a decode error always reports the
/// offset of the field that could not be read.
#[derive(Debug)]
pub struct PacketBuffer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketBuffer<'a> {
    /// Wraps a received datagram.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current cursor position, in bytes from the start of the packet.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Total packet length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the packet is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes left between the cursor and the end of the packet.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, width: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < width {
            return Err(ProtocolError::UnexpectedEof {
                offset: self.pos,
                needed: width,
                remaining: self.remaining(),
            });
        }

        let slice = &self.data[self.pos..self.pos + width];
        self.pos += width;
        Ok(slice)
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    /// Reads an unsigned 16-bit integer.
    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    /// Reads an unsigned 32-bit integer.
    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    /// Reads an unsigned 64-bit integer.
    pub fn read_u64(&mut self) -> Result<u64, ProtocolError> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    /// Reads a 32-bit IEEE-754 float.
    pub fn read_f32(&mut self) -> Result<f32, ProtocolError> {
        Ok(LittleEndian::read_f32(self.take(4)?))
    }

    /// Reads a 64-bit IEEE-754 float.
    pub fn read_f64(&mut self) -> Result<f64, ProtocolError> {
        Ok(LittleEndian::read_f64(self.take(8)?))
    }

    /// Reads `count` consecutive 32-bit floats.
    pub fn read_f32_array(&mut self, count: usize) -> Result<Vec<f32>, ProtocolError> {
        let bytes = self.take(count * 4)?;
        let mut values = vec![0.0; count];
        LittleEndian::read_f32_into(bytes, &mut values);
        Ok(values)
    }

    /// Reads three consecutive floats as a position vector.
    pub fn read_vec3(&mut self) -> Result<Vec3, ProtocolError> {
        let bytes = self.take(12)?;
        let mut v = [0.0; 3];
        LittleEndian::read_f32_into(bytes, &mut v);
        Ok(v)
    }

    /// Reads four consecutive floats as a quaternion.
    pub fn read_vec4(&mut self) -> Result<Vec4, ProtocolError> {
        let bytes = self.take(16)?;
        let mut v = [0.0; 4];
        LittleEndian::read_f32_into(bytes, &mut v);
        Ok(v)
    }

    /// Reads a NUL-terminated UTF-8 string, advancing past the NUL.
    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        self.read_terminated(self.remaining())
    }

    /// Like [`read_string`](Self::read_string), but the NUL must fall within
    /// the next `max` bytes.
    pub fn read_string_limited(&mut self, max: usize) -> Result<String, ProtocolError> {
        self.read_terminated(max.min(self.remaining()))
    }

    /// Reads a fixed `len`-byte field holding a NUL-terminated UTF-8 string.
    ///
    /// The cursor always advances by exactly `len`; the decoded string is the
    /// window's content up to its first NUL.
    pub fn read_fixed_string(&mut self, len: usize) -> Result<String, ProtocolError> {
        let offset = self.pos;
        let window = self.take(len)?;
        let text = match window.iter().position(|&b| b == 0) {
            Some(nul) => &window[..nul],
            None => window,
        };

        decode_utf8(text, offset)
    }

    fn read_terminated(&mut self, window: usize) -> Result<String, ProtocolError> {
        let offset = self.pos;
        let nul = self.data[offset..offset + window]
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtocolError::UnterminatedString(offset))?;

        let text = decode_utf8(&self.data[offset..offset + nul], offset)?;
        self.pos += nul + 1;
        Ok(text)
    }
}

fn decode_utf8(bytes: &[u8], offset: usize) -> Result<String, ProtocolError> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|source| ProtocolError::InvalidString { offset, source })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn typed_reads_advance_by_wire_width() {
        let data = [
            0x01, 0x00, // u16
            0x02, 0x00, 0x00, 0x00, // u32
            0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // u64
            0x00, 0x00, 0x80, 0x3f, // f32 = 1.0
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xf8, 0x3f, // f64 = 1.5
        ];
        let mut buf = PacketBuffer::new(&data);

        assert_eq!(buf.read_u16().unwrap(), 1);
        assert_eq!(buf.position(), 2);
        assert_eq!(buf.read_u32().unwrap(), 2);
        assert_eq!(buf.position(), 6);
        assert_eq!(buf.read_u64().unwrap(), 3);
        assert_eq!(buf.position(), 14);
        assert_eq!(buf.read_f32().unwrap(), 1.0);
        assert_eq!(buf.position(), 18);
        assert_eq!(buf.read_f64().unwrap(), 1.5);
        assert_eq!(buf.position(), 26);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn short_read_fails_without_moving_the_cursor() {
        let mut buf = PacketBuffer::new(&[0xaa, 0xbb]);

        assert_matches!(
            buf.read_u32(),
            Err(ProtocolError::UnexpectedEof {
                offset: 0,
                needed: 4,
                remaining: 2,
            })
        );
        assert_eq!(buf.position(), 0);
        assert_eq!(buf.read_u16().unwrap(), 0xbbaa);
    }

    #[test]
    fn string_reads_stop_at_the_nul() {
        let mut buf = PacketBuffer::new(b"Motive\0rest");

        assert_eq!(buf.read_string().unwrap(), "Motive");
        assert_eq!(buf.position(), 7);
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let mut buf = PacketBuffer::new(b"Motive");
        assert_matches!(buf.read_string(), Err(ProtocolError::UnterminatedString(0)));

        let mut buf = PacketBuffer::new(b"model\0name");
        buf.read_string().unwrap();
        assert_matches!(
            buf.read_string_limited(3),
            Err(ProtocolError::UnterminatedString(6))
        );
    }

    #[test]
    fn fixed_string_always_consumes_its_window() {
        let mut data = [0u8; 16];
        data[..6].copy_from_slice(b"Motive");
        data[10] = b'x';
        let mut buf = PacketBuffer::new(&data);

        assert_eq!(buf.read_fixed_string(16).unwrap(), "Motive");
        assert_eq!(buf.position(), 16);
    }

    #[test]
    fn fixed_string_without_nul_takes_the_whole_window() {
        let mut buf = PacketBuffer::new(b"abcd");
        assert_eq!(buf.read_fixed_string(4).unwrap(), "abcd");
        assert_eq!(buf.position(), 4);
    }

    #[test]
    fn invalid_utf8_reports_the_string_offset() {
        let mut buf = PacketBuffer::new(&[0x07, 0x00, 0xff, 0xfe, 0x00]);
        buf.read_u16().unwrap();

        assert_matches!(
            buf.read_string(),
            Err(ProtocolError::InvalidString { offset: 2, .. })
        );
    }

    #[test]
    fn f32_array_reads_dense_floats() {
        let mut data = Vec::new();
        for v in [1.0f32, 2.0, 3.0, 4.0] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let mut buf = PacketBuffer::new(&data);

        assert_eq!(buf.read_vec3().unwrap(), [1.0, 2.0, 3.0]);
        assert_eq!(buf.read_f32_array(1).unwrap(), vec![4.0]);
        assert_eq!(buf.position(), 16);
    }
}
