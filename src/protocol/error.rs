//! Defines error types for packet decoding.

use thiserror::Error;

/// An error produced while decoding a NatNet packet.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The packet ended before the requested field could be read in full.
    #[error("unexpected end of packet: needed {needed} bytes at offset {offset}, {remaining} left")]
    UnexpectedEof {
        /// Cursor position at which the read was attempted.
        offset: usize,
        /// Width of the field that was being read.
        needed: usize,
        /// Bytes left in the packet.
        remaining: usize,
    },
    /// A variable-length string ran to the end of its window without a NUL.
    #[error("unterminated string at offset {0}")]
    UnterminatedString(usize),
    /// A string field held bytes that are not valid UTF-8.
    #[error("invalid UTF-8 in string at offset {offset}: {source}")]
    InvalidString {
        /// Cursor position of the start of the string.
        offset: usize,
        /// The underlying decode failure.
        source: std::str::Utf8Error,
    },
    /// The message id in the packet header is not part of the protocol.
    #[error("unknown message id {0}")]
    UnknownMessageId(u16),
    /// The server refused a `Bitstream` protocol version change.
    #[error("server rejected the protocol version change")]
    VersionChangeRejected,
}
