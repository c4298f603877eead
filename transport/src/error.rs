//! Error types for the video transport protocol.
//!
//! This module defines every error the transport surfaces to an embedder.
//! Internal failures that the protocol itself absorbs (checksum mismatch,
//! duplicate fragment, stale sequence number) are counted in statistics and
//! never reach this type — see the propagation policy in each module.

use std::fmt;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the transport protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A caller-supplied parameter is out of range or malformed.
    InvalidParam,

    /// Allocation failed (pool growth, tracker allocation).
    NoMemory,

    /// A blocking wait exceeded its deadline.
    Timeout,

    /// The operation would block and the caller asked not to wait.
    Busy,

    /// CRC-16 verification failed on an incoming packet.
    Checksum,

    /// Packet failed structural validation.
    PacketInvalid,

    /// Packet, or the frame it belongs to, exceeds the configured maximum.
    PacketTooLarge,

    /// Frame content failed validation.
    FrameInvalid,

    /// Frame reassembly did not complete before the caller needed it.
    FrameIncomplete,

    /// A socket address was malformed.
    AddrInvalid,

    /// Failed to create the underlying socket.
    SocketCreate,

    /// Failed to bind the underlying socket.
    SocketBind,

    /// Failed to send on the underlying socket.
    SocketSend,

    /// Failed to receive on the underlying socket.
    SocketRecv,

    /// The endpoint is not yet connected.
    NotReady,

    /// The endpoint has already been initialized.
    AlreadyInit,

    /// The endpoint lost its peer (heartbeat timeout or explicit disconnect).
    Disconnected,

    /// A counter or buffer offset overflowed its valid range.
    Overflow,
}

impl Error {
    /// Returns a human-readable description of the error.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Error::InvalidParam => "invalid parameter",
            Error::NoMemory => "allocation failed",
            Error::Timeout => "operation timed out",
            Error::Busy => "operation would block",
            Error::Checksum => "checksum mismatch",
            Error::PacketInvalid => "invalid packet",
            Error::PacketTooLarge => "packet too large",
            Error::FrameInvalid => "invalid frame",
            Error::FrameIncomplete => "frame incomplete",
            Error::AddrInvalid => "invalid address",
            Error::SocketCreate => "socket creation failed",
            Error::SocketBind => "socket bind failed",
            Error::SocketSend => "socket send failed",
            Error::SocketRecv => "socket recv failed",
            Error::NotReady => "endpoint not ready",
            Error::AlreadyInit => "endpoint already initialized",
            Error::Disconnected => "peer disconnected",
            Error::Overflow => "value overflowed",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => Error::Busy,
            _ => Error::SocketRecv,
        }
    }
}
