use derive_more::derive::{Display, Error};

/// A specialized `Result` where the error is this crate's `Error` type.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Define a unified error type for this crate.
#[allow(missing_docs, reason = "The variants are self-explanatory.")]
#[derive(Debug, Display, Error)]
pub enum Error {
    // `#[error(not(source))]` below tells `derive_more` that `embassy_executor::SpawnError` does
    // not implement Rust's `core::error::Error` trait.
    #[cfg(feature = "wifi")]
    #[display("{_0:?}")]
    TaskSpawn(#[error(not(source))] embassy_executor::SpawnError),

    #[cfg(feature = "wifi")]
    #[display("TCP socket error: {_0:?}")]
    Socket(#[error(not(source))] embassy_net::tcp::Error),

    #[cfg(feature = "wifi")]
    #[display("TCP accept error: {_0:?}")]
    Accept(#[error(not(source))] embassy_net::tcp::AcceptError),

    #[display("Connection limit reached")]
    ConnectionLimit,

    #[display("Peer closed the connection")]
    PeerClosed,

    #[display("Timed out waiting for the peer")]
    Timeout,

    #[display("Malformed request")]
    MalformedRequest,

    #[display("Request exceeds the buffer ceiling")]
    RequestTooLarge,

    #[display("Upgrade request has no Sec-WebSocket-Key")]
    MissingWebSocketKey,

    #[display("Invalid WebSocket frame: {_0}")]
    InvalidFrame(FrameError),

    #[display("WebSocket frame exceeds the receive buffer")]
    FrameTooLarge,

    #[display("Output buffer too small")]
    BufferTooSmall,

    #[display("Client outbox is full")]
    OutboxFull,

    #[display("Client was evicted after a failed delivery")]
    Evicted,
}

/// Protocol violations found while decoding a client frame.
#[derive(Clone, Copy, Debug, Display, Error, Eq, PartialEq)]
pub enum FrameError {
    #[display("client frame is not masked")]
    Unmasked,

    #[display("reserved bits set without a negotiated extension")]
    ReservedBits,

    #[display("64-bit payload length has its most significant bit set")]
    LengthOverflow,
}

impl From<FrameError> for Error {
    fn from(err: FrameError) -> Self {
        Self::InvalidFrame(err)
    }
}

#[cfg(feature = "wifi")]
impl From<embassy_executor::SpawnError> for Error {
    fn from(err: embassy_executor::SpawnError) -> Self {
        Self::TaskSpawn(err)
    }
}

#[cfg(feature = "wifi")]
impl From<embassy_net::tcp::Error> for Error {
    fn from(err: embassy_net::tcp::Error) -> Self {
        Self::Socket(err)
    }
}

#[cfg(feature = "wifi")]
impl From<embassy_net::tcp::AcceptError> for Error {
    fn from(err: embassy_net::tcp::AcceptError) -> Self {
        Self::Accept(err)
    }
}

#[cfg(feature = "wifi")]
impl From<embassy_time::TimeoutError> for Error {
    fn from(_: embassy_time::TimeoutError) -> Self {
        Self::Timeout
    }
}
