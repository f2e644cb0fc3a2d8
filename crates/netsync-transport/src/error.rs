use std::io;

/// Failures below the message layer: sockets, frames, tiers.
///
/// A clean close is not an error; `recv` reports it as `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("could not open connection: {0}")]
    ConnectFailed(#[source] io::Error),

    #[error("could not accept connection: {0}")]
    AcceptFailed(#[source] io::Error),

    #[error("send failed: {0}")]
    SendFailed(#[source] io::Error),

    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] io::Error),

    /// The frame's first byte names no [`DeliveryMethod`](crate::DeliveryMethod).
    #[error("unknown delivery method byte {0}")]
    UnknownDeliveryMethod(u8),

    /// The frame is shorter than its `[tier][sequence]` header.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}
