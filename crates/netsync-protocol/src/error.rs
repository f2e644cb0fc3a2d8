//! Error types for the protocol layer.
//!
//! Every failure here is local and synchronous: a bad read fails the
//! read that caused it, and a bad argument fails before a single bit is
//! written. Nothing in this crate panics on malformed input.

/// Errors that can occur while encoding or decoding messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A read needed more bits than the message has left.
    #[error("end of message: needed {needed} bits, {remaining} remaining")]
    EndOfMessage {
        /// Bits the read asked for.
        needed: usize,
        /// Bits left after the cursor.
        remaining: usize,
    },

    /// A caller passed an argument outside its valid range, such as a
    /// bit count outside `[1, 8]` or a copy range past the source slice.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A length prefix was negative.
    #[error("invalid length prefix {0}")]
    InvalidLength(i32),

    /// String bytes were not valid UTF-8.
    #[error("invalid string: {0}")]
    InvalidString(String),

    /// A discriminator byte does not name any kind in its namespace.
    ///
    /// Callers decide whether to drop the message or the connection.
    #[error("unrecognized {namespace} kind {value}")]
    UnrecognizedMessageKind {
        /// Which enumeration the byte was decoded as.
        namespace: &'static str,
        /// The offending byte.
        value: u8,
    },

    /// The message decoded but violates protocol rules.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
