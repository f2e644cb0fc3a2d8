//! Delivery tiers and the receive-side filters that enforce them.
//!
//! Every outgoing message picks a [`DeliveryMethod`]. The sender stamps it
//! with a per-tier sequence number from a [`SequenceCounter`]; the receiver
//! runs each arrival through a [`DeliveryFilter`], which drops stale
//! sequenced messages and holds back out-of-order ones on the ordered tier.
//!
//! Sequence numbers are `u16` and wrap. Comparisons use the half-range
//! rule, so `0` is newer than `65535`.

use std::collections::BTreeMap;
use std::fmt;

use crate::TransportError;

/// Upper bound on messages held back by an ordered channel while it
/// waits for a gap to fill.
pub const MAX_ORDERED_BACKLOG: usize = 1024;

// ---------------------------------------------------------------------------
// DeliveryMethod
// ---------------------------------------------------------------------------

/// The reliability and ordering contract of one message.
///
/// The byte values are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum DeliveryMethod {
    /// Not set. Treated like `Unreliable` on receive.
    Unknown = 0,
    /// May be lost, duplicated, or reordered.
    Unreliable = 1,
    /// May be lost; late arrivals are dropped.
    UnreliableSequenced = 2,
    /// Always arrives, in any order.
    ReliableUnordered = 34,
    /// Always sent reliably; late arrivals are dropped.
    ReliableSequenced = 35,
    /// Always arrives, in send order.
    #[default]
    ReliableOrdered = 67,
}

impl DeliveryMethod {
    /// All tiers in wire order.
    pub const ALL: [DeliveryMethod; 6] = [
        Self::Unknown,
        Self::Unreliable,
        Self::UnreliableSequenced,
        Self::ReliableUnordered,
        Self::ReliableSequenced,
        Self::ReliableOrdered,
    ];

    /// Returns the wire byte.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns `true` if the transport must retransmit lost messages.
    pub fn is_reliable(self) -> bool {
        matches!(
            self,
            Self::ReliableUnordered
                | Self::ReliableSequenced
                | Self::ReliableOrdered
        )
    }

    /// Returns `true` if stale arrivals are dropped.
    pub fn is_sequenced(self) -> bool {
        matches!(self, Self::UnreliableSequenced | Self::ReliableSequenced)
    }

    /// Returns `true` if arrivals are delivered strictly in send order.
    pub fn is_ordered(self) -> bool {
        matches!(self, Self::ReliableOrdered)
    }

    fn slot(self) -> usize {
        match self {
            Self::Unknown => 0,
            Self::Unreliable => 1,
            Self::UnreliableSequenced => 2,
            Self::ReliableUnordered => 3,
            Self::ReliableSequenced => 4,
            Self::ReliableOrdered => 5,
        }
    }
}

impl TryFrom<u8> for DeliveryMethod {
    type Error = TransportError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Unreliable),
            2 => Ok(Self::UnreliableSequenced),
            34 => Ok(Self::ReliableUnordered),
            35 => Ok(Self::ReliableSequenced),
            67 => Ok(Self::ReliableOrdered),
            other => Err(TransportError::UnknownDeliveryMethod(other)),
        }
    }
}

impl fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Unreliable => write!(f, "Unreliable"),
            Self::UnreliableSequenced => write!(f, "UnreliableSequenced"),
            Self::ReliableUnordered => write!(f, "ReliableUnordered"),
            Self::ReliableSequenced => write!(f, "ReliableSequenced"),
            Self::ReliableOrdered => write!(f, "ReliableOrdered"),
        }
    }
}

// ---------------------------------------------------------------------------
// Wrapping sequence comparison
// ---------------------------------------------------------------------------

/// Returns `true` if `s1` is newer than `s2` under wrap-around.
///
/// `sequence_greater_than(2, 1)` is `true`, `sequence_greater_than(0, 65535)`
/// is `true`, and equal values are never greater.
pub fn sequence_greater_than(s1: u16, s2: u16) -> bool {
    ((s1 > s2) && (s1 - s2 <= 32768)) || ((s1 < s2) && (s2 - s1 > 32768))
}

/// Returns `true` if `s1` is older than `s2` under wrap-around.
pub fn sequence_less_than(s1: u16, s2: u16) -> bool {
    sequence_greater_than(s2, s1)
}

// ---------------------------------------------------------------------------
// Send side
// ---------------------------------------------------------------------------

/// Hands out outgoing sequence numbers, one independent counter per tier.
#[derive(Debug, Default, Clone)]
pub struct SequenceCounter {
    next: [u16; 6],
}

impl SequenceCounter {
    /// Creates a counter with every tier starting at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the sequence number for the next message on `method`.
    pub fn next(&mut self, method: DeliveryMethod) -> u16 {
        let slot = &mut self.next[method.slot()];
        let current = *slot;
        *slot = slot.wrapping_add(1);
        current
    }
}

// ---------------------------------------------------------------------------
// Receive side
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct OrderedChannel<T> {
    expected: u16,
    backlog: BTreeMap<u16, T>,
}

/// Applies the receive rules of every tier to incoming messages.
///
/// Each tier is an independent channel: a sequenced message never waits
/// on, or is dropped because of, traffic on another tier.
#[derive(Debug)]
pub struct DeliveryFilter<T> {
    last_sequenced: [Option<u16>; 6],
    ordered: OrderedChannel<T>,
}

impl<T> Default for DeliveryFilter<T> {
    fn default() -> Self {
        Self {
            last_sequenced: [None; 6],
            ordered: OrderedChannel {
                expected: 0,
                backlog: BTreeMap::new(),
            },
        }
    }
}

impl<T> DeliveryFilter<T> {
    /// Creates a filter that has seen nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one arrival and returns the messages now deliverable, in
    /// delivery order.
    ///
    /// Most calls return zero or one message. An ordered arrival that
    /// fills a gap releases everything buffered behind it.
    pub fn receive(
        &mut self,
        method: DeliveryMethod,
        sequence: u16,
        payload: T,
    ) -> Vec<T> {
        if method.is_sequenced() {
            let last = &mut self.last_sequenced[method.slot()];
            let previous = *last;
            return match previous {
                Some(prev) if !sequence_greater_than(sequence, prev) => {
                    tracing::trace!(
                        %method, sequence, last = prev,
                        "dropping stale sequenced message"
                    );
                    Vec::new()
                }
                _ => {
                    *last = Some(sequence);
                    vec![payload]
                }
            };
        }

        if method.is_ordered() {
            return self.receive_ordered(sequence, payload);
        }

        vec![payload]
    }

    /// Number of ordered messages waiting for an earlier sequence.
    pub fn backlog_len(&self) -> usize {
        self.ordered.backlog.len()
    }

    fn receive_ordered(&mut self, sequence: u16, payload: T) -> Vec<T> {
        let channel = &mut self.ordered;

        if sequence_less_than(sequence, channel.expected) {
            tracing::trace!(sequence, "dropping duplicate ordered message");
            return Vec::new();
        }

        if sequence != channel.expected {
            if channel.backlog.len() >= MAX_ORDERED_BACKLOG {
                tracing::warn!(
                    sequence,
                    expected = channel.expected,
                    "ordered backlog full, dropping message"
                );
                return Vec::new();
            }
            channel.backlog.insert(sequence, payload);
            return Vec::new();
        }

        let mut released = vec![payload];
        channel.expected = channel.expected.wrapping_add(1);
        while let Some(next) = channel.backlog.remove(&channel.expected) {
            released.push(next);
            channel.expected = channel.expected.wrapping_add(1);
        }
        released
    }
}
