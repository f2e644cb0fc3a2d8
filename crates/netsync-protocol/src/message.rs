//! Outgoing and incoming message buffers.
//!
//! A message is a bit stream whose first byte is a [`MessageType`]
//! discriminator. [`OutgoingMessage`] appends to the stream through a
//! write cursor; [`IncomingMessage`] walks it through a read cursor that
//! starts just past the discriminator.
//!
//! Bits are packed least-significant first. Whole-byte writes on a
//! byte-aligned cursor go straight to the buffer; anything else is
//! shifted in bit by bit.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{ProtocolError, WireDecode, WireEncode};

/// Width of the discriminator in bytes.
pub const DISCRIMINATOR_LEN: usize = 1;

wire_enum! {
    /// The envelope-level discriminator, always the first byte.
    pub enum MessageType ("message type") {
        /// Ordinary traffic.
        Data = 0,
        /// The first message a client sends on a new connection.
        Hail = 1,
    }
}

fn check_bit_count(bits: u32) -> Result<(), ProtocolError> {
    if bits == 0 || bits > 8 {
        return Err(ProtocolError::InvalidArgument(format!(
            "bit count must be between 1 and 8, got {bits}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// OutgoingMessage
// ---------------------------------------------------------------------------

/// An append-only message under construction.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    buf: BytesMut,
    bit_len: usize,
    kind: MessageType,
}

impl OutgoingMessage {
    /// Starts a message and writes its discriminator.
    pub fn new(kind: MessageType) -> Self {
        let mut message = Self {
            buf: BytesMut::with_capacity(64),
            bit_len: 0,
            kind,
        };
        message.put_byte(kind.as_u8());
        message
    }

    /// Starts an ordinary data message.
    pub fn data() -> Self {
        Self::new(MessageType::Data)
    }

    /// The discriminator written at construction.
    pub fn message_type(&self) -> MessageType {
        self.kind
    }

    /// Length in bits, discriminator included.
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Length in bytes, counting a partial trailing byte as whole.
    pub fn byte_len(&self) -> usize {
        self.bit_len.div_ceil(8)
    }

    /// The encoded bytes, discriminator included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Finishes the message and returns its bytes.
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    /// Finishes the message and returns the bytes after the discriminator.
    pub fn into_payload(self) -> Bytes {
        self.buf.freeze().slice(DISCRIMINATOR_LEN..)
    }

    /// Appends `value` using its wire encoding.
    pub fn write<T: WireEncode + ?Sized>(&mut self, value: &T) -> &mut Self {
        value.encode(self);
        self
    }

    /// Appends the low `bits` bits of `value`.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidArgument`] if `bits` is outside `[1, 8]`;
    /// nothing is written in that case.
    pub fn write_byte_bits(
        &mut self,
        value: u8,
        bits: u32,
    ) -> Result<&mut Self, ProtocolError> {
        check_bit_count(bits)?;
        self.put_bits(value, bits);
        Ok(self)
    }

    /// Appends `count` bytes of `source` starting at `offset`, prefixed
    /// with an `i32` length.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidArgument`] if either number is negative or
    /// the range runs past the end of `source`. Nothing is written.
    pub fn write_bytes_range(
        &mut self,
        source: &[u8],
        offset: i32,
        count: i32,
    ) -> Result<&mut Self, ProtocolError> {
        if offset < 0 || count < 0 {
            return Err(ProtocolError::InvalidArgument(format!(
                "offset ({offset}) and count ({count}) must not be negative"
            )));
        }
        let (start, len) = (offset as usize, count as usize);
        let end = start.checked_add(len).filter(|&end| end <= source.len());
        let Some(end) = end else {
            return Err(ProtocolError::InvalidArgument(format!(
                "range {start}+{len} exceeds source length {}",
                source.len()
            )));
        };
        self.write(&count);
        self.put_slice(&source[start..end]);
        Ok(self)
    }

    /// Appends another message's payload, without its discriminator.
    ///
    /// Both sides are cut to whole bytes: a partial trailing byte on this
    /// message is discarded before the append, and only the complete
    /// bytes of `other`'s payload are copied. Up to 7 bits can be lost on
    /// each side.
    pub fn append_message(&mut self, other: &OutgoingMessage) -> &mut Self {
        self.truncate_to_byte();
        let whole = other.bit_len / 8;
        if whole > DISCRIMINATOR_LEN {
            self.put_slice(&other.buf[DISCRIMINATOR_LEN..whole]);
        }
        self
    }

    /// Appends the unread remainder of an incoming message, starting at
    /// the byte that holds its cursor.
    ///
    /// The same whole-byte rule as [`append_message`](Self::append_message)
    /// applies.
    pub fn append_remaining(&mut self, incoming: &IncomingMessage) -> &mut Self {
        self.truncate_to_byte();
        let from = incoming.position_bytes();
        let to = incoming.bit_len() / 8;
        if to > from {
            self.put_slice(&incoming.as_bytes()[from..to]);
        }
        self
    }

    /// Appends raw bytes with no length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.put_slice(bytes);
        self
    }

    fn truncate_to_byte(&mut self) {
        let whole = self.bit_len / 8;
        self.buf.truncate(whole);
        self.bit_len = whole * 8;
    }

    pub(crate) fn put_byte(&mut self, value: u8) {
        self.put_bits(value, 8);
    }

    pub(crate) fn put_slice(&mut self, bytes: &[u8]) {
        if self.bit_len % 8 == 0 {
            self.buf.put_slice(bytes);
            self.bit_len += bytes.len() * 8;
        } else {
            for &byte in bytes {
                self.put_bits(byte, 8);
            }
        }
    }

    fn put_bits(&mut self, value: u8, bits: u32) {
        let masked = if bits == 8 { value } else { value & ((1u8 << bits) - 1) };
        let offset = (self.bit_len % 8) as u32;
        let shifted = u16::from(masked) << offset;

        if offset == 0 {
            self.buf.put_u8(shifted as u8);
        } else if let Some(last) = self.buf.last_mut() {
            *last |= shifted as u8;
        }
        if offset + bits > 8 {
            self.buf.put_u8((shifted >> 8) as u8);
        }
        self.bit_len += bits as usize;
    }
}

// ---------------------------------------------------------------------------
// IncomingMessage
// ---------------------------------------------------------------------------

/// A received message with a read cursor.
///
/// Cloning is cheap: the bytes are reference-counted.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    data: Bytes,
    bit_len: usize,
    bit_pos: usize,
    kind: MessageType,
}

impl IncomingMessage {
    /// Wraps received bytes and reads the discriminator.
    ///
    /// # Errors
    /// [`ProtocolError::EndOfMessage`] on an empty buffer, or
    /// [`ProtocolError::UnrecognizedMessageKind`] if the first byte is not
    /// a [`MessageType`].
    pub fn new(data: Bytes) -> Result<Self, ProtocolError> {
        let first = *data.first().ok_or(ProtocolError::EndOfMessage {
            needed: 8,
            remaining: 0,
        })?;
        let kind = MessageType::try_from(first)?;
        Ok(Self {
            bit_len: data.len() * 8,
            bit_pos: DISCRIMINATOR_LEN * 8,
            data,
            kind,
        })
    }

    /// Wraps a bare payload as a data message.
    pub fn from_payload(payload: &[u8]) -> Self {
        let mut data = BytesMut::with_capacity(payload.len() + DISCRIMINATOR_LEN);
        data.put_u8(MessageType::Data.as_u8());
        data.put_slice(payload);
        Self {
            bit_len: data.len() * 8,
            bit_pos: DISCRIMINATOR_LEN * 8,
            data: data.freeze(),
            kind: MessageType::Data,
        }
    }

    /// The discriminator read at construction.
    pub fn message_type(&self) -> MessageType {
        self.kind
    }

    /// All bytes, discriminator included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Length in bits, discriminator included.
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Cursor position in bits from the start of the message.
    pub fn position_bits(&self) -> usize {
        self.bit_pos
    }

    /// Byte that holds the cursor.
    pub fn position_bytes(&self) -> usize {
        self.bit_pos / 8
    }

    /// Bits left after the cursor.
    pub fn remaining_bits(&self) -> usize {
        self.bit_len - self.bit_pos
    }

    /// Returns `true` once every bit has been read.
    pub fn is_exhausted(&self) -> bool {
        self.remaining_bits() == 0
    }

    /// Moves the cursor to `offset` bytes past the discriminator.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidArgument`] if the offset is past the end.
    pub fn seek(&mut self, offset: usize) -> Result<(), ProtocolError> {
        let target = DISCRIMINATOR_LEN
            .checked_add(offset)
            .and_then(|bytes| bytes.checked_mul(8))
            .filter(|bits| *bits <= self.bit_len);
        let Some(target) = target else {
            return Err(ProtocolError::InvalidArgument(format!(
                "seek offset {offset} is past the end of a {}-byte payload",
                self.data.len().saturating_sub(DISCRIMINATOR_LEN)
            )));
        };
        self.bit_pos = target;
        Ok(())
    }

    /// Reads a value using its wire encoding.
    pub fn read<T: WireDecode>(&mut self) -> Result<T, ProtocolError> {
        T::decode(self)
    }

    /// Reads `bits` bits into the low end of a byte.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidArgument`] if `bits` is outside `[1, 8]`.
    pub fn read_byte_bits(&mut self, bits: u32) -> Result<u8, ProtocolError> {
        check_bit_count(bits)?;
        self.ensure(bits as usize)?;
        Ok(self.take_bits(bits))
    }

    /// Copies the unread bytes, leaving the cursor at the end.
    pub fn read_remaining(&mut self) -> Result<Bytes, ProtocolError> {
        let whole = self.remaining_bits() / 8;
        self.take_bytes(whole)
    }

    pub(crate) fn take_byte(&mut self) -> Result<u8, ProtocolError> {
        self.ensure(8)?;
        Ok(self.take_bits(8))
    }

    pub(crate) fn take_bytes(&mut self, len: usize) -> Result<Bytes, ProtocolError> {
        self.ensure(len * 8)?;
        if self.bit_pos % 8 == 0 {
            let start = self.bit_pos / 8;
            self.bit_pos += len * 8;
            return Ok(self.data.slice(start..start + len));
        }
        let mut out = BytesMut::with_capacity(len);
        for _ in 0..len {
            out.put_u8(self.take_bits(8));
        }
        Ok(out.freeze())
    }

    pub(crate) fn take_array<const N: usize>(
        &mut self,
    ) -> Result<[u8; N], ProtocolError> {
        self.ensure(N * 8)?;
        let mut out = [0u8; N];
        for byte in &mut out {
            *byte = self.take_bits(8);
        }
        Ok(out)
    }

    fn ensure(&self, bits: usize) -> Result<(), ProtocolError> {
        let remaining = self.remaining_bits();
        if bits > remaining {
            return Err(ProtocolError::EndOfMessage {
                needed: bits,
                remaining,
            });
        }
        Ok(())
    }

    // Caller has checked that `bits` are available.
    fn take_bits(&mut self, bits: u32) -> u8 {
        let index = self.bit_pos / 8;
        let offset = (self.bit_pos % 8) as u32;
        let mut word = u16::from(self.data[index]);
        if offset + bits > 8 {
            word |= u16::from(self.data[index + 1]) << 8;
        }
        let value = (word >> offset) as u8;
        self.bit_pos += bits as usize;
        if bits == 8 { value } else { value & ((1u8 << bits) - 1) }
    }
}

impl TryFrom<Bytes> for IncomingMessage {
    type Error = ProtocolError;

    fn try_from(data: Bytes) -> Result<Self, Self::Error> {
        Self::new(data)
    }
}

impl From<OutgoingMessage> for IncomingMessage {
    /// Reopens a finished message for reading, cursor past the
    /// discriminator. A partial trailing byte stays readable bit by bit.
    fn from(message: OutgoingMessage) -> Self {
        let bit_len = message.bit_len;
        let kind = message.kind;
        Self {
            data: message.freeze(),
            bit_len,
            bit_pos: DISCRIMINATOR_LEN * 8,
            kind,
        }
    }
}
