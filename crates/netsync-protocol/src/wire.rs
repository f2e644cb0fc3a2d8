//! Wire encodings for primitive and composite values.
//!
//! [`WireEncode`] and [`WireDecode`] give every type one fixed encoding,
//! so `message.write(&x)` and `message.read::<T>()` mirror each other.
//! Integers and floats are little-endian. Strings, byte arrays, and
//! homogeneous arrays carry an `i32` count before their contents.
//!
//! Composite layouts:
//!
//! | Type | Layout |
//! |------|--------|
//! | `Vec2`/`Vec3`/`Vec4` | 2/3/4 × f32 |
//! | `Quat` | f32 × 4, X Y Z W |
//! | `Mat4` | f32 × 16, row-major |
//! | [`Color`] | u8 × 4, R G B A |
//! | [`TimeSpan`] | i64 ticks or i32 ms, see [`TimePrecision`] |
//! | [`DateTime`] | i64 binary form |
//! | [`NetworkEndpoint`] | string address, i32 port |

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::{IncomingMessage, OutgoingMessage, ProtocolError};

/// A value with a fixed wire encoding.
pub trait WireEncode {
    /// Appends the encoding of `self`.
    fn encode(&self, out: &mut OutgoingMessage);
}

/// A value that can be read back from its wire encoding.
pub trait WireDecode: Sized {
    /// Reads one value, advancing the cursor by its width.
    fn decode(input: &mut IncomingMessage) -> Result<Self, ProtocolError>;
}

/// An application type that writes itself field by field.
///
/// Used for property values whose layout only the application knows.
pub trait NetworkSerializable {
    /// Writes every field.
    fn write(&self, out: &mut OutgoingMessage);

    /// Reads the fields back in the same order.
    fn read(input: &mut IncomingMessage) -> Result<Self, ProtocolError>
    where
        Self: Sized;
}

fn read_len(input: &mut IncomingMessage) -> Result<usize, ProtocolError> {
    let len: i32 = input.read()?;
    usize::try_from(len).map_err(|_| ProtocolError::InvalidLength(len))
}

fn write_len(out: &mut OutgoingMessage, len: usize) {
    // Lengths past i32::MAX cannot be framed; saturate so the reader
    // fails on the short payload instead of a negative prefix.
    let len = i32::try_from(len).unwrap_or(i32::MAX);
    out.write(&len);
}

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

impl WireEncode for u8 {
    fn encode(&self, out: &mut OutgoingMessage) {
        out.put_byte(*self);
    }
}

impl WireDecode for u8 {
    fn decode(input: &mut IncomingMessage) -> Result<Self, ProtocolError> {
        input.take_byte()
    }
}

impl WireEncode for bool {
    fn encode(&self, out: &mut OutgoingMessage) {
        out.put_byte(u8::from(*self));
    }
}

impl WireDecode for bool {
    fn decode(input: &mut IncomingMessage) -> Result<Self, ProtocolError> {
        Ok(input.take_byte()? != 0)
    }
}

macro_rules! le_number {
    ($($ty:ty),+) => {$(
        impl WireEncode for $ty {
            fn encode(&self, out: &mut OutgoingMessage) {
                out.put_slice(&self.to_le_bytes());
            }
        }

        impl WireDecode for $ty {
            fn decode(input: &mut IncomingMessage) -> Result<Self, ProtocolError> {
                Ok(<$ty>::from_le_bytes(input.take_array()?))
            }
        }
    )+};
}

le_number!(i8, i16, u16, i32, u32, i64, u64, f32, f64);

// ---------------------------------------------------------------------------
// Strings and byte arrays
// ---------------------------------------------------------------------------

impl WireEncode for str {
    fn encode(&self, out: &mut OutgoingMessage) {
        write_len(out, self.len());
        out.put_slice(self.as_bytes());
    }
}

impl WireEncode for String {
    fn encode(&self, out: &mut OutgoingMessage) {
        self.as_str().encode(out);
    }
}

impl WireDecode for String {
    fn decode(input: &mut IncomingMessage) -> Result<Self, ProtocolError> {
        let len = read_len(input)?;
        let bytes = input.take_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ProtocolError::InvalidString(e.to_string()))
    }
}

impl WireEncode for [u8] {
    fn encode(&self, out: &mut OutgoingMessage) {
        write_len(out, self.len());
        out.put_slice(self);
    }
}

impl WireEncode for Vec<u8> {
    fn encode(&self, out: &mut OutgoingMessage) {
        self.as_slice().encode(out);
    }
}

impl WireDecode for Vec<u8> {
    fn decode(input: &mut IncomingMessage) -> Result<Self, ProtocolError> {
        let len = read_len(input)?;
        Ok(input.take_bytes(len)?.to_vec())
    }
}

impl WireEncode for Bytes {
    fn encode(&self, out: &mut OutgoingMessage) {
        self.as_ref().encode(out);
    }
}

impl WireDecode for Bytes {
    fn decode(input: &mut IncomingMessage) -> Result<Self, ProtocolError> {
        let len = read_len(input)?;
        input.take_bytes(len)
    }
}

// ---------------------------------------------------------------------------
// Homogeneous arrays
// ---------------------------------------------------------------------------

impl WireEncode for [String] {
    fn encode(&self, out: &mut OutgoingMessage) {
        write_len(out, self.len());
        for item in self {
            out.write(item);
        }
    }
}

impl WireEncode for Vec<String> {
    fn encode(&self, out: &mut OutgoingMessage) {
        self.as_slice().encode(out);
    }
}

impl WireDecode for Vec<String> {
    fn decode(input: &mut IncomingMessage) -> Result<Self, ProtocolError> {
        let len = read_len(input)?;
        (0..len).map(|_| input.read()).collect()
    }
}

impl WireEncode for [i32] {
    fn encode(&self, out: &mut OutgoingMessage) {
        write_len(out, self.len());
        for item in self {
            out.write(item);
        }
    }
}

impl WireEncode for Vec<i32> {
    fn encode(&self, out: &mut OutgoingMessage) {
        self.as_slice().encode(out);
    }
}

impl WireDecode for Vec<i32> {
    fn decode(input: &mut IncomingMessage) -> Result<Self, ProtocolError> {
        let len = read_len(input)?;
        (0..len).map(|_| input.read()).collect()
    }
}

// ---------------------------------------------------------------------------
// Vectors, quaternion, matrix
// ---------------------------------------------------------------------------

impl WireEncode for Vec2 {
    fn encode(&self, out: &mut OutgoingMessage) {
        out.write(&self.x).write(&self.y);
    }
}

impl WireDecode for Vec2 {
    fn decode(input: &mut IncomingMessage) -> Result<Self, ProtocolError> {
        Ok(Vec2::new(input.read()?, input.read()?))
    }
}

impl WireEncode for Vec3 {
    fn encode(&self, out: &mut OutgoingMessage) {
        out.write(&self.x).write(&self.y).write(&self.z);
    }
}

impl WireDecode for Vec3 {
    fn decode(input: &mut IncomingMessage) -> Result<Self, ProtocolError> {
        Ok(Vec3::new(input.read()?, input.read()?, input.read()?))
    }
}

impl WireEncode for Vec4 {
    fn encode(&self, out: &mut OutgoingMessage) {
        out.write(&self.x).write(&self.y).write(&self.z).write(&self.w);
    }
}

impl WireDecode for Vec4 {
    fn decode(input: &mut IncomingMessage) -> Result<Self, ProtocolError> {
        Ok(Vec4::new(
            input.read()?,
            input.read()?,
            input.read()?,
            input.read()?,
        ))
    }
}

impl WireEncode for Quat {
    fn encode(&self, out: &mut OutgoingMessage) {
        out.write(&self.x).write(&self.y).write(&self.z).write(&self.w);
    }
}

impl WireDecode for Quat {
    fn decode(input: &mut IncomingMessage) -> Result<Self, ProtocolError> {
        Ok(Quat::from_xyzw(
            input.read()?,
            input.read()?,
            input.read()?,
            input.read()?,
        ))
    }
}

impl WireEncode for Mat4 {
    fn encode(&self, out: &mut OutgoingMessage) {
        // glam stores columns; the wire wants rows.
        for value in self.transpose().to_cols_array() {
            out.write(&value);
        }
    }
}

impl WireDecode for Mat4 {
    fn decode(input: &mut IncomingMessage) -> Result<Self, ProtocolError> {
        let mut rows = [0f32; 16];
        for value in &mut rows {
            *value = input.read()?;
        }
        Ok(Mat4::from_cols_array(&rows).transpose())
    }
}

// ---------------------------------------------------------------------------
// Color
// ---------------------------------------------------------------------------

/// An 8-bit-per-channel RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::new(255, 255, 255, 255);
    pub const BLACK: Color = Color::new(0, 0, 0, 255);
    pub const TRANSPARENT: Color = Color::new(0, 0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

impl WireEncode for Color {
    fn encode(&self, out: &mut OutgoingMessage) {
        out.put_slice(&[self.r, self.g, self.b, self.a]);
    }
}

impl WireDecode for Color {
    fn decode(input: &mut IncomingMessage) -> Result<Self, ProtocolError> {
        let [r, g, b, a] = input.take_array()?;
        Ok(Color { r, g, b, a })
    }
}

// ---------------------------------------------------------------------------
// TimeSpan
// ---------------------------------------------------------------------------

/// How a [`TimeSpan`] is framed. Not carried on the wire: both ends
/// must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimePrecision {
    /// 64-bit count of 100 ns ticks.
    #[default]
    High,
    /// 32-bit count of whole milliseconds.
    Low,
}

/// A signed duration counted in 100 ns ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeSpan {
    ticks: i64,
}

impl TimeSpan {
    pub const TICKS_PER_MILLISECOND: i64 = 10_000;
    pub const TICKS_PER_SECOND: i64 = 10_000_000;
    pub const ZERO: TimeSpan = TimeSpan { ticks: 0 };

    pub const fn from_ticks(ticks: i64) -> Self {
        Self { ticks }
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self {
            ticks: millis.saturating_mul(Self::TICKS_PER_MILLISECOND),
        }
    }

    pub const fn from_secs(secs: i64) -> Self {
        Self {
            ticks: secs.saturating_mul(Self::TICKS_PER_SECOND),
        }
    }

    pub const fn ticks(self) -> i64 {
        self.ticks
    }

    /// Whole milliseconds, truncated toward zero.
    pub const fn as_millis(self) -> i64 {
        self.ticks / Self::TICKS_PER_MILLISECOND
    }

    /// Converts to a [`Duration`]; `None` for negative spans.
    pub fn to_duration(self) -> Option<Duration> {
        let ticks = u64::try_from(self.ticks).ok()?;
        Some(Duration::from_nanos(ticks.saturating_mul(100)))
    }

    /// Writes the span with the given framing.
    ///
    /// Low precision truncates to whole milliseconds and saturates at the
    /// `i32` range.
    pub fn encode_with(&self, out: &mut OutgoingMessage, precision: TimePrecision) {
        match precision {
            TimePrecision::High => {
                out.write(&self.ticks);
            }
            TimePrecision::Low => {
                let millis = self.as_millis().clamp(i64::from(i32::MIN), i64::from(i32::MAX));
                out.write(&(millis as i32));
            }
        }
    }

    /// Reads a span written with the same framing.
    pub fn decode_with(
        input: &mut IncomingMessage,
        precision: TimePrecision,
    ) -> Result<Self, ProtocolError> {
        match precision {
            TimePrecision::High => Ok(Self::from_ticks(input.read()?)),
            TimePrecision::Low => {
                let millis: i32 = input.read()?;
                Ok(Self::from_millis(i64::from(millis)))
            }
        }
    }
}

impl From<Duration> for TimeSpan {
    fn from(duration: Duration) -> Self {
        let ticks = duration.as_nanos() / 100;
        Self::from_ticks(i64::try_from(ticks).unwrap_or(i64::MAX))
    }
}

impl fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.as_millis())
    }
}

impl WireEncode for TimeSpan {
    /// Bare writes use high precision.
    fn encode(&self, out: &mut OutgoingMessage) {
        self.encode_with(out, TimePrecision::High);
    }
}

impl WireDecode for TimeSpan {
    fn decode(input: &mut IncomingMessage) -> Result<Self, ProtocolError> {
        Self::decode_with(input, TimePrecision::High)
    }
}

// ---------------------------------------------------------------------------
// DateTime
// ---------------------------------------------------------------------------

/// A timestamp in the 64-bit binary form: ticks since 0001-01-01 in the
/// low 62 bits, a kind tag in the top two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DateTime {
    binary: i64,
}

impl DateTime {
    /// Ticks from 0001-01-01 to 1970-01-01.
    pub const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;
    const TICKS_MASK: i64 = 0x3FFF_FFFF_FFFF_FFFF;
    const KIND_UTC: i64 = 0x4000_0000_0000_0000;

    /// Wraps a raw binary value.
    pub const fn from_binary(binary: i64) -> Self {
        Self { binary }
    }

    /// A UTC timestamp from the system clock reading.
    pub fn from_system_time(time: SystemTime) -> Self {
        let since_epoch = match time.duration_since(UNIX_EPOCH) {
            Ok(elapsed) => TimeSpan::from(elapsed).ticks(),
            Err(before) => -TimeSpan::from(before.duration()).ticks(),
        };
        let ticks = Self::UNIX_EPOCH_TICKS.saturating_add(since_epoch) & Self::TICKS_MASK;
        Self::from_binary(ticks | Self::KIND_UTC)
    }

    /// The current UTC time.
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    pub const fn to_binary(self) -> i64 {
        self.binary
    }

    /// Ticks since 0001-01-01, kind tag stripped.
    pub const fn ticks(self) -> i64 {
        self.binary & Self::TICKS_MASK
    }

    pub const fn is_utc(self) -> bool {
        self.binary & Self::KIND_UTC != 0
    }
}

impl WireEncode for DateTime {
    fn encode(&self, out: &mut OutgoingMessage) {
        out.write(&self.binary);
    }
}

impl WireDecode for DateTime {
    fn decode(input: &mut IncomingMessage) -> Result<Self, ProtocolError> {
        Ok(Self::from_binary(input.read()?))
    }
}

// ---------------------------------------------------------------------------
// NetworkEndpoint
// ---------------------------------------------------------------------------

/// A host address and port as carried in messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct NetworkEndpoint {
    pub address: String,
    pub port: i32,
}

impl NetworkEndpoint {
    pub fn new(address: impl Into<String>, port: i32) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for NetworkEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

impl WireEncode for NetworkEndpoint {
    fn encode(&self, out: &mut OutgoingMessage) {
        out.write(&self.address).write(&self.port);
    }
}

impl WireDecode for NetworkEndpoint {
    fn decode(input: &mut IncomingMessage) -> Result<Self, ProtocolError> {
        Ok(Self {
            address: input.read()?,
            port: input.read()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reopen(message: OutgoingMessage) -> IncomingMessage {
        IncomingMessage::from(message)
    }

    fn round_trip<T>(value: T) -> T
    where
        T: WireEncode + WireDecode,
    {
        let mut message = OutgoingMessage::data();
        message.write(&value);
        let mut incoming = reopen(message);
        let decoded = incoming.read::<T>().expect("decode");
        assert!(incoming.is_exhausted(), "decoder left bytes behind");
        decoded
    }

    // -----------------------------------------------------------------------
    // Primitives
    // -----------------------------------------------------------------------

    #[test]
    fn test_integer_extremes_round_trip() {
        assert_eq!(round_trip(i32::MIN), i32::MIN);
        assert_eq!(round_trip(-1i32), -1);
        assert_eq!(round_trip(i64::MAX), i64::MAX);
        assert_eq!(round_trip(u16::MAX), u16::MAX);
        assert_eq!(round_trip(0u8), 0);
        assert_eq!(round_trip(-128i8), -128);
    }

    #[test]
    fn test_integers_are_little_endian() {
        let mut message = OutgoingMessage::data();
        message.write(&0x0102_0304i32).write(&0x0506i16);
        assert_eq!(message.as_bytes(), &[0, 4, 3, 2, 1, 6, 5]);
    }

    #[test]
    fn test_bool_is_one_byte() {
        let mut message = OutgoingMessage::data();
        message.write(&true).write(&false);
        assert_eq!(message.as_bytes(), &[0, 1, 0]);
    }

    #[test]
    fn test_float_round_trip_preserves_bits() {
        assert_eq!(round_trip(-0.0f32).to_bits(), (-0.0f32).to_bits());
        assert_eq!(round_trip(f32::MAX), f32::MAX);
        assert_eq!(round_trip(1.5f64), 1.5);
    }

    // -----------------------------------------------------------------------
    // Strings and byte arrays
    // -----------------------------------------------------------------------

    #[test]
    fn test_string_has_i32_length_prefix() {
        let mut message = OutgoingMessage::data();
        message.write("hé");
        assert_eq!(message.as_bytes(), &[0, 3, 0, 0, 0, b'h', 0xC3, 0xA9]);
    }

    #[test]
    fn test_empty_and_long_strings_round_trip() {
        assert_eq!(round_trip(String::new()), "");
        let long = "x".repeat(10_000);
        assert_eq!(round_trip(long.clone()), long);
    }

    #[test]
    fn test_empty_byte_array_decodes_to_empty_vec() {
        let decoded = round_trip(Vec::<u8>::new());
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_negative_length_prefix_is_rejected() {
        let mut message = OutgoingMessage::data();
        message.write(&-5i32);
        let err = reopen(message).read::<Vec<u8>>().unwrap_err();
        assert_eq!(err, ProtocolError::InvalidLength(-5));
    }

    #[test]
    fn test_invalid_utf8_is_rejected() {
        let mut message = OutgoingMessage::data();
        message.write(&[0xFFu8, 0xFE][..]);
        let err = reopen(message).read::<String>().unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidString(_)));
    }

    #[test]
    fn test_truncated_byte_array_fails() {
        let mut message = OutgoingMessage::data();
        message.write(&10i32).write(&1u8);
        let err = reopen(message).read::<Vec<u8>>().unwrap_err();
        assert!(matches!(err, ProtocolError::EndOfMessage { .. }));
    }

    #[test]
    fn test_arrays_round_trip() {
        let names = vec!["a".to_string(), String::new(), "room".to_string()];
        assert_eq!(round_trip(names.clone()), names);
        assert_eq!(round_trip(vec![i32::MIN, 0, 7]), vec![i32::MIN, 0, 7]);
        assert!(round_trip(Vec::<String>::new()).is_empty());
    }

    #[test]
    fn test_unaligned_string_round_trip() {
        let mut message = OutgoingMessage::data();
        message.write_byte_bits(1, 1).unwrap();
        message.write("abc");
        let mut incoming = reopen(message);
        assert_eq!(incoming.read_byte_bits(1).unwrap(), 1);
        assert_eq!(incoming.read::<String>().unwrap(), "abc");
    }

    // -----------------------------------------------------------------------
    // Composites
    // -----------------------------------------------------------------------

    #[test]
    fn test_vectors_and_quaternion_round_trip() {
        assert_eq!(round_trip(Vec2::new(1.0, -2.0)), Vec2::new(1.0, -2.0));
        assert_eq!(round_trip(Vec3::ZERO), Vec3::ZERO);
        let v4 = Vec4::new(f32::MIN, 0.5, 3.0, f32::MAX);
        assert_eq!(round_trip(v4), v4);
        let q = Quat::from_xyzw(0.1, 0.2, 0.3, 0.9);
        assert_eq!(round_trip(q), q);
    }

    #[test]
    fn test_quaternion_field_order_is_xyzw() {
        let mut message = OutgoingMessage::data();
        message.write(&Quat::from_xyzw(1.0, 2.0, 3.0, 4.0));
        let mut incoming = reopen(message);
        let fields: Vec<f32> = (0..4).map(|_| incoming.read().unwrap()).collect();
        assert_eq!(fields, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_matrix_is_row_major() {
        let m = Mat4::from_translation(Vec3::new(7.0, 8.0, 9.0));
        let mut message = OutgoingMessage::data();
        message.write(&m);
        assert_eq!(message.as_bytes().len(), 1 + 16 * 4);

        let mut incoming = reopen(message);
        let values: Vec<f32> = (0..16).map(|_| incoming.read().unwrap()).collect();
        // Row 1 is M11..M14: translation sits in the fourth column.
        assert_eq!(&values[0..4], &[1.0, 0.0, 0.0, 7.0]);
        assert_eq!(round_trip(m), m);
    }

    #[test]
    fn test_color_is_four_bytes_rgba() {
        let mut message = OutgoingMessage::data();
        message.write(&Color::new(1, 2, 3, 4));
        assert_eq!(message.as_bytes(), &[0, 1, 2, 3, 4]);
        assert_eq!(round_trip(Color::WHITE), Color::WHITE);
    }

    #[test]
    fn test_timespan_precisions() {
        let span = TimeSpan::from_ticks(12_345_678);

        let mut message = OutgoingMessage::data();
        span.encode_with(&mut message, TimePrecision::High);
        assert_eq!(message.byte_len(), 1 + 8);
        let decoded =
            TimeSpan::decode_with(&mut reopen(message), TimePrecision::High).unwrap();
        assert_eq!(decoded, span);

        let mut message = OutgoingMessage::data();
        span.encode_with(&mut message, TimePrecision::Low);
        assert_eq!(message.byte_len(), 1 + 4);
        let decoded =
            TimeSpan::decode_with(&mut reopen(message), TimePrecision::Low).unwrap();
        assert_eq!(decoded, TimeSpan::from_millis(1234));
    }

    #[test]
    fn test_timespan_negative_and_duration() {
        assert_eq!(round_trip(TimeSpan::from_millis(-250)).as_millis(), -250);
        assert_eq!(TimeSpan::from_millis(-1).to_duration(), None);
        assert_eq!(
            TimeSpan::from(Duration::from_millis(3)).to_duration(),
            Some(Duration::from_millis(3))
        );
    }

    #[test]
    fn test_datetime_round_trip_and_kind() {
        let epoch = DateTime::from_system_time(UNIX_EPOCH);
        assert_eq!(epoch.ticks(), DateTime::UNIX_EPOCH_TICKS);
        assert!(epoch.is_utc());
        assert_eq!(round_trip(epoch), epoch);
        assert_eq!(round_trip(DateTime::default()), DateTime::default());
    }

    #[test]
    fn test_endpoint_round_trip() {
        let endpoint = NetworkEndpoint::new("10.0.0.1", 7777);
        assert_eq!(endpoint.to_string(), "10.0.0.1:7777");
        assert_eq!(round_trip(endpoint.clone()), endpoint);
    }
}
