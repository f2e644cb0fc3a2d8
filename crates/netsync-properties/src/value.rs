//! Tagged property values.
//!
//! A table stores each key as a [`Value`], which remembers its own type.
//! On the wire a value is `[u8 tag][encoded value]`; the tag is the
//! [`ValueKind`] except for timespans, whose two tags also record the
//! precision they were written with.

use std::fmt;

use bytes::Bytes;
use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
use netsync_protocol::{
    Color, DateTime, IncomingMessage, NetworkEndpoint, NetworkSerializable,
    OutgoingMessage, TimePrecision, TimeSpan,
};

use crate::PropertyError;

/// The type of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    Byte,
    Int32,
    Int64,
    Float,
    String,
    Bytes,
    Vector2,
    Vector3,
    Vector4,
    Quaternion,
    Matrix,
    Color,
    TimeSpan,
    DateTime,
    Endpoint,
    Serializable,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A property value together with its type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Byte(u8),
    Int32(i32),
    Int64(i64),
    Float(f32),
    String(String),
    Bytes(Bytes),
    Vector2(Vec2),
    Vector3(Vec3),
    Vector4(Vec4),
    Quaternion(Quat),
    Matrix(Mat4),
    Color(Color),
    TimeSpan(TimeSpan, TimePrecision),
    DateTime(DateTime),
    Endpoint(NetworkEndpoint),
    /// Fields written by an application [`NetworkSerializable`] type.
    Serializable(Bytes),
}

mod tag {
    pub const BOOL: u8 = 0;
    pub const BYTE: u8 = 1;
    pub const INT32: u8 = 2;
    pub const INT64: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const STRING: u8 = 5;
    pub const BYTES: u8 = 6;
    pub const VECTOR2: u8 = 7;
    pub const VECTOR3: u8 = 8;
    pub const VECTOR4: u8 = 9;
    pub const QUATERNION: u8 = 10;
    pub const MATRIX: u8 = 11;
    pub const COLOR: u8 = 12;
    pub const TIMESPAN_HIGH: u8 = 13;
    pub const TIMESPAN_LOW: u8 = 14;
    pub const DATETIME: u8 = 15;
    pub const ENDPOINT: u8 = 16;
    pub const SERIALIZABLE: u8 = 17;
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Byte(_) => ValueKind::Byte,
            Value::Int32(_) => ValueKind::Int32,
            Value::Int64(_) => ValueKind::Int64,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Vector2(_) => ValueKind::Vector2,
            Value::Vector3(_) => ValueKind::Vector3,
            Value::Vector4(_) => ValueKind::Vector4,
            Value::Quaternion(_) => ValueKind::Quaternion,
            Value::Matrix(_) => ValueKind::Matrix,
            Value::Color(_) => ValueKind::Color,
            Value::TimeSpan(..) => ValueKind::TimeSpan,
            Value::DateTime(_) => ValueKind::DateTime,
            Value::Endpoint(_) => ValueKind::Endpoint,
            Value::Serializable(_) => ValueKind::Serializable,
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Value::Bool(_) => tag::BOOL,
            Value::Byte(_) => tag::BYTE,
            Value::Int32(_) => tag::INT32,
            Value::Int64(_) => tag::INT64,
            Value::Float(_) => tag::FLOAT,
            Value::String(_) => tag::STRING,
            Value::Bytes(_) => tag::BYTES,
            Value::Vector2(_) => tag::VECTOR2,
            Value::Vector3(_) => tag::VECTOR3,
            Value::Vector4(_) => tag::VECTOR4,
            Value::Quaternion(_) => tag::QUATERNION,
            Value::Matrix(_) => tag::MATRIX,
            Value::Color(_) => tag::COLOR,
            Value::TimeSpan(_, TimePrecision::High) => tag::TIMESPAN_HIGH,
            Value::TimeSpan(_, TimePrecision::Low) => tag::TIMESPAN_LOW,
            Value::DateTime(_) => tag::DATETIME,
            Value::Endpoint(_) => tag::ENDPOINT,
            Value::Serializable(_) => tag::SERIALIZABLE,
        }
    }

    /// Writes `[tag][value]`.
    pub fn encode(&self, out: &mut OutgoingMessage) {
        out.write(&self.tag());
        match self {
            Value::Bool(v) => out.write(v),
            Value::Byte(v) => out.write(v),
            Value::Int32(v) => out.write(v),
            Value::Int64(v) => out.write(v),
            Value::Float(v) => out.write(v),
            Value::String(v) => out.write(v),
            Value::Bytes(v) | Value::Serializable(v) => out.write(v),
            Value::Vector2(v) => out.write(v),
            Value::Vector3(v) => out.write(v),
            Value::Vector4(v) => out.write(v),
            Value::Quaternion(v) => out.write(v),
            Value::Matrix(v) => out.write(v),
            Value::Color(v) => out.write(v),
            Value::TimeSpan(v, precision) => {
                v.encode_with(out, *precision);
                out
            }
            Value::DateTime(v) => out.write(v),
            Value::Endpoint(v) => out.write(v),
        };
    }

    /// Reads a value written by [`encode`](Value::encode).
    pub fn decode(input: &mut IncomingMessage) -> Result<Self, PropertyError> {
        let tag: u8 = input.read()?;
        let value = match tag {
            tag::BOOL => Value::Bool(input.read()?),
            tag::BYTE => Value::Byte(input.read()?),
            tag::INT32 => Value::Int32(input.read()?),
            tag::INT64 => Value::Int64(input.read()?),
            tag::FLOAT => Value::Float(input.read()?),
            tag::STRING => Value::String(input.read()?),
            tag::BYTES => Value::Bytes(input.read()?),
            tag::VECTOR2 => Value::Vector2(input.read()?),
            tag::VECTOR3 => Value::Vector3(input.read()?),
            tag::VECTOR4 => Value::Vector4(input.read()?),
            tag::QUATERNION => Value::Quaternion(input.read()?),
            tag::MATRIX => Value::Matrix(input.read()?),
            tag::COLOR => Value::Color(input.read()?),
            tag::TIMESPAN_HIGH => Value::TimeSpan(
                TimeSpan::decode_with(input, TimePrecision::High)?,
                TimePrecision::High,
            ),
            tag::TIMESPAN_LOW => Value::TimeSpan(
                TimeSpan::decode_with(input, TimePrecision::Low)?,
                TimePrecision::Low,
            ),
            tag::DATETIME => Value::DateTime(input.read()?),
            tag::ENDPOINT => Value::Endpoint(input.read()?),
            tag::SERIALIZABLE => Value::Serializable(input.read()?),
            other => return Err(PropertyError::UnknownTag(other)),
        };
        Ok(value)
    }

    /// The value as a standalone `[tag][value]` blob.
    pub fn to_blob(&self) -> Bytes {
        let mut out = OutgoingMessage::data();
        self.encode(&mut out);
        out.into_payload()
    }

    /// Reads a value back from a blob made by [`to_blob`](Value::to_blob).
    pub fn from_blob(blob: &[u8]) -> Result<Self, PropertyError> {
        let mut input = IncomingMessage::from_payload(blob);
        Value::decode(&mut input)
    }
}

/// A Rust type that can live in a property table.
///
/// `Options` carries per-write encoding choices; only [`TimeSpan`] has
/// any.
pub trait PropertyType: Sized + Clone + Default + PartialEq {
    type Options: Copy + Default;

    const KIND: ValueKind;

    fn to_value(&self, options: Self::Options) -> Value;

    /// Extracts the value, or `None` if `value` holds another type.
    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! property_type {
    ($($ty:ty => $variant:ident),+ $(,)?) => {$(
        impl PropertyType for $ty {
            type Options = ();
            const KIND: ValueKind = ValueKind::$variant;

            fn to_value(&self, _: ()) -> Value {
                Value::$variant(self.clone())
            }

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }
    )+};
}

property_type! {
    bool => Bool,
    u8 => Byte,
    i32 => Int32,
    i64 => Int64,
    f32 => Float,
    String => String,
    Bytes => Bytes,
    Vec2 => Vector2,
    Vec3 => Vector3,
    Vec4 => Vector4,
    Quat => Quaternion,
    Mat4 => Matrix,
    Color => Color,
    DateTime => DateTime,
    NetworkEndpoint => Endpoint,
}

impl PropertyType for TimeSpan {
    type Options = TimePrecision;
    const KIND: ValueKind = ValueKind::TimeSpan;

    /// Low precision drops sub-millisecond ticks up front so the local
    /// read matches what peers will decode.
    fn to_value(&self, precision: TimePrecision) -> Value {
        let span = match precision {
            TimePrecision::High => *self,
            TimePrecision::Low => TimeSpan::from_millis(self.as_millis()),
        };
        Value::TimeSpan(span, precision)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::TimeSpan(v, _) => Some(*v),
            _ => None,
        }
    }
}

/// Stores an application type through its [`NetworkSerializable`] impl.
///
/// Equality is the application's own `PartialEq` on `T`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Serializable<T>(pub T);

impl<T> PropertyType for Serializable<T>
where
    T: NetworkSerializable + Clone + Default + PartialEq,
{
    type Options = ();
    const KIND: ValueKind = ValueKind::Serializable;

    fn to_value(&self, _: ()) -> Value {
        let mut out = OutgoingMessage::data();
        self.0.write(&mut out);
        Value::Serializable(out.into_payload())
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Serializable(blob) => {
                let mut input = IncomingMessage::from_payload(blob);
                match T::read(&mut input) {
                    Ok(v) => Some(Serializable(v)),
                    Err(e) => {
                        tracing::warn!(error = %e, "serializable property failed to decode");
                        None
                    }
                }
            }
            _ => None,
        }
    }
}
