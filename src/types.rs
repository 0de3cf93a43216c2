//! Request arguments and response values exchanged with an SSDB server.
//!
//! Requests are a command name plus an ordered list of [`Arg`]s; each scalar
//! argument becomes one frame on the wire and a [`Arg::List`] expands into one
//! frame per element. Responses carry a [`Status`] and the raw payload frames,
//! which the accessors on [`Response`] convert into typed values.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};

/// A single command argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// UTF-8 text
    Str(String),
    /// Binary blob, copied verbatim
    Bytes(Bytes),
    /// Signed integer, written in base 10
    Int(i64),
    /// Unsigned integer, written in base 10
    UInt(u64),
    /// Float, written with six fixed decimals
    Float(f64),
    /// Boolean, written as `1` or `0`
    Bool(bool),
    /// Empty frame
    Nil,
    /// Sequence of scalars expanded positionally, one frame each
    List(Vec<Arg>),
}

impl Arg {
    /// Build a list argument from any iterator of convertible values
    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Arg>,
    {
        Arg::List(items.into_iter().map(Into::into).collect())
    }

    /// Human-readable name of the argument kind
    pub fn kind(&self) -> &'static str {
        match self {
            Arg::Str(_) => "str",
            Arg::Bytes(_) => "bytes",
            Arg::Int(_) => "int",
            Arg::UInt(_) => "uint",
            Arg::Float(_) => "float",
            Arg::Bool(_) => "bool",
            Arg::Nil => "nil",
            Arg::List(_) => "list",
        }
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Str(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Str(s)
    }
}

impl From<&String> for Arg {
    fn from(s: &String) -> Self {
        Arg::Str(s.clone())
    }
}

impl From<Bytes> for Arg {
    fn from(b: Bytes) -> Self {
        Arg::Bytes(b)
    }
}

impl From<Vec<u8>> for Arg {
    fn from(b: Vec<u8>) -> Self {
        Arg::Bytes(Bytes::from(b))
    }
}

impl From<&[u8]> for Arg {
    fn from(b: &[u8]) -> Self {
        Arg::Bytes(Bytes::copy_from_slice(b))
    }
}

impl<const N: usize> From<&[u8; N]> for Arg {
    fn from(b: &[u8; N]) -> Self {
        Arg::Bytes(Bytes::copy_from_slice(b))
    }
}

macro_rules! impl_from_signed {
    ($($t:ty),*) => {
        $(impl From<$t> for Arg {
            fn from(i: $t) -> Self {
                Arg::Int(i as i64)
            }
        })*
    };
}

macro_rules! impl_from_unsigned {
    ($($t:ty),*) => {
        $(impl From<$t> for Arg {
            fn from(i: $t) -> Self {
                Arg::UInt(i as u64)
            }
        })*
    };
}

impl_from_signed!(i8, i16, i32, i64, isize);
impl_from_unsigned!(u8, u16, u32, u64, usize);

impl From<f32> for Arg {
    fn from(f: f32) -> Self {
        Arg::Float(f as f64)
    }
}

impl From<f64> for Arg {
    fn from(f: f64) -> Self {
        Arg::Float(f)
    }
}

impl From<bool> for Arg {
    fn from(b: bool) -> Self {
        Arg::Bool(b)
    }
}

impl From<()> for Arg {
    fn from(_: ()) -> Self {
        Arg::Nil
    }
}

impl<T: Into<Arg>> From<Option<T>> for Arg {
    fn from(value: Option<T>) -> Self {
        value.map_or(Arg::Nil, Into::into)
    }
}

impl From<Vec<String>> for Arg {
    fn from(items: Vec<String>) -> Self {
        Arg::list(items)
    }
}

impl From<Vec<&str>> for Arg {
    fn from(items: Vec<&str>) -> Self {
        Arg::list(items)
    }
}

impl From<&[&str]> for Arg {
    fn from(items: &[&str]) -> Self {
        Arg::list(items.iter().copied())
    }
}

impl From<Vec<Arg>> for Arg {
    fn from(items: Vec<Arg>) -> Self {
        Arg::List(items)
    }
}

/// Build a `Vec<Arg>` from heterogeneous values.
///
/// ```
/// use ssdb_client::{args, Arg};
///
/// let args = args!["k", 10i64, 1.5, true];
/// assert_eq!(args[1], Arg::Int(10));
/// assert_eq!(args.len(), 4);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::Arg>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        vec![$($crate::Arg::from($arg)),+]
    };
}

/// Response status, taken from the first frame of every response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// `ok`
    Ok,
    /// `not_found`
    NotFound,
    /// `error`
    Error,
    /// `fail`
    Fail,
    /// `client_error`
    ClientError,
    /// Anything else
    Undefined,
}

impl Status {
    /// Map a status frame to its status
    pub fn from_frame(frame: &[u8]) -> Self {
        match frame {
            b"ok" => Status::Ok,
            b"not_found" => Status::NotFound,
            b"error" => Status::Error,
            b"fail" => Status::Fail,
            b"client_error" => Status::ClientError,
            _ => Status::Undefined,
        }
    }

    /// Wire spelling of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::NotFound => "not_found",
            Status::Error => "error",
            Status::Fail => "fail",
            Status::ClientError => "client_error",
            Status::Undefined => "undefined",
        }
    }

    /// `ok`
    pub fn is_ok(&self) -> bool {
        *self == Status::Ok
    }

    /// `not_found`
    pub fn is_not_found(&self) -> bool {
        *self == Status::NotFound
    }

    /// `error`
    pub fn is_error(&self) -> bool {
        *self == Status::Error
    }

    /// `fail`
    pub fn is_fail(&self) -> bool {
        *self == Status::Fail
    }

    /// `client_error`
    pub fn is_client_error(&self) -> bool {
        *self == Status::ClientError
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded response: status plus payload frames in wire order.
///
/// The driver never interprets the payload; the accessors below are pure
/// conversions for the common shapes (single scalar, flat list, key/value
/// pairs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response status
    pub status: Status,
    /// Payload frames after the status
    pub data: Vec<Bytes>,
}

impl Response {
    /// Create a new response
    pub fn new(status: Status, data: Vec<Bytes>) -> Self {
        Self { status, data }
    }

    /// Check if the response indicates success
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// Check if the key was missing
    pub fn is_not_found(&self) -> bool {
        self.status.is_not_found()
    }

    /// All payload frames
    pub fn data(&self) -> &[Bytes] {
        &self.data
    }

    /// First payload frame, if any
    pub fn first(&self) -> Option<&Bytes> {
        self.data.first()
    }

    /// First payload frame as raw bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.first().map(|b| b.as_ref())
    }

    /// First payload frame as UTF-8 text
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// First payload frame as lossy UTF-8 text
    pub fn as_string(&self) -> Option<String> {
        self.as_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// First payload frame parsed as a signed integer
    pub fn as_i64(&self) -> Option<i64> {
        self.as_str().and_then(|s| s.parse().ok())
    }

    /// First payload frame parsed as an unsigned integer
    pub fn as_u64(&self) -> Option<u64> {
        self.as_str().and_then(|s| s.parse().ok())
    }

    /// First payload frame parsed as a float
    pub fn as_f64(&self) -> Option<f64> {
        self.as_str().and_then(|s| s.parse().ok())
    }

    /// First payload frame parsed as a boolean (`1`, `t`, `true`, `0`, `f`, `false`)
    pub fn as_bool(&self) -> Option<bool> {
        let text = self.as_str()?;
        match text.to_ascii_lowercase().as_str() {
            "1" | "t" | "true" => Some(true),
            "0" | "f" | "false" => Some(false),
            _ => None,
        }
    }

    /// Every payload frame as lossy UTF-8 text
    pub fn strings(&self) -> Vec<String> {
        self.data
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect()
    }

    /// Payload read as alternating key/value frames, in wire order.
    ///
    /// A trailing unpaired frame is ignored.
    pub fn key_values(&self) -> Vec<(String, String)> {
        self.data
            .chunks_exact(2)
            .map(|pair| {
                (
                    String::from_utf8_lossy(&pair[0]).into_owned(),
                    String::from_utf8_lossy(&pair[1]).into_owned(),
                )
            })
            .collect()
    }

    /// Payload read as alternating key/value frames, collected into a map
    pub fn to_map(&self) -> HashMap<String, String> {
        self.key_values().into_iter().collect()
    }
}

impl Serialize for Response {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Response", 2)?;
        state.serialize_field("status", &self.status)?;
        state.serialize_field("data", &self.strings())?;
        state.end()
    }
}
