//! Typed argument encoding and decoding.
//!
//! | type            | wire                                   | [`Argument`]            |
//! |-----------------|----------------------------------------|-------------------------|
//! | int / uint      | 4 bytes                                | `Int` / `Uint`          |
//! | fixed           | 4 bytes, value × 256                   | `Fixed`                 |
//! | object          | 4-byte id, 0 = null                    | `Object(Option<_>)`     |
//! | new_id (typed)  | 4-byte id                              | `NewId`                 |
//! | new_id (untyped)| string interface, uint version, id     | `NewDynamic`            |
//! | string          | uint length incl. NUL, bytes, NUL, pad | `String(Option<_>)`     |
//! | array           | uint length, bytes, pad                | `Array`                 |
//! | fd              | nothing in-band                        | `Fd`                    |

use std::collections::VecDeque;
use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd, RawFd};

use thiserror::Error;

use crate::error::ArgumentError;
use crate::object::ObjectId;
use crate::protocol::{ArgSpec, ArgType};
use crate::wire::{padded_len, Fixed, HEADER_SIZE, MAX_FRAME_SIZE};

/// One decoded or to-be-encoded argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Int(i32),
    Uint(u32),
    Fixed(Fixed),
    Object(Option<ObjectId>),
    NewId(ObjectId),
    /// An untyped new_id: the interface travels on the wire.  When sending,
    /// `id` is filled in by the request path.
    NewDynamic {
        interface: String,
        version: u32,
        id: Option<ObjectId>,
    },
    String(Option<String>),
    Array(Vec<u8>),
    Fd(RawFd),
}

impl Argument {
    /// Convenience constructor for `Argument::String(Some(..))`.
    pub fn string(value: impl Into<String>) -> Self {
        Argument::String(Some(value.into()))
    }

    /// An untyped new_id to be allocated by the request path.
    pub fn new_dynamic(interface: impl Into<String>, version: u32) -> Self {
        Argument::NewDynamic {
            interface: interface.into(),
            version,
            id: None,
        }
    }

    /// Short variant name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Argument::Int(_) => "int",
            Argument::Uint(_) => "uint",
            Argument::Fixed(_) => "fixed",
            Argument::Object(_) => "object",
            Argument::NewId(_) => "new_id",
            Argument::NewDynamic { .. } => "dynamic new_id",
            Argument::String(_) => "string",
            Argument::Array(_) => "array",
            Argument::Fd(_) => "fd",
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Argument::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u32> {
        match self {
            Argument::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_fixed(&self) -> Option<Fixed> {
        match self {
            Argument::Fixed(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Argument::Object(id) => *id,
            Argument::NewId(id) => Some(*id),
            Argument::NewDynamic { id, .. } => *id,
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Argument::String(Some(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[u8]> {
        match self {
            Argument::Array(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_fd(&self) -> Option<RawFd> {
        match self {
            Argument::Fd(fd) => Some(*fd),
            _ => None,
        }
    }
}

// ── Header ────────────────────────────────────────────────────────────────────

/// The 8-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub object_id: u32,
    pub opcode: u16,
    /// Total frame size including the header.
    pub size: u16,
}

impl MessageHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&self.object_id.to_le_bytes());
        let word = (u32::from(self.size) << 16) | u32::from(self.opcode);
        out[4..].copy_from_slice(&word.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Self {
        let object_id = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let word = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Self {
            object_id,
            opcode: (word & 0xFFFF) as u16,
            size: (word >> 16) as u16,
        }
    }
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// A fully framed message ready for a single `sendmsg`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMessage {
    pub bytes: Vec<u8>,
    /// Descriptors for the ancillary block, in argument order.
    pub fds: Vec<RawFd>,
}

/// Encodes one message for `object`.
///
/// `args` must line up one-to-one with `specs`; typed new_ids are expected
/// to be present as [`Argument::NewId`] by this point.  `message` names the
/// request in error reports.
///
/// # Errors
///
/// Returns [`ArgumentError`] on a count or type mismatch, a null passed
/// where the schema forbids it, a string with an interior NUL, or a frame
/// larger than 65535 bytes.
pub fn encode_message(
    object: ObjectId,
    opcode: u16,
    message: &str,
    specs: &[ArgSpec],
    args: &[Argument],
) -> Result<EncodedMessage, ArgumentError> {
    if specs.len() != args.len() {
        return Err(ArgumentError::Count {
            request: message.to_string(),
            expected: specs.len(),
            got: args.len(),
        });
    }

    let mut bytes = vec![0u8; HEADER_SIZE];
    let mut fds = Vec::new();
    for (spec, arg) in specs.iter().zip(args) {
        encode_arg(message, spec, arg, &mut bytes, &mut fds)?;
    }

    if bytes.len() > MAX_FRAME_SIZE {
        return Err(ArgumentError::FrameTooLarge { size: bytes.len() });
    }
    let header = MessageHeader {
        object_id: object.raw(),
        opcode,
        size: bytes.len() as u16,
    };
    bytes[..HEADER_SIZE].copy_from_slice(&header.encode());
    Ok(EncodedMessage { bytes, fds })
}

fn encode_arg(
    message: &str,
    spec: &ArgSpec,
    arg: &Argument,
    out: &mut Vec<u8>,
    fds: &mut Vec<RawFd>,
) -> Result<(), ArgumentError> {
    let mismatch = || ArgumentError::Type {
        request: message.to_string(),
        arg: spec.name.clone(),
        expected: spec.arg_type,
        got: arg.kind(),
    };
    let null = || ArgumentError::NullNotAllowed {
        request: message.to_string(),
        arg: spec.name.clone(),
    };

    match (spec.arg_type, arg) {
        (ArgType::Int, Argument::Int(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (ArgType::Uint, Argument::Uint(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (ArgType::Fixed, Argument::Fixed(v)) => out.extend_from_slice(&v.raw().to_le_bytes()),
        (ArgType::Object, Argument::Object(id)) => {
            if id.is_none() && !spec.allow_null {
                return Err(null());
            }
            out.extend_from_slice(&id.map_or(0, ObjectId::raw).to_le_bytes());
        }
        (ArgType::NewId, Argument::NewId(id)) if spec.interface.is_some() => {
            out.extend_from_slice(&id.raw().to_le_bytes());
        }
        (
            ArgType::NewId,
            Argument::NewDynamic {
                interface,
                version,
                id: Some(id),
            },
        ) if spec.interface.is_none() => {
            write_string(&spec.name, Some(interface), out)?;
            out.extend_from_slice(&version.to_le_bytes());
            out.extend_from_slice(&id.raw().to_le_bytes());
        }
        (ArgType::String, Argument::String(value)) => {
            if value.is_none() && !spec.allow_null {
                return Err(null());
            }
            write_string(&spec.name, value.as_deref(), out)?;
        }
        (ArgType::Array, Argument::Array(bytes)) => write_blob(bytes, out),
        (ArgType::Fd, Argument::Fd(fd)) => fds.push(*fd),
        _ => return Err(mismatch()),
    }
    Ok(())
}

fn write_string(arg: &str, value: Option<&str>, out: &mut Vec<u8>) -> Result<(), ArgumentError> {
    let Some(value) = value else {
        out.extend_from_slice(&0u32.to_le_bytes());
        return Ok(());
    };
    if value.as_bytes().contains(&0) {
        return Err(ArgumentError::OutOfRange {
            arg: arg.to_string(),
            value: format!("{value:?} (interior NUL)"),
        });
    }
    let len = value.len() + 1;
    if len > MAX_FRAME_SIZE {
        return Err(ArgumentError::FrameTooLarge { size: len });
    }
    out.extend_from_slice(&(len as u32).to_le_bytes());
    out.extend_from_slice(value.as_bytes());
    out.resize(out.len() + padded_len(len) - value.len(), 0);
    Ok(())
}

fn write_blob(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
    out.resize(out.len() + padded_len(bytes.len()) - bytes.len(), 0);
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Why an event body could not be decoded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("body truncated: need {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("argument {0}: string is not NUL-terminated")]
    Unterminated(String),
    #[error("argument {0}: string is not valid UTF-8")]
    InvalidUtf8(String),
    #[error("argument {0}: new_id must not be null")]
    NullNewId(String),
    #[error("argument {0}: no file descriptor queued")]
    MissingFd(String),
    #[error("{0} bytes left over after the last argument")]
    TrailingBytes(usize),
}

/// Cursor over an event body.
#[derive(Debug)]
pub struct WireReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::Truncated {
                offset: self.offset,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.bytes[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        self.read_u32().map(|v| v as i32)
    }

    /// Reads a length-prefixed, padded blob and returns its unpadded bytes,
    /// or `None` for a zero length.
    fn read_blob(&mut self) -> Result<Option<&'a [u8]>, DecodeError> {
        let len = self.read_u32()? as usize;
        if len == 0 {
            return Ok(None);
        }
        let padded = self.take(padded_len(len))?;
        Ok(Some(&padded[..len]))
    }

    fn read_string(&mut self, arg: &str) -> Result<Option<String>, DecodeError> {
        let Some(raw) = self.read_blob()? else {
            return Ok(None);
        };
        let Some((&0, text)) = raw.split_last() else {
            return Err(DecodeError::Unterminated(arg.to_string()));
        };
        String::from_utf8(text.to_vec())
            .map(Some)
            .map_err(|_| DecodeError::InvalidUtf8(arg.to_string()))
    }
}

/// Decodes every argument of an event body.
///
/// fd-typed args take the next descriptor from `fds` in FIFO order and
/// release it as a [`RawFd`]: the receiver of the decoded event owns it from
/// then on.  Object ids are returned as-is; resolving them against the registry is
/// the dispatcher's job.
///
/// # Errors
///
/// Returns [`DecodeError`] if the body is shorter or longer than its
/// layout, a string is malformed, or an fd is expected but none is queued.
/// On error every fd already taken from `fds` is closed.
pub fn decode_args(
    specs: &[ArgSpec],
    body: &[u8],
    fds: &mut VecDeque<OwnedFd>,
) -> Result<Vec<Argument>, DecodeError> {
    let mut reader = WireReader::new(body);
    let mut args = Vec::with_capacity(specs.len());
    for spec in specs {
        match decode_arg(spec, &mut reader, fds) {
            Ok(arg) => args.push(arg),
            Err(err) => {
                close_fds(&args);
                return Err(err);
            }
        }
    }
    if reader.remaining() > 0 {
        close_fds(&args);
        return Err(DecodeError::TrailingBytes(reader.remaining()));
    }
    Ok(args)
}

fn close_fds(args: &[Argument]) {
    for fd in args.iter().filter_map(Argument::as_fd) {
        // SAFETY: the fd was popped from an owned queue in this call and has
        // not been handed to anyone else.
        drop(unsafe { OwnedFd::from_raw_fd(fd) });
    }
}

fn decode_arg(
    spec: &ArgSpec,
    reader: &mut WireReader<'_>,
    fds: &mut VecDeque<OwnedFd>,
) -> Result<Argument, DecodeError> {
    let arg = match spec.arg_type {
        ArgType::Int => Argument::Int(reader.read_i32()?),
        ArgType::Uint => Argument::Uint(reader.read_u32()?),
        ArgType::Fixed => Argument::Fixed(Fixed::from_raw(reader.read_i32()?)),
        ArgType::Object => Argument::Object(ObjectId::new(reader.read_u32()?)),
        ArgType::NewId if spec.interface.is_some() => Argument::NewId(
            ObjectId::new(reader.read_u32()?)
                .ok_or_else(|| DecodeError::NullNewId(spec.name.clone()))?,
        ),
        ArgType::NewId => {
            let interface = reader.read_string(&spec.name)?.unwrap_or_default();
            let version = reader.read_u32()?;
            let id = ObjectId::new(reader.read_u32()?)
                .ok_or_else(|| DecodeError::NullNewId(spec.name.clone()))?;
            Argument::NewDynamic {
                interface,
                version,
                id: Some(id),
            }
        }
        ArgType::String => Argument::String(reader.read_string(&spec.name)?),
        ArgType::Array => Argument::Array(reader.read_blob()?.unwrap_or_default().to_vec()),
        ArgType::Fd => Argument::Fd(
            fds.pop_front()
                .ok_or_else(|| DecodeError::MissingFd(spec.name.clone()))?
                .into_raw_fd(),
        ),
    };
    Ok(arg)
}
