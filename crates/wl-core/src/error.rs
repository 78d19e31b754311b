//! Error taxonomy for the protocol core.
//!
//! Four classes of failure exist, and they differ in what the caller may do
//! afterwards:
//!
//! | class             | raised by                              | connection usable after? |
//! |-------------------|----------------------------------------|--------------------------|
//! | [`SchemaError`]   | schema loading, listener registration  | yes                      |
//! | [`ArgumentError`] | request encoding, value range checks   | yes                      |
//! | [`ResourceError`] | id exhaustion, missing fds             | yes                      |
//! | [`ProtocolError`] | event routing, peer fatal error        | **no**                   |
//!
//! A partial frame is never an error: the dispatcher simply waits for more
//! bytes.

use thiserror::Error;

use crate::protocol::ArgType;
use crate::wire::Underrun;

/// The schema description is malformed or inconsistent.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchemaError {
    /// The description text could not be parsed (TOML or JSON).
    #[error("failed to parse protocol description: {0}")]
    Parse(String),

    /// No interface with this name has been loaded.
    #[error("unknown interface: {0}")]
    UnknownInterface(String),

    /// The interface has no event with this name.
    #[error("interface {interface} has no event \"{event}\"")]
    UnknownEvent { interface: String, event: String },

    /// Two requests (or two events) of one interface share a name.
    #[error("interface {interface} declares \"{name}\" twice")]
    DuplicateMessage { interface: String, name: String },

    /// An explicit opcode disagrees with the message's position.
    #[error("interface {interface}: \"{name}\" declares opcode {declared} but sits at position {position}")]
    ConflictingOpcode {
        interface: String,
        name: String,
        declared: u16,
        position: u16,
    },

    /// An interface declares a version of zero.
    #[error("interface {0} has version 0")]
    ZeroVersion(String),
}

/// The peer violated the protocol or reported a fatal error.
///
/// Every variant is connection-fatal; no recovery is attempted.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// An event was addressed to an object id that is not registered.
    #[error("event for unknown object 0x{0:08x}")]
    UnknownObject(u32),

    /// The received opcode has no event in the object's interface.
    #[error("interface {interface} has no event with opcode {opcode}")]
    UnknownOpcode { interface: String, opcode: u16 },

    /// The object's interface is not present in the schema table.
    #[error("object 0x{object_id:08x} uses interface {interface} which is not loaded")]
    UnknownInterface { object_id: u32, interface: String },

    /// The event name is guarded and may not be routed to a handler.
    #[error("event {interface}.{event} is not dispatchable")]
    ForbiddenEvent { interface: String, event: String },

    /// The frame header declares a size smaller than the header itself.
    #[error("frame for object 0x{object_id:08x} declares invalid size {size}")]
    InvalidFrameSize { object_id: u32, size: u16 },

    /// The event body does not match the argument layout of its spec.
    #[error("malformed event {interface}.{event}: {reason}")]
    MalformedEvent {
        interface: String,
        event: String,
        reason: String,
    },

    /// An event's new_id names an id that is already live.
    #[error("event {interface}.{event} creates object 0x{id:08x}, which is already in use")]
    NewIdInUse {
        interface: String,
        event: String,
        id: u32,
    },

    /// The receive buffer was read past its end.  The dispatcher checks
    /// lengths first, so this indicates a framing bug.
    #[error("receive buffer underrun: {0}")]
    Underrun(#[from] Underrun),

    /// The peer sent the protocol's fatal error event.
    #[error("fatal error event received: object = 0x{object_id:08x}({interface}), code = {code}, {message}")]
    Fatal {
        object_id: u32,
        interface: String,
        code: u32,
        message: String,
    },
}

/// A value handed to (or decoded by) the codec does not fit its declared type.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ArgumentError {
    /// The interface has no request with this name.
    #[error("interface {interface} has no request \"{request}\"")]
    UnknownRequest { interface: String, request: String },

    /// The caller passed the wrong number of arguments.
    #[error("{request}: expected {expected} arguments, got {got}")]
    Count {
        request: String,
        expected: usize,
        got: usize,
    },

    /// An argument value has the wrong variant for its declared type.
    #[error("{request}.{arg}: expected {expected:?}, got {got}")]
    Type {
        request: String,
        arg: String,
        expected: ArgType,
        got: &'static str,
    },

    /// A null object was passed where the schema forbids it.
    #[error("{request}.{arg}: null is not allowed")]
    NullNotAllowed { request: String, arg: String },

    /// A numeric value is outside the representable range of its wire type.
    #[error("{arg}: value {value} is out of range")]
    OutOfRange { arg: String, value: String },

    /// A string or array is too long to frame.
    #[error("message too large: {size} bytes exceeds the 65535-byte frame limit")]
    FrameTooLarge { size: usize },

    /// The target object is not registered.
    #[error("no live object with id 0x{0:08x}")]
    NoSuchObject(u32),

    /// The request needs a newer interface version than the object was bound with.
    #[error("{interface}.{request} requires version {since}, object has version {version}")]
    VersionTooLow {
        interface: String,
        request: String,
        since: u32,
        version: u32,
    },
}

/// A finite resource ran out.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResourceError {
    /// Every client-side object id is in use.
    #[error("object id space exhausted")]
    IdSpaceExhausted,

    /// An fd-typed argument was decoded but no descriptor was queued.
    #[error("event {0} expects a file descriptor but none was received")]
    MissingFd(String),

    /// The server tried to bind an id that is already live.
    #[error("object id 0x{0:08x} is already in use")]
    IdInUse(u32),

    /// The id lies outside the allocator's range.
    #[error("object id 0x{0:08x} is outside the allocatable range")]
    IdOutOfRange(u32),
}

/// Top-level error for every fallible core operation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum WlError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Argument(#[from] ArgumentError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    /// Writing a frame to the outbound sink failed.
    #[error("failed to transmit frame: {0}")]
    Transmit(String),
}

impl WlError {
    /// Returns `true` when the connection must be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WlError::Protocol(_) | WlError::Transmit(_))
    }
}
