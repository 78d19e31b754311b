//! # wl-core
//!
//! Protocol core for a client of a Wayland-style object protocol: the schema
//! model, the binary wire codec, object-id allocation, and event dispatch.
//!
//! This crate never opens a socket.  Outgoing frames are handed to a
//! [`WireSink`]; incoming bytes and file descriptors are pushed into a
//! [`Dispatcher`].  The `wl-client` crate supplies the Unix-socket side.
//!
//! # Architecture overview (for beginners)
//!
//! The protocol is object-oriented over a byte stream.  Each side names
//! objects by 32-bit ids; a message is "call request N on object X with these
//! arguments" (client to server) or "event N happened on object X" (server to
//! client).  What the arguments mean is defined by a schema.
//!
//! - **`protocol`** – Interfaces, their requests, events, and enums, loaded
//!   from a TOML or JSON description into an immutable table.  A built-in
//!   core schema covers the display, registry, compositor, shm, seat, output,
//!   and xdg-shell interfaces.
//!
//! - **`wire`** – The frame header, typed argument encoding/decoding, 24.8
//!   fixed-point numbers, and a circular receive buffer that tolerates
//!   frames split across reads.
//!
//! - **`object`** – The id allocator (free runs plus a recently-freed cache)
//!   and the registry mapping each live id to its interface and handler.
//!
//! - **`handler`** – The per-object [`EventHandler`] capability, closure
//!   listeners, and the built-in handlers for the display, callbacks, the
//!   global registry, and xdg_wm_base pings.
//!
//! - **`dispatch`** – The framing state machine that turns bytes into routed
//!   events, and the request path that allocates new ids, encodes, and sends.

pub mod dispatch;
pub mod error;
pub mod handler;
pub mod object;
pub mod protocol;
pub mod wire;

pub use dispatch::{send_request, Dispatcher, WireSink};
pub use error::{ArgumentError, ProtocolError, ResourceError, SchemaError, WlError};
pub use handler::{
    BindPolicy, CallbackHandler, Event, EventContext, EventHandler, Globals, GlobalsState,
    HandlerFactory, Listeners, Overlay,
};
pub use object::{FreeList, ObjectId, ObjectRegistry};
pub use protocol::{InterfaceSpec, Protocol, ProtocolDescription};
pub use wire::{Argument, EncodedMessage, Fixed, MessageBuffer};
