//! Event handlers: what runs when an event arrives for a live object.
//!
//! # Handler model
//!
//! Every registered object owns one `Box<dyn EventHandler>`.  When the
//! dispatcher decodes an event it first asks [`EventHandler::handles`]; a
//! handler that declines the event name causes the event to be dropped
//! silently, since most events are optional to observe.
//!
//! Handlers are built from a [`HandlerFactory`] keyed by interface name.  A
//! caller that wants custom behaviour passes an override, which the registry
//! wraps in an [`Overlay`] over the interface's default handler: the
//! override sees every event it handles, the default sees the rest.
//!
//! Handlers that need to report state back to the application (a callback
//! that completed, the list of advertised globals) share it through an
//! `Rc<Cell<_>>` or `Rc<RefCell<_>>` handed out at construction.

pub mod callback;
pub mod display;
pub mod globals;
pub mod listeners;
pub mod ping;

use std::collections::HashMap;

pub use callback::CallbackHandler;
pub use display::DisplayHandler;
pub use globals::{BindPolicy, Global, Globals, GlobalsState};
pub use listeners::Listeners;
pub use ping::PingHandler;

use crate::dispatch::{send_request, WireSink};
use crate::error::{ProtocolError, WlError};
use crate::object::{ObjectId, ObjectRegistry};
use crate::protocol::Protocol;
use crate::wire::Argument;

/// One decoded event addressed to a live object.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub object: ObjectId,
    pub interface: String,
    pub name: String,
    pub opcode: u16,
    pub args: Vec<Argument>,
}

impl Event {
    fn malformed(&self, index: usize, expected: &str) -> ProtocolError {
        ProtocolError::MalformedEvent {
            interface: self.interface.clone(),
            event: self.name.clone(),
            reason: format!("argument {index} is not {expected}"),
        }
    }

    pub fn int(&self, index: usize) -> Result<i32, ProtocolError> {
        self.args
            .get(index)
            .and_then(Argument::as_int)
            .ok_or_else(|| self.malformed(index, "an int"))
    }

    pub fn uint(&self, index: usize) -> Result<u32, ProtocolError> {
        self.args
            .get(index)
            .and_then(Argument::as_uint)
            .ok_or_else(|| self.malformed(index, "a uint"))
    }

    /// A string argument; a null string reads as `""`.
    pub fn string(&self, index: usize) -> Result<&str, ProtocolError> {
        match self.args.get(index) {
            Some(Argument::String(value)) => Ok(value.as_deref().unwrap_or("")),
            _ => Err(self.malformed(index, "a string")),
        }
    }

    /// An object or new_id argument; `None` for a null reference.
    pub fn object(&self, index: usize) -> Result<Option<ObjectId>, ProtocolError> {
        match self.args.get(index) {
            Some(arg @ (Argument::Object(_) | Argument::NewId(_) | Argument::NewDynamic { .. })) => {
                Ok(arg.as_object())
            }
            _ => Err(self.malformed(index, "an object")),
        }
    }
}

/// What a handler may touch while it runs.
///
/// The handler itself is detached from the registry for the duration of the
/// call, so it may freely create, look up, or delete other objects.
pub struct EventContext<'a> {
    pub protocol: &'a Protocol,
    pub registry: &'a mut ObjectRegistry,
    pub sink: &'a mut dyn WireSink,
}

impl EventContext<'_> {
    /// Sends a request from inside a handler.  See [`send_request`].
    ///
    /// # Errors
    ///
    /// Propagates every error of [`send_request`].
    pub fn send_request(
        &mut self,
        object: ObjectId,
        request: &str,
        args: Vec<Argument>,
        handler: Option<Box<dyn EventHandler>>,
    ) -> Result<Option<ObjectId>, WlError> {
        send_request(
            self.protocol,
            self.registry,
            self.sink,
            object,
            request,
            args,
            handler,
        )
    }
}

/// Per-object event handling capability.
pub trait EventHandler {
    /// Whether this handler wants `event`.  Declined events are discarded.
    fn handles(&self, event: &str) -> bool {
        let _ = event;
        true
    }

    /// Handles one event.  Returning a fatal error tears the connection down.
    fn on_event(&mut self, event: &Event, ctx: &mut EventContext<'_>) -> Result<(), WlError> {
        let _ = (event, ctx);
        Ok(())
    }
}

/// Handler that observes nothing; the default for interfaces without one.
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl EventHandler for Discard {
    fn handles(&self, _event: &str) -> bool {
        false
    }
}

/// Explicit delegation: `custom` first, `base` for whatever `custom` declines.
pub struct Overlay {
    custom: Box<dyn EventHandler>,
    base: Box<dyn EventHandler>,
}

impl Overlay {
    pub fn new(custom: Box<dyn EventHandler>, base: Box<dyn EventHandler>) -> Self {
        Self { custom, base }
    }
}

impl EventHandler for Overlay {
    fn handles(&self, event: &str) -> bool {
        self.custom.handles(event) || self.base.handles(event)
    }

    fn on_event(&mut self, event: &Event, ctx: &mut EventContext<'_>) -> Result<(), WlError> {
        if self.custom.handles(&event.name) {
            self.custom.on_event(event, ctx)
        } else {
            self.base.on_event(event, ctx)
        }
    }
}

type Constructor = Box<dyn Fn() -> Box<dyn EventHandler>>;

/// Table from interface name to the constructor of its default handler.
pub struct HandlerFactory {
    constructors: HashMap<String, Constructor>,
}

impl Default for HandlerFactory {
    /// The built-in handlers: `wl_display` and `xdg_wm_base`.
    fn default() -> Self {
        let mut factory = Self::empty();
        factory.register("wl_display", || Box::new(DisplayHandler));
        factory.register("xdg_wm_base", || Box::new(PingHandler));
        factory
    }
}

impl HandlerFactory {
    /// A factory with no registrations; every object gets [`Discard`].
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Sets the default handler constructor for `interface`, replacing any
    /// earlier one.
    pub fn register<F>(&mut self, interface: &str, constructor: F)
    where
        F: Fn() -> Box<dyn EventHandler> + 'static,
    {
        self.constructors
            .insert(interface.to_string(), Box::new(constructor));
    }

    pub fn is_registered(&self, interface: &str) -> bool {
        self.constructors.contains_key(interface)
    }

    /// Builds the handler for a new object, wrapping `custom` over the
    /// default when given.
    pub fn build(
        &self,
        interface: &str,
        custom: Option<Box<dyn EventHandler>>,
    ) -> Box<dyn EventHandler> {
        let base = self
            .constructors
            .get(interface)
            .map_or_else(|| Box::new(Discard) as Box<dyn EventHandler>, |ctor| ctor());
        match custom {
            Some(custom) => Box::new(Overlay::new(custom, base)),
            None => base,
        }
    }
}

impl std::fmt::Debug for HandlerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.constructors.keys().collect();
        names.sort();
        f.debug_struct("HandlerFactory")
            .field("interfaces", &names)
            .finish()
    }
}
