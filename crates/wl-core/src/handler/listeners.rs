//! Closure-per-event handlers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{SchemaError, WlError};
use crate::handler::{Event, EventContext, EventHandler};
use crate::protocol::{InterfaceSpec, Protocol};

type Listener = Box<dyn FnMut(&Event, &mut EventContext<'_>) -> Result<(), WlError>>;

/// An [`EventHandler`] assembled from closures, one per event name.
///
/// ```
/// use wl_core::handler::Listeners;
/// use wl_core::protocol::Protocol;
///
/// let protocol = Protocol::core().unwrap();
/// let listeners = Listeners::for_interface(&protocol, "wl_output")
///     .unwrap()
///     .on("done", |_event, _ctx| Ok(()))
///     .unwrap();
/// assert!(Listeners::for_interface(&protocol, "wl_output")
///     .unwrap()
///     .on("no_such_event", |_, _| Ok(()))
///     .is_err());
/// # drop(listeners);
/// ```
#[derive(Default)]
pub struct Listeners {
    interface: Option<Arc<InterfaceSpec>>,
    listeners: HashMap<String, Listener>,
}

impl Listeners {
    /// Listeners with no event-name validation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Listeners whose [`on`](Self::on) checks names against `interface`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::UnknownInterface`] if `interface` is not loaded.
    pub fn for_interface(protocol: &Protocol, interface: &str) -> Result<Self, SchemaError> {
        Ok(Self {
            interface: Some(Arc::clone(protocol.require(interface)?)),
            listeners: HashMap::new(),
        })
    }

    /// Adds (or replaces) the listener for `event`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::UnknownEvent`] if the interface is known and has
    /// no such event.
    pub fn on<F>(mut self, event: &str, listener: F) -> Result<Self, SchemaError>
    where
        F: FnMut(&Event, &mut EventContext<'_>) -> Result<(), WlError> + 'static,
    {
        if let Some(spec) = &self.interface {
            if spec.event_by_name(event).is_none() {
                return Err(SchemaError::UnknownEvent {
                    interface: spec.name.clone(),
                    event: event.to_string(),
                });
            }
        }
        self.listeners.insert(event.to_string(), Box::new(listener));
        Ok(self)
    }
}

impl EventHandler for Listeners {
    fn handles(&self, event: &str) -> bool {
        self.listeners.contains_key(event)
    }

    fn on_event(&mut self, event: &Event, ctx: &mut EventContext<'_>) -> Result<(), WlError> {
        match self.listeners.get_mut(&event.name) {
            Some(listener) => listener(event, ctx),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut events: Vec<_> = self.listeners.keys().collect();
        events.sort();
        f.debug_struct("Listeners")
            .field("interface", &self.interface.as_ref().map(|s| s.name.as_str()))
            .field("events", &events)
            .finish()
    }
}
