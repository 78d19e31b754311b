//! Completion handler for `wl_callback` objects.

use std::cell::Cell;
use std::rc::Rc;

use crate::error::WlError;
use crate::handler::{Event, EventContext, EventHandler};

/// Raises a shared flag when `done` arrives and keeps the callback data.
///
/// `round_trip` creates one of these for its `sync` request and dispatches
/// until the flag is set.
#[derive(Debug, Clone, Default)]
pub struct CallbackHandler {
    done: Rc<Cell<Option<u32>>>,
}

impl CallbackHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared view of the completion state: `Some(data)` once `done` fired.
    pub fn done_flag(&self) -> Rc<Cell<Option<u32>>> {
        Rc::clone(&self.done)
    }
}

impl EventHandler for CallbackHandler {
    fn handles(&self, event: &str) -> bool {
        event == "done"
    }

    fn on_event(&mut self, event: &Event, _ctx: &mut EventContext<'_>) -> Result<(), WlError> {
        self.done.set(Some(event.uint(0)?));
        Ok(())
    }
}
