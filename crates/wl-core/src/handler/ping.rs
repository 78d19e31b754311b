//! Keep-alive handler for `xdg_wm_base`.

use tracing::trace;

use crate::error::WlError;
use crate::handler::{Event, EventContext, EventHandler};
use crate::wire::Argument;

/// Answers every `ping` with a `pong` carrying the same serial.
#[derive(Debug, Default, Clone, Copy)]
pub struct PingHandler;

impl EventHandler for PingHandler {
    fn handles(&self, event: &str) -> bool {
        event == "ping"
    }

    fn on_event(&mut self, event: &Event, ctx: &mut EventContext<'_>) -> Result<(), WlError> {
        let serial = event.uint(0)?;
        trace!(serial, "ping");
        ctx.send_request(event.object, "pong", vec![Argument::Uint(serial)], None)?;
        Ok(())
    }
}
