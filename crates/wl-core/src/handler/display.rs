//! Built-in handler for the bootstrap `wl_display` object.

use tracing::error;

use crate::error::{ProtocolError, WlError};
use crate::handler::{Event, EventContext, EventHandler};

/// Handles `error` (always fatal) and `delete_id` (releases an object id).
#[derive(Debug, Default, Clone, Copy)]
pub struct DisplayHandler;

impl EventHandler for DisplayHandler {
    fn handles(&self, event: &str) -> bool {
        matches!(event, "error" | "delete_id")
    }

    fn on_event(&mut self, event: &Event, ctx: &mut EventContext<'_>) -> Result<(), WlError> {
        match event.name.as_str() {
            "error" => {
                let object = event.object(0)?;
                let interface = object
                    .and_then(|id| ctx.registry.get(id))
                    .map_or_else(|| "(null)".to_string(), |entry| entry.interface().to_string());
                let fatal = ProtocolError::Fatal {
                    object_id: object.map_or(0, |id| id.raw()),
                    interface,
                    code: event.uint(1)?,
                    message: event.string(2)?.to_string(),
                };
                error!("{fatal}");
                Err(fatal.into())
            }
            "delete_id" => {
                ctx.registry.delete_raw(event.uint(0)?);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
