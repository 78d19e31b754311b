//! `wl_registry` handler: tracks advertised globals and binds them.
//!
//! Every `global` event is recorded.  If the binding policy selects the
//! interface and the local schema knows it, the handler immediately sends
//! `bind` with `version = min(advertised, locally known)`, so a client built
//! against an older schema never asks for requests it cannot encode.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::WlError;
use crate::handler::{Event, EventContext, EventHandler};
use crate::object::ObjectId;
use crate::wire::Argument;

/// Which advertised globals get bound automatically.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindPolicy {
    /// Every interface present in the local schema.
    #[default]
    All,
    /// Only the listed interfaces.
    Only(Vec<String>),
    /// Nothing; globals are only recorded.
    None,
}

impl BindPolicy {
    pub fn selects(&self, interface: &str) -> bool {
        match self {
            BindPolicy::All => true,
            BindPolicy::Only(names) => names.iter().any(|n| n == interface),
            BindPolicy::None => false,
        }
    }
}

/// One advertised global.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
    /// Server-chosen numeric name used by `bind`.
    pub name: u32,
    pub interface: String,
    /// Version the server advertised.
    pub version: u32,
    /// Object bound to this global, with the version it was bound at.
    pub bound: Option<(ObjectId, u32)>,
}

/// Globals seen so far, keyed by numeric name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalsState {
    globals: BTreeMap<u32, Global>,
}

impl GlobalsState {
    /// Every live global in advertisement-name order.
    pub fn list(&self) -> impl Iterator<Item = &Global> {
        self.globals.values()
    }

    pub fn len(&self) -> usize {
        self.globals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.globals.is_empty()
    }

    /// The first global advertising `interface`.
    pub fn find(&self, interface: &str) -> Option<&Global> {
        self.globals.values().find(|g| g.interface == interface)
    }

    /// The object bound for `interface`, if any.
    pub fn bound(&self, interface: &str) -> Option<ObjectId> {
        self.globals
            .values()
            .filter(|g| g.interface == interface)
            .find_map(|g| g.bound.map(|(id, _)| id))
    }
}

/// Registry handler; see the module docs.
#[derive(Debug, Clone)]
pub struct Globals {
    policy: BindPolicy,
    state: Rc<RefCell<GlobalsState>>,
}

impl Globals {
    pub fn new(policy: BindPolicy) -> Self {
        Self {
            policy,
            state: Rc::default(),
        }
    }

    /// Shared view of the recorded globals.
    pub fn state(&self) -> Rc<RefCell<GlobalsState>> {
        Rc::clone(&self.state)
    }

    fn on_global(&mut self, event: &Event, ctx: &mut EventContext<'_>) -> Result<(), WlError> {
        let name = event.uint(0)?;
        let interface = event.string(1)?.to_string();
        let advertised = event.uint(2)?;

        let local = ctx.protocol.lookup(&interface).map(|spec| spec.version);
        let bound = match local {
            Some(local) if self.policy.selects(&interface) => {
                let version = advertised.min(local);
                let id = ctx.send_request(
                    event.object,
                    "bind",
                    vec![
                        Argument::Uint(name),
                        Argument::new_dynamic(interface.clone(), version),
                    ],
                    None,
                )?;
                id.map(|id| (id, version))
            }
            _ => None,
        };
        debug!(name, %interface, advertised, ?bound, "global");

        self.state.borrow_mut().globals.insert(
            name,
            Global {
                name,
                interface,
                version: advertised,
                bound,
            },
        );
        Ok(())
    }
}

impl Default for Globals {
    fn default() -> Self {
        Self::new(BindPolicy::default())
    }
}

impl EventHandler for Globals {
    fn handles(&self, event: &str) -> bool {
        matches!(event, "global" | "global_remove")
    }

    fn on_event(&mut self, event: &Event, ctx: &mut EventContext<'_>) -> Result<(), WlError> {
        match event.name.as_str() {
            "global" => self.on_global(event, ctx),
            "global_remove" => {
                let name = event.uint(0)?;
                if let Some(global) = self.state.borrow_mut().globals.remove(&name) {
                    debug!(name, interface = %global.interface, "global removed");
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
