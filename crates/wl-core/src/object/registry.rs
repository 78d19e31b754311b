//! Live mapping from object id to handler.
//!
//! # Object lifetimes
//!
//! ```text
//!   create_local / bind_remote ──▶ live ──destructor request──▶ zombie
//!                                   │                            │
//!                                   └──────── delete ◀── delete_id event
//! ```
//!
//! A zombie keeps its id reserved (the server may still have events for it
//! in flight) but drops its handler, so late events are discarded.  The id
//! returns to the [`FreeList`] only when the server confirms with
//! `delete_id`.  Server-allocated ids never enter the free list.

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::error::ResourceError;
use crate::handler::{EventHandler, HandlerFactory};
use crate::object::{FreeList, ObjectId};

/// A registered object.
pub struct ObjectEntry {
    id: ObjectId,
    interface: String,
    version: u32,
    /// `None` while the handler is running or after the object was retired.
    handler: Option<Box<dyn EventHandler>>,
    zombie: bool,
}

impl ObjectEntry {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// `true` once a destructor request was sent for this object.
    pub fn is_zombie(&self) -> bool {
        self.zombie
    }
}

impl fmt::Debug for ObjectEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectEntry")
            .field("id", &self.id)
            .field("interface", &self.interface)
            .field("version", &self.version)
            .field("zombie", &self.zombie)
            .finish()
    }
}

/// Owns every protocol object of one connection.
#[derive(Debug)]
pub struct ObjectRegistry {
    free_list: FreeList,
    objects: BTreeMap<ObjectId, ObjectEntry>,
    factory: HandlerFactory,
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new(HandlerFactory::default())
    }
}

impl ObjectRegistry {
    pub fn new(factory: HandlerFactory) -> Self {
        Self {
            free_list: FreeList::new(ObjectId::CLIENT_MIN, ObjectId::CLIENT_MAX),
            objects: BTreeMap::new(),
            factory,
        }
    }

    pub fn factory_mut(&mut self) -> &mut HandlerFactory {
        &mut self.factory
    }

    /// Draws a fresh client-side id.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::IdSpaceExhausted`] when every id is in use.
    pub fn allocate_id(&mut self) -> Result<ObjectId, ResourceError> {
        self.free_list
            .get()
            .and_then(ObjectId::new)
            .ok_or(ResourceError::IdSpaceExhausted)
    }

    /// Registers the bootstrap `wl_display` object, which must receive id 1.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::IdInUse`] if id 1 was already handed out.
    pub fn create_display(&mut self) -> Result<ObjectId, ResourceError> {
        let id = self.allocate_id()?;
        if id != ObjectId::DISPLAY {
            self.free_list.free(id.raw())?;
            return Err(ResourceError::IdInUse(ObjectId::DISPLAY.raw()));
        }
        self.insert(id, "wl_display", 1, None);
        Ok(id)
    }

    /// Allocates an id and registers a new client-created object on it.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::IdSpaceExhausted`] when every id is in use.
    pub fn create_local(
        &mut self,
        interface: &str,
        version: u32,
        handler: Option<Box<dyn EventHandler>>,
    ) -> Result<ObjectId, ResourceError> {
        let id = self.allocate_id()?;
        self.insert(id, interface, version, handler);
        Ok(id)
    }

    /// Registers an object at an id chosen by the server.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::IdInUse`] if `id` is already registered.
    pub fn bind_remote(
        &mut self,
        interface: &str,
        id: ObjectId,
        version: u32,
        handler: Option<Box<dyn EventHandler>>,
    ) -> Result<ObjectId, ResourceError> {
        if self.objects.contains_key(&id) {
            return Err(ResourceError::IdInUse(id.raw()));
        }
        self.insert(id, interface, version, handler);
        Ok(id)
    }

    fn insert(
        &mut self,
        id: ObjectId,
        interface: &str,
        version: u32,
        handler: Option<Box<dyn EventHandler>>,
    ) {
        let handler = self.factory.build(interface, handler);
        debug!("CO: ({}) {interface} v{version}", id.raw());
        self.objects.insert(
            id,
            ObjectEntry {
                id,
                interface: interface.to_string(),
                version,
                handler: Some(handler),
                zombie: false,
            },
        );
    }

    /// Removes an object and releases its id.  Returns `false` (and does
    /// nothing) if the id is not registered, so a repeated delete is harmless.
    pub fn delete(&mut self, id: ObjectId) -> bool {
        let Some(entry) = self.objects.remove(&id) else {
            return false;
        };
        debug!("DO: ({}) {}", id.raw(), entry.interface);
        if !id.is_server_side() {
            // The id was live in the map, so it is not in the free list.
            let _ = self.free_list.free(id.raw());
        }
        true
    }

    /// [`delete`](Self::delete) for a raw wire id; 0 is ignored.
    pub fn delete_raw(&mut self, raw: u32) -> bool {
        ObjectId::new(raw).is_some_and(|id| self.delete(id))
    }

    /// Marks an object destroyed from the client side.
    ///
    /// Client-range ids become zombies until `delete_id`; server-range ids
    /// are removed at once.
    pub fn retire(&mut self, id: ObjectId) {
        if id.is_server_side() {
            self.delete(id);
        } else if let Some(entry) = self.objects.get_mut(&id) {
            entry.zombie = true;
            entry.handler = None;
        }
    }

    pub fn get(&self, id: ObjectId) -> Option<&ObjectEntry> {
        self.objects.get(&id)
    }

    /// Resolves a raw wire id; 0 never resolves.
    pub fn resolve(&self, raw: u32) -> Option<&ObjectEntry> {
        ObjectId::new(raw).and_then(|id| self.get(id))
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    /// Every live (non-zombie) object of `interface`, in id order.
    pub fn get_by_interface(&self, interface: &str) -> Vec<ObjectId> {
        self.objects
            .values()
            .filter(|e| !e.zombie && e.interface == interface)
            .map(|e| e.id)
            .collect()
    }

    /// The lowest-numbered live object of `interface`.
    pub fn first_by_interface(&self, interface: &str) -> Option<ObjectId> {
        self.objects
            .values()
            .find(|e| !e.zombie && e.interface == interface)
            .map(|e| e.id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Detaches an object's handler so it can run with `&mut` access to the
    /// registry.  Returns `None` for zombies and unknown ids.
    pub fn take_handler(&mut self, id: ObjectId) -> Option<Box<dyn EventHandler>> {
        self.objects.get_mut(&id)?.handler.take()
    }

    /// Re-attaches a handler taken with [`take_handler`](Self::take_handler).
    ///
    /// The handler is dropped if the object was deleted or retired meanwhile.
    pub fn restore_handler(&mut self, id: ObjectId, handler: Box<dyn EventHandler>) {
        if let Some(entry) = self.objects.get_mut(&id) {
            if !entry.zombie && entry.handler.is_none() {
                entry.handler = Some(handler);
            }
        }
    }

    /// Replaces the handler of a live object, overlaying `handler` on the
    /// interface default.
    pub fn set_handler(&mut self, id: ObjectId, handler: Box<dyn EventHandler>) -> bool {
        let Some(entry) = self.objects.get_mut(&id) else {
            return false;
        };
        if entry.zombie {
            return false;
        }
        entry.handler = Some(self.factory.build(&entry.interface, Some(handler)));
        true
    }
}
