//! Object identifiers, the id allocator, and the object registry.

pub mod free_list;
pub mod id;
pub mod registry;

pub use free_list::{FreeList, RECENT_FREE_MAX};
pub use id::ObjectId;
pub use registry::{ObjectEntry, ObjectRegistry};
