//! Schema model: interface definitions loaded from protocol descriptions.

pub mod description;
pub mod interface;
pub mod table;

pub use description::ProtocolDescription;
pub use interface::{
    ArgSpec, ArgType, EnumEntry, EnumSpec, EventSpec, InterfaceSpec, RequestSpec, WireLayout,
};
pub use table::{global, load_global, Protocol};
