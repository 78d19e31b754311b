//! Immutable, validated interface definitions.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::protocol::description::{
    ArgDescription, EnumDescription, InterfaceDescription, MessageDescription,
};
use crate::wire::HEADER_SIZE;

/// Wire argument types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgType {
    Int,
    Uint,
    Fixed,
    Object,
    NewId,
    String,
    Array,
    Fd,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArgSpec {
    pub name: String,
    pub arg_type: ArgType,
    /// Referenced interface for `object` and typed `new_id` args.
    pub interface: Option<String>,
    pub enum_ref: Option<String>,
    pub allow_null: bool,
}

impl ArgSpec {
    /// A new_id whose interface is fixed by the schema.  The client allocates
    /// these itself, so callers never pass a value for them.
    pub fn is_typed_new_id(&self) -> bool {
        self.arg_type == ArgType::NewId && self.interface.is_some()
    }

    /// A new_id that names its interface on the wire (`wl_registry.bind`).
    pub fn is_dynamic_new_id(&self) -> bool {
        self.arg_type == ArgType::NewId && self.interface.is_none()
    }

    fn from_description(desc: &ArgDescription) -> Self {
        Self {
            name: desc.name.clone(),
            arg_type: desc.arg_type,
            interface: desc.interface.clone(),
            enum_ref: desc.enum_ref.clone(),
            allow_null: desc.allow_null,
        }
    }
}

/// Per-message layout metadata used when sizing frames.
#[derive(Debug, Clone, PartialEq)]
pub struct WireLayout {
    /// Bytes contributed by the header and every fixed-width argument.
    pub fixed_size: usize,
    pub arg_types: Vec<ArgType>,
    /// Number of fd-typed args (carried out of band).
    pub fd_count: usize,
}

impl WireLayout {
    fn compute(args: &[ArgSpec]) -> Self {
        let fixed_size = args.iter().fold(HEADER_SIZE, |size, arg| {
            size + match arg.arg_type {
                ArgType::Int | ArgType::Uint | ArgType::Fixed | ArgType::Object => 4,
                // interface string is variable; version + id are fixed
                ArgType::NewId if arg.interface.is_none() => 8,
                ArgType::NewId => 4,
                ArgType::String | ArgType::Array | ArgType::Fd => 0,
            }
        });
        Self {
            fixed_size,
            arg_types: args.iter().map(|a| a.arg_type).collect(),
            fd_count: args.iter().filter(|a| a.arg_type == ArgType::Fd).count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub name: String,
    pub opcode: u16,
    pub args: Vec<ArgSpec>,
    /// Minimum object version that may send this request.
    pub since: u32,
    pub destructor: bool,
    pub layout: WireLayout,
}

impl RequestSpec {
    /// Number of values the caller supplies: every arg except typed new_ids.
    pub fn caller_arg_count(&self) -> usize {
        self.args.iter().filter(|a| !a.is_typed_new_id()).count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventSpec {
    pub name: String,
    pub opcode: u16,
    pub args: Vec<ArgSpec>,
    pub since: Option<u32>,
    pub layout: WireLayout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumEntry {
    pub name: String,
    pub value: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumSpec {
    pub name: String,
    pub entries: Vec<EnumEntry>,
    pub bitfield: bool,
}

impl EnumSpec {
    /// Looks an entry up by its symbolic name.
    pub fn value(&self, entry: &str) -> Option<u32> {
        self.entries.iter().find(|e| e.name == entry).map(|e| e.value)
    }

    fn from_description(desc: &EnumDescription) -> Self {
        Self {
            name: desc.name.clone(),
            entries: desc
                .entries
                .iter()
                .map(|e| EnumEntry {
                    name: e.name.clone(),
                    value: e.value,
                })
                .collect(),
            bitfield: desc.bitfield,
        }
    }
}

/// A named, versioned protocol surface.
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceSpec {
    pub name: String,
    pub version: u32,
    pub requests: Vec<RequestSpec>,
    pub events: Vec<EventSpec>,
    pub enums: Vec<EnumSpec>,
}

impl InterfaceSpec {
    /// Validates a description and assigns opcodes by position.
    ///
    /// # Errors
    ///
    /// - [`SchemaError::ZeroVersion`] if `version` is 0.
    /// - [`SchemaError::DuplicateMessage`] if two requests or two events share a name.
    /// - [`SchemaError::ConflictingOpcode`] if an explicit opcode disagrees with
    ///   the message's position.
    pub fn from_description(name: &str, desc: &InterfaceDescription) -> Result<Self, SchemaError> {
        if desc.version == 0 {
            return Err(SchemaError::ZeroVersion(name.to_string()));
        }

        let requests = messages(name, &desc.requests)?
            .into_iter()
            .map(|(opcode, msg, args)| RequestSpec {
                name: msg.name.clone(),
                opcode,
                layout: WireLayout::compute(&args),
                args,
                since: msg.since.unwrap_or(1),
                destructor: msg.destructor,
            })
            .collect();

        let events = messages(name, &desc.events)?
            .into_iter()
            .map(|(opcode, msg, args)| EventSpec {
                name: msg.name.clone(),
                opcode,
                layout: WireLayout::compute(&args),
                args,
                since: msg.since,
            })
            .collect();

        Ok(Self {
            name: name.to_string(),
            version: desc.version,
            requests,
            events,
            enums: desc.enums.iter().map(EnumSpec::from_description).collect(),
        })
    }

    pub fn request(&self, name: &str) -> Option<&RequestSpec> {
        self.requests.iter().find(|r| r.name == name)
    }

    pub fn event(&self, opcode: u16) -> Option<&EventSpec> {
        self.events.get(opcode as usize)
    }

    pub fn event_by_name(&self, name: &str) -> Option<&EventSpec> {
        self.events.iter().find(|e| e.name == name)
    }

    pub fn enum_spec(&self, name: &str) -> Option<&EnumSpec> {
        self.enums.iter().find(|e| e.name == name)
    }
}

type Checked<'a> = (u16, &'a MessageDescription, Vec<ArgSpec>);

fn messages<'a>(
    interface: &str,
    list: &'a [MessageDescription],
) -> Result<Vec<Checked<'a>>, SchemaError> {
    let mut seen = HashSet::new();
    list.iter()
        .enumerate()
        .map(|(position, msg)| {
            let position = position as u16;
            if !seen.insert(msg.name.as_str()) {
                return Err(SchemaError::DuplicateMessage {
                    interface: interface.to_string(),
                    name: msg.name.clone(),
                });
            }
            if let Some(declared) = msg.opcode {
                if declared != position {
                    return Err(SchemaError::ConflictingOpcode {
                        interface: interface.to_string(),
                        name: msg.name.clone(),
                        declared,
                        position,
                    });
                }
            }
            let args = msg.args.iter().map(ArgSpec::from_description).collect();
            Ok((position, msg, args))
        })
        .collect()
}
