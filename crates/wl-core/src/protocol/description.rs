//! Serde data model for protocol descriptions.
//!
//! A description is what an interface-definition document boils down to:
//! one entry per interface name with its version, ordered requests, ordered
//! events and enums.  It can be written by hand in TOML or produced as JSON
//! by an external scanner:
//!
//! ```toml
//! [wl_callback]
//! version = 1
//!
//! [[wl_callback.events]]
//! name = "done"
//! args = [{ name = "callback_data", type = "uint" }]
//! ```
//!
//! Nothing here is validated; [`crate::protocol::InterfaceSpec::from_description`]
//! turns a description into the immutable, checked form.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::protocol::ArgType;

/// A set of interface descriptions keyed by interface name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolDescription {
    pub interfaces: BTreeMap<String, InterfaceDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceDescription {
    pub version: u32,
    #[serde(default)]
    pub requests: Vec<MessageDescription>,
    #[serde(default)]
    pub events: Vec<MessageDescription>,
    #[serde(default)]
    pub enums: Vec<EnumDescription>,
}

/// A request or an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDescription {
    pub name: String,
    #[serde(default)]
    pub args: Vec<ArgDescription>,
    /// Explicit opcode; when present it must equal the message's position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opcode: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u32>,
    /// Only meaningful for requests.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub destructor: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub arg_type: ArgType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_ref: Option<String>,
    #[serde(default, alias = "allow-null", skip_serializing_if = "std::ops::Not::not")]
    pub allow_null: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumDescription {
    pub name: String,
    #[serde(default)]
    pub entries: Vec<EnumEntryDescription>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub bitfield: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumEntryDescription {
    pub name: String,
    pub value: u32,
}

impl ProtocolDescription {
    /// Parses a TOML description.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Parse`] when the text is not a valid description.
    pub fn from_toml_str(text: &str) -> Result<Self, SchemaError> {
        toml::from_str(text).map_err(|e| SchemaError::Parse(e.to_string()))
    }

    /// Parses a JSON description.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Parse`] when the text is not a valid description.
    pub fn from_json_str(text: &str) -> Result<Self, SchemaError> {
        serde_json::from_str(text).map_err(|e| SchemaError::Parse(e.to_string()))
    }
}
