//! The interface table and its process-wide snapshot.
//!
//! # Snapshots instead of a mutable global
//!
//! Connections capture an `Arc<Protocol>` when they are created and never
//! see later loads.  [`load_global`] builds a new table from the current one
//! plus the new description and swaps it in, so readers never observe a
//! half-merged state and need no lock once they hold their snapshot.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use tracing::{debug, error};

use crate::error::SchemaError;
use crate::protocol::description::ProtocolDescription;
use crate::protocol::interface::{EnumEntry, InterfaceSpec};

const CORE_PROTOCOL: &str = include_str!("core.toml");

/// Lookup table from interface name to its definition.
#[derive(Debug, Clone, Default)]
pub struct Protocol {
    interfaces: HashMap<String, Arc<InterfaceSpec>>,
}

impl Protocol {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table holding the built-in core and xdg-shell interfaces.
    ///
    /// # Errors
    ///
    /// Propagates [`SchemaError`] if the embedded description is invalid.
    pub fn core() -> Result<Self, SchemaError> {
        let mut protocol = Self::new();
        protocol.load_toml_str(CORE_PROTOCOL)?;
        Ok(protocol)
    }

    /// Merges `desc` into the table and returns the names that were loaded.
    ///
    /// Every interface is validated before any is inserted, so a failed load
    /// leaves the table untouched.  An interface that is already present is
    /// replaced: last load wins.
    ///
    /// # Errors
    ///
    /// Returns the first [`SchemaError`] found in `desc`.
    pub fn load(&mut self, desc: &ProtocolDescription) -> Result<Vec<String>, SchemaError> {
        let specs = desc
            .interfaces
            .iter()
            .map(|(name, iface)| InterfaceSpec::from_description(name, iface))
            .collect::<Result<Vec<_>, _>>()?;

        let mut loaded = Vec::with_capacity(specs.len());
        for spec in specs {
            if self.interfaces.contains_key(&spec.name) {
                debug!(interface = %spec.name, "replacing previously loaded interface");
            }
            loaded.push(spec.name.clone());
            self.interfaces.insert(spec.name.clone(), Arc::new(spec));
        }
        Ok(loaded)
    }

    /// Parses and merges a TOML description.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Parse`] or any validation error from [`Protocol::load`].
    pub fn load_toml_str(&mut self, text: &str) -> Result<Vec<String>, SchemaError> {
        self.load(&ProtocolDescription::from_toml_str(text)?)
    }

    /// Parses and merges a JSON description.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Parse`] or any validation error from [`Protocol::load`].
    pub fn load_json_str(&mut self, text: &str) -> Result<Vec<String>, SchemaError> {
        self.load(&ProtocolDescription::from_json_str(text)?)
    }

    pub fn lookup(&self, name: &str) -> Option<&Arc<InterfaceSpec>> {
        self.interfaces.get(name)
    }

    /// Like [`Protocol::lookup`] but reports a missing interface as an error.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::UnknownInterface`] if `name` is not loaded.
    pub fn require(&self, name: &str) -> Result<&Arc<InterfaceSpec>, SchemaError> {
        self.lookup(name)
            .ok_or_else(|| SchemaError::UnknownInterface(name.to_string()))
    }

    /// Returns the ordered name/value table of an enum.
    ///
    /// `enum_name` may be qualified (`"wl_shm.format"`), in which case the
    /// interface part overrides `interface`, matching how enum references
    /// are written in argument descriptions.
    pub fn enum_entries(&self, interface: &str, enum_name: &str) -> Option<&[EnumEntry]> {
        let (interface, enum_name) = match enum_name.split_once('.') {
            Some((qualifier, name)) => (qualifier, name),
            None => (interface, enum_name),
        };
        self.lookup(interface)?
            .enum_spec(enum_name)
            .map(|e| e.entries.as_slice())
    }

    /// Resolves one symbolic enum entry to its value.
    pub fn enum_value(&self, interface: &str, enum_name: &str, entry: &str) -> Option<u32> {
        self.enum_entries(interface, enum_name)?
            .iter()
            .find(|e| e.name == entry)
            .map(|e| e.value)
    }

    /// Names of every loaded interface, sorted.
    pub fn interface_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.interfaces.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}

// ── Process-wide table ────────────────────────────────────────────────────────

fn global_cell() -> &'static RwLock<Arc<Protocol>> {
    static GLOBAL: OnceLock<RwLock<Arc<Protocol>>> = OnceLock::new();
    GLOBAL.get_or_init(|| {
        let protocol = Protocol::core().unwrap_or_else(|e| {
            error!("built-in protocol description is invalid: {e}");
            Protocol::new()
        });
        RwLock::new(Arc::new(protocol))
    })
}

/// Returns the current process-wide table, seeded with the built-in schema.
pub fn global() -> Arc<Protocol> {
    let guard = global_cell().read().unwrap_or_else(|e| e.into_inner());
    Arc::clone(&guard)
}

/// Merges `desc` into the process-wide table.
///
/// Snapshots handed out earlier by [`global`] are not affected.
///
/// # Errors
///
/// Returns the first [`SchemaError`] found in `desc`; the table is unchanged.
pub fn load_global(desc: &ProtocolDescription) -> Result<Arc<Protocol>, SchemaError> {
    let mut guard = global_cell().write().unwrap_or_else(|e| e.into_inner());
    let mut next = Protocol::clone(&guard);
    next.load(desc)?;
    let next = Arc::new(next);
    *guard = Arc::clone(&next);
    Ok(next)
}
