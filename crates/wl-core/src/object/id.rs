//! Object identifiers.

use std::fmt;

/// A live protocol object id.  Never zero: the null reference is modelled as
/// `Option<ObjectId>::None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(u32);

impl ObjectId {
    /// The bootstrap connection object.
    pub const DISPLAY: ObjectId = ObjectId(1);

    /// First id of the client-allocated range.
    pub const CLIENT_MIN: u32 = 0x0000_0001;
    /// Last id of the client-allocated range.
    pub const CLIENT_MAX: u32 = 0xFEFF_FFFF;
    /// First id of the server-allocated range.
    pub const SERVER_MIN: u32 = 0xFF00_0000;

    /// Wraps a raw wire value; 0 is the null sentinel and yields `None`.
    pub const fn new(raw: u32) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(ObjectId(raw))
        }
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// `true` for ids the server allocated (and the client never frees).
    pub const fn is_server_side(self) -> bool {
        self.0 >= Self::SERVER_MIN
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
