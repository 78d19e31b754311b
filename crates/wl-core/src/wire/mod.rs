//! Wire codec: frame header, typed argument encoding, and the circular
//! receive buffer.
//!
//! Wire format of one message:
//! ```text
//! [object_id:4][size:2 | opcode:2][args...]
//! ```
//! All integers are little-endian (native order on every supported host).
//! `size` is the total frame length including the 8-byte header.  Strings
//! and arrays are length-prefixed and padded to a 4-byte boundary; file
//! descriptors travel out of band as SCM_RIGHTS ancillary data.

pub mod buffer;
pub mod codec;
pub mod fixed;

pub use buffer::{MessageBuffer, Underrun};
pub use codec::{
    decode_args, encode_message, Argument, DecodeError, EncodedMessage, MessageHeader, WireReader,
};
pub use fixed::Fixed;

/// Size of the message header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Largest frame the 16-bit size field can describe.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// Rounds `len` up to the next multiple of 4.
pub fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}
