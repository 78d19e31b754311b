//! wl-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the `wl-info` binary in `main.rs` share the same module tree.
//!
//! # What does wl-client do? (for beginners)
//!
//! `wl-core` knows how to encode requests, decode events, and keep track of
//! protocol objects, but it never touches the operating system.  This crate
//! supplies the missing piece: a blocking Unix-socket connection to a
//! compositor.
//!
//! 1. [`ClientConfig`] finds the compositor's socket from the environment and
//!    an optional TOML file, and names extra protocol descriptions to load.
//! 2. [`Display`] connects, registers object 1 (`wl_display`), and exposes
//!    `send_request`, `dispatch`, and `round_trip`.
//! 3. [`transport::UnixTransport`] moves bytes and file descriptors
//!    (`SCM_RIGHTS`) over the socket.
//!
//! ```no_run
//! use wl_client::{BindPolicy, Display};
//!
//! let mut display = Display::connect(None)?;
//! let (_registry, globals) = display.get_registry(BindPolicy::None)?;
//! display.round_trip()?;
//! for global in globals.borrow().list() {
//!     println!("{} v{}", global.interface, global.version);
//! }
//! # Ok::<(), wl_client::DisplayError>(())
//! ```

/// Configuration file and socket path resolution.
pub mod config;

/// The connection object.
pub mod display;

/// Socket transport with descriptor passing.
pub mod transport;

pub use config::{load_config, ClientConfig, ConfigError};
pub use display::{Display, DisplayError};
pub use transport::{Transport, UnixTransport};
pub use wl_core::BindPolicy;
