//! TOML-based client configuration and socket path resolution.
//!
//! The config file lives at `$XDG_CONFIG_HOME/wl-client/config.toml`, or
//! `~/.config/wl-client/config.toml` when `XDG_CONFIG_HOME` is unset.  A
//! missing file is not an error: every field has a default.
//!
//! ```toml
//! display = "wayland-1"
//! dispatch_timeout_ms = 500
//! log_level = "debug"
//! protocols = ["/usr/share/wl-client/xdg-decoration.toml"]
//! bind = { only = ["wl_compositor", "wl_shm", "xdg_wm_base"] }
//! ```
//!
//! # Finding the socket (for beginners)
//!
//! A compositor listens on a Unix socket inside the user's runtime
//! directory (`$XDG_RUNTIME_DIR`, usually `/run/user/<uid>`).  The socket's
//! file name is the *display name*, taken from the first of:
//!
//! 1. the target passed to `Display::connect`,
//! 2. `display` in the config file,
//! 3. `$WAYLAND_DISPLAY`,
//! 4. the default `wayland-0`.
//!
//! An absolute display name is used as the full path.  Without a runtime
//! directory the name is used as a path relative to the working directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use wl_core::{BindPolicy, Protocol, SchemaError};

pub const XDG_RUNTIME_DIR: &str = "XDG_RUNTIME_DIR";
pub const WAYLAND_DISPLAY: &str = "WAYLAND_DISPLAY";
pub const DEFAULT_DISPLAY: &str = "wayland-0";

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// An extra protocol file is not a valid description.
    #[error("invalid protocol description {path}: {source}")]
    Schema {
        path: PathBuf,
        #[source]
        source: SchemaError,
    },
}

// ── Config schema ─────────────────────────────────────────────────────────────

/// Client settings stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Display name (socket file name) overriding `$WAYLAND_DISPLAY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    /// Runtime directory overriding `$XDG_RUNTIME_DIR`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_dir: Option<PathBuf>,
    /// Default timeout for `dispatch`; absent means block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatch_timeout_ms: Option<u64>,
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Extra protocol descriptions (`.toml` or `.json`) merged over the core
    /// schema in order.
    #[serde(default)]
    pub protocols: Vec<PathBuf>,
    /// Which advertised globals to bind automatically.
    #[serde(default)]
    pub bind: BindPolicy,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            display: None,
            runtime_dir: None,
            dispatch_timeout_ms: None,
            log_level: default_log_level(),
            protocols: Vec::new(),
            bind: BindPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn dispatch_timeout(&self) -> Option<Duration> {
        self.dispatch_timeout_ms.map(Duration::from_millis)
    }

    /// Resolves the compositor socket from the process environment.
    pub fn socket_path(&self, target: Option<&str>) -> PathBuf {
        self.socket_path_with(target, |key| std::env::var(key).ok())
    }

    /// [`socket_path`](Self::socket_path) with an injectable environment.
    pub fn socket_path_with<F>(&self, target: Option<&str>, env: F) -> PathBuf
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |value: Option<String>| value.filter(|v| !v.is_empty());

        let name = target
            .map(str::to_string)
            .or_else(|| self.display.clone())
            .or_else(|| non_empty(env(WAYLAND_DISPLAY)))
            .unwrap_or_else(|| DEFAULT_DISPLAY.to_string());
        let name = PathBuf::from(name);
        if name.is_absolute() {
            return name;
        }

        let runtime_dir = self
            .runtime_dir
            .clone()
            .or_else(|| non_empty(env(XDG_RUNTIME_DIR)).map(PathBuf::from));
        match runtime_dir {
            Some(dir) => dir.join(name),
            None => name,
        }
    }

    /// Builds the protocol table: the current process-wide table plus every
    /// file listed in `protocols`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if a file cannot be read and
    /// [`ConfigError::Schema`] if it is not a valid description.
    pub fn load_protocols(&self) -> Result<Protocol, ConfigError> {
        let mut protocol = wl_core::protocol::global().as_ref().clone();
        for path in &self.protocols {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            let is_json = path.extension().is_some_and(|ext| ext == "json");
            let loaded = if is_json {
                protocol.load_json_str(&text)
            } else {
                protocol.load_toml_str(&text)
            }
            .map_err(|source| ConfigError::Schema {
                path: path.clone(),
                source,
            })?;
            debug!(path = %path.display(), ?loaded, "protocol description loaded");
        }
        Ok(protocol)
    }
}

// ── Config file ───────────────────────────────────────────────────────────────

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if neither `XDG_CONFIG_HOME`
/// nor `HOME` is set.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the config file, returning defaults if it does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads a config file from an explicit path; a missing file yields defaults.
///
/// # Errors
///
/// Same as [`load_config`].
pub fn load_config_from(path: &Path) -> Result<ClientConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ClientConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// `$XDG_CONFIG_HOME/wl-client`, or `~/.config/wl-client`.
fn platform_config_dir() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    Some(base.join("wl-client"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn env<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn test_default_config_blocks_and_binds_everything() {
        let cfg = ClientConfig::default();

        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.dispatch_timeout(), None);
        assert_eq!(cfg.bind, BindPolicy::All);
        assert!(cfg.protocols.is_empty());
    }

    #[test]
    fn test_empty_toml_yields_defaults() {
        let cfg: ClientConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, ClientConfig::default());
    }

    #[test]
    fn test_full_toml_parses() {
        // Arrange
        let text = r#"
            display = "wayland-1"
            runtime_dir = "/tmp/rt"
            dispatch_timeout_ms = 250
            log_level = "debug"
            protocols = ["extra.json"]
            bind = { only = ["wl_shm"] }
        "#;

        // Act
        let cfg: ClientConfig = toml::from_str(text).unwrap();

        // Assert
        assert_eq!(cfg.display.as_deref(), Some("wayland-1"));
        assert_eq!(cfg.dispatch_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(cfg.bind, BindPolicy::Only(vec!["wl_shm".into()]));
        assert_eq!(cfg.protocols, vec![PathBuf::from("extra.json")]);
    }

    #[test]
    fn test_config_serializes_and_deserializes_round_trip() {
        let cfg = ClientConfig {
            display: Some("wayland-2".into()),
            bind: BindPolicy::None,
            ..ClientConfig::default()
        };

        let text = toml::to_string_pretty(&cfg).expect("serialize");
        let restored: ClientConfig = toml::from_str(&text).expect("deserialize");

        assert_eq!(cfg, restored);
    }

    // ── Socket path precedence ────────────────────────────────────────────────

    #[test]
    fn test_socket_path_defaults_to_wayland_0_in_runtime_dir() {
        let cfg = ClientConfig::default();

        let path = cfg.socket_path_with(None, env(&[(XDG_RUNTIME_DIR, "/run/user/1000")]));

        assert_eq!(path, PathBuf::from("/run/user/1000/wayland-0"));
    }

    #[test]
    fn test_socket_path_precedence() {
        // Arrange
        let vars = [
            (XDG_RUNTIME_DIR, "/run/user/1000"),
            (WAYLAND_DISPLAY, "wayland-env"),
        ];
        let configured = ClientConfig {
            display: Some("wayland-cfg".into()),
            ..ClientConfig::default()
        };

        // Act / Assert
        assert_eq!(
            configured.socket_path_with(Some("wayland-arg"), env(&vars)),
            PathBuf::from("/run/user/1000/wayland-arg")
        );
        assert_eq!(
            configured.socket_path_with(None, env(&vars)),
            PathBuf::from("/run/user/1000/wayland-cfg")
        );
        assert_eq!(
            ClientConfig::default().socket_path_with(None, env(&vars)),
            PathBuf::from("/run/user/1000/wayland-env")
        );
    }

    #[test]
    fn test_socket_path_without_runtime_dir_is_relative() {
        let cfg = ClientConfig::default();

        let path = cfg.socket_path_with(None, env(&[(XDG_RUNTIME_DIR, "")]));

        assert_eq!(path, PathBuf::from("wayland-0"));
    }

    #[test]
    fn test_absolute_display_name_ignores_runtime_dir() {
        let cfg = ClientConfig {
            runtime_dir: Some("/ignored".into()),
            ..ClientConfig::default()
        };

        let path = cfg.socket_path_with(Some("/tmp/compositor.sock"), env(&[]));

        assert_eq!(path, PathBuf::from("/tmp/compositor.sock"));
    }

    // ── Files ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_missing_config_file_yields_defaults() {
        let path = std::env::temp_dir().join("wl-client-test-does-not-exist.toml");
        assert_eq!(load_config_from(&path).unwrap(), ClientConfig::default());
    }

    #[test]
    fn test_malformed_config_file_is_a_parse_error() {
        let path = std::env::temp_dir().join(format!("wl-client-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "display = [").unwrap();

        let result = load_config_from(&path);
        std::fs::remove_file(&path).ok();

        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_extra_protocol_file_is_merged() {
        // Arrange
        let path = std::env::temp_dir().join(format!("wl-client-proto-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{ "zxdg_decoration_manager_v1": { "version": 1, "requests": [ { "name": "destroy", "destructor": true } ] } }"#,
        )
        .unwrap();
        let cfg = ClientConfig {
            protocols: vec![path.clone()],
            ..ClientConfig::default()
        };

        // Act
        let protocol = cfg.load_protocols();
        std::fs::remove_file(&path).ok();

        // Assert
        let protocol = protocol.unwrap();
        assert!(protocol.lookup("zxdg_decoration_manager_v1").is_some());
        assert!(protocol.lookup("wl_display").is_some());
    }

    #[test]
    fn test_unreadable_protocol_file_names_the_path() {
        let cfg = ClientConfig {
            protocols: vec![PathBuf::from("/nonexistent/proto.toml")],
            ..ClientConfig::default()
        };

        let err = cfg.load_protocols().unwrap_err();

        assert!(err.to_string().contains("/nonexistent/proto.toml"));
    }
}
