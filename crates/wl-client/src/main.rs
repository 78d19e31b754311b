//! `wl-info`: connects to the compositor and lists its globals.
//!
//! ```text
//! wl-info [DISPLAY]
//! ```
//!
//! `DISPLAY` overrides `$WAYLAND_DISPLAY` and the config file.  Globals are
//! bound according to the config file's `bind` policy, so the listing also
//! shows the version each bound global was created at.
//!
//! Set `RUST_LOG=wl_core=debug` to see every request (`RQ:`) and event
//! (`EV:`) on the wire.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wl_client::{load_config, Display};

fn main() -> anyhow::Result<()> {
    let config = load_config().context("loading wl-client config")?;

    // Initialise structured logging; RUST_LOG wins over the config file.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let target = std::env::args().nth(1);
    let mut display = Display::connect_with(&config, target.as_deref())
        .context("connecting to the compositor")?;

    let (_registry, globals) = display.get_registry(config.bind.clone())?;
    let serial = display.round_trip()?;
    // A second round trip collects events for the objects bound in the first.
    display.round_trip()?;
    info!(serial, "initial globals received");

    for global in globals.borrow().list() {
        match global.bound {
            Some((id, version)) => println!(
                "{:>4}  {:<40} v{:<3} bound as {} at v{}",
                global.name,
                global.interface,
                global.version,
                id.raw(),
                version
            ),
            None => println!(
                "{:>4}  {:<40} v{}",
                global.name, global.interface, global.version
            ),
        }
    }

    display.disconnect();
    Ok(())
}
