//! fiscal-bridge — stdio bridge between a host application and a vendor
//! fiscal smart-card library.
//!
//! The host spawns the bridge, writes one JSON request per line on its
//! stdin, and reads one JSON response per line from its stdout. The bridge
//! owns the card session: it enforces the vendor library's ordering
//! (initialize → begin-transaction → operate → end-transaction), survives
//! card removal, and translates native status words into structured errors.

use std::io;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

pub mod card;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod protocol;

use dispatcher::Dispatcher;

/// Bridge entry point: configuration, logging, adapter, then the read loop.
pub fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cfg = config::BridgeConfig::load().context("loading configuration")?;
    logging::init(&cfg.log_dir);

    info!("fiscal-bridge v{} starting", env!("CARGO_PKG_VERSION"));
    info!(
        adapter = %cfg.adapter,
        call_timeout_ms = cfg.call_timeout_ms,
        log_dir = %cfg.log_dir.display(),
        "configuration loaded"
    );

    let adapter = card::create_adapter(&cfg.adapter, Duration::from_millis(cfg.call_timeout_ms))
        .map_err(anyhow::Error::msg)?;

    let stdin = io::stdin().lock();
    let stdout = io::stdout().lock();
    let mut dispatcher = Dispatcher::new(adapter, stdin, stdout);
    dispatcher.run().context("protocol stream failure")?;

    info!("fiscal-bridge shut down");
    Ok(())
}
