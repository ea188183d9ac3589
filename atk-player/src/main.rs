// atk-player: serves the wire protocol on stdio or on descriptors inherited from the tool.

mod config;
mod player;

use std::sync::Arc;

use anyhow::{bail, Context};
use atk_wire::{Endpoint, Transport};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let mut fds = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("atk-player {}", VERSION);
                return Ok(());
            }
            "--fds" => {
                let read = args.next().context("--fds needs a read descriptor")?;
                let write = args.next().context("--fds needs a write descriptor")?;
                let read: i32 = read.parse().context("bad read descriptor")?;
                let write: i32 = write.parse().context("bad write descriptor")?;
                fds = Some((read, write));
            }
            other => bail!("unknown argument {:?}", other),
        }
    }

    let cfg = config::load()?;
    init_logging(&cfg.log_level);

    let transport = match fds {
        Some((read, write)) => open_fds(read, write, &cfg)?,
        None => Transport::with_config(std::io::stdin(), std::io::stdout(), cfg.wire.clone()),
    };
    let state = player::PlayerState::new();
    let registry = Arc::new(player::registry(&state));
    let mut ep = Endpoint::new(&cfg.name, transport, registry);
    tracing::info!(name = %cfg.name, handle = %ep.handle(), "player started");

    player::run(&mut ep, &state)
}

#[cfg(unix)]
fn open_fds(read: i32, write: i32, cfg: &config::Config) -> anyhow::Result<Transport> {
    if read < 0 || write < 0 {
        bail!("--fds needs two non-negative descriptors, got {} {}", read, write);
    }
    // SAFETY: both descriptors are non-negative and were inherited from the
    // launching tool; nothing else in this process wraps them. A descriptor
    // given twice is duplicated inside `from_raw_fds`, not adopted twice.
    let transport = unsafe { Transport::from_raw_fds(read, write, cfg.wire.clone()) }
        .with_context(|| format!("adopting descriptors {} {}", read, write))?;
    Ok(transport)
}

#[cfg(not(unix))]
fn open_fds(_read: i32, _write: i32, _cfg: &config::Config) -> anyhow::Result<Transport> {
    bail!("--fds is only supported on Unix")
}

/// Logs go to stderr; stdout may be carrying frames.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
