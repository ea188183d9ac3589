// atk-tool: spawns a player over piped stdio and drives it through a command script.

mod config;
mod session;

use std::path::PathBuf;
use std::process::{Command, Stdio};

use anyhow::{bail, Context};
use atk_wire::{Endpoint, Transport};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let mut player_override = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("atk-tool {}", VERSION);
                return Ok(());
            }
            "--player" => {
                let path = args.next().context("--player needs a path")?;
                player_override = Some(PathBuf::from(path));
            }
            other => bail!("unknown argument {:?}", other),
        }
    }

    let mut cfg = config::load()?;
    if let Some(p) = player_override {
        cfg.player_path = p;
    }
    init_logging(&cfg.log_level);

    let mut child = Command::new(&cfg.player_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .with_context(|| format!("spawning {}", cfg.player_path.display()))?;
    let to_player = child.stdin.take().context("player stdin not piped")?;
    let from_player = child.stdout.take().context("player stdout not piped")?;
    tracing::info!(player = %cfg.player_path.display(), pid = child.id(), "player spawned");

    let transport = Transport::with_config(from_player, to_player, cfg.wire.clone());
    let mut ep = Endpoint::new(&cfg.name, transport, session::shared_registry());
    let outcome = session::run(&mut ep);
    // Closing our ends lets the player see end of stream if the script failed midway.
    drop(ep);

    let status = child.wait().context("waiting for player")?;
    let report = outcome?;
    tracing::info!(?report, %status, "session finished");
    if !status.success() {
        bail!("player exited with {}", status);
    }
    Ok(())
}

/// Logs go to stderr, shared with the player's own logs.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
