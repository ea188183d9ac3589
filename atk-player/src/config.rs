//! Load player config from file and environment.

use anyhow::Context;
use atk_wire::WireConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Player configuration. File: ~/.config/atk/atk-player.toml or /etc/atk/atk-player.toml.
/// Env overrides: ATK_PLAYER_NAME, ATK_LOG, ATK_SYNC_TIMEOUT_MS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Endpoint name reported to the tool (default "atk-player").
    #[serde(default = "default_name")]
    pub name: String,
    /// Log filter used when RUST_LOG is unset (default "info").
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub wire: WireConfig,
}

fn default_name() -> String {
    "atk-player".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            wire: WireConfig::default(),
        }
    }
}

/// Load config: defaults, then the first config file found, then env vars.
pub fn load() -> anyhow::Result<Config> {
    let mut c = match config_paths().into_iter().find(|p| p.exists()) {
        Some(p) => load_file(&p)?,
        None => Config::default(),
    };
    if let Ok(s) = std::env::var("ATK_PLAYER_NAME") {
        c.name = s;
    }
    if let Ok(s) = std::env::var("ATK_LOG") {
        c.log_level = s;
    }
    if let Ok(s) = std::env::var("ATK_SYNC_TIMEOUT_MS") {
        if let Ok(ms) = s.parse::<u64>() {
            c.wire.sync_timeout_ms = Some(ms);
        }
    }
    Ok(c)
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/atk/atk-player.toml"));
    }
    out.push(PathBuf::from("/etc/atk/atk-player.toml"));
    out
}

fn load_file(path: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&s).with_context(|| format!("parsing {}", path.display()))
}
