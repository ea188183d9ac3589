//! Transport tuning shared by both ends of a wire.

use std::time::Duration;

use serde::Deserialize;

use crate::wire::MAX_FRAME_LEN;

/// Wire configuration. Embedded as the `[wire]` table of the binaries' config files.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WireConfig {
    /// Largest frame (header + payload) accepted or sent (default 16 MiB).
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: u32,
    /// Default deadline for synchronous calls, in milliseconds. Unset means wait forever.
    #[serde(default)]
    pub sync_timeout_ms: Option<u64>,
}

fn default_max_frame_len() -> u32 {
    MAX_FRAME_LEN
}

impl WireConfig {
    pub fn sync_timeout(&self) -> Option<Duration> {
        self.sync_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            max_frame_len: default_max_frame_len(),
            sync_timeout_ms: None,
        }
    }
}
