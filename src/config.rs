//! Dump engine configuration.
//!
//! Everything the coordinator needs that is not per-call: device unit id,
//! pacing and timeout thresholds, the commit retry budget, and the
//! content-dedup policy. Loads from TOML with per-field defaults, so a
//! partial config file is fine.

use crate::reconcile::DedupPolicy;
use crate::session::TransferOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_unit_id() -> u8 {
    0x00
}

fn default_pacing_ms() -> u64 {
    50
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_commit_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpConfig {
    /// Device unit id carried in every frame.
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Delay between an accepted frame and the next request/emission.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,

    /// Quiet threshold before a timeout notice is raised.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Additional commit attempts after a persistence failure.
    #[serde(default = "default_commit_retries")]
    pub commit_retries: u32,

    /// Whether imports reuse stored UIDs for identical content.
    #[serde(default)]
    pub dedup: DedupPolicy,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            unit_id: default_unit_id(),
            pacing_ms: default_pacing_ms(),
            timeout_ms: default_timeout_ms(),
            commit_retries: default_commit_retries(),
            dedup: DedupPolicy::default(),
        }
    }
}

impl DumpConfig {
    pub fn from_toml_str(raw: &str) -> crate::error::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            pacing: self.pacing(),
            timeout: self.timeout(),
        }
    }
}
