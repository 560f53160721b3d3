//! Tunables loaded from a TOML file. Every key is optional.
//!
//! ```toml
//! [queue]
//! max_concurrent = 2
//!
//! [retry]
//! max_attempts = 5
//! base_delay_ms = 500
//!
//! [cache.regions.media]
//! max_size = 20
//! ttl_secs = 600
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::analysis::{GapFillConfig, OrchestratorConfig};
use crate::cache::{CacheConfig, CacheManager};
use crate::engine::{ControlConfig, QueueConfig, RetryPolicy, StuckConfig, SystemMonitorConfig};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub queue: QueueSettings,
    pub retry: RetrySettings,
    pub stuck: StuckSettings,
    pub system: SystemSettings,
    pub gap_fill: GapFillSettings,
    pub orchestrator: OrchestratorSettings,
    pub control: ControlSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub max_concurrent: usize,
    pub admission_delay_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            admission_delay_ms: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
    pub circuit_cooldown_secs: u64,
    pub priority_boost: i32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 0,
            max_delay_ms: 30_000,
            jitter: 0.2,
            circuit_cooldown_secs: 300,
            priority_boost: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StuckSettings {
    pub interval_secs: u64,
    pub threshold_secs: u64,
}

impl Default for StuckSettings {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            threshold_secs: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SystemSettings {
    pub interval_secs: u64,
    pub memory_watermark_mb: u64,
    pub backlog_threshold: usize,
    pub resample_delay_secs: u64,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            memory_watermark_mb: 1024,
            backlog_threshold: 20,
            resample_delay_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GapFillSettings {
    pub max_rounds: u32,
    pub truncate_chars: usize,
    pub chunk_chars: usize,
    pub chunk_timeout_secs: u64,
    pub token_limit_threshold: usize,
}

impl Default for GapFillSettings {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            truncate_chars: 6000,
            chunk_chars: 4000,
            chunk_timeout_secs: 45,
            token_limit_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub call_timeout_secs: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            call_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    pub poll_interval_secs: u64,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub regions: BTreeMap<String, CacheConfig>,
}

impl Settings {
    /// Read and parse a settings file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read settings {}: {e}", path.display()))
        })?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("bad settings {}: {e}", path.display())))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let r = &self.retry;
        RetryPolicy {
            max_attempts: r.max_attempts,
            base_delay: Duration::from_millis(r.base_delay_ms),
            max_delay: Duration::from_millis(r.max_delay_ms),
            jitter: r.jitter.clamp(0.0, 1.0),
            circuit_cooldown: Duration::from_secs(r.circuit_cooldown_secs),
            priority_boost: r.priority_boost,
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_concurrent: self.queue.max_concurrent.max(1),
            admission_delay: Duration::from_millis(self.queue.admission_delay_ms),
            retry: self.retry_policy(),
        }
    }

    pub fn stuck_config(&self) -> StuckConfig {
        StuckConfig {
            interval: Duration::from_secs(self.stuck.interval_secs.max(1)),
            threshold: Duration::from_secs(self.stuck.threshold_secs),
        }
    }

    pub fn system_config(&self) -> SystemMonitorConfig {
        SystemMonitorConfig {
            interval: Duration::from_secs(self.system.interval_secs.max(1)),
            memory_watermark_bytes: self.system.memory_watermark_mb.saturating_mul(1024 * 1024),
            backlog_threshold: self.system.backlog_threshold,
            resample_delay: Duration::from_secs(self.system.resample_delay_secs),
        }
    }

    pub fn gap_fill_config(&self) -> GapFillConfig {
        let g = &self.gap_fill;
        GapFillConfig {
            max_rounds: g.max_rounds,
            truncate_chars: g.truncate_chars,
            chunk_chars: g.chunk_chars.max(1),
            chunk_timeout: Duration::from_secs(g.chunk_timeout_secs),
            call_timeout: Duration::from_secs(self.orchestrator.call_timeout_secs),
            token_limit_threshold: g.token_limit_threshold,
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            call_timeout: Duration::from_secs(self.orchestrator.call_timeout_secs),
        }
    }

    pub fn control_config(&self) -> ControlConfig {
        ControlConfig {
            poll_interval: Duration::from_secs(self.control.poll_interval_secs.max(1)),
        }
    }

    /// A cache manager with every configured region created up front.
    pub fn cache_manager(&self) -> CacheManager {
        CacheManager::with_regions(
            self.cache
                .regions
                .iter()
                .map(|(name, config)| (name.as_str(), *config)),
        )
    }
}
