//! Pipeline configuration.
//!
//! A [`PipelineConfig`] names the scheduling strategy a
//! [`Pipeline`](crate::pipeline::Pipeline) should use. It is plain data,
//! deserializable from JSON:
//!
//! ```json
//! { "scheduler": { "kind": "delay", "ms": 50 } }
//! ```
//!
//! Every field has a default, so `{}` is a valid (manual-flush) config.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::schedule::DEFAULT_FRAME_PERIOD;

/// When a pipeline's queue flushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchedulerConfig {
    /// Only when the host calls `flush()`.
    #[default]
    Manual,
    /// Synchronously, as soon as a task is enqueued.
    Immediate,
    /// On a freshly spawned tokio task.
    Microtask,
    /// After a fixed delay.
    Delay { ms: u64 },
    /// On the next tick of a tokio-driven frame clock.
    RenderFrame {
        #[serde(default = "default_frame_ms")]
        frame_ms: u64,
    },
}

fn default_frame_ms() -> u64 {
    DEFAULT_FRAME_PERIOD.as_millis() as u64
}

impl SchedulerConfig {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            SchedulerConfig::Manual => "manual",
            SchedulerConfig::Immediate => "immediate",
            SchedulerConfig::Microtask => "microtask",
            SchedulerConfig::Delay { .. } => "delay",
            SchedulerConfig::RenderFrame { .. } => "render-frame",
        }
    }

    /// Delay or frame period, for the strategies that have one.
    pub fn period(&self) -> Option<Duration> {
        match self {
            SchedulerConfig::Delay { ms } => Some(Duration::from_millis(*ms)),
            SchedulerConfig::RenderFrame { frame_ms } => Some(Duration::from_millis(*frame_ms)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub scheduler: SchedulerConfig,
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_scheduler(scheduler: SchedulerConfig) -> Self {
        Self { scheduler }
    }
}
