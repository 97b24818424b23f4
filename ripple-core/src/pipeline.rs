//! Pipeline
//!
//! Wiring for the common case: one [`TaskQueue`] shared by the update
//! emitters of several store wrappers.
//!
//! ```rust,ignore
//! let pipeline = Pipeline::manual();
//! let users = pipeline.watch(&user_collection);
//! let by_team = pipeline.watch(&team_index);
//!
//! users.subscribe_on_key("u1", &render_user);
//! user_collection.upsert_one(json!({"id": "u1", "name": "Ada"}))?;
//! pipeline.flush();
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::{PipelineConfig, SchedulerConfig};
use crate::error::{ConfigError, SchedulerError};
use crate::reactive::{UpdateCoalescer, UpdateEmitter, WeakUpdateEmitter};
use crate::schedule::{
    DelayScheduler, ImmediateScheduler, MicrotaskScheduler, RenderFrameScheduler, TaskQueue,
};
use crate::store::Observable;

/// One queue feeding any number of coalescer/emitter pairs.
///
/// The pipeline does not keep watched emitters alive. Once the caller drops
/// every handle to an emitter it detaches from its store and stops feeding
/// the queue.
pub struct Pipeline {
    queue: TaskQueue,
    emitters: Mutex<Vec<WeakUpdateEmitter>>,
    destroyed: AtomicBool,
}

impl Pipeline {
    /// Build a pipeline around an existing queue.
    pub fn new(queue: TaskQueue) -> Self {
        Self {
            queue,
            emitters: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Pipeline whose queue runs only on [`flush`](Pipeline::flush).
    pub fn manual() -> Self {
        Self::new(TaskQueue::new())
    }

    /// Build a pipeline using the scheduler named by `config`.
    ///
    /// The tokio-backed strategies fail with
    /// [`SchedulerError::RuntimeUnavailable`] outside a runtime.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, SchedulerError> {
        let queue = match config.scheduler {
            SchedulerConfig::Manual => TaskQueue::new(),
            SchedulerConfig::Immediate => {
                TaskQueue::with_scheduler(|flush| Ok(ImmediateScheduler::new(flush)))?
            }
            SchedulerConfig::Microtask => TaskQueue::with_scheduler(MicrotaskScheduler::new)?,
            SchedulerConfig::Delay { ms } => {
                TaskQueue::with_scheduler(DelayScheduler::after(Duration::from_millis(ms)))?
            }
            SchedulerConfig::RenderFrame { frame_ms } => TaskQueue::with_scheduler(|flush| {
                RenderFrameScheduler::on_tokio(flush, Duration::from_millis(frame_ms))
            })?,
        };

        tracing::debug!(scheduler = config.scheduler.name(), "pipeline created");
        Ok(Self::new(queue))
    }

    /// Parse a JSON config and build the pipeline it describes.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config = PipelineConfig::from_json_str(json)?;
        Ok(Self::from_config(&config)?)
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Attach a coalescer to `source` and return an emitter fed by this
    /// pipeline's queue.
    ///
    /// The returned emitter must be held for as long as its subscriptions
    /// should fire.
    pub fn watch(&self, source: &impl Observable) -> UpdateEmitter {
        let emitter = UpdateEmitter::new(UpdateCoalescer::new(source), self.queue.clone());
        if self.is_destroyed() {
            tracing::warn!("watch on a destroyed pipeline returned an inert emitter");
            emitter.destroy();
            return emitter;
        }

        let mut emitters = self.emitters.lock();
        emitters.retain(WeakUpdateEmitter::is_live);
        emitters.push(emitter.downgrade());
        emitter
    }

    /// Run every queued dispatch task. Returns how many ran.
    pub fn flush(&self) -> usize {
        self.queue.flush()
    }

    /// Destroy every watched emitter, then the queue. Safe to call repeatedly.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let emitters: Vec<UpdateEmitter> = std::mem::take(&mut *self.emitters.lock())
            .iter()
            .filter_map(WeakUpdateEmitter::upgrade)
            .collect();
        for emitter in &emitters {
            emitter.destroy();
        }
        self.queue.destroy();
        tracing::debug!(emitters = emitters.len(), "pipeline destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Emitters created through [`watch`](Pipeline::watch) that are neither
    /// dropped nor destroyed.
    pub fn emitter_count(&self) -> usize {
        let mut emitters = self.emitters.lock();
        emitters.retain(WeakUpdateEmitter::is_live);
        emitters.len()
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::manual()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("queue", &self.queue)
            .field("emitters", &self.emitter_count())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
