//! Ripple Core
//!
//! This crate provides an in-memory reactive update pipeline. Applications
//! keep entities and lookup indexes in keyed stores, subscribe callbacks to
//! individual keys, and get exactly one callback per changed key per flush,
//! however many writes happened in between.
//!
//! It implements:
//!
//! - Keyed stores that publish change records (collections and indexes)
//! - Coalescing of many synchronous writes into one downstream signal
//! - A deferred task queue with pluggable flush schedulers
//! - Per-key fan-out of changes to subscribed handlers
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `store`: Keys, storage backends, and the `Collection` / `Index` wrappers
//! - `reactive`: Change emitters, the update coalescer, and the update emitter
//! - `schedule`: The task queue and its immediate, microtask, delay, and
//!   render-frame schedulers
//! - `pipeline`: One queue shared by many emitters, built from a config
//! - `config`: Serde-backed pipeline configuration
//! - `error`: Error types
//!
//! Data flows one way:
//!
//! ```text
//! Collection/Index ──UPDATE──▶ UpdateCoalescer ──HAS_CHANGES──▶ UpdateEmitter
//!                                                                   │ enqueue
//!                                    handlers ◀──dispatch── TaskQueue ◀┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use ripple_core::{Collection, Handler, Pipeline};
//! use serde_json::{json, Value};
//!
//! // Create a store and a pipeline
//! let users = Collection::<Value>::new();
//! let pipeline = Pipeline::manual();
//! let emitter = pipeline.watch(&users);
//!
//! // Subscribe to one key
//! let render = Handler::new(|| println!("user a changed"));
//! emitter.subscribe_on_key("a", &render);
//!
//! // Write as often as you like
//! users.upsert_one(json!({"id": "a", "v": 1}))?;
//! users.upsert_one(json!({"id": "a", "v": 2}))?;
//!
//! // Handler runs once
//! pipeline.flush();
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod reactive;
pub mod schedule;
pub mod store;

pub use config::{PipelineConfig, SchedulerConfig};
pub use error::{ConfigError, InvalidKeyError, SchedulerError};
pub use pipeline::Pipeline;
pub use reactive::{Handler, HandlerId, Metrics, Unsubscribe, UpdateCoalescer, UpdateEmitter};
pub use schedule::{Scheduler, TaskQueue};
pub use store::{ArrayIndex, Change, Collection, Index, Key, SetIndex};
