//! Error types.
//!
//! Every error in this crate is local and synchronous. Nothing is retried:
//! a failed mutation leaves its store untouched, and a scheduler that cannot
//! run in the current environment refuses to be constructed.

use thiserror::Error;

/// A mutation could not determine the primary key of an entity.
///
/// Raised by [`Collection::upsert_one`](crate::store::Collection::upsert_one)
/// and [`Collection::upsert_many`](crate::store::Collection::upsert_many).
/// No partial write happens when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", describe_invalid_key(.position))]
pub struct InvalidKeyError {
    /// Position of the offending entity within a batch, if it came from one.
    pub position: Option<usize>,
}

fn describe_invalid_key(position: &Option<usize>) -> String {
    match position {
        Some(position) => format!("entity at position {position} has no primary key"),
        None => "entity has no primary key".to_string(),
    }
}

impl InvalidKeyError {
    pub(crate) fn single() -> Self {
        Self { position: None }
    }

    pub(crate) fn at(position: usize) -> Self {
        Self {
            position: Some(position),
        }
    }
}

/// A scheduler strategy cannot run in the current environment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// The strategy defers work onto a tokio runtime and none is running.
    #[error("{strategy} scheduler requires a running tokio runtime")]
    RuntimeUnavailable { strategy: &'static str },
}

/// Pipeline configuration could not be read.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid pipeline config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}
