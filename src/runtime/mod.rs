//! Single-writer async engines and their event streams.

use thiserror::Error;

use crate::{api::ApiError, persist::PersistError};

/// Event stream types emitted by the engines.
pub mod events;
/// Generation lifecycle engine.
pub mod generation;
/// Review session engine.
pub mod session;

/// Failures reported through engine handles.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Backend call failed.
    #[error(transparent)]
    Api(#[from] ApiError),
    /// Durable marker storage failed.
    #[error(transparent)]
    Persist(#[from] PersistError),
    /// A reset dropped the request before the backend answered.
    #[error("request interrupted by reset")]
    Interrupted,
    /// The engine task has shut down.
    #[error("engine channel closed")]
    ChannelClosed,
}
