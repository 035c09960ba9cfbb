//! Engine event stream payloads.

use crate::types::{CardId, GenerationId, GenerationStatus, Outcome};

/// Events emitted by the review session engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The current card's answer was revealed.
    Revealed {
        /// Queue position.
        index: usize,
    },
    /// A card was graded.
    Graded {
        /// Graded card.
        card_id: CardId,
        /// Chosen outcome.
        outcome: Outcome,
        /// Queue position.
        index: usize,
    },
    /// A revealed card was passed over without a grade.
    Skipped {
        /// Skipped card.
        card_id: CardId,
        /// Queue position.
        index: usize,
    },
    /// The queue is exhausted.
    Completed {
        /// Graded cards.
        reviewed: usize,
    },
    /// A submission attempt chain started.
    SubmitStarted {
        /// Entries being sent.
        entries: usize,
    },
    /// A transient failure will be retried.
    RetryScheduled {
        /// Retry number, starting at 1.
        attempt: u32,
        /// Backoff before the retry.
        delay_ms: u64,
    },
    /// The backend acknowledged the session.
    Submitted {
        /// Reviews stored by the backend.
        logged: usize,
    },
    /// Submission failed for good.
    SubmitFailed {
        /// Failure message.
        message: String,
    },
}

/// Events emitted by the generation engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEvent {
    /// A new generation was enqueued.
    Created {
        /// Generation id.
        id: GenerationId,
    },
    /// An existing active generation was re-attached.
    Attached {
        /// Generation id.
        id: GenerationId,
        /// Status at attach time.
        status: GenerationStatus,
    },
    /// A poll observed a new non-terminal status.
    StatusChanged {
        /// Generation id.
        id: GenerationId,
        /// New status.
        status: GenerationStatus,
    },
    /// A poll observed a terminal status; polling stopped.
    Finished {
        /// Generation id.
        id: GenerationId,
        /// Terminal status.
        status: GenerationStatus,
    },
    /// The backend confirmed a cancel request.
    Cancelled {
        /// Generation id.
        id: GenerationId,
    },
    /// Creation, polling or cancellation failed.
    Failed {
        /// Failure message.
        message: String,
    },
    /// The engine returned to idle.
    Reset,
}
