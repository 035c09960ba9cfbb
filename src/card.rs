//! Flashcard, review card, session entry and session input types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{CardId, Grade, Outcome};

/// Flashcard row as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flashcard {
    /// Stable flashcard identifier.
    pub id: CardId,
    /// Question side.
    pub front: String,
    /// Answer side.
    pub back: String,
    /// Free-form tags attached by the user.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Origin of the card (`manual`, `ai`, `ai-edited`).
    #[serde(default)]
    pub source: Option<String>,
    /// Current scheduler interval, when the card has been reviewed before.
    #[serde(default)]
    pub interval_days: Option<u32>,
    /// Next due timestamp, when scheduled.
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A flashcard placed in a session queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewCard {
    /// Flashcard id.
    pub id: CardId,
    /// Question side.
    pub front: String,
    /// Answer side.
    pub back: String,
    /// Position within the session queue.
    pub index: usize,
    /// Scheduler interval before this review, forwarded as an interval hint.
    pub interval_days: Option<u32>,
}

impl ReviewCard {
    /// Wraps `card` at queue position `index`.
    pub fn from_flashcard(card: Flashcard, index: usize) -> Self {
        Self {
            id: card.id,
            front: card.front,
            back: card.back,
            index,
            interval_days: card.interval_days,
        }
    }
}

/// One completed grading event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSessionEntry {
    /// Graded card.
    pub card_id: CardId,
    /// Self-assessed outcome.
    pub outcome: Outcome,
    /// Grade derived from `outcome`.
    pub grade: Grade,
    /// Milliseconds between reveal and grading.
    pub response_time_ms: Option<u64>,
    /// Interval the card had before this review.
    pub prev_interval_days: Option<u32>,
    /// True when the card was still in a learning step.
    pub was_learning_step: Option<bool>,
    /// Opaque extra data forwarded to the backend.
    pub payload: Option<Value>,
    /// Wall-clock grading time.
    pub graded_at: DateTime<Utc>,
}

/// Input for a new review session.
#[derive(Debug, Clone, Default)]
pub struct ReviewSessionConfig {
    /// Candidate cards in review order.
    pub cards: Vec<Flashcard>,
}

impl ReviewSessionConfig {
    /// Builds a config from a card list.
    pub fn new(cards: Vec<Flashcard>) -> Self {
        Self { cards }
    }
}
