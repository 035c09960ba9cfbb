//! Wire payload for the review-session persistence endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    card::ReviewSessionEntry,
    types::{CardId, Outcome, SessionId},
};

use super::session::ReviewSession;

/// One graded card on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewPayloadItem {
    /// Graded card.
    pub card_id: CardId,
    /// Self-assessed outcome.
    pub outcome: Outcome,
    /// Milliseconds between reveal and grading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    /// Interval hint: the interval the card had before this review.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_interval_days: Option<u32>,
    /// Learning-step flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub was_learning_step: Option<bool>,
    /// Opaque extra data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl From<&ReviewSessionEntry> for ReviewPayloadItem {
    fn from(entry: &ReviewSessionEntry) -> Self {
        Self {
            card_id: entry.card_id.clone(),
            outcome: entry.outcome,
            response_time_ms: entry.response_time_ms,
            prev_interval_days: entry.prev_interval_days,
            was_learning_step: entry.was_learning_step,
            payload: entry.payload.clone(),
        }
    }
}

/// Body posted when a session is submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSessionPayload {
    /// Client-generated session id.
    pub session_id: SessionId,
    /// Session start.
    pub started_at: DateTime<Utc>,
    /// Session end; the submit time when the queue was not exhausted.
    pub completed_at: DateTime<Utc>,
    /// Graded cards in grading order.
    pub reviews: Vec<ReviewPayloadItem>,
}

impl ReviewSessionPayload {
    /// Builds the payload from the session's current entries.
    pub fn from_session(session: &ReviewSession) -> Self {
        Self {
            session_id: session.session_id(),
            started_at: session.started_at(),
            completed_at: session.completed_at().unwrap_or_else(Utc::now),
            reviews: session.entries().iter().map(ReviewPayloadItem::from).collect(),
        }
    }
}

/// Acknowledgement returned by the persistence endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewSessionLogged {
    /// Number of reviews the backend stored.
    pub logged: usize,
}
