use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use serde_json::Value;

use crate::{
    card::{ReviewCard, ReviewSessionConfig, ReviewSessionEntry},
    core::submission::ReviewSessionPayload,
    types::{Outcome, SessionId, SessionStatus},
};

/// Hard cap on queue length; extra cards are dropped.
pub const MAX_SESSION_CARDS: usize = 100;

/// Graded-count progress shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Number of graded cards.
    pub current_index: usize,
    /// Queue length.
    pub total: usize,
}

/// End-of-session statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    /// Graded cards.
    pub reviewed: usize,
    /// Cards advanced without a grade.
    pub skipped: usize,
    /// Cards never reached.
    pub remaining: usize,
    /// Count per outcome.
    pub by_outcome: HashMap<Outcome, usize>,
    /// Mean of known response times.
    pub mean_response_ms: Option<u64>,
    /// Elapsed time from start to completion (or now).
    pub duration_ms: i64,
}

/// Serializable view of the session aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewSessionSnapshot {
    /// Session id.
    pub session_id: SessionId,
    /// Lifecycle state.
    pub status: SessionStatus,
    /// Queue pointer.
    pub current_index: usize,
    /// Queue length.
    pub total: usize,
    /// Card under review, if any.
    pub current_card: Option<ReviewCard>,
    /// Reveal flag for the current card.
    pub is_answer_revealed: bool,
    /// Graded-count progress.
    pub progress: Progress,
    /// Whether `submit` would be accepted.
    pub can_submit: bool,
    /// Whether `go_next` would be accepted.
    pub can_go_next: bool,
    /// Graded entries so far.
    pub entries: Vec<ReviewSessionEntry>,
    /// Session start.
    pub started_at: DateTime<Utc>,
    /// Set once, when the queue is exhausted.
    pub completed_at: Option<DateTime<Utc>>,
    /// Count acknowledged by the backend.
    pub logged: Option<usize>,
    /// Last submission failure.
    pub error: Option<String>,
}

/// Single-pass review session state machine.
///
/// All operations are synchronous and side-effect free apart from the
/// aggregate itself. Calls that violate a precondition are ignored and
/// report `false`.
#[derive(Debug, Clone)]
pub struct ReviewSession {
    session_id: SessionId,
    cards: Vec<ReviewCard>,
    current_index: usize,
    entries: Vec<ReviewSessionEntry>,
    skipped: usize,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    status: SessionStatus,
    revealed_at: Option<DateTime<Utc>>,
    logged: Option<usize>,
    error: Option<String>,
}

impl ReviewSession {
    /// Builds a session over `config.cards`, capped at [`MAX_SESSION_CARDS`].
    pub fn new(config: ReviewSessionConfig) -> Self {
        Self::with_limit_at(config, MAX_SESSION_CARDS, Utc::now())
    }

    /// Builds a session keeping at most `max_cards` cards, started at `now`.
    pub fn with_limit_at(config: ReviewSessionConfig, max_cards: usize, now: DateTime<Utc>) -> Self {
        let cards = config
            .cards
            .into_iter()
            .take(max_cards)
            .enumerate()
            .map(|(index, card)| ReviewCard::from_flashcard(card, index))
            .collect::<Vec<_>>();

        let mut session = Self {
            session_id: SessionId::new(),
            cards,
            current_index: 0,
            entries: Vec::new(),
            skipped: 0,
            started_at: now,
            completed_at: None,
            status: SessionStatus::InProgress,
            revealed_at: None,
            logged: None,
            error: None,
        };
        session.complete_if_exhausted(now);
        session
    }

    /// Client-generated session id.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Lifecycle state.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// The (truncated) card queue.
    pub fn cards(&self) -> &[ReviewCard] {
        &self.cards
    }

    /// Graded entries in grading order.
    pub fn entries(&self) -> &[ReviewSessionEntry] {
        &self.entries
    }

    /// Queue pointer; equals graded plus skipped cards.
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Cards advanced without a grade.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Session start.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Set once, when the queue is exhausted or the session is submitted early.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Count acknowledged by the backend after a successful submit.
    pub fn logged(&self) -> Option<usize> {
        self.logged
    }

    /// Last submission failure.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Card under review, `None` once the queue is exhausted.
    pub fn current_card(&self) -> Option<&ReviewCard> {
        self.cards.get(self.current_index)
    }

    /// Reveal flag for the current card.
    pub fn is_answer_revealed(&self) -> bool {
        self.status == SessionStatus::InProgress && self.revealed_at.is_some()
    }

    /// Graded-count progress.
    pub fn progress(&self) -> Progress {
        Progress {
            current_index: self.entries.len(),
            total: self.cards.len(),
        }
    }

    /// True while the current card's answer is revealed.
    pub fn can_go_next(&self) -> bool {
        self.is_answer_revealed() && self.current_card().is_some()
    }

    /// True when there are entries and nothing has been acknowledged yet.
    pub fn can_submit(&self) -> bool {
        !self.entries.is_empty()
            && self.logged.is_none()
            && matches!(
                self.status,
                SessionStatus::InProgress | SessionStatus::Completed | SessionStatus::Error
            )
    }

    /// [`reveal_answer_at`](Self::reveal_answer_at) with the current time.
    pub fn reveal_answer(&mut self) -> bool {
        self.reveal_answer_at(Utc::now())
    }

    /// Marks the current card as revealed. Only the first reveal per card
    /// stamps the response-time origin.
    pub fn reveal_answer_at(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != SessionStatus::InProgress || self.current_card().is_none() {
            return false;
        }
        if self.revealed_at.is_none() {
            self.revealed_at = Some(now);
        }
        true
    }

    /// Grades the current card with the current time and no extras.
    pub fn record_outcome(&mut self, outcome: Outcome) -> bool {
        self.record_outcome_at(outcome, None, None, Utc::now())
    }

    /// Appends an entry for the current card and advances. The response time
    /// runs from the first reveal to `now`.
    pub fn record_outcome_at(
        &mut self,
        outcome: Outcome,
        was_learning_step: Option<bool>,
        payload: Option<Value>,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.can_go_next() {
            return false;
        }
        let Some(card) = self.current_card() else {
            return false;
        };

        let response_time_ms = self
            .revealed_at
            .map(|at| (now - at).num_milliseconds().max(0) as u64);

        let entry = ReviewSessionEntry {
            card_id: card.id.clone(),
            outcome,
            grade: outcome.grade(),
            response_time_ms,
            prev_interval_days: card.interval_days,
            was_learning_step,
            payload,
            graded_at: now,
        };

        self.entries.push(entry);
        self.advance(now);
        true
    }

    /// [`go_next_at`](Self::go_next_at) with the current time.
    pub fn go_next(&mut self) -> bool {
        self.go_next_at(Utc::now())
    }

    /// Advances past a revealed card without grading it. The card is
    /// counted as skipped and produces no entry.
    pub fn go_next_at(&mut self, now: DateTime<Utc>) -> bool {
        if !self.can_go_next() {
            return false;
        }
        self.skipped += 1;
        self.advance(now);
        true
    }

    /// Moves to `submitting` and returns the payload to send, or `None` when
    /// submission is not allowed. Ending an in-progress session early stamps
    /// `completed_at`.
    pub fn begin_submit(&mut self) -> Option<ReviewSessionPayload> {
        self.begin_submit_at(Utc::now())
    }

    /// [`begin_submit`](Self::begin_submit) at an explicit time.
    pub fn begin_submit_at(&mut self, now: DateTime<Utc>) -> Option<ReviewSessionPayload> {
        if !self.can_submit() {
            return None;
        }
        if self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        self.status = SessionStatus::Submitting;
        self.revealed_at = None;
        self.error = None;
        Some(ReviewSessionPayload::from_session(self))
    }

    /// Records the backend acknowledgement; only valid while submitting.
    pub fn finish_submit(&mut self, logged: usize) -> bool {
        if self.status != SessionStatus::Submitting {
            return false;
        }
        self.status = SessionStatus::Completed;
        self.logged = Some(logged);
        true
    }

    /// Moves a submitting session to `error`, keeping its entries.
    pub fn fail_submit(&mut self, message: impl Into<String>) -> bool {
        if self.status != SessionStatus::Submitting {
            return false;
        }
        self.status = SessionStatus::Error;
        self.error = Some(message.into());
        true
    }

    /// Statistics as of now.
    pub fn summary(&self) -> SessionSummary {
        self.summary_at(Utc::now())
    }

    /// Statistics with the duration measured up to `now` while unfinished.
    pub fn summary_at(&self, now: DateTime<Utc>) -> SessionSummary {
        let mut by_outcome = HashMap::new();
        for entry in &self.entries {
            *by_outcome.entry(entry.outcome).or_insert(0usize) += 1;
        }

        let times = self
            .entries
            .iter()
            .filter_map(|e| e.response_time_ms)
            .collect::<Vec<_>>();
        let mean_response_ms = if times.is_empty() {
            None
        } else {
            Some(times.iter().sum::<u64>() / times.len() as u64)
        };

        let end = self.completed_at.unwrap_or(now);
        SessionSummary {
            reviewed: self.entries.len(),
            skipped: self.skipped,
            remaining: self.cards.len() - self.current_index,
            by_outcome,
            mean_response_ms,
            duration_ms: (end - self.started_at).num_milliseconds(),
        }
    }

    /// Serializable copy of the whole aggregate.
    pub fn snapshot(&self) -> ReviewSessionSnapshot {
        ReviewSessionSnapshot {
            session_id: self.session_id,
            status: self.status,
            current_index: self.current_index,
            total: self.cards.len(),
            current_card: self.current_card().cloned(),
            is_answer_revealed: self.is_answer_revealed(),
            progress: self.progress(),
            can_submit: self.can_submit(),
            can_go_next: self.can_go_next(),
            entries: self.entries.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            logged: self.logged,
            error: self.error.clone(),
        }
    }

    fn advance(&mut self, now: DateTime<Utc>) {
        self.current_index += 1;
        self.revealed_at = None;
        self.complete_if_exhausted(now);
    }

    fn complete_if_exhausted(&mut self, now: DateTime<Utc>) {
        if self.current_index >= self.cards.len() && self.completed_at.is_none() {
            self.current_index = self.cards.len();
            self.completed_at = Some(now);
            self.status = SessionStatus::Completed;
        }
    }
}
