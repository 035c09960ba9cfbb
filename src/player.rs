//! Presentation controller for a review session.

use crate::{
    core::session::{Progress, SessionSummary},
    keys::{KeyDispatch, KeyInput, dispatch_key},
    runtime::{RuntimeError, session::ReviewSessionHandle},
    types::SessionStatus,
};

/// Shortcut legend shown under the card.
pub const SHORTCUT_HINTS: &[(&str, &str)] = &[
    ("Space", "show answer"),
    ("1", "again"),
    ("2", "fail"),
    ("3", "hard"),
    ("4", "good"),
    ("5", "easy"),
    ("Enter / →", "skip"),
];

/// What the UI should render right now.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerView {
    /// The session was built from an empty card list.
    Empty,
    /// A card is under review.
    Card {
        /// Question side.
        front: String,
        /// Answer side, once revealed.
        back: Option<String>,
        /// Graded-count progress.
        progress: Progress,
        /// Whether advancing without a grade is possible.
        can_go_next: bool,
    },
    /// No card left, or the session was submitted early.
    Finished {
        /// Lifecycle state (`completed`, `submitting` or `error`).
        status: SessionStatus,
        /// Session statistics.
        summary: SessionSummary,
        /// Whether a submit would be accepted.
        can_submit: bool,
        /// Count acknowledged by the backend.
        logged: Option<usize>,
        /// Last submission failure.
        error: Option<String>,
    },
}

/// Drives one session on behalf of the UI.
pub struct ReviewPlayer {
    session: ReviewSessionHandle,
}

impl ReviewPlayer {
    /// Wraps a running session.
    pub fn new(session: ReviewSessionHandle) -> Self {
        Self { session }
    }

    /// Underlying session handle.
    pub fn session(&self) -> &ReviewSessionHandle {
        &self.session
    }

    /// Routes a key press to the session.
    pub async fn handle_key(&self, input: &KeyInput) -> Result<KeyDispatch, RuntimeError> {
        dispatch_key(&self.session, input).await
    }

    /// Submits the graded entries; see [`ReviewSessionHandle::submit`].
    pub async fn finish(&self) -> Result<Option<usize>, RuntimeError> {
        self.session.submit().await
    }

    /// Current view model.
    pub async fn view(&self) -> Result<PlayerView, RuntimeError> {
        let snap = self.session.snapshot().await?;

        if let (SessionStatus::InProgress, Some(card)) = (snap.status, snap.current_card.as_ref()) {
            return Ok(PlayerView::Card {
                front: card.front.clone(),
                back: snap.is_answer_revealed.then(|| card.back.clone()),
                progress: snap.progress,
                can_go_next: snap.can_go_next,
            });
        }

        if snap.total == 0 {
            return Ok(PlayerView::Empty);
        }

        let summary = self.session.summary().await?;
        Ok(PlayerView::Finished {
            status: snap.status,
            summary,
            can_submit: snap.can_submit,
            logged: snap.logged,
            error: snap.error,
        })
    }
}
