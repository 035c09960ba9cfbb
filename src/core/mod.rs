//! Pure review-session state machine and its wire payload.

/// Review session aggregate and transitions.
pub mod session;
/// Submission payload types.
pub mod submission;
