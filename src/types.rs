//! Shared primitive IDs, review outcomes and lifecycle status enums.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable flashcard identifier as issued by the backend.
pub type CardId = String;
/// Generation identifier as issued by the backend.
pub type GenerationId = String;
/// Generation candidate identifier.
pub type CandidateId = String;

/// Client-generated review session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generates a fresh random session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Self-assessed recall quality for one card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Not recalled at all; show again soon.
    Again,
    /// Recalled incorrectly.
    Fail,
    /// Recalled with significant effort.
    Hard,
    /// Recalled correctly.
    Good,
    /// Recalled instantly.
    Easy,
}

impl Outcome {
    /// All outcomes in ascending grade order.
    pub const ALL: [Outcome; 5] = [
        Outcome::Again,
        Outcome::Fail,
        Outcome::Hard,
        Outcome::Good,
        Outcome::Easy,
    ];

    /// Grade sent to the backend scheduler for this outcome.
    pub fn grade(self) -> Grade {
        let value = match self {
            Outcome::Again => 0,
            Outcome::Fail => 1,
            Outcome::Hard => 2,
            Outcome::Good => 3,
            Outcome::Easy => 4,
        };
        Grade(value)
    }

    /// Inverse of [`Outcome::grade`]. Grade 5 is the top of the scale and maps to `Easy`.
    pub fn from_grade(grade: Grade) -> Self {
        match grade.value() {
            0 => Outcome::Again,
            1 => Outcome::Fail,
            2 => Outcome::Hard,
            3 => Outcome::Good,
            _ => Outcome::Easy,
        }
    }

    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Again => "again",
            Outcome::Fail => "fail",
            Outcome::Hard => "hard",
            Outcome::Good => "good",
            Outcome::Easy => "easy",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Integer recall grade in `0..=5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Grade(u8);

impl Grade {
    /// Highest accepted grade.
    pub const MAX: u8 = 5;

    /// Validates `value` against the `0..=5` scale.
    pub fn new(value: u8) -> Option<Self> {
        (value <= Self::MAX).then_some(Self(value))
    }

    /// Raw grade value.
    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Grade {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Grade::new(value).ok_or_else(|| format!("grade {value} out of range 0..=5"))
    }
}

impl From<Grade> for u8 {
    fn from(value: Grade) -> Self {
        value.0
    }
}

/// Review session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    /// Not started.
    Idle,
    /// Cards are being revealed and graded.
    InProgress,
    /// Entries are being sent to the backend.
    Submitting,
    /// Queue exhausted or submission acknowledged.
    Completed,
    /// Submission failed after retries.
    Error,
}

/// Server-side generation lifecycle, mirrored by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    /// Enqueued, worker not started.
    Pending,
    /// Worker is producing candidates.
    Running,
    /// Candidates are ready.
    Succeeded,
    /// Worker gave up.
    Failed,
    /// Cancelled by the user.
    Cancelled,
}

impl GenerationStatus {
    /// True for `pending` and `running`.
    pub fn is_active(self) -> bool {
        matches!(self, GenerationStatus::Pending | GenerationStatus::Running)
    }

    /// True once no further automatic transition occurs.
    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    /// Only a succeeded generation leaves candidates worth reviewing.
    pub fn has_candidates(self) -> bool {
        self == GenerationStatus::Succeeded
    }
}

