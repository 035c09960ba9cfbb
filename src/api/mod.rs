//! Typed contract for the flashcard backend.
//!
//! The engines only talk to the backend through [`FlashcardApi`]; the
//! [`http::HttpApiClient`] implementation speaks the JSON API, tests plug in
//! scripted doubles.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    card::Flashcard,
    core::submission::{ReviewSessionLogged, ReviewSessionPayload},
    types::{CandidateId, GenerationId, GenerationStatus},
};

/// Failures surfaced by the API layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    /// The request never produced a response (connect, timeout, reset).
    #[error("network error: {0}")]
    Network(String),

    /// The backend answered with a non-success status and an error envelope.
    #[error("api error {status} ({code}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Machine-readable error code.
        code: String,
        /// Human-readable message.
        message: String,
        /// Optional structured details.
        details: Option<Value>,
    },

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Client-side validation rejected the request before sending.
    #[error("invalid request: {0}")]
    Invalid(String),

    /// The client does not implement this endpoint.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl ApiError {
    /// True when retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Network(_) => true,
            ApiError::Api { message, .. } => {
                let lower = message.to_lowercase();
                lower.contains("network") || lower.contains("fetch")
            }
            _ => false,
        }
    }

    /// True for HTTP 409.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ApiError::Api { status: 409, .. })
    }

    /// HTTP status, when the backend responded.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Generation id carried in a 409 envelope's details, if present.
    pub fn conflicting_generation_id(&self) -> Option<GenerationId> {
        let ApiError::Api {
            details: Some(details),
            ..
        } = self
        else {
            return None;
        };
        details
            .get("active_generation_id")
            .or_else(|| details.get("generation_id"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else {
            Self::Network(value.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value.to_string())
    }
}

/// Result alias for API calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Uniform error envelope `{ "error": { code, message, details? } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Error body.
    pub error: ErrorBody,
}

/// Body of [`ErrorEnvelope`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(default)]
    pub details: Option<Value>,
}

/// Cursor pagination metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    /// Cursor for the following page.
    pub next_cursor: Option<String>,
    /// True when another page exists.
    pub has_more: bool,
}

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items on this page.
    pub data: Vec<T>,
    /// Pagination cursor.
    pub page: PageInfo,
}

/// Filters for the flashcard listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlashcardQuery {
    /// Opaque cursor from a previous page.
    pub cursor: Option<String>,
    /// Page size.
    pub limit: Option<u32>,
    /// Full-text search over front/back.
    pub search: Option<String>,
    /// Only cards carrying this tag.
    pub tag: Option<String>,
    /// Only cards due for review now.
    pub due_only: bool,
}

impl FlashcardQuery {
    /// Query-string pairs in a stable order.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(cursor) = &self.cursor {
            pairs.push(("cursor", cursor.clone()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        if let Some(search) = &self.search {
            pairs.push(("search", search.clone()));
        }
        if let Some(tag) = &self.tag {
            pairs.push(("tag", tag.clone()));
        }
        if self.due_only {
            pairs.push(("due", "true".to_string()));
        }
        pairs
    }
}

/// Request to generate candidates from source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Text the model turns into flashcards.
    pub source_text: String,
    /// Model override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Sampling temperature override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl GenerationRequest {
    /// Highest temperature the backend accepts.
    pub const MAX_TEMPERATURE: f32 = 2.0;

    /// Builds a request with backend defaults for model and temperature.
    pub fn new(source_text: impl Into<String>) -> Self {
        Self {
            source_text: source_text.into(),
            model: None,
            temperature: None,
        }
    }

    /// Rejects requests the backend would refuse anyway.
    pub fn validate(&self) -> ApiResult<()> {
        if self.source_text.trim().is_empty() {
            return Err(ApiError::Invalid("source text is empty".to_string()));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=Self::MAX_TEMPERATURE).contains(&t) {
                return Err(ApiError::Invalid(format!(
                    "temperature {t} outside 0.0..={}",
                    Self::MAX_TEMPERATURE
                )));
            }
        }
        Ok(())
    }

    /// Length of the source text in characters.
    pub fn source_text_length(&self) -> usize {
        self.source_text.chars().count()
    }
}

/// Response to a successful creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationCreated {
    /// New generation id.
    pub id: GenerationId,
    /// Always `pending` for a fresh generation.
    pub status: GenerationStatus,
    /// Enqueue time.
    pub enqueued_at: DateTime<Utc>,
}

/// Server-side generation record mirrored by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    /// Generation id.
    pub id: GenerationId,
    /// Lifecycle state.
    pub status: GenerationStatus,
    /// Model used.
    #[serde(default)]
    pub model: Option<String>,
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Source text length in characters.
    #[serde(default)]
    pub source_text_length: Option<usize>,
    /// Enqueue time.
    pub enqueued_at: DateTime<Utc>,
    /// Worker start time.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal transition time.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure code, for `failed`.
    #[serde(default)]
    pub error_code: Option<String>,
    /// Failure message, for `failed`.
    #[serde(default)]
    pub error_message: Option<String>,
}

impl GenerationRecord {
    /// Local record materialized from a creation response.
    pub fn from_created(created: &GenerationCreated, request: &GenerationRequest) -> Self {
        Self {
            id: created.id.clone(),
            status: created.status,
            model: request.model.clone(),
            temperature: request.temperature,
            source_text_length: Some(request.source_text_length()),
            enqueued_at: created.enqueued_at,
            started_at: None,
            completed_at: None,
            error_code: None,
            error_message: None,
        }
    }
}

/// Review state of an AI-proposed card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateStatus {
    /// Awaiting review.
    Proposed,
    /// Edited, still awaiting acceptance.
    Edited,
    /// Turned into a flashcard.
    Accepted,
    /// Discarded.
    Rejected,
}

/// AI-proposed flashcard awaiting review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Candidate id.
    pub id: CandidateId,
    /// Generation that produced it.
    pub generation_id: GenerationId,
    /// Proposed front.
    pub front: String,
    /// Proposed back.
    pub back: String,
    /// Review state.
    pub status: CandidateStatus,
}

impl CandidateStatus {
    /// True while the candidate still awaits a verdict.
    pub fn is_pending(self) -> bool {
        matches!(self, CandidateStatus::Proposed | CandidateStatus::Edited)
    }
}

/// Replacement text for a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateEdit {
    /// New front.
    pub front: String,
    /// New back.
    pub back: String,
}

/// Backend operations the engines depend on.
#[async_trait]
pub trait FlashcardApi: Send + Sync {
    /// Persists a graded session.
    async fn log_review_session(&self, payload: &ReviewSessionPayload) -> ApiResult<ReviewSessionLogged>;

    /// Enqueues a generation. Fails with a 409 when one is already active.
    async fn create_generation(&self, request: &GenerationRequest) -> ApiResult<GenerationCreated>;

    /// Nudges the async worker. Callers treat failure as non-fatal.
    async fn trigger_generation_processing(&self, id: &str) -> ApiResult<()>;

    /// Current server-side state of a generation.
    async fn get_generation(&self, id: &str) -> ApiResult<GenerationRecord>;

    /// Requests cancellation and returns the updated record.
    async fn cancel_generation(&self, id: &str) -> ApiResult<GenerationRecord>;

    /// The user's pending or running generation, if any.
    async fn find_active_generation(&self) -> ApiResult<Option<GenerationRecord>> {
        Ok(None)
    }

    /// One page of the user's flashcards.
    async fn list_flashcards(&self, _query: &FlashcardQuery) -> ApiResult<Page<Flashcard>> {
        Err(ApiError::Unsupported("list_flashcards"))
    }

    /// One page of candidates for a generation.
    async fn list_candidates(
        &self,
        _generation_id: &str,
        _cursor: Option<&str>,
    ) -> ApiResult<Page<Candidate>> {
        Err(ApiError::Unsupported("list_candidates"))
    }

    /// Accepts a candidate, optionally with edited text, creating a flashcard.
    async fn accept_candidate(&self, _id: &str, _edit: Option<&CandidateEdit>) -> ApiResult<Flashcard> {
        Err(ApiError::Unsupported("accept_candidate"))
    }

    /// Rejects a candidate.
    async fn reject_candidate(&self, _id: &str) -> ApiResult<()> {
        Err(ApiError::Unsupported("reject_candidate"))
    }
}

/// User's verdict on one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateDecision {
    /// Accept as proposed.
    Accept,
    /// Accept with replacement text.
    AcceptEdited(CandidateEdit),
    /// Discard.
    Reject,
    /// Leave it for a later review.
    Skip,
}

impl CandidateDecision {
    /// Sends the verdict for candidate `id`; accepts return the new flashcard.
    pub async fn apply(&self, api: &dyn FlashcardApi, id: &str) -> ApiResult<Option<Flashcard>> {
        match self {
            CandidateDecision::Accept => api.accept_candidate(id, None).await.map(Some),
            CandidateDecision::AcceptEdited(edit) => {
                api.accept_candidate(id, Some(edit)).await.map(Some)
            }
            CandidateDecision::Reject => api.reject_candidate(id).await.map(|()| None),
            CandidateDecision::Skip => Ok(None),
        }
    }
}

/// Every candidate of `generation_id` that still awaits a verdict, across
/// all pages.
pub async fn pending_candidates(
    api: &dyn FlashcardApi,
    generation_id: &str,
) -> ApiResult<Vec<Candidate>> {
    let mut pending = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = api.list_candidates(generation_id, cursor.as_deref()).await?;
        pending.extend(page.data.into_iter().filter(|c| c.status.is_pending()));
        if !page.page.has_more {
            break;
        }
        match page.page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    Ok(pending)
}
