#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;

use flashlearn::{
    api::{
        ApiError, ApiResult, Candidate, CandidateEdit, CandidateStatus, FlashcardApi,
        GenerationCreated, GenerationRecord, GenerationRequest, Page, PageInfo,
    },
    card::Flashcard,
    core::submission::{ReviewSessionLogged, ReviewSessionPayload},
    types::GenerationStatus,
};

pub fn card(id: &str) -> Flashcard {
    Flashcard {
        id: id.to_string(),
        front: format!("front {id}"),
        back: format!("back {id}"),
        tags: vec![],
        source: Some("manual".to_string()),
        interval_days: None,
        due_at: None,
        created_at: None,
    }
}

pub fn cards(n: usize) -> Vec<Flashcard> {
    (0..n).map(|i| card(&format!("c{i}"))).collect()
}

pub fn network_error() -> ApiError {
    ApiError::Network("error sending request: connection reset".to_string())
}

pub fn api_error(status: u16, code: &str, message: &str) -> ApiError {
    ApiError::Api {
        status,
        code: code.to_string(),
        message: message.to_string(),
        details: None,
    }
}

pub fn conflict(active_id: Option<&str>) -> ApiError {
    ApiError::Api {
        status: 409,
        code: "generation_in_progress".to_string(),
        message: "an active generation already exists".to_string(),
        details: active_id.map(|id| json!({ "active_generation_id": id })),
    }
}

pub fn record(id: &str, status: GenerationStatus) -> GenerationRecord {
    GenerationRecord {
        id: id.to_string(),
        status,
        model: Some("gpt-4o-mini".to_string()),
        temperature: Some(0.7),
        source_text_length: Some(1200),
        enqueued_at: Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
        started_at: None,
        completed_at: None,
        error_code: None,
        error_message: None,
    }
}

pub fn created(id: &str) -> GenerationCreated {
    GenerationCreated {
        id: id.to_string(),
        status: GenerationStatus::Pending,
        enqueued_at: Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
    }
}

pub fn candidate(id: &str, status: CandidateStatus) -> Candidate {
    Candidate {
        id: id.to_string(),
        generation_id: "gen-1".to_string(),
        front: format!("front {id}"),
        back: format!("back {id}"),
        status,
    }
}

pub fn candidate_page(data: Vec<Candidate>, next_cursor: Option<&str>) -> Page<Candidate> {
    Page {
        data,
        page: PageInfo {
            next_cursor: next_cursor.map(str::to_string),
            has_more: next_cursor.is_some(),
        },
    }
}

/// Scripted responses and recorded calls for [`MockApi`].
#[derive(Default)]
pub struct MockState {
    pub submit_responses: VecDeque<ApiResult<ReviewSessionLogged>>,
    pub submitted: Vec<ReviewSessionPayload>,

    pub create_responses: VecDeque<ApiResult<GenerationCreated>>,
    pub created: Vec<GenerationRequest>,
    pub create_delay: Option<Duration>,

    pub trigger_fails: bool,
    pub triggered: Vec<String>,

    pub get_responses: VecDeque<ApiResult<GenerationRecord>>,
    pub get_fallback: Option<GenerationRecord>,
    pub get_calls: Vec<String>,

    pub cancel_responses: VecDeque<ApiResult<GenerationRecord>>,
    pub cancel_calls: Vec<String>,
    pub cancel_delay: Option<Duration>,

    pub active_lookup: Option<GenerationRecord>,
    pub active_lookup_calls: usize,

    pub candidate_pages: VecDeque<Page<Candidate>>,
    pub candidate_cursors: Vec<Option<String>>,
    pub accepted: Vec<(String, Option<CandidateEdit>)>,
    pub rejected: Vec<String>,
}

#[derive(Default, Clone)]
pub struct MockApi {
    state: Arc<Mutex<MockState>>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock lock")
    }

    pub fn arc(&self) -> Arc<dyn FlashcardApi> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl FlashcardApi for MockApi {
    async fn log_review_session(&self, payload: &ReviewSessionPayload) -> ApiResult<ReviewSessionLogged> {
        let mut state = self.state();
        state.submitted.push(payload.clone());
        state.submit_responses.pop_front().unwrap_or(Ok(ReviewSessionLogged {
            logged: payload.reviews.len(),
        }))
    }

    async fn create_generation(&self, request: &GenerationRequest) -> ApiResult<GenerationCreated> {
        let delay = {
            let mut state = self.state();
            state.created.push(request.clone());
            state.create_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        let fallback_id = format!("gen-{}", state.created.len());
        state
            .create_responses
            .pop_front()
            .unwrap_or_else(|| Ok(created(&fallback_id)))
    }

    async fn trigger_generation_processing(&self, id: &str) -> ApiResult<()> {
        let mut state = self.state();
        state.triggered.push(id.to_string());
        if state.trigger_fails {
            Err(api_error(500, "worker_unavailable", "worker unavailable"))
        } else {
            Ok(())
        }
    }

    async fn get_generation(&self, id: &str) -> ApiResult<GenerationRecord> {
        let mut state = self.state();
        state.get_calls.push(id.to_string());
        if let Some(next) = state.get_responses.pop_front() {
            return next;
        }
        match &state.get_fallback {
            Some(rec) => Ok(rec.clone()),
            None => Err(api_error(404, "not_found", "generation not found")),
        }
    }

    async fn cancel_generation(&self, id: &str) -> ApiResult<GenerationRecord> {
        let delay = {
            let mut state = self.state();
            state.cancel_calls.push(id.to_string());
            state.cancel_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        state
            .cancel_responses
            .pop_front()
            .unwrap_or_else(|| Ok(record(id, GenerationStatus::Cancelled)))
    }

    async fn find_active_generation(&self) -> ApiResult<Option<GenerationRecord>> {
        let mut state = self.state();
        state.active_lookup_calls += 1;
        Ok(state.active_lookup.clone())
    }

    async fn list_candidates(
        &self,
        _generation_id: &str,
        cursor: Option<&str>,
    ) -> ApiResult<Page<Candidate>> {
        let mut state = self.state();
        state.candidate_cursors.push(cursor.map(str::to_string));
        Ok(state
            .candidate_pages
            .pop_front()
            .unwrap_or_else(|| candidate_page(vec![], None)))
    }

    async fn accept_candidate(&self, id: &str, edit: Option<&CandidateEdit>) -> ApiResult<Flashcard> {
        self.state().accepted.push((id.to_string(), edit.cloned()));
        let mut accepted = card(id);
        if let Some(edit) = edit {
            accepted.front = edit.front.clone();
            accepted.back = edit.back.clone();
        }
        Ok(accepted)
    }

    async fn reject_candidate(&self, id: &str) -> ApiResult<()> {
        self.state().rejected.push(id.to_string());
        Ok(())
    }
}
