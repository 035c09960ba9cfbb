//! `reqwest` implementation of [`FlashcardApi`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::json;

use crate::{
    card::Flashcard,
    core::submission::{ReviewSessionLogged, ReviewSessionPayload},
};

use super::{
    ApiError, ApiResult, Candidate, CandidateEdit, ErrorEnvelope, FlashcardApi, FlashcardQuery,
    GenerationCreated, GenerationRecord, GenerationRequest, Page,
};

/// Connection settings for [`HttpApiClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL, e.g. `https://app.example.com`.
    pub base_url: String,
    /// Bearer token sent with every request.
    pub api_token: Option<String>,
    /// Per-request timeout.
    pub timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            api_token: None,
            timeout_ms: 30_000,
        }
    }
}

/// JSON API client.
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    client: Client,
    config: ClientConfig,
}

impl HttpApiClient {
    /// Builds a client with its own connection pool.
    pub fn new(config: ClientConfig) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.config.api_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> ApiResult<T> {
        let req = self.authorize(self.client.get(self.url(path)).query(query));
        decode(req.send().await?).await
    }

    async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
    ) -> ApiResult<T> {
        let req = self.authorize(self.client.request(method, self.url(path)).json(body));
        decode(req.send().await?).await
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> ApiResult<T> {
    let resp = check_status(resp).await?;
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn check_status(resp: Response) -> ApiResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let text = resp.text().await.unwrap_or_default();
    let err = match serde_json::from_str::<ErrorEnvelope>(&text) {
        Ok(env) => ApiError::Api {
            status: status.as_u16(),
            code: env.error.code,
            message: env.error.message,
            details: env.error.details,
        },
        Err(_) => ApiError::Api {
            status: status.as_u16(),
            code: "http_error".to_string(),
            message: if text.is_empty() {
                status.to_string()
            } else {
                text
            },
            details: None,
        },
    };
    tracing::debug!(status = status.as_u16(), error = %err, "api request failed");
    Err(err)
}

#[async_trait]
impl FlashcardApi for HttpApiClient {
    async fn log_review_session(&self, payload: &ReviewSessionPayload) -> ApiResult<ReviewSessionLogged> {
        self.send_json(reqwest::Method::POST, "/api/review-sessions", payload)
            .await
    }

    async fn create_generation(&self, request: &GenerationRequest) -> ApiResult<GenerationCreated> {
        request.validate()?;
        self.send_json(reqwest::Method::POST, "/api/generations", request)
            .await
    }

    async fn trigger_generation_processing(&self, id: &str) -> ApiResult<()> {
        let path = format!("/api/generations/{id}/process");
        let req = self.authorize(self.client.post(self.url(&path)));
        check_status(req.send().await?).await?;
        Ok(())
    }

    async fn get_generation(&self, id: &str) -> ApiResult<GenerationRecord> {
        self.get_json(&format!("/api/generations/{id}"), &[]).await
    }

    async fn cancel_generation(&self, id: &str) -> ApiResult<GenerationRecord> {
        self.send_json(
            reqwest::Method::PATCH,
            &format!("/api/generations/{id}"),
            &json!({ "status": "cancelled" }),
        )
        .await
    }

    async fn find_active_generation(&self) -> ApiResult<Option<GenerationRecord>> {
        let page: Page<GenerationRecord> = self
            .get_json(
                "/api/generations",
                &[
                    ("status", "pending,running".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(page.data.into_iter().find(|g| g.status.is_active()))
    }

    async fn list_flashcards(&self, query: &FlashcardQuery) -> ApiResult<Page<Flashcard>> {
        self.get_json("/api/flashcards", &query.to_pairs()).await
    }

    async fn list_candidates(&self, generation_id: &str, cursor: Option<&str>) -> ApiResult<Page<Candidate>> {
        let query = cursor
            .map(|c| vec![("cursor", c.to_string())])
            .unwrap_or_default();
        self.get_json(&format!("/api/generations/{generation_id}/candidates"), &query)
            .await
    }

    async fn accept_candidate(&self, id: &str, edit: Option<&CandidateEdit>) -> ApiResult<Flashcard> {
        let path = format!("/api/candidates/{id}/accept");
        match edit {
            Some(edit) => self.send_json(reqwest::Method::POST, &path, edit).await,
            None => self.send_json(reqwest::Method::POST, &path, &json!({})).await,
        }
    }

    async fn reject_candidate(&self, id: &str) -> ApiResult<()> {
        let path = format!("/api/candidates/{id}/reject");
        let req = self.authorize(self.client.post(self.url(&path)));
        check_status(req.send().await?).await?;
        Ok(())
    }
}
