//! Client-side engines for a flashcard learning app: spaced-repetition review
//! sessions and AI flashcard generation.
//!
//! # Examples
//!
//! Pure session state machine with [`core::session::ReviewSession`]:
//! ```
//! use flashlearn::{
//!     card::{Flashcard, ReviewSessionConfig},
//!     core::session::ReviewSession,
//!     types::{Outcome, SessionStatus},
//! };
//!
//! let card = Flashcard {
//!     id: "c1".to_string(),
//!     front: "2 + 2".to_string(),
//!     back: "4".to_string(),
//!     tags: vec![],
//!     source: None,
//!     interval_days: None,
//!     due_at: None,
//!     created_at: None,
//! };
//! let mut session = ReviewSession::new(ReviewSessionConfig::new(vec![card]));
//! assert!(!session.record_outcome(Outcome::Good)); // not revealed yet
//! assert!(session.reveal_answer());
//! assert!(session.record_outcome(Outcome::Good));
//! assert_eq!(session.status(), SessionStatus::Completed);
//! ```
//!
//! Runtime usage against the HTTP backend:
//! ```no_run
//! use std::sync::Arc;
//!
//! use flashlearn::{
//!     api::{FlashcardApi, FlashcardQuery, http::{ClientConfig, HttpApiClient}},
//!     card::ReviewSessionConfig,
//!     runtime::session::{spawn_review_session, SessionConfig},
//!     types::Outcome,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let api = Arc::new(HttpApiClient::new(ClientConfig::default()).expect("client"));
//! let page = api.list_flashcards(&FlashcardQuery::default()).await.expect("cards");
//! let handle = spawn_review_session(
//!     ReviewSessionConfig::new(page.data),
//!     api,
//!     SessionConfig::default(),
//! );
//! handle.reveal_answer().await.expect("reveal");
//! handle.record_outcome(Outcome::Good).await.expect("grade");
//! let logged = handle.submit().await.expect("submit");
//! println!("logged {logged:?}");
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```
#![deny(missing_docs)]

/// Backend contract and HTTP client.
pub mod api;
/// Flashcard and session entry types.
pub mod card;
/// Pure review-session state machine.
pub mod core;
/// Keyboard shortcut binder.
pub mod keys;
/// Durable marker storage.
pub mod persist;
/// Review player view model.
pub mod player;
/// Async session and generation engines.
pub mod runtime;
/// Shared primitive types and enums.
pub mod types;
