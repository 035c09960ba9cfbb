use std::sync::Arc;

use serde_json::Value;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
    time::Duration,
};

use crate::{
    api::{ApiError, FlashcardApi},
    card::ReviewSessionConfig,
    core::{
        session::{MAX_SESSION_CARDS, ReviewSession, ReviewSessionSnapshot, SessionSummary},
        submission::{ReviewSessionLogged, ReviewSessionPayload},
    },
    types::{Outcome, SessionStatus},
};

use super::{RuntimeError, events::SessionEvent};

/// Tunables for a review session engine.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Queue cap; larger decks are truncated.
    pub max_cards: usize,
    /// Retries after the first failed submit, transient errors only.
    pub max_submit_retries: u32,
    /// Retry `n` waits `n * retry_base_delay_ms`.
    pub retry_base_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_cards: MAX_SESSION_CARDS,
            max_submit_retries: 2,
            retry_base_delay_ms: 1000,
        }
    }
}

/// Cloneable handle to a running review session.
///
/// Dropping every handle stops the engine and abandons a submit that is
/// still retrying.
pub struct ReviewSessionHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl Clone for ReviewSessionHandle {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
            events_tx: self.events_tx.clone(),
        }
    }
}

type SubmitReply = oneshot::Sender<Result<Option<usize>, RuntimeError>>;

enum Command {
    Reveal {
        resp: oneshot::Sender<bool>,
    },
    Record {
        outcome: Outcome,
        was_learning_step: Option<bool>,
        payload: Option<Value>,
        resp: oneshot::Sender<bool>,
    },
    GoNext {
        resp: oneshot::Sender<bool>,
    },
    Submit {
        resp: SubmitReply,
    },
    Snapshot {
        resp: oneshot::Sender<ReviewSessionSnapshot>,
    },
    Summary {
        resp: oneshot::Sender<SessionSummary>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

/// Builds a session from `input` and spawns its engine.
pub fn spawn_review_session(
    input: ReviewSessionConfig,
    api: Arc<dyn FlashcardApi>,
    config: SessionConfig,
) -> ReviewSessionHandle {
    let session = ReviewSession::with_limit_at(input, config.max_cards, chrono::Utc::now());
    spawn_with_session(session, api, config)
}

/// Spawns an engine around an already built session.
pub fn spawn_with_session(
    session: ReviewSession,
    api: Arc<dyn FlashcardApi>,
    config: SessionConfig,
) -> ReviewSessionHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(64);
    let (events_tx, _) = broadcast::channel::<SessionEvent>(256);
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Result<ReviewSessionLogged, ApiError>>();

    let events_tx_loop = events_tx.clone();

    tracing::info!(
        session_id = %session.session_id(),
        cards = session.cards().len(),
        "review session started"
    );

    tokio::spawn(async move {
        let mut session = session;
        let mut waiters: Vec<SubmitReply> = Vec::new();
        let mut submit_task: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break; };
                    let done = handle_command(
                        cmd,
                        &mut session,
                        &events_tx_loop,
                        &api,
                        &config,
                        &done_tx,
                        &mut waiters,
                        &mut submit_task,
                    );
                    if done {
                        break;
                    }
                }
                Some(result) = done_rx.recv() => {
                    submit_task = None;
                    let reply = finish_submission(&mut session, &events_tx_loop, result);
                    for waiter in waiters.drain(..) {
                        let _ = waiter.send(reply.as_ref().map(|v| Some(*v)).map_err(|e| RuntimeError::Api(e.clone())));
                    }
                }
            }
        }

        if let Some(task) = submit_task {
            task.abort();
        }
    });

    ReviewSessionHandle { cmd_tx, events_tx }
}

impl ReviewSessionHandle {
    /// Subscribes to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Shows the back of the current card; `false` when nothing changed.
    pub async fn reveal_answer(&self) -> Result<bool, RuntimeError> {
        self.request(|resp| Command::Reveal { resp }).await
    }

    /// Grades the current card, once its answer is revealed.
    pub async fn record_outcome(&self, outcome: Outcome) -> Result<bool, RuntimeError> {
        self.record_outcome_with(outcome, None, None).await
    }

    /// [`record_outcome`](Self::record_outcome) with the optional
    /// learning-step flag and opaque payload forwarded to the backend.
    pub async fn record_outcome_with(
        &self,
        outcome: Outcome,
        was_learning_step: Option<bool>,
        payload: Option<Value>,
    ) -> Result<bool, RuntimeError> {
        self.request(|resp| Command::Record {
            outcome,
            was_learning_step,
            payload,
            resp,
        })
        .await
    }

    /// Skips the current card without grading it.
    pub async fn go_next(&self) -> Result<bool, RuntimeError> {
        self.request(|resp| Command::GoNext { resp }).await
    }

    /// Submits graded entries and resolves once the attempt chain settles.
    ///
    /// Returns `Ok(None)` when submission is not allowed right now (no
    /// entries, already submitting, or already acknowledged).
    pub async fn submit(&self) -> Result<Option<usize>, RuntimeError> {
        self.request(|resp| Command::Submit { resp }).await?
    }

    /// Read-only copy of the session state.
    pub async fn snapshot(&self) -> Result<ReviewSessionSnapshot, RuntimeError> {
        self.request(|resp| Command::Snapshot { resp }).await
    }

    /// Aggregate counts for the finished or in-progress session.
    pub async fn summary(&self) -> Result<SessionSummary, RuntimeError> {
        self.request(|resp| Command::Summary { resp }).await
    }

    /// Stops the engine.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Shutdown { resp }).await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_command(
    cmd: Command,
    session: &mut ReviewSession,
    events_tx: &broadcast::Sender<SessionEvent>,
    api: &Arc<dyn FlashcardApi>,
    config: &SessionConfig,
    done_tx: &mpsc::UnboundedSender<Result<ReviewSessionLogged, ApiError>>,
    waiters: &mut Vec<SubmitReply>,
    submit_task: &mut Option<JoinHandle<()>>,
) -> bool {
    match cmd {
        Command::Reveal { resp } => {
            let index = session.current_index();
            let ok = session.reveal_answer();
            if ok {
                let _ = events_tx.send(SessionEvent::Revealed { index });
            }
            let _ = resp.send(ok);
        }
        Command::Record {
            outcome,
            was_learning_step,
            payload,
            resp,
        } => {
            let card_id = session.current_card().map(|c| c.id.clone());
            let index = session.current_index();
            let ok = session.record_outcome_at(outcome, was_learning_step, payload, chrono::Utc::now());
            if let (true, Some(card_id)) = (ok, card_id) {
                let _ = events_tx.send(SessionEvent::Graded {
                    card_id,
                    outcome,
                    index,
                });
                emit_completion(session, events_tx);
            }
            let _ = resp.send(ok);
        }
        Command::GoNext { resp } => {
            let card_id = session.current_card().map(|c| c.id.clone());
            let index = session.current_index();
            let ok = session.go_next();
            if let (true, Some(card_id)) = (ok, card_id) {
                let _ = events_tx.send(SessionEvent::Skipped { card_id, index });
                emit_completion(session, events_tx);
            }
            let _ = resp.send(ok);
        }
        Command::Submit { resp } => match session.begin_submit() {
            Some(payload) => {
                tracing::info!(
                    session_id = %payload.session_id,
                    entries = payload.reviews.len(),
                    "submitting review session"
                );
                let _ = events_tx.send(SessionEvent::SubmitStarted {
                    entries: payload.reviews.len(),
                });
                waiters.push(resp);
                *submit_task = Some(spawn_submission(
                    Arc::clone(api),
                    payload,
                    config.clone(),
                    events_tx.clone(),
                    done_tx.clone(),
                ));
            }
            None => {
                let _ = resp.send(Ok(None));
            }
        },
        Command::Snapshot { resp } => {
            let _ = resp.send(session.snapshot());
        }
        Command::Summary { resp } => {
            let _ = resp.send(session.summary());
        }
        Command::Shutdown { resp } => {
            let _ = resp.send(());
            return true;
        }
    }

    false
}

fn emit_completion(session: &ReviewSession, events_tx: &broadcast::Sender<SessionEvent>) {
    if session.status() == SessionStatus::Completed && session.current_card().is_none() {
        tracing::info!(
            session_id = %session.session_id(),
            reviewed = session.entries().len(),
            skipped = session.skipped(),
            "review session completed"
        );
        let _ = events_tx.send(SessionEvent::Completed {
            reviewed: session.entries().len(),
        });
    }
}

fn spawn_submission(
    api: Arc<dyn FlashcardApi>,
    payload: ReviewSessionPayload,
    config: SessionConfig,
    events_tx: broadcast::Sender<SessionEvent>,
    done_tx: mpsc::UnboundedSender<Result<ReviewSessionLogged, ApiError>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = submit_with_retry(api.as_ref(), &payload, &config, &events_tx).await;
        let _ = done_tx.send(result);
    })
}

/// Posts `payload`, retrying transient failures with linear backoff.
/// Every attempt sends the same payload.
async fn submit_with_retry(
    api: &dyn FlashcardApi,
    payload: &ReviewSessionPayload,
    config: &SessionConfig,
    events_tx: &broadcast::Sender<SessionEvent>,
) -> Result<ReviewSessionLogged, ApiError> {
    let mut retry_count: u32 = 0;
    loop {
        match api.log_review_session(payload).await {
            Ok(ack) => return Ok(ack),
            Err(err) if err.is_transient() && retry_count < config.max_submit_retries => {
                let delay_ms = config.retry_base_delay_ms * u64::from(retry_count + 1);
                retry_count += 1;
                tracing::warn!(
                    session_id = %payload.session_id,
                    attempt = retry_count,
                    delay_ms,
                    error = %err,
                    "session submit failed, retrying"
                );
                let _ = events_tx.send(SessionEvent::RetryScheduled {
                    attempt: retry_count,
                    delay_ms,
                });
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

fn finish_submission(
    session: &mut ReviewSession,
    events_tx: &broadcast::Sender<SessionEvent>,
    result: Result<ReviewSessionLogged, ApiError>,
) -> Result<usize, ApiError> {
    match result {
        Ok(ack) => {
            session.finish_submit(ack.logged);
            tracing::info!(
                session_id = %session.session_id(),
                logged = ack.logged,
                "review session saved"
            );
            let _ = events_tx.send(SessionEvent::Submitted { logged: ack.logged });
            Ok(ack.logged)
        }
        Err(err) => {
            session.fail_submit(err.to_string());
            tracing::error!(
                session_id = %session.session_id(),
                error = %err,
                "review session submit failed"
            );
            let _ = events_tx.send(SessionEvent::SubmitFailed {
                message: err.to_string(),
            });
            Err(err)
        }
    }
}
