use std::{collections::VecDeque, future::Future, sync::Arc};

use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
    time::{Duration, Instant},
};

use crate::{
    api::{ApiError, ApiResult, FlashcardApi, GenerationCreated, GenerationRecord, GenerationRequest},
    persist::MarkerStore,
    types::{GenerationId, GenerationStatus},
};

use super::{RuntimeError, events::GenerationEvent};

/// Marker key used when none is configured.
pub const DEFAULT_MARKER_KEY: &str = "flashlearn.active_generation_id";

/// Tunables for [`spawn_generation_engine`].
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Delay between status polls of an active generation.
    pub poll_interval_ms: u64,
    /// Key under which the active generation id is persisted.
    pub marker_key: String,
    /// Re-attach to a marked generation as soon as the engine starts.
    pub resume_on_spawn: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5000,
            marker_key: DEFAULT_MARKER_KEY.to_string(),
            resume_on_spawn: true,
        }
    }
}

/// Client-side mirror of the tracked generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationState {
    /// Last known server record, if a generation is tracked.
    pub generation: Option<GenerationRecord>,
    /// A create, lookup or cancel request is waiting on the backend.
    pub is_loading: bool,
    /// A status poll is scheduled or in flight.
    pub is_polling: bool,
    /// Message of the last failure, cleared by the next successful request.
    pub error: Option<String>,
}

/// Cloneable handle to a running generation engine.
///
/// The engine stops when [`GenerationHandle::shutdown`] is called or when
/// every handle has been dropped; either way the poll timer and any backend
/// request still in flight are abandoned.
pub struct GenerationHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<GenerationEvent>,
}

impl Clone for GenerationHandle {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
            events_tx: self.events_tx.clone(),
        }
    }
}

type RecordReply = oneshot::Sender<Result<Option<GenerationRecord>, RuntimeError>>;
type CancelReply = oneshot::Sender<Result<bool, RuntimeError>>;

enum Command {
    Start {
        request: GenerationRequest,
        resp: RecordReply,
    },
    CheckActive {
        resp: RecordReply,
    },
    Cancel {
        resp: CancelReply,
    },
    Reset {
        resp: oneshot::Sender<()>,
    },
    State {
        resp: oneshot::Sender<GenerationState>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

impl Command {
    fn waits_on_backend(&self) -> bool {
        matches!(
            self,
            Command::Start { .. } | Command::CheckActive { .. } | Command::Cancel { .. }
        )
    }

    fn interrupt(self) {
        match self {
            Command::Start { resp, .. } | Command::CheckActive { resp } => {
                let _ = resp.send(Err(RuntimeError::Interrupted));
            }
            Command::Cancel { resp } => {
                let _ = resp.send(Err(RuntimeError::Interrupted));
            }
            Command::Reset { .. } | Command::State { .. } | Command::Shutdown { .. } => {}
        }
    }
}

/// Who is waiting on a marker lookup.
enum Lookup {
    /// Startup resume; nobody to answer.
    Resume,
    /// Explicit `check_active_generation` call.
    Check(RecordReply),
    /// Start hit a 409; fall back to the active-generation lookup.
    Reattach(RecordReply),
}

impl Lookup {
    fn answer(self, out: Result<Option<GenerationRecord>, RuntimeError>) {
        match self {
            Lookup::Check(resp) | Lookup::Reattach(resp) => {
                let _ = resp.send(out);
            }
            Lookup::Resume => {
                if let Err(err) = out {
                    tracing::warn!(error = %err, "could not resume active generation");
                }
            }
        }
    }
}

/// A finished backend request together with its caller.
enum Settled {
    Created {
        request: GenerationRequest,
        result: ApiResult<GenerationCreated>,
        resp: RecordReply,
    },
    Looked {
        id: GenerationId,
        result: ApiResult<GenerationRecord>,
        lookup: Lookup,
    },
    Found {
        result: ApiResult<Option<GenerationRecord>>,
        resp: RecordReply,
    },
    Cancelled {
        id: GenerationId,
        result: ApiResult<GenerationRecord>,
        resp: CancelReply,
    },
}

impl Settled {
    fn interrupt(self) {
        match self {
            Settled::Created { resp, .. } | Settled::Found { resp, .. } => {
                let _ = resp.send(Err(RuntimeError::Interrupted));
            }
            Settled::Looked { lookup, .. } => lookup.answer(Err(RuntimeError::Interrupted)),
            Settled::Cancelled { resp, .. } => {
                let _ = resp.send(Err(RuntimeError::Interrupted));
            }
        }
    }
}

struct OpResult {
    seq: u64,
    settled: Settled,
}

struct InFlight {
    seq: u64,
    task: JoinHandle<()>,
}

struct PollResult {
    epoch: u64,
    id: GenerationId,
    result: Result<GenerationRecord, ApiError>,
}

struct Engine {
    api: Arc<dyn FlashcardApi>,
    markers: Box<dyn MarkerStore>,
    config: GenerationConfig,
    state: GenerationState,
    events_tx: broadcast::Sender<GenerationEvent>,
    poll_tx: mpsc::UnboundedSender<PollResult>,
    poll_deadline: Option<Instant>,
    poll_in_flight: bool,
    // Bumped whenever the tracked generation changes; poll results carrying
    // an older epoch are dropped.
    epoch: u64,
    op_tx: mpsc::UnboundedSender<OpResult>,
    // At most one backend request at a time; later ones wait in `deferred`.
    op: Option<InFlight>,
    op_seq: u64,
    deferred: VecDeque<Command>,
    // Requests dropped by a reset; their results are answered as interrupted.
    superseded: Vec<JoinHandle<()>>,
}

/// Spawns the generation engine on the current tokio runtime.
///
/// With [`GenerationConfig::resume_on_spawn`] set, a generation id left in
/// `markers` by an earlier run is looked up right away and tracked again if
/// it is still active.
pub fn spawn_generation_engine(
    api: Arc<dyn FlashcardApi>,
    markers: Box<dyn MarkerStore>,
    config: GenerationConfig,
) -> GenerationHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(64);
    let (events_tx, _) = broadcast::channel::<GenerationEvent>(256);
    let (poll_tx, mut poll_rx) = mpsc::unbounded_channel::<PollResult>();
    let (op_tx, mut op_rx) = mpsc::unbounded_channel::<OpResult>();

    let mut engine = Engine {
        api,
        markers,
        config,
        state: GenerationState::default(),
        events_tx: events_tx.clone(),
        poll_tx,
        poll_deadline: None,
        poll_in_flight: false,
        epoch: 0,
        op_tx,
        op: None,
        op_seq: 0,
        deferred: VecDeque::new(),
        superseded: Vec::new(),
    };

    tokio::spawn(async move {
        if engine.config.resume_on_spawn {
            engine.lookup_marked(Lookup::Resume);
        }

        loop {
            let deadline = engine.poll_deadline;
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break; };
                    if engine.handle_command(cmd) {
                        break;
                    }
                }
                Some(done) = op_rx.recv() => {
                    engine.settle(done);
                }
                Some(polled) = poll_rx.recv() => {
                    engine.apply_poll(polled);
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    engine.poll_deadline = None;
                    engine.spawn_poll();
                }
            }
        }

        engine.abort_requests();
        tracing::debug!("generation engine stopped");
    });

    GenerationHandle { cmd_tx, events_tx }
}

impl GenerationHandle {
    /// Subscribes to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<GenerationEvent> {
        self.events_tx.subscribe()
    }

    /// Enqueues a generation and starts polling it.
    ///
    /// On a 409 conflict the engine re-attaches to the already active
    /// generation instead of failing; `Ok(None)` means none could be found.
    pub async fn start_generation(
        &self,
        request: GenerationRequest,
    ) -> Result<Option<GenerationRecord>, RuntimeError> {
        self.request(|resp| Command::Start { request, resp }).await?
    }

    /// Looks up the persisted marker and re-attaches if that generation is
    /// still active. Stale markers are cleared; transient failures keep them.
    pub async fn check_active_generation(&self) -> Result<Option<GenerationRecord>, RuntimeError> {
        self.request(|resp| Command::CheckActive { resp }).await?
    }

    /// Returns `Ok(false)` when there is no active generation to cancel.
    pub async fn cancel_generation(&self) -> Result<bool, RuntimeError> {
        self.request(|resp| Command::Cancel { resp }).await?
    }

    /// Drops the tracked generation and its marker without calling the
    /// backend. Requests still waiting on the backend fail with
    /// [`RuntimeError::Interrupted`].
    pub async fn reset_generation(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Reset { resp }).await
    }

    /// Current state snapshot.
    pub async fn state(&self) -> Result<GenerationState, RuntimeError> {
        self.request(|resp| Command::State { resp }).await
    }

    /// Stops the engine and abandons any in-flight backend request.
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

impl Engine {
    fn handle_command(&mut self, cmd: Command) -> bool {
        if self.op.is_some() && cmd.waits_on_backend() {
            self.deferred.push_back(cmd);
            return false;
        }

        match cmd {
            Command::Start { request, resp } => self.start(request, resp),
            Command::CheckActive { resp } => self.lookup_marked(Lookup::Check(resp)),
            Command::Cancel { resp } => self.cancel(resp),
            Command::Reset { resp } => {
                self.reset();
                let _ = resp.send(());
            }
            Command::State { resp } => {
                let _ = resp.send(self.snapshot());
            }
            Command::Shutdown { resp } => {
                self.stop_polling();
                self.abort_requests();
                let _ = resp.send(());
                return true;
            }
        }
        false
    }

    /// Runs one backend request off the actor; the result comes back through
    /// `op_tx` tagged with a sequence number.
    fn spawn_request<F>(&mut self, work: F)
    where
        F: Future<Output = Settled> + Send + 'static,
    {
        self.op_seq += 1;
        let seq = self.op_seq;
        let tx = self.op_tx.clone();
        let task = tokio::spawn(async move {
            let settled = work.await;
            let _ = tx.send(OpResult { seq, settled });
        });
        self.op = Some(InFlight { seq, task });
    }

    fn settle(&mut self, done: OpResult) {
        self.superseded.retain(|task| !task.is_finished());
        if self.op.as_ref().is_none_or(|op| op.seq != done.seq) {
            tracing::debug!(seq = done.seq, "dropping superseded backend reply");
            done.settled.interrupt();
            return;
        }
        self.op = None;

        match done.settled {
            Settled::Created { request, result, resp } => self.created(request, result, resp),
            Settled::Looked { id, result, lookup } => self.looked_up(id, result, lookup),
            Settled::Found { result, resp } => self.found(result, resp),
            Settled::Cancelled { id, result, resp } => self.cancelled(id, result, resp),
        }

        while self.op.is_none() {
            let Some(cmd) = self.deferred.pop_front() else {
                break;
            };
            self.handle_command(cmd);
        }
    }

    fn start(&mut self, request: GenerationRequest, resp: RecordReply) {
        self.state.error = None;
        if let Err(err) = request.validate() {
            let _ = resp.send(Err(self.fail(err)));
            return;
        }

        let api = Arc::clone(&self.api);
        self.spawn_request(async move {
            let result = api.create_generation(&request).await;
            Settled::Created { request, result, resp }
        });
    }

    fn created(
        &mut self,
        request: GenerationRequest,
        result: ApiResult<GenerationCreated>,
        resp: RecordReply,
    ) {
        let created = match result {
            Ok(created) => created,
            Err(err) if err.is_conflict() => {
                tracing::info!("generation already active, re-attaching");
                if let Some(id) = err.conflicting_generation_id() {
                    self.write_marker(&id);
                }
                self.lookup_marked(Lookup::Reattach(resp));
                return;
            }
            Err(err) => {
                let _ = resp.send(Err(self.fail(err)));
                return;
            }
        };

        let record = GenerationRecord::from_created(&created, &request);
        tracing::info!(generation_id = %record.id, "generation enqueued");
        self.track(record.clone());
        let _ = self.events_tx.send(GenerationEvent::Created {
            id: record.id.clone(),
        });
        self.trigger_processing(record.id.clone());
        self.arm_poll();
        let _ = resp.send(Ok(Some(record)));
    }

    fn lookup_marked(&mut self, lookup: Lookup) {
        let marked = match self.markers.get(&self.config.marker_key) {
            Ok(marked) => marked,
            Err(err) => return lookup.answer(Err(err.into())),
        };

        match (marked, lookup) {
            (Some(id), lookup) => {
                let api = Arc::clone(&self.api);
                self.spawn_request(async move {
                    let result = api.get_generation(&id).await;
                    Settled::Looked { id, result, lookup }
                });
            }
            (None, Lookup::Reattach(resp)) => self.find_active(resp),
            (None, lookup) => lookup.answer(Ok(None)),
        }
    }

    fn looked_up(&mut self, id: GenerationId, result: ApiResult<GenerationRecord>, lookup: Lookup) {
        let out = match result {
            Ok(record) if record.status.is_active() => {
                self.attach(record.clone());
                Ok(Some(record))
            }
            Ok(record) => {
                tracing::debug!(generation_id = %id, status = ?record.status, "clearing stale generation marker");
                self.remove_marker()
            }
            Err(err) if err.is_transient() => Err(err.into()),
            Err(err) => {
                tracing::debug!(generation_id = %id, error = %err, "clearing unreadable generation marker");
                self.remove_marker()
            }
        };

        match (lookup, out) {
            (Lookup::Reattach(resp), Ok(None)) => self.find_active(resp),
            (lookup, out) => lookup.answer(out),
        }
    }

    fn find_active(&mut self, resp: RecordReply) {
        let api = Arc::clone(&self.api);
        self.spawn_request(async move {
            let result = api.find_active_generation().await;
            Settled::Found { result, resp }
        });
    }

    fn found(&mut self, result: ApiResult<Option<GenerationRecord>>, resp: RecordReply) {
        let out = match result {
            Ok(Some(record)) if record.status.is_active() => {
                self.attach(record.clone());
                Ok(Some(record))
            }
            Ok(_) => Ok(None),
            Err(err) => Err(self.fail(err)),
        };
        let _ = resp.send(out);
    }

    fn cancel(&mut self, resp: CancelReply) {
        let Some(id) = self
            .state
            .generation
            .as_ref()
            .filter(|g| g.status.is_active())
            .map(|g| g.id.clone())
        else {
            let _ = resp.send(Ok(false));
            return;
        };

        let api = Arc::clone(&self.api);
        self.spawn_request(async move {
            let result = api.cancel_generation(&id).await;
            Settled::Cancelled { id, result, resp }
        });
    }

    fn cancelled(&mut self, id: GenerationId, result: ApiResult<GenerationRecord>, resp: CancelReply) {
        let out = match result {
            Ok(mut record) => {
                self.stop_polling();
                record.status = GenerationStatus::Cancelled;
                self.state.generation = Some(record);
                self.state.error = None;
                self.clear_marker();
                tracing::info!(generation_id = %id, "generation cancelled");
                let _ = self.events_tx.send(GenerationEvent::Cancelled { id });
                Ok(true)
            }
            Err(err) => Err(self.fail(err)),
        };
        let _ = resp.send(out);
    }

    fn reset(&mut self) {
        if let Some(op) = self.op.take() {
            self.superseded.push(op.task);
        }
        for cmd in self.deferred.drain(..) {
            cmd.interrupt();
        }
        self.stop_polling();
        self.state = GenerationState::default();
        self.clear_marker();
        let _ = self.events_tx.send(GenerationEvent::Reset);
    }

    fn abort_requests(&mut self) {
        if let Some(op) = self.op.take() {
            op.task.abort();
        }
        for task in self.superseded.drain(..) {
            task.abort();
        }
        self.deferred.clear();
    }

    fn attach(&mut self, record: GenerationRecord) {
        tracing::info!(generation_id = %record.id, status = ?record.status, "re-attached to generation");
        let _ = self.events_tx.send(GenerationEvent::Attached {
            id: record.id.clone(),
            status: record.status,
        });
        self.track(record);
        self.arm_poll();
    }

    fn track(&mut self, record: GenerationRecord) {
        self.stop_polling();
        self.write_marker(&record.id);
        self.state.generation = Some(record);
        self.state.error = None;
    }

    fn apply_poll(&mut self, polled: PollResult) {
        if polled.epoch != self.epoch {
            return;
        }
        self.poll_in_flight = false;

        match polled.result {
            Ok(record) => {
                let previous = self.state.generation.as_ref().map(|g| g.status);
                let status = record.status;
                tracing::debug!(generation_id = %polled.id, ?status, "generation polled");
                self.state.generation = Some(record);

                if status.is_terminal() {
                    self.stop_polling();
                    self.clear_marker();
                    tracing::info!(generation_id = %polled.id, ?status, "generation finished");
                    let _ = self.events_tx.send(GenerationEvent::Finished {
                        id: polled.id,
                        status,
                    });
                } else {
                    if previous != Some(status) {
                        let _ = self.events_tx.send(GenerationEvent::StatusChanged {
                            id: polled.id,
                            status,
                        });
                    }
                    self.arm_poll();
                }
            }
            Err(err) => {
                self.stop_polling();
                tracing::error!(generation_id = %polled.id, error = %err, "generation poll failed");
                self.state.error = Some(err.to_string());
                let _ = self.events_tx.send(GenerationEvent::Failed {
                    message: err.to_string(),
                });
            }
        }
    }

    fn spawn_poll(&mut self) {
        let Some(id) = self.state.generation.as_ref().map(|g| g.id.clone()) else {
            return;
        };
        self.poll_in_flight = true;
        let api = Arc::clone(&self.api);
        let tx = self.poll_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = api.get_generation(&id).await;
            let _ = tx.send(PollResult { epoch, id, result });
        });
    }

    fn trigger_processing(&self, id: GenerationId) {
        let api = Arc::clone(&self.api);
        tokio::spawn(async move {
            if let Err(err) = api.trigger_generation_processing(&id).await {
                tracing::warn!(generation_id = %id, error = %err, "processing trigger failed");
            }
        });
    }

    fn arm_poll(&mut self) {
        self.poll_deadline =
            Some(Instant::now() + Duration::from_millis(self.config.poll_interval_ms));
    }

    fn stop_polling(&mut self) {
        self.poll_deadline = None;
        self.poll_in_flight = false;
        self.epoch += 1;
    }

    fn fail(&mut self, err: ApiError) -> RuntimeError {
        tracing::error!(error = %err, "generation request failed");
        self.state.error = Some(err.to_string());
        let _ = self.events_tx.send(GenerationEvent::Failed {
            message: err.to_string(),
        });
        err.into()
    }

    fn write_marker(&mut self, id: &str) {
        if let Err(err) = self.markers.set(&self.config.marker_key, id) {
            tracing::warn!(generation_id = %id, error = %err, "could not persist generation marker");
        }
    }

    fn remove_marker(&mut self) -> Result<Option<GenerationRecord>, RuntimeError> {
        self.markers.remove(&self.config.marker_key)?;
        Ok(None)
    }

    fn clear_marker(&mut self) {
        if let Err(err) = self.markers.remove(&self.config.marker_key) {
            tracing::warn!(error = %err, "could not clear generation marker");
        }
    }

    fn snapshot(&self) -> GenerationState {
        GenerationState {
            is_loading: self.op.is_some(),
            is_polling: self.poll_deadline.is_some() || self.poll_in_flight,
            ..self.state.clone()
        }
    }
}
