mod common;

use std::time::Duration;

use tokio::sync::broadcast;

use flashlearn::{
    api::{ApiError, GenerationRequest},
    persist::{MarkerStore, memory::MemoryMarkerStore},
    runtime::{
        RuntimeError,
        events::GenerationEvent,
        generation::{
            DEFAULT_MARKER_KEY, GenerationConfig, GenerationHandle, GenerationState,
            spawn_generation_engine,
        },
    },
    types::GenerationStatus,
};

use common::{MockApi, api_error, conflict, network_error, record};

fn spawn(api: &MockApi, markers: &MemoryMarkerStore) -> GenerationHandle {
    spawn_generation_engine(api.arc(), Box::new(markers.clone()), GenerationConfig::default())
}

fn marker(markers: &MemoryMarkerStore) -> Option<String> {
    markers.get(DEFAULT_MARKER_KEY).expect("marker read")
}

async fn wait_state(
    engine: &GenerationHandle,
    pred: impl Fn(&GenerationState) -> bool,
) -> GenerationState {
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            let state = engine.state().await.expect("state");
            if pred(&state) {
                return state;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("state before timeout")
}

async fn wait_for(
    events: &mut broadcast::Receiver<GenerationEvent>,
    pred: impl Fn(&GenerationEvent) -> bool,
) -> GenerationEvent {
    tokio::time::timeout(Duration::from_secs(120), async {
        loop {
            let evt = events.recv().await.expect("event stream open");
            if pred(&evt) {
                return evt;
            }
        }
    })
    .await
    .expect("event before timeout")
}

#[tokio::test(start_paused = true)]
async fn created_generation_is_polled_until_terminal() {
    let api = MockApi::new();
    {
        let mut state = api.state();
        state.get_responses.push_back(Ok(record("gen-1", GenerationStatus::Running)));
        state.get_responses.push_back(Ok(record("gen-1", GenerationStatus::Succeeded)));
    }
    let markers = MemoryMarkerStore::new();
    let engine = spawn(&api, &markers);
    let mut events = engine.subscribe();

    let started = engine
        .start_generation(GenerationRequest::new("photosynthesis converts light"))
        .await
        .expect("start")
        .expect("tracked");
    assert_eq!(started.id, "gen-1");
    assert_eq!(started.status, GenerationStatus::Pending);
    assert_eq!(started.source_text_length, Some(29));
    assert_eq!(marker(&markers).as_deref(), Some("gen-1"));

    let state = engine.state().await.expect("state");
    assert!(state.is_polling);
    assert!(!state.is_loading);

    assert_eq!(
        wait_for(&mut events, |e| matches!(e, GenerationEvent::StatusChanged { .. })).await,
        GenerationEvent::StatusChanged {
            id: "gen-1".to_string(),
            status: GenerationStatus::Running
        }
    );
    assert_eq!(
        wait_for(&mut events, |e| matches!(e, GenerationEvent::Finished { .. })).await,
        GenerationEvent::Finished {
            id: "gen-1".to_string(),
            status: GenerationStatus::Succeeded
        }
    );

    let state = engine.state().await.expect("state");
    assert!(!state.is_polling);
    assert_eq!(
        state.generation.map(|g| g.status),
        Some(GenerationStatus::Succeeded)
    );
    assert_eq!(marker(&markers), None);
    assert_eq!(api.state().triggered, vec!["gen-1".to_string()]);
    assert_eq!(api.state().get_calls.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn polling_waits_for_the_interval() {
    let api = MockApi::new();
    api.state().get_fallback = Some(record("gen-1", GenerationStatus::Running));
    let markers = MemoryMarkerStore::new();
    let engine = spawn(&api, &markers);

    engine
        .start_generation(GenerationRequest::new("text"))
        .await
        .expect("start");

    tokio::time::sleep(Duration::from_millis(4900)).await;
    assert!(api.state().get_calls.is_empty());

    tokio::time::sleep(Duration::from_millis(10_200)).await;
    assert_eq!(api.state().get_calls.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn trigger_failure_does_not_stop_tracking() {
    let api = MockApi::new();
    {
        let mut state = api.state();
        state.trigger_fails = true;
        state.get_responses.push_back(Ok(record("gen-1", GenerationStatus::Failed)));
    }
    let markers = MemoryMarkerStore::new();
    let engine = spawn(&api, &markers);
    let mut events = engine.subscribe();

    engine
        .start_generation(GenerationRequest::new("text"))
        .await
        .expect("start")
        .expect("tracked");

    let finished = wait_for(&mut events, |e| matches!(e, GenerationEvent::Finished { .. })).await;
    assert_eq!(
        finished,
        GenerationEvent::Finished {
            id: "gen-1".to_string(),
            status: GenerationStatus::Failed
        }
    );
    assert_eq!(api.state().triggered.len(), 1);
    assert!(engine.state().await.expect("state").error.is_none());
}

#[tokio::test(start_paused = true)]
async fn conflict_reattaches_to_generation_named_in_details() {
    let api = MockApi::new();
    {
        let mut state = api.state();
        state.create_responses.push_back(Err(conflict(Some("gen-9"))));
        state.get_fallback = Some(record("gen-9", GenerationStatus::Running));
    }
    let markers = MemoryMarkerStore::new();
    let engine = spawn(&api, &markers);
    let mut events = engine.subscribe();

    let attached = engine
        .start_generation(GenerationRequest::new("text"))
        .await
        .expect("start")
        .expect("re-attached");
    assert_eq!(attached.id, "gen-9");
    assert_eq!(attached.status, GenerationStatus::Running);
    assert_eq!(marker(&markers).as_deref(), Some("gen-9"));
    assert_eq!(api.state().active_lookup_calls, 0);

    assert_eq!(
        events.try_recv().expect("attached event"),
        GenerationEvent::Attached {
            id: "gen-9".to_string(),
            status: GenerationStatus::Running
        }
    );

    let state = engine.state().await.expect("state");
    assert!(state.is_polling);
    assert!(state.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn conflict_without_details_falls_back_to_active_lookup() {
    let api = MockApi::new();
    {
        let mut state = api.state();
        state.create_responses.push_back(Err(conflict(None)));
        state.active_lookup = Some(record("gen-7", GenerationStatus::Pending));
    }
    let markers = MemoryMarkerStore::new();
    let engine = spawn(&api, &markers);

    let attached = engine
        .start_generation(GenerationRequest::new("text"))
        .await
        .expect("start")
        .expect("re-attached");
    assert_eq!(attached.id, "gen-7");
    assert_eq!(api.state().active_lookup_calls, 1);
    assert_eq!(marker(&markers).as_deref(), Some("gen-7"));
}

#[tokio::test(start_paused = true)]
async fn conflict_with_nothing_active_tracks_nothing() {
    let api = MockApi::new();
    api.state().create_responses.push_back(Err(conflict(None)));
    let markers = MemoryMarkerStore::new();
    let engine = spawn(&api, &markers);

    let out = engine
        .start_generation(GenerationRequest::new("text"))
        .await
        .expect("start");
    assert!(out.is_none());

    let state = engine.state().await.expect("state");
    assert!(state.generation.is_none());
    assert!(!state.is_polling);
}

#[tokio::test(start_paused = true)]
async fn engine_resumes_marked_generation_without_creating() {
    let api = MockApi::new();
    api.state().get_fallback = Some(record("gen-3", GenerationStatus::Running));
    let mut markers = MemoryMarkerStore::new();
    markers.set(DEFAULT_MARKER_KEY, "gen-3").expect("seed marker");

    let engine = spawn(&api, &markers);
    let state = wait_state(&engine, |s| !s.is_loading).await;

    assert_eq!(state.generation.map(|g| g.id), Some("gen-3".to_string()));
    assert!(state.is_polling);
    assert!(api.state().created.is_empty());
    assert_eq!(api.state().get_calls, vec!["gen-3".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn stale_or_missing_marker_is_cleared() {
    for lookup in [
        Ok(record("gen-3", GenerationStatus::Succeeded)),
        Err(api_error(404, "not_found", "generation not found")),
    ] {
        let api = MockApi::new();
        api.state().get_responses.push_back(lookup);
        let mut markers = MemoryMarkerStore::new();
        markers.set(DEFAULT_MARKER_KEY, "gen-3").expect("seed marker");

        let engine = spawn(&api, &markers);
        let state = wait_state(&engine, |s| !s.is_loading).await;

        assert!(state.generation.is_none());
        assert!(!state.is_polling);
        assert_eq!(marker(&markers), None);
    }
}

#[tokio::test(start_paused = true)]
async fn transient_lookup_failure_keeps_marker() {
    let api = MockApi::new();
    api.state().get_responses.push_back(Err(network_error()));
    let mut markers = MemoryMarkerStore::new();
    markers.set(DEFAULT_MARKER_KEY, "gen-3").expect("seed marker");

    let engine = spawn(&api, &markers);
    let state = wait_state(&engine, |s| !s.is_loading).await;
    assert!(state.generation.is_none());
    assert_eq!(marker(&markers).as_deref(), Some("gen-3"));

    api.state().get_fallback = Some(record("gen-3", GenerationStatus::Pending));
    let resumed = engine
        .check_active_generation()
        .await
        .expect("check")
        .expect("resumed");
    assert_eq!(resumed.id, "gen-3");
}

#[tokio::test(start_paused = true)]
async fn poll_error_stops_polling() {
    let api = MockApi::new();
    api.state()
        .get_responses
        .push_back(Err(api_error(500, "internal", "boom")));
    let markers = MemoryMarkerStore::new();
    let engine = spawn(&api, &markers);
    let mut events = engine.subscribe();

    engine
        .start_generation(GenerationRequest::new("text"))
        .await
        .expect("start");
    wait_for(&mut events, |e| matches!(e, GenerationEvent::Failed { .. })).await;

    let state = engine.state().await.expect("state");
    assert!(!state.is_polling);
    assert!(state.error.is_some());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(api.state().get_calls.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_polling_after_backend_confirms() {
    let api = MockApi::new();
    let markers = MemoryMarkerStore::new();
    let engine = spawn(&api, &markers);
    let mut events = engine.subscribe();

    engine
        .start_generation(GenerationRequest::new("text"))
        .await
        .expect("start");
    assert!(engine.cancel_generation().await.expect("cancel"));

    assert_eq!(api.state().cancel_calls, vec!["gen-1".to_string()]);
    let state = engine.state().await.expect("state");
    assert_eq!(
        state.generation.map(|g| g.status),
        Some(GenerationStatus::Cancelled)
    );
    assert!(!state.is_polling);
    assert_eq!(marker(&markers), None);
    wait_for(&mut events, |e| matches!(e, GenerationEvent::Cancelled { .. })).await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(api.state().get_calls.is_empty());

    assert!(!engine.cancel_generation().await.expect("second cancel"));
}

#[tokio::test(start_paused = true)]
async fn failed_cancel_leaves_generation_untouched() {
    let api = MockApi::new();
    api.state()
        .cancel_responses
        .push_back(Err(api_error(500, "internal", "cancel failed")));
    let markers = MemoryMarkerStore::new();
    let engine = spawn(&api, &markers);

    engine
        .start_generation(GenerationRequest::new("text"))
        .await
        .expect("start");
    assert!(engine.cancel_generation().await.is_err());

    let state = engine.state().await.expect("state");
    assert_eq!(
        state.generation.map(|g| g.status),
        Some(GenerationStatus::Pending)
    );
    assert!(state.is_polling);
    assert!(state.error.is_some());
    assert_eq!(marker(&markers).as_deref(), Some("gen-1"));
}

#[tokio::test(start_paused = true)]
async fn reset_returns_to_idle() {
    let api = MockApi::new();
    let markers = MemoryMarkerStore::new();
    let engine = spawn(&api, &markers);
    let mut events = engine.subscribe();

    engine
        .start_generation(GenerationRequest::new("text"))
        .await
        .expect("start");
    engine.reset_generation().await.expect("reset");

    assert_eq!(engine.state().await.expect("state"), GenerationState::default());
    assert_eq!(marker(&markers), None);
    wait_for(&mut events, |e| *e == GenerationEvent::Reset).await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(api.state().get_calls.is_empty());
}

#[tokio::test]
async fn invalid_request_is_rejected_before_sending() {
    let api = MockApi::new();
    let markers = MemoryMarkerStore::new();
    let engine = spawn(&api, &markers);

    let mut too_hot = GenerationRequest::new("text");
    too_hot.temperature = Some(3.5);

    for request in [GenerationRequest::new("   "), too_hot] {
        let err = engine.start_generation(request).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Api(ApiError::Invalid(_))));
    }
    assert!(api.state().created.is_empty());
    assert!(engine.state().await.expect("state").error.is_some());
}

#[tokio::test]
async fn shutdown_closes_handle_and_event_stream() {
    let api = MockApi::new();
    let markers = MemoryMarkerStore::new();
    let engine = spawn(&api, &markers);
    let mut events = engine.subscribe();
    engine.shutdown().await.expect("shutdown");

    assert!(matches!(
        engine.state().await,
        Err(RuntimeError::ChannelClosed)
    ));
    drop(engine);
    assert!(matches!(
        events.recv().await,
        Err(broadcast::error::RecvError::Closed)
    ));
}

#[tokio::test(start_paused = true)]
async fn dropping_every_handle_stops_polling() {
    let api = MockApi::new();
    api.state().get_fallback = Some(record("gen-1", GenerationStatus::Running));
    let markers = MemoryMarkerStore::new();
    let engine = spawn(&api, &markers);
    let mut events = engine.subscribe();

    engine
        .start_generation(GenerationRequest::new("text"))
        .await
        .expect("start")
        .expect("tracked");
    assert!(engine.state().await.expect("state").is_polling);
    drop(engine);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(api.state().get_calls.is_empty());

    assert_eq!(
        events.recv().await.expect("created event"),
        GenerationEvent::Created {
            id: "gen-1".to_string()
        }
    );
    assert!(matches!(
        events.recv().await,
        Err(broadcast::error::RecvError::Closed)
    ));
}

#[tokio::test(start_paused = true)]
async fn loading_is_visible_while_create_is_in_flight() {
    let api = MockApi::new();
    api.state().create_delay = Some(Duration::from_secs(10));
    let markers = MemoryMarkerStore::new();
    let engine = spawn(&api, &markers);

    let starter = engine.clone();
    let start =
        tokio::spawn(async move { starter.start_generation(GenerationRequest::new("text")).await });

    let loading = wait_state(&engine, |s| s.is_loading).await;
    assert!(loading.generation.is_none());
    assert!(!loading.is_polling);
    assert_eq!(marker(&markers), None);

    let started = start
        .await
        .expect("join")
        .expect("start")
        .expect("tracked");
    assert_eq!(started.id, "gen-1");

    let state = engine.state().await.expect("state");
    assert!(!state.is_loading);
    assert!(state.is_polling);
    assert_eq!(marker(&markers).as_deref(), Some("gen-1"));
}

#[tokio::test(start_paused = true)]
async fn shutdown_does_not_wait_for_a_slow_create() {
    let api = MockApi::new();
    api.state().create_delay = Some(Duration::from_secs(10));
    let markers = MemoryMarkerStore::new();
    let engine = spawn(&api, &markers);

    let starter = engine.clone();
    let start =
        tokio::spawn(async move { starter.start_generation(GenerationRequest::new("text")).await });
    wait_state(&engine, |s| s.is_loading).await;

    tokio::time::timeout(Duration::from_secs(1), engine.shutdown())
        .await
        .expect("shutdown before create returns")
        .expect("shutdown");

    assert!(matches!(
        start.await.expect("join"),
        Err(RuntimeError::ChannelClosed)
    ));
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(marker(&markers), None);
    assert!(api.state().get_calls.is_empty());
}

#[tokio::test(start_paused = true)]
async fn reset_interrupts_a_request_in_flight() {
    let api = MockApi::new();
    api.state().create_delay = Some(Duration::from_secs(10));
    let markers = MemoryMarkerStore::new();
    let engine = spawn(&api, &markers);

    let starter = engine.clone();
    let start =
        tokio::spawn(async move { starter.start_generation(GenerationRequest::new("text")).await });
    wait_state(&engine, |s| s.is_loading).await;

    engine.reset_generation().await.expect("reset");
    assert_eq!(engine.state().await.expect("state"), GenerationState::default());

    assert!(matches!(
        start.await.expect("join"),
        Err(RuntimeError::Interrupted)
    ));
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(engine.state().await.expect("state"), GenerationState::default());
    assert_eq!(marker(&markers), None);
    assert!(api.state().get_calls.is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancel_waits_for_the_create_in_flight() {
    let api = MockApi::new();
    api.state().create_delay = Some(Duration::from_secs(3));
    let markers = MemoryMarkerStore::new();
    let engine = spawn(&api, &markers);

    let starter = engine.clone();
    let start =
        tokio::spawn(async move { starter.start_generation(GenerationRequest::new("text")).await });
    wait_state(&engine, |s| s.is_loading).await;

    assert!(engine.cancel_generation().await.expect("cancel"));
    assert_eq!(api.state().cancel_calls, vec!["gen-1".to_string()]);

    let started = start
        .await
        .expect("join")
        .expect("start")
        .expect("tracked");
    assert_eq!(started.id, "gen-1");

    let state = engine.state().await.expect("state");
    assert_eq!(
        state.generation.map(|g| g.status),
        Some(GenerationStatus::Cancelled)
    );
    assert!(!state.is_loading);
    assert!(!state.is_polling);
    assert_eq!(marker(&markers), None);
}
