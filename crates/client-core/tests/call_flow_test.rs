//! End to end call flows against the simulated engine
//!
//! Time is paused, so the 15 second wait runs instantly and deterministically.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::time::Instant;

use randcall_client_core::{
    CallConfig, CallError, CallResult, CallSessionBuilder, CallState, DocumentStore, EndReason,
    EngineCall, EngineProbe, InMemoryDocumentStore, Notice, Permission, ScriptedPeer, SessionEvent, SessionHandle,
    SimulatedEngineFactory, StaticPermissions,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Store whose listing never completes
struct UnresponsiveStore;

#[async_trait]
impl DocumentStore for UnresponsiveStore {
    async fn list_documents(&self, _collection: &str) -> CallResult<Vec<Value>> {
        std::future::pending().await
    }
}

fn token_store() -> InMemoryDocumentStore {
    InMemoryDocumentStore::new().with_document("tokens", json!({"token": "tok-1", "name": "lobby"}))
}

async fn launch(
    factory: SimulatedEngineFactory,
    store: impl DocumentStore + 'static,
    permissions: StaticPermissions,
) -> Result<(SessionHandle, EngineProbe), CallError> {
    init_tracing();
    let probe = factory.probe();
    let handle = CallSessionBuilder::new()
        .config(CallConfig::new("test-app"))
        .engine_factory(Arc::new(factory))
        .document_store(Arc::new(store))
        .permissions(Arc::new(permissions))
        .launch()
        .await?;
    Ok((handle, probe))
}

async fn drain(mut rx: broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.recv().await {
        let closed = event.is_closed();
        events.push(event);
        if closed {
            break;
        }
    }
    events
}

fn notices(events: &[SessionEvent]) -> Vec<Notice> {
    events.iter().filter_map(|e| e.notice()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_no_peer_times_out_after_wait() {
    let started = Instant::now();
    let (mut handle, probe) = launch(SimulatedEngineFactory::new(), token_store(), StaticPermissions::all_granted())
        .await
        .unwrap();
    let events = tokio::spawn(drain(handle.take_event_receiver().unwrap()));

    let summary = handle.wait().await.unwrap();
    let events = events.await.unwrap();

    assert_eq!(summary.end_reason, EndReason::PeerTimeout);
    assert!(!summary.was_connected);
    assert_eq!(summary.error(), Some(CallError::PeerTimeout { waited_ms: 15000 }));

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(15000), "ended after {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(16000), "ended after {:?}", elapsed);

    assert_eq!(notices(&events), vec![Notice::NoOneJoined]);
    let ticks = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::CountdownTick { .. }))
        .count();
    assert!(ticks >= 14, "saw {} ticks", ticks);

    let calls = probe.calls();
    assert!(calls.contains(&EngineCall::JoinChannel {
        token: "tok-1".to_string(),
        channel: "lobby".to_string(),
        info: "info".to_string(),
        uid: 0,
    }));
    assert_eq!(&calls[calls.len() - 2..], &[EngineCall::LeaveChannel, EngineCall::Destroy]);
}

#[tokio::test(start_paused = true)]
async fn test_peer_joins_within_wait() {
    let factory = SimulatedEngineFactory::new().with_peer(ScriptedPeer::joining(42, Duration::from_secs(5)));
    let (mut handle, probe) = launch(factory, token_store(), StaticPermissions::all_granted())
        .await
        .unwrap();
    let mut events = handle.take_event_receiver().unwrap();

    let state = handle.wait_for_state(|s| s.is_connected()).await.unwrap();
    assert_eq!(state, CallState::Connected { peer: 42 });
    assert_eq!(probe.remote_views(), vec![42]);

    // Well past the first deadline; the countdown must not fire.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(handle.state(), CallState::Connected { peer: 42 });

    handle.end_call().await.unwrap();
    let summary = handle.wait().await.unwrap();

    assert_eq!(summary.end_reason, EndReason::UserHangup);
    assert!(summary.was_connected);
    assert_eq!(summary.last_peer, Some(42));
    assert_eq!(summary.error(), None);

    let mut saw_remote_view = false;
    while let Ok(event) = events.try_recv() {
        assert_ne!(event.notice(), Some(Notice::NoOneJoined));
        if let SessionEvent::RemoteViewAttached { uid, .. } = event {
            assert_eq!(uid, 42);
            saw_remote_view = true;
        }
    }
    assert!(saw_remote_view);
}

#[tokio::test(start_paused = true)]
async fn test_second_peer_is_ignored() {
    let factory = SimulatedEngineFactory::new()
        .with_peer(ScriptedPeer::joining(42, Duration::from_secs(2)))
        .with_peer(ScriptedPeer::joining(43, Duration::from_secs(3)));
    let (handle, probe) = launch(factory, token_store(), StaticPermissions::all_granted())
        .await
        .unwrap();

    handle.wait_for_state(|s| s.is_connected()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(handle.state(), CallState::Connected { peer: 42 });
    assert_eq!(probe.remote_views(), vec![42]);
    handle.teardown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_peer_leaving_restarts_wait() {
    let factory = SimulatedEngineFactory::new()
        .with_peer(ScriptedPeer::joining(42, Duration::from_secs(5)).leaving_after(Duration::from_secs(8)));
    let (mut handle, _probe) = launch(factory, token_store(), StaticPermissions::all_granted())
        .await
        .unwrap();
    let events = tokio::spawn(drain(handle.take_event_receiver().unwrap()));

    handle.wait_for_state(|s| s.is_connected()).await.unwrap();
    let started_waiting = Instant::now();
    handle.wait_for_state(|s| s.is_waiting()).await.unwrap();

    let summary = handle.wait().await.unwrap();
    let events = events.await.unwrap();

    // Left at 8s, then a fresh 15s wait.
    assert!(started_waiting.elapsed() >= Duration::from_secs(18));
    assert_eq!(summary.end_reason, EndReason::PeerTimeout);
    assert!(summary.was_connected);
    assert_eq!(notices(&events), vec![Notice::PeerLeft, Notice::NoOneJoined]);
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::RemoteViewDetached { uid: 42, .. })));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_peer_leaving_is_ignored() {
    let factory = SimulatedEngineFactory::new().with_peer(ScriptedPeer::joining(42, Duration::from_secs(1)));
    let (handle, probe) = launch(factory, token_store(), StaticPermissions::all_granted())
        .await
        .unwrap();

    handle.wait_for_state(|s| s.is_connected()).await.unwrap();
    assert!(probe.peer_left(99, 0));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(handle.state(), CallState::Connected { peer: 42 });
    handle.teardown().await.unwrap();
}

#[tokio::test]
async fn test_camera_denied_never_touches_engine() {
    let factory = SimulatedEngineFactory::new();
    let probe = factory.probe();

    let result = launch(
        factory,
        token_store(),
        StaticPermissions::all_granted().without(Permission::Camera),
    )
    .await;

    match result {
        Err(CallError::PermissionDenied { missing }) => assert_eq!(missing, vec![Permission::Camera]),
        other => panic!("expected permission denial, got {:?}", other.map(|(h, _)| h.id())),
    }
    assert_eq!(probe.engines_created(), 0);
    assert!(probe.calls().is_empty());
}

#[tokio::test]
async fn test_permissions_granted_on_request() {
    let permissions = StaticPermissions::none()
        .grant_on_request(Permission::Camera)
        .grant_on_request(Permission::RecordAudio);

    let (handle, probe) = launch(SimulatedEngineFactory::new(), token_store(), permissions)
        .await
        .unwrap();

    handle.wait_for_state(|s| s.is_waiting()).await.unwrap();
    assert_eq!(probe.engines_created(), 1);
    handle.teardown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_missing_token_ends_without_join() {
    let (mut handle, probe) = launch(
        SimulatedEngineFactory::new(),
        InMemoryDocumentStore::new(),
        StaticPermissions::all_granted(),
    )
    .await
    .unwrap();
    let events = tokio::spawn(drain(handle.take_event_receiver().unwrap()));

    let summary = handle.wait().await.unwrap();
    let events = events.await.unwrap();

    assert_eq!(summary.end_reason, EndReason::TokenNotFound);
    assert_eq!(summary.error(), Some(CallError::TokenNotFound));
    assert_eq!(notices(&events), vec![Notice::TokenNotFound]);
    assert!(!probe.join_requested());
    assert!(probe.is_destroyed());
    assert_eq!(probe.count(|c| matches!(c, EngineCall::LeaveChannel)), 0);
}

#[tokio::test(start_paused = true)]
async fn test_engine_init_failure_stays_idle() {
    let (mut handle, probe) = launch(
        SimulatedEngineFactory::new().failing("native library missing"),
        token_store(),
        StaticPermissions::all_granted(),
    )
    .await
    .unwrap();
    let mut events = handle.take_event_receiver().unwrap();

    let error = loop {
        match events.recv().await.unwrap() {
            SessionEvent::Error { error, .. } => break error,
            _ => continue,
        }
    };
    assert!(matches!(error, CallError::EngineInitFailure { .. }));

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(handle.state(), CallState::Idle);
    assert_eq!(probe.engines_created(), 0);
    assert!(!probe.join_requested());

    handle.end_call().await.unwrap();
    let summary = handle.wait().await.unwrap();
    assert_eq!(summary.end_reason, EndReason::UserHangup);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_join_ends_session() {
    let (handle, probe) = launch(
        SimulatedEngineFactory::new().rejecting_join(),
        token_store(),
        StaticPermissions::all_granted(),
    )
    .await
    .unwrap();

    let summary = handle.wait().await.unwrap();

    assert_eq!(summary.end_reason, EndReason::TransportFailure);
    assert!(probe.is_destroyed());
}

#[tokio::test(start_paused = true)]
async fn test_teardown_releases_engine() {
    let factory = SimulatedEngineFactory::new().with_peer(ScriptedPeer::joining(7, Duration::from_secs(1)));
    let (handle, probe) = launch(factory, token_store(), StaticPermissions::all_granted())
        .await
        .unwrap();

    handle.wait_for_state(|s| s.is_connected()).await.unwrap();
    let summary = handle.teardown().await.unwrap();

    assert_eq!(summary.end_reason, EndReason::Teardown);
    let calls = probe.calls();
    assert_eq!(&calls[calls.len() - 2..], &[EngineCall::LeaveChannel, EngineCall::Destroy]);
    assert_eq!(probe.count(|c| matches!(c, EngineCall::Destroy)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_releases_engine() {
    let (handle, probe) = launch(SimulatedEngineFactory::new(), token_store(), StaticPermissions::all_granted())
        .await
        .unwrap();

    handle.wait_for_state(|s| s.is_waiting()).await.unwrap();
    drop(handle);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(probe.is_destroyed());
    assert_eq!(probe.count(|c| matches!(c, EngineCall::LeaveChannel)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_toggles_mute_local_streams() {
    let (handle, probe) = launch(SimulatedEngineFactory::new(), token_store(), StaticPermissions::all_granted())
        .await
        .unwrap();

    let flags = handle.toggle_mic().await.unwrap();
    assert!(!flags.mic_enabled);
    assert!(flags.video_enabled);

    let flags = handle.toggle_video().await.unwrap();
    assert!(!flags.video_enabled);

    let flags = handle.toggle_mic().await.unwrap();
    assert!(flags.mic_enabled);

    assert_eq!(
        probe.count(|c| matches!(c, EngineCall::MuteLocalAudio(_) | EngineCall::MuteLocalVideo(_))),
        3
    );
    let mutes: Vec<EngineCall> = probe
        .calls()
        .into_iter()
        .filter(|c| matches!(c, EngineCall::MuteLocalAudio(_) | EngineCall::MuteLocalVideo(_)))
        .collect();
    assert_eq!(
        mutes,
        vec![
            EngineCall::MuteLocalAudio(true),
            EngineCall::MuteLocalVideo(true),
            EngineCall::MuteLocalAudio(false),
        ]
    );

    let summary = handle.teardown().await.unwrap();
    assert!(summary.media.mic_enabled);
    assert!(!summary.media.video_enabled);
}

#[tokio::test(start_paused = true)]
async fn test_commands_after_end_report_closed() {
    let (handle, _probe) = launch(
        SimulatedEngineFactory::new(),
        InMemoryDocumentStore::new(),
        StaticPermissions::all_granted(),
    )
    .await
    .unwrap();

    handle.wait_for_state(|s| s.is_ended()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(handle.toggle_mic().await, Err(CallError::SessionClosed));
}

#[tokio::test(start_paused = true)]
async fn test_teardown_during_token_fetch_releases_engine() {
    let (handle, probe) = launch(
        SimulatedEngineFactory::new(),
        UnresponsiveStore,
        StaticPermissions::all_granted(),
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(handle.state(), CallState::Idle);

    let summary = handle.teardown().await.unwrap();

    assert_eq!(summary.end_reason, EndReason::Teardown);
    assert!(!probe.join_requested());
    assert!(probe.is_destroyed());
    assert_eq!(probe.count(|c| matches!(c, EngineCall::LeaveChannel)), 0);
}
