//! Call session controller
//!
//! One [`CallSession`] runs per call screen, as a single tokio task that owns
//! every piece of mutable call state: the [`CallStateMachine`], media flags,
//! view slots, the wait countdown and the engine handle. Nothing else touches
//! them. Other parties reach the session through queues:
//!
//! - the host sends [`SessionCommand`]s through its [`SessionHandle`]
//! - the engine reports [`EngineEvent`]s from its own threads via an
//!   [`EventSink`]
//! - the countdown and the token fetch post their results back as inputs
//!
//! On startup the session creates the engine, binds the local view, fetches
//! the active token off-loop and then asks to join. From there the engine's
//! callbacks drive the state machine. Whatever ends the session, the
//! countdown is stopped, a pending token fetch is aborted and the engine is
//! released before the task completes.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::call::{CallState, EndReason, MediaFlags, SessionId, SessionSummary, Uid};
use crate::config::CallConfig;
use crate::error::{CallError, CallResult};
use crate::events::{Notice, SessionEvent, StateChangeInfo};
use crate::machine::{CallStateMachine, Effect};
use crate::render::{SurfaceProvider, VideoCanvas, ViewSlots};
use crate::store::DocumentStore;
use crate::timer::{CountdownEvent, WaitCountdown};
use crate::token::{TokenInfo, TokenRepository};
use crate::transport::{EngineEvent, EngineFactory, EngineHandle, EventSink};

const COMMAND_QUEUE_CAPACITY: usize = 16;
const INPUT_QUEUE_CAPACITY: usize = 32;
const EVENT_BROADCAST_CAPACITY: usize = 256;

/// Request from the host to a running session
#[derive(Debug)]
pub enum SessionCommand {
    ToggleMic { reply: oneshot::Sender<MediaFlags> },
    ToggleVideo { reply: oneshot::Sender<MediaFlags> },
    EndCall,
}

/// Results posted back to the session by its own helper tasks
#[derive(Debug)]
enum SessionInput {
    Countdown(CountdownEvent),
    TokenFetched(Option<TokenInfo>),
}

impl From<CountdownEvent> for SessionInput {
    fn from(event: CountdownEvent) -> Self {
        SessionInput::Countdown(event)
    }
}

/// External collaborators a session needs
pub struct SessionDeps {
    pub engine_factory: Arc<dyn EngineFactory>,
    pub document_store: Arc<dyn DocumentStore>,
    pub surfaces: Box<dyn SurfaceProvider>,
}

/// Owner of one call attempt's state
pub struct CallSession {
    id: SessionId,
    config: CallConfig,
    machine: CallStateMachine,
    flags: MediaFlags,
    views: ViewSlots,
    last_peer: Option<Uid>,
    surfaces: Box<dyn SurfaceProvider>,
    engine_factory: Arc<dyn EngineFactory>,
    engine: Option<EngineHandle>,
    sink: Option<EventSink>,
    tokens: TokenRepository,
    token_fetch: Option<JoinHandle<()>>,
    countdown: WaitCountdown<SessionInput>,
    commands: mpsc::Receiver<SessionCommand>,
    engine_events: mpsc::Receiver<EngineEvent>,
    inputs: mpsc::Receiver<SessionInput>,
    input_tx: mpsc::Sender<SessionInput>,
    events: broadcast::Sender<SessionEvent>,
    state_tx: watch::Sender<CallState>,
    started_at: chrono::DateTime<Utc>,
}

impl CallSession {
    /// Spawn a session for an already validated configuration
    ///
    /// Permissions must have been granted by the caller.
    pub fn start(config: CallConfig, deps: SessionDeps) -> SessionHandle {
        let id = Uuid::new_v4();
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (input_tx, inputs) = mpsc::channel(INPUT_QUEUE_CAPACITY);
        let (sink, engine_events) = EventSink::channel(config.event_queue_capacity);
        let (events, first_receiver) = broadcast::channel(EVENT_BROADCAST_CAPACITY);
        let (state_tx, state_rx) = watch::channel(CallState::Idle);

        let tokens = TokenRepository::new(deps.document_store, config.token_collection.clone())
            .with_fetch_timeout(config.token_fetch_timeout());

        let session = CallSession {
            id,
            machine: CallStateMachine::new(config.wait_timeout()),
            countdown: WaitCountdown::new(config.tick_interval(), input_tx.clone()),
            config,
            flags: MediaFlags::default(),
            views: ViewSlots::default(),
            last_peer: None,
            surfaces: deps.surfaces,
            engine_factory: deps.engine_factory,
            engine: None,
            sink: Some(sink),
            tokens,
            token_fetch: None,
            commands,
            engine_events,
            inputs,
            input_tx,
            events: events.clone(),
            state_tx,
            started_at: Utc::now(),
        };

        let span = tracing::info_span!("call_session", session_id = %id);
        let task = tokio::spawn(session.run().instrument(span));

        SessionHandle {
            id,
            commands: command_tx,
            events,
            first_receiver: Some(first_receiver),
            state: state_rx,
            task,
        }
    }

    async fn run(mut self) -> SessionSummary {
        info!("Call session started");
        self.init_engine_and_join();

        while !self.machine.is_ended() {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("Session handle dropped, tearing down");
                        self.end(EndReason::Teardown);
                    }
                },
                Some(event) = self.engine_events.recv() => self.handle_engine_event(event),
                Some(input) = self.inputs.recv() => self.handle_input(input),
            }
        }

        self.finish()
    }

    fn init_engine_and_join(&mut self) {
        let Some(sink) = self.sink.take() else {
            return;
        };

        match self.engine_factory.create(&self.config.app_id, sink) {
            Ok(engine) => {
                info!("RTC engine created");
                self.engine = Some(EngineHandle::new(engine));
            }
            Err(e) => {
                let error = match e {
                    CallError::EngineInitFailure { .. } => e,
                    other => CallError::engine_init_failure(other.to_string()),
                };
                error!(error = %error, "RTC engine initialization failed, staying idle");
                self.publish(SessionEvent::Error {
                    session_id: self.id,
                    error,
                });
                return;
            }
        }

        self.setup_local_video();
        self.spawn_token_fetch();
    }

    fn setup_local_video(&mut self) {
        let Some(engine) = self.engine.as_mut().and_then(|handle| handle.engine()) else {
            return;
        };

        let surface = self.surfaces.create_surface(true);
        let canvas = VideoCanvas::local(surface, self.config.local_render_mode);
        let result = engine
            .enable_video()
            .and_then(|_| engine.setup_local_video(canvas));

        match result {
            Ok(()) => {
                self.views.set_local(surface);
                self.publish(SessionEvent::LocalViewAttached {
                    session_id: self.id,
                    surface,
                });
            }
            Err(e) => {
                warn!(error = %e, "Failed to set up local video");
                self.surfaces.release_surface(surface);
                self.publish(SessionEvent::Error {
                    session_id: self.id,
                    error: e,
                });
            }
        }
    }

    fn spawn_token_fetch(&mut self) {
        let tokens = self.tokens.clone();
        let tx = self.input_tx.clone();
        debug!(collection = tokens.collection(), "Fetching active token");
        self.token_fetch = Some(tokio::spawn(
            async move {
                let token = tokens.fetch_active_token().await;
                let _ = tx.send(SessionInput::TokenFetched(token)).await;
            }
            .in_current_span(),
        ));
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::ToggleMic { reply } => {
                let mute = self.flags.toggle_mic();
                if let Some(engine) = self.engine.as_mut().and_then(|handle| handle.engine()) {
                    if let Err(e) = engine.mute_local_audio(mute) {
                        warn!(error = %e, "Failed to change microphone state");
                        self.publish(SessionEvent::Error {
                            session_id: self.id,
                            error: e,
                        });
                    }
                }
                info!(mic_enabled = self.flags.mic_enabled, "Microphone toggled");
                self.publish_flags();
                let _ = reply.send(self.flags);
            }
            SessionCommand::ToggleVideo { reply } => {
                let mute = self.flags.toggle_video();
                if let Some(engine) = self.engine.as_mut().and_then(|handle| handle.engine()) {
                    if let Err(e) = engine.mute_local_video(mute) {
                        warn!(error = %e, "Failed to change camera state");
                        self.publish(SessionEvent::Error {
                            session_id: self.id,
                            error: e,
                        });
                    }
                }
                info!(video_enabled = self.flags.video_enabled, "Camera toggled");
                self.publish_flags();
                let _ = reply.send(self.flags);
            }
            SessionCommand::EndCall => {
                info!("User ended the call");
                self.end(EndReason::UserHangup);
            }
        }
    }

    fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::JoinSuccess { channel, uid, elapsed_ms } => {
                info!(%channel, uid, elapsed_ms, "Joined channel");
                self.transition(|machine| machine.on_join_success(Instant::now()));
            }
            EngineEvent::PeerJoined { uid, elapsed_ms } => {
                info!(uid, elapsed_ms, "Peer joined");
                self.transition(|machine| machine.on_peer_joined(uid));
            }
            EngineEvent::PeerLeft { uid, reason } => {
                info!(uid, ?reason, "Peer left");
                self.transition(|machine| machine.on_peer_left(uid, Instant::now()));
            }
        }
    }

    fn handle_input(&mut self, input: SessionInput) {
        match input {
            SessionInput::Countdown(CountdownEvent::Tick { generation, remaining }) => {
                if self.countdown.is_current(generation) {
                    debug!(remaining_ms = remaining.as_millis() as u64, "Waiting for a peer");
                    self.publish(SessionEvent::CountdownTick {
                        session_id: self.id,
                        remaining,
                    });
                }
            }
            SessionInput::Countdown(CountdownEvent::Expired { generation }) => {
                if self.countdown.accept_expiry(generation) {
                    info!("Nobody joined before the countdown expired");
                    self.transition(|machine| machine.on_countdown_expired());
                }
            }
            SessionInput::TokenFetched(token) => {
                self.token_fetch = None;
                match token {
                    Some(token) => self.join_channel(token),
                    None => {
                        self.publish(SessionEvent::Notice {
                            session_id: self.id,
                            notice: Notice::TokenNotFound,
                        });
                        self.end(EndReason::TokenNotFound);
                    }
                }
            }
        }
    }

    fn join_channel(&mut self, token: TokenInfo) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };

        info!(channel = %token.channel_name, uid = self.config.local_uid, "Joining channel");
        if let Err(e) = engine.join_channel(
            &token.token,
            &token.channel_name,
            &self.config.join_info,
            self.config.local_uid,
        ) {
            error!(error = %e, "Join request rejected");
            self.publish(SessionEvent::Error {
                session_id: self.id,
                error: e,
            });
            self.end(EndReason::TransportFailure);
        }
    }

    fn end(&mut self, reason: EndReason) {
        self.transition(|machine| machine.end(reason));
    }

    /// Run a state machine input, carry out its effects and publish the change
    fn transition<F>(&mut self, step: F)
    where
        F: FnOnce(&mut CallStateMachine) -> Vec<Effect>,
    {
        let previous_state = self.machine.state().clone();
        let effects = step(&mut self.machine);
        for effect in effects {
            self.apply(effect);
        }

        let new_state = self.machine.state().clone();
        if new_state != previous_state {
            info!(from = %previous_state, to = %new_state, "Call state changed");
            self.state_tx.send_replace(new_state.clone());
            self.publish(SessionEvent::StateChanged(StateChangeInfo {
                session_id: self.id,
                previous_state,
                new_state,
                timestamp: Utc::now(),
            }));
        }
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::StartCountdown { deadline } => {
                self.countdown.start(deadline);
            }
            Effect::CancelCountdown => {
                self.countdown.cancel();
            }
            Effect::AttachRemoteView { uid } => self.attach_remote_view(uid),
            Effect::DetachRemoteView { uid } => {
                if let Some(surface) = self.views.detach_remote(uid) {
                    self.surfaces.release_surface(surface);
                    self.publish(SessionEvent::RemoteViewDetached {
                        session_id: self.id,
                        uid,
                    });
                }
            }
            Effect::Notify(notice) => {
                info!(%notice, "Notice");
                self.publish(SessionEvent::Notice {
                    session_id: self.id,
                    notice,
                });
            }
            Effect::Close { reason } => self.release(reason),
        }
    }

    fn attach_remote_view(&mut self, uid: Uid) {
        if self.views.has_remote() {
            return;
        }

        let surface = self.surfaces.create_surface(false);
        if let Some(engine) = self.engine.as_mut().and_then(|handle| handle.engine()) {
            let canvas = VideoCanvas::remote(surface, self.config.remote_render_mode, uid);
            if let Err(e) = engine.setup_remote_video(canvas) {
                warn!(uid, error = %e, "Failed to bind remote video");
            }
        }
        self.views.attach_remote(uid, surface);
        self.last_peer = Some(uid);
        self.publish(SessionEvent::RemoteViewAttached {
            session_id: self.id,
            uid,
            surface,
        });
    }

    fn release(&mut self, reason: EndReason) {
        info!(?reason, "Closing call session");
        self.countdown.cancel();
        if let Some(fetch) = self.token_fetch.take() {
            fetch.abort();
        }
        if let Some(mut engine) = self.engine.take() {
            engine.release();
        }
        if let Some(surface) = self.views.take_local() {
            self.surfaces.release_surface(surface);
        }
    }

    fn finish(mut self) -> SessionSummary {
        let end_reason = match self.machine.state() {
            CallState::Ended { reason } => *reason,
            _ => EndReason::Teardown,
        };
        // Effects normally released everything already.
        self.release(end_reason);

        self.publish(SessionEvent::Closed {
            session_id: self.id,
            reason: end_reason,
        });
        info!(?end_reason, "Call session finished");

        SessionSummary {
            session_id: self.id,
            end_reason,
            was_connected: self.machine.was_connected(),
            last_peer: self.last_peer,
            media: self.flags,
            waited_ms: self.config.wait_timeout_ms,
            started_at: self.started_at,
            ended_at: Utc::now(),
        }
    }

    fn publish_flags(&self) {
        self.publish(SessionEvent::MediaFlagsChanged {
            session_id: self.id,
            flags: self.flags,
        });
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Host side handle to a running call session
///
/// Dropping the handle tears the session down, like closing the call screen.
pub struct SessionHandle {
    id: SessionId,
    commands: mpsc::Sender<SessionCommand>,
    events: broadcast::Sender<SessionEvent>,
    first_receiver: Option<broadcast::Receiver<SessionEvent>>,
    state: watch::Receiver<CallState>,
    task: JoinHandle<SessionSummary>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Snapshot of the current call state
    pub fn state(&self) -> CallState {
        self.state.borrow().clone()
    }

    /// Wait until the call state satisfies `predicate`
    pub async fn wait_for_state<F>(&self, predicate: F) -> CallResult<CallState>
    where
        F: FnMut(&CallState) -> bool,
    {
        let mut state = self.state.clone();
        let result = state
            .wait_for(predicate)
            .await
            .map(|state| state.clone())
            .map_err(|_| CallError::SessionClosed);
        result
    }

    /// Receiver subscribed before the session started; only available once
    pub fn take_event_receiver(&mut self) -> Option<broadcast::Receiver<SessionEvent>> {
        self.first_receiver.take()
    }

    /// New receiver for events published from now on
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn toggle_mic(&self) -> CallResult<MediaFlags> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::ToggleMic { reply }).await?;
        rx.await.map_err(|_| CallError::SessionClosed)
    }

    pub async fn toggle_video(&self) -> CallResult<MediaFlags> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::ToggleVideo { reply }).await?;
        rx.await.map_err(|_| CallError::SessionClosed)
    }

    /// Hang up; the session ends and releases the engine
    pub async fn end_call(&self) -> CallResult<()> {
        self.send(SessionCommand::EndCall).await
    }

    /// Wait for the session to end on its own or through [`end_call`](Self::end_call)
    pub async fn wait(self) -> CallResult<SessionSummary> {
        let SessionHandle { commands, task, .. } = self;
        let summary = task.await.map_err(|e| {
            error!(error = %e, "Call session task failed");
            CallError::SessionClosed
        });
        drop(commands);
        summary
    }

    /// Close the call screen: end the session and wait for its cleanup
    pub async fn teardown(self) -> CallResult<SessionSummary> {
        let SessionHandle { commands, task, .. } = self;
        drop(commands);
        task.await.map_err(|e| {
            error!(error = %e, "Call session task failed");
            CallError::SessionClosed
        })
    }

    async fn send(&self, command: SessionCommand) -> CallResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| CallError::SessionClosed)
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("state", &*self.state.borrow())
            .finish()
    }
}
