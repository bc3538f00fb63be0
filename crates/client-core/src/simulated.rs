//! Simulated RTC engine
//!
//! An in-process stand-in for the real SDK. It records every call made on
//! it, confirms joins asynchronously through the [`EventSink`] like the real
//! engine does, and can replay a script of peers joining and leaving.
//! An [`EngineProbe`] shared with the factory lets callers inspect the
//! recorded calls and inject callbacks by hand.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::call::Uid;
use crate::error::{CallError, CallResult};
use crate::render::VideoCanvas;
use crate::transport::{EngineFactory, EventSink, RtcEngine};

/// A call made on a simulated engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Create { app_id: String },
    EnableVideo,
    SetupLocalVideo(VideoCanvas),
    SetupRemoteVideo(VideoCanvas),
    JoinChannel {
        token: String,
        channel: String,
        info: String,
        uid: Uid,
    },
    MuteLocalAudio(bool),
    MuteLocalVideo(bool),
    LeaveChannel,
    Destroy,
}

/// A remote participant replayed after our join is confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptedPeer {
    pub uid: Uid,
    /// Delay after join confirmation
    pub join_after: Duration,
    /// Delay after join confirmation; stays forever when absent
    pub leave_after: Option<Duration>,
}

impl ScriptedPeer {
    pub fn joining(uid: Uid, join_after: Duration) -> Self {
        Self {
            uid,
            join_after,
            leave_after: None,
        }
    }

    pub fn leaving_after(mut self, leave_after: Duration) -> Self {
        self.leave_after = Some(leave_after);
        self
    }
}

#[derive(Debug, Default)]
struct ProbeState {
    calls: Vec<EngineCall>,
    sink: Option<EventSink>,
    engines_created: usize,
}

/// Shared view into the engines created by a [`SimulatedEngineFactory`]
#[derive(Debug, Clone, Default)]
pub struct EngineProbe {
    inner: Arc<Mutex<ProbeState>>,
}

impl EngineProbe {
    fn record(&self, call: EngineCall) {
        debug!(?call, "Simulated engine call");
        self.inner.lock().calls.push(call);
    }

    /// Every call recorded so far, in order
    pub fn calls(&self) -> Vec<EngineCall> {
        self.inner.lock().calls.clone()
    }

    pub fn engines_created(&self) -> usize {
        self.inner.lock().engines_created
    }

    pub fn count(&self, predicate: impl Fn(&EngineCall) -> bool) -> usize {
        self.inner.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    pub fn join_requested(&self) -> bool {
        self.count(|c| matches!(c, EngineCall::JoinChannel { .. })) > 0
    }

    pub fn is_destroyed(&self) -> bool {
        self.count(|c| matches!(c, EngineCall::Destroy)) > 0
    }

    /// Remote uids bound to a surface, in order
    pub fn remote_views(&self) -> Vec<Uid> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                EngineCall::SetupRemoteVideo(canvas) => Some(canvas.uid),
                _ => None,
            })
            .collect()
    }

    fn sink(&self) -> Option<EventSink> {
        self.inner.lock().sink.clone()
    }

    /// Inject a join confirmation; false if no engine is listening
    pub fn confirm_join(&self, channel: &str, uid: Uid) -> bool {
        self.sink()
            .map(|sink| sink.on_join_channel_success(channel, uid, 0))
            .unwrap_or(false)
    }

    /// Inject a peer joining
    pub fn peer_joined(&self, uid: Uid) -> bool {
        self.sink().map(|sink| sink.on_user_joined(uid, 0)).unwrap_or(false)
    }

    /// Inject a peer leaving with a raw offline reason code
    pub fn peer_left(&self, uid: Uid, reason: i32) -> bool {
        self.sink()
            .map(|sink| sink.on_user_offline(uid, reason))
            .unwrap_or(false)
    }
}

/// Factory of simulated engines
#[derive(Debug, Clone, Default)]
pub struct SimulatedEngineFactory {
    probe: EngineProbe,
    script: Vec<ScriptedPeer>,
    init_failure: Option<String>,
    reject_join: bool,
    manual_join: bool,
}

impl SimulatedEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn probe(&self) -> EngineProbe {
        self.probe.clone()
    }

    pub fn with_peer(mut self, peer: ScriptedPeer) -> Self {
        self.script.push(peer);
        self
    }

    /// Engine creation fails with `reason`
    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.init_failure = Some(reason.into());
        self
    }

    /// Join requests are refused synchronously
    pub fn rejecting_join(mut self) -> Self {
        self.reject_join = true;
        self
    }

    /// Joins are only confirmed through [`EngineProbe::confirm_join`]
    pub fn manual_join(mut self) -> Self {
        self.manual_join = true;
        self
    }
}

impl EngineFactory for SimulatedEngineFactory {
    fn create(&self, app_id: &str, sink: EventSink) -> CallResult<Box<dyn RtcEngine>> {
        self.probe.record(EngineCall::Create {
            app_id: app_id.to_string(),
        });

        if app_id.trim().is_empty() {
            return Err(CallError::engine_init_failure("invalid app id"));
        }
        if let Some(reason) = &self.init_failure {
            return Err(CallError::engine_init_failure(reason.clone()));
        }

        {
            let mut state = self.probe.inner.lock();
            state.engines_created += 1;
            state.sink = Some(sink.clone());
        }

        Ok(Box::new(SimulatedEngine {
            probe: self.probe.clone(),
            sink,
            script: self.script.clone(),
            reject_join: self.reject_join,
            manual_join: self.manual_join,
            replay: None,
            destroyed: false,
        }))
    }
}

/// Engine returned by [`SimulatedEngineFactory`]
pub struct SimulatedEngine {
    probe: EngineProbe,
    sink: EventSink,
    script: Vec<ScriptedPeer>,
    reject_join: bool,
    manual_join: bool,
    replay: Option<JoinHandle<()>>,
    destroyed: bool,
}

impl SimulatedEngine {
    fn ensure_alive(&self) -> CallResult<()> {
        if self.destroyed {
            Err(CallError::transport_failed("engine destroyed"))
        } else {
            Ok(())
        }
    }

    fn stop_replay(&mut self) {
        if let Some(replay) = self.replay.take() {
            replay.abort();
        }
    }

    fn start_replay(&mut self, channel: String, uid: Uid) {
        let sink = self.sink.clone();
        let mut timeline: Vec<(Duration, ReplayStep)> = Vec::new();
        for peer in &self.script {
            timeline.push((peer.join_after, ReplayStep::Join(peer.uid)));
            if let Some(leave_after) = peer.leave_after {
                timeline.push((leave_after, ReplayStep::Leave(peer.uid)));
            }
        }
        timeline.sort_by_key(|(at, _)| *at);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            sink.on_join_channel_success(channel, uid, 0);
            return;
        };

        self.replay = Some(runtime.spawn(async move {
            let confirmed_at = tokio::time::Instant::now();
            sink.on_join_channel_success(channel, uid, 0);

            for (at, step) in timeline {
                tokio::time::sleep_until(confirmed_at + at).await;
                match step {
                    ReplayStep::Join(peer) => sink.on_user_joined(peer, at.as_millis() as u32),
                    ReplayStep::Leave(peer) => sink.on_user_offline(peer, 0),
                };
            }
        }));
    }
}

#[derive(Debug, Clone, Copy)]
enum ReplayStep {
    Join(Uid),
    Leave(Uid),
}

impl RtcEngine for SimulatedEngine {
    fn enable_video(&mut self) -> CallResult<()> {
        self.ensure_alive()?;
        self.probe.record(EngineCall::EnableVideo);
        Ok(())
    }

    fn setup_local_video(&mut self, canvas: VideoCanvas) -> CallResult<()> {
        self.ensure_alive()?;
        self.probe.record(EngineCall::SetupLocalVideo(canvas));
        Ok(())
    }

    fn setup_remote_video(&mut self, canvas: VideoCanvas) -> CallResult<()> {
        self.ensure_alive()?;
        self.probe.record(EngineCall::SetupRemoteVideo(canvas));
        Ok(())
    }

    fn join_channel(&mut self, token: &str, channel: &str, info: &str, uid: Uid) -> CallResult<()> {
        self.ensure_alive()?;
        self.probe.record(EngineCall::JoinChannel {
            token: token.to_string(),
            channel: channel.to_string(),
            info: info.to_string(),
            uid,
        });

        if self.reject_join {
            return Err(CallError::transport_failed("join refused"));
        }

        let local_uid = if uid == 0 {
            rand::thread_rng().gen_range(1..=i32::MAX as u32)
        } else {
            uid
        };
        info!(channel, local_uid, "Simulated join accepted");

        if !self.manual_join {
            self.start_replay(channel.to_string(), local_uid);
        }
        Ok(())
    }

    fn mute_local_audio(&mut self, muted: bool) -> CallResult<()> {
        self.ensure_alive()?;
        self.probe.record(EngineCall::MuteLocalAudio(muted));
        Ok(())
    }

    fn mute_local_video(&mut self, muted: bool) -> CallResult<()> {
        self.ensure_alive()?;
        self.probe.record(EngineCall::MuteLocalVideo(muted));
        Ok(())
    }

    fn leave_channel(&mut self) -> CallResult<()> {
        self.ensure_alive()?;
        self.stop_replay();
        self.probe.record(EngineCall::LeaveChannel);
        Ok(())
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.stop_replay();
        self.destroyed = true;
        self.probe.inner.lock().sink = None;
        self.probe.record(EngineCall::Destroy);
    }
}

impl Drop for SimulatedEngine {
    fn drop(&mut self) {
        self.stop_replay();
    }
}
