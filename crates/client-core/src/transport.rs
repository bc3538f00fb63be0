//! RTC engine boundary
//!
//! The engine (capture, encode, transmission, NAT traversal) is an external
//! SDK. This module describes what the call session needs from it:
//!
//! - [`EngineFactory`] creates an engine bound to an app id and an [`EventSink`]
//! - [`RtcEngine`] is the set of calls the session makes on it
//! - [`EngineEvent`] is what the engine reports back, from its own threads
//! - [`EngineHandle`] owns an engine and guarantees it is released
//!
//! Engine callbacks must never touch session state directly. They go through
//! the sink, a bounded queue drained by the session task.

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::call::Uid;
use crate::error::CallResult;
use crate::render::VideoCanvas;

/// Why a remote participant went offline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineReason {
    /// Left the channel on purpose
    Quit,
    /// Stopped sending for too long
    Dropped,
    /// Switched to audience role
    BecameAudience,
    Other(i32),
}

impl From<i32> for OfflineReason {
    fn from(code: i32) -> Self {
        match code {
            0 => OfflineReason::Quit,
            1 => OfflineReason::Dropped,
            2 => OfflineReason::BecameAudience,
            other => OfflineReason::Other(other),
        }
    }
}

/// Lifecycle callback from the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Our own join was confirmed
    JoinSuccess {
        channel: String,
        uid: Uid,
        elapsed_ms: u32,
    },
    /// A remote participant joined
    PeerJoined { uid: Uid, elapsed_ms: u32 },
    /// A remote participant left
    PeerLeft { uid: Uid, reason: OfflineReason },
}

/// Entry point for engine callbacks
///
/// Cloneable and usable from any thread. Delivery never blocks the caller:
/// when the queue is full the event is logged and dropped.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<EngineEvent>,
}

impl EventSink {
    /// Create a sink and the receiving end drained by the session
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue an event for the session; returns false if it was not queued
    pub fn deliver(&self, event: EngineEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(?event, "Engine event queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!(?event, "Session gone, dropping engine event");
                false
            }
        }
    }

    pub fn on_join_channel_success(&self, channel: impl Into<String>, uid: Uid, elapsed_ms: u32) -> bool {
        self.deliver(EngineEvent::JoinSuccess {
            channel: channel.into(),
            uid,
            elapsed_ms,
        })
    }

    pub fn on_user_joined(&self, uid: Uid, elapsed_ms: u32) -> bool {
        self.deliver(EngineEvent::PeerJoined { uid, elapsed_ms })
    }

    pub fn on_user_offline(&self, uid: Uid, reason: i32) -> bool {
        self.deliver(EngineEvent::PeerLeft {
            uid,
            reason: reason.into(),
        })
    }

    /// Whether the session still listens
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Calls the session makes on an RTC engine
pub trait RtcEngine: Send {
    fn enable_video(&mut self) -> CallResult<()>;

    fn setup_local_video(&mut self, canvas: VideoCanvas) -> CallResult<()>;

    fn setup_remote_video(&mut self, canvas: VideoCanvas) -> CallResult<()>;

    /// Ask to join `channel`; confirmation arrives as [`EngineEvent::JoinSuccess`]
    fn join_channel(&mut self, token: &str, channel: &str, info: &str, uid: Uid) -> CallResult<()>;

    fn mute_local_audio(&mut self, muted: bool) -> CallResult<()>;

    fn mute_local_video(&mut self, muted: bool) -> CallResult<()>;

    fn leave_channel(&mut self) -> CallResult<()>;

    /// Free native resources; the engine is unusable afterwards
    fn destroy(&mut self);
}

/// Creates engines
pub trait EngineFactory: Send + Sync {
    fn create(&self, app_id: &str, sink: EventSink) -> CallResult<Box<dyn RtcEngine>>;
}

/// Exclusive owner of an engine
///
/// [`release`](Self::release) leaves the channel (if a join was requested)
/// and destroys the engine. It runs at most once, and again on drop if the
/// owner never called it.
pub struct EngineHandle {
    engine: Option<Box<dyn RtcEngine>>,
    join_requested: bool,
}

impl EngineHandle {
    pub fn new(engine: Box<dyn RtcEngine>) -> Self {
        Self {
            engine: Some(engine),
            join_requested: false,
        }
    }

    pub fn is_released(&self) -> bool {
        self.engine.is_none()
    }

    /// Borrow the engine unless it was released
    pub fn engine(&mut self) -> Option<&mut (dyn RtcEngine + 'static)> {
        self.engine.as_deref_mut()
    }

    pub fn join_channel(&mut self, token: &str, channel: &str, info: &str, uid: Uid) -> CallResult<()> {
        match self.engine.as_mut() {
            Some(engine) => {
                self.join_requested = true;
                engine.join_channel(token, channel, info, uid)
            }
            None => Err(crate::error::CallError::SessionClosed),
        }
    }

    pub fn release(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            if self.join_requested {
                if let Err(e) = engine.leave_channel() {
                    warn!(error = %e, "Failed to leave channel during release");
                }
            }
            engine.destroy();
            info!("RTC engine released");
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("released", &self.engine.is_none())
            .field("join_requested", &self.join_requested)
            .finish()
    }
}
