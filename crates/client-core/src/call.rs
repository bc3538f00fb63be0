//! Call data types
//!
//! Lifecycle state, local media flags and the summary handed back to the host
//! once a call session finishes. The transitions themselves live in
//! [`crate::machine`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::CallError;

/// Identifier the RTC engine assigns to a channel participant
pub type Uid = u32;

/// Unique identifier for a call session
pub type SessionId = Uuid;

/// Current state of a call session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallState {
    /// Engine not yet confirmed in the channel
    Idle,
    /// Alone in the channel, countdown running until `deadline`
    Waiting { deadline: Instant },
    /// Paired with a peer
    Connected { peer: Uid },
    /// Terminal; a new call needs a new session
    Ended { reason: EndReason },
}

impl CallState {
    /// Short name for logs and events
    pub fn name(&self) -> &'static str {
        match self {
            CallState::Idle => "Idle",
            CallState::Waiting { .. } => "Waiting",
            CallState::Connected { .. } => "Connected",
            CallState::Ended { .. } => "Ended",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, CallState::Connected { .. })
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, CallState::Waiting { .. })
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, CallState::Ended { .. })
    }

    /// Deadline of the wait countdown, only present while waiting
    pub fn deadline(&self) -> Option<Instant> {
        match self {
            CallState::Waiting { deadline } => Some(*deadline),
            _ => None,
        }
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallState::Connected { peer } => write!(f, "Connected({})", peer),
            CallState::Ended { reason } => write!(f, "Ended({:?})", reason),
            other => f.write_str(other.name()),
        }
    }
}

/// Why a call session reached [`CallState::Ended`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndReason {
    /// User pressed end call
    UserHangup,
    /// Host screen went away
    Teardown,
    /// Nobody joined before the countdown expired
    PeerTimeout,
    /// No active token in the document store
    TokenNotFound,
    /// The engine rejected the join request
    TransportFailure,
}

impl EndReason {
    /// Error reported to the host for this reason, if it is a failure
    pub fn to_error(self, wait_timeout_ms: u64) -> Option<CallError> {
        match self {
            EndReason::UserHangup | EndReason::Teardown => None,
            EndReason::PeerTimeout => Some(CallError::PeerTimeout {
                waited_ms: wait_timeout_ms,
            }),
            EndReason::TokenNotFound => Some(CallError::TokenNotFound),
            EndReason::TransportFailure => Some(CallError::transport_failed("join request rejected")),
        }
    }
}

/// Local media state, toggled only by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFlags {
    pub mic_enabled: bool,
    pub video_enabled: bool,
}

impl Default for MediaFlags {
    fn default() -> Self {
        Self {
            mic_enabled: true,
            video_enabled: true,
        }
    }
}

impl MediaFlags {
    /// Flip the microphone flag, returning whether the stream must now be muted
    pub fn toggle_mic(&mut self) -> bool {
        let mute = self.mic_enabled;
        self.mic_enabled = !self.mic_enabled;
        mute
    }

    /// Flip the camera flag, returning whether the stream must now be muted
    pub fn toggle_video(&mut self) -> bool {
        let mute = self.video_enabled;
        self.video_enabled = !self.video_enabled;
        mute
    }
}

/// Outcome of a finished call session
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub end_reason: EndReason,
    /// Whether the session ever reached Connected
    pub was_connected: bool,
    /// Last peer the session was connected to
    pub last_peer: Option<Uid>,
    pub media: MediaFlags,
    /// Configured wait countdown length
    pub waited_ms: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl SessionSummary {
    /// Failure the host should surface, if any
    pub fn error(&self) -> Option<CallError> {
        self.end_reason.to_error(self.waited_ms)
    }
}
