//! Events published by a call session
//!
//! Sessions broadcast [`SessionEvent`]s so that the host can update its
//! screen: state changes, the waiting countdown, attached views, toggled
//! media and user-facing notices.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::call::{CallState, EndReason, MediaFlags, SessionId, Uid};
use crate::error::CallError;
use crate::render::SurfaceId;

/// Short message shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Notice {
    /// Countdown expired without a peer
    NoOneJoined,
    /// The connected peer left the channel
    PeerLeft,
    /// No active token in the document store
    TokenNotFound,
    /// Camera access needs an explanation before asking
    CameraRationale,
}

impl Notice {
    pub fn message(&self) -> &'static str {
        match self {
            Notice::NoOneJoined => "Sorry, no one joined the random call.",
            Notice::PeerLeft => "The user left the call.",
            Notice::TokenNotFound => "Token not found",
            Notice::CameraRationale => "Camera permission is required to carry out the video call.",
        }
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Information about a call state change
#[derive(Debug, Clone)]
pub struct StateChangeInfo {
    pub session_id: SessionId,
    pub previous_state: CallState,
    pub new_state: CallState,
    pub timestamp: DateTime<Utc>,
}

/// Event published by a call session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(StateChangeInfo),
    /// Waiting countdown progress; cosmetic only
    CountdownTick {
        session_id: SessionId,
        remaining: Duration,
    },
    LocalViewAttached {
        session_id: SessionId,
        surface: SurfaceId,
    },
    RemoteViewAttached {
        session_id: SessionId,
        uid: Uid,
        surface: SurfaceId,
    },
    RemoteViewDetached {
        session_id: SessionId,
        uid: Uid,
    },
    MediaFlagsChanged {
        session_id: SessionId,
        flags: MediaFlags,
    },
    Notice {
        session_id: SessionId,
        notice: Notice,
    },
    Error {
        session_id: SessionId,
        error: CallError,
    },
    /// Last event of a session
    Closed {
        session_id: SessionId,
        reason: EndReason,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            SessionEvent::StateChanged(info) => info.session_id,
            SessionEvent::CountdownTick { session_id, .. }
            | SessionEvent::LocalViewAttached { session_id, .. }
            | SessionEvent::RemoteViewAttached { session_id, .. }
            | SessionEvent::RemoteViewDetached { session_id, .. }
            | SessionEvent::MediaFlagsChanged { session_id, .. }
            | SessionEvent::Notice { session_id, .. }
            | SessionEvent::Error { session_id, .. }
            | SessionEvent::Closed { session_id, .. } => *session_id,
        }
    }

    /// The notice carried by this event, if any
    pub fn notice(&self) -> Option<Notice> {
        match self {
            SessionEvent::Notice { notice, .. } => Some(*notice),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SessionEvent::Closed { .. })
    }
}
