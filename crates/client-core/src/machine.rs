//! Call lifecycle state machine
//!
//! Pure transition logic: each input returns the [`Effect`]s the owner must
//! carry out (countdown, views, notices, release). No I/O happens here, so
//! the session task stays the single place that touches the engine.
//!
//! ```text
//! Idle --join confirmed--> Waiting --peer joined--> Connected
//!                            |  ^                      |
//!                   countdown|  +------peer left-------+
//!                    expired v
//!                          Ended <--hangup/teardown-- (any)
//! ```

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::call::{CallState, EndReason, Uid};
use crate::events::Notice;

/// Side effect requested by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// (Re)start the wait countdown
    StartCountdown { deadline: Instant },
    /// Stop the wait countdown if it is running
    CancelCountdown,
    /// Bind a remote surface to this peer
    AttachRemoteView { uid: Uid },
    /// Free the remote surface bound to this peer
    DetachRemoteView { uid: Uid },
    /// Show a notice to the user
    Notify(Notice),
    /// Leave the channel and release the engine
    Close { reason: EndReason },
}

/// Lifecycle of one call attempt
#[derive(Debug, Clone)]
pub struct CallStateMachine {
    state: CallState,
    remote_peer: Option<Uid>,
    wait_timeout: Duration,
    was_connected: bool,
}

impl CallStateMachine {
    pub fn new(wait_timeout: Duration) -> Self {
        Self {
            state: CallState::Idle,
            remote_peer: None,
            wait_timeout,
            was_connected: false,
        }
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    /// Peer whose remote surface is currently attached
    pub fn remote_peer(&self) -> Option<Uid> {
        self.remote_peer
    }

    pub fn was_connected(&self) -> bool {
        self.was_connected
    }

    pub fn is_ended(&self) -> bool {
        self.state.is_ended()
    }

    /// The engine confirmed our own join
    pub fn on_join_success(&mut self, now: Instant) -> Vec<Effect> {
        match self.state {
            CallState::Idle => {
                let deadline = now + self.wait_timeout;
                self.state = CallState::Waiting { deadline };
                vec![Effect::StartCountdown { deadline }]
            }
            _ => {
                debug!(state = %self.state, "Ignoring join confirmation outside Idle");
                Vec::new()
            }
        }
    }

    /// A remote participant joined the channel
    pub fn on_peer_joined(&mut self, uid: Uid) -> Vec<Effect> {
        if self.is_ended() {
            return Vec::new();
        }
        if let Some(current) = self.remote_peer {
            debug!(uid, current, "Remote view already attached, ignoring join");
            return Vec::new();
        }

        self.remote_peer = Some(uid);
        self.was_connected = true;
        self.state = CallState::Connected { peer: uid };
        vec![Effect::CancelCountdown, Effect::AttachRemoteView { uid }]
    }

    /// A remote participant left the channel
    pub fn on_peer_left(&mut self, uid: Uid, now: Instant) -> Vec<Effect> {
        match self.state {
            CallState::Connected { peer } if peer == uid => {
                let deadline = now + self.wait_timeout;
                self.remote_peer = None;
                self.state = CallState::Waiting { deadline };
                vec![
                    Effect::DetachRemoteView { uid },
                    Effect::Notify(Notice::PeerLeft),
                    Effect::StartCountdown { deadline },
                ]
            }
            _ => {
                debug!(uid, state = %self.state, "Ignoring departure of unattached peer");
                Vec::new()
            }
        }
    }

    /// The wait countdown ran out
    pub fn on_countdown_expired(&mut self) -> Vec<Effect> {
        match self.state {
            CallState::Waiting { .. } => {
                self.state = CallState::Ended {
                    reason: EndReason::PeerTimeout,
                };
                vec![
                    Effect::Notify(Notice::NoOneJoined),
                    Effect::Close {
                        reason: EndReason::PeerTimeout,
                    },
                ]
            }
            _ => Vec::new(),
        }
    }

    /// End the session from any state; a no-op once ended
    pub fn end(&mut self, reason: EndReason) -> Vec<Effect> {
        if self.is_ended() {
            return Vec::new();
        }

        let mut effects = vec![Effect::CancelCountdown];
        if let Some(uid) = self.remote_peer.take() {
            effects.push(Effect::DetachRemoteView { uid });
        }
        self.state = CallState::Ended { reason };
        effects.push(Effect::Close { reason });
        effects
    }
}
