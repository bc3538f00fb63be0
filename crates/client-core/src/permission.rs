//! Camera and microphone permission gate
//!
//! The host platform owns the actual permission dialogs. A call may only
//! start once both [`Permission::Camera`] and [`Permission::RecordAudio`] are
//! granted; [`ensure_call_permissions`] drives the check/rationale/request
//! sequence through a [`PermissionProvider`].

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CallError, CallResult};
use crate::events::Notice;

/// Platform permission needed for a video call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    Camera,
    RecordAudio,
}

/// Every permission a video call needs
pub const CALL_PERMISSIONS: [Permission; 2] = [Permission::Camera, Permission::RecordAudio];

/// Host platform permission API
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    fn is_granted(&self, permission: Permission) -> bool;

    /// Whether the platform wants an explanation shown before asking again
    fn should_show_rationale(&self, _permission: Permission) -> bool {
        false
    }

    /// Show the rationale; returns true if the user chose to grant
    async fn show_rationale(&self, _notice: Notice) -> bool {
        false
    }

    /// Ask the user; the map holds an answer per requested permission
    async fn request(&self, permissions: &[Permission]) -> HashMap<Permission, bool>;
}

/// Make sure every call permission is granted, asking the user if needed
pub async fn ensure_call_permissions(provider: &dyn PermissionProvider) -> CallResult<()> {
    let missing: Vec<Permission> = CALL_PERMISSIONS
        .iter()
        .copied()
        .filter(|p| !provider.is_granted(*p))
        .collect();

    if missing.is_empty() {
        debug!("Camera and microphone already granted");
        return Ok(());
    }

    if provider.should_show_rationale(Permission::Camera) {
        info!("Showing camera permission rationale");
        if !provider.show_rationale(Notice::CameraRationale).await {
            warn!(?missing, "User dismissed permission rationale");
            return Err(CallError::PermissionDenied { missing });
        }
    }

    let answers = provider.request(&missing).await;
    let still_missing: Vec<Permission> = missing
        .into_iter()
        .filter(|p| !answers.get(p).copied().unwrap_or(false))
        .collect();

    if still_missing.is_empty() {
        info!("Camera and microphone granted");
        Ok(())
    } else {
        warn!(missing = ?still_missing, "Call permissions denied");
        Err(CallError::PermissionDenied {
            missing: still_missing,
        })
    }
}

/// Permission provider with fixed answers
///
/// Useful for headless hosts and tests: permissions in `granted` are already
/// held, those in `grant_on_request` are granted when asked, everything else
/// is refused.
#[derive(Debug, Clone, Default)]
pub struct StaticPermissions {
    granted: HashSet<Permission>,
    grant_on_request: HashSet<Permission>,
    rationale_for: HashSet<Permission>,
    accept_rationale: bool,
}

impl StaticPermissions {
    /// Everything already granted
    pub fn all_granted() -> Self {
        Self {
            granted: CALL_PERMISSIONS.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Nothing granted, every request refused
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_granted(mut self, permission: Permission) -> Self {
        self.granted.insert(permission);
        self
    }

    pub fn without(mut self, permission: Permission) -> Self {
        self.granted.remove(&permission);
        self.grant_on_request.remove(&permission);
        self
    }

    pub fn grant_on_request(mut self, permission: Permission) -> Self {
        self.grant_on_request.insert(permission);
        self
    }

    pub fn with_rationale(mut self, permission: Permission, accept: bool) -> Self {
        self.rationale_for.insert(permission);
        self.accept_rationale = accept;
        self
    }
}

#[async_trait]
impl PermissionProvider for StaticPermissions {
    fn is_granted(&self, permission: Permission) -> bool {
        self.granted.contains(&permission)
    }

    fn should_show_rationale(&self, permission: Permission) -> bool {
        self.rationale_for.contains(&permission)
    }

    async fn show_rationale(&self, _notice: Notice) -> bool {
        self.accept_rationale
    }

    async fn request(&self, permissions: &[Permission]) -> HashMap<Permission, bool> {
        permissions
            .iter()
            .map(|p| (*p, self.grant_on_request.contains(p)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_already_granted() {
        assert!(ensure_call_permissions(&StaticPermissions::all_granted()).await.is_ok());
    }

    #[tokio::test]
    async fn test_request_missing_permissions() {
        let provider = StaticPermissions::none()
            .with_granted(Permission::Camera)
            .grant_on_request(Permission::RecordAudio);

        assert!(ensure_call_permissions(&provider).await.is_ok());
    }

    #[tokio::test]
    async fn test_camera_denied() {
        let provider = StaticPermissions::all_granted().without(Permission::Camera);

        let result = ensure_call_permissions(&provider).await;

        assert_eq!(
            result,
            Err(CallError::PermissionDenied {
                missing: vec![Permission::Camera]
            })
        );
    }

    #[tokio::test]
    async fn test_rationale_dismissed() {
        let provider = StaticPermissions::none()
            .grant_on_request(Permission::Camera)
            .grant_on_request(Permission::RecordAudio)
            .with_rationale(Permission::Camera, false);

        let err = ensure_call_permissions(&provider).await.unwrap_err();

        assert!(err.is_reofferable());
        assert_eq!(
            err,
            CallError::PermissionDenied {
                missing: vec![Permission::Camera, Permission::RecordAudio]
            }
        );
    }

    #[tokio::test]
    async fn test_rationale_accepted_requests_all_missing() {
        let provider = StaticPermissions::none()
            .grant_on_request(Permission::Camera)
            .grant_on_request(Permission::RecordAudio)
            .with_rationale(Permission::Camera, true);

        assert!(ensure_call_permissions(&provider).await.is_ok());
    }
}
