//! Video surfaces
//!
//! The host owns the drawable surfaces; the session only asks for new ones
//! and binds them to the engine through a [`VideoCanvas`]. One local slot and
//! one remote slot exist per call.

use serde::{Deserialize, Serialize};

use crate::call::Uid;

/// Opaque handle to a host-provided drawable surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId(pub u64);

impl std::fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "surface-{}", self.0)
    }
}

/// How video is scaled into its surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Fill the surface, cropping overflow
    Hidden,
    /// Fit inside the surface, letterboxing if needed
    #[default]
    Fit,
}

/// Binding of a surface to a participant's video
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoCanvas {
    pub surface: SurfaceId,
    pub mode: RenderMode,
    /// 0 for the local user
    pub uid: Uid,
}

impl VideoCanvas {
    pub fn local(surface: SurfaceId, mode: RenderMode) -> Self {
        Self { surface, mode, uid: 0 }
    }

    pub fn remote(surface: SurfaceId, mode: RenderMode, uid: Uid) -> Self {
        Self { surface, mode, uid }
    }
}

/// Host side factory of drawable surfaces
pub trait SurfaceProvider: Send {
    /// Create a surface; `overlay` places it above other media surfaces
    fn create_surface(&mut self, overlay: bool) -> SurfaceId;

    /// The surface is no longer bound to any video
    fn release_surface(&mut self, _surface: SurfaceId) {}
}

/// Surface provider that hands out sequential ids
#[derive(Debug, Default)]
pub struct SequentialSurfaces {
    issued: u64,
}

impl SequentialSurfaces {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SurfaceProvider for SequentialSurfaces {
    fn create_surface(&mut self, _overlay: bool) -> SurfaceId {
        self.issued += 1;
        SurfaceId(self.issued)
    }
}

/// Local and remote view slots of one call
#[derive(Debug, Default)]
pub struct ViewSlots {
    local: Option<SurfaceId>,
    remote: Option<(Uid, SurfaceId)>,
}

impl ViewSlots {
    pub fn remote(&self) -> Option<(Uid, SurfaceId)> {
        self.remote
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn set_local(&mut self, surface: SurfaceId) {
        self.local = Some(surface);
    }

    pub fn take_local(&mut self) -> Option<SurfaceId> {
        self.local.take()
    }

    /// Attach a remote view; refused while one is attached
    pub fn attach_remote(&mut self, uid: Uid, surface: SurfaceId) -> bool {
        if self.remote.is_some() {
            return false;
        }
        self.remote = Some((uid, surface));
        true
    }

    /// Detach the remote view of `uid`, returning its surface
    pub fn detach_remote(&mut self, uid: Uid) -> Option<SurfaceId> {
        match self.remote {
            Some((attached, surface)) if attached == uid => {
                self.remote = None;
                Some(surface)
            }
            _ => None,
        }
    }
}
