//! Builder for launching call sessions

use std::sync::Arc;

use tracing::info;

use crate::config::CallConfig;
use crate::error::{CallError, CallResult};
use crate::permission::{ensure_call_permissions, PermissionProvider};
use crate::render::{SequentialSurfaces, SurfaceProvider};
use crate::session::{CallSession, SessionDeps, SessionHandle};
use crate::store::DocumentStore;
use crate::transport::EngineFactory;

/// Builder for a call session
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use randcall_client_core::{CallSessionBuilder, InMemoryDocumentStore, SimulatedEngineFactory, StaticPermissions};
/// # async fn example() -> randcall_client_core::CallResult<()> {
/// let handle = CallSessionBuilder::new()
///     .app_id("my-app-id")
///     .engine_factory(Arc::new(SimulatedEngineFactory::new()))
///     .document_store(Arc::new(InMemoryDocumentStore::new()))
///     .permissions(Arc::new(StaticPermissions::all_granted()))
///     .launch()
///     .await?;
///
/// let summary = handle.wait().await?;
/// println!("Call ended: {:?}", summary.end_reason);
/// # Ok(())
/// # }
/// ```
pub struct CallSessionBuilder {
    config: CallConfig,
    engine_factory: Option<Arc<dyn EngineFactory>>,
    document_store: Option<Arc<dyn DocumentStore>>,
    permissions: Option<Arc<dyn PermissionProvider>>,
    surfaces: Option<Box<dyn SurfaceProvider>>,
}

impl CallSessionBuilder {
    pub fn new() -> Self {
        Self {
            config: CallConfig::default(),
            engine_factory: None,
            document_store: None,
            permissions: None,
            surfaces: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: CallConfig) -> Self {
        self.config = config;
        self
    }

    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.config.app_id = app_id.into();
        self
    }

    pub fn engine_factory(mut self, factory: Arc<dyn EngineFactory>) -> Self {
        self.engine_factory = Some(factory);
        self
    }

    pub fn document_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.document_store = Some(store);
        self
    }

    pub fn permissions(mut self, permissions: Arc<dyn PermissionProvider>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    /// Surface provider; sequential ids when not set
    pub fn surfaces(mut self, surfaces: Box<dyn SurfaceProvider>) -> Self {
        self.surfaces = Some(surfaces);
        self
    }

    /// Check permissions and start the session
    ///
    /// Nothing touches the engine unless both camera and microphone are
    /// granted.
    pub async fn launch(self) -> CallResult<SessionHandle> {
        self.config.validate()?;

        let engine_factory = self.engine_factory.ok_or_else(|| CallError::MissingConfiguration {
            field: "engine_factory".to_string(),
        })?;
        let document_store = self.document_store.ok_or_else(|| CallError::MissingConfiguration {
            field: "document_store".to_string(),
        })?;
        let permissions = self.permissions.ok_or_else(|| CallError::MissingConfiguration {
            field: "permissions".to_string(),
        })?;

        ensure_call_permissions(permissions.as_ref()).await?;

        let deps = SessionDeps {
            engine_factory,
            document_store,
            surfaces: self
                .surfaces
                .unwrap_or_else(|| Box::new(SequentialSurfaces::new())),
        };
        let handle = CallSession::start(self.config, deps);
        info!(session_id = %handle.id(), "Call session launched");
        Ok(handle)
    }
}

impl Default for CallSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
