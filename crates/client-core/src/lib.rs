//! # Randcall Client-Core
//!
//! Client side controller for one-to-one random video calls.
//!
//! This crate provides:
//! - Permission gating for camera and microphone before anything starts
//! - Lookup of the active channel token in a document store
//! - A call session that joins the channel and waits a bounded time for a peer
//! - Local and remote video view management, mic and camera toggles
//! - Guaranteed engine release however the call ends
//! - A simulated RTC engine for tests and the command line tool
//!
//! ## Architecture
//!
//! Each call runs as one tokio task owning all call state. Engine callbacks,
//! countdown ticks and token lookups are queued to that task, so state is
//! never shared across threads. Hosts drive the call through a
//! [`SessionHandle`] and observe it through [`SessionEvent`]s.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use randcall_client_core::{
//!     CallSessionBuilder, InMemoryDocumentStore, SimulatedEngineFactory, StaticPermissions,
//! };
//! use serde_json::json;
//!
//! # async fn example() -> randcall_client_core::CallResult<()> {
//! let store = InMemoryDocumentStore::new()
//!     .with_document("tokens", json!({"token": "abc", "name": "lobby"}));
//!
//! let mut handle = CallSessionBuilder::new()
//!     .app_id("my-app-id")
//!     .engine_factory(Arc::new(SimulatedEngineFactory::new()))
//!     .document_store(Arc::new(store))
//!     .permissions(Arc::new(StaticPermissions::all_granted()))
//!     .launch()
//!     .await?;
//!
//! if let Some(mut events) = handle.take_event_receiver() {
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             if let Some(notice) = event.notice() {
//!                 println!("{}", notice.message());
//!             }
//!         }
//!     });
//! }
//!
//! let summary = handle.wait().await?;
//! println!("Call ended: {:?}", summary.end_reason);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod call;
pub mod config;
pub mod error;
pub mod events;
pub mod machine;
pub mod permission;
pub mod render;
pub mod session;
pub mod simulated;
pub mod store;
pub mod timer;
pub mod token;
pub mod transport;

pub use builder::CallSessionBuilder;
pub use call::{CallState, EndReason, MediaFlags, SessionId, SessionSummary, Uid};
pub use config::CallConfig;
pub use error::{CallError, CallResult};
pub use events::{Notice, SessionEvent, StateChangeInfo};
pub use machine::{CallStateMachine, Effect};
pub use permission::{ensure_call_permissions, Permission, PermissionProvider, StaticPermissions};
pub use render::{RenderMode, SequentialSurfaces, SurfaceId, SurfaceProvider, VideoCanvas};
pub use session::{CallSession, SessionCommand, SessionDeps, SessionHandle};
pub use simulated::{EngineCall, EngineProbe, ScriptedPeer, SimulatedEngineFactory};
pub use store::{DocumentStore, InMemoryDocumentStore, JsonFileDocumentStore};
pub use token::{TokenInfo, TokenRepository};
pub use transport::{EngineEvent, EngineFactory, EventSink, OfflineReason, RtcEngine};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
