//! Active call token lookup
//!
//! Before joining, the session needs the token and channel name published by
//! the backend. [`TokenRepository::fetch_active_token`] reads the configured
//! collection and takes the first document. The store gives no ordering
//! guarantee, so "first" is only deterministic for stores that are.
//!
//! Every failure (empty collection, store error, malformed document, timeout)
//! collapses into `None`; the reason is logged.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{CallError, CallResult};
use crate::store::DocumentStore;

/// Credentials for joining a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub token: String,
    /// Channel the token is valid for
    #[serde(rename = "name", alias = "channelName")]
    pub channel_name: String,
}

impl TokenInfo {
    pub fn new(token: impl Into<String>, channel_name: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            channel_name: channel_name.into(),
        }
    }
}

/// Reads the active token from a document store
#[derive(Clone)]
pub struct TokenRepository {
    store: Arc<dyn DocumentStore>,
    collection: String,
    fetch_timeout: Option<Duration>,
}

impl TokenRepository {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
            fetch_timeout: None,
        }
    }

    /// Give up on the store after `timeout`; no limit by default
    pub fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// First token of the collection, or `None` if there is none to use
    pub async fn fetch_active_token(&self) -> Option<TokenInfo> {
        let listing = self.store.list_documents(&self.collection);
        let documents = match self.fetch_timeout {
            Some(timeout) => with_timeout("fetch_active_token", timeout, listing).await,
            None => listing.await,
        };

        let documents = match documents {
            Ok(documents) => documents,
            Err(e) => {
                error!(collection = %self.collection, error = %e, category = e.category(), "Token lookup failed");
                return None;
            }
        };

        let Some(first) = documents.into_iter().next() else {
            info!(collection = %self.collection, "No active token published");
            return None;
        };

        match serde_json::from_value::<TokenInfo>(first) {
            Ok(token) => {
                debug!(channel = %token.channel_name, "Active token found");
                Some(token)
            }
            Err(e) => {
                warn!(collection = %self.collection, error = %e, "Malformed token document");
                None
            }
        }
    }
}

impl std::fmt::Debug for TokenRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRepository")
            .field("collection", &self.collection)
            .field("fetch_timeout", &self.fetch_timeout)
            .finish()
    }
}

/// Run `future` with a time limit, reporting expiry as an operation timeout
pub async fn with_timeout<T, F>(operation_name: &str, timeout: Duration, future: F) -> CallResult<T>
where
    F: Future<Output = CallResult<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => {
            error!(
                operation = operation_name,
                timeout_ms = timeout.as_millis() as u64,
                "Operation timed out"
            );
            Err(CallError::OperationTimeout {
                duration_ms: timeout.as_millis() as u64,
            })
        }
    }
}
