//! Call session configuration
//!
//! Defaults match a 15 second wait with one second ticks. Hosts override
//! them through the `with_*` setters, a settings file, or `RANDCALL_*`
//! environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::call::Uid;
use crate::error::{CallError, CallResult};
use crate::render::RenderMode;

/// How long a lone caller waits for a peer
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(15000);

/// Countdown tick granularity
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1000);

/// Document collection holding active call tokens
pub const DEFAULT_TOKEN_COLLECTION: &str = "tokens";

const ENV_PREFIX: &str = "RANDCALL_";

/// Configuration for a call session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// RTC engine application id
    pub app_id: String,
    /// Document collection to read the active token from
    pub token_collection: String,
    /// Uid to join with; 0 lets the engine assign one
    pub local_uid: Uid,
    /// Opaque info string passed along with the join request
    pub join_info: String,
    /// Wait countdown length in milliseconds
    pub wait_timeout_ms: u64,
    /// Countdown tick interval in milliseconds
    pub tick_interval_ms: u64,
    /// Optional limit on the token fetch; unlimited when absent
    pub token_fetch_timeout_ms: Option<u64>,
    /// Capacity of the engine callback queue
    pub event_queue_capacity: usize,
    pub local_render_mode: RenderMode,
    pub remote_render_mode: RenderMode,
}

impl CallConfig {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            ..Default::default()
        }
    }

    pub fn with_token_collection(mut self, collection: impl Into<String>) -> Self {
        self.token_collection = collection.into();
        self
    }

    pub fn with_local_uid(mut self, uid: Uid) -> Self {
        self.local_uid = uid;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_token_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.token_fetch_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    pub fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity;
        self
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn token_fetch_timeout(&self) -> Option<Duration> {
        self.token_fetch_timeout_ms.map(Duration::from_millis)
    }

    /// Check the values the session relies on
    ///
    /// The app id is left to the engine factory to judge.
    pub fn validate(&self) -> CallResult<()> {
        if self.wait_timeout_ms == 0 {
            return Err(CallError::invalid_configuration("wait_timeout_ms", "must be greater than zero"));
        }
        if self.tick_interval_ms == 0 {
            return Err(CallError::invalid_configuration("tick_interval_ms", "must be greater than zero"));
        }
        if self.tick_interval_ms > self.wait_timeout_ms {
            return Err(CallError::invalid_configuration(
                "tick_interval_ms",
                "must not exceed wait_timeout_ms",
            ));
        }
        if self.token_collection.trim().is_empty() {
            return Err(CallError::invalid_configuration("token_collection", "must not be empty"));
        }
        if self.event_queue_capacity == 0 {
            return Err(CallError::invalid_configuration(
                "event_queue_capacity",
                "must be greater than zero",
            ));
        }
        if self.token_fetch_timeout_ms == Some(0) {
            return Err(CallError::invalid_configuration(
                "token_fetch_timeout_ms",
                "must be greater than zero when set",
            ));
        }
        Ok(())
    }

    /// Load configuration from `RANDCALL_*` environment variables
    pub fn from_env() -> CallResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from a key lookup, starting from defaults
    ///
    /// Keys are the upper-case field names prefixed with `RANDCALL_`.
    pub fn from_lookup<F>(lookup: F) -> CallResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |field: &str| lookup(&format!("{}{}", ENV_PREFIX, field.to_uppercase()));
        let mut config = Self::default();

        if let Some(app_id) = get("app_id") {
            config.app_id = app_id;
        }
        if let Some(collection) = get("token_collection") {
            config.token_collection = collection;
        }
        if let Some(info) = get("join_info") {
            config.join_info = info;
        }
        if let Some(uid) = get("local_uid") {
            config.local_uid = parse_field("local_uid", &uid)?;
        }
        if let Some(ms) = get("wait_timeout_ms") {
            config.wait_timeout_ms = parse_field("wait_timeout_ms", &ms)?;
        }
        if let Some(ms) = get("tick_interval_ms") {
            config.tick_interval_ms = parse_field("tick_interval_ms", &ms)?;
        }
        if let Some(ms) = get("token_fetch_timeout_ms") {
            config.token_fetch_timeout_ms = Some(parse_field("token_fetch_timeout_ms", &ms)?);
        }
        if let Some(capacity) = get("event_queue_capacity") {
            config.event_queue_capacity = parse_field("event_queue_capacity", &capacity)?;
        }

        Ok(config)
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, value: &str) -> CallResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CallError::invalid_configuration(field, format!("cannot parse '{}'", value)))
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            token_collection: DEFAULT_TOKEN_COLLECTION.to_string(),
            local_uid: 0,
            join_info: "info".to_string(),
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT.as_millis() as u64,
            tick_interval_ms: DEFAULT_TICK_INTERVAL.as_millis() as u64,
            token_fetch_timeout_ms: None,
            event_queue_capacity: 64,
            local_render_mode: RenderMode::Fit,
            remote_render_mode: RenderMode::Fit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = CallConfig::default();
        assert_eq!(config.wait_timeout(), Duration::from_millis(15000));
        assert_eq!(config.tick_interval(), Duration::from_millis(1000));
        assert_eq!(config.token_collection, "tokens");
        assert_eq!(config.token_fetch_timeout(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_timings() {
        let zero_wait = CallConfig::new("app").with_wait_timeout(Duration::ZERO);
        assert!(matches!(
            zero_wait.validate(),
            Err(CallError::InvalidConfiguration { field, .. }) if field == "wait_timeout_ms"
        ));

        let slow_tick = CallConfig::new("app")
            .with_wait_timeout(Duration::from_millis(500))
            .with_tick_interval(Duration::from_millis(1000));
        assert!(slow_tick.validate().is_err());

        let zero_fetch = CallConfig::new("app").with_token_fetch_timeout(Some(Duration::ZERO));
        assert!(zero_fetch.validate().is_err());

        let no_queue = CallConfig::new("app").with_event_queue_capacity(0);
        assert!(no_queue.validate().is_err());
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("RANDCALL_APP_ID", "abc123"),
            ("RANDCALL_WAIT_TIMEOUT_MS", "5000"),
            ("RANDCALL_TOKEN_FETCH_TIMEOUT_MS", "2000"),
            ("RANDCALL_TOKEN_COLLECTION", "active_tokens"),
        ]
        .into_iter()
        .collect();

        let config = CallConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();

        assert_eq!(config.app_id, "abc123");
        assert_eq!(config.wait_timeout_ms, 5000);
        assert_eq!(config.token_fetch_timeout(), Some(Duration::from_millis(2000)));
        assert_eq!(config.token_collection, "active_tokens");
        assert_eq!(config.tick_interval_ms, 1000);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result = CallConfig::from_lookup(|key| {
            (key == "RANDCALL_LOCAL_UID").then(|| "not-a-number".to_string())
        });
        assert!(matches!(result, Err(CallError::InvalidConfiguration { .. })));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: CallConfig = serde_json::from_str(r#"{"app_id": "xyz", "remote_render_mode": "hidden"}"#).unwrap();
        assert_eq!(config.app_id, "xyz");
        assert_eq!(config.remote_render_mode, RenderMode::Hidden);
        assert_eq!(config.wait_timeout_ms, 15000);
    }
}
