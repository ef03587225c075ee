//! Settings types.

use std::collections::BTreeMap;

use bss_core::ReconnectPolicy;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document (`~/.bss/settings.json`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BssSettings {
    /// Realtime event stream settings.
    pub realtime: RealtimeSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Settings for the realtime event stream connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeSettings {
    /// Absolute URL of the server-sent event stream.
    pub url: String,
    /// Whether credential headers are forwarded when opening the stream.
    pub with_credentials: bool,
    /// Headers attached when `with_credentials` is set (e.g. `Authorization`).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub credential_headers: BTreeMap<String, String>,
    /// Whether transport failures schedule a reconnect.
    pub auto_reconnect: bool,
    /// Timeout for receiving the stream's response headers, in ms.
    pub connect_timeout_ms: u64,
    /// Reconnect backoff parameters.
    pub reconnect: ReconnectPolicy,
    /// Window for suppressing repeated envelopes in the domain router, in ms.
    /// `0` disables duplicate suppression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedup_ttl_ms: Option<u64>,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080/api/v1/events/stream".to_string(),
            with_credentials: true,
            credential_headers: BTreeMap::new(),
            auto_reconnect: true,
            connect_timeout_ms: 10_000,
            reconnect: ReconnectPolicy::default(),
            dedup_ttl_ms: Some(3_600_000),
        }
    }
}

impl RealtimeSettings {
    /// Check the cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(SettingsError::InvalidValue("realtime.url must not be empty".into()));
        }
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(SettingsError::InvalidValue(format!(
                "realtime.url must be an http(s) URL, got {}",
                self.url
            )));
        }
        let policy = &self.reconnect;
        if policy.base_delay_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "realtime.reconnect.baseDelayMs must be positive".into(),
            ));
        }
        if policy.max_delay_ms < policy.base_delay_ms {
            return Err(SettingsError::InvalidValue(format!(
                "realtime.reconnect.maxDelayMs ({}) is below baseDelayMs ({})",
                policy.max_delay_ms, policy.base_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&policy.jitter_factor) {
            return Err(SettingsError::InvalidValue(format!(
                "realtime.reconnect.jitterFactor must be within 0.0..=1.0, got {}",
                policy.jitter_factor
            )));
        }
        Ok(())
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LoggingSettings {
    /// Install the global tracing subscriber these settings describe.
    ///
    /// No-op if a global subscriber is already set.
    pub fn init(&self) {
        if self.json {
            bss_core::logging::init_json_subscriber(&self.level);
        } else {
            bss_core::logging::init_subscriber(&self.level);
        }
    }
}
