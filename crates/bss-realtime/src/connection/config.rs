//! Connection configuration.

use std::collections::BTreeMap;

use bss_core::ReconnectPolicy;
use bss_settings::RealtimeSettings;

/// What the connection manager connects to and how it recovers.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionConfig {
    /// Event stream URL.
    pub url: String,
    /// Whether `credential_headers` are attached when opening.
    pub with_credentials: bool,
    /// Credential headers forwarded in credentials mode.
    pub credential_headers: BTreeMap<String, String>,
    /// Whether a transport failure schedules a reconnect.
    pub auto_reconnect: bool,
    /// Backoff parameters.
    pub policy: ReconnectPolicy,
}

impl ConnectionConfig {
    /// Defaults for `url`: credentials on, auto-reconnect on, default backoff.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            with_credentials: true,
            credential_headers: BTreeMap::new(),
            auto_reconnect: true,
            policy: ReconnectPolicy::default(),
        }
    }

    /// Build from loaded settings.
    pub fn from_settings(settings: &RealtimeSettings) -> Self {
        Self {
            url: settings.url.clone(),
            with_credentials: settings.with_credentials,
            credential_headers: settings.credential_headers.clone(),
            auto_reconnect: settings.auto_reconnect,
            policy: settings.reconnect.clone(),
        }
    }

    /// Replace the backoff policy.
    #[must_use]
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Enable or disable automatic reconnection.
    #[must_use]
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Add a credential header and turn credentials mode on.
    #[must_use]
    pub fn with_credential_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.credential_headers.insert(name.into(), value.into());
        self.with_credentials = true;
        self
    }
}
