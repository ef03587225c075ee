//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`BssSettings::default()`]
//! 2. If `~/.bss/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate the realtime section
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::BssSettings;

/// Resolve the path to the settings file (`~/.bss/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".bss").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<BssSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults (plus overrides). If the file
/// contains invalid JSON, or the result fails validation, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<BssSettings> {
    load_with_lookup(path, |name| std::env::var(name).ok())
}

fn load_with_lookup(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<BssSettings> {
    let defaults = serde_json::to_value(BssSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: BssSettings = serde_json::from_value(merged)?;
    apply_overrides_from(&mut settings, lookup);
    settings.realtime.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `BSS_*` environment variable overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut BssSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are ignored with a warning and fall back to the file/default value.
fn apply_overrides_from(settings: &mut BssSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };
    let realtime = &mut settings.realtime;

    if let Some(v) = env.string("BSS_EVENTS_URL") {
        realtime.url = v;
    }
    if let Some(v) = env.bool("BSS_EVENTS_WITH_CREDENTIALS") {
        realtime.with_credentials = v;
    }
    if let Some(v) = env.string("BSS_EVENTS_AUTH_HEADER") {
        let _ = realtime.credential_headers.insert("Authorization".to_string(), v);
    }
    if let Some(v) = env.bool("BSS_EVENTS_AUTO_RECONNECT") {
        realtime.auto_reconnect = v;
    }
    if let Some(v) = env.u64("BSS_EVENTS_BASE_DELAY_MS", 1, 600_000) {
        realtime.reconnect.base_delay_ms = v;
    }
    if let Some(v) = env.u64("BSS_EVENTS_MAX_DELAY_MS", 1, 3_600_000) {
        realtime.reconnect.max_delay_ms = v;
    }
    if let Some(v) = env.u64("BSS_EVENTS_MAX_ATTEMPTS", 0, 1_000) {
        realtime.reconnect.max_attempts = u32::try_from(v).unwrap_or(u32::MAX);
    }
    if let Some(v) = env.u64("BSS_EVENTS_CONNECT_TIMEOUT_MS", 100, 600_000) {
        realtime.connect_timeout_ms = v;
    }
    if let Some(v) = env.ttl_ms("BSS_EVENTS_DEDUP_TTL_MS", 86_400_000) {
        realtime.dedup_ttl_ms = Some(v);
    }
    if let Some(v) = env.string("BSS_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("BSS_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, min, max, "invalid integer env var, ignoring");
        }
        result
    }

    /// Millisecond window where `off`/`false`/`no` mean `0` (disabled).
    fn ttl_ms(&self, name: &str, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        if parse_bool(&val) == Some(false) {
            return Some(0);
        }
        let result = parse_u64_range(&val, 0, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, max, "invalid duration env var, ignoring");
        }
        result
    }
}
