//! # bss-settings
//!
//! Configuration management with layered sources for the BSS realtime event layer.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`BssSettings::default()`]
//! 2. **User file**: `~/.bss/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `BSS_*` overrides (highest priority)
//!
//! There is no global instance: callers load settings once and hand the
//! [`RealtimeSettings`] to whichever component composes the event client,
//! and call [`LoggingSettings::init`] once at startup.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
};
pub use types::{BssSettings, LoggingSettings, RealtimeSettings};
