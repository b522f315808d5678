//! Client-side settings mirror and shortcut recorder for the dictation app.
//!
//! [`SettingsStore`] keeps a local copy of the backend settings document and
//! writes changes through optimistically, rolling a key back if the backend
//! refuses it. [`ShortcutRecorder`] captures a new key chord for a shortcut
//! while its global hotkey is suspended. Both talk to the native side only
//! through a [`CommandBackend`].

pub mod commands;
pub mod config;
pub mod dispatch;
pub mod keyboard;
pub mod logging;
pub mod managers;
pub mod settings;

#[cfg(test)]
mod test_support;

pub use commands::{CommandBackend, Commands};
pub use config::SyncConfig;
pub use keyboard::{KeyEvent, OsType};
pub use logging::init_logging;
pub use managers::settings_store::{PostProcessField, SettingsStore, StoreEvent, UpdateOutcome};
pub use managers::shortcut_recorder::{CaptureHooks, Rect, RecorderOutcome, ShortcutRecorder};
pub use settings::{AppSettings, SettingKey};
