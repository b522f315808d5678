//! Which backend command persists each setting.

use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;

use crate::settings::{SettingKey, DEFAULT_DEVICE_ID, DEFAULT_DEVICE_NAME};

/// One row of the dispatch table: the command to run, the name of its single
/// parameter, and how the stored value is turned into that parameter.
#[derive(Debug, Clone, Copy)]
pub struct SettingUpdater {
    pub command: &'static str,
    pub param: &'static str,
    transform: fn(Value) -> Value,
}

impl SettingUpdater {
    pub fn argument(&self, value: Value) -> Value {
        (self.transform)(value)
    }
}

fn identity(value: Value) -> Value {
    value
}

// The UI shows "Default"; the backend wants "default".
fn device_or_default(value: Value) -> Value {
    match value {
        Value::Null => Value::String(DEFAULT_DEVICE_ID.to_string()),
        Value::String(name) if name == DEFAULT_DEVICE_NAME => {
            Value::String(DEFAULT_DEVICE_ID.to_string())
        }
        other => other,
    }
}

// Unlike the other device slots, an unset clamshell microphone stays unset.
fn clamshell_device(value: Value) -> Value {
    match value {
        Value::String(name) if name == DEFAULT_DEVICE_NAME => {
            Value::String(DEFAULT_DEVICE_ID.to_string())
        }
        other => other,
    }
}

#[rustfmt::skip]
pub static SETTING_UPDATERS: Lazy<HashMap<SettingKey, SettingUpdater>> = Lazy::new(|| {
    let rows: [(SettingKey, &'static str, &'static str, fn(Value) -> Value); 25] = [
        (SettingKey::AlwaysOnMicrophone, "update_microphone_mode", "always_on", identity),
        (SettingKey::AudioFeedback, "change_audio_feedback_setting", "enabled", identity),
        (SettingKey::AudioFeedbackVolume, "change_audio_feedback_volume_setting", "volume", identity),
        (SettingKey::SoundTheme, "change_sound_theme_setting", "theme", identity),
        (SettingKey::StartHidden, "change_start_hidden_setting", "enabled", identity),
        (SettingKey::AutostartEnabled, "change_autostart_setting", "enabled", identity),
        (SettingKey::UpdateChecksEnabled, "change_update_checks_setting", "enabled", identity),
        (SettingKey::PushToTalk, "change_ptt_setting", "enabled", identity),
        (SettingKey::SelectedMicrophone, "set_selected_microphone", "device_name", device_or_default),
        (SettingKey::ClamshellMicrophone, "set_clamshell_microphone", "device_name", clamshell_device),
        (SettingKey::SelectedOutputDevice, "set_selected_output_device", "device_name", device_or_default),
        (SettingKey::RecordingRetentionPeriod, "update_recording_retention_period", "period", identity),
        (SettingKey::TranslateToEnglish, "change_translate_to_english_setting", "enabled", identity),
        (SettingKey::SelectedLanguage, "change_selected_language_setting", "language", identity),
        (SettingKey::OverlayPosition, "change_overlay_position_setting", "position", identity),
        (SettingKey::DebugMode, "change_debug_mode_setting", "enabled", identity),
        (SettingKey::CustomWords, "update_custom_words", "words", identity),
        (SettingKey::WordCorrectionThreshold, "change_word_correction_threshold_setting", "threshold", identity),
        (SettingKey::PasteMethod, "change_paste_method_setting", "method", identity),
        (SettingKey::ClipboardHandling, "change_clipboard_handling_setting", "handling", identity),
        (SettingKey::HistoryLimit, "update_history_limit", "limit", identity),
        (SettingKey::PostProcessEnabled, "change_post_process_enabled_setting", "enabled", identity),
        (SettingKey::PostProcessSelectedPromptId, "set_post_process_selected_prompt", "id", identity),
        (SettingKey::MuteWhileRecording, "change_mute_while_recording_setting", "enabled", identity),
        (SettingKey::LogLevel, "set_log_level", "level", identity),
    ];

    rows.into_iter()
        .map(|(key, command, param, transform)| {
            (
                key,
                SettingUpdater {
                    command,
                    param,
                    transform,
                },
            )
        })
        .collect()
});

pub fn updater_for(key: SettingKey) -> Option<&'static SettingUpdater> {
    SETTING_UPDATERS.get(&key)
}

/// Keys that are only ever changed locally through the generic path; the
/// backend is updated for them by dedicated commands.
pub fn is_local_only(key: SettingKey) -> bool {
    matches!(key, SettingKey::Bindings | SettingKey::SelectedModel)
}
