use anyhow::{anyhow, Context, Result};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Display name of the synthetic device entry that stands for "use the system default".
pub const DEFAULT_DEVICE_NAME: &str = "Default";
/// Device id the backend expects when the system default device is selected.
pub const DEFAULT_DEVICE_ID: &str = "default";

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

// Custom deserializer to handle both old numeric format (1-5) and new string format ("trace", "debug", etc.)
impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct LogLevelVisitor;

        impl<'de> Visitor<'de> for LogLevelVisitor {
            type Value = LogLevel;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string or integer representing log level")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<LogLevel, E> {
                match value.to_lowercase().as_str() {
                    "trace" => Ok(LogLevel::Trace),
                    "debug" => Ok(LogLevel::Debug),
                    "info" => Ok(LogLevel::Info),
                    "warn" => Ok(LogLevel::Warn),
                    "error" => Ok(LogLevel::Error),
                    _ => Err(E::unknown_variant(
                        value,
                        &["trace", "debug", "info", "warn", "error"],
                    )),
                }
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<LogLevel, E> {
                match value {
                    1 => Ok(LogLevel::Trace),
                    2 => Ok(LogLevel::Debug),
                    3 => Ok(LogLevel::Info),
                    4 => Ok(LogLevel::Warn),
                    5 => Ok(LogLevel::Error),
                    _ => Err(E::invalid_value(de::Unexpected::Unsigned(value), &"1-5")),
                }
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<LogLevel, E> {
                match u64::try_from(value) {
                    Ok(v) => self.visit_u64(v),
                    Err(_) => Err(E::invalid_value(de::Unexpected::Signed(value), &"1-5")),
                }
            }
        }

        deserializer.deserialize_any(LogLevelVisitor)
    }
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ShortcutBinding {
    pub id: String,
    pub name: String,
    pub description: String,
    pub default_binding: String,
    pub current_binding: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LLMPrompt {
    pub id: String,
    pub name: String,
    pub prompt: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PostProcessProvider {
    pub id: String,
    pub label: String,
    pub base_url: String,
    #[serde(default)]
    pub allow_base_url_edit: bool,
    #[serde(default)]
    pub models_endpoint: Option<String>,
}

/// An input or output device as reported by the backend.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    pub index: String,
    pub name: String,
    pub is_default: bool,
}

impl AudioDevice {
    /// The synthetic entry that is always listed first.
    pub fn system_default() -> Self {
        Self {
            index: DEFAULT_DEVICE_ID.to_string(),
            name: DEFAULT_DEVICE_NAME.to_string(),
            is_default: true,
        }
    }

    fn is_default_alias(&self) -> bool {
        self.name == DEFAULT_DEVICE_NAME || self.name == DEFAULT_DEVICE_ID
    }
}

/// Prepend the synthetic default entry and drop backend entries that duplicate it by name.
pub fn with_default_device(devices: Vec<AudioDevice>) -> Vec<AudioDevice> {
    std::iter::once(AudioDevice::system_default())
        .chain(devices.into_iter().filter(|d| !d.is_default_alias()))
        .collect()
}

/// Which custom feedback sounds exist on disk.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CustomSounds {
    pub start: bool,
    pub stop: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SoundType {
    Start,
    Stop,
}

impl SoundType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SoundType::Start => "start",
            SoundType::Stop => "stop",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverlayPosition {
    None,
    Top,
    Bottom,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelUnloadTimeout {
    #[default]
    Never,
    Immediately,
    Min2,
    Min5,
    Min10,
    Min15,
    Hour1,
    Sec5, // Debug mode only
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PasteMethod {
    CtrlV,
    Direct,
    None,
    ShiftInsert,
}

impl Default for PasteMethod {
    fn default() -> Self {
        // Default to CtrlV for macOS and Windows, Direct for Linux
        #[cfg(target_os = "linux")]
        return PasteMethod::Direct;
        #[cfg(not(target_os = "linux"))]
        return PasteMethod::CtrlV;
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClipboardHandling {
    #[default]
    DontModify,
    CopyToClipboard,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordingRetentionPeriod {
    Never,
    PreserveLimit,
    Days3,
    Weeks2,
    Months3,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SoundTheme {
    Marimba,
    Pop,
    Custom,
}

/// The settings document mirrored from the backend.
///
/// Every field carries a serde default so that a document written by an older
/// backend still loads; unknown keys are ignored.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppSettings {
    #[serde(default)]
    pub bindings: HashMap<String, ShortcutBinding>,
    #[serde(default = "default_push_to_talk")]
    pub push_to_talk: bool,
    #[serde(default)]
    pub audio_feedback: bool,
    #[serde(default = "default_audio_feedback_volume")]
    pub audio_feedback_volume: f32,
    #[serde(default = "default_sound_theme")]
    pub sound_theme: SoundTheme,
    #[serde(default)]
    pub start_hidden: bool,
    #[serde(default)]
    pub autostart_enabled: bool,
    #[serde(default = "default_update_checks_enabled")]
    pub update_checks_enabled: bool,
    #[serde(default)]
    pub selected_model: String,
    #[serde(default)]
    pub always_on_microphone: bool,
    #[serde(default)]
    pub selected_microphone: Option<String>,
    #[serde(default)]
    pub clamshell_microphone: Option<String>,
    #[serde(default)]
    pub selected_output_device: Option<String>,
    #[serde(default)]
    pub translate_to_english: bool,
    #[serde(default = "default_selected_language")]
    pub selected_language: String,
    #[serde(default = "default_overlay_position")]
    pub overlay_position: OverlayPosition,
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
    #[serde(default)]
    pub custom_words: Vec<String>,
    #[serde(default)]
    pub model_unload_timeout: ModelUnloadTimeout,
    #[serde(default = "default_word_correction_threshold")]
    pub word_correction_threshold: f64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_recording_retention_period")]
    pub recording_retention_period: RecordingRetentionPeriod,
    #[serde(default)]
    pub paste_method: PasteMethod,
    #[serde(default)]
    pub clipboard_handling: ClipboardHandling,
    #[serde(default)]
    pub post_process_enabled: bool,
    #[serde(default = "default_post_process_provider_id")]
    pub post_process_provider_id: String,
    #[serde(default = "default_post_process_providers")]
    pub post_process_providers: Vec<PostProcessProvider>,
    #[serde(default = "default_post_process_api_keys")]
    pub post_process_api_keys: HashMap<String, String>,
    #[serde(default = "default_post_process_models")]
    pub post_process_models: HashMap<String, String>,
    #[serde(default = "default_post_process_prompts")]
    pub post_process_prompts: Vec<LLMPrompt>,
    #[serde(default)]
    pub post_process_selected_prompt_id: Option<String>,
    #[serde(default)]
    pub mute_while_recording: bool,
}

fn default_push_to_talk() -> bool {
    true
}

fn default_audio_feedback_volume() -> f32 {
    1.0
}

fn default_sound_theme() -> SoundTheme {
    SoundTheme::Marimba
}

fn default_update_checks_enabled() -> bool {
    true
}

fn default_selected_language() -> String {
    "auto".to_string()
}

fn default_overlay_position() -> OverlayPosition {
    #[cfg(target_os = "linux")]
    return OverlayPosition::None;
    #[cfg(not(target_os = "linux"))]
    return OverlayPosition::Bottom;
}

fn default_log_level() -> LogLevel {
    LogLevel::Debug
}

fn default_word_correction_threshold() -> f64 {
    0.18
}

fn default_history_limit() -> usize {
    5
}

fn default_recording_retention_period() -> RecordingRetentionPeriod {
    RecordingRetentionPeriod::PreserveLimit
}

fn default_post_process_provider_id() -> String {
    "openai".to_string()
}

fn default_post_process_providers() -> Vec<PostProcessProvider> {
    let provider = |id: &str, label: &str, base_url: &str, allow_base_url_edit: bool| {
        PostProcessProvider {
            id: id.to_string(),
            label: label.to_string(),
            base_url: base_url.to_string(),
            allow_base_url_edit,
            models_endpoint: Some("/models".to_string()),
        }
    };

    vec![
        provider("openai", "OpenAI", "https://api.openai.com/v1", false),
        provider("openrouter", "OpenRouter", "https://openrouter.ai/api/v1", false),
        provider("anthropic", "Anthropic", "https://api.anthropic.com/v1", false),
        provider("custom", "Custom", "http://localhost:11434/v1", true),
    ]
}

fn empty_per_provider_map() -> HashMap<String, String> {
    default_post_process_providers()
        .into_iter()
        .map(|p| (p.id, String::new()))
        .collect()
}

fn default_post_process_api_keys() -> HashMap<String, String> {
    empty_per_provider_map()
}

fn default_post_process_models() -> HashMap<String, String> {
    empty_per_provider_map()
}

fn default_post_process_prompts() -> Vec<LLMPrompt> {
    vec![LLMPrompt {
        id: "default_improve_transcriptions".to_string(),
        name: "Improve Transcriptions".to_string(),
        prompt: "Clean this transcript:\n1. Fix spelling, capitalization, and punctuation errors\n2. Convert number words to digits (twenty-five → 25, ten percent → 10%, five dollars → $5)\n3. Replace spoken punctuation with symbols (period → ., comma → ,, question mark → ?)\n4. Remove filler words (um, uh, like as filler)\n5. Keep the language in the original version (if it was french, keep it in french for example)\n\nPreserve exact meaning and word order. Do not paraphrase or reorder content.\n\nReturn only the cleaned transcript.\n\nTranscript:\n${output}".to_string(),
    }]
}

/// Local copy of the backend defaults, used when the backend has not supplied its own.
pub fn get_default_settings() -> AppSettings {
    #[cfg(target_os = "macos")]
    let default_shortcut = "option+space";
    #[cfg(any(target_os = "windows", target_os = "linux"))]
    let default_shortcut = "ctrl+space";
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    let default_shortcut = "alt+space";

    let mut bindings = HashMap::new();
    bindings.insert(
        "transcribe".to_string(),
        ShortcutBinding {
            id: "transcribe".to_string(),
            name: "Transcribe".to_string(),
            description: "Converts your speech into text.".to_string(),
            default_binding: default_shortcut.to_string(),
            current_binding: default_shortcut.to_string(),
        },
    );

    AppSettings {
        bindings,
        push_to_talk: default_push_to_talk(),
        audio_feedback: false,
        audio_feedback_volume: default_audio_feedback_volume(),
        sound_theme: default_sound_theme(),
        start_hidden: false,
        autostart_enabled: false,
        update_checks_enabled: default_update_checks_enabled(),
        selected_model: String::new(),
        always_on_microphone: false,
        selected_microphone: None,
        clamshell_microphone: None,
        selected_output_device: None,
        translate_to_english: false,
        selected_language: default_selected_language(),
        overlay_position: default_overlay_position(),
        debug_mode: false,
        log_level: default_log_level(),
        custom_words: Vec::new(),
        model_unload_timeout: ModelUnloadTimeout::default(),
        word_correction_threshold: default_word_correction_threshold(),
        history_limit: default_history_limit(),
        recording_retention_period: default_recording_retention_period(),
        paste_method: PasteMethod::default(),
        clipboard_handling: ClipboardHandling::default(),
        post_process_enabled: false,
        post_process_provider_id: default_post_process_provider_id(),
        post_process_providers: default_post_process_providers(),
        post_process_api_keys: default_post_process_api_keys(),
        post_process_models: default_post_process_models(),
        post_process_prompts: default_post_process_prompts(),
        post_process_selected_prompt_id: None,
        mute_while_recording: false,
    }
}

impl AppSettings {
    /// Parse a raw document, filling missing keys with their defaults and
    /// normalizing the device selections the UI always expects to be set.
    pub fn from_document(document: Map<String, Value>) -> Result<Self> {
        let mut settings: AppSettings = serde_json::from_value(Value::Object(document))
            .context("settings document does not match the schema")?;
        settings.normalize_devices();
        Ok(settings)
    }

    pub fn to_document(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(anyhow!("settings serialized to a non-object: {}", other)),
        }
    }

    pub fn normalize_devices(&mut self) {
        for slot in [
            &mut self.selected_microphone,
            &mut self.clamshell_microphone,
            &mut self.selected_output_device,
        ] {
            if slot.is_none() {
                *slot = Some(DEFAULT_DEVICE_NAME.to_string());
            }
        }
    }

    pub fn binding(&self, id: &str) -> Option<&ShortcutBinding> {
        self.bindings.get(id)
    }

    pub fn active_post_process_provider(&self) -> Option<&PostProcessProvider> {
        self.post_process_provider(&self.post_process_provider_id)
    }

    pub fn post_process_provider(&self, provider_id: &str) -> Option<&PostProcessProvider> {
        self.post_process_providers
            .iter()
            .find(|provider| provider.id == provider_id)
    }
}

/// The closed set of keys in the settings document.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SettingKey {
    Bindings,
    PushToTalk,
    AudioFeedback,
    AudioFeedbackVolume,
    SoundTheme,
    StartHidden,
    AutostartEnabled,
    UpdateChecksEnabled,
    SelectedModel,
    AlwaysOnMicrophone,
    SelectedMicrophone,
    ClamshellMicrophone,
    SelectedOutputDevice,
    TranslateToEnglish,
    SelectedLanguage,
    OverlayPosition,
    DebugMode,
    LogLevel,
    CustomWords,
    ModelUnloadTimeout,
    WordCorrectionThreshold,
    HistoryLimit,
    RecordingRetentionPeriod,
    PasteMethod,
    ClipboardHandling,
    PostProcessEnabled,
    PostProcessProviderId,
    PostProcessProviders,
    PostProcessApiKeys,
    PostProcessModels,
    PostProcessPrompts,
    PostProcessSelectedPromptId,
    MuteWhileRecording,
}

impl SettingKey {
    pub const ALL: [SettingKey; 33] = [
        SettingKey::Bindings,
        SettingKey::PushToTalk,
        SettingKey::AudioFeedback,
        SettingKey::AudioFeedbackVolume,
        SettingKey::SoundTheme,
        SettingKey::StartHidden,
        SettingKey::AutostartEnabled,
        SettingKey::UpdateChecksEnabled,
        SettingKey::SelectedModel,
        SettingKey::AlwaysOnMicrophone,
        SettingKey::SelectedMicrophone,
        SettingKey::ClamshellMicrophone,
        SettingKey::SelectedOutputDevice,
        SettingKey::TranslateToEnglish,
        SettingKey::SelectedLanguage,
        SettingKey::OverlayPosition,
        SettingKey::DebugMode,
        SettingKey::LogLevel,
        SettingKey::CustomWords,
        SettingKey::ModelUnloadTimeout,
        SettingKey::WordCorrectionThreshold,
        SettingKey::HistoryLimit,
        SettingKey::RecordingRetentionPeriod,
        SettingKey::PasteMethod,
        SettingKey::ClipboardHandling,
        SettingKey::PostProcessEnabled,
        SettingKey::PostProcessProviderId,
        SettingKey::PostProcessProviders,
        SettingKey::PostProcessApiKeys,
        SettingKey::PostProcessModels,
        SettingKey::PostProcessPrompts,
        SettingKey::PostProcessSelectedPromptId,
        SettingKey::MuteWhileRecording,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::Bindings => "bindings",
            SettingKey::PushToTalk => "push_to_talk",
            SettingKey::AudioFeedback => "audio_feedback",
            SettingKey::AudioFeedbackVolume => "audio_feedback_volume",
            SettingKey::SoundTheme => "sound_theme",
            SettingKey::StartHidden => "start_hidden",
            SettingKey::AutostartEnabled => "autostart_enabled",
            SettingKey::UpdateChecksEnabled => "update_checks_enabled",
            SettingKey::SelectedModel => "selected_model",
            SettingKey::AlwaysOnMicrophone => "always_on_microphone",
            SettingKey::SelectedMicrophone => "selected_microphone",
            SettingKey::ClamshellMicrophone => "clamshell_microphone",
            SettingKey::SelectedOutputDevice => "selected_output_device",
            SettingKey::TranslateToEnglish => "translate_to_english",
            SettingKey::SelectedLanguage => "selected_language",
            SettingKey::OverlayPosition => "overlay_position",
            SettingKey::DebugMode => "debug_mode",
            SettingKey::LogLevel => "log_level",
            SettingKey::CustomWords => "custom_words",
            SettingKey::ModelUnloadTimeout => "model_unload_timeout",
            SettingKey::WordCorrectionThreshold => "word_correction_threshold",
            SettingKey::HistoryLimit => "history_limit",
            SettingKey::RecordingRetentionPeriod => "recording_retention_period",
            SettingKey::PasteMethod => "paste_method",
            SettingKey::ClipboardHandling => "clipboard_handling",
            SettingKey::PostProcessEnabled => "post_process_enabled",
            SettingKey::PostProcessProviderId => "post_process_provider_id",
            SettingKey::PostProcessProviders => "post_process_providers",
            SettingKey::PostProcessApiKeys => "post_process_api_keys",
            SettingKey::PostProcessModels => "post_process_models",
            SettingKey::PostProcessPrompts => "post_process_prompts",
            SettingKey::PostProcessSelectedPromptId => "post_process_selected_prompt_id",
            SettingKey::MuteWhileRecording => "mute_while_recording",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        SettingKey::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| anyhow!("Unknown setting key: '{}'", s))
    }
}
