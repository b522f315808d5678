//! Client-side mirror of the backend settings document.
//!
//! The store owns the only in-process copy of the settings. Writes are
//! optimistic: the mirror changes first, the backend command runs second, and
//! the key is rolled back if the command fails. Failures are logged and
//! reported through [`UpdateOutcome`], never returned as errors.

use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

use crate::commands::{CommandBackend, Commands};
use crate::config::SyncConfig;
use crate::dispatch;
use crate::managers::update_tracker::{KeyedQueue, UpdateTracker};
use crate::settings::{
    get_default_settings, with_default_device, AppSettings, AudioDevice, CustomSounds,
    PostProcessProvider, SettingKey, ShortcutBinding, SoundType, DEFAULT_DEVICE_ID,
    DEFAULT_DEVICE_NAME,
};

/// Change notifications published by [`SettingsStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    SettingsLoaded,
    SettingChanged { key: SettingKey },
    BindingChanged { id: String },
    UpdatingChanged { key: String, updating: bool },
    AudioDevicesChanged,
    OutputDevicesChanged,
}

/// How a mutation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The backend accepted the change.
    Applied,
    /// The backend refused; the mirror was put back to its previous value.
    RolledBack { reason: String },
    /// The backend refused and nothing had been changed locally.
    Failed { reason: String },
    /// The value does not fit the setting; nothing was sent.
    Rejected { reason: String },
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied)
    }
}

/// Per-provider post-processing fields with their own backend command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostProcessField {
    BaseUrl,
    ApiKey,
    Model,
}

impl PostProcessField {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostProcessField::BaseUrl => "base_url",
            PostProcessField::ApiKey => "api_key",
            PostProcessField::Model => "model",
        }
    }
}

pub fn binding_update_key(id: &str) -> String {
    format!("binding_{}", id)
}

struct StoreState {
    settings: Option<Map<String, Value>>,
    default_settings: Option<AppSettings>,
    is_loading: bool,
    audio_devices: Vec<AudioDevice>,
    output_devices: Vec<AudioDevice>,
    custom_sounds: CustomSounds,
    post_process_model_options: HashMap<String, Vec<String>>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            settings: None,
            default_settings: None,
            is_loading: true,
            audio_devices: Vec::new(),
            output_devices: Vec::new(),
            custom_sounds: CustomSounds::default(),
            post_process_model_options: HashMap::new(),
        }
    }
}

pub struct SettingsStore {
    commands: Commands,
    config: SyncConfig,
    state: Mutex<StoreState>,
    updates: UpdateTracker,
    queue: KeyedQueue,
    events: broadcast::Sender<StoreEvent>,
}

impl SettingsStore {
    pub fn new(backend: Arc<dyn CommandBackend>, config: SyncConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            commands: Commands::new(backend, config.command_timeout()),
            updates: UpdateTracker::new(events.clone()),
            queue: KeyedQueue::new(config.serialize_same_key),
            state: Mutex::new(StoreState::default()),
            config,
            events,
        }
    }

    pub fn commands(&self) -> &Commands {
        &self.commands
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: StoreEvent) {
        let _ = self.events.send(event);
    }

    // ---------------------------------------------------------------------
    // Loading
    // ---------------------------------------------------------------------

    /// Load everything the settings screens need, concurrently.
    pub async fn initialize(&self) {
        info!("Initializing settings store");
        tokio::join!(
            self.load_default_settings(),
            self.load_settings(),
            self.refresh_audio_devices(),
            self.refresh_output_devices(),
            self.check_custom_sounds(),
        );
    }

    /// Fetch the settings document and the live microphone/output selections
    /// and merge them into the mirror.
    ///
    /// If the document cannot be read the mirror is left as it was (`None`
    /// before the first successful load); the loading flag is cleared either way.
    pub async fn load_settings(&self) {
        let (document, microphone_mode, microphone, output_device) = tokio::join!(
            self.commands.get_app_settings(),
            self.commands.get_microphone_mode(),
            self.commands.get_selected_microphone(),
            self.commands.get_selected_output_device(),
        );

        let merged = document.and_then(AppSettings::from_document).and_then(|mut settings| {
            match microphone_mode {
                Ok(always_on) => settings.always_on_microphone = always_on,
                Err(e) => warn!("Failed to query microphone mode: {:#}", e),
            }
            match microphone {
                Ok(name) => settings.selected_microphone = Some(display_device_name(name)),
                Err(e) => warn!("Failed to query selected microphone: {:#}", e),
            }
            match output_device {
                Ok(name) => settings.selected_output_device = Some(display_device_name(name)),
                Err(e) => warn!("Failed to query selected output device: {:#}", e),
            }
            settings.to_document()
        });

        match merged {
            Ok(document) => {
                {
                    let mut state = self.state();
                    state.settings = Some(document);
                    state.is_loading = false;
                }
                debug!("Settings loaded");
                self.emit(StoreEvent::SettingsLoaded);
            }
            Err(e) => {
                error!("Failed to load settings: {:#}", e);
                self.state().is_loading = false;
            }
        }
    }

    pub async fn refresh_settings(&self) {
        self.load_settings().await;
    }

    /// Fetch the backend's platform-specific defaults used by [`Self::reset_setting`].
    pub async fn load_default_settings(&self) {
        match self
            .commands
            .get_default_settings()
            .await
            .and_then(AppSettings::from_document)
        {
            Ok(defaults) => self.state().default_settings = Some(defaults),
            Err(e) => error!("Failed to load default settings: {:#}", e),
        }
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    pub fn is_loading(&self) -> bool {
        self.state().is_loading
    }

    pub fn is_updating(&self, update_key: &str) -> bool {
        self.updates.is_updating(update_key)
    }

    pub fn is_setting_updating(&self, key: SettingKey) -> bool {
        self.updates.is_updating(key.as_str())
    }

    /// Raw value of `key`; `None` before the first load.
    pub fn get_setting(&self, key: SettingKey) -> Option<Value> {
        self.state()
            .settings
            .as_ref()
            .and_then(|settings| settings.get(key.as_str()).cloned())
    }

    pub fn get<T: DeserializeOwned>(&self, key: SettingKey) -> Option<T> {
        let value = self.get_setting(key)?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                warn!("Setting '{}' has an unexpected shape: {}", key, e);
                None
            }
        }
    }

    /// Typed snapshot of the whole mirror.
    pub fn settings(&self) -> Option<AppSettings> {
        let document = self.state().settings.clone()?;
        match AppSettings::from_document(document) {
            Ok(settings) => Some(settings),
            Err(e) => {
                error!("Settings mirror no longer matches the schema: {:#}", e);
                None
            }
        }
    }

    /// Provider named by `post_process_provider_id`, if it is in the provider list.
    pub fn active_post_process_provider(&self) -> Option<PostProcessProvider> {
        self.settings()?.active_post_process_provider().cloned()
    }

    pub fn binding(&self, id: &str) -> Option<ShortcutBinding> {
        let state = self.state();
        let binding = state
            .settings
            .as_ref()?
            .get(SettingKey::Bindings.as_str())?
            .get(id)?
            .clone();
        drop(state);
        serde_json::from_value(binding).ok()
    }

    pub fn audio_devices(&self) -> Vec<AudioDevice> {
        self.state().audio_devices.clone()
    }

    pub fn output_devices(&self) -> Vec<AudioDevice> {
        self.state().output_devices.clone()
    }

    pub fn custom_sounds(&self) -> CustomSounds {
        self.state().custom_sounds
    }

    pub fn post_process_model_options(&self, provider_id: &str) -> Vec<String> {
        self.state()
            .post_process_model_options
            .get(provider_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_post_process_model_options(&self, provider_id: &str, models: Vec<String>) {
        self.state()
            .post_process_model_options
            .insert(provider_id.to_string(), models);
    }

    // ---------------------------------------------------------------------
    // Generic setting writes
    // ---------------------------------------------------------------------

    /// Optimistically set `key` and persist it through its mapped command.
    ///
    /// Order: mark updating, snapshot, apply locally, dispatch, roll back on
    /// failure, clear the mark. Keys without a mapped command only change
    /// locally.
    pub async fn update_setting<V: Serialize>(&self, key: SettingKey, value: V) -> UpdateOutcome {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => return self.reject(key, e.to_string()),
        };

        let _updating = self.updates.begin(key.as_str());
        let _turn = self.queue.enter(key.as_str()).await;

        if let Err(reason) = self.check_value(key, &value) {
            return self.reject(key, reason);
        }

        let original = self.apply_local(key, value.clone());

        let result = match dispatch::updater_for(key) {
            Some(updater) => {
                self.commands
                    .apply_setting(updater.command, updater.param, updater.argument(value))
                    .await
            }
            None => {
                if !dispatch::is_local_only(key) {
                    warn!("No handler for setting: {}", key);
                }
                Ok(())
            }
        };

        match result {
            Ok(()) => UpdateOutcome::Applied,
            Err(e) => {
                error!("Failed to update setting {}: {:#}", key, e);
                if let Some(original) = original {
                    self.restore_local(key, original);
                }
                UpdateOutcome::RolledBack {
                    reason: format!("{:#}", e),
                }
            }
        }
    }

    /// Put `key` back to its default. Returns `None` when the key has no
    /// registered default (bindings are reset one by one with [`Self::reset_binding`]).
    pub async fn reset_setting(&self, key: SettingKey) -> Option<UpdateOutcome> {
        let Some(default) = self.default_value(key) else {
            debug!("No default registered for {}, nothing to reset", key);
            return None;
        };
        Some(self.update_setting(key, default).await)
    }

    fn default_value(&self, key: SettingKey) -> Option<Value> {
        if key == SettingKey::Bindings {
            return None;
        }
        let defaults = self.state().default_settings.clone().unwrap_or_else(|| {
            let mut local = get_default_settings();
            local.normalize_devices();
            local
        });
        match defaults.to_document() {
            Ok(mut document) => document.remove(key.as_str()),
            Err(e) => {
                error!("Failed to serialize default settings: {:#}", e);
                None
            }
        }
    }

    fn reject(&self, key: SettingKey, reason: String) -> UpdateOutcome {
        warn!("Rejected value for setting {}: {}", key, reason);
        UpdateOutcome::Rejected { reason }
    }

    /// Make sure the document would still parse with `value` stored under `key`.
    fn check_value(&self, key: SettingKey, value: &Value) -> Result<(), String> {
        let mut candidate = match self.state().settings.clone() {
            Some(document) => document,
            None => get_default_settings()
                .to_document()
                .map_err(|e| e.to_string())?,
        };
        candidate.insert(key.as_str().to_string(), value.clone());
        AppSettings::from_document(candidate)
            .map(|_| ())
            .map_err(|e| format!("{:#}", e))
    }

    /// Store `value` under `key`. Returns the previous entry, or `None` when
    /// nothing is loaded (in which case nothing is stored).
    fn apply_local(&self, key: SettingKey, value: Value) -> Option<Option<Value>> {
        let previous = {
            let mut state = self.state();
            let settings = state.settings.as_mut()?;
            settings.insert(key.as_str().to_string(), value)
        };
        self.emit(StoreEvent::SettingChanged { key });
        Some(previous)
    }

    fn restore_local(&self, key: SettingKey, previous: Option<Value>) {
        {
            let mut state = self.state();
            let Some(settings) = state.settings.as_mut() else {
                return;
            };
            match previous {
                Some(value) => settings.insert(key.as_str().to_string(), value),
                None => settings.remove(key.as_str()),
            };
        }
        debug!("Rolled back setting {}", key);
        self.emit(StoreEvent::SettingChanged { key });
    }

    // ---------------------------------------------------------------------
    // Bindings
    // ---------------------------------------------------------------------

    /// Optimistically change a binding's chord and persist it with `change_binding`.
    pub async fn update_binding(&self, id: &str, chord: &str) -> UpdateOutcome {
        let update_key = binding_update_key(id);
        let _updating = self.updates.begin(&update_key);
        let _turn = self.queue.enter(&update_key).await;

        let original = self.set_current_binding(id, chord);

        match self.commands.change_binding(id, chord).await {
            Ok(confirmed) => {
                if let Some(binding) = confirmed {
                    self.replace_binding(binding);
                }
                UpdateOutcome::Applied
            }
            Err(e) => {
                error!("Failed to update binding {}: {:#}", id, e);
                match original {
                    Some(original) => {
                        self.set_current_binding(id, &original);
                        UpdateOutcome::RolledBack {
                            reason: format!("{:#}", e),
                        }
                    }
                    None => UpdateOutcome::Failed {
                        reason: format!("{:#}", e),
                    },
                }
            }
        }
    }

    /// Ask the backend to restore a binding's default, then reload the whole document.
    pub async fn reset_binding(&self, id: &str) -> UpdateOutcome {
        let update_key = binding_update_key(id);
        let _updating = self.updates.begin(&update_key);
        let _turn = self.queue.enter(&update_key).await;

        match self.commands.reset_binding(id).await {
            Ok(_) => {
                self.load_settings().await;
                UpdateOutcome::Applied
            }
            Err(e) => {
                error!("Failed to reset binding {}: {:#}", id, e);
                UpdateOutcome::Failed {
                    reason: format!("{:#}", e),
                }
            }
        }
    }

    /// Set `bindings[id].current_binding`, returning the previous chord if the binding exists.
    fn set_current_binding(&self, id: &str, chord: &str) -> Option<String> {
        let previous = {
            let mut state = self.state();
            let binding = state
                .settings
                .as_mut()?
                .get_mut(SettingKey::Bindings.as_str())?
                .as_object_mut()?
                .get_mut(id)?
                .as_object_mut()?;
            let previous = binding
                .get("current_binding")
                .and_then(Value::as_str)
                .map(str::to_string);
            binding.insert(
                "current_binding".to_string(),
                Value::String(chord.to_string()),
            );
            previous
        };
        self.emit(StoreEvent::BindingChanged { id: id.to_string() });
        previous
    }

    fn replace_binding(&self, binding: ShortcutBinding) {
        let id = binding.id.clone();
        let value = match serde_json::to_value(&binding) {
            Ok(value) => value,
            Err(e) => {
                warn!("Could not store confirmed binding {}: {}", id, e);
                return;
            }
        };
        {
            let mut state = self.state();
            let Some(bindings) = state
                .settings
                .as_mut()
                .and_then(|s| s.get_mut(SettingKey::Bindings.as_str()))
                .and_then(Value::as_object_mut)
            else {
                return;
            };
            bindings.insert(id.clone(), value);
        }
        self.emit(StoreEvent::BindingChanged { id });
    }

    // ---------------------------------------------------------------------
    // Devices and sounds
    // ---------------------------------------------------------------------

    pub async fn refresh_audio_devices(&self) {
        let devices = match self.commands.get_available_microphones().await {
            Ok(devices) => with_default_device(devices),
            Err(e) => {
                error!("Failed to load audio devices: {:#}", e);
                vec![AudioDevice::system_default()]
            }
        };
        self.state().audio_devices = devices;
        self.emit(StoreEvent::AudioDevicesChanged);
    }

    pub async fn refresh_output_devices(&self) {
        let devices = match self.commands.get_available_output_devices().await {
            Ok(devices) => with_default_device(devices),
            Err(e) => {
                error!("Failed to load output devices: {:#}", e);
                vec![AudioDevice::system_default()]
            }
        };
        self.state().output_devices = devices;
        self.emit(StoreEvent::OutputDevicesChanged);
    }

    pub async fn check_custom_sounds(&self) {
        match self.commands.check_custom_sounds().await {
            Ok(sounds) => self.state().custom_sounds = sounds,
            Err(e) => error!("Failed to check custom sounds: {:#}", e),
        }
    }

    pub async fn play_test_sound(&self, sound_type: SoundType) {
        if let Err(e) = self.commands.play_test_sound(sound_type).await {
            error!("Failed to play test sound ({}): {:#}", sound_type.as_str(), e);
        }
    }

    // ---------------------------------------------------------------------
    // Post-processing providers
    // ---------------------------------------------------------------------

    /// Switch the active provider: optimistic, then a full reload on success.
    pub async fn set_post_process_provider(&self, provider_id: &str) -> UpdateOutcome {
        let key = SettingKey::PostProcessProviderId;
        let _updating = self.updates.begin(key.as_str());
        let _turn = self.queue.enter(key.as_str()).await;

        let previous = self.apply_local(key, Value::String(provider_id.to_string()));

        match self.commands.set_post_process_provider(provider_id).await {
            Ok(()) => {
                self.load_settings().await;
                UpdateOutcome::Applied
            }
            Err(e) => {
                error!("Failed to set post-process provider: {:#}", e);
                match previous {
                    Some(previous) => {
                        self.restore_local(key, previous);
                        UpdateOutcome::RolledBack {
                            reason: format!("{:#}", e),
                        }
                    }
                    None => UpdateOutcome::Failed {
                        reason: format!("{:#}", e),
                    },
                }
            }
        }
    }

    /// Change one per-provider field, then reload. Nothing is applied locally first.
    pub async fn update_post_process_setting(
        &self,
        field: PostProcessField,
        provider_id: &str,
        value: &str,
    ) -> UpdateOutcome {
        let update_key = format!("post_process_{}:{}", field.as_str(), provider_id);
        let _updating = self.updates.begin(&update_key);
        let _turn = self.queue.enter(&update_key).await;

        let result = match field {
            PostProcessField::BaseUrl => {
                self.commands
                    .change_post_process_base_url_setting(provider_id, value)
                    .await
            }
            PostProcessField::ApiKey => {
                self.commands
                    .change_post_process_api_key_setting(provider_id, value)
                    .await
            }
            PostProcessField::Model => {
                self.commands
                    .change_post_process_model_setting(provider_id, value)
                    .await
            }
        };

        match result {
            Ok(()) => {
                self.load_settings().await;
                UpdateOutcome::Applied
            }
            Err(e) => {
                error!(
                    "Failed to update post-process {}: {:#}",
                    field.as_str().replace('_', " "),
                    e
                );
                UpdateOutcome::Failed {
                    reason: format!("{:#}", e),
                }
            }
        }
    }

    pub async fn update_post_process_base_url(
        &self,
        provider_id: &str,
        base_url: &str,
    ) -> UpdateOutcome {
        self.update_post_process_setting(PostProcessField::BaseUrl, provider_id, base_url)
            .await
    }

    /// Models listed for the old key may not be valid for the new one, so the
    /// cached list is dropped before the key changes.
    pub async fn update_post_process_api_key(
        &self,
        provider_id: &str,
        api_key: &str,
    ) -> UpdateOutcome {
        self.set_post_process_model_options(provider_id, Vec::new());
        self.update_post_process_setting(PostProcessField::ApiKey, provider_id, api_key)
            .await
    }

    pub async fn update_post_process_model(&self, provider_id: &str, model: &str) -> UpdateOutcome {
        self.update_post_process_setting(PostProcessField::Model, provider_id, model)
            .await
    }

    /// Ask the backend for the provider's model list. A failure returns an
    /// empty list and leaves the cache untouched so the user can retry.
    pub async fn fetch_post_process_models(&self, provider_id: &str) -> Vec<String> {
        let update_key = format!("post_process_models_fetch:{}", provider_id);
        let _updating = self.updates.begin(&update_key);

        match self.commands.fetch_post_process_models(provider_id).await {
            Ok(models) => {
                self.set_post_process_model_options(provider_id, models.clone());
                models
            }
            Err(e) => {
                error!("Failed to fetch models: {:#}", e);
                Vec::new()
            }
        }
    }
}

fn display_device_name(name: String) -> String {
    if name == DEFAULT_DEVICE_ID {
        DEFAULT_DEVICE_NAME.to_string()
    } else {
        name
    }
}
