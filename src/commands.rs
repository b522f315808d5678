//! The boundary to the native command layer.
//!
//! Everything the settings mirror and the shortcut recorder need from the
//! backend goes through [`CommandBackend::invoke`]: a command name, a JSON
//! object of named parameters, and a JSON result. [`Commands`] wraps a
//! backend with one typed method per command.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::settings::{AudioDevice, CustomSounds, ShortcutBinding, SoundType};

/// A transport able to run a named backend command.
#[async_trait]
pub trait CommandBackend: Send + Sync {
    /// Run `command` with `args` (a JSON object keyed by parameter name).
    async fn invoke(&self, command: &str, args: Value) -> Result<Value>;
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BindingResponse {
    pub success: bool,
    pub binding: Option<ShortcutBinding>,
    pub error: Option<String>,
}

impl BindingResponse {
    fn into_binding(self, command: &str, id: &str) -> Result<Option<ShortcutBinding>> {
        if self.success {
            Ok(self.binding)
        } else {
            Err(anyhow!(
                "{} for '{}' was refused: {}",
                command,
                id,
                self.error.unwrap_or_else(|| "no reason given".to_string())
            ))
        }
    }
}

/// Typed access to the backend commands.
#[derive(Clone)]
pub struct Commands {
    backend: Arc<dyn CommandBackend>,
    timeout: Option<Duration>,
}

impl Commands {
    pub fn new(backend: Arc<dyn CommandBackend>, timeout: Option<Duration>) -> Self {
        Self { backend, timeout }
    }

    /// Run a command and return its raw result, bounded by the configured timeout if any.
    pub async fn invoke_raw(&self, command: &str, args: Value) -> Result<Value> {
        debug!("invoking '{}' with {}", command, args);
        let call = self.backend.invoke(command, args);
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| anyhow!("'{}' timed out after {:?}", command, limit))?,
            None => call.await,
        };
        result.with_context(|| format!("command '{}' failed", command))
    }

    async fn call<T: DeserializeOwned>(&self, command: &str, args: Value) -> Result<T> {
        let value = self.invoke_raw(command, args).await?;
        serde_json::from_value(value)
            .with_context(|| format!("unexpected result shape from '{}'", command))
    }

    async fn call_unit(&self, command: &str, args: Value) -> Result<()> {
        self.invoke_raw(command, args).await.map(|_| ())
    }

    pub async fn get_app_settings(&self) -> Result<Map<String, Value>> {
        self.call("get_app_settings", json!({})).await
    }

    pub async fn get_default_settings(&self) -> Result<Map<String, Value>> {
        self.call("get_default_settings", json!({})).await
    }

    pub async fn get_microphone_mode(&self) -> Result<bool> {
        self.call("get_microphone_mode", json!({})).await
    }

    pub async fn get_selected_microphone(&self) -> Result<String> {
        self.call("get_selected_microphone", json!({})).await
    }

    pub async fn get_selected_output_device(&self) -> Result<String> {
        self.call("get_selected_output_device", json!({})).await
    }

    pub async fn get_available_microphones(&self) -> Result<Vec<AudioDevice>> {
        self.call("get_available_microphones", json!({})).await
    }

    pub async fn get_available_output_devices(&self) -> Result<Vec<AudioDevice>> {
        self.call("get_available_output_devices", json!({})).await
    }

    /// Send one setting value to the command named by the dispatch table.
    pub async fn apply_setting(&self, command: &str, param: &str, value: Value) -> Result<()> {
        let mut args = Map::new();
        args.insert(param.to_string(), value);
        self.call_unit(command, Value::Object(args)).await
    }

    pub async fn change_binding(&self, id: &str, binding: &str) -> Result<Option<ShortcutBinding>> {
        let response: BindingResponse = self
            .call("change_binding", json!({ "id": id, "binding": binding }))
            .await?;
        response.into_binding("change_binding", id)
    }

    pub async fn reset_binding(&self, id: &str) -> Result<Option<ShortcutBinding>> {
        let response: BindingResponse = self.call("reset_binding", json!({ "id": id })).await?;
        response.into_binding("reset_binding", id)
    }

    /// Temporarily unregister a binding while it is being edited.
    pub async fn suspend_binding(&self, id: &str) -> Result<()> {
        self.call_unit("suspend_binding", json!({ "id": id })).await
    }

    /// Re-register a binding after editing.
    pub async fn resume_binding(&self, id: &str) -> Result<()> {
        self.call_unit("resume_binding", json!({ "id": id })).await
    }

    pub async fn set_post_process_provider(&self, provider_id: &str) -> Result<()> {
        self.call_unit(
            "set_post_process_provider",
            json!({ "provider_id": provider_id }),
        )
        .await
    }

    pub async fn change_post_process_base_url_setting(
        &self,
        provider_id: &str,
        base_url: &str,
    ) -> Result<()> {
        self.call_unit(
            "change_post_process_base_url_setting",
            json!({ "provider_id": provider_id, "base_url": base_url }),
        )
        .await
    }

    pub async fn change_post_process_api_key_setting(
        &self,
        provider_id: &str,
        api_key: &str,
    ) -> Result<()> {
        self.call_unit(
            "change_post_process_api_key_setting",
            json!({ "provider_id": provider_id, "api_key": api_key }),
        )
        .await
    }

    pub async fn change_post_process_model_setting(
        &self,
        provider_id: &str,
        model: &str,
    ) -> Result<()> {
        self.call_unit(
            "change_post_process_model_setting",
            json!({ "provider_id": provider_id, "model": model }),
        )
        .await
    }

    pub async fn fetch_post_process_models(&self, provider_id: &str) -> Result<Vec<String>> {
        self.call(
            "fetch_post_process_models",
            json!({ "provider_id": provider_id }),
        )
        .await
    }

    pub async fn check_custom_sounds(&self) -> Result<CustomSounds> {
        self.call("check_custom_sounds", json!({})).await
    }

    pub async fn play_test_sound(&self, sound_type: SoundType) -> Result<()> {
        self.call_unit("play_test_sound", json!({ "sound_type": sound_type.as_str() }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockBackend;

    #[tokio::test]
    async fn test_change_binding_refusal_is_an_error() {
        let backend = Arc::new(MockBackend::new());
        backend.respond(
            "change_binding",
            json!({ "success": false, "binding": null, "error": "already in use" }),
        );
        let commands = Commands::new(backend.clone(), None);

        let err = commands.change_binding("transcribe", "ctrl+a").await.unwrap_err();
        assert!(format!("{:#}", err).contains("already in use"));
        assert_eq!(
            backend.calls_to("change_binding"),
            vec![json!({ "id": "transcribe", "binding": "ctrl+a" })]
        );
    }

    #[tokio::test]
    async fn test_apply_setting_names_the_parameter() {
        let backend = Arc::new(MockBackend::new());
        let commands = Commands::new(backend.clone(), None);

        commands
            .apply_setting("change_ptt_setting", "enabled", json!(true))
            .await
            .unwrap();
        assert_eq!(
            backend.calls_to("change_ptt_setting"),
            vec![json!({ "enabled": true })]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_bounds_a_hung_command() {
        let backend = Arc::new(MockBackend::new());
        backend.hang("get_microphone_mode");
        let commands = Commands::new(backend, Some(Duration::from_millis(250)));

        let err = commands.get_microphone_mode().await.unwrap_err();
        assert!(format!("{:#}", err).contains("timed out"));
    }
}
