//! Scripted command backend for unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::commands::CommandBackend;
use crate::keyboard::validate_shortcut_string;
use crate::settings::{get_default_settings, AppSettings};

struct Failure {
    args: Option<Value>,
    message: String,
}

#[derive(Default)]
pub struct MockBackend {
    responses: Mutex<HashMap<String, Value>>,
    failures: Mutex<HashMap<String, Vec<Failure>>>,
    hangs: Mutex<HashSet<String>>,
    holds: Mutex<HashMap<String, Arc<Notify>>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend serving `settings` and accepting every binding change.
    pub fn with_settings(settings: &AppSettings) -> Self {
        let backend = Self::new();
        let document = serde_json::to_value(settings).unwrap();
        backend.respond("get_app_settings", document);
        backend.respond(
            "get_default_settings",
            serde_json::to_value(get_default_settings()).unwrap(),
        );
        backend.respond("get_microphone_mode", json!(settings.always_on_microphone));
        backend.respond(
            "get_selected_microphone",
            json!(settings.selected_microphone.as_deref().unwrap_or("Default")),
        );
        backend.respond(
            "get_selected_output_device",
            json!(settings.selected_output_device.as_deref().unwrap_or("Default")),
        );
        let accepted = json!({ "success": true, "binding": null, "error": null });
        backend.respond("change_binding", accepted.clone());
        backend.respond("reset_binding", accepted);
        backend
    }

    pub fn respond(&self, command: &str, value: Value) {
        self.responses
            .lock()
            .unwrap()
            .insert(command.to_string(), value);
    }

    /// Every call to `command` fails.
    pub fn fail(&self, command: &str, message: &str) {
        self.push_failure(command, None, message);
    }

    /// Calls to `command` with exactly `args` fail.
    pub fn fail_with_args(&self, command: &str, args: Value, message: &str) {
        self.push_failure(command, Some(args), message);
    }

    fn push_failure(&self, command: &str, args: Option<Value>, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push(Failure {
                args,
                message: message.to_string(),
            });
    }

    pub fn clear_failures(&self, command: &str) {
        self.failures.lock().unwrap().remove(command);
    }

    /// Calls to `command` never complete.
    pub fn hang(&self, command: &str) {
        self.hangs.lock().unwrap().insert(command.to_string());
    }

    /// Calls to `command` wait for one `notify_one` on the returned handle per call.
    pub fn hold(&self, command: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.holds
            .lock()
            .unwrap()
            .insert(command.to_string(), notify.clone());
        notify
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, command: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|(name, _)| name == command)
            .map(|(_, args)| args)
            .collect()
    }

    pub fn command_names(&self) -> Vec<String> {
        self.calls().into_iter().map(|(name, _)| name).collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl CommandBackend for MockBackend {
    async fn invoke(&self, command: &str, args: Value) -> Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((command.to_string(), args.clone()));

        let hangs = self.hangs.lock().unwrap().contains(command);
        if hangs {
            std::future::pending::<()>().await;
        }

        let hold = self.holds.lock().unwrap().get(command).cloned();
        if let Some(notify) = hold {
            notify.notified().await;
        }

        let failure = self.failures.lock().unwrap().get(command).and_then(|rules| {
            rules
                .iter()
                .find(|rule| rule.args.as_ref().map_or(true, |a| *a == args))
                .map(|rule| rule.message.clone())
        });
        if let Some(message) = failure {
            return Err(anyhow!(message));
        }

        // Same check the native side runs before registering a shortcut.
        if command == "change_binding" {
            if let Some(binding) = args.get("binding").and_then(Value::as_str) {
                validate_shortcut_string(binding).map_err(|e| anyhow!(e))?;
            }
        }

        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(command)
            .cloned()
            .unwrap_or(Value::Null))
    }
}
