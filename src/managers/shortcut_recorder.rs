use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::keyboard::{
    format_key_combination, normalized_key_name, Chord, KeyEvent, OsType, ESCAPE_TOKEN,
};
use crate::managers::settings_store::SettingsStore;

const PROMPT_TEXT: &str = "Press keys...";

/// Installs and removes the host's key and pointer listeners.
///
/// `attach` runs when a recording starts and `detach` when it ends, once each
/// per recording, whatever the exit path.
pub trait CaptureHooks: Send + Sync {
    fn attach(&self, id: &str);
    fn detach(&self, id: &str);
}

pub struct NoopHooks;

impl CaptureHooks for NoopHooks {
    fn attach(&self, _id: &str) {}
    fn detach(&self, _id: &str) {}
}

/// Screen region of a shortcut's control, used for outside-click detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x <= self.x + self.width && y >= self.y && y <= self.y + self.height
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderOutcome {
    Started,
    AlreadyRecording,
    /// The previous recording of this id is still restoring or resuming its hotkey.
    Busy,
    /// The key was taken into the chord (or released while others are held).
    Captured,
    /// Auto-repeat while recording; swallowed without changing anything.
    Repeated,
    Committed { chord: String },
    CommitFailed { chord: String, restored: bool },
    Cancelled,
    /// Nothing is being recorded, or the event does not concern the recorder.
    Ignored,
}

impl RecorderOutcome {
    /// Whether the host should suppress its default handling of the event.
    pub fn consumes_event(&self) -> bool {
        !matches!(self, RecorderOutcome::Ignored)
    }
}

struct Session {
    id: String,
    original_binding: Option<String>,
    pressed: Chord,
    recorded: Chord,
}

#[derive(Default)]
struct RecorderState {
    active: Option<Session>,
    /// Ids whose recording ended but whose binding write and resume have not returned yet.
    settling: HashSet<String>,
}

/// Clears an id's settling mark once its exit path has returned or been dropped.
struct SettlingGuard<'a> {
    recorder: &'a ShortcutRecorder,
    id: String,
}

impl Drop for SettlingGuard<'_> {
    fn drop(&mut self) {
        self.recorder.state().settling.remove(&self.id);
    }
}

/// Captures a new chord for one shortcut at a time.
///
/// While a shortcut is being recorded its global hotkey is suspended so the
/// keystrokes do not fire it. Every way out of recording (commit, failed
/// commit, Escape, click outside, or a new recording starting) resumes the
/// hotkey exactly once. An id cannot be recorded again until that resume
/// has returned.
pub struct ShortcutRecorder {
    store: Arc<SettingsStore>,
    hooks: Arc<dyn CaptureHooks>,
    os_type: OsType,
    state: Mutex<RecorderState>,
    bounds: Mutex<HashMap<String, Rect>>,
}

impl ShortcutRecorder {
    pub fn new(store: Arc<SettingsStore>) -> Self {
        Self::with_hooks(store, Arc::new(NoopHooks))
    }

    pub fn with_hooks(store: Arc<SettingsStore>, hooks: Arc<dyn CaptureHooks>) -> Self {
        let os_type = store.config().os_type;
        Self {
            store,
            hooks,
            os_type,
            state: Mutex::new(RecorderState::default()),
            bounds: Mutex::new(HashMap::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_session(&self) -> Option<Session> {
        let mut state = self.state();
        let session = state.active.take()?;
        state.settling.insert(session.id.clone());
        Some(session)
    }

    fn settling_guard(&self, id: &str) -> SettlingGuard<'_> {
        SettlingGuard {
            recorder: self,
            id: id.to_string(),
        }
    }

    pub fn editing_id(&self) -> Option<String> {
        self.state().active.as_ref().map(|session| session.id.clone())
    }

    pub fn is_settling(&self, id: &str) -> bool {
        self.state().settling.contains(id)
    }

    pub fn is_recording(&self) -> bool {
        self.editing_id().is_some()
    }

    pub fn set_control_bounds(&self, id: &str, bounds: Rect) {
        self.bounds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string(), bounds);
    }

    pub fn clear_control_bounds(&self, id: &str) {
        self.bounds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    /// Text for the control being recorded: the keys captured so far, or a
    /// prompt if none yet. `None` when idle.
    pub fn current_display(&self) -> Option<String> {
        match &self.state().active {
            Some(session) if session.recorded.is_empty() => Some(PROMPT_TEXT.to_string()),
            Some(session) => Some(format_key_combination(
                &session.recorded.to_string(),
                self.os_type,
            )),
            None => None,
        }
    }

    /// Text for the control of shortcut `id`, recording or not.
    pub fn display_for(&self, id: &str) -> Option<String> {
        if self.editing_id().as_deref() == Some(id) {
            return self.current_display();
        }
        self.store
            .binding(id)
            .map(|binding| format_key_combination(&binding.current_binding, self.os_type))
    }

    /// Begin recording `id`. A recording already running for another id is
    /// cancelled first. Refused with [`RecorderOutcome::Busy`] while the last
    /// recording of `id` is still being committed or cancelled.
    pub async fn start(&self, id: &str) -> RecorderOutcome {
        let original_binding = self.store.binding(id).map(|b| b.current_binding);

        let previous = {
            let mut state = self.state();
            if state.settling.contains(id) {
                debug!("Shortcut '{}' is still being released, not recording", id);
                return RecorderOutcome::Busy;
            }
            if state.active.as_ref().is_some_and(|session| session.id == id) {
                return RecorderOutcome::AlreadyRecording;
            }
            let previous = state.active.replace(Session {
                id: id.to_string(),
                original_binding,
                pressed: Chord::new(),
                recorded: Chord::new(),
            });
            if let Some(previous) = &previous {
                state.settling.insert(previous.id.clone());
            }
            previous
        };

        if let Some(previous) = previous {
            info!(
                "Cancelling recording of '{}' to record '{}'",
                previous.id, id
            );
            self.abandon(previous).await;
        }

        self.hooks.attach(id);
        if let Err(e) = self.store.commands().suspend_binding(id).await {
            error!("Failed to suspend shortcut '{}': {:#}", id, e);
        }
        debug!("Recording shortcut '{}'", id);
        RecorderOutcome::Started
    }

    pub async fn handle_key_down(&self, event: &KeyEvent) -> RecorderOutcome {
        let token = normalized_key_name(event, self.os_type);
        {
            let mut state = self.state();
            let Some(session) = state.active.as_mut() else {
                return RecorderOutcome::Ignored;
            };
            if event.repeat {
                return RecorderOutcome::Repeated;
            }
            if token != ESCAPE_TOKEN {
                if session.pressed.push(&token) {
                    session.recorded.push(&token);
                }
                return RecorderOutcome::Captured;
            }
        }
        self.cancel().await
    }

    pub async fn handle_key_up(&self, event: &KeyEvent) -> RecorderOutcome {
        let token = normalized_key_name(event, self.os_type);
        let session = {
            let mut state = self.state();
            let Some(current) = state.active.as_mut() else {
                return RecorderOutcome::Ignored;
            };
            current.pressed.remove(&token);
            // An empty chord is never committed; wait for Escape or an outside click.
            if !current.pressed.is_empty() || current.recorded.is_empty() {
                return RecorderOutcome::Captured;
            }
            let Some(session) = state.active.take() else {
                return RecorderOutcome::Ignored;
            };
            state.settling.insert(session.id.clone());
            session
        };
        self.commit(session).await
    }

    /// A pointer-down anywhere in the window. Outside the recording control's
    /// bounds it cancels; without registered bounds it is ignored.
    pub async fn handle_pointer_down(&self, x: f64, y: f64) -> RecorderOutcome {
        let Some(id) = self.editing_id() else {
            return RecorderOutcome::Ignored;
        };
        let outside = self
            .bounds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .is_some_and(|bounds| !bounds.contains(x, y));
        if outside {
            self.cancel().await
        } else {
            RecorderOutcome::Ignored
        }
    }

    /// Stop recording without changing the binding.
    pub async fn cancel(&self) -> RecorderOutcome {
        match self.take_session() {
            Some(session) => {
                self.abandon(session).await;
                RecorderOutcome::Cancelled
            }
            None => RecorderOutcome::Ignored,
        }
    }

    async fn commit(&self, session: Session) -> RecorderOutcome {
        let _settling = self.settling_guard(&session.id);
        self.hooks.detach(&session.id);
        let chord = session.recorded.to_string();
        info!("Committing shortcut '{}' as '{}'", session.id, chord);

        let outcome = self.store.update_binding(&session.id, &chord).await;
        let result = if outcome.is_applied() {
            RecorderOutcome::Committed { chord }
        } else {
            warn!(
                "Shortcut '{}' was not saved ({:?}), restoring previous chord",
                session.id, outcome
            );
            let restored = self.restore(&session).await;
            RecorderOutcome::CommitFailed { chord, restored }
        };

        self.resume(&session.id).await;
        result
    }

    async fn abandon(&self, session: Session) {
        let _settling = self.settling_guard(&session.id);
        self.hooks.detach(&session.id);
        self.restore(&session).await;
        self.resume(&session.id).await;
    }

    async fn restore(&self, session: &Session) -> bool {
        let Some(original) = session.original_binding.as_deref() else {
            return false;
        };
        let outcome = self.store.update_binding(&session.id, original).await;
        if !outcome.is_applied() {
            error!(
                "Failed to restore shortcut '{}' to '{}': {:?}",
                session.id, original, outcome
            );
        }
        outcome.is_applied()
    }

    async fn resume(&self, id: &str) {
        if let Err(e) = self.store.commands().resume_binding(id).await {
            error!("Failed to resume shortcut '{}': {:#}", id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::settings::{get_default_settings, AppSettings, ShortcutBinding};
    use crate::test_support::MockBackend;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingHooks {
        log: Mutex<Vec<String>>,
    }

    impl CaptureHooks for RecordingHooks {
        fn attach(&self, id: &str) {
            self.log.lock().unwrap().push(format!("attach:{}", id));
        }

        fn detach(&self, id: &str) {
            self.log.lock().unwrap().push(format!("detach:{}", id));
        }
    }

    fn settings() -> AppSettings {
        let mut settings = get_default_settings();
        settings.bindings.insert(
            "transcribe".to_string(),
            ShortcutBinding {
                id: "transcribe".to_string(),
                name: "Transcribe".to_string(),
                description: "Converts your speech into text.".to_string(),
                default_binding: "ctrl+space".to_string(),
                current_binding: "ctrl+shift+h".to_string(),
            },
        );
        settings.bindings.insert(
            "post_process".to_string(),
            ShortcutBinding {
                id: "post_process".to_string(),
                name: "Post-process".to_string(),
                description: "Transcribe and clean up.".to_string(),
                default_binding: "ctrl+shift+space".to_string(),
                current_binding: "ctrl+shift+space".to_string(),
            },
        );
        settings
    }

    async fn recorder(
        os_type: OsType,
    ) -> (ShortcutRecorder, Arc<MockBackend>, Arc<RecordingHooks>) {
        let backend = Arc::new(MockBackend::with_settings(&settings()));
        let config = SyncConfig {
            os_type,
            ..SyncConfig::default()
        };
        let store = Arc::new(SettingsStore::new(backend.clone(), config));
        store.load_settings().await;
        backend.clear_calls();
        let hooks = Arc::new(RecordingHooks::default());
        let recorder = ShortcutRecorder::with_hooks(store, hooks.clone());
        (recorder, backend, hooks)
    }

    fn chords_sent(backend: &MockBackend) -> Vec<String> {
        backend
            .calls_to("change_binding")
            .into_iter()
            .map(|args| args["binding"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_meta_k_commits_command_k_on_macos() {
        let (recorder, backend, _hooks) = recorder(OsType::Macos).await;

        assert_eq!(recorder.start("transcribe").await, RecorderOutcome::Started);
        assert_eq!(
            backend.calls_to("suspend_binding"),
            vec![json!({ "id": "transcribe" })]
        );
        assert_eq!(recorder.current_display().as_deref(), Some("Press keys..."));

        recorder.handle_key_down(&KeyEvent::from_code("MetaLeft")).await;
        recorder.handle_key_down(&KeyEvent::from_code("KeyK")).await;
        assert_eq!(recorder.current_display().as_deref(), Some("command + k"));
        assert_eq!(
            recorder.handle_key_up(&KeyEvent::from_code("KeyK")).await,
            RecorderOutcome::Captured
        );
        let outcome = recorder
            .handle_key_up(&KeyEvent::from_code("MetaLeft"))
            .await;

        assert_eq!(
            outcome,
            RecorderOutcome::Committed {
                chord: "command+k".to_string()
            }
        );
        assert_eq!(chords_sent(&backend), vec!["command+k"]);
        assert_eq!(
            backend.calls_to("resume_binding"),
            vec![json!({ "id": "transcribe" })]
        );
        assert!(!recorder.is_recording());
        assert_eq!(
            recorder.display_for("transcribe").as_deref(),
            Some("command + k")
        );
    }

    #[tokio::test]
    async fn test_left_and_right_shift_share_one_token() {
        let (recorder, backend, _hooks) = recorder(OsType::Linux).await;
        recorder.start("transcribe").await;

        recorder.handle_key_down(&KeyEvent::from_code("ShiftRight")).await;
        recorder.handle_key_down(&KeyEvent::from_code("KeyA")).await;
        recorder.handle_key_up(&KeyEvent::from_code("KeyA")).await;
        recorder.handle_key_up(&KeyEvent::from_code("ShiftRight")).await;

        assert_eq!(chords_sent(&backend), vec!["shift+a"]);
    }

    #[tokio::test]
    async fn test_auto_repeat_is_swallowed() {
        let (recorder, backend, _hooks) = recorder(OsType::Linux).await;
        recorder.start("transcribe").await;

        recorder.handle_key_down(&KeyEvent::from_code("ControlLeft")).await;
        let repeat = recorder
            .handle_key_down(&KeyEvent::from_code("KeyJ").repeated())
            .await;
        assert_eq!(repeat, RecorderOutcome::Repeated);
        assert!(repeat.consumes_event());

        recorder.handle_key_down(&KeyEvent::from_code("KeyJ")).await;
        recorder.handle_key_up(&KeyEvent::from_code("KeyJ")).await;
        recorder.handle_key_up(&KeyEvent::from_code("ControlLeft")).await;

        assert_eq!(chords_sent(&backend), vec!["ctrl+j"]);
    }

    #[tokio::test]
    async fn test_stray_key_up_does_not_commit_empty_chord() {
        let (recorder, backend, _hooks) = recorder(OsType::Linux).await;
        recorder.start("transcribe").await;

        let outcome = recorder.handle_key_up(&KeyEvent::from_code("KeyA")).await;

        assert_eq!(outcome, RecorderOutcome::Captured);
        assert!(recorder.is_recording());
        assert!(backend.calls_to("change_binding").is_empty());
        assert!(backend.calls_to("resume_binding").is_empty());
    }

    #[tokio::test]
    async fn test_escape_restores_and_resumes() {
        let (recorder, backend, hooks) = recorder(OsType::Linux).await;
        recorder.start("transcribe").await;
        recorder.handle_key_down(&KeyEvent::from_code("ControlLeft")).await;

        let outcome = recorder
            .handle_key_down(&KeyEvent::from_code("Escape"))
            .await;

        assert_eq!(outcome, RecorderOutcome::Cancelled);
        assert_eq!(chords_sent(&backend), vec!["ctrl+shift+h"]);
        assert_eq!(backend.calls_to("resume_binding").len(), 1);
        assert!(!recorder.is_recording());
        assert_eq!(
            *hooks.log.lock().unwrap(),
            vec!["attach:transcribe", "detach:transcribe"]
        );
        // Listeners are gone; later keys are not ours.
        assert_eq!(
            recorder.handle_key_down(&KeyEvent::from_code("KeyA")).await,
            RecorderOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn test_click_outside_cancels_and_inside_does_not() {
        let (recorder, backend, _hooks) = recorder(OsType::Linux).await;
        recorder.set_control_bounds("transcribe", Rect::new(100.0, 40.0, 200.0, 30.0));
        recorder.start("transcribe").await;

        assert_eq!(
            recorder.handle_pointer_down(150.0, 50.0).await,
            RecorderOutcome::Ignored
        );
        assert!(recorder.is_recording());

        assert_eq!(
            recorder.handle_pointer_down(10.0, 10.0).await,
            RecorderOutcome::Cancelled
        );
        assert_eq!(chords_sent(&backend), vec!["ctrl+shift+h"]);
        assert_eq!(backend.calls_to("resume_binding").len(), 1);
    }

    #[tokio::test]
    async fn test_click_without_bounds_is_ignored() {
        let (recorder, _backend, _hooks) = recorder(OsType::Linux).await;
        recorder.start("transcribe").await;

        assert_eq!(
            recorder.handle_pointer_down(0.0, 0.0).await,
            RecorderOutcome::Ignored
        );
        assert!(recorder.is_recording());
    }

    #[tokio::test]
    async fn test_failed_commit_restores_and_still_resumes() {
        let (recorder, backend, hooks) = recorder(OsType::Linux).await;
        backend.fail_with_args(
            "change_binding",
            json!({ "id": "transcribe", "binding": "ctrl+c" }),
            "Shortcut 'ctrl+c' is already in use",
        );
        recorder.start("transcribe").await;

        recorder.handle_key_down(&KeyEvent::from_code("ControlLeft")).await;
        recorder.handle_key_down(&KeyEvent::from_code("KeyC")).await;
        recorder.handle_key_up(&KeyEvent::from_code("ControlLeft")).await;
        let outcome = recorder.handle_key_up(&KeyEvent::from_code("KeyC")).await;

        assert_eq!(
            outcome,
            RecorderOutcome::CommitFailed {
                chord: "ctrl+c".to_string(),
                restored: true
            }
        );
        assert_eq!(chords_sent(&backend), vec!["ctrl+c", "ctrl+shift+h"]);
        assert_eq!(backend.calls_to("resume_binding").len(), 1);
        assert_eq!(
            recorder.display_for("transcribe").as_deref(),
            Some("ctrl+shift+h")
        );
        assert_eq!(hooks.log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_resume_happens_even_when_restore_fails() {
        let (recorder, backend, _hooks) = recorder(OsType::Linux).await;
        backend.fail("change_binding", "backend unavailable");
        recorder.start("transcribe").await;

        recorder.handle_key_down(&KeyEvent::from_code("F5")).await;
        let outcome = recorder.handle_key_up(&KeyEvent::from_code("F5")).await;

        assert_eq!(
            outcome,
            RecorderOutcome::CommitFailed {
                chord: "f5".to_string(),
                restored: false
            }
        );
        assert_eq!(backend.calls_to("resume_binding").len(), 1);
    }

    #[tokio::test]
    async fn test_modifier_only_chord_is_refused_and_restored() {
        let (recorder, backend, _hooks) = recorder(OsType::Linux).await;
        recorder.start("transcribe").await;

        recorder.handle_key_down(&KeyEvent::from_code("ControlLeft")).await;
        recorder.handle_key_down(&KeyEvent::from_code("ShiftLeft")).await;
        recorder.handle_key_up(&KeyEvent::from_code("ShiftLeft")).await;
        let outcome = recorder
            .handle_key_up(&KeyEvent::from_code("ControlLeft"))
            .await;

        assert_eq!(
            outcome,
            RecorderOutcome::CommitFailed {
                chord: "ctrl+shift".to_string(),
                restored: true
            }
        );
        assert_eq!(
            recorder.display_for("transcribe").as_deref(),
            Some("ctrl+shift+h")
        );
        assert_eq!(backend.calls_to("resume_binding").len(), 1);
    }

    #[tokio::test]
    async fn test_suspend_failure_does_not_block_recording() {
        let (recorder, backend, _hooks) = recorder(OsType::Linux).await;
        backend.fail("suspend_binding", "not registered");

        assert_eq!(recorder.start("transcribe").await, RecorderOutcome::Started);
        assert!(recorder.is_recording());
    }

    #[tokio::test]
    async fn test_restart_during_commit_is_refused_until_resumed() {
        let (recorder, backend, _hooks) = recorder(OsType::Linux).await;
        recorder.start("transcribe").await;
        let gate = backend.hold("change_binding");

        let (committed, ()) = tokio::join!(
            async {
                recorder.handle_key_down(&KeyEvent::from_code("F5")).await;
                recorder.handle_key_up(&KeyEvent::from_code("F5")).await
            },
            async {
                while backend.calls_to("change_binding").is_empty() {
                    tokio::task::yield_now().await;
                }
                assert!(!recorder.is_recording());
                assert!(recorder.is_settling("transcribe"));
                assert_eq!(recorder.start("transcribe").await, RecorderOutcome::Busy);
                gate.notify_one();
            }
        );

        assert_eq!(
            committed,
            RecorderOutcome::Committed {
                chord: "f5".to_string()
            }
        );
        assert!(!recorder.is_settling("transcribe"));
        assert_eq!(
            backend.command_names(),
            vec!["suspend_binding", "change_binding", "resume_binding"]
        );

        assert_eq!(recorder.start("transcribe").await, RecorderOutcome::Started);
        assert_eq!(
            backend.command_names().last().map(String::as_str),
            Some("suspend_binding")
        );
        assert!(recorder.is_recording());
    }

    #[tokio::test]
    async fn test_dropped_cancel_does_not_leave_id_busy() {
        let (recorder, backend, _hooks) = recorder(OsType::Linux).await;
        recorder.start("transcribe").await;
        backend.hang("resume_binding");

        let abandoned =
            tokio::time::timeout(std::time::Duration::from_millis(20), recorder.cancel()).await;

        assert!(abandoned.is_err());
        assert!(!recorder.is_settling("transcribe"));
    }

    #[tokio::test]
    async fn test_one_recording_at_a_time() {
        let (recorder, backend, hooks) = recorder(OsType::Linux).await;
        recorder.start("transcribe").await;
        assert_eq!(
            recorder.start("transcribe").await,
            RecorderOutcome::AlreadyRecording
        );

        recorder.start("post_process").await;

        assert_eq!(recorder.editing_id().as_deref(), Some("post_process"));
        assert_eq!(
            backend.calls_to("resume_binding"),
            vec![json!({ "id": "transcribe" })]
        );
        assert_eq!(
            *hooks.log.lock().unwrap(),
            vec![
                "attach:transcribe",
                "detach:transcribe",
                "attach:post_process"
            ]
        );

        recorder.cancel().await;
        assert_eq!(
            backend.calls_to("resume_binding"),
            vec![json!({ "id": "transcribe" }), json!({ "id": "post_process" })]
        );
        assert_eq!(recorder.cancel().await, RecorderOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_alt_is_shown_as_option_on_macos() {
        let (recorder, _backend, _hooks) = recorder(OsType::Macos).await;
        recorder.start("transcribe").await;
        recorder.handle_key_down(&KeyEvent::from_code("AltLeft")).await;

        assert_eq!(recorder.current_display().as_deref(), Some("option"));
        assert_eq!(
            recorder.display_for("post_process").as_deref(),
            Some("ctrl + shift + space")
        );
    }
}
