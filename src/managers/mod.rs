pub mod settings_store;
pub mod shortcut_recorder;
pub mod update_tracker;
