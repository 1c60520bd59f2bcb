//! User preferences persisted as JSON in the user-data directory

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Window position and size
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowState {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub maximized: bool,
}

impl Default for WindowState {
    fn default() -> Self {
        Self {
            x: 100,
            y: 100,
            width: 1200,
            height: 800,
            maximized: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPreferences {
    /// "light", "dark", or "system"
    pub theme: String,
    /// Empty = use the configured default model
    pub preferred_model: String,
    pub window: WindowState,
    pub auto_save_sessions: bool,
    pub confirm_delete_session: bool,
    pub show_tool_details: bool,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            theme: "system".to_string(),
            preferred_model: String::new(),
            window: WindowState::default(),
            auto_save_sessions: true,
            confirm_delete_session: true,
            show_tool_details: true,
        }
    }
}

/// Loads and saves preferences. A missing or corrupt file yields defaults.
pub struct PreferencesManager {
    path: PathBuf,
    preferences: UserPreferences,
}

impl PreferencesManager {
    pub fn load(path: PathBuf) -> Self {
        let preferences = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(prefs) => prefs,
                Err(e) => {
                    tracing::warn!(error = %e, "Invalid preferences file, using defaults");
                    UserPreferences::default()
                }
            },
            Err(_) => UserPreferences::default(),
        };
        Self { path, preferences }
    }

    pub fn get(&self) -> &UserPreferences {
        &self.preferences
    }

    #[allow(dead_code)] // The desktop shell writes preferences
    pub fn get_mut(&mut self) -> &mut UserPreferences {
        &mut self.preferences
    }

    #[allow(dead_code)] // The desktop shell writes preferences
    pub fn save(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.preferences)?;
        std::fs::write(&self.path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_missing() {
        let manager = PreferencesManager::load(PathBuf::from("/nonexistent/prefs.json"));
        assert_eq!(manager.get().theme, "system");
        assert!(manager.get().auto_save_sessions);
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");

        let mut manager = PreferencesManager::load(path.clone());
        manager.get_mut().theme = "dark".to_string();
        manager.get_mut().preferred_model = "ministral:latest".to_string();
        manager.get_mut().window.width = 1600;
        manager.save().unwrap();

        let reloaded = PreferencesManager::load(path);
        assert_eq!(reloaded.get().theme, "dark");
        assert_eq!(reloaded.get().preferred_model, "ministral:latest");
        assert_eq!(reloaded.get().window.width, 1600);
    }

    #[test]
    fn test_corrupt_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        std::fs::write(&path, "{not json").unwrap();

        let manager = PreferencesManager::load(path);
        assert_eq!(manager.get().theme, "system");
    }

    #[test]
    fn test_partial_file_uses_defaults_for_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        std::fs::write(&path, r#"{"theme": "light"}"#).unwrap();

        let manager = PreferencesManager::load(path);
        assert_eq!(manager.get().theme, "light");
        assert_eq!(manager.get().window.width, 1200);
    }
}
