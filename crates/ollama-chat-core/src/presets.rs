//! Named configuration presets (system prompt + temperature + model)

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ChatError, Result};
use crate::state::{clamp_temperature, Settings, DEFAULT_SYSTEM_PROMPT, DEFAULT_TEMPERATURE};

pub const DEFAULT_PRESET: &str = "Default";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    #[serde(rename = "systemPrompt", default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Preset {
    pub fn capture(name: impl Into<String>, settings: &Settings) -> Self {
        Self {
            name: name.into(),
            system_prompt: Some(settings.system_prompt.clone()),
            temperature: Some(settings.temperature),
            model: Some(settings.model.clone()),
        }
    }

    /// Resolve into concrete settings, filling absent fields with defaults
    pub fn settings(&self, fallback_model: &str) -> Settings {
        Settings {
            system_prompt: self
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            temperature: self
                .temperature
                .map(clamp_temperature)
                .unwrap_or(DEFAULT_TEMPERATURE),
            model: self
                .model
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| fallback_model.to_string()),
        }
    }
}

/// The preset list plus the current menu selection.
/// A preset named "Default" is always present.
#[derive(Debug, Clone)]
pub struct PresetManager {
    presets: Vec<Preset>,
    selected: Option<String>,
}

impl PresetManager {
    pub fn new(defaults: &Settings) -> Self {
        Self {
            presets: vec![Preset::capture(DEFAULT_PRESET, defaults)],
            selected: None,
        }
    }

    /// Build from a stored list, re-inserting "Default" if it went missing
    pub fn from_stored(stored: Vec<Preset>, defaults: &Settings) -> Self {
        let mut presets: Vec<Preset> = Vec::with_capacity(stored.len() + 1);
        for preset in stored {
            if !presets.iter().any(|p| p.name == preset.name) {
                presets.push(preset);
            }
        }
        if !presets.iter().any(|p| p.name == DEFAULT_PRESET) {
            presets.insert(0, Preset::capture(DEFAULT_PRESET, defaults));
        }
        Self {
            presets,
            selected: None,
        }
    }

    pub fn presets(&self) -> &[Preset] {
        &self.presets
    }

    pub fn names(&self) -> Vec<&str> {
        self.presets.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Preset> {
        self.presets.iter().find(|p| p.name == name)
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Capture the current settings under a new name and select it
    pub fn add(&mut self, name: &str, current: &Settings) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::UnknownPreset(String::new()));
        }
        if self.get(name).is_some() {
            return Err(ChatError::DuplicatePreset(name.to_string()));
        }

        self.presets.push(Preset::capture(name, current));
        self.selected = Some(name.to_string());
        info!(preset = name, "preset added");
        Ok(())
    }

    /// Delete the selected preset. Returns its name.
    pub fn delete_selected(&mut self) -> Result<String> {
        let name = self.selected.clone().ok_or(ChatError::NoPresetSelected)?;
        if name == DEFAULT_PRESET {
            return Err(ChatError::CannotDeleteDefault);
        }

        let before = self.presets.len();
        self.presets.retain(|p| p.name != name);
        if self.presets.len() == before {
            self.selected = None;
            return Err(ChatError::UnknownPreset(name));
        }

        self.selected = None;
        info!(preset = %name, "preset deleted");
        Ok(name)
    }

    /// Select a preset and return the settings it resolves to
    pub fn select(&mut self, name: &str, fallback_model: &str) -> Result<Settings> {
        let settings = self
            .get(name)
            .map(|preset| preset.settings(fallback_model))
            .ok_or_else(|| ChatError::UnknownPreset(name.to_string()))?;
        self.selected = Some(name.to_string());
        Ok(settings)
    }
}
