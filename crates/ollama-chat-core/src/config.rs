use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Result, anyhow};

use crate::ai::ollama::{normalize_base_url, DEFAULT_OLLAMA_URL};
use crate::state::{clamp_temperature, Settings, DEFAULT_SYSTEM_PROMPT, DEFAULT_TEMPERATURE};

pub const DEFAULT_MODEL: &str = "llama3.2-vision";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub ollama_url: Option<String>,
    pub default_model: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    /// Keep conversations between launches instead of starting fresh
    #[serde(default)]
    pub keep_history: bool,
    pub log_level: Option<String>,
    pub export_dir: Option<PathBuf>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, config_content)?;
        Ok(())
    }

    pub fn save_default_model(model: &str) -> Result<()> {
        let mut config = Self::load().unwrap_or_else(|_| Self::new());
        config.default_model = Some(model.to_string());
        config.save()
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("ollama-chat").join("config.json"))
    }

    /// Settings new conversations start with
    pub fn defaults(&self) -> Settings {
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
                .default_model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        }
    }

    /// Server URL: explicit flag, then OLLAMA_HOST, then config, then localhost
    pub fn base_url(&self, flag: Option<&str>) -> String {
        let raw = flag
            .map(str::to_string)
            .or_else(|| std::env::var("OLLAMA_HOST").ok().filter(|h| !h.trim().is_empty()))
            .or_else(|| self.ollama_url.clone())
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        normalize_base_url(&raw)
    }
}
