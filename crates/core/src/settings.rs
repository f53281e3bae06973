//! User settings persistence.
//!
//! This module handles loading and saving user preferences: which provider
//! and model to ask, the listing language and currency, and the prompt
//! template sent with every analysis.

use crate::error::{AppError, Result};
use crate::providers::ProviderKind;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Listing languages offered in the settings screen.
pub const LANGUAGES: &[&str] = &["Dansk", "English", "Svenska", "Norsk", "Deutsch"];

/// Currencies offered in the settings screen.
pub const CURRENCIES: &[&str] = &["DKK", "EUR", "USD", "GBP", "SEK", "NOK"];

pub const DEFAULT_MODEL: &str = "nvidia/nemotron-nano-12b-v2-vl:free";

/// Default prompt template. `{language}` and `{currency}` are substituted
/// before sending.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "Identificer varen på billederne.
Foreslå en rimelig genbrugspris i {currency} i feltet 'price'.
Find eller estimer varens oprindelige nypris i {currency} i feltet 'priceNew'.
Formuler en beskrivelse på én linje (maks. 58 tegn) på {language} i feltet 'description'. Beskrivelsen SKAL inkludere mærke, type, farve og størrelse hvis de er kendte (f.eks. \"Nike Air Max 90 Sort Str. 42\").
Identificer også brand, type, farve, størrelse, materiale, stand og stil i de respektive felter.
Brug Google Search til at verificere priser og finde lignende links.
Returner resultatet som JSON med nøglerne: 'description', 'price', 'priceNew', 'brand', 'type', 'color', 'size', 'material', 'condition', 'style', 'similarLinks'.";

/// User-configurable settings persisted between sessions.
///
/// Settings are stored as JSON in the user's config directory
/// (e.g., `~/.config/snaplist/settings.json` on Linux).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub provider: ProviderKind,
    pub model: String,
    pub language: String,
    pub currency: String,
    /// Prompt template with `{language}` / `{currency}` placeholders.
    #[serde(alias = "customPrompt")]
    pub prompt_template: String,
}

impl Settings {
    /// Returns the path to the settings file.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "snaplist", "snaplist").map(|dirs| {
            let config_dir = dirs.config_dir();
            if !config_dir.exists() {
                let _ = fs::create_dir_all(config_dir);
            }
            config_dir.join("settings.json")
        })
    }

    /// Loads settings from the default location, falling back to defaults.
    pub fn load() -> Self {
        Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    /// Loads settings from `path`. A missing or unreadable file yields the
    /// defaults; a blank template or model is replaced by its default.
    pub fn load_from(path: &Path) -> Self {
        let loaded: Option<Self> = fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok());

        match loaded {
            Some(mut settings) => {
                if settings.model.trim().is_empty() {
                    settings.model = settings.provider.default_model().to_string();
                }
                if settings.prompt_template.trim().is_empty() {
                    settings.prompt_template = DEFAULT_PROMPT_TEMPLATE.to_string();
                }
                settings
            }
            None => Self::default(),
        }
    }

    /// Persists settings to the default location.
    pub fn save(&self) -> Result<()> {
        if let Some(path) = Self::config_path() {
            self.save_to(&path)?;
        }
        Ok(())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Switches provider and picks that provider's first catalogue model.
    pub fn set_provider(&mut self, provider: ProviderKind) {
        self.provider = provider;
        self.model = provider.default_model().to_string();
    }

    /// Restores every field to its default.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Sets a field by its user-facing key.
    ///
    /// # Errors
    /// Returns [`AppError::Config`] for an unknown key or an unsupported
    /// language/currency/provider.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "provider" => self.set_provider(ProviderKind::from_str(value)?),
            "model" => {
                if value.is_empty() {
                    return Err(AppError::config("Model must not be empty"));
                }
                self.model = value.to_string();
            }
            "language" => {
                self.language = pick(LANGUAGES, value)
                    .ok_or_else(|| AppError::config(format!("Unsupported language '{}'", value)))?;
            }
            "currency" => {
                self.currency = pick(CURRENCIES, value)
                    .ok_or_else(|| AppError::config(format!("Unsupported currency '{}'", value)))?;
            }
            "prompt" | "template" => {
                self.prompt_template = if value.is_empty() {
                    DEFAULT_PROMPT_TEMPLATE.to_string()
                } else {
                    value.to_string()
                };
            }
            other => return Err(AppError::config(format!("Unknown setting '{}'", other))),
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenRouter,
            model: DEFAULT_MODEL.to_string(),
            language: "Dansk".to_string(),
            currency: "DKK".to_string(),
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
        }
    }
}

fn pick(options: &[&str], value: &str) -> Option<String> {
    options
        .iter()
        .find(|option| option.eq_ignore_ascii_case(value))
        .map(|option| option.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("nope.json"));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = Settings::default();
        settings.set("currency", "eur").unwrap();
        settings.set("provider", "google").unwrap();
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path);
        assert_eq!(loaded.currency, "EUR");
        assert_eq!(loaded.provider, ProviderKind::Google);
        assert_eq!(loaded.model, ProviderKind::Google.default_model());
    }

    #[test]
    fn corrupt_file_falls_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(Settings::load_from(&path), Settings::default());
    }

    #[test]
    fn rejects_unknown_values() {
        let mut settings = Settings::default();
        assert!(settings.set("currency", "XYZ").is_err());
        assert!(settings.set("colour", "red").is_err());
        assert!(settings.set("provider", "acme").is_err());
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn reset_restores_defaults() {
        let mut settings = Settings::default();
        settings.set("language", "English").unwrap();
        settings.set("prompt", "Describe {language}").unwrap();
        settings.reset();
        assert_eq!(settings, Settings::default());
    }
}
