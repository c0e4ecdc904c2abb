use lumen_contracts::settings::{SettingsFile, API_KEY_SETTING};

use crate::config::non_empty_env;

/// Environment variables consulted, in order, before the settings file.
pub const API_KEY_ENV_VARS: [&str; 3] = ["API_KEY", "GEMINI_API_KEY", "GOOGLE_API_KEY"];

/// Resolves the API credential. Called immediately before every provider call.
pub trait CredentialSource: Send + Sync {
    fn api_key(&self) -> Option<String>;
}

/// Host flow for picking or authorizing a credential.
pub trait CredentialSelector: Send + Sync {
    fn has_selected_key(&self) -> bool;
    fn open_select_key(&self) -> anyhow::Result<()>;
}

/// Environment first, then the persisted settings value.
#[derive(Debug, Clone)]
pub struct EnvThenSettings {
    settings: Option<SettingsFile>,
}

impl EnvThenSettings {
    pub fn new(settings: Option<SettingsFile>) -> Self {
        Self { settings }
    }
}

impl CredentialSource for EnvThenSettings {
    fn api_key(&self) -> Option<String> {
        API_KEY_ENV_VARS
            .iter()
            .find_map(|key| non_empty_env(key))
            .or_else(|| {
                self.settings
                    .as_ref()
                    .and_then(|settings| settings.get_string(API_KEY_SETTING))
            })
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticCredential(Option<String>);

impl StaticCredential {
    pub fn new(key: Option<&str>) -> Self {
        Self(
            key.map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
        )
    }
}

impl CredentialSource for StaticCredential {
    fn api_key(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Used when the host has no interactive selection flow.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentialSelector;

impl CredentialSelector for NoCredentialSelector {
    fn has_selected_key(&self) -> bool {
        true
    }

    fn open_select_key(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
