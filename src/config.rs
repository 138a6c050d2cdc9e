//! # Provider registry
//!
//! Deployment-specific provider settings live in a YAML file. Non-secret
//! fields (display name, model list, base URL, API version) come from the file
//! directly; secrets (API key, enterprise endpoint) are named indirectly by the
//! environment variable that holds them and resolved at job-construction time.
//!
//! ```yaml
//! llm_providers:
//!   ollama:
//!     display_name: "Ollama (local)"
//!     models: ["llama3.1", "mistral"]
//!     base_url: "http://localhost:11434"
//!   openai:
//!     display_name: "OpenAI"
//!     models: ["gpt-4o-mini", "gpt-4o"]
//!     requires_api_key: true
//!     env_var: "OPENAI_API_KEY"
//!   azure_openai:
//!     display_name: "Azure OpenAI"
//!     models: ["my-gpt4o-deployment"]
//!     requires_api_key: true
//!     env_var: "AZURE_OPENAI_API_KEY"
//!     endpoint_env_var: "AZURE_OPENAI_ENDPOINT"
//!     api_version: "2024-06-01"
//! ```
//!
//! [ProviderRegistry::resolve] turns one entry plus a model name into the
//! [ClientConfig] the engine consumes, failing with a configuration error when
//! a required variable is unset.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use serde::{Deserialize, Serialize};
use crate::client::{ClientConfig, Provider};
use crate::config::errors::RegistryError;

/// One provider entry as it appears in the registry file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    #[serde(default)]
    pub display_name: Option<String>,
    pub models: Vec<String>,
    #[serde(default)]
    pub requires_api_key: bool,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub env_var: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    /// Environment variable holding the enterprise endpoint URL.
    #[serde(default)]
    pub endpoint_env_var: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRegistry {
    llm_providers: BTreeMap<String, ProviderEntry>,
}

impl ProviderRegistry {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, RegistryError> {
        serde_yaml::from_str(yaml).map_err(RegistryError::Parse)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let text = fs::read_to_string(path).map_err(RegistryError::Io)?;
        Self::from_yaml_str(&text)
    }

    /// Provider tags in the registry, in file-independent sorted order.
    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.llm_providers.keys().map(String::as_str)
    }

    pub fn entry(&self, tag: &str) -> Option<&ProviderEntry> {
        self.llm_providers.get(tag)
    }

    /// Display name for a provider tag, falling back to the tag itself.
    pub fn display_name<'a>(&'a self, tag: &'a str) -> &'a str {
        self.entry(tag)
            .and_then(|e| e.display_name.as_deref())
            .unwrap_or(tag)
    }

    /// Models configured for a provider tag.
    pub fn models(&self, tag: &str) -> &[String] {
        self.entry(tag).map(|e| e.models.as_slice()).unwrap_or_default()
    }

    /// Whether the provider's API key is resolvable right now. Providers that
    /// do not require a key always are.
    pub fn api_key_available(&self, tag: &str) -> bool {
        match self.entry(tag) {
            Some(entry) if entry.requires_api_key => {
                entry.env_var.as_deref().map(env_var_set).unwrap_or(false)
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Resolve one provider entry plus a model name into the record the engine
    /// consumes, reading secrets from the environment.
    pub fn resolve(&self, tag: &str, model: &str) -> Result<ClientConfig, RegistryError> {
        let provider = Provider::from_tag(tag).map_err(RegistryError::Config)?;
        let entry = self.entry(tag).ok_or_else(|| RegistryError::UnknownEntry(tag.to_string()))?;

        let api_key = match (entry.requires_api_key, &entry.env_var) {
            (true, Some(var)) => Some(read_env(tag, var)?),
            (true, None) => return Err(RegistryError::MissingEnvVarName(tag.to_string())),
            (false, _) => None,
        };

        // The enterprise variant addresses the API through an endpoint held in
        // the environment; everyone else uses the literal base_url, if any.
        let base_url = match &entry.endpoint_env_var {
            Some(var) => Some(read_env(tag, var)?),
            None => entry.base_url.clone(),
        };

        Ok(ClientConfig {
            provider,
            model: model.to_string(),
            api_key,
            base_url,
            api_version: entry.api_version.clone(),
        })
    }
}

fn env_var_set(var: &str) -> bool {
    env::var(var).map(|v| !v.is_empty()).unwrap_or(false)
}

fn read_env(tag: &str, var: &str) -> Result<String, RegistryError> {
    match env::var(var) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(RegistryError::EnvVarUnset {
            provider: tag.to_string(),
            var: var.to_string(),
        }),
    }
}

pub mod errors {
    use std::error::Error;
    use std::fmt;
    use std::fmt::Formatter;
    use crate::client::errors::ConfigError;

    #[derive(Debug)]
    pub enum RegistryError {
        Io(std::io::Error),
        Parse(serde_yaml::Error),
        /// The tag is recognized by the engine but has no registry entry.
        UnknownEntry(String),
        /// The entry requires an API key but names no environment variable.
        MissingEnvVarName(String),
        /// A named environment variable is unset or empty.
        EnvVarUnset { provider: String, var: String },
        Config(ConfigError),
    }

    impl fmt::Display for RegistryError {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            match self {
                RegistryError::Io(e) => write!(f, "cannot read provider registry: {}", e),
                RegistryError::Parse(e) => write!(f, "cannot parse provider registry: {}", e),
                RegistryError::UnknownEntry(tag) => write!(f, "no registry entry for provider: {}", tag),
                RegistryError::MissingEnvVarName(tag) =>
                    write!(f, "provider {} requires an API key but no env_var is configured", tag),
                RegistryError::EnvVarUnset { provider, var } =>
                    write!(f, "provider {} needs environment variable {} (unset or empty)", provider, var),
                RegistryError::Config(e) => write!(f, "{}", e),
            }
        }
    }

    impl Error for RegistryError {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            match self {
                RegistryError::Io(e) => Some(e),
                RegistryError::Parse(e) => Some(e),
                RegistryError::Config(e) => Some(e),
                _ => None,
            }
        }
    }
}
