//! # Model clients
//!
//! One capability hides the provider differences: [Complete], an async
//! "system message + user message in, text out" exchange. Three backends
//! implement it:
//!
//! * [Provider::Ollama]: a locally reachable inference server, addressed by
//!   base URL, no credential.
//! * [Provider::OpenAi]: the hosted API, addressed by API key. Temperature is
//!   pinned to zero so repeated runs over the same rows stay comparable.
//! * [Provider::AzureOpenAi]: the enterprise-hosted variant, which additionally
//!   needs an endpoint URL and an API version, and addresses a deployment name
//!   instead of a raw model name.
//!
//! [ModelClient::new] is the factory keyed by the provider tag; it fails closed
//! on missing credentials. No backend retries or catches provider failures: an
//! error during an exchange propagates to the batch strategy and aborts the
//! run.

use async_openai::config::{AzureConfig, OpenAIConfig};
use async_openai::types::{
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::client::errors::{ConfigError, InvocationError};

pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// The recognized provider variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Ollama,
    OpenAi,
    AzureOpenAi,
}

impl Provider {
    /// Parse a provider tag as it appears in configuration. Fails closed on
    /// anything but the three recognized tags.
    pub fn from_tag(tag: &str) -> Result<Self, ConfigError> {
        match tag {
            "ollama" => Ok(Provider::Ollama),
            "openai" => Ok(Provider::OpenAi),
            "azure_openai" => Ok(Provider::AzureOpenAi),
            _ => Err(ConfigError::UnsupportedProvider(tag.to_string())),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Provider::Ollama => "ollama",
            Provider::OpenAi => "openai",
            Provider::AzureOpenAi => "azure_openai",
        }
    }
}

/// Everything the engine needs to construct a model client. Resolving these
/// fields from the provider registry and the environment is the caller's job,
/// see [crate::config].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub provider: Provider,
    /// Model name, or deployment name for the enterprise-hosted variant.
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub api_version: Option<String>,
}

/// The uniform exchange every backend supports.
#[async_trait]
pub trait Complete: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, InvocationError>;
}

/// A constructed model client: a backend plus the identity it was built with.
pub struct ModelClient {
    provider: Provider,
    model: String,
    backend: Box<dyn Complete>,
}

impl std::fmt::Debug for ModelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelClient")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl ModelClient {
    /// Construct the backend for `config.provider`. Fails with a configuration
    /// error when a required credential or endpoint is absent.
    pub fn new(config: &ClientConfig) -> Result<Self, ConfigError> {
        let backend: Box<dyn Complete> = match config.provider {
            Provider::Ollama => {
                let base_url = config.base_url.clone()
                    .unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.to_string());
                Box::new(OllamaBackend {
                    http: reqwest::Client::new(),
                    base_url,
                    model: config.model.clone(),
                })
            }
            Provider::OpenAi => {
                let api_key = require(config, &config.api_key, "api_key")?;
                let openai_config = OpenAIConfig::new().with_api_key(api_key);
                Box::new(OpenAiBackend {
                    client: async_openai::Client::with_config(openai_config),
                    model: config.model.clone(),
                })
            }
            Provider::AzureOpenAi => {
                let api_key = require(config, &config.api_key, "api_key")?;
                let endpoint = require(config, &config.base_url, "base_url")?;
                let api_version = require(config, &config.api_version, "api_version")?;
                let azure_config = AzureConfig::new()
                    .with_api_base(endpoint)
                    .with_api_key(api_key)
                    .with_api_version(api_version)
                    .with_deployment_id(config.model.clone());
                Box::new(AzureBackend {
                    client: async_openai::Client::with_config(azure_config),
                    deployment: config.model.clone(),
                })
            }
        };
        Ok(Self {
            provider: config.provider,
            model: config.model.clone(),
            backend,
        })
    }

    /// Build a client from an already constructed backend. Useful for plugging
    /// in a custom or scripted backend in place of the recognized providers.
    pub fn from_backend(provider: Provider, model: impl Into<String>, backend: Box<dyn Complete>) -> Self {
        Self {
            provider,
            model: model.into(),
            backend,
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn complete(&self, system: &str, user: &str) -> Result<String, InvocationError> {
        self.backend.complete(system, user).await
    }

    /// Wrap an arbitrary error into an invocation error carrying this client's
    /// identity.
    pub(crate) fn invocation_error(&self, source: impl std::error::Error + Send + Sync + 'static) -> InvocationError {
        InvocationError::new(self.provider.tag(), &self.model, source)
    }
}

fn require(config: &ClientConfig, field: &Option<String>, name: &'static str) -> Result<String, ConfigError> {
    field.clone().ok_or(ConfigError::MissingCredential {
        provider: config.provider.tag(),
        field: name,
    })
}

struct OllamaBackend {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
}

#[derive(Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

#[async_trait]
impl Complete for OllamaBackend {
    async fn complete(&self, system: &str, user: &str) -> Result<String, InvocationError> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let request = OllamaChatRequest {
            model: &self.model,
            messages: vec![
                OllamaMessage { role: "system", content: system },
                OllamaMessage { role: "user", content: user },
            ],
            stream: false,
            options: OllamaOptions { temperature: 0.0 },
        };
        let response = self.http.post(&url)
            .json(&request)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| InvocationError::new("ollama", &self.model, e))?;
        let body: OllamaChatResponse = response.json()
            .await
            .map_err(|e| InvocationError::new("ollama", &self.model, e))?;
        Ok(body.message.content)
    }
}

struct OpenAiBackend {
    client: async_openai::Client<OpenAIConfig>,
    model: String,
}

#[async_trait]
impl Complete for OpenAiBackend {
    async fn complete(&self, system: &str, user: &str) -> Result<String, InvocationError> {
        chat_complete(&self.client, "openai", &self.model, system, user).await
    }
}

struct AzureBackend {
    client: async_openai::Client<AzureConfig>,
    deployment: String,
}

#[async_trait]
impl Complete for AzureBackend {
    async fn complete(&self, system: &str, user: &str) -> Result<String, InvocationError> {
        chat_complete(&self.client, "azure_openai", &self.deployment, system, user).await
    }
}

async fn chat_complete<C: async_openai::config::Config>(
    client: &async_openai::Client<C>,
    provider: &'static str,
    model: &str,
    system: &str,
    user: &str,
) -> Result<String, InvocationError> {
    let request = CreateChatCompletionRequestArgs::default()
        .model(model)
        .temperature(0.0)
        .messages([
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()
                .map_err(|e| InvocationError::new(provider, model, e))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user)
                .build()
                .map_err(|e| InvocationError::new(provider, model, e))?
                .into(),
        ])
        .build()
        .map_err(|e| InvocationError::new(provider, model, e))?;
    let response = client.chat()
        .create(request)
        .await
        .map_err(|e| InvocationError::new(provider, model, e))?;
    let content = response.choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content);
    match content {
        Some(text) => Ok(text),
        None => Err(InvocationError::empty_response(provider, model)),
    }
}

pub mod errors {
    use std::error::Error;
    use std::fmt;
    use std::fmt::Formatter;

    /// A provider identifier or credential problem. Surfaced before any
    /// invocation starts.
    #[derive(Debug)]
    pub enum ConfigError {
        UnsupportedProvider(String),
        MissingCredential {
            provider: &'static str,
            field: &'static str,
        },
    }

    impl fmt::Display for ConfigError {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            match self {
                ConfigError::UnsupportedProvider(tag) =>
                    write!(f, "unsupported provider: {}", tag),
                ConfigError::MissingCredential { provider, field } =>
                    write!(f, "provider {} requires {} but none was supplied", provider, field),
            }
        }
    }

    impl Error for ConfigError {}

    /// A failure during one model exchange. Never retried; aborts the run.
    #[derive(Debug)]
    pub struct InvocationError {
        pub provider: &'static str,
        pub model: String,
        source: Option<Box<dyn Error + Send + Sync>>,
    }

    impl InvocationError {
        pub fn new(provider: &'static str, model: impl Into<String>, source: impl Error + Send + Sync + 'static) -> Self {
            InvocationError {
                provider,
                model: model.into(),
                source: Some(Box::new(source)),
            }
        }

        pub(crate) fn empty_response(provider: &'static str, model: impl Into<String>) -> Self {
            InvocationError {
                provider,
                model: model.into(),
                source: None,
            }
        }
    }

    impl fmt::Display for InvocationError {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            match &self.source {
                Some(source) =>
                    write!(f, "invocation failed (provider = {}, model = {}): {}",
                           self.provider, self.model, source),
                None =>
                    write!(f, "invocation returned no content (provider = {}, model = {})",
                           self.provider, self.model),
            }
        }
    }

    impl Error for InvocationError {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            self.source.as_deref().map(|e| e as &(dyn Error + 'static))
        }
    }
}
