use crate::constants::{endpoints, models, providers};
use crate::error::{ConfabError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The wire protocol a provider streams its response with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    /// Newline-delimited JSON objects (Ollama `/api/chat`).
    LineJson,
    /// `data: ` prefixed server-sent events (Gemini `streamGenerateContent`).
    EventStream,
    /// Typed event sequence with its own abort primitive (Anthropic Messages).
    Native,
}

impl ProtocolKind {
    pub fn needs_credential(&self) -> bool {
        !matches!(self, Self::LineJson)
    }
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::LineJson => "line_json",
            Self::EventStream => "event_stream",
            Self::Native => "native",
        };
        write!(f, "{name}")
    }
}

/// Static mapping from a logical model id to how it is reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: String,
    pub protocol: ProtocolKind,
    /// Model name sent on the wire.
    pub model: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key_env: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    models::DEFAULT_MAX_TOKENS
}

impl ProviderDescriptor {
    pub fn new(
        id: impl Into<String>,
        protocol: ProtocolKind,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            protocol,
            model: model.into(),
            base_url: base_url.into(),
            api_key_env: String::new(),
            api_key: None,
            max_tokens: models::DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_api_key_env(mut self, env: impl Into<String>) -> Self {
        self.api_key_env = env.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Resolve the credential for this provider: inline key first, then the
    /// environment variable. Fails when the protocol needs one and none is set.
    pub fn credential(&self) -> Result<Option<String>> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Ok(Some(key.clone()));
        }
        let from_env = if self.api_key_env.is_empty() {
            None
        } else {
            std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
        };
        match from_env {
            Some(key) => Ok(Some(key)),
            None if self.protocol.needs_credential() => Err(ConfabError::Config(format!(
                "provider '{}' needs an API key (set {})",
                self.id,
                if self.api_key_env.is_empty() {
                    "api_key in the config file"
                } else {
                    self.api_key_env.as_str()
                }
            ))),
            None => Ok(None),
        }
    }

    /// Like [`credential`](Self::credential) but for adapters, which only run
    /// after the controller has validated the descriptor.
    pub(crate) fn credential_or_empty(&self) -> String {
        self.credential().ok().flatten().unwrap_or_default()
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// Read-only table of providers, looked up by logical id.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderDescriptor>,
    default_provider: String,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProviderRegistry {
    pub fn empty(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// One provider per protocol.
    pub fn builtin() -> Self {
        let mut registry = Self::empty(providers::DEFAULT_PROVIDER);
        registry.insert(ProviderDescriptor::new(
            providers::LLAMA3,
            ProtocolKind::LineJson,
            models::OLLAMA_LLAMA3,
            endpoints::OLLAMA_BASE_URL,
        ));
        registry.insert(
            ProviderDescriptor::new(
                providers::GEMINI_FLASH,
                ProtocolKind::EventStream,
                models::GEMINI_FLASH,
                endpoints::GEMINI_BASE_URL,
            )
            .with_api_key_env(endpoints::GEMINI_API_KEY_ENV),
        );
        registry.insert(
            ProviderDescriptor::new(
                providers::CLAUDE_SONNET,
                ProtocolKind::Native,
                models::CLAUDE_SONNET,
                endpoints::ANTHROPIC_BASE_URL,
            )
            .with_api_key_env(endpoints::ANTHROPIC_API_KEY_ENV),
        );
        registry
    }

    /// Add or replace a descriptor.
    pub fn insert(&mut self, descriptor: ProviderDescriptor) {
        self.providers.insert(descriptor.id.clone(), descriptor);
    }

    pub fn get(&self, id: &str) -> Result<&ProviderDescriptor> {
        self.providers
            .get(id)
            .ok_or_else(|| ConfabError::UnknownProvider(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    pub fn set_default_provider(&mut self, id: impl Into<String>) {
        self.default_provider = id.into();
    }

    /// Descriptors sorted by id.
    pub fn all(&self) -> Vec<&ProviderDescriptor> {
        let mut all: Vec<_> = self.providers.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_has_one_provider_per_protocol() {
        let registry = ProviderRegistry::builtin();
        assert_eq!(
            registry.get(providers::LLAMA3).unwrap().protocol,
            ProtocolKind::LineJson
        );
        assert_eq!(
            registry.get(providers::GEMINI_FLASH).unwrap().protocol,
            ProtocolKind::EventStream
        );
        assert_eq!(
            registry.get(providers::CLAUDE_SONNET).unwrap().protocol,
            ProtocolKind::Native
        );
        assert_eq!(registry.default_provider(), providers::LLAMA3);
    }

    #[test]
    fn test_unknown_provider_is_an_error() {
        let registry = ProviderRegistry::builtin();
        let err = registry.get("gpt-17").unwrap_err();
        assert!(matches!(err, ConfabError::UnknownProvider(id) if id == "gpt-17"));
    }

    #[test]
    fn test_local_provider_needs_no_credential() {
        let descriptor =
            ProviderDescriptor::new("local", ProtocolKind::LineJson, "m", "http://localhost");
        assert_eq!(descriptor.credential().unwrap(), None);
    }

    #[test]
    fn test_missing_credential_fails_fast() {
        let descriptor =
            ProviderDescriptor::new("remote", ProtocolKind::EventStream, "m", "http://x")
                .with_api_key_env("CONFAB_TEST_KEY_THAT_IS_NEVER_SET");
        let err = descriptor.credential().unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("CONFAB_TEST_KEY_THAT_IS_NEVER_SET"));
    }

    #[test]
    fn test_inline_key_wins() {
        let descriptor = ProviderDescriptor::new("remote", ProtocolKind::Native, "m", "http://x")
            .with_api_key_env("CONFAB_TEST_KEY_THAT_IS_NEVER_SET")
            .with_api_key("sk-inline");
        assert_eq!(descriptor.credential().unwrap().as_deref(), Some("sk-inline"));
    }

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        let descriptor =
            ProviderDescriptor::new("local", ProtocolKind::LineJson, "m", "http://host:1/");
        assert_eq!(descriptor.endpoint("/api/chat"), "http://host:1/api/chat");
    }

    #[test]
    fn test_protocol_kind_serde_names() {
        let json = serde_json::to_string(&ProtocolKind::EventStream).unwrap();
        assert_eq!(json, "\"event_stream\"");
        let parsed: ProtocolKind = serde_json::from_str("\"line_json\"").unwrap();
        assert_eq!(parsed, ProtocolKind::LineJson);
    }
}
