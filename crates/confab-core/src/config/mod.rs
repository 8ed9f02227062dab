use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::constants::{endpoints, models, paths, providers};
use crate::context::{Augmenter, HttpContextProvider};
use crate::conversation::{ConversationStore, ThreadPersistence};
use crate::error::{ConfabError, Result};
use crate::llm::{AdapterTable, ProtocolKind, ProviderDescriptor, ProviderRegistry};
use crate::session::GenerationController;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub gateway: GatewaySettings,
    /// Added to, or replacing, the built-in providers by id.
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,
    #[serde(default)]
    pub augmentation: AugmentationSettings,
    #[serde(default)]
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    pub default_provider: String,
    #[serde(default)]
    pub system_prompt: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            default_provider: providers::DEFAULT_PROVIDER.to_string(),
            system_prompt: String::new(),
        }
    }
}

/// A configured provider. Unset fields fall back to the protocol's defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub id: String,
    pub protocol: ProtocolKind,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ProviderEntry {
    pub fn to_descriptor(&self) -> ProviderDescriptor {
        let (base_url, key_env) = match self.protocol {
            ProtocolKind::LineJson => (endpoints::OLLAMA_BASE_URL, ""),
            ProtocolKind::EventStream => {
                (endpoints::GEMINI_BASE_URL, endpoints::GEMINI_API_KEY_ENV)
            }
            ProtocolKind::Native => {
                (endpoints::ANTHROPIC_BASE_URL, endpoints::ANTHROPIC_API_KEY_ENV)
            }
        };

        let mut descriptor = ProviderDescriptor::new(
            &self.id,
            self.protocol,
            &self.model,
            self.base_url.as_deref().unwrap_or(base_url),
        )
        .with_api_key_env(self.api_key_env.as_deref().unwrap_or(key_env));
        if let Some(key) = &self.api_key {
            descriptor = descriptor.with_api_key(key);
        }
        descriptor.max_tokens = self.max_tokens.unwrap_or(models::DEFAULT_MAX_TOKENS);
        descriptor
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AugmentationSettings {
    pub enabled: bool,
    pub endpoint: String,
}

impl Default for AugmentationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: endpoints::CONTEXT_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    pub persist: bool,
    /// Defaults to the platform data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            persist: true,
            path: None,
        }
    }
}

impl Settings {
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(paths::CONFIG_DIR)
            .join(paths::CONFIG_FILE)
    }

    /// Settings from the default location, or defaults when the file is
    /// missing or unreadable.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        if !config_path.exists() {
            return Self::default();
        }
        match Self::load_from(&config_path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring {}: {e}", config_path.display());
                Self::default()
            }
        }
    }

    /// Settings from an explicit file. Errors are reported, not defaulted.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfabError::Config(format!("Failed to read {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| ConfabError::Config(format!("Failed to parse {}: {e}", path.display())))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfabError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Built-in providers overlaid with the configured ones.
    pub fn build_provider_registry(&self) -> Result<ProviderRegistry> {
        let mut registry = ProviderRegistry::builtin();
        for entry in &self.providers {
            debug!("Configured provider {} ({})", entry.id, entry.protocol);
            registry.insert(entry.to_descriptor());
        }
        if !registry.contains(&self.gateway.default_provider) {
            return Err(ConfabError::UnknownProvider(
                self.gateway.default_provider.clone(),
            ));
        }
        registry.set_default_provider(&self.gateway.default_provider);
        Ok(registry)
    }

    pub fn threads_path(&self) -> Result<PathBuf> {
        match &self.storage.path {
            Some(path) => Ok(path.clone()),
            None => ThreadPersistence::default_path(),
        }
    }

    pub fn build_store(&self) -> Result<ConversationStore> {
        if !self.storage.persist {
            return Ok(ConversationStore::new());
        }
        ConversationStore::open(ThreadPersistence::new(self.threads_path()?))
    }

    /// Wire a controller with HTTP adapters sharing one client.
    pub fn build_controller(&self) -> Result<GenerationController> {
        let client = reqwest::Client::new();
        let store = Arc::new(self.build_store()?);
        let registry = self.build_provider_registry()?;

        let adapters = AdapterTable::http(client.clone());
        let controller = GenerationController::new(store, registry, adapters)
            .with_system_prompt(self.gateway.system_prompt.clone());

        let provider = HttpContextProvider::new(client, self.augmentation.endpoint.clone());
        Ok(controller.with_augmenter(
            Augmenter::new(Arc::new(provider)),
            self.augmentation.enabled,
        ))
    }
}
