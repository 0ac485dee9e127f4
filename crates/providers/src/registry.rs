//! Provider selection by slot-scoped provider id.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::adapter::ProviderAdapter;
use crate::gemini::{GeminiAdapter, GeminiConfig};
use crate::gpt_image::{GptImageAdapter, GptImageConfig};
use crate::turbotext::{TurbotextAdapter, TurbotextConfig};

/// The closed set of supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    Gemini,
    Gemini3Pro,
    GptImage15,
    Turbotext,
}

impl ProviderId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Gemini3Pro => "gemini-3-pro",
            Self::GptImage15 => "gpt-image-1.5",
            Self::Turbotext => "turbotext",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "gemini-3-pro" | "gemini-3-pro-image-preview" => Ok(Self::Gemini3Pro),
            "gpt-image-1.5" | "gpt-image-1.5-2025-12-16" => Ok(Self::GptImage15),
            "turbotext" => Ok(Self::Turbotext),
            _ => Err(RegistryError::UnknownProvider(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("provider '{0}' is not configured")]
    NotRegistered(ProviderId),
}

/// Settings for every built-in adapter.
#[derive(Debug, Clone, Default)]
pub struct ProvidersConfig {
    /// Shared by Gemini and Gemini 3 Pro.
    pub gemini: GeminiConfig,
    pub gpt_image: GptImageConfig,
    pub turbotext: TurbotextConfig,
}

impl ProvidersConfig {
    /// Load provider settings from environment variables.
    ///
    /// | Env var                 | Default                                              |
    /// |-------------------------|------------------------------------------------------|
    /// | `GEMINI_API_KEY`        | unset (submits fail)                                 |
    /// | `GEMINI_API_URL`        | `https://generativelanguage.googleapis.com/v1beta`   |
    /// | `OPENAI_API_KEY`        | unset (submits fail)                                 |
    /// | `OPENAI_API_URL`        | `https://api.openai.com/v1/images/edits`             |
    /// | `TURBOTEXT_API_KEY`     | unset (submits fail)                                 |
    /// | `TURBOTEXT_API_URL`     | `https://www.turbotext.ru/api_ai/generate_image2image` |
    /// | `PUBLIC_MEDIA_BASE_URL` | unset (Turbotext payloads fail)                      |
    pub fn from_env() -> Self {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        let gemini_defaults = GeminiConfig::default();
        let gemini = GeminiConfig {
            api_key: non_empty("GEMINI_API_KEY"),
            api_url: non_empty("GEMINI_API_URL").unwrap_or(gemini_defaults.api_url),
            ..gemini_defaults
        };

        let gpt_image_defaults = GptImageConfig::default();
        let gpt_image = GptImageConfig {
            api_key: non_empty("OPENAI_API_KEY"),
            api_url: non_empty("OPENAI_API_URL").unwrap_or(gpt_image_defaults.api_url),
            ..gpt_image_defaults
        };

        let turbotext_defaults = TurbotextConfig::default();
        let turbotext = TurbotextConfig {
            api_key: non_empty("TURBOTEXT_API_KEY"),
            api_url: non_empty("TURBOTEXT_API_URL").unwrap_or(turbotext_defaults.api_url),
            public_media_base_url: non_empty("PUBLIC_MEDIA_BASE_URL"),
            ..turbotext_defaults
        };

        Self {
            gemini,
            gpt_image,
            turbotext,
        }
    }
}

/// Registry of adapters keyed by [`ProviderId`].
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry with every built-in adapter sharing one client.
    pub fn from_config(client: reqwest::Client, config: &ProvidersConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GeminiAdapter::new(
            client.clone(),
            config.gemini.clone(),
        )));
        registry.register(Arc::new(GeminiAdapter::gemini_3_pro(
            client.clone(),
            config.gemini.clone(),
        )));
        registry.register(Arc::new(GptImageAdapter::new(
            client.clone(),
            config.gpt_image.clone(),
        )));
        registry.register(Arc::new(TurbotextAdapter::new(
            client,
            config.turbotext.clone(),
        )));
        registry
    }

    /// Add or replace the adapter for its provider id.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.provider_id(), adapter);
    }

    pub fn get(&self, id: ProviderId) -> Result<Arc<dyn ProviderAdapter>, RegistryError> {
        self.adapters
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotRegistered(id))
    }

    /// Resolve a slot's stored provider id.
    pub fn resolve(&self, provider_id: &str) -> Result<Arc<dyn ProviderAdapter>, RegistryError> {
        self.get(provider_id.parse()?)
    }

    pub fn ids(&self) -> Vec<ProviderId> {
        let mut ids: Vec<_> = self.adapters.keys().copied().collect();
        ids.sort_by_key(|id| id.as_str());
        ids
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::mock::ScriptedProvider;

    // Lets `assert_matches!` print `Result<Arc<dyn ProviderAdapter>, _>` on failure.
    impl std::fmt::Debug for dyn ProviderAdapter {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_tuple("ProviderAdapter").field(&self.provider_id()).finish()
        }
    }

    #[test]
    fn provider_ids_parse_case_insensitively() {
        assert_eq!("Gemini".parse::<ProviderId>().unwrap(), ProviderId::Gemini);
        assert_eq!(" turbotext ".parse::<ProviderId>().unwrap(), ProviderId::Turbotext);
        assert_matches!(
            "dall-e".parse::<ProviderId>(),
            Err(RegistryError::UnknownProvider(_))
        );
    }

    #[test]
    fn model_aliases_resolve_to_their_backend() {
        for (alias, id) in [
            ("gpt-image-1.5", ProviderId::GptImage15),
            ("GPT-Image-1.5-2025-12-16", ProviderId::GptImage15),
            ("gemini-3-pro", ProviderId::Gemini3Pro),
            ("gemini-3-pro-image-preview", ProviderId::Gemini3Pro),
        ] {
            assert_eq!(alias.parse::<ProviderId>().unwrap(), id);
        }
        // Canonical names round-trip.
        for id in [ProviderId::Gemini, ProviderId::Gemini3Pro, ProviderId::GptImage15, ProviderId::Turbotext] {
            assert_eq!(id.as_str().parse::<ProviderId>().unwrap(), id);
        }
    }

    #[test]
    fn resolve_requires_registration() {
        let mut registry = ProviderRegistry::new();
        assert_matches!(
            registry.resolve("gemini"),
            Err(RegistryError::NotRegistered(ProviderId::Gemini))
        );

        registry.register(Arc::new(ScriptedProvider::new(ProviderId::Gemini)));
        let adapter = registry.resolve("gemini").unwrap();
        assert_eq!(adapter.provider_id(), ProviderId::Gemini);
        assert_matches!(registry.resolve("nope"), Err(RegistryError::UnknownProvider(_)));
    }

    #[test]
    fn from_config_registers_every_backend() {
        let registry = ProviderRegistry::from_config(reqwest::Client::new(), &ProvidersConfig::default());
        assert_eq!(
            registry.ids(),
            vec![
                ProviderId::Gemini,
                ProviderId::Gemini3Pro,
                ProviderId::GptImage15,
                ProviderId::Turbotext,
            ]
        );
        let pro = registry.get(ProviderId::Gemini3Pro).unwrap();
        assert_eq!(pro.provider_id(), ProviderId::Gemini3Pro);
    }
}
