//! Provider registry: configured models, vendor metadata and model resolution.
//!
//! The registry owns the validated model list (the failover chain) and one
//! ready-to-call [`LLMProvider`] per entry. The list is read on every turn
//! and written only by model management, so it sits behind an `RwLock`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::info;

use crate::config::{Config, ModelConfig};
use crate::error::{ClawgateError, Result};

use super::openai::{http_client, OpenAICompatProvider, REQUEST_TIMEOUT};
use super::LLMProvider;

/// Metadata describing an LLM vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorSpec {
    /// Vendor prefix used in `vendor/model` strings.
    pub name: &'static str,
    /// OpenAI-compatible base URL used when a model has no `api_base`.
    pub default_api_base: &'static str,
    /// Whether calls need an API key (local servers do not).
    pub requires_api_key: bool,
}

/// Known vendors.
pub const VENDOR_REGISTRY: &[VendorSpec] = &[
    VendorSpec {
        name: "openai",
        default_api_base: "https://api.openai.com/v1",
        requires_api_key: true,
    },
    VendorSpec {
        name: "anthropic",
        default_api_base: "https://api.anthropic.com/v1",
        requires_api_key: true,
    },
    VendorSpec {
        name: "openrouter",
        default_api_base: "https://openrouter.ai/api/v1",
        requires_api_key: true,
    },
    VendorSpec {
        name: "groq",
        default_api_base: "https://api.groq.com/openai/v1",
        requires_api_key: true,
    },
    VendorSpec {
        name: "zhipu",
        default_api_base: "https://open.bigmodel.cn/api/paas/v4",
        requires_api_key: true,
    },
    VendorSpec {
        name: "gemini",
        default_api_base: "https://generativelanguage.googleapis.com/v1beta/openai",
        requires_api_key: true,
    },
    VendorSpec {
        name: "deepseek",
        default_api_base: "https://api.deepseek.com/v1",
        requires_api_key: true,
    },
    VendorSpec {
        name: "mistral",
        default_api_base: "https://api.mistral.ai/v1",
        requires_api_key: true,
    },
    VendorSpec {
        name: "moonshot",
        default_api_base: "https://api.moonshot.cn/v1",
        requires_api_key: true,
    },
    VendorSpec {
        name: "qwen",
        default_api_base: "https://dashscope.aliyuncs.com/compatible-mode/v1",
        requires_api_key: true,
    },
    VendorSpec {
        name: "cerebras",
        default_api_base: "https://api.cerebras.ai/v1",
        requires_api_key: true,
    },
    VendorSpec {
        name: "nvidia",
        default_api_base: "https://integrate.api.nvidia.com/v1",
        requires_api_key: true,
    },
    VendorSpec {
        name: "volcengine",
        default_api_base: "https://ark.cn-beijing.volces.com/api/v3",
        requires_api_key: true,
    },
    VendorSpec {
        name: "ollama",
        default_api_base: "http://localhost:11434/v1",
        requires_api_key: false,
    },
    VendorSpec {
        name: "vllm",
        default_api_base: "http://localhost:8000/v1",
        requires_api_key: false,
    },
];

/// Look up a vendor by its prefix (case-insensitive).
pub fn vendor_spec(name: &str) -> Option<&'static VendorSpec> {
    VENDOR_REGISTRY
        .iter()
        .find(|spec| spec.name.eq_ignore_ascii_case(name))
}

/// Builds an invocable provider for a model entry.
///
/// The gateway uses [`HttpProviderFactory`]; tests plug in scripted providers.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, model: &ModelConfig) -> Result<Arc<dyn LLMProvider>>;
}

/// Factory producing [`OpenAICompatProvider`]s that share one HTTP client.
///
/// Every request is bounded by a timeout so a vendor that never answers
/// fails over like any other error.
pub struct HttpProviderFactory {
    client: reqwest::Client,
}

impl HttpProviderFactory {
    pub fn new() -> Result<Self> {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
        })
    }
}

impl ProviderFactory for HttpProviderFactory {
    fn create(&self, model: &ModelConfig) -> Result<Arc<dyn LLMProvider>> {
        Ok(Arc::new(OpenAICompatProvider::with_client(
            model,
            self.client.clone(),
        )?))
    }
}

/// A configured model together with its provider.
#[derive(Clone)]
pub struct ModelEntry {
    pub config: ModelConfig,
    pub provider: Arc<dyn LLMProvider>,
}

impl std::fmt::Debug for ModelEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelEntry")
            .field("model_name", &self.config.model_name)
            .field("model", &self.config.model)
            .field("provider", &self.provider.name())
            .finish()
    }
}

struct RegistryState {
    models: Vec<ModelEntry>,
    default_model: Option<String>,
}

/// Holds the configured model list and resolves names to providers.
pub struct ProviderRegistry {
    state: RwLock<RegistryState>,
    factory: Arc<dyn ProviderFactory>,
}

impl ProviderRegistry {
    /// Build a registry from a model list.
    ///
    /// Every entry is validated and aliases must be unique. `default_model`
    /// must name one of the entries; when `None` (or empty) the first entry
    /// becomes the default.
    pub fn new(
        models: Vec<ModelConfig>,
        default_model: Option<String>,
        factory: Arc<dyn ProviderFactory>,
    ) -> Result<Self> {
        let state = build_state(models, default_model, factory.as_ref())?;
        info!(
            models = state.models.len(),
            default = state.default_model.as_deref().unwrap_or("-"),
            "Provider registry ready"
        );
        Ok(Self {
            state: RwLock::new(state),
            factory,
        })
    }

    /// Swap in a new model list and default at once.
    ///
    /// Validated like [`new`](Self::new); on error the current list is kept.
    pub async fn replace(
        &self,
        models: Vec<ModelConfig>,
        default_model: Option<String>,
    ) -> Result<()> {
        let next = build_state(models, default_model, self.factory.as_ref())?;
        info!(
            models = next.models.len(),
            default = next.default_model.as_deref().unwrap_or("-"),
            "Model list replaced"
        );
        *self.state.write().await = next;
        Ok(())
    }

    /// Build the registry described by `config`, calling vendors over HTTP.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.model_list.clone(),
            Some(config.agents.defaults.model_name.clone()),
            Arc::new(HttpProviderFactory::new()?),
        )
    }

    /// Resolve an alias or a full `vendor/model` string.
    pub async fn resolve(&self, name: &str) -> Option<ModelEntry> {
        let state = self.state.read().await;
        find_entry(&state.models, name).cloned()
    }

    /// The failover chain for a turn.
    ///
    /// The requested model (or the default) comes first, followed by every
    /// other entry in configured order.
    pub async fn chain(&self, requested: Option<&str>) -> Result<Vec<ModelEntry>> {
        let state = self.state.read().await;
        if state.models.is_empty() {
            return Err(ClawgateError::Config(
                "no models configured in model_list".to_string(),
            ));
        }

        let primary = match requested.or(state.default_model.as_deref()) {
            Some(name) => Some(
                find_entry(&state.models, name)
                    .ok_or_else(|| ClawgateError::NotFound(format!("model '{}'", name)))?
                    .config
                    .model_name
                    .clone(),
            ),
            None => None,
        };

        let mut chain = Vec::with_capacity(state.models.len());
        if let Some(primary) = &primary {
            chain.extend(
                state
                    .models
                    .iter()
                    .filter(|e| &e.config.model_name == primary)
                    .cloned(),
            );
        }
        chain.extend(
            state
                .models
                .iter()
                .filter(|e| Some(&e.config.model_name) != primary.as_ref())
                .cloned(),
        );
        Ok(chain)
    }

    /// Configured models in order.
    pub async fn list(&self) -> Vec<ModelConfig> {
        let state = self.state.read().await;
        state.models.iter().map(|e| e.config.clone()).collect()
    }

    /// The default model alias, if any model is configured.
    pub async fn default_model(&self) -> Option<String> {
        self.state.read().await.default_model.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.models.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Add a model at the end of the chain.
    pub async fn add(&self, model: ModelConfig) -> Result<()> {
        model.validate()?;
        let provider = self.factory.create(&model)?;

        let mut state = self.state.write().await;
        if state
            .models
            .iter()
            .any(|e| e.config.model_name == model.model_name)
        {
            return Err(ClawgateError::Config(format!(
                "model '{}' already exists",
                model.model_name
            )));
        }
        if state.default_model.is_none() {
            state.default_model = Some(model.model_name.clone());
        }
        info!(model_name = %model.model_name, model = %model.model, "Model added");
        state.models.push(ModelEntry {
            config: model,
            provider,
        });
        Ok(())
    }

    /// Remove a model by alias. If it was the default, the first remaining
    /// model becomes the default.
    pub async fn remove(&self, model_name: &str) -> Result<ModelConfig> {
        let mut state = self.state.write().await;
        let idx = state
            .models
            .iter()
            .position(|e| e.config.model_name == model_name)
            .ok_or_else(|| ClawgateError::NotFound(format!("model '{}'", model_name)))?;
        let removed = state.models.remove(idx);

        if state.default_model.as_deref() == Some(model_name) {
            state.default_model = state.models.first().map(|e| e.config.model_name.clone());
        }
        info!(model_name = %model_name, "Model removed");
        Ok(removed.config)
    }

    /// Make `model_name` the default model.
    pub async fn set_default(&self, model_name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let name = find_entry(&state.models, model_name)
            .ok_or_else(|| ClawgateError::NotFound(format!("model '{}'", model_name)))?
            .config
            .model_name
            .clone();
        info!(model_name = %name, "Default model changed");
        state.default_model = Some(name);
        Ok(())
    }
}

fn build_state(
    models: Vec<ModelConfig>,
    default_model: Option<String>,
    factory: &dyn ProviderFactory,
) -> Result<RegistryState> {
    let mut entries: Vec<ModelEntry> = Vec::with_capacity(models.len());
    for model in models {
        model.validate()?;
        if entries
            .iter()
            .any(|e| e.config.model_name == model.model_name)
        {
            return Err(ClawgateError::Config(format!(
                "duplicate model_name '{}' in model_list",
                model.model_name
            )));
        }
        let provider = factory.create(&model)?;
        entries.push(ModelEntry {
            config: model,
            provider,
        });
    }

    let default_model = match default_model.filter(|d| !d.trim().is_empty()) {
        Some(name) => {
            let found = find_entry(&entries, &name).ok_or_else(|| {
                ClawgateError::Config(format!("default model '{}' is not in model_list", name))
            })?;
            Some(found.config.model_name.clone())
        }
        None => entries.first().map(|e| e.config.model_name.clone()),
    };

    Ok(RegistryState {
        models: entries,
        default_model,
    })
}

fn find_entry<'a>(models: &'a [ModelEntry], name: &str) -> Option<&'a ModelEntry> {
    models
        .iter()
        .find(|e| e.config.model_name == name)
        .or_else(|| models.iter().find(|e| e.config.model == name))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::providers::{ChatOptions, LLMResponse, ToolDefinition};
    use crate::session::Message;
    use async_trait::async_trait;

    /// Provider that answers with its own model name.
    pub struct NamedProvider(pub String);

    #[async_trait]
    impl LLMProvider for NamedProvider {
        async fn chat(
            &self,
            _messages: Vec<Message>,
            _tools: Vec<ToolDefinition>,
            _model: Option<&str>,
            _options: ChatOptions,
        ) -> Result<LLMResponse> {
            Ok(LLMResponse::text(&self.0))
        }

        fn default_model(&self) -> &str {
            &self.0
        }

        fn name(&self) -> &str {
            "named"
        }
    }

    pub struct NamedFactory;

    impl ProviderFactory for NamedFactory {
        fn create(&self, model: &ModelConfig) -> Result<Arc<dyn LLMProvider>> {
            Ok(Arc::new(NamedProvider(model.model_name.clone())))
        }
    }

    pub fn model(name: &str, spec: &str) -> ModelConfig {
        ModelConfig::new(name, spec).with_api_key("k")
    }
}
