//! Role-bound model gateway
//!
//! `ModelGateway` holds one `RoleBinding` per `ModelRole`. A call goes to the
//! role's primary provider under the configured timeout; when that provider
//! is unavailable (connection failure or timeout) and the role has a fallback,
//! the fallback is tried with the same timeout.

use std::time::Duration;

use async_trait::async_trait;

use super::{
    ollama::OllamaProvider, openai::OpenAIProvider, Embedding, Gateway, LLMError, LLMProvider,
    Message, ModelRole, Result,
};
use crate::config::{LLMConfig, ProviderKind, RoleConfig};

/// Provider(s) serving one role
pub struct RoleBinding {
    primary: Box<dyn LLMProvider>,
    fallback: Option<Box<dyn LLMProvider>>,
}

impl RoleBinding {
    pub fn new(primary: Box<dyn LLMProvider>) -> Self {
        Self {
            primary,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Box<dyn LLMProvider>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    fn providers(&self) -> impl Iterator<Item = &dyn LLMProvider> {
        std::iter::once(self.primary.as_ref()).chain(self.fallback.as_deref())
    }
}

/// Health of one role's primary provider
#[derive(Debug, Clone, serde::Serialize)]
pub struct RoleHealth {
    pub role: ModelRole,
    pub provider: String,
    pub model: String,
    pub healthy: bool,
}

/// Gateway with exactly one binding per role
pub struct ModelGateway {
    general: RoleBinding,
    coding: RoleBinding,
    reasoning: RoleBinding,
    embedding: RoleBinding,
    timeout: Duration,
}

impl ModelGateway {
    pub fn new(
        general: RoleBinding,
        coding: RoleBinding,
        reasoning: RoleBinding,
        embedding: RoleBinding,
        timeout: Duration,
    ) -> Self {
        Self {
            general,
            coding,
            reasoning,
            embedding,
            timeout,
        }
    }

    /// Build providers for every role from `[llm]` config
    pub fn from_config(config: &LLMConfig) -> Self {
        let bind = |role: &RoleConfig| {
            let make = |model: &str| -> Box<dyn LLMProvider> {
                match role.provider {
                    ProviderKind::Ollama => Box::new(OllamaProvider::new(&config.ollama_url, model)),
                    ProviderKind::OpenAI => Box::new(OpenAIProvider::new(&config.openai, model)),
                }
            };
            let binding = RoleBinding::new(make(&role.model));
            match &role.fallback_model {
                Some(model) => binding.with_fallback(make(model)),
                None => binding,
            }
        };

        Self::new(
            bind(&config.roles.general),
            bind(&config.roles.coding),
            bind(&config.roles.reasoning),
            bind(&config.roles.embedding),
            config.request_timeout(),
        )
    }

    fn binding(&self, role: ModelRole) -> &RoleBinding {
        match role {
            ModelRole::General => &self.general,
            ModelRole::Coding => &self.coding,
            ModelRole::Reasoning => &self.reasoning,
            ModelRole::Embedding => &self.embedding,
        }
    }

    /// Check the primary provider of every role
    pub async fn health(&self) -> Vec<RoleHealth> {
        let mut results = Vec::with_capacity(ModelRole::ALL.len());
        for role in ModelRole::ALL {
            let provider = self.binding(role).primary.as_ref();
            results.push(RoleHealth {
                role,
                provider: provider.name().to_string(),
                model: provider.model().to_string(),
                healthy: provider.check_health().await,
            });
        }
        results
    }
}

#[async_trait]
impl Gateway for ModelGateway {
    async fn invoke(&self, role: ModelRole, messages: &[Message]) -> Result<String> {
        let mut last_err = LLMError::ProviderUnavailable(format!("No provider for {}", role));

        for provider in self.binding(role).providers() {
            tracing::debug!(
                "Invoking {} role via {}/{} (timeout: {}s)",
                role,
                provider.name(),
                provider.model(),
                self.timeout.as_secs()
            );

            let result = tokio::time::timeout(self.timeout, provider.generate(messages)).await;
            let err = match result {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(e)) => e,
                Err(_) => LLMError::Timeout,
            };

            if !err.is_unavailable() {
                return Err(err);
            }
            tracing::warn!(
                "{} role provider {}/{} unavailable: {}",
                role,
                provider.name(),
                provider.model(),
                err
            );
            last_err = err;
        }

        Err(last_err)
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut last_err = LLMError::ProviderUnavailable("No embedding provider".to_string());

        for provider in self.embedding.providers() {
            let result = tokio::time::timeout(self.timeout, provider.embed(text)).await;
            let err = match result {
                Ok(Ok(vector)) => {
                    return Ok(Embedding {
                        model: format!("{}/{}", provider.name(), provider.model()),
                        vector,
                    })
                }
                Ok(Err(e)) => e,
                Err(_) => LLMError::Timeout,
            };

            if !err.is_unavailable() {
                return Err(err);
            }
            last_err = err;
        }

        Err(last_err)
    }
}
