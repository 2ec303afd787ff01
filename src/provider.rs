//! Abstracción sobre Rig para invocar los LLM alojados.
//!
//! Todos los modelos configurados se sirven a través de OpenRouter; cada
//! uno lleva su propia clave de API. El contrato es uniforme: prompt de
//! sistema + mensaje del usuario → texto crudo.

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::ModelDefinition;

/// Adaptador uniforme sobre un proveedor LLM alojado.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn invoke(
        &self,
        model: &ModelDefinition,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<String>;
}

/// Implementación real contra OpenRouter vía Rig.
pub struct OpenRouterProvider;

#[async_trait]
impl CompletionProvider for OpenRouterProvider {
    async fn invoke(
        &self,
        model: &ModelDefinition,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<String> {
        use rig::client::CompletionClient as _;
        use rig::completion::Prompt;
        use rig::providers::openrouter;

        let api_key = model.api_key.as_deref().ok_or_else(|| {
            anyhow!("La clave de API del modelo '{}' no está configurada", model.id)
        })?;

        let client = openrouter::Client::new(api_key);
        let agent = client
            .agent(&model.full_name)
            .preamble(system_prompt)
            .build();

        let answer = agent.prompt(user_message).await?;
        Ok(answer)
    }
}
