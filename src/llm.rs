//! Frontera con el colaborador de generación de texto.
//!
//! El pipeline sólo conoce el trait [`TextGenerator`]; `LlmManager` lo
//! implementa sobre Rig. De momento se implementa OpenAI; Gemini/Ollama quedan
//! preparados para el futuro.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use rig::completion::Prompt;

use crate::config::{AppConfig, LlmProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
        }
    }
}

/// Mensaje etiquetado con su rol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Servicio que recibe mensajes y devuelve texto libre, sin garantías de formato.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, messages: &[ChatMessage], temperature: Option<f64>) -> Result<String>;
}

/// Gestor de LLMs.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub chat_model: String,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        if cfg.llm_provider == LlmProvider::OpenAI && std::env::var("OPENAI_API_KEY").is_err() {
            bail!("Falta OPENAI_API_KEY en el entorno");
        }
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            chat_model: cfg.llm_chat_model.clone(),
        })
    }

    async fn generate_with_openai(
        &self,
        messages: &[ChatMessage],
        temperature: Option<f64>,
    ) -> Result<String> {
        use rig::client::CompletionClient as _;
        use rig::providers::openai;

        let parts = split_messages(messages)?;
        let client = openai::Client::from_env();

        let model_name = if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        };

        let mut builder = client.agent(model_name).preamble(&parts.preamble);
        if !parts.history.is_empty() {
            builder = builder.context(&parts.history);
        }
        if let Some(t) = temperature {
            builder = builder.temperature(t);
        }
        let agent = builder.build();

        let answer = agent.prompt(parts.prompt.as_str()).await?;
        Ok(answer)
    }
}

#[async_trait]
impl TextGenerator for LlmManager {
    async fn generate(&self, messages: &[ChatMessage], temperature: Option<f64>) -> Result<String> {
        match self.provider {
            LlmProvider::OpenAI => self.generate_with_openai(messages, temperature).await,
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado para chat",
                other
            )),
        }
    }
}

/// Mensajes repartidos en lo que Rig espera: preámbulo, contexto y prompt.
#[derive(Debug, PartialEq, Eq)]
struct MessageParts {
    preamble: String,
    history: String,
    prompt: String,
}

/// Los mensajes `system` forman el preámbulo, el último `user` es el prompt y
/// el resto de la conversación se pasa como contexto.
fn split_messages(messages: &[ChatMessage]) -> Result<MessageParts> {
    let last_user = messages
        .iter()
        .rposition(|m| m.role == Role::User)
        .ok_or_else(|| anyhow!("La conversación no contiene ningún mensaje de usuario"))?;

    let preamble = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let history = messages
        .iter()
        .enumerate()
        .filter(|(i, m)| *i != last_user && m.role != Role::System)
        .map(|(_, m)| format!("{}: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    Ok(MessageParts {
        preamble,
        history,
        prompt: messages[last_user].content.clone(),
    })
}
