//! Carga y gestión de configuración de la aplicación (GitHub + LLM + pipeline).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};

const MAX_FETCH_CONCURRENCY: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub open_browser: bool,

    pub llm_provider: LlmProvider,
    pub llm_chat_model: String,
    pub llm_temperature: f64,
    pub llm_timeout: Duration,
    pub llm_max_retries: usize,

    pub github_token: Option<String>,
    pub github_api_url: String,
    pub fetch_concurrency: usize,

    pub output_dir: PathBuf,
    pub tutorial_language: String,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3322".to_string());
        let open_browser = parse_bool(env::var("OPEN_BROWSER").ok().as_deref(), true);

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_chat_model =
            env::var("LLM_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let llm_temperature = match env::var("LLM_TEMPERATURE") {
            Ok(raw) => raw
                .trim()
                .parse::<f64>()
                .map_err(|_| anyhow!("LLM_TEMPERATURE no es un número válido: {raw}"))?,
            Err(_) => 0.2,
        };

        let llm_timeout = Duration::from_secs(parse_number(
            env::var("LLM_TIMEOUT_SECS").ok().as_deref(),
            180,
        ));
        let llm_max_retries = parse_number(env::var("LLM_MAX_RETRIES").ok().as_deref(), 2);

        let github_token = env::var("GITHUB_TOKEN")
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let github_api_url = env::var("GITHUB_API_URL")
            .unwrap_or_else(|_| "https://api.github.com".to_string())
            .trim_end_matches('/')
            .to_string();

        let fetch_concurrency =
            parse_fetch_concurrency(env::var("FETCH_CONCURRENCY").ok().as_deref());

        let output_dir = env::var("OUTPUT_DIR")
            .ok()
            .map(PathBuf::from)
            .unwrap_or_else(default_output_dir);

        let tutorial_language =
            env::var("TUTORIAL_LANGUAGE").unwrap_or_else(|_| "english".to_string());

        Ok(Self {
            server_addr,
            open_browser,
            llm_provider,
            llm_chat_model,
            llm_temperature,
            llm_timeout,
            llm_max_retries,
            github_token,
            github_api_url,
            fetch_concurrency,
            output_dir,
            tutorial_language,
        })
    }
}

fn default_output_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("repo-tutor").join("results"))
        .unwrap_or_else(|| PathBuf::from("output"))
}

fn parse_bool(raw: Option<&str>, default_value: bool) -> bool {
    match raw.map(|v| v.trim().to_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default_value,
    }
}

fn parse_number<T: std::str::FromStr + Copy>(raw: Option<&str>, default_value: T) -> T {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default_value)
}

fn parse_fetch_concurrency(raw: Option<&str>) -> usize {
    parse_number(raw, 8usize).clamp(1, MAX_FETCH_CONCURRENCY)
}
