//! Orquestador del pipeline de cinco etapas:
//! obtener ficheros → identificar abstracciones → analizar relaciones →
//! ordenar capítulos → escribir capítulos.
//!
//! Cada etapa recibe el `PipelineContext` y devuelve uno nuevo. Los fallos del
//! colaborador degradan la etapa a su valor por defecto; sólo un identificador
//! no válido o la ausencia total de ficheros detienen la ejecución.

pub mod analyze;
pub mod context;
pub mod fetch;
pub mod identify;
pub mod order;
pub mod write;

use context::PipelineContext;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::{info, warn};
use uuid::Uuid;

use crate::app_state::Status;
use crate::config::AppConfig;
use crate::error::{FetchError, PipelineError};
use crate::fetcher::RepositoryFetcher;
use crate::github::{parse_repo_identifier, RemoteRepository};
use crate::llm::{ChatMessage, TextGenerator};
use crate::models::PipelineResult;

const BASE_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_EXPONENT: u32 = 5;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub temperature: Option<f64>,
    pub llm_timeout: Duration,
    pub llm_max_retries: usize,
    pub language: String,
    pub fetch_concurrency: usize,
}

impl PipelineOptions {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            temperature: Some(cfg.llm_temperature),
            llm_timeout: cfg.llm_timeout,
            llm_max_retries: cfg.llm_max_retries,
            language: cfg.tutorial_language.clone(),
            fetch_concurrency: cfg.fetch_concurrency,
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            temperature: Some(0.2),
            llm_timeout: Duration::from_secs(180),
            llm_max_retries: 2,
            language: "english".to_string(),
            fetch_concurrency: 8,
        }
    }
}

/// Acceso al colaborador compartido por todas las etapas: aplica el timeout,
/// los reintentos y la temperatura configurados.
pub struct Collaborator<'a> {
    llm: &'a dyn TextGenerator,
    options: &'a PipelineOptions,
}

impl<'a> Collaborator<'a> {
    pub fn new(llm: &'a dyn TextGenerator, options: &'a PipelineOptions) -> Self {
        Self { llm, options }
    }

    pub fn language(&self) -> &str {
        &self.options.language
    }

    pub async fn ask(&self, stage: &str, messages: &[ChatMessage]) -> Result<String> {
        let attempts = self.options.llm_max_retries + 1;
        let mut last_error = anyhow!("sin intentos");

        for attempt in 0..attempts {
            let call = self.llm.generate(messages, self.options.temperature);
            match tokio::time::timeout(self.options.llm_timeout, call).await {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(err)) => {
                    warn!("[{stage}] Intento {} de {attempts} fallido: {err}", attempt + 1);
                    last_error = err;
                }
                Err(_) => {
                    warn!(
                        "[{stage}] Intento {} de {attempts} agotó el tiempo ({:?})",
                        attempt + 1,
                        self.options.llm_timeout
                    );
                    last_error = anyhow!("tiempo de espera agotado tras {:?}", self.options.llm_timeout);
                }
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(backoff(attempt)).await;
            }
        }
        Err(last_error)
    }
}

fn backoff(attempt: usize) -> Duration {
    let exponent = u32::try_from(attempt).unwrap_or(u32::MAX).min(MAX_BACKOFF_EXPONENT);
    Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(exponent))
}

pub struct Pipeline {
    fetcher: RepositoryFetcher,
    llm: Arc<dyn TextGenerator>,
    options: PipelineOptions,
    status: Option<Arc<Mutex<Status>>>,
}

impl Pipeline {
    pub fn new(
        remote: Arc<dyn RemoteRepository>,
        llm: Arc<dyn TextGenerator>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            fetcher: RepositoryFetcher::new(remote, options.fetch_concurrency),
            llm,
            options,
            status: None,
        }
    }

    /// Publica el progreso de cada etapa en el registro compartido.
    pub fn with_status(mut self, status: Arc<Mutex<Status>>) -> Self {
        self.status = Some(status);
        self
    }

    pub async fn run(
        &self,
        identifier: &str,
        branch: Option<&str>,
    ) -> Result<PipelineResult, PipelineError> {
        let repo = parse_repo_identifier(identifier).map_err(|err| match err {
            FetchError::InvalidIdentifier(id) => PipelineError::InvalidIdentifier(id),
            other => PipelineError::FetchFailed(other.to_string()),
        })?;
        let run_id = Uuid::new_v4().to_string();
        info!("Ejecución {run_id}: generando tutorial de {repo}");
        let llm = Collaborator::new(self.llm.as_ref(), &self.options);

        self.publish(&format!("Obteniendo ficheros de {repo}..."), 0.02);
        let ctx = fetch::fetch_files(&self.fetcher, &repo, branch).await?;
        self.publish_latest(&ctx, 0.15);

        let ctx = identify::identify_abstractions(ctx, &llm).await?;
        self.publish_latest(&ctx, 0.35);

        let ctx = analyze::analyze_relationships(ctx, &llm).await?;
        self.publish_latest(&ctx, 0.5);

        let ctx = order::order_chapters(ctx, &llm).await?;
        self.publish_latest(&ctx, 0.6);

        let progress = |written: usize, total: usize| {
            let share = if total == 0 { 1.0 } else { written as f32 / total as f32 };
            self.publish(
                &format!("Escritos {written} de {total} capítulos."),
                0.6 + 0.38 * share,
            );
        };
        let ctx = write::write_chapters(ctx, &llm, &progress).await?;
        self.publish_latest(&ctx, 1.0);

        info!(
            "Ejecución {run_id} completada ({} notas).",
            ctx.notes.len()
        );
        ctx.into_result(run_id)
    }

    fn publish_latest(&self, ctx: &PipelineContext, progress: f32) {
        if let Some(entry) = ctx.narrative.latest() {
            self.publish(entry, progress);
        }
    }

    fn publish(&self, message: &str, progress: f32) {
        let Some(status) = &self.status else {
            return;
        };
        if let Ok(mut status) = status.lock() {
            status.message = message.to_string();
            status.progress = progress.clamp(0.0, 1.0);
        }
    }
}

/// Recorta `text` a `max_chars` caracteres sin partir ningún carácter.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}\n... (truncated)", &text[..cut]),
        None => text.to_string(),
    }
}
