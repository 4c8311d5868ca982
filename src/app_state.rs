use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::{
    config::AppConfig,
    github::RemoteRepository,
    llm::TextGenerator,
    pipeline::{Pipeline, PipelineOptions},
    store::ArtifactStore,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub remote: Arc<dyn RemoteRepository>,
    pub llm: Arc<dyn TextGenerator>,
    pub store: ArtifactStore,
    pub status: Arc<Mutex<Status>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl AppState {
    /// Pipeline nuevo para una ejecución, publicando su progreso en `status`.
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(
            self.remote.clone(),
            self.llm.clone(),
            PipelineOptions::from_config(&self.config),
        )
        .with_status(self.status.clone())
    }
}

/// Estado de la ejecución en curso, consultado por la UI.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    pub progress: f32, // Valor entre 0.0 y 1.0
    /// Nombre del último artefacto guardado.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_result: Option<String>,
}

impl Status {
    pub fn idle(message: impl Into<String>) -> Self {
        Self {
            is_busy: false,
            message: message.into(),
            progress: 0.0,
            last_result: None,
        }
    }
}
