use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Mutex;
use tokio::{spawn, task::JoinError};
use tracing::{error, info, warn};

use crate::{
    app_state::{AppState, Status},
    error::{FetchError, RemoteError},
    fetcher::{RepositoryFetcher, TreeStats},
    github::parse_repo_identifier,
    models::{FileNode, PipelineResult},
};

type ApiError = (StatusCode, Json<serde_json::Value>);

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct RepositoryPayload {
    repository: String,
    #[serde(default)]
    branch: Option<String>,
}

#[derive(Serialize)]
pub struct TreeResponse {
    repository: String,
    branch: String,
    files: usize,
    fetched: usize,
    too_large: usize,
    failed: usize,
    tree: Vec<FileNode>,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/tree", post(tree_handler))
        .route("/api/generate", post(generate_handler))
        .route("/api/status", get(status_handler))
        .route("/api/results", get(list_results_handler))
        .route("/api/results/:name", get(get_result_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn tree_handler(
    State(state): State<AppState>,
    Json(payload): Json<RepositoryPayload>,
) -> Result<Json<TreeResponse>, ApiError> {
    let fetcher = RepositoryFetcher::new(state.remote.clone(), state.config.fetch_concurrency);
    let fetched = fetcher
        .fetch(&payload.repository, payload.branch.as_deref())
        .await
        .map_err(|err| {
            warn!("No se pudo obtener el árbol de {}: {err}", payload.repository);
            (fetch_error_status(&err), Json(json!({ "error": err.to_string() })))
        })?;

    let stats = TreeStats::of(&fetched.tree);
    Ok(Json(TreeResponse {
        repository: fetched.repo.to_string(),
        branch: fetched.branch,
        files: stats.files,
        fetched: stats.fetched,
        too_large: stats.too_large,
        failed: stats.failed,
        tree: fetched.tree,
    }))
}

#[axum::debug_handler]
async fn generate_handler(
    State(state): State<AppState>,
    Json(payload): Json<RepositoryPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = parse_repo_identifier(&payload.repository).map_err(|err| {
        (StatusCode::BAD_REQUEST, Json(json!({ "error": err.to_string() })))
    })?;

    {
        let Ok(mut status) = state.status.lock() else {
            return Err(internal("Estado del servidor no disponible."));
        };
        if status.is_busy {
            return Err((
                StatusCode::CONFLICT,
                Json(json!({ "error": "Ya hay una generación en curso." })),
            ));
        }
        status.is_busy = true;
        status.message = format!("Iniciando la generación del tutorial de {repo}...");
        status.progress = 0.0;
    }

    let identifier = repo.to_string();
    let accepted = json!({ "message": format!("Generación iniciada para {identifier}") });
    let branch = payload.branch;
    spawn(async move {
        let run_state = state.clone();
        let run = spawn(async move {
            match run_state.pipeline().run(&identifier, branch.as_deref()).await {
                Ok(result) => finish_run(&run_state, &result).await,
                Err(err) => {
                    error!("Error en la generación de {identifier}: {err}");
                    (format!("Error en la generación: {err}"), None)
                }
            }
        });
        settle_status(&state.status, run.await);
    });

    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// Persiste el resultado y devuelve el mensaje final y el nombre del artefacto.
async fn finish_run(state: &AppState, result: &PipelineResult) -> (String, Option<String>) {
    match state.store.save(result).await {
        Ok(name) => {
            let mut message = format!(
                "¡Tutorial completado! {} capítulos para {}.",
                result.chapters.len(),
                result.repository
            );
            if let Some(err) = &result.error {
                message.push_str(&format!(" Aviso: {err}"));
            }
            (message, Some(name))
        }
        Err(err) => {
            error!("No se pudo guardar el resultado: {err:#}");
            (format!("Tutorial generado, pero no se pudo guardar: {err}"), None)
        }
    }
}

/// Libera el estado al terminar la ejecución, también si la tarea entró en pánico.
fn settle_status(status: &Mutex<Status>, finished: Result<(String, Option<String>), JoinError>) {
    let (message, saved) = finished.unwrap_or_else(|err| {
        error!("La generación terminó de forma inesperada: {err}");
        (format!("Error en la generación: {err}"), None)
    });

    if let Ok(mut status) = status.lock() {
        status.is_busy = false;
        status.message = message;
        if saved.is_some() {
            status.progress = 1.0;
            status.last_result = saved;
        } else {
            status.progress = 0.0;
        }
    }
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    let status = state
        .status
        .lock()
        .map(|status| status.clone())
        .unwrap_or_default();
    Json(status)
}

#[axum::debug_handler]
async fn list_results_handler(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    state.store.list().await.map(Json).map_err(|err| {
        error!("Error listando resultados: {err:#}");
        internal("No se pudieron listar los resultados.")
    })
}

#[axum::debug_handler]
async fn get_result_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<PipelineResult>, ApiError> {
    state.store.load(&name).await.map(Json).map_err(|err| {
        warn!("No se pudo cargar el resultado '{name}': {err:#}");
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Resultado no disponible: {name}") })),
        )
    })
}

// --- Handler de Apagado y Utilidades ---

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().ok().and_then(|mut s| s.take()) {
        let _ = sender.send(());
    }
    StatusCode::OK
}

fn internal(message: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message })),
    )
}

fn fetch_error_status(err: &FetchError) -> StatusCode {
    match err {
        FetchError::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
        FetchError::RemoteUnavailable(remote) => match remote {
            RemoteError::NotFound(_) => StatusCode::NOT_FOUND,
            RemoteError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            RemoteError::Unauthorized => StatusCode::UNAUTHORIZED,
            RemoteError::Http { .. } | RemoteError::Transport(_) | RemoteError::Decode(_) => {
                StatusCode::BAD_GATEWAY
            }
        },
    }
}
