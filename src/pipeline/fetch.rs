//! Etapa 1: obtener los ficheros del repositorio.
//!
//! Si el repositorio no es accesible, o no deja ningún fichero admisible, se
//! continúa con un conjunto fijo de ficheros de respaldo y se anota el motivo.

use tracing::{info, warn};

use super::context::{Narrative, PipelineContext};
use crate::error::{FetchError, PipelineError};
use crate::fetcher::{flatten_files, RepositoryFetcher, TreeStats};
use crate::github::RepoRef;
use crate::models::FileEntry;

const UNKNOWN_BRANCH: &str = "unknown";

pub async fn fetch_files(
    fetcher: &RepositoryFetcher,
    repo: &RepoRef,
    branch: Option<&str>,
) -> Result<PipelineContext, PipelineError> {
    info!("[fetch] Obteniendo ficheros de {repo}...");
    let requested_branch = branch
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .unwrap_or(UNKNOWN_BRANCH)
        .to_string();

    let (branch, files, error) = match fetcher.fetch_repo(repo, branch).await {
        Ok(fetched) => {
            let stats = TreeStats::of(&fetched.tree);
            let files = flatten_files(&fetched.tree);
            if files.is_empty() {
                warn!("[fetch] {repo} no tiene ficheros admisibles; se usa el conjunto de respaldo.");
                let reason = format!(
                    "No analyzable files found in {repo} ({} files, {} too large, {} failed).",
                    stats.files, stats.too_large, stats.failed
                );
                (fetched.branch, fallback_files(repo, &reason), Some(reason))
            } else {
                info!(
                    "[fetch] {} ficheros analizables ({} demasiado grandes, {} con error).",
                    files.len(),
                    stats.too_large,
                    stats.failed
                );
                (fetched.branch, files, None)
            }
        }
        Err(FetchError::InvalidIdentifier(id)) => return Err(PipelineError::InvalidIdentifier(id)),
        Err(FetchError::RemoteUnavailable(err)) => {
            warn!("[fetch] No se pudo acceder a {repo}: {err}. Se usa el conjunto de respaldo.");
            let reason = format!("Repository {repo} could not be fetched: {err}");
            (requested_branch, fallback_files(repo, &reason), Some(reason))
        }
    };

    if files.is_empty() {
        return Err(PipelineError::FetchFailed(repo.to_string()));
    }

    let entry = match &error {
        Some(_) => format!(
            "Could not read {repo}; continuing with {} placeholder file(s).",
            files.len()
        ),
        None => format!("Fetched {} files from {repo} (branch {branch}).", files.len()),
    };
    let mut ctx = PipelineContext::new(repo.clone(), branch, files);
    ctx.narrative = Narrative::default().with_entry(entry);
    ctx.notes = error.iter().cloned().collect();
    ctx.error = error;
    Ok(ctx)
}

/// Ficheros mínimos con los que el resto del pipeline puede seguir funcionando.
pub fn fallback_files(repo: &RepoRef, reason: &str) -> Vec<FileEntry> {
    vec![FileEntry {
        path: "README.md".to_string(),
        content: format!(
            "# {name}\n\nRepository `{repo}` on GitHub, owned by `{owner}`.\n\n\
             The source files were not available when this tutorial was generated.\n\n\
             > {reason}\n",
            name = repo.name,
            owner = repo.owner,
        ),
    }]
}
