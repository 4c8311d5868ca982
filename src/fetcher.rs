//! Recorrido recursivo del repositorio remoto, construyendo el árbol de
//! `FileNode` con el contenido de los ficheros admitidos.
//!
//! Sólo la llamada raíz puede abortar el recorrido; cualquier fallo posterior
//! se registra y se convierte en un subárbol vacío o en un marcador de error.

use std::future::Future;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::future::{join_all, BoxFuture, FutureExt};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::{FetchError, RemoteError};
use crate::filter::{is_ignored_dir, should_fetch_content};
use crate::github::{parse_repo_identifier, EntryKind, RemoteEntry, RemoteRepository, RepoRef};
use crate::models::{FileEntry, FileNode};

/// Tamaño máximo (1 MiB) de un fichero cuyo contenido se descarga.
pub const MAX_FILE_SIZE: u64 = 1024 * 1024;

pub const SIZE_EXCEEDED_MARKER: &str = "[Content omitted: file exceeds the 1 MiB size limit]";
pub const FETCH_ERROR_MARKER: &str = "[Content unavailable: the file could not be fetched]";

/// Resultado de intentar obtener el contenido de un único fichero.
#[derive(Debug)]
enum ContentOutcome {
    Fetched(String),
    TooLarge,
    Failed,
    NotEligible,
}

impl ContentOutcome {
    fn into_content(self) -> Option<String> {
        match self {
            ContentOutcome::Fetched(text) => Some(text),
            ContentOutcome::TooLarge => Some(SIZE_EXCEEDED_MARKER.to_string()),
            ContentOutcome::Failed => Some(FETCH_ERROR_MARKER.to_string()),
            ContentOutcome::NotEligible => None,
        }
    }
}

/// Árbol obtenido junto con la rama que finalmente se recorrió.
#[derive(Debug, Clone)]
pub struct FetchedRepository {
    pub repo: RepoRef,
    pub branch: String,
    pub tree: Vec<FileNode>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    pub directories: usize,
    pub files: usize,
    pub fetched: usize,
    pub too_large: usize,
    pub failed: usize,
}

impl TreeStats {
    pub fn of(nodes: &[FileNode]) -> Self {
        let mut stats = TreeStats::default();
        for node in nodes {
            stats.add(node);
        }
        stats
    }

    fn add(&mut self, node: &FileNode) {
        if node.is_dir() {
            self.directories += 1;
            for child in node.children.iter().flatten() {
                self.add(child);
            }
            return;
        }
        self.files += 1;
        match node.content.as_deref() {
            Some(SIZE_EXCEEDED_MARKER) => self.too_large += 1,
            Some(FETCH_ERROR_MARKER) => self.failed += 1,
            Some(_) => self.fetched += 1,
            None => {}
        }
    }
}

pub struct RepositoryFetcher {
    remote: Arc<dyn RemoteRepository>,
    limiter: Arc<Semaphore>,
}

impl RepositoryFetcher {
    /// `concurrency` es el número máximo de peticiones simultáneas a la API.
    pub fn new(remote: Arc<dyn RemoteRepository>, concurrency: usize) -> Self {
        Self {
            remote,
            limiter: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub async fn fetch(
        &self,
        identifier: &str,
        branch: Option<&str>,
    ) -> Result<FetchedRepository, FetchError> {
        let repo = parse_repo_identifier(identifier)?;
        self.fetch_repo(&repo, branch).await
    }

    pub async fn fetch_repo(
        &self,
        repo: &RepoRef,
        branch: Option<&str>,
    ) -> Result<FetchedRepository, FetchError> {
        let branch = match branch.map(str::trim).filter(|b| !b.is_empty()) {
            Some(b) => b.to_string(),
            None => self
                .limited(self.remote.default_branch(repo))
                .await
                .map_err(FetchError::RemoteUnavailable)?,
        };

        info!("Recorriendo {repo}@{branch}...");
        let tree = self
            .walk(repo, &branch, "")
            .await
            .map_err(FetchError::RemoteUnavailable)?;

        let stats = TreeStats::of(&tree);
        info!(
            "Árbol de {repo} obtenido: {} ficheros ({} descargados, {} demasiado grandes, {} con error) en {} directorios.",
            stats.files, stats.fetched, stats.too_large, stats.failed, stats.directories
        );

        Ok(FetchedRepository {
            repo: repo.clone(),
            branch,
            tree,
        })
    }

    async fn limited<T, F>(&self, call: F) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| RemoteError::Transport("limitador de concurrencia cerrado".into()))?;
        call.await
    }

    /// Lista `path` y visita sus entradas en paralelo. El error sólo se
    /// devuelve si falla el listado de `path`.
    fn walk<'a>(
        &'a self,
        repo: &'a RepoRef,
        branch: &'a str,
        path: &'a str,
    ) -> BoxFuture<'a, Result<Vec<FileNode>, RemoteError>> {
        async move {
            let listing = self.limited(self.remote.list(repo, path, branch)).await?;
            let visits = listing
                .into_entries()
                .into_iter()
                .map(|entry| self.visit(repo, branch, entry));
            Ok(join_all(visits).await.into_iter().flatten().collect())
        }
        .boxed()
    }

    async fn visit(&self, repo: &RepoRef, branch: &str, entry: RemoteEntry) -> Option<FileNode> {
        match entry.kind {
            EntryKind::Dir => {
                if is_ignored_dir(&entry.name) {
                    debug!("Directorio ignorado: {}", entry.path);
                    return None;
                }
                let children = match self.walk(repo, branch, &entry.path).await {
                    Ok(children) => children,
                    Err(err) => {
                        warn!("No se pudo listar {}: {err}. Se deja vacío.", entry.path);
                        Vec::new()
                    }
                };
                Some(FileNode::directory(&entry.name, &entry.path, children))
            }
            EntryKind::File | EntryKind::Symlink => {
                let outcome = self.file_outcome(repo, branch, &entry).await;
                Some(FileNode::file(
                    &entry.name,
                    &entry.path,
                    entry.size,
                    outcome.into_content(),
                ))
            }
            EntryKind::Other => {
                debug!("Entrada omitida (tipo no soportado): {}", entry.path);
                None
            }
        }
    }

    async fn file_outcome(&self, repo: &RepoRef, branch: &str, entry: &RemoteEntry) -> ContentOutcome {
        if entry.size >= MAX_FILE_SIZE {
            debug!("{} supera el límite de tamaño ({} bytes).", entry.path, entry.size);
            return ContentOutcome::TooLarge;
        }
        if !should_fetch_content(&entry.path) {
            return ContentOutcome::NotEligible;
        }
        let fetched = self
            .limited(self.remote.file_content(repo, &entry.path, branch))
            .await
            .and_then(|raw| decode_content(&raw.content, raw.encoding.as_deref()));
        match fetched {
            Ok(text) => ContentOutcome::Fetched(text),
            Err(err) => {
                warn!("No se pudo obtener el contenido de {}: {err}", entry.path);
                ContentOutcome::Failed
            }
        }
    }
}

/// Decodifica el contenido devuelto por la API (base64 con saltos de línea o texto plano).
pub fn decode_content(content: &str, encoding: Option<&str>) -> Result<String, RemoteError> {
    match encoding {
        Some(enc) if enc.eq_ignore_ascii_case("base64") => {
            let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
            let bytes = STANDARD
                .decode(compact.as_bytes())
                .map_err(|e| RemoteError::Decode(format!("base64 no válido: {e}")))?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        _ => Ok(content.to_string()),
    }
}

pub fn is_marker(content: &str) -> bool {
    content == SIZE_EXCEEDED_MARKER || content == FETCH_ERROR_MARKER
}

/// Aplana el árbol (en profundidad, en orden de listado) a los pares
/// (ruta, contenido) de los ficheros realmente descargados.
pub fn flatten_files(nodes: &[FileNode]) -> Vec<FileEntry> {
    fn collect(nodes: &[FileNode], out: &mut Vec<FileEntry>) {
        for node in nodes {
            if let Some(children) = &node.children {
                collect(children, out);
            } else if let Some(content) = node.content.as_deref().filter(|c| !is_marker(c)) {
                out.push(FileEntry {
                    path: node.path.clone(),
                    content: content.to_string(),
                });
            }
        }
    }

    let mut out = Vec::new();
    collect(nodes, &mut out);
    out
}
