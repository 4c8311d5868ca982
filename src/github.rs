//! Acceso de sólo lectura a la API de contenidos de GitHub.
//!
//! El fetcher trabaja contra el trait [`RemoteRepository`]; `GithubClient` es
//! la implementación real sobre `reqwest`.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use crate::error::{FetchError, RemoteError};

/// Repositorio identificado como propietario/nombre.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Acepta `owner/name` y URLs completas de GitHub
/// (`https://github.com/owner/name[.git][/tree/...]`).
pub fn parse_repo_identifier(input: &str) -> Result<RepoRef, FetchError> {
    let invalid = || FetchError::InvalidIdentifier(input.to_string());
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(invalid());
    }

    let with_scheme = if trimmed.starts_with("github.com/") || trimmed.starts_with("www.github.com/") {
        Some(format!("https://{trimmed}"))
    } else if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Some(trimmed.to_string())
    } else {
        None
    };

    let (owner, name) = match with_scheme {
        Some(raw_url) => {
            let url = Url::parse(&raw_url).map_err(|_| invalid())?;
            if !matches!(url.host_str(), Some("github.com") | Some("www.github.com")) {
                return Err(invalid());
            }
            let mut segments = url
                .path_segments()
                .ok_or_else(invalid)?
                .filter(|s| !s.is_empty());
            let owner = segments.next().ok_or_else(invalid)?.to_string();
            let name = segments.next().ok_or_else(invalid)?.to_string();
            (owner, name)
        }
        None => {
            let parts: Vec<&str> = trimmed.split('/').collect();
            if parts.len() != 2 {
                return Err(invalid());
            }
            (parts[0].to_string(), parts[1].to_string())
        }
    };

    let name = name.strip_suffix(".git").unwrap_or(&name).to_string();
    if !is_valid_component(&owner) || !is_valid_component(&name) {
        return Err(invalid());
    }
    Ok(RepoRef { owner, name })
}

fn is_valid_component(part: &str) -> bool {
    !part.is_empty()
        && part != "."
        && part != ".."
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    #[serde(other)]
    Other,
}

/// Entrada de un listado de directorio.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub size: u64,
}

/// La API devuelve un objeto cuando la ruta es un fichero y una lista cuando
/// es un directorio.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Listing {
    Many(Vec<RemoteEntry>),
    Single(RemoteEntry),
}

impl Listing {
    pub fn into_entries(self) -> Vec<RemoteEntry> {
        match self {
            Listing::Many(entries) => entries,
            Listing::Single(entry) => vec![entry],
        }
    }
}

/// Contenido de un fichero tal como lo devuelve la API (base64 o plano).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteContent {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepoMetadata {
    default_branch: String,
}

#[async_trait]
pub trait RemoteRepository: Send + Sync {
    async fn default_branch(&self, repo: &RepoRef) -> Result<String, RemoteError>;

    async fn list(&self, repo: &RepoRef, path: &str, branch: &str) -> Result<Listing, RemoteError>;

    async fn file_content(
        &self,
        repo: &RepoRef,
        path: &str,
        branch: &str,
    ) -> Result<RemoteContent, RemoteError>;
}

/// Cliente HTTP para `api.github.com` (o un GitHub Enterprise compatible).
#[derive(Clone)]
pub struct GithubClient {
    client: reqwest::Client,
    base_url: Url,
}

impl GithubClient {
    pub fn new(api_url: &str, token: Option<&str>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("repo-tutor-webapp"));
        if let Some(token) = token {
            let auth = format!("Bearer {}", token.trim());
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth).context("token de GitHub no válido")?,
            );
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()
            .context("no se pudo construir el cliente HTTP de GitHub")?;
        let base_url = Url::parse(api_url)
            .with_context(|| format!("GITHUB_API_URL no es una URL válida: {api_url}"))?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, repo: &RepoRef, tail: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| RemoteError::Transport("URL base de la API no admite rutas".into()))?;
            segments.pop_if_empty();
            segments.extend(["repos", repo.owner.as_str(), repo.name.as_str()]);
            segments.extend(tail.iter().copied().filter(|s| !s.is_empty()));
        }
        Ok(url)
    }

    fn contents_url(&self, repo: &RepoRef, path: &str, branch: &str) -> Result<Url, RemoteError> {
        let mut tail = vec!["contents"];
        tail.extend(path.split('/'));
        let mut url = self.endpoint(repo, &tail)?;
        url.query_pairs_mut().append_pair("ref", branch);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, RemoteError> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<T>()
                .await
                .map_err(|e| RemoteError::Decode(e.to_string()));
        }
        let remaining = header_u64(resp.headers(), "x-ratelimit-remaining");
        let reset = header_u64(resp.headers(), "x-ratelimit-reset");
        let body = resp
            .text()
            .await
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        Err(classify_status(status, remaining, reset, url.path(), body))
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn classify_status(
    status: StatusCode,
    remaining: Option<u64>,
    reset: Option<u64>,
    path: &str,
    body: String,
) -> RemoteError {
    match status {
        StatusCode::NOT_FOUND => RemoteError::NotFound(path.to_string()),
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited { reset },
        StatusCode::FORBIDDEN if remaining == Some(0) => RemoteError::RateLimited { reset },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized,
        other => RemoteError::Http {
            status: other.as_u16(),
            body,
        },
    }
}

#[async_trait]
impl RemoteRepository for GithubClient {
    async fn default_branch(&self, repo: &RepoRef) -> Result<String, RemoteError> {
        let url = self.endpoint(repo, &[])?;
        let meta: RepoMetadata = self.get_json(url).await?;
        Ok(meta.default_branch)
    }

    async fn list(&self, repo: &RepoRef, path: &str, branch: &str) -> Result<Listing, RemoteError> {
        let url = self.contents_url(repo, path, branch)?;
        self.get_json(url).await
    }

    async fn file_content(
        &self,
        repo: &RepoRef,
        path: &str,
        branch: &str,
    ) -> Result<RemoteContent, RemoteError> {
        let url = self.contents_url(repo, path, branch)?;
        self.get_json(url).await
    }
}
