//! Dobles en memoria de la API remota y del colaborador LLM para los tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::error::RemoteError;
use crate::github::{EntryKind, Listing, RemoteContent, RemoteEntry, RemoteRepository, RepoRef};
use crate::llm::{ChatMessage, TextGenerator};

pub struct FakeRemote {
    default_branch: Result<String, RemoteError>,
    listings: HashMap<String, Result<Listing, RemoteError>>,
    contents: HashMap<String, Result<RemoteContent, RemoteError>>,
    latency: Option<Duration>,
    content_calls: Mutex<Vec<String>>,
    listed: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeRemote {
    pub fn new(default_branch: &str) -> Self {
        Self {
            default_branch: Ok(default_branch.to_string()),
            listings: HashMap::new(),
            contents: HashMap::new(),
            latency: None,
            content_calls: Mutex::new(Vec::new()),
            listed: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// `entries` son tuplas (ruta, tipo, tamaño); el tipo es `"file"` o `"dir"`.
    pub fn dir(mut self, path: &str, entries: &[(&str, &str, u64)]) -> Self {
        let entries = entries
            .iter()
            .map(|(entry_path, kind, size)| RemoteEntry {
                name: entry_path.rsplit('/').next().unwrap_or(entry_path).to_string(),
                path: entry_path.to_string(),
                kind: match *kind {
                    "dir" => EntryKind::Dir,
                    "file" => EntryKind::File,
                    "symlink" => EntryKind::Symlink,
                    _ => EntryKind::Other,
                },
                size: *size,
            })
            .collect();
        self.listings.insert(path.to_string(), Ok(Listing::Many(entries)));
        self
    }

    pub fn failing_dir(mut self, path: &str, err: RemoteError) -> Self {
        self.listings.insert(path.to_string(), Err(err));
        self
    }

    pub fn failing_default_branch(mut self, err: RemoteError) -> Self {
        self.default_branch = Err(err);
        self
    }

    pub fn file(mut self, path: &str, content: &str) -> Self {
        self.contents.insert(
            path.to_string(),
            Ok(RemoteContent {
                content: content.to_string(),
                encoding: None,
            }),
        );
        self
    }

    pub fn failing_file(mut self, path: &str, err: RemoteError) -> Self {
        self.contents.insert(path.to_string(), Err(err));
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn content_calls(&self) -> Vec<String> {
        let mut calls = self.content_calls.lock().unwrap().clone();
        calls.sort();
        calls
    }

    pub fn listed_paths(&self) -> Vec<String> {
        let mut listed = self.listed.lock().unwrap().clone();
        listed.sort();
        listed
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn simulate_request(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteRepository for FakeRemote {
    async fn default_branch(&self, _repo: &RepoRef) -> Result<String, RemoteError> {
        self.default_branch.clone()
    }

    async fn list(&self, _repo: &RepoRef, path: &str, _branch: &str) -> Result<Listing, RemoteError> {
        self.listed.lock().unwrap().push(path.to_string());
        self.simulate_request().await;
        self.listings
            .get(path)
            .cloned()
            .unwrap_or_else(|| Err(RemoteError::NotFound(path.to_string())))
    }

    async fn file_content(
        &self,
        _repo: &RepoRef,
        path: &str,
        _branch: &str,
    ) -> Result<RemoteContent, RemoteError> {
        self.content_calls.lock().unwrap().push(path.to_string());
        self.simulate_request().await;
        self.contents
            .get(path)
            .cloned()
            .unwrap_or_else(|| Err(RemoteError::NotFound(path.to_string())))
    }
}

/// Colaborador que devuelve respuestas pregrabadas en orden y guarda las
/// conversaciones recibidas.
#[derive(Default)]
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, text: &str) -> Self {
        self.responses.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub fn fail(self, message: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }

    /// Último mensaje de usuario de la llamada `index`.
    pub fn prompt(&self, index: usize) -> String {
        self.calls()[index]
            .iter()
            .rev()
            .find(|m| m.role == crate::llm::Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, messages: &[ChatMessage], _temperature: Option<f64>) -> Result<String> {
        self.calls.lock().unwrap().push(messages.to_vec());
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("sin respuestas pregrabadas")),
        }
    }
}
