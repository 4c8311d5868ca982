//! Contexto que fluye entre etapas. Cada etapa recibe el contexto completo y
//! devuelve uno nuevo con sus campos añadidos; nunca se modifica uno existente.

use chrono::Utc;

use crate::error::PipelineError;
use crate::extract::RelationshipAnalysis;
use crate::github::RepoRef;
use crate::models::{AbstractionsOutput, Chapter, FileEntry, PipelineResult};

/// Relato acumulado de lo que ha producido cada etapa.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Narrative {
    entries: Vec<String>,
}

impl Narrative {
    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entries.push(entry.into());
        self
    }

    pub fn latest(&self) -> Option<&str> {
        self.entries.last().map(String::as_str)
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, entry)| format!("{}. {entry}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub repository: RepoRef,
    pub branch: String,
    pub files: Vec<FileEntry>,
    pub narrative: Narrative,
    pub error: Option<String>,
    pub notes: Vec<String>,
    pub abstractions: Option<AbstractionsOutput>,
    pub relationships: Option<RelationshipAnalysis>,
    pub chapter_order: Option<Vec<usize>>,
    pub chapters: Option<Vec<Chapter>>,
}

impl PipelineContext {
    pub fn new(repository: RepoRef, branch: String, files: Vec<FileEntry>) -> Self {
        Self {
            repository,
            branch,
            files,
            narrative: Narrative::default(),
            error: None,
            notes: Vec::new(),
            abstractions: None,
            relationships: None,
            chapter_order: None,
            chapters: None,
        }
    }

    pub fn require_files(&self) -> Result<&[FileEntry], PipelineError> {
        if self.files.is_empty() {
            return Err(PipelineError::MissingField("files"));
        }
        Ok(&self.files)
    }

    pub fn require_abstractions(&self) -> Result<&AbstractionsOutput, PipelineError> {
        self.abstractions
            .as_ref()
            .ok_or(PipelineError::MissingField("abstractions"))
    }

    pub fn require_relationships(&self) -> Result<&RelationshipAnalysis, PipelineError> {
        self.relationships
            .as_ref()
            .ok_or(PipelineError::MissingField("relationships"))
    }

    pub fn require_chapter_order(&self) -> Result<&[usize], PipelineError> {
        self.chapter_order
            .as_deref()
            .ok_or(PipelineError::MissingField("chapter_order"))
    }

    pub fn require_chapters(&self) -> Result<&[Chapter], PipelineError> {
        self.chapters
            .as_deref()
            .ok_or(PipelineError::MissingField("chapters"))
    }

    /// Notas acumuladas más una nueva, para construir el siguiente contexto.
    pub fn notes_with(&self, note: Option<String>) -> Vec<String> {
        let mut notes = self.notes.clone();
        notes.extend(note);
        notes
    }

    pub fn into_result(self, run_id: String) -> Result<PipelineResult, PipelineError> {
        let abstractions = self.require_abstractions()?.clone();
        let relationships = self.require_relationships()?.clone();
        let chapter_order = self.require_chapter_order()?.to_vec();
        let chapters = self
            .require_chapters()?
            .iter()
            .map(|chapter| chapter.content.clone())
            .collect();
        let abstractions_list = abstractions.list.iter().map(|a| a.name.clone()).collect();

        Ok(PipelineResult {
            run_id,
            repository: self.repository.to_string(),
            branch: self.branch,
            generated_at: Utc::now().to_rfc3339(),
            abstractions,
            abstractions_list,
            relationship_summary: relationships.summary,
            relationships: relationships.relationships,
            chapter_order,
            chapters,
            files_data: self.files,
            error: self.error,
            notes: self.notes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RepoRef {
        RepoRef {
            owner: "o".into(),
            name: "n".into(),
        }
    }

    #[test]
    fn narrative_accumulates_in_order() {
        let narrative = Narrative::default()
            .with_entry("fetched")
            .with_entry("identified");
        assert_eq!(narrative.latest(), Some("identified"));
        assert_eq!(narrative.render(), "1. fetched\n2. identified");
    }

    #[test]
    fn missing_fields_are_contract_errors() {
        let ctx = PipelineContext::new(repo(), "main".into(), Vec::new());
        assert!(matches!(ctx.require_files(), Err(PipelineError::MissingField("files"))));
        assert!(matches!(
            ctx.require_abstractions(),
            Err(PipelineError::MissingField("abstractions"))
        ));
        assert!(matches!(
            ctx.into_result("r".into()),
            Err(PipelineError::MissingField("abstractions"))
        ));
    }
}
