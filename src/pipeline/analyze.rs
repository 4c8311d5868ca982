//! Etapa 3: resumen del proyecto y relaciones entre abstracciones.
//!
//! Sólo se envían al modelo los ficheros referenciados por alguna abstracción.

use std::collections::BTreeSet;

use tracing::{info, warn};

use super::context::PipelineContext;
use super::{truncate_chars, Collaborator};
use crate::error::PipelineError;
use crate::extract::{parse_relationships, Extraction, RelationshipAnalysis};
use crate::llm::ChatMessage;
use crate::models::Abstraction;

const PREVIEW_CHARS: usize = 1500;

const SYSTEM_PROMPT: &str = "You are a software architect. Describe how the parts of a codebase interact. \
Answer only with the requested YAML block.";

pub async fn analyze_relationships(
    ctx: PipelineContext,
    llm: &Collaborator<'_>,
) -> Result<PipelineContext, PipelineError> {
    let abstractions = &ctx.require_abstractions()?.list;
    info!("[analyze] Analizando relaciones entre {} abstracciones...", abstractions.len());

    let referenced = referenced_files(abstractions, ctx.files.len());
    let prompt = build_prompt(&ctx, abstractions, &referenced, llm.language());
    let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)];

    let extraction = match llm.ask("analyze", &messages).await {
        Ok(raw) => parse_relationships(&raw, abstractions.len()),
        Err(err) => {
            let reason = format!("Relationship analysis failed: {err}");
            Extraction::unavailable(
                RelationshipAnalysis {
                    summary: format!("Relationship analysis unavailable: {err}"),
                    relationships: Vec::new(),
                },
                reason,
            )
        }
    };

    let isolated: Vec<&str> = abstractions
        .iter()
        .enumerate()
        .filter(|(i, _)| {
            !extraction
                .value
                .relationships
                .iter()
                .any(|r| r.from == *i || r.to == *i)
        })
        .map(|(_, a)| a.name.as_str())
        .collect();
    if abstractions.len() > 1 && !isolated.is_empty() {
        warn!("[analyze] Abstracciones sin relaciones: {}", isolated.join(", "));
    }

    let entry = format!(
        "Mapped {} relationships between {} abstractions.",
        extraction.value.relationships.len(),
        abstractions.len()
    );
    info!("[analyze] {entry}");

    Ok(PipelineContext {
        narrative: ctx.narrative.clone().with_entry(entry),
        notes: ctx.notes_with(extraction.error),
        relationships: Some(extraction.value),
        ..ctx
    })
}

/// Unión ordenada de los índices de fichero de todas las abstracciones.
pub fn referenced_files(abstractions: &[Abstraction], file_count: usize) -> BTreeSet<usize> {
    abstractions
        .iter()
        .flat_map(|a| a.file_indices.iter().copied())
        .filter(|idx| *idx < file_count)
        .collect()
}

fn build_prompt(
    ctx: &PipelineContext,
    abstractions: &[Abstraction],
    referenced: &BTreeSet<usize>,
    language: &str,
) -> String {
    let abstraction_listing = abstractions
        .iter()
        .enumerate()
        .map(|(i, a)| {
            let files = a
                .file_indices
                .iter()
                .map(usize::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            format!("- Index {i}: {} ({})\n  {}\n  Files: [{files}]", a.name, a.category, a.description)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let file_context = referenced
        .iter()
        .filter_map(|idx| ctx.files.get(*idx).map(|f| (idx, f)))
        .map(|(idx, file)| {
            format!("--- File Index {idx}: {} ---\n{}", file.path, truncate_chars(&file.content, PREVIEW_CHARS))
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Repository: {repo}\n\n\
         Progress so far:\n{narrative}\n\n\
         Abstractions:\n{abstraction_listing}\n\n\
         Relevant files:\n{file_context}\n\n\
         Write a short high-level `summary` of the project in {language}, then list the `relationships` \
         between abstractions. Every abstraction should take part in at least one relationship. \
         Use the abstraction indices above and a short text `label` for each relationship.\n\n\
         Reply with a single ```yaml block in exactly this shape:\n\
         ```yaml\n\
         summary: |\n  A few sentences.\n\
         relationships:\n  - from_abstraction: 0 # Name\n    to_abstraction: 1 # Name\n    label: \"Uses\"\n\
         ```\n",
        repo = ctx.repository,
        narrative = ctx.narrative.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::RepoRef;
    use crate::models::{AbstractionsOutput, FileEntry};
    use crate::pipeline::PipelineOptions;
    use crate::test_support::ScriptedGenerator;

    fn abstraction(name: &str, files: &[usize]) -> Abstraction {
        Abstraction {
            name: name.into(),
            description: format!("{name} description"),
            category: "service".into(),
            file_indices: files.to_vec(),
        }
    }

    fn context() -> PipelineContext {
        let repo = RepoRef {
            owner: "o".into(),
            name: "n".into(),
        };
        let files = ["zero.rs", "one.rs", "two.rs"]
            .iter()
            .map(|p| FileEntry {
                path: p.to_string(),
                content: format!("// {p}"),
            })
            .collect();
        PipelineContext {
            abstractions: Some(AbstractionsOutput {
                raw: String::new(),
                list: vec![abstraction("Core", &[0]), abstraction("Edge", &[2, 0])],
            }),
            ..PipelineContext::new(repo, "main".into(), files)
        }
    }

    #[tokio::test]
    async fn only_referenced_files_reach_the_prompt() {
        let llm = ScriptedGenerator::new().reply(
            "summary: Core drives Edge.\nrelationships:\n  - from_abstraction: 0\n    to_abstraction: 1\n    label: Drives\n",
        );
        let options = PipelineOptions {
            llm_max_retries: 0,
            ..PipelineOptions::default()
        };

        let out = analyze_relationships(context(), &Collaborator::new(&llm, &options))
            .await
            .unwrap();

        let prompt = llm.prompt(0);
        assert!(prompt.contains("zero.rs"));
        assert!(prompt.contains("two.rs"));
        assert!(!prompt.contains("one.rs"));
        let analysis = out.require_relationships().unwrap();
        assert_eq!(analysis.summary, "Core drives Edge.");
        assert_eq!(analysis.relationships.len(), 1);
        assert!(out.notes.is_empty());
    }

    #[tokio::test]
    async fn requires_abstractions() {
        let repo = RepoRef {
            owner: "o".into(),
            name: "n".into(),
        };
        let ctx = PipelineContext::new(repo, "main".into(), Vec::new());
        let llm = ScriptedGenerator::new();
        let options = PipelineOptions::default();
        let err = analyze_relationships(ctx, &Collaborator::new(&llm, &options))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingField("abstractions")));
    }

    #[test]
    fn referenced_set_is_a_sorted_union() {
        let list = vec![abstraction("A", &[2, 0]), abstraction("B", &[0, 7])];
        assert_eq!(referenced_files(&list, 3).into_iter().collect::<Vec<_>>(), vec![0, 2]);
    }
}
