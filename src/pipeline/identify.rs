//! Etapa 2: identificar las abstracciones principales del repositorio.

use tracing::{info, warn};

use super::context::PipelineContext;
use super::{truncate_chars, Collaborator};
use crate::error::PipelineError;
use crate::extract::abstractions::response_schema;
use crate::extract::{default_abstractions, parse_abstractions, Extraction};
use crate::llm::ChatMessage;
use crate::models::{AbstractionsOutput, FileEntry};

/// Caracteres de cada fichero que se muestran al modelo.
pub const PREVIEW_CHARS: usize = 1500;

const SYSTEM_PROMPT: &str = "You are a senior software engineer who explains codebases to newcomers. \
Answer only with the requested structured block.";

pub async fn identify_abstractions(
    ctx: PipelineContext,
    llm: &Collaborator<'_>,
) -> Result<PipelineContext, PipelineError> {
    let files = ctx.require_files()?;
    info!("[identify] Identificando abstracciones en {} ficheros...", files.len());

    let prompt = build_prompt(&ctx, files, llm.language());
    let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)];

    let (raw, extraction) = match llm.ask("identify", &messages).await {
        Ok(raw) => {
            let extraction = parse_abstractions(&raw, files.len());
            (raw, extraction)
        }
        Err(err) => (
            String::new(),
            Extraction::unavailable(
                default_abstractions(files.len()),
                format!("Abstraction identification failed: {err}"),
            ),
        ),
    };

    if extraction.is_fallback() {
        info!("[identify] Se continúa con las abstracciones por defecto.");
    }
    for abstraction in extraction.value.iter().filter(|a| a.file_indices.is_empty()) {
        warn!(
            "[identify] La abstracción '{}' no tiene ficheros asociados; se conserva.",
            abstraction.name
        );
    }

    let names: Vec<&str> = extraction.value.iter().map(|a| a.name.as_str()).collect();
    let entry = format!(
        "Identified {} abstractions: {}.",
        names.len(),
        names.join(", ")
    );
    info!("[identify] {entry}");

    Ok(PipelineContext {
        narrative: ctx.narrative.clone().with_entry(entry),
        notes: ctx.notes_with(extraction.error),
        abstractions: Some(AbstractionsOutput {
            raw,
            list: extraction.value,
        }),
        ..ctx
    })
}

fn build_prompt(ctx: &PipelineContext, files: &[FileEntry], language: &str) -> String {
    let listing = files
        .iter()
        .enumerate()
        .map(|(i, file)| format!("--- File Index {i}: {} ---\n{}", file.path, truncate_chars(&file.content, PREVIEW_CHARS)))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Repository: {repo}\n\n\
         Progress so far:\n{narrative}\n\n\
         Source files:\n{listing}\n\n\
         Identify the 5 to 10 most important abstractions a newcomer must understand to work on this codebase.\n\
         For each one give a short `name`, a beginner-friendly `description` with a simple analogy, \
         a `category` (service, model, utility, config, interface...) and the `file_indices` of the relevant files \
         (0 to {last}). Write names and descriptions in {language}.\n\n\
         Reply with a single ```json block matching this JSON Schema:\n{schema}\n",
        repo = ctx.repository,
        narrative = ctx.narrative.render(),
        last = files.len().saturating_sub(1),
        schema = response_schema(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::RepoRef;
    use crate::pipeline::PipelineOptions;
    use crate::test_support::ScriptedGenerator;

    fn context(files: Vec<FileEntry>) -> PipelineContext {
        let repo = RepoRef {
            owner: "o".into(),
            name: "n".into(),
        };
        PipelineContext::new(repo, "main".into(), files)
    }

    fn options() -> PipelineOptions {
        PipelineOptions {
            llm_max_retries: 0,
            ..PipelineOptions::default()
        }
    }

    #[tokio::test]
    async fn previews_are_truncated_and_indexed() {
        let long = "x".repeat(PREVIEW_CHARS + 500);
        let ctx = context(vec![
            FileEntry { path: "a.rs".into(), content: long },
            FileEntry { path: "b.rs".into(), content: "short".into() },
        ]);
        let llm = ScriptedGenerator::new().reply("[]");
        let options = options();

        let out = identify_abstractions(ctx, &Collaborator::new(&llm, &options)).await.unwrap();

        let prompt = llm.prompt(0);
        assert!(prompt.contains("--- File Index 0: a.rs ---"));
        assert!(prompt.contains("--- File Index 1: b.rs ---"));
        assert!(prompt.contains(&"x".repeat(PREVIEW_CHARS)));
        assert!(!prompt.contains(&"x".repeat(PREVIEW_CHARS + 1)));
        assert!(prompt.contains("\"file_indices\""));
        // "[]" no tiene registros utilizables
        assert_eq!(out.notes.len(), 1);
        assert_eq!(out.require_abstractions().unwrap().list[0].name, "Project Overview");
    }

    #[tokio::test]
    async fn keeps_zero_file_abstractions_and_raw_text() {
        let raw = r#"{"abstractions":[{"name":"Orphan","description":"d","category":"misc","file_indices":[9]}]}"#;
        let ctx = context(vec![FileEntry { path: "a.rs".into(), content: "fn a() {}".into() }]);
        let llm = ScriptedGenerator::new().reply(raw);
        let options = options();

        let out = identify_abstractions(ctx, &Collaborator::new(&llm, &options)).await.unwrap();

        let abstractions = out.require_abstractions().unwrap();
        assert_eq!(abstractions.raw, raw);
        assert_eq!(abstractions.list.len(), 1);
        assert!(abstractions.list[0].file_indices.is_empty());
        assert!(out.notes.is_empty());
        assert_eq!(out.narrative.latest(), Some("Identified 1 abstractions: Orphan."));
    }

    #[tokio::test]
    async fn empty_file_list_is_a_contract_error() {
        let llm = ScriptedGenerator::new();
        let options = options();
        let err = identify_abstractions(context(Vec::new()), &Collaborator::new(&llm, &options))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingField("files")));
        assert!(llm.calls().is_empty());
    }
}
