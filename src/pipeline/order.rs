//! Etapa 4: orden pedagógico de los capítulos.

use schemars::JsonSchema;
use tracing::info;

use super::context::PipelineContext;
use super::Collaborator;
use crate::error::PipelineError;
use crate::extract::{parse_chapter_order, repair_order, Extraction, RelationshipAnalysis};
use crate::llm::ChatMessage;
use crate::models::Abstraction;

const SYSTEM_PROMPT: &str = "You design learning paths for software tutorials. \
Answer only with the requested JSON block.";

#[allow(dead_code)]
#[derive(JsonSchema)]
struct ChapterOrderResponse {
    /// Todos los índices de abstracción, cada uno una vez, en orden de lectura.
    chapter_order: Vec<usize>,
}

pub async fn order_chapters(
    ctx: PipelineContext,
    llm: &Collaborator<'_>,
) -> Result<PipelineContext, PipelineError> {
    let abstractions = &ctx.require_abstractions()?.list;
    let analysis = ctx.require_relationships()?;
    info!("[order] Ordenando {} capítulos...", abstractions.len());

    let prompt = build_prompt(&ctx, abstractions, analysis);
    let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)];

    let extraction = match llm.ask("order", &messages).await {
        Ok(raw) => parse_chapter_order(&raw, abstractions.len()),
        Err(err) => Extraction::unavailable(
            repair_order(Vec::new(), abstractions.len()),
            format!("Chapter ordering failed: {err}"),
        ),
    };

    let path = extraction
        .value
        .iter()
        .filter_map(|idx| abstractions.get(*idx))
        .map(|a| a.name.as_str())
        .collect::<Vec<_>>()
        .join(" -> ");
    let entry = format!("Ordered chapters: {path}.");
    info!("[order] {entry}");

    Ok(PipelineContext {
        narrative: ctx.narrative.clone().with_entry(entry),
        notes: ctx.notes_with(extraction.error),
        chapter_order: Some(extraction.value),
        ..ctx
    })
}

fn build_prompt(ctx: &PipelineContext, abstractions: &[Abstraction], analysis: &RelationshipAnalysis) -> String {
    let listing = abstractions
        .iter()
        .enumerate()
        .map(|(i, a)| format!("- {i} # {}", a.name))
        .collect::<Vec<_>>()
        .join("\n");
    let edges = if analysis.relationships.is_empty() {
        "(none)".to_string()
    } else {
        analysis
            .relationships
            .iter()
            .map(|r| {
                let name = |idx: usize| abstractions.get(idx).map(|a| a.name.as_str()).unwrap_or("?");
                format!("- {} ({}) -> {} ({}): {}", r.from, name(r.from), r.to, name(r.to), r.label)
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    let schema = serde_json::to_string_pretty(&schemars::schema_for!(ChapterOrderResponse))
        .unwrap_or_default();

    format!(
        "Repository: {repo}\n\n\
         Progress so far:\n{narrative}\n\n\
         Project summary:\n{summary}\n\n\
         Abstractions:\n{listing}\n\n\
         Relationships:\n{edges}\n\n\
         Decide the best order to explain these abstractions in a tutorial. Start with the most \
         foundational or user-facing concepts and move towards implementation details. \
         Include every index exactly once.\n\n\
         Reply with a single ```json block matching this JSON Schema:\n{schema}\n",
        repo = ctx.repository,
        narrative = ctx.narrative.render(),
        summary = analysis.summary,
    )
}
