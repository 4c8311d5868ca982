//! Etapa 5: escritura secuencial de capítulos.
//!
//! Cada capítulo se escribe con el resumen de los anteriores, que viaja como
//! un valor acumulado (`PreviousChapters`) de una iteración a la siguiente.

use tracing::{info, warn};

use super::context::PipelineContext;
use super::{truncate_chars, Collaborator};
use crate::error::PipelineError;
use crate::extract::{expected_heading, validate_chapter_content};
use crate::llm::ChatMessage;
use crate::models::{Abstraction, Chapter, FileEntry};

/// Caracteres de cada fichero relevante incluidos en el prompt del capítulo.
const SNIPPET_CHARS: usize = 4000;
/// Longitud del resumen condensado que se guarda de cada capítulo escrito.
const SUMMARY_CHARS: usize = 600;

const SYSTEM_PROMPT: &str = "You are an expert technical writer creating beginner-friendly tutorials \
about software projects. Write clear markdown.";

/// Entrada del índice del tutorial, común a todos los prompts de escritura.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ChapterRef {
    number: usize,
    abstraction_index: usize,
    name: String,
    filename: String,
}

/// Resumen acumulado de los capítulos ya escritos.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreviousChapters {
    entries: Vec<String>,
}

impl PreviousChapters {
    pub fn extended(mut self, chapter: &Chapter) -> Self {
        self.entries.push(format!(
            "Chapter {}: {}\n{}",
            chapter.number,
            chapter.title,
            condense(&chapter.content, SUMMARY_CHARS)
        ));
        self
    }

    pub fn render(&self) -> String {
        self.entries.join("\n\n")
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub async fn write_chapters(
    ctx: PipelineContext,
    llm: &Collaborator<'_>,
    progress: &(dyn Fn(usize, usize) + Send + Sync),
) -> Result<PipelineContext, PipelineError> {
    let abstractions = &ctx.require_abstractions()?.list;
    let order = ctx.require_chapter_order()?;
    if order.iter().any(|idx| *idx >= abstractions.len()) {
        return Err(PipelineError::MissingField("chapter_order"));
    }
    info!("[write] Escribiendo {} capítulos...", order.len());

    let listing = chapter_listing(order, abstractions);
    let mut previous = PreviousChapters::default();
    let mut chapters = Vec::with_capacity(listing.len());
    let mut failures = Vec::new();

    for chapter_ref in &listing {
        let abstraction = &abstractions[chapter_ref.abstraction_index];
        let prompt = build_prompt(&ctx, abstraction, chapter_ref, &listing, &previous, llm.language());
        let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)];

        let answer = match llm.ask("write", &messages).await {
            Ok(text) if !text.trim().is_empty() => Ok(text),
            Ok(_) => Err("empty response".to_string()),
            Err(err) => Err(err.to_string()),
        };
        let content = match answer {
            Ok(text) => validate_chapter_content(&text, chapter_ref.number, &chapter_ref.name),
            Err(reason) => {
                warn!("[write] Capítulo {} sin generar: {reason}", chapter_ref.number);
                failures.push(format!("Chapter {} could not be generated: {reason}", chapter_ref.number));
                placeholder(chapter_ref, abstraction, &reason)
            }
        };

        let chapter = Chapter {
            number: chapter_ref.number,
            abstraction_index: chapter_ref.abstraction_index,
            title: chapter_ref.name.clone(),
            filename: chapter_ref.filename.clone(),
            content,
            previous_chapters_summary: previous.render(),
        };
        previous = previous.extended(&chapter);
        chapters.push(chapter);
        progress(chapters.len(), listing.len());
    }

    let entry = format!("Wrote {} chapters ({} placeholders).", chapters.len(), failures.len());
    info!("[write] {entry}");

    let mut notes = ctx.notes.clone();
    notes.extend(failures);
    Ok(PipelineContext {
        narrative: ctx.narrative.clone().with_entry(entry),
        notes,
        chapters: Some(chapters),
        ..ctx
    })
}

fn chapter_listing(order: &[usize], abstractions: &[Abstraction]) -> Vec<ChapterRef> {
    order
        .iter()
        .enumerate()
        .map(|(position, idx)| {
            let number = position + 1;
            let name = abstractions[*idx].name.clone();
            ChapterRef {
                number,
                abstraction_index: *idx,
                filename: chapter_filename(number, &name),
                name,
            }
        })
        .collect()
}

/// `NN_slug.md`, con el slug en minúsculas y `_` como separador.
pub fn chapter_filename(number: usize, name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_end_matches('_');
    let slug = if slug.is_empty() { "chapter" } else { slug };
    format!("{number:02}_{slug}.md")
}

fn build_prompt(
    ctx: &PipelineContext,
    abstraction: &Abstraction,
    chapter: &ChapterRef,
    listing: &[ChapterRef],
    previous: &PreviousChapters,
    language: &str,
) -> String {
    let structure = listing
        .iter()
        .map(|c| format!("{}. [{}]({})", c.number, c.name, c.filename))
        .collect::<Vec<_>>()
        .join("\n");
    let previous_text = if previous.is_empty() {
        "This is the first chapter.".to_string()
    } else {
        previous.render()
    };
    let snippets = relevant_files(abstraction, &ctx.files)
        .map(|file| format!("--- {} ---\n{}", file.path, truncate_chars(&file.content, SNIPPET_CHARS)))
        .collect::<Vec<_>>()
        .join("\n\n");
    let snippets = if snippets.is_empty() {
        "(no specific files)".to_string()
    } else {
        snippets
    };

    format!(
        "Write chapter {number} of a tutorial about the project `{repo}`, in {language}.\n\
         The chapter covers the concept \"{name}\": {description}\n\n\
         Tutorial structure (use these links to refer to other chapters):\n{structure}\n\n\
         Summary of the previous chapters:\n{previous_text}\n\n\
         Relevant code:\n{snippets}\n\n\
         Instructions:\n\
         - Start with the heading `{heading}`.\n\
         - Begin with the problem this concept solves and a concrete use case.\n\
         - Keep code blocks short and explain them step by step.\n\
         - Use ```mermaid diagrams where they help.\n\
         - End with a brief conclusion and a transition to the next chapter.\n\
         Output only the chapter markdown.",
        number = chapter.number,
        repo = ctx.repository,
        name = chapter.name,
        description = abstraction.description,
        heading = expected_heading(chapter.number, &chapter.name),
    )
}

fn relevant_files<'a>(abstraction: &'a Abstraction, files: &'a [FileEntry]) -> impl Iterator<Item = &'a FileEntry> + 'a {
    abstraction.file_indices.iter().filter_map(move |idx| files.get(*idx))
}

/// Capítulo mínimo cuando el colaborador no devuelve texto.
fn placeholder(chapter: &ChapterRef, abstraction: &Abstraction, reason: &str) -> String {
    format!(
        "{heading}\n\n_This chapter could not be generated automatically ({reason})._\n\n{description}\n",
        heading = expected_heading(chapter.number, &chapter.name),
        description = abstraction.description,
    )
}

/// Texto del capítulo sin encabezado ni bloques de código, en una sola línea.
fn condense(content: &str, max_chars: usize) -> String {
    let mut in_fence = false;
    let mut words = Vec::new();
    for line in content.lines().skip(1) {
        if line.trim_start().starts_with("```") || line.trim_start().starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        words.extend(line.split_whitespace());
    }
    let text = words.join(" ");
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text,
    }
}
