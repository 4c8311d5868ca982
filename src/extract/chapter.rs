//! Reparación textual de los capítulos devueltos por el LLM.
//!
//! No hay parseo estructural: se quitan las barras invertidas que el modelo
//! inserta antes de encabezados, corchetes de enlaces y signos de puntuación,
//! y se garantiza el encabezado numerado del capítulo.
//!
//! Dentro de bloques con valla el contenido se copia byte a byte, salvo en los
//! bloques `mermaid`, donde también se eliminan los escapes.

use super::locate::{fence_closes, fence_open, FenceOpen};

/// Caracteres ante los que una barra invertida se considera un escape espurio.
const STRAY_ESCAPED: &[char] = &[
    '#', '[', ']', '(', ')', '.', '!', '-', ':', ',', ';', '?', '\'', '"',
];

const DIAGRAM_LANGS: &[&str] = &["mermaid"];

pub fn expected_heading(chapter_number: usize, abstraction_name: &str) -> String {
    format!("# Chapter {chapter_number}: {abstraction_name}")
}

/// Devuelve el capítulo limpio y con `# Chapter N: Nombre` como primera línea.
pub fn validate_chapter_content(text: &str, chapter_number: usize, abstraction_name: &str) -> String {
    let unwrapped = unwrap_markdown_fence(text);
    let cleaned = strip_stray_escapes(unwrapped);
    ensure_heading(&cleaned, &expected_heading(chapter_number, abstraction_name))
}

/// Si toda la respuesta viene envuelta en ```` ```markdown ````, devuelve el interior.
fn unwrap_markdown_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some((first, rest)) = trimmed.split_once('\n') else {
        return text;
    };
    let is_markdown_open = fence_open(first)
        .map(|open| open.marker == '`' && matches!(open.lang.as_str(), "markdown" | "md"))
        .unwrap_or(false);
    if !is_markdown_open {
        return text;
    }
    match rest.rsplit_once('\n') {
        Some((inner, last)) if last.trim() == "```" => inner,
        None if rest.trim() == "```" => "",
        _ => text,
    }
}

fn strip_stray_escapes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut fence: Option<FenceOpen> = None;

    for line in text.split_inclusive('\n') {
        let bare = line.trim_end_matches(|c: char| c == '\n' || c == '\r');
        match &fence {
            Some(open) => {
                if fence_closes(open, bare) {
                    fence = None;
                    out.push_str(line);
                } else if DIAGRAM_LANGS.contains(&open.lang.as_str()) {
                    out.push_str(&unescape(line, false));
                } else {
                    out.push_str(line);
                }
            }
            None => {
                if let Some(open) = fence_open(bare) {
                    fence = Some(open);
                    out.push_str(line);
                } else {
                    out.push_str(&unescape(line, true));
                }
            }
        }
    }
    out
}

/// Quita los escapes espurios de una línea. Con `respect_inline_code`, el
/// contenido entre comillas invertidas se deja intacto.
fn unescape(line: &str, respect_inline_code: bool) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    let mut in_code = false;

    while let Some(c) = chars.next() {
        if respect_inline_code && c == '`' {
            in_code = !in_code;
            out.push(c);
            continue;
        }
        if c == '\\' && !in_code {
            match chars.peek() {
                Some('\\') => {
                    out.push('\\');
                    out.push('\\');
                    chars.next();
                    continue;
                }
                Some(next) if STRAY_ESCAPED.contains(next) => continue,
                _ => {}
            }
        }
        out.push(c);
    }
    out
}

fn ensure_heading(text: &str, heading: &str) -> String {
    let body = text.trim_start_matches(|c: char| c == '\n' || c == '\r' || c == ' ' || c == '\t');
    if body.trim().is_empty() {
        return format!("{heading}\n");
    }

    let (first, rest) = match body.split_once('\n') {
        Some((first, rest)) => (first, Some(rest)),
        None => (body, None),
    };

    if first.trim_start().starts_with('#') {
        match rest {
            Some(rest) => format!("{heading}\n{rest}"),
            None => format!("{heading}\n"),
        }
    } else {
        format!("{heading}\n\n{body}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepends_heading_when_missing() {
        let out = validate_chapter_content("Some intro text.\n\nMore.", 3, "Foo");
        assert!(out.starts_with("# Chapter 3: Foo\n\nSome intro text."));
    }

    #[test]
    fn replaces_different_heading_instead_of_duplicating() {
        let out = validate_chapter_content("## Capítulo tres - Foo\nBody line", 3, "Foo");
        assert_eq!(out, "# Chapter 3: Foo\nBody line");
        assert_eq!(out.matches("# Chapter").count(), 1);

        let already = "# Chapter 3: Foo\n\nText";
        assert_eq!(validate_chapter_content(already, 3, "Foo"), already);
    }

    #[test]
    fn escaped_heading_is_recognised_after_cleanup() {
        let out = validate_chapter_content("\\# Chapter 2: Bar\n\nSee \\[Next\\](03_next.md)\\.", 2, "Bar");
        assert_eq!(out, "# Chapter 2: Bar\n\nSee [Next](03_next.md).");
    }

    #[test]
    fn code_fences_pass_through_but_mermaid_is_cleaned() {
        let text = "Intro\\!\n\n```rust\nlet re = \"\\\\d+\\.\";\nprintln!(\"\\(x\\)\");\n```\n\n```mermaid\nflowchart TD\n    A\\[\"Start\"\\] --> B\\(End\\)\n```\nDone\\.\n";
        let out = validate_chapter_content(text, 1, "Intro");
        assert!(out.contains("```rust\nlet re = \"\\\\d+\\.\";\nprintln!(\"\\(x\\)\");\n```"));
        assert!(out.contains("    A[\"Start\"] --> B(End)\n"));
        assert!(out.contains("Intro!"));
        assert!(out.ends_with("Done.\n"));
    }

    #[test]
    fn inline_code_and_double_backslashes_are_preserved() {
        assert_eq!(unescape("use `a\\.b` and C:\\\\dir\\.", true), "use `a\\.b` and C:\\\\dir.");
        assert_eq!(unescape("keep \\* and \\_ escapes", true), "keep \\* and \\_ escapes");
    }

    #[test]
    fn unwraps_whole_response_markdown_fence() {
        let text = "```markdown\n# Chapter 1: X\n\n```python\nx = 1\n```\n```";
        let out = validate_chapter_content(text, 1, "X");
        assert_eq!(out, "# Chapter 1: X\n\n```python\nx = 1\n```");
    }

    #[test]
    fn empty_text_becomes_heading_only() {
        assert_eq!(validate_chapter_content("  \n ", 4, "Y"), "# Chapter 4: Y\n");
    }
}
