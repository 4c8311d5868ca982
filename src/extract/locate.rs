//! Fase de localización: encontrar el fragmento estructurado dentro de la
//! respuesta del LLM (bloque con valla etiquetado o fragmento crudo).

use serde_json::Value;
use tracing::debug;

use crate::error::ExtractionError;

/// Bloque de código delimitado por vallas (```` ``` ```` o `~~~`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FencedBlock {
    pub lang: String,
    pub body: String,
}

/// Apertura de valla: carácter, longitud y etiqueta de lenguaje.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FenceOpen {
    pub marker: char,
    pub len: usize,
    pub lang: String,
}

/// Reconoce una línea de apertura de valla (hasta tres espacios de sangría).
pub(crate) fn fence_open(line: &str) -> Option<FenceOpen> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let rest = line.trim_start_matches(' ');
    let marker = rest.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let len = rest.chars().take_while(|c| *c == marker).count();
    if len < 3 {
        return None;
    }
    let info = rest[len..].trim();
    if marker == '`' && info.contains('`') {
        return None;
    }
    let lang = info
        .split(|c: char| c.is_whitespace() || c == '{')
        .next()
        .unwrap_or("")
        .to_lowercase();
    Some(FenceOpen { marker, len, lang })
}

/// `true` si `line` cierra la valla abierta por `open`.
pub(crate) fn fence_closes(open: &FenceOpen, line: &str) -> bool {
    let trimmed = line.trim();
    let len = trimmed.chars().take_while(|c| *c == open.marker).count();
    len >= open.len && trimmed.chars().all(|c| c == open.marker)
}

/// Todos los bloques con valla del texto, en orden. Un bloque sin cerrar se
/// extiende hasta el final (respuestas truncadas).
pub fn fenced_blocks(text: &str) -> Vec<FencedBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<(FenceOpen, Vec<&str>)> = None;

    for line in text.lines() {
        match current.as_mut() {
            Some((open, body)) => {
                if fence_closes(open, line) {
                    if let Some((open, body)) = current.take() {
                        blocks.push(FencedBlock {
                            lang: open.lang,
                            body: body.join("\n"),
                        });
                    }
                } else {
                    body.push(line);
                }
            }
            None => {
                if let Some(open) = fence_open(line) {
                    current = Some((open, Vec::new()));
                }
            }
        }
    }
    if let Some((open, body)) = current {
        blocks.push(FencedBlock {
            lang: open.lang,
            body: body.join("\n"),
        });
    }
    blocks
}

/// Primer bloque cuya etiqueta coincide con alguna de `langs`.
pub fn find_fenced_block(text: &str, langs: &[&str]) -> Option<String> {
    fenced_blocks(text)
        .into_iter()
        .find(|block| langs.iter().any(|lang| block.lang == *lang))
        .map(|block| block.body)
}

/// Fragmento entre el primer `open` y su cierre equilibrado, ignorando los
/// delimitadores dentro de cadenas JSON. Si no llega a equilibrarse se usa el
/// último `close` del texto.
pub fn find_balanced(text: &str, open: char, close: char) -> Option<&str> {
    balanced_at(text, text.find(open)?, open, close)
}

fn balanced_at(text: &str, start: usize, open: char, close: char) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..end + close.len_utf8()])
}

/// Localiza y decodifica una carga JSON: bloque ```` ```json ````, bloque sin
/// etiqueta que empieza por `{`/`[`, o fragmento crudo. Entre los fragmentos
/// crudos manda el primer `{`, salvo que quede dentro de una lista abierta
/// antes; si el preferido no decodifica se prueba el otro.
pub fn decode_json(text: &str) -> Result<Value, ExtractionError> {
    let blocks = fenced_blocks(text);
    let fenced = blocks
        .iter()
        .find(|b| b.lang == "json" || b.lang == "jsonc")
        .or_else(|| {
            blocks.iter().find(|b| {
                let body = b.body.trim_start();
                b.lang.is_empty() && (body.starts_with('{') || body.starts_with('['))
            })
        });
    if let Some(block) = fenced {
        return serde_json::from_str(&block.body).map_err(|e| ExtractionError::Decode(e.to_string()));
    }

    let object = text.find('{').and_then(|at| Some((at, balanced_at(text, at, '{', '}')?)));
    let array = text.find('[').and_then(|at| Some((at, balanced_at(text, at, '[', ']')?)));
    let candidates = match (object, array) {
        (Some((o, obj)), Some((a, arr))) if a < o && a + arr.len() > o => vec![arr, obj],
        (Some((_, obj)), Some((_, arr))) => vec![obj, arr],
        (Some((_, obj)), None) => vec![obj],
        (None, Some((_, arr))) => vec![arr],
        (None, None) => return Err(ExtractionError::NoStructuredBlockFound("json")),
    };

    let mut first_error = None;
    for fragment in candidates {
        match serde_json::from_str(fragment) {
            Ok(value) => return Ok(value),
            Err(err) => {
                debug!("Fragmento JSON descartado: {err}");
                first_error.get_or_insert(err.to_string());
            }
        }
    }
    Err(ExtractionError::Decode(first_error.unwrap_or_default()))
}

/// Texto desde la primera línea que empieza por alguna de las claves `keys`.
pub fn find_key_line<'a>(text: &'a str, keys: &[&str]) -> Option<&'a str> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if keys.iter().any(|key| line.starts_with(key)) {
            return Some(&text[offset..]);
        }
        offset += line.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn finds_labelled_fenced_block_among_commentary() {
        let text = "Claro, aquí está:\n```python\nprint(1)\n```\n\n```json\n{\"a\": 1}\n```\nEspero que sirva.";
        assert_eq!(find_fenced_block(text, &["json"]).as_deref(), Some("{\"a\": 1}"));
        assert_eq!(find_fenced_block(text, &["yaml"]), None);
    }

    #[test]
    fn unterminated_fence_extends_to_end() {
        let blocks = fenced_blocks("```yaml\nsummary: x\nrelationships:");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].lang, "yaml");
        assert_eq!(blocks[0].body, "summary: x\nrelationships:");
    }

    #[test]
    fn balanced_fragment_ignores_braces_inside_strings() {
        let text = r#"Result: {"name": "a } b", "inner": {"x": 1}} trailing } noise"#;
        assert_eq!(
            find_balanced(text, '{', '}'),
            Some(r#"{"name": "a } b", "inner": {"x": 1}}"#)
        );
    }

    #[test]
    fn unbalanced_fragment_falls_back_to_last_brace() {
        assert_eq!(find_balanced("{ { }", '{', '}'), Some("{ { }"));
        assert_eq!(find_balanced("no braces", '{', '}'), None);
    }

    #[test]
    fn decode_json_prefers_fence_then_raw_fragment() {
        // una valla en mitad de línea no abre bloque
        assert_eq!(decode_json("texto ```json\n[1]\n``` más").unwrap(), json!([1]));
        assert_eq!(decode_json("```json\n{\"a\":1}\n```").unwrap(), json!({"a": 1}));
        assert_eq!(decode_json("intro {\"a\": [1, 2]} fin").unwrap(), json!({"a": [1, 2]}));
        assert_eq!(decode_json("orden: [2, 0, 1].").unwrap(), json!([2, 0, 1]));
        assert_eq!(
            decode_json("sin estructura").unwrap_err(),
            ExtractionError::NoStructuredBlockFound("json")
        );
    }

    #[test]
    fn brackets_in_commentary_do_not_hide_the_object() {
        let text = "Revisé [README](README.md) primero.\n{\"chapter_order\": [1, 0]}";
        assert_eq!(decode_json(text).unwrap(), json!({"chapter_order": [1, 0]}));
    }

    #[test]
    fn object_inside_a_leading_list_keeps_the_list() {
        let text = "Lista: [{\"name\": \"A\"}, {\"name\": \"B\"}]";
        assert_eq!(decode_json(text).unwrap(), json!([{"name": "A"}, {"name": "B"}]));
    }

    #[test]
    fn undecodable_object_falls_back_to_the_list() {
        assert_eq!(decode_json("usa {placeholder} y luego [3, 1]").unwrap(), json!([3, 1]));
        assert!(matches!(decode_json("{roto} [tambien"), Err(ExtractionError::Decode(_))));
    }

    #[test]
    fn key_line_must_start_the_line() {
        let text = "Aquí va el resumen:\nsummary: |\n  hola\n";
        assert_eq!(find_key_line(text, &["summary:"]), Some("summary: |\n  hola\n"));
        assert_eq!(find_key_line("the summary: no", &["summary:"]), None);
    }

    #[test]
    fn fence_open_reads_language_tag() {
        assert_eq!(fence_open("```Mermaid").map(|f| f.lang), Some("mermaid".into()));
        assert_eq!(fence_open("~~~~ rust {.numberLines}").map(|f| f.len), Some(4));
        assert!(fence_open("    ```indented-code").is_none());
        assert!(fence_open("``inline``").is_none());
    }
}
