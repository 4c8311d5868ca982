//! Parser de la etapa de relaciones.
//!
//! El LLM responde con un bloque tipo YAML:
//!
//! ```text
//! summary: |
//!   Texto en varias líneas...
//! relationships:
//!   - from_abstraction: 0 # Router
//!     to_abstraction: 2 # Config
//!     label: "Reads"
//! ```
//!
//! Sólo hacen falta dos formas (un escalar multilínea y una lista de registros
//! planos clave/valor), así que se reconoce con un escáner de líneas propio en
//! lugar de un parser YAML general.

use tracing::debug;

use super::locate::{find_fenced_block, find_key_line, fence_open};
use super::{parse_leading_index, unquote, Extraction};
use crate::error::ExtractionError;
use crate::models::Relationship;

const FROM_KEYS: &[&str] = &["from_abstraction", "from"];
const TO_KEYS: &[&str] = &["to_abstraction", "to"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipAnalysis {
    pub summary: String,
    pub relationships: Vec<Relationship>,
}

pub fn parse_relationships(raw: &str, abstraction_count: usize) -> Extraction<RelationshipAnalysis> {
    match try_parse(raw, abstraction_count) {
        Ok(analysis) => Extraction::ok(analysis),
        Err(err) => {
            let summary = format!("Relationship analysis unavailable: {err}");
            Extraction::fallback(
                RelationshipAnalysis {
                    summary,
                    relationships: Vec::new(),
                },
                err,
            )
        }
    }
}

fn try_parse(raw: &str, abstraction_count: usize) -> Result<RelationshipAnalysis, ExtractionError> {
    let block = find_fenced_block(raw, &["yaml", "yml"])
        .or_else(|| find_key_line(raw, &["summary:", "relationships:"]).map(str::to_string))
        .ok_or(ExtractionError::NoStructuredBlockFound("yaml"))?;

    let scanned = scan(&block);
    if scanned.summary.is_none() && scanned.items.is_empty() {
        return Err(ExtractionError::Decode(
            "no se reconoció 'summary' ni 'relationships'".to_string(),
        ));
    }

    let relationships = scanned
        .items
        .iter()
        .enumerate()
        .filter_map(|(position, record)| validate_record(position, record, abstraction_count))
        .collect();

    Ok(RelationshipAnalysis {
        summary: scanned.summary.unwrap_or_default(),
        relationships,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    SeekingKey,
    InMultilineScalar,
    InListItem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarStyle {
    Literal,
    Folded,
}

/// Registro plano de un elemento de la lista, en orden de aparición.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RawRecord {
    fields: Vec<(String, String)>,
}

impl RawRecord {
    fn get(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| {
            self.fields
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        })
    }
}

#[derive(Debug, Default)]
struct ScanOutput {
    summary: Option<String>,
    items: Vec<RawRecord>,
}

struct Scanner {
    state: ScanState,
    style: ScalarStyle,
    scalar: Vec<String>,
    current: Option<RawRecord>,
    out: ScanOutput,
}

fn scan(block: &str) -> ScanOutput {
    let mut scanner = Scanner {
        state: ScanState::SeekingKey,
        style: ScalarStyle::Literal,
        scalar: Vec::new(),
        current: None,
        out: ScanOutput::default(),
    };
    for line in block.lines() {
        scanner.feed(line.trim_end_matches('\r'));
    }
    scanner.finish()
}

impl Scanner {
    fn feed(&mut self, line: &str) {
        if fence_open(line).is_some() {
            return;
        }
        let indent = line.len() - line.trim_start().len();
        let trimmed = line.trim();

        if self.state == ScanState::InMultilineScalar {
            if trimmed.is_empty() {
                self.scalar.push(String::new());
                return;
            }
            if indent > 0 {
                self.scalar.push(trimmed.to_string());
                return;
            }
            self.close_scalar();
        }

        if trimmed.is_empty() {
            return;
        }

        if let Some(rest) = trimmed.strip_prefix("- ").or_else(|| (trimmed == "-").then_some("")) {
            self.close_item();
            let mut record = RawRecord::default();
            if let Some((key, value)) = split_pair(rest) {
                record.fields.push((key, value));
            }
            self.current = Some(record);
            self.state = ScanState::InListItem;
            return;
        }

        let Some((key, value)) = split_pair(trimmed) else {
            debug!("Línea ignorada en el bloque de relaciones: {trimmed}");
            return;
        };

        if indent == 0 && key == "summary" {
            self.close_item();
            self.open_scalar(&value);
            return;
        }
        if indent == 0 && key == "relationships" {
            self.close_item();
            self.state = ScanState::SeekingKey;
            return;
        }

        match self.current.as_mut() {
            Some(record) => record.fields.push((key, value)),
            None => debug!("Clave fuera de contexto ignorada: {key}"),
        }
    }

    fn open_scalar(&mut self, value: &str) {
        self.scalar.clear();
        match value {
            "|" | "|-" | "|+" => self.style = ScalarStyle::Literal,
            ">" | ">-" | ">+" => self.style = ScalarStyle::Folded,
            inline => {
                self.style = ScalarStyle::Folded;
                self.scalar.push(unquote(inline).to_string());
            }
        }
        self.state = ScanState::InMultilineScalar;
    }

    fn close_scalar(&mut self) {
        let separator = match self.style {
            ScalarStyle::Literal => "\n",
            ScalarStyle::Folded => " ",
        };
        let text = self
            .scalar
            .drain(..)
            .collect::<Vec<_>>()
            .join(separator)
            .trim()
            .to_string();
        self.out.summary = Some(text);
        self.state = ScanState::SeekingKey;
    }

    fn close_item(&mut self) {
        if let Some(record) = self.current.take() {
            self.out.items.push(record);
        }
        if self.state == ScanState::InListItem {
            self.state = ScanState::SeekingKey;
        }
    }

    fn finish(mut self) -> ScanOutput {
        if self.state == ScanState::InMultilineScalar {
            self.close_scalar();
        }
        self.close_item();
        self.out
    }
}

fn split_pair(text: &str) -> Option<(String, String)> {
    let (key, value) = text.split_once(':')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key.to_lowercase(), value.trim().to_string()))
}

fn validate_record(position: usize, record: &RawRecord, abstraction_count: usize) -> Option<Relationship> {
    let (Some(from_raw), Some(to_raw), Some(label_raw)) = (
        record.get(FROM_KEYS),
        record.get(TO_KEYS),
        record.get(&["label"]),
    ) else {
        debug!("Relación #{position} descartada: faltan from/to/label");
        return None;
    };

    let label = unquote(label_raw);
    if !is_text_label(label) {
        debug!("Relación #{position} descartada: etiqueta no textual '{label_raw}'");
        return None;
    }

    let (Some(from), Some(to)) = (parse_leading_index(from_raw), parse_leading_index(to_raw)) else {
        debug!("Relación #{position} descartada: índices no numéricos");
        return None;
    };
    if from >= abstraction_count || to >= abstraction_count {
        debug!("Relación #{position} descartada: índices fuera de rango ({from} -> {to})");
        return None;
    }

    Some(Relationship {
        from,
        to,
        label: label.to_string(),
    })
}

/// Una etiqueta vacía, numérica, booleana, nula o compuesta no es texto.
fn is_text_label(label: &str) -> bool {
    if label.is_empty() || label.starts_with('[') || label.starts_with('{') {
        return false;
    }
    if label.parse::<f64>().is_ok() {
        return false;
    }
    !matches!(
        label.to_lowercase().as_str(),
        "true" | "false" | "null" | "~" | "yes" | "no"
    )
}
