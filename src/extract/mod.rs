//! Capa de extracción tolerante.
//!
//! Cada parser convierte el texto libre del LLM en registros validados en tres
//! fases: localizar el bloque estructurado, decodificarlo y validar/reparar.
//! Ante una respuesta presente pero malformada nunca se devuelve un error: se
//! devuelve el valor por defecto de la forma junto con la descripción del fallo.

pub mod abstractions;
pub mod chapter;
pub mod locate;
pub mod order;
pub mod relationships;

pub use abstractions::{default_abstractions, parse_abstractions};
pub use chapter::{expected_heading, validate_chapter_content};
pub use order::{parse_chapter_order, repair_order};
pub use relationships::{parse_relationships, RelationshipAnalysis};

use serde_json::Value;
use tracing::warn;

use crate::error::ExtractionError;

/// Valor extraído y, si hubo que recurrir al valor por defecto, el motivo.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction<T> {
    pub value: T,
    pub error: Option<String>,
}

impl<T> Extraction<T> {
    pub fn ok(value: T) -> Self {
        Self { value, error: None }
    }

    pub fn fallback(value: T, err: ExtractionError) -> Self {
        warn!("Extracción degradada al valor por defecto: {err}");
        Self {
            value,
            error: Some(err.to_string()),
        }
    }

    /// Valor por defecto cuando ni siquiera hubo respuesta que analizar.
    pub fn unavailable(value: T, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        warn!("Respuesta no disponible, se usa el valor por defecto: {reason}");
        Self {
            value,
            error: Some(reason),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.error.is_some()
    }
}

/// Quita comillas simples o dobles envolventes.
pub(crate) fn unquote(raw: &str) -> &str {
    let trimmed = raw.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner.trim();
        }
    }
    trimmed
}

/// Índice al principio de un texto como `3`, `"3"` o `3 # NombreAbstracción`.
pub(crate) fn parse_leading_index(raw: &str) -> Option<usize> {
    let text = unquote(raw);
    let digits: String = text.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let rest = &text[digits.len()..];
    // "3.5" o "3abc" no son índices
    if rest.starts_with(|c: char| c.is_alphanumeric() || c == '.') {
        return None;
    }
    digits.parse().ok()
}

pub(crate) fn index_from_value(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
            .and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => parse_leading_index(s),
        _ => None,
    }
}
