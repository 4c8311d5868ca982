//! Parser del orden de capítulos. Siempre devuelve una permutación completa de
//! `0..abstraction_count`, aunque la respuesta venga vacía o truncada.

use serde_json::Value;
use tracing::debug;

use super::locate::decode_json;
use super::{index_from_value, Extraction};
use crate::error::ExtractionError;

const ORDER_KEYS: &[&str] = &["chapter_order", "chapterOrder", "order", "chapters"];

pub fn parse_chapter_order(raw: &str, abstraction_count: usize) -> Extraction<Vec<usize>> {
    match try_parse(raw, abstraction_count) {
        Ok(order) => Extraction::ok(order),
        Err(err) => Extraction::fallback(repair_order(Vec::new(), abstraction_count), err),
    }
}

fn try_parse(raw: &str, abstraction_count: usize) -> Result<Vec<usize>, ExtractionError> {
    let value = decode_json(raw)?;

    let entries = match value {
        Value::Array(entries) => entries,
        Value::Object(mut obj) => ORDER_KEYS
            .iter()
            .find_map(|key| match obj.remove(*key) {
                Some(Value::Array(entries)) => Some(entries),
                _ => None,
            })
            .ok_or_else(|| ExtractionError::Decode("falta la lista 'chapter_order'".to_string()))?,
        _ => {
            return Err(ExtractionError::Decode(
                "se esperaba un objeto o una lista".to_string(),
            ))
        }
    };

    let candidates: Vec<Option<usize>> = entries.iter().map(entry_index).collect();
    let usable = candidates
        .iter()
        .flatten()
        .any(|idx| *idx < abstraction_count);
    if abstraction_count > 0 && !usable {
        return Err(ExtractionError::NoUsableRecords("chapter_order"));
    }
    Ok(repair_order(candidates, abstraction_count))
}

/// Admite números, cadenas como `"2 # Parser"` y objetos con clave `index`.
fn entry_index(entry: &Value) -> Option<usize> {
    match entry {
        Value::Object(obj) => obj
            .get("index")
            .or_else(|| obj.get("abstraction_index"))
            .and_then(index_from_value),
        other => index_from_value(other),
    }
}

/// Descarta entradas no numéricas, fuera de rango o repetidas (gana la primera)
/// y añade al final, en orden ascendente, los índices que falten.
pub fn repair_order<I>(candidates: I, abstraction_count: usize) -> Vec<usize>
where
    I: IntoIterator<Item = Option<usize>>,
{
    let mut seen = vec![false; abstraction_count];
    let mut order = Vec::with_capacity(abstraction_count);

    for candidate in candidates {
        match candidate {
            Some(idx) if idx < abstraction_count && !seen[idx] => {
                seen[idx] = true;
                order.push(idx);
            }
            Some(idx) => debug!("Índice de capítulo descartado: {idx}"),
            None => debug!("Entrada de orden no numérica descartada"),
        }
    }

    let missing: Vec<usize> = (0..abstraction_count).filter(|idx| !seen[*idx]).collect();
    if !missing.is_empty() {
        debug!("Índices añadidos al final del orden: {missing:?}");
    }
    order.extend(missing);
    order
}
