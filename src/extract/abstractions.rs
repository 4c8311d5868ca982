//! Parser de la etapa de identificación de abstracciones (respuesta JSON).

use schemars::JsonSchema;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::locate::decode_json;
use super::{index_from_value, Extraction};
use crate::error::ExtractionError;
use crate::models::Abstraction;

const DEFAULT_DESCRIPTION: &str = "No description provided.";
const DEFAULT_CATEGORY: &str = "general";

/// Forma que se pide al LLM; sólo se usa para generar el JSON Schema del prompt.
#[allow(dead_code)]
#[derive(Serialize, JsonSchema)]
pub struct AbstractionsResponse {
    pub abstractions: Vec<AbstractionItem>,
}

#[allow(dead_code)]
#[derive(Serialize, JsonSchema)]
pub struct AbstractionItem {
    /// Nombre corto del concepto.
    pub name: String,
    /// Explicación para principiantes, con una analogía.
    pub description: String,
    /// Tipo de concepto: service, model, utility, config...
    pub category: String,
    /// Índices de los ficheros relevantes dentro de la lista proporcionada.
    pub file_indices: Vec<usize>,
}

pub fn response_schema() -> String {
    serde_json::to_string_pretty(&schemars::schema_for!(AbstractionsResponse)).unwrap_or_default()
}

/// Extrae las abstracciones de la respuesta. `file_count` acota los índices de fichero.
pub fn parse_abstractions(raw: &str, file_count: usize) -> Extraction<Vec<Abstraction>> {
    match try_parse(raw, file_count) {
        Ok(list) => Extraction::ok(list),
        Err(err) => Extraction::fallback(default_abstractions(file_count), err),
    }
}

/// Valor por defecto: una única abstracción general que abarca todos los ficheros.
pub fn default_abstractions(file_count: usize) -> Vec<Abstraction> {
    vec![Abstraction {
        name: "Project Overview".to_string(),
        description: "A general tour of the repository as a whole.".to_string(),
        category: DEFAULT_CATEGORY.to_string(),
        file_indices: (0..file_count).collect(),
    }]
}

fn try_parse(raw: &str, file_count: usize) -> Result<Vec<Abstraction>, ExtractionError> {
    let value = decode_json(raw)?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("abstractions") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(ExtractionError::Decode(
                    "falta la lista 'abstractions'".to_string(),
                ))
            }
        },
        _ => {
            return Err(ExtractionError::Decode(
                "se esperaba un objeto o una lista".to_string(),
            ))
        }
    };

    let list: Vec<Abstraction> = items
        .iter()
        .enumerate()
        .filter_map(|(position, item)| validate_item(position, item, file_count))
        .collect();

    if list.is_empty() {
        return Err(ExtractionError::NoUsableRecords("abstractions"));
    }
    Ok(list)
}

fn validate_item(position: usize, item: &Value, file_count: usize) -> Option<Abstraction> {
    let Some(obj) = item.as_object() else {
        debug!("Abstracción #{position} descartada: no es un objeto");
        return None;
    };

    let name = text_field(obj, &["name", "title"])?;
    let description =
        text_field(obj, &["description"]).unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string());
    let category = text_field(obj, &["category", "type"]).unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

    let raw_indices = ["file_indices", "fileIndices", "files"]
        .iter()
        .find_map(|key| obj.get(*key))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut file_indices = Vec::new();
    for raw in raw_indices {
        match index_from_value(raw) {
            Some(idx) if idx < file_count => {
                if !file_indices.contains(&idx) {
                    file_indices.push(idx);
                }
            }
            _ => debug!("Índice de fichero descartado en '{name}': {raw}"),
        }
    }

    Some(Abstraction {
        name,
        description,
        category,
        file_indices,
    })
}

fn text_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| obj.get(*key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_link_before_the_object_is_skipped() {
        let raw = "I looked at [README](README.md) first.\n\
                   {\"abstractions\":[{\"name\":\"A\",\"description\":\"d\",\"file_indices\":[0]}]}";
        let extraction = parse_abstractions(raw, 1);
        assert!(!extraction.is_fallback(), "{:?}", extraction.error);
        assert_eq!(extraction.value.len(), 1);
        assert_eq!(extraction.value[0].name, "A");
        assert_eq!(extraction.value[0].file_indices, vec![0]);
    }

    #[test]
    fn well_formed_json_round_trips() {
        let raw = r#"{"abstractions":[{"name":"A","description":"d","category":"service","file_indices":[0,2]}]}"#;
        let extraction = parse_abstractions(raw, 3);
        assert!(!extraction.is_fallback());
        assert_eq!(
            extraction.value,
            vec![Abstraction {
                name: "A".into(),
                description: "d".into(),
                category: "service".into(),
                file_indices: vec![0, 2],
            }]
        );
    }

    #[test]
    fn repairs_entries_inside_fenced_block_with_commentary() {
        let raw = r#"Here is my analysis:

```json
{
  "abstractions": [
    {"name": "  Router ", "file_indices": [1, "2 # src/api.rs", 9, -1, 1]},
    {"name": "", "description": "sin nombre"},
    "no es un objeto",
    {"name": "Config", "description": "Loads env", "category": "config", "fileIndices": []}
  ]
}
```
Let me know if you need more."#;
        let extraction = parse_abstractions(raw, 3);
        assert!(!extraction.is_fallback());
        let list = extraction.value;
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name, "Router");
        assert_eq!(list[0].description, DEFAULT_DESCRIPTION);
        assert_eq!(list[0].category, DEFAULT_CATEGORY);
        assert_eq!(list[0].file_indices, vec![1, 2]);
        // sin ficheros se conserva, sin inventar asociaciones
        assert_eq!(list[1].name, "Config");
        assert!(list[1].file_indices.is_empty());
    }

    #[test]
    fn bare_array_is_accepted() {
        let extraction = parse_abstractions(r#"[{"name": "Solo", "files": [0]}]"#, 1);
        assert_eq!(extraction.value[0].file_indices, vec![0]);
    }

    #[test]
    fn malformed_responses_fall_back_to_overview() {
        for raw in [
            "I could not find anything interesting.",
            "```json\n{\"abstractions\": [ {\"name\": \"A\",,, }\n```",
            r#"{"items": []}"#,
            r#"{"abstractions": [{"description": "sin nombre"}]}"#,
        ] {
            let extraction = parse_abstractions(raw, 2);
            assert!(extraction.is_fallback(), "debería degradarse: {raw}");
            assert_eq!(extraction.value, default_abstractions(2));
        }
    }

    #[test]
    fn schema_mentions_expected_fields() {
        let schema = response_schema();
        assert!(schema.contains("file_indices"));
        assert!(schema.contains("abstractions"));
    }
}
