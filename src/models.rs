//! Modelos de dominio: árbol de ficheros del repositorio y registros que
//! produce cada etapa del pipeline.

use serde::{Deserialize, Serialize};

/// Tipo de nodo dentro del árbol remoto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    File,
    Directory,
}

/// Nodo del árbol de ficheros de un repositorio remoto.
///
/// Un fichero nunca tiene `children`; un directorio nunca tiene `content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileNode>>,
}

impl FileNode {
    pub fn file(name: &str, path: &str, size: u64, content: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            node_type: NodeType::File,
            size,
            content,
            children: None,
        }
    }

    pub fn directory(name: &str, path: &str, children: Vec<FileNode>) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            node_type: NodeType::Directory,
            size: 0,
            content: None,
            children: Some(children),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.node_type == NodeType::Directory
    }
}

/// Par (ruta, contenido) de un fichero que realmente se analiza.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub content: String,
}

/// Concepto identificado en el repositorio.
///
/// `file_indices` apunta a posiciones de la lista plana de ficheros analizados.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Abstraction {
    pub name: String,
    pub description: String,
    pub category: String,
    pub file_indices: Vec<usize>,
}

/// Relación dirigida `from` → `to` entre dos abstracciones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub from: usize,
    pub to: usize,
    pub label: String,
}

/// Capítulo escrito, en la posición `number` (base 1) del orden de capítulos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub number: usize,
    pub abstraction_index: usize,
    pub title: String,
    pub filename: String,
    pub content: String,
    pub previous_chapters_summary: String,
}

/// Salida de la etapa de identificación: texto crudo del modelo más la lista validada.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbstractionsOutput {
    pub raw: String,
    pub list: Vec<Abstraction>,
}

/// Resultado final del pipeline. Es el único contrato del que dependen la UI
/// y la capa HTTP, y el formato de los artefactos persistidos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub run_id: String,
    pub repository: String,
    pub branch: String,
    pub generated_at: String,
    pub abstractions: AbstractionsOutput,
    pub abstractions_list: Vec<String>,
    pub relationship_summary: String,
    pub relationships: Vec<Relationship>,
    pub chapter_order: Vec<usize>,
    pub chapters: Vec<String>,
    pub files_data: Vec<FileEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub notes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_node_serializes_type_field() {
        let node = FileNode::file("a.rs", "src/a.rs", 10, Some("fn a() {}".into()));
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["type"], "file");
        assert!(value.get("children").is_none());

        let dir = FileNode::directory("src", "src", vec![node]);
        let value = serde_json::to_value(&dir).unwrap();
        assert_eq!(value["type"], "directory");
        assert!(value.get("content").is_none());
        assert_eq!(value["children"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn pipeline_result_uses_camel_case_contract() {
        let result = PipelineResult {
            run_id: "r".into(),
            repository: "octocat/Hello-World".into(),
            branch: "master".into(),
            generated_at: "2024-01-01T00:00:00Z".into(),
            abstractions: AbstractionsOutput {
                raw: "{}".into(),
                list: vec![Abstraction {
                    name: "A".into(),
                    description: "d".into(),
                    category: "service".into(),
                    file_indices: vec![0],
                }],
            },
            abstractions_list: vec!["A".into()],
            relationship_summary: "s".into(),
            relationships: vec![],
            chapter_order: vec![0],
            chapters: vec!["# Chapter 1: A".into()],
            files_data: vec![],
            error: None,
            notes: vec![],
        };
        let value = serde_json::to_value(&result).unwrap();
        for key in [
            "abstractions",
            "abstractionsList",
            "relationshipSummary",
            "relationships",
            "chapterOrder",
            "chapters",
            "filesData",
        ] {
            assert!(value.get(key).is_some(), "falta el campo {key}");
        }
        assert_eq!(value["abstractions"]["list"][0]["fileIndices"], json!([0]));
        assert!(value.get("error").is_none());
    }
}
