//! Almacén de artefactos: cada `PipelineResult` se guarda como JSON en el
//! directorio de salida, con nombre `owner_name_YYYYMMDDTHHMMSSZ.json`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::models::PipelineResult;

const EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Guarda el resultado y devuelve el nombre del fichero creado.
    pub async fn save(&self, result: &PipelineResult) -> Result<String> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("No se pudo crear {}", self.root.display()))?;

        let mut name = artifact_name(result);
        if tokio::fs::try_exists(self.root.join(&name)).await.unwrap_or(false) {
            let suffix: String = result.run_id.chars().filter(|c| c.is_ascii_alphanumeric()).take(8).collect();
            name = format!("{}_{suffix}.{EXTENSION}", name.trim_end_matches(".json"));
        }

        let json = serde_json::to_string_pretty(result)?;
        let path = self.root.join(&name);
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("No se pudo escribir {}", path.display()))?;
        info!("Resultado guardado en {}", path.display());
        Ok(name)
    }

    pub async fn load(&self, name: &str) -> Result<PipelineResult> {
        validate_name(name)?;
        let path = self.root.join(name);
        let json = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("No se pudo leer {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("Artefacto no válido: {name}"))
    }

    /// Nombres de los artefactos guardados, en orden alfabético.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} aún no existe.", self.root.display());
                return Ok(Vec::new());
            }
            Err(err) => return Err(err).context("No se pudo listar el directorio de resultados"),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_json = path.extension().and_then(|e| e.to_str()) == Some(EXTENSION);
            if !is_json || !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

fn artifact_name(result: &PipelineResult) -> String {
    let stamp = DateTime::parse_from_rfc3339(&result.generated_at)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());
    let repo: String = result
        .repository
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{repo}_{}.{EXTENSION}", stamp.format("%Y%m%dT%H%M%SZ"))
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        bail!("Nombre de artefacto no válido: {name}");
    }
    if !name.ends_with(".json") {
        bail!("El artefacto debe tener extensión .json: {name}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AbstractionsOutput;

    fn result(generated_at: &str) -> PipelineResult {
        PipelineResult {
            run_id: "1234abcd-0000".into(),
            repository: "octocat/Hello-World".into(),
            branch: "master".into(),
            generated_at: generated_at.into(),
            abstractions: AbstractionsOutput { raw: String::new(), list: vec![] },
            abstractions_list: vec![],
            relationship_summary: String::new(),
            relationships: vec![],
            chapter_order: vec![],
            chapters: vec!["# Chapter 1: X\n".into()],
            files_data: vec![],
            error: None,
            notes: vec!["note".into()],
        }
    }

    #[test]
    fn names_follow_repository_and_timestamp() {
        assert_eq!(
            artifact_name(&result("2024-03-05T07:08:09+00:00")),
            "octocat_Hello-World_20240305T070809Z.json"
        );
    }

    #[tokio::test]
    async fn save_load_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("results"));
        assert!(store.list().await.unwrap().is_empty());

        let original = result("2024-03-05T07:08:09Z");
        let name = store.save(&original).await.unwrap();
        let again = store.save(&original).await.unwrap();
        assert_ne!(name, again);
        assert_eq!(again, "octocat_Hello-World_20240305T070809Z_1234abcd.json");

        assert_eq!(store.load(&name).await.unwrap(), original);
        assert_eq!(store.list().await.unwrap(), vec![name, again]);
    }

    #[test]
    fn rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        for name in ["../secret.json", "a/b.json", "..json", "notes.txt", ""] {
            assert!(tokio_test::block_on(store.load(name)).is_err(), "{name}");
        }
    }

    #[tokio::test]
    async fn incomplete_artifacts_fail_to_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("partial.json"), r#"{"runId": "x"}"#).unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(store.load("partial.json").await.is_err());
    }
}
