use std::collections::BTreeMap;

use common::{error::AppError, storage::store::StorageManager};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Versioned descriptor of every corpus the retriever should serve.
///
/// Produced by the offline indexing pipeline; read-only here. Corpora are
/// kept in a `BTreeMap` so iteration order, and with it the order of the
/// fused tie groups, is stable across processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub corpora: BTreeMap<String, CorpusEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusEntry {
    /// Storage location root; file names are appended verbatim.
    pub prefix: String,
    /// Files that must be cached locally before the corpus can serve.
    pub files: Vec<String>,
    /// Embedding width of every vector in the corpus index.
    pub dimension: usize,
    /// Number of chunks indexed at build time.
    pub count: usize,
}

impl Manifest {
    pub async fn fetch(storage: &StorageManager, key: &str) -> Result<Self, AppError> {
        let manifest: Manifest = storage.get_json(key).await.map_err(|e| {
            error!(key, error = %e, "manifest load failed");
            match e {
                AppError::Storage(object_store::Error::NotFound { .. }) => {
                    AppError::ManifestNotFound(key.to_string())
                }
                AppError::Json(parse) => AppError::ManifestParse(parse.to_string()),
                other => other,
            }
        })?;

        info!(
            version = %manifest.version,
            corpora = ?manifest.corpora.keys().collect::<Vec<_>>(),
            "manifest loaded"
        );
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{memory_storage, seed_file};

    const MANIFEST_JSON: &str = r#"{
        "version": "2024-06-01",
        "corpora": {
            "pdf": {
                "prefix": "rag/pdf/",
                "files": ["index.bin", "ids.jsonl", "docs.jsonl"],
                "dimension": 1536,
                "count": 42
            },
            "sas": {
                "prefix": "rag/sas/",
                "files": ["index.bin", "ids.jsonl", "docs.jsonl"],
                "dimension": 1536,
                "count": 7
            }
        }
    }"#;

    #[tokio::test]
    async fn fetch_parses_manifest() {
        let storage = memory_storage();
        seed_file(&storage, "rag/manifest.json", MANIFEST_JSON.into()).await;

        let manifest = Manifest::fetch(&storage, "rag/manifest.json")
            .await
            .expect("fetch manifest");

        assert_eq!(manifest.version, "2024-06-01");
        assert_eq!(manifest.corpora.len(), 2);
        let pdf = manifest.corpora.get("pdf").expect("pdf entry");
        assert_eq!(pdf.dimension, 1536);
        assert_eq!(pdf.count, 42);
        assert_eq!(pdf.files.len(), 3);
    }

    #[tokio::test]
    async fn corpora_iterate_in_name_order() {
        let storage = memory_storage();
        seed_file(&storage, "rag/manifest.json", MANIFEST_JSON.into()).await;

        let manifest = Manifest::fetch(&storage, "rag/manifest.json")
            .await
            .expect("fetch manifest");
        let names: Vec<&String> = manifest.corpora.keys().collect();
        assert_eq!(names, ["pdf", "sas"]);
    }

    #[tokio::test]
    async fn missing_manifest_is_reported_as_not_found() {
        let storage = memory_storage();
        let result = Manifest::fetch(&storage, "rag/absent.json").await;
        assert!(matches!(result, Err(AppError::ManifestNotFound(_))));
    }

    #[tokio::test]
    async fn malformed_manifest_is_a_parse_error() {
        let storage = memory_storage();
        seed_file(&storage, "rag/manifest.json", b"{\"version\": ".to_vec()).await;

        let result = Manifest::fetch(&storage, "rag/manifest.json").await;
        assert!(matches!(result, Err(AppError::ManifestParse(_))));
    }
}
