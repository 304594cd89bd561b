use std::collections::HashMap;
use std::path::Path;

use common::{error::AppError, storage::store::StorageManager};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::index::FlatVectorIndex;
use crate::manifest::CorpusEntry;
use crate::RankedChunk;

pub const INDEX_FILE: &str = "index.bin";
pub const IDS_FILE: &str = "ids.jsonl";
pub const DOCS_FILE: &str = "docs.jsonl";

/// Text and metadata payload for one chunk.
#[derive(Debug, Clone, Default)]
pub struct DocRecord {
    pub text: String,
    pub metadata: Map<String, Value>,
}

/// Ranked results of one corpus search plus the degradations that occurred
/// while resolving ordinals to documents.
#[derive(Debug, Default)]
pub struct RankOutcome {
    pub chunks: Vec<RankedChunk>,
    pub missing_mappings: usize,
    pub missing_docs: usize,
}

// One line of ids.jsonl: index ordinal to stable chunk id.
#[derive(Deserialize)]
struct IdRecord {
    ann_id: usize,
    id: String,
}

// One line of docs.jsonl. Text and metadata may be absent.
#[derive(Deserialize)]
struct DocLine {
    id: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    metadata: Map<String, Value>,
}

/// One loaded corpus: its vector index plus the ordinal-id and document
/// maps needed to turn search hits into ranked chunks. Immutable once
/// loaded.
pub struct CorpusIndex {
    name: String,
    index: FlatVectorIndex,
    id_map: HashMap<usize, String>,
    doc_map: HashMap<String, DocRecord>,
    declared_count: usize,
}

impl CorpusIndex {
    /// Cache the corpus files locally (skipping unchanged objects), then
    /// deserialize the index and both maps.
    ///
    /// Index problems and file transfer failures are fatal for the corpus;
    /// malformed map lines are skipped and counted.
    pub async fn load(
        storage: &StorageManager,
        cache_dir: &Path,
        version: &str,
        name: &str,
        entry: &CorpusEntry,
    ) -> Result<Self, AppError> {
        let local_dir = cache_dir.join(name).join(version);

        for file in &entry.files {
            let location = format!("{}{}", entry.prefix, file);
            let local_path = local_dir.join(file);
            storage
                .download_if_needed(&location, &local_path)
                .await
                .map_err(|e| match e {
                    AppError::Storage(source) => AppError::CorpusFile {
                        corpus: name.to_string(),
                        file: file.clone(),
                        source,
                    },
                    other => other,
                })?;
        }

        let index_path = local_dir.join(INDEX_FILE);
        debug!(corpus = name, path = %index_path.display(), "loading vector index");
        let index_bytes = tokio::fs::read(&index_path).await?;
        let index = FlatVectorIndex::from_bytes(&index_bytes)?;

        if index.dimension() != entry.dimension {
            return Err(AppError::DimensionMismatch {
                corpus: name.to_string(),
                index_dimension: index.dimension(),
                manifest_dimension: entry.dimension,
            });
        }

        let (id_records, id_lines_skipped) =
            read_jsonl::<IdRecord>(&local_dir.join(IDS_FILE)).await?;
        let mut id_map = HashMap::with_capacity(id_records.len());
        let mut empty_ids = 0usize;
        for record in id_records {
            if record.id.is_empty() {
                empty_ids += 1;
                continue;
            }
            id_map.insert(record.ann_id, record.id);
        }

        let (doc_records, doc_lines_skipped) =
            read_jsonl::<DocLine>(&local_dir.join(DOCS_FILE)).await?;
        let mut doc_map = HashMap::with_capacity(doc_records.len());
        for record in doc_records {
            if record.id.is_empty() {
                continue;
            }
            doc_map.insert(
                record.id,
                DocRecord {
                    text: record.text,
                    metadata: record.metadata,
                },
            );
        }

        if id_lines_skipped + empty_ids + doc_lines_skipped > 0 {
            warn!(
                corpus = name,
                id_lines_skipped = id_lines_skipped + empty_ids,
                doc_lines_skipped,
                "corpus maps loaded with skipped records"
            );
        }

        info!(
            corpus = name,
            count = entry.count,
            dimension = entry.dimension,
            vectors = index.len(),
            "corpus loaded"
        );

        Ok(Self {
            name: name.to_string(),
            index,
            id_map,
            doc_map,
            declared_count: entry.count,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    /// Chunk count declared by the manifest at build time.
    pub fn declared_count(&self) -> usize {
        self.declared_count
    }

    /// Search this corpus and resolve hits into ranked chunks.
    ///
    /// An ordinal without a chunk-id mapping drops that hit with a warning;
    /// a chunk id without a document record degrades to empty text and
    /// metadata. Neither aborts the search.
    pub fn rank(&self, query: &[f32], top_k: usize) -> RankOutcome {
        let mut outcome = RankOutcome::default();

        for (similarity, ordinal) in self.index.search(query, top_k) {
            let Some(chunk_id) = self.id_map.get(&ordinal) else {
                outcome.missing_mappings += 1;
                warn!(
                    corpus = %self.name,
                    ordinal,
                    "no chunk id mapped for search hit, dropping result"
                );
                continue;
            };

            let doc = match self.doc_map.get(chunk_id) {
                Some(doc) => doc.clone(),
                None => {
                    outcome.missing_docs += 1;
                    DocRecord::default()
                }
            };

            outcome.chunks.push(RankedChunk {
                corpus: self.name.clone(),
                chunk_id: chunk_id.clone(),
                similarity,
                fused: 0.0,
                text: doc.text,
                metadata: doc.metadata,
            });
        }

        outcome
    }
}

// Parse a newline-delimited JSON file, skipping malformed lines so one bad
// record never sinks the whole corpus.
async fn read_jsonl<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<(Vec<T>, usize), AppError> {
    let contents = tokio::fs::read_to_string(path).await?;
    let mut records = Vec::new();
    let mut skipped = 0usize;

    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                skipped += 1;
                warn!(
                    path = %path.display(),
                    line = line_no + 1,
                    error = %e,
                    "skipping malformed record"
                );
            }
        }
    }

    Ok((records, skipped))
}
