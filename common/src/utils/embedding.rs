use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    str::FromStr,
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use async_openai::{types::CreateEmbeddingRequestArgs, Client};
use fastembed::{EmbeddingModel, ModelTrait, TextEmbedding, TextInitOptions};
use tokio::sync::Mutex;

use crate::utils::config::AppConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    OpenAI,
    FastEmbed,
    Hashed,
}

impl FromStr for EmbeddingBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "fastembed" | "fast-embed" | "fast" => Ok(Self::FastEmbed),
            "hashed" => Ok(Self::Hashed),
            other => Err(anyhow!(
                "unknown embedding backend '{other}'. Expected 'openai', 'fastembed', or 'hashed'."
            )),
        }
    }
}

const DEFAULT_OPENAI_EMBED_MODEL: &str = "text-embedding-3-small";

/// Produces the query vector fed into per-corpus search. The vector width
/// must match the corpus dimension declared in the manifest.
#[derive(Clone)]
pub struct EmbeddingProvider {
    inner: EmbeddingInner,
}

#[derive(Clone)]
enum EmbeddingInner {
    OpenAI {
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
        model: String,
        dimensions: u32,
    },
    FastEmbed {
        model: Arc<Mutex<TextEmbedding>>,
        dimension: usize,
    },
    // Deterministic token-hash vectors; no network, used by tests and
    // offline smoke runs.
    Hashed {
        dimension: usize,
    },
}

impl EmbeddingProvider {
    pub async fn from_config(cfg: &AppConfig) -> Result<Self> {
        match cfg.embedding_backend.parse::<EmbeddingBackend>()? {
            EmbeddingBackend::OpenAI => {
                let api_key = cfg
                    .openai_api_key
                    .clone()
                    .ok_or_else(|| anyhow!("openai_api_key is required for the openai backend"))?;
                let client = Client::with_config(
                    async_openai::config::OpenAIConfig::new()
                        .with_api_key(api_key)
                        .with_api_base(&cfg.openai_base_url),
                );
                let model = cfg
                    .embedding_model
                    .clone()
                    .unwrap_or_else(|| DEFAULT_OPENAI_EMBED_MODEL.to_string());
                Ok(Self::new_openai(
                    Arc::new(client),
                    model,
                    cfg.embedding_dimensions,
                ))
            }
            EmbeddingBackend::FastEmbed => Self::new_fastembed(cfg.embedding_model.clone()).await,
            EmbeddingBackend::Hashed => Self::new_hashed(cfg.embedding_dimensions as usize),
        }
    }

    pub fn new_openai(
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
        model: String,
        dimensions: u32,
    ) -> Self {
        Self {
            inner: EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
            },
        }
    }

    pub async fn new_fastembed(model_override: Option<String>) -> Result<Self> {
        let model_name = match model_override {
            Some(code) => EmbeddingModel::from_str(&code).map_err(|err| anyhow!(err))?,
            None => EmbeddingModel::default(),
        };

        let options = TextInitOptions::new(model_name.clone()).with_show_download_progress(true);

        // Model initialisation downloads and mmaps ONNX weights; keep it off
        // the async runtime.
        let (model, dimension) = tokio::task::spawn_blocking(move || -> Result<_> {
            let text_model =
                TextEmbedding::try_new(options).context("initialising FastEmbed text model")?;
            let info = EmbeddingModel::get_model_info(&model_name)
                .ok_or_else(|| anyhow!("FastEmbed model metadata missing for {model_name}"))?;
            Ok((text_model, info.dim))
        })
        .await
        .context("joining FastEmbed initialisation task")??;

        Ok(Self {
            inner: EmbeddingInner::FastEmbed {
                model: Arc::new(Mutex::new(model)),
                dimension,
            },
        })
    }

    pub fn new_hashed(dimension: usize) -> Result<Self> {
        Ok(Self {
            inner: EmbeddingInner::Hashed {
                dimension: dimension.max(1),
            },
        })
    }

    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            EmbeddingInner::OpenAI { .. } => "openai",
            EmbeddingInner::FastEmbed { .. } => "fastembed",
            EmbeddingInner::Hashed { .. } => "hashed",
        }
    }

    /// Width of the vectors this provider produces.
    pub fn dimension(&self) -> usize {
        match &self.inner {
            EmbeddingInner::OpenAI { dimensions, .. } => *dimensions as usize,
            EmbeddingInner::FastEmbed { dimension, .. } => *dimension,
            EmbeddingInner::Hashed { dimension } => *dimension,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match &self.inner {
            EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
            } => {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model.clone())
                    .input([text])
                    .dimensions(*dimensions)
                    .build()?;

                let response = client.embeddings().create(request).await?;

                response
                    .data
                    .into_iter()
                    .next()
                    .map(|item| item.embedding)
                    .ok_or_else(|| anyhow!("no embedding data received from OpenAI API"))
            }
            EmbeddingInner::FastEmbed { model, .. } => {
                let mut guard = model.lock().await;
                guard
                    .embed(vec![text.to_owned()], None)
                    .context("generating fastembed vector")?
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow!("fastembed returned no embedding for input"))
            }
            EmbeddingInner::Hashed { dimension } => Ok(hashed_embedding(text, *dimension)),
        }
    }
}

// Bag-of-hashed-tokens vector, L2-normalized so inner products against a
// normalized index behave like cosine similarity.
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];

    for token in text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
    {
        let mut hasher = DefaultHasher::new();
        token.to_ascii_lowercase().hash(&mut hasher);
        let idx = (hasher.finish() as usize) % dim;
        if let Some(slot) = vector.get_mut(idx) {
            *slot += 1.0;
        }
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashed_backend_is_deterministic() {
        let provider = EmbeddingProvider::new_hashed(32).expect("provider");
        let first = provider.embed("clinical trial enrollment").await.expect("embed");
        let second = provider.embed("clinical trial enrollment").await.expect("embed");
        assert_eq!(first, second);
        assert_eq!(first.len(), 32);
    }

    #[tokio::test]
    async fn hashed_vectors_are_unit_length() {
        let provider = EmbeddingProvider::new_hashed(16).expect("provider");
        let vector = provider.embed("adverse event counts by site").await.expect("embed");
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn hashed_empty_input_is_zero_vector() {
        let provider = EmbeddingProvider::new_hashed(8).expect("provider");
        let vector = provider.embed("").await.expect("embed");
        assert!(vector.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn backend_parsing_accepts_known_names() {
        assert_eq!(
            "openai".parse::<EmbeddingBackend>().expect("parse"),
            EmbeddingBackend::OpenAI
        );
        assert_eq!(
            "fast-embed".parse::<EmbeddingBackend>().expect("parse"),
            EmbeddingBackend::FastEmbed
        );
        assert_eq!(
            "Hashed".parse::<EmbeddingBackend>().expect("parse"),
            EmbeddingBackend::Hashed
        );
        assert!("tfidf".parse::<EmbeddingBackend>().is_err());
    }
}
