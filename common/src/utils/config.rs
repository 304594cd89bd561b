use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Backend for the blob store holding manifests and corpus artifacts.
#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    /// Root of the object store when using the local backend.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Durable download cache; survives warm restarts of the same host.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    #[serde(default = "default_manifest_key")]
    pub manifest_key: String,
    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: String,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    /// Results requested from each corpus before fusion.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Reciprocal rank fusion constant.
    #[serde(default = "default_fusion_k")]
    pub fusion_k: u32,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_cache_dir() -> String {
    "./cache".to_string()
}

fn default_manifest_key() -> String {
    "rag/manifest.json".to_string()
}

fn default_embedding_backend() -> String {
    "fastembed".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_top_k() -> usize {
    5
}

fn default_fusion_k() -> u32 {
    60
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

impl AppConfig {
    /// Rejects tuning values that would make every search nonsensical.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.top_k < 1 {
            return Err(ConfigError::Message("top_k must be >= 1".into()));
        }
        if self.fusion_k < 1 {
            return Err(ConfigError::Message("fusion_k must be >= 1".into()));
        }
        if self.manifest_key.trim().is_empty() {
            return Err(ConfigError::Message("manifest_key must not be empty".into()));
        }
        Ok(())
    }
}
