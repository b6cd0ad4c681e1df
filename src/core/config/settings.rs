//! Typed application settings.
//!
//! Every section is optional in `config.yml`; missing fields fall back to the
//! values in [`super::defaults`].

use serde::{Deserialize, Serialize};

use super::defaults;
use crate::llm::types::SamplingParams;
use crate::rag::embedder::OversizePolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub chunking: ChunkingSettings,
    pub embedding: EmbeddingSettings,
    pub index: IndexSettings,
    pub retrieval: RetrievalSettings,
    pub context: ContextSettings,
    pub generation: GenerationSettings,
    pub ingestion: IngestionSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    /// Maximum chunk size in characters, overlap included.
    pub max_chunk_size: usize,
    /// Characters carried over from the previous chunk.
    pub overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            max_chunk_size: 1000,
            overlap: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackendKind {
    /// OpenAI-compatible `/v1/embeddings` endpoint.
    Openai,
    /// Local feature hashing; no network access.
    Hashing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackendKind,
    pub model_id: String,
    pub dimension: usize,
    pub base_url: String,
    pub api_key: Option<String>,
    pub max_input_tokens: usize,
    pub batch_size: usize,
    pub requests_per_second: Option<u32>,
    pub normalize: bool,
    pub oversize: OversizePolicy,
    pub timeout_secs: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackendKind::Openai,
            model_id: defaults::EMBEDDING_MODEL.to_string(),
            dimension: defaults::EMBEDDING_DIMENSION,
            base_url: "http://127.0.0.1:8090".to_string(),
            api_key: None,
            max_input_tokens: defaults::EMBEDDING_MAX_INPUT_TOKENS,
            batch_size: 32,
            requests_per_second: None,
            normalize: true,
            oversize: OversizePolicy::Truncate,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackendKind {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub backend: IndexBackendKind,
    /// Database file, relative to the data directory unless absolute.
    pub path: String,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            backend: IndexBackendKind::Sqlite,
            path: "index.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub budget_chars: usize,
    pub over_fetch_factor: usize,
    pub dedup_threshold: f64,
    pub min_score: Option<f32>,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 4,
            budget_chars: 6000,
            over_fetch_factor: 3,
            dedup_threshold: 0.9,
            min_score: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    pub context_window_tokens: usize,
    pub reserved_output_tokens: usize,
    pub instructions: String,
    /// Number of previous question/answer turns rendered into the prompt.
    pub history_turns: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            context_window_tokens: 4096,
            reserved_output_tokens: 512,
            instructions: defaults::INSTRUCTIONS.to_string(),
            history_turns: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub base_url: String,
    pub model_id: String,
    pub api_key: Option<String>,
    /// Input limit advertised by the generation service.
    pub max_input_tokens: usize,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub stop_sequences: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8088".to_string(),
            model_id: defaults::GENERATION_MODEL.to_string(),
            api_key: None,
            max_input_tokens: 3584,
            temperature: 0.5,
            max_output_tokens: 512,
            stop_sequences: Vec::new(),
            timeout_secs: 120,
        }
    }
}

impl GenerationSettings {
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
            stop_sequences: self.stop_sequences.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionSettings {
    /// Documents chunked and embedded concurrently.
    pub workers: usize,
    /// Directory of `.txt` / `.md` files ingested at startup.
    pub source_dir: Option<String>,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            source_dir: None,
        }
    }
}
