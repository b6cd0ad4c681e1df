pub const EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const EMBEDDING_DIMENSION: usize = 384;
pub const EMBEDDING_MAX_INPUT_TOKENS: usize = 256;

pub const GENERATION_MODEL: &str = "mistralai/Mixtral-8x7B-Instruct-v0.1";

pub const INSTRUCTIONS: &str = "You are an expert technical assistant. Use the provided context to answer the user's question. If you don't know the answer, state that you don't know. Do not try to make up an answer.";

pub const NO_CONTEXT_ANSWER: &str = "I could not find any ingested documents relevant to this question, so I can't give a grounded answer. Ingest documentation covering this topic and ask again.";

pub fn default_config_yaml() -> &'static str {
    r#"server:
  host: 127.0.0.1
  port: 0
chunking:
  max_chunk_size: 1000
  overlap: 200
embedding:
  backend: openai
  model_id: sentence-transformers/all-MiniLM-L6-v2
  dimension: 384
  base_url: http://127.0.0.1:8090
  max_input_tokens: 256
  batch_size: 32
  normalize: true
  oversize: truncate
index:
  backend: sqlite
  path: index.db
retrieval:
  top_k: 4
  budget_chars: 6000
  over_fetch_factor: 3
  dedup_threshold: 0.9
context:
  context_window_tokens: 4096
  reserved_output_tokens: 512
  history_turns: 5
generation:
  base_url: http://127.0.0.1:8088
  model_id: mistralai/Mixtral-8x7B-Instruct-v0.1
  max_input_tokens: 3584
  temperature: 0.5
  max_output_tokens: 512
  timeout_secs: 120
ingestion:
  workers: 4
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::settings::Settings;

    #[test]
    fn shipped_yaml_matches_struct_defaults() {
        let from_yaml: Settings = serde_yaml::from_str(default_config_yaml()).unwrap();
        let defaults = Settings::default();

        assert_eq!(from_yaml.chunking.max_chunk_size, defaults.chunking.max_chunk_size);
        assert_eq!(from_yaml.chunking.overlap, defaults.chunking.overlap);
        assert_eq!(from_yaml.embedding.model_id, defaults.embedding.model_id);
        assert_eq!(from_yaml.embedding.dimension, defaults.embedding.dimension);
        assert_eq!(from_yaml.retrieval.top_k, defaults.retrieval.top_k);
        assert_eq!(from_yaml.generation.model_id, defaults.generation.model_id);
        assert_eq!(
            from_yaml.context.reserved_output_tokens,
            defaults.context.reserved_output_tokens
        );
    }
}
