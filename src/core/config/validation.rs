use super::settings::Settings;
use crate::core::errors::RagError;

pub fn validate_settings(settings: &Settings) -> Result<(), RagError> {
    let chunking = &settings.chunking;
    validate_usize_field("chunking.max_chunk_size", chunking.max_chunk_size, 1, 1_000_000)?;
    if chunking.overlap >= chunking.max_chunk_size {
        return Err(RagError::config(format!(
            "Invalid config at 'chunking.overlap': must be smaller than chunking.max_chunk_size ({})",
            chunking.max_chunk_size
        )));
    }

    let embedding = &settings.embedding;
    validate_required_string("embedding.model_id", &embedding.model_id)?;
    validate_usize_field("embedding.dimension", embedding.dimension, 1, 65_536)?;
    validate_usize_field("embedding.max_input_tokens", embedding.max_input_tokens, 1, 1_000_000)?;
    validate_usize_field("embedding.batch_size", embedding.batch_size, 1, 4096)?;
    if embedding.requests_per_second == Some(0) {
        return Err(RagError::config(
            "Invalid config at 'embedding.requests_per_second': must be at least 1",
        ));
    }

    validate_required_string("index.path", &settings.index.path)?;

    let retrieval = &settings.retrieval;
    validate_usize_field("retrieval.top_k", retrieval.top_k, 1, 1000)?;
    validate_usize_field("retrieval.budget_chars", retrieval.budget_chars, 1, 10_000_000)?;
    validate_usize_field("retrieval.over_fetch_factor", retrieval.over_fetch_factor, 1, 100)?;
    if !(0.0..=1.0).contains(&retrieval.dedup_threshold) {
        return Err(RagError::config(
            "Invalid config at 'retrieval.dedup_threshold': must be between 0 and 1",
        ));
    }
    if let Some(min_score) = retrieval.min_score {
        if !(-1.0..=1.0).contains(&min_score) {
            return Err(RagError::config(
                "Invalid config at 'retrieval.min_score': must be between -1 and 1",
            ));
        }
    }

    let context = &settings.context;
    if context.reserved_output_tokens >= context.context_window_tokens {
        return Err(RagError::config(format!(
            "Invalid config at 'context.reserved_output_tokens': must be smaller than context.context_window_tokens ({})",
            context.context_window_tokens
        )));
    }

    let generation = &settings.generation;
    validate_required_string("generation.model_id", &generation.model_id)?;
    validate_usize_field("generation.max_input_tokens", generation.max_input_tokens, 1, 10_000_000)?;
    if !(0.0..=2.0).contains(&generation.temperature) {
        return Err(RagError::config(
            "Invalid config at 'generation.temperature': must be between 0 and 2",
        ));
    }
    if generation.max_output_tokens == 0 {
        return Err(RagError::config(
            "Invalid config at 'generation.max_output_tokens': must be at least 1",
        ));
    }

    validate_usize_field("ingestion.workers", settings.ingestion.workers, 1, 256)?;

    Ok(())
}

fn validate_usize_field(path: &str, value: usize, min: usize, max: usize) -> Result<(), RagError> {
    if value < min || value > max {
        return Err(RagError::config(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_required_string(path: &str, value: &str) -> Result<(), RagError> {
    if value.trim().is_empty() {
        return Err(RagError::config(format!(
            "Invalid config at '{}': value cannot be empty",
            path
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        validate_settings(&Settings::default()).unwrap();
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let mut settings = Settings::default();
        settings.chunking.max_chunk_size = 100;
        settings.chunking.overlap = 100;

        let err = validate_settings(&settings).unwrap_err();
        assert!(matches!(err, RagError::Config(ref msg) if msg.contains("chunking.overlap")));
    }

    #[test]
    fn reserved_output_must_leave_room_for_the_prompt() {
        let mut settings = Settings::default();
        settings.context.context_window_tokens = 512;
        settings.context.reserved_output_tokens = 512;

        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn dedup_threshold_is_a_ratio() {
        let mut settings = Settings::default();
        settings.retrieval.dedup_threshold = 1.5;

        assert!(validate_settings(&settings).is_err());
    }
}
