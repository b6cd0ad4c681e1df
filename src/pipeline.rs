//! The retrieval-and-grounding pipeline.
//!
//! One `RagPipeline` is built at startup from [`Settings`] and shared behind
//! an `Arc`. It owns every component of the ingestion path
//! (chunker → embedder → index) and of the query path
//! (embedder → retriever → assembler → gateway).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::context::{Citation, ContextAssembler, ContextWindow, ContextWindowConfig, Prompt};
use crate::core::config::defaults::NO_CONTEXT_ANSWER;
use crate::core::config::settings::{EmbeddingBackendKind, IndexBackendKind};
use crate::core::config::{AppPaths, Settings};
use crate::core::errors::RagError;
use crate::history::{ConversationMemory, Turn};
use crate::llm::{
    GenerationGateway, GenerationService, OpenAiChat, OpenAiCompatClient, OpenAiEmbeddings,
    SamplingParams, TokenStream,
};
use crate::rag::store::IndexFilter;
use crate::rag::types::{document_id_for, Document, IndexEntry, RetrievalResult, SourceDocument};
use crate::rag::{
    Chunker, Embedder, EmbedderConfig, EmbeddingBackend, HashingEmbeddings, MemoryIndex,
    OversizePolicy, Retriever, RetrieverConfig, SqliteIndex, VectorIndex,
};

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer_text: String,
    pub citations: Vec<Citation>,
    /// `false` when nothing relevant was indexed and no generation happened.
    pub grounded: bool,
}

pub struct AnswerStream {
    pub citations: Vec<Citation>,
    pub grounded: bool,
    pub tokens: TokenStream,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestedDocument {
    pub source_uri: String,
    pub document_id: String,
    pub chunks: usize,
    /// Chunks left out because they could not be embedded.
    pub skipped_chunks: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestFailure {
    pub source_uri: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub run_id: String,
    pub ingested: Vec<IngestedDocument>,
    pub failed: Vec<IngestFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub entries: usize,
    pub embedding_model: String,
    pub dimension: usize,
    pub generation_service: String,
    pub history_turns: usize,
}

pub struct RagPipeline {
    settings: Settings,
    chunker: Chunker,
    embedder: Arc<Embedder>,
    index: Arc<dyn VectorIndex>,
    retriever: Retriever,
    assembler: ContextAssembler,
    gateway: GenerationGateway,
    memory: ConversationMemory,
}

impl RagPipeline {
    /// Assemble a pipeline from explicit collaborators.
    pub fn new(
        settings: Settings,
        embedding_backend: Arc<dyn EmbeddingBackend>,
        index: Arc<dyn VectorIndex>,
        generation: Arc<dyn GenerationService>,
    ) -> Result<Self, RagError> {
        if index.dimension() != embedding_backend.dimension() {
            return Err(RagError::config(format!(
                "Index dimension {} does not match embedding dimension {}",
                index.dimension(),
                embedding_backend.dimension()
            )));
        }
        if index.model_id() != embedding_backend.model_id() {
            return Err(RagError::config(format!(
                "Index holds vectors of '{}' but the embedder uses '{}'",
                index.model_id(),
                embedding_backend.model_id()
            )));
        }

        let chunker = Chunker::new(settings.chunking.max_chunk_size, settings.chunking.overlap)?;
        let embedder = Arc::new(Embedder::new(
            embedding_backend,
            EmbedderConfig {
                batch_size: settings.embedding.batch_size,
                normalize: settings.embedding.normalize,
                requests_per_second: settings.embedding.requests_per_second,
                ..EmbedderConfig::default()
            },
        ));
        let retriever = Retriever::new(
            embedder.clone(),
            index.clone(),
            RetrieverConfig {
                over_fetch_factor: settings.retrieval.over_fetch_factor,
                dedup_threshold: settings.retrieval.dedup_threshold as f32,
                min_score: settings.retrieval.min_score,
            },
        );
        let assembler = ContextAssembler::new(
            ContextWindow::new(ContextWindowConfig {
                context_window_tokens: settings.context.context_window_tokens,
                reserved_output_tokens: settings.context.reserved_output_tokens,
            }),
            settings.context.instructions.clone(),
        );
        let memory = ConversationMemory::new(settings.context.history_turns);

        Ok(Self {
            chunker,
            embedder,
            index,
            retriever,
            assembler,
            gateway: GenerationGateway::new(generation),
            memory,
            settings,
        })
    }

    /// Build the configured backends and the pipeline on top of them.
    pub async fn from_settings(settings: Settings, paths: &AppPaths) -> Result<Self, RagError> {
        let embedding_backend: Arc<dyn EmbeddingBackend> = match settings.embedding.backend {
            EmbeddingBackendKind::Openai => {
                let client = OpenAiCompatClient::new(
                    &settings.embedding.base_url,
                    settings.embedding.api_key.clone(),
                    Duration::from_secs(settings.embedding.timeout_secs),
                )
                .map_err(|e| RagError::config(format!("{:#}", e)))?;
                Arc::new(OpenAiEmbeddings::new(
                    client,
                    settings.embedding.model_id.clone(),
                    settings.embedding.dimension,
                    settings.embedding.max_input_tokens,
                ))
            }
            EmbeddingBackendKind::Hashing => Arc::new(HashingEmbeddings::new(
                settings.embedding.dimension,
                settings.embedding.max_input_tokens,
            )),
        };

        let index: Arc<dyn VectorIndex> = match settings.index.backend {
            IndexBackendKind::Sqlite => {
                let path = paths.resolve(&settings.index.path);
                tracing::info!("Opening vector index at {}", path.display());
                Arc::new(
                    SqliteIndex::open(path, embedding_backend.model_id(), embedding_backend.dimension())
                        .await?,
                )
            }
            IndexBackendKind::Memory => Arc::new(MemoryIndex::new(
                embedding_backend.model_id(),
                embedding_backend.dimension(),
            )),
        };

        let generation_client = OpenAiCompatClient::new(
            &settings.generation.base_url,
            settings.generation.api_key.clone(),
            Duration::from_secs(settings.generation.timeout_secs),
        )
        .map_err(|e| RagError::config(format!("{:#}", e)))?;
        let generation = Arc::new(OpenAiChat::new(
            generation_client,
            settings.generation.model_id.clone(),
            settings.generation.max_input_tokens,
        ));

        Self::new(settings, embedding_backend, index, generation)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Ingest documents on a bounded worker pool. A failing document is
    /// reported and does not affect the others. When the same source appears
    /// twice, the later copy wins.
    pub async fn ingest(&self, documents: Vec<SourceDocument>) -> IngestReport {
        let run_id = uuid::Uuid::new_v4().to_string();

        let mut latest: HashMap<String, SourceDocument> = HashMap::new();
        for document in documents {
            latest.insert(document.source_uri.clone(), document);
        }
        let total = latest.len();
        tracing::info!(run_id = %run_id, documents = total, "Ingestion started");

        let workers = self.settings.ingestion.workers.max(1);
        let outcomes: Vec<(String, Result<IngestedDocument, RagError>)> =
            stream::iter(latest.into_values())
                .map(|document| async move {
                    let source_uri = document.source_uri.clone();
                    (source_uri, self.ingest_document(document).await)
                })
                .buffer_unordered(workers)
                .collect()
                .await;

        let mut ingested = Vec::new();
        let mut failed = Vec::new();
        for (source_uri, outcome) in outcomes {
            match outcome {
                Ok(document) => ingested.push(document),
                Err(err) => {
                    tracing::warn!(source_uri = %source_uri, "Ingestion failed: {}", err);
                    failed.push(IngestFailure {
                        source_uri,
                        error: err.to_string(),
                    });
                }
            }
        }
        ingested.sort_by(|a, b| a.source_uri.cmp(&b.source_uri));
        failed.sort_by(|a, b| a.source_uri.cmp(&b.source_uri));

        tracing::info!(
            run_id = %run_id,
            ingested = ingested.len(),
            failed = failed.len(),
            "Ingestion finished"
        );
        IngestReport {
            run_id,
            ingested,
            failed,
        }
    }

    /// Chunk, embed and index one document, replacing any previous version.
    pub async fn ingest_document(&self, source: SourceDocument) -> Result<IngestedDocument, RagError> {
        let document = Document::from(source);
        let chunks = self.chunker.chunk(&document);

        if chunks.is_empty() {
            self.index.delete(&document.id).await?;
            return Ok(IngestedDocument {
                source_uri: document.source_uri,
                document_id: document.id,
                chunks: 0,
                skipped_chunks: Vec::new(),
            });
        }

        let oversize: OversizePolicy = self.settings.embedding.oversize;
        let embedded = self.embedder.embed_chunks(&chunks, oversize).await;
        if embedded.vectors.is_empty() {
            if let Some(failure) = embedded.failures.first() {
                return Err(failure.error.clone().into());
            }
        }

        let mut vectors: HashMap<String, _> = embedded
            .vectors
            .into_iter()
            .map(|vector| (vector.chunk_id.clone(), vector))
            .collect();
        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .filter_map(|chunk| {
                vectors.remove(&chunk.id).map(|embedding| IndexEntry {
                    chunk,
                    embedding,
                    source_uri: document.source_uri.clone(),
                })
            })
            .collect();
        let indexed = entries.len();

        self.index.upsert(entries).await?;
        tracing::info!(
            source_uri = %document.source_uri,
            chunks = indexed,
            skipped = embedded.failures.len(),
            "Document ingested"
        );

        Ok(IngestedDocument {
            source_uri: document.source_uri,
            document_id: document.id,
            chunks: indexed,
            skipped_chunks: embedded.failures.into_iter().map(|f| f.chunk_id).collect(),
        })
    }

    /// Remove a document from the index. Returns the number of entries removed.
    pub async fn delete_source(&self, source_uri: &str) -> Result<usize, RagError> {
        let removed = self.index.delete(&document_id_for(source_uri)).await?;
        tracing::info!(source_uri = %source_uri, removed, "Document removed");
        Ok(removed)
    }

    pub async fn retrieve(&self, query_text: &str) -> Result<Vec<RetrievalResult>, RagError> {
        self.retrieve_within(query_text, None).await
    }

    /// Retrieve only among entries matching `filter`.
    pub async fn retrieve_within(
        &self,
        query_text: &str,
        filter: Option<&IndexFilter>,
    ) -> Result<Vec<RetrievalResult>, RagError> {
        self.retriever
            .retrieve_filtered(
                query_text,
                self.settings.retrieval.top_k,
                self.settings.retrieval.budget_chars,
                filter,
            )
            .await
    }

    /// Answer a question from the indexed documents.
    pub async fn answer(&self, query_text: &str) -> Result<Answer, RagError> {
        self.answer_within(query_text, None).await
    }

    /// Answer a question from the documents matching `filter`.
    pub async fn answer_within(
        &self,
        query_text: &str,
        filter: Option<&IndexFilter>,
    ) -> Result<Answer, RagError> {
        let results = self.retrieve_within(query_text, filter).await?;
        if results.is_empty() {
            tracing::info!("No grounding context found");
            return Ok(Answer {
                answer_text: NO_CONTEXT_ANSWER.to_string(),
                citations: Vec::new(),
                grounded: false,
            });
        }

        let prompt = self.assemble(query_text, &results)?;
        let answer_text = self.gateway.generate(&prompt, &self.sampling()).await?;
        self.memory.record(query_text, answer_text.clone());

        tracing::info!(citations = prompt.citations.len(), "Answer generated");
        Ok(Answer {
            answer_text,
            citations: prompt.citations,
            grounded: true,
        })
    }

    /// Like [`answer_within`](Self::answer_within), but streams the answer
    /// text. The caller records the finished turn with
    /// [`record_turn`](Self::record_turn).
    pub async fn answer_stream(
        &self,
        query_text: &str,
        filter: Option<&IndexFilter>,
    ) -> Result<AnswerStream, RagError> {
        let results = self.retrieve_within(query_text, filter).await?;
        if results.is_empty() {
            let (tx, rx) = mpsc::channel(1);
            let _ = tx.send(Ok(NO_CONTEXT_ANSWER.to_string())).await;
            return Ok(AnswerStream {
                citations: Vec::new(),
                grounded: false,
                tokens: TokenStream::new(rx),
            });
        }

        let prompt = self.assemble(query_text, &results)?;
        let tokens = self.gateway.stream(&prompt, &self.sampling()).await?;
        Ok(AnswerStream {
            citations: prompt.citations,
            grounded: true,
            tokens,
        })
    }

    /// History is trimmed before context; the top result always survives.
    fn assemble(&self, query_text: &str, results: &[RetrievalResult]) -> Result<Prompt, RagError> {
        let history = self.memory.turns();
        self.assembler
            .assemble_with_history(query_text, results, &history)
    }

    pub fn record_turn(&self, question: &str, answer: &str) {
        self.memory.record(question, answer);
    }

    pub fn history(&self) -> Vec<Turn> {
        self.memory.turns()
    }

    pub fn clear_history(&self) {
        self.memory.clear();
    }

    pub async fn count(&self, source_uri: Option<&str>) -> Result<usize, RagError> {
        let filter = source_uri.map(IndexFilter::source);
        Ok(self.index.count(filter.as_ref()).await?)
    }

    pub async fn status(&self) -> Result<PipelineStatus, RagError> {
        Ok(PipelineStatus {
            entries: self.index.count(None).await?,
            embedding_model: self.embedder.model_id().to_string(),
            dimension: self.embedder.dimension(),
            generation_service: self.gateway.service_name().to_string(),
            history_turns: self.memory.len(),
        })
    }

    pub async fn shutdown(&self) {
        self.index.close().await;
        tracing::info!("Pipeline shut down");
    }

    fn sampling(&self) -> SamplingParams {
        self.settings.generation.sampling()
    }
}
