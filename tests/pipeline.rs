use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use docsage::core::config::Settings;
use docsage::core::errors::EmbeddingError;
use docsage::llm::provider::TokenReceiver;
use docsage::llm::{ChatMessage, GenerationService, SamplingParams};
use docsage::rag::types::{document_id_for, Chunk, EmbeddingVector, IndexEntry, SourceDocument};
use docsage::rag::{
    Embedder, EmbedderConfig, EmbeddingBackend, IndexFilter, MemoryIndex, SqliteIndex, VectorIndex,
};
use docsage::RagPipeline;

const DIM: usize = 16;

/// Maps synonyms onto shared axes so "feline" lands next to "cat".
struct ConceptEmbeddings;

impl ConceptEmbeddings {
    fn axis(word: &str) -> usize {
        match word {
            "cat" | "cats" | "feline" | "kitten" => 0,
            "dog" | "dogs" | "canine" | "puppy" => 1,
            "bird" | "birds" | "avian" => 2,
            other => 3 + other.bytes().map(|b| b as usize).sum::<usize>() % (DIM - 3),
        }
    }
}

#[async_trait]
impl EmbeddingBackend for ConceptEmbeddings {
    fn model_id(&self) -> &str {
        "concept-test"
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn max_input_tokens(&self) -> usize {
        512
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0; DIM];
                for word in text
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|w| !w.is_empty())
                {
                    vector[Self::axis(&word.to_lowercase())] += 1.0;
                }
                vector
            })
            .collect())
    }
}

struct ScriptedGeneration {
    calls: AtomicUsize,
}

impl ScriptedGeneration {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl GenerationService for ScriptedGeneration {
    fn name(&self) -> &str {
        "scripted"
    }

    fn max_input_tokens(&self) -> usize {
        4096
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        _sampling: &SamplingParams,
    ) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let context_lines = messages
            .last()
            .map(|m| m.content.lines().filter(|l| l.starts_with('[')).count())
            .unwrap_or(0);
        Ok(format!("Answer grounded in {} sources.", context_lines))
    }

    async fn stream(
        &self,
        _messages: &[ChatMessage],
        _sampling: &SamplingParams,
    ) -> anyhow::Result<TokenReceiver> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok("streamed".to_string())).await?;
        Ok(rx)
    }
}

fn settings(max_chunk_size: usize, overlap: usize) -> Settings {
    let mut settings = Settings::default();
    settings.chunking.max_chunk_size = max_chunk_size;
    settings.chunking.overlap = overlap;
    settings
}

fn build(
    settings: Settings,
    index: Arc<dyn VectorIndex>,
) -> (RagPipeline, Arc<ScriptedGeneration>) {
    let generation = Arc::new(ScriptedGeneration::new());
    let pipeline = RagPipeline::new(
        settings,
        Arc::new(ConceptEmbeddings),
        index,
        generation.clone(),
    )
    .unwrap();
    (pipeline, generation)
}

fn memory_index() -> Arc<dyn VectorIndex> {
    Arc::new(MemoryIndex::new("concept-test", DIM))
}

async fn sqlite_index(dir: &tempfile::TempDir) -> Arc<dyn VectorIndex> {
    Arc::new(
        SqliteIndex::open(dir.path().join("index.db"), "concept-test", DIM)
            .await
            .unwrap(),
    )
}

const MANUAL: &str = "Cats are small carnivorous mammals kept as pets.\n\n\
    Dogs were the first species to be domesticated by humans.\n\n\
    Birds are warm-blooded vertebrates with feathers and beaks.\n\n\
    A kitten becomes an adult cat at around one year of age.\n\n\
    Puppies need regular meals and plenty of sleep to grow.";

#[tokio::test]
async fn feline_query_ranks_the_cat_chunk_first() {
    let (pipeline, _) = build(settings(12, 0), memory_index());

    let report = pipeline
        .ingest(vec![SourceDocument::new(
            "animals.txt",
            "A cat sat. A dog ran. A bird flew.",
        )])
        .await;
    assert_eq!(report.ingested[0].chunks, 3);

    let results = pipeline.retrieve("feline").await.unwrap();

    assert_eq!(results[0].chunk.text, "A cat sat.");
    assert_eq!(results[0].rank, 1);
    assert_eq!(results[0].source_uri, "animals.txt");
}

#[tokio::test]
async fn empty_index_yields_no_results_and_an_ungrounded_answer() {
    let mut settings = settings(1000, 200);
    settings.retrieval.top_k = 5;
    settings.retrieval.budget_chars = 1000;
    let (pipeline, generation) = build(settings, memory_index());

    assert!(pipeline.retrieve("anything at all").await.unwrap().is_empty());

    let answer = pipeline.answer("anything at all").await.unwrap();
    assert!(!answer.grounded);
    assert!(answer.citations.is_empty());
    assert!(!answer.answer_text.is_empty());
    assert_eq!(generation.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn near_duplicate_chunks_collapse_to_the_better_one() {
    let original = "Cats groom themselves for hours every day, using their rough tongues to remove \
        loose fur and dirt. Grooming also helps a cat regulate its body temperature and spreads \
        natural oils that keep the coat healthy and waterproof in wet weather.";
    let copy = original.replace("for hours every day", "for hours each day");
    let index = memory_index();
    let (pipeline, _) = build(settings(1000, 200), index.clone());
    pipeline
        .ingest(vec![
            SourceDocument::new("grooming-a.md", original),
            SourceDocument::new("grooming-b.md", copy),
            SourceDocument::new("dogs.md", "Dogs bark at the mail carrier."),
        ])
        .await;

    let embedder = Embedder::new(Arc::new(ConceptEmbeddings), EmbedderConfig::default());
    let query = "why do cats groom";
    let raw = index
        .query(&embedder.embed_query(query).await.unwrap(), 10, None)
        .await
        .unwrap();
    let cat_hits: Vec<_> = raw
        .iter()
        .filter(|hit| hit.entry.source_uri.starts_with("grooming"))
        .collect();
    assert_eq!(cat_hits.len(), 2);

    let results = pipeline.retrieve(query).await.unwrap();
    let grooming: Vec<_> = results
        .iter()
        .filter(|r| r.source_uri.starts_with("grooming"))
        .collect();

    assert_eq!(grooming.len(), 1);
    assert_eq!(grooming[0].chunk.id, cat_hits[0].entry.chunk.id);
}

async fn assert_reingest_is_idempotent(index: Arc<dyn VectorIndex>) {
    let (pipeline, _) = build(settings(80, 20), index.clone());
    let filter = IndexFilter::source("manual.md");

    let first = pipeline
        .ingest(vec![SourceDocument::new("manual.md", MANUAL)])
        .await;
    let chunks = first.ingested[0].chunks;
    assert!(chunks > 1);

    pipeline
        .ingest(vec![SourceDocument::new("manual.md", MANUAL)])
        .await;
    assert_eq!(index.count(Some(&filter)).await.unwrap(), chunks);

    let shorter = pipeline
        .ingest(vec![SourceDocument::new("manual.md", "Only one short paragraph now.")])
        .await;
    assert_eq!(shorter.ingested[0].chunks, 1);
    assert_eq!(index.count(Some(&filter)).await.unwrap(), 1);
    assert_eq!(index.count(None).await.unwrap(), 1);
}

#[tokio::test]
async fn reingest_replaces_entries_in_memory_index() {
    assert_reingest_is_idempotent(memory_index()).await;
}

#[tokio::test]
async fn reingest_replaces_entries_in_sqlite_index() {
    let dir = tempfile::tempdir().unwrap();
    assert_reingest_is_idempotent(sqlite_index(&dir).await).await;
}

#[tokio::test]
async fn query_returns_every_entry_exactly_once_in_score_order() {
    let dir = tempfile::tempdir().unwrap();
    let index = sqlite_index(&dir).await;
    let (pipeline, _) = build(settings(60, 10), index.clone());
    pipeline
        .ingest(vec![
            SourceDocument::new("manual.md", MANUAL),
            SourceDocument::new("animals.txt", "A cat sat. A dog ran. A bird flew."),
        ])
        .await;
    let total = index.count(None).await.unwrap();
    assert!(total > 3);

    let embedder = Embedder::new(Arc::new(ConceptEmbeddings), EmbedderConfig::default());
    let vector = embedder.embed_query("puppy meals").await.unwrap();
    let hits = index.query(&vector, total + 10, None).await.unwrap();

    assert_eq!(hits.len(), total);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    let unique: HashSet<&str> = hits.iter().map(|h| h.entry.chunk.id.as_str()).collect();
    assert_eq!(unique.len(), total);
    assert!(hits.iter().all(|h| h.score.abs() <= 1.0 + 1e-5));
}

#[tokio::test]
async fn retrieval_never_exceeds_the_character_budget() {
    let mut settings = settings(60, 15);
    settings.retrieval.top_k = 10;
    settings.retrieval.budget_chars = 100;
    let (pipeline, _) = build(settings, memory_index());
    pipeline
        .ingest(vec![SourceDocument::new("manual.md", MANUAL)])
        .await;

    for query in ["cat", "dog puppies", "birds feathers", "humans", "sleep"] {
        let results = pipeline.retrieve(query).await.unwrap();
        let total: usize = results.iter().map(|r| r.chunk.text.chars().count()).sum();
        assert!(total <= 100, "{} chars retrieved for {:?}", total, query);
        let ranks: Vec<usize> = results.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, (1..=results.len()).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn embedding_the_same_text_twice_is_bit_identical() {
    let embedder = Embedder::new(Arc::new(ConceptEmbeddings), EmbedderConfig::default());
    let text = vec!["A kitten becomes an adult cat.".to_string()];

    let first = embedder.embed(&text).await.unwrap();
    let second = embedder.embed(&text).await.unwrap();

    let bits = |v: &[f32]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
    assert_eq!(bits(&first[0]), bits(&second[0]));
}

#[tokio::test]
async fn answer_is_generated_from_cited_context() {
    let (pipeline, generation) = build(settings(1000, 200), memory_index());
    pipeline
        .ingest(vec![
            SourceDocument::new("cats.md", "Cats sleep up to sixteen hours a day."),
            SourceDocument::new("dogs.md", "Dogs need daily walks."),
        ])
        .await;

    let answer = pipeline.answer("How long do cats sleep?").await.unwrap();

    assert!(answer.grounded);
    assert_eq!(generation.calls.load(Ordering::SeqCst), 1);
    assert_eq!(answer.citations[0].source_uri, "cats.md");
    assert_eq!(
        answer.citations[0].chunk_id,
        format!("{}:0", document_id_for("cats.md"))
    );
    let markers: Vec<usize> = answer.citations.iter().map(|c| c.marker).collect();
    assert_eq!(markers, (1..=answer.citations.len()).collect::<Vec<_>>());
    assert_eq!(
        answer.answer_text,
        format!("Answer grounded in {} sources.", answer.citations.len())
    );
}

#[tokio::test]
async fn deleted_sources_stop_matching() {
    let (pipeline, _) = build(settings(1000, 200), memory_index());
    pipeline
        .ingest(vec![SourceDocument::new("cats.md", "Cats purr when content.")])
        .await;
    assert_eq!(pipeline.retrieve("cat").await.unwrap().len(), 1);

    assert_eq!(pipeline.delete_source("cats.md").await.unwrap(), 1);
    assert!(pipeline.retrieve("cat").await.unwrap().is_empty());
}

#[tokio::test]
async fn filtered_retrieval_fills_k_from_the_selected_source_only() {
    let mut settings = settings(60, 10);
    settings.retrieval.top_k = 2;
    let (pipeline, _) = build(settings, memory_index());
    pipeline
        .ingest(vec![
            SourceDocument::new("manual.md", MANUAL),
            SourceDocument::new("animals.txt", "A cat sat. A dog ran. A bird flew."),
        ])
        .await;

    let manual = IndexFilter::source("manual.md");
    let results = pipeline
        .retrieve_within("cat dog bird", Some(&manual))
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.source_uri == "manual.md"));

    let animals = IndexFilter::source("animals.txt");
    let results = pipeline
        .retrieve_within("cat dog bird", Some(&animals))
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].source_uri, "animals.txt");
}

fn versioned_entries(version: &str, chunks: usize) -> Vec<IndexEntry> {
    let document_id = document_id_for("versioned.md");
    (0..chunks)
        .map(|i| {
            let id = Chunk::chunk_id(&document_id, i);
            let text = format!("{} part {}", version, i);
            let mut vector = vec![0.0; DIM];
            vector[i % DIM] = 1.0;
            IndexEntry {
                chunk: Chunk {
                    id: id.clone(),
                    document_id: document_id.clone(),
                    start_offset: i * 20,
                    end_offset: i * 20 + text.len(),
                    text,
                    sequence_index: i,
                    overlap_len: 0,
                },
                embedding: EmbeddingVector {
                    chunk_id: id,
                    vector,
                    model_id: "concept-test".to_string(),
                },
                source_uri: "versioned.md".to_string(),
            }
        })
        .collect()
}

/// Re-upserts a document while another task queries it; every read must see
/// exactly one complete version.
async fn assert_readers_never_see_partial_documents(index: Arc<dyn VectorIndex>) {
    let old = versioned_entries("old", 6);
    let new = versioned_entries("new", 4);
    index.upsert(old.clone()).await.unwrap();
    let filter = IndexFilter {
        source_uri: None,
        document_id: Some(document_id_for("versioned.md")),
    };

    let writer = {
        let index = index.clone();
        tokio::spawn(async move {
            for round in 0..40 {
                let batch = if round % 2 == 0 { new.clone() } else { old.clone() };
                index.upsert(batch).await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };
    let reader = {
        let index = index.clone();
        let filter = filter.clone();
        tokio::spawn(async move {
            let query_vector = vec![1.0; DIM];
            for _ in 0..200 {
                let hits = index.query(&query_vector, 100, Some(&filter)).await.unwrap();
                let versions: HashSet<&str> = hits
                    .iter()
                    .filter_map(|h| h.entry.chunk.text.split(' ').next())
                    .collect();
                assert_eq!(versions.len(), 1, "mixed versions: {:?}", versions);
                let expected = if versions.contains("old") { 6 } else { 4 };
                assert_eq!(hits.len(), expected);
                tokio::task::yield_now().await;
            }
        })
    };

    writer.await.unwrap();
    reader.await.unwrap();
    assert_eq!(index.count(Some(&filter)).await.unwrap(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn memory_index_readers_see_whole_documents() {
    assert_readers_never_see_partial_documents(memory_index()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sqlite_index_readers_see_whole_documents() {
    let dir = tempfile::tempdir().unwrap();
    assert_readers_never_see_partial_documents(sqlite_index(&dir).await).await;
}
