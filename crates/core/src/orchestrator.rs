use crate::embeddings::{check_embeddings, EmbeddingGateway};
use crate::error::QueryError;
use crate::models::{Answer, ChunkMatch, QueryRecord, RagOptions, SourceRef};
use crate::traits::{within, HistoryStore, LlmGateway, VectorStoreGateway};
use chrono::Utc;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Returned instead of a generated answer when nothing has been indexed yet.
pub const NO_DOCUMENTS_ANSWER: &str = "I couldn't find any relevant information in the uploaded documents to answer your question. Please make sure you have uploaded relevant documents or try rephrasing your question.";

const INSTRUCTIONS: &str = "You are a helpful assistant. Answer the question using ONLY the context below. If the context is insufficient, say you don't have enough information.";

/// Question → embedding → retrieval → generation → history.
pub struct QueryPipeline {
    embedder: Arc<dyn EmbeddingGateway>,
    vectors: Arc<dyn VectorStoreGateway>,
    llm: Arc<dyn LlmGateway>,
    history: Arc<dyn HistoryStore>,
    options: RagOptions,
}

impl QueryPipeline {
    pub fn new(
        embedder: Arc<dyn EmbeddingGateway>,
        vectors: Arc<dyn VectorStoreGateway>,
        llm: Arc<dyn LlmGateway>,
        history: Arc<dyn HistoryStore>,
        options: RagOptions,
    ) -> Self {
        Self {
            embedder,
            vectors,
            llm,
            history,
            options,
        }
    }

    pub async fn ask(
        &self,
        question: &str,
        max_results: Option<usize>,
    ) -> Result<Answer, QueryError> {
        let started = Instant::now();
        let question = question.trim();
        if question.is_empty() {
            return Err(QueryError::EmptyQuestion);
        }

        let top_k = self.options.resolve_top_k(max_results);
        let query_vector = self.embed_question(question).await?;
        let matches = self.retrieve(&query_vector, top_k).await?;

        let answer = if matches.is_empty() {
            NO_DOCUMENTS_ANSWER.to_string()
        } else {
            self.generate(question, &matches).await?
        };

        let sources: Vec<SourceRef> = matches.into_iter().map(SourceRef::from).collect();
        let processing_time = started.elapsed().as_secs_f64();

        self.history
            .append(QueryRecord {
                timestamp: unix_timestamp(),
                question: question.to_string(),
                answer: answer.clone(),
                sources: sources.clone(),
                processing_time,
            })
            .await?;

        info!(
            sources = sources.len(),
            top_k,
            processing_time,
            "question answered"
        );

        Ok(Answer {
            question: question.to_string(),
            answer,
            sources,
            processing_time,
        })
    }

    async fn embed_question(&self, question: &str) -> Result<Vec<f32>, QueryError> {
        within(
            "embedding",
            self.options.gateway_timeout,
            self.embedder.embed(question),
        )
        .await?
        .and_then(|vector| {
            check_embeddings(self.embedder.as_ref(), 1, std::slice::from_ref(&vector))?;
            Ok(vector)
        })
        .map_err(|error| {
            warn!(gateway = self.embedder.name(), %error, "question embedding failed");
            QueryError::Embedding(error)
        })
    }

    async fn retrieve(&self, vector: &[f32], top_k: usize) -> Result<Vec<ChunkMatch>, QueryError> {
        within(
            "vector store",
            self.options.gateway_timeout,
            self.vectors.query(vector, top_k),
        )
        .await?
        .map_err(|error| {
            warn!(collection = self.vectors.collection_name(), %error, "vector search failed");
            QueryError::VectorStore(error)
        })
    }

    async fn generate(&self, question: &str, matches: &[ChunkMatch]) -> Result<String, QueryError> {
        let prompt = build_prompt(question, matches);

        within("llm", self.options.gateway_timeout, self.llm.generate(&prompt))
            .await
            .map_err(|elapsed| {
                warn!(model = self.llm.model(), %elapsed, "answer generation timed out");
                QueryError::GatewayTimeout(elapsed)
            })?
            .map_err(|error| {
                warn!(model = self.llm.model(), %error, "answer generation failed");
                QueryError::Generation(error)
            })
    }
}

/// Question plus retrieved context, each passage tagged with its source in rank order.
pub fn build_prompt(question: &str, matches: &[ChunkMatch]) -> String {
    let mut prompt = String::with_capacity(
        INSTRUCTIONS.len()
            + question.len()
            + matches
                .iter()
                .map(|found| found.chunk.text.len() + 96)
                .sum::<usize>(),
    );

    prompt.push_str(INSTRUCTIONS);
    prompt.push_str("\n\nCONTEXT:\n");

    for (rank, found) in matches.iter().enumerate() {
        if rank > 0 {
            prompt.push_str("\n\n");
        }
        let _ = writeln!(
            prompt,
            "[Source {}] document_id={} chunk_index={}",
            rank + 1,
            found.chunk.document_id,
            found.chunk.chunk_index
        );
        prompt.push_str(&found.chunk.text);
    }

    let _ = write!(prompt, "\n\nQUESTION:\n{question}\n\nANSWER:");
    prompt
}

fn unix_timestamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::models::{Chunk, EmbeddedChunk};
    use crate::store::RecordLog;
    use crate::stores::LocalVectorStore;
    use crate::testing::{FailingEmbedder, FailingHistory, FailingLlm, RecordingLlm};
    use crate::ErrorClass;

    const DIMENSIONS: usize = 64;

    struct Harness {
        pipeline: QueryPipeline,
        llm: Arc<RecordingLlm>,
        history: Arc<RecordLog<QueryRecord>>,
    }

    async fn indexed_store(texts: &[&str]) -> Arc<LocalVectorStore> {
        let embedder = CharacterNgramEmbedder::new(DIMENSIONS);
        let store = Arc::new(LocalVectorStore::in_memory("documents"));
        let batch: Vec<EmbeddedChunk> = texts
            .iter()
            .enumerate()
            .map(|(index, text)| EmbeddedChunk {
                chunk: Chunk {
                    document_id: "doc-1".to_string(),
                    chunk_index: index,
                    text: text.to_string(),
                },
                embedding: embedder.embed_text(text),
            })
            .collect();
        if !batch.is_empty() {
            store.add(&batch).await.expect("seed store");
        }
        store
    }

    fn harness(vectors: Arc<LocalVectorStore>) -> Harness {
        let llm = Arc::new(RecordingLlm::default());
        let history = Arc::new(RecordLog::<QueryRecord>::in_memory());
        let pipeline = QueryPipeline::new(
            Arc::new(CharacterNgramEmbedder::new(DIMENSIONS)),
            vectors,
            llm.clone(),
            history.clone(),
            RagOptions::default(),
        );
        Harness {
            pipeline,
            llm,
            history,
        }
    }

    const MANUAL: [&str; 5] = [
        "The hydraulic pump must be inspected every 500 operating hours.",
        "Relief valves are set to 210 bar and sealed after calibration.",
        "Replace the pump filter cartridge when the indicator turns red.",
        "The warranty covers manufacturing defects for two years.",
        "Operators must wear hearing protection near the pump housing.",
    ];

    #[tokio::test]
    async fn returns_exactly_k_sources_ranked_by_similarity() -> Result<(), Box<dyn std::error::Error>> {
        let harness = harness(indexed_store(&MANUAL).await);
        let answer = harness
            .pipeline
            .ask("How often is the hydraulic pump inspected?", Some(3))
            .await?;

        assert_eq!(answer.answer, "generated answer");
        assert_eq!(answer.sources.len(), 3);
        assert_eq!(answer.sources[0].chunk_index, 0);
        assert!(answer
            .sources
            .windows(2)
            .all(|pair| pair[0].similarity_score >= pair[1].similarity_score));
        assert_eq!(harness.llm.call_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn equal_scores_keep_insertion_order() -> Result<(), Box<dyn std::error::Error>> {
        let same = "Relief valves are set to 210 bar.";
        let harness = harness(indexed_store(&[same, same, same, same, same]).await);
        let answer = harness.pipeline.ask("relief valve pressure", Some(3)).await?;

        let order: Vec<usize> = answer.sources.iter().map(|source| source.chunk_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
        Ok(())
    }

    #[tokio::test]
    async fn prompt_tags_sources_in_rank_order() -> Result<(), Box<dyn std::error::Error>> {
        let harness = harness(indexed_store(&MANUAL).await);
        let answer = harness.pipeline.ask("pump filter cartridge", Some(2)).await?;

        let prompt = harness.llm.last_prompt().expect("llm was called");
        let first = format!(
            "[Source 1] document_id=doc-1 chunk_index={}",
            answer.sources[0].chunk_index
        );
        let second = format!(
            "[Source 2] document_id=doc-1 chunk_index={}",
            answer.sources[1].chunk_index
        );
        let first_at = prompt.find(&first).expect("first source tagged");
        let second_at = prompt.find(&second).expect("second source tagged");
        assert!(first_at < second_at);
        assert!(prompt.contains(&answer.sources[0].text));
        assert!(prompt.ends_with("QUESTION:\npump filter cartridge\n\nANSWER:"));
        Ok(())
    }

    #[tokio::test]
    async fn empty_store_answers_without_calling_the_llm() -> Result<(), Box<dyn std::error::Error>> {
        let harness = harness(indexed_store(&[]).await);
        let answer = harness.pipeline.ask("anything indexed?", None).await?;

        assert_eq!(answer.answer, NO_DOCUMENTS_ANSWER);
        assert!(answer.sources.is_empty());
        assert_eq!(harness.llm.call_count(), 0);
        assert_eq!(harness.history.total().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn every_answer_is_recorded_once() -> Result<(), Box<dyn std::error::Error>> {
        let harness = harness(indexed_store(&MANUAL).await);
        harness.pipeline.ask("  warranty length?  ", None).await?;

        let records = harness.history.list(10).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].question, "warranty length?");
        assert_eq!(records[0].answer, "generated answer");
        assert_eq!(records[0].sources.len(), MANUAL.len());
        assert!(records[0].timestamp > 0.0);
        Ok(())
    }

    #[tokio::test]
    async fn blank_question_is_rejected() {
        let harness = harness(indexed_store(&MANUAL).await);
        let error = harness
            .pipeline
            .ask("   ", None)
            .await
            .expect_err("blank question");

        assert!(matches!(error, QueryError::EmptyQuestion));
        assert_eq!(error.class(), ErrorClass::BadRequest);
        assert_eq!(harness.llm.call_count(), 0);
        assert_eq!(harness.history.total().await, 0);
    }

    #[tokio::test]
    async fn generation_failure_is_surfaced_and_not_recorded() {
        let history = Arc::new(RecordLog::<QueryRecord>::in_memory());
        let pipeline = QueryPipeline::new(
            Arc::new(CharacterNgramEmbedder::new(DIMENSIONS)),
            indexed_store(&MANUAL).await,
            Arc::new(FailingLlm),
            history.clone(),
            RagOptions::default(),
        );

        let error = pipeline
            .ask("How often is the pump inspected?", None)
            .await
            .expect_err("generation fails");

        assert!(matches!(error, QueryError::Generation(_)));
        assert_eq!(error.class(), ErrorClass::BadGateway);
        assert_eq!(history.total().await, 0);
    }

    #[tokio::test]
    async fn embedding_failure_is_surfaced() {
        let history = Arc::new(RecordLog::<QueryRecord>::in_memory());
        let pipeline = QueryPipeline::new(
            Arc::new(FailingEmbedder),
            indexed_store(&MANUAL).await,
            Arc::new(RecordingLlm::default()),
            history.clone(),
            RagOptions::default(),
        );

        let result = pipeline.ask("pump", None).await;
        assert!(matches!(result, Err(QueryError::Embedding(_))));
        assert_eq!(history.total().await, 0);
    }

    #[tokio::test]
    async fn history_write_failure_fails_the_query() {
        let pipeline = QueryPipeline::new(
            Arc::new(CharacterNgramEmbedder::new(DIMENSIONS)),
            indexed_store(&MANUAL).await,
            Arc::new(RecordingLlm::default()),
            Arc::new(FailingHistory),
            RagOptions::default(),
        );

        let result = pipeline.ask("pump", None).await;
        assert!(matches!(result, Err(QueryError::Persistence(_))));
    }

    #[test]
    fn prompt_without_matches_still_carries_the_question() {
        let prompt = build_prompt("What is the torque?", &[]);
        assert!(prompt.starts_with(INSTRUCTIONS));
        assert!(prompt.contains("QUESTION:\nWhat is the torque?"));
        assert!(!prompt.contains("[Source"));
    }
}
