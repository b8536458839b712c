//! RAG pipeline orchestrator
//!
//! Drives one request through the stage state machine:
//! Expand → Retrieve → Rerank → Verify → Assemble → Done.
//!
//! Expansion, scoring and assembly failures degrade to pass-through output.
//! Retrieval failures abort the request. Every executed stage emits a
//! `StageRecord` to the configured sink.

use crate::assembly::{AssembledContext, ContextAssembler};
use crate::expansion::{Expansion, ExpansionCache, QueryExpander};
use crate::scoring::{Reranker, ScorerHandle, Verifier};
use crate::stage::{MetricsStageSink, NoopStageSink, Stage, StageOutcome, StageRecord, StageSink};
use docrag_common::config::AppConfig;
use docrag_common::embeddings::create_embedder;
use docrag_common::errors::{AppError, Result};
use docrag_common::llm::create_language_model;
use docrag_common::{RagConfig, RetrievedChunk};
use docrag_search::retrieval::create_vector_store;
use docrag_search::{HybridRequest, HybridRetriever, Retriever, ScopeFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;
use validator::Validate;

/// Retrieval request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RagRequest {
    pub query: String,

    pub user_id: i64,

    #[serde(default)]
    pub scope: ScopeFilter,

    /// Overrides the configured token budget
    #[validate(range(min = 1))]
    pub max_tokens: Option<usize>,
}

impl RagRequest {
    pub fn new(user_id: i64, query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            user_id,
            scope: ScopeFilter::All,
            max_tokens: None,
        }
    }

    pub fn with_scope(mut self, scope: ScopeFilter) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Long-lived services shared by every request
#[derive(Clone)]
pub struct PipelineServices {
    pub expander: Arc<QueryExpander>,
    pub retriever: Arc<dyn Retriever>,
    pub reranker: Arc<Reranker>,
    pub verifier: Arc<Verifier>,
    pub assembler: Arc<ContextAssembler>,
    pub sink: Arc<dyn StageSink>,
}

impl PipelineServices {
    /// Build every service once from configuration
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let store = create_vector_store(&config.vector_store)?;
        let retriever = HybridRetriever::new(store, embedder, config.vector_store.collection_prefix.clone());

        let llm = create_language_model(&config.llm)?;
        let cache = Arc::new(ExpansionCache::new(
            config.expansion_ttl(),
            config.expansion.cache_max_entries,
        ));

        let scoring = &config.scoring;
        let sink: Arc<dyn StageSink> = if config.observability.telemetry_enabled {
            Arc::new(MetricsStageSink)
        } else {
            Arc::new(NoopStageSink)
        };

        info!(
            llm_enabled = llm.is_some(),
            reranker = %scoring.reranker.model,
            verifier = %scoring.verifier.model,
            store = %config.vector_store.provider,
            "Pipeline services initialized"
        );

        Ok(Self {
            expander: Arc::new(QueryExpander::new(llm, cache, config.expansion_timeout())),
            retriever: Arc::new(retriever),
            reranker: Arc::new(Reranker::new(
                Arc::new(ScorerHandle::from_config(&scoring.reranker)),
                scoring.reranker.batch_size,
            )),
            verifier: Arc::new(Verifier::new(
                Arc::new(ScorerHandle::from_config(&scoring.verifier)),
                scoring.verifier.batch_size,
            )),
            assembler: Arc::new(ContextAssembler::default()),
            sink,
        })
    }
}

/// Emits one `StageRecord` per executed stage
struct StageTrace<'a> {
    trace_id: Uuid,
    sink: &'a dyn StageSink,
    order: u32,
}

impl<'a> StageTrace<'a> {
    fn new(trace_id: Uuid, sink: &'a dyn StageSink) -> Self {
        Self { trace_id, sink, order: 0 }
    }

    fn record(&mut self, stage: Stage, started: Instant, input_count: usize, output_count: usize, success: bool) {
        self.order += 1;
        let record = StageRecord {
            trace_id: self.trace_id,
            stage,
            order: self.order,
            duration_ms: started.elapsed().as_millis() as u64,
            input_count,
            output_count,
            success,
            error_code: if success { None } else { stage.error_code().map(str::to_string) },
        };

        debug!(
            stage = %stage,
            order = record.order,
            duration_ms = record.duration_ms,
            input_count,
            output_count,
            success,
            "Stage finished"
        );

        if let Err(e) = self.sink.record_stage(&record) {
            debug!(error = %e, stage = %stage, "Stage telemetry dropped");
        }
    }
}

/// Multi-stage retrieval pipeline
pub struct RagPipeline {
    services: PipelineServices,
    config: RagConfig,
}

impl RagPipeline {
    pub fn new(services: PipelineServices, config: RagConfig) -> Self {
        Self { services, config }
    }

    /// Latency-oriented pipeline without cross-encoder stages
    pub fn fast(services: PipelineServices) -> Self {
        Self::new(services, RagConfig::fast())
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Run the full pipeline.
    ///
    /// Returns an empty context when retrieval finds nothing. Retrieval
    /// failures, a missing collection included, are returned as errors.
    pub async fn retrieve(
        &self,
        request: &RagRequest,
        config_override: Option<&RagConfig>,
    ) -> Result<AssembledContext> {
        let config = config_override.unwrap_or(&self.config);
        config.validate()?;
        request.validate()?;

        let trace_id = Uuid::new_v4();
        let span = info_span!("rag_pipeline", %trace_id, user_id = request.user_id);

        self.run(request, config, trace_id).instrument(span).await
    }

    /// Run the pipeline, reporting "nothing found" as `NoRelevantDocuments`
    pub async fn retrieve_context(
        &self,
        request: &RagRequest,
        config_override: Option<&RagConfig>,
    ) -> Result<AssembledContext> {
        match self.retrieve(request, config_override).await {
            Ok(context) if context.is_empty() => Err(AppError::NoRelevantDocuments),
            Err(e) if e.is_no_documents() => Err(AppError::NoRelevantDocuments),
            other => other,
        }
    }

    async fn run(&self, request: &RagRequest, config: &RagConfig, trace_id: Uuid) -> Result<AssembledContext> {
        let start = Instant::now();
        let query = request.query.trim();
        let max_tokens = request.max_tokens.unwrap_or(config.max_tokens);
        let mut trace = StageTrace::new(trace_id, self.services.sink.as_ref());

        info!(
            query_length = query.len(),
            scoped = !request.scope.is_unrestricted(),
            max_tokens,
            "Starting RAG pipeline"
        );

        let mut stage = Stage::Expand;
        let mut queries = vec![query.to_string()];
        let mut chunks: Vec<RetrievedChunk> = Vec::new();
        let mut candidate_count = 0;
        let mut context = AssembledContext::empty();

        loop {
            stage = match stage {
                Stage::Expand => {
                    if config.enable_expansion {
                        let started = Instant::now();
                        let outcome = self.expand(query, config.num_expansions).await;
                        trace.record(Stage::Expand, started, 1, outcome.output.len(), outcome.succeeded);
                        if !outcome.output.is_empty() {
                            queries = outcome.output;
                        }
                    }
                    Stage::Retrieve
                }

                Stage::Retrieve => {
                    let started = Instant::now();
                    let hybrid = HybridRequest {
                        user_id: request.user_id,
                        query: query.to_string(),
                        expanded_queries: queries.clone(),
                        scope: request.scope.clone(),
                        top_k: config.hybrid_top_k,
                        dense_top_k: config.dense_top_k,
                        sparse_top_k: config.sparse_top_k,
                    };

                    match self.services.retriever.retrieve(&hybrid).await {
                        Ok(found) => {
                            trace.record(Stage::Retrieve, started, queries.len(), found.len(), true);
                            candidate_count = found.len();
                            chunks = found;
                            if chunks.is_empty() {
                                warn!("No candidates retrieved from hybrid search");
                                Stage::Assemble
                            } else {
                                Stage::Rerank
                            }
                        }
                        Err(e) => {
                            trace.record(Stage::Retrieve, started, queries.len(), 0, false);
                            warn!(error = %e, "Hybrid retrieval failed");
                            return Err(e);
                        }
                    }
                }

                Stage::Rerank => {
                    if config.enable_reranking && chunks.len() > config.rerank_top_k {
                        let started = Instant::now();
                        let input_count = chunks.len();
                        let outcome = self.services.reranker.rerank(query, chunks, config.rerank_top_k).await;
                        trace.record(Stage::Rerank, started, input_count, outcome.output.len(), outcome.succeeded);
                        chunks = outcome.output;
                    } else {
                        chunks.truncate(config.rerank_top_k);
                    }
                    Stage::Verify
                }

                Stage::Verify => {
                    if config.enable_verification && chunks.len() > config.verify_top_k {
                        let started = Instant::now();
                        let input_count = chunks.len();
                        let outcome = self
                            .services
                            .verifier
                            .verify(query, chunks, config.verify_threshold, config.verify_top_k)
                            .await;
                        trace.record(Stage::Verify, started, input_count, outcome.output.len(), outcome.succeeded);
                        chunks = outcome.output;
                    } else {
                        chunks.truncate(config.verify_top_k);
                    }
                    Stage::Assemble
                }

                Stage::Assemble => {
                    let started = Instant::now();
                    let input_count = chunks.len();
                    let outcome = self.services.assembler.assemble_outcome(
                        std::mem::take(&mut chunks),
                        max_tokens,
                        config.enable_dedup,
                        config.enable_merge,
                    );
                    trace.record(Stage::Assemble, started, input_count, outcome.output.chunks.len(), outcome.succeeded);
                    context = outcome.output;
                    Stage::Done
                }

                Stage::Done => break,
            };
        }

        info!(
            candidates = candidate_count,
            final_chunks = context.chunks.len(),
            total_tokens = context.total_tokens,
            duration_ms = start.elapsed().as_millis() as u64,
            "RAG pipeline completed"
        );

        Ok(context)
    }

    async fn expand(&self, query: &str, n: usize) -> StageOutcome<Vec<String>> {
        let Expansion { queries, error, .. } = self.services.expander.expand_with_source(query, n, true).await;
        match error {
            None => StageOutcome::ok(queries),
            // No model configured: rule-based expansions are the normal path
            Some(AppError::LanguageModelUnavailable) => StageOutcome::degraded(queries),
            Some(e) => StageOutcome::failed(queries, e),
        }
    }
}
