use crate::error::{Result, SearchError};
use crate::exact::ExactSearchEngine;
use crate::scorer::{filename_similarity, HybridScorer, ScorerConfig};
use semfind_metadata_store::{FileRecord, IndexingState, MetadataStore};
use semfind_protocol::{FilterOptions, SearchHit};
use semfind_vector_store::{
    ApproximateIndex, ApproximateIndexState, EmbeddingProvider, VectorSnapshot, VectorStore,
    VectorStoreError,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Tunables for the query path.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Use the approximate index only above this many vectors; the
    /// parallel exact scan stays interactive below it.
    pub crossover_threshold: usize,
    /// Candidates fetched per query: `max(k × factor, min)`, leaving
    /// headroom for re-ranking and filters.
    pub overfetch_factor: usize,
    pub overfetch_min: usize,
    /// Ceiling on the embedding request; the query fails rather than hangs.
    pub embed_timeout: Duration,
    pub scorer: ScorerConfig,
    /// Worker count for the exact scan. Defaults to the CPU core count.
    pub exact_workers: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            crossover_threshold: 10_000,
            overfetch_factor: 4,
            overfetch_min: 50,
            embed_timeout: Duration::from_secs(60),
            scorer: ScorerConfig::default(),
            exact_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

/// Public entry point for queries: picks the retrieval path, applies
/// structured filters, re-ranks with the hybrid scorer and truncates to k.
///
/// The scorer runs identically whether candidates came from the exact scan
/// or the approximate graph, so the two paths produce the same ranking for
/// the same candidate set.
pub struct SearchCoordinator {
    vectors: VectorStore,
    metadata: MetadataStore,
    approximate: ApproximateIndex,
    provider: Arc<EmbeddingProvider>,
    scorer: HybridScorer,
    config: SearchConfig,
}

impl SearchCoordinator {
    pub fn new(
        vectors: VectorStore,
        metadata: MetadataStore,
        approximate: ApproximateIndex,
        provider: Arc<EmbeddingProvider>,
        config: SearchConfig,
    ) -> Self {
        Self {
            vectors,
            metadata,
            approximate,
            provider,
            scorer: HybridScorer::new(config.scorer.clone()),
            config,
        }
    }

    /// Ranked top-k results for `text` under `filters`.
    pub async fn query(
        &self,
        text: &str,
        k: usize,
        filters: &FilterOptions,
    ) -> Result<Vec<SearchHit>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let snapshot = self.vectors.snapshot();
        let overfetch = (k * self.config.overfetch_factor).max(self.config.overfetch_min);

        // An empty vector store answers from metadata alone; no point
        // paying for a query embedding nobody will compare against.
        let candidates = if snapshot.is_empty() {
            Vec::new()
        } else {
            let query_vector = self.embed_query(text).await?;
            self.retrieve(snapshot, query_vector, overfetch).await?
        };

        let mut hits = Vec::with_capacity(candidates.len());
        let mut seen_files: HashSet<i64> = HashSet::new();

        let ids: Vec<i64> = candidates.iter().map(|(id, _)| *id).collect();
        let records = self.metadata.find_by_embedding_ids(&ids).await?;
        let by_embedding: HashMap<i64, FileRecord> = records
            .into_iter()
            .filter_map(|record| record.embedding_id.map(|e| (e, record)))
            .collect();

        for (embedding_id, similarity) in candidates {
            // A vector without a metadata row is an orphan from an
            // interrupted run; it must never surface alone.
            let Some(record) = by_embedding.get(&embedding_id) else {
                continue;
            };
            let Some(matched) = filters.evaluate(
                &record.absolute_path,
                &record.file_type,
                record.modified_time,
            ) else {
                continue;
            };
            seen_files.insert(record.id);
            hits.push(self.build_hit(record, similarity, matched, text));
        }

        // Metadata-only files stay filename-searchable: merge the ones the
        // vector paths cannot see.
        for record in self.metadata.list_by_state(IndexingState::MetadataOnly).await? {
            if seen_files.contains(&record.id) {
                continue;
            }
            if filename_similarity(text, &record.file_name) <= 0.0 {
                continue;
            }
            let Some(matched) = filters.evaluate(
                &record.absolute_path,
                &record.file_type,
                record.modified_time,
            ) else {
                continue;
            };
            hits.push(self.build_hit(&record, 0.0, matched, text));
        }

        hits.sort_by(|a, b| {
            b.final_score
                .total_cmp(&a.final_score)
                .then_with(|| a.file_id.cmp(&b.file_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Kick off a background rebuild when the approximate index is behind.
    /// Never blocks in-flight searches; the old graph keeps serving.
    pub fn trigger_rebuild(&self) {
        if !matches!(
            self.approximate.state(),
            ApproximateIndexState::Uninitialized | ApproximateIndexState::Stale
        ) {
            return;
        }
        let approximate = self.approximate.clone();
        let vectors = self.vectors.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = approximate.build(&vectors.snapshot()) {
                log::warn!("Background index rebuild failed: {e}");
            }
        });
    }

    /// Build the approximate index from the current snapshot and wait for
    /// it. Used at startup and by tooling that needs a Ready index.
    pub async fn rebuild_now(&self) -> Result<()> {
        let approximate = self.approximate.clone();
        let vectors = self.vectors.clone();
        tokio::task::spawn_blocking(move || approximate.build(&vectors.snapshot()))
            .await?
            .map_err(SearchError::from)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        match tokio::time::timeout(self.config.embed_timeout, self.provider.embed(text)).await {
            Ok(Ok(vector)) => Ok(vector),
            Ok(Err(e)) => Err(SearchError::ProviderUnavailable(e.to_string())),
            Err(_) => Err(SearchError::ProviderUnavailable(format!(
                "timed out after {:?}",
                self.config.embed_timeout
            ))),
        }
    }

    async fn retrieve(
        &self,
        snapshot: VectorSnapshot,
        query_vector: Vec<f32>,
        overfetch: usize,
    ) -> Result<Vec<(i64, f32)>> {
        let above_crossover = snapshot.len() > self.config.crossover_threshold;

        if above_crossover && self.approximate.is_servable() {
            if self.approximate.state() == ApproximateIndexState::Stale {
                self.trigger_rebuild();
            }
            match self.approximate.search(&query_vector, overfetch) {
                Ok(results) => return Ok(results),
                Err(VectorStoreError::IndexNotReady) => {
                    log::debug!("Approximate index vanished mid-query; using exact scan");
                }
                Err(e) => return Err(e.into()),
            }
        } else if above_crossover {
            // Big store with no usable graph yet: serve exact, rebuild in
            // the background.
            self.trigger_rebuild();
        }

        let engine = ExactSearchEngine::new(self.config.exact_workers);
        let results = tokio::task::spawn_blocking(move || {
            engine_search(&engine, &snapshot, &query_vector, overfetch)
        })
        .await??;
        Ok(results)
    }

    fn build_hit(
        &self,
        record: &FileRecord,
        similarity: f32,
        matched_filters: Vec<String>,
        query: &str,
    ) -> SearchHit {
        let lexical_score = filename_similarity(query, &record.file_name);
        let final_score =
            self.scorer
                .score(similarity, &record.file_name, query, record.size_bytes);
        SearchHit {
            file_id: record.id,
            file_path: record.absolute_path.clone(),
            file_name: record.file_name.clone(),
            similarity,
            lexical_score,
            final_score,
            matched_filters,
            // Snippets need the extracted text, which the core does not
            // retain; the UI layer fills this from the file on demand.
            matched_snippet: None,
        }
    }
}

fn engine_search(
    engine: &ExactSearchEngine,
    snapshot: &VectorSnapshot,
    query: &[f32],
    k: usize,
) -> Result<Vec<(i64, f32)>> {
    engine.search(snapshot, query, k)
}
