use crate::error::{Result, VectorStoreError};
use crate::store::VectorSnapshot;
use hnsw::{Hnsw, Searcher};
use space::{Metric, Neighbor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Floor for the HNSW ef_search parameter; below this recall degrades
/// noticeably. Scales with k above the floor.
const MIN_EF_SEARCH: usize = 50;

/// Cosine distance scaled to u32 (the `space` crate requires an unsigned
/// integral distance unit). Zero vectors map to maximum distance.
struct CosineDistance;

impl Metric<Box<[f32]>> for CosineDistance {
    type Unit = u32;

    fn distance(&self, a: &Box<[f32]>, b: &Box<[f32]>) -> u32 {
        let a: &[f32] = a;
        let b: &[f32] = b;

        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let mag_b: f32 = b.iter().map(|y| y * y).sum::<f32>().sqrt();

        if mag_a == 0.0 || mag_b == 0.0 {
            return u32::MAX;
        }

        // Similarity in [-1, 1] becomes distance in [0, 2], scaled to u32.
        let distance = 1.0 - dot / (mag_a * mag_b);
        (distance * (u32::MAX as f32 / 2.0)) as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApproximateIndexState {
    Uninitialized,
    Building,
    Ready,
    Stale,
}

struct Graph {
    hnsw: Hnsw<CosineDistance, Box<[f32]>, rand::rngs::StdRng, 16, 32>,
    ids: Vec<i64>,
    dimension: usize,
}

struct IndexInner {
    state: Mutex<ApproximateIndexState>,
    graph: RwLock<Option<Arc<Graph>>>,
    last_build: Mutex<Option<Duration>>,
    /// Set when the store mutates while a build is in flight, so the fresh
    /// graph is immediately known to be stale.
    dirty_during_build: AtomicBool,
}

/// Graph-based approximate nearest-neighbor index over a vector snapshot.
///
/// `build` constructs a new graph off to the side and swaps it in
/// atomically; readers either see the old complete graph or the new one,
/// never a half-built structure. A `Stale` index keeps serving the last
/// built graph (it may omit recently added files) until rebuilt.
#[derive(Clone)]
pub struct ApproximateIndex {
    inner: Arc<IndexInner>,
}

impl Default for ApproximateIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ApproximateIndex {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(IndexInner {
                state: Mutex::new(ApproximateIndexState::Uninitialized),
                graph: RwLock::new(None),
                last_build: Mutex::new(None),
                dirty_during_build: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> ApproximateIndexState {
        *self.lock_state()
    }

    /// Number of vectors in the currently servable graph.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.read_graph().as_ref().map_or(0, |g| g.ids.len())
    }

    #[must_use]
    pub fn last_build_duration(&self) -> Option<Duration> {
        *self
            .inner
            .last_build
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// True when `search` may be called: a built graph exists.
    #[must_use]
    pub fn is_servable(&self) -> bool {
        matches!(
            self.state(),
            ApproximateIndexState::Ready | ApproximateIndexState::Stale
        ) && self.read_graph().is_some()
    }

    /// Mark the current graph stale after a store mutation. Non-fatal: the
    /// old graph keeps serving until the next build.
    pub fn mark_stale(&self) {
        let mut state = self.lock_state();
        match *state {
            ApproximateIndexState::Ready => *state = ApproximateIndexState::Stale,
            ApproximateIndexState::Building => {
                self.inner.dirty_during_build.store(true, Ordering::SeqCst);
            }
            ApproximateIndexState::Uninitialized | ApproximateIndexState::Stale => {}
        }
    }

    /// Build a fresh graph from the snapshot and swap it in. CPU-bound;
    /// callers run this on a blocking task so in-flight searches are never
    /// held up.
    pub fn build(&self, snapshot: &VectorSnapshot) -> Result<()> {
        {
            let mut state = self.lock_state();
            *state = ApproximateIndexState::Building;
        }
        self.inner.dirty_during_build.store(false, Ordering::SeqCst);

        let started = Instant::now();
        let mut hnsw: Hnsw<CosineDistance, Box<[f32]>, rand::rngs::StdRng, 16, 32> =
            Hnsw::new(CosineDistance);
        let mut searcher: Searcher<u32> = Searcher::default();
        let mut ids = Vec::with_capacity(snapshot.len());

        for (id, vector) in snapshot.iter() {
            hnsw.insert(vector.to_vec().into_boxed_slice(), &mut searcher);
            ids.push(id);
        }

        let graph = Arc::new(Graph {
            hnsw,
            ids,
            dimension: snapshot.dimension(),
        });
        let elapsed = started.elapsed();

        {
            let mut slot = self
                .inner
                .graph
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *slot = Some(graph);
        }
        {
            let mut last_build = self
                .inner
                .last_build
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *last_build = Some(elapsed);
        }
        {
            let mut state = self.lock_state();
            *state = if self.inner.dirty_during_build.swap(false, Ordering::SeqCst) {
                ApproximateIndexState::Stale
            } else {
                ApproximateIndexState::Ready
            };
        }

        log::info!(
            "Built approximate index: {} vectors in {}ms",
            self.item_count(),
            elapsed.as_millis()
        );
        Ok(())
    }

    /// Approximate top-k `(id, similarity)` ranked descending, ties broken
    /// by lower id. Fails with `IndexNotReady` before the first build.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(i64, f32)>> {
        let graph = self
            .read_graph()
            .clone()
            .ok_or(VectorStoreError::IndexNotReady)?;

        if query.len() != graph.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: graph.dimension,
                actual: query.len(),
            });
        }
        if graph.ids.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let actual_k = k.min(graph.ids.len());
        let ef_search = (k * 2).max(MIN_EF_SEARCH);
        let mut neighbors = vec![
            Neighbor {
                index: !0,
                distance: !0
            };
            actual_k
        ];

        let mut searcher: Searcher<u32> = Searcher::default();
        let query: Box<[f32]> = query.to_vec().into_boxed_slice();
        graph
            .hnsw
            .nearest(&query, ef_search, &mut searcher, &mut neighbors);

        let mut results: Vec<(i64, f32)> = neighbors
            .into_iter()
            .filter(|n| n.index != !0)
            .filter_map(|n| {
                let id = *graph.ids.get(n.index)?;
                let distance = (n.distance as f32) / (u32::MAX as f32 / 2.0);
                let similarity = (1.0 - distance).clamp(-1.0, 1.0);
                Some((id, similarity))
            })
            .collect();

        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        results.truncate(k);
        Ok(results)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ApproximateIndexState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn read_graph(&self) -> std::sync::RwLockReadGuard<'_, Option<Arc<Graph>>> {
        self.inner
            .graph
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::VectorStore;
    use tempfile::TempDir;

    fn snapshot_with(vectors: &[[f32; 3]]) -> (TempDir, VectorStore) {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::create(dir.path().join("vectors.bin"), 3).unwrap();
        for v in vectors {
            store.append(v).unwrap();
        }
        (dir, store)
    }

    #[test]
    fn starts_uninitialized_and_rejects_search() {
        let index = ApproximateIndex::new();
        assert_eq!(index.state(), ApproximateIndexState::Uninitialized);
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 5),
            Err(VectorStoreError::IndexNotReady)
        ));
    }

    #[test]
    fn build_then_search_returns_nearest_first() {
        let (_dir, store) =
            snapshot_with(&[[1.0, 0.0, 0.0], [0.9, 0.1, 0.0], [0.0, 1.0, 0.0]]);
        let index = ApproximateIndex::new();
        index.build(&store.snapshot()).unwrap();

        assert_eq!(index.state(), ApproximateIndexState::Ready);
        assert_eq!(index.item_count(), 3);
        assert!(index.last_build_duration().is_some());

        let results = index.search(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, 1, "exact match should rank first");
        assert!(results[0].1 > 0.99);
        assert_eq!(results[1].0, 2);
    }

    #[test]
    fn mutation_marks_ready_index_stale_but_it_still_serves() {
        let (_dir, store) = snapshot_with(&[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        let index = ApproximateIndex::new();
        index.build(&store.snapshot()).unwrap();

        store.append(&[0.0, 0.0, 1.0]).unwrap();
        index.mark_stale();

        assert_eq!(index.state(), ApproximateIndexState::Stale);
        assert!(index.is_servable());
        // The stale graph omits the new vector by design.
        let results = index.search(&[0.0, 0.0, 1.0], 3).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn rebuild_picks_up_new_vectors() {
        let (_dir, store) = snapshot_with(&[[1.0, 0.0, 0.0]]);
        let index = ApproximateIndex::new();
        index.build(&store.snapshot()).unwrap();
        assert_eq!(index.item_count(), 1);

        store.append(&[0.0, 1.0, 0.0]).unwrap();
        index.mark_stale();
        index.build(&store.snapshot()).unwrap();

        assert_eq!(index.state(), ApproximateIndexState::Ready);
        assert_eq!(index.item_count(), 2);
    }

    #[test]
    fn search_rejects_wrong_query_dimension() {
        let (_dir, store) = snapshot_with(&[[1.0, 0.0, 0.0]]);
        let index = ApproximateIndex::new();
        index.build(&store.snapshot()).unwrap();

        assert!(matches!(
            index.search(&[1.0, 0.0], 1),
            Err(VectorStoreError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn empty_snapshot_builds_and_searches_empty() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::create(dir.path().join("vectors.bin"), 3).unwrap();
        let index = ApproximateIndex::new();
        index.build(&store.snapshot()).unwrap();

        assert_eq!(index.item_count(), 0);
        assert!(index.search(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());
    }
}
