use crate::error::Result;
use semfind_vector_store::{cosine_similarity, SnapshotSlot, VectorSnapshot, VectorStoreError};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// One scored candidate. Ordering: higher similarity wins, ties go to the
/// lower id so rankings are deterministic across runs and search paths.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    id: i64,
    score: f32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Parallel brute-force cosine scan over a vector snapshot.
///
/// The slot range is partitioned into N contiguous chunks (N = worker
/// count); each worker keeps a bounded top-k min-heap while scanning its
/// chunk, and the per-worker results are combined by a k-way merge. The
/// call blocks until every chunk worker finishes.
pub struct ExactSearchEngine {
    worker_count: usize,
}

impl Default for ExactSearchEngine {
    fn default() -> Self {
        Self {
            worker_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

impl ExactSearchEngine {
    #[must_use]
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count: worker_count.max(1),
        }
    }

    /// Top-k `(id, similarity)` ranked by cosine similarity descending.
    /// Empty snapshot → empty result. Zero vectors score 0, never NaN.
    pub fn search(
        &self,
        snapshot: &VectorSnapshot,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<(i64, f32)>> {
        if query.len() != snapshot.dimension() {
            return Err(VectorStoreError::DimensionMismatch {
                expected: snapshot.dimension(),
                actual: query.len(),
            }
            .into());
        }
        if k == 0 || snapshot.is_empty() {
            return Ok(Vec::new());
        }

        let slots = snapshot.slots();
        let workers = self.worker_count.min(slots.len()).max(1);
        let chunk_size = slots.len().div_ceil(workers);

        let mut per_worker: Vec<Vec<Candidate>> = Vec::with_capacity(workers);
        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for chunk in slots.chunks(chunk_size) {
                handles.push(scope.spawn(move || scan_chunk(chunk, query, k)));
            }
            for handle in handles {
                // A panicked worker is a programming error; surface it.
                per_worker.push(handle.join().expect("scan worker panicked"));
            }
        });

        Ok(merge_top_k(per_worker, k))
    }
}

/// Scan one contiguous chunk keeping at most k best candidates. The heap is
/// a min-heap over `Candidate` ordering, so the root is always the current
/// worst of the kept set.
fn scan_chunk(chunk: &[SnapshotSlot], query: &[f32], k: usize) -> Vec<Candidate> {
    let mut heap: BinaryHeap<std::cmp::Reverse<Candidate>> = BinaryHeap::with_capacity(k + 1);

    for slot in chunk {
        if !slot.is_live() {
            continue;
        }
        let candidate = Candidate {
            id: slot.id(),
            score: cosine_similarity(query, slot.vector()),
        };
        if heap.len() < k {
            heap.push(std::cmp::Reverse(candidate));
        } else if let Some(worst) = heap.peek() {
            if candidate > worst.0 {
                heap.pop();
                heap.push(std::cmp::Reverse(candidate));
            }
        }
    }

    let mut sorted: Vec<Candidate> = heap.into_iter().map(|r| r.0).collect();
    sorted.sort_by(|a, b| b.cmp(a));
    sorted
}

/// K-way merge of per-worker descending lists.
fn merge_top_k(per_worker: Vec<Vec<Candidate>>, k: usize) -> Vec<(i64, f32)> {
    // Heap entries point at the head of each worker's remaining list.
    let mut heads: BinaryHeap<(Candidate, usize, usize)> = BinaryHeap::new();
    for (worker, list) in per_worker.iter().enumerate() {
        if let Some(first) = list.first() {
            heads.push((*first, worker, 0));
        }
    }

    let mut merged = Vec::with_capacity(k);
    while merged.len() < k {
        let Some((candidate, worker, pos)) = heads.pop() else {
            break;
        };
        merged.push((candidate.id, candidate.score));
        if let Some(next) = per_worker[worker].get(pos + 1) {
            heads.push((*next, worker, pos + 1));
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use semfind_vector_store::VectorStore;
    use tempfile::TempDir;

    fn snapshot_of(vectors: &[Vec<f32>]) -> (TempDir, VectorSnapshot) {
        let dir = TempDir::new().unwrap();
        let store =
            VectorStore::create(dir.path().join("vectors.bin"), vectors[0].len()).unwrap();
        for v in vectors {
            store.append(v).unwrap();
        }
        let snapshot = store.snapshot();
        (dir, snapshot)
    }

    #[test]
    fn ranks_by_similarity_descending() {
        let (_dir, snapshot) = snapshot_of(&[
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.9, 0.1, 0.0],
        ]);

        let engine = ExactSearchEngine::new(2);
        let results = engine.search(&snapshot, &[1.0, 0.0, 0.0], 2).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, 1);
        assert!((results[0].1 - 1.0).abs() < 1e-6);
        assert_eq!(results[1].0, 3);
    }

    #[test]
    fn equal_scores_break_ties_by_lower_id() {
        // Four identical vectors: every similarity is equal.
        let (_dir, snapshot) = snapshot_of(&[
            vec![1.0, 0.0],
            vec![1.0, 0.0],
            vec![1.0, 0.0],
            vec![1.0, 0.0],
        ]);

        let engine = ExactSearchEngine::new(3);
        let results = engine.search(&snapshot, &[1.0, 0.0], 3).unwrap();
        let ids: Vec<i64> = results.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn empty_snapshot_returns_empty() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::create(dir.path().join("vectors.bin"), 2).unwrap();
        let engine = ExactSearchEngine::default();
        let results = engine.search(&store.snapshot(), &[1.0, 0.0], 5).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn zero_query_vector_scores_zero_not_nan() {
        let (_dir, snapshot) = snapshot_of(&[vec![1.0, 0.0], vec![0.0, 1.0]]);
        let engine = ExactSearchEngine::new(1);
        let results = engine.search(&snapshot, &[0.0, 0.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        for (_, score) in results {
            assert_eq!(score, 0.0);
            assert!(!score.is_nan());
        }
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let (_dir, snapshot) = snapshot_of(&[vec![1.0, 0.0, 0.0]]);
        let engine = ExactSearchEngine::default();
        assert!(engine.search(&snapshot, &[1.0, 0.0], 1).is_err());
    }

    #[test]
    fn tombstoned_slots_are_ignored() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::create(dir.path().join("vectors.bin"), 2).unwrap();
        for i in 0..10 {
            store.append(&[i as f32, 1.0]).unwrap();
        }
        store.remove(1).unwrap();
        store.remove(2).unwrap();

        let engine = ExactSearchEngine::new(4);
        let results = engine
            .search(&store.snapshot(), &[1.0, 1.0], 10)
            .unwrap();
        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|(id, _)| *id != 1 && *id != 2));
    }

    #[test]
    fn more_workers_than_slots_still_works() {
        let (_dir, snapshot) = snapshot_of(&[vec![1.0, 0.0], vec![0.5, 0.5]]);
        let engine = ExactSearchEngine::new(64);
        let results = engine.search(&snapshot, &[1.0, 0.0], 5).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, 1);
    }

    #[test]
    fn single_and_multi_worker_agree() {
        let vectors: Vec<Vec<f32>> = (0..200)
            .map(|i| {
                let angle = (i as f32) * 0.05;
                vec![angle.cos(), angle.sin(), (i as f32) / 200.0]
            })
            .collect();
        let (_dir, snapshot) = snapshot_of(&vectors);

        let query = [0.7, 0.7, 0.2];
        let single = ExactSearchEngine::new(1)
            .search(&snapshot, &query, 10)
            .unwrap();
        let multi = ExactSearchEngine::new(8)
            .search(&snapshot, &query, 10)
            .unwrap();
        assert_eq!(single, multi);
    }
}
