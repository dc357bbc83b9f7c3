//! Pairwise recall of the approximate path against the exact path on the
//! same committed snapshot.

use semfind_search::ExactSearchEngine;
use semfind_vector_store::{ApproximateIndex, EmbeddingProvider, VectorStore};
use std::collections::HashSet;
use tempfile::TempDir;

const DIMENSION: usize = 32;
const CORPUS: usize = 300;
const K: usize = 10;
const RECALL_THRESHOLD: f32 = 0.9;

#[tokio::test]
async fn approximate_recall_at_k_meets_threshold() {
    let dir = TempDir::new().unwrap();
    let store = VectorStore::create(dir.path().join("vectors.bin"), DIMENSION).unwrap();
    let provider = EmbeddingProvider::stub(DIMENSION);

    for i in 0..CORPUS {
        let vector = provider.embed(&format!("corpus document {i}")).await.unwrap();
        store.append(&vector).unwrap();
    }

    let snapshot = store.snapshot();
    let index = ApproximateIndex::new();
    index.build(&snapshot).unwrap();
    let exact = ExactSearchEngine::new(4);

    let mut total_recall = 0.0f32;
    let queries = [
        "corpus document 3",
        "corpus document 150",
        "corpus document 299",
        "quarterly finance report",
        "completely unrelated query text",
    ];

    for query in queries {
        let query_vector = provider.embed(query).await.unwrap();

        let exact_ids: HashSet<i64> = exact
            .search(&snapshot, &query_vector, K)
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        let approx_ids: HashSet<i64> = index
            .search(&query_vector, K)
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();

        let overlap = exact_ids.intersection(&approx_ids).count();
        total_recall += overlap as f32 / K as f32;
    }

    let recall = total_recall / queries.len() as f32;
    assert!(
        recall >= RECALL_THRESHOLD,
        "recall@{K} was {recall:.2}, below {RECALL_THRESHOLD}"
    );
}
