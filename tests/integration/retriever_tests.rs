use anyhow::Result;
use std::sync::Arc;

use docrag::embeddings::EmbeddingProvider;
use docrag::search::{CacheStatus, RrfFusion};
use docrag::{HybridRetriever, MockEmbedder, NewChunk, RagError, SearchMode};

use crate::helpers::mock_embeddings::StalledEmbedder;
use crate::helpers::test_harness::{mock_vector, TestHarness, TEST_DIMENSION};

const ALL_MODES: [SearchMode; 3] = [SearchMode::Vector, SearchMode::Keyword, SearchMode::Hybrid];

#[tokio::test]
async fn test_cat_and_dog_keyword_scenario() -> Result<()> {
    let harness = TestHarness::new().await?;
    let ids = harness
        .insert_texts(&["the cat sat", "a dog ran fast", "cats and dogs"])
        .await?;
    let retriever = harness.retriever();

    let results = retriever.query("cat", SearchMode::Keyword, 2).await?;

    assert_eq!(results.len(), 2);
    let returned: Vec<_> = results.iter().map(|r| r.chunk_id).collect();
    assert!(returned.contains(&ids[0]));
    assert!(returned.contains(&ids[2]));
    assert!(!returned.contains(&ids[1]), "Dog-only chunk must rank below cat chunks");
    assert!(results.iter().all(|r| r.keyword_rank.is_some() && r.vector_rank.is_none()));

    Ok(())
}

#[tokio::test]
async fn test_empty_store_returns_nothing_in_every_mode() -> Result<()> {
    let harness = TestHarness::new().await?;
    let retriever = harness.retriever();

    for mode in ALL_MODES {
        assert!(retriever.query("anything", mode, 5).await?.is_empty());
    }
    assert_eq!(harness.embedder.calls(), 0, "Empty store must not embed the query");

    Ok(())
}

#[tokio::test]
async fn test_keyword_mode_works_with_unreachable_embedder() -> Result<()> {
    let harness = TestHarness::with_embedder(MockEmbedder::unavailable(TEST_DIMENSION)).await?;
    let ids = harness
        .insert_texts(&["rust ownership rules", "python garbage collector"])
        .await?;
    let retriever = harness.retriever();

    let results = retriever.query("ownership", SearchMode::Keyword, 5).await?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk_id, ids[0]);
    assert_eq!(harness.embedder.calls(), 0, "Keyword mode must not touch the embedder");

    for mode in [SearchMode::Vector, SearchMode::Hybrid] {
        let err = retriever.query("ownership", mode, 5).await.unwrap_err();
        assert!(
            matches!(err, RagError::EmbeddingUnavailable(_)),
            "{} mode should surface the provider failure, got {:?}",
            mode,
            err
        );
        assert!(err.is_retryable());
    }

    Ok(())
}

#[tokio::test]
async fn test_recovered_embedder_serves_vector_queries() -> Result<()> {
    let harness = TestHarness::with_embedder(MockEmbedder::unavailable(TEST_DIMENSION)).await?;
    let ids = harness.insert_texts(&["alpha", "beta"]).await?;
    let retriever = harness.retriever();

    assert!(retriever.query("beta", SearchMode::Vector, 1).await.is_err());

    harness.embedder.set_available(true);
    let results = retriever.query("beta", SearchMode::Vector, 1).await?;
    assert_eq!(results[0].chunk_id, ids[1]);

    Ok(())
}

#[tokio::test]
async fn test_embedding_timeout() -> Result<()> {
    let mut harness = TestHarness::new().await?;
    harness.config.search.embedding_timeout_ms = 50;
    harness.insert_texts(&["alpha"]).await?;

    let retriever = HybridRetriever::new(
        Arc::clone(&harness.store),
        Arc::new(StalledEmbedder {
            dimension: TEST_DIMENSION,
        }),
        &harness.config,
    );

    let err = retriever
        .query("alpha", SearchMode::Vector, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Timeout { .. }));

    // Keyword mode is unaffected
    assert_eq!(retriever.query("alpha", SearchMode::Keyword, 1).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_keyword_results_follow_store_writes() -> Result<()> {
    let harness = TestHarness::new().await?;
    harness.insert_texts(&["first entry"]).await?;
    let retriever = harness.retriever();

    assert!(retriever.query("second", SearchMode::Keyword, 5).await?.is_empty());

    let added = harness.insert_texts(&["second entry"]).await?;
    let results = retriever.query("second", SearchMode::Keyword, 5).await?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk_id, added[0]);

    Ok(())
}

#[tokio::test]
async fn test_keyword_results_follow_same_size_replacement() -> Result<()> {
    let harness = TestHarness::new().await?;
    let original = harness.insert_texts(&["old wording"]).await?;
    let retriever = harness.retriever();

    assert_eq!(retriever.query("old", SearchMode::Keyword, 5).await?.len(), 1);

    // Delete one, add one: the document count is unchanged
    harness.store.delete(&original).await?;
    let replacement = harness.insert_texts(&["new wording"]).await?;

    assert!(retriever.query("old", SearchMode::Keyword, 5).await?.is_empty());
    let results = retriever.query("new", SearchMode::Keyword, 5).await?;
    assert_eq!(results[0].chunk_id, replacement[0]);

    Ok(())
}

#[tokio::test]
async fn test_corpus_cache_is_built_lazily_and_reused() -> Result<()> {
    let harness = TestHarness::new().await?;
    harness.insert_texts(&["alpha beta", "gamma"]).await?;
    let retriever = harness.retriever();

    assert_eq!(retriever.corpus().status().await, CacheStatus::Empty);

    retriever.query("alpha", SearchMode::Keyword, 5).await?;
    let first = retriever.corpus().snapshot().await?;
    retriever.query("gamma", SearchMode::Hybrid, 5).await?;
    let second = retriever.corpus().snapshot().await?;

    assert!(Arc::ptr_eq(&first, &second));
    assert!(matches!(
        retriever.corpus().status().await,
        CacheStatus::Ready { documents: 2, .. }
    ));

    Ok(())
}

#[tokio::test]
async fn test_hybrid_matches_fusion_of_both_paths() -> Result<()> {
    let harness = TestHarness::new().await?;
    harness
        .insert_texts(&[
            "vector databases store embeddings",
            "keyword search uses inverted indexes",
            "hybrid search combines vector and keyword search",
            "unrelated cooking recipe",
        ])
        .await?;
    let retriever = harness.retriever();
    let query = "keyword search";

    let vector = retriever.query(query, SearchMode::Vector, 10).await?;
    let keyword = retriever.query(query, SearchMode::Keyword, 10).await?;
    let hybrid = retriever.query(query, SearchMode::Hybrid, 3).await?;

    let vector_ids: Vec<_> = vector.iter().map(|r| r.chunk_id).collect();
    let keyword_ids: Vec<_> = keyword.iter().map(|r| r.chunk_id).collect();
    let expected = RrfFusion::with_k(harness.config.search.rrf_k).fuse(&vector_ids, &keyword_ids, 3);

    assert_eq!(hybrid.len(), 3);
    for (got, want) in hybrid.iter().zip(&expected) {
        assert_eq!(got.chunk_id, want.chunk_id);
        assert!((got.score - want.score).abs() < 1e-6);
        assert_eq!(got.vector_rank, want.vector_rank);
        assert_eq!(got.keyword_rank, want.keyword_rank);
    }

    Ok(())
}

#[tokio::test]
async fn test_vector_mode_ranks_identical_text_first() -> Result<()> {
    let harness = TestHarness::new().await?;
    let ids = harness
        .insert_texts(&["apples and pears", "trains and planes", "cats and dogs"])
        .await?;
    let retriever = harness.retriever();

    let results = retriever.query("trains and planes", SearchMode::Vector, 2).await?;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].chunk_id, ids[1]);
    assert!((results[0].score - 1.0).abs() < 1e-4);

    Ok(())
}

#[tokio::test]
async fn test_query_default_uses_configured_mode() -> Result<()> {
    let mut harness = TestHarness::with_embedder(MockEmbedder::unavailable(TEST_DIMENSION)).await?;
    harness.config.search.mode = SearchMode::Keyword;
    harness.config.search.default_limit = 1;
    harness.insert_texts(&["alpha one", "alpha two"]).await?;

    let retriever = harness.retriever();
    assert_eq!(retriever.search_mode(), SearchMode::Keyword);

    let results = retriever.query_default("alpha").await?;
    assert_eq!(results.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_wrong_dimension_provider_is_rejected_per_query() -> Result<()> {
    let harness = TestHarness::new().await?;
    harness
        .store
        .add(vec![NewChunk::new("alpha", mock_vector("alpha").await)])
        .await?;

    let small: Arc<dyn EmbeddingProvider> = Arc::new(MockEmbedder::new(TEST_DIMENSION / 2));
    let retriever = HybridRetriever::new(Arc::clone(&harness.store), small, &harness.config);

    let err = retriever
        .query("alpha", SearchMode::Vector, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::DimensionMismatch { .. }));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queries_during_writes_see_whole_batches() -> Result<()> {
    const BATCHES: usize = 10;
    const BATCH_SIZE: usize = 5;

    let harness = TestHarness::new().await?;
    let retriever = harness.retriever();
    let query_vector = mock_vector("shared").await;

    let store = Arc::clone(&harness.store);
    let writer = tokio::spawn(async move {
        for batch in 0..BATCHES {
            let mut chunks = Vec::with_capacity(BATCH_SIZE);
            for i in 0..BATCH_SIZE {
                let text = format!("shared batch{} item{}", batch, i);
                let vector = mock_vector(&text).await;
                chunks.push(NewChunk::new(text, vector));
            }
            store.add(chunks).await?;
        }
        Ok::<_, RagError>(())
    });

    let limit = BATCHES * BATCH_SIZE * 2;
    while !writer.is_finished() {
        let count = harness.store.document_count().await?;
        assert_eq!(count % BATCH_SIZE, 0, "Saw a partial batch: {} chunks", count);

        let keyword = retriever.query("shared", SearchMode::Keyword, limit).await?;
        assert_eq!(keyword.len() % BATCH_SIZE, 0, "Keyword path saw {}", keyword.len());

        let vector = harness.store.search_similar(&query_vector, limit).await?;
        assert_eq!(vector.len() % BATCH_SIZE, 0, "Vector path saw {}", vector.len());
    }
    writer.await??;

    let results = retriever.query("shared", SearchMode::Keyword, limit).await?;
    assert_eq!(results.len(), BATCHES * BATCH_SIZE);

    Ok(())
}
