use anyhow::Result;
use futures::TryStreamExt;
use std::sync::Arc;

use docrag::embeddings::EmbeddingProvider;
use docrag::ingest::content_hash;
use docrag::storage::{keys, Metadata};
use docrag::{Ingestor, MockEmbedder, NewChunk, ParagraphChunker, RagError, SearchMode};

use crate::helpers::mock_embeddings::WrongDimensionEmbedder;
use crate::helpers::test_harness::{mock_vector, TestHarness, TEST_DIMENSION};

const GUIDE_V1: &str = "Install the toolchain first.\n\nThen run the build script.";
const GUIDE_V2: &str = "Install the toolchain first.\n\nThen run the release script.\n\nFinally tag the release.";

fn ingestor(harness: &TestHarness) -> Ingestor {
    Ingestor::new(
        Arc::clone(&harness.store),
        Arc::clone(&harness.embedder) as Arc<dyn EmbeddingProvider>,
        Arc::new(ParagraphChunker::new(40)),
    )
}

#[tokio::test]
async fn test_ingest_writes_chunks_with_source_metadata() -> Result<()> {
    let harness = TestHarness::new().await?;
    let ingestor = ingestor(&harness);

    let report = ingestor
        .ingest("guide.md", GUIDE_V1, Metadata::new().with(keys::TITLE, "Guide"))
        .await?;

    assert!(!report.unchanged);
    assert_eq!(report.chunk_ids.len(), 2);
    assert_eq!(report.source_hash, content_hash(GUIDE_V1));

    let chunks = harness.store.get(&report.chunk_ids).await?;
    for (index, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.metadata.source(), Some("guide.md"));
        assert_eq!(chunk.metadata.source_hash(), Some(report.source_hash.as_str()));
        assert_eq!(chunk.metadata.get_i64(keys::CHUNK_INDEX), Some(index as i64));
        assert_eq!(chunk.metadata.get_str(keys::CHUNKING_STRATEGY), Some("paragraph"));
        assert_eq!(chunk.metadata.get_str(keys::TITLE), Some("Guide"));
    }

    Ok(())
}

#[tokio::test]
async fn test_unchanged_source_is_skipped() -> Result<()> {
    let harness = TestHarness::new().await?;
    let ingestor = ingestor(&harness);

    ingestor.ingest("guide.md", GUIDE_V1, Metadata::new()).await?;
    let calls = harness.embedder.calls();

    let again = ingestor.ingest("guide.md", GUIDE_V1, Metadata::new()).await?;

    assert!(again.unchanged);
    assert!(again.chunk_ids.is_empty());
    assert_eq!(harness.embedder.calls(), calls, "Unchanged source must not be re-embedded");
    assert_eq!(harness.store.document_count().await?, 2);

    Ok(())
}

#[tokio::test]
async fn test_changed_source_replaces_previous_chunks() -> Result<()> {
    let harness = TestHarness::new().await?;
    let ingestor = ingestor(&harness);

    let first = ingestor.ingest("guide.md", GUIDE_V1, Metadata::new()).await?;
    let second = ingestor.ingest("guide.md", GUIDE_V2, Metadata::new()).await?;

    assert_eq!(second.replaced, first.chunk_ids.len());
    assert_eq!(harness.store.document_count().await?, second.chunk_ids.len());
    assert!(second.chunk_ids.iter().all(|id| !first.chunk_ids.contains(id)));

    let retriever = harness.retriever();
    assert!(retriever.query("build", SearchMode::Keyword, 5).await?.is_empty());
    assert_eq!(retriever.query("tag", SearchMode::Keyword, 5).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_provider_failure_keeps_previous_version() -> Result<()> {
    let harness = TestHarness::new().await?;
    let ingestor = ingestor(&harness);

    ingestor.ingest("guide.md", GUIDE_V1, Metadata::new()).await?;

    harness.embedder.set_available(false);
    let err = ingestor
        .ingest("guide.md", GUIDE_V2, Metadata::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RagError::EmbeddingUnavailable(_)));
    assert_eq!(
        harness.store.source_hash("guide.md").await?,
        Some(content_hash(GUIDE_V1))
    );
    assert_eq!(harness.store.document_count().await?, 2);

    Ok(())
}

#[tokio::test]
async fn test_wrong_dimension_provider_is_rejected() -> Result<()> {
    let harness = TestHarness::new().await?;
    let ingestor = Ingestor::new(
        Arc::clone(&harness.store),
        Arc::new(WrongDimensionEmbedder {
            dimension: TEST_DIMENSION + 1,
        }),
        Arc::new(ParagraphChunker::default()),
    );

    let err = ingestor
        .ingest("guide.md", GUIDE_V1, Metadata::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RagError::DimensionMismatch {
            expected: TEST_DIMENSION,
            ..
        }
    ));
    assert_eq!(harness.store.document_count().await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_small_batches_embed_everything() -> Result<()> {
    let harness = TestHarness::with_embedder(MockEmbedder::new(TEST_DIMENSION)).await?;
    let ingestor = ingestor(&harness).with_batch_size(1);

    let report = ingestor.ingest("guide.md", GUIDE_V2, Metadata::new()).await?;

    assert_eq!(report.chunk_ids.len(), 3);
    assert_eq!(harness.embedder.calls(), 3);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ingests_of_one_source_store_one_version() -> Result<()> {
    let harness = TestHarness::new().await?;
    let ingestor = Arc::new(ingestor(&harness));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let ingestor = Arc::clone(&ingestor);
            tokio::spawn(async move {
                ingestor
                    .ingest("doc.md", "A single short paragraph.", Metadata::new())
                    .await
            })
        })
        .collect();

    let mut written = 0;
    for handle in futures::future::join_all(handles).await {
        if !handle??.unchanged {
            written += 1;
        }
    }

    assert_eq!(written, 1, "Exactly one ingest writes the version");
    assert_eq!(harness.store.document_count().await?, 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_versions_never_mix() -> Result<()> {
    let harness = TestHarness::new().await?;
    let ingestor = Arc::new(ingestor(&harness));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let ingestor = Arc::clone(&ingestor);
            tokio::spawn(async move {
                let text = format!("Version {} of the document.", i);
                ingestor.ingest("doc.md", &text, Metadata::new()).await
            })
        })
        .collect();
    for handle in futures::future::join_all(handles).await {
        handle??;
    }

    let docs: Vec<_> = harness.store.all_documents().await?.try_collect().await?;
    assert_eq!(docs.len(), 1, "One version survives, without leftovers");

    let ids: Vec<_> = docs.iter().map(|(id, _)| *id).collect();
    let chunk = &harness.store.get(&ids).await?[0];
    assert_eq!(
        chunk.metadata.source_hash(),
        Some(content_hash(&chunk.content).as_str())
    );

    Ok(())
}

#[tokio::test]
async fn test_replace_source_skips_matching_hash() -> Result<()> {
    let harness = TestHarness::new().await?;
    let tagged = Metadata::new()
        .with(keys::SOURCE, "doc.md")
        .with(keys::SOURCE_HASH, "hash-1");

    let first = harness
        .store
        .replace_source(
            "doc.md",
            "hash-1",
            vec![NewChunk::new("v1", mock_vector("v1").await).with_metadata(tagged.clone())],
        )
        .await?;
    assert_eq!(first.map(|r| r.removed), Some(0));

    let again = harness
        .store
        .replace_source(
            "doc.md",
            "hash-1",
            vec![NewChunk::new("v1", mock_vector("v1").await).with_metadata(tagged)],
        )
        .await?;
    assert!(again.is_none());
    assert_eq!(harness.store.document_count().await?, 1);

    Ok(())
}
