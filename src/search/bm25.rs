//! BM25 keyword scoring using Tantivy.
//!
//! The index lives entirely in RAM and is rebuilt from a corpus snapshot
//! whenever the snapshot changes. Documents arrive already tokenized; they
//! are indexed as whitespace-joined terms under a whitespace analyzer so
//! Tantivy sees exactly the tokens produced by [`Tokenizer`](super::Tokenizer).
//! Scoring uses Tantivy's BM25 (k1 = 1.2, b = 0.75).

use anyhow::{anyhow, Context, Result};
use std::cmp::Ordering;
use std::collections::HashSet;
use tantivy::collector::TopDocs;
use tantivy::query::BooleanQuery;
use tantivy::schema::{
    Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, Value as _, STORED,
};
use tantivy::tokenizer::{RemoveLongFilter, TextAnalyzer, WhitespaceTokenizer};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::debug;

use crate::storage::ChunkId;

/// Name under which the pre-tokenized analyzer is registered
const TERMS_TOKENIZER: &str = "docrag_terms";

/// Schema field names
const FIELD_CHUNK_ID: &str = "chunk_id";
const FIELD_TERMS: &str = "terms";

/// Indexing heap for the single writer thread
const WRITER_HEAP_BYTES: usize = 50_000_000;

/// Terms longer than this are dropped on both sides
const MAX_TERM_BYTES: usize = 256;

/// A chunk's tokens, ready for indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenizedDocument {
    pub chunk_id: ChunkId,
    pub tokens: Vec<String>,
}

impl TokenizedDocument {
    pub fn new(chunk_id: ChunkId, tokens: Vec<String>) -> Self {
        Self { chunk_id, tokens }
    }
}

#[derive(Clone)]
struct KeywordSchema {
    schema: Schema,
    chunk_id: Field,
    terms: Field,
}

impl KeywordSchema {
    fn new() -> Self {
        let mut schema_builder = Schema::builder();

        let chunk_id = schema_builder.add_i64_field(FIELD_CHUNK_ID, STORED);
        let terms = schema_builder.add_text_field(
            FIELD_TERMS,
            TextOptions::default().set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer(TERMS_TOKENIZER)
                    .set_index_option(IndexRecordOption::WithFreqs),
            ),
        );

        Self {
            schema: schema_builder.build(),
            chunk_id,
            terms,
        }
    }
}

/// In-memory BM25 index over one corpus snapshot.
pub struct KeywordIndex {
    schema: KeywordSchema,
    reader: IndexReader,
    num_docs: usize,
}

impl KeywordIndex {
    /// Index every document. Cost is linear in the total token count.
    ///
    /// Blocking; async callers should run it on a blocking thread.
    pub fn build(documents: &[TokenizedDocument]) -> Result<Self> {
        let schema = KeywordSchema::new();
        let index = Index::create_in_ram(schema.schema.clone());
        index.tokenizers().register(
            TERMS_TOKENIZER,
            TextAnalyzer::builder(WhitespaceTokenizer::default())
                .filter(RemoveLongFilter::limit(MAX_TERM_BYTES))
                .build(),
        );

        let mut writer: IndexWriter = index
            .writer_with_num_threads(1, WRITER_HEAP_BYTES)
            .context("Failed to create keyword index writer")?;

        for document in documents {
            writer
                .add_document(doc!(
                    schema.chunk_id => document.chunk_id.as_i64(),
                    schema.terms => document.tokens.join(" "),
                ))
                .with_context(|| format!("Failed to index chunk {}", document.chunk_id))?;
        }

        writer
            .commit()
            .context("Failed to commit keyword index")?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("Failed to create keyword index reader")?;

        debug!("Keyword index built over {} documents", documents.len());

        Ok(Self {
            schema,
            reader,
            num_docs: documents.len(),
        })
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.num_docs
    }

    pub fn is_empty(&self) -> bool {
        self.num_docs == 0
    }

    /// BM25 score of every document containing at least one query token.
    ///
    /// Duplicate query tokens count once. Results are ordered by score
    /// descending, then chunk id ascending. Documents sharing no term with
    /// the query are absent.
    pub fn score(&self, query_tokens: &[String]) -> Result<Vec<(ChunkId, f32)>> {
        if self.num_docs == 0 {
            return Ok(Vec::new());
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut terms = Vec::new();
        for token in query_tokens {
            if token.is_empty() || token.len() > MAX_TERM_BYTES || !seen.insert(token) {
                continue;
            }
            terms.push(Term::from_field_text(self.schema.terms, token));
        }

        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let query = BooleanQuery::new_multiterms_query(terms);
        let searcher = self.reader.searcher();
        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(self.num_docs))
            .context("Failed to execute keyword search")?;

        let mut scored = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            if score <= 0.0 {
                continue;
            }

            let document: TantivyDocument = searcher
                .doc(address)
                .context("Failed to retrieve keyword document")?;
            let chunk_id = document
                .get_first(self.schema.chunk_id)
                .and_then(|v| v.as_i64())
                .ok_or_else(|| anyhow!("Keyword document is missing its chunk id"))?;

            scored.push((ChunkId::new(chunk_id), score));
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        Ok(scored)
    }
}
