use std::fmt::{Debug, Display};

use rustc_hash::FxHashMap;
use string_interner::DefaultSymbol;
use tracing::instrument;

type TermStringInterner = string_interner::StringInterner<string_interner::backend::BucketBackend>;

/// Common shape of everything that is fitted on an input and yields an immutable model.
pub trait Fittable<Input: ?Sized> {
    type Model;
    type Error;

    fn fit(&self, input: &Input) -> Result<Self::Model, Self::Error>;
}

/// Digest of the inputs an artifact was derived from.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(blake3::Hash);

impl Fingerprint {
    pub fn as_hash(&self) -> &blake3::Hash {
        &self.0
    }
}

impl Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", &self.0.to_hex()[..16])
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_hex())
    }
}

impl serde::Serialize for Fingerprint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0.to_hex().as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VectorizeError {
    #[error("no term survives the document frequency bounds")]
    EmptyVocabulary,
    #[error("max_df {max_df} admits at most {admitted} of {documents} documents, fewer than min_df {min_df}")]
    InvalidBounds {
        min_df: usize,
        max_df: f64,
        admitted: usize,
        documents: usize,
    },
    #[error("invalid n-gram range {0}..={1}")]
    InvalidNgramRange(usize, usize),
}

/// Failures of the engines fitted on a [`VectorSpace`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("{requested} {what} requested but the corpus only has {documents} documents")]
    InsufficientCorpusSize {
        what: &'static str,
        requested: usize,
        documents: usize,
    },
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter {
        name: &'static str,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TermWeight {
    pub term: String,
    pub weight: f64,
}

/// The `n` heaviest terms of a dense weight vector over the vocabulary, ties by column.
/// Terms with zero weight are never reported.
pub fn top_terms(space: &VectorSpace, weights: &[f64], n: usize) -> Vec<TermWeight> {
    let mut columns: Vec<usize> = (0..weights.len()).filter(|&c| weights[c] > 0.0).collect();
    columns.sort_unstable_by(|&a, &b| weights[b].total_cmp(&weights[a]).then(a.cmp(&b)));
    columns
        .into_iter()
        .take(n)
        .map(|column| TermWeight {
            term: space.term(column).to_string(),
            weight: weights[column],
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TfidfConfig {
    /// Keep only the most frequent terms across the corpus.
    pub max_features: Option<usize>,
    /// Minimum number of documents a term must appear in.
    pub min_df: usize,
    /// Maximum fraction of documents a term may appear in.
    pub max_df: f64,
    /// Smallest and largest n-gram length, inclusive.
    pub ngram_range: (usize, usize),
}

impl Default for TfidfConfig {
    fn default() -> Self {
        Self {
            max_features: Some(5000),
            min_df: 1,
            max_df: 1.0,
            ngram_range: (1, 1),
        }
    }
}

/// Compressed sparse row matrix, rows are documents and columns vocabulary terms.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<f64>,
    n_cols: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct SparseRow<'a> {
    pub indices: &'a [usize],
    pub values: &'a [f64],
}

impl<'a> SparseRow<'a> {
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + 'a {
        self.indices.iter().copied().zip(self.values.iter().copied())
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn norm(&self) -> f64 {
        self.values.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    pub fn dot_dense(&self, dense: &[f64]) -> f64 {
        self.iter().map(|(col, value)| value * dense[col]).sum()
    }
}

impl CsrMatrix {
    fn from_rows(rows: Vec<Vec<(usize, f64)>>, n_cols: usize) -> Self {
        let mut indptr = Vec::with_capacity(rows.len() + 1);
        let nnz = rows.iter().map(Vec::len).sum();
        let mut indices = Vec::with_capacity(nnz);
        let mut data = Vec::with_capacity(nnz);

        indptr.push(0);
        for row in rows {
            for (col, value) in row {
                indices.push(col);
                data.push(value);
            }
            indptr.push(indices.len());
        }

        Self {
            indptr,
            indices,
            data,
            n_cols,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.indptr.len() - 1
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    pub fn row(&self, row: usize) -> SparseRow<'_> {
        let range = self.indptr[row]..self.indptr[row + 1];
        SparseRow {
            indices: &self.indices[range.clone()],
            values: &self.data[range],
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = SparseRow<'_>> {
        (0..self.n_rows()).map(|row| self.row(row))
    }
}

/// The shared TF-IDF space every downstream engine works on. Immutable once fitted.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSpace {
    // sorted, the position is the column
    vocabulary: Vec<String>,
    idf: Vec<f64>,
    matrix: CsrMatrix,
    config: TfidfConfig,
    fingerprint: Fingerprint,
}

impl VectorSpace {
    pub fn n_documents(&self) -> usize {
        self.matrix.n_rows()
    }

    pub fn n_terms(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn vocabulary(&self) -> &[String] {
        &self.vocabulary
    }

    pub fn term(&self, column: usize) -> &str {
        &self.vocabulary[column]
    }

    pub fn column(&self, term: &str) -> Option<usize> {
        self.vocabulary
            .binary_search_by(|probe| probe.as_str().cmp(term))
            .ok()
    }

    pub fn idf(&self) -> &[f64] {
        &self.idf
    }

    pub fn matrix(&self) -> &CsrMatrix {
        &self.matrix
    }

    pub fn row(&self, document: usize) -> SparseRow<'_> {
        self.matrix.row(document)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn config(&self) -> &TfidfConfig {
        &self.config
    }

    /// The fingerprint `documents` would get under this space's configuration. Equal to
    /// [`Self::fingerprint`] only for the documents the space was fitted on, in the same order.
    pub fn fingerprint_of(&self, documents: &[&str]) -> Fingerprint {
        fingerprint(&self.config, documents)
    }
}

fn fingerprint(config: &TfidfConfig, documents: &[&str]) -> Fingerprint {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"tfidf-v1");
    hasher.update(&(config.ngram_range.0 as u64).to_le_bytes());
    hasher.update(&(config.ngram_range.1 as u64).to_le_bytes());
    hasher.update(&(config.min_df as u64).to_le_bytes());
    hasher.update(&config.max_df.to_bits().to_le_bytes());
    hasher.update(&config.max_features.map_or(u64::MAX, |m| m as u64).to_le_bytes());
    hasher.update(&(documents.len() as u64).to_le_bytes());
    for document in documents {
        // length prefix keeps ["ab", "c"] apart from ["a", "bc"]
        hasher.update(&(document.len() as u64).to_le_bytes());
        hasher.update(document.as_bytes());
    }
    Fingerprint(hasher.finalize())
}

#[derive(Debug, Clone, Default)]
pub struct TfidfVectorizer {
    config: TfidfConfig,
}

impl TfidfVectorizer {
    pub fn new(config: TfidfConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TfidfConfig {
        &self.config
    }

    fn count_terms(
        &self,
        document: &str,
        interner: &mut TermStringInterner,
        scratch: &mut String,
    ) -> FxHashMap<DefaultSymbol, usize> {
        let (min_n, max_n) = self.config.ngram_range;
        let mut counts = FxHashMap::default();

        // n-grams never cross a sentence line
        for line in document.lines() {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            for n in min_n..=max_n {
                for window in tokens.windows(n) {
                    scratch.clear();
                    for (i, token) in window.iter().enumerate() {
                        if i > 0 {
                            scratch.push(' ');
                        }
                        scratch.push_str(token);
                    }
                    *counts.entry(interner.get_or_intern(scratch.as_str())).or_insert(0) += 1;
                }
            }
        }
        counts
    }

    #[instrument(skip_all, fields(documents = documents.len()))]
    pub fn fit_documents(&self, documents: &[&str]) -> Result<VectorSpace, VectorizeError> {
        let config = &self.config;
        let (min_n, max_n) = config.ngram_range;
        if min_n == 0 || min_n > max_n {
            return Err(VectorizeError::InvalidNgramRange(min_n, max_n));
        }

        let n = documents.len();
        if n == 0 {
            return Err(VectorizeError::EmptyVocabulary);
        }

        let min_df = config.min_df.max(1);
        let max_df_docs = config.max_df * n as f64;
        let admitted = if config.max_df.is_finite() && config.max_df > 0.0 {
            (max_df_docs.floor() as usize).min(n)
        } else {
            0
        };
        if admitted < min_df {
            return Err(VectorizeError::InvalidBounds {
                min_df,
                max_df: config.max_df,
                admitted,
                documents: n,
            });
        }

        let mut interner = TermStringInterner::new();
        let mut scratch = String::new();
        let counts: Vec<FxHashMap<DefaultSymbol, usize>> = documents
            .iter()
            .map(|document| self.count_terms(document, &mut interner, &mut scratch))
            .collect();

        // symbol -> (document frequency, corpus frequency)
        let mut frequencies: FxHashMap<DefaultSymbol, (usize, usize)> = FxHashMap::default();
        for document in &counts {
            for (&symbol, &count) in document {
                let entry = frequencies.entry(symbol).or_insert((0, 0));
                entry.0 += 1;
                entry.1 += count;
            }
        }

        let mut kept: Vec<(&str, DefaultSymbol, usize, usize)> = frequencies
            .iter()
            .filter(|(_, &(df, _))| df >= min_df && df <= admitted)
            .filter_map(|(&symbol, &(df, cf))| {
                interner.resolve(symbol).map(|term| (term, symbol, df, cf))
            })
            .collect();

        if let Some(max_features) = config.max_features {
            if kept.len() > max_features {
                kept.sort_unstable_by(|a, b| b.3.cmp(&a.3).then(a.0.cmp(b.0)));
                kept.truncate(max_features);
            }
        }
        if kept.is_empty() {
            return Err(VectorizeError::EmptyVocabulary);
        }

        kept.sort_unstable_by(|a, b| a.0.cmp(b.0));
        let columns: FxHashMap<DefaultSymbol, usize> = kept
            .iter()
            .enumerate()
            .map(|(column, &(_, symbol, _, _))| (symbol, column))
            .collect();
        let idf: Vec<f64> = kept
            .iter()
            .map(|&(_, _, df, _)| ((1.0 + n as f64) / (1.0 + df as f64)).ln() + 1.0)
            .collect();
        let vocabulary: Vec<String> = kept.iter().map(|&(term, ..)| term.to_string()).collect();

        let rows = counts
            .iter()
            .map(|document| {
                let mut row: Vec<(usize, f64)> = document
                    .iter()
                    .filter_map(|(symbol, &count)| {
                        columns
                            .get(symbol)
                            .map(|&column| (column, count as f64 * idf[column]))
                    })
                    .collect();
                row.sort_unstable_by_key(|&(column, _)| column);

                let norm = row.iter().map(|(_, v)| v * v).sum::<f64>().sqrt();
                if norm > 0.0 {
                    for (_, value) in &mut row {
                        *value /= norm;
                    }
                }
                row
            })
            .collect();
        let matrix = CsrMatrix::from_rows(rows, vocabulary.len());

        tracing::info!(
            message = "vector space fitted",
            documents = n,
            terms = vocabulary.len(),
            interned = interner.len(),
            nnz = matrix.nnz()
        );

        Ok(VectorSpace {
            vocabulary,
            idf,
            matrix,
            config: self.config.clone(),
            fingerprint: fingerprint(&self.config, documents),
        })
    }
}

impl<'a> Fittable<[&'a str]> for TfidfVectorizer {
    type Model = VectorSpace;
    type Error = VectorizeError;

    fn fit(&self, documents: &[&'a str]) -> Result<VectorSpace, VectorizeError> {
        self.fit_documents(documents)
    }
}
