use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use tracing::instrument;

use crate::{
    clustering::{ClusterSummary, Clustering},
    corpus::{Corpus, DocumentIndex, WebpageDocument},
    similarity::SimilarityPair,
    stats::DocumentStats,
    topics::{Topic, TopicModel},
    vector_space::{Fingerprint, VectorSpace},
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AssembleError {
    #[error("{structure} has {actual} entries but the corpus has {expected} documents")]
    IndexMismatch {
        structure: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{artifact} is stale: fitted on {found}, expected {expected}")]
    StaleArtifact {
        artifact: &'static str,
        expected: Fingerprint,
        found: Fingerprint,
    },
}

/// Everything known about one document, joined on its index.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DocumentRecord {
    #[serde(flatten)]
    pub document: WebpageDocument,
    pub stats: DocumentStats,
    pub topic_distribution: Vec<f64>,
    pub dominant_topic: usize,
    pub cluster: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct DocumentPair {
    pub a: DocumentIndex,
    pub b: DocumentIndex,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ClusterRecord {
    pub id: usize,
    pub size: usize,
    pub members: Vec<DocumentIndex>,
    pub top_terms: Vec<crate::vector_space::TermWeight>,
}

/// The consistent output of one run, keyed by [`DocumentIndex`] throughout.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ResultSet {
    fingerprint: Fingerprint,
    documents: Vec<DocumentRecord>,
    pairs: Vec<DocumentPair>,
    topics: Vec<Topic>,
    clusters: Vec<ClusterRecord>,
}

fn check_len(structure: &'static str, expected: usize, actual: usize) -> Result<(), AssembleError> {
    if expected == actual {
        Ok(())
    } else {
        Err(AssembleError::IndexMismatch {
            structure,
            expected,
            actual,
        })
    }
}

fn check_fresh(
    artifact: &'static str,
    expected: Fingerprint,
    found: Fingerprint,
) -> Result<(), AssembleError> {
    if expected == found {
        Ok(())
    } else {
        Err(AssembleError::StaleArtifact {
            artifact,
            expected,
            found,
        })
    }
}

/// Join the per-document structures of a run into a [`ResultSet`].
///
/// Fails instead of producing a partial result when any structure does not line up with
/// the corpus, or when a model was fitted on another vector space.
#[instrument(skip_all, fields(documents = corpus.len()))]
pub fn assemble(
    corpus: &Corpus,
    stats: &[DocumentStats],
    pairs: &[SimilarityPair],
    topics: &TopicModel,
    clustering: &Clustering,
    space: &VectorSpace,
    top_terms: usize,
) -> Result<ResultSet, AssembleError> {
    let n = corpus.len();
    check_len("vector space", n, space.n_documents())?;
    check_len("document stats", n, stats.len())?;
    check_len("topic distributions", n, topics.n_documents())?;
    check_len("cluster assignments", n, clustering.n_documents())?;
    check_fresh(
        "vector space",
        space.fingerprint_of(corpus.cleaned_texts().as_slice()),
        space.fingerprint(),
    )?;
    check_fresh("topic model", space.fingerprint(), topics.fingerprint())?;
    check_fresh("clustering", space.fingerprint(), clustering.fingerprint())?;

    let index = |row: usize| corpus.index_at(row);
    let pairs = pairs
        .iter()
        .map(|pair| match (index(pair.i), index(pair.j)) {
            (Some(a), Some(b)) if pair.i < pair.j => Ok(DocumentPair {
                a,
                b,
                score: pair.score,
            }),
            // a pair naming a row past the corpus, or a row twice
            _ => Err(AssembleError::IndexMismatch {
                structure: "similarity pairs",
                expected: n,
                actual: pair.i.max(pair.j) + 1,
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let documents = corpus
        .iter()
        .zip(stats)
        .zip(topics.distributions())
        .zip(clustering.assignments())
        .map(|(((document, stats), distribution), &cluster)| DocumentRecord {
            document: document.clone(),
            stats: stats.clone(),
            dominant_topic: distribution
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1).then(b.0.cmp(&a.0)))
                .map_or(0, |(topic, _)| topic),
            topic_distribution: distribution.clone(),
            cluster,
        })
        .collect();

    let clusters = clustering
        .summaries(space, top_terms)
        .into_iter()
        .map(
            |ClusterSummary {
                 id,
                 size,
                 members,
                 top_terms,
             }| ClusterRecord {
                id,
                size,
                members: members.into_iter().filter_map(index).collect(),
                top_terms,
            },
        )
        .collect();

    tracing::info!(message = "results assembled", documents = n, pairs = pairs.len());

    Ok(ResultSet {
        fingerprint: space.fingerprint(),
        documents,
        pairs,
        topics: topics.topics(space, top_terms),
        clusters,
    })
}

impl ResultSet {
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn documents(&self) -> &[DocumentRecord] {
        &self.documents
    }

    pub fn document(&self, index: DocumentIndex) -> Option<&DocumentRecord> {
        self.documents.get(index.get())
    }

    pub fn document_by_url(&self, url: &str) -> Option<&DocumentRecord> {
        self.documents.iter().find(|record| record.document.url == url)
    }

    pub fn pairs(&self) -> &[DocumentPair] {
        &self.pairs
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn clusters(&self) -> &[ClusterRecord] {
        &self.clusters
    }

    /// Documents paired with `index` at or above `threshold`, best first.
    pub fn similar_to(
        &self,
        index: DocumentIndex,
        threshold: f64,
        limit: usize,
    ) -> Vec<(DocumentIndex, f64)> {
        let mut similar: Vec<(DocumentIndex, f64)> = self
            .pairs
            .iter()
            .filter(|pair| pair.score >= threshold)
            .filter_map(|pair| {
                if pair.a == index {
                    Some((pair.b, pair.score))
                } else if pair.b == index {
                    Some((pair.a, pair.score))
                } else {
                    None
                }
            })
            .collect();
        similar.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        similar.truncate(limit);
        similar
    }

    pub fn cluster_members(&self, cluster: usize) -> &[DocumentIndex] {
        self.clusters
            .get(cluster)
            .map(|record| record.members.as_slice())
            .unwrap_or_default()
    }
}

/// The hand-off of a finished [`ResultSet`] to whatever persists it.
pub trait ResultSink {
    type Error: std::error::Error + Send + Sync + 'static;

    fn write(&mut self, results: &ResultSet) -> Result<(), Self::Error>;
}

/// Writes the result set as pretty-printed JSON.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for JsonFileSink {
    type Error = std::io::Error;

    fn write(&mut self, results: &ResultSet) -> Result<(), Self::Error> {
        let mut writer = BufWriter::new(File::create(&self.path)?);
        serde_json::to_writer_pretty(&mut writer, results)?;
        writer.flush()?;
        tracing::info!(message = "results written", path = ?self.path, documents = results.len());
        Ok(())
    }
}
