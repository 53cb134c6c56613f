use std::{
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use rayon::prelude::*;
use tracing::instrument;

use crate::{
    archive_index::{ArchiveError, ArchiveIndex, IndexStats},
    assembler::{assemble, AssembleError, ResultSet},
    clustering::KMeans,
    config::{ConfigError, PipelineConfig},
    corpus::{Corpus, NewDocument},
    extractor::Cleaner,
    resolver::{ContentResolver, FetchPolicy, HttpFetcher, ResolveError, ResolvedContent, ResolverStats},
    similarity::Similarity,
    stats::{DocumentStats, StatsExtractor},
    topics::LatentDirichletAllocation,
    vector_space::{EngineError, Fittable, TfidfVectorizer, VectorizeError},
};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("invalid configuration")]
    Config(#[from] ConfigError),
    #[error("could not index the archive")]
    Archive(#[from] ArchiveError),
    #[error("could not set up the live fetcher")]
    Fetcher(#[source] reqwest::Error),
    #[error("could not build the vector space")]
    Vectorize(#[from] VectorizeError),
    #[error("could not fit the corpus models")]
    Engine(#[from] EngineError),
    #[error("could not assemble the results")]
    Assemble(#[from] AssembleError),
    #[error("run exceeded its timeout of {timeout:?} during {stage}")]
    Timeout {
        stage: &'static str,
        timeout: Duration,
    },
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Abort the run when a stage finishes after this much time.
    pub timeout: Option<Duration>,
    /// URLs to process in this order; all indexed URLs in archive order when `None`.
    pub urls: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    ContentUnavailable,
    DecodeError,
    /// Not in English while `require_english` is set.
    NotEnglish,
    /// Nothing survived cleaning.
    EmptyText,
    BelowMinWordCount,
    DuplicateUrl,
}

/// A requested URL that did not become a document.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Exclusion {
    pub url: String,
    pub reason: ExclusionReason,
    pub detail: String,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RunReport {
    pub requested: usize,
    pub documents: usize,
    pub exclusions: Vec<Exclusion>,
    pub resolver: ResolverStats,
    #[serde(skip)]
    pub index: IndexStats,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn count(&self, reason: ExclusionReason) -> usize {
        self.exclusions
            .iter()
            .filter(|exclusion| exclusion.reason == reason)
            .count()
    }
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub results: ResultSet,
    pub report: RunReport,
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    started: Instant,
    timeout: Option<Duration>,
}

impl Deadline {
    fn new(timeout: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            timeout,
        }
    }

    fn check(&self, stage: &'static str) -> Result<(), RunError> {
        match self.timeout {
            Some(timeout) if self.started.elapsed() > timeout => {
                tracing::warn!(message = "run timed out", stage, timeout = ?timeout);
                Err(RunError::Timeout { stage, timeout })
            }
            _ => Ok(()),
        }
    }
}

// a document ready to be appended to the corpus
struct Processed {
    document: NewDocument,
    stats: DocumentStats,
}

/// Runs every stage over one archive with one immutable configuration.
#[derive(Debug)]
pub struct Pipeline<'c> {
    config: &'c PipelineConfig,
    cleaner: Cleaner,
    stats: StatsExtractor,
}

impl<'c> Pipeline<'c> {
    pub fn new(config: &'c PipelineConfig) -> Self {
        Self {
            config,
            cleaner: Cleaner::new(config.require_english, config.allow_lossy_decoding),
            stats: StatsExtractor::new(config.top_keywords),
        }
    }

    fn process(&self, url: &str, content: &ResolvedContent) -> Result<Processed, Exclusion> {
        let exclude = |reason, detail: String| Exclusion {
            url: url.to_string(),
            reason,
            detail,
        };

        let cleaned = self
            .cleaner
            .clean(&content.body, content.charset.as_deref(), content.kind, &content.url)
            .map_err(|e| exclude(ExclusionReason::DecodeError, e.to_string()))?;
        if self.config.require_english && cleaned.page.language != "en" {
            return Err(exclude(
                ExclusionReason::NotEnglish,
                format!("language {}", cleaned.page.language),
            ));
        }
        if cleaned.cleaned_text.trim().is_empty() {
            return Err(exclude(ExclusionReason::EmptyText, String::new()));
        }
        let stats = self.stats.analyze(&cleaned.cleaned_text, &cleaned.page.text);
        if stats.word_count < self.config.min_word_count {
            return Err(exclude(
                ExclusionReason::BelowMinWordCount,
                format!("{} words", stats.word_count),
            ));
        }

        Ok(Processed {
            document: NewDocument {
                url: content.url.clone(),
                title: cleaned.page.title,
                cleaned_text: cleaned.cleaned_text,
                raw_text: cleaned.page.text,
                language: cleaned.page.language,
                content_source: content.source,
                content_kind: content.kind,
            },
            stats,
        })
    }

    /// Resolve, clean and analyze every URL, then append the survivors in input order.
    #[instrument(skip_all, fields(urls = urls.len()))]
    fn build_corpus(
        &self,
        resolver: &mut ContentResolver,
        urls: &[String],
        deadline: &Deadline,
        exclusions: &mut Vec<Exclusion>,
    ) -> Result<(Corpus, Vec<DocumentStats>), RunError> {
        // resolution stays sequential, it shares the cache and the archive handle
        let mut resolved: Vec<(&str, Arc<ResolvedContent>)> = Vec::with_capacity(urls.len());
        for url in urls {
            match resolver.resolve(url) {
                Ok(content) => resolved.push((url.as_str(), content)),
                Err(e) => {
                    if matches!(e, ResolveError::Archive { .. }) {
                        tracing::warn!(message = "archived record unreadable", url = url.as_str(), error = %e);
                    } else {
                        tracing::debug!(message = "content unavailable", url = url.as_str(), error = %e);
                    }
                    exclusions.push(Exclusion {
                        url: url.clone(),
                        reason: ExclusionReason::ContentUnavailable,
                        detail: e.to_string(),
                    });
                }
            }
        }
        deadline.check("resolve")?;

        let processed: Vec<Result<Processed, Exclusion>> = resolved
            .par_iter()
            .map(|(url, content)| self.process(url, content))
            .collect();
        deadline.check("clean")?;

        let mut corpus = Corpus::new();
        let mut stats = Vec::new();
        for outcome in processed {
            match outcome {
                Ok(Processed { document, stats: document_stats }) => {
                    let url = document.url.clone();
                    match corpus.push(document) {
                        Ok(_) => stats.push(document_stats),
                        Err(e) => exclusions.push(Exclusion {
                            url,
                            reason: ExclusionReason::DuplicateUrl,
                            detail: e.to_string(),
                        }),
                    }
                }
                Err(exclusion) => {
                    tracing::debug!(
                        message = "document excluded",
                        url = exclusion.url.as_str(),
                        reason = ?exclusion.reason
                    );
                    exclusions.push(exclusion);
                }
            }
        }

        tracing::info!(
            message = "corpus collected",
            documents = corpus.len(),
            excluded = exclusions.len()
        );
        Ok((corpus, stats))
    }

    /// Fit every corpus model and join them. Starts only once the whole corpus is known.
    #[instrument(skip_all, fields(documents = corpus.len()))]
    pub fn analyze_corpus(
        &self,
        corpus: &Corpus,
        stats: &[DocumentStats],
        timeout: Option<Duration>,
    ) -> Result<ResultSet, RunError> {
        self.analyze_with_deadline(corpus, stats, &Deadline::new(timeout))
    }

    fn analyze_with_deadline(
        &self,
        corpus: &Corpus,
        stats: &[DocumentStats],
        deadline: &Deadline,
    ) -> Result<ResultSet, RunError> {
        let config = self.config;
        let space = TfidfVectorizer::new(config.tfidf()).fit(corpus.cleaned_texts().as_slice())?;
        deadline.check("vectorize")?;

        let similarity = Similarity::new(&space);
        let pairs = if config.similarity_top_k > 0 {
            similarity.top_k(config.similarity_top_k)
        } else {
            similarity.pairs(config.similarity_threshold)
        };
        deadline.check("similarity")?;

        let topics = LatentDirichletAllocation::new(config.lda()).fit(&space)?;
        deadline.check("topics")?;

        let clustering = KMeans::new(config.kmeans()).fit(&space)?;
        deadline.check("clustering")?;

        Ok(assemble(
            corpus,
            stats,
            &pairs,
            &topics,
            &clustering,
            &space,
            config.top_terms,
        )?)
    }

    #[instrument(skip_all)]
    pub fn run(
        &self,
        resolver: &mut ContentResolver,
        options: &RunOptions,
    ) -> Result<RunOutput, RunError> {
        let deadline = Deadline::new(options.timeout);
        let urls: Vec<String> = match &options.urls {
            Some(urls) => urls.clone(),
            None => resolver.index().urls().map(str::to_string).collect(),
        };

        let mut exclusions = Vec::new();
        let (corpus, stats) = self.build_corpus(resolver, &urls, &deadline, &mut exclusions)?;
        let results = self.analyze_with_deadline(&corpus, &stats, &deadline)?;

        let report = RunReport {
            requested: urls.len(),
            documents: corpus.len(),
            exclusions,
            resolver: resolver.stats().clone(),
            index: resolver.index().stats().clone(),
            elapsed: deadline.started.elapsed(),
        };
        tracing::info!(
            message = "run finished",
            requested = report.requested,
            documents = report.documents,
            excluded = report.exclusions.len(),
            elapsed = ?report.elapsed
        );
        Ok(RunOutput { results, report })
    }
}

/// Index the archive at `path` and run the whole pipeline over it.
pub fn run_archive(
    path: &Path,
    config: &PipelineConfig,
    options: &RunOptions,
) -> Result<RunOutput, RunError> {
    config.validate()?;
    let index = ArchiveIndex::open(path)?;
    let mut resolver = ContentResolver::new(index, config.fetch_policy, config.fetch_timeout());
    if config.fetch_policy == FetchPolicy::AllowLiveFallback {
        resolver = resolver.with_fetcher(HttpFetcher::new().map_err(RunError::Fetcher)?);
    }
    Pipeline::new(config).run(&mut resolver, options)
}
