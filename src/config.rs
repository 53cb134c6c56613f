use std::{path::Path, time::Duration};

use crate::{
    clustering::KMeansConfig, resolver::FetchPolicy, topics::LdaConfig, vector_space::TfidfConfig,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read configuration file")]
    Io(#[from] std::io::Error),
    #[error("configuration is not valid TOML")]
    Toml(#[from] toml::de::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Every knob of a run. Built once, then passed by reference to each stage.
///
/// ```toml
/// max_features = 5000
/// min_df = 1
/// max_df = 0.95
/// ngram_range = [1, 2]
/// topic_count = 5
/// fetch_policy = "allow_live_fallback"
/// ```
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub max_features: Option<usize>,
    /// Minimum number of documents a term has to appear in.
    pub min_df: usize,
    /// Maximum fraction of documents a term may appear in.
    pub max_df: f64,
    pub ngram_range: (usize, usize),
    /// Documents with fewer raw words are excluded.
    pub min_word_count: usize,
    pub topic_count: usize,
    pub cluster_count: usize,
    /// Number of best pairs reported; `0` keeps every pair above the threshold instead.
    pub similarity_top_k: usize,
    pub similarity_threshold: f64,
    pub fetch_timeout_secs: u64,
    pub fetch_policy: FetchPolicy,
    pub top_keywords: usize,
    /// Terms listed per topic and per cluster.
    pub top_terms: usize,
    pub seed: u64,
    pub lda_max_iter: usize,
    pub kmeans_max_iter: usize,
    pub kmeans_n_init: usize,
    pub require_english: bool,
    pub allow_lossy_decoding: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_features: Some(5000),
            min_df: 1,
            max_df: 1.0,
            ngram_range: (1, 1),
            min_word_count: 20,
            topic_count: 5,
            cluster_count: 5,
            similarity_top_k: 0,
            similarity_threshold: 0.2,
            fetch_timeout_secs: 30,
            fetch_policy: FetchPolicy::ArchiveOnly,
            top_keywords: 10,
            top_terms: 10,
            seed: 42,
            lda_max_iter: 10,
            kmeans_max_iter: 300,
            kmeans_n_init: 10,
            require_english: true,
            allow_lossy_decoding: false,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason| Err(ConfigError::Invalid { field, reason });

        if !(self.max_df > 0.0 && self.max_df <= 1.0) {
            return invalid("max_df", "must be in (0, 1]");
        }
        let (low, high) = self.ngram_range;
        if low == 0 || low > high {
            return invalid("ngram_range", "must be a range 1 <= low <= high");
        }
        if self.max_features == Some(0) {
            return invalid("max_features", "must be at least 1 when set");
        }
        if self.topic_count == 0 {
            return invalid("topic_count", "must be at least 1");
        }
        if self.cluster_count == 0 {
            return invalid("cluster_count", "must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return invalid("similarity_threshold", "must be in [0, 1]");
        }
        if self.fetch_timeout_secs == 0 {
            return invalid("fetch_timeout_secs", "must be at least 1");
        }
        if self.lda_max_iter == 0 || self.kmeans_max_iter == 0 || self.kmeans_n_init == 0 {
            return invalid("iterations", "lda_max_iter, kmeans_max_iter and kmeans_n_init must be at least 1");
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn tfidf(&self) -> TfidfConfig {
        TfidfConfig {
            max_features: self.max_features,
            min_df: self.min_df,
            max_df: self.max_df,
            ngram_range: self.ngram_range,
        }
    }

    pub fn lda(&self) -> LdaConfig {
        LdaConfig {
            n_topics: self.topic_count,
            max_iter: self.lda_max_iter,
            seed: self.seed,
        }
    }

    pub fn kmeans(&self) -> KMeansConfig {
        KMeansConfig {
            n_clusters: self.cluster_count,
            max_iter: self.kmeans_max_iter,
            n_init: self.kmeans_n_init,
            seed: self.seed,
        }
    }
}
