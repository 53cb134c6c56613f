//! Latent Dirichlet allocation fitted with batch variational Bayes.
//!
//! The model follows Hoffman, Blei & Bach, "Online Learning for Latent Dirichlet Allocation"
//! (2010), run in batch mode: every iteration performs a full E-step over all documents and
//! then replaces the topic-word parameters. Both Dirichlet priors are `1 / n_topics`.

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use tracing::instrument;

use crate::vector_space::{
    top_terms, EngineError, Fingerprint, Fittable, SparseRow, TermWeight, VectorSpace,
};

const E_STEP_MAX_ITER: usize = 100;
const E_STEP_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LdaConfig {
    pub n_topics: usize,
    pub max_iter: usize,
    pub seed: u64,
}

impl Default for LdaConfig {
    fn default() -> Self {
        Self {
            n_topics: 5,
            max_iter: 10,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Topic {
    pub id: usize,
    pub top_terms: Vec<TermWeight>,
}

#[derive(Debug, Clone)]
pub struct LatentDirichletAllocation {
    config: LdaConfig,
}

#[derive(Debug, Clone)]
pub struct TopicModel {
    alpha: f64,
    // n_topics x n_terms, rows sum to 1
    components: Vec<Vec<f64>>,
    // exp(E[log beta]) of the final parameters
    exp_elog_beta: Vec<Vec<f64>>,
    // n_documents x n_topics, rows sum to 1
    distributions: Vec<Vec<f64>>,
    fingerprint: Fingerprint,
}

/// Digamma function for positive arguments.
pub(crate) fn digamma(mut x: f64) -> f64 {
    let mut result = 0.0;
    while x < 10.0 {
        result -= 1.0 / x;
        x += 1.0;
    }
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    result + x.ln()
        - 0.5 * inv
        - inv2 * (1.0 / 12.0 - inv2 * (1.0 / 120.0 - inv2 * (1.0 / 252.0 - inv2 / 240.0)))
}

fn exp_dirichlet_expectation(parameters: &[f64]) -> Vec<f64> {
    let total = digamma(parameters.iter().sum());
    parameters
        .iter()
        .map(|&p| (digamma(p) - total).exp())
        .collect()
}

struct DocumentEstimate {
    gamma: Vec<f64>,
    // per topic, per non-zero entry of the row, still to be scaled by exp(E[log beta])
    statistics: Vec<Vec<f64>>,
}

/// Variational E-step of one document against fixed topic-word parameters.
fn estimate_document(
    row: SparseRow<'_>,
    exp_elog_beta: &[Vec<f64>],
    alpha: f64,
    with_statistics: bool,
) -> DocumentEstimate {
    let n_topics = exp_elog_beta.len();
    let mut gamma = vec![1.0; n_topics];
    let mut exp_elog_theta = exp_dirichlet_expectation(&gamma);
    let mut norm_phi = vec![0.0; row.indices.len()];

    let normalize = |theta: &[f64], norm_phi: &mut [f64]| {
        for (w, &column) in row.indices.iter().enumerate() {
            norm_phi[w] = (0..n_topics)
                .map(|k| theta[k] * exp_elog_beta[k][column])
                .sum::<f64>()
                + 1e-100;
        }
    };

    if !row.is_empty() {
        normalize(&exp_elog_theta, &mut norm_phi);
        for _ in 0..E_STEP_MAX_ITER {
            let mut change = 0.0;
            for k in 0..n_topics {
                let weighted: f64 = row
                    .iter()
                    .zip(&norm_phi)
                    .map(|((column, count), norm)| count / norm * exp_elog_beta[k][column])
                    .sum();
                let updated = alpha + exp_elog_theta[k] * weighted;
                change += (updated - gamma[k]).abs();
                gamma[k] = updated;
            }
            exp_elog_theta = exp_dirichlet_expectation(&gamma);
            normalize(&exp_elog_theta, &mut norm_phi);
            if change / (n_topics as f64) < E_STEP_TOLERANCE {
                break;
            }
        }
    } else {
        gamma.fill(alpha);
    }

    let statistics = if with_statistics {
        (0..n_topics)
            .map(|k| {
                row.iter()
                    .zip(&norm_phi)
                    .map(|((_, count), norm)| exp_elog_theta[k] * count / norm)
                    .collect()
            })
            .collect()
    } else {
        Vec::new()
    };

    DocumentEstimate { gamma, statistics }
}

fn normalized(values: &[f64]) -> Vec<f64> {
    let total: f64 = values.iter().sum();
    if total > 0.0 {
        values.iter().map(|v| v / total).collect()
    } else {
        vec![1.0 / values.len() as f64; values.len()]
    }
}

impl LatentDirichletAllocation {
    pub fn new(config: LdaConfig) -> Self {
        Self { config }
    }

    #[instrument(skip_all, fields(topics = self.config.n_topics, documents = space.n_documents()))]
    fn fit_space(&self, space: &VectorSpace) -> Result<TopicModel, EngineError> {
        let LdaConfig {
            n_topics,
            max_iter,
            seed,
        } = self.config;
        if n_topics == 0 {
            return Err(EngineError::InvalidParameter {
                name: "n_topics",
                reason: "must be at least 1",
            });
        }
        if max_iter == 0 {
            return Err(EngineError::InvalidParameter {
                name: "max_iter",
                reason: "must be at least 1",
            });
        }
        if space.n_documents() < n_topics {
            return Err(EngineError::InsufficientCorpusSize {
                what: "topics",
                requested: n_topics,
                documents: space.n_documents(),
            });
        }

        let n_terms = space.n_terms();
        let prior = 1.0 / n_topics as f64;
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let mut lambda: Vec<Vec<f64>> = (0..n_topics)
            .map(|_| (0..n_terms).map(|_| rng.gen_range(0.5..1.5)).collect())
            .collect();

        for iteration in 0..max_iter {
            let exp_elog_beta: Vec<Vec<f64>> =
                lambda.iter().map(|row| exp_dirichlet_expectation(row)).collect();

            let estimates: Vec<DocumentEstimate> = (0..space.n_documents())
                .into_par_iter()
                .map(|d| estimate_document(space.row(d), &exp_elog_beta, prior, true))
                .collect();

            let mut statistics = vec![vec![0.0; n_terms]; n_topics];
            for (d, estimate) in estimates.iter().enumerate() {
                let row = space.row(d);
                for (k, topic_statistics) in estimate.statistics.iter().enumerate() {
                    for (&column, value) in row.indices.iter().zip(topic_statistics) {
                        statistics[k][column] += value;
                    }
                }
            }

            for k in 0..n_topics {
                for column in 0..n_terms {
                    lambda[k][column] = prior + statistics[k][column] * exp_elog_beta[k][column];
                }
            }
            tracing::debug!(message = "lda iteration", iteration);
        }

        let exp_elog_beta: Vec<Vec<f64>> =
            lambda.iter().map(|row| exp_dirichlet_expectation(row)).collect();
        let distributions: Vec<Vec<f64>> = (0..space.n_documents())
            .into_par_iter()
            .map(|d| normalized(&estimate_document(space.row(d), &exp_elog_beta, prior, false).gamma))
            .collect();
        let components = lambda.iter().map(|row| normalized(row)).collect();

        tracing::info!(message = "topic model fitted", topics = n_topics, terms = n_terms);

        Ok(TopicModel {
            alpha: prior,
            components,
            exp_elog_beta,
            distributions,
            fingerprint: space.fingerprint(),
        })
    }
}

impl Fittable<VectorSpace> for LatentDirichletAllocation {
    type Model = TopicModel;
    type Error = EngineError;

    fn fit(&self, space: &VectorSpace) -> Result<TopicModel, EngineError> {
        self.fit_space(space)
    }
}

impl TopicModel {
    pub fn n_topics(&self) -> usize {
        self.components.len()
    }

    pub fn n_documents(&self) -> usize {
        self.distributions.len()
    }

    /// Fingerprint of the vector space the model was fitted on.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Topic weights of a fitted document, summing to 1.
    pub fn distribution(&self, document: usize) -> Option<&[f64]> {
        self.distributions.get(document).map(Vec::as_slice)
    }

    pub fn distributions(&self) -> &[Vec<f64>] {
        &self.distributions
    }

    /// Infer the topic weights of a row of the same vector space without refitting.
    pub fn transform_row(&self, row: SparseRow<'_>) -> Vec<f64> {
        normalized(&estimate_document(row, &self.exp_elog_beta, self.alpha, false).gamma)
    }

    pub fn top_terms(&self, space: &VectorSpace, topic: usize, n: usize) -> Vec<TermWeight> {
        self.components
            .get(topic)
            .map(|weights| top_terms(space, weights, n))
            .unwrap_or_default()
    }

    pub fn topics(&self, space: &VectorSpace, n_terms: usize) -> Vec<Topic> {
        (0..self.n_topics())
            .map(|id| Topic {
                id,
                top_terms: self.top_terms(space, id, n_terms),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::prelude::*;
    use crate::vector_space::{TfidfConfig, TfidfVectorizer};

    fn space(documents: &[&str]) -> VectorSpace {
        TfidfVectorizer::new(TfidfConfig::default())
            .fit(documents)
            .unwrap()
    }

    fn lda(n_topics: usize) -> LatentDirichletAllocation {
        LatentDirichletAllocation::new(LdaConfig {
            n_topics,
            max_iter: 20,
            seed: 7,
        })
    }

    #[test]
    fn digamma_matches_known_values() {
        const EULER_MASCHERONI: f64 = 0.577_215_664_901_532_9;
        assert!((digamma(1.0) + EULER_MASCHERONI).abs() < 1e-10);
        assert!((digamma(0.5) + EULER_MASCHERONI + 2.0 * 2f64.ln()).abs() < 1e-10);
        assert!((digamma(10.0) - 2.251_752_589_066_721).abs() < 1e-10);
    }

    #[test]
    fn separates_two_vocabularies() {
        let space = space(&[
            "river boat harbour river boat",
            "harbour boat river sail",
            "bread oven flour bread",
            "flour oven bread baker",
        ]);
        let model = lda(2).fit(&space).unwrap();

        let distance = |a: usize, b: usize| -> f64 {
            let (a, b) = (model.distribution(a).unwrap(), model.distribution(b).unwrap());
            a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
        };
        assert!(distance(0, 1) < distance(0, 2));
        assert!(distance(2, 3) < distance(1, 3));

        let topics = model.topics(&space, 3);
        assert_eq!(topics.len(), 2);
        assert!(topics.iter().all(|topic| topic.top_terms.len() == 3));
    }

    #[test]
    fn fitting_is_reproducible() {
        let space = space(&["alpha beta", "beta gamma", "gamma delta"]);
        let a = lda(2).fit(&space).unwrap();
        let b = lda(2).fit(&space).unwrap();
        assert_eq!(a.distributions(), b.distributions());
        assert_eq!(a.fingerprint(), space.fingerprint());
    }

    #[test]
    fn rejects_bad_sizes() {
        let space = space(&["alpha beta", "beta gamma"]);
        assert!(matches!(
            lda(3).fit(&space).unwrap_err(),
            EngineError::InsufficientCorpusSize {
                requested: 3,
                documents: 2,
                ..
            }
        ));
        assert!(matches!(
            lda(0).fit(&space).unwrap_err(),
            EngineError::InvalidParameter { name: "n_topics", .. }
        ));
    }

    #[test]
    fn transform_row_of_empty_row_is_uniform() {
        let space = space(&["alpha beta", "beta gamma", "delta"]);
        let model = lda(2).fit(&space).unwrap();
        let empty = SparseRow {
            indices: &[],
            values: &[],
        };
        assert_eq!(model.transform_row(empty), vec![0.5, 0.5]);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 24, ..ProptestConfig::default() })]
        #[test]
        fn distributions_sum_to_one(corpus in proptest_support::corpus(8), topics in 1usize..4) {
            let documents: Vec<&str> = corpus.iter().map(String::as_str).collect();
            prop_assume!(documents.len() >= topics);
            let space = TfidfVectorizer::new(TfidfConfig::default()).fit(documents.as_slice()).unwrap();
            let model = LatentDirichletAllocation::new(LdaConfig { n_topics: topics, max_iter: 5, seed: 1 })
                .fit(&space)
                .unwrap();

            prop_assert_eq!(model.n_documents(), documents.len());
            for distribution in model.distributions() {
                let total: f64 = distribution.iter().sum();
                prop_assert!((total - 1.0).abs() < 1e-9);
                prop_assert!(distribution.iter().all(|w| *w >= 0.0));
            }
        }
    }
}
