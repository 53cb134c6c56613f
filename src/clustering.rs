use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use tracing::instrument;

use crate::vector_space::{
    top_terms, EngineError, Fingerprint, Fittable, SparseRow, TermWeight, VectorSpace,
};

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KMeansConfig {
    pub n_clusters: usize,
    pub max_iter: usize,
    /// Independent k-means++ restarts, the run with the lowest inertia is kept.
    pub n_init: usize,
    pub seed: u64,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            n_clusters: 5,
            max_iter: 300,
            n_init: 10,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KMeans {
    config: KMeansConfig,
}

/// Result of one k-means fit. Cluster ids are only meaningful within this value; summaries
/// have to be derived again after every fit.
#[derive(Debug, Clone)]
pub struct Clustering {
    assignments: Vec<usize>,
    centroids: Vec<Vec<f64>>,
    inertia: f64,
    iterations: usize,
    fingerprint: Fingerprint,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ClusterSummary {
    pub id: usize,
    pub size: usize,
    pub members: Vec<usize>,
    pub top_terms: Vec<TermWeight>,
}

// squared euclidean distance between a sparse row and a dense centroid
fn distance(row: SparseRow<'_>, row_norm: f64, centroid: &[f64], centroid_norm: f64) -> f64 {
    (row_norm + centroid_norm - 2.0 * row.dot_dense(centroid)).max(0.0)
}

fn squared_norm(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum()
}

fn densify(row: SparseRow<'_>, n_terms: usize) -> Vec<f64> {
    let mut dense = vec![0.0; n_terms];
    for (column, value) in row.iter() {
        dense[column] = value;
    }
    dense
}

struct Run {
    assignments: Vec<usize>,
    centroids: Vec<Vec<f64>>,
    inertia: f64,
    iterations: usize,
}

impl KMeans {
    pub fn new(config: KMeansConfig) -> Self {
        Self { config }
    }

    fn validate(&self, documents: usize) -> Result<(), EngineError> {
        let KMeansConfig {
            n_clusters,
            max_iter,
            n_init,
            ..
        } = self.config;
        let invalid = |name| EngineError::InvalidParameter {
            name,
            reason: "must be at least 1",
        };
        if n_clusters == 0 {
            return Err(invalid("n_clusters"));
        }
        if max_iter == 0 {
            return Err(invalid("max_iter"));
        }
        if n_init == 0 {
            return Err(invalid("n_init"));
        }
        if documents < n_clusters {
            return Err(EngineError::InsufficientCorpusSize {
                what: "clusters",
                requested: n_clusters,
                documents,
            });
        }
        Ok(())
    }

    /// k-means++: each further center is drawn with probability proportional to its squared
    /// distance from the closest center chosen so far.
    fn seed_centroids(
        &self,
        space: &VectorSpace,
        row_norms: &[f64],
        rng: &mut Xoshiro256PlusPlus,
    ) -> Vec<Vec<f64>> {
        let n = space.n_documents();
        let n_terms = space.n_terms();
        let mut chosen = vec![rng.gen_range(0..n)];
        let mut closest: Vec<f64> = vec![f64::INFINITY; n];

        while chosen.len() < self.config.n_clusters {
            let last = densify(space.row(chosen[chosen.len() - 1]), n_terms);
            let last_norm = squared_norm(&last);
            for (d, best) in closest.iter_mut().enumerate() {
                *best = best.min(distance(space.row(d), row_norms[d], &last, last_norm));
            }

            let total: f64 = closest.iter().sum();
            let next = if total > 0.0 {
                let mut target = rng.gen_range(0.0..total);
                let mut pick = n - 1;
                for (d, &weight) in closest.iter().enumerate() {
                    if target < weight {
                        pick = d;
                        break;
                    }
                    target -= weight;
                }
                pick
            } else {
                // every row sits on a center already
                (0..n).find(|d| !chosen.contains(d)).unwrap_or(0)
            };
            chosen.push(next);
        }

        chosen
            .into_iter()
            .map(|d| densify(space.row(d), n_terms))
            .collect()
    }

    fn assign(
        space: &VectorSpace,
        row_norms: &[f64],
        centroids: &[Vec<f64>],
    ) -> Vec<(usize, f64)> {
        let centroid_norms: Vec<f64> = centroids.iter().map(|c| squared_norm(c)).collect();
        (0..space.n_documents())
            .into_par_iter()
            .map(|d| {
                let row = space.row(d);
                centroids
                    .iter()
                    .zip(&centroid_norms)
                    .map(|(centroid, &norm)| distance(row, row_norms[d], centroid, norm))
                    .enumerate()
                    .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
                    .unwrap_or((0, 0.0))
            })
            .collect()
    }

    fn run(&self, space: &VectorSpace, row_norms: &[f64], rng: &mut Xoshiro256PlusPlus) -> Run {
        let n_terms = space.n_terms();
        let k = self.config.n_clusters;
        let mut centroids = self.seed_centroids(space, row_norms, rng);
        let mut assigned = Self::assign(space, row_norms, &centroids);
        let mut iterations = 0;

        while iterations < self.config.max_iter {
            iterations += 1;

            let mut sums = vec![vec![0.0; n_terms]; k];
            let mut sizes = vec![0usize; k];
            for (d, &(cluster, _)) in assigned.iter().enumerate() {
                sizes[cluster] += 1;
                for (column, value) in space.row(d).iter() {
                    sums[cluster][column] += value;
                }
            }

            // empty clusters take over the point farthest from its centroid
            let mut taken = Vec::new();
            for cluster in 0..k {
                if sizes[cluster] > 0 {
                    for value in &mut sums[cluster] {
                        *value /= sizes[cluster] as f64;
                    }
                    continue;
                }
                let farthest = assigned
                    .iter()
                    .enumerate()
                    .filter(|(d, _)| !taken.contains(d))
                    .max_by(|a, b| a.1 .1.total_cmp(&b.1 .1).then(b.0.cmp(&a.0)))
                    .map(|(d, _)| d)
                    .unwrap_or(0);
                tracing::debug!(message = "reseeding empty cluster", cluster, document = farthest);
                taken.push(farthest);
                sums[cluster] = densify(space.row(farthest), n_terms);
            }
            centroids = sums;

            let next = Self::assign(space, row_norms, &centroids);
            let converged = next
                .iter()
                .zip(&assigned)
                .all(|(a, b)| a.0 == b.0);
            assigned = next;
            if converged {
                break;
            }
        }

        Run {
            inertia: assigned.iter().map(|&(_, distance)| distance).sum(),
            assignments: assigned.into_iter().map(|(cluster, _)| cluster).collect(),
            centroids,
            iterations,
        }
    }

    #[instrument(skip_all, fields(clusters = self.config.n_clusters, documents = space.n_documents()))]
    fn fit_space(&self, space: &VectorSpace) -> Result<Clustering, EngineError> {
        self.validate(space.n_documents())?;

        let row_norms: Vec<f64> = space
            .matrix()
            .rows()
            .map(|row| squared_norm(row.values))
            .collect();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.seed);

        let mut best = self.run(space, &row_norms, &mut rng);
        for restart in 1..self.config.n_init {
            let run = self.run(space, &row_norms, &mut rng);
            tracing::debug!(
                message = "k-means restart finished",
                restart,
                inertia = run.inertia,
                iterations = run.iterations
            );
            if run.inertia < best.inertia {
                best = run;
            }
        }
        tracing::info!(
            message = "clustering fitted",
            clusters = self.config.n_clusters,
            inertia = best.inertia
        );

        Ok(Clustering {
            assignments: best.assignments,
            centroids: best.centroids,
            inertia: best.inertia,
            iterations: best.iterations,
            fingerprint: space.fingerprint(),
        })
    }
}

impl Fittable<VectorSpace> for KMeans {
    type Model = Clustering;
    type Error = EngineError;

    fn fit(&self, space: &VectorSpace) -> Result<Clustering, EngineError> {
        self.fit_space(space)
    }
}

impl Clustering {
    pub fn n_clusters(&self) -> usize {
        self.centroids.len()
    }

    pub fn n_documents(&self) -> usize {
        self.assignments.len()
    }

    pub fn assignments(&self) -> &[usize] {
        &self.assignments
    }

    pub fn assignment(&self, document: usize) -> Option<usize> {
        self.assignments.get(document).copied()
    }

    pub fn centroids(&self) -> &[Vec<f64>] {
        &self.centroids
    }

    /// Sum of squared distances of every document to its centroid.
    pub fn inertia(&self) -> f64 {
        self.inertia
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn members(&self, cluster: usize) -> Vec<usize> {
        self.assignments
            .iter()
            .enumerate()
            .filter(|(_, &c)| c == cluster)
            .map(|(d, _)| d)
            .collect()
    }

    /// Nearest centroid of a row of the same vector space.
    pub fn predict(&self, row: SparseRow<'_>) -> usize {
        let row_norm = squared_norm(row.values);
        self.centroids
            .iter()
            .map(|centroid| distance(row, row_norm, centroid, squared_norm(centroid)))
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
            .map_or(0, |(cluster, _)| cluster)
    }

    pub fn summaries(&self, space: &VectorSpace, n_terms: usize) -> Vec<ClusterSummary> {
        (0..self.n_clusters())
            .map(|id| {
                let members = self.members(id);
                ClusterSummary {
                    id,
                    size: members.len(),
                    members,
                    top_terms: top_terms(space, &self.centroids[id], n_terms),
                }
            })
            .collect()
    }
}
