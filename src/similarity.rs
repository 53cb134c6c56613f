use std::{cmp::Ordering, cmp::Reverse, collections::BinaryHeap};

use rayon::prelude::*;
use tracing::instrument;

use crate::vector_space::{SparseRow, VectorSpace};

/// An unordered pair of vector space rows, always stored with `i < j`.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct SimilarityPair {
    pub i: usize,
    pub j: usize,
    pub score: f64,
}

// orders pairs by rank: a greater value is a better pair
#[derive(Debug, Clone, Copy)]
struct Ranked(SimilarityPair);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .score
            .total_cmp(&other.0.score)
            .then_with(|| (other.0.i, other.0.j).cmp(&(self.0.i, self.0.j)))
    }
}

fn rank_order(a: &SimilarityPair, b: &SimilarityPair) -> Ordering {
    Ranked(*b).cmp(&Ranked(*a))
}

/// Cosine similarity over the rows of a [`VectorSpace`].
///
/// Rows are L2-normalized already, so cosine similarity is a sparse dot product. Candidate
/// pairs come from an inverted index over the columns, and for row `i` only rows `j > i` are
/// ever accumulated; pairs without a shared term never show up in [`Self::pairs`] or
/// [`Self::top_k`].
pub struct Similarity<'a> {
    space: &'a VectorSpace,
    // per column: (row, weight), rows ascending
    postings: Vec<Vec<(usize, f64)>>,
}

impl std::fmt::Debug for Similarity<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Similarity")
            .field("documents", &self.space.n_documents())
            .field("postings.len", &self.postings.len())
            .finish()
    }
}

impl<'a> Similarity<'a> {
    pub fn new(space: &'a VectorSpace) -> Self {
        let mut postings = vec![Vec::new(); space.n_terms()];
        for (row, vector) in space.matrix().rows().enumerate() {
            for (column, weight) in vector.iter() {
                postings[column].push((row, weight));
            }
        }
        Self { space, postings }
    }

    pub fn n_documents(&self) -> usize {
        self.space.n_documents()
    }

    /// Similarity of two distinct rows, `None` for `i == j` or rows out of range.
    pub fn score(&self, i: usize, j: usize) -> Option<f64> {
        let n = self.n_documents();
        if i == j || i >= n || j >= n {
            return None;
        }
        Some(sparse_dot(self.space.row(i), self.space.row(j)).clamp(0.0, 1.0))
    }

    fn pairs_of(
        &self,
        i: usize,
        accumulator: &mut [f64],
        touched: &mut Vec<usize>,
        min_score: f64,
    ) -> Vec<SimilarityPair> {
        for (column, weight) in self.space.row(i).iter() {
            let posting = &self.postings[column];
            let start = posting.partition_point(|&(row, _)| row <= i);
            for &(j, other) in &posting[start..] {
                if accumulator[j] == 0.0 {
                    touched.push(j);
                }
                accumulator[j] += weight * other;
            }
        }

        let mut pairs = Vec::new();
        for j in touched.drain(..) {
            let score = accumulator[j].clamp(0.0, 1.0);
            accumulator[j] = 0.0;
            if score > 0.0 && score >= min_score {
                pairs.push(SimilarityPair { i, j, score });
            }
        }
        pairs
    }

    /// All pairs sharing at least one term with a score of at least `min_score`, in rank order.
    #[instrument(skip(self), fields(documents = self.n_documents()))]
    pub fn pairs(&self, min_score: f64) -> Vec<SimilarityPair> {
        let n = self.n_documents();
        let mut pairs: Vec<SimilarityPair> = (0..n)
            .into_par_iter()
            .map_init(
                || (vec![0.0; n], Vec::new()),
                |(accumulator, touched), i| self.pairs_of(i, accumulator, touched, min_score),
            )
            .flatten_iter()
            .collect();
        pairs.sort_unstable_by(rank_order);

        tracing::debug!(message = "similarity pairs computed", pairs = pairs.len(), min_score);
        pairs
    }

    /// The `k` best pairs, descending by score, ties broken by `(i, j)` ascending.
    #[instrument(skip(self), fields(documents = self.n_documents()))]
    pub fn top_k(&self, k: usize) -> Vec<SimilarityPair> {
        if k == 0 {
            return Vec::new();
        }

        let n = self.n_documents();
        let mut accumulator = vec![0.0; n];
        let mut touched = Vec::new();
        let mut heap: BinaryHeap<Reverse<Ranked>> = BinaryHeap::with_capacity(k + 1);

        for i in 0..n {
            for pair in self.pairs_of(i, &mut accumulator, &mut touched, 0.0) {
                let candidate = Ranked(pair);
                if heap.len() < k {
                    heap.push(Reverse(candidate));
                } else if heap.peek().is_some_and(|Reverse(worst)| candidate > *worst) {
                    heap.pop();
                    heap.push(Reverse(candidate));
                }
            }
        }

        let mut pairs: Vec<SimilarityPair> =
            heap.into_iter().map(|Reverse(Ranked(pair))| pair).collect();
        pairs.sort_unstable_by(rank_order);
        pairs
    }
}

fn sparse_dot(a: SparseRow<'_>, b: SparseRow<'_>) -> f64 {
    let (mut x, mut y) = (0, 0);
    let mut sum = 0.0;
    while x < a.indices.len() && y < b.indices.len() {
        match a.indices[x].cmp(&b.indices[y]) {
            Ordering::Less => x += 1,
            Ordering::Greater => y += 1,
            Ordering::Equal => {
                sum += a.values[x] * b.values[y];
                x += 1;
                y += 1;
            }
        }
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::prelude::*;
    use crate::vector_space::{Fittable, TfidfConfig, TfidfVectorizer};

    fn space(documents: &[&str]) -> VectorSpace {
        TfidfVectorizer::new(TfidfConfig::default())
            .fit(documents)
            .unwrap()
    }

    #[test]
    fn identical_and_disjoint_documents() {
        let space = space(&["river bank water", "river bank water", "desert sand dune"]);
        let similarity = Similarity::new(&space);

        assert!((similarity.score(0, 1).unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(similarity.score(0, 2), Some(0.0));
        assert_eq!(similarity.score(1, 1), None);
        assert_eq!(similarity.score(0, 3), None);
    }

    #[test]
    fn top_k_finds_unique_maximum() {
        let space = space(&[
            "apple banana",
            "river stone bridge tower",
            "cloud rain",
            "river stone bridge castle",
        ]);
        let similarity = Similarity::new(&space);
        let top = similarity.top_k(1);

        assert_eq!(top.len(), 1);
        assert_eq!((top[0].i, top[0].j), (1, 3));
        assert!((top[0].score - similarity.score(1, 3).unwrap()).abs() < 1e-12);
    }

    #[test]
    fn ties_break_by_indices() {
        let space = space(&["alpha beta", "alpha beta", "alpha beta"]);
        let similarity = Similarity::new(&space);
        let pairs: Vec<(usize, usize)> =
            similarity.top_k(3).iter().map(|p| (p.i, p.j)).collect();
        assert_eq!(pairs, [(0, 1), (0, 2), (1, 2)]);

        let two: Vec<(usize, usize)> = similarity.top_k(2).iter().map(|p| (p.i, p.j)).collect();
        assert_eq!(two, [(0, 1), (0, 2)]);
    }

    #[test]
    fn threshold_filters_pairs() {
        let space = space(&["river bank", "river bank", "river delta mud silt clay"]);
        let similarity = Similarity::new(&space);
        let all = similarity.pairs(0.0);
        assert_eq!(all.len(), 3);
        let strong = similarity.pairs(0.9);
        assert_eq!(strong.len(), 1);
        assert_eq!((strong[0].i, strong[0].j), (0, 1));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]
        #[test]
        fn pairs_are_ordered_and_unique(corpus in proptest_support::corpus(10), k in 1usize..20) {
            let documents: Vec<&str> = corpus.iter().map(String::as_str).collect();
            let Ok(space) = TfidfVectorizer::new(TfidfConfig::default()).fit(documents.as_slice()) else {
                return Ok(());
            };
            let similarity = Similarity::new(&space);
            let all = similarity.pairs(0.0);
            let top = similarity.top_k(k);

            let mut seen = std::collections::HashSet::new();
            for pair in &all {
                prop_assert!(pair.i < pair.j);
                prop_assert!((0.0..=1.0).contains(&pair.score));
                prop_assert!(seen.insert((pair.i, pair.j)));
                let direct = similarity.score(pair.i, pair.j).unwrap();
                prop_assert!((direct - pair.score).abs() < 1e-9);
            }
            for window in all.windows(2) {
                prop_assert!(rank_order(&window[0], &window[1]) != Ordering::Greater);
            }
            prop_assert_eq!(&top[..], &all[..k.min(all.len())]);
        }
    }
}
