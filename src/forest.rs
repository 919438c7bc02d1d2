//! Random forest regression over fixed-width feature rows.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::model::FEATURE_COUNT;

type Row = [f64; FEATURE_COUNT];

/// Shape of the drop-probability forest. Missing keys in a config file take
/// the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    pub n_trees: usize,
    /// Nodes this deep are always leaves. The root is depth 0.
    pub max_depth: usize,
    /// A node with fewer rows becomes a leaf.
    pub min_samples_split: usize,
    /// Candidate splits leaving fewer rows on either side are skipped.
    pub min_samples_leaf: usize,
    /// Feature columns drawn per node. `None` tries both.
    pub max_features: Option<usize>,
    /// Resample rows with replacement for every tree.
    pub bootstrap: bool,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 16,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            bootstrap: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    root: Node,
    importances: [f64; FEATURE_COUNT],
}

struct TreeBuilder<'a> {
    features: &'a [Row],
    labels: &'a [f64],
    config: &'a ForestConfig,
    max_features: usize,
    rng: ChaCha8Rng,
    importances: [f64; FEATURE_COUNT],
}

impl<'a> TreeBuilder<'a> {
    fn build(&mut self, indices: Vec<usize>, depth: usize) -> Node {
        let n = indices.len() as f64;
        let sum: f64 = indices.iter().map(|&i| self.labels[i]).sum();
        let sq: f64 = indices.iter().map(|&i| self.labels[i].powi(2)).sum();
        let value = sum / n;
        let sse = sq - sum * sum / n;

        if depth >= self.config.max_depth
            || indices.len() < self.config.min_samples_split.max(2)
            || sse <= 1e-12
        {
            return Node::Leaf { value };
        }

        let Some((feature, threshold, gain)) = self.best_split(&indices, sum, sq, sse) else {
            return Node::Leaf { value };
        };

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| self.features[i][feature] <= threshold);

        if left.is_empty() || right.is_empty() {
            return Node::Leaf { value };
        }

        self.importances[feature] += gain;

        let left = self.build(left, depth + 1);
        let right = self.build(right, depth + 1);

        Node::Split {
            feature,
            threshold,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Best variance-reducing split over a random subset of features.
    fn best_split(
        &mut self,
        indices: &[usize],
        total_sum: f64,
        total_sq: f64,
        parent_sse: f64,
    ) -> Option<(usize, f64, f64)> {
        let mut candidates: Vec<usize> = (0..FEATURE_COUNT).collect();
        candidates.shuffle(&mut self.rng);
        candidates.truncate(self.max_features);

        let n = indices.len();
        let min_leaf = self.config.min_samples_leaf.max(1);
        let mut best: Option<(usize, f64, f64)> = None;
        let mut best_gain = 1e-12;

        for feature in candidates {
            let mut order = indices.to_vec();
            order.sort_by(|&a, &b| self.features[a][feature].total_cmp(&self.features[b][feature]));

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;

            for i in 0..n - 1 {
                let y = self.labels[order[i]];
                left_sum += y;
                left_sq += y * y;

                let left_n = i + 1;
                let right_n = n - left_n;
                if left_n < min_leaf || right_n < min_leaf {
                    continue;
                }

                let x = self.features[order[i]][feature];
                let next = self.features[order[i + 1]][feature];
                if x >= next {
                    continue;
                }

                let right_sum = total_sum - left_sum;
                let right_sq = total_sq - left_sq;
                let sse = (left_sq - left_sum * left_sum / left_n as f64)
                    + (right_sq - right_sum * right_sum / right_n as f64);
                let gain = parent_sse - sse;

                if gain > best_gain {
                    best_gain = gain;
                    best = Some((feature, x + (next - x) / 2.0, gain));
                }
            }
        }

        best
    }
}

impl RegressionTree {
    fn fit(
        config: &ForestConfig,
        features: &[Row],
        labels: &[f64],
        sample: Vec<usize>,
        rng: ChaCha8Rng,
    ) -> Self {
        let mut builder = TreeBuilder {
            features,
            labels,
            config,
            max_features: config.max_features.unwrap_or(FEATURE_COUNT).clamp(1, FEATURE_COUNT),
            rng,
            importances: [0.0; FEATURE_COUNT],
        };
        let root = builder.build(sample, 0);

        RegressionTree {
            root,
            importances: builder.importances,
        }
    }

    pub fn predict(&self, row: &Row) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { value } => return *value,
                Node::Split { feature, threshold, left, right } => {
                    node = if row[*feature] <= *threshold { left.as_ref() } else { right.as_ref() };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn depth(node: &Node) -> usize {
            match node {
                Node::Leaf { .. } => 1,
                Node::Split { left, right, .. } => 1 + depth(left).max(depth(right)),
            }
        }
        depth(&self.root)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
    feature_importances: [f64; FEATURE_COUNT],
}

impl RandomForest {
    /// Train the forest. Returns None if there is nothing to learn from.
    pub fn fit(config: &ForestConfig, features: &[Row], labels: &[f64], seed: u64) -> Option<Self> {
        let n = features.len();
        if n == 0 || n != labels.len() {
            return None;
        }

        // Each tree owns its rng, so the result does not depend on thread scheduling
        let trees: Vec<RegressionTree> = (0..config.n_trees.max(1))
            .into_par_iter()
            .map(|i| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(i as u64));
                let sample: Vec<usize> = if config.bootstrap {
                    (0..n).map(|_| rng.gen_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };
                RegressionTree::fit(config, features, labels, sample, rng)
            })
            .collect();

        let mut feature_importances = [0.0; FEATURE_COUNT];
        for tree in &trees {
            for (total, imp) in feature_importances.iter_mut().zip(tree.importances.iter()) {
                *total += imp;
            }
        }
        let sum: f64 = feature_importances.iter().sum();
        if sum > 0.0 {
            for imp in &mut feature_importances {
                *imp /= sum;
            }
        }

        Some(RandomForest {
            trees,
            feature_importances,
        })
    }

    /// Mean of the tree predictions.
    pub fn predict(&self, row: &Row) -> f64 {
        self.trees.iter().map(|t| t.predict(row)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn feature_importances(&self) -> &[f64; FEATURE_COUNT] {
        &self.feature_importances
    }

    pub fn max_depth(&self) -> usize {
        self.trees.iter().map(RegressionTree::depth).max().unwrap_or(0)
    }
}
