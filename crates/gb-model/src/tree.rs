//! CART regression trees stored as a flat node arena.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use gb_types::DenseMatrix;

use crate::params::SplitCriterion;

/// Two feature values closer than this are treated as equal when placing
/// thresholds.
const FEATURE_THRESHOLD: f64 = 1e-7;

/// One node of a [`RegressionTree`]. Children always have larger indices
/// than their parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    Split {
        feature: usize,
        /// Samples with `x[feature] <= threshold` go left.
        threshold: f64,
        left: usize,
        right: usize,
        n_samples: usize,
        impurity: f64,
    },
    Leaf {
        value: f64,
        n_samples: usize,
        impurity: f64,
    },
}

impl Node {
    pub fn n_samples(&self) -> usize {
        match self {
            Node::Split { n_samples, .. } | Node::Leaf { n_samples, .. } => *n_samples,
        }
    }

    pub fn impurity(&self) -> f64 {
        match self {
            Node::Split { impurity, .. } | Node::Leaf { impurity, .. } => *impurity,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    pub(crate) fn from_nodes(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Index of the leaf `row` falls into.
    pub fn leaf_index(&self, row: &[f64]) -> usize {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { .. } => return idx,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        match &self.nodes[self.leaf_index(row)] {
            Node::Leaf { value, .. } => *value,
            Node::Split { .. } => unreachable!("leaf_index always stops at a leaf"),
        }
    }

    pub(crate) fn set_leaf_value(&mut self, idx: usize, new_value: f64) {
        if let Some(Node::Leaf { value, .. }) = self.nodes.get_mut(idx) {
            *value = new_value;
        }
    }

    /// Weighted impurity decrease per feature, divided by the root sample
    /// count. Not normalised.
    pub fn impurity_decrease(&self, n_features: usize) -> Vec<f64> {
        let mut importances = vec![0.0; n_features];
        for node in &self.nodes {
            if let Node::Split {
                feature,
                left,
                right,
                n_samples,
                impurity,
                ..
            } = node
            {
                let l = &self.nodes[*left];
                let r = &self.nodes[*right];
                importances[*feature] += *n_samples as f64 * impurity
                    - l.n_samples() as f64 * l.impurity()
                    - r.n_samples() as f64 * r.impurity();
            }
        }
        let root = self.nodes.first().map_or(0, Node::n_samples);
        if root > 0 {
            for v in &mut importances {
                *v /= root as f64;
            }
        }
        importances
    }

    /// Structural check used when loading a persisted tree.
    pub(crate) fn check(&self, n_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".into());
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if let Node::Split {
                feature,
                threshold,
                left,
                right,
                ..
            } = node
            {
                if *feature >= n_features {
                    return Err(format!("node {i} splits on unknown feature {feature}"));
                }
                if !threshold.is_finite() {
                    return Err(format!("node {i} has a non-finite threshold"));
                }
                if *left <= i || *right <= i || *left >= self.nodes.len() || *right >= self.nodes.len()
                {
                    return Err(format!("node {i} has invalid children"));
                }
            }
        }
        Ok(())
    }
}

/// Fits one tree to a target (the pseudo-residuals of a boosting stage).
pub(crate) struct TreeBuilder<'a> {
    pub x: &'a DenseMatrix,
    pub target: &'a [f64],
    pub criterion: SplitCriterion,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Non-constant features scanned per split.
    pub max_features: usize,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    proxy: f64,
}

impl<'a> TreeBuilder<'a> {
    pub fn build(&self, rows: Vec<usize>, rng: &mut ChaCha8Rng) -> RegressionTree {
        let mut nodes = Vec::new();
        self.grow(rows, 0, &mut nodes, rng);
        RegressionTree::from_nodes(nodes)
    }

    fn grow(
        &self,
        rows: Vec<usize>,
        depth: usize,
        nodes: &mut Vec<Node>,
        rng: &mut ChaCha8Rng,
    ) -> usize {
        let n = rows.len();
        let (sum, sum_sq) = rows.iter().fold((0.0, 0.0), |(s, sq), &r| {
            let t = self.target[r];
            (s + t, sq + t * t)
        });
        let mean = sum / n as f64;
        let impurity = (sum_sq / n as f64 - mean * mean).max(0.0);

        let idx = nodes.len();
        nodes.push(Node::Leaf {
            value: mean,
            n_samples: n,
            impurity,
        });

        let splittable = depth < self.max_depth
            && n >= self.min_samples_split
            && n >= 2 * self.min_samples_leaf
            && impurity > f64::EPSILON;
        if !splittable {
            return idx;
        }

        let Some(best) = self.find_split(&rows, sum, rng) else {
            return idx;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| self.x.get(r, best.feature) <= best.threshold);
        let left = self.grow(left_rows, depth + 1, nodes, rng);
        let right = self.grow(right_rows, depth + 1, nodes, rng);
        nodes[idx] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
            n_samples: n,
            impurity,
        };
        idx
    }

    fn find_split(&self, rows: &[usize], total: f64, rng: &mut ChaCha8Rng) -> Option<BestSplit> {
        let n = rows.len();
        let n_features = self.x.n_cols();
        let budget = self.max_features.min(n_features);

        // Features are drawn without replacement until `budget` non-constant
        // ones have been scanned. Constant features do not count.
        let mut order: Vec<usize> = (0..n_features).collect();
        let mut visited = 0;
        let mut best: Option<BestSplit> = None;
        let mut column: Vec<(f64, f64)> = Vec::with_capacity(n);
        for drawn in 0..n_features {
            if visited >= budget {
                break;
            }
            let pick = rng.random_range(drawn..n_features);
            order.swap(drawn, pick);
            let feature = order[drawn];

            column.clear();
            column.extend(rows.iter().map(|&r| (self.x.get(r, feature), self.target[r])));
            column.sort_by(|a, b| a.0.total_cmp(&b.0));
            if column[n - 1].0 <= column[0].0 + FEATURE_THRESHOLD {
                continue;
            }
            visited += 1;

            let mut left_sum = 0.0;
            for i in 0..n - 1 {
                left_sum += column[i].1;
                let n_left = i + 1;
                let n_right = n - n_left;
                if column[i + 1].0 <= column[i].0 + FEATURE_THRESHOLD {
                    continue;
                }
                if n_left < self.min_samples_leaf || n_right < self.min_samples_leaf {
                    continue;
                }
                let proxy = self.proxy(left_sum, n_left, total - left_sum, n_right);
                if best.as_ref().map_or(true, |b| proxy > b.proxy) {
                    let mut threshold = column[i].0 / 2.0 + column[i + 1].0 / 2.0;
                    if threshold >= column[i + 1].0 || !threshold.is_finite() {
                        threshold = column[i].0;
                    }
                    best = Some(BestSplit {
                        feature,
                        threshold,
                        proxy,
                    });
                }
            }
        }
        best
    }

    /// Quantity maximised by the best split; differs from the true impurity
    /// improvement by terms constant within a node.
    fn proxy(&self, sum_left: f64, n_left: usize, sum_right: f64, n_right: usize) -> f64 {
        let (nl, nr) = (n_left as f64, n_right as f64);
        match self.criterion {
            SplitCriterion::SquaredError => sum_left * sum_left / nl + sum_right * sum_right / nr,
            SplitCriterion::FriedmanMse => {
                let diff = nr * sum_left - nl * sum_right;
                diff * diff / (nl * nr)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn builder<'a>(x: &'a DenseMatrix, y: &'a [f64], depth: usize) -> TreeBuilder<'a> {
        TreeBuilder {
            x,
            target: y,
            criterion: SplitCriterion::FriedmanMse,
            max_depth: depth,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: x.n_cols(),
        }
    }

    #[test]
    fn stump_splits_at_midpoint() {
        let x = DenseMatrix::from_rows(&[vec![1.0], vec![2.0], vec![3.0], vec![4.0]]).unwrap();
        let y = [0.0, 0.0, 10.0, 10.0];
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let tree = builder(&x, &y, 1).build((0..4).collect(), &mut rng);

        assert_eq!(tree.n_nodes(), 3);
        match &tree.nodes()[0] {
            Node::Split {
                feature, threshold, ..
            } => {
                assert_eq!(*feature, 0);
                assert_eq!(*threshold, 2.5);
            }
            other => panic!("expected split, got {other:?}"),
        }
        assert_eq!(tree.predict_row(&[2.5]), 0.0);
        assert_eq!(tree.predict_row(&[2.6]), 10.0);
    }

    #[test]
    fn constant_target_gives_single_leaf() {
        let x = DenseMatrix::from_rows(&[vec![1.0], vec![2.0], vec![3.0]]).unwrap();
        let y = [5.0, 5.0, 5.0];
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let tree = builder(&x, &y, 3).build((0..3).collect(), &mut rng);
        assert_eq!(tree.n_nodes(), 1);
        assert_eq!(tree.predict_row(&[100.0]), 5.0);
    }

    #[test]
    fn importance_goes_to_informative_feature() {
        let rows: Vec<Vec<f64>> = (0..20)
            .map(|i| vec![(i % 3) as f64, i as f64])
            .collect();
        let x = DenseMatrix::from_rows(&rows).unwrap();
        let y: Vec<f64> = (0..20).map(|i| if i < 10 { -1.0 } else { 1.0 }).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let tree = builder(&x, &y, 1).build((0..20).collect(), &mut rng);

        let imp = tree.impurity_decrease(2);
        assert_eq!(imp[0], 0.0);
        // The root variance is 1 and the split separates the classes exactly.
        assert!((imp[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn min_samples_leaf_is_respected() {
        let x = DenseMatrix::from_rows(&[vec![1.0], vec![2.0], vec![3.0], vec![4.0]]).unwrap();
        let y = [100.0, 0.0, 0.0, 0.0];
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut b = builder(&x, &y, 2);
        b.min_samples_leaf = 2;
        let tree = b.build((0..4).collect(), &mut rng);
        for node in tree.nodes() {
            assert!(node.n_samples() >= 2);
        }
    }

    #[test]
    fn constant_columns_do_not_use_up_feature_draws() {
        let rows: Vec<Vec<f64>> = (0..200)
            .map(|i| {
                let mut row = vec![1.0; 10];
                row[7] = i as f64;
                row
            })
            .collect();
        let x = DenseMatrix::from_rows(&rows).unwrap();
        let y: Vec<f64> = (0..200).map(|i| if i < 100 { 0.0 } else { 5.0 }).collect();
        let mut b = builder(&x, &y, 3);
        b.max_features = 1;

        let mut rng = ChaCha8Rng::seed_from_u64(0);
        for _ in 0..50 {
            let tree = b.build((0..200).collect(), &mut rng);
            match &tree.nodes()[0] {
                Node::Split { feature, .. } => assert_eq!(*feature, 7),
                Node::Leaf { .. } => panic!("root was not split"),
            }
        }
    }

    #[test]
    fn all_constant_columns_give_single_leaf() {
        let x = DenseMatrix::from_rows(&[vec![1.0, 2.0], vec![1.0, 2.0], vec![1.0, 2.0]]).unwrap();
        let y = [0.0, 1.0, 2.0];
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let tree = builder(&x, &y, 3).build((0..3).collect(), &mut rng);
        assert_eq!(tree.n_nodes(), 1);
    }

    #[test]
    fn check_rejects_backward_children() {
        let tree = RegressionTree::from_nodes(vec![Node::Split {
            feature: 0,
            threshold: 0.0,
            left: 0,
            right: 0,
            n_samples: 1,
            impurity: 0.0,
        }]);
        assert!(tree.check(1).is_err());
    }
}
