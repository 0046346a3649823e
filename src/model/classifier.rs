//! Tabular classifiers
//!
//! Two model families cover what the training notebooks export: a random
//! forest of axis-aligned decision trees and a (multinomial) logistic
//! regression with an optional standard scaler.

use serde::{Deserialize, Serialize};

use super::ModelError;

/// A node in a decision tree; nodes reference each other by index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeNode {
    /// `x[feature] <= threshold` goes to `left`, otherwise `right`
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    /// Per-class sample counts (or weights) at the leaf
    Leaf { distribution: Vec<f64> },
}

/// Decision tree rooted at node 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    /// Walk the tree and return the leaf distribution for `x`
    ///
    /// Trees are checked by [`DecisionTree::validate`] at load time, so the
    /// walk cannot loop; the step bound only guards hand-built trees.
    fn leaf_for(&self, x: &[f64]) -> Result<&[f64], ModelError> {
        let mut index = 0;
        for _ in 0..=self.nodes.len() {
            match self.nodes.get(index) {
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let value = x.get(*feature).copied().ok_or_else(|| {
                        ModelError::Invalid(format!("feature index {} out of range", feature))
                    })?;
                    index = if value <= *threshold { *left } else { *right };
                }
                Some(TreeNode::Leaf { distribution }) => return Ok(distribution.as_slice()),
                None => {
                    return Err(ModelError::Invalid(format!(
                        "node index {} out of range",
                        index
                    )))
                }
            }
        }
        Err(ModelError::Invalid("tree walk did not reach a leaf".into()))
    }

    /// Check node references, reachability and leaf shapes
    pub fn validate(&self, n_features: usize, n_classes: usize) -> Result<(), ModelError> {
        if self.nodes.is_empty() {
            return Err(ModelError::Invalid("tree has no nodes".into()));
        }

        // Children must point forward; this rules out cycles without a visit set.
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature >= n_features {
                        return Err(ModelError::Invalid(format!(
                            "node {} splits on feature {} but model has {} features",
                            i, feature, n_features
                        )));
                    }
                    if !threshold.is_finite() {
                        return Err(ModelError::Invalid(format!(
                            "node {} has a non-finite threshold",
                            i
                        )));
                    }
                    for child in [left, right] {
                        if *child <= i || *child >= self.nodes.len() {
                            return Err(ModelError::Invalid(format!(
                                "node {} has invalid child {}",
                                i, child
                            )));
                        }
                    }
                }
                TreeNode::Leaf { distribution } => {
                    if distribution.len() != n_classes {
                        return Err(ModelError::Invalid(format!(
                            "leaf {} has {} class weights, expected {}",
                            i,
                            distribution.len(),
                            n_classes
                        )));
                    }
                    if distribution.iter().any(|w| !w.is_finite() || *w < 0.0) {
                        return Err(ModelError::Invalid(format!(
                            "leaf {} has negative or non-finite weights",
                            i
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Random forest: class probabilities are the mean of normalized leaf
/// distributions across trees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forest {
    pub trees: Vec<DecisionTree>,
}

impl Forest {
    fn predict_proba(&self, x: &[f64], n_classes: usize) -> Result<Vec<f64>, ModelError> {
        let mut totals = vec![0.0; n_classes];
        for tree in &self.trees {
            let leaf = tree.leaf_for(x)?;
            let sum: f64 = leaf.iter().sum();
            if sum <= 0.0 {
                continue;
            }
            for (total, weight) in totals.iter_mut().zip(leaf) {
                *total += weight / sum;
            }
        }
        Ok(normalize(totals))
    }
}

/// Per-feature standardization applied before the linear model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    fn transform(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| if *s == 0.0 { v - m } else { (v - m) / s })
            .collect()
    }
}

/// Logistic regression
///
/// A single weight row is a binary model scoring the second class; otherwise
/// there is one row per class and the scores go through softmax.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Logistic {
    pub weights: Vec<Vec<f64>>,
    pub intercepts: Vec<f64>,
    pub scaler: Option<StandardScaler>,
}

impl Logistic {
    fn predict_proba(&self, x: &[f64]) -> Vec<f64> {
        let scaled;
        let x = match &self.scaler {
            Some(scaler) => {
                scaled = scaler.transform(x);
                &scaled[..]
            }
            None => x,
        };

        let scores: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.intercepts)
            .map(|(row, b)| row.iter().zip(x).map(|(w, v)| w * v).sum::<f64>() + b)
            .collect();

        if scores.len() == 1 {
            let p = sigmoid(scores[0]);
            return vec![1.0 - p, p];
        }
        softmax(&scores)
    }

    fn validate(&self, n_features: usize, n_classes: usize) -> Result<(), ModelError> {
        let expected_rows = if n_classes == 2 { [1, 2] } else { [n_classes, n_classes] };
        if !expected_rows.contains(&self.weights.len()) {
            return Err(ModelError::Invalid(format!(
                "logistic model has {} weight rows for {} classes",
                self.weights.len(),
                n_classes
            )));
        }
        if self.intercepts.len() != self.weights.len() {
            return Err(ModelError::Invalid(format!(
                "logistic model has {} intercepts for {} weight rows",
                self.intercepts.len(),
                self.weights.len()
            )));
        }
        if let Some(row) = self.weights.iter().find(|row| row.len() != n_features) {
            return Err(ModelError::Invalid(format!(
                "logistic weight row has {} entries, expected {}",
                row.len(),
                n_features
            )));
        }
        let mut coefficients = self.weights.iter().flatten().chain(&self.intercepts);
        if coefficients.any(|v| !v.is_finite()) {
            return Err(ModelError::Invalid(
                "logistic model has non-finite weights or intercepts".into(),
            ));
        }
        if let Some(scaler) = &self.scaler {
            if scaler.mean.len() != n_features || scaler.scale.len() != n_features {
                return Err(ModelError::Invalid(
                    "scaler shape does not match feature count".into(),
                ));
            }
            if scaler.mean.iter().chain(&scaler.scale).any(|v| !v.is_finite()) {
                return Err(ModelError::Invalid("scaler has non-finite values".into()));
            }
        }
        Ok(())
    }
}

/// Supported classifier families
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classifier {
    Forest(Forest),
    Logistic(Logistic),
}

impl Classifier {
    pub fn kind(&self) -> &'static str {
        match self {
            Classifier::Forest(_) => "forest",
            Classifier::Logistic(_) => "logistic",
        }
    }

    /// Class probabilities for `x`, in class order
    pub fn predict_proba(&self, x: &[f64], n_classes: usize) -> Result<Vec<f64>, ModelError> {
        match self {
            Classifier::Forest(forest) => forest.predict_proba(x, n_classes),
            Classifier::Logistic(logistic) => Ok(logistic.predict_proba(x)),
        }
    }

    pub fn validate(&self, n_features: usize, n_classes: usize) -> Result<(), ModelError> {
        match self {
            Classifier::Forest(forest) => {
                if forest.trees.is_empty() {
                    return Err(ModelError::Invalid("forest has no trees".into()));
                }
                forest
                    .trees
                    .iter()
                    .try_for_each(|tree| tree.validate(n_features, n_classes))
            }
            Classifier::Logistic(logistic) => logistic.validate(n_features, n_classes),
        }
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn softmax(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    normalize(exps)
}

fn normalize(values: Vec<f64>) -> Vec<f64> {
    let sum: f64 = values.iter().sum();
    if sum <= 0.0 {
        let uniform = 1.0 / values.len().max(1) as f64;
        return vec![uniform; values.len()];
    }
    values.into_iter().map(|v| v / sum).collect()
}
