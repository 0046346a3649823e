//! Classifier artifacts
//!
//! A [`ModelArtifact`] bundles the trained classifier with everything needed
//! to feed it: class labels, the feature order it was trained on and the
//! vocabularies of its categorical features. Artifacts are read through the
//! fallback chain in [`loader`].

mod classifier;
pub mod loader;

pub use classifier::{Classifier, DecisionTree, Forest, Logistic, StandardScaler, TreeNode};
pub use loader::{ArtifactFormat, LoadedModel, ModelLoader};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use thiserror::Error;

use crate::features::{FEATURE_COUNT, FEATURE_NAMES};

/// Artifact layout version written by this crate
pub const CURRENT_FORMAT_VERSION: u32 = 2;

/// Errors raised while loading or running a model
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Failed to read model artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported artifact format version {found} (supported up to {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Invalid model: {0}")]
    Invalid(String),

    #[error("Feature mismatch: {0}")]
    FeatureMismatch(String),

    #[error("No decoder could read {path}: {}", .attempts.join("; "))]
    Unreadable { path: PathBuf, attempts: Vec<String> },

    #[error("No usable model artifact: {}", .0.join("; "))]
    NoUsableArtifact(Vec<String>),

    #[error("Failed to encode model artifact: {0}")]
    Encode(String),
}

/// Free-form training information carried with the artifact
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    #[serde(default)]
    pub trained_at: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A trained classifier plus its input contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    /// Feature order the classifier expects; empty means the canonical order
    #[serde(default)]
    pub feature_names: Vec<String>,
    pub classes: Vec<String>,
    /// Vocabularies for categorical features, keyed by feature name
    #[serde(default)]
    pub categories: BTreeMap<String, Vec<String>>,
    pub classifier: Classifier,
    #[serde(default)]
    pub metadata: ModelMetadata,
}

impl ModelArtifact {
    /// Check the artifact is internally consistent and matches our features
    pub fn validate(&self) -> Result<FeatureAlignment, ModelError> {
        if self.format_version == 0 || self.format_version > CURRENT_FORMAT_VERSION {
            return Err(ModelError::UnsupportedVersion {
                found: self.format_version,
                supported: CURRENT_FORMAT_VERSION,
            });
        }
        if self.classes.len() < 2 {
            return Err(ModelError::Invalid(format!(
                "expected at least two classes, found {}",
                self.classes.len()
            )));
        }

        let alignment = FeatureAlignment::for_names(&self.feature_names)?;
        self.classifier
            .validate(alignment.len(), self.classes.len())?;
        Ok(alignment)
    }

    /// Feature names in the order the classifier consumes them
    pub fn effective_feature_names(&self) -> Vec<String> {
        if self.feature_names.is_empty() {
            FEATURE_NAMES.iter().map(|s| s.to_string()).collect()
        } else {
            self.feature_names.clone()
        }
    }
}

/// Maps the canonical feature vector onto the artifact's feature order
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureAlignment {
    /// `model_input[i] = canonical[order[i]]`
    order: Vec<usize>,
}

impl FeatureAlignment {
    pub fn identity() -> Self {
        Self {
            order: (0..FEATURE_COUNT).collect(),
        }
    }

    /// Build the mapping for an artifact's declared feature names
    ///
    /// The names may be any subset of the canonical features, in any order.
    pub fn for_names(names: &[String]) -> Result<Self, ModelError> {
        if names.is_empty() {
            return Ok(Self::identity());
        }

        let mut seen = HashSet::new();
        let mut order = Vec::with_capacity(names.len());
        for name in names {
            if !seen.insert(name.as_str()) {
                return Err(ModelError::FeatureMismatch(format!(
                    "feature '{}' listed twice",
                    name
                )));
            }
            let index = FEATURE_NAMES
                .iter()
                .position(|canonical| canonical == name)
                .ok_or_else(|| {
                    ModelError::FeatureMismatch(format!("unknown feature '{}'", name))
                })?;
            order.push(index);
        }
        Ok(Self { order })
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Reorder a canonical vector into model input order
    pub fn apply(&self, canonical: &[f64]) -> Vec<f64> {
        self.order.iter().map(|&i| canonical[i]).collect()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    fn stump(feature: usize, threshold: f64, left: Vec<f64>, right: Vec<f64>) -> DecisionTree {
        DecisionTree {
            nodes: vec![
                TreeNode::Split {
                    feature,
                    threshold,
                    left: 1,
                    right: 2,
                },
                TreeNode::Leaf { distribution: left },
                TreeNode::Leaf {
                    distribution: right,
                },
            ],
        }
    }

    /// Two-tree forest over the canonical order
    ///
    /// Precision <= 60 leans "mild_impairment"; a slow first answer
    /// (TiempoRespuestaPregunta1 > 8s) does the same.
    pub fn sample_artifact() -> ModelArtifact {
        ModelArtifact {
            format_version: CURRENT_FORMAT_VERSION,
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            classes: vec!["normal".to_string(), "mild_impairment".to_string()],
            categories: BTreeMap::from([(
                "TipoEscena".to_string(),
                vec!["Sala".to_string(), "Cocina".to_string()],
            )]),
            classifier: Classifier::Forest(Forest {
                trees: vec![
                    stump(0, 60.0, vec![1.0, 9.0], vec![9.0, 1.0]),
                    stump(7, 8.0, vec![7.0, 3.0], vec![2.0, 8.0]),
                ],
            }),
            metadata: ModelMetadata {
                trained_at: Some("2024-01-10T00:00:00Z".to_string()),
                description: Some("test forest".to_string()),
            },
        }
    }
}
