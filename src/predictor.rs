//! Cognitive-state scoring
//!
//! Glues feature assembly to the loaded classifier.

use chrono::Utc;
use serde_json::Value;
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::features::FeatureAssembler;
use crate::model::{
    ArtifactFormat, FeatureAlignment, LoadedModel, ModelArtifact, ModelError, ModelLoader,
};
use crate::types::Prediction;

/// Scores sessions with a loaded model artifact
#[derive(Debug, Clone)]
pub struct CognitivePredictor {
    artifact: ModelArtifact,
    alignment: FeatureAlignment,
    assembler: FeatureAssembler,
    source: Option<(PathBuf, ArtifactFormat)>,
}

impl CognitivePredictor {
    /// Build a predictor from an in-memory artifact
    pub fn new(artifact: ModelArtifact) -> Result<Self, ModelError> {
        let alignment = artifact.validate()?;
        let assembler = FeatureAssembler::with_vocabularies(&artifact.categories);
        Ok(Self {
            artifact,
            alignment,
            assembler,
            source: None,
        })
    }

    /// Load the first usable artifact from `paths`
    pub fn load(paths: &[PathBuf]) -> Result<Self, ModelError> {
        ModelLoader::load_first(paths).map(Self::from)
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    /// Path and format the artifact was read from, if it came from disk
    pub fn source(&self) -> Option<(&PathBuf, ArtifactFormat)> {
        self.source.as_ref().map(|(path, format)| (path, *format))
    }

    /// Score one session
    ///
    /// `session_data` is the session's loosely-typed `data` object and
    /// `patient` the optional patient metadata.
    pub fn predict(
        &self,
        session_data: &Value,
        patient: Option<&Value>,
    ) -> Result<Prediction, ServiceError> {
        let features = self.assembler.assemble(session_data, patient)?;
        let input = self.alignment.apply(&features.values);
        let probabilities = self
            .artifact
            .classifier
            .predict_proba(&input, self.artifact.classes.len())?;

        // First maximum wins ties, so class order in the artifact decides.
        let (best, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |(bi, bp), (i, p)| {
                if p > bp {
                    (i, p)
                } else {
                    (bi, bp)
                }
            });

        let label = self.artifact.classes[best].clone();
        debug!(
            label = %label,
            confidence,
            missing = features.missing.len(),
            "session scored"
        );

        Ok(Prediction {
            prediction_id: Uuid::new_v4().to_string(),
            label,
            confidence,
            probabilities: self
                .artifact
                .classes
                .iter()
                .cloned()
                .zip(probabilities)
                .collect(),
            features: features.named(),
            missing_features: features.missing,
            model_version: self.artifact.format_version,
            scored_at: Utc::now(),
        })
    }
}

impl From<LoadedModel> for CognitivePredictor {
    fn from(loaded: LoadedModel) -> Self {
        let assembler = FeatureAssembler::with_vocabularies(&loaded.artifact.categories);
        Self {
            artifact: loaded.artifact,
            alignment: loaded.alignment,
            assembler,
            source: Some((loaded.path, loaded.format)),
        }
    }
}
