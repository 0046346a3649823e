//! Model artifact loading
//!
//! Artifacts have been exported in three layouts over time. The loader tries
//! them in order and keeps the reason each attempt failed:
//!
//! 1. Binary: `NFXM` magic followed by a bincode-encoded [`ModelArtifact`]
//! 2. JSON envelope: a [`ModelArtifact`] serialized as JSON
//! 3. Legacy JSON: a bare forest (`classes`, `trees`) from format version 1

use bincode::Options;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{
    Classifier, DecisionTree, FeatureAlignment, Forest, ModelArtifact, ModelError,
    ModelMetadata, CURRENT_FORMAT_VERSION,
};

/// Magic header of binary artifacts
pub const BINARY_MAGIC: &[u8; 4] = b"NFXM";

/// Upper bound on artifact size (64 MiB)
pub const MAX_ARTIFACT_BYTES: u64 = 64 * 1024 * 1024;

/// Layouts the loader understands, in the order they are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    Binary,
    JsonEnvelope,
    JsonLegacy,
}

impl ArtifactFormat {
    pub const FALLBACK_ORDER: [ArtifactFormat; 3] = [
        ArtifactFormat::Binary,
        ArtifactFormat::JsonEnvelope,
        ArtifactFormat::JsonLegacy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactFormat::Binary => "binary",
            ArtifactFormat::JsonEnvelope => "json",
            ArtifactFormat::JsonLegacy => "json-legacy",
        }
    }
}

impl fmt::Display for ArtifactFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Artifact read from disk, with how it was decoded
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub artifact: ModelArtifact,
    pub alignment: FeatureAlignment,
    pub format: ArtifactFormat,
    pub path: PathBuf,
}

/// Version 1 layout: a bare random forest
#[derive(Debug, Deserialize)]
struct LegacyForest {
    classes: Vec<String>,
    trees: Vec<DecisionTree>,
    #[serde(default)]
    feature_names: Vec<String>,
    #[serde(default)]
    categories: BTreeMap<String, Vec<String>>,
}

impl From<LegacyForest> for ModelArtifact {
    fn from(legacy: LegacyForest) -> Self {
        ModelArtifact {
            format_version: CURRENT_FORMAT_VERSION,
            feature_names: legacy.feature_names,
            classes: legacy.classes,
            categories: legacy.categories,
            classifier: Classifier::Forest(Forest {
                trees: legacy.trees,
            }),
            metadata: ModelMetadata {
                trained_at: None,
                description: Some("upgraded from format version 1".to_string()),
            },
        }
    }
}

fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_ARTIFACT_BYTES)
}

/// Reads model artifacts through the format fallback chain
pub struct ModelLoader;

impl ModelLoader {
    /// Load one artifact file
    pub fn load(path: &Path) -> Result<LoadedModel, ModelError> {
        let io_err = |source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        };

        let size = fs::metadata(path).map_err(io_err)?.len();
        if size > MAX_ARTIFACT_BYTES {
            return Err(ModelError::Invalid(format!(
                "{} is {} bytes, limit is {}",
                path.display(),
                size,
                MAX_ARTIFACT_BYTES
            )));
        }

        let bytes = fs::read(path).map_err(io_err)?;
        let (artifact, alignment, format) =
            Self::decode(&bytes).map_err(|attempts| ModelError::Unreadable {
                path: path.to_path_buf(),
                attempts,
            })?;

        info!(
            path = %path.display(),
            format = %format,
            classes = artifact.classes.len(),
            kind = artifact.classifier.kind(),
            "loaded model artifact"
        );

        Ok(LoadedModel {
            artifact,
            alignment,
            format,
            path: path.to_path_buf(),
        })
    }

    /// Try each candidate path in order and return the first usable model
    pub fn load_first(paths: &[PathBuf]) -> Result<LoadedModel, ModelError> {
        let mut failures = Vec::new();

        for path in paths {
            if !path.exists() {
                debug!(path = %path.display(), "model artifact not present, skipping");
                failures.push(format!("{}: not found", path.display()));
                continue;
            }
            match Self::load(path) {
                Ok(model) => return Ok(model),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "model artifact rejected");
                    failures.push(format!("{}: {}", path.display(), e));
                }
            }
        }

        if failures.is_empty() {
            failures.push("no model paths configured".to_string());
        }
        Err(ModelError::NoUsableArtifact(failures))
    }

    /// Decode raw bytes, returning every attempt's failure if none succeed
    pub fn decode(
        bytes: &[u8],
    ) -> Result<(ModelArtifact, FeatureAlignment, ArtifactFormat), Vec<String>> {
        let mut attempts = Vec::new();

        for format in ArtifactFormat::FALLBACK_ORDER {
            let decoded = match format {
                ArtifactFormat::Binary => decode_binary(bytes),
                ArtifactFormat::JsonEnvelope => decode_envelope(bytes),
                ArtifactFormat::JsonLegacy => decode_legacy(bytes),
            };

            match decoded.and_then(|artifact| {
                let alignment = artifact.validate()?;
                Ok((artifact, alignment))
            }) {
                Ok((artifact, alignment)) => {
                    debug!(format = %format, "artifact decoded");
                    return Ok((artifact, alignment, format));
                }
                Err(e) => attempts.push(format!("{}: {}", format, e)),
            }
        }

        Err(attempts)
    }
}

fn decode_binary(bytes: &[u8]) -> Result<ModelArtifact, ModelError> {
    let payload = bytes
        .strip_prefix(BINARY_MAGIC.as_slice())
        .ok_or_else(|| ModelError::Invalid("missing binary header".to_string()))?;
    bincode_options()
        .deserialize(payload)
        .map_err(|e| ModelError::Invalid(e.to_string()))
}

fn decode_envelope(bytes: &[u8]) -> Result<ModelArtifact, ModelError> {
    serde_json::from_slice(bytes).map_err(|e| ModelError::Invalid(e.to_string()))
}

fn decode_legacy(bytes: &[u8]) -> Result<ModelArtifact, ModelError> {
    let legacy: LegacyForest =
        serde_json::from_slice(bytes).map_err(|e| ModelError::Invalid(e.to_string()))?;
    Ok(legacy.into())
}

impl ModelArtifact {
    /// Encode as a binary artifact (magic header + bincode)
    pub fn to_binary(&self) -> Result<Vec<u8>, ModelError> {
        let mut bytes = BINARY_MAGIC.to_vec();
        let encoded = bincode_options()
            .serialize(self)
            .map_err(|e| ModelError::Encode(e.to_string()))?;
        bytes.extend_from_slice(&encoded);
        Ok(bytes)
    }

    pub fn save_binary(&self, path: &Path) -> Result<(), ModelError> {
        let bytes = self.to_binary()?;
        fs::write(path, bytes).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save_json(&self, path: &Path) -> Result<(), ModelError> {
        let json =
            serde_json::to_vec_pretty(self).map_err(|e| ModelError::Encode(e.to_string()))?;
        fs::write(path, json).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::sample_artifact;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_binary_artifact_loads_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        sample_artifact().save_binary(&path).unwrap();

        let loaded = ModelLoader::load(&path).unwrap();
        assert_eq!(loaded.format, ArtifactFormat::Binary);
        assert_eq!(loaded.artifact, sample_artifact());
    }

    #[test]
    fn test_json_envelope_falls_back_from_binary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        sample_artifact().save_json(&path).unwrap();

        let loaded = ModelLoader::load(&path).unwrap();
        assert_eq!(loaded.format, ArtifactFormat::JsonEnvelope);
        assert_eq!(loaded.artifact.classes, sample_artifact().classes);
    }

    #[test]
    fn test_legacy_forest_is_upgraded() {
        let legacy = json!({
            "classes": ["normal", "mild_impairment"],
            "trees": [{
                "nodes": [
                    {"split": {"feature": 0, "threshold": 60.0, "left": 1, "right": 2}},
                    {"leaf": {"distribution": [1.0, 9.0]}},
                    {"leaf": {"distribution": [9.0, 1.0]}}
                ]
            }]
        });

        let (artifact, alignment, format) =
            ModelLoader::decode(legacy.to_string().as_bytes()).unwrap();
        assert_eq!(format, ArtifactFormat::JsonLegacy);
        assert_eq!(artifact.format_version, CURRENT_FORMAT_VERSION);
        assert_eq!(alignment, FeatureAlignment::identity());
        assert_eq!(artifact.classifier.kind(), "forest");
    }

    #[test]
    fn test_future_version_reports_every_attempt() {
        let mut artifact = sample_artifact();
        artifact.format_version = 9;
        let bytes = serde_json::to_vec(&artifact).unwrap();

        let attempts = ModelLoader::decode(&bytes).unwrap_err();
        assert_eq!(attempts.len(), 3);
        assert!(attempts[0].starts_with("binary:"));
        assert!(attempts[1].contains("Unsupported artifact format version 9"));
        assert!(attempts[2].starts_with("json-legacy:"));
    }

    #[test]
    fn test_corrupt_binary_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        let mut bytes = sample_artifact().to_binary().unwrap();
        bytes.truncate(bytes.len() / 2);
        fs::write(&path, bytes).unwrap();

        match ModelLoader::load(&path) {
            Err(ModelError::Unreadable { attempts, .. }) => assert_eq!(attempts.len(), 3),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_load_first_skips_missing_and_broken_paths() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.bin");
        let broken = dir.path().join("broken.json");
        let good = dir.path().join("good.json");
        fs::write(&broken, b"{\"classes\": [").unwrap();
        sample_artifact().save_json(&good).unwrap();

        let loaded =
            ModelLoader::load_first(&[missing.clone(), broken.clone(), good.clone()]).unwrap();
        assert_eq!(loaded.path, good);

        match ModelLoader::load_first(&[missing, broken]) {
            Err(ModelError::NoUsableArtifact(failures)) => {
                assert_eq!(failures.len(), 2);
                assert!(failures[0].ends_with("not found"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_load_first_without_paths() {
        assert!(matches!(
            ModelLoader::load_first(&[]),
            Err(ModelError::NoUsableArtifact(_))
        ));
    }
}
