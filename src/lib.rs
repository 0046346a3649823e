//! NeuroFlex - Session proxy and cognitive-state scoring backend
//!
//! NeuroFlex sits between the assessment front end and the remote session
//! data API. It proxies date and session queries, forwards patient-session
//! updates, and scores a cognitive-state label from session telemetry with a
//! pre-trained tabular classifier.
//!
//! ## Modules
//!
//! - **Upstream**: Blocking client for the remote session REST API
//! - **Features**: Session JSON → fixed-order feature vector
//! - **Model**: Classifier artifacts, the loading fallback chain and scoring
//! - **Server**: axum handlers wiring it all together

pub mod config;
pub mod error;
pub mod features;
pub mod model;
pub mod predictor;
pub mod server;
pub mod types;
pub mod upstream;
pub mod validation;

pub use config::ServiceConfig;
pub use error::ServiceError;
pub use features::{FeatureAssembler, FeatureVector, FEATURE_NAMES};
pub use model::{ModelArtifact, ModelLoader};
pub use predictor::CognitivePredictor;
pub use server::{router, serve, AppState};
pub use upstream::{RemoteSessionApi, SessionSource};

/// Service version reported by `/health` and stamped on predictions
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Service name reported by `/health`
pub const SERVICE_NAME: &str = "neuroflex";
