//! NeuroFlex CLI - Command-line interface for the NeuroFlex backend
//!
//! Commands:
//! - serve: Run the HTTP backend
//! - predict: Score a session JSON file with a model artifact
//! - inspect-model: Report what the loader makes of an artifact
//! - convert-model: Re-encode an artifact as binary or JSON
//! - doctor: Diagnose configuration, model and upstream health
//!
//! # Environment Variables
//!
//! - `NEUROFLEX_LOG`: Log filter (trace, debug, info, warn, error)
//! - `NEUROFLEX_HOST`, `NEUROFLEX_PORT`: Bind address
//! - `NEUROFLEX_UPSTREAM_URL`: Session API base URL
//! - `NEUROFLEX_MODEL_PATHS`: `:`-separated candidate model artifacts

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use neuroflex::config::{ConfigError, ServiceConfig};
use neuroflex::model::{ModelError, ModelLoader};
use neuroflex::types::{PredictRequest, SessionRecord};
use neuroflex::upstream::check_upstream;
use neuroflex::{
    AppState, CognitivePredictor, RemoteSessionApi, ServiceError, SERVICE_NAME, SERVICE_VERSION,
};

/// NeuroFlex - Session proxy and cognitive-state scoring backend
#[derive(Parser)]
#[command(name = "neuroflex")]
#[command(version = SERVICE_VERSION)]
#[command(about = "Proxy NeuroFlex sessions and score cognitive state", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP backend
    Serve {
        /// JSON config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Bind host
        #[arg(long)]
        host: Option<String>,

        /// Bind port
        #[arg(long)]
        port: Option<u16>,

        /// Upstream session API base URL
        #[arg(long)]
        upstream_url: Option<String>,

        /// Candidate model artifact (repeatable, tried in order)
        #[arg(long = "model")]
        models: Vec<PathBuf>,
    },

    /// Score a session JSON file
    Predict {
        /// Model artifact path
        #[arg(short, long)]
        model: PathBuf,

        /// Session JSON file (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Pretty-print the prediction
        #[arg(long)]
        pretty: bool,
    },

    /// Report how a model artifact is decoded
    InspectModel {
        /// Model artifact path
        path: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Re-encode a model artifact
    ConvertModel {
        /// Source artifact (any supported layout)
        #[arg(short, long)]
        input: PathBuf,

        /// Destination path
        #[arg(short, long)]
        output: PathBuf,

        /// Output layout
        #[arg(long, default_value = "binary")]
        format: ModelFormat,
    },

    /// Diagnose configuration, model and upstream health
    Doctor {
        /// JSON config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Skip the upstream reachability check
        #[arg(long)]
        offline: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum ModelFormat {
    /// Magic header + bincode
    Binary,
    /// Pretty-printed JSON
    Json,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("NEUROFLEX_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info,neuroflex=debug"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(io::stderr))
        .init();
}

fn run(cli: Cli) -> Result<(), NeuroflexCliError> {
    match cli.command {
        Commands::Serve {
            config,
            host,
            port,
            upstream_url,
            models,
        } => {
            let mut config = ServiceConfig::load(config.as_deref())?;
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(url) = upstream_url {
                config.upstream_base_url = url.trim_end_matches('/').to_string();
            }
            if !models.is_empty() {
                config.model_paths = models;
            }
            cmd_serve(config)
        }

        Commands::Predict {
            model,
            input,
            pretty,
        } => cmd_predict(&model, &input, pretty),

        Commands::InspectModel { path, json } => cmd_inspect_model(&path, json),

        Commands::ConvertModel {
            input,
            output,
            format,
        } => cmd_convert_model(&input, &output, format),

        Commands::Doctor {
            config,
            offline,
            json,
        } => cmd_doctor(config.as_deref(), offline, json),
    }
}

fn cmd_serve(config: ServiceConfig) -> Result<(), NeuroflexCliError> {
    config.validate()?;
    info!("Starting {} v{}", SERVICE_NAME, SERVICE_VERSION);

    let predictor = match CognitivePredictor::load(&config.model_paths) {
        Ok(predictor) => Some(predictor),
        Err(e) => {
            warn!("Prediction endpoints disabled: {}", e);
            None
        }
    };

    let source = Arc::new(RemoteSessionApi::from_config(&config));
    let state = AppState::new(source, predictor);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(neuroflex::serve(&config, state))?;
    Ok(())
}

fn read_input(input: &Path) -> Result<String, NeuroflexCliError> {
    if input.to_string_lossy() == "-" {
        if atty::is(atty::Stream::Stdin) {
            return Err(NeuroflexCliError::NoInput);
        }
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn cmd_predict(model: &Path, input: &Path, pretty: bool) -> Result<(), NeuroflexCliError> {
    let predictor = CognitivePredictor::from(ModelLoader::load(model)?);
    let raw: serde_json::Value = serde_json::from_str(&read_input(input)?)?;

    // Accept either a stored session record or a bare predict request body
    let (data, patient) = if raw.get("session_id").is_some() {
        let session: SessionRecord = serde_json::from_value(raw)?;
        let patient = session.patient_value();
        (session.data, patient)
    } else {
        let request: PredictRequest = serde_json::from_value(raw)?;
        (request.data, request.patient_data)
    };

    let prediction = predictor.predict(&data, patient.as_ref())?;
    let output = if pretty {
        serde_json::to_string_pretty(&prediction)?
    } else {
        serde_json::to_string(&prediction)?
    };
    println!("{}", output);
    Ok(())
}

fn cmd_inspect_model(path: &Path, json: bool) -> Result<(), NeuroflexCliError> {
    let loaded = ModelLoader::load(path)?;
    let artifact = &loaded.artifact;

    let report = ModelReport {
        path: loaded.path.display().to_string(),
        format: loaded.format.as_str().to_string(),
        format_version: artifact.format_version,
        kind: artifact.classifier.kind().to_string(),
        classes: artifact.classes.clone(),
        feature_names: artifact.effective_feature_names(),
        categorical_features: artifact.categories.keys().cloned().collect(),
        trained_at: artifact.metadata.trained_at.clone(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Model Report");
        println!("============");
        println!("Path:     {}", report.path);
        println!("Format:   {} (version {})", report.format, report.format_version);
        println!("Kind:     {}", report.kind);
        println!("Classes:  {}", report.classes.join(", "));
        if let Some(trained_at) = &report.trained_at {
            println!("Trained:  {}", trained_at);
        }
        println!("\nFeatures:");
        for (i, name) in report.feature_names.iter().enumerate() {
            let marker = if report.categorical_features.contains(name) {
                " (categorical)"
            } else {
                ""
            };
            println!("  {:>2}. {}{}", i, name, marker);
        }
    }
    Ok(())
}

fn cmd_convert_model(
    input: &Path,
    output: &Path,
    format: ModelFormat,
) -> Result<(), NeuroflexCliError> {
    let loaded = ModelLoader::load(input)?;
    match format {
        ModelFormat::Binary => loaded.artifact.save_binary(output)?,
        ModelFormat::Json => loaded.artifact.save_json(output)?,
    }
    info!(
        from = loaded.format.as_str(),
        to = %output.display(),
        "model artifact converted"
    );
    Ok(())
}

fn cmd_doctor(config: Option<&Path>, offline: bool, json: bool) -> Result<(), NeuroflexCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("{} {}", SERVICE_NAME, SERVICE_VERSION),
    });

    // Configuration
    let config = match ServiceConfig::load(config) {
        Ok(config) => {
            match config.validate() {
                Ok(()) => checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "Binding {}:{}, upstream {}",
                        config.host, config.port, config.upstream_base_url
                    ),
                }),
                Err(e) => checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                }),
            }
            Some(config)
        }
        Err(e) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            });
            None
        }
    };

    if let Some(config) = &config {
        // Model artifact
        match ModelLoader::load_first(&config.model_paths) {
            Ok(loaded) => checks.push(DoctorCheck {
                name: "model".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "{} loaded as {} ({} classes)",
                    loaded.path.display(),
                    loaded.format,
                    loaded.artifact.classes.len()
                ),
            }),
            Err(e) => checks.push(DoctorCheck {
                name: "model".to_string(),
                status: CheckStatus::Warning,
                message: format!("Prediction endpoints will be disabled: {}", e),
            }),
        }

        // Upstream reachability
        if offline {
            checks.push(DoctorCheck {
                name: "upstream".to_string(),
                status: CheckStatus::Warning,
                message: "Skipped (offline)".to_string(),
            });
        } else {
            let api = RemoteSessionApi::from_config(config);
            match check_upstream(&api) {
                Ok(dates) => checks.push(DoctorCheck {
                    name: "upstream".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("{} reachable ({} dates)", api.base_url(), dates),
                }),
                Err(e) => checks.push(DoctorCheck {
                    name: "upstream".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                }),
            }
        }
    }

    let report = DoctorReport {
        service: SERVICE_NAME.to_string(),
        version: SERVICE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("NeuroFlex Doctor Report");
        println!("=======================");
        println!("Service: {}", report.service);
        println!("Version: {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(NeuroflexCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

#[derive(Debug)]
enum NeuroflexCliError {
    Io(io::Error),
    Json(serde_json::Error),
    Config(ConfigError),
    Model(ModelError),
    Service(ServiceError),
    NoInput,
    DoctorFailed,
}

impl From<io::Error> for NeuroflexCliError {
    fn from(e: io::Error) -> Self {
        NeuroflexCliError::Io(e)
    }
}

impl From<serde_json::Error> for NeuroflexCliError {
    fn from(e: serde_json::Error) -> Self {
        NeuroflexCliError::Json(e)
    }
}

impl From<ConfigError> for NeuroflexCliError {
    fn from(e: ConfigError) -> Self {
        NeuroflexCliError::Config(e)
    }
}

impl From<ModelError> for NeuroflexCliError {
    fn from(e: ModelError) -> Self {
        NeuroflexCliError::Model(e)
    }
}

impl From<ServiceError> for NeuroflexCliError {
    fn from(e: ServiceError) -> Self {
        NeuroflexCliError::Service(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<NeuroflexCliError> for CliError {
    fn from(e: NeuroflexCliError) -> Self {
        match e {
            NeuroflexCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            NeuroflexCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            NeuroflexCliError::Config(e) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check the config file and NEUROFLEX_* variables".to_string()),
            },
            NeuroflexCliError::Model(e) => CliError {
                code: "MODEL_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'neuroflex inspect-model' on the artifact".to_string()),
            },
            NeuroflexCliError::Service(e) => CliError {
                code: e.code().to_string(),
                message: e.to_string(),
                hint: None,
            },
            NeuroflexCliError::NoInput => CliError {
                code: "NO_INPUT".to_string(),
                message: "stdin is a terminal, nothing to read".to_string(),
                hint: Some("Pipe a session JSON or pass --input FILE".to_string()),
            },
            NeuroflexCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ModelReport {
    path: String,
    format: String,
    format_version: u32,
    kind: String,
    classes: Vec<String>,
    feature_names: Vec<String>,
    categorical_features: Vec<String>,
    trained_at: Option<String>,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    service: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
