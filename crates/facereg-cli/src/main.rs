use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facereg_core::{
    EmbeddingModel, FaceDetection, MatchOutcome, OnnxFaceDetector, VectorExtractor,
};
use facereg_engine::{spawn_engine, Config, EngineHandle, EngineOptions, RegistrationRequest};
use facereg_store::IdentityStore;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "facereg", about = "Face registration and recognition registry")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new identity from a face photo
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        surname: String,
        /// Eight-digit national ID (natural key)
        #[arg(long = "national-id")]
        national_id: String,
        /// Contact address (must contain '@')
        #[arg(long)]
        contact: String,
        /// Path to the face photo
        #[arg(long)]
        photo: PathBuf,
    },
    /// Identify the person in a photo
    Recognize {
        photo: PathBuf,
        /// Minimum similarity for a match (overrides FACEREG_MATCH_THRESHOLD)
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// List registered identities
    List,
    /// Remove one identity by national ID
    Remove { national_id: String },
    /// Remove every registered identity
    Clear,
    /// Show configuration and registry status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Register { name, surname, national_id, contact, photo } => {
            let engine = build_engine(&config)?;
            let photo = std::fs::read(&photo)
                .with_context(|| format!("reading photo {}", photo.display()))?;

            let outcome = engine
                .register(RegistrationRequest { name, surname, national_id, contact, photo })
                .await?;
            println!(
                "registered {} ({} vector, {} dims)",
                outcome.national_id,
                outcome.vector_source.as_str(),
                outcome.vector_len
            );
        }
        Commands::Recognize { photo, threshold } => {
            let engine = build_engine(&config)?;
            let photo = std::fs::read(&photo)
                .with_context(|| format!("reading photo {}", photo.display()))?;

            match engine.recognize(photo, threshold).await? {
                MatchOutcome::Found { national_id, name, similarity } => {
                    println!("match: {name} ({national_id}), similarity {similarity:.2}");
                }
                MatchOutcome::NotFound { reason } => {
                    println!("no match: {reason}");
                }
                MatchOutcome::Failed { message } => bail!(message),
            }
        }
        Commands::List => {
            let store = IdentityStore::open(&config.db_path)?;
            let identities = store.list()?;
            if identities.is_empty() {
                println!("no identities registered");
            }
            for identity in identities {
                let vector = match &identity.vector {
                    Some(v) => format!("{} ({} dims)", v.source.as_str(), v.len()),
                    None => "none".to_string(),
                };
                println!(
                    "{}  {} {}  contact={}  vector={}  registered={}",
                    identity.national_id,
                    identity.name,
                    identity.surname,
                    identity.contact,
                    vector,
                    identity.created_at
                );
            }
        }
        Commands::Remove { national_id } => {
            let store = IdentityStore::open(&config.db_path)?;
            if store.delete(&national_id)? {
                println!("removed {national_id}");
            } else {
                bail!("national ID {national_id} is not registered");
            }
        }
        Commands::Clear => {
            let store = IdentityStore::open(&config.db_path)?;
            let removed = store.clear()?;
            println!("removed {removed} identities");
        }
        Commands::Status => {
            let store = IdentityStore::open(&config.db_path)?;
            let status = serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "db_path": config.db_path.display().to_string(),
                "identities": store.count()?,
                "detector_model": config.detector_model_path().exists(),
                "embedding_model": config.embedding_model_path().exists(),
                "match_threshold": config.match_threshold,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

/// Wire the engine from config: store, optional detector, optional embedding
/// model. Missing model files degrade to the fallback paths with a warning.
fn build_engine(config: &Config) -> Result<EngineHandle> {
    let store = IdentityStore::open(&config.db_path)?;

    let detector_path = config.detector_model_path();
    let detector: Option<Box<dyn FaceDetection + Send>> = if detector_path.exists() {
        Some(Box::new(OnnxFaceDetector::load(&detector_path.to_string_lossy())?))
    } else {
        tracing::warn!(
            path = %detector_path.display(),
            "detection model not found; falling back to synthetic vectors"
        );
        None
    };

    let embedding_path = config.embedding_model_path();
    let model = if embedding_path.exists() {
        Some(EmbeddingModel::load(
            &embedding_path.to_string_lossy(),
            config.embedding_spec(),
        )?)
    } else {
        tracing::info!(
            path = %embedding_path.display(),
            "embedding model not found; using geometric features"
        );
        None
    };

    Ok(spawn_engine(
        detector,
        VectorExtractor::new(model),
        store,
        EngineOptions {
            match_threshold: config.match_threshold,
            operation_timeout: Duration::from_secs(config.operation_timeout_secs),
        },
    ))
}
