use facereg_core::ModelSpec;
use std::path::PathBuf;

/// Engine configuration, loaded from environment variables.
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite identity database.
    pub db_path: PathBuf,
    /// Minimum cosine similarity for a recognition match.
    pub match_threshold: f32,
    /// Bounded wait for one engine operation (detection + inference).
    pub operation_timeout_secs: u64,
    /// Declared input resolution of the embedding model.
    pub embed_input_size: u32,
    /// Declared embedding dimensionality.
    pub embed_dim: usize,
    /// Declared batch dimension of the embedding model input.
    pub embed_batch: usize,
}

impl Config {
    /// Load configuration from `FACEREG_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facereg");

        let model_dir = std::env::var("FACEREG_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        let db_path = std::env::var("FACEREG_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("identities.db"));

        Self {
            model_dir,
            db_path,
            match_threshold: env_f32("FACEREG_MATCH_THRESHOLD", 0.70),
            operation_timeout_secs: env_u64("FACEREG_OPERATION_TIMEOUT_SECS", 10),
            embed_input_size: env_u64("FACEREG_EMBED_INPUT_SIZE", 112) as u32,
            embed_dim: env_usize("FACEREG_EMBED_DIM", 128),
            embed_batch: env_usize("FACEREG_EMBED_BATCH", 1),
        }
    }

    /// Path to the face detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join("det_500m.onnx")
    }

    /// Path to the embedding model.
    pub fn embedding_model_path(&self) -> PathBuf {
        self.model_dir.join("embedder.onnx")
    }

    /// Declared tensor shapes for the embedding model.
    pub fn embedding_spec(&self) -> ModelSpec {
        ModelSpec {
            input_size: self.embed_input_size,
            embedding_dim: self.embed_dim,
            batch: self.embed_batch,
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
