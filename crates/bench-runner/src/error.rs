use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while orchestrating a benchmark invocation.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("invalid instance size {0}: expected 0 (single), 1 (small), 2 (medium) or 3 (large)")]
    InvalidSize(u32),

    #[error("required directory '{name}' not found in {}", .root.display())]
    MissingDirectory { name: String, root: PathBuf },

    #[error("stage '{stage}' failed: {}", describe_exit(.code))]
    StageFailed { stage: String, code: Option<i32> },

    #[error("failed to launch stage '{stage}' ({}): {source}", .program.display())]
    StageSpawn {
        stage: String,
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{label} not found: {}", .path.display())]
    MissingArtifact { label: String, path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BenchError {
    /// Configuration errors are detected before any stage is launched.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            BenchError::InvalidSize(_) | BenchError::MissingDirectory { .. }
        )
    }

    /// Exit code the command line surface should terminate with.
    pub fn exit_code(&self) -> i32 {
        match self {
            BenchError::StageFailed { code: Some(code), .. } if *code != 0 => *code,
            _ => 1,
        }
    }
}

pub(crate) fn describe_exit(code: &Option<i32>) -> String {
    match *code {
        Some(code) => format!("exit status {}", code),
        None => "terminated by signal".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, BenchError>;
