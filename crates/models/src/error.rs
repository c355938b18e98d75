use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStage {
    Dependencies,
    Application,
}

impl std::fmt::Display for BuildStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildStage::Dependencies => write!(f, "dependencies"),
            BuildStage::Application => write!(f, "application"),
        }
    }
}

#[derive(Error, Debug)]
pub enum BotpackError {
    #[error("Invalid base image reference: {reference} ({reason})")]
    InvalidBaseImage { reference: String, reason: String },

    #[error("Dependency manifest not found: {path}")]
    ManifestMissing { path: String },

    #[error("Source tree not found: {path}")]
    SourceMissing { path: String },

    #[error("Entrypoint script not found in source tree: {script}")]
    EntrypointMissing { script: String },

    #[error("Build of {stage} stage failed: {message}")]
    BuildFailed { stage: BuildStage, message: String },

    #[error("Image not found: {image}")]
    ImageNotFound { image: String },

    #[error("Missing required environment variables: {}", names.join(", "))]
    MissingEnvironment { names: Vec<String> },

    #[error("Invalid environment entry: {entry}")]
    InvalidEnvironment { entry: String },

    #[error("Container launch failed: {reason}")]
    LaunchFailed { reason: String },

    #[error("Docker error: {message}")]
    DockerError { message: String },

    #[error("Layer cache error: {reason}")]
    CacheError { reason: String },

    #[error("Configuration error: {reason}")]
    ConfigError { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BotpackError {
    /// Process exit code used by the CLI when this error aborts a command.
    pub fn exit_code(&self) -> i32 {
        match self {
            BotpackError::InvalidBaseImage { .. }
            | BotpackError::ManifestMissing { .. }
            | BotpackError::SourceMissing { .. }
            | BotpackError::EntrypointMissing { .. }
            | BotpackError::BuildFailed { .. } => 2,
            BotpackError::ImageNotFound { .. }
            | BotpackError::MissingEnvironment { .. }
            | BotpackError::InvalidEnvironment { .. }
            | BotpackError::LaunchFailed { .. } => 125,
            BotpackError::ConfigError { .. } => 78,
            BotpackError::DockerError { .. }
            | BotpackError::CacheError { .. }
            | BotpackError::Io(_) => 1,
        }
    }

    pub fn is_build_failure(&self) -> bool {
        matches!(
            self,
            BotpackError::InvalidBaseImage { .. }
                | BotpackError::ManifestMissing { .. }
                | BotpackError::SourceMissing { .. }
                | BotpackError::EntrypointMissing { .. }
                | BotpackError::BuildFailed { .. }
        )
    }
}
