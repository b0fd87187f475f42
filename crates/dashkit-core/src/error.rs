//! Failure taxonomy shared by the pipelines
//!
//! Fatal conditions abort the run with a non-zero exit status.
//! Recoverable network failures never reach this type: the data cache
//! logs them and serves stale content instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DashError {
    /// Required environment variable is not set
    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),

    /// Project config.json failed validation
    #[error("invalid project config: {0}")]
    InvalidProjectConfig(String),

    /// No published or installed compiler satisfies the requested range
    #[error("no dash version matched range {0}")]
    NoMatchingVersion(String),

    /// Both the prebuilt download and the source build failed
    #[error("failed to install dash version {0}")]
    InstallFailed(String),

    /// Release feed could not be queried
    #[error("failed to fetch version info: {0}")]
    VersionFeed(String),

    /// Compiler reported a failure for a command
    #[error("compiler error: {0}")]
    Compiler(String),

    /// Compiler process closed its output before answering
    #[error("compiler process exited unexpectedly")]
    CompilerExited,

    /// A one-shot `dash build` returned a non-zero status
    #[error("dash build exited with status {0}")]
    BuildFailed(i32),
}

impl DashError {
    /// Whether the error happened before any mutation of the working tree
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::MissingEnv(_) | Self::InvalidProjectConfig(_))
    }

    /// Process exit status to report for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BuildFailed(code) if *code != 0 => *code,
            _ => 1,
        }
    }
}
