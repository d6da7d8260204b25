use acquire::AcquireError;

/// Stage failures bubbled to the caller, mapped onto the CLI's exit codes.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] models::ConfigError),

    #[error(transparent)]
    Acquire(#[from] AcquireError),

    #[error(transparent)]
    Parse(#[from] parser::ParseError),

    #[error(transparent)]
    Dedup(#[from] dedup::DedupError),

    #[error(transparent)]
    Staging(#[from] staging::StagingError),

    #[error(transparent)]
    Load(#[from] loader::LoadError),

    #[error("cancelled")]
    Cancelled,

    #[error("pipeline stage panicked: {0}")]
    StagePanic(#[from] tokio::task::JoinError),
}

impl RuntimeError {
    /// Exit codes: 2 configuration, 3 acquisition, 4 parse, 5 load,
    /// 6 integrity.
    pub fn exit_code(&self) -> i32 {
        match self {
            RuntimeError::Config(_) => 2,
            RuntimeError::Acquire(
                AcquireError::ArchiveCorrupt { .. }
                | AcquireError::ChecksumMismatch { .. }
                | AcquireError::Zip(_),
            ) => 6,
            RuntimeError::Acquire(_) => 3,
            RuntimeError::Parse(_) | RuntimeError::Staging(_) => 4,
            RuntimeError::Dedup(_) | RuntimeError::Load(_) => 5,
            RuntimeError::Cancelled | RuntimeError::StagePanic(_) => 1,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RuntimeError::Cancelled)
    }
}
