use std::path::PathBuf;

pub type DeployResult<T> = Result<T, DeployError>;

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("command failed: {command} ({stderr})")]
    CommandFailed { command: String, stderr: String },

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid backup {}: {reason}", .path.display())]
    InvalidBackup { path: PathBuf, reason: String },

    #[error(
        "container '{0}' did not become healthy after {1} attempts"
    )]
    HealthcheckTimeout(String, u32),

    #[error("{operation} failed after {attempts} attempts")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        last: Box<DeployError>,
    },

    #[error("unsupported platform: {0} (only amd64 and arm64 are released)")]
    UnsupportedPlatform(String),

    #[error("another installer run holds the lock at {}", .0.display())]
    LockHeld(PathBuf),

    #[error("release lookup failed: {0}")]
    Release(String),

    #[error("restore failed and rollback also failed ({rollback})")]
    RollbackFailed {
        rollback: String,
        #[source]
        cause: Box<DeployError>,
    },

    #[error("{context}")]
    Context {
        context: String,
        #[source]
        cause: Box<DeployError>,
    },

    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DeployError {
    /// Wrap this error with a description of the operation that
    /// produced it.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            cause: Box::new(self),
        }
    }

    /// Innermost error, skipping context and retry wrappers.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { cause, .. } => cause.root(),
            Self::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }
}

/// Attach operation context to a fallible result.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> DeployResult<T>;

    fn with_context<F, S>(self, f: F) -> DeployResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E: Into<DeployError>> ResultExt<T> for Result<T, E> {
    fn context(self, context: impl Into<String>) -> DeployResult<T> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<F, S>(self, f: F) -> DeployResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.into().context(f()))
    }
}
