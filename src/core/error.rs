use thiserror::Error;

#[derive(Error, Debug)]
pub enum StageError {
    #[error("Entity '{entity}' has no identity value: {reason}")]
    MissingIdentity { entity: String, reason: String },

    #[error("Field '{0}' not declared on entity '{1}'")]
    UnknownField(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("No active transaction in the current context")]
    NoActiveTransaction,

    #[error("Invalid transaction state: {0}")]
    InvalidState(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Command '{0}' affected no data")]
    NothingAffected(String),

    #[error("No executor registered for target '{0}'")]
    ExecutorNotFound(String),

    #[error("Executor '{0}' timed out")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl StageError {
    /// Errors raised by the backend while running commands.
    pub fn is_execution_failure(&self) -> bool {
        matches!(
            self,
            Self::Execution(_) | Self::NothingAffected(_) | Self::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StageError>;

impl<T> From<std::sync::PoisonError<T>> for StageError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
