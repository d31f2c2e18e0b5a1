use thiserror::Error;

/// The five error kinds from the Engine's error handling design: `Transient` errors are retried
/// by the caller, `Config` errors surface to the operator, `ActionFailure` is logged and the
/// enclosing operation continues, `Overload` means something was dropped and counted, and `Fatal`
/// aborts startup.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transient failure in {component}: {detail}")]
    Transient { component: String, detail: String },

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("action failure in {component}: {detail}")]
    ActionFailure { component: String, detail: String },

    #[error("overload in {component}, dropping work")]
    Overload { component: String },

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn transient(component: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Transient { component: component.into(), detail: detail.into() }
    }

    pub fn config(detail: impl Into<String>) -> Self {
        Self::Config(detail.into())
    }

    pub fn action_failure(component: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ActionFailure { component: component.into(), detail: detail.into() }
    }

    pub fn overload(component: impl Into<String>) -> Self {
        Self::Overload { component: component.into() }
    }

    pub fn fatal(detail: impl Into<String>) -> Self {
        Self::Fatal(detail.into())
    }

    /// An unexpected failure in a subsystem (database, background task) that doesn't fit the
    /// other kinds. Not classified as transient, so callers should not blindly retry it.
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }

    /// True for the kinds whose contract is "the caller may retry".
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}
