//! Error taxonomy for the runner core.
//!
//! Every error carries an [`ErrorCode`] as data. The code, not the message
//! text, drives retry and fallback policy. The only place message text is
//! inspected is [`classify_message`], applied to foreign errors (agent stderr,
//! platform HTTP bodies) at the boundary where they first become typed.

use thiserror::Error;

/// Stable error code. Serialized form is the snake_case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Timeout,
    RateLimited,
    Unauthorized,
    ServerError,
    ContentTooLarge,
    AgentNotFound,
    WorkspaceInvalid,
    SkillNotFound,
    InvalidInput,
    Cancelled,
    Unknown,
    /// `run` was called while the runner was not in the Ready state.
    NotInitialized,
    /// A lifecycle transition was requested from an incompatible state.
    InvalidState,
    /// Graceful shutdown exceeded its grace window and force-killed the agent.
    ShutdownTimeout,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Unauthorized => "unauthorized",
            Self::ServerError => "server_error",
            Self::ContentTooLarge => "content_too_large",
            Self::AgentNotFound => "agent_not_found",
            Self::WorkspaceInvalid => "workspace_invalid",
            Self::SkillNotFound => "skill_not_found",
            Self::InvalidInput => "invalid_input",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
            Self::NotInitialized => "not_initialized",
            Self::InvalidState => "invalid_state",
            Self::ShutdownTimeout => "shutdown_timeout",
        }
    }

    /// Whether the retry executor may re-attempt an invocation that failed
    /// with this code.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimited | Self::ServerError | Self::Unknown
        )
    }

    /// Fallback strategy applied once retries are exhausted (or immediately
    /// for non-retryable codes).
    pub fn fallback(&self) -> Fallback {
        match self {
            Self::Timeout | Self::RateLimited | Self::ServerError | Self::Unknown => {
                Fallback::Retry
            }
            Self::Unauthorized => Fallback::Skip,
            Self::ContentTooLarge => Fallback::Partial,
            _ => Fallback::Fatal,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the executor does with a failed invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// Loop to the next attempt.
    Retry,
    /// Mark the result skipped with a reason; success exit code.
    Skip,
    /// Return whatever findings were accumulated with `partial = true`.
    Partial,
    /// Surface the error; the orchestrator aborts.
    Fatal,
}

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("timeout: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("server error: {0}")]
    ServerError(String),

    #[error("content too large: {0}")]
    ContentTooLarge(String),

    #[error("agent binary not found: {0}")]
    AgentNotFound(String),

    #[error("workspace invalid: {0}")]
    WorkspaceInvalid(String),

    #[error("skill not found: {0}")]
    SkillNotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Unknown(String),

    #[error("runner not initialized")]
    NotInitialized,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("shutdown grace period elapsed, agent force-killed")]
    ShutdownTimeout,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::RateLimited(_) => ErrorCode::RateLimited,
            Self::Unauthorized(_) => ErrorCode::Unauthorized,
            Self::ServerError(_) => ErrorCode::ServerError,
            Self::ContentTooLarge(_) => ErrorCode::ContentTooLarge,
            Self::AgentNotFound(_) => ErrorCode::AgentNotFound,
            Self::WorkspaceInvalid(_) => ErrorCode::WorkspaceInvalid,
            Self::SkillNotFound(_) => ErrorCode::SkillNotFound,
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Unknown(_) => ErrorCode::Unknown,
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::InvalidState(_) => ErrorCode::InvalidState,
            Self::ShutdownTimeout => ErrorCode::ShutdownTimeout,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn workspace_invalid(msg: impl Into<String>) -> Self {
        Self::WorkspaceInvalid(msg.into())
    }

    /// Build an error of the given code from a foreign message.
    pub fn with_code(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            ErrorCode::Timeout => Self::Timeout(message),
            ErrorCode::RateLimited => Self::RateLimited(message),
            ErrorCode::Unauthorized => Self::Unauthorized(message),
            ErrorCode::ServerError => Self::ServerError(message),
            ErrorCode::ContentTooLarge => Self::ContentTooLarge(message),
            ErrorCode::AgentNotFound => Self::AgentNotFound(message),
            ErrorCode::WorkspaceInvalid => Self::WorkspaceInvalid(message),
            ErrorCode::SkillNotFound => Self::SkillNotFound(message),
            ErrorCode::InvalidInput => Self::InvalidInput(message),
            ErrorCode::Cancelled => Self::Cancelled,
            ErrorCode::Unknown => Self::Unknown(message),
            ErrorCode::NotInitialized => Self::NotInitialized,
            ErrorCode::InvalidState => Self::InvalidState(message),
            ErrorCode::ShutdownTimeout => Self::ShutdownTimeout,
        }
    }

    /// Classify a foreign error message into a typed error.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::with_code(classify_message(&message), message)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Self::AgentNotFound(e.to_string()),
            std::io::ErrorKind::TimedOut => Self::Timeout(e.to_string()),
            _ => Self::Unknown(e.to_string()),
        }
    }
}

/// Map a foreign error message to a code by substring. This is the only
/// message-text classifier in the codebase.
pub fn classify_message(message: &str) -> ErrorCode {
    let lower = message.to_lowercase();
    let has = |needle: &str| lower.contains(needle);

    if has("agent not found") || has("no such file") || has("executable file not found") {
        ErrorCode::AgentNotFound
    } else if has("timeout") || has("timed out") || has("deadline exceeded") {
        ErrorCode::Timeout
    } else if has("rate limit") || has("429") || has("too many requests") {
        ErrorCode::RateLimited
    } else if has("unauthorized") || has("401") || has("authentication failed") {
        ErrorCode::Unauthorized
    } else if has("content too large") || has("context length exceeded") || has("prompt too long")
    {
        ErrorCode::ContentTooLarge
    } else if has("500") || has("502") || has("503") || has("server error") {
        ErrorCode::ServerError
    } else if has("cancelled") || has("canceled") {
        ErrorCode::Cancelled
    } else {
        ErrorCode::Unknown
    }
}
