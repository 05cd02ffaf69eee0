use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Another turn is already running for this context.
    #[error("Concurrent request: context {0} is busy")]
    ConcurrentRequest(String),

    /// Network failure, timeout or 5xx from a backend. Retried with backoff.
    #[error("Provider transient error: {0}")]
    ProviderTransient(String),

    /// The backend refused access, usually because a stale attachment
    /// reference is embedded in the thread.
    #[error("Provider permission denied: {0}")]
    ProviderPermissionDenied(String),

    #[error("Provider rate limited: {message}")]
    ProviderRateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider blocked content: {0}")]
    ProviderContentBlocked(String),

    /// Any other backend failure. Terminal.
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Unsupported attachment: {0}")]
    UnsupportedAttachment(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Too many tool rounds: stopped after {0}")]
    TooManyToolRounds(u32),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Short human-readable text shown to the user when a turn fails.
    /// Internal causes stay in the logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            Error::ConcurrentRequest(_) => {
                "I'm still working on your previous message. Please wait for it to finish."
            }
            Error::ProviderTransient(_) => {
                "The AI service is temporarily unreachable. Please try again in a moment."
            }
            Error::ProviderPermissionDenied(_) => {
                "The AI service refused access to part of this conversation. Try clearing the history."
            }
            Error::ProviderRateLimited { .. } => {
                "The AI service is rate limiting requests. Please slow down and try again shortly."
            }
            Error::ProviderContentBlocked(_) => {
                "The AI service declined to answer this request."
            }
            Error::UnsupportedAttachment(_) => {
                "This kind of attachment isn't supported by the current model."
            }
            Error::TooManyToolRounds(_) => {
                "That request needed too many tool steps, so I stopped. Try breaking it into smaller questions."
            }
            Error::Config(_) => "The assistant is not configured correctly. Please check the settings.",
            Error::ToolNotFound(_) => "The requested tool is not available.",
            Error::Validation(_) => "That request could not be processed.",
            _ => "Something went wrong while handling your message.",
        }
    }

    /// Whether the error is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::ProviderTransient(_))
    }
}

/// Failure raised by a tool invocation. Never escalates a turn: the
/// orchestrator hands it back to the model as a tool result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Execution(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_hides_internal_details() {
        let err = Error::Provider("HTTP 500: {\"trace\":\"secret\"}".into());
        assert!(!err.user_message().contains("secret"));
        let err = Error::ProviderRateLimited {
            message: "429".into(),
            retry_after: Some(Duration::from_secs(3)),
        };
        assert!(err.user_message().contains("rate limiting"));
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(Error::ProviderTransient("timeout".into()).is_transient());
        assert!(!Error::ProviderContentBlocked("safety".into()).is_transient());
        assert!(!Error::Provider("bad".into()).is_transient());
    }

    #[test]
    fn test_tool_error_display() {
        let e = ToolError::InvalidArguments("missing 'symbol'".into());
        assert_eq!(e.to_string(), "invalid arguments: missing 'symbol'");
    }
}
