use std::path::PathBuf;

use studio_contracts::request::InputError;
use thiserror::Error;

/// Why one HTTP exchange with a provider failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Unauthorized,
    RateLimited,
    ServerError,
    Transport,
    Rejected,
    InvalidPayload,
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{provider} rejected the credential (HTTP {status})")]
    Unauthorized { provider: String, status: u16 },

    #[error("{provider} rate limited the request (HTTP {status}): {body}")]
    RateLimited {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} request failed (HTTP {status}): {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} request failed: {source}")]
    Transport {
        provider: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} returned an unusable payload: {message}")]
    InvalidPayload { provider: String, message: String },
}

impl ProviderError {
    pub fn invalid_payload(provider: &str, message: impl Into<String>) -> Self {
        ProviderError::InvalidPayload {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ProviderError::Unauthorized { .. } => FailureKind::Unauthorized,
            ProviderError::RateLimited { .. } => FailureKind::RateLimited,
            ProviderError::Status { status, .. } if *status >= 500 || *status == 408 => {
                FailureKind::ServerError
            }
            ProviderError::Status { .. } => FailureKind::Rejected,
            ProviderError::Transport { source, .. } => {
                if source.is_timeout() || source.is_connect() || source.is_request() {
                    FailureKind::Transport
                } else {
                    FailureKind::InvalidPayload
                }
            }
            ProviderError::InvalidPayload { .. } => FailureKind::InvalidPayload,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Unauthorized { status, .. }
            | ProviderError::RateLimited { status, .. }
            | ProviderError::Status { status, .. } => Some(*status),
            ProviderError::Transport { source, .. } => source.status().map(|code| code.as_u16()),
            ProviderError::InvalidPayload { .. } => None,
        }
    }
}

/// How a failure should be surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Missing credential or unusable output directory. Raised before any
    /// network call.
    Configuration,
    MalformedInput,
    /// A provider refused the credential mid-run.
    Unauthorized,
    /// Retries exhausted or the provider rejected the payload.
    Unavailable,
    /// The pipeline worked but found or produced nothing.
    Reportable,
    Cancelled,
    LocalIo,
}

impl ErrorClass {
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorClass::Reportable => 0,
            ErrorClass::Configuration | ErrorClass::MalformedInput => 2,
            ErrorClass::Unauthorized
            | ErrorClass::Unavailable
            | ErrorClass::Cancelled
            | ErrorClass::LocalIo => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum StudioError {
    #[error("missing credentials: {}", .0.join(", "))]
    MissingCredentials(Vec<String>),

    #[error("cannot use output directory {}: {source}", .path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    InvalidInput(#[from] InputError),

    #[error("{0}")]
    Unauthorized(#[source] ProviderError),

    #[error("reference search unavailable after {attempts} attempt(s): {source}")]
    SearchUnavailable {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("No reference images found for: '{subject}'")]
    NoCandidates { subject: String },

    #[error("Failed to fetch any usable reference image ({tried} candidate(s) tried)")]
    NoReferenceAvailable { tried: usize },

    #[error("generation request rejected: {0}")]
    BadRequest(#[source] ProviderError),

    #[error("image generation unavailable after {attempts} attempt(s): {source}")]
    GenerationUnavailable {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("job cancelled before {stage}")]
    Cancelled { stage: &'static str },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl StudioError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StudioError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            StudioError::MissingCredentials(_) | StudioError::OutputDir { .. } => {
                ErrorClass::Configuration
            }
            StudioError::InvalidInput(_) => ErrorClass::MalformedInput,
            StudioError::Unauthorized(_) => ErrorClass::Unauthorized,
            StudioError::SearchUnavailable { .. }
            | StudioError::BadRequest(_)
            | StudioError::GenerationUnavailable { .. } => ErrorClass::Unavailable,
            StudioError::NoCandidates { .. } | StudioError::NoReferenceAvailable { .. } => {
                ErrorClass::Reportable
            }
            StudioError::Cancelled { .. } => ErrorClass::Cancelled,
            StudioError::Io { .. } => ErrorClass::LocalIo,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.class().exit_code()
    }

    /// Message for the JSON result, including the cause chain.
    pub fn report(&self) -> String {
        let mut parts = vec![self.to_string()];
        let mut cause = std::error::Error::source(self);
        while let Some(err) = cause {
            let text = err.to_string();
            if !parts.iter().any(|existing| existing.contains(&text)) {
                parts.push(text);
            }
            cause = err.source();
        }
        parts.join(" | caused by: ")
    }
}

pub type Result<T> = std::result::Result<T, StudioError>;

#[cfg(test)]
mod tests {
    use studio_contracts::request::InputError;

    use super::{ErrorClass, FailureKind, ProviderError, StudioError};

    fn status(code: u16) -> ProviderError {
        ProviderError::Status {
            provider: "Gemini".to_string(),
            status: code,
            body: "nope".to_string(),
        }
    }

    #[test]
    fn status_codes_map_to_failure_kinds() {
        assert_eq!(status(503).kind(), FailureKind::ServerError);
        assert_eq!(status(408).kind(), FailureKind::ServerError);
        assert_eq!(status(400).kind(), FailureKind::Rejected);
        assert_eq!(status(400).status(), Some(400));
        assert_eq!(
            ProviderError::invalid_payload("Tavily", "missing images").kind(),
            FailureKind::InvalidPayload
        );
    }

    #[test]
    fn reportable_conditions_exit_zero() {
        let err = StudioError::NoReferenceAvailable { tried: 3 };
        assert_eq!(err.class(), ErrorClass::Reportable);
        assert_eq!(err.exit_code(), 0);
        assert_eq!(
            StudioError::MissingCredentials(vec!["TAVILY_API_KEY".to_string()]).exit_code(),
            2
        );
        assert_eq!(
            StudioError::from(InputError::new("ratio", "bad")).exit_code(),
            2
        );
        assert_eq!(
            StudioError::GenerationUnavailable {
                attempts: 3,
                source: status(503),
            }
            .exit_code(),
            1
        );
    }

    #[test]
    fn report_includes_cause_once() {
        let err = StudioError::SearchUnavailable {
            attempts: 3,
            source: ProviderError::RateLimited {
                provider: "Tavily".to_string(),
                status: 429,
                body: "slow down".to_string(),
            },
        };
        let report = err.report();
        assert!(report.starts_with("reference search unavailable after 3 attempt(s)"));
        assert_eq!(report.matches("slow down").count(), 1);
    }
}
