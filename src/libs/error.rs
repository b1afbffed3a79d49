use std::path::PathBuf;

use thiserror::Error;

/// A malformed or contradictory release directive.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError
{
    #[error("config file `{}` is not present", .0.display())]
    Missing(PathBuf),

    #[error("failed to read config file `{}`: {message}", path.display())]
    Unreadable { path: PathBuf, message: String },

    #[error("failed to parse config: {0}")]
    Syntax(String),

    #[error("section `{section}`: {message}")]
    Section { section: String, message: String },

    #[error("section `{0}` is defined more than once in this batch")]
    Duplicate(String),

    #[error("repo `{repo}` would get tag `{tag}` more than once in this batch")]
    DuplicateTag { repo: String, tag: String },
}

impl ConfigError
{
    pub fn section(section: &str, message: impl Into<String>) -> ConfigError
    {
        ConfigError::Section { section: section.to_string(), message: message.into() }
    }
}

/// Failure reported by an external client (release host, registry, CI).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError
{
    /// Network trouble, timeouts, rate limiting or a 5xx. Worth retrying.
    #[error("transient API failure: {0}")]
    Transient(String),

    /// Auth failure, conflict, validation error. Retrying will not help.
    #[error("API rejected the request ({status}): {message}")]
    Permanent { status: u16, message: String },

    #[error("not found: {0}")]
    NotFound(String),
}

impl ApiError
{
    /// Classify an HTTP status code the way every client in this tool does.
    pub fn from_status(status: u16, message: impl Into<String>) -> ApiError
    {
        let message = message.into();
        match status
        {
            404 => ApiError::NotFound(message),
            429 | 500..=599 => ApiError::Transient(format!("{} ({})", message, status)),
            _ => ApiError::Permanent { status, message },
        }
    }

    pub fn is_transient(&self) -> bool
    {
        matches!(self, ApiError::Transient(_))
    }
}

/// Everything that can go wrong for a single release target.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReleaseError
{
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot resolve commit for `{repo}`: {reason}")]
    Resolution { repo: String, reason: String },

    #[error("tag `{tag}` not found in `{repo}`")]
    TagNotFound { repo: String, tag: String },

    #[error("gave up after {attempts} attempts: {message}")]
    TransientApi { attempts: u32, message: String },

    #[error("{0}")]
    PermanentApi(String),

    #[error("workflows for `{target}` failed")]
    WorkflowFailed { target: String },

    #[error("timed out waiting on: {}", pending.join(", "))]
    Timeout { pending: Vec<String> },

    #[error("cancelled")]
    Cancelled,
}

#[test]
fn test_from_status()
{
    assert!(ApiError::from_status(503, "unavailable").is_transient());
    assert!(ApiError::from_status(429, "slow down").is_transient());
    assert_eq!(ApiError::from_status(404, "gone"), ApiError::NotFound("gone".to_string()));
    assert_eq!(
        ApiError::from_status(422, "Reference already exists"),
        ApiError::Permanent { status: 422, message: "Reference already exists".to_string() }
    );
    assert!(!ApiError::from_status(401, "Bad credentials").is_transient());
}

#[test]
fn test_timeout_lists_pending()
{
    let error = ReleaseError::Timeout { pending: vec!["a".to_string(), "b".to_string()] };
    assert_eq!(error.to_string(), "timed out waiting on: a, b");
}
