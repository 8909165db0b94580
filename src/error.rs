//! Error types for lazygit-llm modules using thiserror.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::cli::classify::Category;

/// Errors from provider construction and commit message generation.
///
/// `BinaryNotFound` and `UnsafeBinaryPath` are raised while a provider is
/// being built and mean the provider must not be used. Every other variant is
/// raised per call and carries the remedy from [`Category`].
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{tool} CLI not found (tried: {}). {hint}", tried.join(", "))]
    BinaryNotFound {
        tool: String,
        tried: Vec<String>,
        hint: &'static str,
    },

    #[error("Refusing to run {}: {reason}", path.display())]
    UnsafeBinaryPath { path: PathBuf, reason: String },

    #[error("Failed to launch {tool}: {reason}")]
    LaunchFailed { tool: String, reason: String },

    #[error("{tool} timed out: {detail}")]
    Timeout {
        tool: String,
        /// Deadline that was enforced, `None` when the tool itself reported a timeout.
        limit: Option<Duration>,
        detail: String,
    },

    #[error("{tool} quota or rate limit exceeded: {detail}")]
    QuotaExceeded { tool: String, detail: String },

    #[error("{tool} authentication required: {detail}")]
    AuthenticationRequired { tool: String, detail: String },

    #[error("{tool} network error: {detail}")]
    NetworkError { tool: String, detail: String },

    #[error("{tool} returned an empty response")]
    EmptyResponse { tool: String },

    #[error("{tool} exited with code {exit_code}: {detail}")]
    Unclassified {
        tool: String,
        exit_code: i32,
        detail: String,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown provider '{name}'. Available providers: {}", available.join(", "))]
    UnknownProvider {
        name: String,
        available: Vec<String>,
    },
}

impl ProviderError {
    /// Category used for the remedy text and retry hint.
    pub fn category(&self) -> Category {
        match self {
            ProviderError::Timeout { .. } => Category::Timeout,
            ProviderError::QuotaExceeded { .. } => Category::QuotaExceeded,
            ProviderError::AuthenticationRequired { .. } => Category::AuthenticationRequired,
            ProviderError::NetworkError { .. } => Category::NetworkError,
            ProviderError::EmptyResponse { .. } => Category::EmptyResponse,
            ProviderError::BinaryNotFound { .. }
            | ProviderError::UnsafeBinaryPath { .. }
            | ProviderError::LaunchFailed { .. }
            | ProviderError::Unclassified { .. }
            | ProviderError::InvalidRequest(_)
            | ProviderError::UnknownProvider { .. } => Category::Unclassified,
        }
    }

    /// Human-readable remedy suitable for direct display.
    pub fn suggested_action(&self) -> &'static str {
        match self {
            ProviderError::BinaryNotFound { hint, .. } => *hint,
            ProviderError::UnsafeBinaryPath { .. } => {
                "Install the CLI into a trusted location (not a temp directory) or fix binary_path in the config"
            }
            ProviderError::LaunchFailed { .. } => {
                "Check that the CLI binary is intact and executable by the current user"
            }
            ProviderError::InvalidRequest(_) => {
                "Stage some changes and check prompt_template in the config"
            }
            ProviderError::UnknownProvider { .. } => {
                "Set provider.name to one of the available providers"
            }
            other => other.category().suggested_action(),
        }
    }

    /// Whether the orchestrating application may retry the call.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::BinaryNotFound { .. }
            | ProviderError::UnsafeBinaryPath { .. }
            | ProviderError::LaunchFailed { .. }
            | ProviderError::InvalidRequest(_)
            | ProviderError::UnknownProvider { .. } => false,
            other => other.category().is_retryable(),
        }
    }

    /// Construction-time errors: the provider must not be created.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProviderError::BinaryNotFound { .. }
                | ProviderError::UnsafeBinaryPath { .. }
                | ProviderError::LaunchFailed { .. }
                | ProviderError::UnknownProvider { .. }
        )
    }
}

/// Errors from loading and validating the configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read config {}: {source}", path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ParseFailed(#[source] toml::de::Error),

    #[error("Missing required config field: {0}")]
    MissingField(&'static str),

    #[error(
        "Unsupported provider type '{0}'. Only \"cli\" providers are available in this build"
    )]
    UnsupportedProviderType(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Errors from reading the staged diff.
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Not a git repository: {0}")]
    OpenRepository(#[source] git2::Error),

    #[error("Failed to collect staged diff: {0}")]
    DiffFailed(#[source] git2::Error),

    #[error("Failed to read diff from stdin: {0}")]
    StdinFailed(#[source] std::io::Error),
}
