//! Error taxonomy for the unit pipeline.
//!
//! Each stage has its own enum so callers can match on the exact failure:
//! sanitize failures trigger placeholder synthesis, load failures trigger the
//! raw-source path, and store failures surface with their raw message.

use thiserror::Error;

/// Failure to extract a unit from generated text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SanitizeError {
    #[error("generated text is empty")]
    Empty,
    #[error("no `export default function <Name>` declaration found")]
    NoUnitName,
}

/// Storage-level failures for generated and library units.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("generated unit not found: {0}")]
    SourceNotFound(String),
    #[error("invalid filename: {0:?}")]
    InvalidFilename(String),
    #[error("failed to write {path}: {message}")]
    WriteFailed { path: String, message: String },
    #[error("failed to update library index: {0}")]
    MetadataWriteFailed(String),
    #[error("library index is unreadable: {0}")]
    CorruptIndex(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure to resolve a stored identifier into something renderable.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid unit filename: {0:?}")]
    InvalidFilename(String),
    #[error("module {0} exposes no renderable export")]
    NoExport(String),
    #[error("unit source unavailable for {filename}: {source}")]
    SourceUnavailable {
        filename: String,
        #[source]
        source: StoreError,
    },
}

/// Failure inside the sandbox boundary. Always recoverable by the renderer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SandboxError {
    #[error("sandbox execution is disabled")]
    Disabled,
    #[error("source is empty")]
    EmptySource,
    #[error("source exposes no default-exported callable")]
    NoUnit,
    #[error("imports outside the allowed bindings: {}", .0.join(", "))]
    UnboundImports(Vec<String>),
    #[error("sandbox failed: {0}")]
    Execution(String),
}

/// Failure talking to a third-party completion or code-generation service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{provider}: missing credentials (set {env_var})")]
    MissingCredentials { provider: String, env_var: String },
    #[error("{provider}: HTTP {status}: {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },
    #[error("{provider}: network error: {message}")]
    Network { provider: String, message: String },
    #[error("{provider}: malformed response: {message}")]
    Malformed { provider: String, message: String },
}

impl StoreError {
    /// True for the "nothing there" family of errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_) | StoreError::SourceNotFound(_))
    }
}
