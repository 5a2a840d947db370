//! Error types for the toolkit
//!
//! One crate-level error enum covering every subsystem. Components surface
//! their own errors; the Store pipeline never rewraps them, so the variant
//! always names the layer that actually failed.

use thiserror::Error;

/// Main error type for the toolkit
#[derive(Debug, Error)]
pub enum ToolkitError {
    /// The requested product, package, or update stream does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Network failure below the HTTP status layer
    #[error("transport error: {0}")]
    Transport(#[source] Box<reqwest::Error>),

    /// Non-2xx HTTP status surfaced to the caller
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// Every token source failed and the fallback was disabled
    #[error("device token unavailable: {0}")]
    AuthToken(String),

    /// Malformed MSZIP, XML, YAML, or JSON payload
    #[error("decode error: {0}")]
    Decode(String),

    /// Requested MSI table or column is not present in the column catalog
    #[error("schema error: {0}")]
    Schema(String),

    /// MSI operation attempted in an incompatible open mode
    #[error("mode conflict: {0}")]
    ModeConflict(String),

    /// A deadline expired
    #[error("timed out: {0}")]
    Timeout(String),

    /// IO error (also carries `msi` crate failures, which are `io::Error`)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// XML parse error
    #[error("XML error: {0}")]
    Xml(#[from] roxmltree::Error),

    /// WinGet catalog database error
    #[error("catalog database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Archive extraction error
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Registry access error
    #[error("registry error: {0}")]
    Registry(#[source] std::io::Error),

    /// Windows API error
    #[cfg(windows)]
    #[error("Windows API error: {0}")]
    WindowsApi(#[from] windows::core::Error),
}

impl From<reqwest::Error> for ToolkitError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ToolkitError::Timeout(e.to_string())
        } else {
            ToolkitError::Transport(Box::new(e))
        }
    }
}

/// Result type alias for toolkit operations
pub type Result<T> = std::result::Result<T, ToolkitError>;
