//! Error types for backend resolution and rendering

use std::fmt;

use thiserror::Error;

use crate::capability::Capability;

/// Result type alias for render operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why a WASM module could not be materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadErrorKind {
    /// Neither the local nor the remote source produced the binary
    Unavailable,
    /// The bytes were fetched but did not compile or instantiate
    Invalid,
}

impl fmt::Display for LoadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadErrorKind::Unavailable => f.write_str("unavailable"),
            LoadErrorKind::Invalid => f.write_str("invalid module"),
        }
    }
}

/// One rejected candidate, recorded while walking a capability's list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub candidate: String,
    pub outcome: String,
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.candidate, self.outcome)
    }
}

struct Attempts<'a>(&'a [Attempt]);

impl fmt::Display for Attempts<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("no candidates registered");
        }
        for (i, a) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", a)?;
        }
        Ok(())
    }
}

/// Errors that can occur while resolving backends or rendering
#[derive(Error, Debug)]
pub enum Error {
    /// A candidate cannot be used in this environment (missing binary, package, ...)
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// WASM resolution exhausted every source or produced an unusable module
    #[error("WASM load failed for {identity} ({kind}): {message}")]
    Load {
        identity: String,
        kind: LoadErrorKind,
        message: String,
    },

    /// Every candidate for a capability was rejected
    #[error("No usable {capability} backend: {}", Attempts(.attempts))]
    NoCandidate {
        capability: Capability,
        attempts: Vec<Attempt>,
    },

    /// Fetched bytes were an HTML page rather than a font
    #[error("Invalid font data for '{family}' from {source_url}")]
    InvalidFontData { family: String, source_url: String },

    /// No font source could supply the requested face
    #[error("Font unavailable: {0}")]
    FontUnavailable(String),

    /// No headless browser could be found or launched
    #[error("Headless browser unavailable: {0}")]
    BrowserUnavailable(String),

    /// Malformed input to a render step
    #[error("Rendering failed: {0}")]
    Render(String),

    /// Operation timed out
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// External process failed to start or misbehaved
    #[error("Process error: {0}")]
    Process(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a caller may recover by trying the next source or candidate.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Unavailable(_)
                | Error::Load { .. }
                | Error::InvalidFontData { .. }
                | Error::FontUnavailable(_)
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Network(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Render(format!("JSON: {}", err))
    }
}
