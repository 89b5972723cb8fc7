use std::fmt;

/// Result type for subluminal-runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the runtime layer
#[derive(Debug)]
pub enum Error {
    /// IO operation failed
    Io(std::io::Error),
    /// JSON (de)serialization failed
    Json(serde_json::Error),
    /// Upstream child could not be started
    Spawn(String),
    /// Configuration problem (identity, bindings, policy source)
    Config(String),
    /// Policy bundle could not be loaded
    Policy(subluminal_policy::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Json(err) => write!(f, "JSON error: {}", err),
            Error::Spawn(msg) => write!(f, "Spawn error: {}", msg),
            Error::Config(msg) => write!(f, "Config error: {}", msg),
            Error::Policy(err) => write!(f, "Policy error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::Policy(err) => Some(err),
            Error::Spawn(_) | Error::Config(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<subluminal_policy::Error> for Error {
    fn from(err: subluminal_policy::Error) -> Self {
        Error::Policy(err)
    }
}
