use std::fmt;

/// Result type for subluminal-policy operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the policy layer
#[derive(Debug)]
pub enum Error {
    /// Bundle file could not be read
    Io(std::io::Error),
    /// Bundle could not be decoded from JSON
    Json(serde_json::Error),
    /// Bundle could not be decoded from YAML
    Yaml(serde_yaml::Error),
    /// Bundle decoded but failed lint
    Lint(String),
    /// Watcher setup failed
    Watch(notify::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Json(err) => write!(f, "JSON error: {}", err),
            Error::Yaml(err) => write!(f, "YAML error: {}", err),
            Error::Lint(msg) => write!(f, "Lint error: {}", msg),
            Error::Watch(err) => write!(f, "Watch error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::Yaml(err) => Some(err),
            Error::Lint(_) => None,
            Error::Watch(err) => Some(err),
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

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Yaml(err)
    }
}

impl From<notify::Error> for Error {
    fn from(err: notify::Error) -> Self {
        Error::Watch(err)
    }
}
