use std::io;

/// Central error type for the minnow engine.
#[derive(Debug)]
pub enum MinnowError {
    /// Underlying I/O error from the OS or network.
    Io(io::Error),
    /// Invalid configuration (zero-sized pool, bad trigger mode, ...).
    Config(String),
    /// A bounded queue rejected an item at capacity.
    QueueFull,
    /// Generic or miscellaneous error.
    Other(String),
}

impl std::fmt::Display for MinnowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MinnowError::Io(e) => write!(f, "I/O error: {}", e),
            MinnowError::Config(msg) => write!(f, "Configuration error: {}", msg),
            MinnowError::QueueFull => write!(f, "Bounded queue is full"),
            MinnowError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for MinnowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MinnowError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for MinnowError {
    fn from(e: io::Error) -> Self {
        MinnowError::Io(e)
    }
}

pub type MinnowResult<T> = Result<T, MinnowError>;
