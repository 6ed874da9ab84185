pub mod competition;
pub mod confidence;
pub mod dataset;
pub mod fingerprint;
pub mod ml;

#[derive(Debug)]
pub enum Error {
    /// A required column is missing or duplicated, or the header row could
    /// not be interpreted. Raised before any computation.
    Schema { path: String, message: String },
    /// A field failed to parse under the resolved schema.
    Parse {
        path: String,
        line: u64,
        message: String,
    },
    Csv(csv::Error),
    Io(std::io::Error),
    /// The external qvality binary was explicitly requested but could not be
    /// located. This is a configuration error: there is no silent fallback.
    QvalityNotFound(String),
    /// The external qvality binary ran but misbehaved.
    Qvality(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Schema { path, message } => write!(f, "invalid schema in {}: {}", path, message),
            Self::Parse {
                path,
                line,
                message,
            } => write!(f, "parse error in {} at line {}: {}", path, line, message),
            Self::Csv(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::QvalityNotFound(bin) => write!(
                f,
                "the `{}` binary was requested but could not be found on the search path",
                bin
            ),
            Self::Qvality(message) => write!(f, "qvality failed: {}", message),
        }
    }
}

impl std::error::Error for Error {}

impl From<csv::Error> for Error {
    fn from(value: csv::Error) -> Self {
        Self::Csv(value)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}
