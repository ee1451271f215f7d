use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExhibitError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Data error: {0}")]
    Data(String),
    #[error("Parse error: {message}")]
    Parse { message: String, line: Option<usize>, col: Option<usize> },
    #[error("Evaluation error: {0}")]
    Evaluation(String),
    #[error("Unknown {kind}: {name}")]
    UnknownTag { kind: &'static str, name: String },
    #[error("Internal invariant violated: {0}")]
    Invariant(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("JSON error: {0}")]
    Json(String),
}

impl ExhibitError {
    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::Parse { message: message.into(), line: None, col: None }
    }
    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }
}

pub type Result<T> = std::result::Result<T, ExhibitError>;

// Helper conversions
impl From<std::io::Error> for ExhibitError {
    fn from(e: std::io::Error) -> Self { Self::Io(e.to_string()) }
}
impl From<serde_json::Error> for ExhibitError {
    fn from(e: serde_json::Error) -> Self { Self::Json(e.to_string()) }
}
impl From<config::ConfigError> for ExhibitError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
