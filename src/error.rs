use thiserror::Error;

/// Errors raised by a feed while fetching or subscribing
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Backend returned status {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("Failed to decode record: {0}")]
    DecodeError(String),

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("Subscription closed by server")]
    SubscriptionClosed,

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Errors raised when writing a reading to the durable store
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Backend rejected write with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Write timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Errors raised by a location lookup
#[derive(Error, Debug)]
pub enum LocationError {
    #[error("Location lookup is not supported")]
    Unsupported,

    #[error("Location lookup failed: {0}")]
    LookupFailed(String),

    #[error("Location response had invalid coordinates")]
    InvalidCoordinates,
}

/// Reasons a reading is refused before evaluation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReadingError {
    #[error("Reading {id} has non-finite {field}: {value}")]
    Malformed {
        id: String,
        field: &'static str,
        value: f64,
    },

    #[error("Record is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Field '{field}' is not numeric: {raw}")]
    NotNumeric { field: &'static str, raw: String },
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("Missing required environment variable {0}")]
    MissingEnv(&'static str),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}
