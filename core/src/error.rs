use thiserror::Error;

#[derive(Debug, Error)]
pub enum IsoEditError {
    #[error("Source image not found: {0}")]
    SourceNotFound(String),

    #[error("Image reader unavailable: {0}")]
    LibraryUnavailable(String),

    #[error("Path not found in image: {0}")]
    PathNotFound(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Packaging failed: {0}")]
    PackagingFailed(String),

    #[error("Packaging tool reported success but produced no image at {0}")]
    OutputMissing(String),

    #[error("Malformed image: {0}")]
    MalformedImage(String),

    #[error("External tool missing: {0}")]
    ExternalToolMissing(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, IsoEditError>;
