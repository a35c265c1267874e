use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("No readable EXIF data: {0}")]
    Exif(#[from] exif::Error),
}

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("No HEIF converter configured for {0}")]
    NoHeifConverter(PathBuf),

    #[error("HEIF converter failed for {path}: {detail}")]
    ConverterFailed { path: PathBuf, detail: String },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Failed to read image {path}: {source}")]
    UnreadableImage {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("Detection endpoint unreachable: {0}")]
    Connection(String),

    #[error("Detection request timed out after {0}s")]
    Timeout(u64),

    #[error("Detection endpoint returned {status}: {body}")]
    Endpoint { status: u16, body: String },

    #[error("Failed to parse detection response: {0}")]
    ResponseParsing(String),

    #[error("Failed to encode image for upload: {0}")]
    Encoding(String),

    #[error("Local heuristic failed: {0}")]
    Heuristic(String),
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Reporting service unreachable: {0}")]
    Connection(String),

    #[error("Reporting service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse reporting response: {0}")]
    ResponseParsing(String),

    #[error("Failed to read photo {path}: {source}")]
    Photo {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Unsupported file extension: {0}")]
    UnsupportedExtension(PathBuf),

    #[error("Format normalization failed: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("Detection failed: {0}")]
    Detection(#[from] DetectionError),

    #[error("Report client setup failed: {0}")]
    Report(#[from] ReportError),

    #[error("Processing panicked: {0}")]
    Panic(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to write batch summary: {0}")]
    Summary(String),
}

/// Error from `reqwest`, mapped to the client's own taxonomy.
pub(crate) fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_connect() {
        format!("connection failed: {}", e)
    } else if e.is_timeout() {
        format!("request timed out: {}", e)
    } else {
        e.to_string()
    }
}
