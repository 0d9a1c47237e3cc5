//! Error types shared by the pipeline and its collaborators.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure reported by a frame source, filter graph or frame sink.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("GIF encode failed: {0}")]
    GifEncode(#[from] gif::EncodingError),
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("Filter graph error: {0}")]
    Graph(String),
}

/// Job-level error. Carries the stage that failed and, for filter failures,
/// the worker ordinal.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Settings(#[from] ConfigError),
    #[error("Decode failed: {0}")]
    Decode(#[source] MediaError),
    #[error("Filter worker {worker} failed: {source}")]
    Filter {
        worker: usize,
        #[source]
        source: MediaError,
    },
    #[error("Encode failed: {0}")]
    Encode(#[source] MediaError),
    #[error("Failed to spawn filter worker {worker}: {source}")]
    Spawn {
        worker: usize,
        #[source]
        source: io::Error,
    },
    #[error("Cannot open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: MediaError,
    },
}

impl ConvertError {
    /// Pipeline stage name, for log lines and reports.
    pub fn stage(&self) -> &'static str {
        match self {
            ConvertError::Config(_) | ConvertError::Settings(_) => "config",
            ConvertError::Decode(_) | ConvertError::Open { .. } => "decode",
            ConvertError::Filter { .. } | ConvertError::Spawn { .. } => "filter",
            ConvertError::Encode(_) => "encode",
        }
    }
}

/// Settings file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access settings file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse settings file: {0}")]
    Parse(String),
    #[error("Invalid setting: {0}")]
    Invalid(String),
}
