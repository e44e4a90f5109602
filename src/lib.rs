//! VidSnatch - download YouTube videos, audio, transcripts and clips
//!
//! This library provides a single media operation layer (stream selection, merging,
//! trimming and stitching over `yt-dlp` and `ffmpeg`) shared by three front ends:
//! the `vidsnatch` command line, a local web UI and a Model Context Protocol server.

pub mod cli;
pub mod config;
pub mod extractors;
pub mod mcp;
pub mod operations;
pub mod output;
pub mod retry;
pub mod tools;
pub mod utils;
pub mod web;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use extractors::{StreamDescriptor, TranscriptProvider, VideoDetails, VideoProvider};
pub use operations::{MediaFile, MediaOperations};
pub use output::Envelope;
pub use retry::RetryPolicy;
pub use tools::ToolFacade;

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Error kinds surfaced by the operation layer
#[derive(thiserror::Error, Debug)]
pub enum VidSnatchError {
    #[error("Invalid YouTube URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Provider request failed: {0}")]
    Provider(String),

    #[error("No stream matches the request: {0}")]
    StreamSelection(String),

    #[error("{tool} failed: {stderr}")]
    Subprocess { tool: String, stderr: String },

    #[error("File operation failed: {0}")]
    FileError(String),

    #[error("Transcript not available: {0}")]
    TranscriptUnavailable(String),
}

impl VidSnatchError {
    /// Whether the error was caused by the caller's input rather than the environment.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            VidSnatchError::InvalidUrl(_)
                | VidSnatchError::InvalidInput(_)
                | VidSnatchError::StreamSelection(_)
                | VidSnatchError::TranscriptUnavailable(_)
        )
    }
}

/// Find the classified error kind anywhere in an error chain.
pub fn error_kind(err: &anyhow::Error) -> Option<&VidSnatchError> {
    err.chain().find_map(|cause| cause.downcast_ref::<VidSnatchError>())
}
