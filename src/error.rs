use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Missing split directories: {images} / {labels}")]
    MissingSplitDirs { images: PathBuf, labels: PathBuf },

    #[error("Expected dataset folders {images} and {labels}")]
    MissingDatasetDirs { images: PathBuf, labels: PathBuf },

    #[error("No images found in {0}")]
    NoImages(PathBuf),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Browser launch failed: {0}")]
    BrowserLaunchFailed(String),

    #[error("Browser process died: {0}")]
    BrowserProcessDied(String),

    #[error("Navigation timed out after {0:?}")]
    NavigationTimeout(Duration),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Layout normalization failed: {0}")]
    NormalizeFailed(String),

    #[error("Screenshot capture failed: {0}")]
    CaptureFailed(String),

    #[error("Page error: {0}")]
    PageError(String),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Task error: {0}")]
    TaskError(String),

    #[error("Interrupted by shutdown request")]
    Interrupted,
}

impl ToolError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ToolError::NavigationTimeout(_)
                | ToolError::NavigationFailed(_)
                | ToolError::NormalizeFailed(_)
                | ToolError::CaptureFailed(_)
                | ToolError::PageError(_)
                | ToolError::BrowserProcessDied(_)
        )
    }

    /// Chromium reports this when a navigation replaces the document while a
    /// command is still running against it.
    pub fn is_context_destroyed(&self) -> bool {
        match self {
            ToolError::NavigationFailed(msg) | ToolError::PageError(msg) => {
                msg.contains("Execution context was destroyed")
            }
            _ => false,
        }
    }
}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        ToolError::SerializationError(err.to_string())
    }
}

impl From<image::ImageError> for ToolError {
    fn from(err: image::ImageError) -> Self {
        ToolError::ImageError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ToolError {
    fn from(err: tokio::task::JoinError) -> Self {
        ToolError::TaskError(err.to_string())
    }
}

impl From<chromiumoxide::error::CdpError> for ToolError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        ToolError::PageError(err.to_string())
    }
}
