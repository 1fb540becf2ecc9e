use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`crate::ImageCache`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("Index {index} is out of bounds (capacity {capacity})")]
    IndexOutOfBounds { index: usize, capacity: usize },

    #[error("Slot {0} has not been initialized")]
    SlotUninitialized(usize),
}

/// Failures of the page capture step.
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error("Browser launch failed: {0}")]
    BrowserLaunch(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Render failed: {0}")]
    Render(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Login failed: {0}")]
    Login(String),
}

/// Failures of the raster transform step.
#[derive(Debug, Clone, Error)]
pub enum TransformError {
    #[error("Invalid input image: {0}")]
    InvalidInput(String),

    #[error("Unsupported rotation: {0} degrees")]
    UnsupportedRotation(i32),

    #[error("Could not run {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("Converter exited with {status}: {stderr}")]
    Process { status: String, stderr: String },

    #[error("Encoding failed: {0}")]
    Encode(String),
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("Could not bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Could not write response: {0}")]
    Write(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not decode configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("HASS base URL is missing")]
    MissingBaseUrl,

    #[error("HASS base URL is invalid: {0}")]
    InvalidBaseUrl(String),

    #[error("HASS token is missing")]
    MissingToken,

    #[error("No pages to capture")]
    NoPages,

    #[error("Width and height cannot be 0")]
    ZeroDimensions,

    #[error("Listen address is missing")]
    MissingListenAddr,

    #[error("Listen address {0} is invalid")]
    InvalidListenAddr(String),
}

impl From<image::ImageError> for TransformError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::Decoding(e) => TransformError::InvalidInput(e.to_string()),
            image::ImageError::Unsupported(e) => TransformError::InvalidInput(e.to_string()),
            other => TransformError::Encode(other.to_string()),
        }
    }
}

impl From<chromiumoxide::error::CdpError> for CaptureError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        CaptureError::Render(err.to_string())
    }
}
