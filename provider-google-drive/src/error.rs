//! Error types for Google Drive provider

use thiserror::Error;

/// Google Drive provider errors
#[derive(Error, Debug)]
pub enum GoogleDriveError {
    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// A request body could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Bridge error
    #[error(transparent)]
    BridgeError(#[from] bridge_traits::error::BridgeError),
}

/// Result type for Google Drive operations
pub type Result<T> = std::result::Result<T, GoogleDriveError>;

impl From<GoogleDriveError> for core_request::Error {
    fn from(error: GoogleDriveError) -> Self {
        match error {
            GoogleDriveError::ParseError(msg) => core_request::Error::InvalidResponse(msg),
            GoogleDriveError::InvalidRequest(msg) => {
                core_request::Error::Transport(format!("Invalid request: {}", msg))
            }
            GoogleDriveError::BridgeError(e) => e.into(),
        }
    }
}
