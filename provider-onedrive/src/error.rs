use thiserror::Error;

#[derive(Error, Debug)]
pub enum OneDriveError {
    #[error("Failed to parse Graph response: {0}")]
    ParseError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    BridgeError(#[from] bridge_traits::error::BridgeError),
}

pub type Result<T> = std::result::Result<T, OneDriveError>;

impl From<OneDriveError> for core_request::Error {
    fn from(error: OneDriveError) -> Self {
        match error {
            OneDriveError::ParseError(msg) => core_request::Error::InvalidResponse(msg),
            OneDriveError::InvalidRequest(msg) => {
                core_request::Error::Transport(format!("Invalid request: {}", msg))
            }
            OneDriveError::BridgeError(e) => e.into(),
        }
    }
}
