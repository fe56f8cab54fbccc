use bridge_traits::error::BridgeError;
use core_auth::AuthError;
use thiserror::Error;

/// Machine-checkable codes for errors that are not HTTP statuses.
pub mod code {
    pub const FAILURE: i32 = 600;
    pub const ABORTED: i32 = 601;
    pub const TRANSPORT: i32 = 602;
    pub const AUTHORIZATION: i32 = 603;
}

/// Error half of [`EitherError`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Network or IO failure before an HTTP status was received.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-2xx response.
    #[error("HTTP {code}: {body}")]
    Status { code: u16, body: String },

    /// Interactive flow denied, code exchange failed or token refresh failed.
    #[error("Authorization failed: {0}")]
    Authorization(String),

    /// Cancellation preempted normal completion.
    #[error("Operation aborted")]
    Aborted,

    /// A response the backend could not interpret.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl Error {
    pub fn status(code: u16, body: impl Into<String>) -> Self {
        Error::Status {
            code,
            body: body.into(),
        }
    }

    /// HTTP status for [`Error::Status`], otherwise one of [`code`].
    pub fn code(&self) -> i32 {
        match self {
            Error::Transport(_) => code::TRANSPORT,
            Error::Status { code, .. } => i32::from(*code),
            Error::Authorization(_) => code::AUTHORIZATION,
            Error::Aborted => code::ABORTED,
            Error::InvalidResponse(_) => code::FAILURE,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Error::Status { body, .. } => body.clone(),
            Error::Aborted => String::new(),
            Error::Transport(message)
            | Error::Authorization(message)
            | Error::InvalidResponse(message) => message.clone(),
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Aborted)
    }
}

impl From<BridgeError> for Error {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::Aborted => Error::Aborted,
            other => Error::Transport(other.to_string()),
        }
    }
}

impl From<AuthError> for Error {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::Cancelled => Error::Aborted,
            other => Error::Authorization(other.to_string()),
        }
    }
}

/// Result of every operation: exactly one of a value or an [`Error`].
pub type EitherError<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    #[error("Operation already run")]
    AlreadyRun,
}
