use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Provider {provider} authentication failed: {reason}")]
    AuthenticationFailed { provider: String, reason: String },

    #[error("Authorization code exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("OAuth state mismatch: expected '{expected}', got '{actual}'")]
    StateMismatch { expected: String, actual: String },

    #[error("Authorization cancelled")]
    Cancelled,

    #[error("Callback server error: {0}")]
    CallbackServer(String),

    #[error("Invalid auth configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    #[error("Invalid session: {0}")]
    Session(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;
