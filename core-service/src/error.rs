use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Authentication error: {0}")]
    Auth(#[from] core_auth::AuthError),

    #[error("Request error: {0}")]
    Request(#[from] core_request::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
