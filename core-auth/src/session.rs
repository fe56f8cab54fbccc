//! Opaque session blobs.
//!
//! A session is the refresh token plus the hints needed to recreate a
//! provider, stored as `{"token": "...", "hints": {...}}`.

use crate::error::{AuthError, Result};
use core_runtime::config::Hints;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct SessionData {
    token: String,
    #[serde(default)]
    hints: Hints,
}

pub fn serialize_session(token: &str, hints: &Hints) -> Result<String> {
    let data = SessionData {
        token: token.to_string(),
        hints: hints.clone(),
    };
    serde_json::to_string(&data).map_err(|e| AuthError::Session(e.to_string()))
}

/// # Errors
///
/// Returns [`AuthError::Session`] when `session` is not a blob produced by
/// [`serialize_session`].
pub fn deserialize_session(session: &str) -> Result<(String, Hints)> {
    let data: SessionData =
        serde_json::from_str(session).map_err(|e| AuthError::Session(e.to_string()))?;
    Ok((data.token, data.hints))
}
