//! # Google Drive Provider
//!
//! Implements `CloudBackend` for Google Drive API v3.
//!
//! ## Overview
//!
//! This module provides:
//! - OAuth 2.0 endpoints and scopes for Google accounts
//! - Paginated directory listing
//! - Ranged downloads and multipart uploads
//! - Folder creation, move, rename and delete

pub mod connector;
pub mod error;
pub mod types;

pub use connector::GoogleDriveConnector;
pub use error::{GoogleDriveError, Result};
