//! # OneDrive Provider
//!
//! Implements `CloudBackend` for Microsoft Graph API (OneDrive).
//!
//! ## Overview
//!
//! This module provides:
//! - Microsoft identity platform OAuth 2.0 endpoints
//! - Directory listing following `@odata.nextLink`
//! - Ranged downloads and simple uploads
//! - Folder creation, move, rename and delete

pub mod connector;
pub mod error;
pub mod types;

pub use connector::OneDriveConnector;
pub use error::{OneDriveError, Result};
