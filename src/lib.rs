//! Workspace façade crate.
//!
//! Re-exports the service layer behind the `desktop-shims` feature so host
//! applications can depend on `cloudstore-workspace` without wiring each
//! crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
