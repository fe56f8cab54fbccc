//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by every crate:
//! - Logging and tracing setup
//! - Provider configuration with capability validation
//! - Event bus for authorization notifications

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{Hints, ProviderConfig, ProviderConfigBuilder};
pub use error::{Error, Result};
pub use events::{AuthEvent, CoreEvent, EventBus};
