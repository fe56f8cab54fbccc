//! # Event Bus System
//!
//! Broadcasts typed events from the core to any number of host subscribers
//! using `tokio::sync::broadcast`.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(16);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Auth(AuthEvent::Authorized {
//!         provider: "google".to_string(),
//!     }))
//!     .ok();
//!
//! let event = subscriber.recv().await.unwrap();
//! assert_eq!(event.severity(), core_runtime::events::EventSeverity::Info);
//! # }
//! ```
//!
//! ## Error Handling
//!
//! `emit` fails only when nobody is subscribed; the core ignores that case.
//! Slow subscribers receive `RecvError::Lagged(n)` and continue from the
//! oldest retained event.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast::{self, error::SendError, Receiver};

/// Default number of events buffered per subscriber.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 64;

/// Top-level event enum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Authorization-related events
    Auth(AuthEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Auth(AuthEvent::AuthorizationFailed { .. }) => EventSeverity::Error,
            CoreEvent::Auth(AuthEvent::UserConsentRequired { .. }) => EventSeverity::Warning,
            CoreEvent::Auth(AuthEvent::Authorized { .. })
            | CoreEvent::Auth(AuthEvent::TokenRefreshed { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Events emitted while a provider (re)authorizes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// The user must open `authorize_url` in a browser to grant access.
    UserConsentRequired {
        provider: String,
        authorize_url: String,
    },
    /// The local redirect listener is accepting requests.
    CallbackServerStarted { provider: String, port: u16 },
    /// The local redirect listener was shut down.
    CallbackServerStopped { provider: String },
    /// A stored refresh token produced a new access token.
    TokenRefreshed { provider: String },
    /// Authorization finished and a new token is installed.
    Authorized { provider: String },
    /// Authorization failed or was denied.
    AuthorizationFailed { provider: String, message: String },
}

impl AuthEvent {
    fn description(&self) -> &str {
        match self {
            AuthEvent::UserConsentRequired { .. } => "User consent required",
            AuthEvent::CallbackServerStarted { .. } => "Callback server started",
            AuthEvent::CallbackServerStopped { .. } => "Callback server stopped",
            AuthEvent::TokenRefreshed { .. } => "Access token refreshed",
            AuthEvent::Authorized { .. } => "Provider authorized",
            AuthEvent::AuthorizationFailed { .. } => "Authorization failed",
        }
    }
}

/// Central broadcast channel for core events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a receiver for all future events. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
