//! Subscriptions and event matching.
//!
//! A [`Subscription`] is a standing interest in events: a type pattern, an
//! optional filter map, a callback, and a delivery mode. Patterns are either
//! exact type strings or prefix globs ending in `*` (`plugin/*`).
//!
//! Matching rules:
//!
//! 1. The event type equals the pattern, OR the pattern ends with `*` and the
//!    event type starts with the pattern's prefix.
//! 2. Every key/value pair in the filter map is present and equal in the
//!    event payload.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use super::error::{BoxError, EventBusError};
use super::event::Event;

/// How a subscriber's callback is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Callback runs on the publisher during a synchronous publish, otherwise
    /// on a bus worker.
    Sync,
    /// Callback always runs on a bus worker.
    #[default]
    Async,
}

/// An event type pattern: an exact type or a prefix glob ending in `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypePattern {
    /// Matches one exact event type.
    Exact(String),
    /// Matches every type starting with the prefix (the part before `*`).
    Prefix(String),
}

impl TypePattern {
    /// Parses a pattern string. A trailing `*` makes it a prefix glob; a `*`
    /// anywhere else is rejected.
    pub fn parse(pattern: &str) -> Result<Self, EventBusError> {
        if pattern.is_empty() {
            return Err(EventBusError::InvalidPattern {
                pattern: pattern.to_string(),
            });
        }
        match pattern.find('*') {
            None => Ok(Self::Exact(pattern.to_string())),
            Some(pos) if pos == pattern.len() - 1 => {
                Ok(Self::Prefix(pattern[..pos].to_string()))
            }
            Some(_) => Err(EventBusError::InvalidPattern {
                pattern: pattern.to_string(),
            }),
        }
    }

    /// Returns `true` if `event_type` matches this pattern.
    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            Self::Exact(t) => event_type == t,
            Self::Prefix(p) => event_type.starts_with(p.as_str()),
        }
    }
}

impl FromStr for TypePattern {
    type Err = EventBusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TypePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(t) => write!(f, "{t}"),
            Self::Prefix(p) => write!(f, "{p}*"),
        }
    }
}

/// Callback type for subscriptions.
///
/// Errors are captured by the bus, logged, and routed to the error handler;
/// they never cancel delivery to sibling subscribers.
pub type EventCallback =
    Arc<dyn Fn(Arc<Event>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// A registered interest in events matching a pattern.
///
/// Subscriber ids are unique per bus; registering the same id twice replaces
/// the earlier subscription.
#[derive(Clone)]
pub struct Subscription {
    /// Unique subscriber id.
    pub subscriber_id: String,
    /// Type pattern to match.
    pub pattern: TypePattern,
    /// Optional payload filter: every entry must be present and equal.
    pub filter: Option<Map<String, Value>>,
    /// Delivery mode.
    pub mode: DeliveryMode,
    /// The callback to invoke.
    pub callback: EventCallback,
}

impl Subscription {
    /// Returns `true` if `event` matches this subscription's pattern and
    /// filter.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.pattern.matches(&event.event_type) {
            return false;
        }
        match &self.filter {
            None => true,
            Some(filter) => filter
                .iter()
                .all(|(k, v)| event.payload.get(k) == Some(v)),
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("subscriber_id", &self.subscriber_id)
            .field("pattern", &self.pattern)
            .field("filter", &self.filter)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}
