//! Error taxonomy for the eFTL client core.
//!
//! Synchronous validation failures (bad URL, bad option, oversized publish)
//! surface as [`EftlError`] from the call site. Protocol-level failures never
//! propagate this way — they are routed to the most specific callback as a
//! `(code, reason)` pair; see [`CompletionError`].

use thiserror::Error;

/// Errors returned synchronously to a caller.
#[derive(Debug, Error)]
pub enum EftlError {
    /// Malformed URL, non-numeric option, bad matcher JSON, or an argument of
    /// the wrong shape. Raised synchronously from the call site.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A publish, map-set, or send-request payload exceeded the negotiated
    /// `max_size`. Raised synchronously; the message is never enqueued.
    #[error("message size {size} exceeds negotiated max {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// Every candidate endpoint was tried and none completed the login
    /// handshake.
    #[error("connection failed after trying all endpoints: {tried:?}")]
    ConnectFailed { tried: Vec<String> },

    /// An operation was attempted on a connection that has permanently
    /// closed (reconnect attempts exhausted, or `disconnect()` was called).
    #[error("connection is closed")]
    Closed,

    /// A server-origin protocol error that escaped to a synchronous caller,
    /// e.g. login rejection during `connect()`.
    #[error("protocol error {code}: {reason}")]
    Protocol { code: u32, reason: String },
}

/// A protocol-level failure delivered to a callback rather than raised.
///
/// Carries the same `(code, reason)` shape regardless of which callback
/// receives it: per-operation `on_error`, per-subscription `on_error`, or the
/// connection-level `on_error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionError {
    pub code: u32,
    pub reason: String,
}

impl CompletionError {
    pub fn new(code: u32, reason: impl Into<String>) -> Self {
        Self { code, reason: reason.into() }
    }
}

impl std::fmt::Display for CompletionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "eftl error {}: {}", self.code, self.reason)
    }
}

impl std::error::Error for CompletionError {}

/// Well-known protocol error codes (§6 "Close codes" / error table).
pub mod codes {
    pub const PUBLISH_FAILED: u32 = 11;
    pub const SUBSCRIPTIONS_DISALLOWED: u32 = 13;
    pub const SUBSCRIPTION_FAILED: u32 = 21;
    pub const SUBSCRIPTION_INVALID: u32 = 22;
    pub const REQUEST_DISALLOWED: u32 = 40;
    pub const REQUEST_FAILED: u32 = 41;
    pub const REQUEST_TIMEOUT: u32 = 99;
}

/// Errors from the [`crate::transport::Transport`] abstraction.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("transport closed")]
    Closed,
}

/// Errors from the field accessors on [`crate::message::Message`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("field not found: {0}")]
    NotFound(String),
    #[error("field {field} has incompatible type (expected {expected})")]
    TypeMismatch { field: String, expected: &'static str },
}
