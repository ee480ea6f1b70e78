//! Transport-agnostic protocol engine for the eFTL message-bus client.
//!
//! This crate implements the connection state machine, wire codec, and
//! request/subscription bookkeeping described by the protocol; it knows
//! nothing about how bytes actually move. `eftl-ws` supplies the
//! `tokio-tungstenite` [`transport::Transport`] and is the crate most
//! applications depend on directly.

pub mod connection;
pub mod error;
pub mod kvmap;
pub mod message;
pub mod options;
pub mod protocol;
pub mod request;
pub mod subscription;
pub mod transport;

pub use connection::{Connection, ConnectionCallbacks, ConnectionState};
pub use error::{CompletionError, EftlError};
pub use kvmap::KVMap;
pub use message::{FieldValue, Message};
pub use options::{ConnectionOptions, Endpoint};
pub use request::{CompletionCallbacks, MapCallbacks, RequestCallbacks};
pub use subscription::{AckMode, DurableSpec, DurableType, SubscriptionCallbacks};
pub use transport::{Transport, TransportConnector};
