//! WebSocket transport and public entry point for the eFTL message-bus
//! client. Application code depends on this crate; [`eftl_core`] is the
//! transport-agnostic engine underneath.
//!
//! ```no_run
//! # async fn run() -> Result<(), eftl_core::EftlError> {
//! use eftl_ws::connect;
//! use eftl_core::{ConnectionOptions, ConnectionCallbacks};
//!
//! let conn = connect(
//!     "ws://localhost:9191/channel",
//!     ConnectionOptions::default(),
//!     ConnectionCallbacks::default(),
//! )
//! .await?;
//! conn.disconnect().await;
//! # Ok(())
//! # }
//! ```

mod transport;

pub use transport::{WsConnector, WsTransport};

use std::sync::Arc;

use eftl_core::{Connection, ConnectionCallbacks, ConnectionOptions, EftlError};

/// Connect to one of a pipe-separated list of eFTL URLs over
/// `tokio-tungstenite`, with transparent reconnection thereafter.
pub async fn connect(
    urls: &str,
    options: ConnectionOptions,
    callbacks: ConnectionCallbacks,
) -> Result<Connection, EftlError> {
    Connection::connect(urls, options, Arc::new(WsConnector::new()), callbacks).await
}
