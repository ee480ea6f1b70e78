//! Transport abstraction. The WebSocket transport itself is an external
//! collaborator: it is assumed to provide framed text send/receive, TLS,
//! and open/close callbacks. `eftl-ws` supplies the real `tokio-tungstenite`
//! implementation; this trait lets the `Connection` state machine be driven
//! in unit tests without a socket.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::options::{ConnectionOptions, Endpoint};

/// An open, framed, bidirectional text connection to one endpoint.
#[async_trait]
pub trait Transport: Send {
    /// Send one text frame (a JSON-encoded envelope).
    async fn send_text(&mut self, frame: String) -> Result<(), TransportError>;

    /// Wait for the next inbound text frame. Returns `None` when the peer
    /// closed the connection (clean or otherwise); `close_code()` carries
    /// the WebSocket close code observed, if any.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    /// The WebSocket close code observed on the most recent `recv() == None`,
    /// if the peer sent one.
    fn close_code(&self) -> Option<u16>;

    /// Force-close the transport, e.g. on heartbeat timeout.
    async fn close(&mut self);
}

/// Opens a [`Transport`] to one candidate endpoint. `eftl-ws` implements
/// this over `tokio_tungstenite::connect_async` with the eFTL sub-protocol
/// and TLS options applied; tests supply an in-memory fake.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        options: &ConnectionOptions,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    //! An in-memory [`Transport`]/[`TransportConnector`] pair used to drive
    //! the `Connection` state machine in unit tests without a real socket.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct Shared {
        to_client: Mutex<VecDeque<String>>,
        to_server: Mutex<VecDeque<String>>,
        closed: Mutex<Option<u16>>,
        notify_client: Notify,
        notify_server: Notify,
    }

    /// The test's handle to one simulated connection: push frames the fake
    /// "server" wants the client to receive, and drain frames the client
    /// sent.
    #[derive(Clone)]
    pub struct FakeServerHandle {
        shared: Arc<Shared>,
    }

    impl FakeServerHandle {
        pub fn send_to_client(&self, frame: impl Into<String>) {
            self.shared.to_client.lock().unwrap().push_back(frame.into());
            self.shared.notify_client.notify_one();
        }

        pub fn take_sent(&self) -> Vec<String> {
            self.shared.to_server.lock().unwrap().drain(..).collect()
        }

        pub async fn wait_for_sent(&self) -> String {
            loop {
                if let Some(f) = self.shared.to_server.lock().unwrap().pop_front() {
                    return f;
                }
                self.shared.notify_server.notified().await;
            }
        }

        pub fn close_with_code(&self, code: u16) {
            *self.shared.closed.lock().unwrap() = Some(code);
            self.shared.notify_client.notify_one();
        }
    }

    struct FakeTransport {
        shared: Arc<Shared>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send_text(&mut self, frame: String) -> Result<(), TransportError> {
            self.shared.to_server.lock().unwrap().push_back(frame);
            self.shared.notify_server.notify_one();
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String, TransportError>> {
            loop {
                if let Some(code) = *self.shared.closed.lock().unwrap() {
                    let _ = code;
                    return None;
                }
                if let Some(f) = self.shared.to_client.lock().unwrap().pop_front() {
                    return Some(Ok(f));
                }
                self.shared.notify_client.notified().await;
            }
        }

        fn close_code(&self) -> Option<u16> {
            *self.shared.closed.lock().unwrap()
        }

        async fn close(&mut self) {
            let mut closed = self.shared.closed.lock().unwrap();
            if closed.is_none() {
                *closed = Some(1000);
            }
        }
    }

    pub struct FakeConnector {
        shared: Arc<Shared>,
    }

    impl FakeConnector {
        pub fn new() -> (Self, FakeServerHandle) {
            let shared = Arc::new(Shared::default());
            (Self { shared: Arc::clone(&shared) }, FakeServerHandle { shared })
        }
    }

    #[async_trait]
    impl TransportConnector for FakeConnector {
        async fn connect(
            &self,
            _endpoint: &Endpoint,
            _options: &ConnectionOptions,
        ) -> Result<Box<dyn Transport>, TransportError> {
            Ok(Box::new(FakeTransport { shared: Arc::clone(&self.shared) }))
        }
    }
}
