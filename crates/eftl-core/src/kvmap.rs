//! Remote key/value map façade (§3 DATA MODEL "KVMap", §4.6).
//!
//! A `KVMap` is a thin, cheaply-cloned handle binding a map name to a
//! [`Connection`]; every operation round-trips through the same request
//! table and actor as publish/subscribe.

use crate::connection::{Connection, MapOpKind};
use crate::error::EftlError;
use crate::message::Message;
use crate::request::MapCallbacks;

/// A handle to one named remote key/value map.
#[derive(Clone)]
pub struct KVMap {
    connection: Connection,
    name: String,
}

impl KVMap {
    pub(crate) fn new(connection: Connection, name: String) -> Self {
        Self { connection, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store `value` under `key`, overwriting any existing entry.
    pub fn set(&self, key: impl Into<String>, value: Message, callbacks: MapCallbacks) -> Result<(), EftlError> {
        self.connection.send_map_op(MapOpKind::Set, self.name.clone(), key.into(), Some(value), callbacks)
    }

    /// Fetch the value stored under `key`. `on_success` receives `None` if
    /// the key has no entry.
    pub fn get(&self, key: impl Into<String>, callbacks: MapCallbacks) -> Result<(), EftlError> {
        self.connection.send_map_op(MapOpKind::Get, self.name.clone(), key.into(), None, callbacks)
    }

    /// Remove the entry stored under `key`, if any.
    pub fn remove(&self, key: impl Into<String>, callbacks: MapCallbacks) -> Result<(), EftlError> {
        self.connection.send_map_op(MapOpKind::Remove, self.name.clone(), key.into(), None, callbacks)
    }

    /// Destroy the entire map on the server.
    pub fn destroy(&self) -> Result<(), EftlError> {
        self.connection.remove_kv_map(self.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionCallbacks, ConnectionState};
    use crate::options::ConnectionOptions;
    use crate::protocol::{field, op};
    use crate::transport::test_support::FakeConnector;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;

    async fn connected() -> (Connection, crate::transport::test_support::FakeServerHandle) {
        let (connector, server) = FakeConnector::new();
        let task = tokio::spawn(Connection::connect(
            "ws://unit-test.invalid/channel",
            ConnectionOptions::default(),
            Arc::new(connector),
            ConnectionCallbacks::default(),
        ));
        let _login = server.wait_for_sent().await;
        server.send_to_client(
            serde_json::json!({ field::OP: op::WELCOME, field::CLIENT_ID: "c1", field::RESUME: true }).to_string(),
        );
        let conn = tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap().unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
        (conn, server)
    }

    #[tokio::test]
    async fn name_reflects_the_map_it_was_opened_with() {
        let (conn, _server) = connected().await;
        let map = conn.map("orders");
        assert_eq!(map.name(), "orders");
    }

    #[tokio::test]
    async fn destroy_sends_map_destroy_for_the_right_map() {
        let (conn, server) = connected().await;
        let map = conn.map("orders");
        map.destroy().unwrap();

        let sent = server.wait_for_sent().await;
        let sent: Value = serde_json::from_str(&sent).unwrap();
        assert_eq!(sent[field::OP], op::MAP_DESTROY);
        assert_eq!(sent[field::MAP], "orders");
    }

    #[tokio::test]
    async fn set_then_get_round_trips_through_the_request_table() {
        let (conn, server) = connected().await;
        let map = conn.map("orders");

        let mut value = Message::new();
        value.set_string("status", "packed".to_owned());
        map.set("order-1", value, MapCallbacks::default()).unwrap();

        let set_frame = server.wait_for_sent().await;
        let set_frame: Value = serde_json::from_str(&set_frame).unwrap();
        assert_eq!(set_frame[field::OP], op::MAP_SET);
        assert_eq!(set_frame[field::KEY], "order-1");
        assert_eq!(set_frame[field::VALUE]["status"], "packed");
    }
}
