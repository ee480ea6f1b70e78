//! Connection state machine (§4.5). Owns the transport, drives the login
//! handshake, dispatches inbound op codes, schedules reconnection, and
//! restores subscriptions/requests on resume.
//!
//! Scheduling model: a single actor task per `Connection` processes commands,
//! inbound frames, and timer expirations from one `tokio::select!` loop, so
//! user callbacks for a given connection never run concurrently (§5).

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::error::{codes, CompletionError, EftlError, TransportError};
use crate::kvmap::KVMap;
use crate::message::Message;
use crate::options::{parse_and_shuffle_endpoints, ConnectionOptions, Endpoint};
use crate::protocol::{self, field, op};
use crate::request::{CompletionCallbacks, MapCallbacks, PendingRequest, RequestCallbacks, RequestKind, RequestTable};
use crate::subscription::{AckMode, DurableSpec, SubscriptionCallbacks, SubscriptionRegistry};
use crate::transport::{Transport, TransportConnector};

/// Connection state (§3 DATA MODEL).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Disconnecting,
}

#[derive(Debug, Clone)]
struct Snapshot {
    state: ConnectionState,
    client_id: Option<String>,
    qos: bool,
    max_size: Option<usize>,
}

/// A map op kind, used internally to format MAP_* frames.
#[derive(Clone, Copy)]
pub(crate) enum MapOpKind {
    Set,
    Get,
    Remove,
}

impl MapOpKind {
    fn op_code(self) -> u32 {
        match self {
            Self::Set => op::MAP_SET,
            Self::Get => op::MAP_GET,
            Self::Remove => op::MAP_REMOVE,
        }
    }
}

/// Commands sent from public API calls to the connection actor.
enum Command {
    Publish { message: Message, callbacks: CompletionCallbacks },
    Subscribe {
        matcher: Option<Value>,
        durable: Option<DurableSpec>,
        ack_mode: AckMode,
        callbacks: SubscriptionCallbacks,
        reply: oneshot::Sender<String>,
    },
    Unsubscribe { id: String, delete: bool },
    UnsubscribeAll { delete: bool },
    Acknowledge { sub_id: String, seq: i64, cumulative: bool },
    SendRequest { message: Message, timeout: Duration, callbacks: RequestCallbacks },
    SendReply { to: String, request_id: String, message: Message, callbacks: CompletionCallbacks },
    MapOp { kind: MapOpKind, map: String, key: String, value: Option<Message>, callbacks: MapCallbacks },
    RemoveKvMap { name: String },
    Disconnect { reply: oneshot::Sender<()> },
}

enum InternalEvent {
    HeartbeatTimeout,
    RequestTimeout(u64),
    ReconnectDue,
}

/// Connection-level callbacks: fired when no more specific subscription or
/// request callback applies (§7 Propagation policy).
pub struct ConnectionCallbacks {
    pub on_error: Option<Box<dyn Fn(CompletionError) + Send + Sync>>,
    pub on_disconnect: Option<Box<dyn Fn(u16, String) + Send + Sync>>,
    pub on_reconnect: Option<Box<dyn Fn() + Send + Sync>>,
}

impl Default for ConnectionCallbacks {
    fn default() -> Self {
        Self { on_error: None, on_disconnect: None, on_reconnect: None }
    }
}

/// A handle to a running connection. Cloning shares the same underlying
/// actor task and state.
#[derive(Clone)]
pub struct Connection {
    cmd_tx: mpsc::UnboundedSender<Command>,
    snapshot_rx: watch::Receiver<Snapshot>,
}

impl Connection {
    /// Connect to one of the pipe-separated `urls`, suspending until WELCOME
    /// is received or every endpoint has been tried (§5 Suspension points).
    pub async fn connect(
        urls: &str,
        options: ConnectionOptions,
        connector: Arc<dyn TransportConnector>,
        callbacks: ConnectionCallbacks,
    ) -> Result<Self, EftlError> {
        let endpoints = parse_and_shuffle_endpoints(urls)?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) =
            watch::channel(Snapshot { state: ConnectionState::Connecting, client_id: None, qos: false, max_size: None });
        let (connect_reply_tx, connect_reply_rx) = oneshot::channel();

        let actor = Actor {
            options,
            endpoints,
            cursor: 0,
            connector,
            state: ConnectionState::Connecting,
            client_id: None,
            reconnect_token: None,
            server_timeout: Duration::from_secs(60),
            max_size: None,
            qos: false,
            publish_seq: 0,
            reconnect_counter: 0,
            first_retry_delay: None,
            reconnect_deadline: None,
            registry: SubscriptionRegistry::new(),
            requests: RequestTable::new(),
            transport: None,
            cmd_rx,
            internal_tx,
            internal_rx,
            heartbeat_timer: None,
            snapshot_tx,
            callbacks,
            connect_reply: Some(connect_reply_tx),
            explicit_disconnecting: false,
            last_close: (protocol::close_code::NORMAL, String::new()),
        };

        tokio::spawn(actor.run());

        connect_reply_rx.await.map_err(|_| EftlError::Closed)??;

        Ok(Self { cmd_tx, snapshot_rx })
    }

    pub fn is_connected(&self) -> bool {
        self.snapshot_rx.borrow().state == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshot_rx.borrow().state
    }

    pub fn client_id(&self) -> Option<String> {
        self.snapshot_rx.borrow().client_id.clone()
    }

    /// Whether the server granted exactly-once delivery (`_qos`) on the
    /// most recent WELCOME.
    pub fn qos_enabled(&self) -> bool {
        self.snapshot_rx.borrow().qos
    }

    fn send_command(&self, cmd: Command) -> Result<(), EftlError> {
        if self.state() == ConnectionState::Disconnected {
            return Err(EftlError::Closed);
        }
        self.cmd_tx.send(cmd).map_err(|_| EftlError::Closed)
    }

    /// `None` if no WELCOME has negotiated a limit yet.
    fn max_size(&self) -> Option<usize> {
        self.snapshot_rx.borrow().max_size
    }

    /// Checks `envelope` against the negotiated `max_size` and fails
    /// synchronously, before the message is ever enqueued onto the actor.
    fn check_size(&self, envelope: &Value) -> Result<(), EftlError> {
        if let Some(max) = self.max_size() {
            let size = envelope.to_string().len();
            if size > max {
                return Err(EftlError::MessageTooLarge { size, max });
            }
        }
        Ok(())
    }

    pub fn publish(&self, message: Message, callbacks: CompletionCallbacks) -> Result<(), EftlError> {
        self.check_size(&json!({ field::OP: op::MESSAGE, field::SEQ: 0u64, field::BODY: message.to_json_value() }))?;
        self.send_command(Command::Publish { message, callbacks })
    }

    pub fn subscribe(
        &self,
        matcher: Option<Value>,
        durable: Option<DurableSpec>,
        ack_mode: AckMode,
        callbacks: SubscriptionCallbacks,
    ) -> Result<tokio::sync::oneshot::Receiver<String>, EftlError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(Command::Subscribe { matcher, durable, ack_mode, callbacks, reply })?;
        Ok(rx)
    }

    pub fn unsubscribe(&self, id: impl Into<String>) -> Result<(), EftlError> {
        self.send_command(Command::Unsubscribe { id: id.into(), delete: true })
    }

    pub fn close_subscription(&self, id: impl Into<String>) -> Result<(), EftlError> {
        self.send_command(Command::Unsubscribe { id: id.into(), delete: false })
    }

    pub fn unsubscribe_all(&self) -> Result<(), EftlError> {
        self.send_command(Command::UnsubscribeAll { delete: true })
    }

    pub fn close_all_subscriptions(&self) -> Result<(), EftlError> {
        self.send_command(Command::UnsubscribeAll { delete: false })
    }

    /// Acknowledge a single client-ack-mode message.
    pub fn acknowledge(&self, message: &Message) -> Result<(), EftlError> {
        let sub_id = message.get_subscriber_id().ok_or_else(|| {
            EftlError::InvalidArgument("message carries no subscriber id".to_owned())
        })?;
        let seq = message
            .get_sequence_number()
            .ok_or_else(|| EftlError::InvalidArgument("message carries no sequence number".to_owned()))?;
        self.send_command(Command::Acknowledge { sub_id: sub_id.to_owned(), seq, cumulative: false })
    }

    /// Acknowledge every delivered-but-unacked message up to and including
    /// this one (cumulative ack).
    pub fn acknowledge_all(&self, message: &Message) -> Result<(), EftlError> {
        let sub_id = message.get_subscriber_id().ok_or_else(|| {
            EftlError::InvalidArgument("message carries no subscriber id".to_owned())
        })?;
        let seq = message
            .get_sequence_number()
            .ok_or_else(|| EftlError::InvalidArgument("message carries no sequence number".to_owned()))?;
        self.send_command(Command::Acknowledge { sub_id: sub_id.to_owned(), seq, cumulative: true })
    }

    pub fn send_request(
        &self,
        message: Message,
        timeout: Duration,
        callbacks: RequestCallbacks,
    ) -> Result<(), EftlError> {
        self.check_size(&json!({ field::OP: op::REQUEST, field::SEQ: 0u64, field::BODY: message.to_json_value() }))?;
        self.send_command(Command::SendRequest { message, timeout, callbacks })
    }

    pub fn send_reply(
        &self,
        request_message: &Message,
        reply_message: Message,
        callbacks: CompletionCallbacks,
    ) -> Result<(), EftlError> {
        let to = request_message
            .get_reply_to()
            .ok_or_else(|| EftlError::InvalidArgument("request message carries no reply_to".to_owned()))?
            .to_owned();
        let request_id = request_message
            .get_request_id()
            .ok_or_else(|| EftlError::InvalidArgument("request message carries no request id".to_owned()))?
            .to_owned();
        self.send_command(Command::SendReply { to, request_id, message: reply_message, callbacks })
    }

    pub fn map(&self, name: impl Into<String>) -> KVMap {
        KVMap::new(self.clone(), name.into())
    }

    pub fn remove_kv_map(&self, name: impl Into<String>) -> Result<(), EftlError> {
        self.send_command(Command::RemoveKvMap { name: name.into() })
    }

    pub(crate) fn send_map_op(
        &self,
        kind: MapOpKind,
        map: String,
        key: String,
        value: Option<Message>,
        callbacks: MapCallbacks,
    ) -> Result<(), EftlError> {
        if let Some(v) = &value {
            self.check_size(&json!({
                field::OP: kind.op_code(),
                field::MAP: &map,
                field::KEY: &key,
                field::SEQ: 0u64,
                field::VALUE: v.to_json_value(),
            }))?;
        }
        self.send_command(Command::MapOp { kind, map, key, value, callbacks })
    }

    /// Cancels reconnect, drains the request table, sends DISCONNECT, and
    /// closes the transport, suspending until the close frame has flushed.
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Disconnect { reply }).is_ok() {
            let _ = rx.await;
        }
    }
}

struct Actor {
    options: ConnectionOptions,
    endpoints: Vec<Endpoint>,
    cursor: usize,
    connector: Arc<dyn TransportConnector>,

    state: ConnectionState,
    client_id: Option<String>,
    reconnect_token: Option<String>,
    server_timeout: Duration,
    max_size: Option<usize>,
    qos: bool,

    publish_seq: u64,
    reconnect_counter: u32,
    first_retry_delay: Option<f64>,
    reconnect_deadline: Option<Instant>,

    registry: SubscriptionRegistry,
    requests: RequestTable,
    transport: Option<Box<dyn Transport>>,

    cmd_rx: mpsc::UnboundedReceiver<Command>,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    internal_rx: mpsc::UnboundedReceiver<InternalEvent>,

    heartbeat_timer: Option<tokio::task::JoinHandle<()>>,

    snapshot_tx: watch::Sender<Snapshot>,
    callbacks: ConnectionCallbacks,
    connect_reply: Option<oneshot::Sender<Result<(), EftlError>>>,
    explicit_disconnecting: bool,
    last_close: (u16, String),
}

/// What `select!` produced this iteration.
enum Event {
    Command(Option<Command>),
    Frame(Option<Result<String, TransportError>>),
    Internal(Option<InternalEvent>),
    ReconnectDue,
}

impl Actor {
    async fn run(mut self) {
        if let Err(e) = self.initial_connect().await {
            if let Some(reply) = self.connect_reply.take() {
                let _ = reply.send(Err(e));
            }
            return;
        }
        if let Some(reply) = self.connect_reply.take() {
            let _ = reply.send(Ok(()));
        }

        loop {
            let event = self.wait_for_event().await;
            match event {
                Event::Command(Some(cmd)) => {
                    if self.handle_command(cmd).await {
                        return; // Disconnect processed; actor exits.
                    }
                }
                Event::Command(None) => return, // all handles dropped
                Event::Frame(Some(Ok(text))) => self.handle_frame(text).await,
                Event::Frame(Some(Err(e))) => {
                    self.last_close = (protocol::close_code::ABNORMAL, e.to_string());
                    self.handle_transport_closed().await;
                }
                Event::Frame(None) => {
                    let code = self
                        .transport
                        .as_ref()
                        .and_then(|t| t.close_code())
                        .unwrap_or(protocol::close_code::ABNORMAL);
                    self.last_close = (code, "Closed".to_owned());
                    self.handle_transport_closed().await;
                }
                Event::Internal(Some(ev)) => self.handle_internal(ev).await,
                Event::Internal(None) => {}
                Event::ReconnectDue => self.attempt_reconnect().await,
            }
        }
    }

    async fn wait_for_event(&mut self) -> Event {
        let has_transport = self.transport.is_some();
        let reconnect_deadline = self.reconnect_deadline;

        if has_transport {
            let transport = self.transport.as_mut().unwrap();
            tokio::select! {
                cmd = self.cmd_rx.recv() => Event::Command(cmd),
                frame = transport.recv() => Event::Frame(frame),
                ev = self.internal_rx.recv() => Event::Internal(ev),
            }
        } else if let Some(deadline) = reconnect_deadline {
            tokio::select! {
                cmd = self.cmd_rx.recv() => Event::Command(cmd),
                ev = self.internal_rx.recv() => Event::Internal(ev),
                _ = tokio::time::sleep_until(deadline) => Event::ReconnectDue,
            }
        } else {
            tokio::select! {
                cmd = self.cmd_rx.recv() => Event::Command(cmd),
                ev = self.internal_rx.recv() => Event::Internal(ev),
            }
        }
    }

    fn publish_snapshot(&self) {
        let _ = self.snapshot_tx.send(Snapshot {
            state: self.state,
            client_id: self.client_id.clone(),
            qos: self.qos,
            max_size: self.max_size,
        });
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.publish_snapshot();
    }

    // -- Connect / login ------------------------------------------------

    async fn initial_connect(&mut self) -> Result<(), EftlError> {
        let mut tried = Vec::new();
        for _ in 0..self.endpoints.len() {
            let endpoint = self.endpoints[self.cursor].clone();
            tried.push(endpoint.to_string());
            match self.try_login(&endpoint).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(url = %endpoint, error = %e, "initial connect attempt failed");
                    self.cursor = (self.cursor + 1) % self.endpoints.len();
                }
            }
        }
        Err(EftlError::ConnectFailed { tried })
    }

    /// Attempt the WS handshake and LOGIN/WELCOME exchange against one
    /// endpoint. On success, `self.transport`/`self.client_id`/etc. are set
    /// and `self.state == Connected`.
    async fn try_login(&mut self, endpoint: &Endpoint) -> Result<(), EftlError> {
        let connect_fut = self.connector.connect(endpoint, &self.options);
        let mut transport = tokio::time::timeout(self.options.handshake_timeout, connect_fut)
            .await
            .map_err(|_| EftlError::ConnectFailed { tried: vec![endpoint.to_string()] })?
            .map_err(|e| EftlError::ConnectFailed { tried: vec![format!("{endpoint}: {e}")] })?;

        let login_frame = self.build_login_frame(endpoint);
        transport
            .send_text(login_frame.to_string())
            .await
            .map_err(|e| EftlError::ConnectFailed { tried: vec![format!("{endpoint}: {e}")] })?;

        let welcome = tokio::time::timeout(self.options.login_timeout, Self::await_welcome(&mut *transport))
            .await
            .map_err(|_| EftlError::ConnectFailed { tried: vec![format!("{endpoint}: login timeout")] })?
            .ok_or_else(|| EftlError::ConnectFailed { tried: vec![format!("{endpoint}: connection closed before welcome")] })?
            .map_err(|e| EftlError::ConnectFailed { tried: vec![format!("{endpoint}: {e}")] })?;

        self.transport = Some(transport);
        self.apply_welcome(&welcome).await;
        Ok(())
    }

    /// Pull frames until a WELCOME (or ERROR) arrives, echoing heartbeats as
    /// we go — the server may heartbeat before WELCOME in principle.
    async fn await_welcome(transport: &mut dyn Transport) -> Option<Result<Value, String>> {
        loop {
            let frame = transport.recv().await?;
            let text = match frame {
                Ok(t) => t,
                Err(e) => return Some(Err(e.to_string())),
            };
            let value: Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(_) => continue,
            };
            match value.get(field::OP).and_then(Value::as_u64).map(|n| n as u32) {
                Some(op::WELCOME) => return Some(Ok(value)),
                Some(op::HEARTBEAT) => {
                    let _ = transport.send_text(text).await;
                }
                Some(op::ERROR) => {
                    let reason = value
                        .get(field::REASON)
                        .and_then(Value::as_str)
                        .unwrap_or("login rejected")
                        .to_owned();
                    return Some(Err(reason));
                }
                _ => continue,
            }
        }
    }

    fn build_login_frame(&self, endpoint: &Endpoint) -> Value {
        let user = endpoint.username().or_else(|| self.options.user.clone());
        let password = endpoint.password().or_else(|| self.options.password.clone());
        let client_id = self
            .client_id
            .clone()
            .or_else(|| endpoint.client_id_param())
            .or_else(|| self.options.client_id.clone());

        let mut frame = json!({
            field::OP: op::LOGIN,
            field::PROTOCOL: protocol::PROTOCOL_VERSION,
            field::CLIENT_TYPE: protocol::CLIENT_TYPE,
            field::CLIENT_VERSION: protocol::CLIENT_VERSION,
            field::USER: user.unwrap_or_default(),
            field::PASSWORD: password.unwrap_or_default(),
            field::LOGIN_OPTIONS: { field::QOS: "true", field::RESUME: "true" },
            field::MAX_PENDING_ACKS: self.options.max_pending_acks,
        });
        if let Some(id) = client_id {
            frame[field::CLIENT_ID] = Value::String(id);
        }
        if let Some(token) = &self.reconnect_token {
            frame[field::ID_TOKEN] = Value::String(token.clone());
        }
        frame
    }

    async fn apply_welcome(&mut self, welcome: &Value) {
        let client_id = welcome.get(field::CLIENT_ID).and_then(Value::as_str).map(str::to_owned);
        let id_token = welcome.get(field::ID_TOKEN).and_then(Value::as_str).map(str::to_owned);
        let timeout_secs = welcome.get(field::TIMEOUT).and_then(Value::as_f64).unwrap_or(60.0);
        let heartbeat_secs = welcome.get(field::HEARTBEAT).and_then(Value::as_f64).unwrap_or(30.0);
        tracing::debug!(heartbeat_secs, "server-advertised heartbeat interval (informational; we key timeout off server_timeout instead)");
        let max_size = welcome.get(field::MAX_SIZE).and_then(Value::as_u64).map(|n| n as usize);
        let resume = is_truthy(welcome.get(field::RESUME));
        let qos = is_truthy(welcome.get(field::QOS));

        if client_id.is_some() {
            self.client_id = client_id;
        }
        self.reconnect_token = id_token;
        self.server_timeout = Duration::from_secs_f64(timeout_secs.max(0.0));
        self.max_size = max_size;
        self.qos = qos;

        self.set_state(ConnectionState::Connected);
        self.reconnect_counter = 0;
        self.reconnect_deadline = None;
        self.arm_heartbeat_timer();

        if resume {
            self.resend_pending_subscriptions().await;
            self.replay_pending_requests().await;
        } else {
            self.requests.drain_with_error(codes::PUBLISH_FAILED, "Reconnect");
            self.publish_seq = 0;
            self.registry.reset_all_cursors();
            self.registry.mark_all_pending();
            self.resend_pending_subscriptions().await;
        }

        if let Some(cb) = &self.callbacks.on_reconnect {
            cb();
        }
    }

    async fn resend_pending_subscriptions(&mut self) {
        let ids = self.registry.ids();
        for id in ids {
            let frame = match self.registry.get(&id) {
                Some(sub) => build_subscribe_frame(&id, sub),
                None => continue,
            };
            self.send_frame_best_effort(frame).await;
        }
    }

    async fn replay_pending_requests(&mut self) {
        let ordered = self.requests.drain_for_replay(); // BTreeMap drain is already ascending
        for (seq, req) in ordered {
            let envelope = req.envelope.clone();
            self.requests.insert(seq, req);
            self.send_frame_best_effort(envelope).await;
        }
    }

    // -- Frame dispatch ---------------------------------------------------

    async fn handle_frame(&mut self, text: String) {
        self.rearm_heartbeat_timer();
        let value: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) => {
                tracing::debug!("dropping malformed frame");
                return;
            }
        };
        let op_code = match value.get(field::OP).and_then(Value::as_u64) {
            Some(n) => n as u32,
            None => return,
        };
        match op_code {
            op::HEARTBEAT => self.send_frame_best_effort(value).await,
            op::SUBSCRIBED => self.handle_subscribed(&value),
            op::UNSUBSCRIBED => self.handle_unsubscribed(&value),
            op::EVENT => self.handle_event(&value).await,
            op::ACK => self.handle_ack(&value),
            op::MAP_RESPONSE => self.handle_map_response(&value),
            op::REQUEST_REPLY => self.handle_request_reply(&value),
            op::ERROR => self.handle_connection_error(&value),
            _ => tracing::debug!(op_code, "unhandled inbound op"),
        }
    }

    fn handle_subscribed(&mut self, value: &Value) {
        let Some(id) = value.get(field::ID).and_then(Value::as_str) else { return };
        if let Some(sub) = self.registry.get_mut(id) {
            sub.pending = false;
            if let Some(cb) = &sub.callbacks.on_subscribe {
                cb();
            }
        }
    }

    fn handle_unsubscribed(&mut self, value: &Value) {
        let Some(id) = value.get(field::ID).and_then(Value::as_str) else { return };
        let err = value.get(field::ERR).and_then(Value::as_u64).map(|n| n as u32);
        let reason = value.get(field::REASON).and_then(Value::as_str).unwrap_or("").to_owned();

        if let Some(code) = err {
            let fire_on = self.registry.get(id).and_then(|s| s.callbacks.on_error.as_ref().map(|_| ()));
            if fire_on.is_some() {
                if let Some(sub) = self.registry.get(id) {
                    if let Some(cb) = &sub.callbacks.on_error {
                        cb(CompletionError::new(code, reason.clone()));
                    }
                }
            } else if let Some(cb) = &self.callbacks.on_error {
                cb(CompletionError::new(code, reason));
            }
            if code == codes::SUBSCRIPTION_INVALID {
                self.registry.remove(id);
            }
        } else {
            self.registry.remove(id);
        }
    }

    async fn handle_event(&mut self, value: &Value) {
        let Some(sub_id) = value.get(field::TO).and_then(Value::as_str).map(str::to_owned) else { return };
        let seq = value.get(field::SEQ).and_then(Value::as_i64).unwrap_or(0);
        let ack_mode = match self.registry.get(&sub_id) {
            Some(sub) => sub.ack_mode,
            None => return,
        };

        let deliver = match self.registry.get(&sub_id) {
            Some(sub) => seq > sub.last_received_sequence_number,
            None => false,
        };

        if deliver {
            if let Some(sub) = self.registry.get_mut(&sub_id) {
                sub.last_received_sequence_number = seq;
            }
            let body = value.get(field::BODY).cloned().unwrap_or(Value::Object(Default::default()));
            if let Ok(mut msg) = Message::from_json_value(&body) {
                msg.meta.sequence_number = Some(seq);
                msg.meta.subscriber_id = Some(sub_id.clone());
                msg.meta.store_message_id = value.get(field::SID).and_then(Value::as_i64);
                msg.meta.delivery_count = value.get(field::CNT).and_then(Value::as_i64);
                msg.meta.reply_to = value.get(field::REPLY_TO).and_then(Value::as_str).map(str::to_owned);
                msg.meta.request_id = value.get(field::REQ).and_then(Value::as_str).map(str::to_owned);

                if let Some(sub) = self.registry.get(&sub_id) {
                    if let Some(cb) = &sub.callbacks.on_message {
                        cb(msg);
                    }
                }
            }
        }

        if ack_mode == AckMode::Auto {
            self.send_ack(seq, Some(&sub_id)).await;
        }
    }

    async fn send_ack(&mut self, seq: i64, sub_id: Option<&str>) {
        let mut frame = json!({ field::OP: op::ACK, field::SEQ: seq });
        if let Some(id) = sub_id {
            frame[field::ID] = Value::String(id.to_owned());
        }
        self.send_frame_best_effort(frame).await;
    }

    fn handle_ack(&mut self, value: &Value) {
        let Some(seq) = value.get(field::SEQ).and_then(Value::as_u64) else { return };
        let err = value.get(field::ERR).and_then(Value::as_u64).map(|n| n as u32);
        let Some(mut req) = self.requests.take(seq) else { return };
        req.cancel_timer();
        match err {
            None | Some(0) => match req.kind {
                RequestKind::Publish { message, callbacks } | RequestKind::SendReply { message, callbacks } => {
                    if let Some(cb) = callbacks.on_complete {
                        cb(message);
                    }
                }
                RequestKind::MapOp { key, callbacks } => {
                    if let Some(cb) = callbacks.on_success {
                        cb(None, key);
                    }
                }
                RequestKind::SendRequest { callbacks, .. } => {
                    // ACK alone never completes a send_request; a
                    // REQUEST_REPLY does. Treat a bare ACK success as a
                    // no-op completion with an empty body only if no reply
                    // ever arrives — unreachable in practice since servers
                    // answer REQUEST with REQUEST_REPLY, not ACK.
                    drop(callbacks);
                }
            },
            Some(code) => {
                let reason = value.get(field::REASON).and_then(Value::as_str).unwrap_or("").to_owned();
                self.fire_request_error(req, code, reason);
            }
        }
    }

    fn handle_map_response(&mut self, value: &Value) {
        let Some(seq) = value.get(field::SEQ).and_then(Value::as_u64) else { return };
        let err = value.get(field::ERR).and_then(Value::as_u64).map(|n| n as u32);
        let Some(mut req) = self.requests.take(seq) else { return };
        req.cancel_timer();
        match err {
            None | Some(0) => {
                let stored = value
                    .get(field::VALUE)
                    .and_then(|v| Message::from_json_value(v).ok());
                if let RequestKind::MapOp { key, callbacks } = req.kind {
                    if let Some(cb) = callbacks.on_success {
                        cb(stored, key);
                    }
                }
            }
            Some(code) => {
                let reason = value.get(field::REASON).and_then(Value::as_str).unwrap_or("").to_owned();
                self.fire_request_error(req, code, reason);
            }
        }
    }

    fn handle_request_reply(&mut self, value: &Value) {
        let Some(seq) = value.get(field::SEQ).and_then(Value::as_u64) else { return };
        let err = value.get(field::ERR).and_then(Value::as_u64).map(|n| n as u32);
        let Some(mut req) = self.requests.take(seq) else { return };
        req.cancel_timer();
        match err {
            None | Some(0) => {
                let Some(body) = value.get(field::BODY) else { return };
                let Ok(msg) = Message::from_json_value(body) else { return };
                if let RequestKind::SendRequest { callbacks, .. } = req.kind {
                    if let Some(cb) = callbacks.on_reply {
                        cb(msg);
                    }
                }
            }
            Some(code) => {
                let reason = value.get(field::REASON).and_then(Value::as_str).unwrap_or("").to_owned();
                self.fire_request_error(req, code, reason);
            }
        }
    }

    fn fire_request_error(&self, req: PendingRequest, code: u32, reason: String) {
        req.fire_error(CompletionError::new(code, reason));
    }

    fn handle_connection_error(&mut self, value: &Value) {
        let code = value.get(field::ERR).and_then(Value::as_u64).unwrap_or(0) as u32;
        let reason = value.get(field::REASON).and_then(Value::as_str).unwrap_or("").to_owned();
        if let Some(cb) = &self.callbacks.on_error {
            cb(CompletionError::new(code, reason));
        }
    }

    // -- Commands -----------------------------------------------------------

    /// Returns `true` if the actor should exit (explicit disconnect done).
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Publish { message, callbacks } => self.do_publish(message, callbacks).await,
            Command::Subscribe { matcher, durable, ack_mode, callbacks, reply } => {
                self.do_subscribe(matcher, durable, ack_mode, callbacks, reply).await
            }
            Command::Unsubscribe { id, delete } => self.do_unsubscribe(&id, delete).await,
            Command::UnsubscribeAll { delete } => {
                let ids = self.registry.ids();
                for id in ids {
                    self.do_unsubscribe(&id, delete).await;
                }
            }
            Command::Acknowledge { sub_id, seq, cumulative } => {
                if cumulative {
                    if let Some(sub) = self.registry.get_mut(&sub_id) {
                        sub.last_received_sequence_number = sub.last_received_sequence_number.max(seq);
                    }
                }
                self.send_ack(seq, Some(&sub_id)).await;
            }
            Command::SendRequest { message, timeout, callbacks } => {
                self.do_send_request(message, timeout, callbacks).await
            }
            Command::SendReply { to, request_id, message, callbacks } => {
                self.do_send_reply(to, request_id, message, callbacks).await
            }
            Command::MapOp { kind, map, key, value, callbacks } => {
                self.do_map_op(kind, map, key, value, callbacks).await
            }
            Command::RemoveKvMap { name } => {
                let frame = json!({ field::OP: op::MAP_DESTROY, field::MAP: name });
                self.send_frame_best_effort(frame).await;
            }
            Command::Disconnect { reply } => {
                self.do_disconnect().await;
                let _ = reply.send(());
                return true;
            }
        }
        false
    }

    fn next_seq(&mut self) -> u64 {
        self.publish_seq += 1;
        self.publish_seq
    }

    async fn do_publish(&mut self, message: Message, callbacks: CompletionCallbacks) {
        let seq = self.next_seq();
        let envelope = json!({
            field::OP: op::MESSAGE,
            field::SEQ: seq,
            field::BODY: message.to_json_value(),
        });
        if self.envelope_too_large(&envelope) {
            if let Some(cb) = callbacks.on_error {
                cb(CompletionError::new(codes::PUBLISH_FAILED, "message too large"));
            }
            return;
        }
        self.requests.insert(
            seq,
            PendingRequest { envelope: envelope.clone(), kind: RequestKind::Publish { message, callbacks } },
        );
        self.send_frame_best_effort(envelope).await;
    }

    fn envelope_too_large(&self, envelope: &Value) -> bool {
        match self.max_size {
            Some(max) => envelope.to_string().len() > max,
            None => false,
        }
    }

    async fn do_subscribe(
        &mut self,
        matcher: Option<Value>,
        durable: Option<DurableSpec>,
        ack_mode: AckMode,
        callbacks: SubscriptionCallbacks,
        reply: oneshot::Sender<String>,
    ) {
        let client_id = self.client_id.clone().unwrap_or_default();
        let id = self.registry.register(&client_id, matcher, durable, ack_mode, callbacks);
        if let Some(sub) = self.registry.get(&id) {
            let frame = build_subscribe_frame(&id, sub);
            self.send_frame_best_effort(frame).await;
        }
        let _ = reply.send(id);
    }

    async fn do_unsubscribe(&mut self, id: &str, delete: bool) {
        let frame = json!({
            field::OP: op::UNSUBSCRIBE,
            field::ID: id,
            field::DEL: delete,
        });
        self.send_frame_best_effort(frame).await;
        self.registry.remove(id);
    }

    async fn do_send_request(&mut self, message: Message, timeout: Duration, callbacks: RequestCallbacks) {
        let seq = self.next_seq();
        let envelope = json!({
            field::OP: op::REQUEST,
            field::SEQ: seq,
            field::BODY: message.to_json_value(),
        });
        if self.envelope_too_large(&envelope) {
            if let Some(cb) = callbacks.on_error {
                cb(CompletionError::new(codes::PUBLISH_FAILED, "message too large"));
            }
            return;
        }
        let internal_tx = self.internal_tx.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = internal_tx.send(InternalEvent::RequestTimeout(seq));
        });
        self.requests.insert(
            seq,
            PendingRequest { envelope: envelope.clone(), kind: RequestKind::SendRequest { callbacks, timer: Some(timer) } },
        );
        self.send_frame_best_effort(envelope).await;
    }

    async fn do_send_reply(&mut self, to: String, request_id: String, message: Message, callbacks: CompletionCallbacks) {
        let seq = self.next_seq();
        let envelope = json!({
            field::OP: op::REPLY,
            field::TO: to,
            field::REQ: request_id,
            field::SEQ: seq,
            field::BODY: message.to_json_value(),
        });
        self.requests.insert(
            seq,
            PendingRequest { envelope: envelope.clone(), kind: RequestKind::SendReply { message, callbacks } },
        );
        self.send_frame_best_effort(envelope).await;
    }

    async fn do_map_op(&mut self, kind: MapOpKind, map: String, key: String, value: Option<Message>, callbacks: MapCallbacks) {
        let seq = self.next_seq();
        let mut envelope = json!({
            field::OP: kind.op_code(),
            field::MAP: map,
            field::KEY: key,
            field::SEQ: seq,
        });
        if let Some(v) = &value {
            envelope[field::VALUE] = v.to_json_value();
        }
        self.requests.insert(
            seq,
            PendingRequest { envelope: envelope.clone(), kind: RequestKind::MapOp { key, callbacks } },
        );
        self.send_frame_best_effort(envelope).await;
    }

    // -- Sending --------------------------------------------------------

    /// Fire-and-forget from the actor's perspective: a send failure here
    /// just means the socket already died, and the next `recv()` will
    /// observe the close and drive reconnection.
    async fn send_frame_best_effort(&mut self, frame: Value) {
        if let Some(transport) = self.transport.as_mut() {
            let _ = transport.send_text(frame.to_string()).await;
        }
    }

    // -- Timers -----------------------------------------------------------

    fn arm_heartbeat_timer(&mut self) {
        if let Some(h) = self.heartbeat_timer.take() {
            h.abort();
        }
        let tx = self.internal_tx.clone();
        let timeout = self.server_timeout;
        self.heartbeat_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(InternalEvent::HeartbeatTimeout);
        }));
    }

    fn rearm_heartbeat_timer(&mut self) {
        if self.state == ConnectionState::Connected {
            self.arm_heartbeat_timer();
        }
    }

    async fn handle_internal(&mut self, ev: InternalEvent) {
        match ev {
            InternalEvent::HeartbeatTimeout => {
                tracing::warn!("heartbeat timeout, forcing close");
                if let Some(mut transport) = self.transport.take() {
                    transport.close().await;
                }
                self.last_close = (protocol::close_code::ABNORMAL, "heartbeat timeout".to_owned());
                self.handle_transport_closed().await;
            }
            InternalEvent::RequestTimeout(seq) => {
                if let Some(req) = self.requests.take(seq) {
                    if let RequestKind::SendRequest { callbacks, .. } = req.kind {
                        if let Some(cb) = callbacks.on_error {
                            cb(CompletionError::new(codes::REQUEST_TIMEOUT, "request timeout"));
                        }
                    }
                }
            }
            InternalEvent::ReconnectDue => self.attempt_reconnect().await,
        }
    }

    // -- Close / reconnect ------------------------------------------------

    async fn handle_transport_closed(&mut self) {
        self.transport = None;
        if let Some(h) = self.heartbeat_timer.take() {
            h.abort();
        }
        let (code, reason) = self.last_close.clone();

        if self.explicit_disconnecting {
            return;
        }

        let abnormal = code != protocol::close_code::NORMAL && code != protocol::close_code::RESTART;
        if abnormal && self.schedule_reconnect() {
            self.set_state(ConnectionState::Reconnecting);
            return;
        }

        self.requests.drain_with_error(codes::PUBLISH_FAILED, "Closed");
        self.set_state(ConnectionState::Disconnected);
        if let Some(cb) = &self.callbacks.on_disconnect {
            cb(code, reason);
        }
    }

    fn schedule_reconnect(&mut self) -> bool {
        if self.reconnect_counter >= self.options.auto_reconnect_attempts {
            return false;
        }
        let attempt = self.reconnect_counter;
        let delay = if attempt == 0 {
            let jitter = rand::thread_rng().gen_range(0.5..1.5);
            self.first_retry_delay = Some(jitter);
            jitter
        } else {
            let base = self.first_retry_delay.unwrap_or(1.0);
            (2f64.powi(attempt as i32) * base).min(self.options.auto_reconnect_max_delay.as_secs_f64())
        };
        self.reconnect_counter += 1;
        self.cursor = (self.cursor + 1) % self.endpoints.len();
        self.reconnect_deadline = Some(Instant::now() + Duration::from_secs_f64(delay));
        true
    }

    async fn attempt_reconnect(&mut self) {
        self.reconnect_deadline = None;
        let endpoint = self.endpoints[self.cursor].clone();
        match self.try_login(&endpoint).await {
            Ok(()) => {}
            Err(e) => {
                tracing::warn!(url = %endpoint, error = %e, "reconnect attempt failed");
                if !self.schedule_reconnect() {
                    self.requests.drain_with_error(codes::PUBLISH_FAILED, "Closed");
                    self.set_state(ConnectionState::Disconnected);
                    if let Some(cb) = &self.callbacks.on_disconnect {
                        cb(protocol::close_code::ABNORMAL, "reconnect attempts exhausted".to_owned());
                    }
                }
            }
        }
    }

    async fn do_disconnect(&mut self) {
        self.explicit_disconnecting = true;
        if let Some(h) = self.heartbeat_timer.take() {
            h.abort();
        }
        self.reconnect_deadline = None;
        self.requests.drain_with_error(codes::PUBLISH_FAILED, "Disconnected");
        self.set_state(ConnectionState::Disconnecting);

        if let Some(transport) = self.transport.as_mut() {
            let frame = json!({ field::OP: op::DISCONNECT, field::FORCE: true });
            let _ = transport.send_text(frame.to_string()).await;
            transport.close().await;
        }
        self.transport = None;

        self.set_state(ConnectionState::Disconnected);
        if let Some(cb) = &self.callbacks.on_disconnect {
            cb(protocol::close_code::NORMAL, "User Action".to_owned());
        }
    }
}

fn is_truthy(v: Option<&Value>) -> bool {
    match v {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true",
        _ => false,
    }
}

fn build_subscribe_frame(id: &str, sub: &crate::subscription::Subscription) -> Value {
    let mut frame = json!({
        field::OP: op::SUBSCRIBE,
        field::ID: id,
    });
    if let Some(matcher) = &sub.matcher {
        frame[field::MATCHER] = matcher.clone();
    }
    if let Some(durable) = &sub.durable {
        frame[field::DURABLE] = Value::String(durable.name.clone());
        frame[field::TYPE] = Value::String(durable.durable_type.as_wire_str().to_owned());
        if let Some(key) = &durable.key {
            frame[field::KEY] = Value::String(key.clone());
        }
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::FakeConnector;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration as StdDuration;

    fn welcome(resume: bool) -> Value {
        json!({
            field::OP: op::WELCOME,
            field::CLIENT_ID: "c1",
            field::ID_TOKEN: "tok-1",
            field::TIMEOUT: 60,
            field::HEARTBEAT: 30,
            field::RESUME: resume,
            field::QOS: true,
        })
    }

    async fn connected() -> (Connection, crate::transport::test_support::FakeServerHandle) {
        let (connector, server) = FakeConnector::new();
        let connect_task = tokio::spawn(Connection::connect(
            "ws://unit-test.invalid/channel",
            ConnectionOptions::default(),
            Arc::new(connector),
            ConnectionCallbacks::default(),
        ));
        // The fake transport is available immediately; drive the login
        // handshake by answering LOGIN with WELCOME as soon as it arrives.
        let login = tokio::time::timeout(StdDuration::from_secs(1), server.wait_for_sent())
            .await
            .expect("client never sent LOGIN");
        let login: Value = serde_json::from_str(&login).unwrap();
        assert_eq!(login[field::OP], op::LOGIN);
        server.send_to_client(welcome(true).to_string());

        let conn = tokio::time::timeout(StdDuration::from_secs(1), connect_task)
            .await
            .expect("connect() never resolved")
            .expect("connect task panicked")
            .expect("connect() failed");
        (conn, server)
    }

    #[tokio::test]
    async fn connect_performs_login_and_reaches_connected() {
        let (conn, _server) = connected().await;
        assert!(conn.is_connected());
        assert_eq!(conn.client_id().as_deref(), Some("c1"));
        assert!(conn.qos_enabled());
    }

    #[tokio::test]
    async fn publish_completes_on_matching_ack() {
        let (conn, server) = connected().await;
        let done = Arc::new(AtomicBool::new(false));
        let done2 = Arc::clone(&done);

        let mut msg = Message::new();
        msg.set_string("greeting", "hello".to_owned());
        conn.publish(
            msg,
            CompletionCallbacks { on_complete: Some(Box::new(move |_| done2.store(true, Ordering::SeqCst))), on_error: None },
        )
        .unwrap();

        let sent = server.wait_for_sent().await;
        let sent: Value = serde_json::from_str(&sent).unwrap();
        assert_eq!(sent[field::OP], op::MESSAGE);
        let seq = sent[field::SEQ].as_u64().unwrap();

        server.send_to_client(json!({ field::OP: op::ACK, field::SEQ: seq }).to_string());
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn publish_over_negotiated_max_size_fails_synchronously() {
        let (connector, server) = FakeConnector::new();
        let connect_task = tokio::spawn(Connection::connect(
            "ws://unit-test.invalid/channel",
            ConnectionOptions::default(),
            Arc::new(connector),
            ConnectionCallbacks::default(),
        ));
        let _login = server.wait_for_sent().await;
        server.send_to_client(
            json!({
                field::OP: op::WELCOME,
                field::CLIENT_ID: "c1",
                field::RESUME: true,
                field::MAX_SIZE: 8,
            })
            .to_string(),
        );
        let conn = tokio::time::timeout(StdDuration::from_secs(1), connect_task).await.unwrap().unwrap().unwrap();

        let mut msg = Message::new();
        msg.set_string("body", "this payload is far larger than eight bytes".to_owned());
        let err = conn.publish(msg, CompletionCallbacks::default()).unwrap_err();
        assert!(matches!(err, EftlError::MessageTooLarge { .. }));

        // Nothing beyond LOGIN should ever have reached the wire.
        assert!(server.take_sent().is_empty());
    }

    #[tokio::test]
    async fn subscribe_resolves_id_and_delivers_events_in_order() {
        let (conn, server) = connected().await;
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let received2 = Arc::clone(&received);

        let rx = conn
            .subscribe(
                None,
                None,
                AckMode::Auto,
                SubscriptionCallbacks {
                    on_message: Some(Box::new(move |m| received2.lock().unwrap().push(m.get_long("n").unwrap()))),
                    ..Default::default()
                },
            )
            .unwrap();

        let sub_frame = server.wait_for_sent().await;
        let sub_frame: Value = serde_json::from_str(&sub_frame).unwrap();
        let sub_id = sub_frame[field::ID].as_str().unwrap().to_owned();
        let resolved_id = tokio::time::timeout(StdDuration::from_secs(1), rx).await.unwrap().unwrap();
        assert_eq!(resolved_id, sub_id);

        server.send_to_client(json!({ field::OP: op::SUBSCRIBED, field::ID: sub_id }).to_string());

        for n in [1, 2, 3] {
            let mut body = Message::new();
            body.set_long("n", n);
            server.send_to_client(
                json!({
                    field::OP: op::EVENT,
                    field::TO: sub_id,
                    field::SEQ: n,
                    field::BODY: body.to_json_value(),
                })
                .to_string(),
            );
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert_eq!(*received.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn duplicate_sequence_number_is_not_redelivered() {
        let (conn, server) = connected().await;
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count2 = Arc::clone(&count);

        let rx = conn
            .subscribe(
                None,
                None,
                AckMode::Auto,
                SubscriptionCallbacks {
                    on_message: Some(Box::new(move |_| {
                        count2.fetch_add(1, Ordering::SeqCst);
                    })),
                    ..Default::default()
                },
            )
            .unwrap();
        let sub_frame = server.wait_for_sent().await;
        let sub_frame: Value = serde_json::from_str(&sub_frame).unwrap();
        let sub_id = sub_frame[field::ID].as_str().unwrap().to_owned();
        let _ = tokio::time::timeout(StdDuration::from_secs(1), rx).await.unwrap().unwrap();

        for _ in 0..2 {
            server.send_to_client(
                json!({
                    field::OP: op::EVENT,
                    field::TO: sub_id,
                    field::SEQ: 5,
                    field::BODY: Message::new().to_json_value(),
                })
                .to_string(),
            );
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_request_times_out_when_no_reply_arrives() {
        let (conn, server) = connected().await;
        let err_code = Arc::new(std::sync::Mutex::new(None));
        let err_code2 = Arc::clone(&err_code);

        conn.send_request(
            Message::new(),
            StdDuration::from_millis(30),
            RequestCallbacks {
                on_reply: None,
                on_error: Some(Box::new(move |e| *err_code2.lock().unwrap() = Some(e.code))),
            },
        )
        .unwrap();
        let _sent = server.wait_for_sent().await;

        tokio::time::sleep(StdDuration::from_millis(80)).await;
        assert_eq!(*err_code.lock().unwrap(), Some(codes::REQUEST_TIMEOUT));
    }

    #[tokio::test]
    async fn map_get_delivers_stored_value() {
        let (conn, server) = connected().await;
        let got = Arc::new(std::sync::Mutex::new(None));
        let got2 = Arc::clone(&got);

        conn.map("orders")
            .get(
                "order-1",
                MapCallbacks {
                    on_success: Some(Box::new(move |value, key| {
                        *got2.lock().unwrap() = Some((value.map(|m| m.get_string("status").unwrap()), key));
                    })),
                    on_error: None,
                },
            )
            .unwrap();

        let sent = server.wait_for_sent().await;
        let sent: Value = serde_json::from_str(&sent).unwrap();
        assert_eq!(sent[field::OP], op::MAP_GET);
        assert_eq!(sent[field::KEY], "order-1");

        let mut stored = Message::new();
        stored.set_string("status", "shipped".to_owned());
        server.send_to_client(
            json!({ field::OP: op::MAP_RESPONSE, field::SEQ: sent[field::SEQ], field::VALUE: stored.to_json_value() })
                .to_string(),
        );
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        let (status, key) = got.lock().unwrap().clone().unwrap();
        assert_eq!(status.as_deref(), Some("shipped"));
        assert_eq!(key, "order-1");
    }

    #[tokio::test]
    async fn abnormal_close_schedules_reconnect_and_preserves_subscriptions() {
        let (conn, server) = connected().await;
        let _rx = conn
            .subscribe(None, None, AckMode::Auto, SubscriptionCallbacks::default())
            .unwrap();
        let _sub_frame = server.wait_for_sent().await;

        server.close_with_code(protocol::close_code::ABNORMAL);
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
    }

    #[tokio::test]
    async fn explicit_disconnect_does_not_reconnect() {
        let (conn, _server) = connected().await;
        conn.disconnect().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn envelope_too_large_respects_configured_max_size() {
        let (connector, _server) = FakeConnector::new();
        let mut actor = Actor {
            options: ConnectionOptions::default(),
            endpoints: vec![Endpoint { url: url::Url::parse("ws://x.invalid").unwrap() }],
            cursor: 0,
            connector: Arc::new(connector),
            state: ConnectionState::Connected,
            client_id: None,
            reconnect_token: None,
            server_timeout: Duration::from_secs(60),
            max_size: Some(8),
            qos: false,
            publish_seq: 0,
            reconnect_counter: 0,
            first_retry_delay: None,
            reconnect_deadline: None,
            registry: SubscriptionRegistry::new(),
            requests: RequestTable::new(),
            transport: None,
            cmd_rx: mpsc::unbounded_channel().1,
            internal_tx: mpsc::unbounded_channel().0,
            internal_rx: mpsc::unbounded_channel().1,
            heartbeat_timer: None,
            snapshot_tx: watch::channel(Snapshot { state: ConnectionState::Connected, client_id: None, qos: false, max_size: Some(8) }).0,
            callbacks: ConnectionCallbacks::default(),
            connect_reply: None,
            explicit_disconnecting: false,
            last_close: (protocol::close_code::NORMAL, String::new()),
        };
        let small = json!({"a": 1});
        let large = json!({"a": "this body is deliberately longer than eight bytes"});
        assert!(!actor.envelope_too_large(&small));
        assert!(actor.envelope_too_large(&large));
    }
}
