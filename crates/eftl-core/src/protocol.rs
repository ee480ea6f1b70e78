//! Wire protocol constants (§6 EXTERNAL INTERFACES).

/// WebSocket sub-protocol identifier negotiated at handshake time.
pub const SUBPROTOCOL: &str = "v1.eftl.tibco.com";

pub const CLIENT_TYPE: &str = "rust";
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PROTOCOL_VERSION: u32 = 1;

pub mod op {
    pub const HEARTBEAT: u32 = 0;
    pub const LOGIN: u32 = 1;
    pub const WELCOME: u32 = 2;
    pub const SUBSCRIBE: u32 = 3;
    pub const SUBSCRIBED: u32 = 4;
    pub const UNSUBSCRIBE: u32 = 5;
    pub const UNSUBSCRIBED: u32 = 6;
    pub const EVENT: u32 = 7;
    pub const MESSAGE: u32 = 8;
    pub const ACK: u32 = 9;
    pub const ERROR: u32 = 10;
    pub const DISCONNECT: u32 = 11;
    pub const REQUEST: u32 = 13;
    pub const REQUEST_REPLY: u32 = 14;
    pub const REPLY: u32 = 15;
    pub const MAP_DESTROY: u32 = 18;
    pub const MAP_SET: u32 = 20;
    pub const MAP_GET: u32 = 22;
    pub const MAP_REMOVE: u32 = 24;
    pub const MAP_RESPONSE: u32 = 26;
}

/// WebSocket close codes that affect reconnect behavior.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const ABNORMAL: u16 = 1006;
    pub const RESTART: u16 = 1012;
}

/// Field names used across multiple frame kinds.
pub mod field {
    pub const OP: &str = "op";
    pub const CLIENT_ID: &str = "client_id";
    pub const ID_TOKEN: &str = "id_token";
    pub const USER: &str = "user";
    pub const PASSWORD: &str = "password";
    pub const CLIENT_TYPE: &str = "client_type";
    pub const CLIENT_VERSION: &str = "client_version";
    pub const PROTOCOL: &str = "protocol";
    pub const LOGIN_OPTIONS: &str = "login_options";
    pub const MAX_PENDING_ACKS: &str = "max_pending_acks";
    pub const TIMEOUT: &str = "timeout";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const MAX_SIZE: &str = "max_size";
    pub const RESUME: &str = "_resume";
    pub const QOS: &str = "_qos";
    pub const ID: &str = "id";
    pub const MATCHER: &str = "matcher";
    pub const DURABLE: &str = "durable";
    pub const TYPE: &str = "type";
    pub const KEY: &str = "key";
    pub const DEL: &str = "del";
    pub const ERR: &str = "err";
    pub const REASON: &str = "reason";
    pub const TO: &str = "to";
    pub const SEQ: &str = "seq";
    pub const BODY: &str = "body";
    pub const SID: &str = "sid";
    pub const CNT: &str = "cnt";
    pub const REPLY_TO: &str = "reply_to";
    pub const REQ: &str = "req";
    pub const MAP: &str = "map";
    pub const VALUE: &str = "value";
    pub const FORCE: &str = "force";
}
