//! Request table: outstanding outbound operations keyed by sequence number
//! (§3 DATA MODEL "Request", §4.4).

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::CompletionError;
use crate::message::Message;

/// Completion callbacks for a publish or send-reply operation. Exactly one
/// of `on_complete`/`on_error` fires, then the request is removed from the
/// table (§3).
pub struct CompletionCallbacks {
    pub on_complete: Option<Box<dyn FnOnce(Message) + Send>>,
    pub on_error: Option<Box<dyn FnOnce(CompletionError) + Send>>,
}

impl Default for CompletionCallbacks {
    fn default() -> Self {
        Self { on_complete: None, on_error: None }
    }
}

/// Completion callbacks for a MAP_SET / MAP_GET / MAP_REMOVE operation.
pub struct MapCallbacks {
    /// `value` is the stored message for `get`, or `None` for `set`/`remove`
    /// and for a `get` on an unset key.
    pub on_success: Option<Box<dyn FnOnce(Option<Message>, String) + Send>>,
    pub on_error: Option<Box<dyn FnOnce(CompletionError, String) + Send>>,
}

impl Default for MapCallbacks {
    fn default() -> Self {
        Self { on_success: None, on_error: None }
    }
}

/// Callbacks for a `send_request` operation.
pub struct RequestCallbacks {
    pub on_reply: Option<Box<dyn FnOnce(Message) + Send>>,
    pub on_error: Option<Box<dyn FnOnce(CompletionError) + Send>>,
}

impl Default for RequestCallbacks {
    fn default() -> Self {
        Self { on_reply: None, on_error: None }
    }
}

/// What kind of outbound operation a table entry represents, and the
/// callbacks to fire on its terminal event.
pub enum RequestKind {
    Publish { message: Message, callbacks: CompletionCallbacks },
    MapOp { key: String, callbacks: MapCallbacks },
    SendRequest { callbacks: RequestCallbacks, timer: Option<tokio::task::JoinHandle<()>> },
    SendReply { message: Message, callbacks: CompletionCallbacks },
}

/// One pending outbound operation. `envelope` is the wire-form frame,
/// retained so the request can be replayed verbatim after a resuming
/// reconnect (§4.4).
pub struct PendingRequest {
    pub envelope: Value,
    pub kind: RequestKind,
}

impl PendingRequest {
    /// Cancel the per-request timeout timer, if any (§5 Cancellation).
    pub fn cancel_timer(&mut self) {
        if let RequestKind::SendRequest { timer, .. } = &mut self.kind {
            if let Some(handle) = timer.take() {
                handle.abort();
            }
        }
    }

    pub(crate) fn fire_error(self, err: CompletionError) {
        match self.kind {
            RequestKind::Publish { callbacks, .. } | RequestKind::SendReply { callbacks, .. } => {
                if let Some(cb) = callbacks.on_error {
                    cb(err);
                }
            }
            RequestKind::MapOp { key, callbacks } => {
                if let Some(cb) = callbacks.on_error {
                    cb(err, key);
                }
            }
            RequestKind::SendRequest { callbacks, .. } => {
                if let Some(cb) = callbacks.on_error {
                    cb(err);
                }
            }
        }
    }
}

/// Maps outbound sequence numbers to pending operations. Keyed by a
/// connection-wide monotonic counter, never reused within a connection
/// lifetime (reset only across a non-resuming reconnect).
#[derive(Default)]
pub struct RequestTable {
    pending: BTreeMap<u64, PendingRequest>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, seq: u64, request: PendingRequest) {
        self.pending.insert(seq, request);
    }

    pub fn take(&mut self, seq: u64) -> Option<PendingRequest> {
        self.pending.remove(&seq)
    }

    pub fn contains(&self, seq: u64) -> bool {
        self.pending.contains_key(&seq)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drain every pending request in ascending sequence order, firing
    /// `on_error(code, reason)` for each (transport close without a
    /// resuming reconnect, or explicit `disconnect()`).
    pub fn drain_with_error(&mut self, code: u32, reason: &str) {
        let entries = std::mem::take(&mut self.pending);
        for (_, mut req) in entries {
            req.cancel_timer();
            req.fire_error(CompletionError::new(code, reason));
        }
    }

    /// Remove every entry without firing callbacks, returning them in
    /// ascending sequence order for replay after a resuming reconnect.
    pub fn drain_for_replay(&mut self) -> Vec<(u64, PendingRequest)> {
        std::mem::take(&mut self.pending).into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn dummy_publish() -> PendingRequest {
        PendingRequest {
            envelope: Value::Null,
            kind: RequestKind::Publish { message: Message::new(), callbacks: CompletionCallbacks::default() },
        }
    }

    #[test]
    fn insert_and_take_is_exactly_once() {
        let mut table = RequestTable::new();
        table.insert(1, dummy_publish());
        assert!(table.take(1).is_some());
        assert!(table.take(1).is_none());
    }

    #[test]
    fn drain_with_error_fires_every_pending_callback() {
        let mut table = RequestTable::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = Arc::clone(&fired);
        table.insert(
            1,
            PendingRequest {
                envelope: Value::Null,
                kind: RequestKind::Publish {
                    message: Message::new(),
                    callbacks: CompletionCallbacks {
                        on_complete: None,
                        on_error: Some(Box::new(move |_err| fired2.store(true, Ordering::SeqCst))),
                    },
                },
            },
        );
        table.drain_with_error(11, "Closed");
        assert!(fired.load(Ordering::SeqCst));
        assert!(table.is_empty());
    }

    #[test]
    fn replay_preserves_ascending_order() {
        let mut table = RequestTable::new();
        table.insert(3, dummy_publish());
        table.insert(1, dummy_publish());
        table.insert(2, dummy_publish());
        let drained = table.drain_for_replay();
        let seqs: Vec<u64> = drained.iter().map(|(s, _)| *s).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(table.is_empty());
    }
}
