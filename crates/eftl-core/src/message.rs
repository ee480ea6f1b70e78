//! Typed field container with a JSON codec that matches the eFTL wire format.
//!
//! Encoding is canonical: every non-primitive scalar is wire-tagged as a
//! single-key object (`_d_` double, `_m_` datetime, `_o_` opaque bytes).
//! Arrays are homogeneous; an empty array carries no element-type
//! information on the wire, so it round-trips as [`FieldValue::EmptyArray`]
//! until an accessor call resolves it to whichever array type was asked for.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{Map, Value};

use crate::error::FieldError;

const TAG_DOUBLE: &str = "_d_";
const TAG_DATETIME: &str = "_m_";
const TAG_OPAQUE: &str = "_o_";

/// A single typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    Long(i64),
    Double(f64),
    /// Milliseconds since the Unix epoch.
    DateTime(i64),
    Opaque(Vec<u8>),
    Message(Box<Message>),
    StringArray(Vec<String>),
    LongArray(Vec<i64>),
    DoubleArray(Vec<f64>),
    DateTimeArray(Vec<i64>),
    OpaqueArray(Vec<Vec<u8>>),
    MessageArray(Vec<Message>),
    /// An array decoded from the wire with zero elements — the wire form
    /// carries no element-type tag, so the type is resolved lazily by
    /// whichever `get_*_array` accessor is called on it.
    EmptyArray,
}

impl FieldValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Long(_) => "long",
            Self::Double(_) => "double",
            Self::DateTime(_) => "datetime",
            Self::Opaque(_) => "opaque",
            Self::Message(_) => "message",
            Self::StringArray(_) => "string[]",
            Self::LongArray(_) => "long[]",
            Self::DoubleArray(_) => "double[]",
            Self::DateTimeArray(_) => "datetime[]",
            Self::OpaqueArray(_) => "opaque[]",
            Self::MessageArray(_) => "message[]",
            Self::EmptyArray => "[]",
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Self::String(s) => Value::String(s.clone()),
            Self::Long(n) => Value::from(*n),
            Self::Double(d) => encode_double(*d),
            Self::DateTime(ms) => encode_datetime(*ms),
            Self::Opaque(bytes) => encode_opaque(bytes),
            Self::Message(m) => m.to_json_value(),
            Self::StringArray(v) => Value::Array(v.iter().cloned().map(Value::String).collect()),
            Self::LongArray(v) => Value::Array(v.iter().map(|n| Value::from(*n)).collect()),
            Self::DoubleArray(v) => Value::Array(v.iter().map(|d| encode_double(*d)).collect()),
            Self::DateTimeArray(v) => Value::Array(v.iter().map(|ms| encode_datetime(*ms)).collect()),
            Self::OpaqueArray(v) => Value::Array(v.iter().map(|b| encode_opaque(b)).collect()),
            Self::MessageArray(v) => Value::Array(v.iter().map(Message::to_json_value).collect()),
            Self::EmptyArray => Value::Array(vec![]),
        }
    }
}

fn encode_double(d: f64) -> Value {
    let mut obj = Map::new();
    let inner = if d.is_nan() {
        Value::String("NaN".to_owned())
    } else if d.is_infinite() {
        Value::String(if d > 0.0 { "Infinity".to_owned() } else { "-Infinity".to_owned() })
    } else {
        serde_json::Number::from_f64(d).map(Value::Number).unwrap_or(Value::Null)
    };
    obj.insert(TAG_DOUBLE.to_owned(), inner);
    Value::Object(obj)
}

fn encode_datetime(ms: i64) -> Value {
    let mut obj = Map::new();
    obj.insert(TAG_DATETIME.to_owned(), Value::from(ms));
    Value::Object(obj)
}

fn encode_opaque(bytes: &[u8]) -> Value {
    let mut obj = Map::new();
    obj.insert(TAG_OPAQUE.to_owned(), Value::String(BASE64.encode(bytes)));
    Value::Object(obj)
}

fn decode_double(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => match s.as_str() {
            "NaN" => Some(f64::NAN),
            "Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            _ => s.parse().ok(),
        },
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Decode a single scalar JSON value into a [`FieldValue`] (non-array).
fn decode_scalar(v: &Value) -> Option<FieldValue> {
    match v {
        Value::String(s) => Some(FieldValue::String(s.clone())),
        Value::Number(n) => n.as_i64().map(FieldValue::Long),
        Value::Object(obj) if obj.len() == 1 => {
            if let Some(d) = obj.get(TAG_DOUBLE) {
                decode_double(d).map(FieldValue::Double)
            } else if let Some(m) = obj.get(TAG_DATETIME) {
                m.as_i64().map(FieldValue::DateTime)
            } else if let Some(o) = obj.get(TAG_OPAQUE) {
                o.as_str().and_then(|s| BASE64.decode(s).ok()).map(FieldValue::Opaque)
            } else {
                Message::from_json_value(v).ok().map(|m| FieldValue::Message(Box::new(m)))
            }
        }
        Value::Object(_) => Message::from_json_value(v).ok().map(|m| FieldValue::Message(Box::new(m))),
        _ => None,
    }
}

fn decode_field(v: &Value) -> Option<FieldValue> {
    match v {
        Value::Array(items) => {
            if items.is_empty() {
                return Some(FieldValue::EmptyArray);
            }
            match decode_scalar(&items[0])? {
                FieldValue::String(_) => Some(FieldValue::StringArray(
                    items.iter().filter_map(|i| i.as_str().map(str::to_owned)).collect(),
                )),
                FieldValue::Long(_) => Some(FieldValue::LongArray(
                    items.iter().filter_map(Value::as_i64).collect(),
                )),
                FieldValue::Double(_) => Some(FieldValue::DoubleArray(
                    items
                        .iter()
                        .filter_map(|i| i.get(TAG_DOUBLE).and_then(decode_double))
                        .collect(),
                )),
                FieldValue::DateTime(_) => Some(FieldValue::DateTimeArray(
                    items.iter().filter_map(|i| i.get(TAG_DATETIME).and_then(Value::as_i64)).collect(),
                )),
                FieldValue::Opaque(_) => Some(FieldValue::OpaqueArray(
                    items
                        .iter()
                        .filter_map(|i| i.get(TAG_OPAQUE).and_then(Value::as_str))
                        .filter_map(|s| BASE64.decode(s).ok())
                        .collect(),
                )),
                FieldValue::Message(_) => {
                    let mut out = Vec::with_capacity(items.len());
                    for i in items {
                        out.push(Message::from_json_value(i).ok()?);
                    }
                    Some(FieldValue::MessageArray(out))
                }
                FieldValue::EmptyArray => None,
                _ => None,
            }
        }
        other => decode_scalar(other),
    }
}

/// Metadata carried by inbound messages that is not part of the user-visible
/// field map (§3 DATA MODEL, "Message").
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageMetadata {
    pub sequence_number: Option<i64>,
    pub subscriber_id: Option<String>,
    pub store_message_id: Option<i64>,
    pub delivery_count: Option<i64>,
    pub reply_to: Option<String>,
    pub request_id: Option<String>,
}

/// An ordered-by-insertion map from field name to [`FieldValue`].
///
/// Field-name iteration order is not semantically meaningful (the field set
/// is order-irrelevant); insertion order is retained purely for
/// deterministic `Display`/debugging output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    fields: Vec<(String, FieldValue)>,
    pub(crate) meta: MessageMetadata,
}

macro_rules! setter {
    ($name:ident, $array_name:ident, $variant:ident, $array_variant:ident, $t:ty) => {
        pub fn $name(&mut self, field: impl Into<String>, value: $t) {
            self.set_field(field, FieldValue::$variant(value));
        }
        pub fn $array_name(&mut self, field: impl Into<String>, values: Vec<$t>) {
            self.set_field(field, FieldValue::$array_variant(values));
        }
    };
}

macro_rules! getter {
    ($name:ident, $variant:ident, $t:ty, $type_name:literal) => {
        pub fn $name(&self, field: &str) -> Result<$t, FieldError> {
            match self.get_field(field)? {
                FieldValue::$variant(v) => Ok(v.clone()),
                _ => Err(FieldError::TypeMismatch { field: field.to_owned(), expected: $type_name }),
            }
        }
    };
}

macro_rules! array_getter {
    ($name:ident, $variant:ident, $t:ty, $type_name:literal) => {
        pub fn $name(&self, field: &str) -> Result<Vec<$t>, FieldError> {
            match self.get_field(field)? {
                FieldValue::$variant(v) => Ok(v.clone()),
                FieldValue::EmptyArray => Ok(Vec::new()),
                _ => Err(FieldError::TypeMismatch { field: field.to_owned(), expected: $type_name }),
            }
        }
    };
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_field(&mut self, field: impl Into<String>, value: FieldValue) {
        let field = field.into();
        if let Some(slot) = self.fields.iter_mut().find(|(k, _)| *k == field) {
            slot.1 = value;
        } else {
            self.fields.push((field, value));
        }
    }

    fn get_field(&self, field: &str) -> Result<&FieldValue, FieldError> {
        self.fields
            .iter()
            .find(|(k, _)| k == field)
            .map(|(_, v)| v)
            .ok_or_else(|| FieldError::NotFound(field.to_owned()))
    }

    pub fn set_message(&mut self, field: impl Into<String>, value: Message) {
        self.set_field(field, FieldValue::Message(Box::new(value)));
    }

    pub fn set_message_array(&mut self, field: impl Into<String>, values: Vec<Message>) {
        self.set_field(field, FieldValue::MessageArray(values));
    }

    setter!(set_string, set_string_array, String, StringArray, String);
    setter!(set_long, set_long_array, Long, LongArray, i64);
    setter!(set_double, set_double_array, Double, DoubleArray, f64);
    setter!(set_datetime, set_datetime_array, DateTime, DateTimeArray, i64);
    setter!(set_opaque, set_opaque_array, Opaque, OpaqueArray, Vec<u8>);

    getter!(get_string, String, String, "string");
    getter!(get_long, Long, i64, "long");
    getter!(get_double, Double, f64, "double");
    getter!(get_datetime, DateTime, i64, "datetime");
    getter!(get_opaque, Opaque, Vec<u8>, "opaque");

    pub fn get_message(&self, field: &str) -> Result<Message, FieldError> {
        match self.get_field(field)? {
            FieldValue::Message(m) => Ok((**m).clone()),
            _ => Err(FieldError::TypeMismatch { field: field.to_owned(), expected: "message" }),
        }
    }

    pub fn get_message_array(&self, field: &str) -> Result<Vec<Message>, FieldError> {
        match self.get_field(field)? {
            FieldValue::MessageArray(v) => Ok(v.clone()),
            FieldValue::EmptyArray => Ok(Vec::new()),
            _ => Err(FieldError::TypeMismatch { field: field.to_owned(), expected: "message[]" }),
        }
    }

    array_getter!(get_string_array, StringArray, String, "string[]");
    array_getter!(get_long_array, LongArray, i64, "long[]");
    array_getter!(get_double_array, DoubleArray, f64, "double[]");
    array_getter!(get_datetime_array, DateTimeArray, i64, "datetime[]");
    array_getter!(get_opaque_array, OpaqueArray, Vec<u8>, "opaque[]");

    /// Field names currently set on this message (order-irrelevant set).
    pub fn get_field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn is_field_set(&self, field: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == field)
    }

    pub fn get_field_type(&self, field: &str) -> Option<&'static str> {
        self.get_field(field).ok().map(FieldValue::type_name)
    }

    pub fn clear_field(&mut self, field: &str) {
        self.fields.retain(|(k, _)| k != field);
    }

    pub fn clear_all_fields(&mut self) {
        self.fields.clear();
    }

    // -- Inbound metadata (not part of the user-visible field map) ---------

    pub fn get_sequence_number(&self) -> Option<i64> {
        self.meta.sequence_number
    }

    pub fn get_subscriber_id(&self) -> Option<&str> {
        self.meta.subscriber_id.as_deref()
    }

    pub fn get_store_message_id(&self) -> Option<i64> {
        self.meta.store_message_id
    }

    pub fn get_delivery_count(&self) -> Option<i64> {
        self.meta.delivery_count
    }

    pub fn get_reply_to(&self) -> Option<&str> {
        self.meta.reply_to.as_deref()
    }

    pub fn get_request_id(&self) -> Option<&str> {
        self.meta.request_id.as_deref()
    }

    // -- JSON codec ----------------------------------------------------------

    /// Encode to the `body` wire form: a plain JSON object with tagged
    /// non-primitives.
    pub fn to_json_value(&self) -> Value {
        let mut obj = Map::with_capacity(self.fields.len());
        for (k, v) in &self.fields {
            obj.insert(k.clone(), v.to_json());
        }
        Value::Object(obj)
    }

    pub fn to_json_string(&self) -> String {
        self.to_json_value().to_string()
    }

    /// Decode a `body` JSON object into a [`Message`]. Fields whose value
    /// cannot be decoded under the tagged-type rules are silently dropped,
    /// matching the wire contract that only well-formed tagged objects carry
    /// meaning.
    pub fn from_json_value(value: &Value) -> Result<Self, FieldError> {
        let obj = value
            .as_object()
            .ok_or_else(|| FieldError::TypeMismatch { field: "$".to_owned(), expected: "object" })?;
        let mut fields = Vec::with_capacity(obj.len());
        for (k, v) in obj {
            if let Some(fv) = decode_field(v) {
                fields.push((k.clone(), fv));
            }
        }
        Ok(Self { fields, meta: MessageMetadata::default() })
    }

    pub fn from_json_str(s: &str) -> Result<Self, FieldError> {
        let value: Value = serde_json::from_str(s)
            .map_err(|_| FieldError::TypeMismatch { field: "$".to_owned(), expected: "json" })?;
        Self::from_json_value(&value)
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Message{{")?;
        for (i, (k, v)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}={}", v.type_name())?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_primitives() {
        let mut m = Message::new();
        m.set_string("name", "hello".to_owned());
        m.set_long("n", 101);
        m.set_double("pi", std::f64::consts::PI);
        m.set_datetime("when", 1_700_000_000_000);
        m.set_opaque("blob", vec![1, 2, 3, 0, 255]);

        let json = m.to_json_value();
        let decoded = Message::from_json_value(&json).unwrap();

        assert_eq!(decoded.get_string("name").unwrap(), "hello");
        assert_eq!(decoded.get_long("n").unwrap(), 101);
        assert_eq!(decoded.get_double("pi").unwrap(), std::f64::consts::PI);
        assert_eq!(decoded.get_datetime("when").unwrap(), 1_700_000_000_000);
        assert_eq!(decoded.get_opaque("blob").unwrap(), vec![1, 2, 3, 0, 255]);
    }

    #[test]
    fn non_finite_doubles_round_trip_as_strings() {
        for v in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let mut m = Message::new();
            m.set_double("d", v);
            let json = m.to_json_value();
            let tag = json.get("d").unwrap().get(TAG_DOUBLE).unwrap();
            assert!(tag.is_string(), "non-finite double must encode as a string, got {tag:?}");

            let decoded = Message::from_json_value(&json).unwrap();
            let got = decoded.get_double("d").unwrap();
            if v.is_nan() {
                assert!(got.is_nan());
            } else {
                assert_eq!(got, v);
            }
        }
    }

    #[test]
    fn empty_arrays_round_trip() {
        let mut m = Message::new();
        m.set_long_array("empty", vec![]);
        let json = m.to_json_value();
        let decoded = Message::from_json_value(&json).unwrap();
        assert_eq!(decoded.get_long_array("empty").unwrap(), Vec::<i64>::new());
        assert_eq!(decoded.get_string_array("empty").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn empty_opaque_round_trips() {
        let mut m = Message::new();
        m.set_opaque("b", vec![]);
        let json = m.to_json_value();
        let decoded = Message::from_json_value(&json).unwrap();
        assert_eq!(decoded.get_opaque("b").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn nested_message_to_depth_five() {
        fn build(depth: usize) -> Message {
            let mut m = Message::new();
            m.set_long("depth", depth as i64);
            if depth > 0 {
                m.set_message("child", build(depth - 1));
            }
            m
        }

        let top = build(5);
        let json = top.to_json_value();
        let decoded = Message::from_json_value(&json).unwrap();

        let mut cursor = decoded;
        for expected_depth in (0..=5).rev() {
            assert_eq!(cursor.get_long("depth").unwrap(), expected_depth as i64);
            if expected_depth > 0 {
                cursor = cursor.get_message("child").unwrap();
            }
        }
    }

    #[test]
    fn type_mismatch_and_not_found() {
        let mut m = Message::new();
        m.set_string("s", "x".to_owned());
        assert!(matches!(m.get_long("s"), Err(FieldError::TypeMismatch { .. })));
        assert!(matches!(m.get_long("missing"), Err(FieldError::NotFound(_))));

        m.clear_field("s");
        assert!(!m.is_field_set("s"));
    }

    #[test]
    fn field_names_are_order_irrelevant_set() {
        let mut m = Message::new();
        m.set_long("a", 1);
        m.set_long("b", 2);
        let mut names = m.get_field_names();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }
}
