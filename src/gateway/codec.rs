//! Variable codec — workflow variable payloads ⇄ gateway wire text.
//!
//! The gateway carries variables as a JSON document in a string field. The
//! root must be an object. Callers hand variables over either as a native
//! structured value or as serialized text; both normalize to [`Variables`]
//! before anything is put on the wire.

use std::fmt;

use serde::ser;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ClientError, Result};

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

/// A JSON object of workflow variables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "VariablesInput", into = "Value")]
pub struct Variables(Map<String, Value>);

impl Variables {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build variables from any serializable type whose JSON form is an object.
    ///
    /// Values JSON cannot carry (NaN, infinities, raw bytes) are rejected
    /// instead of being rewritten.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        value
            .serialize(Representable)
            .map_err(|e| ClientError::InvalidPayload(e.0))?;
        let value = serde_json::to_value(value)
            .map_err(|e| ClientError::InvalidPayload(e.to_string()))?;
        Self::from_value(value)
    }

    /// Accept a structured value. `null` is treated as "no variables".
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::new()),
            other => Err(ClientError::InvalidPayload(format!(
                "variables must be a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Parse serialized text. Blank text is an empty object.
    pub fn parse(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::new());
        }
        let value: Value =
            serde_json::from_str(text).map_err(|e| ClientError::InvalidPayload(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Variables {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Variables> for Value {
    fn from(vars: Variables) -> Self {
        vars.into_value()
    }
}

impl TryFrom<VariablesInput> for Variables {
    type Error = ClientError;

    fn try_from(input: VariablesInput) -> Result<Self> {
        input.normalize()
    }
}

impl fmt::Display for Variables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.0) {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str("{}"),
        }
    }
}

// ---------------------------------------------------------------------------
// VariablesInput
// ---------------------------------------------------------------------------

/// The two forms a caller may supply variables in.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum VariablesInput {
    /// Serialized JSON text; parsed before transmission.
    Text(String),
    /// An already structured value.
    Structured(Value),
}

impl VariablesInput {
    pub fn normalize(self) -> Result<Variables> {
        match self {
            Self::Text(text) => Variables::parse(&text),
            Self::Structured(value) => Variables::from_value(value),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire encoding
// ---------------------------------------------------------------------------

/// Encode variables into the gateway's JSON text field.
pub fn encode(vars: &Variables) -> Result<String> {
    serde_json::to_string(&vars.0).map_err(|e| ClientError::InvalidPayload(e.to_string()))
}

/// Decode a JSON document received from (or destined for) the gateway.
pub fn decode(bytes: &[u8]) -> Result<Variables> {
    let text =
        std::str::from_utf8(bytes).map_err(|e| ClientError::InvalidPayload(e.to_string()))?;
    Variables::parse(text)
}

// ---------------------------------------------------------------------------
// Representability check
// ---------------------------------------------------------------------------

/// Walks a `Serialize` value and fails on anything without a faithful JSON
/// form. serde_json itself writes non-finite floats as `null`.
#[derive(Clone, Copy)]
struct Representable;

#[derive(Debug)]
struct Unrepresentable(String);

impl fmt::Display for Unrepresentable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Unrepresentable {}

impl ser::Error for Unrepresentable {
    fn custom<M: fmt::Display>(msg: M) -> Self {
        Self(msg.to_string())
    }
}

type Check = std::result::Result<(), Unrepresentable>;

fn finite(value: f64) -> Check {
    if value.is_finite() {
        Ok(())
    } else {
        Err(Unrepresentable(format!(
            "{} is not representable in JSON",
            value
        )))
    }
}

impl ser::Serializer for Representable {
    type Ok = ();
    type Error = Unrepresentable;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    fn serialize_bool(self, _: bool) -> Check {
        Ok(())
    }
    fn serialize_i8(self, _: i8) -> Check {
        Ok(())
    }
    fn serialize_i16(self, _: i16) -> Check {
        Ok(())
    }
    fn serialize_i32(self, _: i32) -> Check {
        Ok(())
    }
    fn serialize_i64(self, _: i64) -> Check {
        Ok(())
    }
    fn serialize_i128(self, _: i128) -> Check {
        Ok(())
    }
    fn serialize_u8(self, _: u8) -> Check {
        Ok(())
    }
    fn serialize_u16(self, _: u16) -> Check {
        Ok(())
    }
    fn serialize_u32(self, _: u32) -> Check {
        Ok(())
    }
    fn serialize_u64(self, _: u64) -> Check {
        Ok(())
    }
    fn serialize_u128(self, _: u128) -> Check {
        Ok(())
    }
    fn serialize_f32(self, v: f32) -> Check {
        finite(f64::from(v))
    }
    fn serialize_f64(self, v: f64) -> Check {
        finite(v)
    }
    fn serialize_char(self, _: char) -> Check {
        Ok(())
    }
    fn serialize_str(self, _: &str) -> Check {
        Ok(())
    }
    fn serialize_bytes(self, _: &[u8]) -> Check {
        Err(Unrepresentable(
            "raw bytes are not representable in JSON".into(),
        ))
    }
    fn serialize_none(self) -> Check {
        Ok(())
    }
    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Check {
        value.serialize(self)
    }
    fn serialize_unit(self) -> Check {
        Ok(())
    }
    fn serialize_unit_struct(self, _: &'static str) -> Check {
        Ok(())
    }
    fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> Check {
        Ok(())
    }
    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _: &'static str,
        value: &T,
    ) -> Check {
        value.serialize(self)
    }
    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        value: &T,
    ) -> Check {
        value.serialize(self)
    }
    fn serialize_seq(self, _: Option<usize>) -> std::result::Result<Self, Unrepresentable> {
        Ok(self)
    }
    fn serialize_tuple(self, _: usize) -> std::result::Result<Self, Unrepresentable> {
        Ok(self)
    }
    fn serialize_tuple_struct(
        self,
        _: &'static str,
        _: usize,
    ) -> std::result::Result<Self, Unrepresentable> {
        Ok(self)
    }
    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> std::result::Result<Self, Unrepresentable> {
        Ok(self)
    }
    fn serialize_map(self, _: Option<usize>) -> std::result::Result<Self, Unrepresentable> {
        Ok(self)
    }
    fn serialize_struct(
        self,
        _: &'static str,
        _: usize,
    ) -> std::result::Result<Self, Unrepresentable> {
        Ok(self)
    }
    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> std::result::Result<Self, Unrepresentable> {
        Ok(self)
    }
}

impl ser::SerializeSeq for Representable {
    type Ok = ();
    type Error = Unrepresentable;
    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Check {
        value.serialize(*self)
    }
    fn end(self) -> Check {
        Ok(())
    }
}

impl ser::SerializeTuple for Representable {
    type Ok = ();
    type Error = Unrepresentable;
    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Check {
        value.serialize(*self)
    }
    fn end(self) -> Check {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for Representable {
    type Ok = ();
    type Error = Unrepresentable;
    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Check {
        value.serialize(*self)
    }
    fn end(self) -> Check {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for Representable {
    type Ok = ();
    type Error = Unrepresentable;
    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Check {
        value.serialize(*self)
    }
    fn end(self) -> Check {
        Ok(())
    }
}

// Key shape (string vs. not) is left to serde_json.
impl ser::SerializeMap for Representable {
    type Ok = ();
    type Error = Unrepresentable;
    fn serialize_key<T: ?Sized + Serialize>(&mut self, _: &T) -> Check {
        Ok(())
    }
    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Check {
        value.serialize(*self)
    }
    fn end(self) -> Check {
        Ok(())
    }
}

impl ser::SerializeStruct for Representable {
    type Ok = ();
    type Error = Unrepresentable;
    fn serialize_field<T: ?Sized + Serialize>(&mut self, key: &'static str, value: &T) -> Check {
        value
            .serialize(*self)
            .map_err(|e| Unrepresentable(format!("field '{}': {}", key, e.0)))
    }
    fn end(self) -> Check {
        Ok(())
    }
}

impl ser::SerializeStructVariant for Representable {
    type Ok = ();
    type Error = Unrepresentable;
    fn serialize_field<T: ?Sized + Serialize>(&mut self, key: &'static str, value: &T) -> Check {
        value
            .serialize(*self)
            .map_err(|e| Unrepresentable(format!("field '{}': {}", key, e.0)))
    }
    fn end(self) -> Check {
        Ok(())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
