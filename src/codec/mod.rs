//! Structural value translation between host values and the kernel's JSON.
//!
//! The kernel serialises .NET value tuples as mappings tagged with
//! `"@type": "tuple"` and positional `Item1..Item7` keys. Tuples longer than
//! seven elements nest the remainder under `Rest`, mirroring
//! `ValueTuple<T1, …, T7, TRest>`. Everything else maps onto plain JSON,
//! except numeric arrays which carry an explicit shape and dtype.

use serde_json::{Map, Number};
use std::collections::BTreeMap;

use crate::error::{CodecError, CodecResult};

pub mod array;
pub mod enums;

pub use array::{ArrayData, Complex64, DType, NumericArray};
pub use enums::{Measurement, Pauli, WireEnum};

/// Discriminator key marking a tuple-encoded mapping.
pub const TUPLE_TYPE_KEY: &str = "@type";

/// Key holding the overflow tuple for arities above [`MAX_TUPLE_ARITY`].
pub const TUPLE_REST_KEY: &str = "Rest";

/// Number of positional slots before elements spill into `Rest`.
pub const MAX_TUPLE_ARITY: usize = 7;

const TUPLE_TYPE_NAMES: [&str; 2] = ["tuple", "@tuple"];
const ITEM_PREFIX: &str = "Item";

/// Host-side value exchanged with the kernel.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// JSON `null`, also used for the absent result of a command.
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Signed integer scalar.
    Int(i64),
    /// Floating-point scalar.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered sequence (Q# array).
    List(Vec<Value>),
    /// Fixed-arity tuple.
    Tuple(Vec<Value>),
    /// String-keyed mapping.
    Map(BTreeMap<String, Value>),
    /// Fixed-width numeric array with shape and dtype.
    Array(NumericArray),
    /// Pauli operator, sent as its integer code.
    Pauli(Pauli),
    /// Measurement result, sent as its integer code.
    Measurement(Measurement),
}

impl Value {
    /// Build a tuple value from its elements.
    pub fn tuple<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        Value::Tuple(items.into_iter().map(Into::into).collect())
    }

    /// Whether the value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow the string contents, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(text) => Some(text),
            _ => None,
        }
    }

    /// Read the value as an integer; integral floats are accepted.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(num) => Some(*num),
            Value::Float(num) if num.fract() == 0.0 && num.is_finite() => Some(*num as i64),
            _ => None,
        }
    }

    /// Read the value as a float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(num) => Some(*num as f64),
            Value::Float(num) => Some(*num),
            _ => None,
        }
    }

    /// Borrow the elements of a list or tuple.
    pub fn as_slice(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow the entries of a map.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Look up a key when the value is a map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|entries| entries.get(key))
    }
}

/// Encode a host value into the kernel's wire JSON.
///
/// Non-finite floats have no JSON representation and encode as `null`.
pub fn encode(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(flag) => serde_json::Value::Bool(*flag),
        Value::Int(num) => serde_json::Value::Number((*num).into()),
        Value::Float(num) => Number::from_f64(*num)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(text) => serde_json::Value::String(text.clone()),
        Value::List(items) => serde_json::Value::Array(items.iter().map(encode).collect()),
        Value::Tuple(items) => encode_tuple(items),
        Value::Map(entries) => serde_json::Value::Object(
            entries
                .iter()
                .map(|(key, item)| (key.clone(), encode(item)))
                .collect(),
        ),
        Value::Array(array) => array.to_wire(),
        Value::Pauli(pauli) => serde_json::Value::Number(pauli.code().into()),
        Value::Measurement(result) => serde_json::Value::Number(result.code().into()),
    }
}

fn encode_tuple(items: &[Value]) -> serde_json::Value {
    let mut map = Map::new();
    map.insert(
        TUPLE_TYPE_KEY.to_string(),
        serde_json::Value::String(TUPLE_TYPE_NAMES[0].to_string()),
    );
    for (index, item) in items.iter().take(MAX_TUPLE_ARITY).enumerate() {
        map.insert(item_key(index + 1), encode(item));
    }
    if items.len() > MAX_TUPLE_ARITY {
        map.insert(
            TUPLE_REST_KEY.to_string(),
            encode_tuple(&items[MAX_TUPLE_ARITY..]),
        );
    }
    serde_json::Value::Object(map)
}

/// Decode the kernel's wire JSON into a host value.
///
/// Enumerated values travel as bare integer codes, so they decode as
/// [`Value::Int`]; recover the typed value with [`WireEnum::from_value`].
pub fn decode(wire: &serde_json::Value) -> CodecResult<Value> {
    match wire {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(flag) => Ok(Value::Bool(*flag)),
        serde_json::Value::Number(num) => Ok(decode_number(num)),
        serde_json::Value::String(text) => Ok(Value::String(text.clone())),
        serde_json::Value::Array(items) => items
            .iter()
            .map(decode)
            .collect::<CodecResult<Vec<_>>>()
            .map(Value::List),
        serde_json::Value::Object(map) => {
            if is_tuple_encoding(map) {
                decode_tuple_items(map).map(Value::Tuple)
            } else if array::is_array_encoding(map) {
                NumericArray::from_wire(map).map(Value::Array)
            } else {
                map.iter()
                    .map(|(key, item)| Ok((key.clone(), decode(item)?)))
                    .collect::<CodecResult<BTreeMap<_, _>>>()
                    .map(Value::Map)
            }
        }
    }
}

/// Parse a JSON document and decode it.
pub fn decode_str(text: &str) -> CodecResult<Value> {
    let wire: serde_json::Value = serde_json::from_str(text)
        .map_err(|err| CodecError::MalformedWireValue(format!("invalid JSON payload: {err}")))?;
    decode(&wire)
}

fn decode_number(num: &Number) -> Value {
    if let Some(int) = num.as_i64() {
        Value::Int(int)
    } else {
        // u64 values above i64::MAX fall back to floating point.
        Value::Float(num.as_f64().unwrap_or(f64::NAN))
    }
}

/// Whether a mapping uses the tuple encoding.
///
/// Older kernels omit the discriminator, so a bare `Item1` also counts.
pub fn is_tuple_encoding(map: &Map<String, serde_json::Value>) -> bool {
    let tagged = map
        .get(TUPLE_TYPE_KEY)
        .and_then(serde_json::Value::as_str)
        .is_some_and(|tag| TUPLE_TYPE_NAMES.contains(&tag));
    tagged || map.contains_key(&item_key(1))
}

fn decode_tuple_items(map: &Map<String, serde_json::Value>) -> CodecResult<Vec<Value>> {
    let mut items = Vec::new();
    while let Some(item) = map.get(&item_key(items.len() + 1)) {
        items.push(decode(item)?);
    }

    for key in map.keys() {
        if let Some(index) = item_index(key) {
            if index == 0 || index > items.len() {
                return Err(CodecError::MalformedWireValue(format!(
                    "tuple carries {key} but {} is missing",
                    item_key(items.len() + 1)
                )));
            }
        }
    }

    if let Some(rest) = map.get(TUPLE_REST_KEY) {
        if items.len() != MAX_TUPLE_ARITY {
            return Err(CodecError::MalformedWireValue(format!(
                "tuple Rest requires {MAX_TUPLE_ARITY} leading items, found {}",
                items.len()
            )));
        }
        match rest {
            serde_json::Value::Object(rest_map) if is_tuple_encoding(rest_map) => {
                items.extend(decode_tuple_items(rest_map)?);
            }
            other => {
                return Err(CodecError::MalformedWireValue(format!(
                    "tuple Rest must be a tuple encoding, found {other}"
                )));
            }
        }
    }

    Ok(items)
}

fn item_key(index: usize) -> String {
    format!("{ITEM_PREFIX}{index}")
}

fn item_index(key: &str) -> Option<usize> {
    key.strip_prefix(ITEM_PREFIX)?.parse().ok()
}

/// Typed extraction from a decoded [`Value`].
pub trait FromValue: Sized {
    /// Convert the value, failing with a description of the mismatch.
    fn from_value(value: &Value) -> Result<Self, String>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, String> {
        Ok(value.clone())
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, String> {
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| format!("expected string, found {value:?}"))
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, String> {
        value
            .as_i64()
            .ok_or_else(|| format!("expected integer, found {value:?}"))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, String> {
        value
            .as_f64()
            .ok_or_else(|| format!("expected number, found {value:?}"))
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Bool(flag) => Ok(*flag),
            other => Err(format!("expected boolean, found {other:?}")),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self, String> {
        value
            .as_slice()
            .ok_or_else(|| format!("expected sequence, found {value:?}"))?
            .iter()
            .map(T::from_value)
            .collect()
    }
}

impl<T: FromValue> FromValue for BTreeMap<String, T> {
    fn from_value(value: &Value) -> Result<Self, String> {
        value
            .as_map()
            .ok_or_else(|| format!("expected mapping, found {value:?}"))?
            .iter()
            .map(|(key, item)| Ok((key.clone(), T::from_value(item)?)))
            .collect()
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Tuple(Vec::new())
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Value::Bool(flag)
    }
}

impl From<i64> for Value {
    fn from(num: i64) -> Self {
        Value::Int(num)
    }
}

impl From<i32> for Value {
    fn from(num: i32) -> Self {
        Value::Int(num.into())
    }
}

impl From<u32> for Value {
    fn from(num: u32) -> Self {
        Value::Int(num.into())
    }
}

impl From<f64> for Value {
    fn from(num: f64) -> Self {
        Value::Float(num)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::String(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::String(text)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<BTreeMap<String, T>> for Value {
    fn from(entries: BTreeMap<String, T>) -> Self {
        Value::Map(
            entries
                .into_iter()
                .map(|(key, item)| (key, item.into()))
                .collect(),
        )
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(item: Option<T>) -> Self {
        item.map_or(Value::Null, Into::into)
    }
}

impl From<NumericArray> for Value {
    fn from(array: NumericArray) -> Self {
        Value::Array(array)
    }
}

impl From<Pauli> for Value {
    fn from(pauli: Pauli) -> Self {
        Value::Pauli(pauli)
    }
}

impl From<Measurement> for Value {
    fn from(result: Measurement) -> Self {
        Value::Measurement(result)
    }
}

macro_rules! impl_from_tuple {
    ($($ty:ident => $var:ident),+) => {
        impl<$($ty: Into<Value>),+> From<($($ty,)+)> for Value {
            fn from(($($var,)+): ($($ty,)+)) -> Self {
                Value::Tuple(vec![$($var.into()),+])
            }
        }
    };
}

impl_from_tuple!(A => a);
impl_from_tuple!(A => a, B => b);
impl_from_tuple!(A => a, B => b, C => c);
impl_from_tuple!(A => a, B => b, C => c, D => d);
impl_from_tuple!(A => a, B => b, C => c, D => d, E => e);
impl_from_tuple!(A => a, B => b, C => c, D => d, E => e, F => f);
impl_from_tuple!(A => a, B => b, C => c, D => d, E => e, F => f, G => g);
impl_from_tuple!(A => a, B => b, C => c, D => d, E => e, F => f, G => g, H => h);
impl_from_tuple!(A => a, B => b, C => c, D => d, E => e, F => f, G => g, H => h, I => i);
impl_from_tuple!(A => a, B => b, C => c, D => d, E => e, F => f, G => g, H => h, I => i, J => j);
impl_from_tuple!(A => a, B => b, C => c, D => d, E => e, F => f, G => g, H => h, I => i, J => j, K => k);
impl_from_tuple!(A => a, B => b, C => c, D => d, E => e, F => f, G => g, H => h, I => i, J => j, K => k, L => l);
