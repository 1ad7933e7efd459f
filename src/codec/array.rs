//! Fixed-width numeric arrays.
//!
//! Arrays travel as `{"v": 1, "dim": [...], "dtype": "...", "data": [...]}`
//! with row-major flat data. Complex arrays store each element as a
//! `[re, im]` pair and keep the logical shape in `dim`. Kernels that omit
//! `dtype` are handled by inferring it from the data.

use serde_json::{Map, Number, json};

use crate::error::{CodecError, CodecResult};

const FORMAT_VERSION: u64 = 1;

/// Complex number with `f64` components.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Complex64 {
    /// Real part.
    pub re: f64,
    /// Imaginary part.
    pub im: f64,
}

impl Complex64 {
    /// Build a complex number from its parts.
    pub fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }
}

/// Element type of a [`NumericArray`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    /// 64-bit float elements.
    Float64,
    /// 64-bit signed integer elements.
    Int64,
    /// Complex elements with `f64` parts.
    Complex128,
}

impl DType {
    /// Wire name of the dtype.
    pub fn as_str(self) -> &'static str {
        match self {
            DType::Float64 => "float64",
            DType::Int64 => "int64",
            DType::Complex128 => "complex128",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name {
            "float64" => Some(DType::Float64),
            "int64" => Some(DType::Int64),
            "complex128" => Some(DType::Complex128),
            _ => None,
        }
    }
}

/// Flat, typed element storage.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    /// Float elements.
    Float(Vec<f64>),
    /// Integer elements.
    Int(Vec<i64>),
    /// Complex elements.
    Complex(Vec<Complex64>),
}

impl ArrayData {
    fn len(&self) -> usize {
        match self {
            ArrayData::Float(items) => items.len(),
            ArrayData::Int(items) => items.len(),
            ArrayData::Complex(items) => items.len(),
        }
    }

    fn dtype(&self) -> DType {
        match self {
            ArrayData::Float(_) => DType::Float64,
            ArrayData::Int(_) => DType::Int64,
            ArrayData::Complex(_) => DType::Complex128,
        }
    }
}

/// N-dimensional numeric array stored in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericArray {
    shape: Vec<usize>,
    data: ArrayData,
}

impl NumericArray {
    /// Create an array, checking that the shape matches the element count.
    pub fn new(shape: Vec<usize>, data: ArrayData) -> CodecResult<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(CodecError::MalformedWireValue(format!(
                "array shape {shape:?} needs {expected} elements, found {}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// One-dimensional float array.
    pub fn from_floats(items: Vec<f64>) -> Self {
        Self {
            shape: vec![items.len()],
            data: ArrayData::Float(items),
        }
    }

    /// One-dimensional integer array.
    pub fn from_ints(items: Vec<i64>) -> Self {
        Self {
            shape: vec![items.len()],
            data: ArrayData::Int(items),
        }
    }

    /// One-dimensional complex array.
    pub fn from_complex(items: Vec<Complex64>) -> Self {
        Self {
            shape: vec![items.len()],
            data: ArrayData::Complex(items),
        }
    }

    /// Array shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Element type.
    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    /// Flat element storage.
    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the array holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reinterpret the array with a new shape of the same element count.
    pub fn reshape(self, shape: Vec<usize>) -> CodecResult<Self> {
        Self::new(shape, self.data)
    }

    /// Row-major flat offset of a multi-dimensional index.
    pub fn offset(&self, index: &[usize]) -> Option<usize> {
        if index.len() != self.shape.len() {
            return None;
        }
        let mut offset = 0;
        for (position, extent) in index.iter().zip(&self.shape) {
            if position >= extent {
                return None;
            }
            offset = offset * extent + position;
        }
        Some(offset)
    }

    pub(crate) fn to_wire(&self) -> serde_json::Value {
        let data: Vec<serde_json::Value> = match &self.data {
            ArrayData::Float(items) => items.iter().map(|num| float_to_wire(*num)).collect(),
            ArrayData::Int(items) => items.iter().map(|num| json!(num)).collect(),
            ArrayData::Complex(items) => items
                .iter()
                .map(|c| json!([float_to_wire(c.re), float_to_wire(c.im)]))
                .collect(),
        };
        json!({
            "v": FORMAT_VERSION,
            "dim": self.shape,
            "dtype": self.dtype().as_str(),
            "data": data,
        })
    }

    pub(crate) fn from_wire(map: &Map<String, serde_json::Value>) -> CodecResult<Self> {
        let shape = map
            .get("dim")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| malformed("array dim must be a list"))?
            .iter()
            .map(|extent| {
                extent
                    .as_u64()
                    .map(|extent| extent as usize)
                    .ok_or_else(|| malformed("array dim entries must be non-negative integers"))
            })
            .collect::<CodecResult<Vec<_>>>()?;

        let items = map
            .get("data")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| malformed("array data must be a list"))?;

        let dtype = match map.get("dtype") {
            Some(serde_json::Value::String(name)) => DType::parse(name)
                .ok_or_else(|| malformed(&format!("unknown array dtype {name}")))?,
            Some(other) => return Err(malformed(&format!("array dtype must be a string, found {other}"))),
            None => infer_dtype(items),
        };

        let data = match dtype {
            DType::Float64 => ArrayData::Float(
                items
                    .iter()
                    .map(|item| item.as_f64().ok_or_else(|| malformed("float array element is not a number")))
                    .collect::<CodecResult<_>>()?,
            ),
            DType::Int64 => ArrayData::Int(
                items
                    .iter()
                    .map(|item| item.as_i64().ok_or_else(|| malformed("int array element is not an integer")))
                    .collect::<CodecResult<_>>()?,
            ),
            DType::Complex128 => ArrayData::Complex(
                items
                    .iter()
                    .map(complex_from_wire)
                    .collect::<CodecResult<_>>()?,
            ),
        };

        Self::new(shape, data)
    }
}

/// Whether a mapping uses the numeric array encoding.
pub(crate) fn is_array_encoding(map: &Map<String, serde_json::Value>) -> bool {
    map.get("v").and_then(serde_json::Value::as_u64) == Some(FORMAT_VERSION)
        && map.contains_key("dim")
        && map.contains_key("data")
}

fn infer_dtype(items: &[serde_json::Value]) -> DType {
    if items.iter().any(serde_json::Value::is_array) {
        DType::Complex128
    } else if !items.is_empty() && items.iter().all(serde_json::Value::is_i64) {
        DType::Int64
    } else {
        DType::Float64
    }
}

fn complex_from_wire(item: &serde_json::Value) -> CodecResult<Complex64> {
    match item.as_array().map(Vec::as_slice) {
        Some([re, im]) => match (re.as_f64(), im.as_f64()) {
            (Some(re), Some(im)) => Ok(Complex64::new(re, im)),
            _ => Err(malformed("complex array parts must be numbers")),
        },
        _ => Err(malformed("complex array element must be a [re, im] pair")),
    }
}

fn float_to_wire(num: f64) -> serde_json::Value {
    Number::from_f64(num)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

fn malformed(detail: &str) -> CodecError {
    CodecError::MalformedWireValue(detail.to_string())
}
