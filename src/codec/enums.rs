//! Enumerated domain values shared with the kernel.
//!
//! Both enums always travel as their integer code; callers may supply either
//! the code or the symbolic name when building arguments.

use super::Value;
use crate::error::{CodecError, CodecResult};

/// Enumerated type with an integer wire code and a symbolic name.
pub trait WireEnum: Sized + Copy {
    /// Type name used in error messages.
    const KIND: &'static str;

    /// Integer code sent on the wire.
    fn code(self) -> i64;

    /// Symbolic name.
    fn name(self) -> &'static str;

    /// Look up a variant by its integer code.
    fn from_code(code: i64) -> Option<Self>;

    /// Look up a variant by its symbolic name.
    fn from_name(name: &str) -> Option<Self>;

    /// Extract the variant when the value already carries it.
    fn from_tagged(value: &Value) -> Option<Self>;

    /// Coerce a decoded value (code, name or tagged variant) into the enum.
    fn from_value(value: &Value) -> CodecResult<Self> {
        let found = match value {
            Value::String(name) => Self::from_name(name),
            other => Self::from_tagged(other).or_else(|| other.as_i64().and_then(Self::from_code)),
        };
        found.ok_or_else(|| CodecError::InvalidEnum {
            kind: Self::KIND,
            value: format!("{value:?}"),
        })
    }
}

/// Single-qubit Pauli operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pauli {
    /// Identity.
    I,
    /// Pauli X.
    X,
    /// Pauli Y.
    Y,
    /// Pauli Z.
    Z,
}

impl Pauli {
    /// All variants in code order.
    pub const ALL: [Pauli; 4] = [Pauli::I, Pauli::X, Pauli::Z, Pauli::Y];
}

impl WireEnum for Pauli {
    const KIND: &'static str = "Pauli";

    fn code(self) -> i64 {
        match self {
            Pauli::I => 0b00,
            Pauli::X => 0b01,
            Pauli::Y => 0b11,
            Pauli::Z => 0b10,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Pauli::I => "PauliI",
            Pauli::X => "PauliX",
            Pauli::Y => "PauliY",
            Pauli::Z => "PauliZ",
        }
    }

    fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|pauli| pauli.code() == code)
    }

    fn from_name(name: &str) -> Option<Self> {
        let short = name.strip_prefix("Pauli").unwrap_or(name);
        match short {
            "I" => Some(Pauli::I),
            "X" => Some(Pauli::X),
            "Y" => Some(Pauli::Y),
            "Z" => Some(Pauli::Z),
            _ => None,
        }
    }

    fn from_tagged(value: &Value) -> Option<Self> {
        match value {
            Value::Pauli(pauli) => Some(*pauli),
            _ => None,
        }
    }
}

/// Measurement outcome of a single qubit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Measurement {
    /// Measured `|0⟩`.
    Zero,
    /// Measured `|1⟩`.
    One,
}

impl WireEnum for Measurement {
    const KIND: &'static str = "Result";

    fn code(self) -> i64 {
        match self {
            Measurement::Zero => 0,
            Measurement::One => 1,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Measurement::Zero => "Zero",
            Measurement::One => "One",
        }
    }

    fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Measurement::Zero),
            1 => Some(Measurement::One),
            _ => None,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "Zero" => Some(Measurement::Zero),
            "One" => Some(Measurement::One),
            _ => None,
        }
    }

    fn from_tagged(value: &Value) -> Option<Self> {
        match value {
            Value::Measurement(result) => Some(*result),
            _ => None,
        }
    }
}

impl super::FromValue for Pauli {
    fn from_value(value: &Value) -> Result<Self, String> {
        <Pauli as WireEnum>::from_value(value).map_err(|err| err.to_string())
    }
}

impl super::FromValue for Measurement {
    fn from_value(value: &Value) -> Result<Self, String> {
        <Measurement as WireEnum>::from_value(value).map_err(|err| err.to_string())
    }
}
