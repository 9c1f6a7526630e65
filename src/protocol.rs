use crate::error::{ReplicaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub type EntityId = u32;
pub type FieldName = String;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldKey {
    pub entity: EntityId,
    pub name: FieldName,
}

impl FieldKey {
    pub fn new(entity: EntityId, name: impl Into<FieldName>) -> Self {
        Self {
            entity,
            name: name.into(),
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity, self.name)
    }
}

/// Which side is authoritative for a field, as seen from the local registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Precedence {
    /// The host owns the value; followers accept pushes, the host rejects writes.
    Host = 0,
    /// The local client owns the value; the host accepts and fans it out.
    Client = 1,
    /// Never propagated through the change set.
    Informational = 2,
}

impl fmt::Display for Precedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precedence::Host => write!(f, "HOST"),
            Precedence::Client => write!(f, "CLIENT"),
            Precedence::Informational => write!(f, "INFORMATIONAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Operation {
    Add = 0,
    Remove = 1,
    Set = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Coordinates {
    Whole,
    Index(usize),
    Row(usize),
    Cell { row: usize, col: usize },
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coordinates::Whole => write!(f, "*"),
            Coordinates::Index(index) => write!(f, "[{}]", index),
            Coordinates::Row(row) => write!(f, "row {}", row),
            Coordinates::Cell { row, col } => write!(f, "({}, {})", row, col),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<FieldValue>),
    Map(HashMap<String, FieldValue>),
}

impl FieldValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "Null",
            FieldValue::Bool(_) => "Bool",
            FieldValue::U8(_) => "U8",
            FieldValue::U16(_) => "U16",
            FieldValue::U32(_) => "U32",
            FieldValue::U64(_) => "U64",
            FieldValue::I8(_) => "I8",
            FieldValue::I16(_) => "I16",
            FieldValue::I32(_) => "I32",
            FieldValue::I64(_) => "I64",
            FieldValue::F32(_) => "F32",
            FieldValue::F64(_) => "F64",
            FieldValue::String(_) => "String",
            FieldValue::Bytes(_) => "Bytes",
            FieldValue::Array(_) => "Array",
            FieldValue::Map(_) => "Map",
        }
    }
}

/// Shape-tagged wire form of one replicated field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireValue {
    Scalar(FieldValue),
    List(Vec<FieldValue>),
    Grid {
        rows: usize,
        cols: usize,
        cells: Vec<FieldValue>,
    },
}

impl WireValue {
    pub fn shape(&self) -> &'static str {
        match self {
            WireValue::Scalar(_) => "scalar",
            WireValue::List(_) => "list",
            WireValue::Grid { .. } => "grid",
        }
    }
}

/// Element types that can live inside a replicated field.
pub trait Replicable: Clone + PartialEq + Send + 'static {
    fn to_field_value(&self) -> FieldValue;
    fn from_field_value(value: &FieldValue) -> Result<Self>;

    /// Equality used by drift checks. NaN matches NaN so a float field can settle.
    fn same_value(&self, other: &Self) -> bool {
        self == other
    }
}

macro_rules! impl_replicable {
    ($($ty:ty => $variant:ident $(by $same:expr)?),* $(,)?) => {
        $(
            impl Replicable for $ty {
                fn to_field_value(&self) -> FieldValue {
                    FieldValue::$variant(self.clone())
                }

                fn from_field_value(value: &FieldValue) -> Result<Self> {
                    match value {
                        FieldValue::$variant(inner) => Ok(inner.clone()),
                        other => Err(ReplicaError::type_mismatch(
                            stringify!($variant),
                            other.type_name(),
                        )),
                    }
                }

                $(
                    fn same_value(&self, other: &Self) -> bool {
                        ($same)(self, other)
                    }
                )?
            }
        )*
    };
}

impl_replicable! {
    bool => Bool,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32 by |a: &f32, b: &f32| a == b || (a.is_nan() && b.is_nan()),
    f64 => F64 by |a: &f64, b: &f64| a == b || (a.is_nan() && b.is_nan()),
    String => String,
    Vec<u8> => Bytes,
}

impl Replicable for FieldValue {
    fn to_field_value(&self) -> FieldValue {
        self.clone()
    }

    fn from_field_value(value: &FieldValue) -> Result<Self> {
        Ok(value.clone())
    }

    fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldValue::F32(a), FieldValue::F32(b)) => a.same_value(b),
            (FieldValue::F64(a), FieldValue::F64(b)) => a.same_value(b),
            (FieldValue::Array(a), FieldValue::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_value(y))
            }
            (FieldValue::Map(a), FieldValue::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(key, x)| b.get(key).map_or(false, |y| x.same_value(y)))
            }
            _ => self == other,
        }
    }
}

pub(crate) fn decode_items<T: Replicable>(values: &[FieldValue]) -> Result<Vec<T>> {
    values.iter().map(T::from_field_value).collect()
}

pub(crate) fn encode_items<T: Replicable>(items: &[T]) -> Vec<FieldValue> {
    items.iter().map(Replicable::to_field_value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replicable_round_trip() {
        assert_eq!(i64::from_field_value(&42i64.to_field_value()).unwrap(), 42);
        assert_eq!(
            String::from_field_value(&"red".to_string().to_field_value()).unwrap(),
            "red"
        );
        assert!(bool::from_field_value(&FieldValue::Bool(true)).unwrap());
    }

    #[test]
    fn test_replicable_type_mismatch() {
        let err = u32::from_field_value(&FieldValue::String("7".to_string())).unwrap_err();
        match err {
            ReplicaError::TypeMismatch { expected, actual } => {
                assert_eq!(expected, "U32");
                assert_eq!(actual, "String");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_same_value_treats_nan_as_equal() {
        assert!(f64::NAN.same_value(&f64::NAN));
        assert!(!f32::NAN.same_value(&1.0));
        assert!(2.5f32.same_value(&2.5));

        let nested = FieldValue::Array(vec![FieldValue::F64(f64::NAN), FieldValue::U8(1)]);
        assert!(nested.same_value(&nested.clone()));
        assert!(!nested.same_value(&FieldValue::Array(vec![FieldValue::F64(f64::NAN)])));
    }

    #[test]
    fn test_field_key_display_and_order() {
        let mut keys = vec![
            FieldKey::new(7, "score"),
            FieldKey::new(2, "team"),
            FieldKey::new(7, "color"),
        ];
        keys.sort();

        assert_eq!(keys[0].to_string(), "2/team");
        assert_eq!(keys[1].to_string(), "7/color");
        assert_eq!(keys[2].to_string(), "7/score");
    }
}
