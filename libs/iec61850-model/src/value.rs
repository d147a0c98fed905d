//! Typed attribute values
//!
//! A [`Value`] is immutable once built: writes replace the stored value
//! wholesale. Every declared attribute type ([`BasicType`]) has a zero value
//! that freshly created attributes hold.

use chrono::{DateTime, Utc};
use errors::IedError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Quality
// ============================================================================

/// IEC 61850 quality bit-string (13 bits used)
///
/// Bits 0-1 carry the validity, the remaining bits are detail flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quality(u16);

impl Quality {
    pub const GOOD: Quality = Quality(0);
    pub const INVALID: Quality = Quality(0b10);
    pub const QUESTIONABLE: Quality = Quality(0b11);

    pub const OVERFLOW: u16 = 1 << 2;
    pub const OUT_OF_RANGE: u16 = 1 << 3;
    pub const BAD_REFERENCE: u16 = 1 << 4;
    pub const OSCILLATORY: u16 = 1 << 5;
    pub const FAILURE: u16 = 1 << 6;
    pub const OLD_DATA: u16 = 1 << 7;
    pub const INCONSISTENT: u16 = 1 << 8;
    pub const INACCURATE: u16 = 1 << 9;
    pub const SOURCE_SUBSTITUTED: u16 = 1 << 10;
    pub const TEST: u16 = 1 << 11;
    pub const OPERATOR_BLOCKED: u16 = 1 << 12;

    const MASK: u16 = 0x1FFF;

    /// Build from raw bits, ignoring bits above the 13 defined ones
    pub fn from_bits(bits: u16) -> Self {
        Quality(bits & Self::MASK)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn is_good(&self) -> bool {
        self.0 & 0b11 == 0
    }

    /// Return a copy with the given detail flag set
    ///
    /// ```
    /// # use iec61850_model::Quality;
    /// let q = Quality::GOOD.with_flag(Quality::OLD_DATA);
    /// assert!(q.has_flag(Quality::OLD_DATA));
    /// assert!(q.is_good());
    /// ```
    pub fn with_flag(self, flag: u16) -> Self {
        Self::from_bits(self.0 | flag)
    }

    pub fn has_flag(&self, flag: u16) -> bool {
        self.0 & flag != 0
    }
}

// ============================================================================
// DataAccessError
// ============================================================================

/// Data-access error codes as numbered by MMS
///
/// Sent to the peer in place of a value whenever a request fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataAccessError {
    ObjectInvalidated,
    HardwareFault,
    TemporarilyUnavailable,
    ObjectAccessDenied,
    ObjectUndefined,
    InvalidAddress,
    TypeUnsupported,
    TypeInconsistent,
    ObjectAttributeInconsistent,
    ObjectAccessUnsupported,
    ObjectNonExistent,
    ObjectValueInvalid,
}

impl DataAccessError {
    pub fn code(&self) -> u8 {
        match self {
            Self::ObjectInvalidated => 0,
            Self::HardwareFault => 1,
            Self::TemporarilyUnavailable => 2,
            Self::ObjectAccessDenied => 3,
            Self::ObjectUndefined => 4,
            Self::InvalidAddress => 5,
            Self::TypeUnsupported => 6,
            Self::TypeInconsistent => 7,
            Self::ObjectAttributeInconsistent => 8,
            Self::ObjectAccessUnsupported => 9,
            Self::ObjectNonExistent => 10,
            Self::ObjectValueInvalid => 11,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::ObjectInvalidated,
            1 => Self::HardwareFault,
            2 => Self::TemporarilyUnavailable,
            3 => Self::ObjectAccessDenied,
            4 => Self::ObjectUndefined,
            5 => Self::InvalidAddress,
            6 => Self::TypeUnsupported,
            7 => Self::TypeInconsistent,
            8 => Self::ObjectAttributeInconsistent,
            9 => Self::ObjectAccessUnsupported,
            10 => Self::ObjectNonExistent,
            11 => Self::ObjectValueInvalid,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ObjectInvalidated => "object-invalidated",
            Self::HardwareFault => "hardware-fault",
            Self::TemporarilyUnavailable => "temporarily-unavailable",
            Self::ObjectAccessDenied => "object-access-denied",
            Self::ObjectUndefined => "object-undefined",
            Self::InvalidAddress => "invalid-address",
            Self::TypeUnsupported => "type-unsupported",
            Self::TypeInconsistent => "type-inconsistent",
            Self::ObjectAttributeInconsistent => "object-attribute-inconsistent",
            Self::ObjectAccessUnsupported => "object-access-unsupported",
            Self::ObjectNonExistent => "object-non-existent",
            Self::ObjectValueInvalid => "object-value-invalid",
        }
    }

    /// Rebuild a client-side error for a request on `reference`
    pub fn into_error(self, reference: &str, fc: &str) -> IedError {
        match self {
            Self::ObjectNonExistent => IedError::not_found(reference),
            Self::ObjectAccessDenied => IedError::access_denied(reference, fc),
            Self::ObjectAccessUnsupported => IedError::read_only(reference),
            Self::TypeInconsistent => IedError::TypeMismatch {
                expected: "declared attribute type".to_string(),
                actual: "written value".to_string(),
            },
            Self::InvalidAddress => IedError::InvalidReference(reference.to_string()),
            Self::TemporarilyUnavailable => IedError::ConnectionClosing,
            other => IedError::Rejected {
                code: other.code(),
                name: other.as_str().to_string(),
            },
        }
    }
}

impl fmt::Display for DataAccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.code())
    }
}

impl From<&IedError> for DataAccessError {
    fn from(err: &IedError) -> Self {
        match err {
            IedError::NotFound { .. } => Self::ObjectNonExistent,
            IedError::TypeMismatch { .. } => Self::TypeInconsistent,
            IedError::AccessDenied { .. } => Self::ObjectAccessDenied,
            IedError::ReadOnly { .. } => Self::ObjectAccessUnsupported,
            IedError::InvalidReference(_) => Self::InvalidAddress,
            IedError::SubscriptionNotFound(_) => Self::ObjectUndefined,
            IedError::ConnectionClosing | IedError::Timeout(_) => Self::TemporarilyUnavailable,
            IedError::Protocol(_) | IedError::Serialization(_) => Self::ObjectValueInvalid,
            IedError::Rejected { code, .. } => {
                Self::from_code(*code).unwrap_or(Self::ObjectInvalidated)
            },
            _ => Self::HardwareFault,
        }
    }
}

// ============================================================================
// BasicType
// ============================================================================

/// Declared type of a basic data attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BasicType {
    Boolean,
    Float32,
    Integer32,
    VisibleString,
    UtcTimestamp,
    Quality,
}

impl BasicType {
    /// The value a freshly created attribute of this type holds
    pub fn zero(&self) -> Value {
        match self {
            Self::Boolean => Value::Boolean(false),
            Self::Float32 => Value::Float32(0.0),
            Self::Integer32 => Value::Integer32(0),
            Self::VisibleString => Value::VisibleString(String::new()),
            Self::UtcTimestamp => Value::UtcTimestamp(DateTime::<Utc>::UNIX_EPOCH),
            Self::Quality => Value::Quality(Quality::GOOD),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boolean => "BOOLEAN",
            Self::Float32 => "FLOAT32",
            Self::Integer32 => "INT32",
            Self::VisibleString => "VISIBLE_STRING",
            Self::UtcTimestamp => "UTC_TIME",
            Self::Quality => "QUALITY",
        }
    }
}

impl fmt::Display for BasicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Value
// ============================================================================

/// Attribute value as stored in the model and carried on the wire
///
/// Equality is by content: two `Float32` values are equal when their bit
/// patterns are, so a NaN equals itself and `0.0` differs from `-0.0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Boolean(bool),
    Float32(#[serde(with = "float32_wire")] f32),
    Integer32(i32),
    VisibleString(String),
    UtcTimestamp(DateTime<Utc>),
    Quality(Quality),
    DataAccessError(DataAccessError),
    Structured(Vec<Value>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Float32(a), Value::Float32(b)) => a.to_bits() == b.to_bits(),
            (Value::Integer32(a), Value::Integer32(b)) => a == b,
            (Value::VisibleString(a), Value::VisibleString(b)) => a == b,
            (Value::UtcTimestamp(a), Value::UtcTimestamp(b)) => a == b,
            (Value::Quality(a), Value::Quality(b)) => a == b,
            (Value::DataAccessError(a), Value::DataAccessError(b)) => a == b,
            (Value::Structured(a), Value::Structured(b)) => a == b,
            _ => false,
        }
    }
}

/// JSON has no literal for non-finite numbers; they travel as
/// `"NaN"`, `"inf"` and `"-inf"`.
mod float32_wire {
    use serde::de::{self, Deserializer};
    use serde::{Deserialize, Serializer};

    pub fn serialize<S: Serializer>(v: &f32, serializer: S) -> Result<S::Ok, S::Error> {
        if v.is_finite() {
            serializer.serialize_f32(*v)
        } else if v.is_nan() {
            serializer.serialize_str("NaN")
        } else if v.is_sign_positive() {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f32),
        Named(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(v) => Ok(v),
            Repr::Named(name) => match name.as_str() {
                "NaN" => Ok(f32::NAN),
                "inf" => Ok(f32::INFINITY),
                "-inf" => Ok(f32::NEG_INFINITY),
                other => Err(de::Error::invalid_value(
                    de::Unexpected::Str(other),
                    &"a number, \"NaN\", \"inf\" or \"-inf\"",
                )),
            },
        }
    }
}

impl Value {
    /// Declared type this value satisfies, `None` for structured and error values
    pub fn basic_type(&self) -> Option<BasicType> {
        match self {
            Value::Boolean(_) => Some(BasicType::Boolean),
            Value::Float32(_) => Some(BasicType::Float32),
            Value::Integer32(_) => Some(BasicType::Integer32),
            Value::VisibleString(_) => Some(BasicType::VisibleString),
            Value::UtcTimestamp(_) => Some(BasicType::UtcTimestamp),
            Value::Quality(_) => Some(BasicType::Quality),
            Value::DataAccessError(_) | Value::Structured(_) => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::DataAccessError(_) => "DATA_ACCESS_ERROR",
            Value::Structured(_) => "STRUCTURE",
            other => other.basic_type().map_or("UNKNOWN", |t| t.as_str()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::DataAccessError(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Float32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Integer32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::VisibleString(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::UtcTimestamp(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_quality(&self) -> Option<Quality> {
        match self {
            Value::Quality(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_structured(&self) -> Option<&[Value]> {
        match self {
            Value::Structured(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Integer32(v) => write!(f, "{v}"),
            Value::VisibleString(v) => write!(f, "\"{v}\""),
            Value::UtcTimestamp(v) => write!(f, "{}", v.to_rfc3339()),
            Value::Quality(q) => write!(f, "q:{:#06x}", q.bits()),
            Value::DataAccessError(e) => write!(f, "error: {e}"),
            Value::Structured(items) => {
                f.write_str("{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("}")
            },
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float32(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer32(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::VisibleString(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::VisibleString(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::UtcTimestamp(v)
    }
}

impl From<Quality> for Value {
    fn from(v: Quality) -> Self {
        Value::Quality(v)
    }
}

impl From<DataAccessError> for Value {
    fn from(v: DataAccessError) -> Self {
        Value::DataAccessError(v)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_zero_values() {
        assert_eq!(BasicType::Float32.zero(), Value::Float32(0.0));
        assert_eq!(BasicType::Boolean.zero(), Value::Boolean(false));
        assert_eq!(
            BasicType::VisibleString.zero(),
            Value::VisibleString(String::new())
        );
        assert_eq!(
            BasicType::UtcTimestamp.zero().as_timestamp().unwrap().timestamp(),
            0
        );
        assert!(BasicType::Quality.zero().as_quality().unwrap().is_good());
    }

    #[test]
    fn test_no_implicit_coercion() {
        // An integer is never an acceptable float and vice versa
        assert_ne!(Value::Integer32(1).basic_type(), Some(BasicType::Float32));
        assert_ne!(Value::Float32(1.0).basic_type(), Some(BasicType::Integer32));
        assert_eq!(Value::Structured(vec![]).basic_type(), None);
    }

    #[test]
    fn test_data_access_error_codes() {
        for code in 0..=11 {
            let err = DataAccessError::from_code(code).unwrap();
            assert_eq!(err.code(), code);
        }
        assert!(DataAccessError::from_code(12).is_none());
        assert_eq!(DataAccessError::ObjectNonExistent.code(), 10);
        assert_eq!(DataAccessError::ObjectValueInvalid.as_str(), "object-value-invalid");
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(
            DataAccessError::from(&IedError::not_found("Battery/ZBAT.NoSuchAttr")),
            DataAccessError::ObjectNonExistent
        );
        assert_eq!(
            DataAccessError::from(&IedError::access_denied("x", "MX")),
            DataAccessError::ObjectAccessDenied
        );
        assert_eq!(
            DataAccessError::from(&IedError::read_only("x")),
            DataAccessError::ObjectAccessUnsupported
        );
        assert!(matches!(
            DataAccessError::ObjectNonExistent.into_error("a/b.c", "ST"),
            IedError::NotFound { .. }
        ));
        assert!(matches!(
            DataAccessError::HardwareFault.into_error("a/b.c", "ST"),
            IedError::Rejected { code: 1, .. }
        ));
    }

    #[test]
    fn test_quality_flags() {
        let q = Quality::INVALID.with_flag(Quality::FAILURE);
        assert!(!q.is_good());
        assert!(q.has_flag(Quality::FAILURE));
        assert!(!q.has_flag(Quality::OVERFLOW));
        assert_eq!(Quality::from_bits(0xFFFF).bits(), 0x1FFF);
    }

    #[test]
    fn test_value_json_shape() {
        let json = serde_json::to_string(&Value::Float32(1.5)).unwrap();
        assert_eq!(json, r#"{"type":"float32","value":1.5}"#);
        let back: Value = serde_json::from_str(r#"{"type":"visible_string","value":"NewBattery"}"#)
            .unwrap();
        assert_eq!(back, Value::from("NewBattery"));
        let err = serde_json::to_string(&Value::from(DataAccessError::ObjectNonExistent)).unwrap();
        assert!(err.contains("object-non-existent"));
    }

    #[test]
    fn test_non_finite_floats_on_the_wire() {
        let json = serde_json::to_string(&Value::Float32(f32::NAN)).unwrap();
        assert_eq!(json, r#"{"type":"float32","value":"NaN"}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert!(back.as_f32().unwrap().is_nan());
        assert_eq!(back, Value::Float32(f32::NAN));

        for v in [f32::INFINITY, f32::NEG_INFINITY] {
            let json = serde_json::to_string(&Value::Float32(v)).unwrap();
            let back: Value = serde_json::from_str(&json).unwrap();
            assert_eq!(back, Value::Float32(v));
        }

        assert!(serde_json::from_str::<Value>(r#"{"type":"float32","value":"lots"}"#).is_err());
        assert!(serde_json::from_str::<Value>(r#"{"type":"float32","value":null}"#).is_err());
    }

    #[test]
    fn test_float_equality_is_by_content() {
        assert_eq!(Value::Float32(f32::NAN), Value::Float32(f32::NAN));
        assert_ne!(Value::Float32(0.0), Value::Float32(f32::NAN));
        assert_ne!(Value::Float32(0.0), Value::Float32(-0.0));
        assert_eq!(
            Value::Structured(vec![Value::Float32(f32::NAN)]),
            Value::Structured(vec![Value::Float32(f32::NAN)])
        );
    }

    #[test]
    fn test_display() {
        let v = Value::Structured(vec![Value::Float32(1.5), Value::Boolean(true)]);
        assert_eq!(v.to_string(), "{1.5, true}");
    }
}
