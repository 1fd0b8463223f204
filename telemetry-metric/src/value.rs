use std::fmt;

/// The value of a single field.
///
/// Every field value handed to a [`Metric`](crate::Metric) is coerced into one of these kinds: signed integers widen
/// to `Int`, unsigned integers widen to `Uint`, `f32` widens to `Float`, and byte strings become `String`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldValue {
    /// A 64-bit floating-point value.
    Float(f64),

    /// A signed 64-bit integer.
    Int(i64),

    /// An unsigned 64-bit integer.
    Uint(u64),

    /// A boolean.
    Bool(bool),

    /// A string.
    String(String),
}

impl FieldValue {
    /// Returns the value as an `f64`, if it is numeric.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Uint(v) => Some(*v as f64),
            FieldValue::Bool(_) | FieldValue::String(_) => None,
        }
    }

    /// Returns the value as a string slice, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns `true` if this value can be written as line protocol.
    ///
    /// Only non-finite floats (NaN and the infinities) have no representation.
    pub fn is_serializable(&self) -> bool {
        match self {
            FieldValue::Float(v) => v.is_finite(),
            _ => true,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Int(v) => write!(f, "{v}i"),
            FieldValue::Uint(v) => write!(f, "{v}u"),
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::String(v) => write!(f, "{v:?}"),
        }
    }
}

/// A value that may be coerced into a [`FieldValue`].
///
/// Coercion never fails loudly: kinds without a field representation, such as an absent `Option`, yield `None` and
/// the field is left out of the metric.
pub trait IntoFieldValue {
    /// Consumes this value, turning it into a [`FieldValue`] if it has a representation.
    fn into_field_value(self) -> Option<FieldValue>;
}

impl IntoFieldValue for FieldValue {
    fn into_field_value(self) -> Option<FieldValue> {
        Some(self)
    }
}

macro_rules! into_field_value {
    ($variant:ident, $target:ty, $($ty:ty),+) => {
        $(
            impl IntoFieldValue for $ty {
                fn into_field_value(self) -> Option<FieldValue> {
                    Some(FieldValue::$variant(<$target>::from(self)))
                }
            }
        )+
    };
}

into_field_value!(Int, i64, i8, i16, i32, i64);
into_field_value!(Uint, u64, u8, u16, u32, u64);
into_field_value!(Float, f64, f32, f64);
into_field_value!(Bool, bool, bool);
into_field_value!(String, String, String, &str, &String);

impl IntoFieldValue for isize {
    fn into_field_value(self) -> Option<FieldValue> {
        i64::try_from(self).ok().map(FieldValue::Int)
    }
}

impl IntoFieldValue for usize {
    fn into_field_value(self) -> Option<FieldValue> {
        u64::try_from(self).ok().map(FieldValue::Uint)
    }
}

impl IntoFieldValue for Vec<u8> {
    fn into_field_value(self) -> Option<FieldValue> {
        Some(FieldValue::String(String::from_utf8(self).unwrap_or_else(|e| {
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        })))
    }
}

impl IntoFieldValue for &[u8] {
    fn into_field_value(self) -> Option<FieldValue> {
        Some(FieldValue::String(String::from_utf8_lossy(self).into_owned()))
    }
}

impl<T> IntoFieldValue for Option<T>
where
    T: IntoFieldValue,
{
    fn into_field_value(self) -> Option<FieldValue> {
        self.and_then(IntoFieldValue::into_field_value)
    }
}

impl<T> IntoFieldValue for Box<T>
where
    T: IntoFieldValue,
{
    fn into_field_value(self) -> Option<FieldValue> {
        (*self).into_field_value()
    }
}

/// The kind of measurement a metric represents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ValueType {
    /// No particular kind.
    #[default]
    Untyped,

    /// A monotonically increasing count.
    Counter,

    /// A point-in-time value.
    Gauge,

    /// A summary of observations, typically with quantiles.
    Summary,

    /// A distribution of observations in buckets.
    Histogram,
}

impl ValueType {
    /// Gets the string form of this `ValueType`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Untyped => "untyped",
            ValueType::Counter => "counter",
            ValueType::Gauge => "gauge",
            ValueType::Summary => "summary",
            ValueType::Histogram => "histogram",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
