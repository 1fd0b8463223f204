use std::{fmt, hash::Hasher};

use chrono::{DateTime, TimeZone as _, Utc};
use fnv::FnvHasher;
use indexmap::IndexMap;
use thiserror::Error;

use crate::{FieldValue, IntoFieldValue, ValueType};

/// Errors that could occur while constructing a metric.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MetricError {
    /// The measurement name was empty.
    #[error("missing measurement name")]
    MissingName,

    /// A name, key, or tag value ended with a backslash.
    ///
    /// A trailing backslash would escape the delimiter that follows it in line protocol, so such metrics cannot be
    /// serialized faithfully.
    #[error("{part} cannot end with a backslash: {value:?}")]
    TrailingBackslash {
        /// Which part of the metric was invalid.
        part: &'static str,

        /// The offending value.
        value: String,
    },
}

/// A key/value pair describing the series a metric belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tag {
    key: String,
    value: String,
}

impl Tag {
    /// Creates a [`Tag`] from a key and value.
    pub fn new<K, V>(key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self { key: key.into(), value: value.into() }
    }

    /// Key of this tag.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Value of this tag.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Consumes this [`Tag`], returning the key and value.
    pub fn into_parts(self) -> (String, String) {
        (self.key, self.value)
    }
}

impl<K, V> From<(K, V)> for Tag
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(pair: (K, V)) -> Tag {
        Tag::new(pair.0, pair.1)
    }
}

/// A named value measured by a metric.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Field {
    key: String,
    value: FieldValue,
}

impl Field {
    /// Creates a [`Field`] from a key and an already-coerced value.
    pub fn new<K>(key: K, value: FieldValue) -> Self
    where
        K: Into<String>,
    {
        Self { key: key.into(), value }
    }

    /// Key of this field.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Value of this field.
    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    /// Consumes this [`Field`], returning the key and value.
    pub fn into_parts(self) -> (String, FieldValue) {
        (self.key, self.value)
    }
}

/// A single time-series data point.
///
/// A metric is a measurement name, a set of tags identifying the series, one or more fields holding the measured
/// values, and a timestamp with nanosecond resolution.
///
/// Tags are always kept sorted by key, so two metrics with the same tag set list their tags identically no matter the
/// order they were added in. Fields keep the order they were first added in. Both are unique by key: adding an
/// existing key overwrites the value in place.
///
/// A metric is not internally synchronized. Whichever stage of a pipeline owns it may mutate it, and hands it off to
/// the next stage by value.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Metric {
    pub(crate) name: String,
    pub(crate) tags: Vec<Tag>,
    pub(crate) fields: Vec<Field>,
    pub(crate) time: i64,
    pub(crate) value_type: ValueType,
    pub(crate) aggregate: bool,
}

impl Metric {
    /// Creates a new `Metric`.
    ///
    /// Tags with an empty key or value are skipped. Field values are coerced with [`IntoFieldValue`], and any value
    /// without a representation is skipped.
    ///
    /// # Errors
    ///
    /// If the name is empty, or if the name, any tag key or value, or any field key ends with a backslash, an error
    /// variant will be returned describing the problem.
    pub fn new<N, T, I, F, K, V>(name: N, tags: T, fields: F, time: DateTime<Utc>) -> Result<Self, MetricError>
    where
        N: Into<String>,
        T: IntoIterator<Item = I>,
        I: Into<Tag>,
        F: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: IntoFieldValue,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(MetricError::MissingName);
        }
        check_trailing_backslash("measurement name", &name)?;

        let mut metric = Self::with_parts(name, time_to_nanos(time), ValueType::Untyped);

        for tag in tags {
            let tag = tag.into();
            check_trailing_backslash("tag key", &tag.key)?;
            check_trailing_backslash("tag value", &tag.value)?;
            if tag.key.is_empty() || tag.value.is_empty() {
                continue;
            }
            metric.add_tag(tag.key, tag.value);
        }

        for (key, value) in fields {
            let key = key.into();
            check_trailing_backslash("field key", &key)?;
            metric.add_field(key, value);
        }

        Ok(metric)
    }

    pub(crate) fn with_parts(name: String, time: i64, value_type: ValueType) -> Self {
        Self { name, tags: Vec::new(), fields: Vec::new(), time, value_type, aggregate: false }
    }

    /// Creates a deep copy of another metric.
    ///
    /// Anything that dereferences to a `Metric`, such as a metric wrapped with delivery tracking, can be copied this
    /// way. The copy shares nothing with the original.
    pub fn from_metric<M>(other: &M) -> Self
    where
        M: AsRef<Metric> + ?Sized,
    {
        other.as_ref().clone()
    }

    /// Sets the value type of this metric.
    #[must_use]
    pub fn with_value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    /// Name of this metric.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the name of this metric.
    pub fn set_name<N>(&mut self, name: N)
    where
        N: Into<String>,
    {
        self.name = name.into();
    }

    /// Prepends `prefix` to the name of this metric.
    pub fn add_prefix(&mut self, prefix: &str) {
        self.name.insert_str(0, prefix);
    }

    /// Appends `suffix` to the name of this metric.
    pub fn add_suffix(&mut self, suffix: &str) {
        self.name.push_str(suffix);
    }

    /// Tags of this metric, sorted by key.
    pub fn tag_list(&self) -> &[Tag] {
        &self.tags
    }

    /// Tags of this metric as a map, sorted by key.
    pub fn tags(&self) -> IndexMap<&str, &str> {
        self.tags.iter().map(|t| (t.key(), t.value())).collect()
    }

    /// Adds a tag, overwriting the value if the key already exists.
    pub fn add_tag<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        let key = key.into();
        match self.tags.binary_search_by(|t| t.key.as_str().cmp(&key)) {
            Ok(i) => self.tags[i].value = value.into(),
            Err(i) => self.tags.insert(i, Tag { key, value: value.into() }),
        }
    }

    /// Removes a tag, returning its value if it existed.
    pub fn remove_tag(&mut self, key: &str) -> Option<String> {
        let i = self.tag_index(key)?;
        Some(self.tags.remove(i).value)
    }

    /// Returns `true` if this metric has a tag with the given key.
    pub fn has_tag(&self, key: &str) -> bool {
        self.tag_index(key).is_some()
    }

    /// Gets the value of a tag.
    pub fn get_tag(&self, key: &str) -> Option<&str> {
        self.tag_index(key).map(|i| self.tags[i].value())
    }

    fn tag_index(&self, key: &str) -> Option<usize> {
        self.tags.binary_search_by(|t| t.key.as_str().cmp(key)).ok()
    }

    /// Fields of this metric, in the order they were added.
    pub fn field_list(&self) -> &[Field] {
        &self.fields
    }

    /// Fields of this metric as a map, in the order they were added.
    pub fn fields(&self) -> IndexMap<&str, &FieldValue> {
        self.fields.iter().map(|f| (f.key(), f.value())).collect()
    }

    /// Adds a field, overwriting the value if the key already exists.
    ///
    /// The existing field keeps its position, even if the kind of its value changes. If `value` has no field
    /// representation, nothing happens.
    pub fn add_field<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: IntoFieldValue,
    {
        let Some(value) = value.into_field_value() else {
            return;
        };

        let key = key.into();
        match self.fields.iter_mut().find(|f| f.key == key) {
            Some(field) => field.value = value,
            None => self.fields.push(Field { key, value }),
        }
    }

    /// Removes a field, returning its value if it existed.
    pub fn remove_field(&mut self, key: &str) -> Option<FieldValue> {
        let i = self.fields.iter().position(|f| f.key == key)?;
        Some(self.fields.remove(i).value)
    }

    /// Returns `true` if this metric has a field with the given key.
    pub fn has_field(&self, key: &str) -> bool {
        self.fields.iter().any(|f| f.key == key)
    }

    /// Gets the value of a field.
    pub fn get_field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.key == key).map(Field::value)
    }

    /// Timestamp of this metric.
    pub fn time(&self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.time)
    }

    /// Sets the timestamp of this metric.
    ///
    /// Timestamps outside of the range representable as nanoseconds since the Unix epoch, roughly the years 1677
    /// through 2262, are clamped to that range.
    pub fn set_time(&mut self, time: DateTime<Utc>) {
        self.time = time_to_nanos(time);
    }

    /// Timestamp of this metric, in nanoseconds since the Unix epoch.
    pub fn unix_nano(&self) -> i64 {
        self.time
    }

    /// Sets the timestamp of this metric, in nanoseconds since the Unix epoch.
    pub fn set_unix_nano(&mut self, nanos: i64) {
        self.time = nanos;
    }

    /// Value type of this metric.
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Sets the value type of this metric.
    pub fn set_type(&mut self, value_type: ValueType) {
        self.value_type = value_type;
    }

    /// Returns `true` if this metric was produced by an aggregator.
    pub fn is_aggregate(&self) -> bool {
        self.aggregate
    }

    /// Marks whether this metric was produced by an aggregator.
    pub fn set_aggregate(&mut self, aggregate: bool) {
        self.aggregate = aggregate;
    }

    /// Gets an identifier for the series this metric belongs to.
    ///
    /// The identifier is a 64-bit FNV-1a hash over the name and tags only, so it is stable across processes and does
    /// not change when fields or the timestamp do.
    pub fn hash_id(&self) -> u64 {
        let mut hasher = FnvHasher::default();
        write_series(&mut hasher, &self.name, &self.tags);
        hasher.finish()
    }
}

impl AsRef<Metric> for Metric {
    fn as_ref(&self) -> &Metric {
        self
    }
}

impl AsMut<Metric> for Metric {
    fn as_mut(&mut self) -> &mut Metric {
        self
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{", self.name)?;
        for (i, tag) in self.tags.iter().enumerate() {
            let sep = if i == 0 { "" } else { ", " };
            write!(f, "{sep}{}={}", tag.key, tag.value)?;
        }
        f.write_str("} {")?;
        for (i, field) in self.fields.iter().enumerate() {
            let sep = if i == 0 { "" } else { ", " };
            write!(f, "{sep}{}={}", field.key, field.value)?;
        }
        write!(f, "}} {}", self.time)
    }
}

pub(crate) fn write_series<H: Hasher>(hasher: &mut H, name: &str, tags: &[Tag]) {
    hasher.write(name.as_bytes());
    hasher.write(b"\n");
    for tag in tags {
        hasher.write(tag.key.as_bytes());
        hasher.write(b"\n");
        hasher.write(tag.value.as_bytes());
        hasher.write(b"\n");
    }
}

pub(crate) fn time_to_nanos(time: DateTime<Utc>) -> i64 {
    match time.timestamp_nanos_opt() {
        Some(nanos) => nanos,
        None if time.timestamp() < 0 => i64::MIN,
        None => i64::MAX,
    }
}

fn check_trailing_backslash(part: &'static str, value: &str) -> Result<(), MetricError> {
    if value.ends_with('\\') {
        Err(MetricError::TrailingBackslash { part, value: value.to_owned() })
    } else {
        Ok(())
    }
}
