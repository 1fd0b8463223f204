use std::fmt;

use chrono::{DateTime, TimeZone as _, Utc};

use crate::{metric::time_to_nanos, Field, IntoFieldValue, Metric, MetricError, Precision, ValueType};

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Builds metrics incrementally.
///
/// Unless a time is set explicitly, each built metric is stamped with the current time of the builder's clock,
/// truncated to the configured precision. The builder can be [`reset`](Builder::reset) and reused.
pub struct Builder {
    clock: Clock,
    precision: Precision,
    name: String,
    tags: Vec<(String, String)>,
    fields: Vec<Field>,
    time: Option<i64>,
    value_type: ValueType,
}

impl Builder {
    /// Creates a new [`Builder`] stamping metrics with the system clock at nanosecond precision.
    pub fn new() -> Self {
        Self {
            clock: Box::new(Utc::now),
            precision: Precision::Nanosecond,
            name: String::new(),
            tags: Vec::new(),
            fields: Vec::new(),
            time: None,
            value_type: ValueType::Untyped,
        }
    }

    /// Sets the clock used to stamp metrics built without an explicit time.
    ///
    /// Defaults to the system clock.
    #[must_use]
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Box::new(clock);
        self
    }

    /// Sets the precision that clock readings are truncated to.
    ///
    /// Explicitly set times are never truncated.
    ///
    /// Defaults to nanoseconds.
    #[must_use]
    pub fn with_time_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    /// Sets the name of the metric.
    pub fn set_name<N>(&mut self, name: N) -> &mut Self
    where
        N: Into<String>,
    {
        self.name = name.into();
        self
    }

    /// Adds a tag to the metric.
    pub fn add_tag<K, V>(&mut self, key: K, value: V) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.tags.push((key.into(), value.into()));
        self
    }

    /// Adds a field to the metric.
    ///
    /// Values without a field representation are dropped.
    pub fn add_field<K, V>(&mut self, key: K, value: V) -> &mut Self
    where
        K: Into<String>,
        V: IntoFieldValue,
    {
        if let Some(value) = value.into_field_value() {
            self.fields.push(Field::new(key, value));
        }
        self
    }

    /// Sets the time of the metric.
    pub fn set_time(&mut self, time: DateTime<Utc>) -> &mut Self {
        self.time = Some(time_to_nanos(time));
        self
    }

    /// Sets the value type of the metric.
    pub fn set_type(&mut self, value_type: ValueType) -> &mut Self {
        self.value_type = value_type;
        self
    }

    /// Clears everything set on the builder so far, keeping its clock and precision.
    pub fn reset(&mut self) {
        self.name.clear();
        self.tags.clear();
        self.fields.clear();
        self.time = None;
        self.value_type = ValueType::Untyped;
    }

    /// Builds a metric from everything set so far.
    ///
    /// The builder is left untouched, so the same metric can be built again or extended further.
    ///
    /// # Errors
    ///
    /// The same validation as [`Metric::new`] applies: an empty name, or a name, tag, or field key ending in a
    /// backslash, results in an error.
    pub fn metric(&self) -> Result<Metric, MetricError> {
        let time = self.time.unwrap_or_else(|| self.precision.truncate(time_to_nanos((self.clock)())));

        let mut metric = Metric::new(
            self.name.as_str(),
            self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            self.fields.iter().map(|f| (f.key(), f.value().clone())),
            Utc.timestamp_nanos(time),
        )?;
        metric.set_type(self.value_type);
        Ok(metric)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("precision", &self.precision)
            .field("name", &self.name)
            .field("tags", &self.tags)
            .field("fields", &self.fields)
            .field("time", &self.time)
            .field("value_type", &self.value_type)
            .finish_non_exhaustive()
    }
}
