use std::hash::Hasher;

use chrono::{DateTime, Utc};
use fnv::FnvHasher;
use indexmap::IndexMap;

use crate::{
    metric::{time_to_nanos, write_series},
    IntoFieldValue, Metric, MetricError, Tag,
};

/// Groups individual field values into metrics by series and timestamp.
///
/// Inputs often produce one value at a time. The grouper collects every value sharing a measurement name, tag set,
/// and timestamp into a single metric, and hands the metrics back in the order each group was first seen.
#[derive(Clone, Debug, Default)]
pub struct SeriesGrouper {
    metrics: IndexMap<u64, Metric>,
}

impl SeriesGrouper {
    /// Creates a new, empty `SeriesGrouper`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a single field value to the metric for its series and timestamp.
    ///
    /// The metric is created the first time its group is seen, and later values are merged into it. As with
    /// [`Metric::add_field`], a later value for an existing field key overwrites the earlier one.
    ///
    /// # Errors
    ///
    /// If the metric needs to be created and fails validation, an error is returned and nothing is added.
    pub fn add<T, I, K, V>(
        &mut self,
        measurement: &str,
        tags: T,
        time: DateTime<Utc>,
        field: K,
        value: V,
    ) -> Result<(), MetricError>
    where
        T: IntoIterator<Item = I>,
        I: Into<Tag>,
        K: Into<String>,
        V: IntoFieldValue,
    {
        let mut tags: Vec<Tag> =
            tags.into_iter().map(Into::into).filter(|t: &Tag| !t.key().is_empty() && !t.value().is_empty()).collect();
        tags.sort_by(|a, b| a.key().cmp(b.key()));
        tags.dedup_by(|later, earlier| {
            // Keep the last value given for a duplicated key, as repeated `add_tag` calls would.
            if later.key() == earlier.key() {
                std::mem::swap(later, earlier);
                true
            } else {
                false
            }
        });

        let id = series_id(measurement, &tags, time_to_nanos(time));
        if let Some(metric) = self.metrics.get_mut(&id) {
            metric.add_field(field, value);
            return Ok(());
        }

        let metric = Metric::new(measurement, tags, [(field, value)], time)?;
        self.metrics.insert(id, metric);
        Ok(())
    }

    /// Merges every field of `metric` into the metric for its series and timestamp.
    pub fn add_metric(&mut self, metric: &Metric) {
        let id = series_id(metric.name(), metric.tag_list(), metric.unix_nano());
        match self.metrics.get_mut(&id) {
            Some(existing) => {
                for field in metric.field_list() {
                    existing.add_field(field.key(), field.value().clone());
                }
            }
            None => {
                self.metrics.insert(id, metric.clone());
            }
        }
    }

    /// Number of distinct groups seen so far.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Returns `true` if nothing has been added.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Gets the grouped metrics in the order their groups were first seen.
    pub fn metrics(&self) -> impl Iterator<Item = &Metric> {
        self.metrics.values()
    }

    /// Consumes the grouper, returning the grouped metrics in the order their groups were first seen.
    pub fn into_metrics(self) -> Vec<Metric> {
        self.metrics.into_values().collect()
    }
}

fn series_id(measurement: &str, tags: &[Tag], time: i64) -> u64 {
    let mut hasher = FnvHasher::default();
    write_series(&mut hasher, measurement, tags);
    hasher.write(b"\n");
    hasher.write(&time.to_be_bytes());
    hasher.finish()
}
