use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

use telemetry_metric::Metric;

use crate::{DeliveryInfo, TrackingData, TrackingId};

/// A metric whose delivery is reported back to the input that produced it.
///
/// Every clone holds a reference on the shared [`TrackingData`]. A reference is released exactly once, either by
/// [`accept`](TrackedMetric::accept), by [`reject`](TrackedMetric::reject), or by dropping the metric. Once every
/// reference is released the notify callback runs with the final counts.
#[derive(Debug)]
pub struct TrackedMetric {
    metric: Metric,
    reference: Reference,
}

/// One reference on the tracking state, released on drop unless it has been handed off.
#[derive(Debug)]
struct Reference {
    data: Arc<TrackingData>,
    held: bool,
}

impl Reference {
    fn into_inner(mut self) -> Arc<TrackingData> {
        self.held = false;
        Arc::clone(&self.data)
    }
}

impl Drop for Reference {
    fn drop(&mut self) {
        if self.held {
            self.data.release();
        }
    }
}

impl TrackedMetric {
    pub(crate) fn from_parts(metric: Metric, data: Arc<TrackingData>) -> Self {
        Self { metric, reference: Reference { data, held: true } }
    }

    /// Identifier of the tracked metric, or of the group it belongs to.
    pub fn tracking_id(&self) -> TrackingId {
        self.reference.data.id()
    }

    /// Gets the tracking state shared with every other copy of this metric.
    pub fn tracking_data(&self) -> &Arc<TrackingData> {
        &self.reference.data
    }

    /// Marks this copy as successfully written.
    pub fn accept(self) {
        let (_, data) = self.into_parts();
        data.accept();
    }

    /// Marks this copy as failed to write.
    pub fn reject(self) {
        let (_, data) = self.into_parts();
        data.reject();
    }

    /// Releases this copy without counting it as accepted or rejected.
    ///
    /// Equivalent to dropping it.
    pub fn discard(self) {}

    /// Consumes this metric, returning the inner metric and the tracking state without releasing the reference.
    ///
    /// The caller becomes responsible for the reference. It is released again by rebuilding a tracked metric from
    /// the parts, for example through [`TrackingStore::from_bytes`](crate::TrackingStore::from_bytes).
    pub fn into_parts(self) -> (Metric, Arc<TrackingData>) {
        let Self { metric, reference } = self;
        (metric, reference.into_inner())
    }
}

impl Clone for TrackedMetric {
    fn clone(&self) -> Self {
        self.reference.data.acquire();
        Self::from_parts(self.metric.clone(), Arc::clone(&self.reference.data))
    }
}

impl Deref for TrackedMetric {
    type Target = Metric;

    fn deref(&self) -> &Metric {
        &self.metric
    }
}

impl DerefMut for TrackedMetric {
    fn deref_mut(&mut self) -> &mut Metric {
        &mut self.metric
    }
}

impl AsRef<Metric> for TrackedMetric {
    fn as_ref(&self) -> &Metric {
        &self.metric
    }
}

impl AsMut<Metric> for TrackedMetric {
    fn as_mut(&mut self) -> &mut Metric {
        &mut self.metric
    }
}

/// Wraps `metric` so that `notify` is called once it has been delivered.
///
/// `notify` runs exactly once, after the returned metric and every clone of it have been accepted, rejected, or
/// dropped. It runs on whichever thread releases the last reference.
pub fn with_tracking<F>(metric: Metric, notify: F) -> TrackedMetric
where
    F: Fn(DeliveryInfo) + Send + Sync + 'static,
{
    let data = TrackingData::new(1, Box::new(notify));
    TrackedMetric::from_parts(metric, Arc::new(data))
}

/// Wraps every metric of a batch so that `notify` is called once the whole batch has been delivered.
///
/// All of the returned metrics share one tracking id, and `notify` runs exactly once, after all of them and any
/// clones have been accepted, rejected, or dropped. If `metrics` is empty, `notify` runs immediately, reporting
/// nothing accepted and nothing rejected.
pub fn with_group_tracking<I, F>(metrics: I, notify: F) -> (Vec<TrackedMetric>, TrackingId)
where
    I: IntoIterator<Item = Metric>,
    F: Fn(DeliveryInfo) + Send + Sync + 'static,
{
    let metrics: Vec<Metric> = metrics.into_iter().collect();
    let data = Arc::new(TrackingData::new(metrics.len(), Box::new(notify)));
    let id = data.id();

    if metrics.is_empty() {
        data.notify();
        return (Vec::new(), id);
    }

    let tracked = metrics.into_iter().map(|m| TrackedMetric::from_parts(m, Arc::clone(&data))).collect();
    (tracked, id)
}
