use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

use telemetry_metric::Metric;

use crate::{TrackedMetric, TrackingData, TrackingId};

/// A metric that can be handed to an output and then settled.
///
/// Pipeline stages can be generic over this trait to handle plain and tracked metrics alike. For a plain [`Metric`]
/// every disposition is a no-op.
pub trait Delivery: AsRef<Metric> + AsMut<Metric> + Sized {
    /// Marks the metric as successfully written.
    fn accept(self);

    /// Marks the metric as failed to write.
    fn reject(self);

    /// Releases the metric without counting it as accepted or rejected.
    fn discard(self);

    /// Identifier of the tracking state attached to this metric, if any.
    fn tracking_id(&self) -> Option<TrackingId>;

    /// Consumes the metric, returning the inner metric and its tracking state, if any, without releasing it.
    fn into_parts(self) -> (Metric, Option<Arc<TrackingData>>);
}

impl Delivery for Metric {
    fn accept(self) {}

    fn reject(self) {}

    fn discard(self) {}

    fn tracking_id(&self) -> Option<TrackingId> {
        None
    }

    fn into_parts(self) -> (Metric, Option<Arc<TrackingData>>) {
        (self, None)
    }
}

impl Delivery for TrackedMetric {
    fn accept(self) {
        TrackedMetric::accept(self);
    }

    fn reject(self) {
        TrackedMetric::reject(self);
    }

    fn discard(self) {
        TrackedMetric::discard(self);
    }

    fn tracking_id(&self) -> Option<TrackingId> {
        Some(TrackedMetric::tracking_id(self))
    }

    fn into_parts(self) -> (Metric, Option<Arc<TrackingData>>) {
        let (metric, data) = TrackedMetric::into_parts(self);
        (metric, Some(data))
    }
}

/// A metric restored from its byte form, with its tracking re-attached if it had any.
#[derive(Clone, Debug)]
pub enum QueuedMetric {
    /// A metric that was not tracked.
    Plain(Metric),

    /// A tracked metric.
    Tracked(TrackedMetric),
}

impl QueuedMetric {
    /// Returns `true` if this metric is tracked.
    pub fn is_tracked(&self) -> bool {
        matches!(self, QueuedMetric::Tracked(_))
    }
}

impl From<Metric> for QueuedMetric {
    fn from(metric: Metric) -> Self {
        QueuedMetric::Plain(metric)
    }
}

impl From<TrackedMetric> for QueuedMetric {
    fn from(metric: TrackedMetric) -> Self {
        QueuedMetric::Tracked(metric)
    }
}

impl Deref for QueuedMetric {
    type Target = Metric;

    fn deref(&self) -> &Metric {
        self.as_ref()
    }
}

impl DerefMut for QueuedMetric {
    fn deref_mut(&mut self) -> &mut Metric {
        self.as_mut()
    }
}

impl AsRef<Metric> for QueuedMetric {
    fn as_ref(&self) -> &Metric {
        match self {
            QueuedMetric::Plain(m) => m,
            QueuedMetric::Tracked(m) => m,
        }
    }
}

impl AsMut<Metric> for QueuedMetric {
    fn as_mut(&mut self) -> &mut Metric {
        match self {
            QueuedMetric::Plain(m) => m,
            QueuedMetric::Tracked(m) => m,
        }
    }
}

impl Delivery for QueuedMetric {
    fn accept(self) {
        if let QueuedMetric::Tracked(m) = self {
            m.accept();
        }
    }

    fn reject(self) {
        if let QueuedMetric::Tracked(m) = self {
            m.reject();
        }
    }

    fn discard(self) {}

    fn tracking_id(&self) -> Option<TrackingId> {
        match self {
            QueuedMetric::Plain(_) => None,
            QueuedMetric::Tracked(m) => Some(m.tracking_id()),
        }
    }

    fn into_parts(self) -> (Metric, Option<Arc<TrackingData>>) {
        match self {
            QueuedMetric::Plain(m) => (m, None),
            QueuedMetric::Tracked(m) => Delivery::into_parts(m),
        }
    }
}
