use std::{collections::HashMap, sync::Arc};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use telemetry_metric::Metric;
use thiserror::Error;
use tracing::debug;

use crate::{Delivery, QueuedMetric, TrackedMetric, TrackingData, TrackingId};

static GLOBAL: Lazy<TrackingStore> = Lazy::new(TrackingStore::new);

/// Errors that could occur while converting a metric to or from its byte form.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The metric could not be encoded.
    #[error("failed to encode metric: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// The bytes could not be decoded as a metric.
    #[error("failed to decode metric: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// The metric was tracked, but its tracking state is unknown to this store or has already been restored.
    ///
    /// The metric should be skipped: whoever is waiting on its delivery has either been notified already or never
    /// will be through this store.
    #[error("unknown tracking id {0}, skipping metric")]
    SkipTracking(TrackingId),
}

impl StoreError {
    /// Returns `true` if the metric should be skipped rather than treated as a failure.
    pub fn is_skip(&self) -> bool {
        matches!(self, StoreError::SkipTracking(_))
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope<M> {
    metric: M,
    tracking_id: Option<TrackingId>,
}

/// Converts metrics to and from bytes, keeping their tracking state in memory while the bytes are stored elsewhere.
///
/// Writing a tracked metric hands its reference over to the store, keyed by tracking id. Reading it back
/// re-attaches the tracking state, so accepting or rejecting the restored metric settles the original reference.
/// Once the last outstanding reference for an id has been restored, the id is forgotten, and reading it again
/// yields [`StoreError::SkipTracking`].
#[derive(Debug, Default)]
pub struct TrackingStore {
    table: Mutex<HashMap<TrackingId, Arc<TrackingData>>>,
}

impl TrackingStore {
    /// Creates a new, empty `TrackingStore`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the store shared by the whole process.
    pub fn global() -> &'static TrackingStore {
        &GLOBAL
    }

    /// Number of tracking ids with references held by the store.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Returns `true` if the store holds no references.
    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    /// Encodes `metric` into bytes.
    ///
    /// If the metric is tracked, its reference is handed over to the store until it is restored by
    /// [`from_bytes`](TrackingStore::from_bytes).
    ///
    /// # Errors
    ///
    /// If the metric cannot be encoded, an error is returned and `metric` is dropped, releasing its reference as
    /// [`Delivery::discard`] would.
    pub fn to_bytes<D>(&self, metric: D) -> Result<Vec<u8>, StoreError>
    where
        D: Delivery,
    {
        let envelope = Envelope { metric: metric.as_ref(), tracking_id: metric.tracking_id() };
        let bytes = rmp_serde::to_vec_named(&envelope)?;

        if let (_, Some(data)) = metric.into_parts() {
            self.table.lock().insert(data.id(), data);
        }
        Ok(bytes)
    }

    /// Decodes a metric from bytes produced by [`to_bytes`](TrackingStore::to_bytes).
    ///
    /// A tracked metric comes back with its tracking state re-attached.
    ///
    /// # Errors
    ///
    /// If the bytes cannot be decoded, an error is returned. If the metric was tracked but its tracking id is not
    /// held by this store, [`StoreError::SkipTracking`] is returned.
    pub fn from_bytes(&self, bytes: &[u8]) -> Result<QueuedMetric, StoreError> {
        let Envelope { metric, tracking_id } = rmp_serde::from_slice::<Envelope<Metric>>(bytes)?;
        let Some(id) = tracking_id else {
            return Ok(QueuedMetric::Plain(metric));
        };

        let mut table = self.table.lock();
        let Some(data) = table.get(&id).cloned() else {
            debug!(tracking_id = %id, "Tracking id not found, skipping metric.");
            return Err(StoreError::SkipTracking(id));
        };

        // Other copies stored under the same id still need the entry.
        if data.ref_count() <= 1 {
            table.remove(&id);
        }

        Ok(QueuedMetric::Tracked(TrackedMetric::from_parts(metric, data)))
    }
}

/// Encodes `metric` into bytes using the [global](TrackingStore::global) store.
///
/// # Errors
///
/// See [`TrackingStore::to_bytes`].
pub fn to_bytes<D>(metric: D) -> Result<Vec<u8>, StoreError>
where
    D: Delivery,
{
    TrackingStore::global().to_bytes(metric)
}

/// Decodes a metric from bytes using the [global](TrackingStore::global) store.
///
/// # Errors
///
/// See [`TrackingStore::from_bytes`].
pub fn from_bytes(bytes: &[u8]) -> Result<QueuedMetric, StoreError> {
    TrackingStore::global().from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone as _, Utc};
    use parking_lot::Mutex;
    use telemetry_metric::{FieldValue, Metric, ValueType};

    use super::{StoreError, TrackingStore};
    use crate::{with_group_tracking, with_tracking, Delivery, DeliveryInfo};

    fn metric() -> Metric {
        Metric::new(
            "cpu",
            [("host", "localhost"), ("region", "us-east")],
            [
                ("idle", FieldValue::Float(98.5)),
                ("procs", FieldValue::Int(312)),
                ("bytes", FieldValue::Uint(u64::MAX)),
                ("up", FieldValue::Bool(true)),
                ("state", FieldValue::String("running".to_owned())),
            ],
            Utc.timestamp_nanos(1_481_032_190_000_000_000),
        )
        .unwrap()
        .with_value_type(ValueType::Gauge)
    }

    fn recorder() -> (Arc<Mutex<Vec<DeliveryInfo>>>, impl Fn(DeliveryInfo) + Send + Sync + 'static) {
        let notified = Arc::new(Mutex::new(Vec::new()));
        let inner = Arc::clone(&notified);
        (notified, move |info| inner.lock().push(info))
    }

    #[test]
    fn plain_round_trip() {
        let store = TrackingStore::new();
        let bytes = store.to_bytes(metric()).unwrap();
        assert!(store.is_empty());

        let restored = store.from_bytes(&bytes).unwrap();
        assert!(!restored.is_tracked());
        assert_eq!(restored.as_ref(), &metric());
    }

    #[test]
    fn tracked_round_trip() {
        let store = TrackingStore::new();
        let (notified, notify) = recorder();
        let tracked = with_tracking(metric(), notify);
        let id = tracked.tracking_id();

        let bytes = store.to_bytes(tracked).unwrap();
        assert_eq!(store.len(), 1);
        assert!(notified.lock().is_empty());

        let restored = store.from_bytes(&bytes).unwrap();
        assert_eq!(restored.tracking_id(), Some(id));
        assert_eq!(restored.as_ref(), &metric());
        assert!(store.is_empty());

        restored.accept();
        let notified = notified.lock();
        assert_eq!(notified.len(), 1);
        assert_eq!((notified[0].id(), notified[0].accepted()), (id, 1));
    }

    #[test]
    fn restoring_twice_is_skipped() {
        let store = TrackingStore::new();
        let tracked = with_tracking(metric(), |_| {});
        let id = tracked.tracking_id();
        let bytes = store.to_bytes(tracked).unwrap();

        let restored = store.from_bytes(&bytes).unwrap();
        let err = store.from_bytes(&bytes).unwrap_err();
        assert!(err.is_skip());
        assert!(matches!(err, StoreError::SkipTracking(skipped) if skipped == id));
        restored.discard();
    }

    #[test]
    fn copies_share_an_entry() {
        let store = TrackingStore::new();
        let (notified, notify) = recorder();
        let tracked = with_tracking(metric(), notify);
        let copy = tracked.clone();

        let first = store.to_bytes(tracked).unwrap();
        let second = store.to_bytes(copy).unwrap();
        assert_eq!(store.len(), 1);

        store.from_bytes(&first).unwrap().accept();
        assert_eq!(store.len(), 1);
        assert!(notified.lock().is_empty());

        store.from_bytes(&second).unwrap().reject();
        assert!(store.is_empty());

        let notified = notified.lock();
        assert_eq!(notified.len(), 1);
        assert_eq!((notified[0].accepted(), notified[0].rejected()), (1, 1));
    }

    #[test]
    fn group_members_restore_independently() {
        let store = TrackingStore::new();
        let (notified, notify) = recorder();
        let (metrics, id) = with_group_tracking([metric(), metric(), metric()], notify);

        let encoded: Vec<_> = metrics.into_iter().map(|m| store.to_bytes(m).unwrap()).collect();
        for bytes in &encoded {
            let restored = store.from_bytes(bytes).unwrap();
            assert_eq!(restored.tracking_id(), Some(id));
            restored.accept();
        }

        assert!(store.is_empty());
        assert_eq!(notified.lock()[0].accepted(), 3);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let store = TrackingStore::new();
        let err = store.from_bytes(b"not a metric").unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
        assert!(!err.is_skip());
    }

    #[test]
    fn global_store() {
        let (notified, notify) = recorder();
        let bytes = super::to_bytes(with_tracking(metric(), notify)).unwrap();
        super::from_bytes(&bytes).unwrap().reject();
        assert!(!notified.lock()[0].delivered());
    }
}
