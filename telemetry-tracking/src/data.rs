use std::{
    fmt,
    sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering},
};

use serde::{Deserialize, Serialize};
use tracing::{error, trace};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a tracked metric or tracked group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackingId(u64);

impl TrackingId {
    pub(crate) fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Gets the raw value of this identifier.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TrackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The outcome of delivering a tracked metric or tracked group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeliveryInfo {
    id: TrackingId,
    accepted: u32,
    rejected: u32,
}

impl DeliveryInfo {
    /// Identifier of the tracked metric or group.
    pub fn id(&self) -> TrackingId {
        self.id
    }

    /// Number of times a copy was accepted.
    pub fn accepted(&self) -> u32 {
        self.accepted
    }

    /// Number of times a copy was rejected.
    pub fn rejected(&self) -> u32 {
        self.rejected
    }

    /// Returns `true` if no copy was rejected.
    pub fn delivered(&self) -> bool {
        self.rejected == 0
    }
}

pub(crate) type NotifyFn = Box<dyn Fn(DeliveryInfo) + Send + Sync>;

/// Delivery state shared by every copy of a tracked metric, or every member of a tracked group.
///
/// Each live copy holds one reference. When the last reference is released the notify callback runs, once, on the
/// thread that released it.
pub struct TrackingData {
    id: TrackingId,
    refs: AtomicUsize,
    accepted: AtomicU32,
    rejected: AtomicU32,
    notify: NotifyFn,
}

impl TrackingData {
    pub(crate) fn new(refs: usize, notify: NotifyFn) -> Self {
        Self {
            id: TrackingId::next(),
            refs: AtomicUsize::new(refs),
            accepted: AtomicU32::new(0),
            rejected: AtomicU32::new(0),
            notify,
        }
    }

    /// Identifier of this tracked metric or group.
    pub fn id(&self) -> TrackingId {
        self.id
    }

    /// Number of references not yet released.
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// Snapshot of the delivery counters.
    pub fn info(&self) -> DeliveryInfo {
        DeliveryInfo {
            id: self.id,
            accepted: self.accepted.load(Ordering::Acquire),
            rejected: self.rejected.load(Ordering::Acquire),
        }
    }

    pub(crate) fn acquire(&self) {
        self.refs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn accept(&self) {
        self.accepted.fetch_add(1, Ordering::AcqRel);
        self.release();
    }

    pub(crate) fn reject(&self) {
        self.rejected.fetch_add(1, Ordering::AcqRel);
        self.release();
    }

    /// Releases one reference, notifying if it was the last.
    ///
    /// # Panics
    ///
    /// Panics if every reference has already been released.
    pub(crate) fn release(&self) {
        let previous = self.refs.fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| refs.checked_sub(1));
        match previous {
            Ok(1) => self.notify(),
            Ok(_) => {}
            Err(_) => panic!("negative reference count for tracking id {}", self.id),
        }
    }

    /// Runs the notify callback. Only called once the reference count has reached zero.
    pub(crate) fn notify(&self) {
        let info = self.info();
        trace!(tracking_id = %info.id, accepted = info.accepted, rejected = info.rejected, "Delivery complete.");
        (self.notify)(info);
    }
}

impl fmt::Debug for TrackingData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingData")
            .field("id", &self.id)
            .field("refs", &self.refs)
            .field("accepted", &self.accepted)
            .field("rejected", &self.rejected)
            .finish_non_exhaustive()
    }
}

impl Drop for TrackingData {
    fn drop(&mut self) {
        let refs = *self.refs.get_mut();
        if refs != 0 {
            error!(tracking_id = %self.id, refs, "Tracking data released with undelivered metrics.");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::{TrackingData, TrackingId};

    fn counting(calls: &Arc<AtomicUsize>) -> super::NotifyFn {
        let calls = Arc::clone(calls);
        Box::new(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = TrackingId::next();
        let b = TrackingId::next();
        assert!(b > a);
        assert_eq!(b.to_string(), b.as_u64().to_string());
    }

    #[test]
    fn notifies_on_last_release() {
        let calls = Arc::new(AtomicUsize::new(0));
        let data = TrackingData::new(3, counting(&calls));

        data.accept();
        data.reject();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(data.ref_count(), 1);

        data.release();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let info = data.info();
        assert_eq!((info.accepted(), info.rejected()), (1, 1));
        assert!(!info.delivered());
    }

    #[test]
    #[should_panic(expected = "negative reference count")]
    fn release_past_zero_panics() {
        let data = TrackingData::new(1, Box::new(|_| {}));
        data.release();
        data.release();
    }
}
