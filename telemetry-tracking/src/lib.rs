//! Delivery tracking for metrics.
//!
//! An input that needs to know when its metrics have been written, such as a queue consumer that acknowledges
//! messages only after they are safely stored, wraps them with [`with_tracking`] or [`with_group_tracking`]. The
//! wrapped metrics flow through the pipeline like any other, and each output settles them by calling
//! [`accept`](TrackedMetric::accept) or [`reject`](TrackedMetric::reject). Dropping a tracked metric settles it too,
//! counting as neither.
//!
//! Once every copy has been settled, the notify callback runs exactly once with a [`DeliveryInfo`] summarizing the
//! outcome.
//!
//! # Usage
//!
//! ```
//! # use std::sync::{Arc, atomic::{AtomicBool, Ordering}};
//! # use chrono::{TimeZone, Utc};
//! # use telemetry_metric::Metric;
//! # use telemetry_tracking::with_tracking;
//! let metric = Metric::new("cpu", [("host", "a")], [("idle", 99.0)], Utc.timestamp_nanos(0))
//!     .expect("metric should be valid");
//!
//! let delivered = Arc::new(AtomicBool::new(false));
//! let flag = Arc::clone(&delivered);
//! let tracked = with_tracking(metric, move |info| flag.store(info.delivered(), Ordering::SeqCst));
//!
//! // Fan out to two outputs.
//! let copy = tracked.clone();
//! tracked.accept();
//! assert!(!delivered.load(Ordering::SeqCst));
//!
//! copy.accept();
//! assert!(delivered.load(Ordering::SeqCst));
//! ```
//!
//! # Byte form
//!
//! Metrics buffered to disk are converted to bytes with a [`TrackingStore`]. The tracking state cannot be written
//! out, so the store holds on to it and re-attaches it when the bytes are read back.
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod data;
pub use self::data::{DeliveryInfo, TrackingData, TrackingId};

mod delivery;
pub use self::delivery::{Delivery, QueuedMetric};

mod store;
pub use self::store::{from_bytes, to_bytes, StoreError, TrackingStore};

mod tracked;
pub use self::tracked::{with_group_tracking, with_tracking, TrackedMetric};
