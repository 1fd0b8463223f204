//! The metric data point shared by every stage of a telemetry agent.
//!
//! Inputs produce [`Metric`]s, processors and aggregators transform them, and outputs serialize them. A metric is a
//! measurement name, a sorted set of tags identifying its series, one or more typed fields, and a timestamp with
//! nanosecond resolution.
//!
//! # Usage
//!
//! ```
//! # use chrono::{TimeZone, Utc};
//! # use telemetry_metric::{FieldValue, Metric};
//! let mut metric = Metric::new(
//!     "cpu",
//!     [("host", "localhost")],
//!     [("idle", FieldValue::Float(99.0)), ("busy", FieldValue::Int(1))],
//!     Utc.timestamp_nanos(1_481_032_190_000_000_000),
//! )
//! .expect("metric should be valid");
//!
//! metric.add_tag("datacenter", "us-east");
//! assert_eq!(
//!     metric.serialize(),
//!     b"cpu,datacenter=us-east,host=localhost idle=99,busy=1i 1481032190000000000\n",
//! );
//! ```
//!
//! # Line protocol
//!
//! Metrics serialize to line protocol, one metric per line:
//!
//! ```text
//! <measurement>[,<tag_key>=<tag_value>...] <field_key>=<field_value>[,...] <timestamp>\n
//! ```
//!
//! Reserved characters are escaped with a backslash according to where they appear. See [`Escaper`] for the rules of
//! each part of a line. Integers carry an `i` suffix, strings are double-quoted, and the timestamp is in nanoseconds.
//!
//! Metrics that are too large for a given buffer can be [split](Metric::split) into several smaller metrics sharing
//! the same series and timestamp.
//!
//! # Features
//!
//! - `serde`: derives `Serialize` and `Deserialize` for [`Metric`] and its parts.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod builder;
pub use self::builder::Builder;

mod escape;
pub use self::escape::Escaper;

mod grouper;
pub use self::grouper::SeriesGrouper;

mod metric;
pub use self::metric::{Field, Metric, MetricError, Tag};

mod precision;
pub use self::precision::Precision;

mod serialize;

mod value;
pub use self::value::{FieldValue, IntoFieldValue, ValueType};
