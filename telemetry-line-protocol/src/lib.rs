//! Decoding and encoding of line protocol.
//!
//! Line protocol is a text format with one metric per line:
//!
//! ```text
//! weather,location=us-midwest temperature=82,humidity=71i 1465839830100400200
//! ```
//!
//! [`Parser`] turns a batch of lines into [`Metric`](telemetry_metric::Metric)s. Each line is parsed on its own, so a
//! malformed line is reported without losing the rest of the batch. [`Reader`] goes the other way, streaming a
//! sequence of metrics out through [`std::io::Read`] into buffers of any size, splitting metrics that would not
//! otherwise fit.
//!
//! # Usage
//!
//! ```
//! # use std::io::Read as _;
//! # use chrono::{TimeZone, Utc};
//! # use telemetry_line_protocol::{Parser, Reader};
//! let parser = Parser::new().with_default_time(Utc.timestamp_nanos(0));
//! let metrics = parser
//!     .parse(b"cpu,host=a usage=42.5 10\nmem,host=a free=1024i\n")
//!     .expect("batch should not be too short")
//!     .into_result()
//!     .expect("every line should parse");
//! assert_eq!(metrics.len(), 2);
//!
//! let mut out = String::new();
//! Reader::new(metrics).read_to_string(&mut out).expect("reading from memory cannot fail");
//! assert_eq!(out, "cpu,host=a usage=42.5 10\nmem,host=a free=1024i 0\n");
//! ```
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod error;
pub use self::error::{BatchError, ParseError, Reason};

mod parser;
pub use self::parser::{
    parse, parse_with_default_time, parse_with_default_time_precision, Parsed, Parser, MAX_KEY_LENGTH,
};

mod reader;
pub use self::reader::Reader;
