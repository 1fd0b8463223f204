use std::io::Read as _;

use chrono::{TimeZone as _, Utc};
use proptest::{collection::vec as arb_vec, prelude::*, proptest};
use telemetry_line_protocol::{parse_with_default_time, Parser, Reader, Reason};
use telemetry_metric::{FieldValue, Metric, Precision};
use tracing::Level;

fn with_logging<F: FnOnce()>(f: F) {
    let subscriber = tracing_subscriber::fmt().with_max_level(Level::TRACE).with_test_writer().finish();
    tracing::subscriber::with_default(subscriber, f);
}

#[test]
fn batch_with_bad_lines_keeps_the_rest() {
    let input = b"\
cpu,host=a usage=1 1\n\
cpu,host=a usage= 2\n\
mem,host=a free=10i 3\n\
disk,host=a,path=/ used=\"90%\" 4\n\
net,host=a bytes=12x 5\n";

    with_logging(|| {
        let parsed = parse_with_default_time(input, Utc.timestamp_nanos(0)).unwrap();
        assert_eq!(parsed.metrics().len(), 3);

        let reasons: Vec<_> = parsed.errors().iter().map(|e| e.reason()).collect();
        assert_eq!(reasons, [Reason::MissingFieldValue, Reason::InvalidNumber]);
        assert_eq!(parsed.errors()[0].buffer(), "cpu,host=a usage= 2");

        let err = parsed.into_result().unwrap_err();
        assert_eq!(err.errors().len(), 2);
    });
}

#[test]
fn parse_then_stream_through_small_buffers() {
    let input = b"\
cpu,host=server01,region=us-west usage_idle=98.4,usage_user=1.2,usage_system=0.4,processes=312i 1481032190000000000\n\
mem,host=server01 free=1024i,used=2048i 1481032190000000000\n";

    let metrics = Parser::new().parse(input).unwrap().into_result().unwrap();
    let mut reader = Reader::new(metrics.clone());

    let mut out = Vec::new();
    let mut buf = [0u8; 96];
    loop {
        let n = reader.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }

    let reparsed = Parser::new().parse(&out).unwrap().into_result().unwrap();
    assert!(reparsed.len() > metrics.len());

    let mut merged = telemetry_metric::SeriesGrouper::new();
    for m in &reparsed {
        merged.add_metric(m);
    }
    assert_eq!(merged.into_metrics(), metrics);
}

#[test]
fn coarse_precision_round_trip() {
    let m = Metric::new("cpu", [("host", "a")], [("v", 1i64)], Utc.timestamp_nanos(1_481_032_190_000_000_000)).unwrap();

    let mut out = String::new();
    Reader::new([m.clone()]).read_to_string(&mut out).unwrap();
    assert_eq!(out, "cpu,host=a v=1i 1481032190000000000\n");

    let seconds = out.replace("1481032190000000000", "1481032190");
    let parsed = Parser::new().with_precision(Precision::Second).parse(seconds.as_bytes()).unwrap();
    assert_eq!(parsed.metrics(), [m]);
}

fn arb_text() -> impl Strategy<Value = String> {
    // Backslashes are left out of names and keys, where a backslash before a reserved character is ambiguous.
    "[a-zA-Z0-9 ,=_.-]{1,10}"
}

fn arb_field_value() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        any::<f64>().prop_filter("must be finite", |v| v.is_finite()).prop_map(FieldValue::Float),
        any::<i64>().prop_map(FieldValue::Int),
        any::<bool>().prop_map(FieldValue::Bool),
        "[ -~]{0,12}".prop_map(FieldValue::String),
    ]
}

fn arb_metric() -> impl Strategy<Value = Metric> {
    let tags = arb_vec((arb_text(), arb_text()), 0..4);
    let fields = arb_vec((arb_text(), arb_field_value()), 1..6);
    (arb_text(), tags, fields, any::<i64>())
        .prop_map(|(name, tags, fields, time)| Metric::new(name, tags, fields, Utc.timestamp_nanos(time)).unwrap())
}

proptest! {
    #[test]
    fn serialize_then_parse(m in arb_metric()) {
        let parsed = Parser::new().parse_line(&m.serialize()[..m.len() - 1]);
        prop_assert_eq!(parsed, Ok(m));
    }
}
