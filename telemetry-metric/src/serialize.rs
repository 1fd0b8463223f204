//! Line protocol serialization of a [`Metric`].
//!
//! A metric is written as a single line:
//!
//! ```text
//! <name>[,<tag_key>=<tag_value>...] <field_key>=<field_value>[,...] <timestamp>\n
//! ```
//!
//! Fields whose value has no representation (non-finite floats) are left out. A metric with no representable field
//! serializes to nothing at all.
use std::{fmt, mem};

use crate::{escape::Escaper, Field, FieldValue, Metric};

/// Destination for serialized bytes.
///
/// Serialization is written once against this trait so that measuring, buffering, and writing into a caller's slice
/// can never disagree about the bytes produced.
trait Sink: fmt::Write {
    fn put(&mut self, bytes: &[u8]);

    fn put_escaped(&mut self, escaper: Escaper, s: &str) {
        let bytes = s.as_bytes();
        let mut start = 0;
        for (i, b) in bytes.iter().enumerate() {
            if escaper.is_reserved(*b) {
                self.put(&bytes[start..i]);
                self.put(b"\\");
                start = i;
            }
        }
        self.put(&bytes[start..]);
    }

    fn put_float(&mut self, value: f64) {
        // Formatting into our own sinks never fails.
        let _ = write!(self, "{value}");
    }

    fn put_int(&mut self, value: i64) {
        let mut buf = itoa::Buffer::new();
        self.put(buf.format(value).as_bytes());
    }
}

struct VecSink<'a>(&'a mut Vec<u8>);

impl Sink for VecSink<'_> {
    fn put(&mut self, bytes: &[u8]) {
        self.0.extend_from_slice(bytes);
    }
}

impl fmt::Write for VecSink<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.put(s.as_bytes());
        Ok(())
    }
}

/// Writes into a fixed slice, dropping whatever does not fit.
struct SliceSink<'a> {
    buf: &'a mut [u8],
    written: usize,
}

impl Sink for SliceSink<'_> {
    fn put(&mut self, bytes: &[u8]) {
        let remaining = &mut self.buf[self.written..];
        let n = bytes.len().min(remaining.len());
        remaining[..n].copy_from_slice(&bytes[..n]);
        self.written += n;
    }
}

impl fmt::Write for SliceSink<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.put(s.as_bytes());
        Ok(())
    }
}

#[derive(Default)]
struct LenSink(usize);

impl Sink for LenSink {
    fn put(&mut self, bytes: &[u8]) {
        self.0 += bytes.len();
    }
}

impl fmt::Write for LenSink {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0 += s.len();
        Ok(())
    }
}

fn write_field<S: Sink>(sink: &mut S, field: &Field) {
    sink.put_escaped(Escaper::FieldKey, field.key());
    sink.put(b"=");
    match field.value() {
        FieldValue::Float(v) => sink.put_float(*v),
        FieldValue::Int(v) => {
            sink.put_int(*v);
            sink.put(b"i");
        }
        FieldValue::Uint(v) => {
            // Line protocol integers are signed, so anything larger is clamped.
            sink.put_int(i64::try_from(*v).unwrap_or(i64::MAX));
            sink.put(b"i");
        }
        FieldValue::Bool(v) => sink.put(if *v { &b"true"[..] } else { &b"false"[..] }),
        FieldValue::String(v) => {
            sink.put(b"\"");
            sink.put_escaped(Escaper::StringValue, v);
            sink.put(b"\"");
        }
    }
}

fn field_len(field: &Field) -> usize {
    let mut sink = LenSink::default();
    write_field(&mut sink, field);
    sink.0
}

impl Metric {
    fn write_header<S: Sink>(&self, sink: &mut S) {
        sink.put_escaped(Escaper::Name, &self.name);
        for tag in self.tags.iter().filter(|t| !t.key().is_empty() && !t.value().is_empty()) {
            sink.put(b",");
            sink.put_escaped(Escaper::Tag, tag.key());
            sink.put(b"=");
            sink.put_escaped(Escaper::Tag, tag.value());
        }
    }

    fn write_line<S: Sink>(&self, sink: &mut S) {
        let mut fields = self.fields.iter().filter(|f| f.value().is_serializable()).peekable();
        if fields.peek().is_none() {
            return;
        }

        self.write_header(sink);
        sink.put(b" ");
        for (i, field) in fields.enumerate() {
            if i > 0 {
                sink.put(b",");
            }
            write_field(sink, field);
        }
        sink.put(b" ");
        sink.put_int(self.time);
        sink.put(b"\n");
    }

    /// Gets the exact length, in bytes, of this metric's serialized form.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        let mut sink = LenSink::default();
        self.write_line(&mut sink);
        sink.0
    }

    /// Serializes this metric as a line of line protocol, including the trailing newline.
    ///
    /// Line protocol has no escape for newlines. A newline inside the name, a tag, a field key, or a string value is
    /// written as is, and the output will read back as two lines.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.len());
        self.write_line(&mut VecSink(&mut buf));
        buf
    }

    /// Serializes this metric into `buf`, returning the number of bytes written.
    ///
    /// Callers are expected to check that [`len`](Metric::len) fits within `buf` first. If it does not, the output is
    /// cut off at the end of `buf`.
    pub fn serialize_to(&self, buf: &mut [u8]) -> usize {
        let mut sink = SliceSink { buf, written: 0 };
        self.write_line(&mut sink);
        sink.written
    }

    /// Splits this metric into metrics whose serialized forms are each at most `max_size` bytes.
    ///
    /// Every piece shares the name, tags, and timestamp of this metric, and the fields are partitioned among them in
    /// their original order, so writing out every piece conveys the same data as writing out this metric.
    ///
    /// Fields are packed greedily. A field that cannot fit alongside the name, tags, and timestamp even on its own
    /// still gets a piece of its own, which will be larger than `max_size`. If this metric already fits, or if not a
    /// single field could fit, a single copy of this metric is returned.
    pub fn split(&self, max_size: usize) -> Vec<Metric> {
        if self.len() <= max_size {
            return vec![self.clone()];
        }

        let mut header = LenSink::default();
        self.write_header(&mut header);
        let overhead = header.0 + itoa::Buffer::new().format(self.time).len() + 3;

        let lens: Vec<Option<usize>> =
            self.fields.iter().map(|f| f.value().is_serializable().then(|| field_len(f))).collect();
        match lens.iter().flatten().min() {
            Some(smallest) if overhead + smallest <= max_size => {}
            _ => return vec![self.clone()],
        }

        let mut pieces = Vec::new();
        let mut current = Vec::new();
        let mut current_len = 0;
        for (field, len) in self.fields.iter().zip(lens) {
            if let Some(len) = len {
                if current_len == 0 {
                    current_len = len;
                } else if overhead + current_len + 1 + len > max_size {
                    pieces.push(self.with_fields(mem::take(&mut current)));
                    current_len = len;
                } else {
                    current_len += 1 + len;
                }
            }
            current.push(field.clone());
        }
        if !current.is_empty() {
            pieces.push(self.with_fields(current));
        }

        pieces
    }

    fn with_fields(&self, fields: Vec<Field>) -> Metric {
        Metric {
            name: self.name.clone(),
            tags: self.tags.clone(),
            fields,
            time: self.time,
            value_type: self.value_type,
            aggregate: self.aggregate,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone as _, Utc};
    use proptest::{collection::vec as arb_vec, prelude::*, proptest};

    use crate::{FieldValue, Metric, Tag};

    fn metric(name: &str, tags: &[(&str, &str)], fields: Vec<(&str, FieldValue)>, time: i64) -> Metric {
        Metric::new(name, tags.iter().copied(), fields, Utc.timestamp_nanos(time)).unwrap()
    }

    fn string_from_metric(m: &Metric) -> String {
        String::from_utf8(m.serialize()).unwrap()
    }

    #[test]
    fn serialize() {
        // Cases are defined as: metric, expected output.
        let cases = [
            (metric("foo", &[], vec![("value", FieldValue::Int(1))], 1_481_032_190_000_000_000), "foo value=1i 1481032190000000000\n"),
            (metric("cpu", &[("host", "localhost")], vec![("value", FieldValue::Float(42.0))], 0), "cpu,host=localhost value=42 0\n"),
            (metric("cpu", &[], vec![("value", FieldValue::Float(-0.5))], -1), "cpu value=-0.5 -1\n"),
            (metric("cpu", &[], vec![("value", FieldValue::Float(1e21))], 0), "cpu value=1000000000000000000000 0\n"),
            (metric("cpu", &[], vec![("value", FieldValue::Uint(u64::MAX))], 0), "cpu value=9223372036854775807i 0\n"),
            (metric("cpu", &[], vec![("up", FieldValue::Bool(true)), ("down", FieldValue::Bool(false))], 0), "cpu up=true,down=false 0\n"),
            (metric("cpu", &[], vec![("s", FieldValue::String("say \"hi\" C:\\".to_owned()))], 0), "cpu s=\"say \\\"hi\\\" C:\\\\\" 0\n"),
            (metric("cpu load", &[("a,b", "c=d"), ("e\"f", "g h")], vec![("x y", FieldValue::Int(-2))], 0), "cpu\\ load,a\\,b=c\\=d,e\\\"f=g\\ h x\\ y=-2i 0\n"),
            (metric("cpu", &[], vec![("nan", FieldValue::Float(f64::NAN)), ("ok", FieldValue::Int(1))], 0), "cpu ok=1i 0\n"),
            (metric("cpu", &[], vec![("inf", FieldValue::Float(f64::INFINITY))], 0), ""),
        ];

        for (m, expected) in cases {
            assert_eq!(string_from_metric(&m), expected);
            assert_eq!(m.len(), expected.len());
        }
    }

    #[test]
    fn serialize_to() {
        let m = metric("foo", &[], vec![("value", FieldValue::Int(1))], 1_481_032_190_000_000_000);

        let mut buf = [0u8; 64];
        let n = m.serialize_to(&mut buf);
        assert_eq!(&buf[..n], b"foo value=1i 1481032190000000000\n");

        let mut small = [0u8; 8];
        assert_eq!(m.serialize_to(&mut small), 8);
        assert_eq!(&small, b"foo valu");
    }

    #[test]
    fn split_fits() {
        let m = metric("cpu", &[], vec![("a", FieldValue::Int(1)), ("b", FieldValue::Int(2))], 0);
        assert_eq!(m.split(m.len()), vec![m.clone()]);
    }

    #[test]
    fn split_partitions_fields() {
        let m = metric(
            "cpu",
            &[("host", "localhost")],
            vec![
                ("a", FieldValue::Int(1)),
                ("b", FieldValue::Int(2)),
                ("c", FieldValue::Int(3)),
                ("d", FieldValue::Int(4)),
            ],
            0,
        );

        // "cpu,host=localhost a=1i,b=2i 0\n" is 31 bytes.
        let pieces = m.split(31);
        let lines: Vec<_> = pieces.iter().map(string_from_metric).collect();
        assert_eq!(lines, ["cpu,host=localhost a=1i,b=2i 0\n", "cpu,host=localhost c=3i,d=4i 0\n"]);

        let pieces = m.split(30);
        let lines: Vec<_> = pieces.iter().map(string_from_metric).collect();
        assert_eq!(
            lines,
            [
                "cpu,host=localhost a=1i 0\n",
                "cpu,host=localhost b=2i 0\n",
                "cpu,host=localhost c=3i 0\n",
                "cpu,host=localhost d=4i 0\n",
            ]
        );
    }

    #[test]
    fn newlines_written_verbatim() {
        let m = metric("cpu", &[("host", "a\nb")], vec![("s", FieldValue::String("x\ny".to_owned()))], 0);
        let expected = "cpu,host=a\nb s=\"x\ny\" 0\n";
        assert_eq!(string_from_metric(&m), expected);
        assert_eq!(m.len(), expected.len());
    }

    fn five_fields() -> Metric {
        metric(
            "cpu",
            &[("host", "localhost")],
            vec![
                ("float", FieldValue::Float(100_001.0)),
                ("int", FieldValue::Int(100_001)),
                ("bool", FieldValue::Bool(true)),
                ("false", FieldValue::Bool(false)),
                ("string", FieldValue::String("test".to_owned())),
            ],
            1_480_940_990_034_083_306,
        )
    }

    #[test]
    fn split_no_room_for_newline() {
        let mut m = five_fields();
        m.remove_field("string");

        let pieces = m.split(m.len() - 1);
        let lines: Vec<_> = pieces.iter().map(string_from_metric).collect();
        assert_eq!(
            lines,
            [
                "cpu,host=localhost float=100001,int=100001i,bool=true 1480940990034083306\n",
                "cpu,host=localhost false=false 1480940990034083306\n",
            ]
        );
    }

    #[test]
    fn split_one_field_per_piece() {
        let m = five_fields();

        // Every field fits on its own in 60 bytes, but no two fit together.
        let pieces = m.split(60);
        let lines: Vec<_> = pieces.iter().map(string_from_metric).collect();
        assert_eq!(
            lines,
            [
                "cpu,host=localhost float=100001 1480940990034083306\n",
                "cpu,host=localhost int=100001i 1480940990034083306\n",
                "cpu,host=localhost bool=true 1480940990034083306\n",
                "cpu,host=localhost false=false 1480940990034083306\n",
                "cpu,host=localhost string=\"test\" 1480940990034083306\n",
            ]
        );
        assert!(pieces.iter().all(|piece| piece.len() <= 60));

        // Not even one field fits, so there is no useful split.
        assert_eq!(m.split(10), vec![m.clone()]);
    }

    #[test]
    fn split_oversized_field_stands_alone() {
        let m = metric(
            "cpu",
            &[],
            vec![
                ("a", FieldValue::Int(1)),
                ("long", FieldValue::String("x".repeat(64))),
                ("b", FieldValue::Int(2)),
            ],
            0,
        );

        let pieces = m.split(16);
        assert_eq!(pieces.len(), 3);
        assert!(pieces[0].len() <= 16);
        assert!(pieces[1].len() > 16);
        assert!(pieces[2].len() <= 16);
        assert_eq!(pieces[1].get_field("long"), m.get_field("long"));
    }

    #[test]
    fn split_impossible() {
        let m = metric("a_very_long_measurement_name", &[], vec![("a", FieldValue::Int(1)), ("b", FieldValue::Int(2))], 0);
        assert_eq!(m.split(10), vec![m.clone()]);
    }

    fn arb_field_value() -> impl Strategy<Value = FieldValue> {
        prop_oneof![
            any::<i64>().prop_map(FieldValue::Int),
            (-1e12f64..1e12).prop_map(FieldValue::Float),
            any::<bool>().prop_map(FieldValue::Bool),
            "[ -~]{0,24}".prop_map(FieldValue::String),
        ]
    }

    fn arb_metric() -> impl Strategy<Value = Metric> {
        let tags = arb_vec(("[a-z ,=]{1,6}", "[a-z0-9 ,=\"]{1,12}"), 0..4);
        let fields = arb_vec(("[a-z]{1,8}", arb_field_value()), 1..16);
        ("[a-z]{1,12}", tags, fields, any::<i64>()).prop_map(|(name, tags, fields, time)| {
            let tags: Vec<Tag> = tags.into_iter().map(Tag::from).collect();
            Metric::new(name, tags, fields, Utc.timestamp_nanos(time)).unwrap()
        })
    }

    proptest! {
        #[test]
        fn split_pieces_cover_every_field(m in arb_metric(), max_size in 1usize..256) {
            let pieces = m.split(max_size);
            prop_assert!(!pieces.is_empty());

            let mut fields = Vec::new();
            for piece in &pieces {
                prop_assert_eq!(piece.name(), m.name());
                prop_assert_eq!(piece.tag_list(), m.tag_list());
                prop_assert_eq!(piece.unix_nano(), m.unix_nano());
                fields.extend_from_slice(piece.field_list());

                if pieces.len() > 1 && piece.field_list().len() > 1 {
                    prop_assert!(piece.len() <= max_size);
                }
            }
            prop_assert_eq!(fields.as_slice(), m.field_list());
        }

        #[test]
        fn len_matches_serialize(m in arb_metric()) {
            prop_assert_eq!(m.len(), m.serialize().len());
        }
    }
}
