use chrono::{DateTime, TimeZone as _, Utc};
use telemetry_metric::{Escaper, FieldValue, Metric, MetricError, Precision};
use tracing::{debug, trace};

use crate::{BatchError, ParseError, Reason};

/// Maximum length, in bytes, of a measurement name and its tags.
pub const MAX_KEY_LENGTH: usize = 65535;

// `a b=1\n` is the shortest valid input.
const MIN_BUFFER_LEN: usize = 6;

// Lines shorter than this are skipped without being reported.
const MIN_LINE_LEN: usize = 2;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Next {
    TagKey,
    Fields,
}

/// Byte cursor over a single line.
///
/// Each scanning method starts at the index it is given and returns the index just past what it consumed. Nothing
/// is allocated until a line has been fully validated.
struct Scanner<'a> {
    buf: &'a [u8],
}

impl<'a> Scanner<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn error(&self, reason: Reason, index: usize) -> ParseError {
        ParseError::new(reason, self.buf, index)
    }

    fn at(&self, i: usize) -> Option<u8> {
        self.buf.get(i).copied()
    }

    /// Whether the byte at `i` is preceded by a backslash.
    fn is_escaped(&self, i: usize) -> bool {
        i > 0 && self.buf[i - 1] == b'\\'
    }

    fn skip_whitespace(&self, mut i: usize) -> usize {
        while matches!(self.at(i), Some(b' ' | b'\t' | 0)) {
            i += 1;
        }
        i
    }

    /// Scans the measurement name and tags, returning where they start and end.
    fn scan_key(&self, i: usize) -> Result<(usize, usize), ParseError> {
        let start = self.skip_whitespace(i);
        let (next, mut i) = self.scan_measurement(start)?;
        if next == Next::TagKey {
            i = self.scan_tags(i)?;
        }
        Ok((start, i))
    }

    fn scan_measurement(&self, mut i: usize) -> Result<(Next, usize), ParseError> {
        if matches!(self.at(i), None | Some(b',')) {
            return Err(self.error(Reason::MissingMeasurement, i));
        }

        loop {
            i += 1;
            let Some(b) = self.at(i) else {
                return Err(self.error(Reason::MissingFields, i));
            };
            if self.is_escaped(i) {
                continue;
            }
            match b {
                b',' => return Ok((Next::TagKey, i + 1)),
                b' ' => return Ok((Next::Fields, i)),
                _ => {}
            }
        }
    }

    fn scan_tags(&self, mut i: usize) -> Result<usize, ParseError> {
        loop {
            i = self.scan_tag_key(i)?;
            match self.scan_tag_value(i)? {
                (Next::TagKey, next) => i = next,
                (Next::Fields, next) => return Ok(next),
            }
        }
    }

    fn scan_tag_key(&self, mut i: usize) -> Result<usize, ParseError> {
        if matches!(self.at(i), None | Some(b' ' | b',' | b'=')) {
            return Err(self.error(Reason::MissingTagKey, i));
        }

        loop {
            i += 1;
            match self.at(i) {
                None => return Err(self.error(Reason::MissingTagValue, i)),
                Some(b' ' | b',') if !self.is_escaped(i) => return Err(self.error(Reason::MissingTagValue, i)),
                Some(b'=') if !self.is_escaped(i) => return Ok(i + 1),
                Some(_) => {}
            }
        }
    }

    fn scan_tag_value(&self, mut i: usize) -> Result<(Next, usize), ParseError> {
        if matches!(self.at(i), None | Some(b',' | b' ')) {
            return Err(self.error(Reason::MissingTagValue, i));
        }

        loop {
            i += 1;
            let Some(b) = self.at(i) else {
                return Err(self.error(Reason::MissingFields, i));
            };
            if self.is_escaped(i) {
                continue;
            }
            match b {
                b'=' => return Err(self.error(Reason::InvalidTagFormat, i)),
                b',' => return Ok((Next::TagKey, i + 1)),
                b' ' => return Ok((Next::Fields, i)),
                _ => {}
            }
        }
    }

    /// Scans the fields, returning where they start and end.
    fn scan_fields(&self, i: usize) -> Result<(usize, usize), ParseError> {
        let start = self.skip_whitespace(i);
        let mut i = start;
        let mut quoted = false;
        let mut equals = 0;
        let mut commas = 0;

        while let Some(b) = self.at(i) {
            if b == b'\\' && i + 1 < self.buf.len() {
                i += 2;
                continue;
            }

            // Quotes only matter in values, never in keys.
            if b == b'"' && equals > commas {
                quoted = !quoted;
                i += 1;
                continue;
            }

            if b == b'=' && !quoted {
                equals += 1;

                // A key must come before the equals sign, though it may itself end in an escaped space or comma.
                let before = self.at(i - 1);
                let escaped_before = i >= 2 && self.buf[i - 2] == b'\\';
                if matches!(before, Some(b' ' | b',')) && !escaped_before {
                    return Err(self.error(Reason::MissingFieldKey, i));
                }

                match self.at(i + 1) {
                    None | Some(b',' | b' ') => return Err(self.error(Reason::MissingFieldValue, i)),
                    Some(b'0'..=b'9' | b'.' | b'-' | b'N' | b'n') => {
                        i = self.scan_number(i + 1)?;
                        continue;
                    }
                    Some(b'"') => {}
                    Some(_) => {
                        i = self.scan_boolean(i + 1)?;
                        continue;
                    }
                }
            }

            if !quoted {
                match b {
                    b',' => commas += 1,
                    b' ' => break,
                    _ => {}
                }
            }
            i += 1;
        }

        if quoted {
            return Err(self.error(Reason::UnbalancedQuotes, i));
        }

        if equals == 0 || commas != equals - 1 {
            return Err(self.error(Reason::InvalidFieldFormat, i));
        }

        Ok((start, i))
    }

    /// Validates the shape of a numeric literal.
    ///
    /// Integers end with an `i`. Floats may have one decimal point and an exponent, whose sign must directly follow
    /// the `e`. Whether the value fits its type is checked when it is converted.
    fn scan_number(&self, mut i: usize) -> Result<usize, ParseError> {
        let start = i;
        let mut is_int = false;
        let mut decimal = false;
        let mut scientific = false;

        if self.at(i) == Some(b'-') {
            i += 1;
            if i == self.buf.len() {
                return Err(self.error(Reason::InvalidNumber, i));
            }
        }

        while let Some(b) = self.at(i) {
            match b {
                b',' | b' ' => break,
                b'i' if i > start && !is_int => is_int = true,
                b'.' if decimal => return Err(self.error(Reason::InvalidNumber, i)),
                b'.' => decimal = true,
                b'e' | b'E' if i > start => scientific = true,
                b'+' | b'-' if matches!(self.buf[i - 1], b'e' | b'E') => {}
                b'0'..=b'9' => {}
                _ => return Err(self.error(Reason::InvalidNumber, i)),
            }
            i += 1;
        }

        if is_int && (decimal || scientific) {
            return Err(self.error(Reason::InvalidNumber, i));
        }

        let mut digits = i - start;
        if is_int {
            digits -= 1;
        }
        if decimal {
            digits -= 1;
        }
        if self.buf[start] == b'-' {
            digits -= 1;
        }
        if digits == 0 {
            return Err(self.error(Reason::InvalidNumber, i));
        }

        // The `i` must be the last character, so `9i10` is rejected.
        if is_int && self.buf[i - 1] != b'i' {
            return Err(self.error(Reason::InvalidNumber, i));
        }

        Ok(i)
    }

    fn scan_boolean(&self, mut i: usize) -> Result<usize, ParseError> {
        let start = i;
        if !matches!(self.at(i), Some(b't' | b'T' | b'f' | b'F')) {
            return Err(self.error(Reason::InvalidValue, i));
        }

        while !matches!(self.at(i), None | Some(b',' | b' ')) {
            i += 1;
        }

        if parse_bool(&self.buf[start..i]).is_none() {
            return Err(self.error(Reason::InvalidBoolean, i));
        }

        Ok(i)
    }

    /// Scans the optional timestamp, returning where it starts and ends.
    fn scan_time(&self, i: usize) -> Result<(usize, usize), ParseError> {
        let start = self.skip_whitespace(i);
        let mut i = start;

        while let Some(b) = self.at(i) {
            match b {
                b'\n' | b' ' => break,
                b'-' if i == start => {}
                b'0'..=b'9' => {}
                _ => return Err(self.error(Reason::InvalidTimestamp, i)),
            }
            i += 1;
        }

        Ok((start, i))
    }

    /// Converts the validated fields section into typed fields.
    fn read_fields(&self, start: usize, end: usize) -> Result<Vec<(String, FieldValue)>, ParseError> {
        let mut fields = Vec::new();
        let mut i = start;
        while i < end {
            let key_start = i;
            while i < end && self.buf[i] != b'=' {
                i += if self.buf[i] == b'\\' { 2 } else { 1 };
            }
            let key = text(&self.buf[key_start..i.min(end)], Escaper::FieldKey);

            // Skip the equals sign.
            i += 1;
            let value_start = i;
            let value = if self.at(i) == Some(b'"') {
                i += 1;
                while i < end && self.buf[i] != b'"' {
                    i += if self.buf[i] == b'\\' { 2 } else { 1 };
                }
                if i >= end {
                    return Err(self.error(Reason::UnbalancedQuotes, i));
                }
                let value = FieldValue::String(text(&self.buf[value_start + 1..i], Escaper::StringValue));
                i += 1;
                value
            } else {
                while i < end && self.buf[i] != b',' {
                    i += 1;
                }
                self.read_value(value_start, i)?
            };

            match self.at(i) {
                _ if i >= end => {}
                Some(b',') => i += 1,
                _ => return Err(self.error(Reason::InvalidFieldFormat, i)),
            }

            fields.push((key, value));
        }

        Ok(fields)
    }

    fn read_value(&self, start: usize, end: usize) -> Result<FieldValue, ParseError> {
        let raw = &self.buf[start..end];
        if let Some(value) = parse_bool(raw) {
            return Ok(FieldValue::Bool(value));
        }

        // Numbers have already been validated as ASCII.
        let s = std::str::from_utf8(raw).map_err(|_| self.error(Reason::InvalidNumber, start))?;
        if let Some(int) = s.strip_suffix('i') {
            return int.parse().map(FieldValue::Int).map_err(|_| self.error(Reason::InvalidInteger, end));
        }

        match s.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(FieldValue::Float(v)),
            _ => Err(self.error(Reason::InvalidFloat, end)),
        }
    }

    fn read_time(&self, start: usize, end: usize, precision: Precision) -> Result<i64, ParseError> {
        std::str::from_utf8(&self.buf[start..end])
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .and_then(|ts| precision.to_nanos(ts))
            .ok_or_else(|| self.error(Reason::InvalidTimestamp, end))
    }
}

fn parse_bool(raw: &[u8]) -> Option<bool> {
    match raw {
        b"t" | b"T" | b"true" | b"True" | b"TRUE" => Some(true),
        b"f" | b"F" | b"false" | b"False" | b"FALSE" => Some(false),
        _ => None,
    }
}

fn text(raw: &[u8], escaper: Escaper) -> String {
    let raw = String::from_utf8_lossy(raw);
    escaper.unescape(&raw).into_owned()
}

/// Finds the first byte equal to `needle` that is not preceded by a backslash.
fn find_unescaped(buf: &[u8], needle: u8) -> Option<usize> {
    (0..buf.len()).find(|&i| buf[i] == needle && (i == 0 || buf[i - 1] != b'\\'))
}

fn parse_metric(line: &[u8], default_time: i64, precision: Precision) -> Result<Metric, ParseError> {
    let scanner = Scanner::new(line);

    let (key_start, key_end) = scanner.scan_key(0)?;
    let key = &line[key_start..key_end];
    if key.len() > MAX_KEY_LENGTH {
        return Err(scanner.error(Reason::MaxKeyLengthExceeded(key.len()), key_end));
    }

    let (fields_start, fields_end) = scanner.scan_fields(key_end)?;

    let (time_start, time_end) = scanner.scan_time(fields_end)?;
    let time = if time_start == time_end {
        default_time
    } else {
        scanner.read_time(time_start, time_end, precision)?
    };

    let (name, mut raw_tags) = match find_unescaped(key, b',') {
        Some(i) => (&key[..i], &key[i + 1..]),
        None => (key, &key[key.len()..]),
    };

    let mut tags = Vec::new();
    while !raw_tags.is_empty() {
        let end = find_unescaped(raw_tags, b',').unwrap_or(raw_tags.len());
        let pair = &raw_tags[..end];
        if let Some(eq) = find_unescaped(pair, b'=') {
            tags.push((text(&pair[..eq], Escaper::Tag), text(&pair[eq + 1..], Escaper::Tag)));
        }
        raw_tags = &raw_tags[(end + 1).min(raw_tags.len())..];
    }

    let fields = scanner.read_fields(fields_start, fields_end)?;

    Metric::new(text(name, Escaper::Name), tags, fields, Utc.timestamp_nanos(time)).map_err(|e| match e {
        MetricError::MissingName => scanner.error(Reason::MissingMeasurement, key_start),
        MetricError::TrailingBackslash { part, .. } if part.starts_with("tag") => {
            scanner.error(Reason::InvalidTagFormat, key_end)
        }
        MetricError::TrailingBackslash { .. } => scanner.error(Reason::InvalidFieldFormat, fields_end),
    })
}

/// The metrics parsed from a batch, along with an error for each line that could not be parsed.
#[derive(Clone, Debug, Default)]
pub struct Parsed {
    metrics: Vec<Metric>,
    errors: Vec<ParseError>,
}

impl Parsed {
    /// Gets the metrics that were parsed, in input order.
    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// Gets the error for each line that failed to parse, in input order.
    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    /// Returns `true` if any line failed to parse.
    pub fn any_failures(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Consumes this batch, returning the parsed metrics and discarding any errors.
    pub fn into_metrics(self) -> Vec<Metric> {
        self.metrics
    }

    /// Consumes this batch, returning the parsed metrics and the combined error, if any line failed to parse.
    pub fn into_parts(self) -> (Vec<Metric>, Option<BatchError>) {
        let error = if self.errors.is_empty() { None } else { Some(BatchError::new(self.errors)) };
        (self.metrics, error)
    }

    /// Consumes this batch, returning the parsed metrics only if every line parsed.
    ///
    /// # Errors
    ///
    /// If any line failed to parse, the combined error is returned and the parsed metrics are discarded.
    pub fn into_result(self) -> Result<Vec<Metric>, BatchError> {
        match self.into_parts() {
            (metrics, None) => Ok(metrics),
            (_, Some(e)) => Err(e),
        }
    }
}

/// Parses line protocol.
///
/// Lines without a timestamp are stamped with a default time: either the one configured, or the time the batch is
/// parsed. Timestamps are assumed to be nanoseconds unless a coarser precision is configured.
#[derive(Clone, Debug, Default)]
pub struct Parser {
    default_time: Option<DateTime<Utc>>,
    precision: Precision,
}

impl Parser {
    /// Creates a new `Parser` with the default configuration.
    ///
    /// Metrics without a timestamp are stamped with the current time, and timestamps are in nanoseconds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the time given to metrics without a timestamp.
    ///
    /// Defaults to the current time when each batch is parsed.
    #[must_use]
    pub fn with_default_time(mut self, time: DateTime<Utc>) -> Self {
        self.default_time = Some(time);
        self
    }

    /// Sets the precision of timestamps in the input.
    ///
    /// Timestamps are scaled up to nanoseconds, and the default time is truncated to this precision.
    ///
    /// Defaults to nanoseconds.
    #[must_use]
    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    fn default_time(&self) -> i64 {
        let time = self.default_time.unwrap_or_else(Utc::now);
        self.precision.truncate(time.timestamp_nanos_opt().unwrap_or(i64::MAX))
    }

    /// Parses a newline-delimited batch of metrics.
    ///
    /// Each line is parsed independently: a malformed line is skipped and its error recorded, and parsing carries on
    /// with the next line. Lines shorter than two bytes are skipped silently.
    ///
    /// Only lines terminated by `\n` are parsed. Anything after the last newline, such as the start of a line cut
    /// short by a read or the zeroed tail of a fixed-size buffer, is ignored.
    ///
    /// # Errors
    ///
    /// If `buf` is not empty but is too short to hold even one metric, an error is returned and nothing is parsed.
    pub fn parse(&self, buf: &[u8]) -> Result<Parsed, ParseError> {
        let mut parsed = Parsed::default();
        if buf.is_empty() {
            return Ok(parsed);
        }
        if buf.len() < MIN_BUFFER_LEN {
            return Err(ParseError::new(Reason::BufferTooShort, buf, 0));
        }

        let default_time = self.default_time();
        let mut rest = buf;
        while let Some(end) = rest.iter().position(|b| *b == b'\n') {
            let line = &rest[..end];
            rest = &rest[end + 1..];
            if line.len() < MIN_LINE_LEN {
                continue;
            }

            match parse_metric(line, default_time, self.precision) {
                Ok(metric) => parsed.metrics.push(metric),
                Err(e) => {
                    debug!(error = %e, "Skipping malformed line.");
                    parsed.errors.push(e);
                }
            }
        }

        trace!(
            metrics = parsed.metrics.len(),
            errors = parsed.errors.len(),
            unterminated = rest.len(),
            "Parsed batch."
        );
        Ok(parsed)
    }

    /// Parses a single line, without its trailing newline.
    ///
    /// # Errors
    ///
    /// If the line is malformed, an error is returned describing why.
    pub fn parse_line(&self, line: &[u8]) -> Result<Metric, ParseError> {
        parse_metric(line, self.default_time(), self.precision)
    }
}

/// Parses a batch of metrics, stamping any without a timestamp with the current time.
///
/// # Errors
///
/// See [`Parser::parse`].
pub fn parse(buf: &[u8]) -> Result<Parsed, ParseError> {
    Parser::new().parse(buf)
}

/// Parses a batch of metrics, stamping any without a timestamp with `time`.
///
/// # Errors
///
/// See [`Parser::parse`].
pub fn parse_with_default_time(buf: &[u8], time: DateTime<Utc>) -> Result<Parsed, ParseError> {
    Parser::new().with_default_time(time).parse(buf)
}

/// Parses a batch of metrics whose timestamps are in `precision`, stamping any without a timestamp with `time`.
///
/// # Errors
///
/// See [`Parser::parse`].
pub fn parse_with_default_time_precision(
    buf: &[u8],
    time: DateTime<Utc>,
    precision: Precision,
) -> Result<Parsed, ParseError> {
    Parser::new().with_default_time(time).with_precision(precision).parse(buf)
}
