use std::fmt;

/// The unit of a timestamp.
///
/// Line protocol timestamps are nanoseconds unless the writer declared a coarser precision, in which case they must
/// be scaled back up when read. Precision is also used to truncate timestamps taken from a clock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Precision {
    /// Nanoseconds.
    #[default]
    Nanosecond,

    /// Microseconds.
    Microsecond,

    /// Milliseconds.
    Millisecond,

    /// Seconds.
    Second,

    /// Minutes.
    Minute,

    /// Hours.
    Hour,
}

impl Precision {
    /// Gets the number of nanoseconds in one unit of this precision.
    pub const fn multiplier(self) -> i64 {
        match self {
            Precision::Nanosecond => 1,
            Precision::Microsecond => 1_000,
            Precision::Millisecond => 1_000_000,
            Precision::Second => 1_000_000_000,
            Precision::Minute => 60_000_000_000,
            Precision::Hour => 3_600_000_000_000,
        }
    }

    /// Scales a timestamp expressed in this precision to nanoseconds.
    ///
    /// Returns `None` if the result does not fit in an `i64`.
    pub const fn to_nanos(self, value: i64) -> Option<i64> {
        value.checked_mul(self.multiplier())
    }

    /// Truncates a nanosecond timestamp down to a multiple of this precision.
    pub const fn truncate(self, nanos: i64) -> i64 {
        nanos.saturating_sub(nanos.rem_euclid(self.multiplier()))
    }

    /// Gets the conventional short form of this precision.
    pub const fn as_str(self) -> &'static str {
        match self {
            Precision::Nanosecond => "ns",
            Precision::Microsecond => "u",
            Precision::Millisecond => "ms",
            Precision::Second => "s",
            Precision::Minute => "m",
            Precision::Hour => "h",
        }
    }
}

/// Parses the conventional short forms (`ns`, `u`, `ms`, `s`, `m`, `h`).
///
/// Anything unrecognized is treated as nanoseconds.
impl From<&str> for Precision {
    fn from(s: &str) -> Self {
        match s {
            "u" | "us" | "µs" => Precision::Microsecond,
            "ms" => Precision::Millisecond,
            "s" => Precision::Second,
            "m" => Precision::Minute,
            "h" => Precision::Hour,
            _ => Precision::Nanosecond,
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
