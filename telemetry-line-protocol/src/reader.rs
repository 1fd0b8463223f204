use std::io;

use telemetry_metric::Metric;
use tracing::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Normal,
    Split,
    Overflow,
    SplitOverflow,
    Done,
}

/// Streams a sequence of metrics as line protocol.
///
/// Each call to [`read`](io::Read::read) writes as many whole metrics as fit in the given buffer. When a metric is
/// larger than the buffer, it is [split](Metric::split) into smaller metrics which are written one per read. Anything
/// that still cannot fit is written out in chunks across as many reads as it takes, so a metric is never dropped or
/// truncated no matter how small the buffers are.
///
/// Buffers may be of a different size on every call.
///
/// Anything that dereferences to a [`Metric`] can be streamed, so tracked metrics can be written and then handed back
/// with [`into_inner`](Reader::into_inner) to be accepted once the write has gone through.
#[derive(Debug)]
pub struct Reader<M = Metric> {
    metrics: Vec<M>,
    index: usize,
    pieces: Vec<Metric>,
    piece_index: usize,
    overflow: Vec<u8>,
    offset: usize,
    state: State,
}

impl<M> Reader<M>
where
    M: AsRef<Metric>,
{
    /// Creates a new `Reader` over the given metrics.
    pub fn new<I>(metrics: I) -> Self
    where
        I: IntoIterator<Item = M>,
    {
        Self {
            metrics: metrics.into_iter().collect(),
            index: 0,
            pieces: Vec::new(),
            piece_index: 0,
            overflow: Vec::new(),
            offset: 0,
            state: State::Normal,
        }
    }

    /// Returns `true` if every metric has been written out.
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Consumes the reader, returning the metrics it was created with.
    pub fn into_inner(self) -> Vec<M> {
        self.metrics
    }

    fn read_normal(&mut self, buf: &mut [u8]) -> usize {
        let mut written = 0;
        while let Some(metric) = self.metrics.get(self.index) {
            let metric = metric.as_ref();
            let len = metric.len();

            // A metric with no serializable fields has nothing to write.
            if len == 0 {
                self.index += 1;
                continue;
            }

            if len <= buf.len() - written {
                written += metric.serialize_to(&mut buf[written..]);
                self.index += 1;
                continue;
            }

            if written == 0 {
                let pieces = metric.split(buf.len());
                if pieces.len() > 1 {
                    trace!(len, pieces = pieces.len(), buf_len = buf.len(), "Splitting metric across reads.");
                    self.pieces = pieces;
                    self.piece_index = 0;
                    self.state = State::Split;
                } else {
                    trace!(len, buf_len = buf.len(), "Metric cannot be split, writing across reads.");
                    self.overflow = metric.serialize();
                    self.offset = 0;
                    self.state = State::Overflow;
                }
            }
            return written;
        }

        self.state = State::Done;
        written
    }

    fn read_split(&mut self, buf: &mut [u8]) -> usize {
        let Some(piece) = self.pieces.get(self.piece_index) else {
            self.pieces.clear();
            self.piece_index = 0;
            self.index += 1;
            self.state = State::Normal;
            return 0;
        };

        let len = piece.len();
        if len <= buf.len() {
            self.piece_index += 1;
            return piece.serialize_to(buf);
        }

        trace!(len, buf_len = buf.len(), "Split metric does not fit, writing across reads.");
        self.overflow = piece.serialize();
        self.offset = 0;
        self.state = State::SplitOverflow;
        0
    }

    fn read_overflow(&mut self, buf: &mut [u8]) -> usize {
        let remaining = &self.overflow[self.offset..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.offset += n;

        if self.offset == self.overflow.len() {
            self.overflow.clear();
            self.offset = 0;
            if self.state == State::SplitOverflow {
                self.piece_index += 1;
                self.state = State::Split;
            } else {
                self.index += 1;
                self.state = State::Normal;
            }
        }
        n
    }
}

impl<M> io::Read for Reader<M>
where
    M: AsRef<Metric>,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        // Every state either writes something or moves on, so this always terminates.
        loop {
            let n = match self.state {
                State::Normal => self.read_normal(buf),
                State::Split => self.read_split(buf),
                State::Overflow | State::SplitOverflow => self.read_overflow(buf),
                State::Done => return Ok(0),
            };
            if n > 0 {
                return Ok(n);
            }
        }
    }
}
