//! Splitter runner (§4.4): turns a byte stream into record boundaries.
//! Records exceeding `max_record_size` are dropped with a logged error and
//! the stream is resynchronized on the next delimiter.

use byteorder::{BigEndian, ByteOrder};
use tracing::warn;

/// What a [`Splitter`] found after being offered the buffered bytes so far.
pub enum SplitOutcome {
    /// A complete record; the byte offset to resume scanning from.
    Record { record: Vec<u8>, consumed: usize },
    /// Not enough data buffered yet.
    NeedMoreData,
}

/// A stream parser that locates record boundaries in a growing buffer.
/// Implemented by token-delimited, length-prefixed, or other framings.
pub trait Splitter: Send + Sync {
    /// Looks for the next record at the start of `buf`. Returns the record
    /// bytes (without any delimiter/length prefix) and the number of bytes
    /// in `buf` it consumed, or `None` if more data must be read first.
    fn find_record(&self, buf: &[u8]) -> Option<(Vec<u8>, usize)>;

    /// After an oversized record is dropped, returns the offset to resume
    /// scanning from, or `None` if the whole buffer should be discarded.
    fn resync(&self, buf: &[u8]) -> Option<usize>;
}

/// Splits on a single delimiter byte (e.g. `\n` for line-oriented text).
pub struct TokenSplitter {
    pub delimiter: u8,
}

impl Splitter for TokenSplitter {
    fn find_record(&self, buf: &[u8]) -> Option<(Vec<u8>, usize)> {
        let pos = buf.iter().position(|&b| b == self.delimiter)?;
        Some((buf[..pos].to_vec(), pos + 1))
    }

    fn resync(&self, buf: &[u8]) -> Option<usize> {
        buf.iter().position(|&b| b == self.delimiter).map(|p| p + 1)
    }
}

/// Splits on a 4-byte big-endian length prefix followed by that many bytes
/// of payload.
pub struct LengthPrefixedSplitter;

impl Splitter for LengthPrefixedSplitter {
    fn find_record(&self, buf: &[u8]) -> Option<(Vec<u8>, usize)> {
        if buf.len() < 4 {
            return None;
        }
        let len = BigEndian::read_u32(&buf[..4]) as usize;
        if buf.len() < 4 + len {
            return None;
        }
        Some((buf[4..4 + len].to_vec(), 4 + len))
    }

    fn resync(&self, _buf: &[u8]) -> Option<usize> {
        // A corrupt length prefix gives no reliable resync point; the
        // runner discards the whole buffer and waits for a fresh read.
        None
    }
}

/// Accumulates bytes across reads and yields records as they complete,
/// dropping and resynchronizing past anything over `max_record_size`.
pub struct SplitterRunner {
    buf: Vec<u8>,
    max_record_size: usize,
}

impl SplitterRunner {
    pub fn new(max_record_size: usize) -> Self {
        SplitterRunner {
            buf: Vec::new(),
            max_record_size,
        }
    }

    /// Appends newly-read bytes and drains as many complete records as are
    /// available.
    pub fn feed(&mut self, data: &[u8], splitter: &dyn Splitter) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(data);
        let mut records = Vec::new();
        loop {
            match splitter.find_record(&self.buf) {
                Some((record, consumed)) => {
                    if record.len() > self.max_record_size {
                        warn!(
                            size = record.len(),
                            max = self.max_record_size,
                            "dropping oversized record"
                        );
                        self.buf.drain(..consumed);
                        continue;
                    }
                    self.buf.drain(..consumed);
                    records.push(record);
                }
                None => {
                    if self.buf.len() > self.max_record_size {
                        warn!(buffered = self.buf.len(), "buffer exceeds max record size without a boundary, resynchronizing");
                        match splitter.resync(&self.buf) {
                            Some(offset) => {
                                self.buf.drain(..offset);
                            }
                            None => self.buf.clear(),
                        }
                        continue;
                    }
                    break;
                }
            }
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_splitter_emits_one_record_per_line() {
        let mut runner = SplitterRunner::new(1024);
        let splitter = TokenSplitter { delimiter: b'\n' };
        let records = runner.feed(b"a\nbc\nd", &splitter);
        assert_eq!(records, vec![b"a".to_vec(), b"bc".to_vec()]);
        let more = runner.feed(b"ef\n", &splitter);
        assert_eq!(more, vec![b"def".to_vec()]);
    }

    #[test]
    fn oversized_record_is_dropped_and_stream_resynchronized() {
        let mut runner = SplitterRunner::new(3);
        let splitter = TokenSplitter { delimiter: b'\n' };
        let records = runner.feed(b"toolong\nok\n", &splitter);
        assert_eq!(records, vec![b"ok".to_vec()]);
    }

    #[test]
    fn length_prefixed_splitter_waits_for_full_payload() {
        let mut runner = SplitterRunner::new(1024);
        let splitter = LengthPrefixedSplitter;
        let mut frame = vec![0, 0, 0, 3];
        frame.extend_from_slice(b"abc");
        let partial = runner.feed(&frame[..5], &splitter);
        assert!(partial.is_empty());
        let rest = runner.feed(&frame[5..], &splitter);
        assert_eq!(rest, vec![b"abc".to_vec()]);
    }
}
