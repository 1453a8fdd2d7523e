use std::io::{self, Read};

/// A `Read` adapter that enforces a hard byte budget.
///
/// Used when extracting payloads whose size is declared by an untrusted
/// header: the decompressor can never hand back more than `limit` bytes, so
/// a forged header cannot turn into a decompression bomb. Budget exhaustion
/// is surfaced as end-of-stream, not an error, so callers treat it as a
/// normal stream boundary.
///
/// The budget is decremented synchronously with every successful read; it is
/// not seekable or writable.
pub struct BoundedReader<R> {
    inner: R,
    remaining: u64,
}

impl<R> BoundedReader<R> {
    /// Wrap `inner`, allowing at most `limit` bytes to be read through.
    pub fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            remaining: limit,
        }
    }

    /// Bytes still available under the budget.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Unwrap the inner reader, discarding the budget.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for BoundedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let cap = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..cap])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}
