//! Buffered wire reader.
//!
//! `PgReader` buffers incoming protocol bytes and hands converters
//! fixed-width integers or borrowed spans. Fill happens either from a
//! blocking source or, at explicit suspension points, from an async one.
//! Exactly one logical flow drives a reader at a time.

use crate::error::{PgError, PgResult};
use crate::protocol::{CancelToken, FlushMode};
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Read chunk size for blocking sources.
const READ_CHUNK: usize = 8192;

/// Source of incoming bytes, tagging the reader's fill mode.
pub enum ReadSource {
    /// No source: only pre-buffered bytes can be read.
    None,
    /// Synchronous source.
    Blocking(Box<dyn std::io::Read + Send>),
    /// Asynchronous source.
    NonBlocking(Box<dyn AsyncRead + Send + Unpin>),
}

impl ReadSource {
    /// The fill mode this source imposes.
    pub fn mode(&self) -> FlushMode {
        match self {
            ReadSource::None => FlushMode::None,
            ReadSource::Blocking(_) => FlushMode::Blocking,
            ReadSource::NonBlocking(_) => FlushMode::NonBlocking,
        }
    }
}

/// Buffered reader for the PostgreSQL wire protocol.
pub struct PgReader {
    buf: BytesMut,
    source: ReadSource,
    /// Remaining byte count of the value envelope the caller is decoding,
    /// when one is in scope.
    value_len: Option<usize>,
    last_span: Bytes,
    initialized: bool,
}

impl PgReader {
    /// Create a reader with no source and nothing buffered.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            source: ReadSource::None,
            value_len: None,
            last_span: Bytes::new(),
            initialized: false,
        }
    }

    /// Create a reader over a pre-buffered byte sequence.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut reader = Self::new();
        reader.buf.extend_from_slice(bytes);
        reader.initialized = true;
        reader
    }

    /// Bind the reader to a source for one logical flow.
    ///
    /// Fails with `ConcurrentUse` if called again before `reset`.
    pub fn initialize(&mut self, source: ReadSource) -> PgResult<()> {
        if self.initialized {
            return Err(PgError::ConcurrentUse);
        }
        self.source = source;
        self.initialized = true;
        Ok(())
    }

    /// End the current flow and discard buffered bytes.
    pub fn reset(&mut self) {
        self.source = ReadSource::None;
        self.buf.clear();
        self.value_len = None;
        self.last_span = Bytes::new();
        self.initialized = false;
    }

    /// Scope subsequent reads to a value envelope of `len` bytes, as
    /// consumed from the caller's length field. Fixed-width converters
    /// validate against it; variable-width converters read exactly it.
    pub fn begin_value(&mut self, len: usize) {
        self.value_len = Some(len);
    }

    /// Remaining bytes of the value envelope, when one is in scope.
    pub fn value_len(&self) -> Option<usize> {
        self.value_len
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn consume(&mut self, n: usize) {
        if let Some(len) = &mut self.value_len {
            *len = len.saturating_sub(n);
        }
    }

    /// Make at least `n` bytes available, filling from a blocking source
    /// if necessary.
    pub fn ensure(&mut self, n: usize) -> PgResult<()> {
        while self.buf.len() < n {
            match &mut self.source {
                ReadSource::Blocking(source) => {
                    let mut chunk = [0u8; READ_CHUNK];
                    let got = source.read(&mut chunk)?;
                    if got == 0 {
                        return Err(PgError::invalid_data("stream", "unexpected end of input"));
                    }
                    self.buf.extend_from_slice(&chunk[..got]);
                }
                ReadSource::None => {
                    return Err(PgError::invalid_data("stream", "unexpected end of value"));
                }
                ReadSource::NonBlocking(_) => {
                    return Err(PgError::WrongFlushMode {
                        called: "ensure",
                        mode: FlushMode::NonBlocking,
                    });
                }
            }
        }
        Ok(())
    }

    /// Make at least `n` bytes available, awaiting a non-blocking source
    /// if necessary. Cancellation is checked at each suspension point.
    pub async fn ensure_async(&mut self, n: usize, cancel: &CancelToken) -> PgResult<()> {
        while self.buf.len() < n {
            match &mut self.source {
                ReadSource::NonBlocking(source) => {
                    cancel.check()?;
                    if self.buf.capacity() - self.buf.len() < READ_CHUNK {
                        self.buf.reserve(READ_CHUNK * 2);
                    }
                    let got = source.read_buf(&mut self.buf).await?;
                    if got == 0 {
                        return Err(PgError::invalid_data("stream", "unexpected end of input"));
                    }
                }
                ReadSource::None => {
                    return Err(PgError::invalid_data("stream", "unexpected end of value"));
                }
                ReadSource::Blocking(_) => {
                    return Err(PgError::WrongFlushMode {
                        called: "ensure_async",
                        mode: FlushMode::Blocking,
                    });
                }
            }
        }
        Ok(())
    }

    // ==================== Primitive reads ====================

    pub fn read_byte(&mut self) -> PgResult<u8> {
        self.ensure(1)?;
        self.consume(1);
        Ok(self.buf.get_u8())
    }

    pub fn read_i16(&mut self) -> PgResult<i16> {
        self.ensure(2)?;
        self.consume(2);
        Ok(self.buf.get_i16())
    }

    pub fn read_i32(&mut self) -> PgResult<i32> {
        self.ensure(4)?;
        self.consume(4);
        Ok(self.buf.get_i32())
    }

    pub fn read_i64(&mut self) -> PgResult<i64> {
        self.ensure(8)?;
        self.consume(8);
        Ok(self.buf.get_i64())
    }

    pub fn read_u32(&mut self) -> PgResult<u32> {
        self.ensure(4)?;
        self.consume(4);
        Ok(self.buf.get_u32())
    }

    /// Borrow the next `n` bytes. The span is valid until the next call
    /// on this reader.
    pub fn read_bytes(&mut self, n: usize) -> PgResult<&[u8]> {
        self.ensure(n)?;
        self.consume(n);
        self.last_span = self.buf.split_to(n).freeze();
        Ok(&self.last_span)
    }

    // ==================== Async variants ====================

    pub async fn read_byte_async(&mut self, cancel: &CancelToken) -> PgResult<u8> {
        self.ensure_async(1, cancel).await?;
        self.consume(1);
        Ok(self.buf.get_u8())
    }

    pub async fn read_i16_async(&mut self, cancel: &CancelToken) -> PgResult<i16> {
        self.ensure_async(2, cancel).await?;
        self.consume(2);
        Ok(self.buf.get_i16())
    }

    pub async fn read_i32_async(&mut self, cancel: &CancelToken) -> PgResult<i32> {
        self.ensure_async(4, cancel).await?;
        self.consume(4);
        Ok(self.buf.get_i32())
    }

    pub async fn read_i64_async(&mut self, cancel: &CancelToken) -> PgResult<i64> {
        self.ensure_async(8, cancel).await?;
        self.consume(8);
        Ok(self.buf.get_i64())
    }

    pub async fn read_u32_async(&mut self, cancel: &CancelToken) -> PgResult<u32> {
        self.ensure_async(4, cancel).await?;
        self.consume(4);
        Ok(self.buf.get_u32())
    }

    pub async fn read_bytes_async(&mut self, n: usize, cancel: &CancelToken) -> PgResult<&[u8]> {
        self.ensure_async(n, cancel).await?;
        self.consume(n);
        self.last_span = self.buf.split_to(n).freeze();
        Ok(&self.last_span)
    }
}

impl Default for PgReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_width_reads() {
        let mut bytes = Vec::new();
        bytes.push(0x7F);
        bytes.extend_from_slice(&(-2i16).to_be_bytes());
        bytes.extend_from_slice(&42i32.to_be_bytes());
        bytes.extend_from_slice(&(-1i64).to_be_bytes());
        bytes.extend_from_slice(&25u32.to_be_bytes());

        let mut r = PgReader::from_bytes(&bytes);
        assert_eq!(r.read_byte().unwrap(), 0x7F);
        assert_eq!(r.read_i16().unwrap(), -2);
        assert_eq!(r.read_i32().unwrap(), 42);
        assert_eq!(r.read_i64().unwrap(), -1);
        assert_eq!(r.read_u32().unwrap(), 25);
    }

    #[test]
    fn test_read_past_end() {
        let mut r = PgReader::from_bytes(&[0, 0]);
        assert!(matches!(
            r.read_i32(),
            Err(PgError::InvalidWireData { .. })
        ));
    }

    #[test]
    fn test_value_scoping_consumes() {
        let mut r = PgReader::from_bytes(&42i32.to_be_bytes());
        r.begin_value(4);
        assert_eq!(r.value_len(), Some(4));
        r.read_i16().unwrap();
        assert_eq!(r.value_len(), Some(2));
    }

    #[test]
    fn test_read_bytes_span() {
        let mut r = PgReader::from_bytes(b"hello!");
        assert_eq!(r.read_bytes(5).unwrap(), b"hello");
        assert_eq!(r.read_byte().unwrap(), b'!');
    }

    #[test]
    fn test_blocking_fill() {
        let data: Vec<u8> = 7i32.to_be_bytes().to_vec();
        let mut r = PgReader::new();
        r.initialize(ReadSource::Blocking(Box::new(std::io::Cursor::new(data))))
            .unwrap();
        assert_eq!(r.read_i32().unwrap(), 7);
        assert!(matches!(r.initialize(ReadSource::None), Err(PgError::ConcurrentUse)));
    }

    #[tokio::test]
    async fn test_async_fill_and_cancel() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut r = PgReader::new();
        r.initialize(ReadSource::NonBlocking(Box::new(rx))).unwrap();

        use tokio::io::AsyncWriteExt;
        tx.write_all(&9i64.to_be_bytes()).await.unwrap();

        let cancel = CancelToken::new();
        assert_eq!(r.read_i64_async(&cancel).await.unwrap(), 9);

        // A cancelled token is observed at the next suspension point.
        cancel.cancel();
        let err = r.read_i32_async(&cancel).await.unwrap_err();
        assert!(matches!(err, PgError::Cancelled));
    }
}
