//! Buffered wire writer.
//!
//! `PgWriter` accumulates protocol bytes in a `BytesMut` and flushes them
//! to a sink according to its flush mode. Exactly one logical flow drives
//! a writer at a time; the `initialize → use → reset` lifecycle enforces
//! single use, and pooled buffers are owned by the writer until reset.

use crate::error::{PgError, PgResult};
use crate::protocol::catalog::{TypeCatalog, WireTypeId};
use crate::protocol::{CancelToken, DataFormat, FlushMode, WriteState};
use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Initial buffer capacity (64KB, sized for pipelined batches).
pub(crate) const BUFFER_CAPACITY: usize = 65536;

/// Destination of flushed bytes, tagging the writer's flush mode.
pub enum WriteSink {
    /// In-memory accumulation; flushing is not permitted.
    None,
    /// Synchronous sink; `flush` is permitted.
    Blocking(Box<dyn std::io::Write + Send>),
    /// Asynchronous sink; `flush_async` is permitted.
    NonBlocking(Box<dyn AsyncWrite + Send + Unpin>),
}

impl WriteSink {
    /// The flush mode this sink imposes.
    pub fn mode(&self) -> FlushMode {
        match self {
            WriteSink::None => FlushMode::None,
            WriteSink::Blocking(_) => FlushMode::Blocking,
            WriteSink::NonBlocking(_) => FlushMode::NonBlocking,
        }
    }
}

/// Pool of recycled wire buffers, capped by `PgConfig::max_pool_size`.
#[derive(Debug)]
pub struct BufferPool {
    buffers: Mutex<Vec<BytesMut>>,
    max: usize,
}

impl BufferPool {
    /// Create a pool holding at most `max` idle buffers.
    pub fn new(max: usize) -> Arc<Self> {
        Arc::new(Self {
            buffers: Mutex::new(Vec::new()),
            max,
        })
    }

    /// Take a buffer from the pool, or allocate a fresh one.
    pub fn acquire(&self) -> BytesMut {
        self.buffers
            .lock()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(BUFFER_CAPACITY))
    }

    /// Return a buffer to the pool. Dropped if the pool is full.
    pub fn release(&self, mut buf: BytesMut) {
        buf.clear();
        let mut buffers = self.buffers.lock();
        if buffers.len() < self.max {
            buffers.push(buf);
        }
    }

    /// Number of idle buffers currently held.
    pub fn idle(&self) -> usize {
        self.buffers.lock().len()
    }
}

/// Continuation returned by `write_text_resumable` when the output buffer
/// filled mid-run. Pass it back after flushing to resume where encoding
/// stopped.
#[derive(Debug, Clone, Copy)]
pub struct TextResume {
    offset: usize,
}

/// Buffered writer for the PostgreSQL wire protocol.
pub struct PgWriter {
    buf: BytesMut,
    sink: WriteSink,
    catalog: Arc<TypeCatalog>,
    pool: Option<Arc<BufferPool>>,
    format: DataFormat,
    write_state: Option<WriteState>,
    flush_threshold: usize,
    flush_hold: u32,
    initialized: bool,
}

impl PgWriter {
    /// Create a writer bound to a session catalog. The writer starts
    /// uninitialized and accumulates in memory until `initialize`.
    pub fn new(catalog: Arc<TypeCatalog>) -> Self {
        Self {
            buf: BytesMut::with_capacity(BUFFER_CAPACITY),
            sink: WriteSink::None,
            catalog,
            pool: None,
            format: DataFormat::Binary,
            write_state: None,
            flush_threshold: BUFFER_CAPACITY,
            flush_hold: 0,
            initialized: false,
        }
    }

    /// Create a writer that borrows its buffer from a pool.
    pub fn with_pool(catalog: Arc<TypeCatalog>, pool: Arc<BufferPool>) -> Self {
        let mut writer = Self::new(catalog);
        writer.buf = pool.acquire();
        writer.pool = Some(pool);
        writer
    }

    /// Override the flush threshold (bytes buffered before converters are
    /// expected to flush).
    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold;
        self
    }

    /// Bind the writer to a sink for one logical flow.
    ///
    /// Fails with `ConcurrentUse` if called again before `reset`.
    pub fn initialize(&mut self, sink: WriteSink) -> PgResult<()> {
        if self.initialized {
            return Err(PgError::ConcurrentUse);
        }
        self.sink = sink;
        self.initialized = true;
        Ok(())
    }

    /// End the current flow: drop the sink, clear per-flow state and
    /// return the buffer to the pool.
    pub fn reset(&mut self) {
        self.sink = WriteSink::None;
        self.write_state = None;
        self.format = DataFormat::Binary;
        self.flush_hold = 0;
        self.initialized = false;
        if let Some(pool) = &self.pool {
            pool.release(std::mem::take(&mut self.buf));
            self.buf = pool.acquire();
        } else {
            self.buf.clear();
        }
    }

    /// The flush mode imposed by the current sink.
    pub fn flush_mode(&self) -> FlushMode {
        self.sink.mode()
    }

    /// The session catalog this writer resolves OIDs against.
    pub fn catalog(&self) -> &Arc<TypeCatalog> {
        &self.catalog
    }

    /// The format of the value currently being written.
    pub fn format(&self) -> DataFormat {
        self.format
    }

    /// Set the format of the value about to be written.
    pub fn set_format(&mut self, format: DataFormat) {
        self.format = format;
    }

    /// Install the write state recorded at size time for the value about
    /// to be written.
    pub fn set_write_state(&mut self, state: Option<WriteState>) {
        self.write_state = state;
    }

    /// Take the write state recorded at size time.
    pub fn take_write_state(&mut self) -> Option<WriteState> {
        self.write_state.take()
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// The buffered bytes.
    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    /// Capacity available before the flush threshold.
    pub fn buffer_capacity(&self) -> usize {
        self.flush_threshold
    }

    /// Reserve room for `additional` bytes.
    pub fn reserve(&mut self, additional: usize) {
        self.buf.reserve(additional);
    }

    /// Whether a converter should flush before appending `additional`
    /// bytes. Always false for in-memory sinks and while flushes are
    /// suspended.
    pub fn should_flush(&self, additional: usize) -> bool {
        self.flush_hold == 0
            && !matches!(self.sink, WriteSink::None)
            && self.buf.len() + additional > self.flush_threshold
    }

    /// Suppress flushes until the matching `resume_flush`, so a composite
    /// write (e.g. a header and its payload) lands in one piece.
    pub fn suspend_flush(&mut self) {
        self.flush_hold += 1;
    }

    /// Re-enable flushes suppressed by `suspend_flush`.
    pub fn resume_flush(&mut self) {
        self.flush_hold = self.flush_hold.saturating_sub(1);
    }

    // ==================== Primitive writes ====================

    pub fn write_byte(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_i16(&mut self, v: i16) {
        self.buf.put_i16(v);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    /// Append UTF-8 text without a length prefix; the length field is the
    /// caller's concern.
    pub fn write_text(&mut self, text: &str) {
        self.buf.extend_from_slice(text.as_bytes());
    }

    /// Append as much of `text` as fits below the flush threshold.
    ///
    /// Returns a continuation when the buffer filled mid-run; the caller
    /// flushes and passes the continuation back to resume. Returns `None`
    /// once the text is fully buffered.
    pub fn write_text_resumable(
        &mut self,
        text: &str,
        resume: Option<TextResume>,
    ) -> Option<TextResume> {
        let start = resume.map_or(0, |r| r.offset);
        let rest = &text.as_bytes()[start..];
        if !self.should_flush(rest.len()) {
            self.buf.extend_from_slice(rest);
            return None;
        }
        let room = self.flush_threshold.saturating_sub(self.buf.len());
        let take = room.min(rest.len());
        self.buf.extend_from_slice(&rest[..take]);
        if start + take == text.len() {
            None
        } else {
            Some(TextResume {
                offset: start + take,
            })
        }
    }

    /// Append an arbitrary byte sequence, flushing between chunks as the
    /// threshold is crossed.
    pub fn write_raw(&mut self, bytes: &[u8]) -> PgResult<()> {
        let mut rest = bytes;
        loop {
            if !self.should_flush(rest.len()) {
                self.buf.extend_from_slice(rest);
                return Ok(());
            }
            let room = self.flush_threshold.saturating_sub(self.buf.len());
            let take = room.min(rest.len());
            self.buf.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if rest.is_empty() {
                return Ok(());
            }
            self.flush()?;
        }
    }

    /// Async variant of `write_raw` for non-blocking sinks.
    pub async fn write_raw_async(&mut self, bytes: &[u8], cancel: &CancelToken) -> PgResult<()> {
        let mut rest = bytes;
        loop {
            if !self.should_flush(rest.len()) {
                self.buf.extend_from_slice(rest);
                return Ok(());
            }
            let room = self.flush_threshold.saturating_sub(self.buf.len());
            let take = room.min(rest.len());
            self.buf.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if rest.is_empty() {
                return Ok(());
            }
            self.flush_async(cancel).await?;
        }
    }

    /// Resolve a wire type identity through the session catalog and write
    /// the resulting OID.
    pub fn write_as_oid(&mut self, id: &WireTypeId) -> PgResult<()> {
        let oid = self.catalog.oid_of(id)?;
        self.write_u32(oid);
        Ok(())
    }

    // ==================== Flushing ====================

    /// Flush buffered bytes to a blocking sink.
    pub fn flush(&mut self) -> PgResult<()> {
        match &mut self.sink {
            WriteSink::Blocking(sink) => {
                sink.write_all(&self.buf)?;
                sink.flush()?;
                self.buf.clear();
                Ok(())
            }
            other => Err(PgError::WrongFlushMode {
                called: "flush",
                mode: other.mode(),
            }),
        }
    }

    /// Flush buffered bytes to a non-blocking sink.
    pub async fn flush_async(&mut self, cancel: &CancelToken) -> PgResult<()> {
        match &mut self.sink {
            WriteSink::NonBlocking(sink) => {
                cancel.check()?;
                sink.write_all(&self.buf).await?;
                sink.flush().await?;
                self.buf.clear();
                Ok(())
            }
            other => Err(PgError::WrongFlushMode {
                called: "flush_async",
                mode: other.mode(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::catalog::names;

    fn writer() -> PgWriter {
        PgWriter::new(Arc::new(TypeCatalog::with_builtins()))
    }

    #[test]
    fn test_primitive_writes_big_endian() {
        let mut w = writer();
        w.write_byte(0xAB);
        w.write_i16(-2);
        w.write_i32(42);
        w.write_i64(1);
        w.write_u32(25);
        assert_eq!(
            w.buffer(),
            [
                0xAB, 0xFF, 0xFE, 0x00, 0x00, 0x00, 0x2A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x01, 0x00, 0x00, 0x00, 0x19
            ]
        );
    }

    #[test]
    fn test_write_as_oid_uses_catalog() {
        let mut w = writer();
        w.write_as_oid(&WireTypeId::name(names::TEXT)).unwrap();
        assert_eq!(w.buffer(), 25u32.to_be_bytes());

        let err = w
            .write_as_oid(&WireTypeId::name(crate::protocol::catalog::WireTypeName::new(
                "bogus",
            )))
            .unwrap_err();
        assert!(matches!(err, PgError::UnknownType(_)));
    }

    #[test]
    fn test_double_initialize_fails() {
        let mut w = writer();
        w.initialize(WriteSink::Blocking(Box::new(Vec::new()))).unwrap();
        assert!(matches!(
            w.initialize(WriteSink::None),
            Err(PgError::ConcurrentUse)
        ));
        w.reset();
        w.initialize(WriteSink::None).unwrap();
    }

    #[test]
    fn test_flush_mode_mismatch() {
        let mut w = writer();
        // Uninitialized writer accumulates in memory: no flushing at all.
        assert!(matches!(
            w.flush(),
            Err(PgError::WrongFlushMode {
                mode: FlushMode::None,
                ..
            })
        ));

        w.initialize(WriteSink::Blocking(Box::new(Vec::new()))).unwrap();
        w.write_i32(1);
        w.flush().unwrap();
        assert_eq!(w.buffered(), 0);
    }

    #[test]
    fn test_should_flush_respects_hold_and_threshold() {
        let mut w = writer().with_flush_threshold(8);
        w.initialize(WriteSink::Blocking(Box::new(Vec::new()))).unwrap();
        w.write_i32(0);
        assert!(!w.should_flush(4));
        assert!(w.should_flush(5));
        w.suspend_flush();
        assert!(!w.should_flush(5));
        w.resume_flush();
        assert!(w.should_flush(5));
    }

    #[test]
    fn test_write_raw_chunks_through_blocking_sink() {
        use std::io::Write;
        use std::sync::Arc as StdArc;

        #[derive(Clone)]
        struct Shared(StdArc<Mutex<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let out = Shared(StdArc::new(Mutex::new(Vec::new())));
        let mut w = writer().with_flush_threshold(4);
        w.initialize(WriteSink::Blocking(Box::new(out.clone()))).unwrap();
        w.write_raw(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]).unwrap();
        w.flush().unwrap();
        assert_eq!(out.0.lock().as_slice(), &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_text_resumable_continuation() {
        let mut w = writer().with_flush_threshold(4);
        w.initialize(WriteSink::Blocking(Box::new(Vec::new()))).unwrap();

        let mut resume = w.write_text_resumable("hello world", None);
        assert!(resume.is_some());
        let mut rounds = 0;
        while let Some(r) = resume {
            w.flush().unwrap();
            resume = w.write_text_resumable("hello world", Some(r));
            rounds += 1;
            assert!(rounds < 16, "continuation did not converge");
        }
        // The tail is still buffered.
        assert!(w.buffered() > 0);
    }

    #[test]
    fn test_buffer_pool_cap() {
        let pool = BufferPool::new(1);
        let a = pool.acquire();
        let b = pool.acquire();
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_reset_returns_pooled_buffer() {
        let pool = BufferPool::new(4);
        let mut w = PgWriter::with_pool(Arc::new(TypeCatalog::with_builtins()), Arc::clone(&pool));
        w.initialize(WriteSink::None).unwrap();
        w.write_i32(7);
        w.reset();
        assert_eq!(w.buffered(), 0);
        assert!(pool.idle() >= 1);
    }
}
