//! Parameter binding: the two-phase size/write protocol.
//!
//! The extended-query protocol requires a parameter's byte length before
//! its bytes. Phase one resolves the converter, checks the null
//! predicate and runs the size phase, keeping the returned write state;
//! phase two replays that state into the wire writer and invokes the
//! converter. A SQL NULL parameter records `size = None` and is skipped
//! entirely by phase two (the caller encodes the `-1` length field).
//!
//! Two entry points exist: the typed functions monomorphize over a
//! concrete converter for hot call sites; the `Parameter` path carries a
//! boxed value through the object-safe converter facade.

use crate::convert::info::{ConverterInfo, ConverterResolution};
use crate::convert::{negotiate_format, PgConverter, SizeContext};
use crate::error::{PgError, PgResult};
use crate::protocol::writer::{BufferPool, PgWriter, WriteSink};
use crate::protocol::{CancelToken, DataFormat, FlushMode, ValueSize, WriteState};
use std::any::Any;
use std::sync::Arc;

/// Outcome of the size phase for a statically-typed value.
pub struct SizedValue {
    /// `None` means the value encodes as SQL NULL.
    pub size: Option<ValueSize>,
    /// The format that won negotiation.
    pub format: DataFormat,
    /// Write state to replay into the write phase.
    pub write_state: Option<WriteState>,
}

impl SizedValue {
    /// Whether the value encodes as SQL NULL.
    pub fn is_db_null(&self) -> bool {
        self.size.is_none()
    }
}

/// A bound parameter: boxed value plus everything phase one decided.
pub struct Parameter {
    value: Box<dyn Any + Send + Sync>,
    resolution: ConverterResolution,
    size: Option<ValueSize>,
    format: DataFormat,
    write_state: Option<WriteState>,
}

impl Parameter {
    /// `None` means the parameter encodes as SQL NULL.
    pub fn size(&self) -> Option<ValueSize> {
        self.size
    }

    /// Whether the parameter encodes as SQL NULL.
    pub fn is_db_null(&self) -> bool {
        self.size.is_none()
    }

    /// The negotiated format.
    pub fn format(&self) -> DataFormat {
        self.format
    }

    /// The resolution phase one produced.
    pub fn resolution(&self) -> &ConverterResolution {
        &self.resolution
    }
}

impl std::fmt::Debug for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parameter")
            .field("size", &self.size)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

// ==================== Typed entry points ====================

/// Phase one for a statically-typed value.
pub fn size_value<C: PgConverter>(
    converter: &C,
    value: &C::Value,
    buffer_len: usize,
    format_hint: Option<DataFormat>,
) -> PgResult<SizedValue> {
    let format = negotiate_format(
        |f| converter.can_convert(f),
        converter.preferred_format(),
        std::any::type_name::<C::Value>(),
        format_hint,
    )?;
    if converter.is_db_null(value) {
        return Ok(SizedValue {
            size: None,
            format,
            write_state: None,
        });
    }
    let mut ctx = SizeContext::new(format, buffer_len);
    let size = converter.size(&mut ctx, value)?;
    Ok(SizedValue {
        size: Some(size),
        format,
        write_state: ctx.take_state(),
    })
}

/// Phase two for a statically-typed value, synchronous path.
///
/// Rejects non-blocking writers; skips entirely for SQL NULL.
pub fn write_value<C: PgConverter>(
    writer: &mut PgWriter,
    converter: &C,
    value: &C::Value,
    sized: SizedValue,
) -> PgResult<()> {
    if writer.flush_mode() == FlushMode::NonBlocking {
        return Err(PgError::WrongFlushMode {
            called: "write_value",
            mode: FlushMode::NonBlocking,
        });
    }
    if sized.size.is_none() {
        return Ok(());
    }
    writer.set_format(sized.format);
    writer.set_write_state(sized.write_state);
    converter.write(writer, value)
}

/// Phase two for a statically-typed value, asynchronous path.
///
/// Rejects blocking writers; skips entirely for SQL NULL.
pub async fn write_value_async<C: PgConverter>(
    writer: &mut PgWriter,
    converter: &C,
    value: &C::Value,
    sized: SizedValue,
    cancel: &CancelToken,
) -> PgResult<()> {
    if writer.flush_mode() == FlushMode::Blocking {
        return Err(PgError::WrongFlushMode {
            called: "write_value_async",
            mode: FlushMode::Blocking,
        });
    }
    if sized.size.is_none() {
        return Ok(());
    }
    writer.set_format(sized.format);
    writer.set_write_state(sized.write_state);
    converter.write_async(writer, value, cancel).await
}

// ==================== Dynamic entry points ====================

/// Phase one for a boxed value: resolve, null-check, size.
pub fn bind_parameter(
    info: &ConverterInfo,
    value: Box<dyn Any + Send + Sync>,
    buffer_len: usize,
    format_hint: Option<DataFormat>,
) -> PgResult<Parameter> {
    let resolution = info.resolution_for_object(value.as_ref())?;
    if resolution.converter.is_db_null_object(value.as_ref())? {
        tracing::trace!(wire = %resolution.wire_type, "parameter is SQL NULL");
        return Ok(Parameter {
            value,
            format: info.negotiate_format(format_hint)?,
            resolution,
            size: None,
            write_state: None,
        });
    }
    let (size, write_state, format) =
        info.preferred_size(&resolution, value.as_ref(), buffer_len, format_hint)?;
    tracing::trace!(wire = %resolution.wire_type, ?size, "sized parameter");
    Ok(Parameter {
        value,
        resolution,
        size: Some(size),
        format,
        write_state,
    })
}

/// Phase two for a boxed value, synchronous path.
pub fn write_parameter(writer: &mut PgWriter, param: &mut Parameter) -> PgResult<()> {
    if writer.flush_mode() == FlushMode::NonBlocking {
        return Err(PgError::WrongFlushMode {
            called: "write_parameter",
            mode: FlushMode::NonBlocking,
        });
    }
    if param.size.is_none() {
        return Ok(());
    }
    writer.set_format(param.format);
    writer.set_write_state(param.write_state.take());
    param
        .resolution
        .converter
        .write_object(writer, param.value.as_ref())
}

/// Phase two for a boxed value, asynchronous path.
pub async fn write_parameter_async(
    writer: &mut PgWriter,
    param: &mut Parameter,
    cancel: &CancelToken,
) -> PgResult<()> {
    if writer.flush_mode() == FlushMode::Blocking {
        return Err(PgError::WrongFlushMode {
            called: "write_parameter_async",
            mode: FlushMode::Blocking,
        });
    }
    if param.size.is_none() {
        return Ok(());
    }
    writer.set_format(param.format);
    writer.set_write_state(param.write_state.take());
    param
        .resolution
        .converter
        .write_object_async(writer, param.value.as_ref(), cancel)
        .await
}

// ==================== Buffered capture ====================

/// Capture a parameter's bytes into a pooled in-memory buffer instead of
/// streaming them, for prepared-statement parameter caching.
///
/// The size phase runs first so the buffer is reserved exactly; `None`
/// means the parameter is SQL NULL (the Bind message encodes it as a
/// `-1` length with no payload).
pub fn capture_parameter(
    catalog: &Arc<crate::protocol::catalog::TypeCatalog>,
    pool: &Arc<BufferPool>,
    info: &ConverterInfo,
    value: &(dyn Any + Send + Sync),
    format_hint: Option<DataFormat>,
) -> PgResult<Option<Vec<u8>>> {
    let resolution = info.resolution_for_object(value)?;
    if resolution.converter.is_db_null_object(value)? {
        return Ok(None);
    }
    let mut writer = PgWriter::with_pool(Arc::clone(catalog), Arc::clone(pool));
    let (size, write_state, format) = info.preferred_size(&resolution, value, 0, format_hint)?;
    if let Some(n) = size.upper_bound() {
        writer.reserve(n);
    }
    writer.initialize(WriteSink::None)?;
    writer.set_format(format);
    writer.set_write_state(write_state);
    resolution.converter.write_object(&mut writer, value)?;
    let bytes = writer.buffer().to_vec();
    debug_assert!(
        size.exact().map_or(true, |n| n == bytes.len()),
        "write phase produced {} bytes for an exact size of {:?}",
        bytes.len(),
        size,
    );
    writer.reset();
    Ok(Some(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::nullable::NullableConverter;
    use crate::convert::numeric::Int4Converter;
    use crate::convert::resolver::resolve_value_type;
    use crate::protocol::catalog::TypeCatalog;

    fn catalog() -> Arc<TypeCatalog> {
        Arc::new(TypeCatalog::with_builtins())
    }

    #[test]
    fn test_typed_two_phase() {
        let sized = size_value(&Int4Converter, &42, 0, Some(DataFormat::Binary)).unwrap();
        assert_eq!(sized.size, Some(ValueSize::Exact(4)));
        assert_eq!(sized.format, DataFormat::Binary);

        let mut w = PgWriter::new(catalog());
        write_value(&mut w, &Int4Converter, &42, sized).unwrap();
        assert_eq!(w.buffer(), [0x00, 0x00, 0x00, 0x2A]);
    }

    #[test]
    fn test_typed_null_skips_write() {
        let converter = NullableConverter::new(Int4Converter);
        let sized = size_value(&converter, &None, 0, None).unwrap();
        assert!(sized.is_db_null());

        let mut w = PgWriter::new(catalog());
        write_value(&mut w, &converter, &None, sized).unwrap();
        assert!(w.buffer().is_empty());
    }

    #[test]
    fn test_sync_write_rejects_nonblocking_writer() {
        let (client, _server) = tokio::io::duplex(64);
        let mut w = PgWriter::new(catalog());
        w.initialize(WriteSink::NonBlocking(Box::new(client))).unwrap();

        let sized = size_value(&Int4Converter, &1, 0, None).unwrap();
        assert!(matches!(
            write_value(&mut w, &Int4Converter, &1, sized),
            Err(PgError::WrongFlushMode { .. })
        ));
    }

    #[tokio::test]
    async fn test_async_write_rejects_blocking_writer() {
        let mut w = PgWriter::new(catalog());
        w.initialize(WriteSink::Blocking(Box::new(Vec::new()))).unwrap();

        let sized = size_value(&Int4Converter, &1, 0, None).unwrap();
        let cancel = CancelToken::new();
        assert!(matches!(
            write_value_async(&mut w, &Int4Converter, &1, sized, &cancel).await,
            Err(PgError::WrongFlushMode { .. })
        ));
    }

    #[test]
    fn test_dynamic_two_phase() {
        let catalog = catalog();
        let info = resolve_value_type::<i32>(None, &catalog).unwrap();
        let mut param =
            bind_parameter(&info, Box::new(42i32), 0, Some(DataFormat::Binary)).unwrap();
        assert_eq!(param.size(), Some(ValueSize::Exact(4)));

        let mut w = PgWriter::new(Arc::clone(&catalog));
        write_parameter(&mut w, &mut param).unwrap();
        assert_eq!(w.buffer(), [0x00, 0x00, 0x00, 0x2A]);
    }

    #[test]
    fn test_dynamic_null_parameter() {
        let catalog = catalog();
        let info = resolve_value_type::<Option<i32>>(None, &catalog).unwrap();
        let value: Option<i32> = None;
        let mut param = bind_parameter(&info, Box::new(value), 0, None).unwrap();
        assert!(param.is_db_null());

        let mut w = PgWriter::new(Arc::clone(&catalog));
        write_parameter(&mut w, &mut param).unwrap();
        assert!(w.buffer().is_empty());
    }

    #[test]
    fn test_capture_parameter() {
        let catalog = catalog();
        let pool = BufferPool::new(4);
        let info = resolve_value_type::<String>(None, &catalog).unwrap();
        let value: Box<dyn Any + Send + Sync> = Box::new("hi".to_string());
        let bytes = capture_parameter(&catalog, &pool, &info, value.as_ref(), None)
            .unwrap()
            .expect("non-null");
        assert_eq!(bytes, b"hi");

        // NULL captures as None, mirroring a -1 length in Bind.
        let info = resolve_value_type::<Option<String>>(None, &catalog).unwrap();
        let value: Box<dyn Any + Send + Sync> = Box::new(Option::<String>::None);
        assert!(capture_parameter(&catalog, &pool, &info, value.as_ref(), None)
            .unwrap()
            .is_none());
    }
}
