//! Converter layer: codecs between Rust values and PostgreSQL wire
//! formats.
//!
//! A [`PgConverter`] is the primitive unit of encode/decode for one Rust
//! type and one wire type. Hot call sites take a concrete converter so
//! the compiler monomorphizes the whole path; boxed values go through the
//! non-generic [`ObjectConverter`] facade instead, which dispatches back
//! into the generic implementation.
//!
//! Encoding is two-phase: `size` first (which may record opaque write
//! state in the [`SizeContext`]), then `write`/`write_async` against the
//! wire writer carrying that state. `is_db_null` values are never sized
//! or written; the caller encodes SQL NULL in the length field.

pub mod array;
pub mod info;
pub mod nullable;
pub mod numeric;
pub mod resolver;
pub mod temporal;
pub mod text;
pub mod uuid;

use crate::error::{PgError, PgResult};
use crate::protocol::reader::PgReader;
use crate::protocol::writer::PgWriter;
use crate::protocol::{CancelToken, DataFormat, ValueSize, WriteState};
use std::any::{Any, TypeId};
use std::future::Future;
use std::pin::Pin;

/// Boxed future used by the object-safe converter facade.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How a converter recognizes SQL NULL on the application side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullKind {
    /// The value type has no null sentinel.
    None,
    /// The language's absent sentinel (`Option::None`) encodes as NULL.
    Default,
    /// The converter inspects value contents to decide.
    Extended,
}

/// Context handed to the size phase.
///
/// `write_state` is an out-slot: anything a converter records here is
/// handed back verbatim to the write phase for the same value.
pub struct SizeContext {
    /// The writer's buffer capacity, for converters that bound their
    /// output against it.
    pub buffer_len: usize,
    /// The negotiated format the value will be written in.
    pub format: DataFormat,
    write_state: Option<WriteState>,
}

impl SizeContext {
    /// Create a context for the given negotiated format.
    pub fn new(format: DataFormat, buffer_len: usize) -> Self {
        Self {
            buffer_len,
            format,
            write_state: None,
        }
    }

    /// Record write state to be replayed at write time.
    pub fn set_state<S: Any + Send + Sync>(&mut self, state: S) {
        self.write_state = Some(Box::new(state));
    }

    /// Take the recorded write state.
    pub fn take_state(&mut self) -> Option<WriteState> {
        self.write_state.take()
    }
}

/// Codec between one Rust type and one wire type.
///
/// Implementations are immutable and safe to share across sessions; all
/// per-call state flows through the context and the writer. The async
/// entry points suspend only inside the wire reader/writer (flush, fill)
/// and complete synchronously when no suspension is needed.
pub trait PgConverter: Send + Sync + 'static {
    /// The Rust type this converter encodes and decodes.
    type Value: Send + Sync + 'static;

    /// Whether the converter can operate in the given format.
    fn can_convert(&self, format: DataFormat) -> bool;

    /// The format the converter prefers when the caller has no opinion.
    fn preferred_format(&self) -> DataFormat {
        DataFormat::Binary
    }

    /// How SQL NULL is recognized on the application side.
    fn null_kind(&self) -> NullKind {
        NullKind::None
    }

    /// Whether this value encodes as SQL NULL. Callers consult this
    /// before sizing; a null value is never sized or written.
    fn is_db_null(&self, _value: &Self::Value) -> bool {
        false
    }

    /// The value that represents a decoded SQL NULL, for converters that
    /// have one. Consumed by composite decoders (arrays).
    fn db_null_value(&self) -> Option<Self::Value> {
        None
    }

    /// Compute the encoded size of `value` in the context's format,
    /// optionally recording write state for the write phase.
    fn size(&self, ctx: &mut SizeContext, value: &Self::Value) -> PgResult<ValueSize>;

    /// Write `value` synchronously. May flush only through a `Blocking`
    /// writer.
    fn write(&self, writer: &mut PgWriter, value: &Self::Value) -> PgResult<()>;

    /// Write `value`, suspending at writer flush points. May flush only
    /// through a `NonBlocking` writer.
    fn write_async<'a>(
        &'a self,
        writer: &'a mut PgWriter,
        value: &'a Self::Value,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<()>> + Send + 'a;

    /// Read one value synchronously.
    fn read(&self, reader: &mut PgReader) -> PgResult<Self::Value>;

    /// Read one value, suspending at reader fill points.
    fn read_async<'a>(
        &'a self,
        reader: &'a mut PgReader,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<Self::Value>> + Send + 'a;
}

/// Negotiate the format for a converter given the caller's hint.
///
/// The hint wins when supported; otherwise the converter's preference;
/// otherwise the remaining format; otherwise `FormatNotSupported`.
pub(crate) fn negotiate_format(
    can_convert: impl Fn(DataFormat) -> bool,
    preferred: DataFormat,
    type_name: &'static str,
    hint: Option<DataFormat>,
) -> PgResult<DataFormat> {
    if let Some(format) = hint {
        if can_convert(format) {
            return Ok(format);
        }
    }
    if can_convert(preferred) {
        return Ok(preferred);
    }
    if can_convert(preferred.other()) {
        return Ok(preferred.other());
    }
    Err(PgError::FormatNotSupported {
        format: hint.unwrap_or(preferred),
        type_name,
    })
}

/// Validate that the value envelope in scope matches a fixed width.
pub(crate) fn check_value_len(
    reader: &PgReader,
    expected: usize,
    wire_type: &'static str,
) -> PgResult<()> {
    if let Some(len) = reader.value_len() {
        if len != expected {
            return Err(PgError::invalid_data(
                wire_type,
                format!("expected {} bytes, got {}", expected, len),
            ));
        }
    }
    Ok(())
}

/// Non-generic, object-safe facade over [`PgConverter`].
///
/// Used by the dynamic parameter path for boxed values; every method
/// downcasts and dispatches into the generic implementation. A blanket
/// impl covers all converters.
pub trait ObjectConverter: Send + Sync {
    /// `TypeId` of the converter's value type.
    fn value_type(&self) -> TypeId;
    /// Name of the converter's value type, for diagnostics.
    fn value_type_name(&self) -> &'static str;
    fn can_convert(&self, format: DataFormat) -> bool;
    fn preferred_format(&self) -> DataFormat;
    fn null_kind(&self) -> NullKind;
    fn is_db_null_object(&self, value: &(dyn Any + Send + Sync)) -> PgResult<bool>;
    fn size_object(
        &self,
        ctx: &mut SizeContext,
        value: &(dyn Any + Send + Sync),
    ) -> PgResult<ValueSize>;
    fn write_object(
        &self,
        writer: &mut PgWriter,
        value: &(dyn Any + Send + Sync),
    ) -> PgResult<()>;
    fn write_object_async<'a>(
        &'a self,
        writer: &'a mut PgWriter,
        value: &'a (dyn Any + Send + Sync),
        cancel: &'a CancelToken,
    ) -> BoxFuture<'a, PgResult<()>>;
    fn read_object(&self, reader: &mut PgReader) -> PgResult<Box<dyn Any + Send + Sync>>;
    fn read_object_async<'a>(
        &'a self,
        reader: &'a mut PgReader,
        cancel: &'a CancelToken,
    ) -> BoxFuture<'a, PgResult<Box<dyn Any + Send + Sync>>>;
}

fn downcast<T: 'static>(value: &(dyn Any + Send + Sync)) -> PgResult<&T> {
    value.downcast_ref::<T>().ok_or_else(|| {
        PgError::resolution_failed(std::any::type_name::<T>(), "a differently-typed boxed value")
    })
}

impl<C: PgConverter> ObjectConverter for C {
    fn value_type(&self) -> TypeId {
        TypeId::of::<C::Value>()
    }

    fn value_type_name(&self) -> &'static str {
        std::any::type_name::<C::Value>()
    }

    fn can_convert(&self, format: DataFormat) -> bool {
        PgConverter::can_convert(self, format)
    }

    fn preferred_format(&self) -> DataFormat {
        PgConverter::preferred_format(self)
    }

    fn null_kind(&self) -> NullKind {
        PgConverter::null_kind(self)
    }

    fn is_db_null_object(&self, value: &(dyn Any + Send + Sync)) -> PgResult<bool> {
        Ok(self.is_db_null(downcast::<C::Value>(value)?))
    }

    fn size_object(
        &self,
        ctx: &mut SizeContext,
        value: &(dyn Any + Send + Sync),
    ) -> PgResult<ValueSize> {
        self.size(ctx, downcast::<C::Value>(value)?)
    }

    fn write_object(
        &self,
        writer: &mut PgWriter,
        value: &(dyn Any + Send + Sync),
    ) -> PgResult<()> {
        self.write(writer, downcast::<C::Value>(value)?)
    }

    fn write_object_async<'a>(
        &'a self,
        writer: &'a mut PgWriter,
        value: &'a (dyn Any + Send + Sync),
        cancel: &'a CancelToken,
    ) -> BoxFuture<'a, PgResult<()>> {
        Box::pin(async move {
            let value = downcast::<C::Value>(value)?;
            self.write_async(writer, value, cancel).await
        })
    }

    fn read_object(&self, reader: &mut PgReader) -> PgResult<Box<dyn Any + Send + Sync>> {
        Ok(Box::new(self.read(reader)?))
    }

    fn read_object_async<'a>(
        &'a self,
        reader: &'a mut PgReader,
        cancel: &'a CancelToken,
    ) -> BoxFuture<'a, PgResult<Box<dyn Any + Send + Sync>>> {
        Box::pin(async move {
            let value = self.read_async(reader, cancel).await?;
            Ok(Box::new(value) as Box<dyn Any + Send + Sync>)
        })
    }
}
