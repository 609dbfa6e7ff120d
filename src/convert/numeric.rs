//! Converters for the fixed-width numeric wire types.
//!
//! `int2`/`int4`/`int8` are big-endian two's-complement, `float8` is
//! big-endian IEEE 754, `bool` is a single byte. All are binary-only and
//! always report an exact size, so the async paths flush at most once and
//! then complete without suspending.

use crate::convert::{check_value_len, NullKind, PgConverter, SizeContext};
use crate::error::{PgError, PgResult};
use crate::protocol::catalog::WireTypeName;
use crate::protocol::reader::PgReader;
use crate::protocol::writer::PgWriter;
use crate::protocol::{CancelToken, DataFormat, ValueSize};
use std::future::Future;
use std::marker::PhantomData;

/// Converter for `int2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Int2Converter;

impl PgConverter for Int2Converter {
    type Value = i16;

    fn can_convert(&self, format: DataFormat) -> bool {
        format == DataFormat::Binary
    }

    fn size(&self, _ctx: &mut SizeContext, _value: &i16) -> PgResult<ValueSize> {
        Ok(ValueSize::Exact(2))
    }

    fn write(&self, writer: &mut PgWriter, value: &i16) -> PgResult<()> {
        writer.write_i16(*value);
        Ok(())
    }

    fn write_async<'a>(
        &'a self,
        writer: &'a mut PgWriter,
        value: &'a i16,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<()>> + Send + 'a {
        async move {
            if writer.should_flush(2) {
                writer.flush_async(cancel).await?;
            }
            writer.write_i16(*value);
            Ok(())
        }
    }

    fn read(&self, reader: &mut PgReader) -> PgResult<i16> {
        check_value_len(reader, 2, "int2")?;
        reader.read_i16()
    }

    fn read_async<'a>(
        &'a self,
        reader: &'a mut PgReader,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<i16>> + Send + 'a {
        async move {
            check_value_len(reader, 2, "int2")?;
            reader.read_i16_async(cancel).await
        }
    }
}

/// Converter for `int4`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Int4Converter;

impl PgConverter for Int4Converter {
    type Value = i32;

    fn can_convert(&self, format: DataFormat) -> bool {
        format == DataFormat::Binary
    }

    fn size(&self, _ctx: &mut SizeContext, _value: &i32) -> PgResult<ValueSize> {
        Ok(ValueSize::Exact(4))
    }

    fn write(&self, writer: &mut PgWriter, value: &i32) -> PgResult<()> {
        writer.write_i32(*value);
        Ok(())
    }

    fn write_async<'a>(
        &'a self,
        writer: &'a mut PgWriter,
        value: &'a i32,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<()>> + Send + 'a {
        async move {
            if writer.should_flush(4) {
                writer.flush_async(cancel).await?;
            }
            writer.write_i32(*value);
            Ok(())
        }
    }

    fn read(&self, reader: &mut PgReader) -> PgResult<i32> {
        check_value_len(reader, 4, "int4")?;
        reader.read_i32()
    }

    fn read_async<'a>(
        &'a self,
        reader: &'a mut PgReader,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<i32>> + Send + 'a {
        async move {
            check_value_len(reader, 4, "int4")?;
            reader.read_i32_async(cancel).await
        }
    }
}

/// Converter for `int8`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Int8Converter;

impl PgConverter for Int8Converter {
    type Value = i64;

    fn can_convert(&self, format: DataFormat) -> bool {
        format == DataFormat::Binary
    }

    fn size(&self, _ctx: &mut SizeContext, _value: &i64) -> PgResult<ValueSize> {
        Ok(ValueSize::Exact(8))
    }

    fn write(&self, writer: &mut PgWriter, value: &i64) -> PgResult<()> {
        writer.write_i64(*value);
        Ok(())
    }

    fn write_async<'a>(
        &'a self,
        writer: &'a mut PgWriter,
        value: &'a i64,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<()>> + Send + 'a {
        async move {
            if writer.should_flush(8) {
                writer.flush_async(cancel).await?;
            }
            writer.write_i64(*value);
            Ok(())
        }
    }

    fn read(&self, reader: &mut PgReader) -> PgResult<i64> {
        check_value_len(reader, 8, "int8")?;
        reader.read_i64()
    }

    fn read_async<'a>(
        &'a self,
        reader: &'a mut PgReader,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<i64>> + Send + 'a {
        async move {
            check_value_len(reader, 8, "int8")?;
            reader.read_i64_async(cancel).await
        }
    }
}

/// Converter for `float8` (big-endian IEEE 754).
#[derive(Debug, Clone, Copy, Default)]
pub struct Float8Converter;

impl PgConverter for Float8Converter {
    type Value = f64;

    fn can_convert(&self, format: DataFormat) -> bool {
        format == DataFormat::Binary
    }

    fn size(&self, _ctx: &mut SizeContext, _value: &f64) -> PgResult<ValueSize> {
        Ok(ValueSize::Exact(8))
    }

    fn write(&self, writer: &mut PgWriter, value: &f64) -> PgResult<()> {
        writer.write_i64(value.to_bits() as i64);
        Ok(())
    }

    fn write_async<'a>(
        &'a self,
        writer: &'a mut PgWriter,
        value: &'a f64,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<()>> + Send + 'a {
        async move {
            if writer.should_flush(8) {
                writer.flush_async(cancel).await?;
            }
            writer.write_i64(value.to_bits() as i64);
            Ok(())
        }
    }

    fn read(&self, reader: &mut PgReader) -> PgResult<f64> {
        check_value_len(reader, 8, "float8")?;
        Ok(f64::from_bits(reader.read_i64()? as u64))
    }

    fn read_async<'a>(
        &'a self,
        reader: &'a mut PgReader,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<f64>> + Send + 'a {
        async move {
            check_value_len(reader, 8, "float8")?;
            Ok(f64::from_bits(reader.read_i64_async(cancel).await? as u64))
        }
    }
}

/// Converter for `bool` (single byte, 0 or 1).
#[derive(Debug, Clone, Copy, Default)]
pub struct BoolConverter;

fn bool_from_byte(byte: u8) -> PgResult<bool> {
    match byte {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(PgError::invalid_data("bool", format!("byte {}", other))),
    }
}

impl PgConverter for BoolConverter {
    type Value = bool;

    fn can_convert(&self, format: DataFormat) -> bool {
        format == DataFormat::Binary
    }

    fn size(&self, _ctx: &mut SizeContext, _value: &bool) -> PgResult<ValueSize> {
        Ok(ValueSize::Exact(1))
    }

    fn write(&self, writer: &mut PgWriter, value: &bool) -> PgResult<()> {
        writer.write_byte(*value as u8);
        Ok(())
    }

    fn write_async<'a>(
        &'a self,
        writer: &'a mut PgWriter,
        value: &'a bool,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<()>> + Send + 'a {
        async move {
            if writer.should_flush(1) {
                writer.flush_async(cancel).await?;
            }
            writer.write_byte(*value as u8);
            Ok(())
        }
    }

    fn read(&self, reader: &mut PgReader) -> PgResult<bool> {
        check_value_len(reader, 1, "bool")?;
        bool_from_byte(reader.read_byte()?)
    }

    fn read_async<'a>(
        &'a self,
        reader: &'a mut PgReader,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<bool>> + Send + 'a {
        async move {
            check_value_len(reader, 1, "bool")?;
            bool_from_byte(reader.read_byte_async(cancel).await?)
        }
    }
}

/// Cross-width numeric coercion over an inner converter.
///
/// Lifts a converter for a numeric wire type (say `int4`) to any Rust
/// integer width. Conversions are checked in both directions: an
/// out-of-range value fails with `ValueOutOfRange` instead of wrapping
/// or truncating.
#[derive(Debug, Clone)]
pub struct CoercionConverter<T, C> {
    inner: C,
    target: WireTypeName,
    _value: PhantomData<fn() -> T>,
}

impl<T, C> CoercionConverter<T, C> {
    /// Wrap `inner`, labelling errors with the target wire type name.
    pub fn new(inner: C, target: WireTypeName) -> Self {
        Self {
            inner,
            target,
            _value: PhantomData,
        }
    }
}

impl<T, C> CoercionConverter<T, C>
where
    C: PgConverter,
    C::Value: Copy + TryFrom<T> + std::fmt::Display,
    T: Copy + TryFrom<C::Value> + std::fmt::Display + Send + Sync + 'static,
{
    fn narrow(&self, value: &T) -> PgResult<C::Value> {
        C::Value::try_from(*value).map_err(|_| PgError::out_of_range(&self.target, value))
    }

    fn widen(&self, value: C::Value) -> PgResult<T> {
        T::try_from(value).map_err(|_| PgError::out_of_range(&self.target, value))
    }
}

impl<T, C> PgConverter for CoercionConverter<T, C>
where
    C: PgConverter,
    C::Value: Copy + TryFrom<T> + std::fmt::Display,
    T: Copy + TryFrom<C::Value> + std::fmt::Display + Send + Sync + 'static,
{
    type Value = T;

    fn can_convert(&self, format: DataFormat) -> bool {
        self.inner.can_convert(format)
    }

    fn preferred_format(&self) -> DataFormat {
        self.inner.preferred_format()
    }

    fn null_kind(&self) -> NullKind {
        self.inner.null_kind()
    }

    fn size(&self, ctx: &mut SizeContext, value: &T) -> PgResult<ValueSize> {
        let narrowed = self.narrow(value)?;
        self.inner.size(ctx, &narrowed)
    }

    fn write(&self, writer: &mut PgWriter, value: &T) -> PgResult<()> {
        let narrowed = self.narrow(value)?;
        self.inner.write(writer, &narrowed)
    }

    fn write_async<'a>(
        &'a self,
        writer: &'a mut PgWriter,
        value: &'a T,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<()>> + Send + 'a {
        async move {
            let narrowed = self.narrow(value)?;
            self.inner.write_async(writer, &narrowed, cancel).await
        }
    }

    fn read(&self, reader: &mut PgReader) -> PgResult<T> {
        self.widen(self.inner.read(reader)?)
    }

    fn read_async<'a>(
        &'a self,
        reader: &'a mut PgReader,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<T>> + Send + 'a {
        async move { self.widen(self.inner.read_async(reader, cancel).await?) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::catalog::{names, TypeCatalog};
    use std::sync::Arc;

    fn mem_writer() -> PgWriter {
        PgWriter::new(Arc::new(TypeCatalog::with_builtins()))
    }

    #[test]
    fn test_int4_encode() {
        let mut w = mem_writer();
        Int4Converter.write(&mut w, &42).unwrap();
        assert_eq!(w.buffer(), [0x00, 0x00, 0x00, 0x2A]);

        let mut ctx = SizeContext::new(DataFormat::Binary, 0);
        assert_eq!(
            Int4Converter.size(&mut ctx, &42).unwrap(),
            ValueSize::Exact(4)
        );
    }

    #[test]
    fn test_int4_round_trip() {
        for value in [0, 1, -1, i32::MIN, i32::MAX] {
            let mut w = mem_writer();
            Int4Converter.write(&mut w, &value).unwrap();
            let mut r = PgReader::from_bytes(w.buffer());
            r.begin_value(4);
            assert_eq!(Int4Converter.read(&mut r).unwrap(), value);
        }
    }

    #[test]
    fn test_int8_round_trip() {
        let mut w = mem_writer();
        Int8Converter.write(&mut w, &i64::MIN).unwrap();
        let mut r = PgReader::from_bytes(w.buffer());
        r.begin_value(8);
        assert_eq!(Int8Converter.read(&mut r).unwrap(), i64::MIN);
    }

    #[test]
    fn test_wrong_envelope_length() {
        let mut r = PgReader::from_bytes(&[0, 0, 0, 0, 0, 0, 0, 0]);
        r.begin_value(8);
        assert!(matches!(
            Int4Converter.read(&mut r),
            Err(PgError::InvalidWireData { .. })
        ));
    }

    #[test]
    fn test_binary_only() {
        assert!(Int4Converter.can_convert(DataFormat::Binary));
        assert!(!Int4Converter.can_convert(DataFormat::Text));
    }

    #[test]
    fn test_float8_round_trip() {
        for value in [0.0f64, -1.5, f64::MAX, f64::MIN_POSITIVE] {
            let mut w = mem_writer();
            Float8Converter.write(&mut w, &value).unwrap();
            let mut r = PgReader::from_bytes(w.buffer());
            r.begin_value(8);
            assert_eq!(Float8Converter.read(&mut r).unwrap(), value);
        }
    }

    #[test]
    fn test_bool_decode_strict() {
        let mut r = PgReader::from_bytes(&[2]);
        r.begin_value(1);
        assert!(matches!(
            BoolConverter.read(&mut r),
            Err(PgError::InvalidWireData { .. })
        ));
    }

    #[test]
    fn test_coercion_same_bytes_as_exact() {
        // An i64 within int4 range encodes to the same bytes as the i32.
        let coerced = CoercionConverter::<i64, _>::new(Int4Converter, names::INT4);
        let mut w = mem_writer();
        coerced.write(&mut w, &42i64).unwrap();
        assert_eq!(w.buffer(), [0x00, 0x00, 0x00, 0x2A]);
    }

    #[test]
    fn test_coercion_out_of_range_never_truncates() {
        let coerced = CoercionConverter::<i64, _>::new(Int4Converter, names::INT4);
        let mut w = mem_writer();
        assert!(matches!(
            coerced.write(&mut w, &2_147_483_648i64),
            Err(PgError::ValueOutOfRange { .. })
        ));
        // No bytes were written.
        assert!(w.buffer().is_empty());

        let mut ctx = SizeContext::new(DataFormat::Binary, 0);
        assert!(matches!(
            coerced.size(&mut ctx, &2_147_483_648i64),
            Err(PgError::ValueOutOfRange { .. })
        ));
    }

    #[test]
    fn test_coercion_widening_read_checks_range() {
        // 40000 decodes fine as i32 but not as u8.
        let coerced = CoercionConverter::<u8, _>::new(Int4Converter, names::INT4);
        let mut w = mem_writer();
        Int4Converter.write(&mut w, &40000).unwrap();
        let mut r = PgReader::from_bytes(w.buffer());
        r.begin_value(4);
        assert!(matches!(
            coerced.read(&mut r),
            Err(PgError::ValueOutOfRange { .. })
        ));
    }

    #[test]
    fn test_byte_via_int2() {
        let coerced = CoercionConverter::<u8, _>::new(Int2Converter, names::INT2);
        let mut w = mem_writer();
        coerced.write(&mut w, &255u8).unwrap();
        assert_eq!(w.buffer(), [0x00, 0xFF]);
        let mut r = PgReader::from_bytes(w.buffer());
        r.begin_value(2);
        assert_eq!(coerced.read(&mut r).unwrap(), 255u8);
    }
}
