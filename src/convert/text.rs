//! Converters for the character wire types.
//!
//! For `text` the binary and text wire representations are the same UTF-8
//! bytes, so the converters here accept both formats. One generic
//! converter serves every string-shaped Rust type; `char` gets a small
//! stack-buffer adapter. `numeric` rides along as the text-only codec:
//! its binary representation is a packed decimal this layer does not
//! speak, and the server accepts the decimal string unchanged.

use crate::convert::{PgConverter, SizeContext};
use crate::error::{PgError, PgResult};
use crate::protocol::reader::PgReader;
use crate::protocol::writer::PgWriter;
use crate::protocol::{CancelToken, DataFormat, ValueSize};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

fn missing_scope(wire_type: &'static str) -> PgError {
    PgError::invalid_data(wire_type, "no value length in scope")
}

/// Converter for `text` over any string-shaped value.
///
/// The encoding logic is written once against `AsRef<str>`; `String`,
/// `Arc<str>` and `Box<str>` all instantiate it without copying.
#[derive(Debug)]
pub struct TextConverter<S> {
    _value: PhantomData<fn() -> S>,
}

impl<S> TextConverter<S> {
    pub const fn new() -> Self {
        Self {
            _value: PhantomData,
        }
    }
}

impl<S> Default for TextConverter<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Clone for TextConverter<S> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<S> PgConverter for TextConverter<S>
where
    S: AsRef<str> + for<'x> From<&'x str> + Send + Sync + 'static,
{
    type Value = S;

    fn can_convert(&self, _format: DataFormat) -> bool {
        true
    }

    fn size(&self, _ctx: &mut SizeContext, value: &S) -> PgResult<ValueSize> {
        Ok(ValueSize::Exact(value.as_ref().len()))
    }

    fn write(&self, writer: &mut PgWriter, value: &S) -> PgResult<()> {
        let text = value.as_ref();
        let mut resume = writer.write_text_resumable(text, None);
        while let Some(state) = resume {
            writer.flush()?;
            resume = writer.write_text_resumable(text, Some(state));
        }
        Ok(())
    }

    fn write_async<'a>(
        &'a self,
        writer: &'a mut PgWriter,
        value: &'a S,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<()>> + Send + 'a {
        async move {
            let text = value.as_ref();
            let mut resume = writer.write_text_resumable(text, None);
            while let Some(state) = resume {
                writer.flush_async(cancel).await?;
                resume = writer.write_text_resumable(text, Some(state));
            }
            Ok(())
        }
    }

    fn read(&self, reader: &mut PgReader) -> PgResult<S> {
        let len = reader.value_len().ok_or_else(|| missing_scope("text"))?;
        let bytes = reader.read_bytes(len)?;
        let text = std::str::from_utf8(bytes).map_err(|e| PgError::invalid_data("text", e))?;
        Ok(S::from(text))
    }

    fn read_async<'a>(
        &'a self,
        reader: &'a mut PgReader,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<S>> + Send + 'a {
        async move {
            let len = reader.value_len().ok_or_else(|| missing_scope("text"))?;
            let bytes = reader.read_bytes_async(len, cancel).await?;
            let text = std::str::from_utf8(bytes).map_err(|e| PgError::invalid_data("text", e))?;
            Ok(S::from(text))
        }
    }
}

/// Converter adapting a single `char` to `text`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharConverter;

impl PgConverter for CharConverter {
    type Value = char;

    fn can_convert(&self, _format: DataFormat) -> bool {
        true
    }

    fn size(&self, _ctx: &mut SizeContext, value: &char) -> PgResult<ValueSize> {
        Ok(ValueSize::Exact(value.len_utf8()))
    }

    fn write(&self, writer: &mut PgWriter, value: &char) -> PgResult<()> {
        let mut buf = [0u8; 4];
        writer.write_text(value.encode_utf8(&mut buf));
        Ok(())
    }

    fn write_async<'a>(
        &'a self,
        writer: &'a mut PgWriter,
        value: &'a char,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<()>> + Send + 'a {
        async move {
            if writer.should_flush(value.len_utf8()) {
                writer.flush_async(cancel).await?;
            }
            let mut buf = [0u8; 4];
            writer.write_text(value.encode_utf8(&mut buf));
            Ok(())
        }
    }

    fn read(&self, reader: &mut PgReader) -> PgResult<char> {
        let len = reader.value_len().ok_or_else(|| missing_scope("text"))?;
        let bytes = reader.read_bytes(len)?;
        let text = std::str::from_utf8(bytes).map_err(|e| PgError::invalid_data("text", e))?;
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(PgError::invalid_data("text", "expected a single character")),
        }
    }

    fn read_async<'a>(
        &'a self,
        reader: &'a mut PgReader,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<char>> + Send + 'a {
        async move {
            let len = reader.value_len().ok_or_else(|| missing_scope("text"))?;
            reader.ensure_async(len, cancel).await?;
            self.read(reader)
        }
    }
}

/// NUMERIC/DECIMAL carried as its decimal string representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgNumeric(String);

impl PgNumeric {
    /// Create from a decimal string representation.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The decimal string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PgNumeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Text-only converter for `numeric`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumericTextConverter;

impl PgConverter for NumericTextConverter {
    type Value = PgNumeric;

    fn can_convert(&self, format: DataFormat) -> bool {
        format == DataFormat::Text
    }

    fn preferred_format(&self) -> DataFormat {
        DataFormat::Text
    }

    fn size(&self, _ctx: &mut SizeContext, value: &PgNumeric) -> PgResult<ValueSize> {
        Ok(ValueSize::Exact(value.0.len()))
    }

    fn write(&self, writer: &mut PgWriter, value: &PgNumeric) -> PgResult<()> {
        let mut resume = writer.write_text_resumable(&value.0, None);
        while let Some(state) = resume {
            writer.flush()?;
            resume = writer.write_text_resumable(&value.0, Some(state));
        }
        Ok(())
    }

    fn write_async<'a>(
        &'a self,
        writer: &'a mut PgWriter,
        value: &'a PgNumeric,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<()>> + Send + 'a {
        async move {
            let mut resume = writer.write_text_resumable(&value.0, None);
            while let Some(state) = resume {
                writer.flush_async(cancel).await?;
                resume = writer.write_text_resumable(&value.0, Some(state));
            }
            Ok(())
        }
    }

    fn read(&self, reader: &mut PgReader) -> PgResult<PgNumeric> {
        let len = reader.value_len().ok_or_else(|| missing_scope("numeric"))?;
        let bytes = reader.read_bytes(len)?;
        let text = std::str::from_utf8(bytes).map_err(|e| PgError::invalid_data("numeric", e))?;
        Ok(PgNumeric(text.to_string()))
    }

    fn read_async<'a>(
        &'a self,
        reader: &'a mut PgReader,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<PgNumeric>> + Send + 'a {
        async move {
            let len = reader.value_len().ok_or_else(|| missing_scope("numeric"))?;
            reader.ensure_async(len, cancel).await?;
            self.read(reader)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::catalog::TypeCatalog;
    use std::sync::Arc;

    fn mem_writer() -> PgWriter {
        PgWriter::new(Arc::new(TypeCatalog::with_builtins()))
    }

    #[test]
    fn test_string_round_trip() {
        let converter = TextConverter::<String>::new();
        let mut w = mem_writer();
        converter.write(&mut w, &"héllo".to_string()).unwrap();
        assert_eq!(w.buffer(), "héllo".as_bytes());

        let mut r = PgReader::from_bytes(w.buffer());
        r.begin_value(w.buffer().len());
        assert_eq!(converter.read(&mut r).unwrap(), "héllo");
    }

    #[test]
    fn test_shared_str_round_trip() {
        let converter = TextConverter::<Arc<str>>::new();
        let value: Arc<str> = Arc::from("shared");
        let mut w = mem_writer();
        converter.write(&mut w, &value).unwrap();

        let mut r = PgReader::from_bytes(w.buffer());
        r.begin_value(w.buffer().len());
        assert_eq!(&*converter.read(&mut r).unwrap(), "shared");
    }

    #[test]
    fn test_size_is_byte_length() {
        let converter = TextConverter::<String>::new();
        let mut ctx = SizeContext::new(DataFormat::Binary, 0);
        // Two characters, three bytes.
        assert_eq!(
            converter.size(&mut ctx, &"aé".to_string()).unwrap(),
            ValueSize::Exact(3)
        );
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let converter = TextConverter::<String>::new();
        let mut r = PgReader::from_bytes(&[0xFF, 0xFE]);
        r.begin_value(2);
        assert!(matches!(
            converter.read(&mut r),
            Err(PgError::InvalidWireData { .. })
        ));
    }

    #[test]
    fn test_char_round_trip() {
        for c in ['a', 'é', '日'] {
            let mut w = mem_writer();
            CharConverter.write(&mut w, &c).unwrap();
            assert_eq!(w.buffer().len(), c.len_utf8());
            let mut r = PgReader::from_bytes(w.buffer());
            r.begin_value(c.len_utf8());
            assert_eq!(CharConverter.read(&mut r).unwrap(), c);
        }
    }

    #[test]
    fn test_char_rejects_multiple() {
        let mut r = PgReader::from_bytes(b"ab");
        r.begin_value(2);
        assert!(matches!(
            CharConverter.read(&mut r),
            Err(PgError::InvalidWireData { .. })
        ));
    }

    #[test]
    fn test_numeric_is_text_only() {
        assert!(!NumericTextConverter.can_convert(DataFormat::Binary));
        assert!(NumericTextConverter.can_convert(DataFormat::Text));
        assert_eq!(NumericTextConverter.preferred_format(), DataFormat::Text);
    }

    #[test]
    fn test_numeric_round_trip() {
        let value = PgNumeric::new("-12345.678900");
        let mut w = mem_writer();
        NumericTextConverter.write(&mut w, &value).unwrap();
        assert_eq!(w.buffer(), b"-12345.678900");

        let mut r = PgReader::from_bytes(w.buffer());
        r.begin_value(w.buffer().len());
        assert_eq!(NumericTextConverter.read(&mut r).unwrap(), value);
    }
}
