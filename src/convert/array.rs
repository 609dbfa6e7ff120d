//! Array codec over an element converter.
//!
//! Binary array layout: a header of `{ndim: i32, has_nulls: i32,
//! element_oid: u32}`, one `{lower_bound: i32, length: i32}` pair per
//! dimension, then per element `{length: i32, payload}` with `-1`
//! encoding a NULL element. Empty arrays have zero dimensions.
//!
//! The size phase visits every element once and records the per-element
//! plan as write state, so the write phase never re-sizes. Elements whose
//! converter cannot report an exact size are captured through a scratch
//! in-memory writer at write time to keep the length headers exact.

use crate::convert::{PgConverter, SizeContext};
use crate::error::{PgError, PgResult};
use crate::protocol::catalog::{TypeCatalog, WireTypeId};
use crate::protocol::reader::PgReader;
use crate::protocol::writer::PgWriter;
use crate::protocol::{CancelToken, DataFormat, ValueSize, WriteState};
use std::future::Future;
use std::sync::Arc;

/// `ndim` + `has_nulls` + `element_oid`.
const ARRAY_HEADER_LEN: usize = 12;
/// `lower_bound` + `length` for one dimension.
const DIMENSION_LEN: usize = 8;

/// Per-element plan recorded at size time.
enum ElemPlan {
    /// Encodes as `-1` with no payload.
    Null,
    /// Exact payload size, plus any element write state.
    Sized {
        len: usize,
        state: Option<WriteState>,
    },
    /// Size not exactly known; the payload is captured through a scratch
    /// writer at write time.
    Buffered,
}

struct ArrayWriteState {
    elems: Vec<ElemPlan>,
    has_nulls: bool,
}

/// Converter for `Vec<U>` targeting the element type's array wire type.
pub struct ArrayConverter<C> {
    elem: C,
    elem_type: WireTypeId,
}

impl<C: PgConverter> ArrayConverter<C> {
    /// Wrap an element converter with the element's wire identity.
    pub fn new(elem: C, elem_type: WireTypeId) -> Self {
        Self { elem, elem_type }
    }

    /// The element's wire identity.
    pub fn element_type(&self) -> &WireTypeId {
        &self.elem_type
    }

    fn take_or_compute_state(
        &self,
        writer: &mut PgWriter,
        value: &[C::Value],
    ) -> PgResult<ArrayWriteState> {
        if let Some(state) = writer.take_write_state() {
            if let Ok(state) = state.downcast::<ArrayWriteState>() {
                return Ok(*state);
            }
        }
        let mut ctx = SizeContext::new(writer.format(), writer.buffer_capacity());
        self.size_slice(&mut ctx, value)?;
        match ctx
            .take_state()
            .and_then(|s| s.downcast::<ArrayWriteState>().ok())
        {
            Some(state) => Ok(*state),
            None => Err(PgError::invalid_data("array", "missing write state")),
        }
    }

    fn size_slice(&self, ctx: &mut SizeContext, value: &[C::Value]) -> PgResult<ValueSize> {
        let mut total = ARRAY_HEADER_LEN + if value.is_empty() { 0 } else { DIMENSION_LEN };
        let mut exact = true;
        let mut bounded = true;
        let mut has_nulls = false;
        let mut elems = Vec::with_capacity(value.len());
        for elem in value {
            if self.elem.is_db_null(elem) {
                has_nulls = true;
                elems.push(ElemPlan::Null);
                total += 4;
                continue;
            }
            let mut elem_ctx = SizeContext::new(ctx.format, ctx.buffer_len);
            match self.elem.size(&mut elem_ctx, elem)? {
                ValueSize::Exact(n) => {
                    total += 4 + n;
                    elems.push(ElemPlan::Sized {
                        len: n,
                        state: elem_ctx.take_state(),
                    });
                }
                ValueSize::UpperBound(n) => {
                    exact = false;
                    total += 4 + n;
                    elems.push(ElemPlan::Buffered);
                }
                ValueSize::Unknown => {
                    exact = false;
                    bounded = false;
                    total += 4;
                    elems.push(ElemPlan::Buffered);
                }
            }
        }
        ctx.set_state(ArrayWriteState { elems, has_nulls });
        Ok(if !bounded {
            ValueSize::Unknown
        } else if exact {
            ValueSize::Exact(total)
        } else {
            ValueSize::UpperBound(total)
        })
    }

    fn capture_element(
        &self,
        catalog: &Arc<TypeCatalog>,
        format: DataFormat,
        value: &C::Value,
    ) -> PgResult<Vec<u8>> {
        let mut scratch = PgWriter::new(Arc::clone(catalog));
        let mut ctx = SizeContext::new(format, scratch.buffer_capacity());
        self.elem.size(&mut ctx, value)?;
        scratch.set_format(format);
        scratch.set_write_state(ctx.take_state());
        self.elem.write(&mut scratch, value)?;
        Ok(scratch.buffer().to_vec())
    }

    fn write_header(
        &self,
        writer: &mut PgWriter,
        len: usize,
        has_nulls: bool,
    ) -> PgResult<()> {
        // Resolve before emitting so a catalog miss produces no bytes.
        writer.catalog().oid_of(&self.elem_type)?;
        let ndim: i32 = if len == 0 { 0 } else { 1 };
        writer.suspend_flush();
        writer.write_i32(ndim);
        writer.write_i32(if has_nulls { 1 } else { 0 });
        let written = writer.write_as_oid(&self.elem_type);
        if ndim == 1 {
            writer.write_i32(1); // lower bound
            writer.write_i32(len as i32);
        }
        writer.resume_flush();
        written
    }
}

impl<C: PgConverter> PgConverter for ArrayConverter<C> {
    type Value = Vec<C::Value>;

    fn can_convert(&self, format: DataFormat) -> bool {
        format == DataFormat::Binary && self.elem.can_convert(DataFormat::Binary)
    }

    fn size(&self, ctx: &mut SizeContext, value: &Vec<C::Value>) -> PgResult<ValueSize> {
        self.size_slice(ctx, value)
    }

    fn write(&self, writer: &mut PgWriter, value: &Vec<C::Value>) -> PgResult<()> {
        let state = self.take_or_compute_state(writer, value)?;
        self.write_header(writer, value.len(), state.has_nulls)?;
        for (elem, plan) in value.iter().zip(state.elems) {
            match plan {
                ElemPlan::Null => {
                    if writer.should_flush(4) {
                        writer.flush()?;
                    }
                    writer.write_i32(-1);
                }
                ElemPlan::Sized { len, state } => {
                    if writer.should_flush(4) {
                        writer.flush()?;
                    }
                    writer.write_i32(len as i32);
                    writer.set_write_state(state);
                    self.elem.write(writer, elem)?;
                }
                ElemPlan::Buffered => {
                    let bytes =
                        self.capture_element(&Arc::clone(writer.catalog()), writer.format(), elem)?;
                    if writer.should_flush(4) {
                        writer.flush()?;
                    }
                    writer.write_i32(bytes.len() as i32);
                    writer.write_raw(&bytes)?;
                }
            }
        }
        Ok(())
    }

    fn write_async<'a>(
        &'a self,
        writer: &'a mut PgWriter,
        value: &'a Vec<C::Value>,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<()>> + Send + 'a {
        async move {
            let state = self.take_or_compute_state(writer, value)?;
            if writer.should_flush(ARRAY_HEADER_LEN + DIMENSION_LEN) {
                writer.flush_async(cancel).await?;
            }
            self.write_header(writer, value.len(), state.has_nulls)?;
            for (elem, plan) in value.iter().zip(state.elems) {
                match plan {
                    ElemPlan::Null => {
                        if writer.should_flush(4) {
                            writer.flush_async(cancel).await?;
                        }
                        writer.write_i32(-1);
                    }
                    ElemPlan::Sized { len, state } => {
                        if writer.should_flush(4) {
                            writer.flush_async(cancel).await?;
                        }
                        writer.write_i32(len as i32);
                        writer.set_write_state(state);
                        self.elem.write_async(writer, elem, cancel).await?;
                    }
                    ElemPlan::Buffered => {
                        let bytes = self.capture_element(
                            &Arc::clone(writer.catalog()),
                            writer.format(),
                            elem,
                        )?;
                        if writer.should_flush(4) {
                            writer.flush_async(cancel).await?;
                        }
                        writer.write_i32(bytes.len() as i32);
                        writer.write_raw_async(&bytes, cancel).await?;
                    }
                }
            }
            Ok(())
        }
    }

    fn read(&self, reader: &mut PgReader) -> PgResult<Vec<C::Value>> {
        let ndim = reader.read_i32()?;
        let flags = reader.read_i32()?;
        let _elem_oid = reader.read_u32()?;
        if !(0..=1).contains(&flags) {
            return Err(PgError::invalid_data("array", format!("flags {}", flags)));
        }
        if ndim == 0 {
            return Ok(Vec::new());
        }
        if ndim != 1 {
            return Err(PgError::invalid_data(
                "array",
                format!("{} dimensions, expected at most 1", ndim),
            ));
        }
        let _lower_bound = reader.read_i32()?;
        let len = reader.read_i32()?;
        if len < 0 {
            return Err(PgError::invalid_data("array", format!("length {}", len)));
        }
        let mut out = Vec::with_capacity(len as usize);
        for _ in 0..len {
            let elem_len = reader.read_i32()?;
            if elem_len == -1 {
                out.push(self.elem.db_null_value().ok_or_else(|| {
                    PgError::invalid_data("array", "NULL element for a non-nullable element type")
                })?);
            } else if elem_len < 0 {
                return Err(PgError::invalid_data(
                    "array",
                    format!("element length {}", elem_len),
                ));
            } else {
                reader.begin_value(elem_len as usize);
                out.push(self.elem.read(reader)?);
            }
        }
        Ok(out)
    }

    fn read_async<'a>(
        &'a self,
        reader: &'a mut PgReader,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<Vec<C::Value>>> + Send + 'a {
        async move {
            let ndim = reader.read_i32_async(cancel).await?;
            let flags = reader.read_i32_async(cancel).await?;
            let _elem_oid = reader.read_u32_async(cancel).await?;
            if !(0..=1).contains(&flags) {
                return Err(PgError::invalid_data("array", format!("flags {}", flags)));
            }
            if ndim == 0 {
                return Ok(Vec::new());
            }
            if ndim != 1 {
                return Err(PgError::invalid_data(
                    "array",
                    format!("{} dimensions, expected at most 1", ndim),
                ));
            }
            let _lower_bound = reader.read_i32_async(cancel).await?;
            let len = reader.read_i32_async(cancel).await?;
            if len < 0 {
                return Err(PgError::invalid_data("array", format!("length {}", len)));
            }
            let mut out = Vec::with_capacity(len as usize);
            for _ in 0..len {
                let elem_len = reader.read_i32_async(cancel).await?;
                if elem_len == -1 {
                    out.push(self.elem.db_null_value().ok_or_else(|| {
                        PgError::invalid_data(
                            "array",
                            "NULL element for a non-nullable element type",
                        )
                    })?);
                } else if elem_len < 0 {
                    return Err(PgError::invalid_data(
                        "array",
                        format!("element length {}", elem_len),
                    ));
                } else {
                    reader.begin_value(elem_len as usize);
                    out.push(self.elem.read_async(reader, cancel).await?);
                }
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::nullable::NullableConverter;
    use crate::convert::numeric::Int4Converter;
    use crate::convert::text::TextConverter;
    use crate::protocol::catalog::names;

    fn mem_writer() -> PgWriter {
        PgWriter::new(Arc::new(TypeCatalog::with_builtins()))
    }

    fn text_array() -> ArrayConverter<TextConverter<String>> {
        ArrayConverter::new(TextConverter::new(), WireTypeId::name(names::TEXT))
    }

    fn int4_array() -> ArrayConverter<Int4Converter> {
        ArrayConverter::new(Int4Converter, WireTypeId::name(names::INT4))
    }

    #[test]
    fn test_text_array_layout() {
        let converter = text_array();
        let value = vec!["a".to_string(), "b".to_string()];

        let mut ctx = SizeContext::new(DataFormat::Binary, 0);
        assert_eq!(
            converter.size(&mut ctx, &value).unwrap(),
            ValueSize::Exact(30)
        );

        let mut w = mem_writer();
        w.set_write_state(ctx.take_state());
        converter.write(&mut w, &value).unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(&1i32.to_be_bytes()); // ndim
        expected.extend_from_slice(&0i32.to_be_bytes()); // has_nulls
        expected.extend_from_slice(&25u32.to_be_bytes()); // oid(text)
        expected.extend_from_slice(&1i32.to_be_bytes()); // lower bound
        expected.extend_from_slice(&2i32.to_be_bytes()); // length
        expected.extend_from_slice(&1i32.to_be_bytes());
        expected.push(b'a');
        expected.extend_from_slice(&1i32.to_be_bytes());
        expected.push(b'b');
        assert_eq!(w.buffer(), expected);
    }

    #[test]
    fn test_int4_array_round_trip() {
        let converter = int4_array();
        let value = vec![1, -2, 3];
        let mut w = mem_writer();
        converter.write(&mut w, &value).unwrap();

        let mut r = PgReader::from_bytes(w.buffer());
        assert_eq!(converter.read(&mut r).unwrap(), value);
    }

    #[test]
    fn test_empty_array() {
        let converter = int4_array();
        let mut ctx = SizeContext::new(DataFormat::Binary, 0);
        assert_eq!(
            converter.size(&mut ctx, &Vec::new()).unwrap(),
            ValueSize::Exact(ARRAY_HEADER_LEN)
        );

        let mut w = mem_writer();
        converter.write(&mut w, &Vec::new()).unwrap();
        assert_eq!(w.buffer().len(), ARRAY_HEADER_LEN);
        assert_eq!(&w.buffer()[..4], 0i32.to_be_bytes()); // ndim = 0

        let mut r = PgReader::from_bytes(w.buffer());
        assert_eq!(converter.read(&mut r).unwrap(), Vec::<i32>::new());
    }

    #[test]
    fn test_nullable_elements() {
        let converter = ArrayConverter::new(
            NullableConverter::new(Int4Converter),
            WireTypeId::name(names::INT4),
        );
        let value = vec![Some(1), None, Some(3)];
        let mut w = mem_writer();
        converter.write(&mut w, &value).unwrap();

        // has_nulls flag is set and the NULL element is a bare -1 length.
        assert_eq!(&w.buffer()[4..8], 1i32.to_be_bytes());

        let mut r = PgReader::from_bytes(w.buffer());
        assert_eq!(converter.read(&mut r).unwrap(), value);
    }

    #[test]
    fn test_null_element_rejected_for_non_nullable() {
        // Encode with nullable elements, decode with a plain element
        // converter: the NULL element must be rejected.
        let nullable = ArrayConverter::new(
            NullableConverter::new(Int4Converter),
            WireTypeId::name(names::INT4),
        );
        let mut w = mem_writer();
        nullable.write(&mut w, &vec![None, Some(2)]).unwrap();

        let converter = int4_array();
        let mut r = PgReader::from_bytes(w.buffer());
        assert!(matches!(
            converter.read(&mut r),
            Err(PgError::InvalidWireData { .. })
        ));
    }

    #[test]
    fn test_multidimensional_rejected() {
        let converter = int4_array();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2i32.to_be_bytes());
        bytes.extend_from_slice(&0i32.to_be_bytes());
        bytes.extend_from_slice(&23u32.to_be_bytes());
        let mut r = PgReader::from_bytes(&bytes);
        assert!(matches!(
            converter.read(&mut r),
            Err(PgError::InvalidWireData { .. })
        ));
    }

    #[test]
    fn test_unknown_element_type_writes_nothing() {
        let converter = ArrayConverter::new(
            Int4Converter,
            WireTypeId::name(crate::protocol::catalog::WireTypeName::new("mystery")),
        );
        let mut w = mem_writer();
        assert!(matches!(
            converter.write(&mut w, &vec![1]),
            Err(PgError::UnknownType(_))
        ));
        assert!(w.buffer().is_empty());
    }
}
