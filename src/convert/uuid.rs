//! Converter for `uuid` (16-byte binary representation).

use crate::convert::{check_value_len, PgConverter, SizeContext};
use crate::error::{PgError, PgResult};
use crate::protocol::reader::PgReader;
use crate::protocol::writer::PgWriter;
use crate::protocol::{CancelToken, DataFormat, ValueSize};
use std::future::Future;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default)]
pub struct UuidConverter;

impl PgConverter for UuidConverter {
    type Value = Uuid;

    fn can_convert(&self, format: DataFormat) -> bool {
        format == DataFormat::Binary
    }

    fn size(&self, _ctx: &mut SizeContext, _value: &Uuid) -> PgResult<ValueSize> {
        Ok(ValueSize::Exact(16))
    }

    fn write(&self, writer: &mut PgWriter, value: &Uuid) -> PgResult<()> {
        writer.write_raw(value.as_bytes())
    }

    fn write_async<'a>(
        &'a self,
        writer: &'a mut PgWriter,
        value: &'a Uuid,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<()>> + Send + 'a {
        async move {
            if writer.should_flush(16) {
                writer.flush_async(cancel).await?;
            }
            writer.write_raw_async(value.as_bytes(), cancel).await
        }
    }

    fn read(&self, reader: &mut PgReader) -> PgResult<Uuid> {
        check_value_len(reader, 16, "uuid")?;
        let bytes = reader.read_bytes(16)?;
        Uuid::from_slice(bytes).map_err(|e| PgError::invalid_data("uuid", e))
    }

    fn read_async<'a>(
        &'a self,
        reader: &'a mut PgReader,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<Uuid>> + Send + 'a {
        async move {
            reader.ensure_async(16, cancel).await?;
            self.read(reader)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::catalog::TypeCatalog;
    use std::sync::Arc;

    #[test]
    fn test_uuid_round_trip() {
        let value = Uuid::from_u128(0x550e8400_e29b_41d4_a716_446655440000);
        let mut w = PgWriter::new(Arc::new(TypeCatalog::with_builtins()));
        UuidConverter.write(&mut w, &value).unwrap();
        assert_eq!(w.buffer().len(), 16);
        assert_eq!(&w.buffer()[..4], [0x55, 0x0e, 0x84, 0x00]);

        let mut r = PgReader::from_bytes(w.buffer());
        r.begin_value(16);
        assert_eq!(UuidConverter.read(&mut r).unwrap(), value);
    }

    #[test]
    fn test_uuid_wrong_length() {
        let mut r = PgReader::from_bytes(&[0u8; 8]);
        r.begin_value(8);
        assert!(matches!(
            UuidConverter.read(&mut r),
            Err(PgError::InvalidWireData { .. })
        ));
    }
}
