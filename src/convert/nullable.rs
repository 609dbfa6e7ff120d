//! Nullable lift: `Option<U>` over a non-nullable inner converter.

use crate::convert::{NullKind, PgConverter, SizeContext};
use crate::error::PgResult;
use crate::protocol::reader::PgReader;
use crate::protocol::writer::PgWriter;
use crate::protocol::{CancelToken, DataFormat, ValueSize};
use std::future::Future;

/// Lifts `Converter<U>` to `Converter<Option<U>>`.
///
/// `None` encodes as SQL NULL; `Some(u)` produces exactly the inner
/// converter's bytes. Capability and format preference are inherited
/// from the inner converter, and the null predicate upgrades to
/// `Extended` when the inner predicate is `Extended`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullableConverter<C> {
    inner: C,
}

impl<C> NullableConverter<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    /// The wrapped converter.
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: PgConverter> PgConverter for NullableConverter<C> {
    type Value = Option<C::Value>;

    fn can_convert(&self, format: DataFormat) -> bool {
        self.inner.can_convert(format)
    }

    fn preferred_format(&self) -> DataFormat {
        self.inner.preferred_format()
    }

    fn null_kind(&self) -> NullKind {
        match self.inner.null_kind() {
            NullKind::Extended => NullKind::Extended,
            _ => NullKind::Default,
        }
    }

    fn is_db_null(&self, value: &Option<C::Value>) -> bool {
        match value {
            None => true,
            Some(inner) => {
                self.inner.null_kind() == NullKind::Extended && self.inner.is_db_null(inner)
            }
        }
    }

    fn db_null_value(&self) -> Option<Option<C::Value>> {
        Some(None)
    }

    fn size(&self, ctx: &mut SizeContext, value: &Option<C::Value>) -> PgResult<ValueSize> {
        match value {
            Some(inner) => self.inner.size(ctx, inner),
            // Null values are elided by the caller; nothing to size.
            None => Ok(ValueSize::Exact(0)),
        }
    }

    fn write(&self, writer: &mut PgWriter, value: &Option<C::Value>) -> PgResult<()> {
        match value {
            Some(inner) => self.inner.write(writer, inner),
            None => Ok(()),
        }
    }

    fn write_async<'a>(
        &'a self,
        writer: &'a mut PgWriter,
        value: &'a Option<C::Value>,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<()>> + Send + 'a {
        async move {
            match value {
                Some(inner) => self.inner.write_async(writer, inner, cancel).await,
                None => Ok(()),
            }
        }
    }

    fn read(&self, reader: &mut PgReader) -> PgResult<Option<C::Value>> {
        Ok(Some(self.inner.read(reader)?))
    }

    fn read_async<'a>(
        &'a self,
        reader: &'a mut PgReader,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<Option<C::Value>>> + Send + 'a {
        async move { Ok(Some(self.inner.read_async(reader, cancel).await?)) }
    }
}
