//! Converter info: a converter paired with its negotiated wire identity.

use crate::convert::{negotiate_format, ObjectConverter, SizeContext};
use crate::error::{PgError, PgResult};
use crate::protocol::catalog::WireTypeId;
use crate::protocol::{DataFormat, ValueSize, WriteState};
use std::any::Any;
use std::sync::Arc;

/// A converter plus the wire type identity it will target for one call.
#[derive(Clone)]
pub struct ConverterResolution {
    pub converter: Arc<dyn ObjectConverter>,
    pub wire_type: WireTypeId,
}

/// Long-lived pairing of a converter with its resolved wire identity and
/// format preference; the unit consumed by the parameter writer and
/// cached by the resolver.
#[derive(Clone)]
pub struct ConverterInfo {
    converter: Arc<dyn ObjectConverter>,
    wire_type: WireTypeId,
    preferred_format: DataFormat,
    is_default_mapping: bool,
}

impl ConverterInfo {
    /// Pair a converter with the wire identity it negotiated.
    pub fn new(
        converter: Arc<dyn ObjectConverter>,
        wire_type: WireTypeId,
        is_default_mapping: bool,
    ) -> Self {
        let preferred_format = converter.preferred_format();
        Self {
            converter,
            wire_type,
            preferred_format,
            is_default_mapping,
        }
    }

    /// The underlying converter.
    pub fn converter(&self) -> &Arc<dyn ObjectConverter> {
        &self.converter
    }

    /// The wire identity this info targets.
    pub fn wire_type(&self) -> &WireTypeId {
        &self.wire_type
    }

    /// The format the converter prefers.
    pub fn preferred_format(&self) -> DataFormat {
        self.preferred_format
    }

    /// True iff this is the unique default mapping for its value type.
    /// Higher layers use it to disambiguate calls that supplied only a
    /// value or only a wire type.
    pub fn is_default_mapping(&self) -> bool {
        self.is_default_mapping
    }

    /// Resolution for values whose concrete type is statically known.
    pub fn resolution(&self) -> ConverterResolution {
        ConverterResolution {
            converter: Arc::clone(&self.converter),
            wire_type: self.wire_type.clone(),
        }
    }

    /// Resolution for boxed values; fails when the boxed type is not the
    /// converter's value type.
    pub fn resolution_for_object(
        &self,
        value: &(dyn Any + Send + Sync),
    ) -> PgResult<ConverterResolution> {
        if value.type_id() != self.converter.value_type() {
            return Err(PgError::resolution_failed(
                self.converter.value_type_name(),
                &self.wire_type,
            ));
        }
        Ok(self.resolution())
    }

    /// Negotiate the data format for this info's converter.
    pub fn negotiate_format(&self, hint: Option<DataFormat>) -> PgResult<DataFormat> {
        negotiate_format(
            |f| self.converter.can_convert(f),
            self.preferred_format,
            self.converter.value_type_name(),
            hint,
        )
    }

    /// Run the size phase under the negotiated format.
    ///
    /// Returns the value size, the write state to hand to the write
    /// phase, and the format that won negotiation.
    pub fn preferred_size(
        &self,
        resolution: &ConverterResolution,
        value: &(dyn Any + Send + Sync),
        buffer_len: usize,
        format_hint: Option<DataFormat>,
    ) -> PgResult<(ValueSize, Option<WriteState>, DataFormat)> {
        let format = self.negotiate_format(format_hint)?;
        let mut ctx = SizeContext::new(format, buffer_len);
        let size = resolution.converter.size_object(&mut ctx, value)?;
        Ok((size, ctx.take_state(), format))
    }
}

impl std::fmt::Debug for ConverterInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverterInfo")
            .field("wire_type", &self.wire_type)
            .field("preferred_format", &self.preferred_format)
            .field("is_default_mapping", &self.is_default_mapping)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::numeric::Int4Converter;
    use crate::convert::text::NumericTextConverter;
    use crate::protocol::catalog::names;

    fn int4_info() -> ConverterInfo {
        ConverterInfo::new(
            Arc::new(Int4Converter),
            WireTypeId::name(names::INT4),
            true,
        )
    }

    #[test]
    fn test_resolution_for_object_checks_type() {
        let info = int4_info();
        let value: Box<dyn Any + Send + Sync> = Box::new(42i32);
        assert!(info.resolution_for_object(value.as_ref()).is_ok());

        let wrong: Box<dyn Any + Send + Sync> = Box::new(42i64);
        assert!(matches!(
            info.resolution_for_object(wrong.as_ref()),
            Err(PgError::ResolutionFailed { .. })
        ));
    }

    #[test]
    fn test_format_negotiation() {
        let info = int4_info();
        // Supported hint wins.
        assert_eq!(
            info.negotiate_format(Some(DataFormat::Binary)).unwrap(),
            DataFormat::Binary
        );
        // Unsupported hint falls back to the converter's preference.
        assert_eq!(
            info.negotiate_format(Some(DataFormat::Text)).unwrap(),
            DataFormat::Binary
        );

        // A text-only converter negotiates text even for a binary hint.
        let numeric = ConverterInfo::new(
            Arc::new(NumericTextConverter),
            WireTypeId::name(names::NUMERIC),
            true,
        );
        assert_eq!(
            numeric.negotiate_format(Some(DataFormat::Binary)).unwrap(),
            DataFormat::Text
        );
    }

    #[test]
    fn test_preferred_size() {
        let info = int4_info();
        let resolution = info.resolution();
        let value: Box<dyn Any + Send + Sync> = Box::new(42i32);
        let (size, state, format) = info
            .preferred_size(&resolution, value.as_ref(), 0, None)
            .unwrap();
        assert_eq!(size, ValueSize::Exact(4));
        assert!(state.is_none());
        assert_eq!(format, DataFormat::Binary);
    }
}
