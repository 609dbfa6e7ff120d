//! Timestamp support.
//!
//! PostgreSQL stores timestamps as microseconds since 2000-01-01
//! 00:00:00 UTC in a big-endian i64. The extreme i64 values are reserved
//! sentinels for -infinity and +infinity; whether they convert to the
//! application's `Timestamp::NEG_INFINITY`/`Timestamp::INFINITY` is
//! gated by `PgConfig::enable_infinity_conversions`.

use crate::config::PgConfig;
use crate::convert::{check_value_len, PgConverter, SizeContext};
use crate::error::{PgError, PgResult};
use crate::protocol::reader::PgReader;
use crate::protocol::writer::PgWriter;
use crate::protocol::{CancelToken, DataFormat, ValueSize};
use std::fmt;
use std::future::Future;

/// PostgreSQL epoch: 2000-01-01 00:00:00 UTC.
/// Difference from the Unix epoch (1970-01-01) in microseconds.
const PG_EPOCH_OFFSET_USEC: i64 = 946_684_800_000_000;

/// Timestamp without timezone, microseconds since 2000-01-01 00:00:00.
///
/// Precision is 1 microsecond; sub-microsecond input is the caller's
/// responsibility to round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    usec: i64,
}

impl Timestamp {
    /// The negative-infinity sentinel.
    pub const NEG_INFINITY: Timestamp = Timestamp { usec: i64::MIN };
    /// The positive-infinity sentinel.
    pub const INFINITY: Timestamp = Timestamp { usec: i64::MAX };

    /// Create from microseconds since the PostgreSQL epoch.
    pub const fn from_pg_usec(usec: i64) -> Self {
        Self { usec }
    }

    /// Create from a Unix timestamp (seconds since 1970-01-01).
    pub fn from_unix_secs(secs: i64) -> Self {
        Self {
            usec: secs * 1_000_000 - PG_EPOCH_OFFSET_USEC,
        }
    }

    /// Microseconds since the PostgreSQL epoch.
    pub const fn pg_usec(self) -> i64 {
        self.usec
    }

    /// Convert to a Unix timestamp (seconds since 1970-01-01).
    pub fn to_unix_secs(self) -> i64 {
        (self.usec + PG_EPOCH_OFFSET_USEC) / 1_000_000
    }

    /// False for the two infinity sentinels.
    pub const fn is_finite(self) -> bool {
        self.usec != i64::MIN && self.usec != i64::MAX
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Timestamp::INFINITY => f.write_str("infinity"),
            Timestamp::NEG_INFINITY => f.write_str("-infinity"),
            finite => write!(f, "{}us", finite.usec),
        }
    }
}

/// Binary converter for `timestamp`/`timestamptz`.
#[derive(Debug, Clone, Copy)]
pub struct TimestampConverter {
    enable_infinity: bool,
}

impl TimestampConverter {
    /// Create a converter; `enable_infinity` mirrors
    /// `PgConfig::enable_infinity_conversions`.
    pub fn new(enable_infinity: bool) -> Self {
        Self { enable_infinity }
    }

    /// Create a converter from a client configuration.
    pub fn from_config(config: &PgConfig) -> Self {
        Self::new(config.enable_infinity_conversions)
    }
}

impl PgConverter for TimestampConverter {
    type Value = Timestamp;

    fn can_convert(&self, format: DataFormat) -> bool {
        format == DataFormat::Binary
    }

    fn size(&self, _ctx: &mut SizeContext, value: &Timestamp) -> PgResult<ValueSize> {
        if !value.is_finite() && !self.enable_infinity {
            return Err(PgError::out_of_range("timestamp", value));
        }
        Ok(ValueSize::Exact(8))
    }

    fn write(&self, writer: &mut PgWriter, value: &Timestamp) -> PgResult<()> {
        if !value.is_finite() && !self.enable_infinity {
            return Err(PgError::out_of_range("timestamp", value));
        }
        writer.write_i64(value.pg_usec());
        Ok(())
    }

    fn write_async<'a>(
        &'a self,
        writer: &'a mut PgWriter,
        value: &'a Timestamp,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<()>> + Send + 'a {
        async move {
            if writer.should_flush(8) {
                writer.flush_async(cancel).await?;
            }
            self.write(writer, value)
        }
    }

    fn read(&self, reader: &mut PgReader) -> PgResult<Timestamp> {
        check_value_len(reader, 8, "timestamp")?;
        let usec = reader.read_i64()?;
        if (usec == i64::MIN || usec == i64::MAX) && !self.enable_infinity {
            return Err(PgError::invalid_data(
                "timestamp",
                "infinity sentinel with infinity conversions disabled",
            ));
        }
        Ok(Timestamp::from_pg_usec(usec))
    }

    fn read_async<'a>(
        &'a self,
        reader: &'a mut PgReader,
        cancel: &'a CancelToken,
    ) -> impl Future<Output = PgResult<Timestamp>> + Send + 'a {
        async move {
            reader.ensure_async(8, cancel).await?;
            self.read(reader)
        }
    }
}
