//! Wire-level primitives shared by the conversion layer.
//!
//! Data formats, flush modes, value sizes and the cancellation token, plus
//! the buffered reader/writer adapters in the submodules.

pub mod catalog;
pub mod reader;
pub mod writer;

use crate::error::{PgError, PgResult};
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Data format code in the PostgreSQL protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i16)]
pub enum DataFormat {
    /// Text format (human-readable)
    #[default]
    Text = 0,
    /// Binary format (type-specific packed representation)
    Binary = 1,
}

impl DataFormat {
    /// Wire format code as sent in Bind/RowDescription messages.
    pub fn code(self) -> i16 {
        self as i16
    }

    /// The other format.
    pub fn other(self) -> DataFormat {
        match self {
            DataFormat::Text => DataFormat::Binary,
            DataFormat::Binary => DataFormat::Text,
        }
    }
}

/// Flush discipline of a wire endpoint.
///
/// `None` accumulates in memory and never flushes; `Blocking` flushes
/// synchronously; `NonBlocking` flushes through the async path. Calling
/// the wrong variant fails synchronously with `WrongFlushMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    None,
    Blocking,
    NonBlocking,
}

/// Size of an encoded value, reported by the size phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSize {
    /// The write phase will produce exactly this many bytes.
    Exact(usize),
    /// The write phase will produce at most this many bytes.
    UpperBound(usize),
    /// The size cannot be predicted.
    Unknown,
}

impl ValueSize {
    /// The exact byte count, if known.
    pub fn exact(self) -> Option<usize> {
        match self {
            ValueSize::Exact(n) => Some(n),
            _ => None,
        }
    }

    /// An upper bound on the byte count, if one exists.
    pub fn upper_bound(self) -> Option<usize> {
        match self {
            ValueSize::Exact(n) | ValueSize::UpperBound(n) => Some(n),
            ValueSize::Unknown => None,
        }
    }
}

/// Opaque per-parameter scratch produced at size time and consumed at
/// write time for the same `(converter, value)` pair.
pub type WriteState = Box<dyn Any + Send + Sync>;

/// Cooperative cancellation token.
///
/// Converters propagate the token into every inner async call; it is
/// checked at suspension points only. A cancelled operation leaves the
/// wire endpoint in an indeterminate state and the caller must treat the
/// connection as broken.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fail with `Cancelled` if cancellation has been requested.
    pub fn check(&self) -> PgResult<()> {
        if self.is_cancelled() {
            Err(PgError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_codes() {
        assert_eq!(DataFormat::Text.code(), 0);
        assert_eq!(DataFormat::Binary.code(), 1);
        assert_eq!(DataFormat::Binary.other(), DataFormat::Text);
    }

    #[test]
    fn test_value_size_accessors() {
        assert_eq!(ValueSize::Exact(4).exact(), Some(4));
        assert_eq!(ValueSize::UpperBound(4).exact(), None);
        assert_eq!(ValueSize::UpperBound(4).upper_bound(), Some(4));
        assert_eq!(ValueSize::Unknown.upper_bound(), None);
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        token.cancel();
        assert!(matches!(token.check(), Err(PgError::Cancelled)));
        // Clones observe the same flag.
        let clone = token.clone();
        assert!(clone.is_cancelled());
    }
}
