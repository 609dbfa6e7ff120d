//! # pgbind: PostgreSQL type conversion and parameter binding
//!
//! The core of a PostgreSQL client: converters between Rust values and
//! the binary/text wire formats, a resolver that picks the converter for
//! a `(Rust type, wire type)` pair, and the two-phase parameter writer
//! the extended-query protocol requires.
//!
//! ## Architecture
//!
//! ```text
//! value ── resolver ──> ConverterInfo ── size phase ──> (ValueSize, WriteState)
//!                                          │
//!                                          └─ write phase ──> PgWriter ──> wire
//! ```
//!
//! - **Protocol** (`protocol`): wire type catalog, data formats, and the
//!   buffered reader/writer with `None`/`Blocking`/`NonBlocking` flush
//!   modes.
//! - **Converters** (`convert`): one codec per `(Rust type, wire type)`
//!   pair, plus the nullable, numeric-coercion and array decorators.
//!   Hot call sites monomorphize over concrete converters; boxed values
//!   go through the object-safe facade.
//! - **Parameters** (`params`): resolve → size → write orchestration,
//!   sync or async, with buffered capture for prepared-statement
//!   parameter caching.
//!
//! ## Example
//!
//! ```
//! use pgbind::{params, resolver, PgWriter, TypeCatalog};
//! use std::sync::Arc;
//!
//! let catalog = Arc::new(TypeCatalog::with_builtins());
//! let info = resolver::resolve_value_type::<i32>(None, &catalog)?;
//!
//! let mut param = params::bind_parameter(&info, Box::new(42i32), 0, None)?;
//! let mut writer = PgWriter::new(catalog);
//! params::write_parameter(&mut writer, &mut param)?;
//! assert_eq!(writer.buffer(), [0x00, 0x00, 0x00, 0x2A]);
//! # Ok::<(), pgbind::PgError>(())
//! ```

pub mod config;
pub mod convert;
pub mod error;
pub mod params;
pub mod protocol;

pub use config::PgConfig;
pub use convert::info::{ConverterInfo, ConverterResolution};
pub use convert::resolver::{self, AppType, ResolverChain};
pub use convert::{NullKind, ObjectConverter, PgConverter, SizeContext};
pub use error::{PgError, PgResult};
pub use protocol::catalog::{names, Oid, TypeCatalog, WireTypeId, WireTypeName};
pub use protocol::reader::{PgReader, ReadSource};
pub use protocol::writer::{BufferPool, PgWriter, WriteSink};
pub use protocol::{CancelToken, DataFormat, FlushMode, ValueSize, WriteState};
