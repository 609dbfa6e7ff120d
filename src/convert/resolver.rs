//! Converter resolution.
//!
//! A resolver maps a `(Rust type, wire type)` pair, at least one side
//! present, to a [`ConverterInfo`]. Resolvers compose as an ordered
//! chain; the first non-empty answer wins. The default resolver
//! canonicalizes the pair against the default-pair table, then tries the
//! numeric path (exact width or checked coercion), the text path, and
//! finally the registered factories. Array support is a factory: it
//! recognizes registered `Vec<U>`/`Vec<Option<U>>` types and wraps the
//! element converter in the array codec.
//!
//! A process-wide default chain and an LRU info cache live behind
//! `Lazy`; both are immutable after first use.

use crate::config::PgConfig;
use crate::convert::array::ArrayConverter;
use crate::convert::info::ConverterInfo;
use crate::convert::nullable::NullableConverter;
use crate::convert::numeric::{
    BoolConverter, CoercionConverter, Float8Converter, Int2Converter, Int4Converter,
    Int8Converter,
};
use crate::convert::temporal::{Timestamp, TimestampConverter};
use crate::convert::text::{CharConverter, NumericTextConverter, PgNumeric, TextConverter};
use crate::convert::uuid::UuidConverter;
use crate::convert::PgConverter;
use crate::error::{PgError, PgResult};
use crate::protocol::catalog::{names, TypeCatalog, WireTypeId, WireTypeName};
use lru::LruCache;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::any::TypeId;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use uuid::Uuid;

/// Runtime identity of an application type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AppType {
    pub id: TypeId,
    pub name: &'static str,
}

impl AppType {
    /// The identity of `T`.
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }
}

/// A resolution policy. Returns `Ok(None)` when the pair is outside its
/// competence so the next resolver in the chain can try.
pub trait ConverterResolver: Send + Sync {
    fn resolve(
        &self,
        app: Option<AppType>,
        wire: Option<&WireTypeId>,
        catalog: &TypeCatalog,
    ) -> PgResult<Option<ConverterInfo>>;
}

/// Factory for open/generic wrappers (arrays). Consulted in order; the
/// first factory returning an info wins.
pub trait ConverterFactory: Send + Sync {
    fn create(
        &self,
        app: AppType,
        wire: Option<&WireTypeId>,
        catalog: &TypeCatalog,
    ) -> PgResult<Option<ConverterInfo>>;
}

fn same_wire(a: &WireTypeId, b: &WireTypeId, catalog: &TypeCatalog) -> bool {
    match (catalog.oid_of(a), catalog.oid_of(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Ordered set of resolution policies; the first to answer wins.
pub struct ResolverChain {
    resolvers: Vec<Box<dyn ConverterResolver>>,
}

impl ResolverChain {
    /// An empty chain.
    pub fn new() -> Self {
        Self {
            resolvers: Vec::new(),
        }
    }

    /// A chain holding the default resolver built from `config`.
    pub fn with_defaults(config: &PgConfig) -> Self {
        let mut chain = Self::new();
        chain.push(Box::new(DefaultResolver::new(config)));
        chain
    }

    /// Append a resolver. Earlier resolvers take precedence.
    pub fn push(&mut self, resolver: Box<dyn ConverterResolver>) {
        self.resolvers.push(resolver);
    }

    /// Resolve the pair, failing with `ResolutionFailed` when no policy
    /// answers. At least one of `app`/`wire` must be present.
    pub fn resolve(
        &self,
        app: Option<AppType>,
        wire: Option<&WireTypeId>,
        catalog: &TypeCatalog,
    ) -> PgResult<ConverterInfo> {
        if app.is_none() && wire.is_none() {
            return Err(PgError::resolution_failed("<unspecified>", "<unspecified>"));
        }
        for resolver in &self.resolvers {
            if let Some(info) = resolver.resolve(app, wire, catalog)? {
                if let Some(requested) = wire {
                    // A caller that declared a wire type expects it honored.
                    debug_assert!(
                        same_wire(requested, info.wire_type(), catalog),
                        "resolver substituted wire type {} for requested {}",
                        info.wire_type(),
                        requested,
                    );
                }
                tracing::debug!(
                    app = app.map(|a| a.name).unwrap_or("<any>"),
                    wire = %info.wire_type(),
                    default = info.is_default_mapping(),
                    "resolved converter"
                );
                return Ok(info);
            }
        }
        Err(PgError::resolution_failed(
            app.map(|a| a.name).unwrap_or("<any>"),
            wire.map(|w| w.to_string())
                .unwrap_or_else(|| "<default>".to_string()),
        ))
    }
}

impl Default for ResolverChain {
    fn default() -> Self {
        Self::new()
    }
}

fn info<C: PgConverter>(converter: C, wire: WireTypeId, is_default: bool) -> ConverterInfo {
    ConverterInfo::new(Arc::new(converter), wire, is_default)
}

/// Expand the numeric path for one wire width: the exact Rust type maps
/// directly, every other registered width goes through checked coercion,
/// and `Option<_>` variants get the nullable lift.
macro_rules! int_family {
    ($tid:expr, $wire:expr, $default:expr, $base:expr, $name:expr; $exact:ty; $($coerced:ty),+ $(,)?) => {{
        if $tid == TypeId::of::<$exact>() {
            return Ok(Some(info($base, $wire.clone(), $default)));
        }
        if $tid == TypeId::of::<Option<$exact>>() {
            return Ok(Some(info(NullableConverter::new($base), $wire.clone(), $default)));
        }
        $(
            if $tid == TypeId::of::<$coerced>() {
                return Ok(Some(info(
                    CoercionConverter::<$coerced, _>::new($base, $name),
                    $wire.clone(),
                    $default,
                )));
            }
            if $tid == TypeId::of::<Option<$coerced>>() {
                return Ok(Some(info(
                    NullableConverter::new(CoercionConverter::<$coerced, _>::new($base, $name)),
                    $wire.clone(),
                    $default,
                )));
            }
        )+
    }};
}

/// Expand scalar arms that map one Rust type (and its `Option`) onto one
/// converter.
macro_rules! scalar_pair {
    ($tid:expr, $wire:expr, $default:expr; $ty:ty => $converter:expr) => {{
        if $tid == TypeId::of::<$ty>() {
            return Ok(Some(info($converter, $wire.clone(), $default)));
        }
        if $tid == TypeId::of::<Option<$ty>>() {
            return Ok(Some(info(
                NullableConverter::new($converter),
                $wire.clone(),
                $default,
            )));
        }
    }};
}

macro_rules! canonical_entries {
    ($tid:expr; $(($ty:ty, $name:expr)),+ $(,)?) => {
        $(
            if $tid == TypeId::of::<$ty>() || $tid == TypeId::of::<Option<$ty>>() {
                return Some($name);
            }
        )+
    };
}

/// The canonical wire type for an application type, per the default-pair
/// table.
fn canonical_wire_for(tid: TypeId) -> Option<WireTypeName> {
    canonical_entries!(tid;
        (i16, names::INT2),
        (i32, names::INT4),
        (i64, names::INT8),
        (i8, names::INT2),
        (u8, names::INT2),
        (u16, names::INT4),
        (u32, names::INT8),
        (String, names::TEXT),
        (Arc<str>, names::TEXT),
        (char, names::TEXT),
        (bool, names::BOOL),
        (f64, names::FLOAT8),
        (PgNumeric, names::NUMERIC),
        (Uuid, names::UUID),
        (Timestamp, names::TIMESTAMP),
    );
    canonical_entries!(tid;
        (Vec<i16>, WireTypeName::from_static("_int2")),
        (Vec<i32>, WireTypeName::from_static("_int4")),
        (Vec<i64>, WireTypeName::from_static("_int8")),
        (Vec<String>, WireTypeName::from_static("_text")),
        (Vec<bool>, WireTypeName::from_static("_bool")),
        (Vec<f64>, WireTypeName::from_static("_float8")),
        (Vec<Uuid>, WireTypeName::from_static("_uuid")),
        (Vec<Timestamp>, WireTypeName::from_static("_timestamp")),
        (Vec<Option<i16>>, WireTypeName::from_static("_int2")),
        (Vec<Option<i32>>, WireTypeName::from_static("_int4")),
        (Vec<Option<i64>>, WireTypeName::from_static("_int8")),
        (Vec<Option<String>>, WireTypeName::from_static("_text")),
        (Vec<Option<bool>>, WireTypeName::from_static("_bool")),
        (Vec<Option<f64>>, WireTypeName::from_static("_float8")),
        (Vec<Option<Uuid>>, WireTypeName::from_static("_uuid")),
        (Vec<Option<Timestamp>>, WireTypeName::from_static("_timestamp")),
    );
    None
}

/// The canonical application type for a wire type, for callers that
/// declared only the wire side.
fn default_app_for(wire: &WireTypeName) -> Option<AppType> {
    match wire.as_str() {
        "int2" => Some(AppType::of::<i16>()),
        "int4" => Some(AppType::of::<i32>()),
        "int8" => Some(AppType::of::<i64>()),
        "text" | "varchar" | "bpchar" => Some(AppType::of::<String>()),
        "bool" => Some(AppType::of::<bool>()),
        "float8" => Some(AppType::of::<f64>()),
        "numeric" => Some(AppType::of::<PgNumeric>()),
        "uuid" => Some(AppType::of::<Uuid>()),
        "timestamp" | "timestamptz" => Some(AppType::of::<Timestamp>()),
        "_int2" => Some(AppType::of::<Vec<i16>>()),
        "_int4" => Some(AppType::of::<Vec<i32>>()),
        "_int8" => Some(AppType::of::<Vec<i64>>()),
        "_text" => Some(AppType::of::<Vec<String>>()),
        "_bool" => Some(AppType::of::<Vec<bool>>()),
        "_float8" => Some(AppType::of::<Vec<f64>>()),
        "_uuid" => Some(AppType::of::<Vec<Uuid>>()),
        "_timestamp" => Some(AppType::of::<Vec<Timestamp>>()),
        _ => None,
    }
}

/// The default resolution policy: default-pair canonicalization, numeric
/// and text paths, then factories.
pub struct DefaultResolver {
    factories: Vec<Box<dyn ConverterFactory>>,
    enable_infinity: bool,
}

impl DefaultResolver {
    /// Build the default resolver, including the array factory.
    pub fn new(config: &PgConfig) -> Self {
        Self {
            factories: vec![Box::new(ArrayFactory::with_defaults(config))],
            enable_infinity: config.enable_infinity_conversions,
        }
    }

    /// Append a factory. Earlier factories take precedence.
    pub fn push_factory(&mut self, factory: Box<dyn ConverterFactory>) {
        self.factories.push(factory);
    }

    fn try_factories(
        &self,
        app: AppType,
        wire: Option<&WireTypeId>,
        catalog: &TypeCatalog,
    ) -> PgResult<Option<ConverterInfo>> {
        for factory in &self.factories {
            if let Some(found) = factory.create(app, wire, catalog)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    fn build_scalar(
        &self,
        app: AppType,
        wire_name: &WireTypeName,
        wire: WireTypeId,
        is_default: bool,
    ) -> PgResult<Option<ConverterInfo>> {
        let tid = app.id;
        match wire_name.as_str() {
            "int2" => {
                int_family!(tid, wire, is_default, Int2Converter, names::INT2;
                    i16; i8, u8, u16, u32, i32, i64);
            }
            "int4" => {
                int_family!(tid, wire, is_default, Int4Converter, names::INT4;
                    i32; i8, u8, u16, u32, i16, i64);
            }
            "int8" => {
                int_family!(tid, wire, is_default, Int8Converter, names::INT8;
                    i64; i8, u8, u16, u32, i16, i32);
            }
            "text" | "varchar" | "bpchar" => {
                scalar_pair!(tid, wire, is_default; String => TextConverter::<String>::new());
                scalar_pair!(tid, wire, is_default; Arc<str> => TextConverter::<Arc<str>>::new());
                scalar_pair!(tid, wire, is_default; char => CharConverter);
            }
            "bool" => {
                scalar_pair!(tid, wire, is_default; bool => BoolConverter);
            }
            "float8" => {
                scalar_pair!(tid, wire, is_default; f64 => Float8Converter);
            }
            "numeric" => {
                scalar_pair!(tid, wire, is_default; PgNumeric => NumericTextConverter);
            }
            "uuid" => {
                scalar_pair!(tid, wire, is_default; Uuid => UuidConverter);
            }
            "timestamp" | "timestamptz" => {
                scalar_pair!(tid, wire, is_default;
                    Timestamp => TimestampConverter::new(self.enable_infinity));
            }
            _ => {}
        }
        Ok(None)
    }
}

impl ConverterResolver for DefaultResolver {
    fn resolve(
        &self,
        app: Option<AppType>,
        wire: Option<&WireTypeId>,
        catalog: &TypeCatalog,
    ) -> PgResult<Option<ConverterInfo>> {
        // Canonicalize: fill in whichever side is absent.
        let wire_name = match wire {
            Some(WireTypeId::Name(name)) => Some(name.clone()),
            Some(WireTypeId::Oid(oid)) => Some(catalog.name_of(*oid)?.clone()),
            None => None,
        };
        let app = match app {
            Some(app) => app,
            None => match wire_name.as_ref().and_then(default_app_for) {
                Some(app) => app,
                None => return Ok(None),
            },
        };
        let canonical = canonical_wire_for(app.id);
        let wire_name = match wire_name.or_else(|| canonical.clone()) {
            Some(name) => name,
            // No declared wire type and no canonical pair: factories only.
            None => return self.try_factories(app, wire, catalog),
        };
        let is_default = canonical.as_ref() == Some(&wire_name);

        if let Some(found) =
            self.build_scalar(app, &wire_name, WireTypeId::Name(wire_name.clone()), is_default)?
        {
            if !catalog.contains(found.wire_type()) {
                return Err(PgError::UnknownType(wire_name.to_string()));
            }
            return Ok(Some(found));
        }
        self.try_factories(app, wire, catalog)
    }
}

type ArrayBuilder =
    Box<dyn Fn(Option<&WireTypeId>, &TypeCatalog) -> PgResult<Option<ConverterInfo>> + Send + Sync>;

/// Factory producing array converter infos for registered element types.
pub struct ArrayFactory {
    builders: HashMap<TypeId, ArrayBuilder>,
}

impl ArrayFactory {
    /// An empty factory.
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// The factory covering the built-in element types.
    pub fn with_defaults(config: &PgConfig) -> Self {
        let mut factory = Self::new();
        factory.register(names::INT2, || Int2Converter);
        factory.register(names::INT4, || Int4Converter);
        factory.register(names::INT8, || Int8Converter);
        factory.register(names::TEXT, TextConverter::<String>::new);
        factory.register(names::BOOL, || BoolConverter);
        factory.register(names::FLOAT8, || Float8Converter);
        factory.register(names::UUID, || UuidConverter);
        let infinity = config.enable_infinity_conversions;
        factory.register(names::TIMESTAMP, move || TimestampConverter::new(infinity));
        factory
    }

    /// Register array support for one element converter: both `Vec<U>`
    /// and `Vec<Option<U>>` become resolvable against the element's
    /// array wire type.
    pub fn register<C, F>(&mut self, elem_name: WireTypeName, make: F)
    where
        C: PgConverter,
        F: Fn() -> C + Clone + Send + Sync + 'static,
    {
        let name = elem_name.clone();
        let make_plain = make.clone();
        self.builders.insert(
            TypeId::of::<Vec<C::Value>>(),
            Box::new(move |wire, catalog| {
                let converter =
                    ArrayConverter::new(make_plain(), WireTypeId::Name(name.clone()));
                build_array_info(wire, catalog, &name, converter)
            }),
        );
        let name = elem_name;
        self.builders.insert(
            TypeId::of::<Vec<Option<C::Value>>>(),
            Box::new(move |wire, catalog| {
                let converter = ArrayConverter::new(
                    NullableConverter::new(make()),
                    WireTypeId::Name(name.clone()),
                );
                build_array_info(wire, catalog, &name, converter)
            }),
        );
    }
}

impl Default for ArrayFactory {
    fn default() -> Self {
        Self::new()
    }
}

fn build_array_info<C: PgConverter>(
    wire: Option<&WireTypeId>,
    catalog: &TypeCatalog,
    elem_name: &WireTypeName,
    converter: ArrayConverter<C>,
) -> PgResult<Option<ConverterInfo>> {
    let canonical = catalog.array_of(&WireTypeId::Name(elem_name.clone()))?;
    if let Some(requested) = wire {
        if !same_wire(requested, &canonical, catalog) {
            return Ok(None);
        }
    }
    Ok(Some(ConverterInfo::new(
        Arc::new(converter),
        canonical,
        true,
    )))
}

impl ConverterFactory for ArrayFactory {
    fn create(
        &self,
        app: AppType,
        wire: Option<&WireTypeId>,
        catalog: &TypeCatalog,
    ) -> PgResult<Option<ConverterInfo>> {
        match self.builders.get(&app.id) {
            Some(builder) => builder(wire, catalog),
            None => Ok(None),
        }
    }
}

// ==================== Process-wide defaults ====================

static DEFAULT_CHAIN: Lazy<ResolverChain> =
    Lazy::new(|| ResolverChain::with_defaults(&PgConfig::default()));

/// The process-wide default resolver chain, built from the default
/// configuration on first use and immutable afterwards.
pub fn default_chain() -> &'static ResolverChain {
    &DEFAULT_CHAIN
}

const INFO_CACHE_CAPACITY: usize = 256;

static INFO_CACHE: Lazy<Mutex<LruCache<(TypeId, Option<WireTypeId>), ConverterInfo>>> =
    Lazy::new(|| {
        Mutex::new(LruCache::new(
            NonZeroUsize::new(INFO_CACHE_CAPACITY).expect("non-zero cache capacity"),
        ))
    });

/// Resolve through the default chain with an LRU cache keyed by
/// `(application type, requested wire type)`.
pub fn resolve_cached(
    app: Option<AppType>,
    wire: Option<&WireTypeId>,
    catalog: &TypeCatalog,
) -> PgResult<ConverterInfo> {
    let Some(app) = app else {
        return default_chain().resolve(None, wire, catalog);
    };
    let key = (app.id, wire.cloned());
    if let Some(hit) = INFO_CACHE.lock().get(&key) {
        return Ok(hit.clone());
    }
    let resolved = default_chain().resolve(Some(app), wire, catalog)?;
    INFO_CACHE.lock().put(key, resolved.clone());
    Ok(resolved)
}

/// Typed convenience over [`resolve_cached`].
pub fn resolve_value_type<T: Send + Sync + 'static>(
    wire: Option<&WireTypeId>,
    catalog: &TypeCatalog,
) -> PgResult<ConverterInfo> {
    resolve_cached(Some(AppType::of::<T>()), wire, catalog)
}
