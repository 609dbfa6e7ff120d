//! Wire type identities and the per-session type catalog.
//!
//! PostgreSQL identifies a type on the wire either by its stable name
//! (`int4`, `text`, `_int4` for the array of `int4`) or by a per-session
//! OID assigned in the server's system catalogs. The catalog holds the
//! session's name↔OID mapping; converters store names internally and
//! resolve them to OIDs only at wire-write time.

use crate::error::{PgError, PgResult};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

/// PostgreSQL object identifier, a session-specific numeric type handle.
pub type Oid = u32;

/// Canonical wire type name. Array types carry a `_` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WireTypeName(Cow<'static, str>);

impl WireTypeName {
    /// Create a name from a static string (no allocation).
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Create a name from a runtime string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this names an array type.
    pub fn is_array(&self) -> bool {
        self.0.starts_with('_')
    }
}

impl fmt::Display for WireTypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for WireTypeName {
    fn from(name: &'static str) -> Self {
        Self::from_static(name)
    }
}

/// Well-known wire type names.
pub mod names {
    use super::WireTypeName;

    pub const BOOL: WireTypeName = WireTypeName::from_static("bool");
    pub const BYTEA: WireTypeName = WireTypeName::from_static("bytea");
    pub const INT2: WireTypeName = WireTypeName::from_static("int2");
    pub const INT4: WireTypeName = WireTypeName::from_static("int4");
    pub const INT8: WireTypeName = WireTypeName::from_static("int8");
    pub const FLOAT4: WireTypeName = WireTypeName::from_static("float4");
    pub const FLOAT8: WireTypeName = WireTypeName::from_static("float8");
    pub const TEXT: WireTypeName = WireTypeName::from_static("text");
    pub const VARCHAR: WireTypeName = WireTypeName::from_static("varchar");
    pub const NUMERIC: WireTypeName = WireTypeName::from_static("numeric");
    pub const UUID: WireTypeName = WireTypeName::from_static("uuid");
    pub const TIMESTAMP: WireTypeName = WireTypeName::from_static("timestamp");
    pub const TIMESTAMPTZ: WireTypeName = WireTypeName::from_static("timestamptz");
    pub const JSON: WireTypeName = WireTypeName::from_static("json");
    pub const JSONB: WireTypeName = WireTypeName::from_static("jsonb");
}

/// A wire type identity: either a stable name or a session OID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WireTypeId {
    Name(WireTypeName),
    Oid(Oid),
}

impl WireTypeId {
    /// Identity by name.
    pub fn name(name: impl Into<WireTypeName>) -> Self {
        WireTypeId::Name(name.into())
    }

    /// Identity by session OID.
    pub fn oid(oid: Oid) -> Self {
        WireTypeId::Oid(oid)
    }
}

impl fmt::Display for WireTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireTypeId::Name(name) => write!(f, "{}", name),
            WireTypeId::Oid(oid) => write!(f, "oid {}", oid),
        }
    }
}

impl From<WireTypeName> for WireTypeId {
    fn from(name: WireTypeName) -> Self {
        WireTypeId::Name(name)
    }
}

impl From<Oid> for WireTypeId {
    fn from(oid: Oid) -> Self {
        WireTypeId::Oid(oid)
    }
}

/// Built-in rows of `pg_type`: (name, oid, array name, array oid).
///
/// Reference: https://github.com/postgres/postgres/blob/master/src/include/catalog/pg_type.dat
const BUILTINS: &[(&str, Oid, &str, Oid)] = &[
    ("bool", 16, "_bool", 1000),
    ("bytea", 17, "_bytea", 1001),
    ("char", 18, "_char", 1002),
    ("int8", 20, "_int8", 1016),
    ("int2", 21, "_int2", 1005),
    ("int4", 23, "_int4", 1007),
    ("text", 25, "_text", 1009),
    ("json", 114, "_json", 199),
    ("float4", 700, "_float4", 1021),
    ("float8", 701, "_float8", 1022),
    ("bpchar", 1042, "_bpchar", 1014),
    ("varchar", 1043, "_varchar", 1015),
    ("date", 1082, "_date", 1182),
    ("time", 1083, "_time", 1183),
    ("timestamp", 1114, "_timestamp", 1115),
    ("timestamptz", 1184, "_timestamptz", 1185),
    ("interval", 1186, "_interval", 1187),
    ("numeric", 1700, "_numeric", 1231),
    ("uuid", 2950, "_uuid", 2951),
    ("jsonb", 3802, "_jsonb", 3807),
];

/// Per-session bidirectional mapping between wire type names and OIDs,
/// plus the element→array lookup.
///
/// Populated from the server's system catalogs at session start and
/// read-only afterwards, so it is safe for concurrent reads.
#[derive(Debug, Clone, Default)]
pub struct TypeCatalog {
    by_name: HashMap<WireTypeName, Oid>,
    by_oid: HashMap<Oid, WireTypeName>,
    array_by_element: HashMap<WireTypeName, WireTypeName>,
}

impl TypeCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog pre-seeded with the standard built-in types.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        for &(name, oid, array_name, array_oid) in BUILTINS {
            let name = WireTypeName::from_static(name);
            let array_name = WireTypeName::from_static(array_name);
            catalog.insert(name.clone(), oid);
            catalog.insert(array_name.clone(), array_oid);
            catalog.insert_array(name, array_name);
        }
        catalog
    }

    /// Register a name↔OID pair.
    pub fn insert(&mut self, name: WireTypeName, oid: Oid) {
        self.by_name.insert(name.clone(), oid);
        self.by_oid.insert(oid, name);
    }

    /// Register an element→array relationship.
    pub fn insert_array(&mut self, element: WireTypeName, array: WireTypeName) {
        self.array_by_element.insert(element, array);
    }

    /// Resolve an identity to its session OID.
    pub fn oid_of(&self, id: &WireTypeId) -> PgResult<Oid> {
        match id {
            WireTypeId::Oid(oid) => Ok(*oid),
            WireTypeId::Name(name) => self
                .by_name
                .get(name)
                .copied()
                .ok_or_else(|| PgError::UnknownType(name.to_string())),
        }
    }

    /// Reverse lookup of a session OID to its name.
    pub fn name_of(&self, oid: Oid) -> PgResult<&WireTypeName> {
        self.by_oid
            .get(&oid)
            .ok_or_else(|| PgError::UnknownType(format!("oid {}", oid)))
    }

    /// The array type whose elements have the given identity.
    pub fn array_of(&self, element: &WireTypeId) -> PgResult<WireTypeId> {
        let name = match element {
            WireTypeId::Name(name) => name,
            WireTypeId::Oid(oid) => self.name_of(*oid)?,
        };
        self.array_by_element
            .get(name)
            .cloned()
            .map(WireTypeId::Name)
            .ok_or_else(|| PgError::UnknownType(format!("array of {}", name)))
    }

    /// Whether the identity resolves in this catalog.
    pub fn contains(&self, id: &WireTypeId) -> bool {
        self.oid_of(id).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookups() {
        let catalog = TypeCatalog::with_builtins();
        assert_eq!(catalog.oid_of(&WireTypeId::name(names::INT4)).unwrap(), 23);
        assert_eq!(catalog.oid_of(&WireTypeId::oid(77777)).unwrap(), 77777);
        assert_eq!(catalog.name_of(25).unwrap().as_str(), "text");
        assert!(matches!(
            catalog.oid_of(&WireTypeId::name(WireTypeName::new("no_such_type"))),
            Err(PgError::UnknownType(_))
        ));
    }

    #[test]
    fn test_array_lookup() {
        let catalog = TypeCatalog::with_builtins();
        let array = catalog.array_of(&WireTypeId::name(names::TEXT)).unwrap();
        assert_eq!(array, WireTypeId::name(WireTypeName::from_static("_text")));
        assert_eq!(catalog.oid_of(&array).unwrap(), 1009);

        // Element given by OID resolves through the reverse map first.
        let array = catalog.array_of(&WireTypeId::oid(23)).unwrap();
        assert_eq!(catalog.oid_of(&array).unwrap(), 1007);
    }

    #[test]
    fn test_array_names() {
        assert!(WireTypeName::from_static("_int4").is_array());
        assert!(!names::INT4.is_array());
    }

    #[test]
    fn test_session_remap() {
        // A session may assign different OIDs; the name side is stable.
        let mut catalog = TypeCatalog::new();
        catalog.insert(names::INT4, 90001);
        assert_eq!(catalog.oid_of(&WireTypeId::name(names::INT4)).unwrap(), 90001);
        assert_eq!(catalog.name_of(90001).unwrap(), &names::INT4);
    }
}
