// ============================================================================
// TYPE NAME CONSTANTS
// ============================================================================

// Primitive types
pub(crate) const TYPE_I8: &str = "i8";
pub(crate) const TYPE_I16: &str = "i16";
pub(crate) const TYPE_I32: &str = "i32";
pub(crate) const TYPE_I64: &str = "i64";
pub(crate) const TYPE_U8: &str = "u8";
pub(crate) const TYPE_U16: &str = "u16";
pub(crate) const TYPE_U32: &str = "u32";
pub(crate) const TYPE_U64: &str = "u64";
pub(crate) const TYPE_F32: &str = "f32";
pub(crate) const TYPE_F64: &str = "f64";
pub(crate) const TYPE_BOOL: &str = "bool";
pub(crate) const TYPE_CHAR: &str = "char";

// String types
pub(crate) const TYPE_ALLOC_STRING: &str = "alloc::string::String";
pub(crate) const TYPE_STD_STRING: &str = "std::string::String";
pub(crate) const TYPE_STRING: &str = "String";

// Codec backed value types
pub(crate) const TYPE_UUID: &str = "uuid::Uuid";
pub(crate) const TYPE_DATE_TIME: &str = "chrono::DateTime<chrono::Utc>";

/// Top type every other type is assignable to
pub const TYPE_ANY: &str = "any";

// ============================================================================
// SERIALIZATION CONSTANTS
// ============================================================================

/// Identity tag carried by objects in serialized graphs
pub const ID_TAG: &str = "@id";

/// Concrete type tag for objects stored under an abstract declared type
pub const TYPE_TAG: &str = "@type";

// ============================================================================
// TREE CONSTANTS
// ============================================================================

/// Separator between breadcrumb segments of a node path
pub const DEFAULT_PATH_SEPARATOR: &str = " | ";

/// Maximum nesting depth when building nodes from initial values and defaults
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Number of nodes a background scan visits between cancellation checks
pub const DEFAULT_SCAN_BATCH_SIZE: usize = 256;

/// Environment variable naming a JSON configuration file
pub const CONFIG_ENV_VAR: &str = "CLASS_BUILDER_CONFIG";

/// Preview text for an empty slot
pub const NULL_PREVIEW: &str = "(null)";
