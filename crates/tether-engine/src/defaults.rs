//! Default constants for bridge configuration.
//!
//! Centralizes the numbers and names shared by the descriptor builder, the
//! dispatch hooks and [`crate::options::BridgeOptions`].

/// Maximum number of parameters a bridged method may declare.
pub const DEFAULT_MAX_PARAMS: usize = 10;

/// Name of the method invoked by the render callback.
pub const DEFAULT_PAINT_METHOD: &str = "Paint";

/// Name of the native method called after a deferred initializer ran.
pub const UPDATE_METHOD: &str = "update";

/// Native type name of generic script objects.
pub const PLAIN_OBJECT_TYPE: &str = "PlainObject";

/// Property of a generic script object holding its declared type name.
pub const PLAIN_TYPE_PROPERTY: &str = "plainType";

/// Name of the synthesized string conversion member.
pub const TO_STRING: &str = "toString";

/// Name of the synthesized primitive coercion method, before lowering.
pub const VALUE_OF: &str = "ValueOf";

/// Generic boxed argument and result type in method signatures.
pub const GENERIC_TYPE: &str = "QVariant";

/// Result type of methods returning several values.
pub const GENERIC_LIST_TYPE: &str = "QVariantList";

/// Environment variable overriding the maximum parameter count.
pub const ENV_MAX_PARAMS: &str = "TETHER_MAX_PARAMS";

/// Environment variable overriding the paint method name.
pub const ENV_PAINT_METHOD: &str = "TETHER_PAINT_METHOD";
