//! Conversion error types shared by the bridge

/// Result type for value conversions
pub type ConvertResult<T> = Result<T, ConversionError>;

/// Failure while converting a value across or within the bridge
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConversionError {
    /// No conversion exists between the two types
    #[error("unable to convert {from} to {to}")]
    TypeMismatch {
        /// Source type name
        from: String,
        /// Destination type name
        to: String,
    },

    /// A container could not be converted element by element
    #[error("cannot use {from} as {to} ({reason})")]
    Incompatible {
        /// Source container description
        from: String,
        /// Destination type name
        to: String,
        /// Nested failure
        reason: String,
    },

    /// A map was assigned to a struct that cannot be written in place
    #[error("cannot unmarshal map to {to} (struct is not addressable)")]
    NotAddressable {
        /// Destination type name
        to: String,
    },

    /// A map key has no string rendering
    #[error("cannot use {key} as a map key: it has no string rendering")]
    MapKey {
        /// Key type name
        key: String,
    },

    /// Custom unmarshal failure
    #[error("{0}")]
    Custom(String),
}

impl ConversionError {
    /// Shorthand for [`ConversionError::TypeMismatch`]
    pub fn mismatch(from: impl Into<String>, to: impl Into<String>) -> Self {
        ConversionError::TypeMismatch {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl From<String> for ConversionError {
    fn from(s: String) -> Self {
        ConversionError::Custom(s)
    }
}

impl From<&str> for ConversionError {
    fn from(s: &str) -> Self {
        ConversionError::Custom(s.to_string())
    }
}
