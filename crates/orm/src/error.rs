//! Error types for the ORM system
//!
//! Registration and initialization failures are reported as [`SchemaError`].
//! They are terminal for the declaration set being initialized. Per-call
//! failures during hydration and writes are [`ModelError`]s. They never
//! touch the relationship graph.

use crate::config::ConfigError;

/// Result type alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// ORM error type alias
pub type OrmError = ModelError;

/// ORM result type alias
pub type OrmResult<T> = ModelResult<T>;

/// Result type alias for registration and initialization
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Configuration errors detected while registering or initializing models
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// Malformed registration options (unknown primary key, duplicate model, ...)
    #[error("Configuration error in model '{model}': {message}")]
    Configuration { model: String, message: String },

    /// A field's declared type has no physical column mapping
    #[error("Cannot convert field '{field}' of model '{model}': type '{type_name}' has no column mapping")]
    TypeConversion {
        model: String,
        field: String,
        type_name: String,
    },

    /// A relationship field does not resolve to exactly one related model
    #[error(
        "Field '{field}' of model '{model}' must reference exactly one model: \
         declare it as '{related}' or '{related} | {pk_type}' ({reason})"
    )]
    MustUnionForeignKey {
        model: String,
        field: String,
        related: String,
        pk_type: String,
        reason: String,
    },

    /// A back-reference names a field that does not exist, or is missing entirely
    #[error("Undefined back-reference for field '{field}' of model '{model}' to model '{related}': {message}")]
    UndefinedBackReference {
        model: String,
        field: String,
        related: String,
        message: String,
    },

    /// A back-reference names a field that does not point back to this model
    #[error(
        "Mismatching back-reference: '{model}.{field}' declares '{related}.{back_reference}' \
         as its back-reference, but that field does not point back to '{model}'"
    )]
    MismatchingBackReference {
        model: String,
        related: String,
        field: String,
        back_reference: String,
    },
}

impl SchemaError {
    pub(crate) fn configuration(model: &str, message: impl Into<String>) -> Self {
        SchemaError::Configuration {
            model: model.to_string(),
            message: message.into(),
        }
    }

    /// Name of the model whose declaration is at fault
    pub fn model(&self) -> &str {
        match self {
            SchemaError::Configuration { model, .. }
            | SchemaError::TypeConversion { model, .. }
            | SchemaError::MustUnionForeignKey { model, .. }
            | SchemaError::UndefinedBackReference { model, .. }
            | SchemaError::MismatchingBackReference { model, .. } => model,
        }
    }
}

/// Error types for ORM operations
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The declarations could not be turned into a schema
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Database connection or query error
    #[error("Database error: {0}")]
    Database(String),

    /// Record not found in database
    #[error("Record not found in table '{0}'")]
    NotFound(String),

    /// Record does not match its model's shape
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Query parameters rejected before reaching storage
    #[error("Query error: {0}")]
    Query(String),

    /// Model name not present in the relationship graph
    #[error("Model '{0}' is not registered")]
    UnknownModel(String),

    /// An operation ran before the relationship graph was built
    #[error("Models have not been initialized; call init() first")]
    NotInitialized,

    /// Invalid runtime configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<sqlx::Error> for ModelError {
    fn from(err: sqlx::Error) -> Self {
        ModelError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_names_model() {
        let error = SchemaError::UndefinedBackReference {
            model: "One".to_string(),
            field: "many_a".to_string(),
            related: "Many".to_string(),
            message: "field 'missing' does not exist".to_string(),
        };

        assert_eq!(error.model(), "One");
        assert!(error.to_string().contains("many_a"));
        assert!(error.to_string().contains("Many"));
    }

    #[test]
    fn test_schema_error_converts_to_model_error() {
        let error: ModelError = SchemaError::configuration("One", "unknown primary key 'pk'").into();

        match error {
            ModelError::Schema(SchemaError::Configuration { model, message }) => {
                assert_eq!(model, "One");
                assert_eq!(message, "unknown primary key 'pk'");
            }
            other => panic!("Expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_mismatching_message_mentions_both_sides() {
        let error = SchemaError::MismatchingBackReference {
            model: "One".to_string(),
            related: "Many".to_string(),
            field: "many_a".to_string(),
            back_reference: "id".to_string(),
        };

        let message = error.to_string();
        assert!(message.contains("One.many_a"));
        assert!(message.contains("Many.id"));
    }
}
