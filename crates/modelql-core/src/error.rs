use thiserror::Error;

/// Errors raised while building or changing a model graph.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Duplicate entity: {0}")]
    DuplicateEntity(String),

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Entity {entity} declares attribute {attribute} more than once")]
    DuplicateAttribute { entity: String, attribute: String },

    #[error("Relationship {entity}.{attribute} targets unknown entity {target}")]
    UnknownTarget {
        entity: String,
        attribute: String,
        target: String,
    },

    #[error("Relationship {entity}.{attribute} has no target entity")]
    MissingTarget { entity: String, attribute: String },

    #[error("Entity {entity} inherits from unknown entity {parent}")]
    UnknownParent { entity: String, parent: String },

    #[error("Entity {entity} declares {count} default views, expected exactly one")]
    DefaultViews { entity: String, count: usize },

    #[error("Entity {entity} declares view {view} more than once")]
    DuplicateView { entity: String, view: String },

    #[error("Invalid model definition: {0}")]
    Invalid(String),

    #[error("Failed to parse model file: {0}")]
    Parse(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

impl From<toml::de::Error> for ModelError {
    fn from(err: toml::de::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Result alias for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ModelError::UnknownTarget {
            entity: "Invoice".into(),
            attribute: "client".into(),
            target: "Customer".into(),
        };
        assert_eq!(
            err.to_string(),
            "Relationship Invoice.client targets unknown entity Customer"
        );

        let err = ModelError::DefaultViews {
            entity: "Invoice".into(),
            count: 2,
        };
        assert!(err.to_string().contains("exactly one"));
    }
}
