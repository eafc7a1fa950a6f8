use bson::Document as BsonDocument;
use thiserror::Error;

/// One failed field rule reported by a model validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self { path: path.into(), message: message.into() }
    }
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues.iter().map(|i| format!("{}: {}", i.path, i.message)).collect::<Vec<_>>().join(", ")
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("Encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Serde JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("BSON decode: {0}")]
    BsonDecode(#[from] bson::de::Error),

    #[error("BSON encode: {0}")]
    BsonEncode(#[from] bson::ser::Error),

    #[error("Collection not found: {0}")]
    NoSuchCollection(String),

    #[error("Document not found: {0}")]
    NoSuchDocument(String),

    #[error("Cast to {kind} failed for value \"{value}\" at path \"{path}\"")]
    Cast { path: String, value: String, kind: String },

    #[error("E11000 duplicate key error collection: {collection} dup key: {key}")]
    Duplicate { collection: String, key: BsonDocument },

    #[error("{model} validation failed: {}", join_issues(.issues))]
    Validation { model: String, issues: Vec<ValidationIssue> },

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("WAL error: {0}")]
    WalError(String),

    #[error("hook kind does not fit lifecycle event {0}")]
    HookMismatch(String),
}

impl DbError {
    pub fn cast(path: impl Into<String>, value: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::Cast { path: path.into(), value: value.into(), kind: kind.into() }
    }

    pub fn validation(model: impl Into<String>, issues: Vec<ValidationIssue>) -> Self {
        Self::Validation { model: model.into(), issues }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_lists_every_issue() {
        let e = DbError::validation(
            "Tour",
            vec![
                ValidationIssue::new("name", "A tour must have a name."),
                ValidationIssue::new("price", "A tour must have a price."),
            ],
        );
        assert_eq!(
            e.to_string(),
            "Tour validation failed: name: A tour must have a name., price: A tour must have a price."
        );
    }

    #[test]
    fn cast_message_names_path_and_value() {
        let e = DbError::cast("price", "abc", "Number");
        assert_eq!(e.to_string(), "Cast to Number failed for value \"abc\" at path \"price\"");
    }
}
