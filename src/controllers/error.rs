use crate::config::Environment;
use crate::document::bson_to_json;
use crate::errors::DbError;
use bson::Bson;
use serde_json::{json, Value};
use thiserror::Error;

/// An error as handed back to a caller: HTTP status, message, and whether it is an expected
/// (operational) failure or a bug.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AppError {
    pub status_code: u16,
    pub message: String,
    pub operational: bool,
    /// Underlying error text, shown in development only.
    pub detail: Option<String>,
}

impl AppError {
    pub fn new(message: impl Into<String>, status_code: u16) -> Self {
        Self { status_code, message: message.into(), operational: true, detail: None }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(message, 400)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(message, 404)
    }

    /// `fail` for client errors, `error` otherwise.
    #[must_use]
    pub fn status(&self) -> &'static str {
        if (400..500).contains(&self.status_code) { "fail" } else { "error" }
    }

    /// JSON body for this error. Production hides the message of non-operational errors.
    #[must_use]
    pub fn render(&self, env: Environment) -> Value {
        match env {
            Environment::Development => json!({
                "status": self.status(),
                "message": self.message,
                "error": { "statusCode": self.status_code, "isOperational": self.operational, "detail": self.detail },
            }),
            Environment::Production if self.operational => json!({ "status": self.status(), "message": self.message }),
            Environment::Production => {
                log::error!("ERROR: {}", self.detail.as_deref().unwrap_or(&self.message));
                json!({ "status": "error", "message": "Something went wrong." })
            }
        }
    }
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        let detail = Some(format!("{err:?}"));
        let mapped = match &err {
            DbError::Cast { path, value, .. } => Self::bad_request(format!("Invalid {path}: {value}.")),
            DbError::Duplicate { key, .. } => {
                Self::bad_request(format!("Duplicate field value:{}.", bson_to_json(&Bson::Document(key.clone()))))
            }
            DbError::Validation { issues, .. } => Self::bad_request(format!(
                "Validation Error: {}",
                issues.iter().map(|i| i.message.as_str()).collect::<Vec<_>>().join(" | ")
            )),
            DbError::NoSuchDocument(_) => Self::not_found("No document found with that ID."),
            _ => {
                log::error!("unexpected store error: {err}");
                Self { status_code: 500, message: err.to_string(), operational: false, detail: None }
            }
        };
        Self { detail, ..mapped }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ValidationIssue;
    use bson::doc;

    #[test]
    fn store_errors_map_to_client_messages() {
        let e = AppError::from(DbError::cast("_id", "wwwww", "ObjectId"));
        assert_eq!((e.status_code, e.message.as_str()), (400, "Invalid _id: wwwww."));

        let e = AppError::from(DbError::Duplicate { collection: "tours".into(), key: doc! { "name": "The Sea Explorer" } });
        assert_eq!(e.message, r#"Duplicate field value:{"name":"The Sea Explorer"}."#);

        let e = AppError::from(DbError::validation(
            "Tour",
            vec![ValidationIssue::new("name", "A tour must have a name."), ValidationIssue::new("price", "A tour must have a price.")],
        ));
        assert_eq!(e.message, "Validation Error: A tour must have a name. | A tour must have a price.");
        assert_eq!(e.status(), "fail");
    }

    #[test]
    fn production_hides_unexpected_errors() {
        let e = AppError::from(DbError::WalError("checksum mismatch".into()));
        assert!(!e.operational);
        assert_eq!(e.render(Environment::Production), json!({ "status": "error", "message": "Something went wrong." }));
        let dev = e.render(Environment::Development);
        assert_eq!(dev["message"], "WAL error: checksum mismatch");

        let q = AppError::from(DbError::QueryError("Projection cannot have a mix of inclusion and exclusion.".into()));
        assert_eq!((q.status_code, q.operational), (500, false));
        assert_eq!(q.render(Environment::Production)["message"], "Something went wrong.");

        let nf = AppError::not_found("No tour found with that ID.");
        assert_eq!(nf.render(Environment::Production), json!({ "status": "fail", "message": "No tour found with that ID." }));
    }
}
