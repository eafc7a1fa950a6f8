use crate::document::ID_FIELD;
use crate::errors::{DbError, ValidationIssue};
use crate::hooks::{Hook, HookRegistry, LifecycleEvent};
use crate::index::IndexSpec;
use crate::model::Model;
use crate::types::FieldKind;
use bson::doc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

pub const ROLES: [&str; 4] = ["user", "guide", "lead-guide", "admin"];

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}$").expect("valid regex"));

fn default_photo() -> String {
    "default.jpg".to_string()
}

fn default_role() -> String {
    "user".to_string()
}

fn yes() -> bool {
    true
}

/// Account profile. Credentials are not part of the stored shape; password fields in input are
/// dropped on decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default = "default_photo")]
    pub photo: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default = "yes")]
    pub active: bool,
}

impl Model for User {
    const COLLECTION: &'static str = "users";
    const NAME: &'static str = "User";

    fn field_kind(path: &str) -> Option<FieldKind> {
        match path {
            "name" | "email" | "photo" | "role" => Some(FieldKind::String),
            "active" => Some(FieldKind::Boolean),
            ID_FIELD => Some(FieldKind::ObjectId),
            _ => None,
        }
    }

    fn hidden_fields() -> &'static [&'static str] {
        &["active"]
    }

    fn indexes() -> &'static [IndexSpec] {
        const INDEXES: [IndexSpec; 1] = [IndexSpec::unique(&["email"])];
        &INDEXES
    }

    fn normalize(&mut self) {
        if let Some(name) = &mut self.name {
            *name = name.trim().to_string();
        }
        if let Some(email) = &mut self.email {
            *email = email.trim().to_lowercase();
        }
    }

    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if self.name.as_deref().is_none_or(str::is_empty) {
            issues.push(ValidationIssue::new("name", "Please tell us your name!"));
        }
        match &self.email {
            None => issues.push(ValidationIssue::new("email", "Please provide your email")),
            Some(e) if !EMAIL.is_match(e) => issues.push(ValidationIssue::new("email", "Please provide a valid email")),
            Some(_) => {}
        }
        if !ROLES.contains(&self.role.as_str()) {
            issues.push(ValidationIssue::new(
                "role",
                format!("`{}` is not a valid enum value for path `role`.", self.role),
            ));
        }
        issues
    }

    fn register_hooks(hooks: &HookRegistry) -> Result<(), DbError> {
        hooks.register(
            Self::COLLECTION,
            LifecycleEvent::BeforeFind,
            "active-only",
            Hook::query(|_, plan| {
                plan.and_where(doc! { "active": { "$ne": false } });
                Ok(())
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_lowercased_and_checked() {
        let mut u: User = bson::from_document(doc! { "name": "Ann", "email": " Ann@Example.COM ", "password": "x" }).unwrap();
        u.normalize();
        assert_eq!(u.email.as_deref(), Some("ann@example.com"));
        assert_eq!((u.photo.as_str(), u.role.as_str(), u.active), ("default.jpg", "user", true));
        assert!(u.validate().is_empty());
        let doc = bson::to_document(&u).unwrap();
        assert!(!doc.contains_key("password"));

        u.email = Some("not-an-email".into());
        u.role = "boss".into();
        let paths: Vec<String> = u.validate().into_iter().map(|i| i.path).collect();
        assert_eq!(paths, vec!["email", "role"]);
    }
}
