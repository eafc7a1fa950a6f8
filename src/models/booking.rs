use crate::document::ID_FIELD;
use crate::errors::{DbError, ValidationIssue};
use crate::hooks::{Hook, HookRegistry, LifecycleEvent};
use crate::model::Model;
use crate::query::Populate;
use crate::types::{bson_date, DocumentId, FieldKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn yes() -> bool {
    true
}

/// A paid (or pending) seat on a tour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tour: Option<DocumentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<DocumentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(with = "bson_date", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "yes")]
    pub paid: bool,
}

impl Model for Booking {
    const COLLECTION: &'static str = "bookings";
    const NAME: &'static str = "Booking";

    fn field_kind(path: &str) -> Option<FieldKind> {
        match path {
            "tour" | "user" | ID_FIELD => Some(FieldKind::ObjectId),
            "price" => Some(FieldKind::Number),
            "createdAt" => Some(FieldKind::Date),
            "paid" => Some(FieldKind::Boolean),
            _ => None,
        }
    }

    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if self.tour.is_none() {
            issues.push(ValidationIssue::new("tour", "Booking must belong to a Tour!"));
        }
        if self.user.is_none() {
            issues.push(ValidationIssue::new("user", "Booking must belong to a User!"));
        }
        if self.price.is_none() {
            issues.push(ValidationIssue::new("price", "Booking must have a price."));
        }
        issues
    }

    fn register_hooks(hooks: &HookRegistry) -> Result<(), DbError> {
        hooks.register(
            Self::COLLECTION,
            LifecycleEvent::BeforeFind,
            "populate",
            Hook::query(|_, plan| {
                plan.populate.push(Populate::path("user", "users"));
                plan.populate.push(Populate::path("tour", "tours").select("name"));
                Ok(())
            }),
        )
    }
}
