use crate::document::{as_f64, ID_FIELD};
use crate::engine::{Store, WriteOptions};
use crate::errors::{DbError, ValidationIssue};
use crate::hooks::{Hook, HookRegistry, LifecycleEvent, MatchOutcome};
use crate::index::IndexSpec;
use crate::model::Model;
use crate::query::Populate;
use crate::types::{bson_date, DocumentId, FieldKind};
use bson::{doc, Bson};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::tour::{Tour, DEFAULT_RATING};

const RATING_MIN: f64 = 1.0;
const RATING_MAX: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(with = "bson_date", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tour: Option<DocumentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<DocumentId>,
}

/// Recomputes `ratingsQuantity` and `ratingsAverage` of a tour from every review that currently
/// references it; a tour with no reviews goes back to 4.5 and 0.
pub fn calc_average_ratings(store: &Store, tour_id: DocumentId) -> Result<(), DbError> {
    let _guard = store.derived_lock();
    let stats = Review::aggregate(
        store,
        &[
            doc! { "$match": { "tour": tour_id } },
            doc! { "$group": { "_id": "$tour", "nRating": { "$sum": 1 }, "avgRating": { "$avg": "$rating" } } },
        ],
    )?;
    let (quantity, average) = stats.first().map_or((0.0, DEFAULT_RATING), |s| {
        (
            s.get("nRating").and_then(as_f64).unwrap_or(0.0),
            s.get("avgRating").and_then(as_f64).unwrap_or(DEFAULT_RATING),
        )
    });
    log::debug!("tour {tour_id}: {quantity} ratings, average {average}");
    Tour::find_by_id_and_update(
        store,
        tour_id,
        doc! { "ratingsQuantity": quantity, "ratingsAverage": average },
        WriteOptions::unvalidated(),
    )?;
    Ok(())
}

fn tour_of(doc: &bson::Document) -> Option<DocumentId> {
    match doc.get("tour")? {
        Bson::Document(populated) => populated.get(ID_FIELD).and_then(DocumentId::from_bson),
        other => DocumentId::from_bson(other),
    }
}

fn recalc_matched(store: &Store, outcome: &MatchOutcome) -> Result<(), DbError> {
    let before = outcome.before.as_ref().and_then(tour_of);
    let after = outcome.after.as_ref().and_then(tour_of);
    for tour in before.into_iter().chain(after.filter(|a| Some(*a) != before)) {
        calc_average_ratings(store, tour)?;
    }
    Ok(())
}

impl Model for Review {
    const COLLECTION: &'static str = "reviews";
    const NAME: &'static str = "Review";

    fn field_kind(path: &str) -> Option<FieldKind> {
        match path {
            "review" => Some(FieldKind::String),
            "rating" => Some(FieldKind::Number),
            "createdAt" => Some(FieldKind::Date),
            "tour" | "user" | ID_FIELD => Some(FieldKind::ObjectId),
            _ => None,
        }
    }

    fn indexes() -> &'static [IndexSpec] {
        const INDEXES: [IndexSpec; 2] = [IndexSpec::unique(&["tour", "user"]), IndexSpec::hash(&["tour"])];
        &INDEXES
    }

    fn normalize(&mut self) {
        if let Some(text) = &mut self.review {
            *text = text.trim().to_string();
        }
    }

    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if self.review.as_deref().is_none_or(str::is_empty) {
            issues.push(ValidationIssue::new("review", "A review must have a text."));
        }
        match self.rating {
            Some(r) if r < RATING_MIN => issues.push(ValidationIssue::new(
                "rating",
                format!("Path `rating` ({r}) is less than minimum allowed value (1)."),
            )),
            Some(r) if r > RATING_MAX => issues.push(ValidationIssue::new(
                "rating",
                format!("Path `rating` ({r}) is more than maximum allowed value (5)."),
            )),
            _ => {}
        }
        if self.tour.is_none() {
            issues.push(ValidationIssue::new("tour", "Review must belong to a tour."));
        }
        if self.user.is_none() {
            issues.push(ValidationIssue::new("user", "Review must belong to a user."));
        }
        issues
    }

    fn register_hooks(hooks: &HookRegistry) -> Result<(), DbError> {
        hooks.register(
            Self::COLLECTION,
            LifecycleEvent::BeforeFind,
            "populate-user",
            Hook::query(|_, plan| {
                plan.populate.push(Populate::path("user", "users").select("name photo"));
                Ok(())
            }),
        )?;
        hooks.register(
            Self::COLLECTION,
            LifecycleEvent::AfterCreate,
            "ratings",
            Hook::document(|ctx, doc| match tour_of(doc) {
                Some(tour) => calc_average_ratings(ctx.store, tour),
                None => Ok(()),
            }),
        )?;
        for event in [LifecycleEvent::AfterUpdateMatch, LifecycleEvent::AfterDelete] {
            hooks.register(
                Self::COLLECTION,
                event,
                "ratings",
                Hook::matched(|ctx, outcome| recalc_matched(ctx.store, outcome)),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_text_and_both_references() {
        let r: Review = bson::from_document(doc! { "rating": 7 }).unwrap();
        let messages: Vec<String> = r.validate().into_iter().map(|i| i.message).collect();
        assert_eq!(
            messages,
            vec![
                "A review must have a text.",
                "Path `rating` (7) is more than maximum allowed value (5).",
                "Review must belong to a tour.",
                "Review must belong to a user.",
            ]
        );
    }

    #[test]
    fn tour_of_reads_plain_and_populated_references() {
        let id = DocumentId::new();
        assert_eq!(tour_of(&doc! { "tour": id }), Some(id));
        assert_eq!(tour_of(&doc! { "tour": { "_id": id, "name": "x" } }), Some(id));
        assert_eq!(tour_of(&doc! {}), None);
    }

    #[test]
    fn recompute_is_not_blocked_by_another_store() {
        let busy = Store::memory();
        let _held = busy.derived_lock();

        let store = Store::memory();
        crate::models::register_all(&store).unwrap();
        let tour = Tour::create_with(
            &store,
            doc! { "name": "Lonely Lake Tour", "price": 100 },
            WriteOptions::unvalidated(),
        )
        .unwrap();
        let tour_id = DocumentId::from_bson(tour.get("_id").unwrap()).unwrap();
        Review::create(&store, doc! { "review": "Calm", "rating": 3, "tour": tour_id, "user": DocumentId::new() }).unwrap();

        let saved = Tour::find_by_id(&store, tour_id).exec_one().unwrap().unwrap();
        assert_eq!(saved.get_f64("ratingsQuantity").unwrap(), 1.0);
        assert_eq!(saved.get_f64("ratingsAverage").unwrap(), 3.0);
    }
}
