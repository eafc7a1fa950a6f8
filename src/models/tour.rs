use crate::document::{as_f64, ID_FIELD};
use crate::errors::{DbError, ValidationIssue};
use crate::hooks::{Hook, HookRegistry, LifecycleEvent};
use crate::index::IndexSpec;
use crate::model::Model;
use crate::query::Populate;
use crate::types::{bson_date, DocumentId, FieldKind, ScalarKind};
use bson::{doc, Bson, Document as BsonDocument};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

pub const DIFFICULTIES: [&str; 3] = ["easy", "medium", "difficult"];
pub const DEFAULT_RATING: f64 = 4.5;
const NAME_MIN: usize = 10;
const NAME_MAX: usize = 40;

static NON_SLUG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));

/// Lowercase, URL-safe form of a name. Accented letters lose their marks (`é` becomes `e`);
/// every run of anything else but ASCII alphanumerics collapses to one `-`.
#[must_use]
pub fn slugify(name: &str) -> String {
    let folded: String = name.trim().nfkd().filter(|c| !is_combining_mark(*c)).collect();
    NON_SLUG.replace_all(&folded.to_lowercase(), "-").trim_matches('-').to_string()
}

/// GeoJSON point plus a description; `day` is set on itinerary stops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(rename = "type", default = "point")]
    pub kind: String,
    #[serde(default)]
    pub coordinates: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<f64>,
}

fn point() -> String {
    "Point".to_string()
}

fn default_rating() -> f64 {
    DEFAULT_RATING
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tour {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_group_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    #[serde(default = "default_rating")]
    pub ratings_average: f64,
    #[serde(default)]
    pub ratings_quantity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_discount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_cover: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(with = "bson_date", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson_date::vec", default)]
    pub start_dates: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub secret_tour: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_location: Option<Location>,
    #[serde(default)]
    pub locations: Vec<Location>,
    #[serde(default)]
    pub guides: Vec<DocumentId>,
}

fn trim_opt(s: &mut Option<String>) {
    if let Some(v) = s {
        *v = v.trim().to_string();
    }
}

fn required<T>(issues: &mut Vec<ValidationIssue>, value: &Option<T>, path: &str, message: &str) {
    if value.is_none() {
        issues.push(ValidationIssue::new(path, message));
    }
}

impl Model for Tour {
    const COLLECTION: &'static str = "tours";
    const NAME: &'static str = "Tour";

    fn field_kind(path: &str) -> Option<FieldKind> {
        Some(match path {
            "name" | "slug" | "difficulty" | "summary" | "description" | "imageCover" => FieldKind::String,
            "duration" | "maxGroupSize" | "ratingsAverage" | "ratingsQuantity" | "price" | "priceDiscount"
            | "locations.day" => FieldKind::Number,
            "createdAt" => FieldKind::Date,
            "secretTour" => FieldKind::Boolean,
            "images" => FieldKind::Array(ScalarKind::String),
            "startDates" => FieldKind::Array(ScalarKind::Date),
            "guides" => FieldKind::Array(ScalarKind::ObjectId),
            "startLocation.coordinates" | "locations.coordinates" => FieldKind::Array(ScalarKind::Number),
            ID_FIELD => FieldKind::ObjectId,
            "startLocation" | "locations" => FieldKind::Mixed,
            _ => return None,
        })
    }

    fn hidden_fields() -> &'static [&'static str] {
        &["createdAt"]
    }

    fn indexes() -> &'static [IndexSpec] {
        const INDEXES: [IndexSpec; 2] = [IndexSpec::unique(&["name"]), IndexSpec::hash(&["slug"])];
        &INDEXES
    }

    fn normalize(&mut self) {
        trim_opt(&mut self.name);
        trim_opt(&mut self.summary);
        trim_opt(&mut self.description);
        self.ratings_average = (self.ratings_average * 10.0).round() / 10.0;
    }

    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        match &self.name {
            None => issues.push(ValidationIssue::new("name", "A tour must have a name.")),
            Some(n) if n.chars().count() > NAME_MAX => {
                issues.push(ValidationIssue::new("name", "A tour name must have <= 40 characters."));
            }
            Some(n) if n.chars().count() < NAME_MIN => {
                issues.push(ValidationIssue::new("name", "A tour name must have >= 10 characters."));
            }
            Some(_) => {}
        }
        required(&mut issues, &self.duration, "duration", "A tour must have a duration.");
        required(&mut issues, &self.max_group_size, "maxGroupSize", "A tour must have a group size.");
        match &self.difficulty {
            None => issues.push(ValidationIssue::new("difficulty", "A tour must have a difficulty.")),
            Some(d) if !DIFFICULTIES.contains(&d.as_str()) => {
                issues.push(ValidationIssue::new("difficulty", "Difficulty is either easy, medium or difficult"));
            }
            Some(_) => {}
        }
        if self.ratings_average < 1.0 {
            issues.push(ValidationIssue::new("ratingsAverage", "Rating must be above 1.0"));
        } else if self.ratings_average > 5.0 {
            issues.push(ValidationIssue::new("ratingsAverage", "Rating must be below 5.0"));
        }
        required(&mut issues, &self.price, "price", "A tour must have a price.");
        if let (Some(discount), Some(price)) = (self.price_discount, self.price)
            && discount >= price
        {
            issues.push(ValidationIssue::new(
                "priceDiscount",
                format!("The discounted price ({discount}) should be below the regular price"),
            ));
        }
        required(&mut issues, &self.summary, "summary", "A tour must have a description.");
        required(&mut issues, &self.image_cover, "imageCover", "A tour must have a cover image.");
        for (path, loc) in
            self.start_location.iter().map(|l| ("startLocation", l)).chain(self.locations.iter().map(|l| ("locations", l)))
        {
            if loc.kind != "Point" {
                issues.push(ValidationIssue::new(
                    format!("{path}.type"),
                    format!("`{}` is not a valid enum value for path `type`.", loc.kind),
                ));
            }
        }
        issues
    }

    /// `durationWeeks`, derived from `duration`.
    fn decorate(doc: &mut BsonDocument) {
        if let Some(d) = doc.get("duration").and_then(as_f64) {
            doc.insert("durationWeeks", d / 7.0);
        }
    }

    fn register_hooks(hooks: &HookRegistry) -> Result<(), DbError> {
        hooks.register(
            Self::COLLECTION,
            LifecycleEvent::BeforeCreate,
            "slug",
            Hook::document(|_, doc| {
                if let Ok(name) = doc.get_str("name") {
                    let slug = slugify(name);
                    doc.insert("slug", slug);
                }
                Ok(())
            }),
        )?;
        hooks.register(
            Self::COLLECTION,
            LifecycleEvent::BeforeUpdateMatch,
            "slug",
            Hook::query(|_, plan| {
                if let Some(Bson::String(name)) = plan.update_sets("name") {
                    let slug = slugify(name);
                    plan.update_set("slug", slug);
                }
                Ok(())
            }),
        )?;
        hooks.register(
            Self::COLLECTION,
            LifecycleEvent::BeforeFind,
            "visibility",
            Hook::query(|_, plan| {
                if !plan.is_by_id() {
                    plan.and_where(doc! { "secretTour": { "$ne": true } });
                }
                plan.populate.push(Populate::path("guides", "users").select("-__v -passwordChangedAt"));
                Ok(())
            }),
        )?;
        hooks.register(
            Self::COLLECTION,
            LifecycleEvent::AfterFind,
            "timing",
            Hook::found(|ctx, docs| {
                log::debug!("tour query took {} ms ({} docs)", ctx.started.elapsed().as_millis(), docs.len());
                Ok(())
            }),
        )
    }
}
