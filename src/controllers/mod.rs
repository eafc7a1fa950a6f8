//! Framework-agnostic request handlers. Each takes the store plus already-extracted request
//! parts and returns a JSON envelope or an [`AppError`].

pub mod bookings;
pub mod error;
pub mod reviews;
pub mod tours;
pub mod users;

pub use error::AppError;

use crate::document::to_json;
use crate::engine::{Store, WriteOptions};
use crate::features::{ApiFeatures, QueryString};
use crate::model::Model;
use crate::query::Populate;
use crate::types::DocumentId;
use bson::Document as BsonDocument;
use serde_json::{json, Value};

/// A handler's successful answer: HTTP status and JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status_code: u16,
    pub body: Value,
}

impl ApiResponse {
    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self { status_code: 200, body: json!({ "status": "success", "data": data }) }
    }

    #[must_use]
    pub fn created(data: Value) -> Self {
        Self { status_code: 201, body: json!({ "status": "success", "data": data }) }
    }

    /// `{ status, results, data: { <key>: [...] } }`.
    #[must_use]
    pub fn list(key: &str, docs: &[BsonDocument]) -> Self {
        let items: Vec<Value> = docs.iter().map(to_json).collect();
        Self {
            status_code: 200,
            body: json!({ "status": "success", "results": items.len(), "data": { key: items } }),
        }
    }

    #[must_use]
    pub fn no_content() -> Self {
        Self { status_code: 204, body: json!({ "status": "success", "data": null }) }
    }
}

/// Request bodies arrive as JSON objects.
pub fn body_document(body: &Value) -> Result<BsonDocument, AppError> {
    if !body.is_object() {
        return Err(AppError::bad_request("Request body must be a JSON object."));
    }
    bson::to_document(body).map_err(|e| AppError::bad_request(format!("Invalid request body: {e}")))
}

pub(crate) fn parse_id(raw: &str) -> Result<DocumentId, AppError> {
    Ok(DocumentId::parse(raw)?)
}

fn not_found() -> AppError {
    AppError::not_found("No document found with that ID.")
}

/// Lists documents within `scope`, shaped by the caller's query string.
pub fn get_all<M: Model>(store: &Store, query_string: QueryString, scope: BsonDocument) -> Result<ApiResponse, AppError> {
    let features = ApiFeatures::new(M::find_where(store, scope), query_string).apply_all();
    let docs = features.query.exec()?;
    Ok(ApiResponse::list("data", &docs))
}

pub fn get_one<M: Model>(store: &Store, id: &str, populate: Option<Populate>) -> Result<ApiResponse, AppError> {
    let mut query = M::find_by_id(store, parse_id(id)?);
    if let Some(p) = populate {
        query = query.populate(p);
    }
    let doc = query.exec_one()?.ok_or_else(not_found)?;
    Ok(ApiResponse::ok(json!({ "data": to_json(&doc) })))
}

pub fn create_one<M: Model>(store: &Store, body: &Value) -> Result<ApiResponse, AppError> {
    let doc = M::create(store, body_document(body)?)?;
    Ok(ApiResponse::created(json!({ "data": to_json(&doc) })))
}

/// Applies the body as an update with validators on; answers with the updated document.
pub fn update_one<M: Model>(store: &Store, id: &str, body: &Value) -> Result<ApiResponse, AppError> {
    let doc = M::find_by_id_and_update(store, parse_id(id)?, body_document(body)?, WriteOptions::default())?
        .ok_or_else(not_found)?;
    Ok(ApiResponse::ok(json!({ "data": to_json(&doc) })))
}

pub fn delete_one<M: Model>(store: &Store, id: &str) -> Result<ApiResponse, AppError> {
    M::find_by_id_and_delete(store, parse_id(id)?)?.ok_or_else(not_found)?;
    Ok(ApiResponse::no_content())
}
