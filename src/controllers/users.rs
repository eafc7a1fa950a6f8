use crate::document::to_json;
use crate::engine::{Store, WriteOptions};
use crate::features::QueryString;
use crate::model::Model;
use crate::models::User;
use crate::types::DocumentId;
use bson::doc;
use serde_json::{json, Map, Value};

use super::{body_document, get_all, get_one, ApiResponse, AppError};

const SELF_EDITABLE: [&str; 2] = ["name", "email"];

/// Keeps only the keys in `allowed`.
#[must_use]
pub fn filter_obj(body: &Value, allowed: &[&str]) -> Value {
    let kept: Map<String, Value> = body
        .as_object()
        .map(|o| o.iter().filter(|(k, _)| allowed.contains(&k.as_str())).map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();
    Value::Object(kept)
}

pub fn get_all_users(store: &Store, query_string: QueryString) -> Result<ApiResponse, AppError> {
    get_all::<User>(store, query_string, doc! {})
}

pub fn get_me(store: &Store, user_id: DocumentId) -> Result<ApiResponse, AppError> {
    get_one::<User>(store, &user_id.to_hex(), None)
}

/// Lets a user change their own name and email. Password fields are refused.
pub fn update_me(store: &Store, user_id: DocumentId, body: &Value) -> Result<ApiResponse, AppError> {
    if body.get("password").is_some() || body.get("passwordConfirm").is_some() {
        return Err(AppError::bad_request("This route is not for password updates. Please use /updateMyPassword."));
    }
    let update = body_document(&filter_obj(body, &SELF_EDITABLE))?;
    let user = User::find_by_id_and_update(store, user_id, update, WriteOptions::default())?
        .ok_or_else(|| AppError::not_found("No user found with that ID."))?;
    Ok(ApiResponse::ok(json!({ "user": to_json(&user) })))
}

/// Deactivates the caller's account; it disappears from every user read.
pub fn delete_me(store: &Store, user_id: DocumentId) -> Result<ApiResponse, AppError> {
    User::find_by_id_and_update(store, user_id, doc! { "active": false }, WriteOptions::default())?
        .ok_or_else(|| AppError::not_found("No user found with that ID."))?;
    Ok(ApiResponse::no_content())
}
