use crate::engine::Store;
use crate::features::QueryString;
use crate::models::Review;
use crate::types::DocumentId;
use bson::doc;
use serde_json::Value;

use super::{create_one, delete_one, get_all, get_one, update_one, ApiResponse, AppError};

/// Fills `tour` from the nested route and `user` from the caller unless the body names them.
pub fn set_tour_user_ids(body: &mut Value, tour_id: Option<&str>, user_id: DocumentId) {
    let Some(obj) = body.as_object_mut() else { return };
    if let Some(tour) = tour_id
        && !obj.contains_key("tour")
    {
        obj.insert("tour".into(), Value::String(tour.to_string()));
    }
    obj.entry("user").or_insert_with(|| Value::String(user_id.to_hex()));
}

/// All reviews, or only those of one tour when reached through `/tours/:tourId/reviews`.
pub fn get_all_reviews(store: &Store, tour_id: Option<&str>, query_string: QueryString) -> Result<ApiResponse, AppError> {
    let scope = tour_id.map_or_else(|| doc! {}, |t| doc! { "tour": t });
    get_all::<Review>(store, query_string, scope)
}

pub fn create_review(
    store: &Store,
    tour_id: Option<&str>,
    user_id: DocumentId,
    mut body: Value,
) -> Result<ApiResponse, AppError> {
    set_tour_user_ids(&mut body, tour_id, user_id);
    create_one::<Review>(store, &body)
}

pub fn get_review(store: &Store, id: &str) -> Result<ApiResponse, AppError> {
    get_one::<Review>(store, id, None)
}

pub fn update_review(store: &Store, id: &str, body: &Value) -> Result<ApiResponse, AppError> {
    update_one::<Review>(store, id, body)
}

pub fn delete_review(store: &Store, id: &str) -> Result<ApiResponse, AppError> {
    delete_one::<Review>(store, id)
}
