use crate::document::{as_f64, ID_FIELD};
use crate::engine::Store;
use crate::features::QueryString;
use crate::model::Model;
use crate::models::{Booking, Tour, User};
use crate::types::DocumentId;
use bson::{doc, Bson};
use serde::Serialize;
use serde_json::json;
use url::Url;
use uuid::Uuid;

use super::{get_all, get_one, parse_id, ApiResponse, AppError};

/// One purchasable line of a checkout session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineItem {
    pub name: String,
    pub description: Option<String>,
    pub images: Vec<String>,
    /// Smallest currency unit.
    pub amount: i64,
    pub currency: &'static str,
    pub quantity: u32,
}

/// What a payment provider needs to take the caller through checkout.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckoutSession {
    pub id: Uuid,
    pub mode: &'static str,
    pub success_url: String,
    pub cancel_url: String,
    pub customer_email: Option<String>,
    pub client_reference_id: String,
    pub line_items: Vec<LineItem>,
}

fn join(base: &Url, path: &str) -> Result<Url, AppError> {
    base.join(path).map_err(|e| AppError::new(format!("Invalid base URL: {e}"), 500))
}

/// Builds a checkout session for `tour_id` and records the booking for `user_id`.
pub fn checkout_session(
    store: &Store,
    base_url: &str,
    tour_id: &str,
    user_id: DocumentId,
) -> Result<ApiResponse, AppError> {
    let base = Url::parse(base_url).map_err(|e| AppError::new(format!("Invalid base URL: {e}"), 500))?;
    let tour_id = parse_id(tour_id)?;
    let tour = Tour::find_by_id(store, tour_id)
        .exec_one()?
        .ok_or_else(|| AppError::not_found("No tour found with that ID."))?;
    let user = User::find_by_id(store, user_id)
        .exec_one()?
        .ok_or_else(|| AppError::not_found("No user found with that ID."))?;

    let price = tour.get("price").and_then(as_f64).ok_or_else(|| AppError::bad_request("This tour has no price."))?;
    let name = tour.get_str("name").unwrap_or_default().to_string();
    let mut success = join(&base, "my-tours")?;
    success.query_pairs_mut().append_pair("alert", "booking");
    let cancel = join(&base, &format!("tour/{}", tour.get_str("slug").unwrap_or_default()))?;
    let images = match tour.get_str("imageCover") {
        Ok(cover) => vec![join(&base, &format!("img/tours/{cover}"))?.to_string()],
        Err(_) => Vec::new(),
    };

    let session = CheckoutSession {
        id: Uuid::new_v4(),
        mode: "payment",
        success_url: success.to_string(),
        cancel_url: cancel.to_string(),
        customer_email: user.get_str("email").ok().map(str::to_string),
        client_reference_id: tour_id.to_hex(),
        line_items: vec![LineItem {
            name: format!("{name} Tour"),
            description: tour.get_str("summary").ok().map(str::to_string),
            images,
            amount: (price * 100.0).round() as i64,
            currency: "usd",
            quantity: 1,
        }],
    };
    Booking::create(store, doc! { "tour": tour_id, "user": user_id, "price": price })?;
    log::info!("checkout session {} for tour {tour_id} by {user_id}", session.id);
    Ok(ApiResponse { status_code: 200, body: json!({ "status": "success", "session": session }) })
}

/// Tours the caller has booked.
pub fn my_tours(store: &Store, user_id: DocumentId) -> Result<ApiResponse, AppError> {
    let bookings = Booking::find_where(store, doc! { "user": user_id }).exec()?;
    let tour_ids: Vec<Bson> = bookings
        .iter()
        .filter_map(|b| match b.get("tour")? {
            Bson::Document(t) => t.get(ID_FIELD).cloned(),
            other => Some(other.clone()),
        })
        .collect();
    let tours = Tour::find_where(store, doc! { "_id": { "$in": tour_ids } }).exec()?;
    Ok(ApiResponse::list("tours", &tours))
}

pub fn get_all_bookings(store: &Store, query_string: QueryString) -> Result<ApiResponse, AppError> {
    get_all::<Booking>(store, query_string, doc! {})
}

pub fn get_booking(store: &Store, id: &str) -> Result<ApiResponse, AppError> {
    get_one::<Booking>(store, id, None)
}
