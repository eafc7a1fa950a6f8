mod common;

use common::*;
use natours::config::{Environment, DEFAULT_BASE_URL};
use natours::controllers::{bookings, create_one, tours, users};
use natours::features::QueryString;
use natours::models::Tour;
use serde_json::json;

#[test]
fn tour_stats_group_by_difficulty() {
    let store = seeded_store();
    let body = tours::tour_stats(&store).unwrap().body;
    let stats = body["data"]["stats"].as_array().unwrap();
    let groups: Vec<&str> = stats.iter().map(|s| s["_id"].as_str().unwrap()).collect();
    assert_eq!(groups, vec!["EASY", "MEDIUM", "DIFFICULT"]);
    assert_eq!(stats[0]["numTours"], 1);
    assert_eq!(stats[0]["numRatings"], json!(2.0));
    assert_eq!(stats[0]["avgRating"], json!(4.5));
    assert_eq!(stats[2]["maxPrice"], json!(1997.0));
}

#[test]
fn monthly_plan_counts_starts_per_month() {
    let store = seeded_store();
    let body = tours::monthly_plan(&store, "2021").unwrap().body;
    let plan = body["data"]["plan"].as_array().unwrap();
    assert_eq!(plan.len(), 6);
    assert_eq!(plan[0], json!({ "numTourStarts": 2, "tours": ["The Forest Hiker", "The Sea Explorer"], "month": 7 }));
    assert_eq!(plan[1]["month"], 4);

    let body = tours::monthly_plan(&store, "2022").unwrap().body;
    assert_eq!(body["data"]["plan"].as_array().unwrap().len(), 2);

    assert_eq!(tours::monthly_plan(&store, "soon").unwrap_err().status_code, 400);
}

#[test]
fn tours_within_radius() {
    let store = seeded_store();
    let body = tours::tours_within(&store, "400", "51.1,-115.5", "km").unwrap().body;
    assert_eq!(names(&body), vec!["The Forest Hiker"]);
    let body = tours::tours_within(&store, "250", "51.1,-115.5", "mi").unwrap().body;
    assert_eq!(body["results"], 1);
    // The secret tour starts right here but is never listed.
    let body = tours::tours_within(&store, "10", "34.111745,-118.113491", "km").unwrap().body;
    assert_eq!(body["results"], 0);

    let err = tours::tours_within(&store, "400", "51.1", "km").unwrap_err();
    assert_eq!(err.message, "Please provide latitude and longitude in the format lat,lng.");
}

#[test]
fn distances_are_sorted_and_converted() {
    let store = seeded_store();
    let body = tours::distances(&store, "34.111745,-118.113491", "km").unwrap().body;
    let items = body["data"]["data"].as_array().unwrap();
    let names: Vec<&str> = items.iter().map(|d| d["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["The Secret Passage", "The Snow Adventurer", "The Forest Hiker", "The Sea Explorer"]);
    let km: Vec<f64> = items.iter().map(|d| d["distance"].as_f64().unwrap()).collect();
    assert!(km[0] < 0.001);
    assert!(km[1] > 1000.0 && km[1] < 1300.0, "{}", km[1]);

    let body = tours::distances(&store, "34.111745,-118.113491", "mi").unwrap().body;
    let miles = body["data"]["data"][1]["distance"].as_f64().unwrap();
    assert!((miles - km[1] * 0.621_371).abs() < 0.01);
}

#[test]
fn checkout_session_books_the_tour() {
    let store = seeded_store();
    let resp = bookings::checkout_session(&store, DEFAULT_BASE_URL, FOREST_HIKER, id(LOURDES)).unwrap();
    let session = &resp.body["session"];
    assert_eq!(session["success_url"], "http://127.0.0.1:3000/my-tours?alert=booking");
    assert_eq!(session["cancel_url"], "http://127.0.0.1:3000/tour/the-forest-hiker");
    assert_eq!(session["customer_email"], "loulou@example.com");
    assert_eq!(session["client_reference_id"], FOREST_HIKER);
    assert_eq!(session["line_items"][0]["name"], "The Forest Hiker Tour");
    assert_eq!(session["line_items"][0]["amount"], 39700);
    assert_eq!(session["line_items"][0]["images"][0], "http://127.0.0.1:3000/img/tours/tour-1-cover.jpg");

    let mine = bookings::my_tours(&store, id(LOURDES)).unwrap().body;
    assert_eq!(mine["results"], 1);
    assert_eq!(mine["data"]["tours"][0]["name"], "The Forest Hiker");
    assert_eq!(bookings::my_tours(&store, id(SOPHIE)).unwrap().body["results"], 0);

    let all = bookings::get_all_bookings(&store, QueryString::new()).unwrap().body;
    assert_eq!(all["data"]["data"][0]["tour"]["name"], "The Forest Hiker");
    assert_eq!(all["data"]["data"][0]["user"]["email"], "loulou@example.com");

    let err = bookings::checkout_session(&store, DEFAULT_BASE_URL, "5c88fa8cf4afda39709c2999", id(LOURDES)).unwrap_err();
    assert_eq!(err.status_code, 404);
}

#[test]
fn users_edit_only_their_profile_fields() {
    let store = seeded_store();
    let err = users::update_me(&store, id(LOURDES), &json!({ "password": "pass1234" })).unwrap_err();
    assert_eq!(err.message, "This route is not for password updates. Please use /updateMyPassword.");

    let body = users::update_me(&store, id(LOURDES), &json!({ "name": "Lourdes B", "role": "admin" })).unwrap().body;
    assert_eq!(body["data"]["user"]["name"], "Lourdes B");
    assert_eq!(body["data"]["user"]["role"], "user");

    let err = users::update_me(&store, id(LOURDES), &json!({ "email": "broken" })).unwrap_err();
    assert_eq!(err.message, "Validation Error: Please provide a valid email");

    assert_eq!(users::delete_me(&store, id(SOPHIE)).unwrap().status_code, 204);
    assert_eq!(users::get_all_users(&store, QueryString::new()).unwrap().body["results"], 5);
}

#[test]
fn errors_render_per_environment() {
    let store = seeded_store();
    let err = tours::get_tour(&store, "wwwww").unwrap_err();
    assert_eq!((err.status_code, err.message.as_str()), (400, "Invalid _id: wwwww."));
    assert_eq!(err.render(Environment::Production), json!({ "status": "fail", "message": "Invalid _id: wwwww." }));
    assert_eq!(err.render(Environment::Development)["error"]["statusCode"], 400);

    let err = tours::get_tour(&store, "5c88fa8cf4afda39709c2999").unwrap_err();
    assert_eq!((err.status_code, err.message.as_str()), (404, "No document found with that ID."));

    let err = create_one::<Tour>(&store, &json!({ "name": "Short" })).unwrap_err();
    assert!(
        err.message.starts_with("Validation Error: A tour name must have >= 10 characters. | A tour must have a duration."),
        "{}",
        err.message
    );
    let err = create_one::<Tour>(&store, &json!(["not", "an", "object"])).unwrap_err();
    assert_eq!(err.message, "Request body must be a JSON object.");
}
