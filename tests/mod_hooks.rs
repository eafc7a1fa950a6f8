mod common;

use bson::{doc, Bson};
use common::*;
use natours::controllers::{reviews, tours, users};
use natours::features::QueryString;
use natours::hooks::{Hook, LifecycleEvent};
use natours::models::{Review, Tour, User};
use natours::{Model, WriteOptions};
use serde_json::json;

fn new_tour_body() -> bson::Document {
    doc! {
        "name": "Mountain Trek Adventure",
        "duration": 6,
        "maxGroupSize": 12,
        "difficulty": "medium",
        "price": 1200,
        "summary": "High passes and glacier views",
        "imageCover": "tour-9-cover.jpg",
    }
}

#[test]
fn slug_follows_name_on_create_and_update() {
    let store = seeded_store();
    let saved = Tour::create(&store, new_tour_body()).unwrap();
    assert_eq!(saved.get_str("slug").unwrap(), "mountain-trek-adventure");
    assert_eq!(saved.get_f64("ratingsAverage").unwrap(), 4.5);

    let id = natours::types::DocumentId::from_bson(saved.get("_id").unwrap()).unwrap();
    let updated = Tour::find_by_id_and_update(&store, id, doc! { "name": "Alpine Trek Adventure" }, WriteOptions::default())
        .unwrap()
        .unwrap();
    assert_eq!(updated.get_str("slug").unwrap(), "alpine-trek-adventure");

    let by_slug = Tour::find_one(&store, doc! { "slug": "alpine-trek-adventure" }).exec_one().unwrap();
    assert!(by_slug.is_some());
}

#[test]
fn slug_folds_accented_letters() {
    let store = seeded_store();
    let mut body = new_tour_body();
    body.insert("name", "Café Crème Côte Tour");
    let saved = Tour::create(&store, body).unwrap();
    assert_eq!(saved.get_str("slug").unwrap(), "cafe-creme-cote-tour");
}

#[test]
fn secret_tours_are_reachable_by_id_only() {
    let store = seeded_store();
    assert!(Tour::find_where(&store, doc! { "name": "The Secret Passage" }).exec().unwrap().is_empty());
    let resp = tours::get_tour(&store, SECRET_PASSAGE).unwrap();
    assert_eq!(resp.body["data"]["data"]["name"], "The Secret Passage");
}

#[test]
fn inactive_users_disappear_from_reads() {
    let store = seeded_store();
    let body = users::get_all_users(&store, QueryString::new()).unwrap().body;
    assert_eq!(body["results"], 6);
    for user in body["data"]["data"].as_array().unwrap() {
        assert!(user.get("active").is_none());
    }
    let err = users::get_me(&store, id(AYLA_INACTIVE)).unwrap_err();
    assert_eq!(err.status_code, 404);
    assert_eq!(User::count(&store, &doc! {}).unwrap(), 7);
}

#[test]
fn tours_come_with_their_guides() {
    let store = seeded_store();
    let tour = Tour::find_by_id(&store, id(FOREST_HIKER)).exec_one().unwrap().unwrap();
    let Some(Bson::Array(guides)) = tour.get("guides") else { panic!("guides missing") };
    let names: Vec<&str> = guides.iter().map(|g| g.as_document().unwrap().get_str("name").unwrap()).collect();
    assert_eq!(names, vec!["Steve T. Scaife", "Kate Morrison"]);
    let guide = guides[0].as_document().unwrap();
    assert!(!guide.contains_key("__v"));
    assert!(!guide.contains_key("active"));
    assert_eq!(guide.get_str("role").unwrap(), "lead-guide");
}

#[test]
fn reviews_carry_their_author_name_and_photo() {
    let store = seeded_store();
    let body = reviews::get_all_reviews(&store, Some(FOREST_HIKER), QueryString::new()).unwrap().body;
    assert_eq!(body["results"], 2);
    for review in body["data"]["data"].as_array().unwrap() {
        let mut keys: Vec<&str> = review["user"].as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["_id", "id", "name", "photo"]);
    }
}

#[test]
fn single_tour_lists_its_reviews() {
    let store = seeded_store();
    let body = tours::get_tour(&store, SNOW_ADVENTURER).unwrap().body;
    let tour = &body["data"]["data"];
    assert_eq!(tour["reviews"].as_array().unwrap().len(), 2);
    assert_eq!(tour["durationWeeks"], json!(4.0 / 7.0));
}

#[test]
fn review_writes_keep_tour_ratings_current() {
    let store = seeded_store();
    let rating = |t: &str| {
        let tour = Tour::find_by_id(&store, id(t)).exec_one().unwrap().unwrap();
        (tour.get_f64("ratingsQuantity").unwrap(), tour.get_f64("ratingsAverage").unwrap())
    };
    assert_eq!(rating(SEA_EXPLORER), (1.0, 5.0));

    let created = reviews::create_review(&store, Some(SEA_EXPLORER), id(ADMIN), json!({ "review": "Fine", "rating": 3 }))
        .unwrap();
    assert_eq!(created.status_code, 201);
    assert_eq!(rating(SEA_EXPLORER), (2.0, 4.0));

    let review_id = created.body["data"]["data"]["id"].as_str().unwrap().to_string();
    reviews::update_review(&store, &review_id, &json!({ "rating": 4 })).unwrap();
    assert_eq!(rating(SEA_EXPLORER), (2.0, 4.5));

    let resp = reviews::delete_review(&store, &review_id).unwrap();
    assert_eq!(resp.status_code, 204);
    assert_eq!(rating(SEA_EXPLORER), (1.0, 5.0));

    // The last review going away resets the tour.
    Review::find_one_and_delete(&store, doc! { "tour": id(SEA_EXPLORER) }).unwrap().unwrap();
    assert_eq!(rating(SEA_EXPLORER), (0.0, 4.5));
}

#[test]
fn one_review_per_tour_and_user() {
    let store = seeded_store();
    let err = reviews::create_review(&store, Some(FOREST_HIKER), id(LOURDES), json!({ "review": "Again", "rating": 1 }))
        .unwrap_err();
    assert_eq!(err.status_code, 400);
    assert!(err.message.starts_with("Duplicate field value:"), "{}", err.message);
}

#[test]
fn extra_find_hooks_stack_their_conditions() {
    let store = seeded_store();
    for (name, price) in [("cheap-first", 500), ("under-1000", 1000)] {
        store
            .hooks()
            .register(
                Tour::COLLECTION,
                LifecycleEvent::BeforeFind,
                name,
                Hook::query(move |_, plan| {
                    plan.and_where(doc! { "price": { "$lt": price } });
                    Ok(())
                }),
            )
            .unwrap();
    }
    let found = Tour::find(&store).sort("price").exec().unwrap();
    let names: Vec<&str> = found.iter().map(|t| t.get_str("name").unwrap()).collect();
    assert_eq!(names, vec!["The Forest Hiker", "The Sea Explorer"]);
}
