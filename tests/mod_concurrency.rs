mod common;

use bson::doc;
use common::*;
use natours::controllers::reviews::create_review;
use natours::models::{Tour, User};
use natours::types::DocumentId;
use natours::Model;
use serde_json::json;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reviews_converge_on_the_true_average() {
    let store = Arc::new(seeded_store());
    let mut reviewers = Vec::new();
    for i in 0..8 {
        let user = User::create(&store, doc! { "name": format!("Reviewer {i}"), "email": format!("r{i}@example.com") }).unwrap();
        reviewers.push(DocumentId::from_bson(user.get("_id").unwrap()).unwrap());
    }

    let mut handles = Vec::new();
    for (i, user) in reviewers.into_iter().enumerate() {
        let store = store.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let rating = (i % 5 + 1) as f64;
            create_review(&store, Some(SEA_EXPLORER), user, json!({ "review": format!("Review {i}"), "rating": rating }))
        }));
    }
    for h in handles {
        assert_eq!(h.await.unwrap().unwrap().status_code, 201);
    }

    // Ratings 1..=5 then 1..=3 plus the seeded 5.
    let sea = Tour::find_by_id(&store, id(SEA_EXPLORER)).exec_one().unwrap().unwrap();
    assert_eq!(sea.get_f64("ratingsQuantity").unwrap(), 9.0);
    assert_eq!(sea.get_f64("ratingsAverage").unwrap(), 2.9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_readers_see_consistent_lists() {
    let store = Arc::new(seeded_store());
    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            Tour::find(&store).sort("price").exec().map(|tours| tours.len())
        }));
    }
    for h in handles {
        assert_eq!(h.await.unwrap().unwrap(), 3);
    }
}
