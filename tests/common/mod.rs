#![allow(dead_code)]

use natours::models::register_all;
use natours::seed::import_dev_data;
use natours::types::DocumentId;
use natours::Store;
use std::path::PathBuf;

pub const FOREST_HIKER: &str = "5c88fa8cf4afda39709c2951";
pub const SEA_EXPLORER: &str = "5c88fa8cf4afda39709c2955";
pub const SNOW_ADVENTURER: &str = "5c88fa8cf4afda39709c295a";
pub const SECRET_PASSAGE: &str = "5c88fa8cf4afda39709c295d";

pub const ADMIN: &str = "5c8a1d5b0190b214360dc057";
pub const LOURDES: &str = "5c8a1dfa2f8fb814b56fa181";
pub const SOPHIE: &str = "5c8a1e1a2f8fb814b56fa182";
pub const AYLA_INACTIVE: &str = "5c8a1ec62f8fb814b56fa183";

pub fn dev_data_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("dev-data")
}

pub fn id(hex: &str) -> DocumentId {
    DocumentId::parse(hex).unwrap()
}

/// In-memory store with every model installed and the bundled dev data loaded.
pub fn seeded_store() -> Store {
    let store = Store::memory();
    register_all(&store).unwrap();
    import_dev_data(&store, &dev_data_dir()).unwrap();
    store
}

/// `name` of every item in a list response, in order.
pub fn names(body: &serde_json::Value) -> Vec<String> {
    body["data"]["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["name"].as_str().unwrap_or_default().to_string())
        .collect()
}
