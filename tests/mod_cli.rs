mod common;

use common::*;
use natours::cli::{execute, run_with_format, Command, OutputMode, RunContext};
use natours::config::{Environment, DEFAULT_BASE_URL};
use natours::models::register_all;
use natours::{Store, StoreOptions};
use tempfile::tempdir;

fn ctx() -> RunContext {
    RunContext { environment: Environment::Development, base_url: DEFAULT_BASE_URL.to_string() }
}

#[test]
fn import_query_and_book_through_commands() {
    let dir = tempdir().unwrap();
    let store = Store::open(StoreOptions { data_dir: Some(dir.path().to_path_buf()) }).unwrap();
    register_all(&store).unwrap();

    let resp = execute(&store, Command::Import { dir: dev_data_dir() }, &ctx()).unwrap();
    let imported = resp.body["data"]["imported"].as_array().unwrap();
    assert_eq!(imported.len(), 3);
    assert_eq!(imported[1]["collection"], "users");
    assert_eq!(imported[1]["inserted"], 7);

    let top = execute(&store, Command::TopTours { query: "difficulty=medium".into() }, &ctx()).unwrap();
    assert_eq!(names(&top.body), vec!["The Sea Explorer"]);

    let reviews = execute(&store, Command::Reviews { tour: Some(SNOW_ADVENTURER.into()), query: String::new() }, &ctx()).unwrap();
    assert_eq!(reviews.body["results"], 2);

    execute(&store, Command::Book { tour: SEA_EXPLORER.into(), user: ADMIN.into() }, &ctx()).unwrap();
    let mine = execute(&store, Command::MyTours { user: ADMIN.into() }, &ctx()).unwrap();
    assert_eq!(mine.body["results"], 1);

    run_with_format(&store, Command::Stats, &ctx(), OutputMode::Plain).unwrap();
    execute(&store, Command::Compact, &ctx()).unwrap();

    let deleted = execute(&store, Command::Delete, &ctx()).unwrap();
    assert_eq!(deleted.body["data"]["deleted"], 16);
    store.close().unwrap();
}

#[test]
fn failing_command_reports_an_error() {
    let store = seeded_store();
    let cmd = Command::ReviewCreate { tour: FOREST_HIKER.into(), user: LOURDES.into(), review: "Twice".into(), rating: 4.0 };
    let err = execute(&store, cmd.clone(), &ctx()).unwrap_err();
    assert_eq!(err.status_code, 400);
    assert!(run_with_format(&store, cmd, &ctx(), OutputMode::Json).is_err());
    assert!(execute(&store, Command::Within { distance: "x".into(), latlng: "1,2".into(), unit: "km".into() }, &ctx()).is_err());
}
