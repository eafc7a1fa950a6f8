use crate::config::Environment;
use crate::controllers::{bookings, reviews, tours, ApiResponse, AppError};
use crate::engine::Store;
use crate::features::QueryString;
use crate::seed::{delete_dev_data, import_dev_data};
use crate::types::DocumentId;
use serde_json::json;

use super::command::Command;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputMode {
    /// Pretty-printed JSON.
    Json,
    /// One JSON document per line.
    Plain,
}

/// Settings a command needs besides the store.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub environment: Environment,
    pub base_url: String,
}

/// Runs one command and returns the handler's answer.
pub fn execute(store: &Store, cmd: Command, ctx: &RunContext) -> Result<ApiResponse, AppError> {
    match cmd {
        Command::Import { dir } => {
            let reports = import_dev_data(store, &dir)?;
            Ok(ApiResponse::ok(json!({ "imported": reports })))
        }
        Command::Delete => {
            let removed = delete_dev_data(store)?;
            Ok(ApiResponse::ok(json!({ "deleted": removed })))
        }
        Command::Tours { query } => tours::get_all_tours(store, QueryString::parse(&query)),
        Command::Tour { id } => tours::get_tour(store, &id),
        Command::TopTours { query } => {
            let mut qs = QueryString::parse(&query);
            tours::alias_top_tours(&mut qs);
            tours::get_all_tours(store, qs)
        }
        Command::Stats => tours::tour_stats(store),
        Command::MonthlyPlan { year } => tours::monthly_plan(store, &year),
        Command::Within { distance, latlng, unit } => tours::tours_within(store, &distance, &latlng, &unit),
        Command::Distances { latlng, unit } => tours::distances(store, &latlng, &unit),
        Command::Reviews { tour, query } => reviews::get_all_reviews(store, tour.as_deref(), QueryString::parse(&query)),
        Command::ReviewCreate { tour, user, review, rating } => {
            let user = DocumentId::parse(&user)?;
            reviews::create_review(store, Some(&tour), user, json!({ "review": review, "rating": rating }))
        }
        Command::ReviewDelete { id } => reviews::delete_review(store, &id),
        Command::Book { tour, user } => {
            bookings::checkout_session(store, &ctx.base_url, &tour, DocumentId::parse(&user)?)
        }
        Command::MyTours { user } => bookings::my_tours(store, DocumentId::parse(&user)?),
        Command::Compact => {
            store.compact()?;
            Ok(ApiResponse::ok(json!({ "compacted": true })))
        }
    }
}

/// Runs a command and prints the result (or the rendered error) as JSON.
pub fn run_with_format(
    store: &Store,
    cmd: Command,
    ctx: &RunContext,
    mode: OutputMode,
) -> Result<(), Box<dyn std::error::Error>> {
    let (ok, body) = match execute(store, cmd, ctx) {
        Ok(resp) => (true, resp.body),
        Err(e) => (false, e.render(ctx.environment)),
    };
    let text = match mode {
        OutputMode::Json => serde_json::to_string_pretty(&body)?,
        OutputMode::Plain => serde_json::to_string(&body)?,
    };
    if ok {
        println!("{text}");
        Ok(())
    } else {
        eprintln!("{text}");
        Err(body["message"].as_str().unwrap_or("command failed").into())
    }
}

pub fn run(store: &Store, cmd: Command, ctx: &RunContext) -> Result<(), Box<dyn std::error::Error>> {
    run_with_format(store, cmd, ctx, OutputMode::Json)
}
