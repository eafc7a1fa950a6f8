use crate::engine::Store;
use crate::features::QueryString;
use crate::model::Model;
use crate::models::Tour;
use crate::query::Populate;
use bson::{doc, DateTime};
use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};

use super::{get_all, get_one, ApiResponse, AppError};

const EARTH_RADIUS_MI: f64 = 3963.2;
const EARTH_RADIUS_KM: f64 = 6378.1;
const METERS_TO_MILES: f64 = 0.000_621_371;
const METERS_TO_KM: f64 = 0.001;

/// Distance unit accepted by the geo handlers. Anything but `mi` means kilometres.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Miles,
    Kilometers,
}

impl Unit {
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s.trim() == "mi" { Self::Miles } else { Self::Kilometers }
    }

    fn earth_radius(self) -> f64 {
        match self {
            Self::Miles => EARTH_RADIUS_MI,
            Self::Kilometers => EARTH_RADIUS_KM,
        }
    }

    fn from_meters(self) -> f64 {
        match self {
            Self::Miles => METERS_TO_MILES,
            Self::Kilometers => METERS_TO_KM,
        }
    }
}

/// Parses `"lat,lng"`.
pub fn parse_latlng(latlng: &str) -> Result<(f64, f64), AppError> {
    let bad = || AppError::bad_request("Please provide latitude and longitude in the format lat,lng.");
    let (lat, lng) = latlng.split_once(',').ok_or_else(bad)?;
    let lat: f64 = lat.trim().parse().map_err(|_| bad())?;
    let lng: f64 = lng.trim().parse().map_err(|_| bad())?;
    if !lat.is_finite() || !lng.is_finite() {
        return Err(bad());
    }
    Ok((lat, lng))
}

/// Pre-fills the query string for the five best-rated, cheapest tours.
pub fn alias_top_tours(query_string: &mut QueryString) {
    query_string.set("limit", "5");
    query_string.set("sort", "-ratingsAverage,price");
    query_string.set("fields", "name,price,ratingsAverage,summary,difficulty");
}

pub fn get_all_tours(store: &Store, query_string: QueryString) -> Result<ApiResponse, AppError> {
    get_all::<Tour>(store, query_string, doc! {})
}

/// One tour with its reviews attached.
pub fn get_tour(store: &Store, id: &str) -> Result<ApiResponse, AppError> {
    get_one::<Tour>(store, id, Some(Populate::virtual_field("reviews", "reviews", "tour")))
}

/// Well-rated tours grouped by difficulty, cheapest group first.
pub fn tour_stats(store: &Store) -> Result<ApiResponse, AppError> {
    let stats = Tour::aggregate(
        store,
        &[
            doc! { "$match": { "ratingsAverage": { "$gte": 4.5 } } },
            doc! { "$group": {
                "_id": { "$toUpper": "$difficulty" },
                "numTours": { "$sum": 1 },
                "numRatings": { "$sum": "$ratingsQuantity" },
                "avgRating": { "$avg": "$ratingsAverage" },
                "avgPrice": { "$avg": "$price" },
                "minPrice": { "$min": "$price" },
                "maxPrice": { "$max": "$price" },
            } },
            doc! { "$sort": { "avgPrice": 1 } },
        ],
    )?;
    let stats: Vec<Value> = stats.iter().map(crate::document::to_json).collect();
    Ok(ApiResponse::ok(json!({ "stats": stats })))
}

/// Tour starts per month of `year`, busiest month first.
pub fn monthly_plan(store: &Store, year: &str) -> Result<ApiResponse, AppError> {
    let year: i32 = year.trim().parse().map_err(|_| AppError::bad_request(format!("Invalid year: {year}.")))?;
    let bound = |m: u32, d: u32, end: bool| {
        NaiveDate::from_ymd_opt(year, m, d)
            .and_then(|date| if end { date.and_hms_milli_opt(23, 59, 59, 999) } else { date.and_hms_opt(0, 0, 0) })
            .map(|naive| DateTime::from_chrono(Utc.from_utc_datetime(&naive)))
            .ok_or_else(|| AppError::bad_request(format!("Invalid year: {year}.")))
    };
    let (start, end) = (bound(1, 1, false)?, bound(12, 31, true)?);
    let plan = Tour::aggregate(
        store,
        &[
            doc! { "$unwind": "$startDates" },
            doc! { "$match": { "startDates": { "$gte": start, "$lte": end } } },
            doc! { "$group": {
                "_id": { "$month": "$startDates" },
                "numTourStarts": { "$sum": 1 },
                "tours": { "$push": "$name" },
            } },
            doc! { "$addFields": { "month": "$_id" } },
            doc! { "$project": { "_id": 0 } },
            doc! { "$sort": { "numTourStarts": -1 } },
            doc! { "$limit": 12 },
        ],
    )?;
    let plan: Vec<Value> = plan.iter().map(crate::document::to_json).collect();
    Ok(ApiResponse::ok(json!({ "plan": plan })))
}

/// Tours starting within `distance` (in `unit`) of `latlng`.
pub fn tours_within(store: &Store, distance: &str, latlng: &str, unit: &str) -> Result<ApiResponse, AppError> {
    let (lat, lng) = parse_latlng(latlng)?;
    let distance: f64 = distance
        .trim()
        .parse()
        .ok()
        .filter(|d: &f64| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| AppError::bad_request(format!("Invalid distance: {distance}.")))?;
    let radius = distance / Unit::parse(unit).earth_radius();
    let tours = Tour::find_where(
        store,
        doc! { "startLocation": { "$geoWithin": { "$centerSphere": [[lng, lat], radius] } } },
    )
    .exec()?;
    Ok(ApiResponse::list("data", &tours))
}

/// Distance from `latlng` to every tour's start, nearest first.
pub fn distances(store: &Store, latlng: &str, unit: &str) -> Result<ApiResponse, AppError> {
    let (lat, lng) = parse_latlng(latlng)?;
    let distances = Tour::aggregate(
        store,
        &[
            doc! { "$geoNear": {
                "near": { "type": "Point", "coordinates": [lng, lat] },
                "distanceField": "distance",
                "distanceMultiplier": Unit::parse(unit).from_meters(),
            } },
            doc! { "$project": { "distance": 1, "name": 1 } },
        ],
    )?;
    let distances: Vec<Value> = distances.iter().map(crate::document::to_json).collect();
    Ok(ApiResponse::ok(json!({ "data": distances })))
}
