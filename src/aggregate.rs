//! Aggregation pipeline over an in-memory document set.
//!
//! Supported stages: `$match`, `$unwind`, `$group`, `$addFields`, `$project`, `$sort`, `$skip`,
//! `$limit` and `$geoNear` (first stage only). Expressions are field references (`"$price"`),
//! `$toUpper`, `$month`, `$year` and literals. `$match` operands are compared as given; there is
//! no casting against field kinds.

use crate::document::{as_f64, get_path, set_path, unset_path, ID_FIELD};
use crate::errors::DbError;
use crate::query::{compare_bson, compare_docs, eval_filter, parse_filter, point_of, sphere_distance, Order, SortSpec, EARTH_RADIUS_M};
use bson::{Bson, Document as BsonDocument};
use chrono::Datelike;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Runs `pipeline` over `docs`.
pub fn run_pipeline(mut docs: Vec<BsonDocument>, pipeline: &[BsonDocument]) -> Result<Vec<BsonDocument>, DbError> {
    for (pos, stage) in pipeline.iter().enumerate() {
        let mut entries = stage.iter();
        let (Some((name, spec)), None) = (entries.next(), entries.next()) else {
            return Err(DbError::QueryError("a pipeline stage must have exactly one field".into()));
        };
        docs = match name.as_str() {
            "$match" => {
                let filter = parse_filter(as_doc(name, spec)?, &|_| None)?;
                docs.into_iter().filter(|d| eval_filter(d, &filter)).collect()
            }
            "$unwind" => unwind(docs, spec)?,
            "$group" => group(&docs, as_doc(name, spec)?)?,
            "$addFields" | "$set" => {
                let fields = as_doc(name, spec)?;
                for d in &mut docs {
                    for (k, expr) in fields {
                        let v = eval_expr(d, expr).unwrap_or(Bson::Null);
                        set_path(d, k, v);
                    }
                }
                docs
            }
            "$project" => project(docs, as_doc(name, spec)?),
            "$sort" => {
                let keys = sort_keys(as_doc(name, spec)?)?;
                docs.sort_by(|a, b| compare_docs(a, b, &keys));
                docs
            }
            "$skip" => {
                let n = count(name, spec)?;
                docs.into_iter().skip(n).collect()
            }
            "$limit" => {
                let n = count(name, spec)?;
                docs.truncate(n);
                docs
            }
            "$geoNear" if pos == 0 => geo_near(docs, as_doc(name, spec)?)?,
            "$geoNear" => return Err(DbError::QueryError("$geoNear is only valid as the first stage in a pipeline".into())),
            other => return Err(DbError::QueryError(format!("unsupported pipeline stage {other}"))),
        };
    }
    Ok(docs)
}

fn as_doc<'a>(stage: &str, spec: &'a Bson) -> Result<&'a BsonDocument, DbError> {
    match spec {
        Bson::Document(d) => Ok(d),
        _ => Err(DbError::QueryError(format!("{stage} needs a document"))),
    }
}

fn count(stage: &str, spec: &Bson) -> Result<usize, DbError> {
    as_f64(spec)
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map(|n| n as usize)
        .ok_or_else(|| DbError::QueryError(format!("{stage} needs a non-negative number")))
}

/// Evaluates an expression against one document. `None` when a referenced field is missing.
#[must_use]
pub fn eval_expr(doc: &BsonDocument, expr: &Bson) -> Option<Bson> {
    match expr {
        Bson::String(s) if s.starts_with('$') => get_path(doc, &s[1..]).cloned(),
        Bson::Document(d) if d.len() == 1 => {
            let (op, arg) = d.iter().next()?;
            match op.as_str() {
                "$toUpper" => Some(match eval_expr(doc, arg)? {
                    Bson::String(s) => Bson::String(s.to_uppercase()),
                    Bson::Null => Bson::String(String::new()),
                    other => Bson::String(other.to_string().to_uppercase()),
                }),
                "$month" => date_part(doc, arg, |d| d.month()),
                "$year" => date_part(doc, arg, |d| d.year().unsigned_abs()),
                _ => Some(expr.clone()),
            }
        }
        other => Some(other.clone()),
    }
}

fn date_part(doc: &BsonDocument, arg: &Bson, part: impl Fn(chrono::DateTime<chrono::Utc>) -> u32) -> Option<Bson> {
    match eval_expr(doc, arg)? {
        Bson::DateTime(dt) => i32::try_from(part(dt.to_chrono())).ok().map(Bson::Int32),
        _ => None,
    }
}

fn unwind(docs: Vec<BsonDocument>, spec: &Bson) -> Result<Vec<BsonDocument>, DbError> {
    let path = match spec {
        Bson::String(s) => s.as_str(),
        Bson::Document(d) => d.get_str("path").map_err(|_| DbError::QueryError("$unwind needs a path".into()))?,
        _ => return Err(DbError::QueryError("$unwind needs a field path".into())),
    };
    let Some(path) = path.strip_prefix('$') else {
        return Err(DbError::QueryError("$unwind path must start with '$'".into()));
    };
    let mut out = Vec::with_capacity(docs.len());
    for d in docs {
        match get_path(&d, path).cloned() {
            Some(Bson::Array(items)) => {
                for item in items {
                    let mut copy = d.clone();
                    set_path(&mut copy, path, item);
                    out.push(copy);
                }
            }
            Some(Bson::Null) | None => {}
            Some(_) => out.push(d),
        }
    }
    Ok(out)
}

#[derive(Debug)]
enum Acc {
    Sum { ints: i64, floats: f64, all_int: bool },
    Avg { total: f64, n: u32 },
    Min(Option<Bson>),
    Max(Option<Bson>),
    Push(Vec<Bson>),
    First(Option<Bson>),
}

impl Acc {
    fn new(op: &str) -> Result<Self, DbError> {
        Ok(match op {
            "$sum" => Self::Sum { ints: 0, floats: 0.0, all_int: true },
            "$avg" => Self::Avg { total: 0.0, n: 0 },
            "$min" => Self::Min(None),
            "$max" => Self::Max(None),
            "$push" => Self::Push(Vec::new()),
            "$first" => Self::First(None),
            other => return Err(DbError::QueryError(format!("unsupported accumulator {other}"))),
        })
    }

    fn add(&mut self, v: Option<Bson>) {
        match self {
            Self::Sum { ints, floats, all_int } => match v {
                Some(Bson::Int32(i)) => *ints += i64::from(i),
                Some(Bson::Int64(i)) => *ints += i,
                Some(other) => {
                    if let Some(f) = as_f64(&other) {
                        *floats += f;
                        *all_int = false;
                    }
                }
                None => {}
            },
            Self::Avg { total, n } => {
                if let Some(f) = v.as_ref().and_then(as_f64) {
                    *total += f;
                    *n += 1;
                }
            }
            Self::Min(cur) => keep_if(cur, v, Ordering::Less),
            Self::Max(cur) => keep_if(cur, v, Ordering::Greater),
            Self::Push(items) => items.push(v.unwrap_or(Bson::Null)),
            Self::First(cur) => {
                if cur.is_none() {
                    *cur = Some(v.unwrap_or(Bson::Null));
                }
            }
        }
    }

    fn finish(self) -> Bson {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Sum { ints, floats, all_int } => {
                if all_int {
                    i32::try_from(ints).map_or(Bson::Int64(ints), Bson::Int32)
                } else {
                    Bson::Double(ints as f64 + floats)
                }
            }
            Self::Avg { total, n } if n > 0 => Bson::Double(total / f64::from(n)),
            Self::Avg { .. } => Bson::Null,
            Self::Min(v) | Self::Max(v) | Self::First(v) => v.unwrap_or(Bson::Null),
            Self::Push(items) => Bson::Array(items),
        }
    }
}

/// Replaces `cur` with `v` when `v` orders `want` against it; nulls never win.
fn keep_if(cur: &mut Option<Bson>, v: Option<Bson>, want: Ordering) {
    if let Some(v) = v.filter(|v| !matches!(v, Bson::Null))
        && cur.as_ref().is_none_or(|c| compare_bson(&v, c) == want)
    {
        *cur = Some(v);
    }
}

fn group(docs: &[BsonDocument], spec: &BsonDocument) -> Result<Vec<BsonDocument>, DbError> {
    let key_expr = spec.get(ID_FIELD).ok_or_else(|| DbError::QueryError("$group needs an _id".into()))?;
    let mut fields = Vec::with_capacity(spec.len());
    for (name, acc) in spec.iter().filter(|(k, _)| k.as_str() != ID_FIELD) {
        let Bson::Document(acc) = acc else {
            return Err(DbError::QueryError(format!("accumulator for {name} must be a document")));
        };
        let Some((op, expr)) = acc.iter().next() else {
            return Err(DbError::QueryError(format!("accumulator for {name} is empty")));
        };
        Acc::new(op)?;
        fields.push((name.clone(), op.clone(), expr.clone()));
    }

    // Groups keep first-seen order.
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(Bson, Vec<Acc>)> = Vec::new();
    for d in docs {
        let key = eval_expr(d, key_expr).unwrap_or(Bson::Null);
        let slot = *slots.entry(key.to_string()).or_insert_with(|| {
            let accs = fields.iter().filter_map(|(_, op, _)| Acc::new(op).ok()).collect();
            groups.push((key.clone(), accs));
            groups.len() - 1
        });
        for ((_, _, expr), acc) in fields.iter().zip(groups[slot].1.iter_mut()) {
            acc.add(eval_expr(d, expr));
        }
    }
    Ok(groups
        .into_iter()
        .map(|(key, accs)| {
            let mut out = BsonDocument::new();
            out.insert(ID_FIELD, key);
            for ((name, _, _), acc) in fields.iter().zip(accs) {
                out.insert(name.clone(), acc.finish());
            }
            out
        })
        .collect())
}

fn is_off(v: &Bson) -> bool {
    matches!(v, Bson::Boolean(false)) || as_f64(v) == Some(0.0)
}

fn is_on(v: &Bson) -> bool {
    matches!(v, Bson::Boolean(true)) || as_f64(v).is_some_and(|n| n != 0.0)
}

fn project(docs: Vec<BsonDocument>, spec: &BsonDocument) -> Vec<BsonDocument> {
    let exclusion = spec.iter().all(|(_, v)| is_off(v));
    if exclusion {
        return docs
            .into_iter()
            .map(|mut d| {
                for k in spec.keys() {
                    unset_path(&mut d, k);
                }
                d
            })
            .collect();
    }
    let keep_id = !spec.get(ID_FIELD).is_some_and(is_off);
    docs.into_iter()
        .map(|d| {
            let mut out = BsonDocument::new();
            if keep_id && let Some(id) = d.get(ID_FIELD) {
                out.insert(ID_FIELD, id.clone());
            }
            for (k, v) in spec.iter().filter(|(k, _)| k.as_str() != ID_FIELD) {
                if is_on(v) {
                    if let Some(val) = get_path(&d, k) {
                        set_path(&mut out, k, val.clone());
                    }
                } else if !is_off(v)
                    && let Some(val) = eval_expr(&d, v)
                {
                    set_path(&mut out, k, val);
                }
            }
            out
        })
        .collect()
}

fn sort_keys(spec: &BsonDocument) -> Result<Vec<SortSpec>, DbError> {
    spec.iter()
        .map(|(k, v)| match as_f64(v) {
            Some(n) if n > 0.0 => Ok(SortSpec { field: k.clone(), order: Order::Asc }),
            Some(n) if n < 0.0 => Ok(SortSpec { field: k.clone(), order: Order::Desc }),
            _ => Err(DbError::QueryError(format!("$sort key ordering must be 1 or -1, got {v} for {k}"))),
        })
        .collect()
}

/// `{ near: { coordinates: [lng, lat] }, distanceField, distanceMultiplier?, key?, query? }`.
/// Distances are meters times the multiplier, nearest first; documents without a point are dropped.
fn geo_near(docs: Vec<BsonDocument>, spec: &BsonDocument) -> Result<Vec<BsonDocument>, DbError> {
    let near = spec
        .get("near")
        .and_then(point_of)
        .ok_or_else(|| DbError::QueryError("$geoNear needs a near point".into()))?;
    let field = spec
        .get_str("distanceField")
        .map_err(|_| DbError::QueryError("$geoNear needs a distanceField".into()))?;
    let key = spec.get_str("key").unwrap_or("startLocation");
    let multiplier = spec.get("distanceMultiplier").and_then(as_f64).unwrap_or(1.0);
    let filter = match spec.get_document("query") {
        Ok(q) => Some(parse_filter(q, &|_| None)?),
        Err(_) => None,
    };

    let mut scored: Vec<(f64, BsonDocument)> = docs
        .into_iter()
        .filter(|d| filter.as_ref().is_none_or(|f| eval_filter(d, f)))
        .filter_map(|d| {
            let p = get_path(&d, key).and_then(point_of)?;
            Some((sphere_distance(p, near) * EARTH_RADIUS_M * multiplier, d))
        })
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0));
    Ok(scored
        .into_iter()
        .map(|(dist, mut d)| {
            set_path(&mut d, field, Bson::Double(dist));
            d
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn tours() -> Vec<BsonDocument> {
        vec![
            doc! { "name": "a", "difficulty": "easy", "price": 397.0, "ratingsAverage": 4.7, "ratingsQuantity": 7 },
            doc! { "name": "b", "difficulty": "medium", "price": 1497.0, "ratingsAverage": 4.8, "ratingsQuantity": 6 },
            doc! { "name": "c", "difficulty": "easy", "price": 997.0, "ratingsAverage": 4.3, "ratingsQuantity": 3 },
        ]
    }

    #[test]
    fn group_by_upper_case_key() {
        let out = run_pipeline(
            tours(),
            &[
                doc! { "$match": { "ratingsAverage": { "$gte": 4.5 } } },
                doc! { "$group": {
                    "_id": { "$toUpper": "$difficulty" },
                    "numTours": { "$sum": 1 },
                    "numRatings": { "$sum": "$ratingsQuantity" },
                    "avgPrice": { "$avg": "$price" },
                    "minPrice": { "$min": "$price" },
                } },
                doc! { "$sort": { "avgPrice": 1 } },
            ],
        )
        .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].get_str("_id").unwrap(), "EASY");
        assert_eq!(out[0].get_i32("numTours").unwrap(), 1);
        assert_eq!(out[1].get_i32("numRatings").unwrap(), 6);
        assert_eq!(out[1].get_f64("minPrice").unwrap(), 1497.0);
    }

    #[test]
    fn unwind_group_by_month_and_project_out_id() {
        let d = |s: &str| Bson::DateTime(bson::DateTime::from_chrono(crate::types::parse_date(s).unwrap()));
        let docs = vec![
            doc! { "name": "a", "startDates": [d("2021-04-25"), d("2021-07-20")] },
            doc! { "name": "b", "startDates": [d("2021-07-01")] },
        ];
        let out = run_pipeline(
            docs,
            &[
                doc! { "$unwind": "$startDates" },
                doc! { "$group": { "_id": { "$month": "$startDates" }, "numTourStarts": { "$sum": 1 }, "tours": { "$push": "$name" } } },
                doc! { "$addFields": { "month": "$_id" } },
                doc! { "$project": { "_id": 0 } },
                doc! { "$sort": { "numTourStarts": -1 } },
                doc! { "$limit": 12 },
            ],
        )
        .unwrap();
        assert_eq!(out[0], doc! { "numTourStarts": 2, "tours": ["a", "b"], "month": 7 });
        assert_eq!(out[1], doc! { "numTourStarts": 1, "tours": ["a"], "month": 4 });
    }

    #[test]
    fn geo_near_orders_by_distance_and_must_lead() {
        let docs = vec![
            doc! { "name": "far", "startLocation": { "type": "Point", "coordinates": [10.0, 0.0] } },
            doc! { "name": "near", "startLocation": { "type": "Point", "coordinates": [1.0, 0.0] } },
            doc! { "name": "none" },
        ];
        let out = run_pipeline(
            docs.clone(),
            &[
                doc! { "$geoNear": { "near": { "type": "Point", "coordinates": [0.0, 0.0] }, "distanceField": "distance", "distanceMultiplier": 0.001 } },
                doc! { "$project": { "distance": 1, "name": 1 } },
            ],
        )
        .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].get_str("name").unwrap(), "near");
        let km = out[0].get_f64("distance").unwrap();
        assert!((km - 111.3).abs() < 0.5, "{km}");
        assert!(run_pipeline(docs, &[doc! { "$limit": 1 }, doc! { "$geoNear": { "near": [0.0, 0.0], "distanceField": "d" } }]).is_err());
    }
}
