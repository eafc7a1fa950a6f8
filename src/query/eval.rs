use crate::document::{as_f64, get_path, set_path, unset_path, ID_FIELD};
use bson::{Bson, Document as BsonDocument};
use std::cmp::Ordering;

use super::types::{CmpOp, Filter, Order, Projection, SortSpec, MAX_IN_SET, MAX_PATH_DEPTH, MAX_SORT_FIELDS};

fn resolve<'a>(doc: &'a BsonDocument, path: &str) -> Option<&'a Bson> {
    if path.is_empty() || path.split('.').count() > MAX_PATH_DEPTH {
        return None;
    }
    get_path(doc, path)
}

pub fn eval_filter(doc: &BsonDocument, filter: &Filter) -> bool {
    match filter {
        Filter::True => true,
        Filter::And(fs) => fs.iter().all(|f| eval_filter(doc, f)),
        Filter::Or(fs) => fs.iter().any(|f| eval_filter(doc, f)),
        Filter::Not(f) => !eval_filter(doc, f),
        Filter::Exists { path, exists } => resolve(doc, path).is_some() == *exists,
        Filter::In { path, values } => resolve(doc, path).is_some_and(|v| any_element(v, |x| is_in_set(x, values))),
        Filter::Nin { path, values } => !resolve(doc, path).is_some_and(|v| any_element(v, |x| is_in_set(x, values))),
        // A missing field is "not equal" to anything.
        Filter::Cmp { path, op: CmpOp::Ne, value } => !resolve(doc, path).is_some_and(|v| equals(v, value)),
        Filter::Cmp { path, op: CmpOp::Eq, value } => resolve(doc, path).is_some_and(|v| equals(v, value)),
        Filter::Cmp { path, op, value } => resolve(doc, path).is_some_and(|v| {
            any_element(v, |x| {
                cmp_same_type(x, value).is_some_and(|o| match op {
                    CmpOp::Gt => o == Ordering::Greater,
                    CmpOp::Gte => o != Ordering::Less,
                    CmpOp::Lt => o == Ordering::Less,
                    CmpOp::Lte => o != Ordering::Greater,
                    CmpOp::Eq | CmpOp::Ne => o == Ordering::Equal,
                })
            })
        }),
        Filter::GeoWithin { path, center, radius } => {
            resolve(doc, path).and_then(point_of).is_some_and(|p| sphere_distance(p, *center) <= *radius)
        }
    }
}

/// Array values match when the whole array or any element does.
fn any_element(v: &Bson, pred: impl Fn(&Bson) -> bool) -> bool {
    match v {
        Bson::Array(items) => pred(v) || items.iter().any(&pred),
        other => pred(other),
    }
}

fn equals(v: &Bson, want: &Bson) -> bool {
    any_element(v, |x| scalar_eq(x, want))
}

fn scalar_eq(a: &Bson, b: &Bson) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn is_in_set(v: &Bson, set: &[Bson]) -> bool {
    set.iter().take(MAX_IN_SET).any(|x| scalar_eq(v, x))
}

/// Ordering of two values of the same type class; `None` across classes.
fn cmp_same_type(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return Some(x.total_cmp(&y));
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Total order used for sorting: numbers by value, then by type rank.
#[must_use]
pub fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    cmp_same_type(a, b).unwrap_or_else(|| type_rank(a).cmp(&type_rank(b)))
}

fn type_rank(v: &Bson) -> u8 {
    use bson::Bson as T;
    match v {
        T::MinKey => 0,
        T::Null | T::Undefined => 1,
        T::Int32(_) | T::Int64(_) | T::Double(_) | T::Decimal128(_) => 2,
        T::String(_) | T::Symbol(_) => 3,
        T::Document(_) => 4,
        T::Array(_) => 5,
        T::Binary(_) => 6,
        T::ObjectId(_) => 7,
        T::Boolean(_) => 8,
        T::DateTime(_) => 9,
        T::Timestamp(_) => 10,
        T::RegularExpression(_) => 11,
        T::DbPointer(_) | T::JavaScriptCode(_) | T::JavaScriptCodeWithScope(_) => 12,
        T::MaxKey => 250,
    }
}

/// Multi-key comparison; missing values sort first in ascending order.
#[must_use]
pub fn compare_docs(a: &BsonDocument, b: &BsonDocument, sort: &[SortSpec]) -> Ordering {
    for s in sort.iter().take(MAX_SORT_FIELDS) {
        let ord = match (resolve(a, &s.field), resolve(b, &s.field)) {
            (Some(x), Some(y)) => compare_bson(x, y),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return if s.order == Order::Asc { ord } else { ord.reverse() };
        }
    }
    Ordering::Equal
}

#[must_use]
pub fn project(doc: &BsonDocument, projection: &Projection) -> BsonDocument {
    match projection {
        Projection::Include { fields, with_id } => {
            let mut out = BsonDocument::new();
            if *with_id && let Some(id) = doc.get(ID_FIELD) {
                out.insert(ID_FIELD, id.clone());
            }
            for f in fields {
                if let Some(v) = resolve(doc, f) {
                    set_path(&mut out, f, v.clone());
                }
            }
            out
        }
        Projection::Exclude(fields) => {
            let mut out = doc.clone();
            for f in fields {
                unset_path(&mut out, f);
            }
            out
        }
    }
}

/// `[lng, lat]` of a GeoJSON point (`{ coordinates: [lng, lat] }`) or a bare pair.
#[must_use]
pub fn point_of(v: &Bson) -> Option<[f64; 2]> {
    let coords = match v {
        Bson::Document(d) => d.get_array("coordinates").ok()?,
        Bson::Array(a) => a,
        _ => return None,
    };
    match coords.as_slice() {
        [lng, lat, ..] => Some([as_f64(lng)?, as_f64(lat)?]),
        _ => None,
    }
}

/// Great-circle distance between two `[lng, lat]` points, in radians.
#[must_use]
pub fn sphere_distance(a: [f64; 2], b: [f64; 2]) -> f64 {
    let (lng1, lat1) = (a[0].to_radians(), a[1].to_radians());
    let (lng2, lat2) = (b[0].to_radians(), b[1].to_radians());
    let h = ((lat2 - lat1) / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * ((lng2 - lng1) / 2.0).sin().powi(2);
    2.0 * h.sqrt().min(1.0).asin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn ne_matches_missing_field() {
        let f = Filter::Cmp { path: "secretTour".into(), op: CmpOp::Ne, value: Bson::Boolean(true) };
        assert!(eval_filter(&doc! { "name": "a" }, &f));
        assert!(eval_filter(&doc! { "secretTour": false }, &f));
        assert!(!eval_filter(&doc! { "secretTour": true }, &f));
    }

    #[test]
    fn numbers_compare_across_widths_and_arrays_match_any_element() {
        let f = Filter::Cmp { path: "price".into(), op: CmpOp::Gte, value: Bson::Double(100.0) };
        assert!(eval_filter(&doc! { "price": 100_i32 }, &f));
        assert!(!eval_filter(&doc! { "price": "200" }, &f));
        let f = Filter::Cmp { path: "tags".into(), op: CmpOp::Eq, value: Bson::String("b".into()) };
        assert!(eval_filter(&doc! { "tags": ["a", "b"] }, &f));
    }

    #[test]
    fn sort_puts_missing_first_ascending() {
        let a = doc! { "p": 1 };
        let b = doc! {};
        assert_eq!(compare_docs(&a, &b, &[SortSpec::asc("p")]), Ordering::Greater);
        assert_eq!(compare_docs(&a, &b, &[SortSpec::desc("p")]), Ordering::Less);
    }

    #[test]
    fn include_projection_keeps_id_and_dotted_paths() {
        let d = doc! { "_id": 1, "name": "x", "loc": { "address": "a", "day": 2 }, "price": 3 };
        let p = project(&d, &Projection::Include { fields: vec!["name".into(), "loc.address".into()], with_id: true });
        assert_eq!(p, doc! { "_id": 1, "name": "x", "loc": { "address": "a" } });
        let p = project(&d, &Projection::Exclude(vec!["price".into(), "loc.day".into()]));
        assert_eq!(p, doc! { "_id": 1, "name": "x", "loc": { "address": "a" } });
    }

    #[test]
    fn sphere_distance_of_a_degree_of_latitude() {
        let d = sphere_distance([0.0, 0.0], [0.0, 1.0]);
        assert!((d - 1f64.to_radians()).abs() < 1e-12);
    }
}
