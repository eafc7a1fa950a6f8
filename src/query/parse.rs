use crate::document::ID_FIELD;
use crate::errors::DbError;
use crate::types::{parse_date, FieldKind};
use bson::oid::ObjectId;
use bson::{Bson, Document as BsonDocument};

use super::types::{CmpOp, Filter, Projection, SortSpec, UpdateDoc, MAX_IN_SET, MAX_PROJECTION_FIELDS, MAX_SORT_FIELDS};

/// Declared kind of a field path, as a model reports it.
pub type FieldKinds<'a> = &'a dyn Fn(&str) -> Option<FieldKind>;

fn shown(v: &Bson) -> String {
    match v {
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Casts one value to a field's declared kind. Arrays on array fields cast element-wise.
pub fn cast_value(path: &str, value: &Bson, kind: FieldKind) -> Result<Bson, DbError> {
    if let FieldKind::Array(_) = kind {
        return match value {
            Bson::Array(items) => items.iter().map(|v| cast_value(path, v, kind.element())).collect::<Result<Vec<_>, _>>().map(Bson::Array),
            other => cast_value(path, other, kind.element()),
        };
    }
    if matches!(value, Bson::Null) {
        return Ok(Bson::Null);
    }
    let fail = || DbError::cast(path, shown(value), kind.to_string());
    let out = match (kind, value) {
        (FieldKind::Mixed, v) => v.clone(),
        (FieldKind::String, Bson::String(_)) => value.clone(),
        (FieldKind::String, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Boolean(_)) => {
            Bson::String(shown(value))
        }
        (FieldKind::String, Bson::ObjectId(oid)) => Bson::String(oid.to_hex()),
        (FieldKind::Number, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) => value.clone(),
        (FieldKind::Number, Bson::Boolean(b)) => Bson::Double(if *b { 1.0 } else { 0.0 }),
        (FieldKind::Number, Bson::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                Bson::Null
            } else {
                match s.parse::<f64>() {
                    Ok(n) if n.is_finite() => Bson::Double(n),
                    _ => return Err(fail()),
                }
            }
        }
        (FieldKind::Boolean, Bson::Boolean(_)) => value.clone(),
        (FieldKind::Boolean, Bson::String(s)) => match s.trim() {
            "true" | "1" | "yes" => Bson::Boolean(true),
            "false" | "0" | "no" => Bson::Boolean(false),
            _ => return Err(fail()),
        },
        (FieldKind::Boolean, Bson::Int32(i)) if *i == 0 || *i == 1 => Bson::Boolean(*i == 1),
        (FieldKind::Date, Bson::DateTime(_)) => value.clone(),
        (FieldKind::Date, Bson::String(s)) => {
            Bson::DateTime(bson::DateTime::from_chrono(parse_date(s).ok_or_else(fail)?))
        }
        (FieldKind::Date, Bson::Int64(ms)) => Bson::DateTime(bson::DateTime::from_millis(*ms)),
        (FieldKind::ObjectId, Bson::ObjectId(_)) => value.clone(),
        (FieldKind::ObjectId, Bson::String(s)) => {
            Bson::ObjectId(ObjectId::parse_str(s.trim()).map_err(|_| fail())?)
        }
        // Populated references cast back to their id.
        (FieldKind::ObjectId, Bson::Document(d)) => match d.get(ID_FIELD) {
            Some(Bson::ObjectId(oid)) => Bson::ObjectId(*oid),
            _ => return Err(fail()),
        },
        _ => return Err(fail()),
    };
    Ok(out)
}

fn cast_with(kinds: FieldKinds<'_>, path: &str, value: &Bson) -> Result<Bson, DbError> {
    match kinds(path) {
        Some(kind) => cast_value(path, value, kind),
        None => Ok(value.clone()),
    }
}

/// Casts a value being compared against one element of the field.
fn cast_operand(kinds: FieldKinds<'_>, path: &str, value: &Bson) -> Result<Bson, DbError> {
    match kinds(path) {
        Some(kind) if kind.is_array() && !matches!(value, Bson::Array(_)) => cast_value(path, value, kind.element()),
        Some(kind) => cast_value(path, value, kind),
        None => Ok(value.clone()),
    }
}

fn cast_list(kinds: FieldKinds<'_>, path: &str, value: &Bson) -> Result<Vec<Bson>, DbError> {
    let items = match value {
        Bson::Array(items) => items.clone(),
        other => vec![other.clone()],
    };
    items.iter().take(MAX_IN_SET).map(|v| cast_operand(kinds, path, v)).collect()
}

fn is_operator_doc(d: &BsonDocument) -> bool {
    !d.is_empty() && d.keys().all(|k| k.starts_with('$'))
}

/// Compiles a condition document (`{ price: { $gte: "100" }, difficulty: "easy" }`) into a
/// filter, casting every operand against the declared field kinds.
pub fn parse_filter(cond: &BsonDocument, kinds: FieldKinds<'_>) -> Result<Filter, DbError> {
    let mut parts = Vec::with_capacity(cond.len());
    for (key, value) in cond {
        match key.as_str() {
            "$and" | "$or" | "$nor" => {
                let Bson::Array(items) = value else {
                    return Err(DbError::QueryError(format!("{key} needs an array")));
                };
                let subs = items
                    .iter()
                    .map(|b| match b {
                        Bson::Document(d) => parse_filter(d, kinds),
                        _ => Err(DbError::QueryError(format!("{key} entries must be documents"))),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                parts.push(match key.as_str() {
                    "$and" => Filter::and(subs),
                    "$or" => Filter::Or(subs),
                    _ => Filter::Not(Box::new(Filter::Or(subs))),
                });
            }
            k if k.starts_with('$') => return Err(DbError::QueryError(format!("unknown top-level operator {k}"))),
            path => parts.push(parse_field(path, value, kinds)?),
        }
    }
    Ok(Filter::and(parts))
}

fn parse_field(path: &str, value: &Bson, kinds: FieldKinds<'_>) -> Result<Filter, DbError> {
    match value {
        Bson::Document(ops) if is_operator_doc(ops) => parse_ops(path, ops, kinds),
        Bson::Array(_) if !kinds(path).is_some_and(FieldKind::is_array) => {
            Ok(Filter::In { path: path.to_string(), values: cast_list(kinds, path, value)? })
        }
        v => Ok(Filter::Cmp { path: path.to_string(), op: CmpOp::Eq, value: cast_operand(kinds, path, v)? }),
    }
}

fn parse_ops(path: &str, ops: &BsonDocument, kinds: FieldKinds<'_>) -> Result<Filter, DbError> {
    let mut parts = Vec::with_capacity(ops.len());
    for (op, v) in ops {
        let f = match op.as_str() {
            "$in" => Filter::In { path: path.to_string(), values: cast_list(kinds, path, v)? },
            "$nin" => Filter::Nin { path: path.to_string(), values: cast_list(kinds, path, v)? },
            "$exists" => Filter::Exists { path: path.to_string(), exists: truthy(v) },
            "$not" => match v {
                Bson::Document(inner) if is_operator_doc(inner) => Filter::Not(Box::new(parse_ops(path, inner, kinds)?)),
                _ => return Err(DbError::QueryError("$not needs an operator document".into())),
            },
            "$geoWithin" => parse_geo_within(path, v)?,
            token => match CmpOp::from_token(token) {
                Some(cmp) => Filter::Cmp { path: path.to_string(), op: cmp, value: cast_operand(kinds, path, v)? },
                None => return Err(DbError::QueryError(format!("unknown operator {token}"))),
            },
        };
        parts.push(f);
    }
    Ok(Filter::and(parts))
}

fn truthy(v: &Bson) -> bool {
    match v {
        Bson::Boolean(b) => *b,
        Bson::String(s) => !matches!(s.as_str(), "false" | "0" | ""),
        Bson::Null => false,
        other => crate::document::as_f64(other).is_none_or(|n| n != 0.0),
    }
}

fn number(v: &Bson) -> Result<f64, DbError> {
    match v {
        Bson::String(s) => s.trim().parse::<f64>().ok(),
        other => crate::document::as_f64(other),
    }
    .filter(|n| n.is_finite())
    .ok_or_else(|| DbError::QueryError(format!("expected a number, got {v}")))
}

/// `{ $centerSphere: [[lng, lat], radiusRadians] }`
fn parse_geo_within(path: &str, v: &Bson) -> Result<Filter, DbError> {
    let bad = || DbError::QueryError("$geoWithin needs { $centerSphere: [[lng, lat], radius] }".into());
    let Bson::Document(d) = v else { return Err(bad()) };
    let Some(Bson::Array(parts)) = d.get("$centerSphere") else { return Err(bad()) };
    let [Bson::Array(center), radius] = parts.as_slice() else { return Err(bad()) };
    let [lng, lat] = center.as_slice() else { return Err(bad()) };
    Ok(Filter::GeoWithin { path: path.to_string(), center: [number(lng)?, number(lat)?], radius: number(radius)? })
}

/// Compiles an update document: operator form (`$set`, `$inc`, `$unset`) or a plain field map,
/// which is treated as `$set`.
pub fn parse_update(update: &BsonDocument, kinds: FieldKinds<'_>) -> Result<UpdateDoc, DbError> {
    let mut out = UpdateDoc::default();
    for (key, value) in update {
        match key.as_str() {
            "$set" => {
                let Bson::Document(d) = value else {
                    return Err(DbError::QueryError("$set needs a document".into()));
                };
                for (k, v) in d {
                    out.set.push((k.clone(), cast_with(kinds, k, v)?));
                }
            }
            "$inc" => {
                let Bson::Document(d) = value else {
                    return Err(DbError::QueryError("$inc needs a document".into()));
                };
                for (k, v) in d {
                    let by = crate::document::as_f64(v).ok_or_else(|| DbError::QueryError("$inc requires numeric".into()))?;
                    out.inc.push((k.clone(), by));
                }
            }
            "$unset" => match value {
                Bson::Document(d) => out.unset.extend(d.keys().cloned()),
                Bson::Array(items) => out.unset.extend(items.iter().filter_map(|b| b.as_str().map(str::to_string))),
                _ => return Err(DbError::QueryError("$unset needs a document".into())),
            },
            k if k.starts_with('$') => return Err(DbError::QueryError(format!("unknown update operator {k}"))),
            // `_id` is immutable.
            ID_FIELD => {}
            k => out.set.push((k.to_string(), cast_with(kinds, k, value)?)),
        }
    }
    Ok(out)
}

fn tokens(spec: &str) -> impl Iterator<Item = &str> {
    spec.split([',', ' ']).map(str::trim).filter(|s| !s.is_empty())
}

/// Parses `"-price,name"` (commas or spaces) into ordered sort keys.
#[must_use]
pub fn parse_sort(spec: &str) -> Vec<SortSpec> {
    tokens(spec)
        .take(MAX_SORT_FIELDS)
        .filter_map(|t| match t.strip_prefix('-') {
            Some("") => None,
            Some(f) => Some(SortSpec::desc(f)),
            None => Some(SortSpec::asc(t.trim_start_matches('+'))),
        })
        .collect()
}

/// Compiles selected paths (`"name,price"` or `"-__v -createdAt"`) into a projection.
/// Mixing inclusion and exclusion is an error, except for excluding `_id` from an inclusion.
pub fn parse_projection<S: AsRef<str>>(specs: &[S]) -> Result<Option<Projection>, DbError> {
    let mut include = Vec::new();
    let mut exclude = Vec::new();
    for t in specs.iter().flat_map(|s| tokens(s.as_ref())) {
        match t.strip_prefix('-') {
            Some("") => {}
            Some(f) => exclude.push(f.to_string()),
            None => include.push(t.to_string()),
        }
    }
    include.truncate(MAX_PROJECTION_FIELDS);
    exclude.truncate(MAX_PROJECTION_FIELDS);
    match (include.is_empty(), exclude.is_empty()) {
        (true, true) => Ok(None),
        (true, false) => Ok(Some(Projection::Exclude(exclude))),
        (false, true) => Ok(Some(Projection::Include { fields: include, with_id: true })),
        (false, false) if exclude.iter().all(|f| f == ID_FIELD) => {
            include.retain(|f| f != ID_FIELD);
            Ok(Some(Projection::Include { fields: include, with_id: false }))
        }
        (false, false) => Err(DbError::QueryError("Projection cannot have a mix of inclusion and exclusion.".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn kinds(path: &str) -> Option<FieldKind> {
        match path {
            "price" | "duration" => Some(FieldKind::Number),
            "startDates" => Some(FieldKind::Array(crate::types::ScalarKind::Date)),
            "secretTour" => Some(FieldKind::Boolean),
            "difficulty" => Some(FieldKind::String),
            _ => None,
        }
    }

    #[test]
    fn operand_strings_are_cast_to_numbers() {
        let f = parse_filter(&doc! { "price": { "$gte": "100", "$lt": "500" } }, &kinds).unwrap();
        assert_eq!(
            f,
            Filter::And(vec![
                Filter::Cmp { path: "price".into(), op: CmpOp::Gte, value: Bson::Double(100.0) },
                Filter::Cmp { path: "price".into(), op: CmpOp::Lt, value: Bson::Double(500.0) },
            ])
        );
    }

    #[test]
    fn bad_number_is_a_cast_error() {
        let err = parse_filter(&doc! { "duration": { "$gte": "abc" } }, &kinds).unwrap_err();
        assert_eq!(err.to_string(), "Cast to Number failed for value \"abc\" at path \"duration\"");
    }

    #[test]
    fn arrays_on_scalar_fields_become_in() {
        let f = parse_filter(&doc! { "difficulty": ["easy", "medium"] }, &kinds).unwrap();
        assert!(matches!(f, Filter::In { ref values, .. } if values.len() == 2));
    }

    #[test]
    fn element_match_on_array_field_casts_to_element_kind() {
        let f = parse_filter(&doc! { "startDates": { "$gte": "2021-01-01" } }, &kinds).unwrap();
        assert!(matches!(f, Filter::Cmp { value: Bson::DateTime(_), .. }));
    }

    #[test]
    fn unknown_operator_is_rejected() {
        assert!(parse_filter(&doc! { "price": { "$near": 3 } }, &kinds).is_err());
    }

    #[test]
    fn geo_within_reads_center_sphere() {
        let f = parse_filter(
            &doc! { "startLocation": { "$geoWithin": { "$centerSphere": [[-118.11, 34.11], 0.05] } } },
            &kinds,
        )
        .unwrap();
        assert_eq!(f, Filter::GeoWithin { path: "startLocation".into(), center: [-118.11, 34.11], radius: 0.05 });
    }

    #[test]
    fn plain_update_map_is_set_and_skips_id() {
        let u = parse_update(&doc! { "_id": "x", "price": "497", "name": "A" }, &kinds).unwrap();
        assert_eq!(u.set, vec![("price".to_string(), Bson::Double(497.0)), ("name".to_string(), Bson::String("A".into()))]);
    }

    #[test]
    fn sort_and_projection_specs() {
        assert_eq!(parse_sort("-price, name"), vec![SortSpec::desc("price"), SortSpec::asc("name")]);
        assert_eq!(parse_projection(&["name,price"]).unwrap(), Some(Projection::Include { fields: vec!["name".into(), "price".into()], with_id: true }));
        assert_eq!(parse_projection(&["-__v", "-createdAt"]).unwrap(), Some(Projection::Exclude(vec!["__v".into(), "createdAt".into()])));
        assert!(parse_projection(&["name,-price"]).is_err());
        assert_eq!(parse_projection(&["name -_id"]).unwrap(), Some(Projection::Include { fields: vec!["name".into()], with_id: false }));
        assert_eq!(parse_projection::<&str>(&[]).unwrap(), None);
    }
}
