use crate::types::DocumentId;
use bson::{Bson, Document as BsonDocument};
use serde_json::{Map, Value};

/// Name of the identity field every stored document carries.
pub const ID_FIELD: &str = "_id";
/// Internal version field, hidden from default projections.
pub const VERSION_FIELD: &str = "__v";

/// A stored document: its identity plus the BSON body (which repeats `_id`).
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub data: BsonDocument,
}

impl Document {
    /// Wraps a body, assigning a fresh id unless the body already carries one.
    #[must_use]
    pub fn new(mut data: BsonDocument) -> Self {
        let id = data.get(ID_FIELD).and_then(DocumentId::from_bson).unwrap_or_default();
        data.insert(ID_FIELD, id);
        Self { id, data }
    }

    /// Rebuilds a document read back from storage; `None` if the body has no usable `_id`.
    #[must_use]
    pub fn from_stored(data: BsonDocument) -> Option<Self> {
        let id = data.get(ID_FIELD).and_then(DocumentId::from_bson)?;
        Some(Self { id, data })
    }
}

/// Resolves a dotted path inside a document.
#[must_use]
pub fn get_path<'a>(doc: &'a BsonDocument, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut cur = doc.get(first)?;
    for p in parts {
        match cur {
            Bson::Document(d) => cur = d.get(p)?,
            _ => return None,
        }
    }
    Some(cur)
}

/// Sets a dotted path, creating intermediate sub-documents. Returns true if the value changed.
pub fn set_path(doc: &mut BsonDocument, path: &str, value: Bson) -> bool {
    let mut cur = doc;
    let mut iter = path.split('.').peekable();
    while let Some(seg) = iter.next() {
        if iter.peek().is_none() {
            let old = cur.insert(seg.to_string(), value.clone());
            return old.as_ref() != Some(&value);
        }
        if !matches!(cur.get(seg), Some(Bson::Document(_))) {
            cur.insert(seg.to_string(), Bson::Document(BsonDocument::new()));
        }
        match cur.get_mut(seg) {
            Some(Bson::Document(d)) => cur = d,
            _ => return false,
        }
    }
    false
}

/// Removes a dotted path. Returns true if something was removed.
pub fn unset_path(doc: &mut BsonDocument, path: &str) -> bool {
    match path.rsplit_once('.') {
        None => doc.remove(path).is_some(),
        Some((parent, last)) => {
            let mut cur = doc;
            for seg in parent.split('.') {
                match cur.get_mut(seg) {
                    Some(Bson::Document(d)) => cur = d,
                    _ => return false,
                }
            }
            cur.remove(last).is_some()
        }
    }
}

/// Numeric view of a BSON value, if it is a number.
#[must_use]
pub fn as_f64(v: &Bson) -> Option<f64> {
    match v {
        Bson::Double(f) => Some(*f),
        Bson::Int32(i) => Some(f64::from(*i)),
        #[allow(clippy::cast_precision_loss)]
        Bson::Int64(i) => Some(*i as f64),
        Bson::Decimal128(d) => d.to_string().parse::<f64>().ok(),
        _ => None,
    }
}

/// Converts a stored body into the JSON shape handed to API callers: object ids become
/// hex strings, datetimes RFC 3339 strings, and every document with an `_id` also gets
/// an `id` alias.
#[must_use]
pub fn to_json(doc: &BsonDocument) -> Value {
    let mut out = Map::new();
    for (k, v) in doc {
        out.insert(k.clone(), bson_to_json(v));
    }
    if let Some(Bson::ObjectId(oid)) = doc.get(ID_FIELD)
        && !out.contains_key("id")
    {
        out.insert("id".into(), Value::String(oid.to_hex()));
    }
    Value::Object(out)
}

#[must_use]
pub fn bson_to_json(v: &Bson) -> Value {
    match v {
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => Value::String(dt.to_chrono().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
        Bson::Document(d) => to_json(d),
        Bson::Array(items) => Value::Array(items.iter().map(bson_to_json).collect()),
        Bson::Double(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
        Bson::Int32(i) => Value::from(*i),
        Bson::Int64(i) => Value::from(*i),
        Bson::String(s) => Value::String(s.clone()),
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Null | Bson::Undefined => Value::Null,
        other => other.clone().into_relaxed_extjson(),
    }
}
