use crate::errors::DbError;
use bson::oid::ObjectId;
use bson::Bson;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub type CollectionName = String;

/// Identity of a stored document (`_id`). Stored as a BSON object id, exchanged as hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(pub ObjectId);

impl DocumentId {
    #[must_use]
    pub fn new() -> Self {
        Self(ObjectId::new())
    }

    /// Parses a 24-character hex id. Failure is reported the way a cast on `_id` is.
    pub fn parse(s: &str) -> Result<Self, DbError> {
        ObjectId::parse_str(s.trim())
            .map(Self)
            .map_err(|_| DbError::cast("_id", s, FieldKind::ObjectId.to_string()))
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    /// Reads a `Bson` value that should carry an id (object id or its hex string).
    #[must_use]
    pub fn from_bson(v: &Bson) -> Option<Self> {
        match v {
            Bson::ObjectId(oid) => Some(Self(*oid)),
            Bson::String(s) => ObjectId::parse_str(s).ok().map(Self),
            _ => None,
        }
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_hex())
    }
}

impl From<DocumentId> for Bson {
    fn from(id: DocumentId) -> Self {
        Self::ObjectId(id.0)
    }
}

impl Serialize for DocumentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DocumentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Bson::deserialize(deserializer)?;
        Self::from_bson(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid object id: {raw}")))
    }
}

/// Declared type of a model field; drives casting of query-string values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Date,
    ObjectId,
    /// Array of the inner scalar kind.
    Array(ScalarKind),
    /// Embedded document; values are compared as given.
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    Number,
    Date,
    ObjectId,
}

impl FieldKind {
    /// Kind of one element: arrays cast element-wise, scalars cast as themselves.
    #[must_use]
    pub fn element(self) -> Self {
        match self {
            Self::Array(ScalarKind::String) => Self::String,
            Self::Array(ScalarKind::Number) => Self::Number,
            Self::Array(ScalarKind::Date) => Self::Date,
            Self::Array(ScalarKind::ObjectId) => Self::ObjectId,
            other => other,
        }
    }

    #[must_use]
    pub fn is_array(self) -> bool {
        matches!(self, Self::Array(_))
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self.element() {
            Self::String => "string",
            Self::Number => "Number",
            Self::Boolean => "Boolean",
            Self::Date => "date",
            Self::ObjectId => "ObjectId",
            Self::Mixed | Self::Array(_) => "Mixed",
        };
        f.write_str(s)
    }
}

/// Parses the date spellings accepted on input: RFC 3339, `YYYY-MM-DDTHH:MM[:SS]`,
/// `YYYY-MM-DD,HH:MM` and bare `YYYY-MM-DD` (midnight UTC).
#[must_use]
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d,%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| n.and_utc())
}

/// Serde glue for `DateTime<Utc>` fields: written as BSON datetimes, read from either a
/// BSON datetime or one of the strings [`parse_date`] understands.
pub mod bson_date {
    use super::{parse_date, Bson, DateTime, Deserialize, Deserializer, Serialize, Serializer, Utc};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        bson::DateTime::from_chrono(*dt).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = Bson::deserialize(deserializer)?;
        from_bson(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid date: {raw}")))
    }

    pub(crate) fn from_bson(raw: &Bson) -> Option<DateTime<Utc>> {
        match raw {
            Bson::DateTime(dt) => Some(dt.to_chrono()),
            Bson::String(s) => parse_date(s),
            Bson::Int64(ms) => DateTime::from_timestamp_millis(*ms),
            _ => None,
        }
    }

    pub mod vec {
        use super::{from_bson, Bson, DateTime, Deserialize, Deserializer, Serializer, Utc};
        use serde::ser::SerializeSeq;

        pub fn serialize<S: Serializer>(v: &[DateTime<Utc>], serializer: S) -> Result<S::Ok, S::Error> {
            let mut seq = serializer.serialize_seq(Some(v.len()))?;
            for dt in v {
                seq.serialize_element(&bson::DateTime::from_chrono(*dt))?;
            }
            seq.end()
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<DateTime<Utc>>, D::Error> {
            let raw = Vec::<Bson>::deserialize(deserializer)?;
            raw.iter()
                .map(|b| from_bson(b).ok_or_else(|| serde::de::Error::custom(format!("invalid date: {b}"))))
                .collect()
        }
    }
}
