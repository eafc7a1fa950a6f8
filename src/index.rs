use crate::document::get_path;
use crate::errors::DbError;
use crate::types::DocumentId;
use bson::{Bson, Document as BsonDocument};
use ordered_float::OrderedFloat;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// At most one document per key; enforced on every write.
    Unique,
    /// Equality lookups only.
    Hash,
}

/// Declares an index over one or more fields (compound when more than one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    pub fields: &'static [&'static str],
    pub kind: IndexKind,
}

impl IndexSpec {
    #[must_use]
    pub const fn unique(fields: &'static [&'static str]) -> Self {
        Self { fields, kind: IndexKind::Unique }
    }

    #[must_use]
    pub const fn hash(fields: &'static [&'static str]) -> Self {
        Self { fields, kind: IndexKind::Hash }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexKey {
    Null,
    Str(String),
    Num(OrderedFloat<f64>),
    Bool(bool),
    Oid([u8; 12]),
    Date(i64),
}

/// Key of a single value. Numbers of every width share one key space so `5` and `5.0` collide.
#[must_use]
pub fn key_from_bson(v: &Bson) -> Option<IndexKey> {
    match v {
        Bson::Null | Bson::Undefined => Some(IndexKey::Null),
        Bson::String(s) => Some(IndexKey::Str(s.clone())),
        Bson::Int32(i) => Some(IndexKey::Num(OrderedFloat(f64::from(*i)))),
        #[allow(clippy::cast_precision_loss)]
        Bson::Int64(i) => Some(IndexKey::Num(OrderedFloat(*i as f64))),
        Bson::Double(f) => Some(IndexKey::Num(OrderedFloat(*f))),
        Bson::Boolean(b) => Some(IndexKey::Bool(*b)),
        Bson::ObjectId(oid) => Some(IndexKey::Oid(oid.bytes())),
        Bson::DateTime(dt) => Some(IndexKey::Date(dt.timestamp_millis())),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct Index {
    pub spec: IndexSpec,
    map: HashMap<Vec<IndexKey>, BTreeSet<DocumentId>>,
}

impl Index {
    #[must_use]
    pub fn new(spec: IndexSpec) -> Self {
        Self { spec, map: HashMap::new() }
    }

    /// Compound key of a document; missing fields key as null. `None` if any value is unindexable.
    fn key_of(&self, doc: &BsonDocument) -> Option<Vec<IndexKey>> {
        self.spec
            .fields
            .iter()
            .map(|f| get_path(doc, f).map_or(Some(IndexKey::Null), key_from_bson))
            .collect()
    }

    /// The clashing key when another document already holds this document's key in a unique index.
    fn conflict(&self, doc: &BsonDocument, id: &DocumentId) -> Option<Vec<IndexKey>> {
        if self.spec.kind != IndexKind::Unique {
            return None;
        }
        let key = self.key_of(doc)?;
        let holders = self.map.get(&key)?;
        holders.iter().any(|h| h != id).then_some(key)
    }

    fn insert(&mut self, doc: &BsonDocument, id: &DocumentId) {
        if let Some(k) = self.key_of(doc) {
            self.map.entry(k).or_default().insert(*id);
        }
    }

    fn remove(&mut self, doc: &BsonDocument, id: &DocumentId) {
        if let Some(k) = self.key_of(doc)
            && let Some(set) = self.map.get_mut(&k)
        {
            set.remove(id);
            if set.is_empty() {
                self.map.remove(&k);
            }
        }
    }

    fn lookup(&self, values: &[&Bson]) -> Option<Vec<DocumentId>> {
        let key: Vec<IndexKey> = values.iter().map(|v| key_from_bson(v)).collect::<Option<_>>()?;
        Some(self.map.get(&key).map(|s| s.iter().copied().collect()).unwrap_or_default())
    }
}

/// The indexes of one collection.
#[derive(Debug, Default, Clone)]
pub struct IndexManager {
    pub indexes: Vec<Index>,
}

impl IndexManager {
    #[must_use]
    pub fn new() -> Self {
        Self { indexes: Vec::new() }
    }

    /// Adds an index (idempotent per spec) and fills it from `existing`.
    /// Fails with a duplicate-key error if existing documents already violate a unique index.
    pub fn create_index<'a>(
        &mut self,
        collection: &str,
        spec: IndexSpec,
        existing: impl Iterator<Item = (&'a DocumentId, &'a BsonDocument)>,
    ) -> Result<(), DbError> {
        if self.indexes.iter().any(|i| i.spec == spec) {
            return Ok(());
        }
        let mut idx = Index::new(spec);
        for (id, doc) in existing {
            if idx.conflict(doc, id).is_some() {
                return Err(duplicate(collection, spec, doc));
            }
            idx.insert(doc, id);
        }
        self.indexes.push(idx);
        Ok(())
    }

    /// Checks every unique index for a would-be write of `doc` under `id`.
    pub fn check_unique(&self, collection: &str, doc: &BsonDocument, id: &DocumentId) -> Result<(), DbError> {
        for idx in &self.indexes {
            if idx.conflict(doc, id).is_some() {
                return Err(duplicate(collection, idx.spec, doc));
            }
        }
        Ok(())
    }

    pub fn insert_all(&mut self, doc: &BsonDocument, id: &DocumentId) {
        for idx in &mut self.indexes {
            idx.insert(doc, id);
        }
    }

    pub fn remove_all(&mut self, doc: &BsonDocument, id: &DocumentId) {
        for idx in &mut self.indexes {
            idx.remove(doc, id);
        }
    }

    pub fn clear(&mut self) {
        for idx in &mut self.indexes {
            idx.map.clear();
        }
    }

    /// Candidate ids for an equality on a single indexed field, if such an index exists.
    #[must_use]
    pub fn lookup_eq(&self, field: &str, value: &Bson) -> Option<Vec<DocumentId>> {
        self.indexes
            .iter()
            .find(|i| i.spec.fields == [field])
            .and_then(|i| i.lookup(&[value]))
    }
}

fn duplicate(collection: &str, spec: IndexSpec, doc: &BsonDocument) -> DbError {
    let mut key = BsonDocument::new();
    for f in spec.fields {
        key.insert(*f, get_path(doc, f).cloned().unwrap_or(Bson::Null));
    }
    DbError::Duplicate { collection: collection.to_string(), key }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn compound_unique_rejects_second_pair_only() {
        let mut mgr = IndexManager::new();
        mgr.create_index("reviews", IndexSpec::unique(&["tour", "user"]), std::iter::empty()).unwrap();
        let (a, b) = (DocumentId::new(), DocumentId::new());
        let first = doc! { "tour": 1, "user": 7 };
        mgr.check_unique("reviews", &first, &a).unwrap();
        mgr.insert_all(&first, &a);
        // same document may be rewritten under its own id
        mgr.check_unique("reviews", &first, &a).unwrap();
        mgr.check_unique("reviews", &doc! { "tour": 1, "user": 8 }, &b).unwrap();
        let err = mgr.check_unique("reviews", &doc! { "tour": 1.0, "user": 7 }, &b).unwrap_err();
        assert!(matches!(err, DbError::Duplicate { ref key, .. } if key.get_f64("tour").is_ok()));
    }

    #[test]
    fn hash_lookup_finds_ids() {
        let mut mgr = IndexManager::new();
        mgr.create_index("reviews", IndexSpec::hash(&["tour"]), std::iter::empty()).unwrap();
        let id = DocumentId::new();
        mgr.insert_all(&doc! { "tour": "t1" }, &id);
        assert_eq!(mgr.lookup_eq("tour", &Bson::String("t1".into())), Some(vec![id]));
        assert_eq!(mgr.lookup_eq("tour", &Bson::String("t2".into())), Some(vec![]));
        assert_eq!(mgr.lookup_eq("user", &Bson::String("t1".into())), None);
    }
}
