use crate::document::{Document, ID_FIELD};
use crate::errors::DbError;
use crate::index::{IndexManager, IndexSpec};
use crate::logger;
use crate::types::DocumentId;
use crate::wal::{write_record, OpKind, WalRecord};
use bson::Document as BsonDocument;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;

pub(crate) type WalWriter = Arc<Mutex<BufWriter<File>>>;

#[derive(Debug, Default)]
struct Inner {
    /// Ordered by object id, which is creation order.
    docs: BTreeMap<DocumentId, BsonDocument>,
    indexes: IndexManager,
}

/// One named collection. Every write (unique check, WAL append, apply) runs under the write lock.
pub struct Collection {
    name: String,
    inner: RwLock<Inner>,
    wal: Option<WalWriter>,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection").field("name", &self.name).field("len", &self.len()).finish()
    }
}

impl Collection {
    pub(crate) fn new(name: impl Into<String>, wal: Option<WalWriter>) -> Self {
        Self { name: name.into(), inner: RwLock::new(Inner::default()), wal }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn create_index(&self, spec: IndexSpec) -> Result<(), DbError> {
        let mut inner = self.inner.write();
        let Inner { docs, indexes } = &mut *inner;
        indexes.create_index(&self.name, spec, docs.iter())
    }

    #[must_use]
    pub fn get(&self, id: &DocumentId) -> Option<Document> {
        self.inner.read().docs.get(id).map(|d| Document { id: *id, data: d.clone() })
    }

    /// Every document, in creation order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Document> {
        self.inner.read().docs.iter().map(|(id, d)| Document { id: *id, data: d.clone() }).collect()
    }

    /// Documents among `ids` that still exist, in creation order.
    #[must_use]
    pub fn get_many(&self, ids: &[DocumentId]) -> Vec<Document> {
        let inner = self.inner.read();
        let mut out: Vec<Document> = ids
            .iter()
            .filter_map(|id| inner.docs.get(id).map(|d| Document { id: *id, data: d.clone() }))
            .collect();
        out.sort_by_key(|d| d.id);
        out.dedup_by_key(|d| d.id);
        out
    }

    /// Ids holding `value` at `field`, when a single-field index covers it.
    #[must_use]
    pub fn lookup_eq(&self, field: &str, value: &bson::Bson) -> Option<Vec<DocumentId>> {
        self.inner.read().indexes.lookup_eq(field, value)
    }

    /// Inserts a new document. Fails with a duplicate-key error if the id or a unique key is taken.
    pub fn insert(&self, body: BsonDocument) -> Result<Document, DbError> {
        let doc = Document::new(body);
        let mut inner = self.inner.write();
        if inner.docs.contains_key(&doc.id) {
            let mut key = BsonDocument::new();
            key.insert(ID_FIELD, doc.id);
            return Err(DbError::Duplicate { collection: self.name.clone(), key });
        }
        inner.indexes.check_unique(&self.name, &doc.data, &doc.id)?;
        self.append(&WalRecord::put(&self.name, &doc.id.to_hex(), &doc.data)?)?;
        inner.indexes.insert_all(&doc.data, &doc.id);
        inner.docs.insert(doc.id, doc.data.clone());
        logger::audit("insert", &self.name, &doc.id);
        Ok(doc)
    }

    /// Replaces the body stored under `id`; returns the previous body.
    pub fn replace(&self, id: &DocumentId, mut body: BsonDocument) -> Result<BsonDocument, DbError> {
        body.insert(ID_FIELD, *id);
        let mut inner = self.inner.write();
        let Some(old) = inner.docs.get(id).cloned() else {
            return Err(DbError::NoSuchDocument(id.to_hex()));
        };
        inner.indexes.check_unique(&self.name, &body, id)?;
        self.append(&WalRecord::put(&self.name, &id.to_hex(), &body)?)?;
        inner.indexes.remove_all(&old, id);
        inner.indexes.insert_all(&body, id);
        inner.docs.insert(*id, body);
        logger::audit("replace", &self.name, id);
        Ok(old)
    }

    pub fn remove(&self, id: &DocumentId) -> Result<Option<BsonDocument>, DbError> {
        let mut inner = self.inner.write();
        if !inner.docs.contains_key(id) {
            return Ok(None);
        }
        self.append(&WalRecord::delete(&self.name, &id.to_hex()))?;
        let old = inner.docs.remove(id);
        if let Some(old) = &old {
            inner.indexes.remove_all(old, id);
        }
        logger::audit("delete", &self.name, id);
        Ok(old)
    }

    /// Drops every document; returns how many were removed.
    pub fn clear(&self) -> Result<usize, DbError> {
        let mut inner = self.inner.write();
        self.append(&WalRecord::clear(&self.name))?;
        let n = inner.docs.len();
        inner.docs.clear();
        inner.indexes.clear();
        log::info!(target: logger::AUDIT_TARGET, "{}", serde_json::json!({ "op": "clear", "collection": self.name, "count": n }));
        Ok(n)
    }

    /// Applies a replayed WAL record without logging it again.
    pub(crate) fn apply_replayed(&self, rec: &WalRecord) -> Result<(), DbError> {
        let mut inner = self.inner.write();
        match rec.op {
            OpKind::Put => {
                if let Some(doc) = rec.body()?.and_then(Document::from_stored) {
                    inner.docs.insert(doc.id, doc.data);
                }
            }
            OpKind::Delete => {
                if let Some(id) = rec.id.as_deref().and_then(|s| DocumentId::parse(s).ok()) {
                    inner.docs.remove(&id);
                }
            }
            OpKind::Clear => inner.docs.clear(),
        }
        Ok(())
    }

    fn append(&self, rec: &WalRecord) -> Result<(), DbError> {
        if let Some(w) = &self.wal {
            write_record(&mut *w.lock(), rec)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn replace_keeps_indexes_in_step() {
        let col = Collection::new("users", None);
        col.create_index(IndexSpec::unique(&["email"])).unwrap();
        let a = col.insert(doc! { "email": "a@x.io" }).unwrap();
        let b = col.insert(doc! { "email": "b@x.io" }).unwrap();
        assert!(matches!(col.replace(&b.id, doc! { "email": "a@x.io" }), Err(DbError::Duplicate { .. })));
        col.replace(&a.id, doc! { "email": "c@x.io" }).unwrap();
        col.replace(&b.id, doc! { "email": "a@x.io" }).unwrap();
        assert_eq!(col.get(&b.id).unwrap().data.get_str("email").unwrap(), "a@x.io");
        assert_eq!(col.get(&b.id).unwrap().data.get_object_id("_id").unwrap(), b.id.0);
    }

    #[test]
    fn remove_reports_missing() {
        let col = Collection::new("tours", None);
        let d = col.insert(doc! { "name": "x" }).unwrap();
        assert!(col.remove(&d.id).unwrap().is_some());
        assert!(col.remove(&d.id).unwrap().is_none());
        assert!(col.is_empty());
    }

    #[test]
    fn index_creation_rejects_existing_duplicates() {
        let col = Collection::new("tours", None);
        col.insert(doc! { "name": "same" }).unwrap();
        col.insert(doc! { "name": "same" }).unwrap();
        assert!(col.create_index(IndexSpec::unique(&["name"])).is_err());
    }
}
