//! Typed models over the untyped store.
//!
//! A model declares its collection, field kinds (used to cast query and body values), hidden
//! fields, indexes, validators and lifecycle hooks. [`Model::install`] hands all of that to a
//! [`Store`]; the associated functions then give the familiar `find`/`create`/`update` surface.

use crate::document::{ID_FIELD, VERSION_FIELD};
use crate::engine::{CollectionDef, Store, WriteOptions};
use crate::errors::{DbError, ValidationIssue};
use crate::hooks::HookRegistry;
use crate::index::IndexSpec;
use crate::query::{cast_value, Query, QueryKind, QueryPlan};
use crate::types::{DocumentId, FieldKind};
use bson::{Bson, Document as BsonDocument};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub trait Model: Serialize + DeserializeOwned + Sized + 'static {
    /// Collection the documents live in.
    const COLLECTION: &'static str;
    /// Name used in validation messages.
    const NAME: &'static str;

    /// Declared kind of a top-level or dotted field path.
    fn field_kind(path: &str) -> Option<FieldKind>;

    fn hidden_fields() -> &'static [&'static str] {
        &[]
    }

    fn indexes() -> &'static [IndexSpec] {
        &[]
    }

    /// Trims, lowercases, rounds: whatever a value setter would do.
    fn normalize(&mut self) {}

    fn validate(&self) -> Vec<ValidationIssue> {
        Vec::new()
    }

    /// Adds derived fields to a document read back.
    fn decorate(_doc: &mut BsonDocument) {}

    fn register_hooks(_hooks: &HookRegistry) -> Result<(), DbError> {
        Ok(())
    }

    #[must_use]
    fn definition() -> CollectionDef {
        CollectionDef {
            name: Self::COLLECTION,
            model: Self::NAME,
            field_kind: Self::field_kind,
            hidden: Self::hidden_fields(),
            indexes: Self::indexes(),
            prepare: prepare::<Self>,
            decorate: Self::decorate,
        }
    }

    /// Defines the collection (building its indexes) and registers the model's hooks.
    fn install(store: &Store) -> Result<(), DbError> {
        store.define(Self::definition())?;
        Self::register_hooks(store.hooks())
    }

    fn find(store: &Store) -> Query<'_, Self> {
        Query::new(store, QueryKind::Many)
    }

    fn find_where(store: &Store, conditions: BsonDocument) -> Query<'_, Self> {
        Self::find(store).find(conditions)
    }

    fn find_one(store: &Store, conditions: BsonDocument) -> Query<'_, Self> {
        Query::new(store, QueryKind::One).find(conditions)
    }

    fn find_by_id(store: &Store, id: DocumentId) -> Query<'_, Self> {
        Query::new(store, QueryKind::ById(id))
    }

    fn create(store: &Store, body: BsonDocument) -> Result<BsonDocument, DbError> {
        store.insert(Self::COLLECTION, body, WriteOptions::default())
    }

    fn create_with(store: &Store, body: BsonDocument, opts: WriteOptions) -> Result<BsonDocument, DbError> {
        store.insert(Self::COLLECTION, body, opts)
    }

    /// Applies `update` to the document with `id` and returns it as it is after the write.
    fn find_by_id_and_update(
        store: &Store,
        id: DocumentId,
        update: BsonDocument,
        opts: WriteOptions,
    ) -> Result<Option<BsonDocument>, DbError> {
        let mut plan = QueryPlan::new(Self::COLLECTION, QueryKind::ById(id));
        plan.update = Some(update);
        store.update_one(plan, opts)
    }

    fn find_one_and_update(
        store: &Store,
        conditions: BsonDocument,
        update: BsonDocument,
        opts: WriteOptions,
    ) -> Result<Option<BsonDocument>, DbError> {
        let mut plan = QueryPlan::new(Self::COLLECTION, QueryKind::One);
        plan.conditions = conditions;
        plan.update = Some(update);
        store.update_one(plan, opts)
    }

    fn find_by_id_and_delete(store: &Store, id: DocumentId) -> Result<Option<BsonDocument>, DbError> {
        store.delete_one(QueryPlan::new(Self::COLLECTION, QueryKind::ById(id)))
    }

    fn find_one_and_delete(store: &Store, conditions: BsonDocument) -> Result<Option<BsonDocument>, DbError> {
        let mut plan = QueryPlan::new(Self::COLLECTION, QueryKind::One);
        plan.conditions = conditions;
        store.delete_one(plan)
    }

    /// Removes every match; no hooks run.
    fn delete_many(store: &Store, conditions: &BsonDocument) -> Result<u64, DbError> {
        store.delete_many(Self::COLLECTION, conditions)
    }

    fn count(store: &Store, conditions: &BsonDocument) -> Result<usize, DbError> {
        store.count(Self::COLLECTION, conditions)
    }

    fn aggregate(store: &Store, pipeline: &[BsonDocument]) -> Result<Vec<BsonDocument>, DbError> {
        store.aggregate(Self::COLLECTION, pipeline)
    }

    /// Decodes a stored (unpopulated) document into the model.
    fn from_document(doc: BsonDocument) -> Result<Self, DbError> {
        Ok(bson::from_document(doc)?)
    }
}

/// Write path for a model: casts each field to its declared kind, decodes into the model
/// (filling defaults and dropping unknown fields), normalizes, optionally validates, then
/// re-encodes with `_id` first and `__v` last.
fn prepare<M: Model>(mut body: BsonDocument, validate: bool) -> Result<BsonDocument, DbError> {
    let id = body.remove(ID_FIELD);
    let version = body.remove(VERSION_FIELD);

    let mut cast = BsonDocument::new();
    let mut issues = Vec::new();
    for (key, value) in body {
        if matches!(value, Bson::Null) {
            continue;
        }
        match M::field_kind(&key).map(|kind| cast_value(&key, &value, kind)) {
            Some(Ok(v)) => {
                cast.insert(key, v);
            }
            Some(Err(e)) => issues.push(ValidationIssue::new(key, e.to_string())),
            None => {
                cast.insert(key, value);
            }
        }
    }
    if !issues.is_empty() {
        return Err(DbError::validation(M::NAME, issues));
    }

    let mut model: M = bson::from_document(cast)
        .map_err(|e| DbError::validation(M::NAME, vec![ValidationIssue::new("document", e.to_string())]))?;
    model.normalize();
    if validate {
        let issues = model.validate();
        if !issues.is_empty() {
            return Err(DbError::validation(M::NAME, issues));
        }
    }

    let mut out = BsonDocument::new();
    if let Some(id) = id {
        out.insert(ID_FIELD, id);
    }
    out.extend(bson::to_document(&model)?);
    if let Some(v) = version {
        out.insert(VERSION_FIELD, v);
    }
    Ok(out)
}
