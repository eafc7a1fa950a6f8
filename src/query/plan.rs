use crate::types::DocumentId;
use bson::{Bson, Document as BsonDocument};

use super::types::SortSpec;

/// What a plan reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Many,
    /// First match only.
    One,
    /// Direct lookup by identifier.
    ById(DocumentId),
}

/// Attaches related documents to a read.
#[derive(Debug, Clone, PartialEq)]
pub struct Populate {
    /// Field holding the reference(s), or the name of the virtual field to fill.
    pub path: String,
    /// Collection the related documents live in.
    pub from: String,
    pub select: Vec<String>,
    /// Virtual populate: field in `from` that points back at this document's `_id`.
    pub foreign_field: Option<String>,
}

impl Populate {
    /// Resolves the id (or list of ids) stored at `path` against `from`.
    #[must_use]
    pub fn path(path: impl Into<String>, from: impl Into<String>) -> Self {
        Self { path: path.into(), from: from.into(), select: Vec::new(), foreign_field: None }
    }

    /// Fills `path` with every document of `from` whose `foreign_field` is this document's id.
    #[must_use]
    pub fn virtual_field(path: impl Into<String>, from: impl Into<String>, foreign_field: impl Into<String>) -> Self {
        Self { path: path.into(), from: from.into(), select: Vec::new(), foreign_field: Some(foreign_field.into()) }
    }

    #[must_use]
    pub fn select(mut self, spec: impl Into<String>) -> Self {
        self.select.push(spec.into());
        self
    }
}

/// A read, update or delete intent, built up before it runs. Lifecycle hooks receive it mutably
/// before the store executes it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub collection: String,
    pub kind: QueryKind,
    pub conditions: BsonDocument,
    pub sort: Vec<SortSpec>,
    /// Raw select specs (`"name,price"`, `"-__v"`); compiled at execution.
    pub select: Vec<String>,
    pub skip: u64,
    pub limit: Option<u64>,
    pub populate: Vec<Populate>,
    /// Pending update for update plans.
    pub update: Option<BsonDocument>,
}

impl QueryPlan {
    #[must_use]
    pub fn new(collection: impl Into<String>, kind: QueryKind) -> Self {
        Self {
            collection: collection.into(),
            kind,
            conditions: BsonDocument::new(),
            sort: Vec::new(),
            select: Vec::new(),
            skip: 0,
            limit: None,
            populate: Vec::new(),
            update: None,
        }
    }

    #[must_use]
    pub fn is_by_id(&self) -> bool {
        matches!(self.kind, QueryKind::ById(_))
    }

    /// ANDs extra conditions into the plan. Keys already constrained move into `$and`.
    pub fn and_where(&mut self, extra: BsonDocument) {
        let mut clashing = BsonDocument::new();
        for (k, v) in extra {
            if k == "$and" {
                if let Bson::Array(items) = v {
                    self.push_and(items);
                }
            } else if self.conditions.contains_key(&k) {
                clashing.insert(k, v);
            } else {
                self.conditions.insert(k, v);
            }
        }
        if !clashing.is_empty() {
            self.push_and(vec![Bson::Document(clashing)]);
        }
    }

    fn push_and(&mut self, items: Vec<Bson>) {
        match self.conditions.get_mut("$and") {
            Some(Bson::Array(existing)) => existing.extend(items),
            _ => {
                self.conditions.insert("$and", items);
            }
        }
    }

    /// Value the pending update writes to `field`, in plain or `$set` form.
    #[must_use]
    pub fn update_sets(&self, field: &str) -> Option<&Bson> {
        let upd = self.update.as_ref()?;
        match upd.get("$set") {
            Some(Bson::Document(set)) if set.contains_key(field) => set.get(field),
            _ => upd.get(field),
        }
    }

    /// Adds `field = value` to the pending update, in whichever form it already uses.
    pub fn update_set(&mut self, field: &str, value: impl Into<Bson>) {
        let upd = self.update.get_or_insert_with(BsonDocument::new);
        if let Some(Bson::Document(set)) = upd.get_mut("$set") {
            set.insert(field, value.into());
        } else {
            upd.insert(field, value.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn and_where_moves_clashes_into_and() {
        let mut p = QueryPlan::new("tours", QueryKind::Many);
        p.and_where(doc! { "secretTour": true, "price": { "$lt": 500 } });
        p.and_where(doc! { "secretTour": { "$ne": true } });
        assert_eq!(
            p.conditions,
            doc! { "secretTour": true, "price": { "$lt": 500 }, "$and": [ { "secretTour": { "$ne": true } } ] }
        );
    }

    #[test]
    fn update_helpers_respect_set_form() {
        let mut p = QueryPlan::new("tours", QueryKind::One);
        p.update = Some(doc! { "$set": { "name": "New Name For Tour" } });
        assert_eq!(p.update_sets("name"), Some(&Bson::String("New Name For Tour".into())));
        p.update_set("slug", "new-name-for-tour");
        assert_eq!(p.update, Some(doc! { "$set": { "name": "New Name For Tour", "slug": "new-name-for-tour" } }));

        p.update = Some(doc! { "price": 10 });
        assert!(p.update_sets("name").is_none());
    }
}
