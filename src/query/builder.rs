use crate::engine::Store;
use crate::errors::DbError;
use crate::model::Model;
use bson::Document as BsonDocument;
use std::marker::PhantomData;

use super::parse::parse_sort;
use super::plan::{Populate, QueryKind, QueryPlan};

/// Chainable read over one model's collection. Each method consumes and returns the builder;
/// nothing touches the store until [`Query::exec`].
pub struct Query<'s, M> {
    store: &'s Store,
    plan: QueryPlan,
    _model: PhantomData<fn() -> M>,
}

impl<M> Clone for Query<'_, M> {
    fn clone(&self) -> Self {
        Self { store: self.store, plan: self.plan.clone(), _model: PhantomData }
    }
}

impl<M> std::fmt::Debug for Query<'_, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query").field("plan", &self.plan).finish()
    }
}

impl<'s, M: Model> Query<'s, M> {
    #[must_use]
    pub fn new(store: &'s Store, kind: QueryKind) -> Self {
        Self { store, plan: QueryPlan::new(M::COLLECTION, kind), _model: PhantomData }
    }

    /// ANDs more conditions into the filter.
    #[must_use]
    pub fn find(mut self, conditions: BsonDocument) -> Self {
        self.plan.and_where(conditions);
        self
    }

    /// Appends sort keys (`"-price,name"`).
    #[must_use]
    pub fn sort(mut self, spec: &str) -> Self {
        self.plan.sort.extend(parse_sort(spec));
        self
    }

    /// Adds a field selection (`"name,price"` or `"-__v"`).
    #[must_use]
    pub fn select(mut self, spec: &str) -> Self {
        self.plan.select.push(spec.to_string());
        self
    }

    #[must_use]
    pub fn skip(mut self, n: u64) -> Self {
        self.plan.skip = n;
        self
    }

    #[must_use]
    pub fn limit(mut self, n: u64) -> Self {
        self.plan.limit = Some(n);
        self
    }

    #[must_use]
    pub fn populate(mut self, spec: Populate) -> Self {
        self.plan.populate.push(spec);
        self
    }

    #[must_use]
    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    #[must_use]
    pub fn into_plan(self) -> QueryPlan {
        self.plan
    }

    pub fn exec(self) -> Result<Vec<BsonDocument>, DbError> {
        self.store.find(self.plan)
    }

    /// First result, if any.
    pub fn exec_one(self) -> Result<Option<BsonDocument>, DbError> {
        Ok(self.store.find(self.plan)?.into_iter().next())
    }
}
