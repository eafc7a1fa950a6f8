//! Lifecycle hooks: callbacks the store runs around create, find, update and delete.
//!
//! Hooks are registered per collection against one [`LifecycleEvent`]. Each event accepts one
//! shape of callback:
//!
//! | event | receives |
//! |---|---|
//! | `BeforeCreate`, `AfterCreate` | the document |
//! | `BeforeFind`, `BeforeUpdateMatch`, `BeforeDelete` | the pending [`QueryPlan`] |
//! | `AfterFind` | the documents found |
//! | `AfterUpdateMatch`, `AfterDelete` | the matched document before and after |
//!
//! Hooks run in registration order and are cloned out of the registry before they run, so a
//! hook may call back into the store. The first error aborts the operation.

use crate::engine::Store;
use crate::errors::DbError;
use crate::query::QueryPlan;
use bson::Document as BsonDocument;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    BeforeCreate,
    AfterCreate,
    BeforeFind,
    AfterFind,
    BeforeUpdateMatch,
    AfterUpdateMatch,
    BeforeDelete,
    AfterDelete,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What a hook gets besides its target.
pub struct HookContext<'a> {
    pub store: &'a Store,
    pub collection: &'a str,
    pub event: LifecycleEvent,
    /// When the surrounding operation started.
    pub started: Instant,
}

/// The document an update or delete matched, captured before the write, and its state after
/// (`None` after a delete).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
    pub before: Option<BsonDocument>,
    pub after: Option<BsonDocument>,
}

pub type DocumentHook = Arc<dyn Fn(&HookContext<'_>, &mut BsonDocument) -> Result<(), DbError> + Send + Sync>;
pub type QueryHook = Arc<dyn Fn(&HookContext<'_>, &mut QueryPlan) -> Result<(), DbError> + Send + Sync>;
pub type FoundHook = Arc<dyn Fn(&HookContext<'_>, &mut Vec<BsonDocument>) -> Result<(), DbError> + Send + Sync>;
pub type MatchedHook = Arc<dyn Fn(&HookContext<'_>, &MatchOutcome) -> Result<(), DbError> + Send + Sync>;

#[derive(Clone)]
pub enum Hook {
    Document(DocumentHook),
    Query(QueryHook),
    Found(FoundHook),
    Matched(MatchedHook),
}

impl Hook {
    pub fn document(f: impl Fn(&HookContext<'_>, &mut BsonDocument) -> Result<(), DbError> + Send + Sync + 'static) -> Self {
        Self::Document(Arc::new(f))
    }

    pub fn query(f: impl Fn(&HookContext<'_>, &mut QueryPlan) -> Result<(), DbError> + Send + Sync + 'static) -> Self {
        Self::Query(Arc::new(f))
    }

    pub fn found(f: impl Fn(&HookContext<'_>, &mut Vec<BsonDocument>) -> Result<(), DbError> + Send + Sync + 'static) -> Self {
        Self::Found(Arc::new(f))
    }

    pub fn matched(f: impl Fn(&HookContext<'_>, &MatchOutcome) -> Result<(), DbError> + Send + Sync + 'static) -> Self {
        Self::Matched(Arc::new(f))
    }

    fn fits(&self, event: LifecycleEvent) -> bool {
        use LifecycleEvent as E;
        match self {
            Self::Document(_) => matches!(event, E::BeforeCreate | E::AfterCreate),
            Self::Query(_) => matches!(event, E::BeforeFind | E::BeforeUpdateMatch | E::BeforeDelete),
            Self::Found(_) => event == E::AfterFind,
            Self::Matched(_) => matches!(event, E::AfterUpdateMatch | E::AfterDelete),
        }
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Document(_) => "Document",
            Self::Query(_) => "Query",
            Self::Found(_) => "Found",
            Self::Matched(_) => "Matched",
        };
        write!(f, "Hook::{kind}")
    }
}

type Key = (String, LifecycleEvent);

/// Hooks by collection and event.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<HashMap<Key, Vec<(String, Hook)>>>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry").field("events", &self.hooks.read().len()).finish()
    }
}

impl HookRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `hook` under `name`. A hook already registered under the same name for the same
    /// collection and event is replaced in place.
    ///
    /// # Errors
    /// `HookMismatch` if the hook's shape does not fit the event.
    pub fn register(
        &self,
        collection: &str,
        event: LifecycleEvent,
        name: impl Into<String>,
        hook: Hook,
    ) -> Result<(), DbError> {
        if !hook.fits(event) {
            return Err(DbError::HookMismatch(event.to_string()));
        }
        let name = name.into();
        let mut hooks = self.hooks.write();
        let list = hooks.entry((collection.to_string(), event)).or_default();
        if let Some(entry) = list.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = hook;
        } else {
            list.push((name, hook));
        }
        Ok(())
    }

    /// Removes the hook registered under `name`; true if there was one.
    pub fn unregister(&self, collection: &str, event: LifecycleEvent, name: &str) -> bool {
        let mut hooks = self.hooks.write();
        let Some(list) = hooks.get_mut(&(collection.to_string(), event)) else {
            return false;
        };
        let before = list.len();
        list.retain(|(n, _)| n != name);
        list.len() < before
    }

    #[must_use]
    pub fn count(&self, collection: &str, event: LifecycleEvent) -> usize {
        self.hooks.read().get(&(collection.to_string(), event)).map_or(0, Vec::len)
    }

    fn snapshot(&self, collection: &str, event: LifecycleEvent) -> Vec<Hook> {
        self.hooks
            .read()
            .get(&(collection.to_string(), event))
            .map(|l| l.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn run_document(&self, ctx: &HookContext<'_>, doc: &mut BsonDocument) -> Result<(), DbError> {
        for hook in self.snapshot(ctx.collection, ctx.event) {
            if let Hook::Document(f) = hook {
                f(ctx, doc)?;
            }
        }
        Ok(())
    }

    pub(crate) fn run_query(&self, ctx: &HookContext<'_>, plan: &mut QueryPlan) -> Result<(), DbError> {
        for hook in self.snapshot(ctx.collection, ctx.event) {
            if let Hook::Query(f) = hook {
                f(ctx, plan)?;
            }
        }
        Ok(())
    }

    pub(crate) fn run_found(&self, ctx: &HookContext<'_>, docs: &mut Vec<BsonDocument>) -> Result<(), DbError> {
        for hook in self.snapshot(ctx.collection, ctx.event) {
            if let Hook::Found(f) = hook {
                f(ctx, docs)?;
            }
        }
        Ok(())
    }

    pub(crate) fn run_matched(&self, ctx: &HookContext<'_>, outcome: &MatchOutcome) -> Result<(), DbError> {
        for hook in self.snapshot(ctx.collection, ctx.event) {
            if let Hook::Matched(f) = hook {
                f(ctx, outcome)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_shape_is_rejected() {
        let reg = HookRegistry::new();
        let err = reg.register("tours", LifecycleEvent::AfterFind, "x", Hook::document(|_, _| Ok(()))).unwrap_err();
        assert!(matches!(err, DbError::HookMismatch(ref e) if e == "AfterFind"));
        assert_eq!(reg.count("tours", LifecycleEvent::AfterFind), 0);
    }

    #[test]
    fn same_name_replaces() {
        let reg = HookRegistry::new();
        for _ in 0..2 {
            reg.register("tours", LifecycleEvent::BeforeFind, "visibility", Hook::query(|_, _| Ok(()))).unwrap();
        }
        reg.register("tours", LifecycleEvent::BeforeFind, "guides", Hook::query(|_, _| Ok(()))).unwrap();
        assert_eq!(reg.count("tours", LifecycleEvent::BeforeFind), 2);
        assert!(reg.unregister("tours", LifecycleEvent::BeforeFind, "guides"));
        assert!(!reg.unregister("tours", LifecycleEvent::BeforeFind, "guides"));
        assert_eq!(reg.count("tours", LifecycleEvent::BeforeFind), 1);
    }
}
