use crate::aggregate::run_pipeline;
use crate::collection::{Collection, WalWriter};
use crate::document::{Document, ID_FIELD, VERSION_FIELD};
use crate::errors::DbError;
use crate::hooks::{HookContext, HookRegistry, LifecycleEvent, MatchOutcome};
use crate::index::IndexSpec;
use crate::query::{
    apply_update, count_docs, delete_many, find_docs, find_first, parse_filter, parse_projection, parse_update, CmpOp,
    Filter, FindOptions, Populate, QueryKind, QueryPlan,
};
use crate::types::{DocumentId, FieldKind};
use crate::wal::{read_record, write_record, WalRecord};
use bson::{Bson, Document as BsonDocument};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Seek, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

const WAL_FILE: &str = "natours.wal";

/// Store configuration.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Directory holding the write-ahead log. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
}

/// How a model's documents are checked and shaped on their way into a collection.
#[derive(Clone, Copy)]
pub struct CollectionDef {
    pub name: &'static str,
    /// Model name used in validation messages.
    pub model: &'static str,
    pub field_kind: fn(&str) -> Option<FieldKind>,
    /// Left out of every read unless explicitly selected.
    pub hidden: &'static [&'static str],
    pub indexes: &'static [IndexSpec],
    /// Casts, applies defaults and (when asked) validates a full document body.
    pub prepare: fn(BsonDocument, bool) -> Result<BsonDocument, DbError>,
    /// Adds derived fields to a document read back.
    pub decorate: fn(&mut BsonDocument),
}

impl CollectionDef {
    /// Definition for a collection without a model: no kinds, no validation.
    #[must_use]
    pub fn untyped(name: &'static str) -> Self {
        Self {
            name,
            model: name,
            field_kind: |_| None,
            hidden: &[],
            indexes: &[],
            prepare: |body, _| Ok(body),
            decorate: |_| {},
        }
    }
}

impl std::fmt::Debug for CollectionDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionDef").field("name", &self.name).field("model", &self.model).finish()
    }
}

/// Options for a single write.
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    /// Run model validators before storing.
    pub validate: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self { validate: true }
    }
}

impl WriteOptions {
    #[must_use]
    pub fn unvalidated() -> Self {
        Self { validate: false }
    }
}

/// The process-wide document store: named collections, their definitions, the lifecycle hook
/// registry and an optional write-ahead log.
pub struct Store {
    options: StoreOptions,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    defs: RwLock<HashMap<String, CollectionDef>>,
    hooks: HookRegistry,
    wal: Option<WalWriter>,
    derived: Mutex<()>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("options", &self.options)
            .field("collections", &self.collections.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Store {
    /// A store with no log; everything is lost on drop.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            options: StoreOptions::default(),
            collections: RwLock::new(HashMap::new()),
            defs: RwLock::new(HashMap::new()),
            hooks: HookRegistry::new(),
            wal: None,
            derived: Mutex::new(()),
        }
    }

    /// Opens (or creates) a store. With a data directory, the WAL is replayed to rebuild state;
    /// a torn or corrupt tail is cut off so later appends stay readable.
    pub fn open(options: StoreOptions) -> Result<Self, DbError> {
        let Some(dir) = options.data_dir.clone() else {
            return Ok(Self::memory());
        };
        fs::create_dir_all(&dir)?;
        let wal_path = dir.join(WAL_FILE);
        if !wal_path.exists() {
            File::create(&wal_path)?;
        }

        let wal_file = OpenOptions::new().read(true).append(true).open(&wal_path)?;
        let wal: WalWriter = Arc::new(Mutex::new(BufWriter::new(wal_file.try_clone()?)));
        let store = Self {
            options,
            collections: RwLock::new(HashMap::new()),
            defs: RwLock::new(HashMap::new()),
            hooks: HookRegistry::new(),
            wal: Some(wal),
            derived: Mutex::new(()),
        };

        let mut reader = BufReader::new(File::open(&wal_path)?);
        let mut good_len = 0u64;
        let mut replayed = 0usize;
        loop {
            match read_record(&mut reader) {
                Ok(Some(rec)) => {
                    store.collection(&rec.collection).apply_replayed(&rec)?;
                    good_len = reader.stream_position()?;
                    replayed += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    log::warn!("WAL replay stopped after {replayed} records: {e}");
                    wal_file.set_len(good_len)?;
                    break;
                }
            }
        }
        log::info!("opened store at {} ({replayed} WAL records)", dir.display());
        Ok(store)
    }

    #[must_use]
    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Held while a hook recomputes fields derived from other documents (tour ratings), so the
    /// read and the write of one recompute are not interleaved with another on this store.
    pub fn derived_lock(&self) -> MutexGuard<'_, ()> {
        self.derived.lock()
    }

    /// Registers a collection definition and builds its indexes over what is already stored.
    /// Defining the same name again replaces the definition.
    pub fn define(&self, def: CollectionDef) -> Result<(), DbError> {
        let col = self.collection(def.name);
        for spec in def.indexes {
            col.create_index(*spec)?;
        }
        self.defs.write().insert(def.name.to_string(), def);
        Ok(())
    }

    fn def(&self, name: &str) -> Option<CollectionDef> {
        self.defs.read().get(name).copied()
    }

    /// The named collection, created empty on first use.
    pub fn collection(&self, name: &str) -> Arc<Collection> {
        if let Some(c) = self.collections.read().get(name) {
            return c.clone();
        }
        self.collections
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Collection::new(name, self.wal.clone())))
            .clone()
    }

    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn ctx<'a>(&'a self, collection: &'a str, event: LifecycleEvent, started: Instant) -> HookContext<'a> {
        HookContext { store: self, collection, event, started }
    }

    fn compile_filter(&self, plan: &QueryPlan) -> Result<Filter, DbError> {
        let def = self.def(&plan.collection);
        let kinds = |p: &str| def.and_then(|d| (d.field_kind)(p));
        let filter = parse_filter(&plan.conditions, &kinds)?;
        Ok(match plan.kind {
            QueryKind::ById(id) => Filter::and(vec![
                Filter::Cmp { path: ID_FIELD.into(), op: CmpOp::Eq, value: id.into() },
                filter,
            ]),
            QueryKind::Many | QueryKind::One => filter,
        })
    }

    /// Selected paths plus exclusions for hidden fields (unless the selection names them).
    fn compile_select(&self, plan: &QueryPlan) -> Result<FindOptions, DbError> {
        let mut projection = parse_projection(&plan.select)?;
        let hidden = self.def(&plan.collection).map_or(&[][..], |d| d.hidden);
        if !hidden.is_empty() && !matches!(projection, Some(crate::query::Projection::Include { .. })) {
            let mut specs = plan.select.clone();
            specs.extend(hidden.iter().map(|h| format!("-{h}")));
            projection = parse_projection(&specs)?;
        }
        let limit = match plan.kind {
            QueryKind::Many => plan.limit,
            QueryKind::One | QueryKind::ById(_) => Some(1),
        };
        Ok(FindOptions { projection, sort: plan.sort.clone(), skip: plan.skip, limit })
    }

    /// Runs a read: `BeforeFind` hooks, filter/sort/page/project, population, derived fields,
    /// then `AfterFind` hooks.
    pub fn find(&self, mut plan: QueryPlan) -> Result<Vec<BsonDocument>, DbError> {
        let started = Instant::now();
        let name = plan.collection.clone();
        self.hooks.run_query(&self.ctx(&name, LifecycleEvent::BeforeFind, started), &mut plan)?;

        let filter = self.compile_filter(&plan)?;
        let opts = self.compile_select(&plan)?;
        let col = self.collection(&name);
        let mut docs: Vec<BsonDocument> = find_docs(&col, &filter, &opts).into_iter().map(|d| d.data).collect();

        for spec in &plan.populate {
            self.populate(&mut docs, spec)?;
        }
        if let Some(def) = self.def(&name) {
            docs.iter_mut().for_each(def.decorate);
        }
        self.hooks.run_found(&self.ctx(&name, LifecycleEvent::AfterFind, started), &mut docs)?;
        Ok(docs)
    }

    fn populate(&self, docs: &mut [BsonDocument], spec: &Populate) -> Result<(), DbError> {
        match &spec.foreign_field {
            None => self.populate_refs(docs, spec),
            Some(foreign) => self.populate_virtual(docs, spec, foreign),
        }
    }

    fn populate_refs(&self, docs: &mut [BsonDocument], spec: &Populate) -> Result<(), DbError> {
        let mut ids: Vec<Bson> = Vec::new();
        for d in docs.iter() {
            match d.get(&spec.path) {
                Some(Bson::Array(items)) => ids.extend(items.iter().filter(|b| matches!(b, Bson::ObjectId(_))).cloned()),
                Some(b @ Bson::ObjectId(_)) => ids.push(b.clone()),
                _ => {}
            }
        }
        if ids.is_empty() {
            return Ok(());
        }
        let mut sub = QueryPlan::new(spec.from.clone(), QueryKind::Many);
        sub.conditions.insert(ID_FIELD, bson::doc! { "$in": ids });
        sub.select = spec.select.clone();
        let found: HashMap<DocumentId, BsonDocument> = self
            .find(sub)?
            .into_iter()
            .filter_map(|d| Some((d.get(ID_FIELD).and_then(DocumentId::from_bson)?, d)))
            .collect();
        let lookup = |b: &Bson| DocumentId::from_bson(b).and_then(|id| found.get(&id)).cloned();
        for d in docs.iter_mut() {
            let filled = match d.get(&spec.path) {
                Some(Bson::Array(items)) => {
                    Bson::Array(items.iter().filter_map(lookup).map(Bson::Document).collect())
                }
                Some(b @ Bson::ObjectId(_)) => lookup(b).map_or(Bson::Null, Bson::Document),
                _ => continue,
            };
            d.insert(spec.path.clone(), filled);
        }
        Ok(())
    }

    fn populate_virtual(&self, docs: &mut [BsonDocument], spec: &Populate, foreign: &str) -> Result<(), DbError> {
        let ids: Vec<Bson> = docs.iter().filter_map(|d| d.get(ID_FIELD).cloned()).collect();
        if ids.is_empty() {
            return Ok(());
        }
        let mut sub = QueryPlan::new(spec.from.clone(), QueryKind::Many);
        sub.conditions.insert(foreign, bson::doc! { "$in": ids });
        sub.select = spec.select.clone();
        let mut by_owner: HashMap<DocumentId, Vec<Bson>> = HashMap::new();
        for related in self.find(sub)? {
            // The back reference may itself have been populated.
            let owner = match related.get(foreign) {
                Some(Bson::Document(d)) => d.get(ID_FIELD).and_then(DocumentId::from_bson),
                Some(b) => DocumentId::from_bson(b),
                None => None,
            };
            if let Some(owner) = owner {
                by_owner.entry(owner).or_default().push(Bson::Document(related));
            }
        }
        for d in docs.iter_mut() {
            let Some(id) = d.get(ID_FIELD).and_then(DocumentId::from_bson) else { continue };
            d.insert(spec.path.clone(), by_owner.remove(&id).unwrap_or_default());
        }
        Ok(())
    }

    /// Creates a document: cast/defaults/validation, `BeforeCreate` hooks, insert, `AfterCreate`
    /// hooks. Returns the stored document with derived fields.
    pub fn insert(&self, collection: &str, body: BsonDocument, opts: WriteOptions) -> Result<BsonDocument, DbError> {
        let started = Instant::now();
        let def = self.def(collection);
        let mut body = match def {
            Some(d) => (d.prepare)(body, opts.validate)?,
            None => body,
        };
        if !body.contains_key(VERSION_FIELD) {
            body.insert(VERSION_FIELD, 0_i32);
        }
        let mut body = Document::new(body).data;
        self.hooks.run_document(&self.ctx(collection, LifecycleEvent::BeforeCreate, started), &mut body)?;

        let mut stored = self.collection(collection).insert(body)?.data;
        self.hooks.run_document(&self.ctx(collection, LifecycleEvent::AfterCreate, started), &mut stored)?;
        if let Some(d) = def {
            (d.decorate)(&mut stored);
        }
        Ok(stored)
    }

    /// Updates the first document the plan matches (`findOneAndUpdate`). The matched document
    /// is captured before the write and handed, with the result, to `AfterUpdateMatch` hooks.
    /// Returns the updated document, or `None` if nothing matched.
    pub fn update_one(&self, mut plan: QueryPlan, opts: WriteOptions) -> Result<Option<BsonDocument>, DbError> {
        let started = Instant::now();
        let name = plan.collection.clone();
        self.hooks.run_query(&self.ctx(&name, LifecycleEvent::BeforeUpdateMatch, started), &mut plan)?;

        let def = self.def(&name);
        let kinds = |p: &str| def.and_then(|d| (d.field_kind)(p));
        let update = parse_update(plan.update.as_ref().unwrap_or(&BsonDocument::new()), &kinds)?;
        let filter = self.compile_filter(&plan)?;
        let col = self.collection(&name);
        let Some(matched) = find_first(&col, &filter) else {
            return Ok(None);
        };

        let mut body = matched.data.clone();
        apply_update(&mut body, &update);
        if let Some(d) = def {
            body = (d.prepare)(body, opts.validate)?;
        }
        col.replace(&matched.id, body.clone())?;
        let stored = col.get(&matched.id).map_or(body, |d| d.data);

        let outcome = MatchOutcome { before: Some(matched.data), after: Some(stored.clone()) };
        self.hooks.run_matched(&self.ctx(&name, LifecycleEvent::AfterUpdateMatch, started), &outcome)?;
        Ok(Some(self.shape(&plan, stored)?))
    }

    /// Deletes the first document the plan matches (`findOneAndDelete`) and returns it.
    pub fn delete_one(&self, mut plan: QueryPlan) -> Result<Option<BsonDocument>, DbError> {
        let started = Instant::now();
        let name = plan.collection.clone();
        self.hooks.run_query(&self.ctx(&name, LifecycleEvent::BeforeDelete, started), &mut plan)?;

        let filter = self.compile_filter(&plan)?;
        let col = self.collection(&name);
        let Some(matched) = find_first(&col, &filter) else {
            return Ok(None);
        };
        let Some(removed) = col.remove(&matched.id)? else {
            return Ok(None);
        };
        let outcome = MatchOutcome { before: Some(removed.clone()), after: None };
        self.hooks.run_matched(&self.ctx(&name, LifecycleEvent::AfterDelete, started), &outcome)?;
        Ok(Some(removed))
    }

    /// Removes every match without running hooks. Returns the number removed.
    pub fn delete_many(&self, collection: &str, conditions: &BsonDocument) -> Result<u64, DbError> {
        let plan = QueryPlan { conditions: conditions.clone(), ..QueryPlan::new(collection, QueryKind::Many) };
        let filter = self.compile_filter(&plan)?;
        Ok(delete_many(&self.collection(collection), &filter)?.deleted)
    }

    /// Counts matches without running hooks.
    pub fn count(&self, collection: &str, conditions: &BsonDocument) -> Result<usize, DbError> {
        let plan = QueryPlan { conditions: conditions.clone(), ..QueryPlan::new(collection, QueryKind::Many) };
        let filter = self.compile_filter(&plan)?;
        Ok(count_docs(&self.collection(collection), &filter))
    }

    /// Runs an aggregation pipeline over the whole collection.
    pub fn aggregate(&self, collection: &str, pipeline: &[BsonDocument]) -> Result<Vec<BsonDocument>, DbError> {
        let docs = self.collection(collection).snapshot().into_iter().map(|d| d.data).collect();
        run_pipeline(docs, pipeline)
    }

    /// Applies the plan's selection and the collection's derived fields to a single document.
    fn shape(&self, plan: &QueryPlan, doc: BsonDocument) -> Result<BsonDocument, DbError> {
        let opts = self.compile_select(plan)?;
        let mut doc = match &opts.projection {
            Some(p) => crate::query::project(&doc, p),
            None => doc,
        };
        if let Some(def) = self.def(&plan.collection) {
            (def.decorate)(&mut doc);
        }
        Ok(doc)
    }

    /// Flushes the WAL to disk.
    pub fn flush(&self) -> Result<(), DbError> {
        if let Some(w) = &self.wal {
            let mut w = w.lock();
            w.flush()?;
            w.get_mut().sync_all()?;
        }
        Ok(())
    }

    /// Rewrites the WAL to hold exactly the live documents.
    pub fn compact(&self) -> Result<(), DbError> {
        let (Some(dir), Some(wal)) = (&self.options.data_dir, &self.wal) else {
            return Ok(());
        };
        let wal_path = dir.join(WAL_FILE);
        let tmp_path = dir.join(format!("{WAL_FILE}.compacting"));
        let collections: Vec<Arc<Collection>> = self.collections.read().values().cloned().collect();

        // Holding the writer lock keeps every collection from appending while the file swaps.
        let mut w = wal.lock();
        w.flush()?;
        {
            let mut tmp = BufWriter::new(OpenOptions::new().create(true).write(true).truncate(true).open(&tmp_path)?);
            for col in &collections {
                for doc in col.snapshot() {
                    write_record(&mut tmp, &WalRecord::put(col.name(), &doc.id.to_hex(), &doc.data)?)?;
                }
            }
            tmp.flush()?;
            tmp.get_mut().sync_all()?;
        }
        fs::rename(&tmp_path, &wal_path)?;
        *w = BufWriter::new(OpenOptions::new().read(true).append(true).open(&wal_path)?);
        log::info!("compacted WAL at {}", wal_path.display());
        Ok(())
    }

    /// Flushes and releases the store.
    pub fn close(self) -> Result<(), DbError> {
        self.flush()?;
        log::info!("store closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn memory_store_round_trip() {
        let store = Store::memory();
        let saved = store.insert("notes", doc! { "text": "hi" }, WriteOptions::default()).unwrap();
        assert_eq!(saved.get_i32(VERSION_FIELD).unwrap(), 0);
        let id = DocumentId::from_bson(saved.get(ID_FIELD).unwrap()).unwrap();
        let found = store.find(QueryPlan::new("notes", QueryKind::ById(id))).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(store.count("notes", &doc! {}).unwrap(), 1);
    }
}
