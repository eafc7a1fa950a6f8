//! Development data: load the bundled tours, users and reviews into a store, or wipe them.
//!
//! Imports skip validation but run every lifecycle hook, so slugs are derived and tour
//! ratings are recomputed as reviews arrive.

use crate::engine::{Store, WriteOptions};
use crate::errors::DbError;
use crate::model::Model;
use crate::models::{Review, Tour, User};
use bson::Document as BsonDocument;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Files read by [`import_dev_data`], in load order.
pub const DEV_DATA_FILES: [(&str, &str); 3] =
    [("tours.json", Tour::COLLECTION), ("users.json", User::COLLECTION), ("reviews.json", Review::COLLECTION)];

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub collection: String,
    pub inserted: u64,
    pub errors: u64,
}

/// Reads documents from a JSON array or from newline-delimited JSON.
pub fn read_documents<R: Read>(reader: R) -> Result<Vec<BsonDocument>, DbError> {
    let mut reader = BufReader::new(reader);
    let array_mode = loop {
        let buf = reader.fill_buf()?;
        match buf.iter().position(|b| !b.is_ascii_whitespace()) {
            Some(i) => break buf[i] == b'[',
            None if buf.is_empty() => return Ok(Vec::new()),
            None => {
                let n = buf.len();
                reader.consume(n);
            }
        }
    };
    if array_mode {
        let values: Vec<serde_json::Value> = serde_json::from_reader(reader)?;
        return values.iter().map(|v| bson::to_document(v).map_err(DbError::from)).collect();
    }
    let mut docs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let v: serde_json::Value = serde_json::from_str(&line)?;
        docs.push(bson::to_document(&v)?);
    }
    Ok(docs)
}

/// Inserts `docs` one by one without validation. A failing document is logged and counted;
/// the rest still load.
pub fn import_documents(store: &Store, collection: &str, docs: Vec<BsonDocument>) -> ImportReport {
    let mut report = ImportReport { collection: collection.to_string(), ..ImportReport::default() };
    for doc in docs {
        match store.insert(collection, doc, WriteOptions::unvalidated()) {
            Ok(_) => report.inserted += 1,
            Err(e) => {
                log::warn!("import into {collection} failed: {e}");
                report.errors += 1;
            }
        }
    }
    log::info!("import: collection={collection}, inserted={}, errors={}", report.inserted, report.errors);
    report
}

/// Loads every dev-data file found in `dir`. Missing files are skipped.
pub fn import_dev_data(store: &Store, dir: &Path) -> Result<Vec<ImportReport>, DbError> {
    let mut reports = Vec::new();
    for (file, collection) in DEV_DATA_FILES {
        let path = dir.join(file);
        if !path.exists() {
            log::warn!("dev data file {} not found; skipping", path.display());
            continue;
        }
        let docs = read_documents(File::open(&path)?)?;
        reports.push(import_documents(store, collection, docs));
    }
    store.flush()?;
    Ok(reports)
}

/// Removes every tour, user and review. No hooks run.
pub fn delete_dev_data(store: &Store) -> Result<u64, DbError> {
    let mut removed = 0;
    for (_, collection) in DEV_DATA_FILES {
        let n = store.delete_many(collection, &BsonDocument::new())?;
        log::info!("deleted {n} documents from {collection}");
        removed += n;
    }
    store.flush()?;
    Ok(removed)
}
