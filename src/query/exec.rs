use crate::collection::Collection;
use crate::document::{as_f64, get_path, set_path, unset_path, Document, ID_FIELD};
use crate::errors::DbError;
use crate::types::DocumentId;
use bson::Bson;

use super::eval::{compare_docs, eval_filter, project};
use super::types::{CmpOp, Filter, FindOptions, UpdateDoc, MAX_LIMIT, MAX_SORT_FIELDS};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    pub deleted: u64,
}

/// Matching documents, sorted (stable, so ties keep creation order), paged and projected.
pub fn find_docs(col: &Collection, filter: &Filter, opts: &FindOptions) -> Vec<Document> {
    let bench_start = std::time::Instant::now();
    let (mut docs, used_index) = match plan_index_candidates(col, filter) {
        Some(ids) => (col.get_many(&ids), true),
        None => (col.snapshot(), false),
    };
    docs.retain(|d| eval_filter(&d.data, filter));

    if !opts.sort.is_empty() {
        if opts.sort.len() > MAX_SORT_FIELDS {
            log::warn!("sort spec too long: {}", opts.sort.len());
        }
        docs.sort_by(|a, b| compare_docs(&a.data, &b.data, &opts.sort));
    }

    let skip = usize::try_from(opts.skip).unwrap_or(usize::MAX);
    let limit = usize::try_from(opts.limit.unwrap_or(MAX_LIMIT).min(MAX_LIMIT)).unwrap_or(usize::MAX);
    let mut docs: Vec<Document> = docs.into_iter().skip(skip).take(limit).collect();

    if let Some(p) = &opts.projection {
        for d in &mut docs {
            d.data = project(&d.data, p);
        }
    }
    log::trace!(
        "find collection={} used_index={} results={} elapsed_us={}",
        col.name(),
        used_index,
        docs.len(),
        bench_start.elapsed().as_micros()
    );
    docs
}

/// First match in creation order.
pub fn find_first(col: &Collection, filter: &Filter) -> Option<Document> {
    let docs = match plan_index_candidates(col, filter) {
        Some(ids) => col.get_many(&ids),
        None => col.snapshot(),
    };
    docs.into_iter().find(|d| eval_filter(&d.data, filter))
}

#[must_use]
pub fn count_docs(col: &Collection, filter: &Filter) -> usize {
    match plan_index_candidates(col, filter) {
        Some(ids) => col.get_many(&ids),
        None => col.snapshot(),
    }
    .iter()
    .filter(|d| eval_filter(&d.data, filter))
    .count()
}

pub fn delete_many(col: &Collection, filter: &Filter) -> Result<DeleteReport, DbError> {
    if matches!(filter, Filter::True) {
        let n = col.clear()?;
        return Ok(DeleteReport { deleted: n as u64 });
    }
    let ids: Vec<DocumentId> =
        col.snapshot().into_iter().filter(|d| eval_filter(&d.data, filter)).map(|d| d.id).collect();
    let mut deleted = 0u64;
    for id in ids {
        if col.remove(&id)?.is_some() {
            deleted += 1;
        }
    }
    Ok(DeleteReport { deleted })
}

/// Applies `$set`, `$inc` and `$unset` in that order. Returns whether anything changed.
pub fn apply_update(doc: &mut bson::Document, upd: &UpdateDoc) -> bool {
    let mut changed = false;
    for (k, v) in &upd.set {
        changed |= set_path(doc, k, v.clone());
    }
    for (k, by) in &upd.inc {
        let cur = get_path(doc, k).and_then(as_f64).unwrap_or(0.0);
        changed |= set_path(doc, k, Bson::Double(cur + by));
    }
    for k in &upd.unset {
        changed |= unset_path(doc, k);
    }
    changed
}

fn plan_index_candidates(col: &Collection, filter: &Filter) -> Option<Vec<DocumentId>> {
    match filter {
        Filter::Cmp { path, op: CmpOp::Eq, value: Bson::ObjectId(oid) } if path == ID_FIELD => {
            Some(vec![DocumentId(*oid)])
        }
        Filter::Cmp { path, op: CmpOp::Eq, value } if !matches!(value, Bson::Array(_)) => col.lookup_eq(path, value),
        Filter::And(fs) => fs.iter().find_map(|f| plan_index_candidates(col, f)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexSpec;
    use crate::query::{Projection, SortSpec};
    use bson::doc;

    fn seeded() -> Collection {
        let col = Collection::new("u_find", None);
        col.create_index(IndexSpec::hash(&["x"])).unwrap();
        for (k, v) in [(1, 3), (2, 1), (3, 2)] {
            col.insert(doc! { "k": k, "v": v, "x": 0 }).unwrap();
        }
        col
    }

    #[test]
    fn update_doc_set_inc_unset() {
        let mut d = doc! { "x": 1, "y": 2, "z": 0 };
        let ud = UpdateDoc {
            set: vec![("y".into(), Bson::Int32(5))],
            inc: vec![("x".into(), 2.0)],
            unset: vec!["z".into()],
        };
        assert!(apply_update(&mut d, &ud));
        assert_eq!(d.get_i32("y").unwrap(), 5);
        assert_eq!(d.get_f64("x").unwrap(), 3.0);
        assert!(d.get("z").is_none());
        assert!(!apply_update(&mut d, &UpdateDoc { set: vec![("y".into(), Bson::Int32(5))], ..UpdateDoc::default() }));
    }

    #[test]
    fn find_docs_projection_sort_and_pagination() {
        let col = seeded();
        let filter = Filter::Cmp { path: "x".into(), op: CmpOp::Eq, value: Bson::Int32(0) };
        let opts = FindOptions {
            projection: Some(Projection::Include { fields: vec!["k".into()], with_id: false }),
            sort: vec![SortSpec::asc("v")],
            skip: 1,
            limit: Some(1),
        };
        let docs = find_docs(&col, &filter, &opts);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].data, doc! { "k": 3 });
        assert_eq!(count_docs(&col, &filter), 3);
    }

    #[test]
    fn delete_many_counts_matches() {
        let col = seeded();
        let filter = Filter::Cmp { path: "v".into(), op: CmpOp::Gt, value: Bson::Int32(1) };
        assert_eq!(delete_many(&col, &filter).unwrap().deleted, 2);
        assert_eq!(delete_many(&col, &Filter::True).unwrap().deleted, 1);
    }
}
