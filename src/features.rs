//! Query Shaper: turns request query-string parameters into filter, sort, projection and
//! pagination on a [`Query`]. Nothing runs until the caller executes `features.query`.

use crate::model::Model;
use crate::query::Query;
use bson::{Bson, Document as BsonDocument};
use std::collections::BTreeMap;

const CONTROL_KEYS: [&str; 4] = ["page", "sort", "limit", "fields"];
const COMPARISON_SUFFIXES: [&str; 4] = ["gte", "gt", "lte", "lt"];
const MAX_KEY_DEPTH: usize = 5;

pub const DEFAULT_SORT: &str = "-createdAt";
pub const DEFAULT_FIELDS: &str = "-__v";
pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_LIMIT: u64 = 100;

/// One query-string value: plain, repeated, or nested through `key[sub]` brackets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Text(String),
    List(Vec<String>),
    Map(BTreeMap<String, QueryValue>),
}

impl QueryValue {
    fn to_bson(&self) -> Bson {
        match self {
            Self::Text(s) => Bson::String(s.clone()),
            Self::List(items) => Bson::Array(items.iter().cloned().map(Bson::String).collect()),
            Self::Map(m) => Bson::Document(
                m.iter()
                    .map(|(k, v)| {
                        let key = if COMPARISON_SUFFIXES.contains(&k.as_str()) { format!("${k}") } else { k.clone() };
                        (key, v.to_bson())
                    })
                    .collect(),
            ),
        }
    }

    /// Comma-joined text; lists are joined too.
    fn joined(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.clone()),
            Self::List(items) => Some(items.join(",")),
            Self::Map(_) => None,
        }
    }

    fn push(&mut self, value: String) {
        *self = match std::mem::replace(self, Self::List(Vec::new())) {
            Self::Text(first) => Self::List(vec![first, value]),
            Self::List(mut items) => {
                items.push(value);
                Self::List(items)
            }
            Self::Map(_) => Self::Text(value),
        };
    }
}

/// Decoded query-string parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryString(BTreeMap<String, QueryValue>);

impl QueryString {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `price[gte]=100&sort=-price,name&difficulty=easy` style input. A leading `?` is
    /// ignored; repeated keys collect into a list.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let raw = raw.strip_prefix('?').unwrap_or(raw);
        Self::from_pairs(url::form_urlencoded::parse(raw.as_bytes()).map(|(k, v)| (k.into_owned(), v.into_owned())))
    }

    pub fn from_pairs<K: AsRef<str>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        let mut qs = Self::new();
        for (k, v) in pairs {
            qs.append(k.as_ref(), v.into());
        }
        qs
    }

    /// Adds one raw `key=value` pair, expanding bracket segments.
    pub fn append(&mut self, key: &str, value: String) {
        let path = key_path(key);
        let Some((last, parents)) = path.split_last() else { return };
        let mut map = &mut self.0;
        for seg in parents {
            let entry = map.entry(seg.clone()).or_insert_with(|| QueryValue::Map(BTreeMap::new()));
            if !matches!(entry, QueryValue::Map(_)) {
                *entry = QueryValue::Map(BTreeMap::new());
            }
            let QueryValue::Map(inner) = entry else { return };
            map = inner;
        }
        match map.get_mut(last) {
            Some(existing) => existing.push(value),
            None => {
                map.insert(last.clone(), QueryValue::Text(value));
            }
        }
    }

    /// Sets a top-level key, replacing whatever was there.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), QueryValue::Text(value.into()));
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&QueryValue> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<QueryValue> {
        self.0.remove(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// `a[b][c]` becomes `["a", "b", "c"]`; anything without well-formed brackets stays whole.
fn key_path(key: &str) -> Vec<String> {
    let Some(open) = key.find('[') else { return vec![key.to_string()] };
    if open == 0 {
        return vec![key.to_string()];
    }
    let mut out = vec![key[..open].to_string()];
    let mut rest = &key[open..];
    while let Some(inner) = rest.strip_prefix('[') {
        let Some(close) = inner.find(']') else { return vec![key.to_string()] };
        if out.len() > MAX_KEY_DEPTH {
            break;
        }
        out.push(inner[..close].to_string());
        rest = &inner[close + 1..];
    }
    out
}

/// Leading-number coercion: positive and finite, truncated toward zero; anything else is the
/// default.
fn positive_or(value: Option<&QueryValue>, default: u64) -> u64 {
    let Some(QueryValue::Text(s)) = value else { return default };
    match s.trim().parse::<f64>() {
        Ok(n) if n.is_finite() && n >= 1.0 => n.trunc().min(u64::MAX as f64) as u64,
        _ => default,
    }
}

/// Chainable shaper over a model query and the caller's query string.
#[derive(Debug)]
pub struct ApiFeatures<'s, M> {
    pub query: Query<'s, M>,
    query_string: QueryString,
}

impl<'s, M: Model> ApiFeatures<'s, M> {
    #[must_use]
    pub fn new(query: Query<'s, M>, query_string: QueryString) -> Self {
        Self { query, query_string }
    }

    /// Every non-control parameter becomes an AND-ed condition; `gte|gt|lte|lt` sub-keys become
    /// the store's comparison operators. Values are cast by the store when the query runs.
    #[must_use]
    pub fn filter(mut self) -> Self {
        let conditions: BsonDocument = self
            .query_string
            .0
            .iter()
            .filter(|(k, _)| !CONTROL_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.to_bson()))
            .collect();
        log::debug!("query shaper filter: {conditions}");
        self.query = self.query.find(conditions);
        self
    }

    #[must_use]
    pub fn sort(mut self) -> Self {
        let spec = self.query_string.get("sort").and_then(QueryValue::joined).filter(|s| !s.trim().is_empty());
        self.query = self.query.sort(spec.as_deref().unwrap_or(DEFAULT_SORT));
        self
    }

    #[must_use]
    pub fn limit_fields(mut self) -> Self {
        let spec = self.query_string.get("fields").and_then(QueryValue::joined).filter(|s| !s.trim().is_empty());
        self.query = self.query.select(spec.as_deref().unwrap_or(DEFAULT_FIELDS));
        self
    }

    #[must_use]
    pub fn paginate(mut self) -> Self {
        let page = positive_or(self.query_string.get("page"), DEFAULT_PAGE);
        let limit = positive_or(self.query_string.get("limit"), DEFAULT_LIMIT);
        self.query = self.query.skip((page - 1).saturating_mul(limit)).limit(limit);
        self
    }

    /// All four steps in the usual order.
    #[must_use]
    pub fn apply_all(self) -> Self {
        self.filter().sort().limit_fields().paginate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brackets_nest_and_repeats_collect() {
        let qs = QueryString::parse("?price[gte]=100&duration[lt]=7&sort=price&sort=name&a[b][c]=x");
        let QueryValue::Map(price) = qs.get("price").unwrap() else { panic!("price not nested") };
        assert_eq!(price.get("gte"), Some(&QueryValue::Text("100".into())));
        assert_eq!(qs.get("sort"), Some(&QueryValue::List(vec!["price".into(), "name".into()])));
        let QueryValue::Map(a) = qs.get("a").unwrap() else { panic!("a not nested") };
        assert!(matches!(a.get("b"), Some(QueryValue::Map(_))));
    }

    #[test]
    fn malformed_brackets_keep_the_raw_key() {
        assert_eq!(key_path("price[gte"), vec!["price[gte".to_string()]);
        assert_eq!(key_path("[x]"), vec!["[x]".to_string()]);
        assert_eq!(key_path("p[a]"), vec!["p".to_string(), "a".to_string()]);
    }

    #[test]
    fn comparison_suffixes_gain_operator_prefix() {
        let qs = QueryString::parse("price[gte]=100&price[max]=3");
        assert_eq!(
            qs.get("price").unwrap().to_bson(),
            Bson::Document(bson::doc! { "$gte": "100", "max": "3" })
        );
    }

    #[test]
    fn positive_or_falls_back_and_truncates() {
        let t = |s: &str| QueryValue::Text(s.into());
        assert_eq!(positive_or(Some(&t("2.9")), 1), 2);
        assert_eq!(positive_or(Some(&t("0")), 1), 1);
        assert_eq!(positive_or(Some(&t("-3")), 100), 100);
        assert_eq!(positive_or(Some(&t("abc")), 100), 100);
        assert_eq!(positive_or(Some(&t("inf")), 100), 100);
        assert_eq!(positive_or(Some(&QueryValue::List(vec!["1".into(), "2".into()])), 7), 7);
        assert_eq!(positive_or(None, 7), 7);
    }
}
