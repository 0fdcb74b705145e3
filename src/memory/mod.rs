//! Research memory: plans, findings, iteration history and final reports.
//!
//! The store is a key/value map with a best-effort similarity lookup. It is
//! the only mutable state shared between concurrent runs; every key embeds the
//! query id (and iteration/slot where relevant), so workers of one iteration
//! never write the same key.
//!
//! Plans, findings, iteration records and reports are append-only: writing an
//! existing key of those kinds is rejected. Run status records and the
//! query-text index are overwritten as a run progresses.

mod file;

pub use file::FileStore;

use crate::types::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// Key layout shared by every store implementation.
pub mod keys {
    use uuid::Uuid;

    pub fn plan(query_id: Uuid, iteration: u32) -> String {
        format!("plan/{}/{:03}", query_id, iteration)
    }

    pub fn finding(query_id: Uuid, iteration: u32, slot: usize) -> String {
        format!("finding/{}/{:03}/{:02}", query_id, iteration, slot)
    }

    pub fn iteration(query_id: Uuid, iteration: u32) -> String {
        format!("iteration/{}/{:03}", query_id, iteration)
    }

    /// Prefix under which all iteration records of a query sort in order.
    pub fn iteration_prefix(query_id: Uuid) -> String {
        format!("iteration/{}/", query_id)
    }

    pub fn report(query_id: Uuid) -> String {
        format!("report/{}", query_id)
    }

    pub fn status(query_id: Uuid) -> String {
        format!("status/{}", query_id)
    }

    pub fn query_index(normalized_text: &str) -> String {
        format!("query/{}", normalized_text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Plan,
    Finding,
    Iteration,
    Report,
    Status,
    QueryIndex,
}

impl RecordKind {
    pub fn is_append_only(self) -> bool {
        !matches!(self, RecordKind::Status | RecordKind::QueryIndex)
    }
}

/// A stored value plus the metadata lookups need.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryRecord {
    pub key: String,
    pub kind: RecordKind,
    pub query_id: Uuid,
    /// Free text indexed for `similar`; empty text is never matched
    #[serde(default)]
    pub text: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn new<T: Serialize>(
        key: impl Into<String>,
        kind: RecordKind,
        query_id: Uuid,
        payload: &T,
    ) -> Result<Self> {
        Ok(Self {
            key: key.into(),
            kind,
            query_id,
            text: String::new(),
            payload: serde_json::to_value(payload)?,
            created_at: Utc::now(),
        })
    }

    /// Attach searchable text
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| AppError::Storage(format!("corrupt record '{}': {}", self.key, e)))
    }
}

/// Key/value + similarity store
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn put(&self, record: MemoryRecord) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<MemoryRecord>>;

    /// Records whose indexed text best matches `query_text`, best first.
    async fn similar(&self, query_text: &str, k: usize) -> Result<Vec<MemoryRecord>>;

    /// All records whose key starts with `prefix`, in key order.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<MemoryRecord>>;
}

/// Fetch and decode a record in one step.
pub async fn get_as<T: DeserializeOwned>(store: &dyn MemoryStore, key: &str) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(record) => Ok(Some(record.decode()?)),
        None => Ok(None),
    }
}

/// Tokenize text into lowercase terms
fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty() && s.len() > 1)
        .map(String::from)
        .collect()
}

/// Jaccard overlap between the query terms and a record's text.
fn lexical_score(query_terms: &HashSet<String>, text: &str) -> f32 {
    if query_terms.is_empty() || text.is_empty() {
        return 0.0;
    }
    let doc_terms = tokenize(text);
    let shared = query_terms.intersection(&doc_terms).count();
    if shared == 0 {
        return 0.0;
    }
    let union = query_terms.union(&doc_terms).count();
    shared as f32 / union as f32
}

/// Linear-scan similarity over a record map, shared by the bundled stores.
pub(crate) fn rank_similar<'a>(
    records: impl Iterator<Item = &'a MemoryRecord>,
    query_text: &str,
    k: usize,
) -> Vec<MemoryRecord> {
    let query_terms = tokenize(query_text);
    let mut scored: Vec<(f32, &MemoryRecord)> = records
        .map(|r| (lexical_score(&query_terms, &r.text), r))
        .filter(|(score, _)| *score > 0.0)
        .collect();

    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.1.created_at.cmp(&a.1.created_at))
    });

    scored.into_iter().take(k).map(|(_, r)| r.clone()).collect()
}

/// Insert into a record map, honouring append-only kinds.
pub(crate) fn insert_record(
    records: &mut BTreeMap<String, MemoryRecord>,
    record: MemoryRecord,
) -> Result<()> {
    if record.kind.is_append_only() && records.contains_key(&record.key) {
        return Err(AppError::Storage(format!(
            "record '{}' already exists and is append-only",
            record.key
        )));
    }
    records.insert(record.key.clone(), record);
    Ok(())
}

/// Process-local store
#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<BTreeMap<String, MemoryRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn put(&self, record: MemoryRecord) -> Result<()> {
        insert_record(&mut self.records.write(), record)
    }

    async fn get(&self, key: &str) -> Result<Option<MemoryRecord>> {
        Ok(self.records.read().get(key).cloned())
    }

    async fn similar(&self, query_text: &str, k: usize) -> Result<Vec<MemoryRecord>> {
        Ok(rank_similar(self.records.read().values(), query_text, k))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<MemoryRecord>> {
        Ok(self
            .records
            .read()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, r)| r.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, kind: RecordKind, text: &str) -> MemoryRecord {
        MemoryRecord::new(key, kind, Uuid::nil(), &serde_json::json!({"k": key}))
            .unwrap()
            .with_text(text)
    }

    #[test]
    fn test_keys_sort_by_iteration() {
        let id = Uuid::nil();
        assert!(keys::iteration(id, 2) < keys::iteration(id, 10));
        assert!(keys::iteration(id, 1).starts_with(&keys::iteration_prefix(id)));
        assert!(keys::finding(id, 1, 2) < keys::finding(id, 1, 11));
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = InMemoryStore::new();
        store.put(record("plan/a", RecordKind::Plan, "")).await.unwrap();

        let got = store.get("plan/a").await.unwrap().unwrap();
        assert_eq!(got.kind, RecordKind::Plan);
        assert!(store.get("plan/missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_append_only_kinds_reject_overwrite() {
        let store = InMemoryStore::new();
        store.put(record("plan/a", RecordKind::Plan, "")).await.unwrap();
        let again = store.put(record("plan/a", RecordKind::Plan, "")).await;
        assert!(matches!(again, Err(AppError::Storage(_))));

        store.put(record("status/a", RecordKind::Status, "")).await.unwrap();
        store.put(record("status/a", RecordKind::Status, "")).await.unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_similar_ranks_by_overlap() {
        let store = InMemoryStore::new();
        store
            .put(record("report/1", RecordKind::Report, "battery storage costs in 2024"))
            .await
            .unwrap();
        store
            .put(record("report/2", RecordKind::Report, "renewable energy storage costs"))
            .await
            .unwrap();
        store
            .put(record("report/3", RecordKind::Report, "medieval poetry"))
            .await
            .unwrap();
        store.put(record("plan/x", RecordKind::Plan, "")).await.unwrap();

        let hits = store.similar("renewable energy storage costs", 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].key, "report/2");
        assert_eq!(hits[1].key, "report/1");
    }

    #[tokio::test]
    async fn test_scan_prefix_in_key_order() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        for i in [3u32, 1, 2] {
            store
                .put(record(&keys::iteration(id, i), RecordKind::Iteration, ""))
                .await
                .unwrap();
        }
        store
            .put(record(&keys::iteration(Uuid::nil(), 1), RecordKind::Iteration, ""))
            .await
            .unwrap();

        let found = store.scan_prefix(&keys::iteration_prefix(id)).await.unwrap();
        let found_keys: Vec<_> = found.iter().map(|r| r.key.clone()).collect();
        assert_eq!(
            found_keys,
            vec![
                keys::iteration(id, 1),
                keys::iteration(id, 2),
                keys::iteration(id, 3)
            ]
        );
    }

    #[test]
    fn test_decode_reports_corruption() {
        let rec = record("plan/a", RecordKind::Plan, "");
        let bad: Result<Vec<u32>> = rec.decode();
        assert!(matches!(bad, Err(AppError::Storage(_))));
    }
}
