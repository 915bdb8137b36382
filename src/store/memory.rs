//! In-memory [`DocumentStore`] with the same optimistic-concurrency contract
//! as the Postgres store. Backs every unit test and local development runs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::store::{
    DocKey, DocWrite, Document, DocumentStore, MutateFn, Order, Query, TxnView, MAX_TXN_ATTEMPTS,
};

#[derive(Debug)]
struct StoredDoc {
    version: u64,
    data: JsonValue,
}

#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<DocKey, StoredDoc>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, HashMap<DocKey, StoredDoc>> {
        self.docs.lock().expect("memory store lock poisoned")
    }

    /// Validate a write set against the commit-time state. `expected` holds
    /// the versions observed at snapshot time (`None` = read as absent).
    fn check_conflicts(
        docs: &HashMap<DocKey, StoredDoc>,
        expected: &HashMap<DocKey, Option<u64>>,
        writes: &[DocWrite],
    ) -> std::result::Result<(), String> {
        for (key, observed) in expected {
            let current = docs.get(key).map(|d| d.version);
            if current != *observed {
                return Err(format!("version changed for {key}"));
            }
        }
        for write in writes {
            if let DocWrite::Create { key, .. } = write {
                if docs.contains_key(key) {
                    return Err(format!("create conflict for {key}"));
                }
            }
        }
        Ok(())
    }

    fn apply(docs: &mut HashMap<DocKey, StoredDoc>, writes: Vec<DocWrite>) {
        for write in writes {
            match write {
                DocWrite::Put { key, data } | DocWrite::Create { key, data } => {
                    let version = docs.get(&key).map(|d| d.version).unwrap_or(0) + 1;
                    docs.insert(key, StoredDoc { version, data });
                }
                DocWrite::Delete { key } => {
                    docs.remove(&key);
                }
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, key: &DocKey) -> Result<Option<Document>> {
        let docs = self.locked();
        Ok(docs.get(key).map(|d| Document {
            key: key.clone(),
            version: d.version,
            data: d.data.clone(),
        }))
    }

    async fn transact(&self, keys: &[DocKey], mutate: MutateFn<'_>) -> Result<()> {
        for _ in 0..MAX_TXN_ATTEMPTS {
            let (snapshot, expected) = {
                let docs = self.locked();
                let mut snapshot = HashMap::new();
                let mut expected = HashMap::new();
                for key in keys {
                    match docs.get(key) {
                        Some(d) => {
                            expected.insert(key.clone(), Some(d.version));
                            snapshot.insert(
                                key.clone(),
                                Document {
                                    key: key.clone(),
                                    version: d.version,
                                    data: d.data.clone(),
                                },
                            );
                        }
                        None => {
                            expected.insert(key.clone(), None);
                        }
                    }
                }
                (snapshot, expected)
            };

            // Yield between snapshot and commit so concurrent transactions
            // interleave and version conflicts actually occur under test.
            tokio::task::yield_now().await;

            let writes = mutate(&TxnView::new(snapshot))?;

            let mut docs = self.locked();
            match Self::check_conflicts(&docs, &expected, &writes) {
                Ok(()) => {
                    Self::apply(&mut docs, writes);
                    return Ok(());
                }
                Err(reason) => {
                    tracing::debug!(%reason, "transaction conflict, retrying");
                }
            }
        }
        Err(Error::TransientStore(format!(
            "transaction retry budget exhausted over {} keys",
            keys.len()
        )))
    }

    async fn batch_write(&self, writes: Vec<DocWrite>) -> Result<()> {
        let mut docs = self.locked();
        for write in &writes {
            if let DocWrite::Create { key, .. } = write {
                if docs.contains_key(key) {
                    return Err(Error::TransientStore(format!("create conflict for {key}")));
                }
            }
        }
        Self::apply(&mut docs, writes);
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        let docs = self.locked();
        let mut matched: Vec<Document> = docs
            .iter()
            .filter(|(key, _)| key.collection == query.collection)
            .filter(|(_, stored)| {
                query
                    .filters
                    .iter()
                    .all(|(field, value)| stored.data.get(field) == Some(value))
            })
            .map(|(key, stored)| Document {
                key: key.clone(),
                version: stored.version,
                data: stored.data.clone(),
            })
            .collect();

        if let Some((field, order)) = &query.order_by {
            matched.sort_by(|a, b| {
                let ord = json_cmp(a.data.get(field), b.data.get(field));
                match order {
                    Order::Asc => ord,
                    Order::Desc => ord.reverse(),
                }
            });
        }
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}

/// Total order over the JSON values the engine sorts on (strings, numbers).
fn json_cmp(a: Option<&JsonValue>, b: Option<&JsonValue>) -> std::cmp::Ordering {
    match (a, b) {
        (Some(JsonValue::String(x)), Some(JsonValue::String(y))) => x.cmp(y),
        (Some(JsonValue::Number(x)), Some(JsonValue::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(std::cmp::Ordering::Equal),
        (None, None) => std::cmp::Ordering::Equal,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (Some(_), None) => std::cmp::Ordering::Greater,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn key(id: &str) -> DocKey {
        DocKey::new("notifications", id)
    }

    #[tokio::test]
    async fn test_put_bumps_version() {
        let store = MemoryStore::new();
        store
            .batch_write(vec![DocWrite::Put {
                key: key("a"),
                data: json!({"n": 1}),
            }])
            .await
            .unwrap();
        store
            .batch_write(vec![DocWrite::Put {
                key: key("a"),
                data: json!({"n": 2}),
            }])
            .await
            .unwrap();

        let doc = store.get(&key("a")).await.unwrap().unwrap();
        assert_eq!(doc.version, 2);
        assert_eq!(doc.data["n"], 2);
    }

    #[tokio::test]
    async fn test_create_conflict_is_atomic() {
        let store = MemoryStore::new();
        store
            .batch_write(vec![DocWrite::Create {
                key: key("a"),
                data: json!({}),
            }])
            .await
            .unwrap();

        // Second batch: one fresh create, one conflicting. Nothing applies.
        let err = store
            .batch_write(vec![
                DocWrite::Create {
                    key: key("b"),
                    data: json!({}),
                },
                DocWrite::Create {
                    key: key("a"),
                    data: json!({}),
                },
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransientStore(_)));
        assert!(store.get(&key("b")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transact_no_lost_updates() {
        let store = Arc::new(MemoryStore::new());
        store
            .batch_write(vec![DocWrite::Put {
                key: key("counter"),
                data: json!({"n": 0}),
            }])
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let keys = [key("counter")];
                store
                    .transact(&keys, &|view| {
                        let doc = view.get(&key("counter")).expect("seeded");
                        let n = doc.data["n"].as_i64().unwrap();
                        Ok(vec![DocWrite::Put {
                            key: key("counter"),
                            data: json!({"n": n + 1}),
                        }])
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let doc = store.get(&key("counter")).await.unwrap().unwrap();
        assert_eq!(doc.data["n"], 16);
    }

    #[tokio::test]
    async fn test_transact_aborts_without_writing() {
        let store = MemoryStore::new();
        let keys = [key("missing")];
        let err = store
            .transact(&keys, &|view| {
                if view.get(&key("missing")).is_none() {
                    return Err(Error::NotFound("missing".into()));
                }
                Ok(vec![])
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(store.get(&key("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transact_create_checked_against_read_absence() {
        let store = Arc::new(MemoryStore::new());
        // Both tasks read "slot" as absent and try to create it; exactly one
        // body must win, the other retries and sees it existing.
        let mut winners = 0;
        let mut handles = Vec::new();
        for i in 0..2 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let keys = [key("slot")];
                let mut created = false;
                store
                    .transact(&keys, &|view| {
                        if view.get(&key("slot")).is_some() {
                            return Ok(vec![]);
                        }
                        Ok(vec![DocWrite::Create {
                            key: key("slot"),
                            data: json!({"owner": i}),
                        }])
                    })
                    .await
                    .map(|_| {
                        created = true;
                    })
                    .ok();
                created
            }));
        }
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 2); // both commit, but only one created the doc
        assert!(store.get(&key("slot")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_query_filters_order_limit() {
        let store = MemoryStore::new();
        for (id, ward, at) in [
            ("n1", 5, "2026-08-01T09:00:00Z"),
            ("n2", 5, "2026-08-03T09:00:00Z"),
            ("n3", 7, "2026-08-02T09:00:00Z"),
            ("n4", 5, "2026-08-02T09:00:00Z"),
        ] {
            store
                .batch_write(vec![DocWrite::Put {
                    key: key(id),
                    data: json!({"wardNumber": ward, "scheduledAt": at}),
                }])
                .await
                .unwrap();
        }

        let query = Query::collection("notifications")
            .filter("wardNumber", json!(5))
            .order_by("scheduledAt", Order::Desc)
            .limit(2);
        let docs = store.query(&query).await.unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.key.id.as_str()).collect();
        assert_eq!(ids, vec!["n2", "n4"]);
    }
}
