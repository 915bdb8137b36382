//! Postgres-backed [`DocumentStore`].
//!
//! Documents live in a single `documents` table (`collection`, `id`,
//! `version`, `data jsonb`). Transactions take row locks over the read set,
//! re-verify the observed versions, then apply writes; a changed version or a
//! duplicate insert rolls back and retries with a fresh snapshot.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::{Error, Result};
use crate::store::{
    DocKey, DocWrite, Document, DocumentStore, MutateFn, Order, Query, TxnView, MAX_TXN_ATTEMPTS,
};

const UNIQUE_VIOLATION: &str = "23505";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn read_snapshot(
        &self,
        keys: &[DocKey],
    ) -> Result<(HashMap<DocKey, Document>, HashMap<DocKey, Option<u64>>)> {
        let mut snapshot = HashMap::new();
        let mut expected = HashMap::new();
        for key in keys {
            let row: Option<(i64, JsonValue)> = sqlx::query_as(
                "SELECT version, data FROM documents WHERE collection = $1 AND id = $2",
            )
            .bind(key.collection)
            .bind(&key.id)
            .fetch_optional(&self.pool)
            .await?;

            match row {
                Some((version, data)) => {
                    expected.insert(key.clone(), Some(version as u64));
                    snapshot.insert(
                        key.clone(),
                        Document {
                            key: key.clone(),
                            version: version as u64,
                            data,
                        },
                    );
                }
                None => {
                    expected.insert(key.clone(), None);
                }
            }
        }
        Ok((snapshot, expected))
    }

    /// Lock the read set and compare against the snapshot versions.
    /// Returns false when another writer got there first.
    async fn verify_read_set(
        tx: &mut Transaction<'_, Postgres>,
        expected: &HashMap<DocKey, Option<u64>>,
    ) -> Result<bool> {
        for (key, observed) in expected {
            let current: Option<i64> = sqlx::query_scalar(
                "SELECT version FROM documents
                 WHERE collection = $1 AND id = $2
                 FOR UPDATE",
            )
            .bind(key.collection)
            .bind(&key.id)
            .fetch_optional(&mut **tx)
            .await?;

            if current.map(|v| v as u64) != *observed {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Apply one write inside an open transaction. `Ok(false)` signals a
    /// conflict (duplicate create) that should retry the whole transaction.
    async fn apply_write(tx: &mut Transaction<'_, Postgres>, write: &DocWrite) -> Result<bool> {
        let result = match write {
            DocWrite::Put { key, data } => {
                sqlx::query(
                    "INSERT INTO documents (collection, id, version, data)
                     VALUES ($1, $2, 1, $3)
                     ON CONFLICT (collection, id)
                     DO UPDATE SET data = EXCLUDED.data, version = documents.version + 1",
                )
                .bind(key.collection)
                .bind(&key.id)
                .bind(data)
                .execute(&mut **tx)
                .await
            }
            DocWrite::Create { key, data } => {
                sqlx::query(
                    "INSERT INTO documents (collection, id, version, data)
                     VALUES ($1, $2, 1, $3)",
                )
                .bind(key.collection)
                .bind(&key.id)
                .bind(data)
                .execute(&mut **tx)
                .await
            }
            DocWrite::Delete { key } => {
                sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
                    .bind(key.collection)
                    .bind(&key.id)
                    .execute(&mut **tx)
                    .await
            }
        };

        match result {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION))
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn get(&self, key: &DocKey) -> Result<Option<Document>> {
        let row: Option<(i64, JsonValue)> = sqlx::query_as(
            "SELECT version, data FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(key.collection)
        .bind(&key.id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(version, data)| Document {
            key: key.clone(),
            version: version as u64,
            data,
        }))
    }

    async fn transact(&self, keys: &[DocKey], mutate: MutateFn<'_>) -> Result<()> {
        for _ in 0..MAX_TXN_ATTEMPTS {
            let (snapshot, expected) = self.read_snapshot(keys).await?;
            let writes = mutate(&TxnView::new(snapshot))?;

            let mut tx = self.pool.begin().await?;
            if !Self::verify_read_set(&mut tx, &expected).await? {
                tx.rollback().await?;
                continue;
            }

            let mut conflicted = false;
            for write in &writes {
                if !Self::apply_write(&mut tx, write).await? {
                    conflicted = true;
                    break;
                }
            }
            if conflicted {
                tx.rollback().await?;
                continue;
            }

            tx.commit().await?;
            return Ok(());
        }
        Err(Error::TransientStore(format!(
            "transaction retry budget exhausted over {} keys",
            keys.len()
        )))
    }

    async fn batch_write(&self, writes: Vec<DocWrite>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for write in &writes {
            if !Self::apply_write(&mut tx, write).await? {
                tx.rollback().await?;
                return Err(Error::TransientStore(format!(
                    "create conflict for {}",
                    write.key()
                )));
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        let mut sql =
            String::from("SELECT id, version, data FROM documents WHERE collection = $1");
        if !query.filters.is_empty() {
            sql.push_str(" AND data @> $2");
        }
        if let Some((field, order)) = &query.order_by {
            // Field names come from engine code, never from callers.
            let dir = match order {
                Order::Asc => "ASC",
                Order::Desc => "DESC",
            };
            sql.push_str(&format!(" ORDER BY data->'{field}' {dir}"));
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut q = sqlx::query_as::<_, (String, i64, JsonValue)>(&sql).bind(query.collection);
        if !query.filters.is_empty() {
            let containment: serde_json::Map<String, JsonValue> = query
                .filters
                .iter()
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect();
            q = q.bind(JsonValue::Object(containment));
        }

        let rows = q.fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|(id, version, data)| Document {
                key: DocKey::new(query.collection, id),
                version: version as u64,
                data,
            })
            .collect())
    }
}
