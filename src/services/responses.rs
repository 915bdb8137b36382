//! Response aggregation: one yes/no per customer per notification,
//! last-write-wins, counters kept consistent in the same transaction as the
//! response upsert.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::auth::{Caller, Role};
use crate::models::notification::{Notification, NotificationStatus, ResponseStats};
use crate::models::response::{ResponseRecord, ResponseValue};
use crate::services::audit::AuditService;
use crate::services::metrics;
use crate::store::{collections, DocWrite, DocumentStore, Order, Query};

pub struct ResponseService {
    store: Arc<dyn DocumentStore>,
    audit: AuditService,
}

impl ResponseService {
    pub fn new(store: Arc<dyn DocumentStore>, audit: AuditService) -> Self {
        Self { store, audit }
    }

    /// Record a customer's yes/no availability. Re-submission with a
    /// different value moves the counters, never double-counts; with the
    /// same value it only touches `updatedAt`.
    pub async fn submit(
        &self,
        caller: &Caller,
        notification_id: Uuid,
        value: ResponseValue,
    ) -> Result<ResponseRecord> {
        if caller.role != Role::Customer {
            return Err(Error::Permission("customer capability required".into()));
        }
        let customer_id: Uuid = caller
            .subject_id
            .parse()
            .map_err(|_| Error::Permission("caller subject is not a customer id".into()))?;

        let notification_key = Notification::doc_key(notification_id);
        let response_key = ResponseRecord::doc_key(notification_id, customer_id);
        let now = Utc::now();

        let out: Mutex<Option<ResponseRecord>> = Mutex::new(None);
        self.store
            .transact(&[notification_key.clone(), response_key.clone()], &|view| {
                let mut n: Notification = view
                    .decode(&notification_key)?
                    .ok_or_else(|| Error::NotFound(format!("notification {notification_id}")))?;
                if n.status != NotificationStatus::Sent {
                    return Err(Error::InvalidState(format!(
                        "notification is {} and not open for responses",
                        n.status
                    )));
                }
                if now > n.scheduled_at {
                    return Err(Error::InvalidState("response window closed".into()));
                }

                let prior: Option<ResponseRecord> = view.decode(&response_key)?;
                let record = match prior {
                    Some(mut record) => {
                        if record.value != value {
                            decrement(&mut n.response_stats, record.value);
                            increment(&mut n.response_stats, value);
                            record.value = value;
                        }
                        record.updated_at = now;
                        record
                    }
                    None => {
                        increment(&mut n.response_stats, value);
                        ResponseRecord {
                            id: ResponseRecord::composite_id(notification_id, customer_id),
                            notification_id,
                            customer_id,
                            value,
                            responded_at: now,
                            updated_at: now,
                        }
                    }
                };

                let writes = vec![
                    DocWrite::put(notification_key.clone(), &n)?,
                    DocWrite::put(response_key.clone(), &record)?,
                ];
                *out.lock().unwrap() = Some(record);
                Ok(writes)
            })
            .await?;

        let record = out
            .into_inner()
            .unwrap()
            .ok_or_else(|| Error::Internal("submit produced no record".into()))?;
        metrics::RESPONSES_COUNTER
            .with_label_values(&[&record.value.to_string()])
            .inc();
        Ok(record)
    }

    /// Administrative correction: remove a customer's response and roll its
    /// counter back. A no-op when the response is already absent.
    pub async fn on_response_deleted(
        &self,
        caller: &Caller,
        notification_id: Uuid,
        customer_id: Uuid,
    ) -> Result<()> {
        caller.require_admin()?;

        let notification_key = Notification::doc_key(notification_id);
        let response_key = ResponseRecord::doc_key(notification_id, customer_id);

        self.store
            .transact(&[notification_key.clone(), response_key.clone()], &|view| {
                let mut n: Notification = view
                    .decode(&notification_key)?
                    .ok_or_else(|| Error::NotFound(format!("notification {notification_id}")))?;
                let Some(record): Option<ResponseRecord> = view.decode(&response_key)? else {
                    return Ok(vec![]);
                };
                decrement(&mut n.response_stats, record.value);
                Ok(vec![
                    DocWrite::put(notification_key.clone(), &n)?,
                    DocWrite::delete(response_key.clone()),
                ])
            })
            .await?;

        self.audit.record(
            caller,
            "response.delete",
            "response",
            ResponseRecord::composite_id(notification_id, customer_id),
            None,
        );
        Ok(())
    }

    /// All responses for one notification, oldest first.
    pub async fn list(&self, caller: &Caller, notification_id: Uuid) -> Result<Vec<ResponseRecord>> {
        caller.require_admin()?;
        let docs = self
            .store
            .query(
                &Query::collection(collections::RESPONSES)
                    .filter("notificationId", json!(notification_id))
                    .order_by("respondedAt", Order::Asc),
            )
            .await?;
        docs.iter().map(|doc| doc.decode()).collect()
    }
}

fn increment(stats: &mut ResponseStats, value: ResponseValue) {
    match value {
        ResponseValue::Yes => stats.yes_count += 1,
        ResponseValue::No => stats.no_count += 1,
    }
}

/// Clamped at zero: a duplicate or out-of-order decrement must never drive a
/// counter negative.
fn decrement(stats: &mut ResponseStats, value: ResponseValue) {
    match value {
        ResponseValue::Yes => stats.yes_count = (stats.yes_count - 1).max(0),
        ResponseValue::No => stats.no_count = (stats.no_count - 1).max(0),
    }
}
