//! Offline reconciliation of the denormalized counters.
//!
//! Counters are maintained by incremental deltas with no periodic
//! recomputation; partial failures can leave drift. These passes recompute
//! from the raw records on demand.

use std::sync::{Arc, Mutex};

use serde_json::json;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::auth::Caller;
use crate::models::notification::{Notification, ResponseStats};
use crate::models::response::{ResponseRecord, ResponseValue};
use crate::models::ward::Ward;
use crate::services::ward_by_number;
use crate::store::{collections, DocWrite, DocumentStore, Query};

pub struct ReconcileService {
    store: Arc<dyn DocumentStore>,
}

impl ReconcileService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Recount yes/no from the stored responses. The `totalCustomers`
    /// snapshot is left untouched; it is a point-in-time denominator, not
    /// a derived value.
    pub async fn recompute_notification(&self, caller: &Caller, id: Uuid) -> Result<ResponseStats> {
        caller.require_admin()?;

        let docs = self
            .store
            .query(
                &Query::collection(collections::RESPONSES)
                    .filter("notificationId", json!(id)),
            )
            .await?;
        let mut yes_count = 0;
        let mut no_count = 0;
        for doc in &docs {
            let record: ResponseRecord = doc.decode()?;
            match record.value {
                ResponseValue::Yes => yes_count += 1,
                ResponseValue::No => no_count += 1,
            }
        }

        let key = Notification::doc_key(id);
        let out: Mutex<Option<ResponseStats>> = Mutex::new(None);
        self.store
            .transact(&[key.clone()], &|view| {
                let mut n: Notification = view
                    .decode(&key)?
                    .ok_or_else(|| Error::NotFound(format!("notification {id}")))?;
                n.response_stats.yes_count = yes_count;
                n.response_stats.no_count = no_count;
                *out.lock().unwrap() = Some(n.response_stats.clone());
                Ok(vec![DocWrite::put(key.clone(), &n)?])
            })
            .await?;

        out.into_inner()
            .unwrap()
            .ok_or_else(|| Error::Internal("reconciliation produced no stats".into()))
    }

    /// Recount a ward's active customers.
    pub async fn recompute_ward(&self, caller: &Caller, number: i64) -> Result<i64> {
        caller.require_admin()?;
        let ward = ward_by_number(self.store.as_ref(), number).await?;

        let docs = self
            .store
            .query(
                &Query::collection(collections::CUSTOMERS)
                    .filter("wardId", json!(ward.id))
                    .filter("isActive", json!(true)),
            )
            .await?;
        let count = docs.len() as i64;

        let key = Ward::doc_key(ward.id);
        self.store
            .transact(&[key.clone()], &|view| {
                let mut ward: Ward = view
                    .decode(&key)?
                    .ok_or_else(|| Error::NotFound(format!("ward {number}")))?;
                if ward.customer_count == count {
                    return Ok(vec![]);
                }
                tracing::info!(
                    ward = number,
                    stored = ward.customer_count,
                    actual = count,
                    "ward count drift corrected"
                );
                ward.customer_count = count;
                Ok(vec![DocWrite::put(key.clone(), &ward)?])
            })
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testutil::{memory_store, seed_customer, seed_ward};
    use chrono::Utc;

    #[tokio::test]
    async fn test_recompute_notification_fixes_drift() {
        let store = memory_store();
        let ward = seed_ward(&store, 5, 10).await;
        let svc = ReconcileService::new(store.clone());
        let admin = Caller::admin("admin-1");

        // A notification whose counters drifted to nonsense.
        let n = Notification {
            id: Uuid::new_v4(),
            ward_id: ward.id,
            ward_number: 5,
            scheduled_at: Utc::now(),
            message_text: crate::models::LocalizedText::new("Pickup this Friday morning", None),
            status: crate::models::notification::NotificationStatus::Sent,
            created_by: "admin-1".into(),
            created_at: Utc::now(),
            sent_at: Some(Utc::now()),
            delivery_id: None,
            fanout_claimed_at: None,
            last_error: None,
            cancelled_at: None,
            rescheduled_to: None,
            parent_notification_id: None,
            is_rescheduled: false,
            reschedule_reason: None,
            response_stats: ResponseStats {
                yes_count: 40,
                no_count: 2,
                total_customers: 10,
            },
        };
        store
            .batch_write(vec![
                DocWrite::create(Notification::doc_key(n.id), &n).unwrap()
            ])
            .await
            .unwrap();

        // Two real yes responses, one no.
        for (i, value) in [ResponseValue::Yes, ResponseValue::Yes, ResponseValue::No]
            .into_iter()
            .enumerate()
        {
            let customer_id = Uuid::new_v4();
            let record = ResponseRecord {
                id: ResponseRecord::composite_id(n.id, customer_id),
                notification_id: n.id,
                customer_id,
                value,
                responded_at: Utc::now() + chrono::Duration::seconds(i as i64),
                updated_at: Utc::now(),
            };
            store
                .batch_write(vec![DocWrite::create(
                    ResponseRecord::doc_key(n.id, customer_id),
                    &record,
                )
                .unwrap()])
                .await
                .unwrap();
        }

        let stats = svc.recompute_notification(&admin, n.id).await.unwrap();
        assert_eq!(stats.yes_count, 2);
        assert_eq!(stats.no_count, 1);
        assert_eq!(stats.total_customers, 10);

        let stored: Notification = store
            .get(&Notification::doc_key(n.id))
            .await
            .unwrap()
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(stored.response_stats.yes_count, 2);
    }

    #[tokio::test]
    async fn test_recompute_ward_counts_active_customers() {
        let store = memory_store();
        let ward = seed_ward(&store, 5, 99).await;
        seed_customer(&store, &ward, None).await;
        seed_customer(&store, &ward, None).await;
        let svc = ReconcileService::new(store.clone());

        let count = svc
            .recompute_ward(&Caller::admin("admin-1"), 5)
            .await
            .unwrap();
        assert_eq!(count, 2);

        let fixed: Ward = store
            .get(&Ward::doc_key(ward.id))
            .await
            .unwrap()
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(fixed.customer_count, 2);
    }
}
