//! Topic membership: keeps a customer's push subscription aligned with their
//! ward and propagates ward-count deltas.
//!
//! Counter maintenance is transactional: ward counts are response-rate
//! denominators and must never drift permanently. Topic (un)subscription is
//! best-effort against a non-transactional push service: a missed
//! unsubscribe means at most one stale notification, a missed subscribe is
//! surfaced as a warning so the resident can re-register their token.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::auth::Caller;
use crate::models::customer::{Customer, RegisterCustomerRequest};
use crate::models::ward::{ward_number_in_range, Ward, WARD_NUMBER_MAX, WARD_NUMBER_MIN};
use crate::services::audit::AuditService;
use crate::services::push::PushFanout;
use crate::services::{metrics, ward_by_number};
use crate::store::{collections, DocWrite, DocumentStore, Query};

/// Result of a membership mutation. `warning` is set when a best-effort push
/// side effect did not complete; the state change itself succeeded.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipOutcome {
    pub customer: Customer,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

pub struct MembershipService {
    store: Arc<dyn DocumentStore>,
    push: Arc<dyn PushFanout>,
    audit: AuditService,
}

impl MembershipService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        push: Arc<dyn PushFanout>,
        audit: AuditService,
    ) -> Self {
        Self { store, push, audit }
    }

    /// First-authentication registration. The authenticated subject becomes
    /// the customer id; the ward's customer count moves in the same
    /// transaction that creates the record.
    pub async fn register(
        &self,
        caller: &Caller,
        req: &RegisterCustomerRequest,
    ) -> Result<MembershipOutcome> {
        let customer_id: Uuid = caller
            .subject_id
            .parse()
            .map_err(|_| Error::Permission("caller subject is not a customer id".into()))?;
        caller.require_customer_self(customer_id)?;

        if req.phone_identity.trim().is_empty() {
            return Err(Error::Validation("phoneIdentity is required".into()));
        }
        if req.name.trim().is_empty() {
            return Err(Error::Validation("name is required".into()));
        }
        if !ward_number_in_range(req.ward_number) {
            return Err(Error::Validation(format!(
                "wardNumber must be between {WARD_NUMBER_MIN} and {WARD_NUMBER_MAX}"
            )));
        }

        // Best-effort uniqueness check; the store has no secondary unique
        // indexes, so a racing duplicate is possible and tolerated.
        let existing = self
            .store
            .query(
                &Query::collection(collections::CUSTOMERS)
                    .filter("phoneIdentity", json!(req.phone_identity.trim()))
                    .limit(1),
            )
            .await?;
        if !existing.is_empty() {
            return Err(Error::Validation(
                "phoneIdentity is already registered".into(),
            ));
        }

        let ward = ward_by_number(self.store.as_ref(), req.ward_number).await?;

        let customer_key = Customer::doc_key(customer_id);
        let ward_key = Ward::doc_key(ward.id);
        let now = Utc::now();

        let out: Mutex<Option<Customer>> = Mutex::new(None);
        self.store
            .transact(&[customer_key.clone(), ward_key.clone()], &|view| {
                if view.get(&customer_key).is_some() {
                    return Err(Error::InvalidState("customer already registered".into()));
                }
                let mut ward: Ward = view
                    .decode(&ward_key)?
                    .ok_or_else(|| Error::NotFound(format!("ward {}", req.ward_number)))?;
                ward.customer_count += 1;

                let customer = Customer {
                    id: customer_id,
                    phone_identity: req.phone_identity.trim().to_string(),
                    name: req.name.trim().to_string(),
                    ward_id: ward.id,
                    ward_number: ward.number,
                    device_token: req.device_token.clone(),
                    language_pref: req.language_pref.clone().unwrap_or_else(|| "en".into()),
                    is_active: true,
                    created_at: now,
                    updated_at: now,
                };

                let writes = vec![
                    DocWrite::create(customer_key.clone(), &customer)?,
                    DocWrite::put(ward_key.clone(), &ward)?,
                ];
                *out.lock().unwrap() = Some(customer);
                Ok(writes)
            })
            .await?;

        let customer = out
            .into_inner()
            .unwrap()
            .ok_or_else(|| Error::Internal("registration produced no customer".into()))?;

        let mut warning = None;
        if let Some(token) = &customer.device_token {
            let topic = Ward::topic(customer.ward_number);
            if let Err(e) = self.push.subscribe(token, &topic).await {
                tracing::warn!(customer = %customer.id, %topic, "topic subscribe failed: {e}");
                warning = Some("push subscription failed; re-register the device token".into());
            }
        }

        self.audit.record(
            caller,
            "customer.register",
            "customer",
            customer.id,
            Some(format!("ward {}", customer.ward_number)),
        );
        Ok(MembershipOutcome { customer, warning })
    }

    /// Move a customer to another ward. The `wardId` flip and both counter
    /// deltas commit in one transaction, pre-checked against the current
    /// ward so a replayed event cannot double-apply the delta. Topic
    /// resubscription follows, best-effort.
    pub async fn change_ward(
        &self,
        caller: &Caller,
        customer_id: Uuid,
        new_ward_number: i64,
    ) -> Result<MembershipOutcome> {
        caller.require_customer_self(customer_id)?;
        if !ward_number_in_range(new_ward_number) {
            return Err(Error::Validation(format!(
                "wardNumber must be between {WARD_NUMBER_MIN} and {WARD_NUMBER_MAX}"
            )));
        }

        let customer_key = Customer::doc_key(customer_id);
        let before: Customer = self
            .store
            .get(&customer_key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("customer {customer_id}")))?
            .decode()?;

        let new_ward = ward_by_number(self.store.as_ref(), new_ward_number).await?;
        let old_ward_id = before.ward_id;
        let old_ward_number = before.ward_number;

        if old_ward_id == new_ward.id {
            // Replay or no-op change: no counter delta, but still make sure
            // the topic subscription exists.
            let warning = self
                .ensure_subscribed(&before, Ward::topic(new_ward.number))
                .await;
            return Ok(MembershipOutcome {
                customer: before,
                warning,
            });
        }

        let old_ward_key = Ward::doc_key(old_ward_id);
        let new_ward_key = Ward::doc_key(new_ward.id);
        let now = Utc::now();

        let out: Mutex<Option<(Customer, bool)>> = Mutex::new(None);
        self.store
            .transact(
                &[
                    customer_key.clone(),
                    old_ward_key.clone(),
                    new_ward_key.clone(),
                ],
                &|view| {
                    let mut customer: Customer = view
                        .decode(&customer_key)?
                        .ok_or_else(|| Error::NotFound(format!("customer {customer_id}")))?;

                    if customer.ward_id == new_ward.id {
                        // Another delivery of the same change beat us here.
                        *out.lock().unwrap() = Some((customer, false));
                        return Ok(vec![]);
                    }
                    if customer.ward_id != old_ward_id {
                        return Err(Error::TransientStore(
                            "ward assignment changed concurrently".into(),
                        ));
                    }

                    let mut old_ward: Ward = view
                        .decode(&old_ward_key)?
                        .ok_or_else(|| Error::NotFound(format!("ward {old_ward_number}")))?;
                    let mut target: Ward = view
                        .decode(&new_ward_key)?
                        .ok_or_else(|| Error::NotFound(format!("ward {new_ward_number}")))?;

                    old_ward.customer_count = (old_ward.customer_count - 1).max(0);
                    target.customer_count += 1;
                    customer.ward_id = target.id;
                    customer.ward_number = target.number;
                    customer.updated_at = now;

                    let writes = vec![
                        DocWrite::put(customer_key.clone(), &customer)?,
                        DocWrite::put(old_ward_key.clone(), &old_ward)?,
                        DocWrite::put(new_ward_key.clone(), &target)?,
                    ];
                    *out.lock().unwrap() = Some((customer, true));
                    Ok(writes)
                },
            )
            .await?;

        let (customer, moved) = out
            .into_inner()
            .unwrap()
            .ok_or_else(|| Error::Internal("ward change produced no customer".into()))?;

        let mut warning = None;
        if let Some(token) = &customer.device_token {
            if moved {
                let old_topic = Ward::topic(old_ward_number);
                if let Err(e) = self.push.unsubscribe(token, &old_topic).await {
                    // Tolerated: at most one stale notification.
                    tracing::warn!(customer = %customer.id, %old_topic, "topic unsubscribe failed: {e}");
                }
            }
            let new_topic = Ward::topic(customer.ward_number);
            if let Err(e) = self.push.subscribe(token, &new_topic).await {
                tracing::warn!(customer = %customer.id, %new_topic, "topic subscribe failed: {e}");
                warning =
                    Some("push subscription for the new ward failed; re-register the device token".into());
            }
        }

        metrics::WARD_CHANGES_COUNTER
            .with_label_values(&[if warning.is_none() { "ok" } else { "partial" }])
            .inc();
        self.audit.record(
            caller,
            "customer.ward_change",
            "customer",
            customer.id,
            Some(format!("ward {old_ward_number} -> {}", customer.ward_number)),
        );
        Ok(MembershipOutcome { customer, warning })
    }

    /// Swap the stored device token: old token leaves the ward topic, new
    /// token joins it. The token is persisted even when the subscribe fails,
    /// so a later resubscribe can recover.
    pub async fn refresh_token(
        &self,
        caller: &Caller,
        customer_id: Uuid,
        new_token: &str,
    ) -> Result<MembershipOutcome> {
        caller.require_customer_self(customer_id)?;
        let new_token = new_token.trim();
        if new_token.is_empty() {
            return Err(Error::Validation("deviceToken is required".into()));
        }

        let customer_key = Customer::doc_key(customer_id);
        let before: Customer = self
            .store
            .get(&customer_key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("customer {customer_id}")))?
            .decode()?;

        let topic = Ward::topic(before.ward_number);
        if let Some(old_token) = before.device_token.as_deref() {
            if old_token != new_token {
                if let Err(e) = self.push.unsubscribe(old_token, &topic).await {
                    tracing::warn!(customer = %customer_id, %topic, "old token unsubscribe failed: {e}");
                }
            }
        }

        let mut warning = None;
        if let Err(e) = self.push.subscribe(new_token, &topic).await {
            tracing::warn!(customer = %customer_id, %topic, "new token subscribe failed: {e}");
            warning = Some("push subscription failed; re-register the device token".into());
        }

        let now = Utc::now();
        let out: Mutex<Option<Customer>> = Mutex::new(None);
        self.store
            .transact(&[customer_key.clone()], &|view| {
                let mut customer: Customer = view
                    .decode(&customer_key)?
                    .ok_or_else(|| Error::NotFound(format!("customer {customer_id}")))?;
                customer.device_token = Some(new_token.to_string());
                customer.updated_at = now;
                let write = DocWrite::put(customer_key.clone(), &customer)?;
                *out.lock().unwrap() = Some(customer);
                Ok(vec![write])
            })
            .await?;

        let customer = out
            .into_inner()
            .unwrap()
            .ok_or_else(|| Error::Internal("token refresh produced no customer".into()))?;
        Ok(MembershipOutcome { customer, warning })
    }

    pub async fn get(&self, caller: &Caller, customer_id: Uuid) -> Result<Customer> {
        if caller.require_admin().is_err() {
            caller.require_customer_self(customer_id)?;
        }
        self.store
            .get(&Customer::doc_key(customer_id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("customer {customer_id}")))?
            .decode()
    }

    async fn ensure_subscribed(&self, customer: &Customer, topic: String) -> Option<String> {
        let token = customer.device_token.as_deref()?;
        match self.push.subscribe(token, &topic).await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(customer = %customer.id, %topic, "topic subscribe failed: {e}");
                Some("push subscription failed; re-register the device token".into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::push::fake::FakeFanout;
    use crate::services::testutil::{memory_store, seed_customer, seed_ward};
    use crate::store::memory::MemoryStore;
    use std::sync::atomic::Ordering as AtomicOrdering;

    fn service(store: &Arc<MemoryStore>, push: &Arc<FakeFanout>) -> MembershipService {
        MembershipService::new(store.clone(), push.clone(), AuditService::new(store.clone()))
    }

    async fn ward_count(store: &Arc<MemoryStore>, ward: &Ward) -> i64 {
        let w: Ward = store
            .get(&Ward::doc_key(ward.id))
            .await
            .unwrap()
            .unwrap()
            .decode()
            .unwrap();
        w.customer_count
    }

    #[tokio::test]
    async fn test_register_creates_customer_and_bumps_ward() {
        let store = memory_store();
        let push = Arc::new(FakeFanout::new());
        let ward = seed_ward(&store, 5, 244).await;
        let svc = service(&store, &push);

        let id = Uuid::new_v4();
        let outcome = svc
            .register(
                &Caller::customer(id),
                &RegisterCustomerRequest {
                    phone_identity: "+15145550001".into(),
                    name: "A. Resident".into(),
                    ward_number: 5,
                    device_token: Some("token-a".into()),
                    language_pref: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.customer.id, id);
        assert_eq!(outcome.customer.ward_number, 5);
        assert!(outcome.warning.is_none());
        assert_eq!(ward_count(&store, &ward).await, 245);
        assert_eq!(push.topics_for("token-a"), vec!["ward-5".to_string()]);
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_phone() {
        let store = memory_store();
        let push = Arc::new(FakeFanout::new());
        let ward = seed_ward(&store, 5, 0).await;
        let existing = seed_customer(&store, &ward, None).await;
        let svc = service(&store, &push);

        let err = svc
            .register(
                &Caller::customer(Uuid::new_v4()),
                &RegisterCustomerRequest {
                    phone_identity: existing.phone_identity.clone(),
                    name: "B. Resident".into(),
                    ward_number: 5,
                    device_token: None,
                    language_pref: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_change_ward_moves_counters_and_topics() {
        let store = memory_store();
        let push = Arc::new(FakeFanout::new());
        let ward5 = seed_ward(&store, 5, 10).await;
        let ward7 = seed_ward(&store, 7, 3).await;
        let customer = seed_customer(&store, &ward5, Some("token-a")).await;
        push.subscribe("token-a", "ward-5").await.unwrap();
        let svc = service(&store, &push);

        let outcome = svc
            .change_ward(&Caller::customer(customer.id), customer.id, 7)
            .await
            .unwrap();
        assert_eq!(outcome.customer.ward_number, 7);
        assert!(outcome.warning.is_none());
        assert_eq!(ward_count(&store, &ward5).await, 9);
        assert_eq!(ward_count(&store, &ward7).await, 4);
        assert_eq!(push.topics_for("token-a"), vec!["ward-7".to_string()]);
    }

    #[tokio::test]
    async fn test_change_ward_replay_applies_delta_once() {
        let store = memory_store();
        let push = Arc::new(FakeFanout::new());
        let ward5 = seed_ward(&store, 5, 10).await;
        let ward7 = seed_ward(&store, 7, 3).await;
        let customer = seed_customer(&store, &ward5, None).await;
        let svc = service(&store, &push);

        let caller = Caller::customer(customer.id);
        svc.change_ward(&caller, customer.id, 7).await.unwrap();
        // At-least-once trigger delivery: the same change arrives again.
        svc.change_ward(&caller, customer.id, 7).await.unwrap();

        assert_eq!(ward_count(&store, &ward5).await, 9);
        assert_eq!(ward_count(&store, &ward7).await, 4);
    }

    #[tokio::test]
    async fn test_change_ward_subscribe_failure_is_partial() {
        let store = memory_store();
        let push = Arc::new(FakeFanout::new());
        let ward5 = seed_ward(&store, 5, 10).await;
        let ward7 = seed_ward(&store, 7, 3).await;
        let customer = seed_customer(&store, &ward5, Some("token-a")).await;
        let svc = service(&store, &push);

        push.fail_subscribe.store(true, AtomicOrdering::SeqCst);
        let outcome = svc
            .change_ward(&Caller::customer(customer.id), customer.id, 7)
            .await
            .unwrap();

        // The ward change itself stands; the caller gets a warning.
        assert!(outcome.warning.is_some());
        assert_eq!(outcome.customer.ward_number, 7);
        assert_eq!(ward_count(&store, &ward5).await, 9);
        assert_eq!(ward_count(&store, &ward7).await, 4);
    }

    #[tokio::test]
    async fn test_change_ward_unsubscribe_failure_is_swallowed() {
        let store = memory_store();
        let push = Arc::new(FakeFanout::new());
        let ward5 = seed_ward(&store, 5, 10).await;
        let _ward7 = seed_ward(&store, 7, 3).await;
        let customer = seed_customer(&store, &ward5, Some("token-a")).await;
        let svc = service(&store, &push);

        push.fail_unsubscribe.store(true, AtomicOrdering::SeqCst);
        let outcome = svc
            .change_ward(&Caller::customer(customer.id), customer.id, 7)
            .await
            .unwrap();
        assert!(outcome.warning.is_none());
        assert_eq!(outcome.customer.ward_number, 7);
    }

    #[tokio::test]
    async fn test_change_ward_requires_own_record() {
        let store = memory_store();
        let push = Arc::new(FakeFanout::new());
        let ward5 = seed_ward(&store, 5, 10).await;
        seed_ward(&store, 7, 3).await;
        let customer = seed_customer(&store, &ward5, None).await;
        let svc = service(&store, &push);

        let someone_else = Caller::customer(Uuid::new_v4());
        assert!(matches!(
            svc.change_ward(&someone_else, customer.id, 7)
                .await
                .unwrap_err(),
            Error::Permission(_)
        ));
    }

    #[tokio::test]
    async fn test_refresh_token_persists_despite_subscribe_failure() {
        let store = memory_store();
        let push = Arc::new(FakeFanout::new());
        let ward5 = seed_ward(&store, 5, 10).await;
        let customer = seed_customer(&store, &ward5, Some("token-old")).await;
        push.subscribe("token-old", "ward-5").await.unwrap();
        let svc = service(&store, &push);

        push.fail_subscribe.store(true, AtomicOrdering::SeqCst);
        let outcome = svc
            .refresh_token(&Caller::customer(customer.id), customer.id, "token-new")
            .await
            .unwrap();

        assert!(outcome.warning.is_some());
        assert_eq!(outcome.customer.device_token.as_deref(), Some("token-new"));
        // Old token left the topic even though the new subscribe failed.
        assert!(push.topics_for("token-old").is_empty());
    }

    #[tokio::test]
    async fn test_refresh_token_swaps_topic_membership() {
        let store = memory_store();
        let push = Arc::new(FakeFanout::new());
        let ward5 = seed_ward(&store, 5, 10).await;
        let customer = seed_customer(&store, &ward5, Some("token-old")).await;
        push.subscribe("token-old", "ward-5").await.unwrap();
        let svc = service(&store, &push);

        let outcome = svc
            .refresh_token(&Caller::customer(customer.id), customer.id, "token-new")
            .await
            .unwrap();
        assert!(outcome.warning.is_none());
        assert!(push.topics_for("token-old").is_empty());
        assert_eq!(push.topics_for("token-new"), vec!["ward-5".to_string()]);
    }
}
