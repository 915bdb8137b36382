//! Notification lifecycle: creation, fanout dispatch, rescheduling,
//! cancellation.
//!
//! State machine (terminal states in brackets):
//!
//! ```text
//! scheduled --(fanout ok)--> sent --(admin cancel)--> [cancelled]
//! scheduled --(fanout err)--> [failed]
//! scheduled --(admin cancel)--> [cancelled]
//! sent --(external completion)--> [completed]
//! sent --(reschedule)--> [cancelled]  (+ new scheduled notification)
//! ```

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::auth::Caller;
use crate::models::notification::{
    CreateNotificationRequest, ListNotificationsQuery, Notification, NotificationStatus,
    RescheduleRequest, ResponseStats,
};
use crate::models::ward::{ward_number_in_range, Ward, WARD_NUMBER_MAX, WARD_NUMBER_MIN};
use crate::models::LocalizedText;
use crate::services::audit::AuditService;
use crate::services::push::{PushFanout, TopicMessage};
use crate::services::{metrics, ward_by_number};
use crate::store::{collections, DocWrite, DocumentStore, Order, Query};

const MIN_MESSAGE_CHARS: usize = 10;
const DEFAULT_LIST_LIMIT: usize = 50;

/// A fanout claim older than this is considered abandoned (crash between
/// claim and finalize) and may be taken over by a re-dispatch.
const FANOUT_CLAIM_TTL_SECS: i64 = 120;

/// Result of running the post-commit fanout reaction.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Sent { delivery_id: String },
    Failed { error: String },
    Skipped { reason: String },
}

enum Claim {
    Claimed(Notification),
    Skipped(String),
}

pub struct NotificationService {
    store: Arc<dyn DocumentStore>,
    push: Arc<dyn PushFanout>,
    audit: AuditService,
}

impl NotificationService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        push: Arc<dyn PushFanout>,
        audit: AuditService,
    ) -> Self {
        Self { store, push, audit }
    }

    /// Create a notification in `scheduled` state with a fresh snapshot of
    /// the ward's customer count. The fanout itself runs in the post-commit
    /// [`Self::on_created`] reaction.
    pub async fn create(
        &self,
        caller: &Caller,
        req: &CreateNotificationRequest,
    ) -> Result<Notification> {
        caller.require_admin()?;
        if !ward_number_in_range(req.ward_number) {
            return Err(Error::Validation(format!(
                "wardNumber must be between {WARD_NUMBER_MIN} and {WARD_NUMBER_MAX}"
            )));
        }
        let message_text = validate_message(&req.message_text, req.message_text_alt.clone())?;
        let scheduled_at = parse_scheduled_at(&req.scheduled_at)?;

        let ward = ward_by_number(self.store.as_ref(), req.ward_number).await?;

        let notification = Notification {
            id: Uuid::new_v4(),
            ward_id: ward.id,
            ward_number: ward.number,
            scheduled_at,
            message_text,
            status: NotificationStatus::Scheduled,
            created_by: caller.subject_id.clone(),
            created_at: Utc::now(),
            sent_at: None,
            delivery_id: None,
            fanout_claimed_at: None,
            last_error: None,
            cancelled_at: None,
            rescheduled_to: None,
            parent_notification_id: None,
            is_rescheduled: false,
            reschedule_reason: None,
            response_stats: ResponseStats {
                yes_count: 0,
                no_count: 0,
                total_customers: ward.customer_count,
            },
        };

        self.store
            .batch_write(vec![DocWrite::create(
                Notification::doc_key(notification.id),
                &notification,
            )?])
            .await?;

        metrics::NOTIFICATIONS_CREATED
            .with_label_values(&[&ward.number.to_string()])
            .inc();
        self.audit.record(
            caller,
            "notification.create",
            "notification",
            notification.id,
            Some(format!(
                "ward {} at {}",
                ward.number, notification.scheduled_at
            )),
        );
        Ok(notification)
    }

    /// Post-commit fanout reaction. Triggered after create/reschedule and by
    /// the admin dispatch route; delivery of the trigger is at-least-once, so
    /// every path here must be idempotent. A claim token stamped before push
    /// I/O keeps duplicate deliveries from double-sending; a claim older than
    /// the TTL is treated as abandoned and taken over.
    pub async fn on_created(&self, id: Uuid) -> Result<DispatchOutcome> {
        let key = Notification::doc_key(id);
        let now = Utc::now();

        let claim: Mutex<Option<Claim>> = Mutex::new(None);
        self.store
            .transact(&[key.clone()], &|view| {
                let mut n: Notification = view
                    .decode(&key)?
                    .ok_or_else(|| Error::NotFound(format!("notification {id}")))?;
                if n.status != NotificationStatus::Scheduled {
                    *claim.lock().unwrap() = Some(Claim::Skipped(format!(
                        "notification is {}, nothing to dispatch",
                        n.status
                    )));
                    return Ok(vec![]);
                }
                if let Some(at) = n.fanout_claimed_at {
                    if now - at < Duration::seconds(FANOUT_CLAIM_TTL_SECS) {
                        *claim.lock().unwrap() =
                            Some(Claim::Skipped("fanout already in flight".to_string()));
                        return Ok(vec![]);
                    }
                }
                n.fanout_claimed_at = Some(now);
                let write = DocWrite::put(key.clone(), &n)?;
                *claim.lock().unwrap() = Some(Claim::Claimed(n));
                Ok(vec![write])
            })
            .await?;

        let notification = match claim.into_inner().unwrap() {
            Some(Claim::Claimed(n)) => n,
            Some(Claim::Skipped(reason)) => {
                tracing::debug!(%id, %reason, "dispatch skipped");
                return Ok(DispatchOutcome::Skipped { reason });
            }
            None => return Err(Error::Internal("dispatch claim produced no state".into())),
        };

        // Live ward count at send time covers membership drift between
        // create and send.
        let ward: Option<Ward> = match self.store.get(&Ward::doc_key(notification.ward_id)).await? {
            Some(doc) => Some(doc.decode()?),
            None => None,
        };

        let send_result = match &ward {
            Some(ward) => {
                let message = pickup_scheduled_message(&notification);
                self.push
                    .send_to_topic(&Ward::topic(ward.number), &message)
                    .await
            }
            None => Err(Error::Internal(format!(
                "ward {} missing for notification {id}",
                notification.ward_id
            ))),
        };

        match send_result {
            Ok(delivery_id) => {
                let total = ward.as_ref().map(|w| w.customer_count).unwrap_or_default();
                self.store
                    .transact(&[key.clone()], &|view| {
                        let Some(mut n): Option<Notification> = view.decode(&key)? else {
                            return Ok(vec![]);
                        };
                        if n.status != NotificationStatus::Scheduled {
                            return Ok(vec![]);
                        }
                        n.status = NotificationStatus::Sent;
                        n.sent_at = Some(now);
                        n.delivery_id = Some(delivery_id.clone());
                        n.response_stats.total_customers = total;
                        Ok(vec![DocWrite::put(key.clone(), &n)?])
                    })
                    .await?;
                metrics::FANOUT_COUNTER
                    .with_label_values(&["scheduled", "ok"])
                    .inc();
                tracing::info!(%id, %delivery_id, "notification fanout delivered");
                Ok(DispatchOutcome::Sent { delivery_id })
            }
            Err(e) => {
                // No automatic retry: the notification lands in `failed`
                // and an admin creates a new one.
                let error = e.to_string();
                self.store
                    .transact(&[key.clone()], &|view| {
                        let Some(mut n): Option<Notification> = view.decode(&key)? else {
                            return Ok(vec![]);
                        };
                        if n.status != NotificationStatus::Scheduled {
                            return Ok(vec![]);
                        }
                        n.status = NotificationStatus::Failed;
                        n.last_error = Some(error.clone());
                        Ok(vec![DocWrite::put(key.clone(), &n)?])
                    })
                    .await?;
                metrics::FANOUT_COUNTER
                    .with_label_values(&["scheduled", "error"])
                    .inc();
                tracing::warn!(%id, %error, "notification fanout failed");
                Ok(DispatchOutcome::Failed { error })
            }
        }
    }

    /// Cancel the original and create its replacement in one atomic unit.
    /// Never leaves a cancelled original without a linked replacement.
    pub async fn reschedule(
        &self,
        caller: &Caller,
        original_id: Uuid,
        req: &RescheduleRequest,
    ) -> Result<Notification> {
        caller.require_admin()?;
        let scheduled_at = parse_scheduled_at(&req.scheduled_at)?;

        let original_key = Notification::doc_key(original_id);
        let original: Notification = self
            .store
            .get(&original_key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("notification {original_id}")))?
            .decode()?;

        let message_text = match &req.message_text {
            Some(text) => validate_message(text, req.message_text_alt.clone())?,
            None => default_reschedule_message(original.ward_number, scheduled_at),
        };

        let ward: Ward = self
            .store
            .get(&Ward::doc_key(original.ward_id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("ward {}", original.ward_number)))?
            .decode()?;

        let now = Utc::now();
        let out: Mutex<Option<Notification>> = Mutex::new(None);
        self.store
            .transact(&[original_key.clone()], &|view| {
                let mut original: Notification = view
                    .decode(&original_key)?
                    .ok_or_else(|| Error::NotFound(format!("notification {original_id}")))?;
                match original.status {
                    NotificationStatus::Scheduled | NotificationStatus::Sent => {}
                    NotificationStatus::Cancelled => {
                        return Err(Error::InvalidState(
                            "notification is already cancelled".into(),
                        ))
                    }
                    NotificationStatus::Completed => {
                        return Err(Error::InvalidState(
                            "cannot reschedule a completed pickup".into(),
                        ))
                    }
                    NotificationStatus::Failed => {
                        return Err(Error::InvalidState(
                            "cannot reschedule a failed notification; create a new one".into(),
                        ))
                    }
                }

                let replacement = Notification {
                    id: Uuid::new_v4(),
                    ward_id: original.ward_id,
                    ward_number: original.ward_number,
                    scheduled_at,
                    message_text: message_text.clone(),
                    status: NotificationStatus::Scheduled,
                    created_by: caller.subject_id.clone(),
                    created_at: now,
                    sent_at: None,
                    delivery_id: None,
                    fanout_claimed_at: None,
                    last_error: None,
                    cancelled_at: None,
                    rescheduled_to: None,
                    parent_notification_id: Some(original_id),
                    is_rescheduled: true,
                    reschedule_reason: req.reason.clone(),
                    response_stats: ResponseStats {
                        yes_count: 0,
                        no_count: 0,
                        total_customers: ward.customer_count,
                    },
                };

                original.status = NotificationStatus::Cancelled;
                original.cancelled_at = Some(now);
                original.rescheduled_to = Some(replacement.id);

                let writes = vec![
                    DocWrite::put(original_key.clone(), &original)?,
                    DocWrite::create(Notification::doc_key(replacement.id), &replacement)?,
                ];
                *out.lock().unwrap() = Some(replacement);
                Ok(writes)
            })
            .await?;

        let replacement = out
            .into_inner()
            .unwrap()
            .ok_or_else(|| Error::Internal("reschedule produced no replacement".into()))?;

        metrics::NOTIFICATIONS_CREATED
            .with_label_values(&[&replacement.ward_number.to_string()])
            .inc();
        self.audit.record(
            caller,
            "notification.reschedule",
            "notification",
            original_id,
            Some(format!(
                "replaced by {} at {}",
                replacement.id, replacement.scheduled_at
            )),
        );
        Ok(replacement)
    }

    /// Direct cancellation without a replacement. Idempotent: cancelling an
    /// already-cancelled notification is a no-op.
    pub async fn cancel(&self, caller: &Caller, id: Uuid) -> Result<Notification> {
        caller.require_admin()?;
        let key = Notification::doc_key(id);
        let now = Utc::now();

        let out: Mutex<Option<(Notification, bool)>> = Mutex::new(None);
        self.store
            .transact(&[key.clone()], &|view| {
                let mut n: Notification = view
                    .decode(&key)?
                    .ok_or_else(|| Error::NotFound(format!("notification {id}")))?;
                match n.status {
                    NotificationStatus::Cancelled => {
                        *out.lock().unwrap() = Some((n, false));
                        Ok(vec![])
                    }
                    NotificationStatus::Scheduled | NotificationStatus::Sent => {
                        n.status = NotificationStatus::Cancelled;
                        n.cancelled_at = Some(now);
                        let write = DocWrite::put(key.clone(), &n)?;
                        *out.lock().unwrap() = Some((n, true));
                        Ok(vec![write])
                    }
                    NotificationStatus::Completed | NotificationStatus::Failed => {
                        Err(Error::InvalidState(format!(
                            "cannot cancel a {} notification",
                            n.status
                        )))
                    }
                }
            })
            .await?;

        let (notification, transitioned) = out
            .into_inner()
            .unwrap()
            .ok_or_else(|| Error::Internal("cancel produced no state".into()))?;

        if transitioned {
            // Best-effort "pickup cancelled" fanout; a delivery failure is a
            // partial failure, the cancellation itself stands.
            let message = pickup_cancelled_message(&notification);
            match self
                .push
                .send_to_topic(&Ward::topic(notification.ward_number), &message)
                .await
            {
                Ok(_) => {
                    metrics::FANOUT_COUNTER
                        .with_label_values(&["cancelled", "ok"])
                        .inc();
                }
                Err(e) => {
                    metrics::FANOUT_COUNTER
                        .with_label_values(&["cancelled", "error"])
                        .inc();
                    tracing::warn!(%id, "cancellation fanout failed: {e}");
                }
            }
            self.audit
                .record(caller, "notification.cancel", "notification", id, None);
        }
        Ok(notification)
    }

    pub async fn get(&self, id: Uuid) -> Result<Notification> {
        self.store
            .get(&Notification::doc_key(id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("notification {id}")))?
            .decode()
    }

    /// Newest-first listing for the admin console.
    pub async fn list(&self, filter: &ListNotificationsQuery) -> Result<Vec<Notification>> {
        let mut query = Query::collection(collections::NOTIFICATIONS)
            .order_by("createdAt", Order::Desc)
            .limit(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT));
        if let Some(ward_number) = filter.ward_number {
            query = query.filter("wardNumber", json!(ward_number));
        }
        if let Some(status) = &filter.status {
            let status: NotificationStatus = status.parse()?;
            query = query.filter("status", json!(status));
        }

        let docs = self.store.query(&query).await?;
        docs.iter().map(|doc| doc.decode()).collect()
    }
}

fn validate_message(text: &str, alt: Option<String>) -> Result<LocalizedText> {
    if text.trim().chars().count() < MIN_MESSAGE_CHARS {
        return Err(Error::Validation(format!(
            "messageText must be at least {MIN_MESSAGE_CHARS} characters"
        )));
    }
    Ok(LocalizedText::new(text.trim(), alt))
}

fn parse_scheduled_at(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| Error::Validation(format!("scheduledAt is not a valid date-time: {raw}")))
}

fn default_reschedule_message(ward_number: i64, scheduled_at: DateTime<Utc>) -> LocalizedText {
    let when = scheduled_at.format("%Y-%m-%d %H:%M");
    LocalizedText::new(
        format!("Waste pickup for ward {ward_number} has been rescheduled to {when}."),
        Some(format!(
            "La collecte des déchets du quartier {ward_number} est reportée au {when}."
        )),
    )
}

fn pickup_scheduled_message(n: &Notification) -> TopicMessage {
    TopicMessage {
        title: format!("Waste pickup — Ward {}", n.ward_number),
        body: n.message_text.default.clone(),
        data: json!({
            "kind": "pickup_scheduled",
            "notificationId": n.id,
            "wardNumber": n.ward_number,
            "scheduledAt": n.scheduled_at,
            "bodyAlt": n.message_text.alt,
        }),
    }
}

fn pickup_cancelled_message(n: &Notification) -> TopicMessage {
    let when = n.scheduled_at.format("%Y-%m-%d %H:%M");
    TopicMessage {
        title: format!("Pickup cancelled — Ward {}", n.ward_number),
        body: format!("The waste pickup scheduled for {when} has been cancelled."),
        data: json!({
            "kind": "pickup_cancelled",
            "notificationId": n.id,
            "wardNumber": n.ward_number,
            "bodyAlt": format!("La collecte prévue le {when} est annulée."),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::push::fake::FakeFanout;
    use crate::services::testutil::{memory_store, seed_ward};
    use crate::store::memory::MemoryStore;
    use std::sync::atomic::Ordering as AtomicOrdering;

    fn service(store: &Arc<MemoryStore>, push: &Arc<FakeFanout>) -> NotificationService {
        NotificationService::new(
            store.clone(),
            push.clone(),
            AuditService::new(store.clone()),
        )
    }

    fn admin() -> Caller {
        Caller::admin("admin-1")
    }

    fn create_request(ward_number: i64) -> CreateNotificationRequest {
        CreateNotificationRequest {
            ward_number,
            scheduled_at: "2026-08-07T09:00:00Z".to_string(),
            message_text: "Pickup tomorrow at 9:00 AM, please put bins out.".to_string(),
            message_text_alt: Some("Collecte demain à 9 h, sortez vos bacs.".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_snapshots_ward_count() {
        let store = memory_store();
        let push = Arc::new(FakeFanout::new());
        seed_ward(&store, 5, 245).await;
        let svc = service(&store, &push);

        let n = svc.create(&admin(), &create_request(5)).await.unwrap();
        assert_eq!(n.status, NotificationStatus::Scheduled);
        assert_eq!(n.response_stats.yes_count, 0);
        assert_eq!(n.response_stats.no_count, 0);
        assert_eq!(n.response_stats.total_customers, 245);

        let stored = svc.get(n.id).await.unwrap();
        assert_eq!(stored.ward_number, 5);
        assert!(!stored.is_rescheduled);
    }

    #[tokio::test]
    async fn test_create_validation_failures() {
        let store = memory_store();
        let push = Arc::new(FakeFanout::new());
        seed_ward(&store, 5, 10).await;
        let svc = service(&store, &push);

        let mut req = create_request(0);
        assert!(matches!(
            svc.create(&admin(), &req).await.unwrap_err(),
            Error::Validation(_)
        ));

        req = create_request(5);
        req.message_text = "too short".to_string();
        assert!(matches!(
            svc.create(&admin(), &req).await.unwrap_err(),
            Error::Validation(_)
        ));

        req = create_request(5);
        req.scheduled_at = "tomorrow at nine".to_string();
        assert!(matches!(
            svc.create(&admin(), &req).await.unwrap_err(),
            Error::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_create_unknown_ward_is_not_found() {
        let store = memory_store();
        let push = Arc::new(FakeFanout::new());
        let svc = service(&store, &push);

        assert!(matches!(
            svc.create(&admin(), &create_request(7)).await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_create_requires_admin() {
        let store = memory_store();
        let push = Arc::new(FakeFanout::new());
        seed_ward(&store, 5, 10).await;
        let svc = service(&store, &push);

        let resident = Caller::customer(Uuid::new_v4());
        assert!(matches!(
            svc.create(&resident, &create_request(5)).await.unwrap_err(),
            Error::Permission(_)
        ));
    }

    #[tokio::test]
    async fn test_dispatch_sends_and_refreshes_total() {
        let store = memory_store();
        let push = Arc::new(FakeFanout::new());
        let mut ward = seed_ward(&store, 5, 245).await;
        let svc = service(&store, &push);

        let n = svc.create(&admin(), &create_request(5)).await.unwrap();

        // Membership drift between create and send.
        ward.customer_count = 250;
        store
            .batch_write(vec![DocWrite::put(Ward::doc_key(ward.id), &ward).unwrap()])
            .await
            .unwrap();

        let outcome = svc.on_created(n.id).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Sent { .. }));
        assert_eq!(push.sent_topics(), vec!["ward-5".to_string()]);

        let sent = svc.get(n.id).await.unwrap();
        assert_eq!(sent.status, NotificationStatus::Sent);
        assert!(sent.sent_at.is_some());
        assert!(sent.delivery_id.is_some());
        assert_eq!(sent.response_stats.total_customers, 250);
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_terminal() {
        let store = memory_store();
        let push = Arc::new(FakeFanout::new());
        seed_ward(&store, 5, 10).await;
        let svc = service(&store, &push);

        let n = svc.create(&admin(), &create_request(5)).await.unwrap();
        push.fail_send.store(true, AtomicOrdering::SeqCst);

        let outcome = svc.on_created(n.id).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Failed { .. }));

        let failed = svc.get(n.id).await.unwrap();
        assert_eq!(failed.status, NotificationStatus::Failed);
        assert!(failed.last_error.is_some());

        // No automatic retry: a later dispatch attempt is a no-op.
        push.fail_send.store(false, AtomicOrdering::SeqCst);
        let outcome = svc.on_created(n.id).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Skipped { .. }));
        assert!(push.sent_topics().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_is_idempotent_after_sent() {
        let store = memory_store();
        let push = Arc::new(FakeFanout::new());
        seed_ward(&store, 5, 10).await;
        let svc = service(&store, &push);

        let n = svc.create(&admin(), &create_request(5)).await.unwrap();
        let first = svc.on_created(n.id).await.unwrap();
        assert!(matches!(first, DispatchOutcome::Sent { .. }));
        let second = svc.on_created(n.id).await.unwrap();
        assert!(matches!(second, DispatchOutcome::Skipped { .. }));
        assert_eq!(push.sent_topics().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_takes_over_stale_claim() {
        let store = memory_store();
        let push = Arc::new(FakeFanout::new());
        seed_ward(&store, 5, 10).await;
        let svc = service(&store, &push);

        let n = svc.create(&admin(), &create_request(5)).await.unwrap();

        // Simulate a crashed dispatcher: claim stamped, never finalized.
        let mut stuck = svc.get(n.id).await.unwrap();
        stuck.fanout_claimed_at =
            Some(Utc::now() - Duration::seconds(FANOUT_CLAIM_TTL_SECS + 30));
        store
            .batch_write(vec![
                DocWrite::put(Notification::doc_key(n.id), &stuck).unwrap()
            ])
            .await
            .unwrap();

        let outcome = svc.on_created(n.id).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Sent { .. }));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_and_fans_out_once() {
        let store = memory_store();
        let push = Arc::new(FakeFanout::new());
        seed_ward(&store, 5, 10).await;
        let svc = service(&store, &push);

        let n = svc.create(&admin(), &create_request(5)).await.unwrap();
        svc.on_created(n.id).await.unwrap();

        let cancelled = svc.cancel(&admin(), n.id).await.unwrap();
        assert_eq!(cancelled.status, NotificationStatus::Cancelled);
        assert!(cancelled.cancelled_at.is_some());

        let again = svc.cancel(&admin(), n.id).await.unwrap();
        assert_eq!(again.status, NotificationStatus::Cancelled);

        // One scheduled fanout + exactly one cancellation fanout.
        let sent = push.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].1.data["kind"], "pickup_cancelled");
    }

    #[tokio::test]
    async fn test_reschedule_links_both_records_atomically() {
        let store = memory_store();
        let push = Arc::new(FakeFanout::new());
        seed_ward(&store, 5, 245).await;
        let svc = service(&store, &push);

        let original = svc.create(&admin(), &create_request(5)).await.unwrap();
        svc.on_created(original.id).await.unwrap();

        let req = RescheduleRequest {
            scheduled_at: "2026-08-09T09:00:00Z".to_string(),
            message_text: None,
            message_text_alt: None,
            reason: Some("storm warning".to_string()),
        };
        let replacement = svc.reschedule(&admin(), original.id, &req).await.unwrap();

        let original = svc.get(original.id).await.unwrap();
        assert_eq!(original.status, NotificationStatus::Cancelled);
        assert_eq!(original.rescheduled_to, Some(replacement.id));

        assert_eq!(replacement.parent_notification_id, Some(original.id));
        assert!(replacement.is_rescheduled);
        assert_eq!(replacement.status, NotificationStatus::Scheduled);
        assert_eq!(replacement.response_stats.yes_count, 0);
        assert_eq!(replacement.response_stats.no_count, 0);
        assert_eq!(replacement.response_stats.total_customers, 245);
        assert_eq!(replacement.reschedule_reason.as_deref(), Some("storm warning"));
        // Default bilingual message computed when none was given.
        assert!(replacement.message_text.default.contains("rescheduled"));
        assert!(replacement.message_text.alt.is_some());
    }

    #[tokio::test]
    async fn test_reschedule_rejects_terminal_states() {
        let store = memory_store();
        let push = Arc::new(FakeFanout::new());
        seed_ward(&store, 5, 10).await;
        let svc = service(&store, &push);

        let n = svc.create(&admin(), &create_request(5)).await.unwrap();
        svc.cancel(&admin(), n.id).await.unwrap();

        let req = RescheduleRequest {
            scheduled_at: "2026-08-09T09:00:00Z".to_string(),
            message_text: None,
            message_text_alt: None,
            reason: None,
        };
        assert!(matches!(
            svc.reschedule(&admin(), n.id, &req).await.unwrap_err(),
            Error::InvalidState(_)
        ));
        assert!(matches!(
            svc.reschedule(&admin(), Uuid::new_v4(), &req)
                .await
                .unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_list_filters_by_ward_and_status() {
        let store = memory_store();
        let push = Arc::new(FakeFanout::new());
        seed_ward(&store, 5, 10).await;
        seed_ward(&store, 6, 10).await;
        let svc = service(&store, &push);

        let a = svc.create(&admin(), &create_request(5)).await.unwrap();
        let _b = svc.create(&admin(), &create_request(6)).await.unwrap();
        svc.on_created(a.id).await.unwrap();

        let filter = ListNotificationsQuery {
            ward_number: Some(5),
            status: Some("sent".to_string()),
            limit: None,
        };
        let listed = svc.list(&filter).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, a.id);
    }
}
