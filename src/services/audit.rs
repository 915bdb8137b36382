use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::auth::Caller;
use crate::store::{collections, DocKey, DocWrite, DocumentStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: Uuid,
    pub actor: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AuditService {
    store: Arc<dyn DocumentStore>,
}

impl AuditService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Fire-and-forget audit entry. Spawns a background task, never blocks
    /// the calling operation, never propagates errors (warns on failure).
    pub fn record(
        &self,
        caller: &Caller,
        action: &str,
        resource_type: &str,
        resource_id: impl std::fmt::Display,
        detail: Option<String>,
    ) {
        let record = AuditRecord {
            id: Uuid::new_v4(),
            actor: caller.subject_id.clone(),
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            detail,
            created_at: Utc::now(),
        };
        let store = self.store.clone();
        tokio::spawn(async move {
            let key = DocKey::new(collections::AUDIT, record.id.to_string());
            let write = match DocWrite::create(key, &record) {
                Ok(w) => w,
                Err(e) => {
                    tracing::warn!("audit record encode failed: {e}");
                    return;
                }
            };
            if let Err(e) = store.batch_write(vec![write]).await {
                tracing::warn!(action = %record.action, "audit record insert failed: {e}");
            }
        });
    }
}
