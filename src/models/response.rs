use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::{collections, DocKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseValue {
    Yes,
    No,
}

impl std::fmt::Display for ResponseValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseValue::Yes => write!(f, "yes"),
            ResponseValue::No => write!(f, "no"),
        }
    }
}

/// One customer's availability answer to one notification. The document id
/// is the `{notification}:{customer}` composite, so a resubmission always
/// lands on the same document: at most one response per customer per
/// notification, updated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub id: String,
    pub notification_id: Uuid,
    pub customer_id: Uuid,
    pub value: ResponseValue,
    pub responded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResponseRecord {
    pub fn composite_id(notification_id: Uuid, customer_id: Uuid) -> String {
        format!("{notification_id}:{customer_id}")
    }

    pub fn doc_key(notification_id: Uuid, customer_id: Uuid) -> DocKey {
        DocKey::new(
            collections::RESPONSES,
            Self::composite_id(notification_id, customer_id),
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponseRequest {
    pub value: ResponseValue,
}
