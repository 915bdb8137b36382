use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::{collections, DocKey};

/// A resident. Created on first authentication; `ward_id` and `device_token`
/// changes require coordinated side effects (topic resubscription, ward
/// counter deltas) and go through the membership service only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: Uuid,
    pub phone_identity: String,
    pub name: String,
    pub ward_id: Uuid,
    pub ward_number: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_token: Option<String>,
    pub language_pref: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn doc_key(id: Uuid) -> DocKey {
        DocKey::new(collections::CUSTOMERS, id.to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterCustomerRequest {
    pub phone_identity: String,
    pub name: String,
    pub ward_number: i64,
    pub device_token: Option<String>,
    /// "en" | "fr"
    pub language_pref: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeWardRequest {
    pub ward_number: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub device_token: String,
}
