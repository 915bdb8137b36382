use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::LocalizedText;
use crate::store::{collections, DocKey};

pub const WARD_NUMBER_MIN: i64 = 1;
pub const WARD_NUMBER_MAX: i64 = 32;

/// A fixed administrative subdivision; the unit of broadcast targeting.
/// Seeded once; `customer_count` is mutated only through membership changes,
/// wards are deactivated rather than deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ward {
    pub id: Uuid,
    pub number: i64,
    pub name: LocalizedText,
    pub customer_count: i64,
    pub is_active: bool,
}

impl Ward {
    pub fn doc_key(id: Uuid) -> DocKey {
        DocKey::new(collections::WARDS, id.to_string())
    }

    /// Push-fanout topic for this ward. One topic per ward.
    pub fn topic(number: i64) -> String {
        format!("ward-{number}")
    }
}

pub fn ward_number_in_range(number: i64) -> bool {
    (WARD_NUMBER_MIN..=WARD_NUMBER_MAX).contains(&number)
}
