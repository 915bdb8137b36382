pub mod audit;
pub mod membership;
pub mod metrics;
pub mod notifications;
pub mod push;
pub mod reconcile;
pub mod responses;

use serde_json::json;

use crate::error::{Error, Result};
use crate::models::ward::Ward;
use crate::store::{collections, DocumentStore, Query};

/// Resolve a ward by its public number. Range validation is the caller's
/// concern; an absent ward is `NotFound`.
pub(crate) async fn ward_by_number(store: &dyn DocumentStore, number: i64) -> Result<Ward> {
    let docs = store
        .query(
            &Query::collection(collections::WARDS)
                .filter("number", json!(number))
                .limit(1),
        )
        .await?;
    let doc = docs
        .into_iter()
        .next()
        .ok_or_else(|| Error::NotFound(format!("ward {number}")))?;
    doc.decode()
}
