use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::json;

use crate::{
    error::Error,
    models::auth::Caller,
    models::ward::Ward,
    store::{collections, Order, Query},
    AppState,
};

/// Active wards with their live customer counts, ordered by ward number.
pub async fn list_wards(
    State(state): State<AppState>,
    _caller: Caller,
) -> Result<Json<Vec<Ward>>, Error> {
    let docs = state
        .store
        .query(
            &Query::collection(collections::WARDS)
                .filter("isActive", json!(true))
                .order_by("number", Order::Asc),
        )
        .await?;
    let wards: Result<Vec<Ward>, Error> = docs.iter().map(|doc| doc.decode()).collect();
    Ok(Json(wards?))
}

pub async fn reconcile_ward(
    State(state): State<AppState>,
    caller: Caller,
    Path(number): Path<i64>,
) -> Result<Json<serde_json::Value>, Error> {
    let customer_count = state.reconcile.recompute_ward(&caller, number).await?;
    Ok(Json(json!({ "number": number, "customerCount": customer_count })))
}
