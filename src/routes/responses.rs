use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    error::Error,
    models::auth::Caller,
    models::response::{ResponseRecord, SubmitResponseRequest},
    AppState,
};

pub async fn submit_response(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(body): Json<SubmitResponseRequest>,
) -> Result<Json<ResponseRecord>, Error> {
    let record = state.responses.submit(&caller, id, body.value).await?;
    Ok(Json(record))
}

pub async fn list_responses(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ResponseRecord>>, Error> {
    let listed = state.responses.list(&caller, id).await?;
    Ok(Json(listed))
}

/// Administrative correction; rolls the counter back with the deletion.
pub async fn delete_response(
    State(state): State<AppState>,
    caller: Caller,
    Path((id, customer_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, Error> {
    state
        .responses
        .on_response_deleted(&caller, id, customer_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
