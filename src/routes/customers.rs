use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    error::Error,
    models::auth::Caller,
    models::customer::{
        ChangeWardRequest, Customer, RefreshTokenRequest, RegisterCustomerRequest,
    },
    services::membership::MembershipOutcome,
    AppState,
};

/// First-authentication registration; the gateway-resolved subject becomes
/// the customer id.
pub async fn register_customer(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<RegisterCustomerRequest>,
) -> Result<(StatusCode, Json<MembershipOutcome>), Error> {
    let outcome = state.membership.register(&caller, &body).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn get_customer(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<Customer>, Error> {
    let customer = state.membership.get(&caller, id).await?;
    Ok(Json(customer))
}

pub async fn change_ward(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(body): Json<ChangeWardRequest>,
) -> Result<Json<MembershipOutcome>, Error> {
    let outcome = state
        .membership
        .change_ward(&caller, id, body.ward_number)
        .await?;
    Ok(Json(outcome))
}

pub async fn refresh_push_token(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(body): Json<RefreshTokenRequest>,
) -> Result<Json<MembershipOutcome>, Error> {
    let outcome = state
        .membership
        .refresh_token(&caller, id, &body.device_token)
        .await?;
    Ok(Json(outcome))
}
