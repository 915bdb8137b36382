use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    error::Error,
    models::auth::Caller,
    models::notification::{
        CreateNotificationRequest, ListNotificationsQuery, Notification, RescheduleRequest,
        ResponseStats,
    },
    services::notifications::{DispatchOutcome, NotificationService},
    AppState,
};

/// Post-commit reaction wiring: the fanout runs on its own task so the admin
/// request returns as soon as the notification is durable. `on_created` is
/// idempotent, so a lost task can be re-driven via the dispatch route.
fn spawn_dispatch(notifications: Arc<NotificationService>, id: Uuid) {
    tokio::spawn(async move {
        if let Err(e) = notifications.on_created(id).await {
            tracing::warn!(%id, "fanout dispatch failed: {e}");
        }
    });
}

pub async fn create_notification(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<CreateNotificationRequest>,
) -> Result<(StatusCode, Json<Notification>), Error> {
    let notification = state.notifications.create(&caller, &body).await?;
    spawn_dispatch(state.notifications.clone(), notification.id);
    Ok((StatusCode::CREATED, Json(notification)))
}

pub async fn list_notifications(
    State(state): State<AppState>,
    _caller: Caller,
    Query(filter): Query<ListNotificationsQuery>,
) -> Result<Json<Vec<Notification>>, Error> {
    let listed = state.notifications.list(&filter).await?;
    Ok(Json(listed))
}

pub async fn get_notification(
    State(state): State<AppState>,
    _caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<Notification>, Error> {
    let notification = state.notifications.get(id).await?;
    Ok(Json(notification))
}

/// Re-run the idempotent fanout reaction for a stuck notification.
pub async fn dispatch_notification(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<DispatchOutcome>, Error> {
    caller.require_admin()?;
    let outcome = state.notifications.on_created(id).await?;
    Ok(Json(outcome))
}

pub async fn reschedule_notification(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(body): Json<RescheduleRequest>,
) -> Result<(StatusCode, Json<Notification>), Error> {
    let replacement = state.notifications.reschedule(&caller, id, &body).await?;
    spawn_dispatch(state.notifications.clone(), replacement.id);
    Ok((StatusCode::CREATED, Json(replacement)))
}

pub async fn cancel_notification(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<Notification>, Error> {
    let cancelled = state.notifications.cancel(&caller, id).await?;
    Ok(Json(cancelled))
}

pub async fn reconcile_notification(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<ResponseStats>, Error> {
    let stats = state.reconcile.recompute_notification(&caller, id).await?;
    Ok(Json(stats))
}
