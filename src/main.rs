use std::sync::Arc;

use axum::{
    http::{header, Method},
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{AllowHeaders, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wardcast_api::config::Config;
use wardcast_api::services::audit::AuditService;
use wardcast_api::services::membership::MembershipService;
use wardcast_api::services::notifications::NotificationService;
use wardcast_api::services::push::{FcmFanout, PushFanout};
use wardcast_api::services::reconcile::ReconcileService;
use wardcast_api::services::responses::ResponseService;
use wardcast_api::store::postgres::PgStore;
use wardcast_api::store::DocumentStore;
use wardcast_api::{db, routes, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    info!("Database connected and migrations applied");

    let store: Arc<dyn DocumentStore> = Arc::new(PgStore::new(pool));
    let push: Arc<dyn PushFanout> = Arc::new(FcmFanout::new(config.fcm_api_key.clone()));
    if config.fcm_api_key.is_some() {
        info!("FCM fanout configured");
    } else {
        info!("FCM not configured — push fanout disabled");
    }

    let audit = AuditService::new(store.clone());
    let notifications = Arc::new(NotificationService::new(
        store.clone(),
        push.clone(),
        audit.clone(),
    ));
    let responses = Arc::new(ResponseService::new(store.clone(), audit.clone()));
    let membership = Arc::new(MembershipService::new(
        store.clone(),
        push.clone(),
        audit.clone(),
    ));
    let reconcile = Arc::new(ReconcileService::new(store.clone()));

    let state = AppState {
        store,
        config: config.clone(),
        notifications,
        responses,
        membership,
        reconcile,
    };

    // Identity is resolved by the gateway in front; origins are not
    // restricted here.
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::HeaderName::from_static("x-subject-id"),
            header::HeaderName::from_static("x-role"),
        ]))
        .allow_origin(Any);

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::health::metrics))
        // Wards
        .route("/wards", get(routes::wards::list_wards))
        .route("/wards/{number}/reconcile", post(routes::wards::reconcile_ward))
        // Notifications (admin)
        .route("/notifications", get(routes::notifications::list_notifications).post(routes::notifications::create_notification))
        .route("/notifications/{id}", get(routes::notifications::get_notification))
        .route("/notifications/{id}/dispatch", post(routes::notifications::dispatch_notification))
        .route("/notifications/{id}/reschedule", post(routes::notifications::reschedule_notification))
        .route("/notifications/{id}/cancel", post(routes::notifications::cancel_notification))
        .route("/notifications/{id}/reconcile", post(routes::notifications::reconcile_notification))
        // Responses
        .route("/notifications/{id}/response", put(routes::responses::submit_response))
        .route("/notifications/{id}/responses", get(routes::responses::list_responses))
        .route("/notifications/{id}/responses/{customer_id}", delete(routes::responses::delete_response))
        // Customers
        .route("/customers", post(routes::customers::register_customer))
        .route("/customers/{id}", get(routes::customers::get_customer))
        .route("/customers/{id}/ward", put(routes::customers::change_ward))
        .route("/customers/{id}/push-token", put(routes::customers::refresh_push_token))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("wardcast API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
