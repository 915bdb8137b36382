// Library exports for the API binary, seed tool and tests
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;

use std::sync::Arc;

use config::Config;
use services::membership::MembershipService;
use services::notifications::NotificationService;
use services::reconcile::ReconcileService;
use services::responses::ResponseService;
use store::DocumentStore;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub config: Arc<Config>,
    pub notifications: Arc<NotificationService>,
    pub responses: Arc<ResponseService>,
    pub membership: Arc<MembershipService>,
    pub reconcile: Arc<ReconcileService>,
}
