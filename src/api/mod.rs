//! HTTP surface: REST endpoints plus provider webhooks.

mod routes;

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::routing::{get, post, put};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use crate::compose::ContentGenerator;
use crate::gateway::SendGateway;
use crate::outreach::{Dispatcher, GenerationEngine};
use crate::pipeline::{EventIngestor, ReplyPipeline};
use crate::store::Database;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub engine: Arc<GenerationEngine>,
    pub dispatcher: Arc<Dispatcher>,
    pub replies: Arc<ReplyPipeline>,
    pub events: Arc<EventIngestor>,
}

impl AppState {
    /// Wire every component from the three external collaborators.
    pub fn new(
        db: Arc<dyn Database>,
        generator: Arc<ContentGenerator>,
        gateway: Arc<dyn SendGateway>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&db), gateway));
        Self {
            engine: Arc::new(GenerationEngine::new(Arc::clone(&db), Arc::clone(&generator))),
            replies: Arc::new(ReplyPipeline::new(
                Arc::clone(&db),
                generator,
                Arc::clone(&dispatcher),
            )),
            events: Arc::new(EventIngestor::new(Arc::clone(&db))),
            dispatcher,
            db,
        }
    }
}

/// Build the router with all routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/contacts", get(routes::list_contacts))
        .route("/api/contacts/confirm", post(routes::confirm_contacts))
        .route("/api/campaigns/{id}", get(routes::campaign_summary))
        .route("/api/campaigns/{id}/generate-emails", post(routes::generate_emails))
        .route("/api/campaigns/{id}/send", post(routes::send_step))
        .route("/api/emails", get(routes::list_emails))
        .route("/api/emails/{id}", put(routes::update_email))
        .route("/api/webhooks/sendgrid-events", post(routes::sendgrid_events))
        .route("/api/webhooks/reply", post(routes::reply_webhook))
        .with_state(state)
}

/// CORS for the configured browser origins. Unparseable origins are skipped.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
