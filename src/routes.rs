// routes.rs
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use http::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    HeaderName, HeaderValue, Method,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::warn;

use crate::config::Config;
use crate::handlers::{self, GUEST_HEADER};
use crate::state::AppState;

pub fn create_routes(state: AppState, config: &Config) -> Router {
    let api = Router::new()
        .route("/identity", post(handlers::resolve_identity))
        .route("/auth/sign-out", post(handlers::sign_out))
        .route("/polls", get(handlers::list_polls).post(handlers::create_poll))
        .route("/polls/{poll_id}", get(handlers::get_poll))
        .route("/polls/{poll_id}/votes", post(handlers::cast_vote))
        .route("/polls/{poll_id}/comments", post(handlers::add_comment))
        .route("/profiles/{user_id}", get(handlers::get_profile))
        .route("/profiles/{user_id}/follow", post(handlers::toggle_follow))
        .route("/me", get(handlers::current_user))
        .route("/me/username", put(handlers::update_username));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api", api)
        .nest_service("/media", ServeDir::new(&config.media_dir))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(cors_layer(&config.cors_origin))
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let guest_header = HeaderName::from_static(GUEST_HEADER);
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION, guest_header.clone()])
        .expose_headers([guest_header])
        .max_age(Duration::from_secs(60 * 60));

    if origin == "*" {
        return cors.allow_origin(Any);
    }
    match HeaderValue::from_str(origin) {
        Ok(origin) => cors.allow_origin(origin),
        Err(e) => {
            warn!("Invalid CORS_ORIGIN {origin:?}: {e}, allowing any origin");
            cors.allow_origin(Any)
        }
    }
}
