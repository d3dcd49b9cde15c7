mod certificates;
mod config;
mod db;
mod eligibility;
mod error;
mod render;
mod routes;
mod state;
mod storage;
mod templates;

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::storage::SupabaseStorage;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "laurea=info,tower_http=info".into()),
        )
        .init();

    let config = config::Config::from_env()?;
    let config = Arc::new(config);

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(pool.as_ref()).await?;

    let store = Arc::new(SupabaseStorage::new(config.storage.clone()));

    let state = Arc::new(state::AppState {
        pool,
        config: config.clone(),
        store,
    });

    // Fill in previews for templates that have none yet; never overwrites.
    tokio::spawn(certificates::backfill_previews(state.as_ref().clone()));

    let app = Router::new()
        .route("/api/templates/generate", post(routes::templates::generate_certificates))
        .route("/api/templates/all", get(routes::templates::all_templates))
        .route(
            "/api/templates/generate-preview/:template_id",
            post(routes::templates::generate_preview),
        )
        .route(
            "/api/templates/certificates/student/:student",
            get(routes::templates::certificates_by_student),
        )
        .route(
            "/api/templates/certificates/subject/:subject",
            get(routes::templates::certificates_by_subject),
        )
        .route(
            "/api/templates/certificates/all",
            get(routes::templates::all_certificates),
        )
        .route("/api/exams", get(routes::exams::list_exams).post(routes::exams::create_exam))
        .route("/api/exams/:id", put(routes::exams::update_exam).delete(routes::exams::delete_exam))
        .route("/api/exams/:id/upload", post(routes::exams::upload_roster))
        .route("/api/upload/image", post(routes::exams::upload_image))
        .route("/api/users/register", post(routes::users::register))
        .route("/api/users/login", post(routes::users::login))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Laurea listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
