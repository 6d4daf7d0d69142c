pub mod api;
pub mod config;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::AppConfig;
use crate::services::job_runner::JobRunner;
use crate::services::job_store::JobStore;
use crate::services::litmos::UserDirectory;
use axum::{
    Router,
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::health::service_info,
        api::handlers::health::health_check,
        api::handlers::jobs::process_csv,
        api::handlers::jobs::job_status,
        api::handlers::users::get_user,
        api::handlers::users::change_user_state,
    ),
    components(
        schemas(
            api::handlers::health::HealthResponse,
            api::handlers::health::ServiceInfo,
            api::handlers::jobs::ProcessCsvForm,
            api::handlers::jobs::ProcessCsvResponse,
            models::Operation,
            models::JobStatus,
            models::RowError,
            models::RowResult,
            models::JobSnapshot,
            models::UserActionResult,
            models::UserLookupResponse,
        )
    ),
    tags(
        (name = "system", description = "Service health and information"),
        (name = "jobs", description = "Bulk CSV activation and deactivation"),
        (name = "users", description = "Single user lookup and state changes")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub jobs: JobStore,
    pub runner: Arc<JobRunner>,
    pub directory: Arc<dyn UserDirectory>,
}

impl AppState {
    /// Wires a job store and runner around `directory`
    pub fn new(config: AppConfig, directory: Arc<dyn UserDirectory>) -> Self {
        let jobs = JobStore::new();
        let runner = Arc::new(JobRunner::new(
            Arc::clone(&directory),
            jobs.clone(),
            &config,
        ));

        Self {
            config,
            jobs,
            runner,
            directory,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let body_limit = state.config.max_upload_size;

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/", get(api::handlers::health::service_info))
        .route("/health", get(api::handlers::health::health_check))
        .route("/api/process-csv", post(api::handlers::jobs::process_csv))
        .route("/api/job-status/:job_id", get(api::handlers::jobs::job_status))
        .route("/api/users/:username", get(api::handlers::users::get_user))
        .route(
            "/api/users/:username/:action",
            post(api::handlers::users::change_user_state),
        )
        .layer(from_fn(api::middleware::metrics::metrics_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(api::middleware::trace::request_span)
                .on_request(api::middleware::trace::on_request)
                .on_response(api::middleware::trace::on_response),
        )
        // Wraps the trace layer so its span sees the request id
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any),
        )
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
