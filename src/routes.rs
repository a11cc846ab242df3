// Route path constants - single source of truth for all API paths

use axum::routing::{get, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api_doc::ApiDoc;
use crate::handlers;
use crate::state::AppState;

pub const ROOT: &str = "/";
pub const HEALTH: &str = "/health";
pub const USERS: &str = "/users";
pub const USER_ITEM: &str = "/users/{id}";
pub const ATTENDANCE: &str = "/attendanceHistory";
pub const ATTENDANCE_ITEM: &str = "/attendanceHistory/{id}";
pub const SWAGGER_UI: &str = "/swagger-ui";
pub const OPENAPI_JSON: &str = "/api-docs/openapi.json";

/// Builds the complete router: API routes, Swagger UI, tracing and CORS for every origin.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(ROOT, get(handlers::root_handler))
        .route(HEALTH, get(handlers::health_handler))
        .route(
            USERS,
            get(handlers::users::list_users).post(handlers::users::create_user),
        )
        .route(
            USER_ITEM,
            put(handlers::users::replace_user)
                .patch(handlers::users::patch_user)
                .delete(handlers::users::delete_user),
        )
        .route(
            ATTENDANCE,
            get(handlers::attendance::list_attendance)
                .post(handlers::attendance::create_attendance),
        )
        .route(
            ATTENDANCE_ITEM,
            put(handlers::attendance::replace_attendance)
                .delete(handlers::attendance::delete_attendance),
        )
        .merge(SwaggerUi::new(SWAGGER_UI).url(OPENAPI_JSON, ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
