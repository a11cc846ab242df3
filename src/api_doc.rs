use utoipa::OpenApi;

use crate::error::{ErrorResponse, HealthResponse, UnhealthyResponse};
use crate::handlers;
use crate::models::{
    AttendanceRecord, AttendanceUpdate, DeleteResponse, NewAttendance, NewUser, User, UserUpdate,
};

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "attendance-gateway API",
        version = "0.1.0",
        description = "CRUD gateway for the user roster and attendance history"
    ),
    paths(
        handlers::health::root_handler,
        handlers::health::health_handler,
        handlers::users::list_users,
        handlers::users::create_user,
        handlers::users::replace_user,
        handlers::users::patch_user,
        handlers::users::delete_user,
        handlers::attendance::list_attendance,
        handlers::attendance::create_attendance,
        handlers::attendance::replace_attendance,
        handlers::attendance::delete_attendance
    ),
    components(
        schemas(
            User,
            NewUser,
            UserUpdate,
            AttendanceRecord,
            NewAttendance,
            AttendanceUpdate,
            DeleteResponse,
            ErrorResponse,
            HealthResponse,
            UnhealthyResponse
        )
    ),
    tags(
        (name = "health", description = "Health check operations"),
        (name = "users", description = "Ordered user roster"),
        (name = "attendance", description = "Per-group attendance history")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&str> = doc.paths.paths.keys().map(String::as_str).collect();

        for path in [
            "/",
            "/health",
            "/users",
            "/users/{id}",
            "/attendanceHistory",
            "/attendanceHistory/{id}",
        ] {
            assert!(paths.contains(&path), "missing {} in {:?}", path, paths);
        }
    }
}
