use crate::error::{ApiError, ErrorResponse};
use crate::models::{DeleteResponse, NewUser, User, UserUpdate};
use crate::routes;
use crate::state::AppState;
use crate::store::{Filter, OrderBy, RecordId, Row, Store, Table};
use anyhow::{Context, Result};
use axum::{extract::Path, extract::State, http::StatusCode, Json};
use serde_json::Value as JsonValue;

fn by_order() -> OrderBy {
    OrderBy::asc("order")
}

/// GET /users handler - List the roster
///
/// Returns every user ordered ascending by `order`.
#[utoipa::path(
    get,
    path = routes::USERS,
    responses(
        (status = 200, description = "All users in roster order", body = Vec<User>),
        (status = 500, description = "Store error", body = ErrorResponse)
    ),
    tag = "users"
)]
pub async fn list_users(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<Vec<User>>), ApiError> {
    let rows = state
        .store
        .select(Table::Users, &Filter::all(), Some(&by_order()), None)
        .await
        .context("Failed to list users")?;

    let users = rows
        .into_iter()
        .map(User::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    tracing::info!("Listed {} users", users.len());
    Ok((StatusCode::OK, Json(users)))
}

/// Next free position: current maximum `order` plus one, or 1 for an empty roster.
///
/// Read and insert are separate round trips, so two concurrent creates can
/// observe the same maximum.
async fn next_order(store: &dyn Store) -> Result<i64> {
    let top = store
        .select(
            Table::Users,
            &Filter::all(),
            Some(&OrderBy::desc("order")),
            Some(1),
        )
        .await
        .context("Failed to read current maximum order")?;

    let max = top
        .first()
        .and_then(|row| row.get("order"))
        .and_then(JsonValue::as_i64)
        .unwrap_or(0);

    Ok(max + 1)
}

/// POST /users handler - Append a user to the roster
#[utoipa::path(
    post,
    path = routes::USERS,
    request_body = NewUser,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 500, description = "Store error", body = ErrorResponse)
    ),
    tag = "users"
)]
pub async fn create_user(
    State(state): State<AppState>,
    Json(body): Json<NewUser>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let order = next_order(state.store.as_ref()).await?;

    let row = state
        .store
        .insert(Table::Users, body.into_row(order))
        .await
        .context("Failed to insert user")?;
    let user = User::try_from(row)?;

    tracing::info!("Created user {} at order {}", user.id, user.order);
    Ok((StatusCode::CREATED, Json(user)))
}

async fn update_user(
    state: &AppState,
    id_str: &str,
    body: UserUpdate,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let id = RecordId::parse(id_str);

    let row = state
        .store
        .update(Table::Users, body.into_row(), &Filter::by_id(&id))
        .await
        .with_context(|| format!("Failed to update user {}", id))?;
    let user = User::try_from(row)?;

    tracing::info!("Updated user {}", id);
    Ok((StatusCode::OK, Json(user)))
}

/// PUT /users/{id} handler - Write the supplied fields of a user
///
/// An `id` in the body is ignored.
#[utoipa::path(
    put,
    path = routes::USER_ITEM,
    params(
        ("id" = String, Path, description = "User identifier")
    ),
    request_body = UserUpdate,
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 500, description = "Unknown user or store error", body = ErrorResponse)
    ),
    tag = "users"
)]
pub async fn replace_user(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
    Json(body): Json<UserUpdate>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    update_user(&state, &id_str, body).await
}

/// PATCH /users/{id} handler - Same mechanics as PUT, e.g. toggling `checked`
#[utoipa::path(
    patch,
    path = routes::USER_ITEM,
    params(
        ("id" = String, Path, description = "User identifier")
    ),
    request_body = UserUpdate,
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 500, description = "Unknown user or store error", body = ErrorResponse)
    ),
    tag = "users"
)]
pub async fn patch_user(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
    Json(body): Json<UserUpdate>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    update_user(&state, &id_str, body).await
}

/// Rewrite `order` so the roster reads 1..N again, keeping relative order.
///
/// Issues one update per out-of-place row and stops at the first failure;
/// rows already rewritten stay rewritten. Returns the number of rows changed.
pub async fn resequence_users(store: &dyn Store) -> Result<usize> {
    let rows = store
        .select(Table::Users, &Filter::all(), Some(&by_order()), None)
        .await
        .context("Failed to read users for resequencing")?;

    let mut changed = 0;
    for (index, row) in rows.iter().enumerate() {
        let expected = index as i64 + 1;
        if row.get("order").and_then(JsonValue::as_i64) == Some(expected) {
            continue;
        }

        let id = row.get("id").cloned().unwrap_or(JsonValue::Null);
        let mut patch = Row::new();
        patch.insert("order".to_string(), JsonValue::from(expected));

        store
            .update(Table::Users, patch, &Filter::all().eq("id", id.clone()))
            .await
            .with_context(|| format!("Failed to move user {} to order {}", id, expected))?;
        changed += 1;
    }

    Ok(changed)
}

/// DELETE /users/{id} handler - Remove a user and close the gap in `order`
///
/// Deleting an unknown id is a store error. Success is reported once the
/// delete itself succeeds; a failed resequencing pass is only logged.
#[utoipa::path(
    delete,
    path = routes::USER_ITEM,
    params(
        ("id" = String, Path, description = "User identifier")
    ),
    responses(
        (status = 200, description = "User deleted", body = DeleteResponse),
        (status = 500, description = "Unknown user or store error", body = ErrorResponse)
    ),
    tag = "users"
)]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
) -> Result<(StatusCode, Json<DeleteResponse>), ApiError> {
    let id = RecordId::parse(&id_str);

    state
        .store
        .delete(Table::Users, &Filter::by_id(&id))
        .await
        .with_context(|| format!("Failed to delete user {}", id))?;

    match resequence_users(state.store.as_ref()).await {
        Ok(changed) => {
            tracing::info!("Deleted user {} ({} users resequenced)", id, changed)
        }
        Err(e) => {
            tracing::warn!("Deleted user {} but resequencing failed: {:#}", id, e)
        }
    }

    Ok((StatusCode::OK, Json(DeleteResponse { success: true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Backend, Config};
    use crate::store::MemoryStore;
    use anyhow::bail;
    use async_trait::async_trait;
    use axum::{body::Body, http::Request, Router};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn setup_test_app(store: Arc<dyn Store>) -> Router {
        let config = Config {
            backend: Backend::Memory,
            spanner: None,
            service_port: 3000,
            service_host: "0.0.0.0".to_string(),
        };

        routes::build_router(AppState {
            store,
            config: Arc::new(config),
        })
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<JsonValue>,
    ) -> (StatusCode, JsonValue) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                request = request.header("content-type", "application/json");
                Body::from(serde_json::to_string(&value).unwrap())
            }
            None => Body::empty(),
        };

        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null);
        (status, json)
    }

    async fn list(app: &Router) -> Vec<User> {
        let (status, body) = send(app, "GET", "/users", None).await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_value(body).unwrap()
    }

    fn assert_dense(users: &[User]) {
        for (index, user) in users.iter().enumerate() {
            assert_eq!(user.order, index as i64 + 1, "roster not dense: {:?}", users);
        }
    }

    /// Accepts reads and deletes but fails every update
    struct ReadOnlyUpdates(MemoryStore);

    #[async_trait]
    impl Store for ReadOnlyUpdates {
        async fn select(
            &self,
            table: Table,
            filter: &Filter,
            order: Option<&OrderBy>,
            limit: Option<usize>,
        ) -> Result<Vec<Row>> {
            self.0.select(table, filter, order, limit).await
        }

        async fn insert(&self, table: Table, row: Row) -> Result<Row> {
            self.0.insert(table, row).await
        }

        async fn update(&self, _table: Table, _row: Row, _filter: &Filter) -> Result<Row> {
            bail!("update rejected")
        }

        async fn delete(&self, table: Table, filter: &Filter) -> Result<usize> {
            self.0.delete(table, filter).await
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_list_users_empty() {
        let app = setup_test_app(Arc::new(MemoryStore::new()));

        let (status, body) = send(&app, "GET", "/users", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_create_user_into_empty_roster() {
        let app = setup_test_app(Arc::new(MemoryStore::new()));

        let (status, body) = send(&app, "POST", "/users", Some(json!({"name": "Ali"}))).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, json!({"id": 1, "order": 1, "checked": false, "name": "Ali"}));
    }

    #[tokio::test]
    async fn test_create_user_appends_after_max_order() {
        let store = Arc::new(MemoryStore::new());
        let mut row = Row::new();
        row.insert("order".into(), json!(7));
        row.insert("checked".into(), json!(false));
        store.insert(Table::Users, row).await.unwrap();
        let app = setup_test_app(store);

        let (status, body) = send(
            &app,
            "POST",
            "/users",
            Some(json!({"name": "Vali", "order": 1, "checked": true})),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["order"], json!(8));
        assert_eq!(body["checked"], json!(true));
    }

    #[tokio::test]
    async fn test_created_user_round_trips_through_list() {
        let app = setup_test_app(Arc::new(MemoryStore::new()));
        let payload = json!({"name": "Ali", "phone": "+998", "tags": ["a", "b"]});

        let (_, created) = send(&app, "POST", "/users", Some(payload.clone())).await;
        let users = list(&app).await;

        assert_eq!(users.len(), 1);
        let listed = serde_json::to_value(&users[0]).unwrap();
        assert_eq!(listed, created);
        for (field, value) in payload.as_object().unwrap() {
            assert_eq!(&listed[field], value);
        }
    }

    #[tokio::test]
    async fn test_list_users_sorted_by_order() {
        let store = Arc::new(MemoryStore::new());
        for order in [2, 3, 1] {
            let mut row = Row::new();
            row.insert("order".into(), json!(order));
            row.insert("checked".into(), json!(false));
            store.insert(Table::Users, row).await.unwrap();
        }
        let app = setup_test_app(store);

        let users = list(&app).await;

        let ids: Vec<_> = users.iter().map(|u| u.id.clone()).collect();
        assert_eq!(ids, vec![json!(3), json!(1), json!(2)]);
        assert_dense(&users);
    }

    #[tokio::test]
    async fn test_patch_user_changes_only_supplied_fields() {
        let app = setup_test_app(Arc::new(MemoryStore::new()));
        send(&app, "POST", "/users", Some(json!({"name": "Ali"}))).await;

        let (status, body) = send(
            &app,
            "PATCH",
            "/users/1",
            Some(json!({"id": 999, "checked": true})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"id": 1, "order": 1, "checked": true, "name": "Ali"}));
    }

    #[tokio::test]
    async fn test_put_user_updates_fields() {
        let app = setup_test_app(Arc::new(MemoryStore::new()));
        send(&app, "POST", "/users", Some(json!({"name": "Ali"}))).await;

        let (status, body) = send(
            &app,
            "PUT",
            "/users/1",
            Some(json!({"name": "Alisher", "checked": false})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], json!("Alisher"));
        assert_eq!(body["id"], json!(1));
        assert_eq!(list(&app).await[0].fields["name"], json!("Alisher"));
    }

    #[tokio::test]
    async fn test_update_unknown_user_is_internal_error() {
        let app = setup_test_app(Arc::new(MemoryStore::new()));

        for method in ["PUT", "PATCH"] {
            let (status, body) =
                send(&app, method, "/users/42", Some(json!({"checked": true}))).await;

            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            let error: ErrorResponse = serde_json::from_value(body).unwrap();
            assert_eq!(error.error, "Server xatosi");
            assert!(error.detail.unwrap().contains("Failed to update user 42"));
        }
    }

    #[tokio::test]
    async fn test_non_numeric_id_is_passed_through() {
        let app = setup_test_app(Arc::new(MemoryStore::new()));
        send(&app, "POST", "/users", Some(json!({"name": "Ali"}))).await;

        let (status, body) =
            send(&app, "PATCH", "/users/abc", Some(json!({"checked": true}))).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["detail"].as_str().unwrap().contains("user abc"));
    }

    #[tokio::test]
    async fn test_delete_user_resequences_roster() {
        let app = setup_test_app(Arc::new(MemoryStore::new()));
        for name in ["a", "b", "c", "d"] {
            send(&app, "POST", "/users", Some(json!({"name": name}))).await;
        }

        let (status, body) = send(&app, "DELETE", "/users/2", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true}));

        let users = list(&app).await;
        let names: Vec<_> = users.iter().map(|u| u.fields["name"].clone()).collect();
        assert_eq!(names, vec![json!("a"), json!("c"), json!("d")]);
        assert!(users.iter().all(|u| u.id != json!(2)));
        assert_dense(&users);
    }

    #[tokio::test]
    async fn test_order_stays_dense_across_creates_and_deletes() {
        let app = setup_test_app(Arc::new(MemoryStore::new()));
        for i in 0..6 {
            send(&app, "POST", "/users", Some(json!({"n": i}))).await;
        }

        for id in [1, 4, 6] {
            send(&app, "DELETE", &format!("/users/{}", id), None).await;

            let users = list(&app).await;
            assert_dense(&users);
            let orders: HashSet<_> = users.iter().map(|u| u.order).collect();
            assert_eq!(orders.len(), users.len());
        }

        // max order is 3 after resequencing, so the next user lands at 4
        let (_, created) = send(&app, "POST", "/users", Some(json!({"n": 6}))).await;
        assert_eq!(created["order"], json!(4));

        send(&app, "DELETE", "/users/3", None).await;
        let users = list(&app).await;
        assert_eq!(users.len(), 3);
        assert_dense(&users);
    }

    #[tokio::test]
    async fn test_delete_unknown_user_is_internal_error() {
        let app = setup_test_app(Arc::new(MemoryStore::new()));
        send(&app, "POST", "/users", Some(json!({"name": "Ali"}))).await;

        let (status, body) = send(&app, "DELETE", "/users/50", None).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], json!("Server xatosi"));
        let detail = body["detail"].as_str().unwrap();
        assert!(detail.contains("Failed to delete user 50"));
        assert!(detail.contains("No users row returned for delete"));
        assert_eq!(list(&app).await.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_non_numeric_user_id_is_internal_error() {
        let app = setup_test_app(Arc::new(MemoryStore::new()));
        send(&app, "POST", "/users", Some(json!({"name": "Ali"}))).await;

        let (status, body) = send(&app, "DELETE", "/users/abc", None).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["detail"].as_str().unwrap().contains("user abc"));
        assert_eq!(list(&app).await.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_reports_success_when_resequencing_fails() {
        let store = Arc::new(ReadOnlyUpdates(MemoryStore::new()));
        let app = setup_test_app(store);
        for name in ["a", "b", "c"] {
            send(&app, "POST", "/users", Some(json!({"name": name}))).await;
        }

        let (status, body) = send(&app, "DELETE", "/users/1", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true}));

        let orders: Vec<_> = list(&app).await.iter().map(|u| u.order).collect();
        assert_eq!(orders, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_resequence_users_counts_changes() {
        let store = MemoryStore::new();
        for order in [1, 3, 4, 9] {
            let mut row = Row::new();
            row.insert("order".into(), json!(order));
            store.insert(Table::Users, row).await.unwrap();
        }

        assert_eq!(resequence_users(&store).await.unwrap(), 3);
        assert_eq!(resequence_users(&store).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_user_rejects_malformed_json() {
        let app = setup_test_app(Arc::new(MemoryStore::new()));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/users")
                    .header("content-type", "application/json")
                    .body(Body::from("{invalid json}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        // Axum's Json extractor returns 400 for invalid JSON
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
