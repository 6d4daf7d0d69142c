use crate::AppState;
use crate::api::error::AppError;
use crate::models::{Operation, UnknownOperation, UserActionResult, UserLookupResponse};
use crate::services::user_admin::{set_user_active, user_id};
use axum::{
    Json,
    extract::{Path, State},
};

#[utoipa::path(
    get,
    path = "/api/users/{username}",
    params(
        ("username" = String, Path, description = "Litmos user name, matched case-insensitively")
    ),
    responses(
        (status = 200, description = "User record with details", body = UserLookupResponse),
        (status = 404, description = "User not found"),
        (status = 502, description = "Litmos API failure")
    ),
    tag = "users"
)]
pub async fn get_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<UserLookupResponse>, AppError> {
    let user = state
        .directory
        .find_user(&username)
        .await
        .map_err(|e| AppError::Upstream(format!("User lookup failed: {}", e)))?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    let details = match user_id(&user) {
        Some(id) => match state.directory.user_details(&id).await {
            Ok(details) => details,
            Err(e) => {
                tracing::warn!("Details for {} ({}) unavailable: {}", username, id, e);
                None
            }
        },
        None => None,
    };

    Ok(Json(UserLookupResponse {
        username,
        user,
        details,
    }))
}

#[utoipa::path(
    post,
    path = "/api/users/{username}/{action}",
    params(
        ("username" = String, Path, description = "Litmos user name"),
        ("action" = String, Path, description = "`activate` or `deactivate`")
    ),
    responses(
        (status = 200, description = "Outcome of the state change", body = UserActionResult),
        (status = 400, description = "Unknown action")
    ),
    tag = "users"
)]
pub async fn change_user_state(
    State(state): State<AppState>,
    Path((username, action)): Path<(String, String)>,
) -> Result<Json<UserActionResult>, AppError> {
    let operation: Operation = action
        .parse()
        .map_err(|e: UnknownOperation| AppError::BadRequest(e.to_string()))?;

    let result = set_user_active(state.directory.as_ref(), &username, operation).await;
    if !result.success {
        tracing::warn!("{} of {} not applied: {}", operation, username, result.message);
    }

    Ok(Json(result))
}
