use crate::models::{Operation, UserActionResult};
use crate::services::litmos::UserDirectory;
use serde_json::Value;

fn flag_value(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// The user's `Id`, whether the API returned it as a string or a number
pub fn user_id(user: &Value) -> Option<String> {
    match user.get("Id")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Looks `username` up and flips its `Active` flag to match `operation`.
/// Never fails: every outcome is reported in the returned result.
pub async fn set_user_active(
    directory: &dyn UserDirectory,
    username: &str,
    operation: Operation,
) -> UserActionResult {
    let (label, done_message, already_message) = match operation {
        Operation::Activation => ("Activation", "User activated successfully", "Already active"),
        Operation::Deactivation => (
            "Deactivation",
            "User deactivated successfully",
            "Already inactive",
        ),
    };

    tracing::info!("{} requested for user {}", label, username);

    let user = match directory.find_user(username).await {
        Ok(Some(user)) => user,
        Ok(None) => return UserActionResult::failed(username, "User not found"),
        Err(e) => {
            tracing::warn!("Lookup for {} failed: {}", username, e);
            return UserActionResult::failed(username, format!("User lookup failed: {}", e));
        }
    };

    let Some(user_id) = user_id(&user) else {
        return UserActionResult::failed(username, "User ID not found");
    };

    let target = operation.target_active();
    if flag_value(user.get("Active")) == Some(target) {
        return UserActionResult::ok(username, already_message);
    }

    let mut body = user;
    body["Active"] = Value::Bool(target);

    match directory.update_user(&user_id, &body).await {
        Ok(200 | 204) => UserActionResult::ok(username, done_message),
        Ok(status) => UserActionResult::failed(username, format!("{} failed: {}", label, status)),
        Err(e) => {
            tracing::error!("{} of {} failed: {}", label, username, e);
            UserActionResult::failed(username, format!("{} failed: no response", label))
        }
    }
}
