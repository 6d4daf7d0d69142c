use crate::config::AppConfig;
use crate::infrastructure::http::{BodyError, HttpClient, HttpError};
use crate::models::Operation;
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Method, RequestBuilder};
use serde_json::{Value, json};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum LitmosError {
    #[error("no-response")]
    NoResponse(#[from] HttpError),

    #[error("{status}:{body}")]
    Rejected { status: u16, body: String },

    #[error(transparent)]
    Body(#[from] BodyError),

    #[error("server misconfiguration: missing LITMOS_API_TOKEN")]
    MissingToken,

    #[error("invalid Litmos URL: {0}")]
    InvalidUrl(String),

    #[error("failed to build request: {0}")]
    Request(#[from] reqwest::Error),
}

/// Acknowledgement of an accepted row action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionReceipt {
    pub status_code: u16,
}

/// The user API the job runner and admin routes talk to
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Activates or deactivates the user addressed by `identifier`
    async fn apply_action(
        &self,
        identifier: &str,
        operation: Operation,
    ) -> Result<ActionReceipt, LitmosError>;

    /// Searches for a user whose `UserName` matches case-insensitively
    async fn find_user(&self, username: &str) -> Result<Option<Value>, LitmosError>;

    async fn user_details(&self, user_id: &str) -> Result<Option<Value>, LitmosError>;

    /// Replaces the user record, returning the upstream status code
    async fn update_user(&self, user_id: &str, user: &Value) -> Result<u16, LitmosError>;
}

pub struct LitmosClient {
    http: HttpClient,
    base_url: String,
    api_key: String,
    source: String,
    action_url: String,
    token: Option<String>,
}

impl LitmosClient {
    pub fn new(config: &AppConfig, http: HttpClient) -> Self {
        Self {
            http,
            base_url: config.litmos_base_url.trim_end_matches('/').to_string(),
            api_key: config.litmos_api_key.clone(),
            source: config.litmos_source.clone(),
            action_url: config.action_url(),
            token: config.litmos_api_token.clone(),
        }
    }

    /// `{base}/users/{segments..}?source=..&{query..}&format=json`
    fn users_url(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url, LitmosError> {
        let mut url = Url::parse(&format!("{}/users", self.base_url))
            .map_err(|e| LitmosError::InvalidUrl(e.to_string()))?;

        url.path_segments_mut()
            .map_err(|_| LitmosError::InvalidUrl(self.base_url.clone()))?
            .extend(segments);

        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("source", &self.source);
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
            pairs.append_pair("format", "json");
        }

        Ok(url)
    }

    fn api_request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .client()
            .request(method, url)
            .header(ACCEPT, "application/json")
            .header("apikey", &self.api_key)
    }
}

#[async_trait]
impl UserDirectory for LitmosClient {
    async fn apply_action(
        &self,
        identifier: &str,
        operation: Operation,
    ) -> Result<ActionReceipt, LitmosError> {
        let token = self.token.as_deref().ok_or(LitmosError::MissingToken)?;

        let request = self
            .http
            .client()
            .post(&self.action_url)
            .bearer_auth(token)
            .header(ACCEPT, "application/json")
            .json(&json!({
                "user": { "email": identifier },
                "action": operation.verb(),
            }))
            .build()?;

        let response = self.http.execute(request).await?;

        if response.is_success() {
            Ok(ActionReceipt {
                status_code: response.status.as_u16(),
            })
        } else {
            Err(LitmosError::Rejected {
                status: response.status.as_u16(),
                body: response.body_preview().to_string(),
            })
        }
    }

    async fn find_user(&self, username: &str) -> Result<Option<Value>, LitmosError> {
        let url = self.users_url(&[], &[("search", username)])?;
        let request = self.api_request(Method::GET, url).build()?;
        let response = self.http.execute(request).await?;

        let Some(data) = response.parse_body()? else {
            return Ok(None);
        };

        Ok(select_user(&data, username).cloned())
    }

    async fn user_details(&self, user_id: &str) -> Result<Option<Value>, LitmosError> {
        let url = self.users_url(&[user_id], &[])?;
        let request = self.api_request(Method::GET, url).build()?;
        let response = self.http.execute(request).await?;

        Ok(response.parse_body()?.map(|details| match details {
            Value::Object(mut map) if map.contains_key("User") => {
                map.remove("User").unwrap_or(Value::Null)
            }
            other => other,
        }))
    }

    async fn update_user(&self, user_id: &str, user: &Value) -> Result<u16, LitmosError> {
        let url = self.users_url(&[user_id], &[])?;
        let request = self.api_request(Method::PUT, url).json(user).build()?;
        let response = self.http.execute(request).await?;
        Ok(response.status.as_u16())
    }
}

/// Candidate user records in a search response: `User`, `Users.User`,
/// a bare list, or a single object
fn candidate_users(data: &Value) -> Vec<&Value> {
    let nested = data
        .get("User")
        .or_else(|| data.get("Users").and_then(|users| users.get("User")));

    match (data, nested) {
        (_, Some(Value::Array(items))) => items.iter().collect(),
        (_, Some(single)) => vec![single],
        (Value::Array(items), None) => items.iter().collect(),
        (other, None) => vec![other],
    }
}

pub fn select_user<'a>(data: &'a Value, username: &str) -> Option<&'a Value> {
    let wanted = username.to_lowercase();
    candidate_users(data).into_iter().find(|user| {
        user.get("UserName")
            .and_then(Value::as_str)
            .is_some_and(|name| name.to_lowercase() == wanted)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_user_shapes() {
        let single = json!({"User": {"Id": "1", "UserName": "Alice"}});
        assert_eq!(select_user(&single, "alice").unwrap()["Id"], "1");

        let nested = json!({"Users": {"User": [
            {"Id": "1", "UserName": "alice"},
            {"Id": "2", "UserName": "bob"}
        ]}});
        assert_eq!(select_user(&nested, "BOB").unwrap()["Id"], "2");

        let list = json!([{"Id": "3", "UserName": "carol"}]);
        assert_eq!(select_user(&list, "carol").unwrap()["Id"], "3");

        let bare = json!({"Id": "4", "UserName": "dave"});
        assert_eq!(select_user(&bare, "dave").unwrap()["Id"], "4");

        assert!(select_user(&list, "mallory").is_none());
        assert!(select_user(&json!([]), "carol").is_none());
    }

    #[test]
    fn test_users_url() {
        let config = AppConfig {
            litmos_base_url: "https://litmos.example/v1.svc".to_string(),
            litmos_source: "ops tool".to_string(),
            ..AppConfig::default()
        };
        let http = HttpClient::new(
            &config,
            std::sync::Arc::new(crate::infrastructure::debug_log::DebugLog::disabled()),
        )
        .unwrap();
        let client = LitmosClient::new(&config, http);

        let url = client.users_url(&[], &[("search", "a&b")]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://litmos.example/v1.svc/users?source=ops+tool&search=a%26b&format=json"
        );

        let url = client.users_url(&["id/1"], &[]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://litmos.example/v1.svc/users/id%2F1?source=ops+tool&format=json"
        );
    }

    #[test]
    fn test_error_messages() {
        let err = LitmosError::Rejected {
            status: 404,
            body: "user missing".to_string(),
        };
        assert_eq!(err.to_string(), "404:user missing");
        assert_eq!(
            LitmosError::from(HttpError::NotReplayable).to_string(),
            "no-response"
        );
        assert_eq!(
            LitmosError::from(BodyError::Server(503)).to_string(),
            "Server error (503)"
        );
    }
}
