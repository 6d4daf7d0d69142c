#![allow(dead_code)]

use async_trait::async_trait;
use litmos_user_manager::config::AppConfig;
use litmos_user_manager::models::Operation;
use litmos_user_manager::services::litmos::{ActionReceipt, LitmosError, UserDirectory};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// In-memory stand-in for the Litmos API
#[derive(Default)]
pub struct MockDirectory {
    pub delay: Duration,
    pub failing: HashSet<String>,
    pub panicking: HashSet<String>,
    pub users: Mutex<HashMap<String, Value>>,
    pub calls: Mutex<Vec<(String, Operation)>>,
    active: AtomicUsize,
    pub peak: AtomicUsize,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_for(mut self, identifier: &str) -> Self {
        self.failing.insert(identifier.to_string());
        self
    }

    pub fn panicking_for(mut self, identifier: &str) -> Self {
        self.panicking.insert(identifier.to_string());
        self
    }

    pub fn with_user(self, user: Value) -> Self {
        let name = user["UserName"].as_str().unwrap_or_default().to_lowercase();
        self.users.lock().unwrap().insert(name, user);
        self
    }

    pub fn calls(&self) -> Vec<(String, Operation)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserDirectory for MockDirectory {
    async fn apply_action(
        &self,
        identifier: &str,
        operation: Operation,
    ) -> Result<ActionReceipt, LitmosError> {
        if self.panicking.contains(identifier) {
            panic!("directory blew up on {identifier}");
        }

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.calls
            .lock()
            .unwrap()
            .push((identifier.to_string(), operation));
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(identifier) {
            Err(LitmosError::Rejected {
                status: 400,
                body: "bad".to_string(),
            })
        } else {
            Ok(ActionReceipt { status_code: 200 })
        }
    }

    async fn find_user(&self, username: &str) -> Result<Option<Value>, LitmosError> {
        Ok(self.users.lock().unwrap().get(&username.to_lowercase()).cloned())
    }

    async fn user_details(&self, user_id: &str) -> Result<Option<Value>, LitmosError> {
        Ok(Some(json!({ "Id": user_id, "Courses": [] })))
    }

    async fn update_user(&self, _user_id: &str, user: &Value) -> Result<u16, LitmosError> {
        let name = user["UserName"].as_str().unwrap_or_default().to_lowercase();
        self.users.lock().unwrap().insert(name, user.clone());
        Ok(200)
    }
}

/// Development config staging uploads in `upload_dir`, with a token set
pub fn test_config(upload_dir: &Path) -> AppConfig {
    AppConfig {
        litmos_api_token: Some("test-token".to_string()),
        upload_dir: upload_dir.to_path_buf(),
        ..AppConfig::development()
    }
}

/// CSV with a `username` header and `count` users
pub fn users_csv(count: usize) -> String {
    let mut csv = String::from("username,first_name\n");
    for i in 0..count {
        csv.push_str(&format!("user{}@example.com,User {}\n", i, i));
    }
    csv
}
