use litmos_user_manager::config::AppConfig;
use litmos_user_manager::infrastructure::debug_log::DebugLog;
use litmos_user_manager::infrastructure::http::HttpClient;
use litmos_user_manager::models::{Operation, UserActionResult};
use litmos_user_manager::services::litmos::{LitmosClient, LitmosError, UserDirectory};
use litmos_user_manager::services::user_admin::set_user_active;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> AppConfig {
    AppConfig {
        litmos_base_url: server.uri(),
        litmos_action_url: Some(format!("{}/actions", server.uri())),
        litmos_api_token: Some("tok".to_string()),
        litmos_api_key: "key".to_string(),
        litmos_source: "sourceapp".to_string(),
        max_retries: 2,
        ..AppConfig::development()
    }
}

fn client_for(config: &AppConfig) -> LitmosClient {
    let http = HttpClient::new(config, Arc::new(DebugLog::disabled())).unwrap();
    LitmosClient::new(config, http)
}

#[tokio::test]
async fn test_apply_action_posts_bearer_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/actions"))
        .and(header("authorization", "Bearer tok"))
        .and(body_json(json!({
            "user": { "email": "a@example.com" },
            "action": "deactivate",
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&config_for(&server));
    let receipt = client
        .apply_action("a@example.com", Operation::Deactivation)
        .await
        .unwrap();

    assert_eq!(receipt.status_code, 201);
}

#[tokio::test]
async fn test_apply_action_retries_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/actions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/actions"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&config_for(&server));
    let receipt = client
        .apply_action("a@example.com", Operation::Activation)
        .await
        .unwrap();

    assert_eq!(receipt.status_code, 200);
}

#[tokio::test]
async fn test_apply_action_reports_last_response_after_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/actions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .expect(3)
        .mount(&server)
        .await;

    let client = client_for(&config_for(&server));
    let err = client
        .apply_action("a@example.com", Operation::Activation)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "503:busy");
}

#[tokio::test]
async fn test_apply_action_rejected_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/actions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("unknown user"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&config_for(&server));
    let err = client
        .apply_action("ghost@example.com", Operation::Deactivation)
        .await
        .unwrap_err();

    assert!(matches!(err, LitmosError::Rejected { status: 400, .. }));
    assert_eq!(err.to_string(), "400:unknown user");
}

#[tokio::test]
async fn test_apply_action_requires_token() {
    let server = MockServer::start().await;
    let config = AppConfig {
        litmos_api_token: None,
        ..config_for(&server)
    };

    let err = client_for(&config)
        .apply_action("a@example.com", Operation::Activation)
        .await
        .unwrap_err();

    assert!(matches!(err, LitmosError::MissingToken));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_find_user_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .and(query_param("source", "sourceapp"))
        .and(query_param("search", "alice"))
        .and(query_param("format", "json"))
        .and(header("apikey", "key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Users": { "User": [
                { "Id": "1", "UserName": "alice.smith" },
                { "Id": "2", "UserName": "Alice" }
            ]}
        })))
        .mount(&server)
        .await;

    let client = client_for(&config_for(&server));
    let user = client.find_user("alice").await.unwrap().unwrap();
    assert_eq!(user["Id"], "2");
}

#[tokio::test]
async fn test_find_user_xml() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "<Users><User><Id>7</Id><UserName>Bob</UserName><Active>true</Active></User></Users>",
            "application/xml",
        ))
        .mount(&server)
        .await;

    let client = client_for(&config_for(&server));
    let user = client.find_user("bob").await.unwrap().unwrap();
    assert_eq!(user["Id"], "7");
    assert_eq!(user["Active"], "true");

    assert!(client.find_user("carol").await.unwrap().is_none());
}

#[tokio::test]
async fn test_find_user_xml_entities() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "<Users><User><Id>9</Id><UserName>obrien</UserName>\
             <LastName>O&apos;Brien</LastName><CompanyName>Smith &amp; Jones</CompanyName>\
             </User></Users>",
            "application/xml",
        ))
        .mount(&server)
        .await;

    let user = client_for(&config_for(&server))
        .find_user("obrien")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user["LastName"], "O'Brien");
    assert_eq!(user["CompanyName"], "Smith & Jones");
}

#[tokio::test]
async fn test_apply_action_honours_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/actions"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/actions"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    // Backoff alone would wait a minute before the retry
    let config = AppConfig {
        backoff_factor: 60.0,
        ..config_for(&server)
    };
    let client = client_for(&config);
    let receipt = tokio::time::timeout(
        Duration::from_secs(5),
        client.apply_action("a@example.com", Operation::Activation),
    )
    .await
    .expect("Retry-After was not honoured")
    .unwrap();

    assert_eq!(receipt.status_code, 200);
}

#[tokio::test]
async fn test_apply_action_unreachable_host_is_no_response() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let config = AppConfig {
        litmos_base_url: format!("http://127.0.0.1:{port}"),
        litmos_action_url: Some(format!("http://127.0.0.1:{port}/actions")),
        litmos_api_token: Some("tok".to_string()),
        max_retries: 1,
        ..AppConfig::development()
    };
    let err = client_for(&config)
        .apply_action("a@example.com", Operation::Deactivation)
        .await
        .unwrap_err();

    assert!(matches!(err, LitmosError::NoResponse(_)));
    assert_eq!(err.to_string(), "no-response");
}

#[tokio::test]
async fn test_html_response_is_written_to_debug_log() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html><body>Maintenance</body></html>", "text/html"),
        )
        .mount(&server)
        .await;

    let log_dir = tempfile::tempdir().unwrap();
    let config = config_for(&server);
    let http = HttpClient::new(&config, Arc::new(DebugLog::new(log_dir.path()))).unwrap();
    let client = LitmosClient::new(&config, http);

    assert!(client.find_user("bob").await.is_err());

    let log = std::fs::read_to_string(log_dir.path().join("debug.jsonl")).unwrap();
    let entries: Vec<serde_json::Value> = log
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["status"], 200);
    assert_eq!(entries[0]["content_type"], "text/html");
    assert!(
        entries[0]["body_start"]
            .as_str()
            .unwrap()
            .contains("Maintenance")
    );
    assert!(entries[0]["url"].as_str().unwrap().contains("/users"));
}

#[tokio::test]
async fn test_find_user_html_error_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<!DOCTYPE html><html><body>Login</body></html>", "text/html"),
        )
        .mount(&server)
        .await;

    let err = client_for(&config_for(&server))
        .find_user("bob")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "API returned HTML error page (status 200)");
}

#[tokio::test]
async fn test_user_details_unwraps_user() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "User": { "Id": "7", "FirstName": "Bob" }
        })))
        .mount(&server)
        .await;

    let details = client_for(&config_for(&server))
        .user_details("7")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(details, json!({ "Id": "7", "FirstName": "Bob" }));
}

#[tokio::test]
async fn test_deactivate_single_user_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .and(query_param("search", "bob"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "User": { "Id": "7", "UserName": "bob", "Active": true }
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/users/7"))
        .and(body_json(json!({ "Id": "7", "UserName": "bob", "Active": false })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&config_for(&server));
    let result = set_user_active(&client, "bob", Operation::Deactivation).await;

    assert_eq!(
        result,
        UserActionResult::ok("bob", "User deactivated successfully")
    );
}
