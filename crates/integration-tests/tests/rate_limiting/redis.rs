use indoc::{formatdoc, indoc};
use integration_tests::TestServer;
use reqwest::Method;
use serde_json::Value;

fn unique_prefix(test: &str) -> String {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis();

    format!("test_{test}_{timestamp}:")
}

#[tokio::test]
async fn unreachable_redis_fails_open() {
    let config = indoc! {r#"
        [rate_limits]
        enabled = true
        store_timeout = "100ms"

        [rate_limits.storage]
        type = "redis"
        url = "redis://127.0.0.1:1/0"

        [[rate_limits.rules]]
        path = "/login"
        rate = "1/h"
    "#};

    let server = TestServer::start(config).await;

    for _ in 0..3 {
        let response = server.client.send_as(Method::POST, "/login", "203.0.113.7").await;
        assert_eq!(response.status(), 200);

        let body: Value = response.json().await.unwrap();
        assert_eq!(body["rate_limit"]["limited"], Value::Bool(false));
        assert_eq!(body["rate_limit"]["count"], Value::from(0.0));
    }
}

#[tokio::test]
#[ignore = "needs a Redis server on localhost:6379"]
async fn redis_counters_are_shared_between_instances() {
    let config = formatdoc! {r#"
        [rate_limits]
        enabled = true

        [rate_limits.storage]
        type = "redis"
        url = "redis://localhost:6379/0"
        key_prefix = "{prefix}"

        [[rate_limits.rules]]
        path = "/login"
        rate = "2/m"
    "#, prefix = unique_prefix("shared")};

    let first = TestServer::start(&config).await;
    let second = TestServer::start(&config).await;

    let statuses = [
        first.client.send_as(Method::POST, "/login", "203.0.113.7").await.status(),
        second.client.send_as(Method::POST, "/login", "203.0.113.7").await.status(),
        first.client.send_as(Method::POST, "/login", "203.0.113.7").await.status(),
        second.client.send_as(Method::POST, "/login", "198.51.100.1").await.status(),
    ];

    assert_eq!(statuses.map(|status| status.as_u16()), [200, 200, 429, 200]);
}

#[tokio::test]
#[ignore = "needs a Redis server on localhost:6379"]
async fn redis_multi_rate() {
    let config = formatdoc! {r#"
        [rate_limits]
        enabled = true

        [rate_limits.storage]
        type = "redis"
        url = "redis://localhost:6379/0"
        key_prefix = "{prefix}"

        [[rate_limits.rules]]
        path = "/comments"
        rate = ["3/h", "2/m"]
    "#, prefix = unique_prefix("multi_rate")};

    let server = TestServer::start(&config).await;

    let mut statuses = Vec::new();

    for _ in 0..3 {
        let response = server.client.send_as(Method::POST, "/comments", "203.0.113.7").await;
        statuses.push(response.status().as_u16());
    }

    assert_eq!(statuses, [200, 200, 429]);
}
