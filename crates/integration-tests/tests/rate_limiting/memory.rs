use indoc::indoc;
use integration_tests::{TestServer, summary};
use reqwest::Method;
use serde_json::Value;

#[tokio::test]
async fn callers_are_limited_independently() {
    let config = indoc! {r#"
        [rate_limits]
        enabled = true

        [[rate_limits.rules]]
        path = "/login"
        rate = "2/m"
    "#};

    let server = TestServer::start(config).await;

    let mut results = Vec::new();

    for address in ["203.0.113.7", "203.0.113.7", "203.0.113.7", "198.51.100.1"] {
        let response = server.client.send_as(Method::POST, "/login", address).await;
        results.push(summary(&response));
    }

    insta::assert_json_snapshot!(results, @r#"
    [
      {
        "status": 200,
        "limit": null,
        "remaining": null
      },
      {
        "status": 200,
        "limit": null,
        "remaining": null
      },
      {
        "status": 429,
        "limit": "2",
        "remaining": "0"
      },
      {
        "status": 200,
        "limit": null,
        "remaining": null
      }
    ]
    "#);
}

#[tokio::test]
async fn rejection_carries_retry_headers() {
    let config = indoc! {r#"
        [rate_limits]
        enabled = true

        [[rate_limits.rules]]
        path = "/login"
        rate = "1/h"
    "#};

    let server = TestServer::start(config).await;

    server.client.send_as(Method::POST, "/login", "203.0.113.7").await;
    let response = server.client.send_as(Method::POST, "/login", "203.0.113.7").await;

    assert_eq!(response.status(), 429);

    let header = |name: &str| -> i64 { response.headers()[name].to_str().unwrap().parse().unwrap() };

    let retry_after = header("retry-after");
    assert!((3599..=3600).contains(&retry_after), "retry-after was {retry_after}");
    assert!(header("x-ratelimit-reset") > 1_700_000_000);
    assert_eq!(header("x-ratelimit-limit"), 1);
    assert_eq!(header("x-ratelimit-remaining"), 0);

    insta::assert_snapshot!(response.text().await.unwrap(), @"Rate limit exceeded");
}

#[tokio::test]
async fn tighter_quota_blocks_first() {
    let config = indoc! {r#"
        [rate_limits]
        enabled = true

        [[rate_limits.rules]]
        path = "/comments"
        rate = ["3/h", "2/m"]
    "#};

    let server = TestServer::start(config).await;

    let mut results = Vec::new();

    for _ in 0..3 {
        let response = server.client.send_as(Method::POST, "/comments", "203.0.113.7").await;
        results.push(summary(&response));
    }

    insta::assert_json_snapshot!(results, @r#"
    [
      {
        "status": 200,
        "limit": null,
        "remaining": null
      },
      {
        "status": 200,
        "limit": null,
        "remaining": null
      },
      {
        "status": 429,
        "limit": "2",
        "remaining": "0"
      }
    ]
    "#);
}

#[tokio::test]
async fn method_filter_leaves_other_methods_alone() {
    let config = indoc! {r#"
        [rate_limits]
        enabled = true

        [[rate_limits.rules]]
        path = "/submit"
        rate = "1/m"
        methods = ["POST"]
    "#};

    let server = TestServer::start(config).await;

    for _ in 0..5 {
        let response = server.client.send_as(Method::GET, "/submit", "203.0.113.7").await;
        assert_eq!(response.status(), 200);

        let body: Value = response.json().await.unwrap();
        assert_eq!(body["rate_limit"], Value::Null);
    }

    let first = server.client.send_as(Method::POST, "/submit", "203.0.113.7").await;
    let second = server.client.send_as(Method::POST, "/submit", "203.0.113.7").await;

    assert_eq!(first.status(), 200);
    assert_eq!(second.status(), 429);
}

#[tokio::test]
async fn soft_limit_flags_the_request() {
    let config = indoc! {r#"
        [rate_limits]
        enabled = true

        [[rate_limits.rules]]
        path = "/search"
        name = "search"
        rate = "1/m"
        block = false
    "#};

    let server = TestServer::start(config).await;

    let mut bodies = Vec::new();

    for _ in 0..2 {
        let response = server.client.send_as(Method::GET, "/search", "203.0.113.7").await;
        assert_eq!(response.status(), 200);

        let mut body: Value = response.json().await.unwrap();
        body["rate_limit"]["reset"] = Value::from("[reset]");
        bodies.push(body);
    }

    insta::assert_json_snapshot!(bodies, @r#"
    [
      {
        "operation": "search",
        "rate_limit": {
          "limited": false,
          "count": 1.0,
          "limit": 1,
          "reset": "[reset]"
        }
      },
      {
        "operation": "search",
        "rate_limit": {
          "limited": true,
          "count": 2.0,
          "limit": 1,
          "reset": "[reset]"
        }
      }
    ]
    "#);
}

#[tokio::test]
async fn header_key_groups_callers_by_api_key() {
    let config = indoc! {r#"
        [rate_limits]
        enabled = true

        [[rate_limits.rules]]
        path = "/api"
        key = "header:X-Api-Key"
        rate = "1/m"
    "#};

    let server = TestServer::start(config).await;

    let send = |key: &'static str, address: &'static str| {
        server
            .client
            .request(Method::GET, "/api")
            .header("x-api-key", key)
            .header("x-forwarded-for", address)
            .send()
    };

    let first = send("key-a", "203.0.113.7").await.unwrap();
    let other_address = send("key-a", "198.51.100.1").await.unwrap();
    let other_key = send("key-b", "203.0.113.7").await.unwrap();

    assert_eq!(first.status(), 200);
    assert_eq!(other_address.status(), 429);
    assert_eq!(other_key.status(), 200);
}

#[tokio::test]
async fn identity_key_falls_back_to_address() {
    let config = indoc! {r#"
        [server.client_identification]
        enabled = true
        client_id.http_header = "X-Client-Id"

        [rate_limits]
        enabled = true

        [[rate_limits.rules]]
        path = "/profile"
        key = "identity"
        rate = "1/m"
    "#};

    let server = TestServer::start(config).await;

    let as_client = |client: &'static str| {
        server
            .client
            .request(Method::POST, "/profile")
            .header("x-client-id", client)
            .header("x-forwarded-for", "203.0.113.7")
            .send()
    };

    assert_eq!(as_client("alice").await.unwrap().status(), 200);
    assert_eq!(as_client("bob").await.unwrap().status(), 200);
    assert_eq!(as_client("alice").await.unwrap().status(), 429);

    let anonymous = server.client.send_as(Method::POST, "/profile", "203.0.113.7").await;
    let anonymous_again = server.client.send_as(Method::POST, "/profile", "203.0.113.7").await;

    assert_eq!(anonymous.status(), 200);
    assert_eq!(anonymous_again.status(), 429);
}

#[tokio::test]
async fn operations_are_counted_separately() {
    let config = indoc! {r#"
        [rate_limits]
        enabled = true

        [[rate_limits.rules]]
        path = "/login"
        rate = "1/m"

        [[rate_limits.rules]]
        path = "/signup"
        rate = "1/m"
    "#};

    let server = TestServer::start(config).await;

    assert_eq!(server.client.send_as(Method::POST, "/login", "203.0.113.7").await.status(), 200);
    assert_eq!(server.client.send_as(Method::POST, "/signup", "203.0.113.7").await.status(), 200);
    assert_eq!(server.client.send_as(Method::POST, "/login", "203.0.113.7").await.status(), 429);
}

#[tokio::test]
async fn connection_address_is_used_without_forwarding_headers() {
    let config = indoc! {r#"
        [rate_limits]
        enabled = true

        [[rate_limits.rules]]
        path = "/login"
        rate = "1/m"
    "#};

    let server = TestServer::start(config).await;

    assert_eq!(server.client.get("/login").await.status(), 200);
    assert_eq!(server.client.get("/login").await.status(), 429);
}

#[tokio::test]
async fn disabled_rate_limiting() {
    let config = indoc! {r#"
        [rate_limits]
        enabled = false

        [[rate_limits.rules]]
        path = "/login"
        rate = "1/m"
    "#};

    let server = TestServer::start(config).await;

    for _ in 0..5 {
        assert_eq!(server.client.send_as(Method::POST, "/login", "203.0.113.7").await.status(), 200);
    }
}
