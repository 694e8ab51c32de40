use std::net::SocketAddr;
use std::time::Duration;

use config::Config;
use reqwest::Method;
use server::ServeConfig;
use tokio::net::TcpListener;
use tokio::time::timeout;

/// Test client for making HTTP requests to the test server
pub struct TestClient {
    base_url: String,
    client: reqwest::Client,
}

impl TestClient {
    /// Create a new test client for the given base URL
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    /// Start a request to the given path, for tests that need custom headers
    pub fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.client.request(method, format!("{}{}", self.base_url, path))
    }

    /// Send a GET request to the given path
    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.request(Method::GET, path).send().await.unwrap()
    }

    /// Send a request to the given path as the caller at `address`
    pub async fn send_as(&self, method: Method, path: &str, address: &str) -> reqwest::Response {
        self.request(method, path)
            .header("x-forwarded-for", address)
            .send()
            .await
            .unwrap()
    }
}

/// Test server that manages the lifecycle of a server instance
pub struct TestServer {
    pub client: TestClient,
    pub address: SocketAddr,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a new test server with the given TOML configuration
    pub async fn start(config_toml: &str) -> Self {
        let config: Config = toml::from_str(config_toml).unwrap();

        // Find an available port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let serve_config = ServeConfig::new(config, Some(address));

        let (tx, mut rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(async move {
            // Drop the listener so the server can bind to the address
            drop(listener);

            let _ = tx.send(server::serve(serve_config).await);
        });

        tokio::time::sleep(Duration::from_millis(100)).await;

        if let Ok(Err(e)) = rx.try_recv() {
            eprintln!("Server failed to start: {e}");
            std::process::exit(1);
        }

        let client = TestClient::new(format!("http://{address}"));

        // Verify the server is actually running by making a simple request
        let mut retries = 10;
        while retries > 0 {
            if timeout(Duration::from_millis(100), client.request(Method::GET, "/").send())
                .await
                .is_ok_and(|response| response.is_ok())
            {
                break;
            }
            retries -= 1;
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        TestServer {
            client,
            address,
            _handle: handle,
        }
    }
}

/// Status and rate limit headers of a response, for snapshots.
///
/// `X-RateLimit-Reset` and `Retry-After` depend on the wall clock and are left out.
pub fn summary(response: &reqwest::Response) -> serde_json::Value {
    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    serde_json::json!({
        "status": response.status().as_u16(),
        "limit": header("x-ratelimit-limit"),
        "remaining": header("x-ratelimit-remaining"),
    })
}
