//! etcd v2 client over HTTP.
//!
//! Requests go to the first configured server that accepts a connection.
//! Watches are long-polls (`wait=true`) and carry no request timeout; every
//! other request is bounded by the client's request timeout.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{EtcdErrorBody, StoreError, StoreResult};
use crate::types::Response;
use crate::{normalize_key, KvStore};

/// Default bound on non-watch requests.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for an etcd v2 cluster.
#[derive(Debug, Clone)]
pub struct EtcdClient {
    client: reqwest::Client,
    servers: Vec<String>,
    request_timeout: Duration,
}

impl EtcdClient {
    /// Create a client for the given server base URLs (`http://host:port`).
    pub fn new(servers: Vec<String>) -> StoreResult<Self> {
        let servers: Vec<String> = servers
            .into_iter()
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if servers.is_empty() {
            return Err(StoreError::NoServers);
        }

        let client = reqwest::Client::builder().build()?;

        Ok(Self {
            client,
            servers,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Override the bound on non-watch requests.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The configured servers, in failover order.
    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    fn key_url(server: &str, key: &str) -> String {
        format!("{}/v2/keys{}", server, normalize_key(key))
    }

    /// Send a request built by `build` for each server in turn until one
    /// accepts the connection.
    async fn send<F>(&self, key: &str, timeout: Option<Duration>, build: F) -> StoreResult<Response>
    where
        F: Fn(&reqwest::Client, String) -> reqwest::RequestBuilder,
    {
        let mut last_error = StoreError::NoServers;

        for server in &self.servers {
            let url = Self::key_url(server, key);
            let mut request = build(&self.client, url);
            if let Some(timeout) = timeout {
                request = request.timeout(timeout);
            }

            match request.send().await {
                Ok(response) => return Self::decode(response).await,
                Err(e) if e.is_connect() => {
                    warn!(server = %server, error = %e, "Store server unreachable, trying next");
                    last_error = StoreError::Http(e);
                }
                Err(e) => return Err(StoreError::Http(e)),
            }
        }

        Err(last_error)
    }

    async fn decode(response: reqwest::Response) -> StoreResult<Response> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            return Ok(serde_json::from_str(&body)?);
        }

        match serde_json::from_str::<EtcdErrorBody>(&body) {
            Ok(err) => Err(err.into()),
            Err(_) => Err(StoreError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            }),
        }
    }
}

#[async_trait]
impl KvStore for EtcdClient {
    async fn get(&self, key: &str, sorted: bool, recursive: bool) -> StoreResult<Response> {
        debug!(key = %key, recursive, "Store get");
        self.send(key, Some(self.request_timeout), |client, url| {
            client.get(url).query(&[
                ("sorted", sorted.to_string()),
                ("recursive", recursive.to_string()),
            ])
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: u64) -> StoreResult<Response> {
        debug!(key = %key, "Store set");
        self.send(key, Some(self.request_timeout), |client, url| {
            client.put(url).form(&write_form(value, ttl))
        })
        .await
    }

    async fn create(&self, key: &str, value: &str, ttl: u64) -> StoreResult<Response> {
        debug!(key = %key, "Store create");
        self.send(key, Some(self.request_timeout), |client, url| {
            client
                .put(url)
                .query(&[("prevExist", "false")])
                .form(&write_form(value, ttl))
        })
        .await
    }

    async fn delete(&self, key: &str, recursive: bool) -> StoreResult<Response> {
        debug!(key = %key, recursive, "Store delete");
        self.send(key, Some(self.request_timeout), |client, url| {
            client
                .delete(url)
                .query(&[("recursive", recursive.to_string())])
        })
        .await
    }

    async fn watch(&self, prefix: &str, wait_index: u64, recursive: bool) -> StoreResult<Response> {
        debug!(prefix = %prefix, wait_index, "Store watch");
        self.send(prefix, None, |client, url| {
            let mut query = vec![
                ("wait", "true".to_string()),
                ("recursive", recursive.to_string()),
            ];
            if wait_index > 0 {
                query.push(("waitIndex", wait_index.to_string()));
            }
            client.get(url).query(&query)
        })
        .await
    }
}

fn write_form(value: &str, ttl: u64) -> Vec<(&'static str, String)> {
    let mut form = vec![("value", value.to_string())];
    if ttl > 0 {
        form.push(("ttl", ttl.to_string()));
    }
    form
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Action;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_requires_servers() {
        assert!(matches!(
            EtcdClient::new(vec![]).unwrap_err(),
            StoreError::NoServers
        ));
        assert!(matches!(
            EtcdClient::new(vec!["  ".to_string()]).unwrap_err(),
            StoreError::NoServers
        ));

        let client = EtcdClient::new(vec![
            " http://e1:4001/ ".to_string(),
            String::new(),
            "http://e2:4001".to_string(),
        ])
        .unwrap();
        assert_eq!(client.servers(), ["http://e1:4001", "http://e2:4001"]);
    }

    #[tokio::test]
    async fn test_slow_server_times_out_without_failover() {
        let slow = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&slow)
            .await;
        let fallback = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&fallback)
            .await;

        let client = EtcdClient::new(vec![slow.uri(), fallback.uri()])
            .unwrap()
            .with_request_timeout(Duration::from_millis(100));
        let err = client.get("/registry/controllers", false, true).await.unwrap_err();
        assert!(matches!(err, StoreError::Http(ref e) if e.is_timeout()));
    }

    #[tokio::test]
    async fn test_get_decodes_directory() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/keys/registry/controllers"))
            .and(query_param("recursive", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "action": "get",
                "node": {
                    "key": "/registry/controllers",
                    "dir": true,
                    "nodes": [{"key": "/registry/controllers/web", "value": "{}", "modifiedIndex": 4, "createdIndex": 4}]
                }
            })))
            .mount(&server)
            .await;

        let client = EtcdClient::new(vec![server.uri()]).unwrap();
        let resp = client.get("/registry/controllers", false, true).await.unwrap();
        assert_eq!(resp.action, Action::Get);
        assert_eq!(resp.children().len(), 1);
        assert_eq!(resp.children()[0].key, "/registry/controllers/web");
    }

    #[tokio::test]
    async fn test_not_found_maps_to_error_code() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/keys/registry/services/specs"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "errorCode": 100,
                "message": "Key not found",
                "cause": "/registry/services/specs",
                "index": 3
            })))
            .mount(&server)
            .await;

        let client = EtcdClient::new(vec![server.uri()]).unwrap();
        let err = client
            .get("/registry/services/specs", false, true)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_unexpected_body_is_not_conflated_with_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = EtcdClient::new(vec![server.uri()]).unwrap();
        let err = client.get("/x", false, false).await.unwrap_err();
        assert!(!err.is_not_found());
        assert!(matches!(err, StoreError::UnexpectedStatus { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_create_sends_prev_exist_false() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v2/keys/registry/hosts/m1/tasks/t1"))
            .and(query_param("prevExist", "false"))
            .and(body_string_contains("value=payload"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "action": "create",
                "node": {"key": "/registry/hosts/m1/tasks/t1", "value": "payload", "modifiedIndex": 7, "createdIndex": 7}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = EtcdClient::new(vec![server.uri()]).unwrap();
        let resp = client
            .create("/registry/hosts/m1/tasks/t1", "payload", 0)
            .await
            .unwrap();
        assert_eq!(resp.action, Action::Create);
        assert_eq!(resp.modified_index(), Some(7));
    }

    #[tokio::test]
    async fn test_watch_sends_wait_index() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/keys/registry/controllers"))
            .and(query_param("wait", "true"))
            .and(query_param("waitIndex", "12"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "action": "set",
                "node": {"key": "/registry/controllers/web", "value": "{}", "modifiedIndex": 12, "createdIndex": 2}
            })))
            .mount(&server)
            .await;

        let client = EtcdClient::new(vec![server.uri()]).unwrap();
        let resp = client.watch("/registry/controllers", 12, true).await.unwrap();
        assert_eq!(resp.action, Action::Set);
        assert_eq!(resp.modified_index(), Some(12));
    }

    #[tokio::test]
    async fn test_fails_over_to_next_server() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v2/keys/registry/controllers/web"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "action": "delete",
                "node": {"key": "/registry/controllers/web", "modifiedIndex": 9, "createdIndex": 2}
            })))
            .expect(1)
            .mount(&server)
            .await;

        // Nothing listens on port 1.
        let client = EtcdClient::new(vec!["http://127.0.0.1:1".to_string(), server.uri()]).unwrap();
        let resp = client.delete("/registry/controllers/web", false).await.unwrap();
        assert_eq!(resp.action, Action::Delete);
    }
}
