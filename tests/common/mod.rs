//! Shared harness: run the real router on an ephemeral localhost port and talk to it over HTTP.
#![allow(dead_code)]

use std::time::Duration;

use anyhow::Result;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use opensprint::config::{Config, Environment};
use opensprint::server::{build_router, serve, AppState};
use opensprint::storage::SharedStore;

pub const SECRET: &str = "integration-test-secret-0123456789abcdef";

pub struct TestServer {
    pub base: String,
    pub store: SharedStore,
    pub client: Client,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<std::io::Result<()>>,
}

pub fn test_config() -> Config {
    Config::new(SECRET).with_environment(Environment::Test)
}

pub async fn spawn(config: Config) -> Result<TestServer> {
    spawn_with_store(config, SharedStore::in_memory()).await
}

pub async fn spawn_with_store(config: Config, store: SharedStore) -> Result<TestServer> {
    let app = build_router(AppState::new(config, store.clone()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (shutdown, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(serve(listener, app, async move {
        let _ = rx.await;
    }));
    Ok(TestServer { base: format!("http://{addr}"), store, client: Client::new(), shutdown, handle })
}

impl TestServer {
    /// Trigger graceful shutdown and wait for the server task, dropping every handle on its store.
    pub async fn stop(self) -> Result<()> {
        let TestServer { client, shutdown, handle, store, .. } = self;
        drop(client);
        let _ = shutdown.send(());
        tokio::time::timeout(Duration::from_secs(5), handle).await???;
        drop(store);
        Ok(())
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<(StatusCode, Value)> {
        let mut req = self.client.get(self.url(path));
        if let Some(t) = token {
            req = req.bearer_auth(t);
        }
        read(req.send().await?).await
    }

    pub async fn send(&self, method: reqwest::Method, path: &str, token: Option<&str>, body: Value) -> Result<(StatusCode, Value)> {
        let mut req = self.client.request(method, self.url(path)).json(&body);
        if let Some(t) = token {
            req = req.bearer_auth(t);
        }
        read(req.send().await?).await
    }

    pub async fn post(&self, path: &str, token: Option<&str>, body: Value) -> Result<(StatusCode, Value)> {
        self.send(reqwest::Method::POST, path, token, body).await
    }

    pub async fn put(&self, path: &str, token: Option<&str>, body: Value) -> Result<(StatusCode, Value)> {
        self.send(reqwest::Method::PUT, path, token, body).await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<(StatusCode, Value)> {
        let mut req = self.client.delete(self.url(path));
        if let Some(t) = token {
            req = req.bearer_auth(t);
        }
        read(req.send().await?).await
    }

    /// Register a user and return `(user id, token)`.
    pub async fn register(&self, email: &str, name: &str) -> Result<(String, String)> {
        let (status, body) = self
            .post("/api/auth/register", None, json!({ "email": email, "password": "password123", "name": name }))
            .await?;
        assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
        let id = body["data"]["user"]["id"].as_str().unwrap_or_default().to_string();
        let token = body["data"]["token"].as_str().unwrap_or_default().to_string();
        Ok((id, token))
    }
}

pub async fn read(resp: Response) -> Result<(StatusCode, Value)> {
    let status = resp.status();
    let body = resp.json::<Value>().await.unwrap_or(Value::Null);
    Ok((status, body))
}
