//! Production rate limiting, graceful shutdown and snapshot persistence across restarts.

mod common;

use std::time::Duration;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::json;
use tempfile::tempdir;

use common::{spawn, spawn_with_store, test_config};
use opensprint::config::Environment;
use opensprint::storage::{SharedStore, StoreError};

#[tokio::test]
async fn production_rate_limit_returns_429() -> Result<()> {
    let cfg = test_config()
        .with_environment(Environment::Production)
        .with_rate_limit(3, Duration::from_secs(900));
    let srv = spawn(cfg).await?;

    for expected_remaining in ["2", "1", "0"] {
        let resp = srv.client.get(srv.url("/health")).send().await?;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["x-ratelimit-limit"], "3");
        assert_eq!(resp.headers()["x-ratelimit-remaining"], expected_remaining);
    }

    let resp = srv.client.get(srv.url("/health")).send().await?;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(resp.headers().contains_key("retry-after"));
    let (_, body) = common::read(resp).await?;
    assert_eq!(body["error"]["code"], "RATE_LIMIT_EXCEEDED");
    assert!(body["error"]["retryAfter"].as_u64().is_some_and(|s| s > 0 && s <= 900));
    Ok(())
}

#[tokio::test]
async fn rate_limit_is_off_outside_production() -> Result<()> {
    let srv = spawn(test_config().with_rate_limit(1, Duration::from_secs(900))).await?;
    for _ in 0..3 {
        let resp = srv.client.get(srv.url("/health")).send().await?;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!resp.headers().contains_key("x-ratelimit-limit"));
    }
    Ok(())
}

#[tokio::test]
async fn snapshot_survives_restart() -> Result<()> {
    let tmp = tempdir()?;
    let cfg = test_config().with_data_dir(tmp.path());
    let path = cfg.snapshot_path().unwrap_or_default();

    let first = spawn_with_store(cfg.clone(), SharedStore::open(&path)?).await?;
    let (_, token) = first.register("dana@example.com", "Dana").await?;
    let (status, _) = first.post("/api/projects", Some(&token), json!({ "name": "Persisted", "key": "PER" })).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert!(path.exists());

    // The running server owns the data directory.
    assert!(matches!(SharedStore::open(&path), Err(StoreError::Locked { .. })));
    first.stop().await?;

    // Same secret, fresh process state loaded from the snapshot: the old token still works.
    let second = spawn_with_store(cfg, SharedStore::open(&path)?).await?;
    let (status, body) = second.get("/api/projects", Some(&token)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["key"], "PER");
    let (status, _) = second.post("/api/auth/login", None, json!({ "email": "dana@example.com", "password": "password123" })).await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn graceful_shutdown_stops_accepting_and_releases_the_store() -> Result<()> {
    let tmp = tempdir()?;
    let cfg = test_config().with_data_dir(tmp.path());
    let path = cfg.snapshot_path().unwrap_or_default();
    let srv = spawn_with_store(cfg, SharedStore::open(&path)?).await?;
    let url = srv.url("/health");
    let resp = srv.client.get(&url).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);

    srv.stop().await?;
    assert!(reqwest::Client::new().get(&url).send().await.is_err());
    let reopened = SharedStore::open(&path)?;
    assert!(reopened.read().user_by_email("nobody@example.com").is_none());
    Ok(())
}
