//! Success envelopes and small extractor adapters shared by the route modules.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Json, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::storage::{SharedStore, Store, StoreError};

#[derive(Serialize)]
struct Body<'a, T> {
    success: bool,
    data: &'a T,
}

/// `{success: true, data}` with the given status.
pub struct Envelope<T>(pub StatusCode, pub T);

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        (self.0, Json(Body { success: true, data: &self.1 })).into_response()
    }
}

pub fn ok<T: Serialize>(data: T) -> Envelope<T> {
    Envelope(StatusCode::OK, data)
}

pub fn created<T: Serialize>(data: T) -> Envelope<T> {
    Envelope(StatusCode::CREATED, data)
}

/// `{success: true, message}` for operations with nothing to return.
pub fn message(msg: &str) -> Response {
    Json(serde_json::json!({ "success": true, "message": msg })).into_response()
}

/// Unwrap a JSON body, turning axum's rejection into the error envelope.
pub fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| AppError::bad_request("INVALID_BODY".to_string(), e.body_text()))
}

pub fn query_params<T>(params: Result<Query<T>, QueryRejection>) -> AppResult<T> {
    params
        .map(|Query(v)| v)
        .map_err(|e| AppError::bad_request("INVALID_QUERY".to_string(), e.body_text()))
}

/// Run CPU-heavy work (password hashing) off the async workers.
pub async fn blocking<F, T>(f: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::internal("INTERNAL_ERROR".to_string(), e.to_string()))?
}

/// Commit a store mutation from the blocking pool; the snapshot write never runs on an async worker.
pub async fn mutate<F, T>(store: &SharedStore, f: F) -> AppResult<T>
where
    F: FnOnce(&mut Store) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone();
    blocking(move || store.write(f).map_err(AppError::from)).await
}

/// `null` in a JSON body means "clear"; an absent field means "leave as is".
pub fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: serde::Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    serde::Deserialize::deserialize(de).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "double_option")]
        assignee_id: Option<Option<String>>,
    }

    #[test]
    fn double_option_distinguishes_null_from_absent() {
        let absent: Patch = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.assignee_id, None);
        let cleared: Patch = serde_json::from_str(r#"{"assignee_id": null}"#).unwrap();
        assert_eq!(cleared.assignee_id, Some(None));
        let set: Patch = serde_json::from_str(r#"{"assignee_id": "u1"}"#).unwrap();
        assert_eq!(set.assignee_id, Some(Some("u1".into())));
    }

    #[tokio::test]
    async fn blocking_propagates_errors() {
        let out: AppResult<u8> = blocking(|| Err(AppError::bad_request("X", "y"))).await;
        assert_eq!(out.unwrap_err().http_status(), 400);
        assert_eq!(blocking(|| Ok(7u8)).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn mutate_maps_store_errors() {
        let store = SharedStore::in_memory();
        let err = mutate(&store, |s| s.set_user_active("ghost", false)).await.unwrap_err();
        assert_eq!(err.http_status(), 404);
    }
}
