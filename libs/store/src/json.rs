//! JSON helpers over a [`Backend`].
//!
//! Values are stored in canonical form (see [`crate::canonical_json`]). A
//! node whose data is empty or does not parse is treated as absent.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::{canonical_json, Backend, PutOptions, PutOutcome, StoreResult};

/// Encodes a value as canonical JSON bytes.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> StoreResult<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    Ok(canonical_json(&value).into_bytes())
}

/// Reads and decodes a node.
pub async fn get_json<T: DeserializeOwned>(
    backend: &dyn Backend,
    path: &str,
) -> StoreResult<Option<T>> {
    let Some(data) = backend.get(path).await? else {
        return Ok(None);
    };
    if data.is_empty() {
        return Ok(None);
    }
    match serde_json::from_slice(&data) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(path = %path, error = %e, "Malformed record, treating as absent");
            Ok(None)
        }
    }
}

/// Encodes and writes a node.
pub async fn put_json<T: Serialize + ?Sized>(
    backend: &dyn Backend,
    path: &str,
    value: &T,
    opts: PutOptions,
) -> StoreResult<PutOutcome> {
    backend.put(path, encode(value)?, opts).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBackend;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemoryBackend::new();
        put_json(&store, "/a/b", &json!({"y": 1, "x": [1, 2]}), PutOptions::default())
            .await
            .unwrap();
        let value: Option<Value> = get_json(&store, "/a/b").await.unwrap();
        assert_eq!(value, Some(json!({"x": [1, 2], "y": 1})));
        assert_eq!(store.get("/a/b").await.unwrap().unwrap(), br#"{"x":[1,2],"y":1}"#);
    }

    #[tokio::test]
    async fn test_missing_and_empty_are_none() {
        let store = MemoryBackend::new();
        store.ensure_exists("/empty").await.unwrap();
        let missing: Option<Value> = get_json(&store, "/missing").await.unwrap();
        let empty: Option<Value> = get_json(&store, "/empty").await.unwrap();
        assert!(missing.is_none());
        assert!(empty.is_none());
    }

    #[tokio::test]
    async fn test_malformed_is_none() {
        let store = MemoryBackend::new();
        store
            .put("/bad", b"{not json".to_vec(), PutOptions::default())
            .await
            .unwrap();
        let value: Option<Value> = get_json(&store, "/bad").await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_check_content_ignores_key_order() {
        let store = MemoryBackend::new();
        put_json(&store, "/n", &json!({"a": 1, "b": 2}), PutOptions::check_content())
            .await
            .unwrap();
        let outcome = put_json(&store, "/n", &json!({"b": 2, "a": 1}), PutOptions::check_content())
            .await
            .unwrap();
        assert!(!outcome.changed);
    }
}
