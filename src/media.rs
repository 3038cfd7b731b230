//! Uploaded media
//!
//! Images sent with chat messages are stored per user under
//! `users/<uid>/<id>` and referenced from history by that path, so history
//! stays small and the bytes are only loaded when a request is built.

use crate::error::OrchestrationError;
use crate::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Upper bound for a single decoded upload.
pub const MAX_MEDIA_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredMedia {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl StoredMedia {
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}

pub fn owner_prefix(owner_id: &str) -> String {
    format!("users/{}/", owner_id)
}

pub fn belongs_to(storage_url: &str, owner_id: &str) -> bool {
    storage_url.starts_with(&owner_prefix(owner_id))
}

pub fn decode_inline(data: &str) -> Result<Vec<u8>> {
    // Accept data URLs as well as bare base64.
    let payload = match data.split_once(";base64,") {
        Some((_, rest)) => rest,
        None => data,
    };

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| OrchestrationError::ValidationError(format!("Invalid base64 media: {}", e)))?;

    if bytes.is_empty() {
        return Err(OrchestrationError::ValidationError("Media payload is empty".to_string()));
    }
    if bytes.len() > MAX_MEDIA_BYTES {
        return Err(OrchestrationError::ValidationError(format!(
            "Media payload exceeds {} bytes",
            MAX_MEDIA_BYTES
        )));
    }
    Ok(bytes)
}

#[async_trait::async_trait]
pub trait MediaStore: Send + Sync {
    /// Store bytes for `owner_id` and return the storage path.
    async fn put(&self, owner_id: &str, mime_type: &str, bytes: Vec<u8>) -> Result<String>;
    async fn get(&self, storage_url: &str) -> Result<Option<StoredMedia>>;
    /// Delete everything stored for `owner_id`; returns the number removed.
    async fn delete_owner(&self, owner_id: &str) -> Result<usize>;
}

#[derive(Default)]
pub struct InMemoryMediaStore {
    objects: Arc<RwLock<HashMap<String, StoredMedia>>>,
}

impl InMemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl MediaStore for InMemoryMediaStore {
    async fn put(&self, owner_id: &str, mime_type: &str, bytes: Vec<u8>) -> Result<String> {
        let storage_url = format!("{}{}", owner_prefix(owner_id), Uuid::new_v4());

        let mut objects = self.objects.write().await;
        objects.insert(
            storage_url.clone(),
            StoredMedia {
                mime_type: mime_type.to_string(),
                bytes,
            },
        );
        Ok(storage_url)
    }

    async fn get(&self, storage_url: &str) -> Result<Option<StoredMedia>> {
        let objects = self.objects.read().await;
        Ok(objects.get(storage_url).cloned())
    }

    async fn delete_owner(&self, owner_id: &str) -> Result<usize> {
        let prefix = owner_prefix(owner_id);
        let mut objects = self.objects.write().await;
        let before = objects.len();
        objects.retain(|url, _| !url.starts_with(&prefix));
        Ok(before - objects.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_inline_accepts_data_urls() {
        assert_eq!(decode_inline("aGk=").unwrap(), b"hi");
        assert_eq!(decode_inline("data:image/png;base64,aGk=").unwrap(), b"hi");
        assert!(decode_inline("not base64!").is_err());
        assert!(decode_inline("").is_err());
    }

    #[tokio::test]
    async fn test_media_scoped_to_owner() {
        let store = InMemoryMediaStore::new();
        let url = store.put("u1", "image/png", b"png".to_vec()).await.unwrap();
        store.put("u2", "image/png", b"other".to_vec()).await.unwrap();

        assert!(belongs_to(&url, "u1"));
        assert!(!belongs_to(&url, "u2"));
        assert_eq!(store.get(&url).await.unwrap().unwrap().to_base64(), "cG5n");

        assert_eq!(store.delete_owner("u1").await.unwrap(), 1);
        assert!(store.get(&url).await.unwrap().is_none());
    }
}
