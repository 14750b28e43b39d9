//! Stable device identifier

use super::store::KeyValueStore;
use crate::error::Result;

pub const KEY_DEVICE_ID: &str = "device_id";

/// Return the persisted device id, creating a random one on first use
pub async fn device_id(kv: &dyn KeyValueStore) -> Result<String> {
    if let Some(id) = kv.get(KEY_DEVICE_ID).await? {
        let id = id.trim();
        if !id.is_empty() {
            return Ok(id.to_string());
        }
    }

    let id = uuid::Uuid::new_v4().to_string();
    kv.set(KEY_DEVICE_ID, id.clone()).await?;
    log::info!("[usage:device] Generated new device id {}", id);
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::usage::store::MemoryKvStore;

    #[tokio::test]
    async fn test_device_id_is_stable() {
        let kv = MemoryKvStore::new();
        let first = device_id(&kv).await.unwrap();
        let second = device_id(&kv).await.unwrap();
        assert_eq!(first, second);
        assert!(uuid::Uuid::parse_str(&first).is_ok());
    }

    #[tokio::test]
    async fn test_existing_device_id_is_kept() {
        let kv = MemoryKvStore::new();
        kv.set(KEY_DEVICE_ID, "legacy-android-id".to_string())
            .await
            .unwrap();
        assert_eq!(device_id(&kv).await.unwrap(), "legacy-android-id");
    }

    #[tokio::test]
    async fn test_blank_device_id_is_replaced() {
        let kv = MemoryKvStore::new();
        kv.set(KEY_DEVICE_ID, "  ".to_string()).await.unwrap();
        let id = device_id(&kv).await.unwrap();
        assert!(!id.trim().is_empty());
        assert_eq!(kv.get(KEY_DEVICE_ID).await.unwrap(), Some(id));
    }
}
