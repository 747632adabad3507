use std::sync::Arc;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::device::constants::SESSION_STORAGE_KEY;
use crate::device::types::{Device, DeviceId};
use crate::error::StorageError;
use crate::session::storage::Storage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PersistedDevice {
    id: DeviceId,
    #[serde(default)]
    name: Option<String>,
}

/// The devices that were connected when the process last ran, in connection order.
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn Storage>,
    key: String,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        SessionStore { storage, key: SESSION_STORAGE_KEY.to_string() }
    }

    pub async fn save(&self, devices: &[Device]) -> Result<(), StorageError> {
        let persisted: Vec<PersistedDevice> = devices
            .iter()
            .map(|device| PersistedDevice { id: device.id.clone(), name: Some(device.name.clone()) })
            .collect();

        self.storage.set(&self.key, serde_json::to_value(persisted)?).await
    }

    pub async fn restore(&self) -> Result<Vec<Device>, StorageError> {
        let persisted: Vec<PersistedDevice> = match self.storage.get(&self.key).await? {
            None | Some(Value::Null) => Vec::new(),
            Some(value) => serde_json::from_value(value)?,
        };

        Ok(persisted.into_iter().map(|device| Device::new(device.id, device.name)).collect())
    }

    /// Removes one device from the persisted list. Returns false if it was not in there.
    pub async fn forget(&self, id: &DeviceId) -> Result<bool, StorageError> {
        let mut devices = self.restore().await?;
        let before = devices.len();
        devices.retain(|device| &device.id != id);

        if devices.len() == before {
            return Ok(false);
        }

        info!("Forgetting device {}", id);
        self.save(&devices).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::device::constants::UNKNOWN_DEVICE_NAME;
    use crate::session::storage::MemoryStorage;

    #[tokio::test]
    async fn empty_storage_restores_nothing() {
        let store = SessionStore::new(Arc::new(MemoryStorage::new()));
        assert!(store.restore().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_overwrites_previous_list() {
        let storage = MemoryStorage::new();
        let store = SessionStore::new(Arc::new(storage.clone()));

        store.save(&[Device::new("a", Some("A".to_string())), Device::new("b", None)]).await.unwrap();
        store.save(&[Device::new("b", None)]).await.unwrap();

        assert_eq!(store.restore().await.unwrap(), vec![Device::new("b", None)]);
        assert_eq!(
            storage.get(SESSION_STORAGE_KEY).await.unwrap(),
            Some(json!([{ "id": "b", "name": UNKNOWN_DEVICE_NAME }])),
        );
    }

    #[tokio::test]
    async fn entries_without_name_get_placeholder() {
        let storage = MemoryStorage::new();
        storage.set(SESSION_STORAGE_KEY, json!([{ "id": "X" }, { "id": "Y", "name": "Band" }])).await.unwrap();

        let restored = SessionStore::new(Arc::new(storage)).restore().await.unwrap();
        assert_eq!(restored[0].name, UNKNOWN_DEVICE_NAME);
        assert_eq!(restored[1].name, "Band");
    }

    #[tokio::test]
    async fn forget_removes_single_entry() {
        let store = SessionStore::new(Arc::new(MemoryStorage::new()));
        store.save(&[Device::new("a", None), Device::new("b", None)]).await.unwrap();

        assert!(store.forget(&DeviceId::from("a")).await.unwrap());
        assert!(!store.forget(&DeviceId::from("a")).await.unwrap());
        assert_eq!(store.restore().await.unwrap(), vec![Device::new("b", None)]);
    }
}
