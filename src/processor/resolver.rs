use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;
use uuid::Uuid;

use crate::models::vehicle::DEFAULT_VEHICLE_KEY;
use crate::store::Store;

/// Maps device identifiers to vehicle ids, creating vehicles on first sight.
///
/// Creation goes through [`Store::resolve_vehicle`], which is atomic per key,
/// so racing connections converge on one vehicle. Resolved ids are cached up
/// to `capacity` entries; the cache is cleared when it fills.
pub struct DeviceResolver {
    store: Arc<dyn Store>,
    cache: Mutex<HashMap<String, Uuid>>,
    capacity: usize,
}

impl DeviceResolver {
    pub fn new(store: Arc<dyn Store>, capacity: usize) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Resolves `device_id`, falling back to the shared default key when the
    /// frame carried none.
    pub async fn resolve(&self, device_id: Option<&str>) -> Result<Uuid> {
        let key = device_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(DEFAULT_VEHICLE_KEY);

        if let Some(id) = self.cached(key) {
            return Ok(id);
        }

        let vehicle = self.store.resolve_vehicle(key).await?;
        debug!("Resolved device {} to vehicle {}", key, vehicle.id);

        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if cache.len() >= self.capacity {
            cache.clear();
        }
        cache.insert(key.to_string(), vehicle.id);
        Ok(vehicle.id)
    }

    fn cached(&self, key: &str) -> Option<Uuid> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
    }
}
