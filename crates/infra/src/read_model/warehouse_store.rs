use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::RwLock;

use packwave_core::WarehouseId;

/// Warehouse-isolated key/value store abstraction for disposable read models.
pub trait WarehouseStore<K, V>: Send + Sync {
    fn get(&self, warehouse_id: WarehouseId, key: &K) -> Option<V>;
    fn upsert(&self, warehouse_id: WarehouseId, key: K, value: V);
    fn list(&self, warehouse_id: WarehouseId) -> Vec<V>;
    /// Clear all read-model records for a warehouse (rebuild support).
    fn clear_warehouse(&self, warehouse_id: WarehouseId);
}

impl<K, V, S> WarehouseStore<K, V> for Arc<S>
where
    S: WarehouseStore<K, V> + ?Sized,
{
    fn get(&self, warehouse_id: WarehouseId, key: &K) -> Option<V> {
        (**self).get(warehouse_id, key)
    }

    fn upsert(&self, warehouse_id: WarehouseId, key: K, value: V) {
        (**self).upsert(warehouse_id, key, value)
    }

    fn list(&self, warehouse_id: WarehouseId) -> Vec<V> {
        (**self).list(warehouse_id)
    }

    fn clear_warehouse(&self, warehouse_id: WarehouseId) {
        (**self).clear_warehouse(warehouse_id)
    }
}

/// In-memory warehouse-isolated store.
#[derive(Debug)]
pub struct InMemoryWarehouseStore<K, V> {
    inner: RwLock<HashMap<(WarehouseId, K), V>>,
}

impl<K, V> InMemoryWarehouseStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryWarehouseStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> WarehouseStore<K, V> for InMemoryWarehouseStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, warehouse_id: WarehouseId, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(&(warehouse_id, key.clone())).cloned()
    }

    fn upsert(&self, warehouse_id: WarehouseId, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.insert((warehouse_id, key), value);
        }
    }

    fn list(&self, warehouse_id: WarehouseId) -> Vec<V> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };

        map.iter()
            .filter_map(|((w, _k), v)| if *w == warehouse_id { Some(v.clone()) } else { None })
            .collect()
    }

    fn clear_warehouse(&self, warehouse_id: WarehouseId) {
        if let Ok(mut map) = self.inner.write() {
            map.retain(|(w, _k), _v| *w != warehouse_id);
        }
    }
}
