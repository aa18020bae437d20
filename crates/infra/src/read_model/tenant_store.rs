use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use raas_core::TenantId;

/// Tenant-isolated key/value store for disposable read models.
///
/// `list` returns values in key order so exports and reports are stable.
pub trait TenantStore<K, V>: Send + Sync {
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V>;
    fn upsert(&self, tenant_id: TenantId, key: K, value: V);
    fn list(&self, tenant_id: TenantId) -> Vec<V>;
    /// Drops every record of a tenant (rebuild support).
    fn clear_tenant(&self, tenant_id: TenantId);
}

impl<K, V, S> TenantStore<K, V> for Arc<S>
where
    S: TenantStore<K, V> + ?Sized,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        (**self).get(tenant_id, key)
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        (**self).upsert(tenant_id, key, value)
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        (**self).list(tenant_id)
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        (**self).clear_tenant(tenant_id)
    }
}

/// In-memory tenant store, one ordered map per tenant.
#[derive(Debug)]
pub struct InMemoryTenantStore<K, V> {
    tenants: RwLock<BTreeMap<TenantId, BTreeMap<K, V>>>,
}

impl<K, V> InMemoryTenantStore<K, V> {
    pub fn new() -> Self {
        Self {
            tenants: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryTenantStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TenantStore<K, V> for InMemoryTenantStore<K, V>
where
    K: Clone + Ord + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        let tenants = self.tenants.read().ok()?;
        tenants.get(&tenant_id)?.get(key).cloned()
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        if let Ok(mut tenants) = self.tenants.write() {
            tenants.entry(tenant_id).or_default().insert(key, value);
        }
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        let Ok(tenants) = self.tenants.read() else {
            return vec![];
        };
        tenants
            .get(&tenant_id)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut tenants) = self.tenants.write() {
            tenants.remove(&tenant_id);
        }
    }
}
