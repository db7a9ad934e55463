//! Label catalog shared by the workers of one sync run
//!
//! The stored catalog goes stale when the user creates a label after the
//! account was linked. The first message carrying an unknown custom label
//! triggers one refresh from the remote per run; later misses keep the
//! label verbatim.

use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};

use log::{debug, info, warn};

use super::catalog_from_labels;
use crate::gmail::RemoteMailClient;
use crate::models::{LabelCatalog, SyncStateUpdate};
use crate::storage::SyncStateStore;

/// Catalog of one account, refreshed at most once per run
pub struct LabelCache {
    account_id: String,
    client: Arc<dyn RemoteMailClient>,
    states: Arc<dyn SyncStateStore>,
    catalog: RwLock<LabelCatalog>,
    /// Set once this run has asked the remote for labels
    refreshed: Mutex<bool>,
}

impl LabelCache {
    /// Start from the stored catalog, fetching it first when empty
    pub fn load(
        account_id: &str,
        stored: LabelCatalog,
        client: Arc<dyn RemoteMailClient>,
        states: Arc<dyn SyncStateStore>,
    ) -> Self {
        let empty = stored.is_empty();
        let cache = Self {
            account_id: account_id.to_string(),
            client,
            states,
            catalog: RwLock::new(stored),
            refreshed: Mutex::new(false),
        };
        if empty {
            cache.refresh_once();
        }
        cache
    }

    /// Catalog covering `label_ids` as far as the remote allows
    pub fn resolve(&self, label_ids: &[String]) -> RwLockReadGuard<'_, LabelCatalog> {
        let missing = self.read().unknown_labels(label_ids).next().map(str::to_string);
        if let Some(label) = missing {
            debug!("Label {} not in catalog for {}", label, self.account_id);
            self.refresh_once();
        }
        self.read()
    }

    fn read(&self) -> RwLockReadGuard<'_, LabelCatalog> {
        self.catalog.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh_once(&self) {
        // Held across the fetch so concurrent misses wait for one refresh
        let mut refreshed = self.refreshed.lock().unwrap_or_else(PoisonError::into_inner);
        if *refreshed {
            return;
        }
        *refreshed = true;

        let labels = match self.client.list_labels() {
            Ok(labels) => labels,
            Err(e) => {
                warn!(
                    "Could not fetch labels for {}, keeping stored catalog: {}",
                    self.account_id, e
                );
                return;
            }
        };

        let catalog = catalog_from_labels(labels);
        info!(
            "Refreshed label catalog for {} ({} labels)",
            self.account_id,
            catalog.len()
        );
        let update = SyncStateUpdate::new().label_catalog(catalog.clone());
        if let Err(e) = self.states.update_sync_state(&self.account_id, &update) {
            warn!(
                "Failed to store label catalog for {}: {:#}",
                self.account_id, e
            );
        }
        *self.catalog.write().unwrap_or_else(PoisonError::into_inner) = catalog;
    }
}
