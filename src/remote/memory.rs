use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use super::{
    AisleDoc, ProductDoc, RemoteAisle, RemoteDirectory, RemoteError, RemoteProduct, SnapshotFeed,
    StoreDoc, WatchCanceller,
};

/// In-process directory used by the test suite and single-process demos.
/// Mutations publish a full snapshot of the affected store/entity pair to
/// every live watcher, mirroring the production change feed.
pub struct MemoryDirectory {
    state: Arc<Mutex<DirectoryState>>,
    write_calls: AtomicU64,
}

#[derive(Default)]
struct DirectoryState {
    stores: HashMap<String, StoreDoc>,
    aisles: HashMap<String, AisleDoc>,
    products: HashMap<String, HashMap<String, ProductDoc>>,
    aisle_watchers: Vec<Watcher<Vec<RemoteAisle>>>,
    product_watchers: Vec<Watcher<Vec<RemoteProduct>>>,
    next_id: u64,
    next_watch_id: u64,
}

struct Watcher<T> {
    id: u64,
    store_remote_id: String,
    sender: mpsc::Sender<T>,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DirectoryState::default())),
            write_calls: AtomicU64::new(0),
        }
    }

    /// Number of write operations attempted against the directory. Lets
    /// tests assert that failed preconditions never reached the network.
    pub fn write_call_count(&self) -> u64 {
        self.write_calls.load(Ordering::SeqCst)
    }

    fn record_write(&self) {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DirectoryState> {
        self.state
            .lock()
            .expect("directory state lock should not be poisoned")
    }
}

impl DirectoryState {
    fn assign_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:04}", prefix, self.next_id)
    }

    fn aisle_snapshot(&self, store_remote_id: &str) -> Vec<RemoteAisle> {
        let mut snapshot: Vec<RemoteAisle> = self
            .aisles
            .iter()
            .filter(|(_, doc)| doc.store_remote_id == store_remote_id)
            .map(|(id, doc)| RemoteAisle {
                id: id.clone(),
                doc: doc.clone(),
            })
            .collect();
        snapshot.sort_by(|left, right| left.id.cmp(&right.id));
        snapshot
    }

    fn product_snapshot(&self, store_remote_id: &str) -> Vec<RemoteProduct> {
        let mut snapshot: Vec<RemoteProduct> = self
            .products
            .get(store_remote_id)
            .into_iter()
            .flatten()
            .map(|(id, doc)| RemoteProduct {
                id: id.clone(),
                doc: doc.clone(),
            })
            .collect();
        snapshot.sort_by(|left, right| left.id.cmp(&right.id));
        snapshot
    }

    fn publish_aisles(&mut self, store_remote_id: &str) {
        let snapshot = self.aisle_snapshot(store_remote_id);
        self.aisle_watchers.retain(|watcher| {
            watcher.store_remote_id != store_remote_id
                || watcher.sender.send(snapshot.clone()).is_ok()
        });
    }

    fn publish_products(&mut self, store_remote_id: &str) {
        let snapshot = self.product_snapshot(store_remote_id);
        self.product_watchers.retain(|watcher| {
            watcher.store_remote_id != store_remote_id
                || watcher.sender.send(snapshot.clone()).is_ok()
        });
    }
}

impl RemoteDirectory for MemoryDirectory {
    fn find_store(
        &self,
        normalized_name: &str,
        geo_cell: Option<&str>,
    ) -> Result<Option<String>, RemoteError> {
        let state = self.lock();
        let mut candidates: Vec<(&String, &StoreDoc)> = state
            .stores
            .iter()
            .filter(|(_, doc)| doc.normalized_name == normalized_name)
            .filter(|(_, doc)| match (geo_cell, doc.geo_cell.as_deref()) {
                (Some(query), Some(stored)) => query == stored,
                _ => true,
            })
            .collect();
        candidates.sort_by(|left, right| left.0.cmp(right.0));
        Ok(candidates.first().map(|(id, _)| (*id).clone()))
    }

    fn create_store(&self, _actor: &str, doc: &StoreDoc) -> Result<String, RemoteError> {
        self.record_write();
        let mut state = self.lock();
        let id = state.assign_id("st");
        state.stores.insert(id.clone(), doc.clone());
        Ok(id)
    }

    fn update_store(
        &self,
        _actor: &str,
        remote_id: &str,
        doc: &StoreDoc,
    ) -> Result<(), RemoteError> {
        self.record_write();
        let mut state = self.lock();
        match state.stores.get_mut(remote_id) {
            Some(existing) => {
                *existing = doc.clone();
                Ok(())
            }
            None => Err(RemoteError::NotFound(remote_id.to_string())),
        }
    }

    fn delete_store(&self, _actor: &str, remote_id: &str) -> Result<(), RemoteError> {
        self.record_write();
        let mut state = self.lock();
        state.stores.remove(remote_id);
        state
            .aisles
            .retain(|_, doc| doc.store_remote_id != remote_id);
        state.products.remove(remote_id);
        state.publish_aisles(remote_id);
        state.publish_products(remote_id);
        Ok(())
    }

    fn create_aisle(&self, _actor: &str, doc: &AisleDoc) -> Result<String, RemoteError> {
        self.record_write();
        let mut state = self.lock();
        let id = state.assign_id("ai");
        state.aisles.insert(id.clone(), doc.clone());
        state.publish_aisles(&doc.store_remote_id);
        Ok(id)
    }

    fn update_aisle(
        &self,
        _actor: &str,
        remote_id: &str,
        doc: &AisleDoc,
    ) -> Result<(), RemoteError> {
        self.record_write();
        let mut state = self.lock();
        match state.aisles.get_mut(remote_id) {
            Some(existing) => *existing = doc.clone(),
            None => return Err(RemoteError::NotFound(remote_id.to_string())),
        }
        state.publish_aisles(&doc.store_remote_id);
        Ok(())
    }

    fn delete_aisle(
        &self,
        _actor: &str,
        store_remote_id: &str,
        remote_id: &str,
    ) -> Result<(), RemoteError> {
        self.record_write();
        let mut state = self.lock();
        state.aisles.remove(remote_id);
        state.publish_aisles(store_remote_id);
        Ok(())
    }

    fn fetch_aisles(&self, store_remote_id: &str) -> Result<Vec<RemoteAisle>, RemoteError> {
        Ok(self.lock().aisle_snapshot(store_remote_id))
    }

    fn watch_aisles(
        &self,
        store_remote_id: &str,
    ) -> Result<SnapshotFeed<Vec<RemoteAisle>>, RemoteError> {
        let (sender, receiver) = mpsc::channel();
        let mut state = self.lock();
        state.next_watch_id += 1;
        let watch_id = state.next_watch_id;
        // The current state is delivered first, then every change.
        let _ = sender.send(state.aisle_snapshot(store_remote_id));
        state.aisle_watchers.push(Watcher {
            id: watch_id,
            store_remote_id: store_remote_id.to_string(),
            sender,
        });
        drop(state);

        let shared = Arc::clone(&self.state);
        let canceller = WatchCanceller::new(move || {
            if let Ok(mut state) = shared.lock() {
                state.aisle_watchers.retain(|watcher| watcher.id != watch_id);
            }
        });
        Ok(SnapshotFeed {
            receiver,
            canceller,
        })
    }

    fn upsert_product(
        &self,
        _actor: &str,
        doc_id: &str,
        doc: &ProductDoc,
    ) -> Result<(), RemoteError> {
        self.record_write();
        let mut state = self.lock();
        state
            .products
            .entry(doc.store_remote_id.clone())
            .or_default()
            .insert(doc_id.to_string(), doc.clone());
        state.publish_products(&doc.store_remote_id);
        Ok(())
    }

    fn delete_product(
        &self,
        _actor: &str,
        store_remote_id: &str,
        doc_id: &str,
    ) -> Result<(), RemoteError> {
        self.record_write();
        let mut state = self.lock();
        if let Some(products) = state.products.get_mut(store_remote_id) {
            products.remove(doc_id);
        }
        state.publish_products(store_remote_id);
        Ok(())
    }

    fn fetch_products(&self, store_remote_id: &str) -> Result<Vec<RemoteProduct>, RemoteError> {
        Ok(self.lock().product_snapshot(store_remote_id))
    }

    fn watch_products(
        &self,
        store_remote_id: &str,
    ) -> Result<SnapshotFeed<Vec<RemoteProduct>>, RemoteError> {
        let (sender, receiver) = mpsc::channel();
        let mut state = self.lock();
        state.next_watch_id += 1;
        let watch_id = state.next_watch_id;
        let _ = sender.send(state.product_snapshot(store_remote_id));
        state.product_watchers.push(Watcher {
            id: watch_id,
            store_remote_id: store_remote_id.to_string(),
            sender,
        });
        drop(state);

        let shared = Arc::clone(&self.state);
        let canceller = WatchCanceller::new(move || {
            if let Ok(mut state) = shared.lock() {
                state
                    .product_watchers
                    .retain(|watcher| watcher.id != watch_id);
            }
        });
        Ok(SnapshotFeed {
            receiver,
            canceller,
        })
    }
}
