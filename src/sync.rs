use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt;
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;

use rusqlite::Connection;
use serde::Serialize;

use crate::auth::{AuthError, IdentityProvider};
use crate::db::{self, AisleRecord, ProductRecord, RemoteLink};
use crate::identity::{content_hash, new_local_id, normalize_name, now_utc_rfc3339};
use crate::remote::{
    AisleDoc, GeoPoint, ProductDoc, RemoteAisle, RemoteDirectory, RemoteError, RemoteProduct,
    StoreDoc, WatchCanceller,
};

#[derive(Debug)]
pub enum SyncError {
    /// The owning store has no remote identifier yet; the caller must sync
    /// the store itself first.
    NotSynced { store_id: String },
    /// A write was attempted with no resolved actor identity. Raised before
    /// any network call.
    Unauthenticated,
    StoreNotFound(String),
    RecordNotFound(String),
    Persistence(rusqlite::Error),
    Remote(RemoteError),
    Auth(AuthError),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::NotSynced { store_id } => {
                write!(f, "store '{}' has not been synced to the backend yet", store_id)
            }
            SyncError::Unauthenticated => {
                write!(f, "a signed-in or anonymous identity is required for this action")
            }
            SyncError::StoreNotFound(id) => write!(f, "store '{}' not found", id),
            SyncError::RecordNotFound(id) => write!(f, "record '{}' not found", id),
            SyncError::Persistence(err) => write!(f, "database error: {}", err),
            SyncError::Remote(err) => write!(f, "{}", err),
            SyncError::Auth(err) => write!(f, "{}", err),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SyncError::Persistence(err) => Some(err),
            SyncError::Remote(err) => Some(err),
            SyncError::Auth(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(value: rusqlite::Error) -> Self {
        SyncError::Persistence(value)
    }
}

impl From<RemoteError> for SyncError {
    fn from(value: RemoteError) -> Self {
        SyncError::Remote(value)
    }
}

impl From<AuthError> for SyncError {
    fn from(value: AuthError) -> Self {
        SyncError::Auth(value)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub updated: u64,
    pub adopted: u64,
    pub inserted: u64,
    pub deleted: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct PushSummary {
    pub aisles_pushed: u64,
    pub products_pushed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Detached,
    Subscribing,
    Active,
}

/// Reconcile one incoming full snapshot of remote aisles against the local
/// records of one store. The snapshot is authoritative: absence of a linked
/// record's remote id means remote deletion.
pub fn reconcile_aisles(
    conn: &mut Connection,
    store_id: &str,
    snapshot: &[RemoteAisle],
) -> Result<ReconcileSummary, SyncError> {
    let local = db::list_aisles(conn, store_id)?;
    let mut linked: HashMap<&str, &AisleRecord> = HashMap::new();
    let mut unlinked: Vec<&AisleRecord> = Vec::new();
    for record in &local {
        match record.remote.as_option() {
            Some(remote_id) => {
                linked.insert(remote_id, record);
            }
            None => unlinked.push(record),
        }
    }

    let mut summary = ReconcileSummary::default();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut claimed: HashSet<&str> = HashSet::new();

    let tx = conn.transaction()?;
    for incoming in snapshot {
        seen.insert(incoming.id.as_str());
        if let Some(existing) = linked.get(incoming.id.as_str()) {
            // Already linked: the remote copy wins wholesale.
            db::update_aisle(
                &tx,
                &existing.id,
                &incoming.doc.name_or_number,
                &incoming.doc.keywords,
                &incoming.doc.updated_at,
            )?;
            summary.updated += 1;
            continue;
        }

        let incoming_key = normalize_name(&incoming.doc.name_or_number);
        let merge_target = unlinked.iter().find(|record| {
            !claimed.contains(record.id.as_str()) && normalize_name(&record.name) == incoming_key
        });
        if let Some(target) = merge_target {
            // Offline-created duplicate: adopt the remote id instead of
            // inserting a second record.
            claimed.insert(target.id.as_str());
            db::set_aisle_remote_id(&tx, &target.id, &incoming.id)?;
            db::update_aisle(
                &tx,
                &target.id,
                &incoming.doc.name_or_number,
                &incoming.doc.keywords,
                &incoming.doc.updated_at,
            )?;
            summary.adopted += 1;
            continue;
        }

        db::insert_aisle(
            &tx,
            &AisleRecord {
                id: new_local_id(),
                store_id: store_id.to_string(),
                remote: RemoteLink::Linked(incoming.id.clone()),
                name: incoming.doc.name_or_number.clone(),
                keywords: incoming.doc.keywords.clone(),
                created_at: incoming.doc.created_at.clone(),
                updated_at: incoming.doc.updated_at.clone(),
            },
        )?;
        summary.inserted += 1;
    }

    for (remote_id, record) in &linked {
        if !seen.contains(remote_id) {
            db::delete_aisle(&tx, &record.id)?;
            summary.deleted += 1;
        }
    }

    tx.commit()?;
    Ok(summary)
}

/// Product reconciliation follows the aisle rules, including
/// deletion-by-absence. Incoming remote aisle links are re-resolved to
/// local aisle ids where the aisle is already known locally.
pub fn reconcile_products(
    conn: &mut Connection,
    store_id: &str,
    snapshot: &[RemoteProduct],
) -> Result<ReconcileSummary, SyncError> {
    let local = db::list_products(conn, store_id)?;
    let mut linked: HashMap<&str, &ProductRecord> = HashMap::new();
    let mut unlinked: Vec<&ProductRecord> = Vec::new();
    for record in &local {
        match record.remote.as_option() {
            Some(remote_id) => {
                linked.insert(remote_id, record);
            }
            None => unlinked.push(record),
        }
    }

    let mut summary = ReconcileSummary::default();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut claimed: HashSet<&str> = HashSet::new();

    let tx = conn.transaction()?;
    for incoming in snapshot {
        seen.insert(incoming.id.as_str());
        let local_aisle_id = match &incoming.doc.aisle_remote_id {
            Some(remote_aisle_id) => db::find_aisle_by_remote_id(&tx, store_id, remote_aisle_id)?
                .map(|aisle| aisle.id),
            None => None,
        };

        if let Some(existing) = linked.get(incoming.id.as_str()) {
            db::update_product(
                &tx,
                &db::UpdateProduct {
                    id: &existing.id,
                    name: &incoming.doc.name,
                    normalized_name: &incoming.doc.normalized_name,
                    barcode: incoming.doc.barcode.as_deref(),
                    aisle_id: local_aisle_id.as_deref(),
                    remote_aisle_id: incoming.doc.aisle_remote_id.as_deref(),
                    updated_at: &incoming.doc.updated_at,
                },
            )?;
            summary.updated += 1;
            continue;
        }

        let merge_target = unlinked.iter().find(|record| {
            !claimed.contains(record.id.as_str())
                && record.normalized_name == incoming.doc.normalized_name
        });
        if let Some(target) = merge_target {
            claimed.insert(target.id.as_str());
            db::set_product_remote_id(&tx, &target.id, &incoming.id)?;
            db::update_product(
                &tx,
                &db::UpdateProduct {
                    id: &target.id,
                    name: &incoming.doc.name,
                    normalized_name: &incoming.doc.normalized_name,
                    barcode: incoming.doc.barcode.as_deref(),
                    aisle_id: local_aisle_id.as_deref(),
                    remote_aisle_id: incoming.doc.aisle_remote_id.as_deref(),
                    updated_at: &incoming.doc.updated_at,
                },
            )?;
            summary.adopted += 1;
            continue;
        }

        db::insert_product(
            &tx,
            &ProductRecord {
                id: new_local_id(),
                store_id: store_id.to_string(),
                aisle_id: local_aisle_id,
                remote: RemoteLink::Linked(incoming.id.clone()),
                remote_aisle_id: incoming.doc.aisle_remote_id.clone(),
                name: incoming.doc.name.clone(),
                normalized_name: incoming.doc.normalized_name.clone(),
                barcode: incoming.doc.barcode.clone(),
                created_at: incoming.doc.updated_at.clone(),
                updated_at: incoming.doc.updated_at.clone(),
            },
        )?;
        summary.inserted += 1;
    }

    for (remote_id, record) in &linked {
        if !seen.contains(remote_id) {
            db::delete_product(&tx, &record.id)?;
            summary.deleted += 1;
        }
    }

    tx.commit()?;
    Ok(summary)
}

struct EntityWatch {
    canceller: WatchCanceller,
    worker: JoinHandle<()>,
    state: Arc<Mutex<SubscriptionState>>,
}

struct StoreSubscription {
    aisles: EntityWatch,
    products: EntityWatch,
}

/// Owns the per-store change subscriptions and the push paths. All local
/// writes funnel through one connection lock, which serializes writers.
pub struct SyncEngine {
    conn: Arc<Mutex<Connection>>,
    remote: Arc<dyn RemoteDirectory>,
    identity: Arc<dyn IdentityProvider>,
    subscriptions: Mutex<HashMap<String, StoreSubscription>>,
}

impl SyncEngine {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        remote: Arc<dyn RemoteDirectory>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            conn,
            remote,
            identity,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .expect("connection lock should not be poisoned")
    }

    fn require_actor(&self) -> Result<String, SyncError> {
        self.identity
            .current()?
            .ok_or(SyncError::Unauthenticated)
    }

    fn require_store(&self, store_id: &str) -> Result<db::StoreRecord, SyncError> {
        db::get_store(&self.lock_conn(), store_id)?
            .ok_or_else(|| SyncError::StoreNotFound(store_id.to_string()))
    }

    fn require_linked_store(&self, store_id: &str) -> Result<(db::StoreRecord, String), SyncError> {
        let store = self.require_store(store_id)?;
        let remote_id = match store.remote.as_option() {
            Some(remote_id) => remote_id.to_string(),
            None => {
                return Err(SyncError::NotSynced {
                    store_id: store_id.to_string(),
                })
            }
        };
        Ok((store, remote_id))
    }

    /// Share a store. An unlinked store adopts an existing remote store
    /// with the same normalized name and geo cell rather than duplicating
    /// it, creating a new document only when none matches. A linked store
    /// pushes its current profile as an update.
    pub fn push_store(&self, store_id: &str) -> Result<String, SyncError> {
        let store = self.require_store(store_id)?;
        let actor = self.require_actor()?;

        let doc = StoreDoc {
            name: store.name.clone(),
            normalized_name: store.normalized_name.clone(),
            address: store.address.clone(),
            geo: match (store.lat, store.lng) {
                (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
                _ => None,
            },
            geo_cell: store.geo_cell.clone(),
            created_at: store.created_at.clone(),
            updated_at: now_utc_rfc3339(),
        };

        if let Some(remote_id) = store.remote.as_option() {
            self.remote.update_store(&actor, remote_id, &doc)?;
            return Ok(remote_id.to_string());
        }

        let remote_id = match self
            .remote
            .find_store(&store.normalized_name, store.geo_cell.as_deref())?
        {
            Some(existing) => existing,
            None => self.remote.create_store(&actor, &doc)?,
        };

        db::set_store_remote_id(&self.lock_conn(), store_id, &remote_id)?;
        Ok(remote_id)
    }

    /// Delete one aisle everywhere: the remote document first when linked,
    /// then the local record.
    pub fn delete_aisle(&self, aisle_id: &str) -> Result<(), SyncError> {
        let aisle = db::get_aisle(&self.lock_conn(), aisle_id)?
            .ok_or_else(|| SyncError::RecordNotFound(aisle_id.to_string()))?;
        if let Some(remote_id) = aisle.remote.as_option() {
            let actor = self.require_actor()?;
            let (_, store_remote_id) = self.require_linked_store(&aisle.store_id)?;
            self.remote
                .delete_aisle(&actor, &store_remote_id, remote_id)?;
        }
        db::delete_aisle(&self.lock_conn(), aisle_id)?;
        Ok(())
    }

    /// Push one aisle. Creation returns a server-assigned id which is
    /// written back onto the local record before this returns; updates
    /// overwrite the remote copy in place.
    pub fn push_aisle(&self, aisle_id: &str) -> Result<String, SyncError> {
        let aisle = db::get_aisle(&self.lock_conn(), aisle_id)?
            .ok_or_else(|| SyncError::RecordNotFound(aisle_id.to_string()))?;
        let actor = self.require_actor()?;
        let (_, store_remote_id) = self.require_linked_store(&aisle.store_id)?;

        let doc = AisleDoc {
            name_or_number: aisle.name.clone(),
            keywords: aisle.keywords.clone(),
            created_at: aisle.created_at.clone(),
            updated_at: now_utc_rfc3339(),
            created_by_user_id: actor.clone(),
            updated_by_user_id: actor.clone(),
            store_remote_id,
        };

        match aisle.remote.as_option() {
            Some(remote_id) => {
                self.remote.update_aisle(&actor, remote_id, &doc)?;
                Ok(remote_id.to_string())
            }
            None => {
                let remote_id = self.remote.create_aisle(&actor, &doc)?;
                db::set_aisle_remote_id(&self.lock_conn(), aisle_id, &remote_id)?;
                Ok(remote_id)
            }
        }
    }

    /// Push one product under its content-derived document id; repeated
    /// pushes of the same normalized name are idempotent upserts.
    pub fn push_product(&self, product_id: &str) -> Result<String, SyncError> {
        let product = db::get_product(&self.lock_conn(), product_id)?
            .ok_or_else(|| SyncError::RecordNotFound(product_id.to_string()))?;
        let actor = self.require_actor()?;
        let (_, store_remote_id) = self.require_linked_store(&product.store_id)?;

        let remote_aisle_id = match &product.aisle_id {
            Some(aisle_id) => db::get_aisle(&self.lock_conn(), aisle_id)?
                .and_then(|aisle| aisle.remote.as_option().map(str::to_string)),
            None => product.remote_aisle_id.clone(),
        };

        let doc_id = content_hash(&product.normalized_name);
        let doc = ProductDoc {
            name: product.name.clone(),
            normalized_name: product.normalized_name.clone(),
            barcode: product.barcode.clone(),
            aisle_remote_id: remote_aisle_id.clone(),
            store_remote_id,
            updated_at: now_utc_rfc3339(),
            updated_by_user_id: actor.clone(),
        };
        self.remote.upsert_product(&actor, &doc_id, &doc)?;

        let conn = self.lock_conn();
        db::set_product_remote_id(&conn, product_id, &doc_id)?;
        db::update_product(
            &conn,
            &db::UpdateProduct {
                id: &product.id,
                name: &product.name,
                normalized_name: &product.normalized_name,
                barcode: product.barcode.as_deref(),
                aisle_id: product.aisle_id.as_deref(),
                remote_aisle_id: remote_aisle_id.as_deref(),
                updated_at: &doc.updated_at,
            },
        )?;
        Ok(doc_id)
    }

    /// Push every still-unlinked aisle and product of one store.
    pub fn push_store_contents(&self, store_id: &str) -> Result<PushSummary, SyncError> {
        self.require_linked_store(store_id)?;
        let (aisles, products) = {
            let conn = self.lock_conn();
            (
                db::list_unlinked_aisles(&conn, store_id)?,
                db::list_unlinked_products(&conn, store_id)?,
            )
        };

        let mut summary = PushSummary::default();
        for aisle in &aisles {
            self.push_aisle(&aisle.id)?;
            summary.aisles_pushed += 1;
        }
        for product in &products {
            self.push_product(&product.id)?;
            summary.products_pushed += 1;
        }
        Ok(summary)
    }

    /// One-shot reconciliation from a fetched full snapshot of both entity
    /// types.
    pub fn pull_store(
        &self,
        store_id: &str,
    ) -> Result<(ReconcileSummary, ReconcileSummary), SyncError> {
        let (_, store_remote_id) = self.require_linked_store(store_id)?;
        let aisles = self.remote.fetch_aisles(&store_remote_id)?;
        let products = self.remote.fetch_products(&store_remote_id)?;

        let mut conn = self.lock_conn();
        let aisle_summary = reconcile_aisles(&mut conn, store_id, &aisles)?;
        let product_summary = reconcile_products(&mut conn, store_id, &products)?;
        drop(conn);

        db::set_meta(
            &self.lock_conn(),
            &format!("last_reconcile_at:{store_id}"),
            &now_utc_rfc3339(),
        )?;
        Ok((aisle_summary, product_summary))
    }

    /// Start the live subscriptions for one store, tearing down any prior
    /// subscription for the same store first.
    pub fn start_watch(&self, store_id: &str) -> Result<(), SyncError> {
        let (_, store_remote_id) = self.require_linked_store(store_id)?;

        let mut subscriptions = self
            .subscriptions
            .lock()
            .expect("subscription registry lock should not be poisoned");
        if let Some(previous) = subscriptions.remove(store_id) {
            stop_subscription(store_id, previous);
        }

        let aisle_state = Arc::new(Mutex::new(SubscriptionState::Subscribing));
        let aisle_feed = self.remote.watch_aisles(&store_remote_id)?;
        let aisles = EntityWatch {
            canceller: aisle_feed.canceller,
            worker: spawn_reconcile_worker(
                Arc::clone(&self.conn),
                store_id.to_string(),
                "aisles",
                aisle_feed.receiver,
                Arc::clone(&aisle_state),
                |conn, store_id, snapshot| reconcile_aisles(conn, store_id, snapshot),
            ),
            state: aisle_state,
        };

        let product_state = Arc::new(Mutex::new(SubscriptionState::Subscribing));
        let product_feed = self.remote.watch_products(&store_remote_id)?;
        let products = EntityWatch {
            canceller: product_feed.canceller,
            worker: spawn_reconcile_worker(
                Arc::clone(&self.conn),
                store_id.to_string(),
                "products",
                product_feed.receiver,
                Arc::clone(&product_state),
                |conn, store_id, snapshot| reconcile_products(conn, store_id, snapshot),
            ),
            state: product_state,
        };

        subscriptions.insert(store_id.to_string(), StoreSubscription { aisles, products });
        Ok(())
    }

    /// Tear down the subscriptions for one store, if any.
    pub fn stop_watch(&self, store_id: &str) {
        let removed = self
            .subscriptions
            .lock()
            .expect("subscription registry lock should not be poisoned")
            .remove(store_id);
        if let Some(subscription) = removed {
            stop_subscription(store_id, subscription);
        }
    }

    pub fn stop_all(&self) {
        let drained: Vec<(String, StoreSubscription)> = self
            .subscriptions
            .lock()
            .expect("subscription registry lock should not be poisoned")
            .drain()
            .collect();
        for (store_id, subscription) in drained {
            stop_subscription(&store_id, subscription);
        }
    }

    /// Current subscription states for one store, `(aisles, products)`.
    pub fn watch_state(&self, store_id: &str) -> (SubscriptionState, SubscriptionState) {
        let subscriptions = self
            .subscriptions
            .lock()
            .expect("subscription registry lock should not be poisoned");
        match subscriptions.get(store_id) {
            Some(subscription) => (
                read_state(&subscription.aisles.state),
                read_state(&subscription.products.state),
            ),
            None => (SubscriptionState::Detached, SubscriptionState::Detached),
        }
    }

    /// Delete a store everywhere: remote aisle and product documents first,
    /// then the store document, then the local cascade.
    pub fn delete_store(&self, store_id: &str) -> Result<(), SyncError> {
        let store = self.require_store(store_id)?;
        self.stop_watch(store_id);

        if let Some(store_remote_id) = store.remote.as_option() {
            let actor = self.require_actor()?;
            let (aisles, products) = {
                let conn = self.lock_conn();
                (
                    db::list_aisles(&conn, store_id)?,
                    db::list_products(&conn, store_id)?,
                )
            };
            for aisle in &aisles {
                if let Some(remote_id) = aisle.remote.as_option() {
                    self.remote.delete_aisle(&actor, store_remote_id, remote_id)?;
                }
            }
            for product in &products {
                if let Some(remote_id) = product.remote.as_option() {
                    self.remote
                        .delete_product(&actor, store_remote_id, remote_id)?;
                }
            }
            self.remote.delete_store(&actor, store_remote_id)?;
        }

        db::delete_store(&self.lock_conn(), store_id)?;
        Ok(())
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn read_state(state: &Arc<Mutex<SubscriptionState>>) -> SubscriptionState {
    *state
        .lock()
        .expect("subscription state lock should not be poisoned")
}

fn set_state(state: &Arc<Mutex<SubscriptionState>>, value: SubscriptionState) {
    *state
        .lock()
        .expect("subscription state lock should not be poisoned") = value;
}

fn stop_subscription(store_id: &str, subscription: StoreSubscription) {
    subscription.aisles.canceller.cancel();
    subscription.products.canceller.cancel();
    if subscription.aisles.worker.join().is_err() {
        log::warn!("aisle watch worker for store {} panicked", store_id);
    }
    if subscription.products.worker.join().is_err() {
        log::warn!("product watch worker for store {} panicked", store_id);
    }
}

fn spawn_reconcile_worker<T, F>(
    conn: Arc<Mutex<Connection>>,
    store_id: String,
    entity: &'static str,
    receiver: mpsc::Receiver<Vec<T>>,
    state: Arc<Mutex<SubscriptionState>>,
    reconcile: F,
) -> JoinHandle<()>
where
    T: Send + 'static,
    F: Fn(&mut Connection, &str, &[T]) -> Result<ReconcileSummary, SyncError> + Send + 'static,
{
    std::thread::spawn(move || {
        set_state(&state, SubscriptionState::Active);
        while let Ok(snapshot) = receiver.recv() {
            let mut guard = conn
                .lock()
                .expect("connection lock should not be poisoned");
            match reconcile(&mut *guard, &store_id, snapshot.as_slice()) {
                Ok(summary) => log::debug!(
                    "reconciled {} for store {}: updated={} adopted={} inserted={} deleted={}",
                    entity,
                    store_id,
                    summary.updated,
                    summary.adopted,
                    summary.inserted,
                    summary.deleted
                ),
                // The feed re-sends full state, so a bad batch is skipped and
                // the subscription stays alive.
                Err(err) => log::warn!(
                    "skipping {} snapshot for store {}: {}",
                    entity,
                    store_id,
                    err
                ),
            }
        }
        set_state(&state, SubscriptionState::Detached);
    })
}

#[cfg(test)]
mod tests;
