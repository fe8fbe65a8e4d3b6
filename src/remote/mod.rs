use std::error::Error;
use std::fmt;
use std::sync::mpsc;

use serde::{Deserialize, Serialize};

mod http;
mod memory;

pub use http::HttpDirectory;
pub use memory::MemoryDirectory;

/// Shared store document. `normalized_name` and `geo_cell` exist so that
/// near-duplicate submissions from different clients collide on lookup
/// instead of multiplying.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreDoc {
    pub name: String,
    pub normalized_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo_cell: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AisleDoc {
    pub name_or_number: String,
    pub keywords: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
    pub created_by_user_id: String,
    pub updated_by_user_id: String,
    pub store_remote_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProductDoc {
    pub name: String,
    pub normalized_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aisle_remote_id: Option<String>,
    pub store_remote_id: String,
    pub updated_at: String,
    pub updated_by_user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteAisle {
    pub id: String,
    #[serde(flatten)]
    pub doc: AisleDoc,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteProduct {
    pub id: String,
    #[serde(flatten)]
    pub doc: ProductDoc,
}

/// A live full-snapshot feed. Every delivery is the complete current set of
/// live documents for one store/entity pair, never a diff.
pub struct SnapshotFeed<T> {
    pub receiver: mpsc::Receiver<T>,
    pub canceller: WatchCanceller,
}

/// Tears the watch down on the directory side, which closes the channel and
/// lets the draining worker exit.
pub struct WatchCanceller {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl WatchCanceller {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for WatchCanceller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchCanceller")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

/// The shared document directory: stores at the top, aisle and product
/// sub-collections below, all keyed by server-assigned ids except products,
/// whose doc id is content-derived by the caller. Writes carry the acting
/// user id; reads do not.
pub trait RemoteDirectory: Send + Sync {
    fn find_store(
        &self,
        normalized_name: &str,
        geo_cell: Option<&str>,
    ) -> Result<Option<String>, RemoteError>;
    fn create_store(&self, actor: &str, doc: &StoreDoc) -> Result<String, RemoteError>;
    fn update_store(&self, actor: &str, remote_id: &str, doc: &StoreDoc)
        -> Result<(), RemoteError>;
    fn delete_store(&self, actor: &str, remote_id: &str) -> Result<(), RemoteError>;

    fn create_aisle(&self, actor: &str, doc: &AisleDoc) -> Result<String, RemoteError>;
    fn update_aisle(&self, actor: &str, remote_id: &str, doc: &AisleDoc)
        -> Result<(), RemoteError>;
    fn delete_aisle(
        &self,
        actor: &str,
        store_remote_id: &str,
        remote_id: &str,
    ) -> Result<(), RemoteError>;
    fn fetch_aisles(&self, store_remote_id: &str) -> Result<Vec<RemoteAisle>, RemoteError>;
    fn watch_aisles(
        &self,
        store_remote_id: &str,
    ) -> Result<SnapshotFeed<Vec<RemoteAisle>>, RemoteError>;

    fn upsert_product(&self, actor: &str, doc_id: &str, doc: &ProductDoc)
        -> Result<(), RemoteError>;
    fn delete_product(
        &self,
        actor: &str,
        store_remote_id: &str,
        doc_id: &str,
    ) -> Result<(), RemoteError>;
    fn fetch_products(&self, store_remote_id: &str) -> Result<Vec<RemoteProduct>, RemoteError>;
    fn watch_products(
        &self,
        store_remote_id: &str,
    ) -> Result<SnapshotFeed<Vec<RemoteProduct>>, RemoteError>;
}

/// Stands in when no shared directory is configured: every operation fails
/// with the same disabled error, so pushes degrade to local-only saves and
/// watches never start.
pub struct DisabledDirectory;

impl DisabledDirectory {
    fn err<T>() -> Result<T, RemoteError> {
        Err(RemoteError::Disabled)
    }
}

impl RemoteDirectory for DisabledDirectory {
    fn find_store(&self, _: &str, _: Option<&str>) -> Result<Option<String>, RemoteError> {
        Self::err()
    }
    fn create_store(&self, _: &str, _: &StoreDoc) -> Result<String, RemoteError> {
        Self::err()
    }
    fn update_store(&self, _: &str, _: &str, _: &StoreDoc) -> Result<(), RemoteError> {
        Self::err()
    }
    fn delete_store(&self, _: &str, _: &str) -> Result<(), RemoteError> {
        Self::err()
    }
    fn create_aisle(&self, _: &str, _: &AisleDoc) -> Result<String, RemoteError> {
        Self::err()
    }
    fn update_aisle(&self, _: &str, _: &str, _: &AisleDoc) -> Result<(), RemoteError> {
        Self::err()
    }
    fn delete_aisle(&self, _: &str, _: &str, _: &str) -> Result<(), RemoteError> {
        Self::err()
    }
    fn fetch_aisles(&self, _: &str) -> Result<Vec<RemoteAisle>, RemoteError> {
        Self::err()
    }
    fn watch_aisles(&self, _: &str) -> Result<SnapshotFeed<Vec<RemoteAisle>>, RemoteError> {
        Self::err()
    }
    fn upsert_product(&self, _: &str, _: &str, _: &ProductDoc) -> Result<(), RemoteError> {
        Self::err()
    }
    fn delete_product(&self, _: &str, _: &str, _: &str) -> Result<(), RemoteError> {
        Self::err()
    }
    fn fetch_products(&self, _: &str) -> Result<Vec<RemoteProduct>, RemoteError> {
        Self::err()
    }
    fn watch_products(&self, _: &str) -> Result<SnapshotFeed<Vec<RemoteProduct>>, RemoteError> {
        Self::err()
    }
}

#[derive(Debug)]
pub enum RemoteError {
    /// No shared directory is configured for this profile.
    Disabled,
    Transport(String),
    Status { status: u16, message: String },
    Malformed(String),
    NotFound(String),
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::Disabled => write!(f, "remote sync is disabled in this profile"),
            RemoteError::Transport(message) => write!(f, "remote transport error: {}", message),
            RemoteError::Status { status, message } => {
                write!(f, "remote returned status {}: {}", status, message)
            }
            RemoteError::Malformed(message) => {
                write!(f, "malformed remote payload: {}", message)
            }
            RemoteError::NotFound(id) => write!(f, "remote document '{}' not found", id),
        }
    }
}

impl Error for RemoteError {}
