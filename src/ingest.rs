use std::error::Error;
use std::fmt;
use std::sync::Mutex;

use rusqlite::Connection;
use serde::Serialize;

use crate::ai::{RpcError, SignReading, VisionClient};
use crate::auth::{AuthError, IdentityProvider, ANONYMOUS_SIGN_IN_TIMEOUT};
use crate::db::{self, AisleRecord, RemoteLink};
use crate::identity::{new_local_id, now_utc_rfc3339, sanitize_keywords};
use crate::sync::SyncEngine;

#[derive(Debug)]
pub enum IngestError {
    /// The sign reading produced no usable aisle code or title.
    NoTitleDetected,
    /// An aisle with the same display title already exists in this store.
    DuplicateAisle(String),
    StoreNotFound(String),
    Rpc(RpcError),
    Auth(AuthError),
    Persistence(rusqlite::Error),
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::NoTitleDetected => {
                write!(f, "no aisle title could be detected on the sign")
            }
            IngestError::DuplicateAisle(name) => {
                write!(f, "aisle '{}' already exists in this store", name)
            }
            IngestError::StoreNotFound(id) => write!(f, "store '{}' not found", id),
            IngestError::Rpc(err) => write!(f, "{}", err),
            IngestError::Auth(err) => write!(f, "{}", err),
            IngestError::Persistence(err) => write!(f, "database error: {}", err),
        }
    }
}

impl Error for IngestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            IngestError::Rpc(err) => Some(err),
            IngestError::Auth(err) => Some(err),
            IngestError::Persistence(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RpcError> for IngestError {
    fn from(value: RpcError) -> Self {
        IngestError::Rpc(value)
    }
}

impl From<AuthError> for IngestError {
    fn from(value: AuthError) -> Self {
        IngestError::Auth(value)
    }
}

impl From<rusqlite::Error> for IngestError {
    fn from(value: rusqlite::Error) -> Self {
        IngestError::Persistence(value)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub aisle_id: String,
    pub title: String,
    pub keywords: Vec<String>,
    /// Whether the follow-up push reached the shared directory. The local
    /// record exists either way.
    pub pushed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_error: Option<String>,
}

pub struct IngestService<'a> {
    conn: &'a Mutex<Connection>,
    vision: &'a dyn VisionClient,
    identity: &'a dyn IdentityProvider,
    engine: &'a SyncEngine,
}

impl<'a> IngestService<'a> {
    pub fn new(
        conn: &'a Mutex<Connection>,
        vision: &'a dyn VisionClient,
        identity: &'a dyn IdentityProvider,
        engine: &'a SyncEngine,
    ) -> Self {
        Self {
            conn,
            vision,
            identity,
            engine,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .expect("connection lock should not be poisoned")
    }

    /// Turn one aisle-sign photo into a local aisle record, then try to
    /// share it. The local insert is committed before the push and is never
    /// rolled back by a push failure.
    pub fn ingest_sign(
        &self,
        store_id: &str,
        mime: &str,
        image: &[u8],
    ) -> Result<IngestOutcome, IngestError> {
        let actor = self.identity.ensure(ANONYMOUS_SIGN_IN_TIMEOUT)?;
        log::debug!("ingesting aisle sign for store {} as {}", store_id, actor);

        {
            let conn = self.lock();
            if db::get_store(&conn, store_id)?.is_none() {
                return Err(IngestError::StoreNotFound(store_id.to_string()));
            }
        }

        let reading = self.vision.read_aisle_sign(mime, image)?;
        if let Some(language) = &reading.language {
            log::debug!("sign language detected as {}", language);
        }
        let title = display_title(&reading).ok_or(IngestError::NoTitleDetected)?;
        let keywords = keyword_candidates(&reading);

        let aisle_id = new_local_id();
        {
            let conn = self.lock();
            if let Some(existing) = db::find_aisle_by_name(&conn, store_id, &title)? {
                return Err(IngestError::DuplicateAisle(existing.name));
            }
            let now = now_utc_rfc3339();
            db::insert_aisle(
                &conn,
                &AisleRecord {
                    id: aisle_id.clone(),
                    store_id: store_id.to_string(),
                    remote: RemoteLink::Unlinked,
                    name: title.clone(),
                    keywords: keywords.clone(),
                    created_at: now.clone(),
                    updated_at: now,
                },
            )?;
        }

        let push_error = match self.engine.push_aisle(&aisle_id) {
            Ok(_) => None,
            Err(err) => {
                log::warn!(
                    "aisle '{}' saved locally but could not be shared: {}",
                    title,
                    err
                );
                Some(err.to_string())
            }
        };

        Ok(IngestOutcome {
            aisle_id,
            title,
            keywords,
            pushed: push_error.is_none(),
            push_error,
        })
    }
}

/// Display-title priority: detected aisle code, then the original-language
/// title, then the English title.
fn display_title(reading: &SignReading) -> Option<String> {
    [
        reading.aisle_code.as_deref(),
        reading.title_original.as_deref(),
        reading.title_en.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(str::trim)
    .find(|candidate| !candidate.is_empty())
    .map(str::to_string)
}

/// Keyword candidates come from four sources: both keyword lists and both
/// titles.
fn keyword_candidates(reading: &SignReading) -> Vec<String> {
    sanitize_keywords(
        reading
            .keywords_original
            .iter()
            .map(String::as_str)
            .chain(reading.keywords_en.iter().map(String::as_str))
            .chain(reading.title_original.as_deref())
            .chain(reading.title_en.as_deref()),
    )
}
