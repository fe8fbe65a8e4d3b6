use std::error::Error;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use serde::Serialize;

use crate::ai::{HttpAiClient, SuggestionClient};
use crate::auth::{
    AuthError, HttpIdentity, IdentityProvider, MetaIdentity, StaticIdentity,
    ANONYMOUS_SIGN_IN_TIMEOUT,
};
use crate::config::{Config, ConfigError, RemoteConfig};
use crate::db::{self, AisleRecord, ProductRecord, RemoteLink, StoreRecord};
use crate::identity::{geo_cell, new_local_id, normalize_name, now_utc_rfc3339, sanitize_keywords};
use crate::ingest::{IngestError, IngestOutcome, IngestService};
use crate::remote::{DisabledDirectory, HttpDirectory, MemoryDirectory, RemoteDirectory};
use crate::suggest::{AssignOutcome, SuggestError, SuggestService, Suggestion};
use crate::sync::{PushSummary, ReconcileSummary, SubscriptionState, SyncEngine, SyncError};

pub struct App {
    conn: Arc<Mutex<Connection>>,
    engine: SyncEngine,
    identity: Arc<dyn IdentityProvider>,
    ai: Option<HttpAiClient>,
}

#[derive(Debug)]
pub enum AppError {
    Io(std::io::Error),
    Db(rusqlite::Error),
    Config(ConfigError),
    Sync(SyncError),
    Ingest(IngestError),
    Suggest(SuggestError),
    Auth(AuthError),
    Unauthenticated,
    InvalidArgument(String),
    NotFound(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Io(err) => write!(f, "I/O error: {}", err),
            AppError::Db(err) => write!(f, "database error: {}", err),
            AppError::Config(err) => write!(f, "{}", err),
            AppError::Sync(err) => write!(f, "{}", err),
            AppError::Ingest(err) => write!(f, "{}", err),
            AppError::Suggest(err) => write!(f, "{}", err),
            AppError::Auth(err) => write!(f, "{}", err),
            AppError::Unauthenticated => {
                write!(f, "this action requires a signed-in or anonymous identity")
            }
            AppError::InvalidArgument(message) => write!(f, "{}", message),
            AppError::NotFound(what) => write!(f, "{} not found", what),
        }
    }
}

impl Error for AppError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AppError::Io(err) => Some(err),
            AppError::Db(err) => Some(err),
            AppError::Config(err) => Some(err),
            AppError::Sync(err) => Some(err),
            AppError::Ingest(err) => Some(err),
            AppError::Suggest(err) => Some(err),
            AppError::Auth(err) => Some(err),
            AppError::Unauthenticated => None,
            AppError::InvalidArgument(_) => None,
            AppError::NotFound(_) => None,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        AppError::Io(value)
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        AppError::Db(value)
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        AppError::Config(value)
    }
}

impl From<SyncError> for AppError {
    fn from(value: SyncError) -> Self {
        AppError::Sync(value)
    }
}

impl From<IngestError> for AppError {
    fn from(value: IngestError) -> Self {
        AppError::Ingest(value)
    }
}

impl From<SuggestError> for AppError {
    fn from(value: SuggestError) -> Self {
        AppError::Suggest(value)
    }
}

impl From<AuthError> for AppError {
    fn from(value: AuthError) -> Self {
        AppError::Auth(value)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StoreView {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo_cell: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    pub created_at: String,
}

impl From<StoreRecord> for StoreView {
    fn from(record: StoreRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            address: record.address,
            city: record.city,
            geo_cell: record.geo_cell,
            remote_id: record.remote.as_option().map(str::to_string),
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AisleView {
    pub id: String,
    pub name: String,
    pub keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    pub updated_at: String,
}

impl From<AisleRecord> for AisleView {
    fn from(record: AisleRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            keywords: record.keywords,
            remote_id: record.remote.as_option().map(str::to_string),
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProductView {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aisle_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aisle_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreDetail {
    pub store: StoreView,
    pub aisles: Vec<AisleView>,
    pub products: Vec<ProductView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreCreated {
    pub store: StoreView,
    pub shared: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AisleCreated {
    pub aisle: AisleView,
    pub shared: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub store_remote_id: String,
    pub pushed: PushSummary,
    pub aisles: ReconcileSummary,
    pub products: ReconcileSummary,
}

#[derive(Debug, Clone)]
pub struct NewStore<'a> {
    pub name: &'a str,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub address: Option<&'a str>,
    pub city: Option<&'a str>,
}

impl App {
    pub fn open(db_path: &str, config_path: &Path) -> Result<Self, AppError> {
        let config = Config::load(config_path)?;
        Self::open_with_config(db_path, config)
    }

    pub(crate) fn open_with_config(db_path: &str, config: Config) -> Result<Self, AppError> {
        ensure_parent_dir(db_path)?;
        let conn = Arc::new(Mutex::new(db::open_connection(db_path)?));

        let directory: Arc<dyn RemoteDirectory> = match &config.remote {
            RemoteConfig::Off => Arc::new(DisabledDirectory),
            RemoteConfig::Memory => Arc::new(MemoryDirectory::new()),
            RemoteConfig::Http { base_url, api_key } => {
                Arc::new(HttpDirectory::new(base_url.clone(), api_key.clone()))
            }
        };

        let identity: Arc<dyn IdentityProvider> = match (&config.user_id, &config.remote) {
            (Some(user_id), _) => Arc::new(StaticIdentity::new(Some(user_id.clone()))),
            (None, RemoteConfig::Http { base_url, api_key }) => Arc::new(HttpIdentity::new(
                Arc::clone(&conn),
                base_url.clone(),
                api_key.clone(),
            )),
            (None, _) => Arc::new(MetaIdentity::new(Arc::clone(&conn))),
        };

        let engine = SyncEngine::new(
            Arc::clone(&conn),
            directory,
            Arc::clone(&identity),
        );
        let ai = config
            .ai
            .as_ref()
            .map(|ai| HttpAiClient::new(ai.base_url.clone(), ai.api_key.clone(), ai.model.clone(), ai.detail));

        Ok(Self {
            conn,
            engine,
            identity,
            ai,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .expect("connection lock should not be poisoned")
    }

    /// Resolve a store by local id or by exact (normalized) name.
    fn resolve_store(&self, selector: &str) -> Result<StoreRecord, AppError> {
        let conn = self.lock();
        if let Some(store) = db::get_store(&conn, selector)? {
            return Ok(store);
        }
        let key = normalize_name(selector);
        let mut matches: Vec<StoreRecord> = db::list_stores(&conn)?
            .into_iter()
            .filter(|store| store.normalized_name == key)
            .collect();
        if matches.len() > 1 {
            return Err(AppError::InvalidArgument(format!(
                "store name '{}' is ambiguous; use the store id",
                selector
            )));
        }
        matches
            .pop()
            .ok_or_else(|| AppError::NotFound(format!("store '{}'", selector)))
    }

    /// Resolve an aisle within a store by local id or exact post-trim name.
    fn resolve_aisle(&self, store_id: &str, selector: &str) -> Result<AisleRecord, AppError> {
        let conn = self.lock();
        if let Some(aisle) = db::get_aisle(&conn, selector)? {
            if aisle.store_id == store_id {
                return Ok(aisle);
            }
        }
        db::find_aisle_by_name(&conn, store_id, selector.trim())?
            .ok_or_else(|| AppError::NotFound(format!("aisle '{}'", selector)))
    }

    pub fn create_store(&self, args: &NewStore<'_>) -> Result<StoreCreated, AppError> {
        let name = args.name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidArgument(
                "store name must not be empty".to_string(),
            ));
        }
        let cell = match (args.lat, args.lng) {
            (Some(lat), Some(lng)) => Some(geo_cell(lat, lng)),
            (None, None) => None,
            _ => {
                return Err(AppError::InvalidArgument(
                    "latitude and longitude must be given together".to_string(),
                ))
            }
        };

        let store = StoreRecord {
            id: new_local_id(),
            remote: RemoteLink::Unlinked,
            name: name.to_string(),
            normalized_name: normalize_name(name),
            lat: args.lat,
            lng: args.lng,
            geo_cell: cell,
            address: clean_optional(args.address),
            city: clean_optional(args.city),
            created_at: now_utc_rfc3339(),
        };
        db::insert_store(&self.lock(), &store)?;

        let share_error = match self.engine.push_store(&store.id) {
            Ok(_) => None,
            Err(err) => {
                log::warn!("store '{}' saved locally but could not be shared: {}", name, err);
                Some(err.to_string())
            }
        };
        let record = db::get_store(&self.lock(), &store.id)?
            .ok_or_else(|| AppError::NotFound(format!("store '{}'", store.id)))?;
        Ok(StoreCreated {
            store: record.into(),
            shared: share_error.is_none(),
            share_error,
        })
    }

    pub fn list_stores(&self) -> Result<Vec<StoreView>, AppError> {
        Ok(db::list_stores(&self.lock())?
            .into_iter()
            .map(StoreView::from)
            .collect())
    }

    pub fn search_stores(&self, query: &str) -> Result<Vec<StoreView>, AppError> {
        Ok(db::find_stores_by_name(&self.lock(), &normalize_name(query))?
            .into_iter()
            .map(StoreView::from)
            .collect())
    }

    pub fn show_store(&self, selector: &str) -> Result<StoreDetail, AppError> {
        let store = self.resolve_store(selector)?;
        let aisles = db::list_aisles(&self.lock(), &store.id)?;
        let products = self.product_views(&store.id)?;
        Ok(StoreDetail {
            store: store.into(),
            aisles: aisles.into_iter().map(AisleView::from).collect(),
            products,
        })
    }

    /// Store profile edits require a resolved actor, matching the shared
    /// directory's write rules even when the change starts locally.
    pub fn edit_store(
        &self,
        selector: &str,
        name: Option<&str>,
        address: Option<&str>,
        city: Option<&str>,
    ) -> Result<StoreView, AppError> {
        if self.identity.current()?.is_none() {
            return Err(AppError::Unauthenticated);
        }
        let store = self.resolve_store(selector)?;
        let next_name = match name {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            Some(_) => {
                return Err(AppError::InvalidArgument(
                    "store name must not be empty".to_string(),
                ))
            }
            None => store.name.clone(),
        };
        db::update_store_profile(
            &self.lock(),
            &store.id,
            &next_name,
            &normalize_name(&next_name),
            clean_optional(address).as_deref().or(store.address.as_deref()),
            clean_optional(city).as_deref().or(store.city.as_deref()),
        )?;

        if store.remote.is_linked() {
            if let Err(err) = self.engine.push_store(&store.id) {
                log::warn!("store edit saved locally but not shared: {}", err);
            }
        }

        let record = db::get_store(&self.lock(), &store.id)?
            .ok_or_else(|| AppError::NotFound(format!("store '{}'", store.id)))?;
        Ok(record.into())
    }

    /// Explicit, confirmed delete: removes the store's remote aisle and
    /// product documents, the remote store, then the local records via
    /// cascade.
    pub fn delete_store(&self, selector: &str) -> Result<StoreView, AppError> {
        let store = self.resolve_store(selector)?;
        let view = StoreView::from(store.clone());
        self.engine.delete_store(&store.id)?;
        Ok(view)
    }

    pub fn add_aisle(
        &self,
        store_selector: &str,
        name: &str,
        keywords: &[String],
    ) -> Result<AisleCreated, AppError> {
        let store = self.resolve_store(store_selector)?;
        let title = name.trim();
        if title.is_empty() {
            return Err(AppError::InvalidArgument(
                "aisle name must not be empty".to_string(),
            ));
        }

        let aisle_id = new_local_id();
        {
            let conn = self.lock();
            if let Some(existing) = db::find_aisle_by_name(&conn, &store.id, title)? {
                return Err(AppError::InvalidArgument(format!(
                    "aisle '{}' already exists in store '{}'",
                    existing.name, store.name
                )));
            }
            let now = now_utc_rfc3339();
            db::insert_aisle(
                &conn,
                &AisleRecord {
                    id: aisle_id.clone(),
                    store_id: store.id.clone(),
                    remote: RemoteLink::Unlinked,
                    name: title.to_string(),
                    keywords: sanitize_keywords(keywords.iter().map(String::as_str)),
                    created_at: now.clone(),
                    updated_at: now,
                },
            )?;
        }

        let share_error = match self.engine.push_aisle(&aisle_id) {
            Ok(_) => None,
            Err(err) => {
                log::warn!("aisle '{}' saved locally but could not be shared: {}", title, err);
                Some(err.to_string())
            }
        };
        let record = db::get_aisle(&self.lock(), &aisle_id)?
            .ok_or_else(|| AppError::NotFound(format!("aisle '{}'", aisle_id)))?;
        Ok(AisleCreated {
            aisle: record.into(),
            shared: share_error.is_none(),
            share_error,
        })
    }

    pub fn list_aisles(&self, store_selector: &str) -> Result<Vec<AisleView>, AppError> {
        let store = self.resolve_store(store_selector)?;
        Ok(db::list_aisles(&self.lock(), &store.id)?
            .into_iter()
            .map(AisleView::from)
            .collect())
    }

    /// Substring search over aisle names and keywords.
    pub fn search_aisles(
        &self,
        store_selector: &str,
        query: &str,
    ) -> Result<Vec<AisleView>, AppError> {
        let store = self.resolve_store(store_selector)?;
        Ok(db::find_aisles_matching(&self.lock(), &store.id, &normalize_name(query))?
            .into_iter()
            .map(AisleView::from)
            .collect())
    }

    pub fn edit_aisle(
        &self,
        store_selector: &str,
        aisle_selector: &str,
        name: Option<&str>,
        add_keywords: &[String],
        remove_keywords: &[String],
    ) -> Result<AisleView, AppError> {
        let store = self.resolve_store(store_selector)?;
        let aisle = self.resolve_aisle(&store.id, aisle_selector)?;

        let next_name = match name {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            Some(_) => {
                return Err(AppError::InvalidArgument(
                    "aisle name must not be empty".to_string(),
                ))
            }
            None => aisle.name.clone(),
        };
        let removals: Vec<String> = sanitize_keywords(remove_keywords.iter().map(String::as_str));
        let mut keywords: Vec<String> = aisle
            .keywords
            .iter()
            .filter(|keyword| !removals.contains(keyword))
            .cloned()
            .chain(sanitize_keywords(add_keywords.iter().map(String::as_str)))
            .collect();
        keywords.sort();
        keywords.dedup();

        db::update_aisle(
            &self.lock(),
            &aisle.id,
            &next_name,
            &keywords,
            &now_utc_rfc3339(),
        )?;

        if let Err(err) = self.engine.push_aisle(&aisle.id) {
            log::warn!("aisle edit saved locally but not shared: {}", err);
        }

        let record = db::get_aisle(&self.lock(), &aisle.id)?
            .ok_or_else(|| AppError::NotFound(format!("aisle '{}'", aisle.id)))?;
        Ok(record.into())
    }

    pub fn remove_aisle(
        &self,
        store_selector: &str,
        aisle_selector: &str,
    ) -> Result<AisleView, AppError> {
        let store = self.resolve_store(store_selector)?;
        let aisle = self.resolve_aisle(&store.id, aisle_selector)?;
        let view = AisleView::from(aisle.clone());
        self.engine.delete_aisle(&aisle.id)?;
        Ok(view)
    }

    pub fn list_products(&self, store_selector: &str) -> Result<Vec<ProductView>, AppError> {
        let store = self.resolve_store(store_selector)?;
        self.product_views(&store.id)
    }

    fn product_views(&self, store_id: &str) -> Result<Vec<ProductView>, AppError> {
        let conn = self.lock();
        let aisles = db::list_aisles(&conn, store_id)?;
        Ok(db::list_products(&conn, store_id)?
            .into_iter()
            .map(|product| product_view(product, &aisles))
            .collect())
    }

    /// Photograph-to-aisle ingestion. Requires the `[ai]` config section.
    pub fn scan_sign(&self, store_selector: &str, image_path: &Path) -> Result<IngestOutcome, AppError> {
        let store = self.resolve_store(store_selector)?;
        let vision = self.ai.as_ref().ok_or_else(|| {
            AppError::InvalidArgument(
                "aisle-sign scanning needs an [ai] section in the config file".to_string(),
            )
        })?;
        let mime = mime_for_path(image_path)?;
        let image = std::fs::read(image_path)?;

        let service = IngestService::new(&self.conn, vision, self.identity.as_ref(), &self.engine);
        Ok(service.ingest_sign(&store.id, mime, &image)?)
    }

    pub fn suggest_aisle(
        &self,
        store_selector: &str,
        product_name: &str,
    ) -> Result<Suggestion, AppError> {
        let store = self.resolve_store(store_selector)?;
        let ranking = self.ai.as_ref().map(|client| client as &dyn SuggestionClient);
        let service = SuggestService::new(&self.conn, ranking, &self.engine);
        Ok(service.suggest(&store.id, product_name)?)
    }

    pub fn assign_product(
        &self,
        store_selector: &str,
        product_name: &str,
        aisle_selector: &str,
        barcode: Option<&str>,
    ) -> Result<AssignOutcome, AppError> {
        let store = self.resolve_store(store_selector)?;
        let aisle = self.resolve_aisle(&store.id, aisle_selector)?;
        let service = SuggestService::new(&self.conn, None, &self.engine);
        Ok(service.assign(&store.id, product_name, &aisle.id, barcode)?)
    }

    /// One-shot sync: link the store, reconcile a fresh full snapshot, then
    /// push whatever is still unlinked. Reconciling first lets offline
    /// duplicates adopt existing remote records instead of re-creating them.
    pub fn sync_store(&self, store_selector: &str) -> Result<SyncReport, AppError> {
        let store = self.resolve_store(store_selector)?;
        // A user-initiated sync may mint an anonymous identity, like
        // ingestion does.
        self.identity.ensure(ANONYMOUS_SIGN_IN_TIMEOUT)?;
        let store_remote_id = self.engine.push_store(&store.id)?;
        let (aisles, products) = self.engine.pull_store(&store.id)?;
        let pushed = self.engine.push_store_contents(&store.id)?;
        Ok(SyncReport {
            store_remote_id,
            pushed,
            aisles,
            products,
        })
    }

    pub fn start_watch(&self, store_selector: &str) -> Result<StoreView, AppError> {
        let store = self.resolve_store(store_selector)?;
        self.engine.start_watch(&store.id)?;
        Ok(store.into())
    }

    pub fn stop_watch(&self, store_selector: &str) -> Result<(), AppError> {
        let store = self.resolve_store(store_selector)?;
        self.engine.stop_watch(&store.id);
        Ok(())
    }

    pub fn watch_state(
        &self,
        store_selector: &str,
    ) -> Result<(SubscriptionState, SubscriptionState), AppError> {
        let store = self.resolve_store(store_selector)?;
        Ok(self.engine.watch_state(&store.id))
    }
}

const SAMPLE_CONFIG: &str = r#"# aislemap configuration

[remote]
# off: local-only. memory: in-process demo directory. http: shared backend.
mode = "off"
# base_url = "https://aislemap.example.com"
# api_key = ""

# Uncomment to enable aisle-sign scanning and AI aisle suggestions.
# [ai]
# base_url = "https://ai.example.com"
# api_key = ""
# model = "sign-reader-2"
# detail = "high"

# [identity]
# user_id = ""
"#;

#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub db_path: String,
    pub config_path: String,
    pub config_created: bool,
}

/// Create the local database (running migrations) and, when absent, a
/// commented starter config file.
pub fn init(db_path: &str, config_path: &Path) -> Result<InitReport, AppError> {
    ensure_parent_dir(db_path)?;
    let conn = db::open_connection(db_path)?;
    drop(conn);

    let config_created = if config_path.exists() {
        false
    } else {
        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(config_path, SAMPLE_CONFIG)?;
        true
    };

    Ok(InitReport {
        db_path: db_path.to_string(),
        config_path: config_path.display().to_string(),
        config_created,
    })
}

fn product_view(product: ProductRecord, aisles: &[AisleRecord]) -> ProductView {
    let aisle_name = product.aisle_id.as_deref().and_then(|aisle_id| {
        aisles
            .iter()
            .find(|aisle| aisle.id == aisle_id)
            .map(|aisle| aisle.name.clone())
    });
    ProductView {
        id: product.id,
        name: product.name,
        barcode: product.barcode,
        aisle_id: product.aisle_id,
        aisle_name,
        remote_id: product.remote.as_option().map(str::to_string),
    }
}

fn clean_optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn mime_for_path(path: &Path) -> Result<&'static str, AppError> {
    let extension = path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "png" => Ok("image/png"),
        "webp" => Ok("image/webp"),
        "heic" | "heif" => Ok("image/heic"),
        _ => Err(AppError::InvalidArgument(format!(
            "unsupported image type '{}'",
            path.display()
        ))),
    }
}

fn ensure_parent_dir(db_path: &str) -> Result<(), AppError> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
