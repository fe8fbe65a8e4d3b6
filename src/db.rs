use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{params, Connection, DatabaseName, OptionalExtension, Result};

pub const CURRENT_SCHEMA_VERSION: i64 = 1;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: [Migration; 1] = [Migration {
    version: 1,
    name: "baseline_store_map_schema_v1",
    sql: r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS store (
    id TEXT PRIMARY KEY,
    remote_id TEXT UNIQUE,
    name TEXT NOT NULL,
    normalized_name TEXT NOT NULL,
    lat REAL,
    lng REAL,
    geo_cell TEXT,
    address TEXT,
    city TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS aisle (
    id TEXT PRIMARY KEY,
    store_id TEXT NOT NULL REFERENCES store(id) ON DELETE CASCADE,
    remote_id TEXT,
    name TEXT NOT NULL,
    keywords_json TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS product_item (
    id TEXT PRIMARY KEY,
    store_id TEXT NOT NULL REFERENCES store(id) ON DELETE CASCADE,
    aisle_id TEXT REFERENCES aisle(id) ON DELETE SET NULL,
    remote_id TEXT,
    remote_aisle_id TEXT,
    name TEXT NOT NULL,
    normalized_name TEXT NOT NULL,
    barcode TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_store_geo_cell ON store(geo_cell);
CREATE INDEX IF NOT EXISTS idx_aisle_store ON aisle(store_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_aisle_store_remote
    ON aisle(store_id, remote_id) WHERE remote_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_product_store ON product_item(store_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_product_store_remote
    ON product_item(store_id, remote_id) WHERE remote_id IS NOT NULL;
"#,
}];

pub fn open_connection(path: &str) -> Result<Connection> {
    let mut conn = Connection::open(path)?;
    configure_connection(&conn)?;
    apply_migrations(&mut conn)?;
    Ok(conn)
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.pragma_update(None::<DatabaseName>, "journal_mode", "WAL")?;
    conn.pragma_update(None::<DatabaseName>, "synchronous", "NORMAL")?;
    conn.pragma_update(None::<DatabaseName>, "foreign_keys", "ON")?;
    conn.pragma_update(None::<DatabaseName>, "temp_store", "MEMORY")?;
    conn.pragma_update(None::<DatabaseName>, "busy_timeout", 5000i64)?;
    conn.busy_timeout(Duration::from_millis(5000))?;
    Ok(())
}

fn apply_migrations(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
);
"#,
    )?;

    for migration in MIGRATIONS {
        let already_applied: Option<i64> = tx
            .query_row(
                "SELECT version FROM schema_migrations WHERE version = ?1",
                params![migration.version],
                |row| row.get(0),
            )
            .optional()?;

        if already_applied.is_some() {
            continue;
        }

        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![
                migration.version,
                migration.name,
                crate::identity::now_utc_rfc3339()
            ],
        )?;
    }

    tx.execute(
        r#"
INSERT INTO meta (key, value)
VALUES ('schema_version', ?1)
ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#,
        params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;

    tx.commit()
}

/// Whether a local record has been assigned a remote document id yet.
/// Records created offline stay `Unlinked` until a push or a reconciliation
/// pass adopts a remote id onto them. A remote id, once assigned, is never
/// moved to a different local record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteLink {
    Unlinked,
    Linked(String),
}

impl RemoteLink {
    pub fn from_column(value: Option<String>) -> Self {
        match value {
            Some(id) => RemoteLink::Linked(id),
            None => RemoteLink::Unlinked,
        }
    }

    pub fn as_option(&self) -> Option<&str> {
        match self {
            RemoteLink::Linked(id) => Some(id),
            RemoteLink::Unlinked => None,
        }
    }

    pub fn is_linked(&self) -> bool {
        matches!(self, RemoteLink::Linked(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreRecord {
    pub id: String,
    pub remote: RemoteLink,
    pub name: String,
    pub normalized_name: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub geo_cell: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AisleRecord {
    pub id: String,
    pub store_id: String,
    pub remote: RemoteLink,
    pub name: String,
    pub keywords: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRecord {
    pub id: String,
    pub store_id: String,
    pub aisle_id: Option<String>,
    pub remote: RemoteLink,
    pub remote_aisle_id: Option<String>,
    pub name: String,
    pub normalized_name: String,
    pub barcode: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub fn insert_store(conn: &Connection, store: &StoreRecord) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO store (
    id, remote_id, name, normalized_name, lat, lng, geo_cell, address, city, created_at
)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
"#,
        params![
            store.id,
            store.remote.as_option(),
            store.name,
            store.normalized_name,
            store.lat,
            store.lng,
            store.geo_cell,
            store.address,
            store.city,
            store.created_at
        ],
    )?;
    Ok(())
}

pub fn get_store(conn: &Connection, id: &str) -> Result<Option<StoreRecord>> {
    conn.query_row(
        r#"
SELECT id, remote_id, name, normalized_name, lat, lng, geo_cell, address, city, created_at
FROM store
WHERE id = ?1
"#,
        params![id],
        store_from_row,
    )
    .optional()
}

pub fn list_stores(conn: &Connection) -> Result<Vec<StoreRecord>> {
    let mut stmt = conn.prepare(
        r#"
SELECT id, remote_id, name, normalized_name, lat, lng, geo_cell, address, city, created_at
FROM store
ORDER BY created_at ASC, id ASC
"#,
    )?;
    let mut rows = stmt.query([])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(store_from_row(row)?);
    }
    Ok(result)
}

pub fn find_stores_by_name(conn: &Connection, normalized_query: &str) -> Result<Vec<StoreRecord>> {
    let mut stmt = conn.prepare(
        r#"
SELECT id, remote_id, name, normalized_name, lat, lng, geo_cell, address, city, created_at
FROM store
WHERE normalized_name LIKE '%' || ?1 || '%'
ORDER BY created_at ASC, id ASC
"#,
    )?;
    let mut rows = stmt.query(params![normalized_query])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(store_from_row(row)?);
    }
    Ok(result)
}

pub fn update_store_profile(
    conn: &Connection,
    id: &str,
    name: &str,
    normalized_name: &str,
    address: Option<&str>,
    city: Option<&str>,
) -> Result<()> {
    conn.execute(
        r#"
UPDATE store
SET name = ?2, normalized_name = ?3, address = ?4, city = ?5
WHERE id = ?1
"#,
        params![id, name, normalized_name, address, city],
    )?;
    Ok(())
}

pub fn set_store_remote_id(conn: &Connection, id: &str, remote_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE store SET remote_id = ?2 WHERE id = ?1",
        params![id, remote_id],
    )?;
    Ok(())
}

pub fn delete_store(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM store WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn insert_aisle(conn: &Connection, aisle: &AisleRecord) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO aisle (id, store_id, remote_id, name, keywords_json, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
"#,
        params![
            aisle.id,
            aisle.store_id,
            aisle.remote.as_option(),
            aisle.name,
            keywords_to_json(&aisle.keywords),
            aisle.created_at,
            aisle.updated_at
        ],
    )?;
    Ok(())
}

pub fn get_aisle(conn: &Connection, id: &str) -> Result<Option<AisleRecord>> {
    conn.query_row(
        r#"
SELECT id, store_id, remote_id, name, keywords_json, created_at, updated_at
FROM aisle
WHERE id = ?1
"#,
        params![id],
        aisle_from_row,
    )
    .optional()
}

pub fn list_aisles(conn: &Connection, store_id: &str) -> Result<Vec<AisleRecord>> {
    let mut stmt = conn.prepare(
        r#"
SELECT id, store_id, remote_id, name, keywords_json, created_at, updated_at
FROM aisle
WHERE store_id = ?1
ORDER BY created_at ASC, id ASC
"#,
    )?;
    let mut rows = stmt.query(params![store_id])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(aisle_from_row(row)?);
    }
    Ok(result)
}

/// Aisles never yet linked to a remote document, in insertion order.
pub fn list_unlinked_aisles(conn: &Connection, store_id: &str) -> Result<Vec<AisleRecord>> {
    let mut stmt = conn.prepare(
        r#"
SELECT id, store_id, remote_id, name, keywords_json, created_at, updated_at
FROM aisle
WHERE store_id = ?1 AND remote_id IS NULL
ORDER BY created_at ASC, id ASC
"#,
    )?;
    let mut rows = stmt.query(params![store_id])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(aisle_from_row(row)?);
    }
    Ok(result)
}

/// Substring search over aisle names and keywords. The query is expected to
/// be normalized already; keywords are stored normalized.
pub fn find_aisles_matching(
    conn: &Connection,
    store_id: &str,
    normalized_query: &str,
) -> Result<Vec<AisleRecord>> {
    let mut stmt = conn.prepare(
        r#"
SELECT id, store_id, remote_id, name, keywords_json, created_at, updated_at
FROM aisle
WHERE store_id = ?1
  AND (lower(name) LIKE '%' || ?2 || '%' OR keywords_json LIKE '%' || ?2 || '%')
ORDER BY created_at ASC, id ASC
"#,
    )?;
    let mut rows = stmt.query(params![store_id, normalized_query])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(aisle_from_row(row)?);
    }
    Ok(result)
}

/// Exact post-trim name match; the de-duplication rule shared by manual add
/// and vision ingestion.
pub fn find_aisle_by_name(
    conn: &Connection,
    store_id: &str,
    name: &str,
) -> Result<Option<AisleRecord>> {
    conn.query_row(
        r#"
SELECT id, store_id, remote_id, name, keywords_json, created_at, updated_at
FROM aisle
WHERE store_id = ?1 AND name = ?2
ORDER BY created_at ASC, id ASC
LIMIT 1
"#,
        params![store_id, name],
        aisle_from_row,
    )
    .optional()
}

pub fn find_aisle_by_remote_id(
    conn: &Connection,
    store_id: &str,
    remote_id: &str,
) -> Result<Option<AisleRecord>> {
    conn.query_row(
        r#"
SELECT id, store_id, remote_id, name, keywords_json, created_at, updated_at
FROM aisle
WHERE store_id = ?1 AND remote_id = ?2
"#,
        params![store_id, remote_id],
        aisle_from_row,
    )
    .optional()
}

pub fn update_aisle(
    conn: &Connection,
    id: &str,
    name: &str,
    keywords: &[String],
    updated_at: &str,
) -> Result<()> {
    conn.execute(
        r#"
UPDATE aisle
SET name = ?2, keywords_json = ?3, updated_at = ?4
WHERE id = ?1
"#,
        params![id, name, keywords_to_json(keywords), updated_at],
    )?;
    Ok(())
}

pub fn set_aisle_remote_id(conn: &Connection, id: &str, remote_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE aisle SET remote_id = ?2 WHERE id = ?1",
        params![id, remote_id],
    )?;
    Ok(())
}

pub fn delete_aisle(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM aisle WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn insert_product(conn: &Connection, product: &ProductRecord) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO product_item (
    id, store_id, aisle_id, remote_id, remote_aisle_id,
    name, normalized_name, barcode, created_at, updated_at
)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
"#,
        params![
            product.id,
            product.store_id,
            product.aisle_id,
            product.remote.as_option(),
            product.remote_aisle_id,
            product.name,
            product.normalized_name,
            product.barcode,
            product.created_at,
            product.updated_at
        ],
    )?;
    Ok(())
}

pub fn get_product(conn: &Connection, id: &str) -> Result<Option<ProductRecord>> {
    conn.query_row(
        r#"
SELECT id, store_id, aisle_id, remote_id, remote_aisle_id,
       name, normalized_name, barcode, created_at, updated_at
FROM product_item
WHERE id = ?1
"#,
        params![id],
        product_from_row,
    )
    .optional()
}

pub fn list_products(conn: &Connection, store_id: &str) -> Result<Vec<ProductRecord>> {
    let mut stmt = conn.prepare(
        r#"
SELECT id, store_id, aisle_id, remote_id, remote_aisle_id,
       name, normalized_name, barcode, created_at, updated_at
FROM product_item
WHERE store_id = ?1
ORDER BY created_at ASC, id ASC
"#,
    )?;
    let mut rows = stmt.query(params![store_id])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(product_from_row(row)?);
    }
    Ok(result)
}

pub fn list_unlinked_products(conn: &Connection, store_id: &str) -> Result<Vec<ProductRecord>> {
    let mut stmt = conn.prepare(
        r#"
SELECT id, store_id, aisle_id, remote_id, remote_aisle_id,
       name, normalized_name, barcode, created_at, updated_at
FROM product_item
WHERE store_id = ?1 AND remote_id IS NULL
ORDER BY created_at ASC, id ASC
"#,
    )?;
    let mut rows = stmt.query(params![store_id])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(product_from_row(row)?);
    }
    Ok(result)
}

pub fn find_products_by_name(
    conn: &Connection,
    store_id: &str,
    normalized_query: &str,
) -> Result<Vec<ProductRecord>> {
    let mut stmt = conn.prepare(
        r#"
SELECT id, store_id, aisle_id, remote_id, remote_aisle_id,
       name, normalized_name, barcode, created_at, updated_at
FROM product_item
WHERE store_id = ?1 AND normalized_name LIKE '%' || ?2 || '%'
ORDER BY created_at ASC, id ASC
"#,
    )?;
    let mut rows = stmt.query(params![store_id, normalized_query])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(product_from_row(row)?);
    }
    Ok(result)
}

pub struct UpdateProduct<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub normalized_name: &'a str,
    pub barcode: Option<&'a str>,
    pub aisle_id: Option<&'a str>,
    pub remote_aisle_id: Option<&'a str>,
    pub updated_at: &'a str,
}

pub fn update_product(conn: &Connection, args: &UpdateProduct<'_>) -> Result<()> {
    conn.execute(
        r#"
UPDATE product_item
SET name = ?2, normalized_name = ?3, barcode = ?4,
    aisle_id = ?5, remote_aisle_id = ?6, updated_at = ?7
WHERE id = ?1
"#,
        params![
            args.id,
            args.name,
            args.normalized_name,
            args.barcode,
            args.aisle_id,
            args.remote_aisle_id,
            args.updated_at
        ],
    )?;
    Ok(())
}

pub fn set_product_remote_id(conn: &Connection, id: &str, remote_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE product_item SET remote_id = ?2 WHERE id = ?1",
        params![id, remote_id],
    )?;
    Ok(())
}

pub fn delete_product(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM product_item WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM meta WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO meta (key, value)
VALUES (?1, ?2)
ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#,
        params![key, value],
    )?;
    Ok(())
}

fn store_from_row(row: &rusqlite::Row<'_>) -> Result<StoreRecord> {
    Ok(StoreRecord {
        id: row.get(0)?,
        remote: RemoteLink::from_column(row.get(1)?),
        name: row.get(2)?,
        normalized_name: row.get(3)?,
        lat: row.get(4)?,
        lng: row.get(5)?,
        geo_cell: row.get(6)?,
        address: row.get(7)?,
        city: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn aisle_from_row(row: &rusqlite::Row<'_>) -> Result<AisleRecord> {
    Ok(AisleRecord {
        id: row.get(0)?,
        store_id: row.get(1)?,
        remote: RemoteLink::from_column(row.get(2)?),
        name: row.get(3)?,
        keywords: keywords_from_json(4, row.get(4)?)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn product_from_row(row: &rusqlite::Row<'_>) -> Result<ProductRecord> {
    Ok(ProductRecord {
        id: row.get(0)?,
        store_id: row.get(1)?,
        aisle_id: row.get(2)?,
        remote: RemoteLink::from_column(row.get(3)?),
        remote_aisle_id: row.get(4)?,
        name: row.get(5)?,
        normalized_name: row.get(6)?,
        barcode: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn keywords_to_json(keywords: &[String]) -> String {
    serde_json::to_string(keywords).expect("keyword list serialization should never fail")
}

fn keywords_from_json(column: usize, raw: String) -> Result<Vec<String>> {
    serde_json::from_str(&raw).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
    })
}
