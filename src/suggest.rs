use std::error::Error;
use std::fmt;
use std::sync::Mutex;

use rusqlite::Connection;
use serde::Serialize;

use crate::ai::{AisleProjection, RankingRequest, RpcError, SuggestionClient};
use crate::db::{self, ProductRecord, RemoteLink};
use crate::identity::{new_local_id, normalize_name, now_utc_rfc3339};
use crate::sync::SyncEngine;

#[derive(Debug)]
pub enum SuggestError {
    StoreNotFound(String),
    AisleNotFound(String),
    Rpc(RpcError),
    Persistence(rusqlite::Error),
}

impl fmt::Display for SuggestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuggestError::StoreNotFound(id) => write!(f, "store '{}' not found", id),
            SuggestError::AisleNotFound(id) => write!(f, "aisle '{}' not found", id),
            SuggestError::Rpc(err) => write!(f, "{}", err),
            SuggestError::Persistence(err) => write!(f, "database error: {}", err),
        }
    }
}

impl Error for SuggestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SuggestError::Rpc(err) => Some(err),
            SuggestError::Persistence(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RpcError> for SuggestError {
    fn from(value: RpcError) -> Self {
        SuggestError::Rpc(value)
    }
}

impl From<rusqlite::Error> for SuggestError {
    fn from(value: rusqlite::Error) -> Self {
        SuggestError::Persistence(value)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Suggestion {
    /// The product is already known and shelved in this store.
    KnownProduct {
        product_id: String,
        aisle_id: String,
        aisle_name: String,
    },
    /// Local keyword scoring produced a confident match.
    LocalMatch {
        aisle_id: String,
        aisle_name: String,
        score: u32,
    },
    /// Ranked candidates from the external service.
    Ranked { candidates: Vec<RankedCandidate> },
    NotFound,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RankedCandidate {
    pub aisle_id: String,
    pub aisle_name: String,
    pub confidence_label: String,
    pub confidence_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignOutcome {
    pub product_id: String,
    pub pushed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_error: Option<String>,
}

pub struct SuggestService<'a> {
    conn: &'a Mutex<Connection>,
    ranking: Option<&'a dyn SuggestionClient>,
    engine: &'a SyncEngine,
}

impl<'a> SuggestService<'a> {
    pub fn new(
        conn: &'a Mutex<Connection>,
        ranking: Option<&'a dyn SuggestionClient>,
        engine: &'a SyncEngine,
    ) -> Self {
        Self {
            conn,
            ranking,
            engine,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .expect("connection lock should not be poisoned")
    }

    /// Where is this product likely shelved? Known products short-circuit,
    /// local keyword scoring runs next, and the external ranking service is
    /// the last resort.
    pub fn suggest(&self, store_id: &str, product_name: &str) -> Result<Suggestion, SuggestError> {
        let query = normalize_name(product_name);
        let (known, aisles) = {
            let conn = self.lock();
            if db::get_store(&conn, store_id)?.is_none() {
                return Err(SuggestError::StoreNotFound(store_id.to_string()));
            }
            (
                db::find_products_by_name(&conn, store_id, &query)?,
                db::list_aisles(&conn, store_id)?,
            )
        };

        let shelved = known
            .iter()
            .find_map(|product| product.aisle_id.clone().map(|aisle_id| (product, aisle_id)));
        if let Some((product, aisle_id)) = shelved {
            if let Some(aisle) = db::get_aisle(&self.lock(), &aisle_id)? {
                return Ok(Suggestion::KnownProduct {
                    product_id: product.id.clone(),
                    aisle_id,
                    aisle_name: aisle.name,
                });
            }
        }

        if let Some((aisle, score)) = best_local_match(&aisles, &query) {
            return Ok(Suggestion::LocalMatch {
                aisle_id: aisle.id.clone(),
                aisle_name: aisle.name.clone(),
                score,
            });
        }

        let Some(ranking) = self.ranking else {
            log::debug!("no ranking service configured; '{}' stays unresolved", query);
            return Ok(Suggestion::NotFound);
        };

        let request = RankingRequest {
            product_name: product_name.trim().to_string(),
            aisles: aisles
                .iter()
                .map(|aisle| AisleProjection {
                    id: aisle.id.clone(),
                    name_or_number: aisle.name.clone(),
                    keywords: aisle.keywords.clone(),
                })
                .collect(),
        };
        let response = ranking.rank_aisles(&request)?;
        if response.not_found || response.candidates.is_empty() {
            return Ok(Suggestion::NotFound);
        }

        let candidates = response
            .candidates
            .into_iter()
            .take(3)
            .filter_map(|candidate| {
                aisles
                    .iter()
                    .find(|aisle| aisle.id == candidate.aisle_id)
                    .map(|aisle| RankedCandidate {
                        aisle_id: candidate.aisle_id,
                        aisle_name: aisle.name.clone(),
                        confidence_label: candidate.confidence_label.as_str().to_string(),
                        confidence_score: candidate.confidence_score,
                        reason: candidate.reason,
                    })
            })
            .collect::<Vec<_>>();
        if candidates.is_empty() {
            return Ok(Suggestion::NotFound);
        }
        Ok(Suggestion::Ranked { candidates })
    }

    /// Record an accepted aisle assignment as a product item and share it.
    /// An existing product with the same normalized name is re-assigned
    /// instead of duplicated.
    pub fn assign(
        &self,
        store_id: &str,
        product_name: &str,
        aisle_id: &str,
        barcode: Option<&str>,
    ) -> Result<AssignOutcome, SuggestError> {
        let normalized = normalize_name(product_name);
        let product_id = {
            let conn = self.lock();
            if db::get_store(&conn, store_id)?.is_none() {
                return Err(SuggestError::StoreNotFound(store_id.to_string()));
            }
            let aisle = db::get_aisle(&conn, aisle_id)?
                .filter(|aisle| aisle.store_id == store_id)
                .ok_or_else(|| SuggestError::AisleNotFound(aisle_id.to_string()))?;
            let remote_aisle_id = aisle.remote.as_option().map(str::to_string);
            let now = now_utc_rfc3339();

            let existing = db::list_products(&conn, store_id)?
                .into_iter()
                .find(|product| product.normalized_name == normalized);
            match existing {
                Some(product) => {
                    db::update_product(
                        &conn,
                        &db::UpdateProduct {
                            id: &product.id,
                            name: product_name.trim(),
                            normalized_name: &normalized,
                            barcode: barcode.or(product.barcode.as_deref()),
                            aisle_id: Some(aisle_id),
                            remote_aisle_id: remote_aisle_id.as_deref(),
                            updated_at: &now,
                        },
                    )?;
                    product.id
                }
                None => {
                    let product = ProductRecord {
                        id: new_local_id(),
                        store_id: store_id.to_string(),
                        aisle_id: Some(aisle_id.to_string()),
                        remote: RemoteLink::Unlinked,
                        remote_aisle_id,
                        name: product_name.trim().to_string(),
                        normalized_name: normalized.clone(),
                        barcode: barcode.map(str::to_string),
                        created_at: now.clone(),
                        updated_at: now,
                    };
                    db::insert_product(&conn, &product)?;
                    product.id
                }
            }
        };

        let push_error = match self.engine.push_product(&product_id) {
            Ok(_) => None,
            Err(err) => {
                log::warn!(
                    "product '{}' saved locally but could not be shared: {}",
                    product_name,
                    err
                );
                Some(err.to_string())
            }
        };

        Ok(AssignOutcome {
            product_id,
            pushed: push_error.is_none(),
            push_error,
        })
    }
}

/// +2 when the aisle name contains the query, +3 per keyword containing it.
/// The highest positive score wins; earlier aisles win ties.
fn best_local_match<'r>(
    aisles: &'r [db::AisleRecord],
    normalized_query: &str,
) -> Option<(&'r db::AisleRecord, u32)> {
    if normalized_query.is_empty() {
        return None;
    }
    let mut best: Option<(&db::AisleRecord, u32)> = None;
    for aisle in aisles {
        let mut score = 0u32;
        if normalize_name(&aisle.name).contains(normalized_query) {
            score += 2;
        }
        score += 3 * aisle
            .keywords
            .iter()
            .filter(|keyword| keyword.contains(normalized_query))
            .count() as u32;
        if score > 0 && best.map_or(true, |(_, top)| score > top) {
            best = Some((aisle, score));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::{SystemTime, UNIX_EPOCH};

    use rusqlite::Connection;

    use super::{best_local_match, SuggestError, SuggestService, Suggestion};
    use crate::ai::{
        ConfidenceLabel, RankedAisle, RankingRequest, RankingResponse, RpcError, SuggestionClient,
    };
    use crate::auth::StaticIdentity;
    use crate::db::{self, AisleRecord, RemoteLink, StoreRecord};
    use crate::identity::now_utc_rfc3339;
    use crate::remote::{MemoryDirectory, RemoteDirectory};
    use crate::sync::SyncEngine;

    enum FakeRanking {
        Respond(RankingResponse),
        Fail,
    }

    impl SuggestionClient for FakeRanking {
        fn rank_aisles(&self, _request: &RankingRequest) -> Result<RankingResponse, RpcError> {
            match self {
                FakeRanking::Respond(response) => Ok(response.clone()),
                FakeRanking::Fail => Err(RpcError::Transport("connection refused".to_string())),
            }
        }
    }

    struct Fixture {
        conn: Arc<Mutex<Connection>>,
        engine: SyncEngine,
        db_path: String,
    }

    impl Fixture {
        fn new(tag: &str) -> Self {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("system clock before UNIX_EPOCH")
                .as_nanos();
            let db_path = std::env::temp_dir()
                .join(format!("aislemap-suggest-{tag}-{nanos}.sqlite"))
                .display()
                .to_string();
            let conn = Arc::new(Mutex::new(
                db::open_connection(&db_path).expect("connection should open"),
            ));
            let engine = SyncEngine::new(
                Arc::clone(&conn),
                Arc::new(MemoryDirectory::new()) as Arc<dyn RemoteDirectory>,
                Arc::new(StaticIdentity::new(Some("user-1".to_string()))),
            );
            let fixture = Self {
                conn,
                engine,
                db_path,
            };
            db::insert_store(
                &fixture.lock(),
                &StoreRecord {
                    id: "s-1".to_string(),
                    remote: RemoteLink::Linked("st-seed".to_string()),
                    name: "Corner Market".to_string(),
                    normalized_name: "corner market".to_string(),
                    lat: None,
                    lng: None,
                    geo_cell: None,
                    address: None,
                    city: None,
                    created_at: now_utc_rfc3339(),
                },
            )
            .expect("store insert should succeed");
            fixture
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
            self.conn
                .lock()
                .expect("connection lock should not be poisoned")
        }

        fn add_aisle(&self, id: &str, name: &str, keywords: &[&str]) {
            let now = now_utc_rfc3339();
            db::insert_aisle(
                &self.lock(),
                &AisleRecord {
                    id: id.to_string(),
                    store_id: "s-1".to_string(),
                    remote: RemoteLink::Unlinked,
                    name: name.to_string(),
                    keywords: keywords.iter().map(|keyword| keyword.to_string()).collect(),
                    created_at: now.clone(),
                    updated_at: now,
                },
            )
            .expect("aisle insert should succeed");
        }

        fn service<'a>(
            &'a self,
            ranking: Option<&'a dyn SuggestionClient>,
        ) -> SuggestService<'a> {
            SuggestService::new(&self.conn, ranking, &self.engine)
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            for suffix in ["", "-wal", "-shm"] {
                let _ = std::fs::remove_file(format!("{}{}", self.db_path, suffix));
            }
        }
    }

    #[test]
    fn keyword_hits_outscore_name_hits() {
        let fixture = Fixture::new("scoring");
        fixture.add_aisle("a-1", "Dairy", &["milk", "cheese"]);
        fixture.add_aisle("a-2", "Milk Products", &[]);

        let suggestion = fixture
            .service(None)
            .suggest("s-1", "milk")
            .expect("suggest should succeed");
        assert_eq!(
            suggestion,
            Suggestion::LocalMatch {
                aisle_id: "a-1".to_string(),
                aisle_name: "Dairy".to_string(),
                score: 3,
            }
        );
    }

    #[test]
    fn name_and_keyword_scores_accumulate() {
        let aisles = vec![
            AisleRecord {
                id: "a-1".to_string(),
                store_id: "s-1".to_string(),
                remote: RemoteLink::Unlinked,
                name: "Milk & Dairy".to_string(),
                keywords: vec!["milkshake".to_string(), "milk".to_string()],
                created_at: String::new(),
                updated_at: String::new(),
            },
        ];
        let (aisle, score) = best_local_match(&aisles, "milk").expect("a match should exist");
        assert_eq!(aisle.id, "a-1");
        assert_eq!(score, 8);
    }

    #[test]
    fn known_products_short_circuit_scoring() {
        let fixture = Fixture::new("known");
        fixture.add_aisle("a-1", "Dairy", &["milk"]);
        fixture.add_aisle("a-2", "Milk Products", &[]);
        let now = now_utc_rfc3339();
        db::insert_product(
            &fixture.lock(),
            &db::ProductRecord {
                id: "p-1".to_string(),
                store_id: "s-1".to_string(),
                aisle_id: Some("a-2".to_string()),
                remote: RemoteLink::Unlinked,
                remote_aisle_id: None,
                name: "Whole Milk".to_string(),
                normalized_name: "whole milk".to_string(),
                barcode: None,
                created_at: now.clone(),
                updated_at: now,
            },
        )
        .expect("product insert should succeed");

        let suggestion = fixture
            .service(None)
            .suggest("s-1", "milk")
            .expect("suggest should succeed");
        assert_eq!(
            suggestion,
            Suggestion::KnownProduct {
                product_id: "p-1".to_string(),
                aisle_id: "a-2".to_string(),
                aisle_name: "Milk Products".to_string(),
            }
        );
    }

    #[test]
    fn unassigned_known_products_do_not_short_circuit() {
        let fixture = Fixture::new("unassigned");
        fixture.add_aisle("a-1", "Dairy", &["milk"]);
        let now = now_utc_rfc3339();
        db::insert_product(
            &fixture.lock(),
            &db::ProductRecord {
                id: "p-1".to_string(),
                store_id: "s-1".to_string(),
                aisle_id: None,
                remote: RemoteLink::Unlinked,
                remote_aisle_id: None,
                name: "Milk".to_string(),
                normalized_name: "milk".to_string(),
                barcode: None,
                created_at: now.clone(),
                updated_at: now,
            },
        )
        .expect("product insert should succeed");

        let suggestion = fixture
            .service(None)
            .suggest("s-1", "milk")
            .expect("suggest should succeed");
        assert!(matches!(suggestion, Suggestion::LocalMatch { .. }));
    }

    #[test]
    fn ranking_service_is_the_fallback_for_unscored_queries() {
        let fixture = Fixture::new("fallback");
        fixture.add_aisle("a-1", "Dairy", &["milk"]);
        let ranking = FakeRanking::Respond(RankingResponse {
            candidates: vec![RankedAisle {
                aisle_id: "a-1".to_string(),
                confidence_label: ConfidenceLabel::Likely,
                confidence_score: 0.7,
                reason: Some("dairy adjacent".to_string()),
            }],
            not_found: false,
        });

        let suggestion = fixture
            .service(Some(&ranking))
            .suggest("s-1", "kefir")
            .expect("suggest should succeed");
        match suggestion {
            Suggestion::Ranked { candidates } => {
                assert_eq!(candidates.len(), 1);
                assert_eq!(candidates[0].aisle_name, "Dairy");
                assert_eq!(candidates[0].confidence_label, "likely");
            }
            other => panic!("expected ranked candidates, got {:?}", other),
        }
    }

    #[test]
    fn ranking_not_found_flag_is_respected() {
        let fixture = Fixture::new("notfound");
        fixture.add_aisle("a-1", "Dairy", &["milk"]);
        let ranking = FakeRanking::Respond(RankingResponse {
            candidates: Vec::new(),
            not_found: true,
        });

        let suggestion = fixture
            .service(Some(&ranking))
            .suggest("s-1", "engine oil")
            .expect("suggest should succeed");
        assert_eq!(suggestion, Suggestion::NotFound);
    }

    #[test]
    fn ranking_failures_surface_typed() {
        let fixture = Fixture::new("rpc-fail");
        fixture.add_aisle("a-1", "Dairy", &["milk"]);
        let ranking = FakeRanking::Fail;

        let err = fixture
            .service(Some(&ranking))
            .suggest("s-1", "kefir")
            .expect_err("suggest should fail");
        assert!(matches!(err, SuggestError::Rpc(_)));
    }

    #[test]
    fn assignment_upserts_by_normalized_name_and_pushes() {
        let fixture = Fixture::new("assign");
        fixture.add_aisle("a-1", "Dairy", &["milk"]);
        fixture.add_aisle("a-2", "Bakery", &[]);
        let service = fixture.service(None);

        let first = service
            .assign("s-1", " Whole  Milk ", "a-1", None)
            .expect("assignment should succeed");
        assert!(first.pushed);

        // Accepting a different aisle for the same product moves it.
        let second = service
            .assign("s-1", "whole milk", "a-2", Some("7290000000001"))
            .expect("re-assignment should succeed");
        assert_eq!(first.product_id, second.product_id);

        let products = db::list_products(&fixture.lock(), "s-1")
            .expect("product list should succeed");
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].aisle_id, Some("a-2".to_string()));
        assert_eq!(products[0].barcode, Some("7290000000001".to_string()));
    }

    #[test]
    fn assignment_rejects_aisles_from_other_stores() {
        let fixture = Fixture::new("cross-store");
        fixture.add_aisle("a-1", "Dairy", &["milk"]);
        let err = fixture
            .service(None)
            .assign("s-1", "milk", "a-9", None)
            .expect_err("assignment should fail");
        assert!(matches!(err, SuggestError::AisleNotFound(_)));
    }
}
