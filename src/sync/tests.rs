use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rusqlite::Connection;

use super::{reconcile_aisles, reconcile_products, SubscriptionState, SyncEngine, SyncError};
use crate::auth::StaticIdentity;
use crate::db::{self, AisleRecord, ProductRecord, RemoteLink, StoreRecord};
use crate::identity::{content_hash, now_utc_rfc3339};
use crate::remote::{
    AisleDoc, MemoryDirectory, ProductDoc, RemoteAisle, RemoteDirectory, RemoteProduct,
};

struct Fixture {
    conn: Arc<Mutex<Connection>>,
    remote: Arc<MemoryDirectory>,
    engine: SyncEngine,
    db_path: String,
}

impl Fixture {
    fn new(tag: &str, actor: Option<&str>) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX_EPOCH")
            .as_nanos();
        let db_path = std::env::temp_dir()
            .join(format!("aislemap-sync-{tag}-{nanos}.sqlite"))
            .display()
            .to_string();
        let conn = Arc::new(Mutex::new(
            db::open_connection(&db_path).expect("connection should open"),
        ));
        let remote = Arc::new(MemoryDirectory::new());
        let engine = SyncEngine::new(
            Arc::clone(&conn),
            Arc::clone(&remote) as Arc<dyn RemoteDirectory>,
            Arc::new(StaticIdentity::new(actor.map(str::to_string))),
        );
        Self {
            conn,
            remote,
            engine,
            db_path,
        }
    }

    fn with_store(tag: &str, actor: Option<&str>, linked: bool) -> Self {
        let fixture = Self::new(tag, actor);
        let store = StoreRecord {
            id: "s-1".to_string(),
            remote: if linked {
                RemoteLink::Linked("st-seed".to_string())
            } else {
                RemoteLink::Unlinked
            },
            name: "Corner Market".to_string(),
            normalized_name: "corner market".to_string(),
            lat: Some(32.0851),
            lng: Some(34.7818),
            geo_cell: Some("32.085,34.782".to_string()),
            address: None,
            city: None,
            created_at: now_utc_rfc3339(),
        };
        db::insert_store(&fixture.lock(), &store).expect("store insert should succeed");
        fixture
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .expect("connection lock should not be poisoned")
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.engine.stop_all();
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", self.db_path, suffix));
        }
    }
}

fn local_aisle(id: &str, name: &str, remote: RemoteLink) -> AisleRecord {
    let now = now_utc_rfc3339();
    AisleRecord {
        id: id.to_string(),
        store_id: "s-1".to_string(),
        remote,
        name: name.to_string(),
        keywords: Vec::new(),
        created_at: now.clone(),
        updated_at: now,
    }
}

fn remote_aisle(id: &str, name: &str) -> RemoteAisle {
    RemoteAisle {
        id: id.to_string(),
        doc: AisleDoc {
            name_or_number: name.to_string(),
            keywords: vec!["milk".to_string()],
            created_at: "2026-08-01T09:00:00Z".to_string(),
            updated_at: "2026-08-01T09:30:00Z".to_string(),
            created_by_user_id: "other-user".to_string(),
            updated_by_user_id: "other-user".to_string(),
            store_remote_id: "st-seed".to_string(),
        },
    }
}

fn remote_product(id_name: &str, aisle_remote_id: Option<&str>) -> RemoteProduct {
    RemoteProduct {
        id: content_hash(id_name),
        doc: ProductDoc {
            name: id_name.to_string(),
            normalized_name: id_name.to_string(),
            barcode: None,
            aisle_remote_id: aisle_remote_id.map(str::to_string),
            store_remote_id: "st-seed".to_string(),
            updated_at: "2026-08-01T09:30:00Z".to_string(),
            updated_by_user_id: "other-user".to_string(),
        },
    }
}

fn wait_until(deadline: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    predicate()
}

#[test]
fn offline_created_duplicate_adopts_the_incoming_remote_id() {
    let fixture = Fixture::with_store("adopt", Some("user-1"), true);
    db::insert_aisle(
        &fixture.lock(),
        &local_aisle("a-1", "  DAIRY ", RemoteLink::Unlinked),
    )
    .expect("aisle insert should succeed");

    let snapshot = vec![remote_aisle("ai-7", "Dairy")];
    let summary = reconcile_aisles(&mut fixture.lock(), "s-1", &snapshot)
        .expect("reconciliation should succeed");

    assert_eq!(summary.adopted, 1);
    assert_eq!(summary.inserted, 0);
    let aisles = db::list_aisles(&fixture.lock(), "s-1").expect("aisle list should succeed");
    assert_eq!(aisles.len(), 1);
    assert_eq!(aisles[0].id, "a-1");
    assert_eq!(aisles[0].remote, RemoteLink::Linked("ai-7".to_string()));
    // Remote fields win on adoption.
    assert_eq!(aisles[0].name, "Dairy");
    assert_eq!(aisles[0].keywords, vec!["milk".to_string()]);
}

#[test]
fn reconciliation_is_idempotent_across_repeated_snapshots() {
    let fixture = Fixture::with_store("idem", Some("user-1"), true);
    db::insert_aisle(
        &fixture.lock(),
        &local_aisle("a-1", "Dairy", RemoteLink::Unlinked),
    )
    .expect("aisle insert should succeed");

    let snapshot = vec![remote_aisle("ai-7", "Dairy")];
    reconcile_aisles(&mut fixture.lock(), "s-1", &snapshot)
        .expect("first reconciliation should succeed");
    let second = reconcile_aisles(&mut fixture.lock(), "s-1", &snapshot)
        .expect("second reconciliation should succeed");

    assert_eq!(second.updated, 1);
    assert_eq!(second.adopted, 0);
    assert_eq!(second.inserted, 0);
    assert_eq!(
        db::list_aisles(&fixture.lock(), "s-1")
            .expect("aisle list should succeed")
            .len(),
        1
    );
}

#[test]
fn linked_records_absent_from_the_snapshot_are_deleted_locally() {
    let fixture = Fixture::with_store("absence", Some("user-1"), true);
    db::insert_aisle(
        &fixture.lock(),
        &local_aisle("a-1", "Dairy", RemoteLink::Linked("ai-1".to_string())),
    )
    .expect("aisle insert should succeed");
    db::insert_aisle(
        &fixture.lock(),
        &local_aisle("a-2", "Bakery", RemoteLink::Linked("ai-2".to_string())),
    )
    .expect("aisle insert should succeed");
    // Unlinked records are never deleted by absence.
    db::insert_aisle(
        &fixture.lock(),
        &local_aisle("a-3", "Frozen", RemoteLink::Unlinked),
    )
    .expect("aisle insert should succeed");

    let snapshot = vec![remote_aisle("ai-1", "Dairy")];
    let summary = reconcile_aisles(&mut fixture.lock(), "s-1", &snapshot)
        .expect("reconciliation should succeed");

    assert_eq!(summary.deleted, 1);
    let aisles = db::list_aisles(&fixture.lock(), "s-1").expect("aisle list should succeed");
    let ids: Vec<&str> = aisles.iter().map(|aisle| aisle.id.as_str()).collect();
    assert_eq!(ids, vec!["a-1", "a-3"]);
}

#[test]
fn unmatched_remote_records_are_inserted_prelinked() {
    let fixture = Fixture::with_store("insert", Some("user-1"), true);

    let snapshot = vec![remote_aisle("ai-1", "Dairy"), remote_aisle("ai-2", "Bakery")];
    let summary = reconcile_aisles(&mut fixture.lock(), "s-1", &snapshot)
        .expect("reconciliation should succeed");

    assert_eq!(summary.inserted, 2);
    let aisles = db::list_aisles(&fixture.lock(), "s-1").expect("aisle list should succeed");
    assert_eq!(aisles.len(), 2);
    assert!(aisles.iter().all(|aisle| aisle.remote.is_linked()));
}

#[test]
fn remote_fields_overwrite_linked_records_wholesale() {
    let fixture = Fixture::with_store("overwrite", Some("user-1"), true);
    let mut stale = local_aisle("a-1", "Diary", RemoteLink::Linked("ai-1".to_string()));
    stale.keywords = vec!["typo".to_string()];
    db::insert_aisle(&fixture.lock(), &stale).expect("aisle insert should succeed");

    let snapshot = vec![remote_aisle("ai-1", "Dairy")];
    reconcile_aisles(&mut fixture.lock(), "s-1", &snapshot)
        .expect("reconciliation should succeed");

    let aisle = db::get_aisle(&fixture.lock(), "a-1")
        .expect("aisle fetch should succeed")
        .expect("aisle should exist");
    assert_eq!(aisle.name, "Dairy");
    assert_eq!(aisle.keywords, vec!["milk".to_string()]);
    assert_eq!(aisle.updated_at, "2026-08-01T09:30:00Z");
}

#[test]
fn duplicate_name_merge_claims_the_first_unlinked_match_only() {
    let fixture = Fixture::with_store("tiebreak", Some("user-1"), true);
    db::insert_aisle(
        &fixture.lock(),
        &local_aisle("a-1", "Dairy", RemoteLink::Unlinked),
    )
    .expect("aisle insert should succeed");
    db::insert_aisle(
        &fixture.lock(),
        &local_aisle("a-2", "dairy", RemoteLink::Unlinked),
    )
    .expect("aisle insert should succeed");

    let snapshot = vec![remote_aisle("ai-1", "Dairy")];
    let summary = reconcile_aisles(&mut fixture.lock(), "s-1", &snapshot)
        .expect("reconciliation should succeed");

    assert_eq!(summary.adopted, 1);
    let first = db::get_aisle(&fixture.lock(), "a-1")
        .expect("aisle fetch should succeed")
        .expect("first aisle should exist");
    let second = db::get_aisle(&fixture.lock(), "a-2")
        .expect("aisle fetch should succeed")
        .expect("second aisle should exist");
    assert_eq!(first.remote, RemoteLink::Linked("ai-1".to_string()));
    assert_eq!(second.remote, RemoteLink::Unlinked);
}

#[test]
fn two_incoming_duplicates_adopt_two_distinct_unlinked_records() {
    let fixture = Fixture::with_store("claims", Some("user-1"), true);
    db::insert_aisle(
        &fixture.lock(),
        &local_aisle("a-1", "Dairy", RemoteLink::Unlinked),
    )
    .expect("aisle insert should succeed");
    db::insert_aisle(
        &fixture.lock(),
        &local_aisle("a-2", "dairy", RemoteLink::Unlinked),
    )
    .expect("aisle insert should succeed");

    let snapshot = vec![remote_aisle("ai-1", "Dairy"), remote_aisle("ai-2", "DAIRY")];
    let summary = reconcile_aisles(&mut fixture.lock(), "s-1", &snapshot)
        .expect("reconciliation should succeed");

    assert_eq!(summary.adopted, 2);
    assert_eq!(summary.inserted, 0);
    let aisles = db::list_aisles(&fixture.lock(), "s-1").expect("aisle list should succeed");
    assert!(aisles.iter().all(|aisle| aisle.remote.is_linked()));
}

#[test]
fn product_reconciliation_mirrors_the_aisle_rules() {
    let fixture = Fixture::with_store("products", Some("user-1"), true);
    db::insert_aisle(
        &fixture.lock(),
        &local_aisle("a-1", "Dairy", RemoteLink::Linked("ai-1".to_string())),
    )
    .expect("aisle insert should succeed");

    let now = now_utc_rfc3339();
    db::insert_product(
        &fixture.lock(),
        &ProductRecord {
            id: "p-1".to_string(),
            store_id: "s-1".to_string(),
            aisle_id: None,
            remote: RemoteLink::Unlinked,
            remote_aisle_id: None,
            name: "Milk".to_string(),
            normalized_name: "milk".to_string(),
            barcode: None,
            created_at: now.clone(),
            updated_at: now.clone(),
        },
    )
    .expect("product insert should succeed");
    db::insert_product(
        &fixture.lock(),
        &ProductRecord {
            id: "p-2".to_string(),
            store_id: "s-1".to_string(),
            aisle_id: None,
            remote: RemoteLink::Linked(content_hash("bread")),
            remote_aisle_id: None,
            name: "Bread".to_string(),
            normalized_name: "bread".to_string(),
            barcode: None,
            created_at: now.clone(),
            updated_at: now,
        },
    )
    .expect("product insert should succeed");

    // "milk" merges into p-1 and resolves its aisle link locally; "bread" is
    // absent and goes away; "eggs" is new from elsewhere.
    let snapshot = vec![
        remote_product("milk", Some("ai-1")),
        remote_product("eggs", None),
    ];
    let summary = reconcile_products(&mut fixture.lock(), "s-1", &snapshot)
        .expect("reconciliation should succeed");

    assert_eq!(summary.adopted, 1);
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.deleted, 1);

    let products = db::list_products(&fixture.lock(), "s-1").expect("product list should succeed");
    assert_eq!(products.len(), 2);
    let milk = products
        .iter()
        .find(|product| product.normalized_name == "milk")
        .expect("milk should survive");
    assert_eq!(milk.id, "p-1");
    assert_eq!(milk.remote, RemoteLink::Linked(content_hash("milk")));
    assert_eq!(milk.aisle_id, Some("a-1".to_string()));
    assert_eq!(milk.remote_aisle_id, Some("ai-1".to_string()));
    assert!(!products
        .iter()
        .any(|product| product.normalized_name == "bread"));
}

#[test]
fn pushing_an_aisle_for_an_unsynced_store_fails_without_network_calls() {
    let fixture = Fixture::with_store("notsynced", Some("user-1"), false);
    db::insert_aisle(
        &fixture.lock(),
        &local_aisle("a-1", "Dairy", RemoteLink::Unlinked),
    )
    .expect("aisle insert should succeed");

    let err = fixture
        .engine
        .push_aisle("a-1")
        .expect_err("push should fail");
    assert!(matches!(err, SyncError::NotSynced { .. }));
    assert_eq!(fixture.remote.write_call_count(), 0);
}

#[test]
fn pushes_without_an_actor_identity_fail_before_any_network_call() {
    let fixture = Fixture::with_store("unauth", None, true);
    db::insert_aisle(
        &fixture.lock(),
        &local_aisle("a-1", "Dairy", RemoteLink::Unlinked),
    )
    .expect("aisle insert should succeed");

    let err = fixture
        .engine
        .push_aisle("a-1")
        .expect_err("push should fail");
    assert!(matches!(err, SyncError::Unauthenticated));
    let err = fixture
        .engine
        .push_store("s-1")
        .expect_err("store push should fail");
    assert!(matches!(err, SyncError::Unauthenticated));
    assert_eq!(fixture.remote.write_call_count(), 0);
}

#[test]
fn aisle_creation_writes_the_server_id_back_synchronously() {
    let fixture = Fixture::with_store("writeback", Some("user-1"), true);
    db::insert_aisle(
        &fixture.lock(),
        &local_aisle("a-1", "Dairy", RemoteLink::Unlinked),
    )
    .expect("aisle insert should succeed");

    let remote_id = fixture.engine.push_aisle("a-1").expect("push should succeed");
    let aisle = db::get_aisle(&fixture.lock(), "a-1")
        .expect("aisle fetch should succeed")
        .expect("aisle should exist");
    assert_eq!(aisle.remote, RemoteLink::Linked(remote_id));
}

#[test]
fn product_pushes_are_idempotent_on_the_content_derived_id() {
    let fixture = Fixture::with_store("product-push", Some("user-1"), true);
    let now = now_utc_rfc3339();
    db::insert_product(
        &fixture.lock(),
        &ProductRecord {
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

    let first = fixture
        .engine
        .push_product("p-1")
        .expect("first push should succeed");
    let second = fixture
        .engine
        .push_product("p-1")
        .expect("second push should succeed");
    assert_eq!(first, second);
    assert_eq!(first, content_hash("milk"));

    let remote_products = fixture
        .remote
        .fetch_products("st-seed")
        .expect("remote fetch should succeed");
    assert_eq!(remote_products.len(), 1);
}

#[test]
fn store_push_adopts_an_existing_remote_store_in_the_same_cell() {
    let fixture = Fixture::with_store("store-adopt", Some("user-1"), false);
    let existing = fixture
        .remote
        .create_store(
            "other-user",
            &crate::remote::StoreDoc {
                name: "CORNER MARKET".to_string(),
                normalized_name: "corner market".to_string(),
                address: None,
                geo: None,
                geo_cell: Some("32.085,34.782".to_string()),
                created_at: "2026-08-01T08:00:00Z".to_string(),
                updated_at: "2026-08-01T08:00:00Z".to_string(),
            },
        )
        .expect("remote store create should succeed");

    let adopted = fixture
        .engine
        .push_store("s-1")
        .expect("store push should succeed");
    assert_eq!(adopted, existing);

    let store = db::get_store(&fixture.lock(), "s-1")
        .expect("store fetch should succeed")
        .expect("store should exist");
    assert_eq!(store.remote, RemoteLink::Linked(existing));
}

#[test]
fn push_store_contents_links_everything_unlinked() {
    let fixture = Fixture::with_store("contents", Some("user-1"), true);
    db::insert_aisle(
        &fixture.lock(),
        &local_aisle("a-1", "Dairy", RemoteLink::Unlinked),
    )
    .expect("aisle insert should succeed");
    let now = now_utc_rfc3339();
    db::insert_product(
        &fixture.lock(),
        &ProductRecord {
            id: "p-1".to_string(),
            store_id: "s-1".to_string(),
            aisle_id: Some("a-1".to_string()),
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

    let summary = fixture
        .engine
        .push_store_contents("s-1")
        .expect("push should succeed");
    assert_eq!(summary.aisles_pushed, 1);
    assert_eq!(summary.products_pushed, 1);

    let product = db::get_product(&fixture.lock(), "p-1")
        .expect("product fetch should succeed")
        .expect("product should exist");
    assert!(product.remote.is_linked());
    // The product's remote aisle link mirrors the freshly-linked aisle.
    assert!(product.remote_aisle_id.is_some());
}

#[test]
fn live_watch_applies_remote_changes_until_stopped() {
    let fixture = Fixture::with_store("watch", Some("user-1"), true);
    fixture
        .engine
        .start_watch("s-1")
        .expect("watch should start");

    assert!(wait_until(Duration::from_secs(2), || {
        fixture.engine.watch_state("s-1")
            == (SubscriptionState::Active, SubscriptionState::Active)
    }));

    fixture
        .remote
        .create_aisle("other-user", &remote_aisle("ignored", "Dairy").doc)
        .expect("remote aisle create should succeed");

    assert!(wait_until(Duration::from_secs(2), || {
        db::list_aisles(&fixture.lock(), "s-1")
            .expect("aisle list should succeed")
            .len()
            == 1
    }));

    fixture.engine.stop_watch("s-1");
    assert_eq!(
        fixture.engine.watch_state("s-1"),
        (SubscriptionState::Detached, SubscriptionState::Detached)
    );

    // Changes after teardown no longer reconcile.
    fixture
        .remote
        .create_aisle("other-user", &remote_aisle("ignored", "Bakery").doc)
        .expect("remote aisle create should succeed");
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(
        db::list_aisles(&fixture.lock(), "s-1")
            .expect("aisle list should succeed")
            .len(),
        1
    );
}

#[test]
fn restarting_a_watch_replaces_the_prior_subscription() {
    let fixture = Fixture::with_store("rewatch", Some("user-1"), true);
    fixture
        .engine
        .start_watch("s-1")
        .expect("first watch should start");
    fixture
        .engine
        .start_watch("s-1")
        .expect("second watch should start");

    assert!(wait_until(Duration::from_secs(2), || {
        fixture.engine.watch_state("s-1")
            == (SubscriptionState::Active, SubscriptionState::Active)
    }));

    // A snapshot is applied exactly once: two live subscriptions would race
    // and could double-insert before either links the record.
    fixture
        .remote
        .create_aisle("other-user", &remote_aisle("ignored", "Dairy").doc)
        .expect("remote aisle create should succeed");
    assert!(wait_until(Duration::from_secs(2), || {
        !db::list_aisles(&fixture.lock(), "s-1")
            .expect("aisle list should succeed")
            .is_empty()
    }));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(
        db::list_aisles(&fixture.lock(), "s-1")
            .expect("aisle list should succeed")
            .len(),
        1
    );
}

#[test]
fn two_offline_clients_converge_on_one_shared_aisle_record() {
    // Both clients know the same store and each adds a "Dairy" aisle while
    // offline, with different casing and whitespace.
    let remote = Arc::new(MemoryDirectory::new());
    let mut clients = Vec::new();
    for (tag, name) in [("client-a", "Dairy"), ("client-b", "  dairy ")] {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX_EPOCH")
            .as_nanos();
        let db_path = std::env::temp_dir()
            .join(format!("aislemap-converge-{tag}-{nanos}.sqlite"))
            .display()
            .to_string();
        let conn = Arc::new(Mutex::new(
            db::open_connection(&db_path).expect("connection should open"),
        ));
        let engine = SyncEngine::new(
            Arc::clone(&conn),
            Arc::clone(&remote) as Arc<dyn RemoteDirectory>,
            Arc::new(StaticIdentity::new(Some(tag.to_string()))),
        );
        db::insert_store(
            &conn.lock().expect("connection lock should not be poisoned"),
            &StoreRecord {
                id: "s-1".to_string(),
                remote: RemoteLink::Linked("st-shared".to_string()),
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
        db::insert_aisle(
            &conn.lock().expect("connection lock should not be poisoned"),
            &local_aisle(&format!("a-{tag}"), name, RemoteLink::Unlinked),
        )
        .expect("aisle insert should succeed");
        clients.push((conn, engine, db_path));
    }

    // Each client comes online in turn: reconcile the current full
    // snapshot, then push whatever is still unlinked. The second client's
    // reconciliation adopts the first client's document, so its push has
    // nothing left to create. A final pass updates the first client.
    for (conn, engine, _) in clients.iter().chain(clients.iter()) {
        let snapshot = remote
            .fetch_aisles("st-shared")
            .expect("remote fetch should succeed");
        reconcile_aisles(
            &mut conn.lock().expect("connection lock should not be poisoned"),
            "s-1",
            &snapshot,
        )
        .expect("reconciliation should succeed");
        engine
            .push_store_contents("s-1")
            .expect("push should succeed");
    }

    // Exactly one remote document, and both clients hold exactly one linked
    // record carrying the same remote id.
    let remote_aisles = remote
        .fetch_aisles("st-shared")
        .expect("remote fetch should succeed");
    assert_eq!(remote_aisles.len(), 1);
    let shared_id = remote_aisles[0].id.clone();

    let mut seen_ids = Vec::new();
    for (conn, _, _) in &clients {
        let aisles = db::list_aisles(
            &conn.lock().expect("connection lock should not be poisoned"),
            "s-1",
        )
        .expect("aisle list should succeed");
        assert_eq!(aisles.len(), 1);
        assert_eq!(aisles[0].remote, RemoteLink::Linked(shared_id.clone()));
        seen_ids.push(aisles[0].remote.clone());
    }
    assert_eq!(seen_ids[0], seen_ids[1]);

    for (_, _, db_path) in &clients {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{db_path}{suffix}"));
        }
    }
}

#[test]
fn deleting_a_store_removes_remote_documents_first() {
    let fixture = Fixture::with_store("delete", Some("user-1"), true);
    db::insert_aisle(
        &fixture.lock(),
        &local_aisle("a-1", "Dairy", RemoteLink::Unlinked),
    )
    .expect("aisle insert should succeed");
    fixture.engine.push_aisle("a-1").expect("push should succeed");

    fixture
        .engine
        .delete_store("s-1")
        .expect("store delete should succeed");

    assert!(db::get_store(&fixture.lock(), "s-1")
        .expect("store fetch should succeed")
        .is_none());
    assert!(db::list_aisles(&fixture.lock(), "s-1")
        .expect("aisle list should succeed")
        .is_empty());
    assert!(fixture
        .remote
        .fetch_aisles("st-seed")
        .expect("remote fetch should succeed")
        .is_empty());
}
