#![cfg(feature = "store-sqlite")]

use std::sync::Arc;

use genie_matchmaker::store::{PlanHireRecord, UserRecord};
use genie_matchmaker::{
    ChargeOutcome, GenieError, LEDGER_CYCLE_MS, LedgerService, MemoryIdentityProvider,
    PurchaseReconciler, Reconciliation, CheckoutConfig, Plan, Session, SqliteStore, Store,
    TokenLedger,
};

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

fn session() -> Session {
    Session::new("u1", Some("ana@example.com".to_string()))
}

fn temp_store() -> (tempfile::TempDir, Arc<SqliteStore>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(SqliteStore::new(dir.path().join("genie.sqlite")));
    (dir, store)
}

#[tokio::test]
async fn ledger_charges_and_renews_across_reopen() {
    let (dir, store) = temp_store();
    let service = LedgerService::new(store.clone());
    service
        .provision("u1", Plan::Jedi, 10 * DAY_MS)
        .await
        .expect("provision");

    let charge = service
        .charge(&session(), 700, 11 * DAY_MS)
        .await
        .expect("charge");
    assert_eq!(
        charge.outcome,
        ChargeOutcome::Accepted {
            warn: true,
            percentage: 70.0
        }
    );

    let reopened = SqliteStore::new(dir.path().join("genie.sqlite"));
    let stored = reopened.load_ledger("u1").await.expect("load").expect("ledger");
    assert_eq!(stored.used_tokens, 700);

    let renew_at = stored.last_updated_ms + LEDGER_CYCLE_MS + 1;
    let charge = service
        .charge(&session(), 9, renew_at)
        .await
        .expect("charge");
    assert_eq!(charge.outcome, ChargeOutcome::Renewed);
    let stored = reopened.load_ledger("u1").await.expect("load").expect("ledger");
    assert_eq!(stored.used_tokens, 0);
    assert_eq!(stored.last_updated_ms, renew_at);
}

#[tokio::test]
async fn stale_snapshot_cannot_double_spend() {
    let (_dir, store) = temp_store();
    let snapshot = TokenLedger::for_plan(Plan::Padawan, 0);
    store.put_ledger("u1", &snapshot).await.expect("seed");

    let first = snapshot.evaluate_charge(9, 1).next.expect("debit");
    let second = snapshot.evaluate_charge(9, 1).next.expect("debit");
    assert!(store.swap_ledger("u1", &snapshot, &first).await.expect("swap"));
    assert!(!store.swap_ledger("u1", &snapshot, &second).await.expect("swap"));

    let stored = store.load_ledger("u1").await.expect("load").expect("ledger");
    assert_eq!(stored.used_tokens, 9);
}

#[tokio::test]
async fn charge_without_ledger_is_reported() {
    let (_dir, store) = temp_store();
    let service = LedgerService::new(store);
    let err = service.charge(&session(), 9, 0).await.expect_err("missing");
    assert!(matches!(err, GenieError::LedgerNotProvisioned { .. }));
}

#[tokio::test]
async fn fraud_guard_persists_its_trail() {
    let (_dir, store) = temp_store();
    let identity = Arc::new(MemoryIdentityProvider::new());
    identity.add_user("u1", "ana@example.com", "pw", true);
    let reconciler = PurchaseReconciler::new(store.clone(), identity.clone(), CheckoutConfig::default());

    store
        .put_user(&UserRecord {
            name: Some("Ana".to_string()),
            ..UserRecord::new("u1")
        })
        .await
        .expect("seed");

    let first = reconciler
        .reconcile(&session(), "j8k2m9n4p5q7r3s6t1v8w2x", 100)
        .await
        .expect("first");
    assert_eq!(first, Reconciliation::FirstPurchase { plan: Plan::Jedi });
    assert_eq!(store.load_fraud_record("u1").await.expect("load"), None);

    let second = reconciler
        .reconcile(&session(), "w2x6y9z4a7b1c5d8e3f2g4h", 200)
        .await
        .expect("second");
    assert_eq!(
        second,
        Reconciliation::FlaggedAsFraud {
            previous_plan: Some("jedi".to_string()),
            incoming: Plan::MestreYoda,
        }
    );

    let fraud = store.load_fraud_record("u1").await.expect("load").expect("fraud");
    assert_eq!(fraud.plan_id, "mestre-yoda");
    assert_eq!(fraud.previous_plan.as_deref(), Some("jedi"));
    assert_eq!(fraud.detected_at_ms, 200);
    let snapshot = fraud.user_data.expect("profile snapshot");
    assert_eq!(snapshot["plan"], "Jedi");
    assert_eq!(snapshot["name"], "Ana");

    let hire: PlanHireRecord = store.load_plan_hire("u1").await.expect("load").expect("hire");
    assert!(!hire.hired);
    assert_eq!(hire.plan_id.as_deref(), Some("jedi"));
    assert!(!identity.has_account("u1"));
}
