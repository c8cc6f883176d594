//! Per-user token quota.
//!
//! A ledger cycle lasts 30 days from `last_updated_ms`. Inside a cycle
//! `used_tokens` only grows; the first charge attempted after the cycle has
//! expired renews the ledger instead of debiting it.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::identity::Session;
use crate::observability::{LedgerCounters, LedgerCountersSnapshot};
use crate::plan::Plan;
use crate::store::Store;
use crate::{GenieError, Result};

pub const LEDGER_CYCLE_MS: u64 = 30 * 24 * 60 * 60 * 1000;

/// Usage band, in percent of the allotment, that triggers the
/// "approaching limit" notice. Lower bound inclusive, upper exclusive.
pub const WARN_BAND_PERCENT: (f64, f64) = (70.0, 90.0);

/// Cost of sending one chat message to the agent.
pub const MESSAGE_TOKEN_COST: u64 = 9;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenLedger {
    pub total_tokens: u64,
    pub used_tokens: u64,
    pub last_updated_ms: u64,
    pub plan: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    InsufficientTokens,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ChargeOutcome {
    /// The cycle had expired; usage was reset and nothing was debited.
    Renewed,
    Rejected { reason: RejectReason },
    Accepted { warn: bool, percentage: f64 },
}

impl ChargeOutcome {
    /// Whether the billable action may go ahead.
    pub fn permits_action(&self) -> bool {
        !matches!(self, ChargeOutcome::Rejected { .. })
    }
}

/// Result of evaluating a charge against a ledger snapshot. `next` is the
/// state to persist, `None` when nothing changes.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub outcome: ChargeOutcome,
    pub next: Option<TokenLedger>,
}

impl TokenLedger {
    pub fn for_plan(plan: Plan, now_ms: u64) -> Self {
        Self {
            total_tokens: plan.tokens(),
            used_tokens: 0,
            last_updated_ms: now_ms,
            plan: plan.display_name().to_string(),
        }
    }

    pub fn renewal_deadline_ms(&self) -> u64 {
        self.last_updated_ms.saturating_add(LEDGER_CYCLE_MS)
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.renewal_deadline_ms()
    }

    /// Zero when external data put `used_tokens` above the allotment.
    pub fn remaining(&self) -> u64 {
        self.total_tokens.saturating_sub(self.used_tokens)
    }

    pub fn usage_percent(&self) -> f64 {
        percent_of(self.used_tokens, self.total_tokens)
    }

    /// Pure state transition for one charge of `cost` tokens at `now_ms`.
    pub fn evaluate_charge(&self, cost: u64, now_ms: u64) -> Transition {
        if self.is_expired(now_ms) {
            return Transition {
                outcome: ChargeOutcome::Renewed,
                next: Some(TokenLedger {
                    used_tokens: 0,
                    last_updated_ms: now_ms,
                    ..self.clone()
                }),
            };
        }

        if self.remaining() < cost {
            return Transition {
                outcome: ChargeOutcome::Rejected {
                    reason: RejectReason::InsufficientTokens,
                },
                next: None,
            };
        }

        let used_tokens = self.used_tokens.saturating_add(cost);
        let percentage = percent_of(used_tokens, self.total_tokens);
        let (warn_from, warn_below) = WARN_BAND_PERCENT;
        Transition {
            outcome: ChargeOutcome::Accepted {
                warn: percentage >= warn_from && percentage < warn_below,
                percentage,
            },
            next: Some(TokenLedger {
                used_tokens,
                ..self.clone()
            }),
        }
    }
}

fn percent_of(used: u64, total: u64) -> f64 {
    if total == 0 {
        return if used == 0 { 0.0 } else { 100.0 };
    }
    used as f64 * 100.0 / total as f64
}

/// Outcome of a persisted charge together with the ledger as stored after it.
#[derive(Clone, Debug, PartialEq)]
pub struct Charge {
    pub outcome: ChargeOutcome,
    pub ledger: TokenLedger,
}

pub struct LedgerService {
    store: Arc<dyn Store>,
    counters: Mutex<LedgerCounters>,
}

impl std::fmt::Debug for LedgerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerService")
            .field("counters", &self.counters())
            .finish()
    }
}

impl LedgerService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            counters: Mutex::new(LedgerCounters::default()),
        }
    }

    pub fn counters(&self) -> LedgerCountersSnapshot {
        self.with_counters(|counters| counters.snapshot())
    }

    fn with_counters<R>(&self, f: impl FnOnce(&mut LedgerCounters) -> R) -> R {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut counters)
    }

    pub async fn ledger(&self, session: &Session) -> Result<Option<TokenLedger>> {
        Ok(self.store.load_ledger(&session.user_id).await?)
    }

    /// Creates the ledger for `plan` unless one already exists; returns the
    /// stored ledger either way. Used by the provisioning side, never by
    /// [`LedgerService::charge`].
    pub async fn provision(&self, user_id: &str, plan: Plan, now_ms: u64) -> Result<TokenLedger> {
        if let Some(existing) = self.store.load_ledger(user_id).await? {
            return Ok(existing);
        }
        let ledger = TokenLedger::for_plan(plan, now_ms);
        self.store.put_ledger(user_id, &ledger).await?;
        Ok(ledger)
    }

    /// Debits `cost` tokens, or renews an expired cycle. Performs at most one
    /// ledger write, guarded by compare-and-swap; losing the race is reported
    /// as [`GenieError::LedgerConflict`] and nothing is retried.
    pub async fn charge(&self, session: &Session, cost: u64, now_ms: u64) -> Result<Charge> {
        if cost == 0 {
            return Err(GenieError::InvalidInput(
                "charge cost must be positive".to_string(),
            ));
        }
        let user_id = session.user_id.as_str();

        let current = match self.store.load_ledger(user_id).await {
            Ok(Some(ledger)) => ledger,
            Ok(None) => {
                return Err(GenieError::LedgerNotProvisioned {
                    user_id: user_id.to_string(),
                });
            }
            Err(err) => {
                tracing::error!(user_id, error = %err, "token ledger read failed");
                self.with_counters(|c| c.record_persistence_failure());
                return Err(err.into());
            }
        };

        let Transition { outcome, next } = current.evaluate_charge(cost, now_ms);
        let Some(next) = next else {
            tracing::info!(
                user_id,
                cost,
                used_tokens = current.used_tokens,
                total_tokens = current.total_tokens,
                "token charge rejected"
            );
            self.with_counters(|c| c.record_rejected());
            return Ok(Charge {
                outcome,
                ledger: current,
            });
        };

        match self.store.swap_ledger(user_id, &current, &next).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(user_id, cost, "token ledger changed during charge");
                self.with_counters(|c| c.record_conflict());
                return Err(GenieError::LedgerConflict {
                    user_id: user_id.to_string(),
                });
            }
            Err(err) => {
                tracing::error!(user_id, cost, error = %err, "token ledger write failed");
                self.with_counters(|c| c.record_persistence_failure());
                return Err(err.into());
            }
        }

        match outcome {
            ChargeOutcome::Renewed => {
                tracing::info!(user_id, "token ledger cycle renewed");
                self.with_counters(|c| c.record_renewed());
            }
            ChargeOutcome::Accepted { warn, percentage } => {
                tracing::debug!(
                    user_id,
                    cost,
                    used_tokens = next.used_tokens,
                    percentage,
                    warn,
                    "token charge accepted"
                );
                self.with_counters(|c| c.record_accepted(warn));
            }
            ChargeOutcome::Rejected { .. } => {}
        }

        Ok(Charge {
            outcome,
            ledger: next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        ChallengeRecord, DeletedUserRecord, FraudRecord, MemoryStore, MessageRecord,
        PlanHireRecord, StartupListRecord, StoreError, UserRecord,
    };

    const DAY_MS: u64 = 24 * 60 * 60 * 1000;

    fn ledger(total: u64, used: u64) -> TokenLedger {
        TokenLedger {
            total_tokens: total,
            used_tokens: used,
            last_updated_ms: 10 * DAY_MS,
            plan: "Jedi".to_string(),
        }
    }

    fn session() -> Session {
        Session::new("u1", Some("ana@example.com".to_string()))
    }

    #[test]
    fn affordable_charges_add_exactly_the_cost() {
        let now = 12 * DAY_MS;
        for (total, used) in [(100, 0), (100, 91), (1_000, 600), (1_000, 999), (5, 5)] {
            let base = ledger(total, used);
            for cost in 1..=base.remaining() {
                let transition = base.evaluate_charge(cost, now);
                let next = transition.next.expect("debit persisted");
                assert_eq!(next.used_tokens, used + cost);
                assert_eq!(next.last_updated_ms, base.last_updated_ms);
                assert!(next.used_tokens <= next.total_tokens);
                assert!(matches!(
                    transition.outcome,
                    ChargeOutcome::Accepted { .. }
                ));
            }
        }
    }

    #[test]
    fn unaffordable_charges_leave_ledger_untouched() {
        let now = 12 * DAY_MS;
        for (total, used) in [(100, 92), (1_000, 995), (0, 0), (100, 150)] {
            let base = ledger(total, used);
            for cost in (base.remaining() + 1)..=(base.remaining() + 20) {
                let transition = base.evaluate_charge(cost, now);
                assert_eq!(transition.next, None);
                assert_eq!(
                    transition.outcome,
                    ChargeOutcome::Rejected {
                        reason: RejectReason::InsufficientTokens
                    }
                );
            }
        }
    }

    #[test]
    fn expired_cycle_renews_regardless_of_usage() {
        for used in [0, 50, 100, 250] {
            let base = ledger(100, used);
            let now = base.renewal_deadline_ms() + 1;
            let transition = base.evaluate_charge(9, now);
            assert_eq!(transition.outcome, ChargeOutcome::Renewed);
            let next = transition.next.expect("renewal persisted");
            assert_eq!(next.used_tokens, 0);
            assert_eq!(next.last_updated_ms, now);
            assert_eq!(next.total_tokens, 100);
        }
    }

    #[test]
    fn deadline_instant_itself_is_still_inside_the_cycle() {
        let base = ledger(100, 0);
        let transition = base.evaluate_charge(9, base.renewal_deadline_ms());
        assert!(matches!(
            transition.outcome,
            ChargeOutcome::Accepted { .. }
        ));
    }

    #[test]
    fn renewal_is_idempotent_for_the_same_instant() {
        let base = ledger(100, 80);
        let now = base.renewal_deadline_ms() + DAY_MS;
        let first = base.evaluate_charge(9, now);
        let second = base.evaluate_charge(9, now);
        assert_eq!(first, second);
    }

    #[test]
    fn warning_fires_only_inside_band() {
        let now = 11 * DAY_MS;
        let cases = [
            (600, 100, true, 70.0),
            (600, 250, true, 85.0),
            (850, 100, false, 95.0),
            (500, 100, false, 60.0),
            (800, 99, true, 89.9),
            (800, 100, false, 90.0),
        ];
        for (used, cost, expect_warn, expect_pct) in cases {
            let transition = ledger(1_000, used).evaluate_charge(cost, now);
            match transition.outcome {
                ChargeOutcome::Accepted { warn, percentage } => {
                    assert_eq!(warn, expect_warn, "used={used} cost={cost}");
                    assert!((percentage - expect_pct).abs() < 1e-9);
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn charge_persists_debit_and_counts_it() {
        let store = Arc::new(MemoryStore::new());
        store.put_ledger("u1", &ledger(1_000, 600)).await.expect("seed");
        let service = LedgerService::new(store.clone());

        let charge = service
            .charge(&session(), 100, 11 * DAY_MS)
            .await
            .expect("charge");
        assert_eq!(
            charge.outcome,
            ChargeOutcome::Accepted {
                warn: true,
                percentage: 70.0
            }
        );
        let stored = store.load_ledger("u1").await.expect("load").expect("ledger");
        assert_eq!(stored.used_tokens, 700);
        assert_eq!(charge.ledger, stored);

        let counters = service.counters();
        assert_eq!(counters.accepted, 1);
        assert_eq!(counters.warned, 1);
    }

    #[tokio::test]
    async fn charge_fails_closed_when_debit_cannot_be_persisted() {
        let store = Arc::new(MemoryStore::new());
        store.put_ledger("u1", &ledger(100, 0)).await.expect("seed");
        store.set_fail_writes(true);
        let service = LedgerService::new(store.clone());

        let err = service.charge(&session(), 9, 11 * DAY_MS).await;
        assert!(matches!(err, Err(GenieError::Persistence(_))));
        assert_eq!(service.counters().persistence_failures, 1);

        store.set_fail_writes(false);
        let stored = store.load_ledger("u1").await.expect("load").expect("ledger");
        assert_eq!(stored.used_tokens, 0);
    }

    #[tokio::test]
    async fn charge_requires_positive_cost_and_provisioned_ledger() {
        let store = Arc::new(MemoryStore::new());
        let service = LedgerService::new(store);

        let err = service.charge(&session(), 0, 0).await;
        assert!(matches!(err, Err(GenieError::InvalidInput(_))));

        let err = service.charge(&session(), 9, 0).await;
        assert!(matches!(err, Err(GenieError::LedgerNotProvisioned { .. })));
    }

    #[tokio::test]
    async fn provision_keeps_existing_ledger() {
        let store = Arc::new(MemoryStore::new());
        let service = LedgerService::new(store);

        let first = service.provision("u1", Plan::Padawan, 5).await.expect("provision");
        assert_eq!(first.total_tokens, 100);
        assert_eq!(first.plan, "Padawan");

        let second = service.provision("u1", Plan::Jedi, 9).await.expect("provision");
        assert_eq!(second, first);
    }

    /// Lets a competing debit land between the service's read and its swap.
    struct RacingStore {
        inner: MemoryStore,
        competing_cost: u64,
    }

    #[async_trait::async_trait]
    impl Store for RacingStore {
        fn changes(&self) -> tokio::sync::watch::Receiver<u64> {
            self.inner.changes()
        }

        async fn load_user(&self, uid: &str) -> std::result::Result<Option<UserRecord>, StoreError> {
            self.inner.load_user(uid).await
        }

        async fn put_user(&self, user: &UserRecord) -> std::result::Result<(), StoreError> {
            self.inner.put_user(user).await
        }

        async fn load_ledger(&self, uid: &str) -> std::result::Result<Option<TokenLedger>, StoreError> {
            let seen = self.inner.load_ledger(uid).await?;
            if let Some(ledger) = &seen {
                let mut raced = ledger.clone();
                raced.used_tokens += self.competing_cost;
                self.inner.put_ledger(uid, &raced).await?;
            }
            Ok(seen)
        }

        async fn put_ledger(&self, uid: &str, ledger: &TokenLedger) -> std::result::Result<(), StoreError> {
            self.inner.put_ledger(uid, ledger).await
        }

        async fn swap_ledger(
            &self,
            uid: &str,
            expected: &TokenLedger,
            next: &TokenLedger,
        ) -> std::result::Result<bool, StoreError> {
            self.inner.swap_ledger(uid, expected, next).await
        }

        async fn load_plan_hire(&self, uid: &str) -> std::result::Result<Option<PlanHireRecord>, StoreError> {
            self.inner.load_plan_hire(uid).await
        }

        async fn put_plan_hire(&self, record: &PlanHireRecord) -> std::result::Result<(), StoreError> {
            self.inner.put_plan_hire(record).await
        }

        async fn load_fraud_record(&self, uid: &str) -> std::result::Result<Option<FraudRecord>, StoreError> {
            self.inner.load_fraud_record(uid).await
        }

        async fn put_fraud_record(&self, record: &FraudRecord) -> std::result::Result<(), StoreError> {
            self.inner.put_fraud_record(record).await
        }

        async fn load_deleted_user(
            &self,
            uid: &str,
        ) -> std::result::Result<Option<DeletedUserRecord>, StoreError> {
            self.inner.load_deleted_user(uid).await
        }

        async fn put_deleted_user(&self, record: &DeletedUserRecord) -> std::result::Result<(), StoreError> {
            self.inner.put_deleted_user(record).await
        }

        async fn load_challenge(&self, id: &str) -> std::result::Result<Option<ChallengeRecord>, StoreError> {
            self.inner.load_challenge(id).await
        }

        async fn put_challenge(&self, challenge: &ChallengeRecord) -> std::result::Result<(), StoreError> {
            self.inner.put_challenge(challenge).await
        }

        async fn list_challenges(&self, user_id: &str) -> std::result::Result<Vec<ChallengeRecord>, StoreError> {
            self.inner.list_challenges(user_id).await
        }

        async fn put_message(&self, message: &MessageRecord) -> std::result::Result<(), StoreError> {
            self.inner.put_message(message).await
        }

        async fn list_messages(&self, challenge_id: &str) -> std::result::Result<Vec<MessageRecord>, StoreError> {
            self.inner.list_messages(challenge_id).await
        }

        async fn put_startup_list(&self, list: &StartupListRecord) -> std::result::Result<(), StoreError> {
            self.inner.put_startup_list(list).await
        }

        async fn list_startup_lists(
            &self,
            challenge_id: &str,
        ) -> std::result::Result<Vec<StartupListRecord>, StoreError> {
            self.inner.list_startup_lists(challenge_id).await
        }
    }

    #[tokio::test]
    async fn lost_swap_reports_conflict_and_keeps_competing_write() {
        let inner = MemoryStore::new();
        inner
            .put_ledger("u1", &TokenLedger::for_plan(Plan::Jedi, 10 * DAY_MS))
            .await
            .expect("seed");
        let store = Arc::new(RacingStore {
            inner,
            competing_cost: 9,
        });
        let service = LedgerService::new(store.clone());

        let err = service
            .charge(&session(), MESSAGE_TOKEN_COST, 11 * DAY_MS)
            .await
            .expect_err("swap lost");
        assert!(matches!(err, GenieError::LedgerConflict { ref user_id } if user_id == "u1"));

        let counters = service.counters();
        assert_eq!(counters.conflicts, 1);
        assert_eq!(counters.accepted, 0);

        let stored = store
            .inner
            .load_ledger("u1")
            .await
            .expect("load")
            .expect("ledger");
        assert_eq!(stored.used_tokens, 9);
        assert_eq!(stored.last_updated_ms, 10 * DAY_MS);
    }
}
