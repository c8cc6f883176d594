use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, watch};

use super::{
    ChallengeRecord, DeletedUserRecord, FraudRecord, MessageRecord, PlanHireRecord,
    StartupListRecord, Store, StoreError, UserRecord,
};
use crate::ledger::TokenLedger;

/// Process-local store. Also the test double: writes and reads can be made
/// to fail on demand.
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    revision: watch::Sender<u64>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<String, UserRecord>,
    ledgers: HashMap<String, TokenLedger>,
    plan_hires: HashMap<String, PlanHireRecord>,
    fraud: HashMap<String, FraudRecord>,
    deleted_users: HashMap<String, DeletedUserRecord>,
    challenges: Vec<ChallengeRecord>,
    messages: Vec<MessageRecord>,
    startup_lists: Vec<StartupListRecord>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: RwLock::new(MemoryState::default()),
            revision,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_read(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store reads disabled".to_string()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store writes disabled".to_string()));
        }
        Ok(())
    }

    async fn write<R>(&self, apply: impl FnOnce(&mut MemoryState) -> R) -> Result<R, StoreError> {
        self.check_write()?;
        let out = {
            let mut state = self.state.write().await;
            apply(&mut *state)
        };
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
        Ok(out)
    }

    async fn read<R>(&self, view: impl FnOnce(&MemoryState) -> R) -> Result<R, StoreError> {
        self.check_read()?;
        let state = self.state.read().await;
        Ok(view(&*state))
    }
}

fn upsert_by<T: Clone>(items: &mut Vec<T>, item: &T, same: impl Fn(&T) -> bool) {
    match items.iter_mut().find(|existing| same(existing)) {
        Some(existing) => *existing = item.clone(),
        None => items.push(item.clone()),
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    async fn load_user(&self, uid: &str) -> Result<Option<UserRecord>, StoreError> {
        self.read(|state| state.users.get(uid).cloned()).await
    }

    async fn put_user(&self, user: &UserRecord) -> Result<(), StoreError> {
        self.write(|state| {
            state.users.insert(user.uid.clone(), user.clone());
        })
        .await
    }

    async fn load_ledger(&self, uid: &str) -> Result<Option<TokenLedger>, StoreError> {
        self.read(|state| state.ledgers.get(uid).cloned()).await
    }

    async fn put_ledger(&self, uid: &str, ledger: &TokenLedger) -> Result<(), StoreError> {
        self.write(|state| {
            state.ledgers.insert(uid.to_string(), ledger.clone());
        })
        .await
    }

    async fn swap_ledger(
        &self,
        uid: &str,
        expected: &TokenLedger,
        next: &TokenLedger,
    ) -> Result<bool, StoreError> {
        self.check_write()?;
        let swapped = {
            let mut state = self.state.write().await;
            match state.ledgers.get_mut(uid) {
                Some(current) if *current == *expected => {
                    *current = next.clone();
                    true
                }
                _ => false,
            }
        };
        if swapped {
            self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
        }
        Ok(swapped)
    }

    async fn load_plan_hire(&self, uid: &str) -> Result<Option<PlanHireRecord>, StoreError> {
        self.read(|state| state.plan_hires.get(uid).cloned()).await
    }

    async fn put_plan_hire(&self, record: &PlanHireRecord) -> Result<(), StoreError> {
        self.write(|state| {
            state.plan_hires.insert(record.uid.clone(), record.clone());
        })
        .await
    }

    async fn load_fraud_record(&self, uid: &str) -> Result<Option<FraudRecord>, StoreError> {
        self.read(|state| state.fraud.get(uid).cloned()).await
    }

    async fn put_fraud_record(&self, record: &FraudRecord) -> Result<(), StoreError> {
        self.write(|state| {
            state.fraud.insert(record.uid.clone(), record.clone());
        })
        .await
    }

    async fn load_deleted_user(
        &self,
        uid: &str,
    ) -> Result<Option<DeletedUserRecord>, StoreError> {
        self.read(|state| state.deleted_users.get(uid).cloned())
            .await
    }

    async fn put_deleted_user(&self, record: &DeletedUserRecord) -> Result<(), StoreError> {
        self.write(|state| {
            state.deleted_users.insert(record.uid.clone(), record.clone());
        })
        .await
    }

    async fn load_challenge(&self, id: &str) -> Result<Option<ChallengeRecord>, StoreError> {
        self.read(|state| state.challenges.iter().find(|c| c.id == id).cloned())
            .await
    }

    async fn put_challenge(&self, challenge: &ChallengeRecord) -> Result<(), StoreError> {
        self.write(|state| upsert_by(&mut state.challenges, challenge, |c| c.id == challenge.id))
            .await
    }

    async fn list_challenges(&self, user_id: &str) -> Result<Vec<ChallengeRecord>, StoreError> {
        self.read(|state| {
            let mut out: Vec<(usize, ChallengeRecord)> = state
                .challenges
                .iter()
                .enumerate()
                .filter(|(_, c)| c.user_id == user_id)
                .map(|(idx, c)| (idx, c.clone()))
                .collect();
            out.sort_by(|(ia, a), (ib, b)| {
                b.created_at_ms.cmp(&a.created_at_ms).then(ib.cmp(ia))
            });
            out.into_iter().map(|(_, c)| c).collect()
        })
        .await
    }

    async fn put_message(&self, message: &MessageRecord) -> Result<(), StoreError> {
        self.write(|state| upsert_by(&mut state.messages, message, |m| m.id == message.id))
            .await
    }

    async fn list_messages(&self, challenge_id: &str) -> Result<Vec<MessageRecord>, StoreError> {
        self.read(|state| {
            let mut out: Vec<MessageRecord> = state
                .messages
                .iter()
                .filter(|m| m.challenge_id == challenge_id)
                .cloned()
                .collect();
            out.sort_by_key(|m| m.timestamp_ms);
            out
        })
        .await
    }

    async fn put_startup_list(&self, list: &StartupListRecord) -> Result<(), StoreError> {
        self.write(|state| upsert_by(&mut state.startup_lists, list, |l| l.id == list.id))
            .await
    }

    async fn list_startup_lists(
        &self,
        challenge_id: &str,
    ) -> Result<Vec<StartupListRecord>, StoreError> {
        self.read(|state| {
            state
                .startup_lists
                .iter()
                .filter(|l| l.challenge_id == challenge_id)
                .cloned()
                .collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Role;

    fn ledger(used: u64) -> TokenLedger {
        TokenLedger {
            total_tokens: 100,
            used_tokens: used,
            last_updated_ms: 1_000,
            plan: "Padawan".to_string(),
        }
    }

    #[tokio::test]
    async fn swap_ledger_only_applies_against_expected_state() {
        let store = MemoryStore::new();
        store.put_ledger("u1", &ledger(10)).await.expect("put");

        let swapped = store
            .swap_ledger("u1", &ledger(10), &ledger(19))
            .await
            .expect("swap");
        assert!(swapped);

        let stale = store
            .swap_ledger("u1", &ledger(10), &ledger(19))
            .await
            .expect("swap");
        assert!(!stale);

        let missing = store
            .swap_ledger("u2", &ledger(0), &ledger(9))
            .await
            .expect("swap");
        assert!(!missing);

        let stored = store.load_ledger("u1").await.expect("load");
        assert_eq!(stored.map(|l| l.used_tokens), Some(19));
    }

    #[tokio::test]
    async fn challenges_list_newest_first_and_messages_oldest_first() {
        let store = MemoryStore::new();
        for (id, ts) in [("a", 10), ("b", 30), ("c", 20)] {
            store
                .put_challenge(&ChallengeRecord {
                    id: id.to_string(),
                    user_id: "u1".to_string(),
                    title: id.to_string(),
                    description: String::new(),
                    session_id: format!("s-{id}"),
                    created_at_ms: ts,
                })
                .await
                .expect("put challenge");
        }
        let ids: Vec<String> = store
            .list_challenges("u1")
            .await
            .expect("list")
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, ["b", "c", "a"]);

        for (id, ts) in [("m2", 20), ("m1", 10)] {
            store
                .put_message(&MessageRecord {
                    id: id.to_string(),
                    challenge_id: "a".to_string(),
                    user_id: "u1".to_string(),
                    role: Role::User,
                    content: id.to_string(),
                    timestamp_ms: ts,
                    hidden: false,
                })
                .await
                .expect("put message");
        }
        let ids: Vec<String> = store
            .list_messages("a")
            .await
            .expect("list")
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, ["m1", "m2"]);
    }

    #[tokio::test]
    async fn injected_failures_surface_as_unavailable() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        let err = store.put_ledger("u1", &ledger(0)).await;
        assert!(matches!(err, Err(StoreError::Unavailable(_))));

        store.set_fail_writes(false);
        store.set_fail_reads(true);
        let err = store.load_ledger("u1").await;
        assert!(matches!(err, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn writes_bump_revision() {
        let store = MemoryStore::new();
        let mut changes = store.changes();
        assert_eq!(*changes.borrow_and_update(), 0);

        store.put_user(&UserRecord::new("u1")).await.expect("put");
        assert!(changes.has_changed().expect("sender alive"));
        assert_eq!(*changes.borrow_and_update(), 1);
    }
}
