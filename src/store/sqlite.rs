use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{OptionalExtension, TransactionBehavior};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use super::{
    ChallengeRecord, DeletedUserRecord, FraudRecord, MessageRecord, PlanHireRecord,
    StartupListRecord, Store, StoreError, UserRecord,
};
use crate::ledger::TokenLedger;

const USERS: &str = "users";
const TOKEN_USAGE: &str = "token_usage";
const PLAN_HIRED: &str = "plan_hired";
const POTENTIAL_FRAUD: &str = "potential_fraud";
const DELETED_USERS: &str = "deleted_users";

#[derive(Clone, Debug)]
pub struct SqliteStore {
    path: PathBuf,
    revision: Arc<watch::Sender<u64>>,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            path: path.into(),
            revision: Arc::new(revision),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        self.run(|_| Ok(())).await
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<T, StoreError> {
            let mut conn = open_connection(path)?;
            init_schema(&conn)?;
            op(&mut conn)
        })
        .await?
    }

    async fn run_write<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let out = self.run(op).await?;
        self.bump_revision();
        Ok(out)
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }

    async fn load_doc<T>(&self, table: &'static str, key: &str) -> Result<Option<T>, StoreError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let key = key.to_string();
        self.run(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    &format!("SELECT value_json FROM {table} WHERE key=?1"),
                    rusqlite::params![key],
                    |row| row.get(0),
                )
                .optional()?;
            match raw {
                Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn put_doc<T: Serialize>(
        &self,
        table: &'static str,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let key = key.to_string();
        let value_json = serde_json::to_string(value)?;
        self.run_write(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {table} (key, value_json) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json"
                ),
                rusqlite::params![key, value_json],
            )?;
            Ok(())
        })
        .await
    }

    async fn put_indexed(
        &self,
        table: &'static str,
        id: &str,
        parent: &str,
        ts_ms: u64,
        value_json: String,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        let parent = parent.to_string();
        let ts_ms = u64_to_i64(ts_ms);
        self.run_write(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {table} (id, parent, ts_ms, value_json) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE SET
                        parent = excluded.parent,
                        ts_ms = excluded.ts_ms,
                        value_json = excluded.value_json"
                ),
                rusqlite::params![id, parent, ts_ms, value_json],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_indexed<T>(
        &self,
        table: &'static str,
        parent: &str,
        order: &'static str,
    ) -> Result<Vec<T>, StoreError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let parent = parent.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT value_json FROM {table} WHERE parent=?1 ORDER BY {order}"
            ))?;
            let rows = stmt.query_map(rusqlite::params![parent], |row| row.get::<_, String>(0))?;

            let mut out = Vec::new();
            for row in rows {
                let raw = row?;
                out.push(serde_json::from_str(&raw)?);
            }
            Ok(out)
        })
        .await
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    async fn load_user(&self, uid: &str) -> Result<Option<UserRecord>, StoreError> {
        self.load_doc(USERS, uid).await
    }

    async fn put_user(&self, user: &UserRecord) -> Result<(), StoreError> {
        self.put_doc(USERS, &user.uid, user).await
    }

    async fn load_ledger(&self, uid: &str) -> Result<Option<TokenLedger>, StoreError> {
        self.load_doc(TOKEN_USAGE, uid).await
    }

    async fn put_ledger(&self, uid: &str, ledger: &TokenLedger) -> Result<(), StoreError> {
        self.put_doc(TOKEN_USAGE, uid, ledger).await
    }

    async fn swap_ledger(
        &self,
        uid: &str,
        expected: &TokenLedger,
        next: &TokenLedger,
    ) -> Result<bool, StoreError> {
        let uid = uid.to_string();
        let expected = expected.clone();
        let next_json = serde_json::to_string(next)?;

        let swapped = self
            .run(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let raw: Option<String> = tx
                    .query_row(
                        "SELECT value_json FROM token_usage WHERE key=?1",
                        rusqlite::params![uid],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(raw) = raw else {
                    return Ok(false);
                };
                let current: TokenLedger = serde_json::from_str(&raw)?;
                if current != expected {
                    return Ok(false);
                }
                tx.execute(
                    "UPDATE token_usage SET value_json=?2 WHERE key=?1",
                    rusqlite::params![uid, next_json],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if swapped {
            self.bump_revision();
        }
        Ok(swapped)
    }

    async fn load_plan_hire(&self, uid: &str) -> Result<Option<PlanHireRecord>, StoreError> {
        self.load_doc(PLAN_HIRED, uid).await
    }

    async fn put_plan_hire(&self, record: &PlanHireRecord) -> Result<(), StoreError> {
        self.put_doc(PLAN_HIRED, &record.uid, record).await
    }

    async fn load_fraud_record(&self, uid: &str) -> Result<Option<FraudRecord>, StoreError> {
        self.load_doc(POTENTIAL_FRAUD, uid).await
    }

    async fn put_fraud_record(&self, record: &FraudRecord) -> Result<(), StoreError> {
        self.put_doc(POTENTIAL_FRAUD, &record.uid, record).await
    }

    async fn load_deleted_user(
        &self,
        uid: &str,
    ) -> Result<Option<DeletedUserRecord>, StoreError> {
        self.load_doc(DELETED_USERS, uid).await
    }

    async fn put_deleted_user(&self, record: &DeletedUserRecord) -> Result<(), StoreError> {
        self.put_doc(DELETED_USERS, &record.uid, record).await
    }

    async fn load_challenge(&self, id: &str) -> Result<Option<ChallengeRecord>, StoreError> {
        let id = id.to_string();
        self.run(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT value_json FROM challenges WHERE id=?1",
                    rusqlite::params![id],
                    |row| row.get(0),
                )
                .optional()?;
            match raw {
                Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn put_challenge(&self, challenge: &ChallengeRecord) -> Result<(), StoreError> {
        let value_json = serde_json::to_string(challenge)?;
        self.put_indexed(
            "challenges",
            &challenge.id,
            &challenge.user_id,
            challenge.created_at_ms,
            value_json,
        )
        .await
    }

    async fn list_challenges(&self, user_id: &str) -> Result<Vec<ChallengeRecord>, StoreError> {
        self.list_indexed("challenges", user_id, "ts_ms DESC, rowid DESC")
            .await
    }

    async fn put_message(&self, message: &MessageRecord) -> Result<(), StoreError> {
        let value_json = serde_json::to_string(message)?;
        self.put_indexed(
            "messages",
            &message.id,
            &message.challenge_id,
            message.timestamp_ms,
            value_json,
        )
        .await
    }

    async fn list_messages(&self, challenge_id: &str) -> Result<Vec<MessageRecord>, StoreError> {
        self.list_indexed("messages", challenge_id, "ts_ms ASC, rowid ASC")
            .await
    }

    async fn put_startup_list(&self, list: &StartupListRecord) -> Result<(), StoreError> {
        let value_json = serde_json::to_string(list)?;
        self.put_indexed(
            "startup_lists",
            &list.id,
            &list.challenge_id,
            list.created_at_ms,
            value_json,
        )
        .await
    }

    async fn list_startup_lists(
        &self,
        challenge_id: &str,
    ) -> Result<Vec<StartupListRecord>, StoreError> {
        self.list_indexed("startup_lists", challenge_id, "ts_ms ASC, rowid ASC")
            .await
    }
}

fn init_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            key TEXT PRIMARY KEY NOT NULL,
            value_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS token_usage (
            key TEXT PRIMARY KEY NOT NULL,
            value_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS plan_hired (
            key TEXT PRIMARY KEY NOT NULL,
            value_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS potential_fraud (
            key TEXT PRIMARY KEY NOT NULL,
            value_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS deleted_users (
            key TEXT PRIMARY KEY NOT NULL,
            value_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS challenges (
            id TEXT PRIMARY KEY NOT NULL,
            parent TEXT NOT NULL,
            ts_ms INTEGER NOT NULL,
            value_json TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_challenges_parent_ts_ms
            ON challenges(parent, ts_ms);

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY NOT NULL,
            parent TEXT NOT NULL,
            ts_ms INTEGER NOT NULL,
            value_json TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_parent_ts_ms
            ON messages(parent, ts_ms);

        CREATE TABLE IF NOT EXISTS startup_lists (
            id TEXT PRIMARY KEY NOT NULL,
            parent TEXT NOT NULL,
            ts_ms INTEGER NOT NULL,
            value_json TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_startup_lists_parent_ts_ms
            ON startup_lists(parent, ts_ms);",
    )?;
    Ok(())
}

fn open_connection(path: PathBuf) -> Result<rusqlite::Connection, rusqlite::Error> {
    let conn = rusqlite::Connection::open(path)?;
    let _ = conn.busy_timeout(Duration::from_secs(5));
    let _ = conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;");
    Ok(conn)
}

fn u64_to_i64(value: u64) -> i64 {
    if value > i64::MAX as u64 {
        i64::MAX
    } else {
        value as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Role;

    fn ledger(used: u64, last_updated_ms: u64) -> TokenLedger {
        TokenLedger {
            total_tokens: 1_000,
            used_tokens: used,
            last_updated_ms,
            plan: "Jedi".to_string(),
        }
    }

    #[tokio::test]
    async fn sqlite_store_round_trips_user_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::new(dir.path().join("genie.sqlite"));
        store.init().await.expect("init");

        assert!(store.load_user("u1").await.expect("load").is_none());

        let mut user = UserRecord::new("u1");
        user.name = Some("Ana Souza".to_string());
        store.put_user(&user).await.expect("put");

        user.plan = Some("Jedi".to_string());
        store.put_user(&user).await.expect("overwrite");

        let loaded = store.load_user("u1").await.expect("load").expect("user");
        assert_eq!(loaded, user);
    }

    #[tokio::test]
    async fn sqlite_store_swap_ledger_rejects_stale_expectation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::new(dir.path().join("genie.sqlite"));

        store
            .put_ledger("u1", &ledger(100, 5))
            .await
            .expect("provision");

        assert!(
            store
                .swap_ledger("u1", &ledger(100, 5), &ledger(109, 5))
                .await
                .expect("first swap")
        );
        assert!(
            !store
                .swap_ledger("u1", &ledger(100, 5), &ledger(109, 5))
                .await
                .expect("stale swap")
        );
        assert!(
            !store
                .swap_ledger("nobody", &ledger(0, 0), &ledger(9, 0))
                .await
                .expect("missing swap")
        );

        let stored = store.load_ledger("u1").await.expect("load");
        assert_eq!(stored, Some(ledger(109, 5)));
    }

    #[tokio::test]
    async fn sqlite_store_orders_challenges_and_messages() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::new(dir.path().join("genie.sqlite"));

        for (id, ts) in [("old", 1), ("new", 3), ("mid", 2)] {
            store
                .put_challenge(&ChallengeRecord {
                    id: id.to_string(),
                    user_id: "u1".to_string(),
                    title: id.to_string(),
                    description: "desc".to_string(),
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
        assert_eq!(ids, ["new", "mid", "old"]);
        assert!(store.list_challenges("u2").await.expect("list").is_empty());

        for (id, ts) in [("b", 20), ("a", 10), ("c", 20)] {
            store
                .put_message(&MessageRecord {
                    id: id.to_string(),
                    challenge_id: "new".to_string(),
                    user_id: "u1".to_string(),
                    role: Role::Assistant,
                    content: id.to_string(),
                    timestamp_ms: ts,
                    hidden: false,
                })
                .await
                .expect("put message");
        }
        let ids: Vec<String> = store
            .list_messages("new")
            .await
            .expect("list")
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn sqlite_store_writes_notify_subscribers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::new(dir.path().join("genie.sqlite"));
        let mut changes = store.changes();
        let _ = changes.borrow_and_update();

        store
            .put_plan_hire(&PlanHireRecord {
                uid: "u1".to_string(),
                email: None,
                hired: true,
                plan_id: Some("jedi".to_string()),
                hired_at_ms: Some(1),
                updated_at_ms: None,
            })
            .await
            .expect("put");

        assert!(changes.has_changed().expect("sender alive"));
        let hire = store.load_plan_hire("u1").await.expect("load");
        assert_eq!(hire.map(|h| h.hired), Some(true));
    }
}
