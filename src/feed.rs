//! Live views over store collections.
//!
//! Each feed is a lazy stream of full, ordered snapshots: the current
//! snapshot on first poll, then a fresh one after every store write. A feed
//! only ends when the store goes away; dropping it unsubscribes, and calling
//! the constructor again starts over from the current snapshot.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use futures_util::stream::{self, BoxStream, StreamExt};

use crate::{GenieError, Result};
use crate::store::{ChallengeRecord, MessageRecord, StartupListRecord, Store, StoreError};

/// Stable identity of a snapshot element.
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for ChallengeRecord {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for MessageRecord {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for StartupListRecord {
    fn key(&self) -> &str {
        &self.id
    }
}

/// User's challenges, newest first.
pub fn challenges(
    store: Arc<dyn Store>,
    user_id: impl Into<String>,
) -> BoxStream<'static, Result<Vec<ChallengeRecord>>> {
    let user_id = user_id.into();
    snapshots(store, move |store| {
        let user_id = user_id.clone();
        async move { store.list_challenges(&user_id).await }
    })
}

/// Messages of a challenge, oldest first. Hidden messages are included.
pub fn messages(
    store: Arc<dyn Store>,
    challenge_id: impl Into<String>,
) -> BoxStream<'static, Result<Vec<MessageRecord>>> {
    let challenge_id = challenge_id.into();
    snapshots(store, move |store| {
        let challenge_id = challenge_id.clone();
        async move { store.list_messages(&challenge_id).await }
    })
}

pub fn startup_lists(
    store: Arc<dyn Store>,
    challenge_id: impl Into<String>,
) -> BoxStream<'static, Result<Vec<StartupListRecord>>> {
    let challenge_id = challenge_id.into();
    snapshots(store, move |store| {
        let challenge_id = challenge_id.clone();
        async move { store.list_startup_lists(&challenge_id).await }
    })
}

fn snapshots<T, F, Fut>(store: Arc<dyn Store>, load: F) -> BoxStream<'static, Result<Vec<T>>>
where
    T: Send + 'static,
    F: Fn(Arc<dyn Store>) -> Fut + Send + 'static,
    Fut: Future<Output = std::result::Result<Vec<T>, StoreError>> + Send + 'static,
{
    let changes = store.changes();
    stream::unfold(
        (store, changes, load, true),
        |(store, mut changes, load, first)| async move {
            if first {
                changes.mark_unchanged();
            } else if changes.changed().await.is_err() {
                return None;
            }
            let snapshot = load(Arc::clone(&store)).await.map_err(GenieError::from);
            Some((snapshot, (store, changes, load, false)))
        },
    )
    .boxed()
}

/// Element-level difference between two snapshots of the same feed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl SnapshotDiff {
    pub fn between<T: Keyed + PartialEq>(prev: &[T], next: &[T]) -> Self {
        let before: HashMap<&str, &T> = prev.iter().map(|item| (item.key(), item)).collect();
        let after: BTreeSet<&str> = next.iter().map(Keyed::key).collect();

        let mut diff = SnapshotDiff::default();
        for item in next {
            match before.get(item.key()) {
                None => diff.added.push(item.key().to_string()),
                Some(old) if *old != item => diff.changed.push(item.key().to_string()),
                Some(_) => {}
            }
        }
        diff.removed = prev
            .iter()
            .map(Keyed::key)
            .filter(|key| !after.contains(key))
            .map(str::to_string)
            .collect();
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}
