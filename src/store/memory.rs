use super::BackupStore;
use crate::errors::StorageError;
use crate::models::{EventRecord, FillupRecord, Photo, UserTypes, Vehicle};
use crate::transaction::{ClientSession, SessionSource, TransactionContext};
use async_trait::async_trait;
use std::any::Any;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct UserData {
    vehicles: BTreeMap<String, Vehicle>,
    fillups: BTreeMap<String, FillupRecord>,
    events: BTreeMap<String, EventRecord>,
    photos: BTreeMap<String, Photo>,
    user_types: UserTypes,
}

type Users = HashMap<String, UserData>;

#[derive(Default)]
struct Shared {
    committed: Mutex<Users>,
    next_session: AtomicU64,
    sessions_started: AtomicUsize,
    commits: AtomicUsize,
    aborts: AtomicUsize,
    write_failures: Mutex<VecDeque<StorageError>>,
    commit_failures: Mutex<VecDeque<StorageError>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StorageError> {
    mutex
        .lock()
        .map_err(|_| StorageError::new("memory store lock poisoned"))
}

/// In-process store with real transaction staging.
///
/// Writes made inside a transaction go to a per-session copy of each touched
/// user and replace the committed data on commit. Outside a transaction they
/// apply immediately. Failures can be queued to exercise retry paths.
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next write operation fails with `err`.
    pub fn fail_next_write(&self, err: StorageError) {
        if let Ok(mut queue) = self.shared.write_failures.lock() {
            queue.push_back(err);
        }
    }

    /// The next commit fails with `err`; staged writes are kept.
    pub fn fail_next_commit(&self, err: StorageError) {
        if let Ok(mut queue) = self.shared.commit_failures.lock() {
            queue.push_back(err);
        }
    }

    pub fn sessions_started(&self) -> usize {
        self.shared.sessions_started.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.shared.commits.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> usize {
        self.shared.aborts.load(Ordering::SeqCst)
    }

    /// Session of this store bound to the current task, if any.
    fn with_session<R>(&self, f: impl FnOnce(Option<&MemorySession>) -> R) -> R {
        let context = TransactionContext::current();
        let session = context
            .as_ref()
            .and_then(|ctx| ctx.session_as::<MemorySession>())
            .filter(|s| Arc::ptr_eq(&s.shared, &self.shared));
        f(session)
    }

    fn read<R>(
        &self,
        username: &str,
        f: impl FnOnce(&UserData) -> R,
    ) -> Result<R, StorageError> {
        self.with_session(|session| {
            if let Some(session) = session {
                let staged = lock(&session.staged)?;
                if let Some(data) = staged.get(username) {
                    return Ok(f(data));
                }
            }
            let committed = lock(&self.shared.committed)?;
            Ok(match committed.get(username) {
                Some(data) => f(data),
                None => f(&UserData::default()),
            })
        })
    }

    fn write<R>(
        &self,
        username: &str,
        f: impl FnOnce(&mut UserData) -> Result<R, StorageError>,
    ) -> Result<R, StorageError> {
        if let Some(err) = lock(&self.shared.write_failures)?.pop_front() {
            return Err(err);
        }
        self.with_session(|session| match session {
            Some(session) => {
                let mut staged = lock(&session.staged)?;
                if !staged.contains_key(username) {
                    let committed = lock(&self.shared.committed)?;
                    let copy = committed.get(username).cloned().unwrap_or_default();
                    staged.insert(username.to_string(), copy);
                }
                match staged.get_mut(username) {
                    Some(data) => f(data),
                    None => Err(StorageError::new("staged user data missing")),
                }
            }
            None => {
                let mut committed = lock(&self.shared.committed)?;
                f(committed.entry(username.to_string()).or_default())
            }
        })
    }
}

struct MemorySession {
    id: u64,
    shared: Arc<Shared>,
    staged: Mutex<Users>,
}

#[async_trait]
impl ClientSession for MemorySession {
    async fn commit_transaction(&self) -> Result<(), StorageError> {
        if let Some(err) = lock(&self.shared.commit_failures)?.pop_front() {
            return Err(err);
        }
        let mut staged = lock(&self.staged)?;
        let mut committed = lock(&self.shared.committed)?;
        let users = staged.len();
        committed.extend(staged.drain());
        self.shared.commits.fetch_add(1, Ordering::SeqCst);
        debug!(session = self.id, users, "Memory transaction committed");
        Ok(())
    }

    async fn abort_transaction(&self) -> Result<(), StorageError> {
        lock(&self.staged)?.clear();
        self.shared.aborts.fetch_add(1, Ordering::SeqCst);
        debug!(session = self.id, "Memory transaction aborted");
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl SessionSource for MemoryStore {
    async fn start_transaction(&self) -> Result<Arc<dyn ClientSession>, StorageError> {
        self.shared.sessions_started.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemorySession {
            id: self.shared.next_session.fetch_add(1, Ordering::SeqCst),
            shared: self.shared.clone(),
            staged: Mutex::default(),
        }))
    }
}

#[async_trait]
impl BackupStore for MemoryStore {
    async fn find_vehicles(&self, username: &str) -> Result<Vec<Vehicle>, StorageError> {
        self.read(username, |data| data.vehicles.values().cloned().collect())
    }

    async fn find_fillups(
        &self,
        username: &str,
        vehicle_id: &str,
    ) -> Result<Vec<FillupRecord>, StorageError> {
        self.read(username, |data| {
            data.fillups
                .values()
                .filter(|r| r.vehicle_id == vehicle_id)
                .cloned()
                .collect()
        })
    }

    async fn find_events(
        &self,
        username: &str,
        vehicle_id: &str,
    ) -> Result<Vec<EventRecord>, StorageError> {
        self.read(username, |data| {
            data.events
                .values()
                .filter(|r| r.vehicle_id == vehicle_id)
                .cloned()
                .collect()
        })
    }

    async fn find_user_types(&self, username: &str) -> Result<UserTypes, StorageError> {
        self.read(username, |data| data.user_types.clone())
    }

    async fn find_photo(
        &self,
        username: &str,
        photo_id: &str,
    ) -> Result<Option<Photo>, StorageError> {
        self.read(username, |data| data.photos.get(photo_id).cloned())
    }

    async fn upsert_vehicle(&self, username: &str, vehicle: Vehicle) -> Result<(), StorageError> {
        self.write(username, |data| {
            data.vehicles.insert(vehicle.id.clone(), vehicle);
            Ok(())
        })
    }

    async fn insert_fillups(
        &self,
        username: &str,
        records: Vec<FillupRecord>,
    ) -> Result<(), StorageError> {
        self.write(username, |data| {
            if let Some(dup) = records.iter().find(|r| data.fillups.contains_key(&r.id)) {
                return Err(StorageError::new(format!("duplicate fillup id {}", dup.id)));
            }
            data.fillups
                .extend(records.into_iter().map(|r| (r.id.clone(), r)));
            Ok(())
        })
    }

    async fn upsert_fillups(
        &self,
        username: &str,
        records: Vec<FillupRecord>,
    ) -> Result<(), StorageError> {
        self.write(username, |data| {
            data.fillups
                .extend(records.into_iter().map(|r| (r.id.clone(), r)));
            Ok(())
        })
    }

    async fn insert_events(
        &self,
        username: &str,
        records: Vec<EventRecord>,
    ) -> Result<(), StorageError> {
        self.write(username, |data| {
            if let Some(dup) = records.iter().find(|r| data.events.contains_key(&r.id)) {
                return Err(StorageError::new(format!("duplicate event id {}", dup.id)));
            }
            data.events
                .extend(records.into_iter().map(|r| (r.id.clone(), r)));
            Ok(())
        })
    }

    async fn upsert_user_types(
        &self,
        username: &str,
        types: UserTypes,
    ) -> Result<(), StorageError> {
        self.write(username, |data| {
            data.user_types = types;
            Ok(())
        })
    }

    async fn upsert_photo(&self, username: &str, photo: Photo) -> Result<(), StorageError> {
        self.write(username, |data| {
            data.photos.insert(photo.id.clone(), photo);
            Ok(())
        })
    }

    async fn delete_fillups(
        &self,
        username: &str,
        vehicle_id: &str,
    ) -> Result<usize, StorageError> {
        self.write(username, |data| {
            let before = data.fillups.len();
            data.fillups.retain(|_, r| r.vehicle_id != vehicle_id);
            Ok(before - data.fillups.len())
        })
    }

    async fn delete_events(&self, username: &str, vehicle_id: &str) -> Result<usize, StorageError> {
        self.write(username, |data| {
            let before = data.events.len();
            data.events.retain(|_, r| r.vehicle_id != vehicle_id);
            Ok(before - data.events.len())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{run_in_transaction, CommitFailureMode, RetryPolicy};

    fn vehicle(id: &str) -> Vehicle {
        Vehicle {
            id: id.to_string(),
            name: format!("Vehicle {id}"),
            ..Default::default()
        }
    }

    fn fillup(id: &str, vehicle_id: &str) -> FillupRecord {
        FillupRecord {
            id: id.to_string(),
            vehicle_id: vehicle_id.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn writes_outside_transactions_apply_immediately() {
        let store = MemoryStore::new();
        store.upsert_vehicle("ana", vehicle("v1")).await.unwrap();
        assert_eq!(store.find_vehicles("ana").await.unwrap().len(), 1);
        assert!(store.find_vehicles("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transaction_sees_its_writes_and_publishes_on_commit() {
        let store = MemoryStore::new();
        let outside = store.clone();
        let result: Result<(), StorageError> = run_in_transaction(
            &store,
            &RetryPolicy::default(),
            CommitFailureMode::Propagate,
            || async {
                store.upsert_vehicle("ana", vehicle("v1")).await?;
                assert_eq!(store.find_vehicles("ana").await?.len(), 1);
                // Not visible from another task until commit.
                let other = outside.clone();
                let seen = tokio::spawn(async move { other.find_vehicles("ana").await })
                    .await
                    .unwrap()?;
                assert!(seen.is_empty());
                Ok(())
            },
        )
        .await;

        result.unwrap();
        assert_eq!(store.find_vehicles("ana").await.unwrap().len(), 1);
        assert_eq!(store.commits(), 1);
    }

    #[tokio::test]
    async fn failed_transaction_leaves_committed_data_alone() {
        let store = MemoryStore::new();
        store.upsert_vehicle("ana", vehicle("v1")).await.unwrap();

        let result: Result<(), StorageError> = run_in_transaction(
            &store,
            &RetryPolicy::default(),
            CommitFailureMode::Propagate,
            || async {
                store.delete_fillups("ana", "v1").await?;
                store.upsert_vehicle("ana", vehicle("v2")).await?;
                Err(StorageError::new("validation failed"))
            },
        )
        .await;

        assert!(result.is_err());
        let ids: Vec<_> = store
            .find_vehicles("ana")
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.id)
            .collect();
        assert_eq!(ids, vec!["v1"]);
        assert_eq!(store.aborts(), 1);
    }

    #[tokio::test]
    async fn injected_write_failure_is_consumed_once() {
        let store = MemoryStore::new();
        store.fail_next_write(StorageError::transient("write conflict"));
        let err = store.upsert_vehicle("ana", vehicle("v1")).await.unwrap_err();
        assert!(err.is_transient_transaction_error());
        store.upsert_vehicle("ana", vehicle("v1")).await.unwrap();
    }

    #[tokio::test]
    async fn delete_and_duplicate_handling() {
        let store = MemoryStore::new();
        store
            .insert_fillups("ana", vec![fillup("f1", "v1"), fillup("f2", "v1"), fillup("f3", "v2")])
            .await
            .unwrap();
        assert!(store
            .insert_fillups("ana", vec![fillup("f1", "v1")])
            .await
            .is_err());

        assert_eq!(store.delete_fillups("ana", "v1").await.unwrap(), 2);
        assert!(store.find_fillups("ana", "v1").await.unwrap().is_empty());
        assert_eq!(store.find_fillups("ana", "v2").await.unwrap().len(), 1);
    }
}
