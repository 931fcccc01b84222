//! Storage seen by the backup pipeline.
//!
//! Every operation is scoped by username. Implementations join the ambient
//! [`TransactionContext`](crate::transaction::TransactionContext) when one is
//! active, so writes made inside
//! [`run_in_transaction`](crate::transaction::run_in_transaction) commit or
//! roll back together.

mod memory;

pub use memory::MemoryStore;

use crate::errors::StorageError;
use crate::models::{EventRecord, FillupRecord, Photo, UserTypes, Vehicle};
use crate::transaction::SessionSource;
use async_trait::async_trait;

#[async_trait]
pub trait BackupStore: SessionSource {
    async fn find_vehicles(&self, username: &str) -> Result<Vec<Vehicle>, StorageError>;

    async fn find_fillups(
        &self,
        username: &str,
        vehicle_id: &str,
    ) -> Result<Vec<FillupRecord>, StorageError>;

    async fn find_events(
        &self,
        username: &str,
        vehicle_id: &str,
    ) -> Result<Vec<EventRecord>, StorageError>;

    async fn find_user_types(&self, username: &str) -> Result<UserTypes, StorageError>;

    async fn find_photo(&self, username: &str, photo_id: &str)
        -> Result<Option<Photo>, StorageError>;

    async fn upsert_vehicle(&self, username: &str, vehicle: Vehicle) -> Result<(), StorageError>;

    async fn insert_fillups(
        &self,
        username: &str,
        records: Vec<FillupRecord>,
    ) -> Result<(), StorageError>;

    /// Replaces records with matching ids, inserting the rest.
    async fn upsert_fillups(
        &self,
        username: &str,
        records: Vec<FillupRecord>,
    ) -> Result<(), StorageError>;

    async fn insert_events(
        &self,
        username: &str,
        records: Vec<EventRecord>,
    ) -> Result<(), StorageError>;

    async fn upsert_user_types(&self, username: &str, types: UserTypes)
        -> Result<(), StorageError>;

    async fn upsert_photo(&self, username: &str, photo: Photo) -> Result<(), StorageError>;

    /// Deletes all fillups of a vehicle and returns how many were removed.
    async fn delete_fillups(&self, username: &str, vehicle_id: &str)
        -> Result<usize, StorageError>;

    /// Deletes all events of a vehicle and returns how many were removed.
    async fn delete_events(&self, username: &str, vehicle_id: &str) -> Result<usize, StorageError>;
}
