use super::{xml_import, BackupFormat};
use crate::archive::{extract_with_prefix, ExtractedArchive};
use crate::config::ResolvedConfig;
use crate::constants::{
    EVENT_RECORDS_FILE, FILLUP_RECORDS_FILE, METADATA_FILE, PHOTOS_PREFIX, USER_TYPES_FILE,
    VEHICLES_FILE,
};
use crate::efficiency::recalculate;
use crate::errors::ImportError;
use crate::models::{
    EventRecord, FillupRecord, ImportCounts, Photo, PhotoManifest, UserTypes, Vehicle,
};
use crate::store::BackupStore;
use crate::transaction::{run_in_transaction, CommitFailureMode, RetryPolicy};
use crate::utils::format_duration;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Imports a backup archive for `username` with the default configuration.
///
/// # Errors
///
/// - `MissingBackupFile` if the archive has neither layout, or a required file is absent
/// - `WrongFormat` if a document has an unexpected root element
/// - `FileCorrupted` if the archive or a document cannot be parsed
/// - `Server` for storage failures; details are logged under the returned reference
pub async fn import_backup<S>(
    store: &S,
    username: &str,
    archive_path: &Path,
) -> Result<ImportCounts, ImportError>
where
    S: BackupStore + ?Sized,
{
    import_backup_with_config(store, username, archive_path, &ResolvedConfig::default()).await
}

pub async fn import_backup_with_config<S>(
    store: &S,
    username: &str,
    archive_path: &Path,
    config: &ResolvedConfig,
) -> Result<ImportCounts, ImportError>
where
    S: BackupStore + ?Sized,
{
    let started = Instant::now();
    let result = run_import(store, username, archive_path, config)
        .await
        .map_err(ImportError::redacted);

    match &result {
        Ok(counts) => info!(
            username,
            vehicles = counts.vehicles,
            fillups = counts.fillups,
            events = counts.events,
            elapsed = %format_duration(started.elapsed()),
            "Backup imported"
        ),
        Err(e) => warn!(username, error = %e, "Backup import failed"),
    }
    result
}

async fn run_import<S>(
    store: &S,
    username: &str,
    archive_path: &Path,
    config: &ResolvedConfig,
) -> Result<ImportCounts, ImportError>
where
    S: BackupStore + ?Sized,
{
    // Dropping the archive removes the extracted files on every exit path.
    let archive = extract_with_prefix(archive_path, &config.temp_dir_prefix).await?;
    let policy = RetryPolicy::from_config(config);

    let format = BackupFormat::detect(&archive)?;
    debug!(?format, entries = archive.entries().len(), "Detected backup format");
    match format {
        BackupFormat::Json => import_json(store, username, &archive, &policy).await,
        BackupFormat::Xml => {
            xml_import::import_xml(store, username, &archive, config, &policy).await
        }
    }
}

/// One vehicle with everything recorded for it.
#[derive(Debug, Clone)]
pub(super) struct VehicleBatch {
    pub vehicle: Vehicle,
    pub fillups: Vec<FillupRecord>,
    pub events: Vec<EventRecord>,
}

impl VehicleBatch {
    fn new(vehicle: Vehicle) -> Self {
        Self {
            vehicle,
            fillups: Vec::new(),
            events: Vec::new(),
        }
    }
}

/// Replaces one vehicle and its records in a single transaction, then stores
/// the recalculated efficiencies.
pub(super) async fn write_vehicle<S>(
    store: &S,
    username: &str,
    batch: VehicleBatch,
    policy: &RetryPolicy,
) -> Result<ImportCounts, ImportError>
where
    S: BackupStore + ?Sized,
{
    let counts = ImportCounts {
        vehicles: 1,
        fillups: batch.fillups.len(),
        events: batch.events.len(),
    };
    let vehicle_id = batch.vehicle.id.clone();

    run_in_transaction(store, policy, CommitFailureMode::Unexpected, || {
        let batch = batch.clone();
        async move {
            let id = batch.vehicle.id.clone();
            store.upsert_vehicle(username, batch.vehicle).await?;
            store.delete_fillups(username, &id).await?;
            store.delete_events(username, &id).await?;
            store.insert_fillups(username, batch.fillups).await?;
            store.insert_events(username, batch.events).await?;

            let stored = store.find_fillups(username, &id).await?;
            store.upsert_fillups(username, recalculate(stored)).await?;
            Ok::<_, ImportError>(())
        }
    })
    .await?;

    debug!(
        vehicle = %vehicle_id,
        fillups = counts.fillups,
        events = counts.events,
        "Vehicle imported"
    );
    Ok(counts)
}

pub(super) async fn write_user_types<S>(
    store: &S,
    username: &str,
    types: UserTypes,
    policy: &RetryPolicy,
) -> Result<(), ImportError>
where
    S: BackupStore + ?Sized,
{
    run_in_transaction(store, policy, CommitFailureMode::Unexpected, || {
        let types = types.clone();
        async move {
            store.upsert_user_types(username, types).await?;
            Ok::<_, ImportError>(())
        }
    })
    .await
}

async fn import_json<S>(
    store: &S,
    username: &str,
    archive: &ExtractedArchive,
    policy: &RetryPolicy,
) -> Result<ImportCounts, ImportError>
where
    S: BackupStore + ?Sized,
{
    let vehicles: Vec<Vehicle> = read_json(archive, VEHICLES_FILE).await?;
    let fillups: Vec<FillupRecord> = read_json(archive, FILLUP_RECORDS_FILE).await?;
    let events: Vec<EventRecord> = read_json(archive, EVENT_RECORDS_FILE).await?;
    let user_types: UserTypes = read_json(archive, USER_TYPES_FILE).await?;
    let manifest: PhotoManifest = read_json(archive, METADATA_FILE).await?;

    // Everything structural is checked before the first write.
    let batches = group_by_vehicle(vehicles, fillups, events)?;
    for photo_id in manifest.keys() {
        if archive.find(&photo_path(photo_id)).is_none() {
            return Err(ImportError::corrupted(format!(
                "photo {photo_id} is listed in {METADATA_FILE} but missing"
            )));
        }
    }

    write_user_types(store, username, user_types, policy).await?;

    for (photo_id, metadata) in manifest {
        let path = photo_path(&photo_id);
        let data = match archive.find(&path) {
            Some(entry) => entry.read_to_end().await?,
            None => return Err(ImportError::MissingBackupFile(path)),
        };
        let photo = Photo {
            id: photo_id,
            metadata,
            data,
        };
        run_in_transaction(store, policy, CommitFailureMode::Unexpected, || {
            let photo = photo.clone();
            async move {
                store.upsert_photo(username, photo).await?;
                Ok::<_, ImportError>(())
            }
        })
        .await?;
    }

    let mut counts = ImportCounts::default();
    for batch in batches {
        counts.add(write_vehicle(store, username, batch, policy).await?);
    }
    Ok(counts)
}

fn photo_path(photo_id: &str) -> String {
    format!("{PHOTOS_PREFIX}{photo_id}")
}

async fn read_json<T>(archive: &ExtractedArchive, name: &str) -> Result<T, ImportError>
where
    T: DeserializeOwned,
{
    let entry = archive
        .find(name)
        .ok_or_else(|| ImportError::MissingBackupFile(name.to_string()))?;
    let bytes = entry.read_to_end().await?;
    serde_json::from_slice(&bytes).map_err(|e| ImportError::corrupted(format!("{name}: {e}")))
}

/// Groups records under their vehicles, keeping the vehicle order of the file.
fn group_by_vehicle(
    vehicles: Vec<Vehicle>,
    fillups: Vec<FillupRecord>,
    events: Vec<EventRecord>,
) -> Result<Vec<VehicleBatch>, ImportError> {
    let mut index = HashMap::with_capacity(vehicles.len());
    let mut batches = Vec::with_capacity(vehicles.len());
    for vehicle in vehicles {
        if index.insert(vehicle.id.clone(), batches.len()).is_some() {
            return Err(ImportError::corrupted(format!(
                "vehicle {} appears more than once",
                vehicle.id
            )));
        }
        batches.push(VehicleBatch::new(vehicle));
    }

    for record in fillups {
        let slot = index.get(&record.vehicle_id).copied().ok_or_else(|| {
            ImportError::corrupted(format!(
                "fillup {} references unknown vehicle {}",
                record.id, record.vehicle_id
            ))
        })?;
        batches[slot].fillups.push(record);
    }
    for record in events {
        let slot = index.get(&record.vehicle_id).copied().ok_or_else(|| {
            ImportError::corrupted(format!(
                "event {} references unknown vehicle {}",
                record.id, record.vehicle_id
            ))
        })?;
        batches[slot].events.push(record);
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vehicle(id: &str) -> Vehicle {
        Vehicle {
            id: id.to_string(),
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

    #[test]
    fn groups_records_by_vehicle() {
        let batches = group_by_vehicle(
            vec![vehicle("v2"), vehicle("v1")],
            vec![fillup("f1", "v1"), fillup("f2", "v2"), fillup("f3", "v1")],
            Vec::new(),
        )
        .unwrap();
        assert_eq!(batches[0].vehicle.id, "v2");
        assert_eq!(batches[0].fillups.len(), 1);
        assert_eq!(batches[1].fillups.len(), 2);
    }

    #[test]
    fn orphan_records_are_corruption() {
        let err = group_by_vehicle(vec![vehicle("v1")], vec![fillup("f1", "v9")], Vec::new())
            .unwrap_err();
        assert!(matches!(err, ImportError::FileCorrupted { .. }));
        assert!(err.to_string().contains("v9"));
    }

    #[test]
    fn duplicate_vehicles_are_corruption() {
        assert!(group_by_vehicle(vec![vehicle("v1"), vehicle("v1")], Vec::new(), Vec::new()).is_err());
    }
}
