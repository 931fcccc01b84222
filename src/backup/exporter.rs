use crate::archive::{stream_archive_with_capacity, ArchiveEntry, ArchiveStream};
use crate::config::ResolvedConfig;
use crate::constants::{
    EVENT_RECORDS_FILE, FILLUP_RECORDS_FILE, METADATA_FILE, PHOTOS_PREFIX, USER_TYPES_FILE,
    VEHICLES_FILE,
};
use crate::errors::{log_redacted, StorageError, ZipError};
use crate::models::{EventRecord, ExportSelection, FillupRecord, PhotoManifest, UserTypes, Vehicle};
use crate::store::BackupStore;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::Serialize;
use std::io;
use std::sync::Arc;
use tracing::{info, warn};

type EntryStream = BoxStream<'static, Result<ArchiveEntry, ZipError>>;

/// Streams the selected data as a zip archive with the default configuration.
pub fn export_backup<S>(store: Arc<S>, selection: ExportSelection) -> ArchiveStream
where
    S: BackupStore + ?Sized + 'static,
{
    export_backup_with_config(store, selection, &ResolvedConfig::default())
}

/// Streams the selected data as a zip archive.
///
/// Records are read when the consumer starts pulling. Photos are loaded one at
/// a time, as the writer reaches them. A storage failure ends the stream with
/// a `ZipError` that carries only a log reference.
pub fn export_backup_with_config<S>(
    store: Arc<S>,
    selection: ExportSelection,
    config: &ResolvedConfig,
) -> ArchiveStream
where
    S: BackupStore + ?Sized + 'static,
{
    let chunk_size = config.read_chunk_size;
    let entries = stream::once(load_snapshot(store.clone(), selection))
        .map(move |snapshot| -> EntryStream {
            match snapshot {
                Ok(snapshot) => snapshot.into_entries(store.clone(), chunk_size),
                Err(e) => stream::iter(vec![Err(e)]).boxed(),
            }
        })
        .flatten();
    stream_archive_with_capacity(entries, config.archive_channel_capacity)
}

struct Snapshot {
    username: String,
    photos: PhotoManifest,
    user_types: UserTypes,
    vehicles: Vec<Vehicle>,
    events: Vec<EventRecord>,
    fillups: Vec<FillupRecord>,
}

enum Document {
    Metadata(PhotoManifest),
    UserTypes(UserTypes),
    Vehicles(Vec<Vehicle>),
    EventRecords(Vec<EventRecord>),
    FillupRecords(Vec<FillupRecord>),
}

impl Document {
    fn into_entry(self, chunk_size: usize) -> Result<ArchiveEntry, ZipError> {
        match self {
            Document::Metadata(v) => json_entry(METADATA_FILE, &v, chunk_size),
            Document::UserTypes(v) => json_entry(USER_TYPES_FILE, &v, chunk_size),
            Document::Vehicles(v) => json_entry(VEHICLES_FILE, &v, chunk_size),
            Document::EventRecords(v) => json_entry(EVENT_RECORDS_FILE, &v, chunk_size),
            Document::FillupRecords(v) => json_entry(FILLUP_RECORDS_FILE, &v, chunk_size),
        }
    }
}

impl Snapshot {
    fn into_entries<S>(self, store: Arc<S>, chunk_size: usize) -> EntryStream
    where
        S: BackupStore + ?Sized + 'static,
    {
        info!(
            username = %self.username,
            vehicles = self.vehicles.len(),
            fillups = self.fillups.len(),
            events = self.events.len(),
            photos = self.photos.len(),
            "Exporting backup"
        );

        let photo_ids: Vec<String> = self.photos.keys().cloned().collect();
        let documents = vec![
            Document::Metadata(self.photos),
            Document::UserTypes(self.user_types),
            Document::Vehicles(self.vehicles),
            Document::EventRecords(self.events),
            Document::FillupRecords(self.fillups),
        ];

        let username = self.username;
        let photos = stream::iter(photo_ids).then(move |id| {
            let store = store.clone();
            let username = username.clone();
            async move { photo_entry(store.as_ref(), &username, id, chunk_size).await }
        });

        stream::iter(documents)
            .map(move |doc| doc.into_entry(chunk_size))
            .chain(photos)
            .boxed()
    }
}

async fn load_snapshot<S>(store: Arc<S>, selection: ExportSelection) -> Result<Snapshot, ZipError>
where
    S: BackupStore + ?Sized,
{
    let username = selection.username.as_str();
    let vehicles: Vec<Vehicle> = store
        .find_vehicles(username)
        .await
        .map_err(storage_failure)?
        .into_iter()
        .filter(|v| selection.includes(&v.id))
        .collect();

    let mut fillups = Vec::new();
    let mut events = Vec::new();
    let mut photos = PhotoManifest::new();
    for vehicle in &vehicles {
        fillups.extend(
            store
                .find_fillups(username, &vehicle.id)
                .await
                .map_err(storage_failure)?,
        );
        events.extend(
            store
                .find_events(username, &vehicle.id)
                .await
                .map_err(storage_failure)?,
        );
        if let Some(photo_id) = &vehicle.photo_id {
            match store.find_photo(username, photo_id).await.map_err(storage_failure)? {
                Some(photo) => {
                    photos.insert(photo.id, photo.metadata);
                }
                None => warn!(vehicle = %vehicle.id, photo = %photo_id, "Vehicle photo not found"),
            }
        }
    }

    let user_types = store
        .find_user_types(username)
        .await
        .map_err(storage_failure)?;

    Ok(Snapshot {
        username: selection.username.clone(),
        photos,
        user_types,
        vehicles,
        events,
        fillups,
    })
}

async fn photo_entry<S>(
    store: &S,
    username: &str,
    photo_id: String,
    chunk_size: usize,
) -> Result<ArchiveEntry, ZipError>
where
    S: BackupStore + ?Sized,
{
    let photo = store
        .find_photo(username, &photo_id)
        .await
        .map_err(storage_failure)?
        .ok_or_else(|| ZipError::new(format!("photo {photo_id} disappeared during export")))?;
    Ok(ArchiveEntry::new(
        format!("{PHOTOS_PREFIX}{photo_id}"),
        chunked(photo.data, chunk_size),
    ))
}

fn json_entry<T>(path: &str, value: &T, chunk_size: usize) -> Result<ArchiveEntry, ZipError>
where
    T: Serialize + ?Sized,
{
    let bytes = serde_json::to_vec(value)
        .map_err(|e| ZipError::new(format!("failed to serialize {path}: {e}")))?;
    Ok(ArchiveEntry::new(path, chunked(bytes, chunk_size)))
}

fn chunked(bytes: Vec<u8>, chunk_size: usize) -> impl futures::Stream<Item = io::Result<Vec<u8>>> {
    let chunks: Vec<io::Result<Vec<u8>>> = bytes
        .chunks(chunk_size.max(1))
        .map(|c| Ok(c.to_vec()))
        .collect();
    stream::iter(chunks)
}

fn storage_failure(err: StorageError) -> ZipError {
    ZipError::new(format!(
        "failed to read backup data (reference {})",
        log_redacted(&err)
    ))
}
