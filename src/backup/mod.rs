//! Backup import and export.
//!
//! Two archive layouts are understood on import:
//!
//! - the JSON layout written by [`export_backup`]: `metadata.json`,
//!   `userTypes.json`, `vehicles.json`, `eventRecords.json`,
//!   `fillupRecords.json` and one `photos/<id>` file per photo;
//! - the XML layout of the mobile app: `event-subtypes.xml`, `fuel-types.xml`,
//!   `trip-types.xml` and `vehicles.xml`. The vehicles document is streamed
//!   one `<vehicle>` at a time.
//!
//! Every vehicle is written in its own transaction. Its old fillups and events
//! are deleted first, so a replayed transaction ends in the same state.

mod exporter;
mod importer;
mod xml_import;

pub use exporter::{export_backup, export_backup_with_config};
pub use importer::{import_backup, import_backup_with_config};

use crate::archive::ExtractedArchive;
use crate::constants::{VEHICLES_FILE, VEHICLES_XML};
use crate::errors::ImportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupFormat {
    Json,
    Xml,
}

impl BackupFormat {
    /// Picks the layout from the files present in the archive.
    pub fn detect(archive: &ExtractedArchive) -> Result<Self, ImportError> {
        if archive.find(VEHICLES_FILE).is_some() {
            Ok(BackupFormat::Json)
        } else if archive.find(VEHICLES_XML).is_some() {
            Ok(BackupFormat::Xml)
        } else {
            Err(ImportError::MissingBackupFile(format!(
                "{VEHICLES_FILE} or {VEHICLES_XML}"
            )))
        }
    }
}
