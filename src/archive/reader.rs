use crate::constants::TEMP_DIR_PREFIX;
use crate::errors::UnzipError;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// One entry of an extracted archive, materialized under the scope directory.
#[derive(Debug, Clone)]
pub struct ZipEntryDescriptor {
    pub is_directory: bool,
    /// Path inside the archive, `/`-separated.
    pub name: String,
    /// Location on disk. Valid only while the owning [`ExtractedArchive`] lives.
    pub path: PathBuf,
}

impl ZipEntryDescriptor {
    /// Opens the extracted file for streaming reads.
    pub async fn open(&self) -> io::Result<tokio::fs::File> {
        if self.is_directory {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is a directory", self.name),
            ));
        }
        tokio::fs::File::open(&self.path).await
    }

    pub async fn read_to_end(&self) -> io::Result<Vec<u8>> {
        if self.is_directory {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is a directory", self.name),
            ));
        }
        tokio::fs::read(&self.path).await
    }
}

/// Scope owning the extraction directory. Dropping it deletes every extracted file.
#[derive(Debug)]
pub struct ExtractedArchive {
    dir: TempDir,
    entries: Vec<ZipEntryDescriptor>,
}

impl ExtractedArchive {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn entries(&self) -> &[ZipEntryDescriptor] {
        &self.entries
    }

    /// Looks up a file entry by its archive path.
    pub fn find(&self, name: &str) -> Option<&ZipEntryDescriptor> {
        self.entries
            .iter()
            .find(|e| !e.is_directory && e.name == name)
    }

    /// File entries whose archive path starts with `prefix`.
    pub fn files_under<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = &'a ZipEntryDescriptor> + 'a {
        self.entries
            .iter()
            .filter(move |e| !e.is_directory && e.name.starts_with(prefix))
    }
}

/// Extracts `archive_path` into a fresh temporary directory.
///
/// # Errors
///
/// Returns `UnzipError` if the archive is unreadable or corrupt, or if any
/// filesystem operation fails. Partially extracted files are removed.
pub async fn extract(archive_path: &Path) -> Result<ExtractedArchive, UnzipError> {
    extract_with_prefix(archive_path, TEMP_DIR_PREFIX).await
}

/// Like [`extract`], naming the temporary directory with `prefix`.
pub async fn extract_with_prefix(
    archive_path: &Path,
    prefix: &str,
) -> Result<ExtractedArchive, UnzipError> {
    let archive_path = archive_path.to_path_buf();
    let prefix = prefix.to_string();
    tokio::task::spawn_blocking(move || extract_sync(&archive_path, &prefix))
        .await
        .map_err(|e| UnzipError::new(format!("Task join error: {e}")))?
}

fn extract_sync(archive_path: &Path, prefix: &str) -> Result<ExtractedArchive, UnzipError> {
    let dir = tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .map_err(|e| UnzipError::new(format!("Failed to create temporary directory: {e}")))?;

    let file = File::open(archive_path).map_err(|e| {
        UnzipError::new(format!(
            "Failed to open ZIP file {}: {e}",
            archive_path.display()
        ))
    })?;

    let mut archive = ZipArchive::new(file).map_err(|e| {
        UnzipError::new(format!(
            "Failed to read ZIP archive {}: {e}",
            archive_path.display()
        ))
    })?;

    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| UnzipError::new(format!("Failed to read entry {i}: {e}")))?;

        let relative = match entry.enclosed_name() {
            Some(path) => path.to_path_buf(),
            None => {
                warn!(entry = entry.name(), "Skipping entry with unsafe path");
                continue;
            }
        };
        let out_path = dir.path().join(&relative);
        let name = entry.name().trim_end_matches('/').to_string();

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|e| {
                UnzipError::new(format!(
                    "Failed to create directory {}: {e}",
                    out_path.display()
                ))
            })?;
            entries.push(ZipEntryDescriptor {
                is_directory: true,
                name,
                path: out_path,
            });
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                UnzipError::new(format!(
                    "Failed to create directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let mut out_file = File::create(&out_path).map_err(|e| {
            UnzipError::new(format!("Failed to create file {}: {e}", out_path.display()))
        })?;
        io::copy(&mut entry, &mut out_file).map_err(|e| {
            UnzipError::new(format!("Failed to extract {}: {e}", entry.name()))
        })?;

        if let Some(modified) = archive_mtime(&entry) {
            out_file.set_modified(modified).map_err(|e| {
                UnzipError::new(format!(
                    "Failed to restore modification time of {}: {e}",
                    out_path.display()
                ))
            })?;
        }

        debug!(entry = %name, size = entry.size(), "Extracted file");
        entries.push(ZipEntryDescriptor {
            is_directory: false,
            name,
            path: out_path,
        });
    }

    info!(
        archive = %archive_path.display(),
        entries = entries.len(),
        dir = %dir.path().display(),
        "Archive extracted"
    );
    Ok(ExtractedArchive { dir, entries })
}

/// Archive timestamps carry no zone; they are read as UTC.
fn archive_mtime(entry: &zip::read::ZipFile<'_>) -> Option<SystemTime> {
    entry.last_modified().to_time().ok().map(SystemTime::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn build_zip(path: &Path, dirs: &[&str], files: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let modified = zip::DateTime::from_date_and_time(2021, 6, 1, 12, 0, 0).unwrap();
        let options = FileOptions::default().last_modified_time(modified);
        for dir in dirs {
            zip.add_directory(*dir, options).unwrap();
        }
        for (name, content) in files {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[tokio::test]
    async fn extracts_files_and_directories() {
        let tmp = tempfile::TempDir::new().unwrap();
        let zip_path = tmp.path().join("backup.zip");
        build_zip(
            &zip_path,
            &["photos/"],
            &[("vehicles.json", "[]"), ("nested/deep/file.txt", "x")],
        );

        let extracted = extract(&zip_path).await.unwrap();
        assert_eq!(extracted.entries().len(), 3);
        assert!(extracted.entries()[0].is_directory);
        assert_eq!(extracted.entries()[0].name, "photos");

        let vehicles = extracted.find("vehicles.json").unwrap();
        assert_eq!(vehicles.read_to_end().await.unwrap(), b"[]");
        // Parent directories are created even without an explicit entry.
        assert!(extracted.find("nested/deep/file.txt").unwrap().path.exists());
    }

    #[tokio::test]
    async fn restores_modification_time() {
        let tmp = tempfile::TempDir::new().unwrap();
        let zip_path = tmp.path().join("backup.zip");
        build_zip(&zip_path, &[], &[("a.txt", "a")]);

        let extracted = extract(&zip_path).await.unwrap();
        let modified = std::fs::metadata(&extracted.find("a.txt").unwrap().path)
            .unwrap()
            .modified()
            .unwrap();
        let expected = SystemTime::from(time::macros::datetime!(2021-06-01 12:00:00 UTC));
        assert_eq!(modified, expected);
    }

    #[tokio::test]
    async fn scope_drop_removes_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        let zip_path = tmp.path().join("backup.zip");
        build_zip(&zip_path, &[], &[("a.txt", "a")]);

        let extracted = extract(&zip_path).await.unwrap();
        let root = extracted.root().to_path_buf();
        assert!(root.exists());
        drop(extracted);
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn corrupt_archive_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let zip_path = tmp.path().join("bad.zip");
        std::fs::write(&zip_path, "definitely not a zip").unwrap();

        let err = extract(&zip_path).await.unwrap_err();
        assert!(err.cause.contains("Failed to read ZIP archive"));
    }

    #[tokio::test]
    async fn directory_descriptors_cannot_be_opened() {
        let tmp = tempfile::TempDir::new().unwrap();
        let zip_path = tmp.path().join("backup.zip");
        build_zip(&zip_path, &["photos/"], &[]);

        let extracted = extract(&zip_path).await.unwrap();
        assert!(extracted.entries()[0].open().await.is_err());
        assert!(extracted.find("photos").is_none());
    }
}
