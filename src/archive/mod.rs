//! Zip archive streaming in both directions.
//!
//! - [`stream_archive`] turns a stream of entries into compressed archive
//!   bytes without buffering the whole archive.
//! - [`extract`] unpacks an archive into a temporary directory that lives as
//!   long as the returned [`ExtractedArchive`].

mod encoder;
mod reader;
mod writer;

pub use reader::{extract, extract_with_prefix, ExtractedArchive, ZipEntryDescriptor};
pub use writer::{
    stream_archive, stream_archive_with_capacity, ArchiveEntry, ArchiveStream, ByteStream,
    DEFAULT_CHANNEL_CAPACITY,
};
