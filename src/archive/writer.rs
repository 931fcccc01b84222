use super::encoder::ZipEncoder;
use crate::errors::ZipError;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use time::OffsetDateTime;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Default number of compressed chunks buffered ahead of the consumer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4;

pub type ByteStream = BoxStream<'static, io::Result<Vec<u8>>>;

/// One file to be written into an archive.
pub struct ArchiveEntry {
    pub path: String,
    pub data: ByteStream,
}

impl ArchiveEntry {
    pub fn new<S>(path: impl Into<String>, data: S) -> Self
    where
        S: Stream<Item = io::Result<Vec<u8>>> + Send + 'static,
    {
        Self {
            path: path.into(),
            data: data.boxed(),
        }
    }

    /// An entry whose content is already in memory.
    pub fn from_bytes(path: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::new(path, stream::once(async move { Ok(bytes) }))
    }
}

type OutputChunk = Result<Vec<u8>, ZipError>;

/// Compressed archive bytes, produced while the consumer reads them.
///
/// Dropping the stream stops the producer task.
pub struct ArchiveStream {
    rx: mpsc::Receiver<OutputChunk>,
    task: JoinHandle<()>,
}

impl ArchiveStream {
    /// Drains the archive into `writer` and returns the number of bytes written.
    pub async fn write_to<W>(mut self, writer: &mut W) -> Result<u64, ZipError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written = 0u64;
        while let Some(chunk) = self.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(written)
    }
}

impl Stream for ArchiveStream {
    type Item = OutputChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for ArchiveStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Streams `entries` into a deflate-compressed zip archive.
pub fn stream_archive<S>(entries: S) -> ArchiveStream
where
    S: Stream<Item = Result<ArchiveEntry, ZipError>> + Send + 'static,
{
    stream_archive_with_capacity(entries, DEFAULT_CHANNEL_CAPACITY)
}

/// Like [`stream_archive`], with an explicit bound on buffered output chunks.
///
/// Entries are written one at a time in the order the stream yields them.
/// The output ends after the last entry is drained and the central directory
/// is written; any failure ends it with a single `Err`.
pub fn stream_archive_with_capacity<S>(entries: S, capacity: usize) -> ArchiveStream
where
    S: Stream<Item = Result<ArchiveEntry, ZipError>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(async move {
        let entries = Box::pin(entries);
        if let Err(e) = produce(entries, &tx).await {
            debug!(error = %e, "Archive producer stopped");
            let _ = tx.send(Err(e)).await;
        }
    });
    ArchiveStream { rx, task }
}

async fn produce<S>(mut entries: Pin<Box<S>>, tx: &mpsc::Sender<OutputChunk>) -> Result<(), ZipError>
where
    S: Stream<Item = Result<ArchiveEntry, ZipError>>,
{
    let mut encoder = ZipEncoder::new(OffsetDateTime::now_utc());
    let mut entry_count = 0usize;
    let mut total_bytes = 0u64;

    while let Some(entry) = entries.next().await {
        let mut entry = entry?;
        emit(tx, encoder.start_entry(&entry.path)?).await?;

        while let Some(chunk) = entry.data.next().await {
            let chunk = chunk
                .map_err(|e| ZipError::new(format!("failed to read {}: {e}", entry.path)))?;
            total_bytes += chunk.len() as u64;
            emit(tx, encoder.write(&chunk)?).await?;
        }

        emit(tx, encoder.finish_entry()?).await?;
        entry_count += 1;
        debug!(path = %entry.path, "Archive entry written");
    }

    emit(tx, encoder.finish()?).await?;
    info!(
        entries = entry_count,
        uncompressed_bytes = total_bytes,
        "Archive completed"
    );
    Ok(())
}

async fn emit(tx: &mpsc::Sender<OutputChunk>, bytes: Vec<u8>) -> Result<(), ZipError> {
    if bytes.is_empty() {
        return Ok(());
    }
    tx.send(Ok(bytes))
        .await
        .map_err(|_| ZipError::new("archive consumer went away"))
}
