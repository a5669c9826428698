//! Download of objects by identifier.

use crate::client::IsolateClient;
use crate::error::{ClientError, ClientResult};
use crate::queue::{Operation, Priority, TransferQueue};
use async_trait::async_trait;
use isolate_core::compression::decompress_reader;
use isolate_core::{ContentHasher, ContentId, ItemSize};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tokio_util::io::StreamReader;

/// Receives the decompressed content of downloaded objects.
#[async_trait]
pub trait ObjectSink: Send + Sync {
    /// Consume `reader` to its end and store it at `destination`.
    ///
    /// Returns the number of bytes written.
    async fn write(
        &self,
        id: &ContentId,
        destination: &Path,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> io::Result<u64>;

    /// Drop what was written for `destination` after a failed or unverified
    /// write.
    async fn discard(&self, _destination: &Path) -> io::Result<()> {
        Ok(())
    }
}

/// Writes objects as files under a target directory.
#[derive(Clone, Debug)]
pub struct FileSink {
    target: PathBuf,
}

impl FileSink {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    fn resolve(&self, destination: &Path) -> io::Result<PathBuf> {
        let escapes = destination
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || destination.as_os_str().is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "destination {} must be a relative path inside the target",
                    destination.display()
                ),
            ));
        }
        Ok(self.target.join(destination))
    }
}

#[async_trait]
impl ObjectSink for FileSink {
    async fn write(
        &self,
        _id: &ContentId,
        destination: &Path,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> io::Result<u64> {
        let path = self.resolve(destination)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&path).await?;
        let written = tokio::io::copy(reader, &mut file).await?;
        file.flush().await?;
        Ok(written)
    }

    async fn discard(&self, destination: &Path) -> io::Result<()> {
        match tokio::fs::remove_file(self.resolve(destination)?).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Hashes everything read through it.
struct HashingReader<R> {
    inner: R,
    hasher: ContentHasher,
}

impl<R> HashingReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: ContentHasher::default(),
        }
    }

    fn finalize(self) -> ContentId {
        self.hasher.finalize()
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for HashingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        this.hasher.update(&buf.filled()[before..]);
        Poll::Ready(Ok(()))
    }
}

/// Retrieve one object, decompress it into `sink` and verify its digest.
///
/// Returns the number of decompressed bytes written.
#[tracing::instrument(skip(client, sink), fields(id = %id, destination = %destination.display()))]
pub async fn download(
    client: &IsolateClient,
    sink: &dyn ObjectSink,
    id: &ContentId,
    destination: &Path,
) -> ClientResult<u64> {
    let response = client.retrieve(id).await?;
    let compressed = StreamReader::new(response.into_stream());
    let mut reader = HashingReader::new(decompress_reader(client.namespace().codec(), compressed));

    let written = match sink.write(id, destination, &mut reader).await {
        Ok(written) => written,
        Err(error) => {
            // Whatever was written before the failure is incomplete.
            if let Err(discard_error) = sink.discard(destination).await {
                tracing::warn!(error = %discard_error, "Failed to discard partial download");
            }
            return Err(error.into());
        }
    };
    let actual = reader.finalize();
    if actual != *id {
        sink.discard(destination).await?;
        return Err(ClientError::HashMismatch {
            expected: *id,
            actual,
        });
    }

    tracing::debug!(written, "Downloaded item");
    Ok(written)
}

/// Downloads queued objects into a sink.
pub struct DownloadOperation {
    client: Arc<IsolateClient>,
    sink: Arc<dyn ObjectSink>,
    bytes_written: AtomicU64,
}

impl DownloadOperation {
    pub fn new(client: Arc<IsolateClient>, sink: Arc<dyn ObjectSink>) -> Self {
        Self {
            client,
            sink,
            bytes_written: AtomicU64::new(0),
        }
    }

    /// Decompressed bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Operation for DownloadOperation {
    type Key = ContentId;
    type Destination = PathBuf;

    async fn run(&self, id: &ContentId, destination: PathBuf, _size: ItemSize) -> ClientResult<()> {
        let written = download(&self.client, self.sink.as_ref(), id, &destination).await?;
        self.bytes_written.fetch_add(written, Ordering::Relaxed);
        Ok(())
    }
}

/// Outcome of a download run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Identifiers fetched, sorted.
    pub completed: Vec<ContentId>,
    /// Decompressed bytes written.
    pub bytes_written: u64,
}

/// Download every `(id, destination)` pair through a [`TransferQueue`].
pub async fn download_all(
    client: Arc<IsolateClient>,
    sink: Arc<dyn ObjectSink>,
    files: impl IntoIterator<Item = (ContentId, PathBuf)>,
) -> ClientResult<DownloadSummary> {
    let workers = client.config().workers;
    let queue = TransferQueue::new(DownloadOperation::new(client, sink), workers);
    for (id, destination) in files {
        queue.add_item(Priority::Medium, id, destination, ItemSize::Unknown);
    }

    let completed = queue.join().await?;
    let summary = DownloadSummary {
        completed,
        bytes_written: queue.operation().bytes_written(),
    };
    tracing::info!(
        items = summary.completed.len(),
        bytes = summary.bytes_written,
        "Download complete"
    );
    Ok(summary)
}
