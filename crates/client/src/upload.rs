//! Upload of missing items.

use crate::client::IsolateClient;
use crate::error::ClientResult;
use crate::existence::find_missing;
use crate::queue::{Operation, Priority, TransferQueue};
use async_trait::async_trait;
use isolate_core::compression::compress_source;
use isolate_core::{ContentId, ItemSet, ItemSize, ItemSource, compression_level};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Which endpoint an upload went through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadPath {
    /// `content/store`, for small payloads.
    Direct,
    /// Generated blobstore URL, for large payloads.
    Blobstore,
}

/// Pick the upload endpoint for a compressed payload.
pub fn upload_path(compressed_len: u64, direct_upload_threshold: u64) -> UploadPath {
    if compressed_len < direct_upload_threshold {
        UploadPath::Direct
    } else {
        UploadPath::Blobstore
    }
}

/// Compresses an item's source and pushes it to the store.
pub struct UploadOperation {
    client: Arc<IsolateClient>,
    uploaded: AtomicU64,
    bytes_sent: AtomicU64,
}

impl UploadOperation {
    pub fn new(client: Arc<IsolateClient>) -> Self {
        Self {
            client,
            uploaded: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        }
    }

    /// Items uploaded so far.
    pub fn uploaded(&self) -> u64 {
        self.uploaded.load(Ordering::Relaxed)
    }

    /// Compressed bytes sent so far.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Operation for UploadOperation {
    type Key = ContentId;
    type Destination = ItemSource;

    #[tracing::instrument(skip(self, source), fields(id = %id, size = %size))]
    async fn run(&self, id: &ContentId, source: ItemSource, size: ItemSize) -> ClientResult<()> {
        let namespace = self.client.namespace();
        let level = compression_level(source.name());
        let payload = compress_source(&source, namespace.codec(), level).await?;
        let compressed = payload.len() as u64;

        let path = upload_path(compressed, self.client.config().direct_upload_threshold);
        match path {
            UploadPath::Direct => self.client.store(id, payload).await?,
            UploadPath::Blobstore => self.client.upload_to_blobstore(id, payload).await?,
        }

        self.uploaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(compressed, Ordering::Relaxed);
        tracing::debug!(compressed, path = ?path, level = level.value(), "Uploaded item");
        Ok(())
    }
}

/// Outcome of an archive run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploadSummary {
    /// Distinct items considered.
    pub candidates: usize,
    /// Items not queued: empty, of unknown size or already in the store.
    pub skipped: usize,
    /// Items uploaded.
    pub uploaded: u64,
    /// Compressed bytes sent.
    pub bytes_sent: u64,
}

/// Upload every item of `items` the server does not hold yet.
///
/// Uploads run on a [`TransferQueue`] of `workers` tasks at `priority`.
/// Items from batches whose existence check failed are not uploaded; the
/// other missing items still are. The call then fails with the existence
/// failure, or else the first failed upload.
pub async fn upload_missing(
    client: Arc<IsolateClient>,
    items: &ItemSet,
    priority: Priority,
) -> ClientResult<UploadSummary> {
    let missing = find_missing(&client, items).await;
    let workers = client.config().workers;
    let queue = TransferQueue::new(UploadOperation::new(client), workers);

    for (id, item) in missing.items.iter() {
        queue.add_item(priority, *id, item.source.clone(), item.size);
    }
    let uploads = queue.join().await;

    let summary = UploadSummary {
        candidates: items.len(),
        skipped: items.len() - missing.items.len(),
        uploaded: queue.operation().uploaded(),
        bytes_sent: queue.operation().bytes_sent(),
    };
    match (missing.failure, uploads) {
        (Some(error), uploads) => {
            if let Err(upload_error) = uploads {
                tracing::warn!(error = %upload_error, "Uploads also failed");
            }
            return Err(error);
        }
        (None, Err(error)) => return Err(error),
        (None, Ok(_)) => {}
    }

    tracing::info!(
        candidates = summary.candidates,
        skipped = summary.skipped,
        uploaded = summary.uploaded,
        bytes_sent = summary.bytes_sent,
        "Archive complete"
    );
    Ok(summary)
}

/// Upload missing items at medium priority.
pub async fn archive(client: Arc<IsolateClient>, items: &ItemSet) -> ClientResult<UploadSummary> {
    upload_missing(client, items, Priority::Medium).await
}
