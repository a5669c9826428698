//! Client for the isolate content-addressed store.
//!
//! - [`IsolateClient`] speaks the store's HTTP protocol over a pluggable
//!   [`Transport`].
//! - [`filter_missing`] batches existence queries.
//! - [`TransferQueue`] runs uploads and downloads on a bounded, priority
//!   ordered worker pool.
//! - [`archive`] and [`download_all`] tie these together.

pub mod client;
pub mod download;
pub mod error;
pub mod existence;
pub mod multipart;
pub mod queue;
pub mod retry;
pub mod transport;
pub mod upload;

pub use client::{IsolateClient, SessionToken};
pub use download::{
    DownloadOperation, DownloadSummary, FileSink, ObjectSink, download, download_all,
};
pub use error::{ClientError, ClientResult, TransportError};
pub use existence::{MissingItems, check_presence, filter_missing, find_missing};
pub use queue::{Operation, Priority, TransferQueue};
pub use retry::{RetryOn, send_with_retry};
pub use transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};
pub use upload::{UploadOperation, UploadPath, UploadSummary, archive, upload_missing};

pub use reqwest::Url;
