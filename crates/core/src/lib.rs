//! Core domain types for the isolate content-addressed store client.
//!
//! This crate defines the data model shared by the client and CLI:
//! - Content identifiers and streaming hashing
//! - Items, their sizes and sources
//! - Namespaces and their payload codec
//! - Streaming compression and decompression
//! - Partitioning of candidates into existence-query batches
//! - Client configuration

pub mod batch;
pub mod compression;
pub mod config;
pub mod error;
pub mod hash;
pub mod item;
pub mod namespace;

pub use batch::{Batch, BatchEntry, partition};
pub use compression::{CompressionLevel, StreamingCompressor, compression_level};
pub use config::{BatchConfig, ClientConfig, DownloadConfig, RetryConfig};
pub use error::{Error, Result};
pub use hash::{ContentHasher, ContentId};
pub use item::{Item, ItemSet, ItemSize, ItemSource, UNKNOWN_SIZE};
pub use namespace::{Codec, Namespace};
