//! Payload compression.
//!
//! Objects are compressed according to their namespace's [`Codec`] before
//! upload and decompressed incrementally on download. Sources are read in
//! fixed-size chunks so only the compressed output is held in memory.

use crate::hash::READ_CHUNK_SIZE;
use crate::item::ItemSource;
use crate::namespace::Codec;
use async_compression::tokio::bufread::ZlibDecoder;
use async_compression::tokio::write::ZlibEncoder;
use bytes::Bytes;
use std::path::Path;
use std::pin::Pin;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt, AsyncWriteExt};

/// File extensions whose content is already compressed.
const ALREADY_COMPRESSED: &[&str] = &[
    "7z", "avi", "cur", "gif", "h264", "jar", "jpeg", "jpg", "pdf", "png", "wav", "zip",
];

/// Manifest-like, highly redundant formats.
const MANIFEST_LIKE: &[&str] = &["isolated", "json"];

/// zlib compression effort, 1 (fastest) to 9 (most).
///
/// zlib's level 0 (stored blocks) is not offered: the encoder raises it to 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct CompressionLevel(u32);

impl CompressionLevel {
    pub const FASTEST: Self = Self(1);
    pub const DEFAULT: Self = Self(7);
    pub const MAX: Self = Self(9);

    /// Create a level, clamping to the valid range.
    pub fn new(level: u32) -> Self {
        Self(level.clamp(Self::FASTEST.0, Self::MAX.0))
    }

    pub fn value(self) -> u32 {
        self.0
    }

    fn to_async_level(self) -> async_compression::Level {
        async_compression::Level::Precise(self.0 as i32)
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Pick a compression level from an object's logical name.
///
/// Content without a name (generated bytes) gets the default level.
pub fn compression_level(name: Option<&Path>) -> CompressionLevel {
    let ext = name
        .and_then(|p| p.extension())
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some(ext) if ALREADY_COMPRESSED.contains(&ext) => CompressionLevel::FASTEST,
        Some(ext) if MANIFEST_LIKE.contains(&ext) => CompressionLevel::MAX,
        _ => CompressionLevel::DEFAULT,
    }
}

/// Streaming compressor that accepts uncompressed data chunk by chunk.
///
/// Output is collected in memory: the upload path needs the compressed size
/// before it can choose between direct store and blobstore.
pub struct StreamingCompressor {
    inner: StreamingCompressorInner,
    bytes_in: u64,
}

enum StreamingCompressorInner {
    Identity(Vec<u8>),
    Deflate(ZlibEncoder<Vec<u8>>),
}

impl StreamingCompressor {
    /// Create a new streaming compressor for the codec.
    pub fn new(codec: Codec, level: CompressionLevel) -> Self {
        let inner = match codec {
            Codec::Identity => StreamingCompressorInner::Identity(Vec::new()),
            Codec::Deflate => StreamingCompressorInner::Deflate(ZlibEncoder::with_quality(
                Vec::new(),
                level.to_async_level(),
            )),
        };
        Self { inner, bytes_in: 0 }
    }

    /// Write a chunk of uncompressed data.
    pub async fn write_chunk(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.bytes_in += data.len() as u64;
        match &mut self.inner {
            StreamingCompressorInner::Identity(buf) => buf.extend_from_slice(data),
            StreamingCompressorInner::Deflate(encoder) => encoder.write_all(data).await?,
        }
        Ok(())
    }

    /// Number of uncompressed bytes written so far.
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Finalize the stream and return the compressed payload.
    pub async fn finish(self) -> std::io::Result<Bytes> {
        let out = match self.inner {
            StreamingCompressorInner::Identity(buf) => buf,
            StreamingCompressorInner::Deflate(mut encoder) => {
                encoder.shutdown().await?;
                encoder.into_inner()
            }
        };
        Ok(Bytes::from(out))
    }
}

/// Compress everything a reader produces.
pub async fn compress_reader<R>(
    reader: &mut R,
    codec: Codec,
    level: CompressionLevel,
) -> std::io::Result<Bytes>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut compressor = StreamingCompressor::new(codec, level);
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        compressor.write_chunk(&buf[..n]).await?;
    }
    compressor.finish().await
}

/// Compress an item's source.
pub async fn compress_source(
    source: &ItemSource,
    codec: Codec,
    level: CompressionLevel,
) -> std::io::Result<Bytes> {
    match source {
        ItemSource::Path(path) => {
            let mut file = tokio::fs::File::open(path).await?;
            compress_reader(&mut file, codec, level).await
        }
        ItemSource::Bytes(data) => {
            let mut reader: &[u8] = data;
            compress_reader(&mut reader, codec, level).await
        }
    }
}

/// A boxed reader over decompressed bytes.
pub type DecompressedReader = Pin<Box<dyn AsyncRead + Send>>;

/// Wrap a reader of compressed bytes so that reading yields the original data.
pub fn decompress_reader<R>(codec: Codec, reader: R) -> DecompressedReader
where
    R: AsyncBufRead + Send + 'static,
{
    match codec {
        Codec::Identity => Box::pin(reader),
        Codec::Deflate => Box::pin(ZlibDecoder::new(reader)),
    }
}
