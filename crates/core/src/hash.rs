//! Content identifiers and streaming hashing.

use sha1::{Digest, Sha1};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Length of a content identifier in bytes (SHA-1).
pub const CONTENT_ID_LEN: usize = 20;

/// Read buffer used when hashing or compressing a source.
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

/// A SHA-1 digest of an object's uncompressed bytes.
///
/// Identical content always yields the same identifier. The canonical text
/// form is 40 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentId([u8; CONTENT_ID_LEN]);

impl ContentId {
    /// Create a new ContentId from raw bytes.
    pub fn from_bytes(bytes: [u8; CONTENT_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Get the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; CONTENT_ID_LEN] {
        &self.0
    }

    /// Compute the identifier of an in-memory buffer.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Create an incremental hasher.
    pub fn hasher() -> ContentHasher {
        ContentHasher(Sha1::new())
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != CONTENT_ID_LEN * 2 {
            return Err(crate::Error::InvalidHash(format!(
                "expected {} hex chars, got {}",
                CONTENT_ID_LEN * 2,
                s.len()
            )));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(crate::Error::InvalidHash(format!("{s}: not hex")));
        }
        let mut bytes = [0u8; CONTENT_ID_LEN];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex_str =
                std::str::from_utf8(chunk).map_err(|e| crate::Error::InvalidHash(e.to_string()))?;
            bytes[i] = u8::from_str_radix(hex_str, 16)
                .map_err(|e| crate::Error::InvalidHash(format!("{s}: {e}")))?;
        }
        Ok(Self(bytes))
    }

    /// Encode as lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl FromStr for ContentId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Incremental SHA-1 hasher.
#[derive(Clone)]
pub struct ContentHasher(Sha1);

impl ContentHasher {
    /// Update the hasher with data.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finalize and return the identifier.
    pub fn finalize(self) -> ContentId {
        ContentId(self.0.finalize().into())
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        ContentId::hasher()
    }
}

/// Hash a reader in fixed-size chunks, returning the identifier and the
/// number of bytes consumed.
pub async fn identify_reader<R>(reader: &mut R) -> std::io::Result<(ContentId, u64)>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut hasher = ContentId::hasher();
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hasher.finalize(), total))
}

/// Hash a file without loading it into memory.
pub async fn identify_file(path: &Path) -> std::io::Result<(ContentId, u64)> {
    let mut file = tokio::fs::File::open(path).await?;
    identify_reader(&mut file).await
}
