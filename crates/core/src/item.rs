//! Items to synchronize with the store.

use crate::hash::ContentId;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Uncompressed size of an item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ItemSize {
    /// Size known in advance.
    Known(u64),
    /// Size not known until the content is produced (generated content).
    Unknown,
}

/// Sentinel for items whose size is not known in advance.
pub const UNKNOWN_SIZE: ItemSize = ItemSize::Unknown;

impl ItemSize {
    /// The known size, if any.
    pub fn known(self) -> Option<u64> {
        match self {
            Self::Known(size) => Some(size),
            Self::Unknown => None,
        }
    }

    /// Whether this is a known size of exactly zero bytes.
    pub fn is_empty(self) -> bool {
        self == Self::Known(0)
    }
}

impl From<u64> for ItemSize {
    fn from(size: u64) -> Self {
        Self::Known(size)
    }
}

impl fmt::Display for ItemSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(size) => write!(f, "{size}"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// Where an item's uncompressed bytes come from.
#[derive(Clone)]
pub enum ItemSource {
    /// A file on the local filesystem.
    Path(PathBuf),
    /// Bytes already held in memory.
    Bytes(Bytes),
}

impl ItemSource {
    /// Logical name used to pick a compression level.
    pub fn name(&self) -> Option<&Path> {
        match self {
            Self::Path(path) => Some(path),
            Self::Bytes(_) => None,
        }
    }
}

impl fmt::Debug for ItemSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Bytes(data) => write!(f, "Bytes({} bytes)", data.len()),
        }
    }
}

/// An object to synchronize, keyed by its content identifier.
#[derive(Clone, Debug)]
pub struct Item {
    /// Digest of the uncompressed content.
    pub id: ContentId,
    /// Uncompressed size.
    pub size: ItemSize,
    /// Content source.
    pub source: ItemSource,
}

impl Item {
    /// Create an item backed by a local file.
    pub fn from_path(id: ContentId, size: ItemSize, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            size,
            source: ItemSource::Path(path.into()),
        }
    }

    /// Create an item from in-memory bytes, computing its identifier.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            id: ContentId::compute(&data),
            size: ItemSize::Known(data.len() as u64),
            source: ItemSource::Bytes(data),
        }
    }

    /// Hash a local file and build an item for it.
    pub async fn from_file(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let (id, size) = crate::hash::identify_file(&path).await?;
        Ok(Self::from_path(id, ItemSize::Known(size), path))
    }
}

/// Candidate items keyed by identifier; duplicate content collapses.
pub type ItemSet = BTreeMap<ContentId, Item>;

/// Build an item set, keeping the first item seen for each identifier.
pub fn collect_items(items: impl IntoIterator<Item = Item>) -> ItemSet {
    let mut set = ItemSet::new();
    for item in items {
        set.entry(item.id).or_insert(item);
    }
    set
}
