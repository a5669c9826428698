//! Partitioning of candidate items into existence-query batches.

use crate::config::BatchConfig;
use crate::hash::ContentId;
use crate::item::ItemSize;

/// One `(identifier, size)` pair of a batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchEntry {
    pub id: ContentId,
    pub size: u64,
}

/// An ordered, bounded group of items queried together.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Batch {
    entries: Vec<BatchEntry>,
    total_bytes: u64,
}

impl Batch {
    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the uncompressed sizes in this batch.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn ids(&self) -> impl Iterator<Item = &ContentId> {
        self.entries.iter().map(|e| &e.id)
    }

    fn fits(&self, size: u64, limits: &BatchConfig) -> bool {
        self.entries.len() < limits.max_items
            && self.total_bytes.saturating_add(size) <= limits.max_bytes
    }

    fn push(&mut self, entry: BatchEntry) {
        self.total_bytes = self.total_bytes.saturating_add(entry.size);
        self.entries.push(entry);
    }
}

/// Partition items into batches, largest first.
///
/// Items of unknown size are skipped. The rest are sorted by size descending
/// (ties broken by identifier) and accumulated greedily until either the
/// item-count or byte budget would be exceeded. An item larger than the byte
/// budget travels alone. Every batch is non-empty and every sized item lands
/// in exactly one batch.
pub fn partition<'a, I>(items: I, limits: &BatchConfig) -> Vec<Batch>
where
    I: IntoIterator<Item = (&'a ContentId, ItemSize)>,
{
    let mut sized: Vec<BatchEntry> = items
        .into_iter()
        .filter_map(|(id, size)| size.known().map(|size| BatchEntry { id: *id, size }))
        .collect();
    sized.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.id.cmp(&b.id)));

    let mut batches = Vec::new();
    let mut current = Batch::default();
    for entry in sized {
        if !current.is_empty() && !current.fits(entry.size, limits) {
            batches.push(std::mem::take(&mut current));
        }
        current.push(entry);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashSet};

    fn id(name: &str) -> ContentId {
        ContentId::compute(name.as_bytes())
    }

    fn limits(max_items: usize, max_bytes: u64) -> BatchConfig {
        BatchConfig {
            max_items,
            max_bytes,
        }
    }

    #[test]
    fn test_single_batch_ordered_by_size() {
        let items: BTreeMap<ContentId, ItemSize> = [
            (id("foo"), ItemSize::Known(12)),
            (id("bar"), ItemSize::Unknown),
            (id("blow"), ItemSize::Known(0)),
            (id("bizz"), ItemSize::Known(1222)),
            (id("buzz"), ItemSize::Known(1223)),
        ]
        .into_iter()
        .collect();

        let batches = partition(items.iter().map(|(k, v)| (k, *v)), &BatchConfig::default());
        assert_eq!(batches.len(), 1);
        let got: Vec<_> = batches[0].entries().iter().map(|e| (e.id, e.size)).collect();
        assert_eq!(
            got,
            vec![
                (id("buzz"), 1223),
                (id("bizz"), 1222),
                (id("foo"), 12),
                (id("blow"), 0),
            ]
        );
        assert_eq!(batches[0].total_bytes(), 2457);
    }

    #[test]
    fn test_count_bound_splits_batches() {
        let items: Vec<(ContentId, ItemSize)> = (0..25u64)
            .map(|i| (id(&format!("item{i}")), ItemSize::Known(100 + i)))
            .collect();
        let batches = partition(items.iter().map(|(k, v)| (k, *v)), &limits(10, u64::MAX));
        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
    }

    #[test]
    fn test_byte_bound_splits_and_oversized_item_travels_alone() {
        let items = [
            (id("a"), ItemSize::Known(500)),
            (id("b"), ItemSize::Known(60)),
            (id("c"), ItemSize::Known(50)),
            (id("d"), ItemSize::Known(40)),
        ];
        let batches = partition(items.iter().map(|(k, v)| (k, *v)), &limits(100, 100));
        let got: Vec<Vec<u64>> = batches
            .iter()
            .map(|b| b.entries().iter().map(|e| e.size).collect())
            .collect();
        assert_eq!(got, vec![vec![500], vec![60], vec![50, 40]]);
    }

    #[test]
    fn test_partition_is_an_ordered_cover() {
        let items: Vec<(ContentId, ItemSize)> = (0..500u64)
            .map(|i| (id(&format!("x{i}")), ItemSize::Known((i * 7919) % 1000)))
            .collect();
        let batches = partition(items.iter().map(|(k, v)| (k, *v)), &limits(37, 4000));

        let flat: Vec<BatchEntry> = batches.iter().flat_map(|b| b.entries().to_vec()).collect();
        assert_eq!(flat.len(), items.len());
        let unique: HashSet<ContentId> = flat.iter().map(|e| e.id).collect();
        assert_eq!(unique.len(), items.len());
        assert!(flat.windows(2).all(|w| w[0].size >= w[1].size));
        for batch in &batches {
            assert!(!batch.is_empty());
            assert!(batch.len() <= 37);
            assert!(batch.total_bytes() <= 4000 || batch.len() == 1);
        }
    }

    #[test]
    fn test_equal_sizes_tie_break_by_id() {
        let mut ids = [id("p"), id("q"), id("r")];
        let items: Vec<(ContentId, ItemSize)> =
            ids.iter().map(|i| (*i, ItemSize::Known(5))).collect();
        let batches = partition(items.iter().map(|(k, v)| (k, *v)), &BatchConfig::default());
        ids.sort();
        let got: Vec<ContentId> = batches[0].ids().copied().collect();
        assert_eq!(got, ids.to_vec());
    }

    #[test]
    fn test_empty_input() {
        let items: Vec<(ContentId, ItemSize)> = Vec::new();
        assert!(partition(items.iter().map(|(k, v)| (k, *v)), &BatchConfig::default()).is_empty());
    }
}
