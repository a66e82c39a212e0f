//! The ordered item sequence of one batch run.

use parcel_protocol::Item;

/// Items of one batch with their total size, frozen when the batch is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    items: Vec<Item>,
    total_size: u64,
}

impl Batch {
    pub fn new(items: Vec<Item>) -> Self {
        let total_size = items.iter().map(|item| item.size).sum();
        Self { items, total_size }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn get(&self, index: usize) -> Option<&Item> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Sum of the sizes of the items before `index`.
    pub fn bytes_before(&self, index: usize) -> u64 {
        self.items
            .iter()
            .take(index)
            .map(|item| item.size)
            .sum()
    }

    /// Records the remote identifier of a completed item.
    pub(crate) fn assign_remote_id(&mut self, index: usize, remote_id: String) {
        if let Some(item) = self.items.get_mut(index) {
            item.remote_id = Some(remote_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sized(name: &str, size: usize) -> Item {
        Item::inline(name, vec![0; size])
    }

    #[test]
    fn total_size_is_sum_of_items() {
        let batch = Batch::new(vec![sized("a", 10), sized("b", 20), sized("c", 30)]);
        assert_eq!(batch.total_size(), 60);
        assert_eq!(batch.len(), 3);
        assert!(!batch.is_empty());
    }

    #[test]
    fn bytes_before_index() {
        let batch = Batch::new(vec![sized("a", 10), sized("b", 20), sized("c", 30)]);
        assert_eq!(batch.bytes_before(0), 0);
        assert_eq!(batch.bytes_before(1), 10);
        assert_eq!(batch.bytes_before(3), 60);
        assert_eq!(batch.bytes_before(10), 60);
    }

    #[test]
    fn empty_batch() {
        let batch = Batch::default();
        assert!(batch.is_empty());
        assert_eq!(batch.total_size(), 0);
        assert!(batch.get(0).is_none());
    }

    #[test]
    fn assign_remote_id_sets_item() {
        let mut batch = Batch::new(vec![sized("a", 1)]);
        batch.assign_remote_id(0, "r-1".into());
        batch.assign_remote_id(5, "ignored".into());
        assert_eq!(batch.items()[0].remote_id.as_deref(), Some("r-1"));
    }
}
