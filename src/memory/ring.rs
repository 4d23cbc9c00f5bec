//! Bounded rolling memory.
//!
//! [`RingMemory`] holds the last N items by insertion order; the oldest is
//! evicted on overflow. It is per-session state and not shared across
//! sessions.

use std::collections::VecDeque;

use tokio::sync::RwLock;

use crate::error::Result;

use super::MemoryItem;

/// Rolling memory of fixed capacity.
#[derive(Debug)]
pub struct RingMemory {
    capacity: usize,
    items: RwLock<VecDeque<MemoryItem>>,
}

impl RingMemory {
    /// Create a ring holding at most `capacity` items.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append an item, dropping the oldest at capacity.
    pub async fn store(&self, item: MemoryItem) -> Result<()> {
        let mut items = self.items.write().await;
        if self.capacity == 0 {
            return Ok(());
        }
        if items.len() == self.capacity {
            items.pop_front();
        }
        items.push_back(item);
        Ok(())
    }

    /// The last `min(k, len)` items in insertion order.
    pub async fn recall(&self, k: usize) -> Result<Vec<MemoryItem>> {
        let items = self.items.read().await;
        let skip = items.len().saturating_sub(k);
        Ok(items.iter().skip(skip).cloned().collect())
    }

    /// Current item count.
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    /// True when no items are stored.
    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Drop all items.
    pub async fn clear(&self) {
        self.items.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(n: usize) -> MemoryItem {
        MemoryItem::ok(format!("tool-{n}"), json!({"n": n}), json!({"out": n}))
    }

    #[tokio::test]
    async fn holds_last_capacity_items_in_order() {
        let ring = RingMemory::new(3);
        for n in 0..5 {
            ring.store(item(n)).await.unwrap();
        }

        assert_eq!(ring.len().await, 3);
        let items = ring.recall(10).await.unwrap();
        let tools: Vec<&str> = items.iter().map(|i| i.step.tool.as_str()).collect();
        assert_eq!(tools, vec!["tool-2", "tool-3", "tool-4"]);
    }

    #[tokio::test]
    async fn recall_returns_min_of_k_and_len() {
        let ring = RingMemory::new(8);
        for n in 0..4 {
            ring.store(item(n)).await.unwrap();
        }

        assert_eq!(ring.recall(2).await.unwrap().len(), 2);
        assert_eq!(ring.recall(4).await.unwrap().len(), 4);
        assert_eq!(ring.recall(100).await.unwrap().len(), 4);

        let last_two = ring.recall(2).await.unwrap();
        assert_eq!(last_two[0].step.tool, "tool-2");
        assert_eq!(last_two[1].step.tool, "tool-3");
    }

    #[tokio::test]
    async fn store_count_invariant() {
        // After K stores into capacity C, exactly min(K, C) items remain.
        for (capacity, stores) in [(4usize, 2usize), (4, 4), (4, 9), (1, 5)] {
            let ring = RingMemory::new(capacity);
            for n in 0..stores {
                ring.store(item(n)).await.unwrap();
            }
            assert_eq!(ring.len().await, stores.min(capacity));
        }
    }

    #[tokio::test]
    async fn zero_capacity_stores_nothing() {
        let ring = RingMemory::new(0);
        ring.store(item(1)).await.unwrap();
        assert!(ring.is_empty().await);
        assert!(ring.recall(5).await.unwrap().is_empty());
    }
}
