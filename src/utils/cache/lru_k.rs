use std::collections::{HashMap, VecDeque};

use crate::buffer::FrameId;
use crate::error::{ArborError, ArborResult};
use crate::utils::cache::Replacer;

#[derive(Debug)]
struct LruKNode {
    // Timestamps of the last k accesses, oldest first.
    history: VecDeque<u64>,
    is_evictable: bool,
}

impl LruKNode {
    fn new(k: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(k),
            is_evictable: false,
        }
    }

    fn record_access(&mut self, k: usize, timestamp: u64) {
        self.history.push_back(timestamp);
        if self.history.len() > k {
            self.history.pop_front();
        }
    }
}

/// LRU-K replacement: evict the evictable frame with the largest backward
/// k-distance. Frames with fewer than k recorded accesses have infinite
/// distance and are evicted first, oldest access first.
#[derive(Debug)]
pub struct LruKReplacer {
    current_size: usize,
    replacer_size: usize,
    k: usize,
    node_store: HashMap<FrameId, LruKNode>,
    current_timestamp: u64,
}

impl LruKReplacer {
    pub fn with_k(num_frames: usize, k: usize) -> Self {
        Self {
            current_size: 0,
            replacer_size: num_frames,
            k,
            node_store: HashMap::with_capacity(num_frames),
            current_timestamp: 0,
        }
    }
}

impl Replacer for LruKReplacer {
    fn new(capacity: usize) -> Self {
        Self::with_k(capacity, 2)
    }

    fn record_access(&mut self, frame_id: FrameId) -> ArborResult<()> {
        let timestamp = self.current_timestamp;
        self.current_timestamp += 1;
        if let Some(node) = self.node_store.get_mut(&frame_id) {
            node.record_access(self.k, timestamp);
        } else {
            if self.node_store.len() >= self.replacer_size {
                return Err(ArborError::Internal(
                    "replacer frame count exceeds the pool size".to_string(),
                ));
            }
            let mut node = LruKNode::new(self.k);
            node.record_access(self.k, timestamp);
            self.node_store.insert(frame_id, node);
        }
        Ok(())
    }

    fn evict(&mut self) -> Option<FrameId> {
        let mut victim: Option<(FrameId, bool, u64)> = None;
        for (&frame_id, node) in self.node_store.iter() {
            if !node.is_evictable {
                continue;
            }
            let Some(&oldest) = node.history.front() else {
                continue;
            };
            let infinite = node.history.len() < self.k;
            // Infinite k-distance wins over any finite one; ties on the
            // infinity class fall back to the oldest first access, finite
            // distances to the oldest kth-most-recent access. Both orders
            // reduce to "smallest oldest-timestamp wins within its class".
            let better = match victim {
                None => true,
                Some((_, v_inf, v_oldest)) => match (infinite, v_inf) {
                    (true, false) => true,
                    (false, true) => false,
                    _ => oldest < v_oldest,
                },
            };
            if better {
                victim = Some((frame_id, infinite, oldest));
            }
        }
        let (frame_id, _, _) = victim?;
        self.remove(frame_id);
        Some(frame_id)
    }

    fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) -> ArborResult<()> {
        let node = self
            .node_store
            .get_mut(&frame_id)
            .ok_or_else(|| ArborError::Internal(format!("frame {} not found", frame_id)))?;
        if evictable && !node.is_evictable {
            self.current_size += 1;
        } else if !evictable && node.is_evictable {
            self.current_size -= 1;
        }
        node.is_evictable = evictable;
        Ok(())
    }

    fn remove(&mut self, frame_id: FrameId) {
        if let Some(node) = self.node_store.remove(&frame_id) {
            debug_assert!(node.is_evictable, "removed frame must be evictable");
            if node.is_evictable {
                self.current_size -= 1;
            }
        }
    }

    fn size(&self) -> usize {
        self.current_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::cache::Replacer;

    #[test]
    fn set_evictable_tracks_size() {
        let mut replacer = LruKReplacer::with_k(3, 2);
        replacer.record_access(1).unwrap();
        replacer.set_evictable(1, true).unwrap();
        assert_eq!(replacer.size(), 1);
        replacer.set_evictable(1, false).unwrap();
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn evicts_largest_k_distance() {
        let mut replacer = LruKReplacer::with_k(2, 3);
        replacer.record_access(1).unwrap(); // ts=0
        replacer.record_access(2).unwrap(); // ts=1
        replacer.record_access(2).unwrap(); // ts=2
        replacer.record_access(1).unwrap(); // ts=3
        replacer.record_access(2).unwrap(); // ts=4
        replacer.set_evictable(1, true).unwrap();
        replacer.set_evictable(2, true).unwrap();
        // Frame 1 history [0, 3]; frame 2 history [1, 2, 4] truncated to
        // the last 3. Frame 1's kth-most-recent access is older.
        assert_eq!(replacer.evict(), Some(1));
    }

    #[test]
    fn infinite_distance_evicted_first_by_oldest_access() {
        let mut replacer = LruKReplacer::with_k(3, 3);
        replacer.record_access(1).unwrap(); // ts=0
        replacer.record_access(2).unwrap(); // ts=1
        replacer.record_access(3).unwrap(); // ts=2
        replacer.record_access(1).unwrap(); // ts=3
        replacer.record_access(1).unwrap(); // ts=4, frame 1 now has k accesses
        replacer.record_access(3).unwrap(); // ts=5
        replacer.set_evictable(1, true).unwrap();
        replacer.set_evictable(2, true).unwrap();
        replacer.set_evictable(3, true).unwrap();
        // Frames 2 and 3 have infinite distance; frame 2's first access is
        // older, so it goes first, then 3, then the finite-distance frame 1.
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(3));
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn pinned_frames_are_skipped() {
        let mut replacer = LruKReplacer::with_k(4, 2);
        for frame in 0..4 {
            replacer.record_access(frame).unwrap();
        }
        replacer.set_evictable(0, true).unwrap();
        replacer.set_evictable(2, true).unwrap();
        assert_eq!(replacer.evict(), Some(0));
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), None);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn record_access_rejects_overflow() {
        let mut replacer = LruKReplacer::with_k(1, 2);
        replacer.record_access(0).unwrap();
        assert!(replacer.record_access(1).is_err());
    }
}
