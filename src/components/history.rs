use std::collections::VecDeque;

use crate::canvas::MaskLayer;

pub const DEFAULT_MAX_UNDO_STEPS: usize = 20;

// ============================================================================
// HISTORY STACK - bounded undo/redo over whole-layer snapshots
// ============================================================================

/// Linear undo/redo over `MaskLayer` snapshots.
///
/// Snapshots are cheap clones: chunks are shared with the live layer until
/// one side writes to them. Both stacks are bounded to `max_depth`; overflow
/// evicts the oldest entry. Any new snapshot invalidates redo.
pub struct HistoryStack {
    undo_stack: VecDeque<MaskLayer>,
    redo_stack: VecDeque<MaskLayer>,
    max_depth: usize,
}

impl Default for HistoryStack {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_UNDO_STEPS)
    }
}

impl HistoryStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_depth: max_depth.max(1),
        }
    }

    /// Record `current` before it is mutated.
    pub fn snapshot(&mut self, current: &MaskLayer) {
        self.redo_stack.clear();
        self.undo_stack.push_back(current.clone());
        Self::prune(&mut self.undo_stack, self.max_depth);
    }

    /// Restore the most recent snapshot into `current`. False when empty.
    pub fn undo(&mut self, current: &mut MaskLayer) -> bool {
        let Some(previous) = self.undo_stack.pop_back() else {
            return false;
        };
        let replaced = std::mem::replace(current, previous);
        self.redo_stack.push_back(replaced);
        Self::prune(&mut self.redo_stack, self.max_depth);
        true
    }

    /// Re-apply the most recently undone state into `current`. False when empty.
    pub fn redo(&mut self, current: &mut MaskLayer) -> bool {
        let Some(next) = self.redo_stack.pop_back() else {
            return false;
        };
        let replaced = std::mem::replace(current, next);
        self.undo_stack.push_back(replaced);
        Self::prune(&mut self.undo_stack, self.max_depth);
        true
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Bytes held exclusively by history snapshots.
    pub fn memory_usage(&self) -> usize {
        self.undo_stack
            .iter()
            .chain(self.redo_stack.iter())
            .map(MaskLayer::memory_bytes)
            .sum()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    fn prune(stack: &mut VecDeque<MaskLayer>, max_depth: usize) {
        while stack.len() > max_depth {
            stack.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn marked(size: u32, n: u32) -> MaskLayer {
        let mut layer = MaskLayer::new(size, size);
        layer.put_pixel(n % size, n / size, Rgba([255, 0, 0, 50]));
        layer
    }

    #[test]
    fn undo_restores_exact_pre_mutation_state() {
        let mut history = HistoryStack::default();
        let mut mask = marked(32, 3);
        let before = mask.clone();

        history.snapshot(&mask);
        mask.put_pixel(10, 10, Rgba([255, 0, 0, 50]));
        assert_ne!(mask, before);

        assert!(history.undo(&mut mask));
        assert_eq!(mask, before);
    }

    #[test]
    fn redo_restores_exact_pre_undo_state() {
        let mut history = HistoryStack::default();
        let mut mask = MaskLayer::new(16, 16);
        history.snapshot(&mask);
        mask.fill(Rgba([0, 0, 255, 50]));
        let edited = mask.clone();

        assert!(history.undo(&mut mask));
        assert!(history.can_redo());
        assert!(history.redo(&mut mask));
        assert_eq!(mask, edited);
        assert!(!history.can_redo());
    }

    #[test]
    fn empty_stacks_report_failure() {
        let mut history = HistoryStack::default();
        let mut mask = MaskLayer::new(4, 4);
        assert!(!history.undo(&mut mask));
        assert!(!history.redo(&mut mask));
    }

    #[test]
    fn depth_bound_evicts_oldest_first() {
        let mut history = HistoryStack::new(20);
        let mut mask = MaskLayer::new(8, 8);
        for i in 0..25 {
            mask = marked(8, i);
            history.snapshot(&mask);
        }
        assert_eq!(history.undo_len(), 20);

        // The newest surviving snapshot is #24, the oldest is #5.
        let mut restored = 0;
        let mut last = mask.clone();
        while history.undo(&mut mask) {
            restored += 1;
            last = mask.clone();
        }
        assert_eq!(restored, 20);
        assert_eq!(last, marked(8, 5));
    }

    #[test]
    fn new_snapshot_clears_redo() {
        let mut history = HistoryStack::default();
        let mut mask = MaskLayer::new(8, 8);
        history.snapshot(&mask);
        mask.put_pixel(1, 1, Rgba([1, 1, 1, 255]));
        history.undo(&mut mask);
        assert!(history.can_redo());
        history.snapshot(&mask);
        assert!(!history.can_redo());
    }

    #[test]
    fn snapshots_share_untouched_chunks() {
        let mut history = HistoryStack::default();
        let mut mask = MaskLayer::new(256, 256);
        mask.fill(Rgba([255, 0, 0, 50]));
        history.snapshot(&mask);
        // Fully shared: the snapshot owns nothing exclusively.
        assert_eq!(history.memory_usage(), 0);
        mask.put_pixel(0, 0, Rgba([0, 0, 0, 0]));
        // One chunk diverged, the snapshot now owns its old copy.
        assert_eq!(history.memory_usage(), 64 * 64 * 4);
    }
}
