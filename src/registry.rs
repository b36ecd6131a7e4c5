//! Label-to-slot registry and per-slot accumulators.
//!
//! Every distinct scope label owns one [`Anchor`]. Slots are handed out in
//! registration order from a monotonic counter and never move for the rest
//! of the session. Slot 0 is reserved for the root anchor.

use std::collections::HashMap;

use serde::Serialize;

use crate::constants::{ROOT_LABEL, ROOT_SLOT};

/// Accounting bucket for one scope label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Anchor {
    /// Scope label.
    pub label: String,
    /// Ticks spent in this scope, excluding nested child scopes.
    ///
    /// Updated with wrapping arithmetic: while a scope is still open, a child
    /// closing inside it has already subtracted its time, so the value only
    /// becomes meaningful once the scope itself closes.
    pub exclusive_ticks: u64,
    /// Ticks spent in this scope including children, summed over invocations.
    pub inclusive_ticks: u64,
    /// Number of completed invocations.
    pub hit_count: u64,
}

impl Anchor {
    fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    fn clear_counts(&mut self) {
        self.exclusive_ticks = 0;
        self.inclusive_ticks = 0;
        self.hit_count = 0;
    }
}

/// Fixed-capacity, append-only map from label to [`Anchor`] slot.
#[derive(Debug, Clone)]
pub struct AnchorRegistry {
    anchors: Vec<Anchor>,
    slots: HashMap<String, usize>,
    capacity: usize,
    overflow_count: u64,
}

impl AnchorRegistry {
    /// Registry holding up to `capacity` anchors, root included.
    ///
    /// A capacity of 0 is raised to 1 so the root slot always exists.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut registry = Self {
            anchors: Vec::with_capacity(capacity.min(1024)),
            slots: HashMap::new(),
            capacity,
            overflow_count: 0,
        };
        registry.seed_root();
        registry
    }

    fn seed_root(&mut self) {
        self.anchors.push(Anchor::new(ROOT_LABEL));
        self.slots.insert(ROOT_LABEL.to_string(), ROOT_SLOT);
    }

    /// Slot for `label`, registering it on first use.
    ///
    /// Once the registry is full, unknown labels resolve to the root slot so
    /// their time merges into the root bucket. The first such fallback in a
    /// session logs a warning.
    pub fn resolve(&mut self, label: &str) -> usize {
        if let Some(&slot) = self.slots.get(label) {
            return slot;
        }

        if self.anchors.len() >= self.capacity {
            if self.overflow_count == 0 {
                tracing::warn!(
                    capacity = self.capacity,
                    "Too many profile scopes, merging '{}' and later new labels into {}",
                    label,
                    ROOT_LABEL
                );
            }
            self.overflow_count += 1;
            return ROOT_SLOT;
        }

        let slot = self.anchors.len();
        self.anchors.push(Anchor::new(label));
        self.slots.insert(label.to_string(), slot);
        slot
    }

    /// Slot already assigned to `label`, without registering it.
    pub fn lookup(&self, label: &str) -> Option<usize> {
        self.slots.get(label).copied()
    }

    /// Anchor in `slot`.
    pub fn get(&self, slot: usize) -> Option<&Anchor> {
        self.anchors.get(slot)
    }

    pub(crate) fn get_mut(&mut self, slot: usize) -> Option<&mut Anchor> {
        self.anchors.get_mut(slot)
    }

    /// All registered anchors in slot order.
    pub fn anchors(&self) -> &[Anchor] {
        &self.anchors
    }

    /// Number of registered slots, root included.
    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    /// Always false: the root slot is registered at construction.
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// Maximum number of slots, root included.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of `resolve` calls that fell back to the root slot this session.
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    /// Prepare for a new session.
    ///
    /// Counts are always cleared. With `retain_labels`, registered labels keep
    /// their slots; otherwise the registry forgets everything but root.
    pub fn reset(&mut self, retain_labels: bool) {
        self.overflow_count = 0;
        if retain_labels {
            self.anchors.iter_mut().for_each(Anchor::clear_counts);
        } else {
            self.anchors.clear();
            self.slots.clear();
            self.seed_root();
        }
    }
}

impl Default for AnchorRegistry {
    fn default() -> Self {
        Self::with_capacity(crate::constants::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_preregistered() {
        let registry = AnchorRegistry::with_capacity(8);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(ROOT_SLOT).unwrap().label, "Root");
        assert_eq!(registry.lookup("Root"), Some(ROOT_SLOT));
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let mut registry = AnchorRegistry::with_capacity(8);
        let first = registry.resolve("parse");
        for _ in 0..100 {
            assert_eq!(registry.resolve("parse"), first);
        }
        assert_eq!(first, 1);
        assert_eq!(registry.resolve("sum"), 2);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_overflow_merges_into_root() {
        let mut registry = AnchorRegistry::with_capacity(3);
        assert_eq!(registry.resolve("a"), 1);
        assert_eq!(registry.resolve("b"), 2);
        assert_eq!(registry.resolve("c"), ROOT_SLOT);
        assert_eq!(registry.resolve("d"), ROOT_SLOT);
        assert_eq!(registry.overflow_count(), 2);
        // Known labels still resolve normally when full
        assert_eq!(registry.resolve("a"), 1);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_zero_capacity_keeps_root() {
        let mut registry = AnchorRegistry::with_capacity(0);
        assert_eq!(registry.capacity(), 1);
        assert_eq!(registry.resolve("anything"), ROOT_SLOT);
    }

    #[test]
    fn test_reset_forgets_labels() {
        let mut registry = AnchorRegistry::with_capacity(4);
        registry.resolve("a");
        registry.resolve("b");
        registry.get_mut(1).unwrap().hit_count = 3;
        registry.reset(false);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("a"), None);
        assert_eq!(registry.resolve("b"), 1);
    }

    #[test]
    fn test_reset_retaining_labels_keeps_slots() {
        let mut registry = AnchorRegistry::with_capacity(2);
        registry.resolve("a");
        registry.resolve("overflow");
        {
            let anchor = registry.get_mut(1).unwrap();
            anchor.hit_count = 3;
            anchor.exclusive_ticks = 10;
            anchor.inclusive_ticks = 10;
        }
        registry.reset(true);
        assert_eq!(registry.overflow_count(), 0);
        assert_eq!(registry.lookup("a"), Some(1));
        assert_eq!(registry.get(1).unwrap(), &Anchor::new("a"));
    }
}
