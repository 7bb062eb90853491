//! Slot coordinates and ternary-tree math.
//!
//! The placement tree is a fixed-shape ternary tree, seven levels deep.
//! Level 0 holds the single root slot; level `l` holds `3^l` slots with
//! 1-based indices. All parent/child/descendant relationships are pure
//! arithmetic on `(level, idx)`, so the tree needs no stored edges.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Deepest level of the placement tree (levels run 0..=6).
pub const MAX_LEVEL: u8 = 6;

/// Children per slot.
pub const SLOT_FANOUT: u32 = 3;

/// Occupiable slots in one full structure: the six levels below a root,
/// 3 + 9 + 27 + 81 + 243 + 729.
pub const STRUCTURE_CAPACITY: u32 = 1092;

/// A position in the placement tree, addressed by level and 1-based index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Slot {
    /// Tree level, 0 (root) through [`MAX_LEVEL`].
    pub level: u8,
    /// 1-based index within the level, 1..=3^level.
    pub idx: u32,
}

impl Slot {
    /// Create a Slot from a level and index.
    pub fn new(level: u8, idx: u32) -> Self {
        Slot { level, idx }
    }

    /// The global root slot `(0, 1)`.
    pub fn root() -> Self {
        Slot { level: 0, idx: 1 }
    }

    /// Returns true if this is the global root.
    pub fn is_root(&self) -> bool {
        self.level == 0
    }

    /// Returns true if the coordinates name a real slot.
    pub fn is_valid(&self) -> bool {
        self.level <= MAX_LEVEL && self.idx >= 1 && self.idx <= SLOT_FANOUT.pow(self.level as u32)
    }

    /// Parent slot, or `None` for the root.
    pub fn parent(&self) -> Option<Slot> {
        if self.level == 0 {
            return None;
        }
        Some(Slot {
            level: self.level - 1,
            idx: (self.idx - 1) / SLOT_FANOUT + 1,
        })
    }

    /// The three direct children, or `None` at the deepest level.
    pub fn children(&self) -> Option<[Slot; 3]> {
        if self.level >= MAX_LEVEL {
            return None;
        }
        let base = (self.idx - 1) * SLOT_FANOUT;
        Some([
            Slot::new(self.level + 1, base + 1),
            Slot::new(self.level + 1, base + 2),
            Slot::new(self.level + 1, base + 3),
        ])
    }

    /// Inclusive index range of this slot's descendants `depth` levels down,
    /// or `None` when that depth falls below the tree.
    ///
    /// The range is contiguous because children of adjacent slots are
    /// adjacent, which keeps per-level occupancy lookups to a single scan.
    pub fn descendant_range(&self, depth: u8) -> Option<(u8, u32, u32)> {
        if depth == 0 || self.level + depth > MAX_LEVEL {
            return None;
        }
        let span = SLOT_FANOUT.pow(depth as u32);
        let lo = (self.idx - 1) * span + 1;
        let hi = self.idx * span;
        Some((self.level + depth, lo, hi))
    }

    /// Walk from this slot up to the root, excluding this slot itself.
    pub fn ancestors(&self) -> Vec<Slot> {
        let mut out = Vec::with_capacity(self.level as usize);
        let mut cur = *self;
        while let Some(parent) = cur.parent() {
            out.push(parent);
            cur = parent;
        }
        out
    }

    /// Returns true if `other` sits strictly inside this slot's subtree.
    pub fn contains(&self, other: &Slot) -> bool {
        if other.level <= self.level {
            return false;
        }
        let depth = other.level - self.level;
        match self.descendant_range(depth) {
            Some((_, lo, hi)) => other.idx >= lo && other.idx <= hi,
            None => false,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}:{}", self.level, self.idx)
    }
}
