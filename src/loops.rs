//! Loop nest description
//!
//! The engine needs only the shape of the nest (depths, ancestry) and
//! iteration counts. Hosts register loops outermost-first, so a loop's
//! raw id is always larger than its ancestors' ids; several other
//! modules rely on that ordering.

use serde::Serialize;

/// Stable identifier of a loop within a [`LoopNest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LoopId(pub u32);

/// How many times a loop body runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripCount {
    /// Known exact number of iterations.
    Exact(u64),
    /// Upper bound on the iteration count. Only a `sound` bound may be
    /// used to prove independence; profile-derived estimates must leave
    /// `sound` false.
    Estimate { max: u64, sound: bool },
    /// Nothing known.
    Unknown,
}

/// One loop of the nest.
#[derive(Debug, Clone)]
pub struct LoopInfo {
    pub id: LoopId,
    /// 0 for a root loop, parent depth + 1 otherwise.
    pub depth: u32,
    pub outer: Option<LoopId>,
    pub trip_count: TripCount,
}

/// The loop nest under analysis.
#[derive(Debug, Clone, Default)]
pub struct LoopNest {
    loops: Vec<LoopInfo>,
}

impl LoopNest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an outermost loop.
    pub fn add_root(&mut self, trip_count: TripCount) -> LoopId {
        let id = LoopId(self.loops.len() as u32);
        self.loops.push(LoopInfo { id, depth: 0, outer: None, trip_count });
        id
    }

    /// Registers a loop immediately inside `outer`. Inner loops must be
    /// added after their ancestors.
    pub fn add_inner(&mut self, outer: LoopId, trip_count: TripCount) -> LoopId {
        debug_assert!((outer.0 as usize) < self.loops.len());
        let id = LoopId(self.loops.len() as u32);
        let depth = self.loops[outer.0 as usize].depth + 1;
        self.loops.push(LoopInfo { id, depth, outer: Some(outer), trip_count });
        id
    }

    pub fn info(&self, id: LoopId) -> &LoopInfo {
        &self.loops[id.0 as usize]
    }

    pub fn depth(&self, id: LoopId) -> u32 {
        self.info(id).depth
    }

    pub fn outer(&self, id: LoopId) -> Option<LoopId> {
        self.info(id).outer
    }

    /// Number of loops registered; classic vectors carry one entry per
    /// loop of the nest, indexed by depth from the analyzed root.
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Maximum depth + 1 across the nest; the length of distance and
    /// direction vectors.
    pub fn depth_count(&self) -> usize {
        self.loops.iter().map(|l| l.depth as usize + 1).max().unwrap_or(0)
    }

    /// True when `inner` is `outer` or nested (transitively) inside it.
    pub fn nested_in(&self, inner: LoopId, outer: LoopId) -> bool {
        let mut cur = Some(inner);
        while let Some(id) = cur {
            if id == outer {
                return true;
            }
            cur = self.outer(id);
        }
        false
    }

    /// Deepest loop containing both `a` and `b`, or `None` when they
    /// share no ancestor.
    pub fn find_common_loop(&self, a: LoopId, b: LoopId) -> Option<LoopId> {
        let (mut a, mut b) = (a, b);
        while self.depth(a) > self.depth(b) {
            a = self.outer(a)?;
        }
        while self.depth(b) > self.depth(a) {
            b = self.outer(b)?;
        }
        while a != b {
            a = self.outer(a)?;
            b = self.outer(b)?;
        }
        Some(a)
    }

    /// Iteration bound usable for proving independence: an exact count
    /// or an estimate flagged sound. Returns the count minus one (the
    /// largest iteration index), saturating at zero.
    pub fn sound_iteration_bound(&self, id: LoopId) -> Option<u64> {
        match self.info(id).trip_count {
            TripCount::Exact(n) => Some(n.saturating_sub(1)),
            TripCount::Estimate { max, sound: true } => Some(max.saturating_sub(1)),
            TripCount::Estimate { sound: false, .. } | TripCount::Unknown => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &LoopInfo> {
        self.loops.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_level_nest() -> (LoopNest, LoopId, LoopId) {
        let mut nest = LoopNest::new();
        let outer = nest.add_root(TripCount::Exact(100));
        let inner = nest.add_inner(outer, TripCount::Exact(10));
        (nest, outer, inner)
    }

    #[test]
    fn depths_and_ancestry() {
        let (nest, outer, inner) = two_level_nest();
        assert_eq!(nest.depth(outer), 0);
        assert_eq!(nest.depth(inner), 1);
        assert!(nest.nested_in(inner, outer));
        assert!(!nest.nested_in(outer, inner));
        assert_eq!(nest.depth_count(), 2);
    }

    #[test]
    fn common_loop() {
        let mut nest = LoopNest::new();
        let root = nest.add_root(TripCount::Unknown);
        let a = nest.add_inner(root, TripCount::Unknown);
        let b = nest.add_inner(root, TripCount::Unknown);
        assert_eq!(nest.find_common_loop(a, b), Some(root));
        assert_eq!(nest.find_common_loop(a, root), Some(root));
        assert_eq!(nest.find_common_loop(a, a), Some(a));
    }

    #[test]
    fn disjoint_roots_share_nothing() {
        let mut nest = LoopNest::new();
        let a = nest.add_root(TripCount::Unknown);
        let b = nest.add_root(TripCount::Unknown);
        assert_eq!(nest.find_common_loop(a, b), None);
    }

    #[test]
    fn sound_bounds() {
        let mut nest = LoopNest::new();
        let exact = nest.add_root(TripCount::Exact(5));
        let sound = nest.add_root(TripCount::Estimate { max: 8, sound: true });
        let profile = nest.add_root(TripCount::Estimate { max: 8, sound: false });
        let unknown = nest.add_root(TripCount::Unknown);
        assert_eq!(nest.sound_iteration_bound(exact), Some(4));
        assert_eq!(nest.sound_iteration_bound(sound), Some(7));
        assert_eq!(nest.sound_iteration_bound(profile), None);
        assert_eq!(nest.sound_iteration_bound(unknown), None);
    }
}
