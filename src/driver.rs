//! Analysis driver
//!
//! Builds data references for every memory access of a loop nest and
//! computes the dependence relations between all pairs. All mutable
//! analysis state lives in an [`AnalysisContext`] owned by the caller.

use std::fmt;

use log::{debug, warn};
use serde::Serialize;

use crate::alias::AliasOracle;
use crate::data_ref::{build_data_ref, DataRefs};
use crate::expr::{MemRef, StmtId};
use crate::loops::{LoopId, LoopNest};
use crate::relation::{
    build_classic_dir_vector, build_classic_dist_vector, compute_affine_dependence,
    compute_subscript_distance, initialize_relation, DataDependenceRelation, InvariantError,
};
use crate::scev::ScalarEvolution;
use crate::subscript::Conflicts;

/// Counters over one analysis run, in the shape the dependence testers
/// report them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DependenceStats {
    pub num_dependence_tests: u64,
    pub num_dependence_dependent: u64,
    pub num_dependence_independent: u64,
    pub num_dependence_undetermined: u64,

    pub num_subscript_tests: u64,
    pub num_subscript_undetermined: u64,
    pub num_same_subscript_function: u64,

    pub num_ziv: u64,
    pub num_ziv_dependent: u64,
    pub num_ziv_independent: u64,
    pub num_ziv_unimplemented: u64,

    pub num_siv: u64,
    pub num_siv_dependent: u64,
    pub num_siv_independent: u64,
    pub num_siv_unimplemented: u64,

    pub num_miv: u64,
    pub num_miv_dependent: u64,
    pub num_miv_independent: u64,
    pub num_miv_unimplemented: u64,
}

impl DependenceStats {
    pub fn reset(&mut self) {
        *self = DependenceStats::default();
    }

    /// Files a SIV test outcome under the right counter.
    pub fn count_siv_result(&mut self, ca: &Conflicts, cb: &Conflicts) {
        if ca.is_unknown() || cb.is_unknown() {
            self.num_siv_unimplemented += 1;
        } else if ca.is_no_conflict() || cb.is_no_conflict() {
            self.num_siv_independent += 1;
        } else {
            self.num_siv_dependent += 1;
        }
    }

    /// Files a MIV test outcome under the right counter.
    pub fn count_miv_result(&mut self, ca: &Conflicts, cb: &Conflicts) {
        if ca.is_unknown() || cb.is_unknown() {
            self.num_miv_unimplemented += 1;
        } else if ca.is_no_conflict() || cb.is_no_conflict() {
            self.num_miv_independent += 1;
        } else {
            self.num_miv_dependent += 1;
        }
    }
}

impl fmt::Display for DependenceStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} dependence relations computed", self.num_dependence_tests)?;
        writeln!(f, "  {} dependent", self.num_dependence_dependent)?;
        writeln!(f, "  {} independent", self.num_dependence_independent)?;
        writeln!(f, "  {} undetermined", self.num_dependence_undetermined)?;
        writeln!(f, "{} subscript tests", self.num_subscript_tests)?;
        writeln!(f, "  {} undetermined", self.num_subscript_undetermined)?;
        writeln!(f, "  {} same access function", self.num_same_subscript_function)?;
        writeln!(
            f,
            "ZIV: {} tests, {} dependent, {} independent, {} unimplemented",
            self.num_ziv, self.num_ziv_dependent, self.num_ziv_independent,
            self.num_ziv_unimplemented
        )?;
        writeln!(
            f,
            "SIV: {} tests, {} dependent, {} independent, {} unimplemented",
            self.num_siv, self.num_siv_dependent, self.num_siv_independent,
            self.num_siv_unimplemented
        )?;
        writeln!(
            f,
            "MIV: {} tests, {} dependent, {} independent, {} unimplemented",
            self.num_miv, self.num_miv_dependent, self.num_miv_independent,
            self.num_miv_unimplemented
        )
    }
}

/// Knobs of one analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    /// Also compute self relations and read-read relations.
    pub self_and_read_read: bool,
    /// Base alignment assumed for named objects, in bytes.
    pub alignment: Option<u64>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        AnalysisOptions { self_and_read_read: false, alignment: None }
    }
}

/// Mutable state of one analysis run.
#[derive(Debug, Default)]
pub struct AnalysisContext {
    pub options: AnalysisOptions,
    pub stats: DependenceStats,
}

impl AnalysisContext {
    pub fn new(options: AnalysisOptions) -> Self {
        AnalysisContext { options, stats: DependenceStats::default() }
    }
}

/// One memory access of the loop body under analysis.
#[derive(Debug, Clone)]
pub struct LoopAccess {
    pub stmt: StmtId,
    pub loop_id: LoopId,
    pub mem: MemRef,
    pub is_read: bool,
}

/// Result of a whole-nest dependence analysis.
#[derive(Debug)]
pub struct DependenceAnalysis {
    pub refs: DataRefs,
    pub relations: Vec<DataDependenceRelation>,
    /// False when some access could not be represented; clients must
    /// then assume every pair depends.
    pub complete: bool,
}

/// Analyzes all accesses of a loop nest and the dependence relations
/// between every relevant pair.
///
/// When an access cannot be turned into an affine data reference the
/// whole nest is given up on: a single blanket dont-know relation
/// replaces the pair list, since a partial graph with an unrepresented
/// access would be unsound.
pub fn analyze_dependences(
    ctx: &mut AnalysisContext,
    accesses: &[LoopAccess],
    nest: &LoopNest,
    scev: &dyn ScalarEvolution,
    oracle: &dyn AliasOracle,
) -> Result<DependenceAnalysis, InvariantError> {
    let mut refs = DataRefs::new();
    for access in accesses {
        match build_data_ref(
            &access.mem,
            access.stmt,
            access.loop_id,
            access.is_read,
            scev,
            ctx.options.alignment,
        ) {
            Ok(dr) => {
                debug!("built data reference for statement {:?}", access.stmt);
                refs.push(dr);
            }
            Err(e) => {
                warn!("statement {:?} not analyzable: {e}", access.stmt);
                // One blanket relation: everything in the nest depends
                // on everything.
                let blanket = DataDependenceRelation::dont_know(None, None);
                return Ok(DependenceAnalysis {
                    refs,
                    relations: vec![blanket],
                    complete: false,
                });
            }
        }
    }

    let ids: Vec<_> = refs.ids().collect();
    let offset = if ctx.options.self_and_read_read { 0 } else { 1 };
    let mut relations = Vec::new();
    for (i, &a) in ids.iter().enumerate() {
        for &b in &ids[i + offset..] {
            if refs.get(a).is_read && refs.get(b).is_read && !ctx.options.self_and_read_read {
                continue;
            }
            let mut rel = initialize_relation(a, b, &refs, oracle);
            compute_affine_dependence(&mut rel, &refs, nest, &mut ctx.stats);
            compute_subscript_distance(&mut rel);
            build_classic_dist_vector(&mut rel, &refs, nest)?;
            build_classic_dir_vector(&mut rel, &refs, nest)?;
            relations.push(rel);
        }
    }

    Ok(DependenceAnalysis { refs, relations, complete: true })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::ConservativeAliasing;
    use crate::expr::{DeclId, Expr, PtrId};
    use crate::loops::TripCount;
    use crate::relation::Dependence;
    use crate::scev::{Evolution, EvolutionTable};

    fn nest_of(trip: u64) -> (LoopNest, LoopId) {
        let mut nest = LoopNest::new();
        let l = nest.add_root(TripCount::Exact(trip));
        (nest, l)
    }

    fn access(stmt: u32, loop_id: LoopId, mem: MemRef, is_read: bool) -> LoopAccess {
        LoopAccess { stmt: StmtId(stmt), loop_id, mem, is_read }
    }

    #[test]
    fn read_read_pairs_are_skipped_by_default() {
        let (nest, l) = nest_of(10);
        let mut scev = EvolutionTable::new();
        let i = Expr::sym(0);
        scev.set_index(l, i.clone(), Evolution::affine(l, 0, 1));
        let mem = MemRef::index(MemRef::Decl(DeclId(1)), i, 4);
        let accesses = vec![
            access(0, l, mem.clone(), true),
            access(1, l, mem.clone(), true),
            access(2, l, mem, false),
        ];
        let mut ctx = AnalysisContext::default();
        let out =
            analyze_dependences(&mut ctx, &accesses, &nest, &scev, &ConservativeAliasing).unwrap();
        assert!(out.complete);
        // Pairs (0,2) and (1,2) remain, (0,1) is read-read.
        assert_eq!(out.relations.len(), 2);
    }

    #[test]
    fn self_and_read_read_flag_adds_pairs() {
        let (nest, l) = nest_of(10);
        let mut scev = EvolutionTable::new();
        let i = Expr::sym(0);
        scev.set_index(l, i.clone(), Evolution::affine(l, 0, 1));
        let mem = MemRef::index(MemRef::Decl(DeclId(1)), i, 4);
        let accesses = vec![access(0, l, mem.clone(), true), access(1, l, mem, true)];
        let mut ctx = AnalysisContext::new(AnalysisOptions {
            self_and_read_read: true,
            alignment: None,
        });
        let out =
            analyze_dependences(&mut ctx, &accesses, &nest, &scev, &ConservativeAliasing).unwrap();
        // (0,0), (0,1), (1,1).
        assert_eq!(out.relations.len(), 3);
        assert!(out.relations.iter().all(|r| r.dependence == Dependence::Described));
    }

    #[test]
    fn unanalyzable_access_gives_up_on_the_nest() {
        let (nest, l) = nest_of(10);
        let scev = EvolutionTable::new();
        // Indexing through a dereference is not representable.
        let i = Expr::sym(0);
        let mem = MemRef::index(MemRef::deref(PtrId(0), 4), i, 4);
        let accesses = vec![access(0, l, mem, false)];
        let mut ctx = AnalysisContext::default();
        let out =
            analyze_dependences(&mut ctx, &accesses, &nest, &scev, &ConservativeAliasing).unwrap();
        assert!(!out.complete);
        // A single blanket relation stands in for the whole nest.
        assert_eq!(out.relations.len(), 1);
        assert_eq!(out.relations[0].dependence, Dependence::DontKnow);
        assert!(out.relations[0].a.is_none());
        assert!(out.relations[0].b.is_none());
    }

    #[test]
    fn stats_count_the_run() {
        let (nest, l) = nest_of(100);
        let mut scev = EvolutionTable::new();
        let even = Expr::sym(0);
        let odd = Expr::sym(1);
        scev.set_index(l, even.clone(), Evolution::affine(l, 0, 2));
        scev.set_index(l, odd.clone(), Evolution::affine(l, 1, 2));
        let accesses = vec![
            access(0, l, MemRef::index(MemRef::Decl(DeclId(1)), even, 4), false),
            access(1, l, MemRef::index(MemRef::Decl(DeclId(1)), odd, 4), true),
        ];
        let mut ctx = AnalysisContext::default();
        let out =
            analyze_dependences(&mut ctx, &accesses, &nest, &scev, &ConservativeAliasing).unwrap();
        assert_eq!(out.relations.len(), 1);
        assert_eq!(out.relations[0].dependence, Dependence::Independent);
        assert_eq!(ctx.stats.num_dependence_tests, 1);
        assert_eq!(ctx.stats.num_dependence_independent, 1);
        assert_eq!(ctx.stats.num_siv, 1);
        assert_eq!(ctx.stats.num_siv_independent, 1);
    }
}
