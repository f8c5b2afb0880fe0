//! Dependence relations
//!
//! Couples two data references, runs the per-subscript conflict tests,
//! and summarizes the result as classic distance and direction vectors
//! indexed by loop depth.

use log::debug;
use serde::Serialize;
use smallvec::SmallVec;

use crate::alias::{base_differ, AliasOracle, TriState};
use crate::data_ref::{DataRefId, DataRefs};
use crate::driver::DependenceStats;
use crate::loops::{LoopId, LoopNest};
use crate::scev::Evolution;
use crate::subscript::{analyze_overlapping_iterations, Conflicts, LastConflict, Subscript};

/// Overall classification of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Dependence {
    /// The references may depend; the subscripts describe how.
    Described,
    /// Proven independent.
    Independent,
    /// The analysis could not decide; treat as depending in every way.
    DontKnow,
}

/// Per-loop dependence direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Positive,
    Negative,
    Equal,
    Star,
}

/// A broken analysis invariant, reported instead of aborting so the
/// host can skip the loop and keep compiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantError {
    pub what: String,
}

impl std::fmt::Display for InvariantError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dependence analysis invariant broken: {}", self.what)
    }
}

impl std::error::Error for InvariantError {}

fn invariant(what: impl Into<String>) -> InvariantError {
    InvariantError { what: what.into() }
}

/// The dependence relation between two references. A relation with no
/// reference ids is the blanket "everything depends on everything"
/// answer for a nest that could not be fully analyzed.
#[derive(Debug, Clone)]
pub struct DataDependenceRelation {
    pub a: Option<DataRefId>,
    pub b: Option<DataRefId>,
    pub dependence: Dependence,
    /// False when the relation cannot be represented by a distance
    /// vector.
    pub affine: bool,
    pub subscripts: SmallVec<[Subscript; 2]>,
    pub dist_vect: Option<Vec<i64>>,
    pub dir_vect: Option<Vec<Direction>>,
}

impl DataDependenceRelation {
    /// Relation that depends in every way. With no reference ids this
    /// is the blanket answer for a nest whose accesses could not all be
    /// analyzed.
    pub fn dont_know(a: Option<DataRefId>, b: Option<DataRefId>) -> Self {
        DataDependenceRelation {
            a,
            b,
            dependence: Dependence::DontKnow,
            affine: false,
            subscripts: SmallVec::new(),
            dist_vect: None,
            dir_vect: None,
        }
    }

    /// Settles the relation and drops the per-subscript details, which
    /// no longer apply.
    pub fn finalize(&mut self, dep: Dependence) {
        debug!("dependence classified: {:?}", dep);
        self.dependence = dep;
        self.subscripts.clear();
    }

    fn non_affine(&mut self) {
        debug!("dependence relation cannot be represented by a distance vector");
        self.affine = false;
    }
}

/// Builds the initial relation for a pair of references: settles it
/// right away when the bases are provably disjoint or incomparable,
/// otherwise prepares one subscript slot per dimension.
pub fn initialize_relation(
    a: DataRefId,
    b: DataRefId,
    refs: &DataRefs,
    oracle: &dyn AliasOracle,
) -> DataDependenceRelation {
    let dra = refs.get(a);
    let drb = refs.get(b);

    // Accesses of different dimensionality into distinct named objects
    // never collide element-wise.
    if dra.base_object.is_some()
        && drb.base_object.is_some()
        && dra.num_dimensions() != drb.num_dimensions()
    {
        let mut rel = DataDependenceRelation::dont_know(Some(a), Some(b));
        rel.finalize(Dependence::Independent);
        return rel;
    }

    let dependence = match base_differ(dra, drb, oracle) {
        TriState::DefinitelyDifferent => Dependence::Independent,
        TriState::Unknown => Dependence::DontKnow,
        TriState::DefinitelySame => Dependence::Described,
    };

    let mut subscripts = SmallVec::new();
    if dependence == Dependence::Described {
        for _ in 0..dra.num_dimensions() {
            subscripts.push(Subscript {
                conflicts_a: Conflicts::Unknown,
                conflicts_b: Conflicts::Unknown,
                last_conflict: LastConflict::Unknown,
                distance: None,
            });
        }
    }

    DataDependenceRelation {
        a: Some(a),
        b: Some(b),
        dependence,
        affine: dependence == Dependence::Described,
        subscripts,
        dist_vect: None,
        dir_vect: None,
    }
}

fn affine_or_constant(ev: &Evolution) -> bool {
    ev.is_constant() || ev.is_affine_multivariate()
}

/// Runs the conflict tests dimension by dimension. The first unknown
/// answer settles the relation as undecided, the first proven
/// no-conflict settles it as independent.
pub fn subscript_dependence_tester(
    rel: &mut DataDependenceRelation,
    refs: &DataRefs,
    nest: &LoopNest,
    stats: &mut DependenceStats,
) {
    let (Some(a), Some(b)) = (rel.a, rel.b) else {
        rel.finalize(Dependence::DontKnow);
        stats.num_dependence_undetermined += 1;
        return;
    };
    let dra = refs.get(a);
    let drb = refs.get(b);

    for i in 0..rel.subscripts.len() {
        let sub = analyze_overlapping_iterations(
            &dra.access_fns[i],
            &drb.access_fns[i],
            nest,
            stats,
        );
        if sub.conflicts_a.is_unknown() || sub.conflicts_b.is_unknown() {
            rel.finalize(Dependence::DontKnow);
            stats.num_dependence_undetermined += 1;
            return;
        }
        if sub.conflicts_a.is_no_conflict() || sub.conflicts_b.is_no_conflict() {
            rel.finalize(Dependence::Independent);
            stats.num_dependence_independent += 1;
            return;
        }
        rel.subscripts[i] = sub;
    }
    stats.num_dependence_dependent += 1;
}

/// Entry point of the affine dependence tests for one relation.
pub fn compute_affine_dependence(
    rel: &mut DataDependenceRelation,
    refs: &DataRefs,
    nest: &LoopNest,
    stats: &mut DependenceStats,
) {
    if rel.dependence != Dependence::Described {
        return;
    }
    stats.num_dependence_tests += 1;

    let (Some(a), Some(b)) = (rel.a, rel.b) else {
        stats.num_dependence_undetermined += 1;
        rel.finalize(Dependence::DontKnow);
        return;
    };
    let dra = refs.get(a);
    let drb = refs.get(b);
    let testable = dra.access_fns.iter().all(affine_or_constant)
        && drb.access_fns.iter().all(affine_or_constant);
    if testable {
        subscript_dependence_tester(rel, refs, nest, stats);
    } else {
        debug!("affine dependence test not usable: access function not affine or constant");
        stats.num_dependence_undetermined += 1;
        rel.finalize(Dependence::DontKnow);
    }
}

fn conflict_distance(sub: &Subscript) -> Option<i128> {
    let a = match &sub.conflicts_a {
        Conflicts::One(f) => *f,
        Conflicts::Pair(f, g) if f == g => *f,
        _ => return None,
    };
    let b = match &sub.conflicts_b {
        Conflicts::One(f) => *f,
        Conflicts::Pair(f, g) if f == g => *f,
        _ => return None,
    };
    use crate::subscript::ConflictFn::*;
    // The distance is `conflicts_b - conflicts_a`, defined when the
    // difference does not depend on the conflict parameter.
    match (a, b) {
        (Constant(x), Constant(y)) => Some(y - x),
        (Affine { base: xb, step: xs }, Affine { base: yb, step: ys }) if xs == ys => {
            Some(yb - xb)
        }
        _ => None,
    }
}

/// Fills in the per-subscript distance for a described relation.
pub fn compute_subscript_distance(rel: &mut DataDependenceRelation) {
    if rel.dependence != Dependence::Described {
        return;
    }
    for sub in &mut rel.subscripts {
        sub.distance = conflict_distance(sub);
    }
}

/// Loop carrying a subscript pair: the outermost of the two top-level
/// recurrence loops, or `None` when the pair is not representable.
fn carrying_loop(
    fn_a: &Evolution,
    fn_b: &Evolution,
    nest: &LoopNest,
) -> Result<Option<LoopId>, ()> {
    match (fn_a.variable(), fn_b.variable()) {
        (Some(la), Some(lb)) => {
            if la != lb && !nest.nested_in(la, lb) && !nest.nested_in(lb, la) {
                // Recurrences over sibling loops cannot be captured by
                // the distance abstraction.
                return Err(());
            }
            Ok(Some(if la.0 < lb.0 { la } else { lb }))
        }
        _ => Ok(None),
    }
}

/// The loops an invariant dependence is carried by: the innermost
/// common ancestor of both statements and every loop enclosing it. A
/// location touched by an invariant subscript repeats on each of those
/// depths, `A[5]` inside the loop included.
fn default_carried_depths(
    loop_a: LoopId,
    loop_b: LoopId,
    nest: &LoopNest,
    init: &[bool],
    out: &mut Vec<usize>,
) {
    let lca = match nest.find_common_loop(loop_a, loop_b) {
        Some(l) => l,
        None => return,
    };
    let mut cur = Some(lca);
    while let Some(l) = cur {
        let d = nest.depth(l) as usize;
        if !init[d] {
            out.push(d);
        }
        cur = nest.outer(l);
    }
}

/// Builds the classic per-loop distance vector: entry `d` is the
/// iteration distance carried at depth `d`. A self-coupled subscript
/// pair with contradicting distances proves independence.
pub fn build_classic_dist_vector(
    rel: &mut DataDependenceRelation,
    refs: &DataRefs,
    nest: &LoopNest,
) -> Result<(), InvariantError> {
    if rel.dependence != Dependence::Described {
        return Ok(());
    }
    let nb_loops = nest.depth_count();
    let mut dist_v = vec![0i64; nb_loops];
    let mut init_v = vec![false; nb_loops];

    let (Some(a), Some(b)) = (rel.a, rel.b) else {
        return Err(invariant("described relation without references"));
    };
    let dra = refs.get(a);
    let drb = refs.get(b);

    for (i, sub) in rel.subscripts.iter().enumerate() {
        let dist = match sub.distance {
            Some(d) => d,
            None => {
                rel.non_affine();
                return Ok(());
            }
        };
        let fn_a = &dra.access_fns[i];
        let fn_b = &drb.access_fns[i];
        let carried = match carrying_loop(fn_a, fn_b, nest) {
            Ok(c) => c,
            Err(()) => {
                rel.non_affine();
                return Ok(());
            }
        };
        let loop_nb = match carried {
            Some(l) => l,
            None => continue,
        };
        let depth = nest.depth(loop_nb) as usize;
        if depth >= nb_loops {
            return Err(invariant(format!(
                "loop depth {depth} outside the nest of {nb_loops} loops"
            )));
        }
        let dist = i64::try_from(dist)
            .map_err(|_| invariant("subscript distance overflows the distance vector"))?;

        // Subscript coupling: two subscripts carried by the same loop
        // must agree on the distance, as in T[i+1][i] vs T[i][i].
        if init_v[depth] && dist_v[depth] != dist {
            rel.finalize(Dependence::Independent);
            return Ok(());
        }
        dist_v[depth] = dist;
        init_v[depth] = true;
    }

    // Loop-invariant accesses repeat every iteration of the loops
    // containing both statements: distance 1 on those depths.
    let mut defaults = Vec::new();
    default_carried_depths(dra.loop_id, drb.loop_id, nest, &init_v, &mut defaults);
    for d in defaults {
        if d >= nb_loops {
            return Err(invariant("common-loop depth outside the nest"));
        }
        dist_v[d] = 1;
    }

    rel.dist_vect = Some(dist_v);
    Ok(())
}

/// Builds the classic per-loop direction vector; same walk as the
/// distance vector with signs instead of magnitudes.
pub fn build_classic_dir_vector(
    rel: &mut DataDependenceRelation,
    refs: &DataRefs,
    nest: &LoopNest,
) -> Result<(), InvariantError> {
    if rel.dependence != Dependence::Described {
        return Ok(());
    }
    let nb_loops = nest.depth_count();
    let mut dir_v = vec![Direction::Equal; nb_loops];
    let mut init_v = vec![false; nb_loops];

    let (Some(a), Some(b)) = (rel.a, rel.b) else {
        return Err(invariant("described relation without references"));
    };
    let dra = refs.get(a);
    let drb = refs.get(b);

    for (i, sub) in rel.subscripts.iter().enumerate() {
        let dist = match sub.distance {
            Some(d) => d,
            None => {
                rel.non_affine();
                return Ok(());
            }
        };
        let carried = match carrying_loop(&dra.access_fns[i], &drb.access_fns[i], nest) {
            Ok(c) => c,
            Err(()) => {
                rel.non_affine();
                return Ok(());
            }
        };
        let loop_nb = match carried {
            Some(l) => l,
            None => continue,
        };
        let depth = nest.depth(loop_nb) as usize;
        if depth >= nb_loops {
            return Err(invariant(format!(
                "loop depth {depth} outside the nest of {nb_loops} loops"
            )));
        }
        let dir = match dist {
            0 => Direction::Equal,
            d if d > 0 => Direction::Positive,
            _ => Direction::Negative,
        };

        if init_v[depth]
            && dir != Direction::Star
            && dir_v[depth] != dir
            && dir_v[depth] != Direction::Star
        {
            rel.finalize(Dependence::Independent);
            return Ok(());
        }
        dir_v[depth] = dir;
        init_v[depth] = true;
    }

    let mut defaults = Vec::new();
    default_carried_depths(dra.loop_id, drb.loop_id, nest, &init_v, &mut defaults);
    for d in defaults {
        if d >= nb_loops {
            return Err(invariant("common-loop depth outside the nest"));
        }
        dir_v[d] = Direction::Positive;
    }

    rel.dir_vect = Some(dir_v);
    Ok(())
}
