//! Per-subscript conflict analysis
//!
//! Classifies a pair of access functions by how many loop counters they
//! involve (ZIV, SIV, MIV) and computes, for each class, the iterations
//! at which the two functions take the same value. The result is a pair
//! of conflict functions such that for every parameter `k >= 0`:
//!
//!   `chrec_a(conflicts_a(k)) == chrec_b(conflicts_b(k))`
//!
//! together with the index of the last conflicting parameter.

use log::debug;

use crate::driver::DependenceStats;
use crate::loops::LoopNest;
use crate::scev::{Evolution, Scalar};
use crate::solver;

/// Affine description of the conflicting iterations in one reference,
/// as a function of the conflict parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictFn {
    /// The same iteration conflicts for every parameter value.
    Constant(i128),
    /// Iteration `base + step * k` conflicts for parameter `k`.
    Affine { base: i128, step: i128 },
}

impl ConflictFn {
    /// Normalizing constructor: a zero step is a constant.
    pub fn affine(base: i128, step: i128) -> Self {
        if step == 0 {
            ConflictFn::Constant(base)
        } else {
            ConflictFn::Affine { base, step }
        }
    }

    pub fn eval(&self, k: i128) -> i128 {
        match *self {
            ConflictFn::Constant(c) => c,
            ConflictFn::Affine { base, step } => base + step * k,
        }
    }

    pub fn fold_plus(&self, other: &ConflictFn) -> ConflictFn {
        match (*self, *other) {
            (ConflictFn::Constant(a), ConflictFn::Constant(b)) => ConflictFn::Constant(a + b),
            (ConflictFn::Constant(a), ConflictFn::Affine { base, step })
            | (ConflictFn::Affine { base, step }, ConflictFn::Constant(a)) => {
                ConflictFn::affine(base + a, step)
            }
            (
                ConflictFn::Affine { base: b1, step: s1 },
                ConflictFn::Affine { base: b2, step: s2 },
            ) => ConflictFn::affine(b1 + b2, s1 + s2),
        }
    }
}

/// The conflicting iterations of one reference for one subscript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflicts {
    /// Proven that no iteration conflicts.
    NoConflict,
    /// The analysis could not decide.
    Unknown,
    /// One conflict family.
    One(ConflictFn),
    /// Two conflict families, one per loop counter of a bivariate
    /// function.
    Pair(ConflictFn, ConflictFn),
}

impl Conflicts {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Conflicts::Unknown)
    }

    pub fn is_no_conflict(&self) -> bool {
        matches!(self, Conflicts::NoConflict)
    }

    pub fn single(&self) -> Option<ConflictFn> {
        match self {
            Conflicts::One(f) => Some(*f),
            _ => None,
        }
    }
}

/// Index of the last parameter value for which the conflict functions
/// describe a real conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastConflict {
    Count(u64),
    /// Conflicts repeat for as long as the loops run.
    Unbounded,
    Unknown,
}

/// Analysis result for one dimension of a reference pair.
#[derive(Debug, Clone)]
pub struct Subscript {
    pub conflicts_a: Conflicts,
    pub conflicts_b: Conflicts,
    pub last_conflict: LastConflict,
    /// Difference of the conflicting iterations, when constant.
    pub distance: Option<i128>,
}

impl Subscript {
    fn new(conflicts_a: Conflicts, conflicts_b: Conflicts, last_conflict: LastConflict) -> Self {
        Subscript { conflicts_a, conflicts_b, last_conflict, distance: None }
    }
}

fn unknown_subscript() -> Subscript {
    Subscript::new(Conflicts::Unknown, Conflicts::Unknown, LastConflict::Unknown)
}

fn no_conflict_subscript() -> Subscript {
    Subscript::new(Conflicts::NoConflict, Conflicts::NoConflict, LastConflict::Count(0))
}

fn zero_conflict(last: LastConflict) -> Subscript {
    Subscript::new(
        Conflicts::One(ConflictFn::Constant(0)),
        Conflicts::One(ConflictFn::Constant(0)),
        last,
    )
}

fn ziv_subscript_p(a: &Evolution, b: &Evolution) -> bool {
    a.is_constant() && b.is_constant()
}

fn siv_subscript_p(a: &Evolution, b: &Evolution) -> bool {
    match (a.variable(), b.variable()) {
        (None, Some(_)) | (Some(_), None) => {
            (a.is_constant() || a.is_affine_univariate())
                && (b.is_constant() || b.is_affine_univariate())
        }
        (Some(la), Some(lb)) => la == lb && a.is_affine_univariate() && b.is_affine_univariate(),
        (None, None) => false,
    }
}

/// Zero Index Variable test: both functions are loop invariant, so they
/// either always or never collide.
fn analyze_ziv_subscript(a: &Evolution, b: &Evolution, stats: &mut DependenceStats) -> Subscript {
    stats.num_ziv += 1;
    let diff = a.fold_minus(b);
    match diff {
        Evolution::Scalar(Scalar::Int(0)) => {
            stats.num_ziv_dependent += 1;
            zero_conflict(LastConflict::Unbounded)
        }
        Evolution::Scalar(Scalar::Int(_)) => {
            stats.num_ziv_independent += 1;
            no_conflict_subscript()
        }
        _ => {
            debug!("ziv test failed: difference is not a literal");
            stats.num_ziv_unimplemented += 1;
            unknown_subscript()
        }
    }
}

/// SIV test for a constant `cst` against an affine `{init, +, step}`.
/// Conflict functions are oriented so that the first belongs to the
/// constant side.
fn analyze_siv_cst_affine(
    cst: &Evolution,
    chrec: &Evolution,
    nest: &LoopNest,
    stats: &mut DependenceStats,
) -> Subscript {
    let init = match chrec {
        Evolution::Poly { left, .. } => left.initial_condition(),
        _ => return unknown_subscript(),
    };
    let step = match chrec.step_in_loop(chrec.variable().unwrap_or(crate::loops::LoopId(0))) {
        Some(Evolution::Scalar(s)) => *s,
        _ => Scalar::Unknown,
    };
    let diff = init.fold_minus(cst.initial_condition());

    let (diff, step) = match (diff.as_int(), step.as_int()) {
        (Some(d), Some(s)) => (d, s),
        _ => {
            debug!("siv test failed: symbolic difference or step");
            stats.num_siv_unimplemented += 1;
            return unknown_subscript();
        }
    };

    // Equal starting points collide at the first iteration whatever
    // the sign of the step.
    if diff == 0 {
        stats.num_siv_dependent += 1;
        return zero_conflict(LastConflict::Count(1));
    }

    // The affine side must walk towards the constant.
    let towards = (diff > 0 && step < 0) || (diff < 0 && step > 0);
    if !towards {
        stats.num_siv_independent += 1;
        return no_conflict_subscript();
    }

    if diff.abs() % step.abs() != 0 {
        // The step never lands exactly on the constant.
        stats.num_siv_independent += 1;
        return no_conflict_subscript();
    }

    let x0 = diff.abs() / step.abs();

    // Weak-zero test: the collision may fall beyond the loop bound.
    // Only a sound bound can prove that.
    if let Some(var) = chrec.variable() {
        if let Some(bound) = nest.sound_iteration_bound(var) {
            if x0 > bound as i128 {
                stats.num_siv_independent += 1;
                return no_conflict_subscript();
            }
        }
    }

    stats.num_siv_dependent += 1;
    Subscript::new(
        Conflicts::One(ConflictFn::Constant(0)),
        Conflicts::One(ConflictFn::Constant(x0)),
        LastConflict::Count(1),
    )
}

/// Rebases two symbolic affine functions of the same loop around the
/// difference of their initial conditions, when that difference is a
/// literal. `{x+1, +, 1}` vs `{x+3, +, 1}` conflicts exactly like
/// `{-2, +, 1}` vs `{0, +, 1}`.
fn rebase_symbolic_affine(a: &Evolution, b: &Evolution) -> Option<(Evolution, Evolution)> {
    let (la, left_a, right_a) = match a {
        Evolution::Poly { loop_id, left, right } => (*loop_id, left, right),
        _ => return None,
    };
    let (lb, left_b, right_b) = match b {
        Evolution::Poly { loop_id, left, right } => (*loop_id, left, right),
        _ => return None,
    };
    if right_a.contains_symbols() || right_b.contains_symbols() {
        return None;
    }
    let diff = left_a.fold_minus(left_b);
    let diff = match diff {
        Evolution::Scalar(Scalar::Int(d)) => d,
        _ => return None,
    };
    Some((
        Evolution::poly(la, Evolution::int(diff), (**right_a).clone()),
        Evolution::poly(lb, Evolution::int(0), (**right_b).clone()),
    ))
}

/// Single Index Variable test: at most one loop counter in play.
fn analyze_siv_subscript(
    a: &Evolution,
    b: &Evolution,
    nest: &LoopNest,
    stats: &mut DependenceStats,
) -> Subscript {
    stats.num_siv += 1;

    if a.is_constant() && b.is_affine_univariate() {
        return analyze_siv_cst_affine(a, b, nest, stats);
    }
    if a.is_affine_univariate() && b.is_constant() {
        let sub = analyze_siv_cst_affine(b, a, nest, stats);
        return Subscript::new(sub.conflicts_b, sub.conflicts_a, sub.last_conflict);
    }

    if a.is_affine_univariate() && b.is_affine_univariate() {
        if !a.contains_symbols() && !b.contains_symbols() {
            let (ca, cb, last) = solver::analyze_affine_affine(a, b, nest);
            stats.count_siv_result(&ca, &cb);
            return Subscript::new(ca, cb, last);
        }
        if let Some((ra, rb)) = rebase_symbolic_affine(a, b) {
            let (ca, cb, _) = solver::analyze_affine_affine(&ra, &rb, nest);
            stats.count_siv_result(&ca, &cb);
            // The rebase shifts the iteration space by a symbolic
            // amount, so the conflict extent cannot be counted.
            return Subscript::new(ca, cb, LastConflict::Unknown);
        }
    }

    debug!("siv test failed: unhandled shape");
    stats.num_siv_unimplemented += 1;
    unknown_subscript()
}

/// Greatest common divisor of every literal step of both functions, or
/// `None` when some step is not a literal.
fn steps_gcd(ev: &Evolution, acc: i128) -> Option<i128> {
    match ev {
        Evolution::Scalar(_) => Some(acc),
        Evolution::Poly { left, right, .. } => {
            let s = right.initial_condition().as_int()?;
            steps_gcd(left, solver::gcd(acc, s))
        }
    }
}

/// Multiple Index Variable test.
fn analyze_miv_subscript(
    a: &Evolution,
    b: &Evolution,
    nest: &LoopNest,
    stats: &mut DependenceStats,
) -> Subscript {
    stats.num_miv += 1;
    let diff = a.fold_minus(b);

    if diff.is_zero() {
        // Identical functions: every element is accessed twice, in the
        // same order.
        stats.num_miv_dependent += 1;
        let last = a
            .variable()
            .and_then(|v| nest.sound_iteration_bound(v))
            .map(LastConflict::Count)
            .unwrap_or(LastConflict::Unbounded);
        return zero_conflict(last);
    }

    if let Evolution::Scalar(Scalar::Int(d)) = diff {
        // gcd test across every dimension: a conflict writes d as an
        // integer combination of the steps of both functions.
        let g = steps_gcd(a, 0).and_then(|acc| steps_gcd(b, acc));
        if let Some(g) = g {
            if g != 0 && d % g != 0 {
                stats.num_miv_independent += 1;
                return no_conflict_subscript();
            }
        }
    }

    if a.is_affine_multivariate()
        && !a.contains_symbols()
        && b.is_affine_multivariate()
        && !b.contains_symbols()
    {
        let (ca, cb, last) = solver::analyze_affine_affine(a, b, nest);
        stats.count_miv_result(&ca, &cb);
        return Subscript::new(ca, cb, last);
    }

    debug!("miv test failed: unhandled shape");
    stats.num_miv_unimplemented += 1;
    unknown_subscript()
}

/// Determines the iterations for which `chrec_a` equals `chrec_b`,
/// dispatching on the number of loop counters involved.
pub fn analyze_overlapping_iterations(
    chrec_a: &Evolution,
    chrec_b: &Evolution,
    nest: &LoopNest,
    stats: &mut DependenceStats,
) -> Subscript {
    stats.num_subscript_tests += 1;
    debug!("analyze_overlapping_iterations: {:?} vs {:?}", chrec_a, chrec_b);

    if chrec_a.contains_undetermined() || chrec_b.contains_undetermined() {
        stats.num_subscript_undetermined += 1;
        return unknown_subscript();
    }

    // The same affine function conflicts with itself on every
    // iteration, symbolic or not.
    if chrec_a == chrec_b && chrec_a.is_affine_multivariate() {
        stats.num_same_subscript_function += 1;
        return zero_conflict(LastConflict::Unbounded);
    }

    if (chrec_a.contains_symbols() || chrec_b.contains_symbols())
        && (!chrec_a.is_affine_multivariate() || !chrec_b.is_affine_multivariate())
    {
        stats.num_subscript_undetermined += 1;
        return unknown_subscript();
    }

    if ziv_subscript_p(chrec_a, chrec_b) {
        analyze_ziv_subscript(chrec_a, chrec_b, stats)
    } else if siv_subscript_p(chrec_a, chrec_b) {
        analyze_siv_subscript(chrec_a, chrec_b, nest, stats)
    } else {
        analyze_miv_subscript(chrec_a, chrec_b, nest, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::SymbolId;
    use crate::loops::{LoopId, LoopNest, TripCount};

    fn nest_with(counts: &[u64]) -> LoopNest {
        let mut nest = LoopNest::new();
        for &c in counts {
            nest.add_root(TripCount::Exact(c));
        }
        nest
    }

    fn run(a: &Evolution, b: &Evolution, nest: &LoopNest) -> Subscript {
        let mut stats = DependenceStats::default();
        analyze_overlapping_iterations(a, b, nest, &mut stats)
    }

    #[test]
    fn ziv_equal_constants_always_conflict() {
        let nest = nest_with(&[10]);
        let sub = run(&Evolution::int(5), &Evolution::int(5), &nest);
        assert_eq!(sub.conflicts_a, Conflicts::One(ConflictFn::Constant(0)));
        assert_eq!(sub.last_conflict, LastConflict::Unbounded);
    }

    #[test]
    fn ziv_distinct_constants_never_conflict() {
        let nest = nest_with(&[10]);
        let sub = run(&Evolution::int(5), &Evolution::int(7), &nest);
        assert!(sub.conflicts_a.is_no_conflict());
        assert_eq!(sub.last_conflict, LastConflict::Count(0));
    }

    #[test]
    fn ziv_symbolic_difference_is_unknown() {
        let nest = nest_with(&[10]);
        let sub = run(&Evolution::int(5), &Evolution::sym(SymbolId(1)), &nest);
        assert!(sub.conflicts_a.is_unknown());
    }

    #[test]
    fn siv_constant_hit_inside_bounds() {
        // 12 vs {10, +, 1} over 5 iterations: collision at iteration 2.
        let nest = nest_with(&[5]);
        let a = Evolution::int(12);
        let b = Evolution::affine(LoopId(0), 10, 1);
        let sub = run(&a, &b, &nest);
        assert_eq!(sub.conflicts_a, Conflicts::One(ConflictFn::Constant(0)));
        assert_eq!(sub.conflicts_b, Conflicts::One(ConflictFn::Constant(2)));
        assert_eq!(sub.last_conflict, LastConflict::Count(1));
    }

    #[test]
    fn siv_constant_hit_outside_bounds() {
        // 12 vs {10, +, 1} over 1 iteration: 12 is never reached.
        let nest = nest_with(&[1]);
        let a = Evolution::int(12);
        let b = Evolution::affine(LoopId(0), 10, 1);
        let sub = run(&a, &b, &nest);
        assert!(sub.conflicts_a.is_no_conflict());
    }

    #[test]
    fn siv_constant_no_sound_bound_stays_dependent() {
        let mut nest = LoopNest::new();
        nest.add_root(TripCount::Estimate { max: 1, sound: false });
        let a = Evolution::int(12);
        let b = Evolution::affine(LoopId(0), 10, 1);
        let sub = run(&a, &b, &nest);
        // Without a sound bound the collision at iteration 2 cannot be
        // ruled out.
        assert_eq!(sub.conflicts_b, Conflicts::One(ConflictFn::Constant(2)));
    }

    #[test]
    fn siv_constant_wrong_direction() {
        // 12 vs {10, +, -1}: the function walks away from 12.
        let nest = nest_with(&[100]);
        let a = Evolution::int(12);
        let b = Evolution::affine(LoopId(0), 10, -1);
        let sub = run(&a, &b, &nest);
        assert!(sub.conflicts_a.is_no_conflict());
    }

    #[test]
    fn siv_constant_negative_step_towards() {
        // 3 vs {10, +, -1}: collision at iteration 7.
        let nest = nest_with(&[100]);
        let a = Evolution::int(3);
        let b = Evolution::affine(LoopId(0), 10, -1);
        let sub = run(&a, &b, &nest);
        assert_eq!(sub.conflicts_b, Conflicts::One(ConflictFn::Constant(7)));
    }

    #[test]
    fn siv_constant_equal_start_conflicts_even_with_negative_step() {
        // 10 vs {10, +, -2}: iteration 0 collides whatever the step.
        let nest = nest_with(&[100]);
        let a = Evolution::int(10);
        let b = Evolution::affine(LoopId(0), 10, -2);
        let sub = run(&a, &b, &nest);
        assert_eq!(sub.conflicts_b, Conflicts::One(ConflictFn::Constant(0)));
        assert_eq!(sub.last_conflict, LastConflict::Count(1));
    }

    #[test]
    fn siv_step_does_not_divide() {
        // 13 vs {10, +, 2}: 2 never lands on an odd offset of 3.
        let nest = nest_with(&[100]);
        let a = Evolution::int(13);
        let b = Evolution::affine(LoopId(0), 10, 2);
        let sub = run(&a, &b, &nest);
        assert!(sub.conflicts_a.is_no_conflict());
    }

    #[test]
    fn siv_symbolic_rebase() {
        // {x+3, +, 1} vs {x+1, +, 1}: same conflicts as {2, +, 1} vs
        // {0, +, 1}.
        let s = SymbolId(4);
        let nest = nest_with(&[10]);
        let a = Evolution::poly(
            LoopId(0),
            Evolution::Scalar(Scalar::SymOff(s, 3)),
            Evolution::int(1),
        );
        let b = Evolution::poly(
            LoopId(0),
            Evolution::Scalar(Scalar::SymOff(s, 1)),
            Evolution::int(1),
        );
        let sub = run(&a, &b, &nest);
        assert_eq!(sub.conflicts_a, Conflicts::One(ConflictFn::affine(0, 1)));
        assert_eq!(sub.conflicts_b, Conflicts::One(ConflictFn::affine(2, 1)));
        assert_eq!(sub.last_conflict, LastConflict::Unknown);
    }

    #[test]
    fn same_symbolic_function_conflicts_everywhere() {
        let s = SymbolId(4);
        let nest = nest_with(&[10]);
        let a = Evolution::poly(LoopId(0), Evolution::sym(s), Evolution::int(1));
        let sub = run(&a, &a.clone(), &nest);
        assert_eq!(sub.conflicts_a, Conflicts::One(ConflictFn::Constant(0)));
        assert_eq!(sub.last_conflict, LastConflict::Unbounded);
    }

    #[test]
    fn miv_gcd_disproves_dependence() {
        // {{21, +, 2}_0, +, -2}_1 vs {{20, +, 2}_0, +, -2}_1: the
        // difference is 1 and every step is even.
        let nest = nest_with(&[10, 10]);
        let a = Evolution::poly(LoopId(1), Evolution::affine(LoopId(0), 21, 2), Evolution::int(-2));
        let b = Evolution::poly(LoopId(1), Evolution::affine(LoopId(0), 20, 2), Evolution::int(-2));
        let sub = run(&a, &b, &nest);
        assert!(sub.conflicts_a.is_no_conflict());
    }

    #[test]
    fn miv_mixed_steps_respect_full_gcd() {
        // Steps 2 and 3 have gcd 1, so a difference of 1 cannot be
        // ruled out by the gcd test.
        let nest = nest_with(&[10, 10]);
        let a = Evolution::poly(LoopId(1), Evolution::affine(LoopId(0), 1, 2), Evolution::int(3));
        let b = Evolution::poly(LoopId(1), Evolution::affine(LoopId(0), 0, 2), Evolution::int(3));
        let sub = run(&a, &b, &nest);
        assert!(!sub.conflicts_a.is_no_conflict());
    }

    #[test]
    fn miv_different_loops_same_shape() {
        // {0, +, 1}_0 vs {0, +, 1}_1 (a[i] vs a[j] in a nest).
        let nest = nest_with(&[10, 10]);
        let a = Evolution::affine(LoopId(0), 0, 1);
        let b = Evolution::affine(LoopId(1), 0, 1);
        let sub = run(&a, &b, &nest);
        assert_eq!(sub.conflicts_a, Conflicts::One(ConflictFn::affine(0, 1)));
        assert_eq!(sub.conflicts_b, Conflicts::One(ConflictFn::affine(0, 1)));
    }

    #[test]
    fn undetermined_inputs_are_unknown() {
        let nest = nest_with(&[10]);
        let a = Evolution::unknown();
        let b = Evolution::affine(LoopId(0), 0, 1);
        let sub = run(&a, &b, &nest);
        assert!(sub.conflicts_a.is_unknown());
    }
}
