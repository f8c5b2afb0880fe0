//! Diophantine solver for pairs of affine access functions
//!
//! Answers "for which iterations does `a(x) = b(y)` hold" where both
//! functions are affine recurrences with literal coefficients. The
//! general path reduces the coefficient matrix to right Hermite normal
//! form (`U * A = S`), applies the gcd test to the reduced pivot, and
//! when both functions are univariate walks the one-parameter solution
//! family to find the first in-bounds conflict.
//!
//! Fast paths handle a zero initial difference without building any
//! matrix, including the bivariate-against-univariate shape.

use log::debug;

use crate::loops::LoopNest;
use crate::scev::Evolution;
use crate::subscript::{ConflictFn, Conflicts, LastConflict};

/// Greatest common divisor of the absolute values.
pub fn gcd(a: i128, b: i128) -> i128 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Ceiling of `x / y` for positive `y`.
fn ceil_div(x: i128, y: i128) -> i128 {
    (x + y - 1) / y
}

/// Floor of `x / y` for positive `y`, exact on negative numerators so
/// the solution family bounds never overcount.
fn floor_div(x: i128, y: i128) -> i128 {
    x.div_euclid(y)
}

/// Dense integer matrix used by the Hermite reduction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntMatrix {
    rows: usize,
    cols: usize,
    data: Vec<i128>,
}

impl IntMatrix {
    pub fn zero(rows: usize, cols: usize) -> Self {
        IntMatrix { rows, cols, data: vec![0; rows * cols] }
    }

    pub fn identity(n: usize) -> Self {
        let mut m = IntMatrix::zero(n, n);
        for i in 0..n {
            m[(i, i)] = 1;
        }
        m
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `row(r2) += k * row(r1)`.
    fn row_add(&mut self, r1: usize, r2: usize, k: i128) {
        for j in 0..self.cols {
            let v = self[(r1, j)];
            self[(r2, j)] += k * v;
        }
    }

    fn row_exchange(&mut self, r1: usize, r2: usize) {
        for j in 0..self.cols {
            let a = self[(r1, j)];
            let b = self[(r2, j)];
            self[(r1, j)] = b;
            self[(r2, j)] = a;
        }
    }

    fn row_negate(&mut self, r: usize) {
        for j in 0..self.cols {
            self[(r, j)] = -self[(r, j)];
        }
    }
}

impl std::ops::Index<(usize, usize)> for IntMatrix {
    type Output = i128;
    fn index(&self, (r, c): (usize, usize)) -> &i128 {
        &self.data[r * self.cols + c]
    }
}

impl std::ops::IndexMut<(usize, usize)> for IntMatrix {
    fn index_mut(&mut self, (r, c): (usize, usize)) -> &mut i128 {
        &mut self.data[r * self.cols + c]
    }
}

/// Right Hermite reduction: returns `(S, U)` with `U * A = S`, `U`
/// unimodular and `S` upper triangular. Row-wise Euclidean elimination
/// working up each column.
pub fn right_hermite(a: &IntMatrix) -> (IntMatrix, IntMatrix) {
    let m = a.rows();
    let n = a.cols();
    let mut s = a.clone();
    let mut u = IntMatrix::identity(m);

    let mut pivot = 0;
    for j in 0..n {
        if (pivot..m).any(|i| s[(i, j)] != 0) {
            pivot += 1;
            for i in (pivot..m).rev() {
                while s[(i, j)] != 0 {
                    let above = s[(i - 1, j)];
                    let here = s[(i, j)];
                    let sigma = if above * here < 0 { -1 } else { 1 };
                    let factor = sigma * (above.abs() / here.abs());

                    s.row_add(i, i - 1, -factor);
                    s.row_exchange(i, i - 1);
                    u.row_add(i, i - 1, -factor);
                    u.row_exchange(i, i - 1);
                }
            }
        }
    }
    (s, u)
}

/// Fills column 0 of `A` with the steps of `ev` (innermost loop first),
/// scaled by `mult`, starting at `index`. Returns the initial literal,
/// or `None` when a leaf is not a literal integer.
fn fill_coefficients(a: &mut IntMatrix, ev: &Evolution, index: usize, mult: i128) -> Option<i128> {
    match ev {
        Evolution::Scalar(s) => s.as_int(),
        Evolution::Poly { left, right, .. } => {
            a[(index, 0)] = mult * right.initial_condition().as_int()?;
            fill_coefficients(a, left, index + 1, mult)
        }
    }
}

fn no_conflict() -> (Conflicts, Conflicts, LastConflict) {
    (Conflicts::NoConflict, Conflicts::NoConflict, LastConflict::Count(0))
}

fn unknown() -> (Conflicts, Conflicts, LastConflict) {
    (Conflicts::Unknown, Conflicts::Unknown, LastConflict::Unknown)
}

/// Solves `{0, +, step_a}_x (t) = {0, +, step_b}_y (u)` for iteration
/// indexes up to `niter`. Steps are nonzero literals.
fn overlap_steps_univar(
    niter: i128,
    step_a: i128,
    step_b: i128,
) -> (Conflicts, Conflicts, LastConflict) {
    if (step_a > 0) == (step_b > 0) {
        let g = gcd(step_a, step_b);
        let step_overlaps_a = step_b.abs() / g;
        let step_overlaps_b = step_a.abs() / g;

        let tau2 = floor_div(niter, step_overlaps_a).min(floor_div(niter, step_overlaps_b));
        (
            Conflicts::One(ConflictFn::affine(0, step_overlaps_a)),
            Conflicts::One(ConflictFn::affine(0, step_overlaps_b)),
            LastConflict::Count(tau2.max(0) as u64),
        )
    } else {
        // Steps of opposite signs diverge immediately; the only common
        // value is at the first iteration of both loops.
        (
            Conflicts::One(ConflictFn::Constant(0)),
            Conflicts::One(ConflictFn::Constant(0)),
            LastConflict::Count(1),
        )
    }
}

/// Zero-difference case of a bivariate function `{{0, +, sx}_x, +, sy}_y`
/// against a univariate `{0, +, sz}_z`: solves the three univariate
/// projections (x against z, y against z, and the diagonal where both x
/// and y advance) and sums the conflicting families.
fn overlap_steps_affine_1_2(
    chrec_a: &Evolution,
    chrec_b: &Evolution,
    nest: &LoopNest,
) -> (Conflicts, Conflicts, LastConflict) {
    let (outer_step, inner_step, x_loop, y_loop) = match chrec_a {
        Evolution::Poly { loop_id, left, right } => match left.as_ref() {
            Evolution::Poly { loop_id: xl, right: xr, .. } => {
                let sx = match xr.initial_condition().as_int() {
                    Some(v) => v,
                    None => return unknown(),
                };
                let sy = match right.initial_condition().as_int() {
                    Some(v) => v,
                    None => return unknown(),
                };
                (sx, sy, *xl, *loop_id)
            }
            _ => return unknown(),
        },
        _ => return unknown(),
    };
    let (z_step, z_loop) = match chrec_b {
        Evolution::Poly { loop_id, right, .. } => match right.initial_condition().as_int() {
            Some(v) => (v, *loop_id),
            None => return unknown(),
        },
        _ => return unknown(),
    };

    let (niter_x, niter_y, niter_z) = match (
        nest.sound_iteration_bound(x_loop),
        nest.sound_iteration_bound(y_loop),
        nest.sound_iteration_bound(z_loop),
    ) {
        (Some(x), Some(y), Some(z)) => (x as i128, y as i128, z as i128),
        _ => {
            debug!("overlap steps test failed: no iteration counts");
            return unknown();
        }
    };

    let (a_xz, b_xz, last_xz) = overlap_steps_univar(niter_x.min(niter_z), outer_step, z_step);
    let (a_yz, b_yz, last_yz) = overlap_steps_univar(niter_y.min(niter_z), inner_step, z_step);
    let (a_xyz, b_xyz, last_xyz) = overlap_steps_univar(
        niter_x.min(niter_y).min(niter_z),
        outer_step + inner_step,
        z_step,
    );

    let xz_p = last_xz != LastConflict::Count(0);
    let yz_p = last_yz != LastConflict::Count(0);
    let xyz_p = last_xyz != LastConflict::Count(0);
    if !(xz_p || yz_p || xyz_p) {
        return no_conflict();
    }

    let mut fn_x = ConflictFn::Constant(0);
    let mut fn_y = ConflictFn::Constant(0);
    let mut fn_b = ConflictFn::Constant(0);
    let mut last = LastConflict::Count(0);
    if xz_p {
        fn_x = fn_x.fold_plus(&a_xz.single().unwrap_or(ConflictFn::Constant(0)));
        fn_b = fn_b.fold_plus(&b_xz.single().unwrap_or(ConflictFn::Constant(0)));
        last = last_xz;
    }
    if yz_p {
        fn_y = fn_y.fold_plus(&a_yz.single().unwrap_or(ConflictFn::Constant(0)));
        fn_b = fn_b.fold_plus(&b_yz.single().unwrap_or(ConflictFn::Constant(0)));
        last = last_yz;
    }
    if xyz_p {
        fn_x = fn_x.fold_plus(&a_xyz.single().unwrap_or(ConflictFn::Constant(0)));
        fn_y = fn_y.fold_plus(&a_xyz.single().unwrap_or(ConflictFn::Constant(0)));
        fn_b = fn_b.fold_plus(&b_xyz.single().unwrap_or(ConflictFn::Constant(0)));
        last = last_xyz;
    }
    (Conflicts::Pair(fn_x, fn_y), Conflicts::One(fn_b), last)
}

/// Determines the overlapping iterations of two affine access functions
/// with literal coefficients. Symbolic initial conditions must be
/// rebased away by the caller before reaching here.
pub fn analyze_affine_affine(
    chrec_a: &Evolution,
    chrec_b: &Evolution,
    nest: &LoopNest,
) -> (Conflicts, Conflicts, LastConflict) {
    debug!("analyze_affine_affine: {:?} vs {:?}", chrec_a, chrec_b);

    let nb_vars_a = chrec_a.nb_vars();
    let nb_vars_b = chrec_b.nb_vars();
    let dim = nb_vars_a + nb_vars_b;
    if dim == 0 {
        return unknown();
    }

    let mut a = IntMatrix::zero(dim, 1);
    let init_a = match fill_coefficients(&mut a, chrec_a, 0, 1) {
        Some(v) => v,
        None => return unknown(),
    };
    let init_b = match fill_coefficients(&mut a, chrec_b, nb_vars_a, -1) {
        Some(v) => v,
        None => return unknown(),
    };
    let gamma = init_b - init_a;

    // A zero difference means the first conflict is at the origin; the
    // overlap family follows from the steps alone.
    if gamma == 0 {
        if nb_vars_a == 1 && nb_vars_b == 1 {
            let (loop_a, loop_b) = match (chrec_a.variable(), chrec_b.variable()) {
                (Some(x), Some(y)) => (x, y),
                _ => return unknown(),
            };
            let (niter_a, niter_b) = match (
                nest.sound_iteration_bound(loop_a),
                nest.sound_iteration_bound(loop_b),
            ) {
                (Some(x), Some(y)) => (x as i128, y as i128),
                _ => {
                    debug!("affine-affine test failed: missing iteration counts");
                    return unknown();
                }
            };
            let step_a = a[(0, 0)];
            let step_b = -a[(1, 0)];
            return overlap_steps_univar(niter_a.min(niter_b), step_a, step_b);
        }
        if nb_vars_a == 2 && nb_vars_b == 1 {
            return overlap_steps_affine_1_2(chrec_a, chrec_b, nest);
        }
        if nb_vars_a == 1 && nb_vars_b == 2 {
            let (b_over, a_over, last) = overlap_steps_affine_1_2(chrec_b, chrec_a, nest);
            return (a_over, b_over, last);
        }
        debug!("affine-affine test failed: too many variables");
        return unknown();
    }

    // U.A = S
    let (mut s, mut u) = right_hermite(&a);
    if s[(0, 0)] < 0 {
        s[(0, 0)] *= -1;
        u.row_negate(0);
    }
    let gcd_alpha_beta = s[(0, 0)];
    if gcd_alpha_beta == 0 {
        // Degenerate system, e.g. both functions invariant.
        return unknown();
    }

    // The classic gcd test.
    if gamma % gcd_alpha_beta != 0 {
        return no_conflict();
    }

    if nb_vars_a == 1 && nb_vars_b == 1 {
        let step_a = a[(0, 0)];
        let step_b = -a[(1, 0)];

        // Both evolutions must advance in the same direction for the
        // one-parameter walk below.
        if (step_a > 0) != (step_b > 0) {
            debug!("affine-affine test failed: opposite evolution signs");
            return unknown();
        }

        // The solution family of the Diophantine equation:
        //
        //   x0 = i0 + i1 * t
        //   y0 = j0 + j1 * t
        let i0 = u[(0, 0)] * gamma / gcd_alpha_beta;
        let j0 = u[(0, 1)] * gamma / gcd_alpha_beta;
        let i1 = u[(1, 0)];
        let j1 = u[(1, 1)];

        if (i1 == 0 && i0 < 0) || (j1 == 0 && j0 < 0) {
            return no_conflict();
        }

        if i1 <= 0 || j1 <= 0 {
            debug!("affine-affine test failed: non-positive family steps");
            return unknown();
        }

        let (loop_a, loop_b) = match (chrec_a.variable(), chrec_b.variable()) {
            (Some(x), Some(y)) => (x, y),
            _ => return unknown(),
        };
        let (niter_a, niter_b) = match (
            nest.sound_iteration_bound(loop_a),
            nest.sound_iteration_bound(loop_b),
        ) {
            (Some(x), Some(y)) => (x as i128, y as i128),
            _ => {
                debug!("affine-affine test failed: missing iteration counts");
                return unknown();
            }
        };
        let niter = niter_a.min(niter_b);

        let mut tau1 = ceil_div(-i0, i1).max(ceil_div(-j0, j1));
        let tau2 = floor_div(niter - i0, i1).min(floor_div(niter - j0, j1));

        let mut x0 = i1 * tau1 + i0;
        let mut y0 = j1 * tau1 + j0;

        // (x0, y0) is one solution; shift it back to the smallest
        // non-negative one, the first conflict.
        let min_multiple = (x0 / i1).min(y0 / j1);
        x0 -= i1 * min_multiple;
        y0 -= j1 * min_multiple;
        tau1 = (x0 - i0) / i1;
        let last_conflict = tau2 - tau1;

        if x0 > niter || y0 > niter {
            // The first conflict falls outside the iteration domain.
            return no_conflict();
        }
        return (
            Conflicts::One(ConflictFn::affine(x0, i1)),
            Conflicts::One(ConflictFn::affine(y0, j1)),
            LastConflict::Count(last_conflict.max(0) as u64),
        );
    }

    debug!("affine-affine test failed: unimplemented shape");
    unknown()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loops::{LoopNest, TripCount};

    fn nest_with(counts: &[u64]) -> LoopNest {
        let mut nest = LoopNest::new();
        for &c in counts {
            nest.add_root(TripCount::Exact(c));
        }
        nest
    }

    #[test]
    fn hermite_reduces_column_to_gcd() {
        // A = [9, -6]^T; gcd is 3 and U stays unimodular.
        let mut a = IntMatrix::zero(2, 1);
        a[(0, 0)] = 9;
        a[(1, 0)] = -6;
        let (s, u) = right_hermite(&a);
        assert_eq!(s[(0, 0)].abs(), 3);
        assert_eq!(s[(1, 0)], 0);
        // det(U) = +-1
        let det = u[(0, 0)] * u[(1, 1)] - u[(0, 1)] * u[(1, 0)];
        assert_eq!(det.abs(), 1);
        // U * A = S
        assert_eq!(u[(0, 0)] * 9 + u[(0, 1)] * -6, s[(0, 0)]);
        assert_eq!(u[(1, 0)] * 9 + u[(1, 1)] * -6, s[(1, 0)]);
    }

    #[test]
    fn gcd_test_disproves_dependence() {
        // {0, +, 2}_0 vs {1, +, 2}_0: 2x = 2y + 1 has no integer
        // solution.
        let nest = nest_with(&[100]);
        let a = Evolution::affine(crate::loops::LoopId(0), 0, 2);
        let b = Evolution::affine(crate::loops::LoopId(0), 1, 2);
        let (ca, cb, last) = analyze_affine_affine(&a, &b, &nest);
        assert_eq!(ca, Conflicts::NoConflict);
        assert_eq!(cb, Conflicts::NoConflict);
        assert_eq!(last, LastConflict::Count(0));
    }

    #[test]
    fn same_function_conflicts_everywhere() {
        let nest = nest_with(&[100]);
        let a = Evolution::affine(crate::loops::LoopId(0), 3, 1);
        let b = Evolution::affine(crate::loops::LoopId(0), 3, 1);
        let (ca, cb, _) = analyze_affine_affine(&a, &b, &nest);
        assert_eq!(ca, Conflicts::One(ConflictFn::affine(0, 1)));
        assert_eq!(cb, Conflicts::One(ConflictFn::affine(0, 1)));
    }

    #[test]
    fn shifted_conflict_family() {
        // a(x) = 2 + x, b(y) = 0 + y: conflicts at a(t) = b(t + 2).
        let nest = nest_with(&[9]);
        let a = Evolution::affine(crate::loops::LoopId(0), 2, 1);
        let b = Evolution::affine(crate::loops::LoopId(0), 0, 1);
        let (ca, cb, last) = analyze_affine_affine(&a, &b, &nest);
        assert_eq!(ca, Conflicts::One(ConflictFn::affine(0, 1)));
        assert_eq!(cb, Conflicts::One(ConflictFn::affine(2, 1)));
        // Iterations 0..=8: x in 0..=6 pairs with y in 2..=8.
        assert_eq!(last, LastConflict::Count(6));
    }

    #[test]
    fn different_strides_conflict_on_multiples() {
        // a(x) = 4x, b(y) = 6y: common values at lcm multiples.
        let nest = nest_with(&[100]);
        let a = Evolution::affine(crate::loops::LoopId(0), 0, 4);
        let b = Evolution::affine(crate::loops::LoopId(0), 0, 6);
        let (ca, cb, _) = analyze_affine_affine(&a, &b, &nest);
        assert_eq!(ca, Conflicts::One(ConflictFn::affine(0, 3)));
        assert_eq!(cb, Conflicts::One(ConflictFn::affine(0, 2)));
    }

    #[test]
    fn conflict_outside_domain_is_independence() {
        // a(x) = 12 + 2x, b(y) = 10 + y: the smallest non-negative
        // solution is x = 0, y = 2, but the loop runs only twice
        // (indexes 0 and 1).
        let nest = nest_with(&[2]);
        let a = Evolution::affine(crate::loops::LoopId(0), 12, 2);
        let b = Evolution::affine(crate::loops::LoopId(0), 10, 1);
        let (ca, cb, last) = analyze_affine_affine(&a, &b, &nest);
        assert_eq!(ca, Conflicts::NoConflict);
        assert_eq!(cb, Conflicts::NoConflict);
        assert_eq!(last, LastConflict::Count(0));
    }

    #[test]
    fn last_conflict_count_does_not_overshoot_the_domain() {
        // a(x) = 10 + 2x, b(y) = 3y over iterations 0..=5: the only
        // conflict is a(1) = b(4) = 12; the next family member needs
        // y = 6. The upper bound on the family parameter is negative
        // and must be floored, not truncated towards zero.
        let nest = nest_with(&[6]);
        let a = Evolution::affine(crate::loops::LoopId(0), 10, 2);
        let b = Evolution::affine(crate::loops::LoopId(0), 0, 3);
        let (ca, cb, last) = analyze_affine_affine(&a, &b, &nest);
        assert_eq!(ca, Conflicts::One(ConflictFn::affine(1, 3)));
        assert_eq!(cb, Conflicts::One(ConflictFn::affine(4, 2)));
        assert_eq!(last, LastConflict::Count(0));
    }

    #[test]
    fn opposite_sign_steps_with_equal_inits() {
        // a(x) = 5 + x, b(y) = 5 - y: only conflict is x = y = 0.
        let nest = nest_with(&[10]);
        let a = Evolution::affine(crate::loops::LoopId(0), 5, 1);
        let b = Evolution::affine(crate::loops::LoopId(0), 5, -1);
        let (ca, cb, last) = analyze_affine_affine(&a, &b, &nest);
        assert_eq!(ca, Conflicts::One(ConflictFn::Constant(0)));
        assert_eq!(cb, Conflicts::One(ConflictFn::Constant(0)));
        assert_eq!(last, LastConflict::Count(1));
    }

    #[test]
    fn unknown_bound_blocks_conclusion() {
        let mut nest = LoopNest::new();
        nest.add_root(TripCount::Unknown);
        let a = Evolution::affine(crate::loops::LoopId(0), 2, 1);
        let b = Evolution::affine(crate::loops::LoopId(0), 0, 1);
        let (ca, _, last) = analyze_affine_affine(&a, &b, &nest);
        assert_eq!(ca, Conflicts::Unknown);
        assert_eq!(last, LastConflict::Unknown);
    }

    #[test]
    fn unsound_estimate_blocks_conclusion() {
        let mut nest = LoopNest::new();
        nest.add_root(TripCount::Estimate { max: 2, sound: false });
        let a = Evolution::affine(crate::loops::LoopId(0), 12, 2);
        let b = Evolution::affine(crate::loops::LoopId(0), 10, 1);
        let (ca, _, _) = analyze_affine_affine(&a, &b, &nest);
        assert_eq!(ca, Conflicts::Unknown);
    }
}
