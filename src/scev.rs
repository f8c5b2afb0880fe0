//! Scalar evolutions (access functions)
//!
//! The dependence engine consumes closed-form descriptions of how a
//! subscript or address varies across loop iterations: a loop-invariant
//! scalar, or a polynomial recurrence `{left, +, right}_loop`. The
//! scalar-evolution collaborator of the host compiler builds these; the
//! engine only classifies and folds them.
//!
//! Loop identifiers must be assigned outermost-first (an outer loop has a
//! smaller raw id than any loop nested in it), which is what
//! [`crate::loops::LoopNest`] produces. Folding relies on this to order
//! recurrences of different loops.

use crate::expr::{AddrExpr, Expr, PtrId, SymbolId};
use crate::loops::LoopId;

/// A loop-invariant scalar leaf of an evolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scalar {
    /// Literal integer.
    Int(i128),
    /// Named invariant value.
    Sym(SymbolId),
    /// Named invariant value plus a literal, `sym + k`. Lets the engine
    /// fold differences of two offsets of the same symbol to a literal.
    SymOff(SymbolId, i128),
    /// Value the collaborator could not determine.
    Unknown,
}

impl Scalar {
    pub fn as_int(self) -> Option<i128> {
        match self {
            Scalar::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_undetermined(self) -> bool {
        matches!(self, Scalar::Unknown)
    }

    pub fn contains_symbols(self) -> bool {
        matches!(self, Scalar::Sym(_) | Scalar::SymOff(..))
    }

    /// Exact sum; `Unknown` when the symbolic parts cannot be combined.
    pub fn fold_plus(self, other: Scalar) -> Scalar {
        use Scalar::*;
        match (self, other) {
            (Unknown, _) | (_, Unknown) => Unknown,
            (Int(a), Int(b)) => Int(a + b),
            (Sym(s), Int(k)) | (Int(k), Sym(s)) => {
                if k == 0 {
                    Sym(s)
                } else {
                    SymOff(s, k)
                }
            }
            (SymOff(s, a), Int(k)) | (Int(k), SymOff(s, a)) => {
                if a + k == 0 {
                    Sym(s)
                } else {
                    SymOff(s, a + k)
                }
            }
            // Sums of two distinct symbols stay symbolic in ways this
            // representation cannot express.
            _ => Unknown,
        }
    }

    /// Exact difference; `Unknown` when the symbolic parts do not cancel.
    pub fn fold_minus(self, other: Scalar) -> Scalar {
        use Scalar::*;
        match (self, other) {
            (Unknown, _) | (_, Unknown) => Unknown,
            (Int(a), Int(b)) => Int(a - b),
            (Sym(a), Sym(b)) if a == b => Int(0),
            (SymOff(a, x), SymOff(b, y)) if a == b => Int(x - y),
            (SymOff(a, x), Sym(b)) if a == b => Int(x),
            (Sym(a), SymOff(b, y)) if a == b => Int(-y),
            (Sym(s), Int(k)) => {
                if k == 0 {
                    Sym(s)
                } else {
                    SymOff(s, -k)
                }
            }
            (SymOff(s, a), Int(k)) => {
                if a - k == 0 {
                    Sym(s)
                } else {
                    SymOff(s, a - k)
                }
            }
            _ => Unknown,
        }
    }
}

/// A closed-form access function.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Evolution {
    /// Loop-invariant value.
    Scalar(Scalar),
    /// Polynomial recurrence: value `left` on entry, advancing by
    /// `right` each iteration of `loop_id`.
    Poly {
        loop_id: LoopId,
        left: Box<Evolution>,
        right: Box<Evolution>,
    },
}

impl Evolution {
    pub fn int(v: i128) -> Self {
        Evolution::Scalar(Scalar::Int(v))
    }

    pub fn sym(s: SymbolId) -> Self {
        Evolution::Scalar(Scalar::Sym(s))
    }

    pub fn unknown() -> Self {
        Evolution::Scalar(Scalar::Unknown)
    }

    /// `{left, +, right}_loop`, normalized: a zero step collapses to the
    /// initial value.
    pub fn poly(loop_id: LoopId, left: Evolution, right: Evolution) -> Self {
        if right == Evolution::int(0) {
            left
        } else {
            Evolution::Poly {
                loop_id,
                left: Box::new(left),
                right: Box::new(right),
            }
        }
    }

    /// `{base, +, step}_loop` over literal integers.
    pub fn affine(loop_id: LoopId, base: i128, step: i128) -> Self {
        Evolution::poly(loop_id, Evolution::int(base), Evolution::int(step))
    }

    /// True for a loop-invariant function (a determined scalar).
    pub fn is_constant(&self) -> bool {
        matches!(self, Evolution::Scalar(s) if !s.is_undetermined())
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Evolution::Scalar(Scalar::Int(0)))
    }

    /// True when any leaf is an undetermined value.
    pub fn contains_undetermined(&self) -> bool {
        match self {
            Evolution::Scalar(s) => s.is_undetermined(),
            Evolution::Poly { left, right, .. } => {
                left.contains_undetermined() || right.contains_undetermined()
            }
        }
    }

    /// True when any leaf is a named symbol (as opposed to a literal).
    pub fn contains_symbols(&self) -> bool {
        match self {
            Evolution::Scalar(s) => s.contains_symbols(),
            Evolution::Poly { left, right, .. } => {
                left.contains_symbols() || right.contains_symbols()
            }
        }
    }

    /// True for `{inv, +, inv}_loop`: affine in exactly one loop.
    pub fn is_affine_univariate(&self) -> bool {
        match self {
            Evolution::Poly { left, right, .. } => left.is_constant() && right.is_constant(),
            Evolution::Scalar(_) => false,
        }
    }

    /// True for a chain of recurrences that is affine in every loop it
    /// varies over: each step is invariant and each nesting level uses a
    /// strictly outer loop.
    pub fn is_affine_multivariate(&self) -> bool {
        match self {
            Evolution::Scalar(_) => false,
            Evolution::Poly { loop_id, left, right } => {
                if !right.is_constant() {
                    return false;
                }
                match left.as_ref() {
                    Evolution::Scalar(s) => !s.is_undetermined(),
                    Evolution::Poly { loop_id: outer, .. } => {
                        outer.0 < loop_id.0 && left.is_affine_multivariate()
                    }
                }
            }
        }
    }

    /// The only loop this function varies over, when univariate.
    pub fn variable(&self) -> Option<LoopId> {
        match self {
            Evolution::Poly { loop_id, .. } => Some(*loop_id),
            Evolution::Scalar(_) => None,
        }
    }

    /// Value on entry to the whole nest: the leftmost scalar.
    pub fn initial_condition(&self) -> Scalar {
        match self {
            Evolution::Scalar(s) => *s,
            Evolution::Poly { left, .. } => left.initial_condition(),
        }
    }

    /// Per-iteration step in `loop_id`, or `None` when the function does
    /// not vary over that loop.
    pub fn step_in_loop(&self, id: LoopId) -> Option<&Evolution> {
        match self {
            Evolution::Scalar(_) => None,
            Evolution::Poly { loop_id, left, right } => {
                if *loop_id == id {
                    Some(right)
                } else {
                    left.step_in_loop(id)
                }
            }
        }
    }

    /// Number of distinct loops this function varies over.
    pub fn nb_vars(&self) -> usize {
        match self {
            Evolution::Scalar(_) => 0,
            Evolution::Poly { left, .. } => 1 + left.nb_vars(),
        }
    }

    /// Exact difference of two evolutions, folding recurrences over the
    /// same loop elementwise. An inexpressible difference degrades to an
    /// `Unknown` leaf, never to a wrong value.
    pub fn fold_minus(&self, other: &Evolution) -> Evolution {
        match (self, other) {
            (Evolution::Scalar(a), Evolution::Scalar(b)) => Evolution::Scalar(a.fold_minus(*b)),
            (
                Evolution::Poly { loop_id: la, left: l1, right: r1 },
                Evolution::Poly { loop_id: lb, left: l2, right: r2 },
            ) => {
                if la == lb {
                    Evolution::poly(*la, l1.fold_minus(l2), r1.fold_minus(r2))
                } else if la.0 < lb.0 {
                    // Self varies only in an outer loop, so it folds into
                    // the inner recurrence's initial value.
                    Evolution::poly(*lb, self.fold_minus(l2), Evolution::int(0).fold_minus(r2))
                } else {
                    Evolution::poly(*la, l1.fold_minus(other), (**r1).clone())
                }
            }
            (Evolution::Poly { loop_id, left, right }, Evolution::Scalar(_)) => {
                Evolution::poly(*loop_id, left.fold_minus(other), (**right).clone())
            }
            (Evolution::Scalar(_), Evolution::Poly { loop_id, left, right }) => Evolution::poly(
                *loop_id,
                self.fold_minus(left),
                Evolution::int(0).fold_minus(right),
            ),
        }
    }

    /// Exact sum, same folding rules as [`Evolution::fold_minus`].
    pub fn fold_plus(&self, other: &Evolution) -> Evolution {
        match (self, other) {
            (Evolution::Scalar(a), Evolution::Scalar(b)) => Evolution::Scalar(a.fold_plus(*b)),
            (
                Evolution::Poly { loop_id: la, left: l1, right: r1 },
                Evolution::Poly { loop_id: lb, left: l2, right: r2 },
            ) => {
                if la == lb {
                    Evolution::poly(*la, l1.fold_plus(l2), r1.fold_plus(r2))
                } else if la.0 < lb.0 {
                    Evolution::poly(*lb, self.fold_plus(l2), (**r2).clone())
                } else {
                    Evolution::poly(*la, l1.fold_plus(other), (**r1).clone())
                }
            }
            (Evolution::Poly { loop_id, left, right }, Evolution::Scalar(_)) => {
                Evolution::poly(*loop_id, left.fold_plus(other), (**right).clone())
            }
            (Evolution::Scalar(_), Evolution::Poly { .. }) => other.fold_plus(self),
        }
    }
}

/// Evolution of a pointer value across a loop's iterations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerEvolution {
    /// Address the pointer holds on entry to the loop, or `None` when
    /// the collaborator could not determine it.
    pub init: Option<AddrExpr>,
    /// Per-iteration advance in bytes. `None` when the evolution is
    /// unknown; `Scalar::Int(0)` when the pointer is loop invariant.
    pub step: Option<Scalar>,
}

/// Interface to the host's scalar-evolution engine.
///
/// The dependence engine never computes evolutions itself; it asks this
/// collaborator for the closed form of every index expression, invariant
/// symbol and pointer it encounters.
pub trait ScalarEvolution {
    /// Closed form of an index expression in `loop_id`.
    fn index_evolution(&self, loop_id: LoopId, index: &Expr) -> Evolution;

    /// Closed form of a named invariant appearing in an offset.
    fn symbol_evolution(&self, loop_id: LoopId, sym: SymbolId) -> Evolution;

    /// Initial value and byte step of a pointer in `loop_id`.
    fn pointer_evolution(&self, loop_id: LoopId, ptr: PtrId) -> PointerEvolution;
}

/// Table-backed [`ScalarEvolution`] for hosts that precompute the
/// closed forms (and for tests).
#[derive(Debug, Default)]
pub struct EvolutionTable {
    indexes: fxhash::FxHashMap<(LoopId, Expr), Evolution>,
    symbols: fxhash::FxHashMap<(LoopId, SymbolId), Evolution>,
    pointers: fxhash::FxHashMap<(LoopId, PtrId), PointerEvolution>,
}

impl EvolutionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_index(&mut self, loop_id: LoopId, index: Expr, ev: Evolution) {
        self.indexes.insert((loop_id, index), ev);
    }

    pub fn set_symbol(&mut self, loop_id: LoopId, sym: SymbolId, ev: Evolution) {
        self.symbols.insert((loop_id, sym), ev);
    }

    pub fn set_pointer(&mut self, loop_id: LoopId, ptr: PtrId, ev: PointerEvolution) {
        self.pointers.insert((loop_id, ptr), ev);
    }
}

impl ScalarEvolution for EvolutionTable {
    fn index_evolution(&self, loop_id: LoopId, index: &Expr) -> Evolution {
        if let Some(ev) = self.indexes.get(&(loop_id, index.clone())) {
            return ev.clone();
        }
        // Literals are their own evolution; everything else unregistered
        // is undetermined.
        match index.as_int() {
            Some(v) => Evolution::int(v),
            None => Evolution::unknown(),
        }
    }

    fn symbol_evolution(&self, loop_id: LoopId, sym: SymbolId) -> Evolution {
        self.symbols
            .get(&(loop_id, sym))
            .cloned()
            .unwrap_or(Evolution::Scalar(Scalar::Sym(sym)))
    }

    fn pointer_evolution(&self, loop_id: LoopId, ptr: PtrId) -> PointerEvolution {
        self.pointers
            .get(&(loop_id, ptr))
            .cloned()
            .unwrap_or(PointerEvolution { init: None, step: None })
    }
}
