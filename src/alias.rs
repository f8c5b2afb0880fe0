//! Base disambiguation
//!
//! Decides whether two references can touch the same memory region
//! before any subscript analysis runs. Named objects are compared
//! structurally; pointer bases fall back to the host's alias oracle and
//! to `restrict` semantics.

use crate::data_ref::{BaseAddress, BaseObject, DataReference};
use crate::expr::MemTag;

/// Outcome of comparing two base regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriState {
    /// The regions are provably disjoint.
    DefinitelyDifferent,
    /// The references start from the same region; subscript analysis
    /// decides the rest.
    DefinitelySame,
    Unknown,
}

/// Host-provided points-to answer for tagged memory.
pub trait AliasOracle {
    /// True when memory tagged `a` may overlap memory tagged `b`.
    fn may_alias(&self, a: MemTag, b: MemTag) -> bool;
}

/// Oracle with no points-to information: everything may alias.
#[derive(Debug, Default)]
pub struct ConservativeAliasing;

impl AliasOracle for ConservativeAliasing {
    fn may_alias(&self, _a: MemTag, _b: MemTag) -> bool {
        true
    }
}

fn tags_differ(
    a: &DataReference,
    b: &DataReference,
    oracle: &dyn AliasOracle,
) -> TriState {
    match (a.memtag, b.memtag) {
        (Some(ta), Some(tb)) => {
            if oracle.may_alias(ta, tb) {
                TriState::Unknown
            } else {
                TriState::DefinitelyDifferent
            }
        }
        _ => TriState::Unknown,
    }
}

fn object_differ(
    base_a: &BaseObject,
    base_b: &BaseObject,
    a: &DataReference,
    b: &DataReference,
    oracle: &dyn AliasOracle,
) -> TriState {
    use BaseObject::*;

    if base_a == base_b {
        return TriState::DefinitelySame;
    }
    match (base_a, base_b) {
        // Two distinct declarations occupy distinct storage.
        (Decl(x), Decl(y)) => {
            debug_assert_ne!(x, y);
            TriState::DefinitelyDifferent
        }
        (Deref(p), Deref(q)) => {
            if p == q {
                TriState::DefinitelySame
            } else {
                tags_differ(a, b, oracle)
            }
        }
        (Decl(_), Deref(_)) | (Deref(_), Decl(_)) => tags_differ(a, b, oracle),
        // Two field accesses: disjoint parents mean disjoint fields,
        // the same parent with different offsets selects different
        // fields.
        (
            Field { base: ba, byte_offset: oa },
            Field { base: bb, byte_offset: ob },
        ) => match object_differ(ba, bb, a, b, oracle) {
            TriState::DefinitelyDifferent => TriState::DefinitelyDifferent,
            TriState::DefinitelySame => {
                if oa == ob {
                    TriState::DefinitelySame
                } else {
                    TriState::DefinitelyDifferent
                }
            }
            TriState::Unknown => TriState::Unknown,
        },
        // A field access against a whole object: only a disjoint parent
        // proves anything.
        (Field { base, .. }, other) | (other, Field { base, .. }) => {
            match object_differ(base, other, a, b, oracle) {
                TriState::DefinitelyDifferent => TriState::DefinitelyDifferent,
                _ => TriState::Unknown,
            }
        }
    }
}

fn restrict_rule(a: &DataReference, b: &DataReference) -> bool {
    // A write through a restrict pointer cannot alias accesses made
    // through a different pointer in the same scope.
    (a.restrict_p && !a.is_read) || (b.restrict_p && !b.is_read)
}

fn addr_differ(
    addr_a: BaseAddress,
    addr_b: BaseAddress,
    a: &DataReference,
    b: &DataReference,
    oracle: &dyn AliasOracle,
) -> TriState {
    if addr_a == addr_b {
        // Same starting address: the offsets decide. Equal invariant
        // offsets give the same region; anything else stays open since
        // two distinct symbolic offsets may still carry equal values.
        return if a.offset == b.offset {
            TriState::DefinitelySame
        } else {
            TriState::Unknown
        };
    }
    match (addr_a, addr_b) {
        (BaseAddress::Object(x), BaseAddress::Object(y)) => {
            debug_assert_ne!(x, y);
            TriState::DefinitelyDifferent
        }
        _ => {
            if tags_differ(a, b, oracle) == TriState::DefinitelyDifferent {
                TriState::DefinitelyDifferent
            } else if restrict_rule(a, b) {
                TriState::DefinitelyDifferent
            } else {
                TriState::Unknown
            }
        }
    }
}

/// Compares the regions of two references. `DefinitelySame` means the
/// subscript tests apply; `DefinitelyDifferent` settles independence on
/// its own.
pub fn base_differ(
    a: &DataReference,
    b: &DataReference,
    oracle: &dyn AliasOracle,
) -> TriState {
    if let (Some(base_a), Some(base_b)) = (&a.base_object, &b.base_object) {
        return object_differ(base_a, base_b, a, b, oracle);
    }
    if let (Some(addr_a), Some(addr_b)) = (a.base_address, b.base_address) {
        return addr_differ(addr_a, addr_b, a, b, oracle);
    }
    TriState::Unknown
}
