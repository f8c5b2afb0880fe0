//! Data references
//!
//! Turns a memory access expression into the flat record the dependence
//! tests consume: a base (object or address), a loop-invariant offset,
//! a literal initial displacement, a per-iteration step, and one access
//! function per array dimension.

use indexmap::IndexMap;
use log::debug;
use smallvec::SmallVec;

use crate::expr::{AddrExpr, DeclId, Expr, MemRef, MemTag, PtrId, StmtId};
use crate::loops::LoopId;
use crate::scev::{Evolution, Scalar, ScalarEvolution};

/// Index of a reference inside a [`DataRefs`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataRefId(pub u32);

/// The named object a reference touches, when it can be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseObject {
    Decl(DeclId),
    Deref(PtrId),
    Field { base: Box<BaseObject>, byte_offset: i128 },
}

/// The address a reference starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseAddress {
    Object(DeclId),
    Pointer(PtrId),
}

/// Analysis failed for this access; the whole loop result degrades to a
/// single conservative relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unanalyzable {
    pub reason: &'static str,
}

impl std::fmt::Display for Unanalyzable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unanalyzable reference: {}", self.reason)
    }
}

fn fail(reason: &'static str) -> Unanalyzable {
    Unanalyzable { reason }
}

/// One analyzed memory access.
#[derive(Debug, Clone)]
pub struct DataReference {
    pub stmt: StmtId,
    pub loop_id: LoopId,
    pub is_read: bool,
    /// Resolved object, for accesses rooted at a declaration.
    pub base_object: Option<BaseObject>,
    /// Starting address, for accesses with a resolvable address.
    pub base_address: Option<BaseAddress>,
    /// Loop-invariant symbolic part of the byte offset.
    pub offset: Option<Expr>,
    /// Literal part of the byte offset.
    pub init: i128,
    /// Per-iteration advance of the address in bytes.
    pub step: Scalar,
    /// One access function per dimension, rightmost subscript first.
    pub access_fns: SmallVec<[Evolution; 2]>,
    /// `init` modulo the vector alignment, when the symbolic offset
    /// does not get in the way.
    pub misalign: Option<i128>,
    pub base_aligned: bool,
    pub memtag: Option<MemTag>,
    pub restrict_p: bool,
}

impl DataReference {
    pub fn num_dimensions(&self) -> usize {
        self.access_fns.len()
    }
}

/// Arena of the references found in one loop.
#[derive(Debug, Clone, Default)]
pub struct DataRefs {
    refs: Vec<DataReference>,
}

impl DataRefs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, dr: DataReference) -> DataRefId {
        let id = DataRefId(self.refs.len() as u32);
        self.refs.push(dr);
        id
    }

    pub fn get(&self, id: DataRefId) -> &DataReference {
        &self.refs[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = DataRefId> {
        (0..self.refs.len() as u32).map(DataRefId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (DataRefId, &DataReference)> {
        self.refs.iter().enumerate().map(|(i, r)| (DataRefId(i as u32), r))
    }

    /// References grouped by statement, in program order.
    pub fn by_statement(&self) -> IndexMap<StmtId, Vec<DataRefId>> {
        let mut map: IndexMap<StmtId, Vec<DataRefId>> = IndexMap::new();
        for (id, dr) in self.iter() {
            map.entry(dr.stmt).or_default().push(id);
        }
        map
    }
}

/// Split of a loop-invariant byte offset into its literal and symbolic
/// parts.
#[derive(Debug, Default)]
struct OffsetParts {
    constant: i128,
    symbolic: Option<Expr>,
}

impl OffsetParts {
    fn add_symbolic(&mut self, e: Expr) {
        self.symbolic = Some(match self.symbolic.take() {
            Some(prev) => Expr::plus(prev, e),
            None => e,
        });
    }
}

/// Decomposes an invariant offset expression. Multiplication by a
/// literal distributes over the split; anything else stays symbolic.
fn analyze_offset_expr(expr: &Expr, negate: bool, parts: &mut OffsetParts) {
    match expr {
        Expr::IntConst(v) => {
            parts.constant += if negate { -*v } else { *v };
        }
        Expr::Plus(a, b) => {
            analyze_offset_expr(a, negate, parts);
            analyze_offset_expr(b, negate, parts);
        }
        Expr::Minus(a, b) => {
            analyze_offset_expr(a, negate, parts);
            analyze_offset_expr(b, !negate, parts);
        }
        Expr::Mult(a, b) => match (a.as_int(), b.as_int()) {
            (Some(x), Some(y)) => {
                let v = x * y;
                parts.constant += if negate { -v } else { v };
            }
            _ => {
                let e = expr.clone();
                parts.add_symbolic(if negate {
                    Expr::minus(Expr::int(0), e)
                } else {
                    e
                });
            }
        },
        Expr::Symbol(_) => {
            let e = expr.clone();
            parts.add_symbolic(if negate { Expr::minus(Expr::int(0), e) } else { e });
        }
    }
}

/// Peels an address expression down to its root, accumulating the
/// offsets added on top of it.
fn address_analysis(addr: &AddrExpr, parts: &mut OffsetParts) -> BaseAddress {
    match addr {
        AddrExpr::AddrOf(decl) => BaseAddress::Object(*decl),
        AddrExpr::Pointer(p) => BaseAddress::Pointer(*p),
        AddrExpr::Plus(base, off) => {
            analyze_offset_expr(off, false, parts);
            address_analysis(base, parts)
        }
        AddrExpr::Minus(base, off) => {
            analyze_offset_expr(off, true, parts);
            address_analysis(base, parts)
        }
    }
}

/// Resolves the object chain of an access rooted at a declaration,
/// collecting access functions of each array dimension on the way.
/// Dimensions are recorded outermost expression node first, so the
/// rightmost subscript of the source lands at index 0.
fn object_analysis(
    mem: &MemRef,
    loop_id: LoopId,
    scev: &dyn ScalarEvolution,
    access_fns: &mut SmallVec<[Evolution; 2]>,
    init: &mut i128,
) -> Result<BaseObject, Unanalyzable> {
    match mem {
        MemRef::Decl(d) => Ok(BaseObject::Decl(*d)),
        MemRef::Deref { ptr, .. } => Ok(BaseObject::Deref(*ptr)),
        MemRef::Index { base, index, .. } => {
            access_fns.push(scev.index_evolution(loop_id, index));
            object_analysis(base, loop_id, scev, access_fns, init)
        }
        MemRef::Field { base, byte_offset } => {
            let inner = object_analysis(base, loop_id, scev, access_fns, init)?;
            *init += byte_offset;
            Ok(BaseObject::Field { base: Box::new(inner), byte_offset: *byte_offset })
        }
    }
}

fn root_decl(obj: &BaseObject) -> Option<DeclId> {
    match obj {
        BaseObject::Decl(d) => Some(*d),
        BaseObject::Deref(_) => None,
        BaseObject::Field { base, .. } => root_decl(base),
    }
}

fn root_deref(mem: &MemRef) -> Option<&MemRef> {
    match mem {
        MemRef::Deref { .. } => Some(mem),
        MemRef::Decl(_) => None,
        MemRef::Index { base, .. } | MemRef::Field { base, .. } => root_deref(base),
    }
}

fn misalignment(init: i128, parts: &OffsetParts, alignment: Option<u64>) -> Option<i128> {
    let align = alignment? as i128;
    if parts.symbolic.is_some() {
        // A symbolic offset of unknown remainder hides the alignment.
        return None;
    }
    Some(init.rem_euclid(align))
}

/// Builds the [`DataReference`] record for one access, or reports the
/// access as unanalyzable.
pub fn build_data_ref(
    mem: &MemRef,
    stmt: StmtId,
    loop_id: LoopId,
    is_read: bool,
    scev: &dyn ScalarEvolution,
    alignment: Option<u64>,
) -> Result<DataReference, Unanalyzable> {
    match mem {
        MemRef::Deref { ptr, size, restrict_p, tag } => build_pointer_ref(
            *ptr, *size, *restrict_p, *tag, stmt, loop_id, is_read, scev, alignment,
        ),
        // Subscripts applied on top of a dereference need the
        // pointed-to shape, which this representation does not carry.
        _ if root_deref(mem).is_some() => Err(fail("indexed dereference")),
        _ => build_object_ref(mem, stmt, loop_id, is_read, scev, alignment),
    }
}

fn build_object_ref(
    mem: &MemRef,
    stmt: StmtId,
    loop_id: LoopId,
    is_read: bool,
    scev: &dyn ScalarEvolution,
    alignment: Option<u64>,
) -> Result<DataReference, Unanalyzable> {
    let mut access_fns = SmallVec::new();
    let mut init = 0i128;
    let base_object = object_analysis(mem, loop_id, scev, &mut access_fns, &mut init)?;

    for f in &access_fns {
        if f.contains_undetermined() {
            debug!("access function could not be analyzed");
        }
    }

    let decl = root_decl(&base_object).ok_or_else(|| fail("unresolved base object"))?;
    let parts = OffsetParts::default();
    let misalign = misalignment(init, &parts, alignment);

    Ok(DataReference {
        stmt,
        loop_id,
        is_read,
        base_object: Some(base_object),
        base_address: Some(BaseAddress::Object(decl)),
        offset: None,
        init,
        step: Scalar::Int(0),
        access_fns,
        misalign,
        // Declarations are laid out at their natural alignment.
        base_aligned: true,
        memtag: Some(MemTag::Decl(decl)),
        restrict_p: false,
    })
}

fn build_pointer_ref(
    ptr: PtrId,
    size: u64,
    restrict_p: bool,
    tag: Option<MemTag>,
    stmt: StmtId,
    loop_id: LoopId,
    is_read: bool,
    scev: &dyn ScalarEvolution,
    alignment: Option<u64>,
) -> Result<DataReference, Unanalyzable> {
    if size == 0 {
        return Err(fail("zero-sized access"));
    }
    let ev = scev.pointer_evolution(loop_id, ptr);
    let init_addr = ev.init.ok_or_else(|| fail("pointer without a known initial value"))?;
    let step = match ev.step {
        Some(Scalar::Unknown) | None => return Err(fail("pointer with an unknown step")),
        Some(s) => s,
    };

    let mut parts = OffsetParts::default();
    let base_address = address_analysis(&init_addr, &mut parts);

    let elem = size as i128;
    let access_fn = match step {
        Scalar::Int(0) => Evolution::int(parts.constant / elem),
        Scalar::Int(s) if s % elem == 0 && parts.constant % elem == 0 => {
            Evolution::affine(loop_id, parts.constant / elem, s / elem)
        }
        Scalar::Int(_) => {
            // The pointer does not move by whole elements; the access
            // pattern is not expressible as an array subscript.
            return Err(fail("pointer step not a multiple of the access size"));
        }
        _ => return Err(fail("symbolic pointer step")),
    };

    let mut access_fns = SmallVec::new();
    access_fns.push(access_fn);

    let base_object = match base_address {
        BaseAddress::Object(d) => Some(BaseObject::Decl(d)),
        BaseAddress::Pointer(p) => {
            if tag.is_some() {
                Some(BaseObject::Deref(p))
            } else {
                None
            }
        }
    };
    let memtag = tag.or(match base_address {
        BaseAddress::Object(d) => Some(MemTag::Decl(d)),
        BaseAddress::Pointer(_) => None,
    });

    let misalign = misalignment(parts.constant, &parts, alignment);

    Ok(DataReference {
        stmt,
        loop_id,
        is_read,
        base_object,
        base_address: Some(base_address),
        offset: parts.symbolic,
        init: parts.constant,
        step,
        access_fns,
        misalign,
        base_aligned: matches!(base_address, BaseAddress::Object(_)),
        memtag,
        restrict_p,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loops::{LoopNest, TripCount};
    use crate::scev::{EvolutionTable, PointerEvolution};

    fn loop0() -> LoopId {
        let mut nest = LoopNest::new();
        nest.add_root(TripCount::Exact(10))
    }

    #[test]
    fn array_access_collects_subscripts() {
        // a[i][j] with i = {0, +, 1} and j = {0, +, 2}.
        let l = loop0();
        let i = Expr::sym(0);
        let j = Expr::sym(1);
        let mut scev = EvolutionTable::new();
        scev.set_index(l, i.clone(), Evolution::affine(l, 0, 1));
        scev.set_index(l, j.clone(), Evolution::affine(l, 0, 2));

        let mem = MemRef::index(MemRef::index(MemRef::Decl(DeclId(3)), i, 8), j, 8);
        let dr = build_data_ref(&mem, StmtId(0), l, true, &scev, None).unwrap();

        assert_eq!(dr.num_dimensions(), 2);
        // Rightmost subscript first.
        assert_eq!(dr.access_fns[0], Evolution::affine(l, 0, 2));
        assert_eq!(dr.access_fns[1], Evolution::affine(l, 0, 1));
        assert_eq!(dr.base_address, Some(BaseAddress::Object(DeclId(3))));
        assert!(dr.base_aligned);
        assert_eq!(dr.memtag, Some(MemTag::Decl(DeclId(3))));
    }

    #[test]
    fn by_statement_groups_in_program_order() {
        let l = loop0();
        let scev = EvolutionTable::new();
        let mut refs = DataRefs::new();
        for (stmt, decl) in [(1u32, 7u32), (0, 8), (1, 9)] {
            let mem = MemRef::field(MemRef::Decl(DeclId(decl)), 0);
            refs.push(build_data_ref(&mem, StmtId(stmt), l, true, &scev, None).unwrap());
        }
        let by_stmt = refs.by_statement();
        let stmts: Vec<_> = by_stmt.keys().copied().collect();
        assert_eq!(stmts, vec![StmtId(1), StmtId(0)]);
        assert_eq!(by_stmt[&StmtId(1)], vec![DataRefId(0), DataRefId(2)]);
    }

    #[test]
    fn field_offset_folds_into_init() {
        let l = loop0();
        let scev = EvolutionTable::new();
        let mem = MemRef::field(MemRef::Decl(DeclId(1)), 16);
        let dr = build_data_ref(&mem, StmtId(0), l, false, &scev, Some(8)).unwrap();
        assert_eq!(dr.init, 16);
        assert_eq!(dr.misalign, Some(0));
        assert!(matches!(dr.base_object, Some(BaseObject::Field { .. })));
    }

    #[test]
    fn pointer_access_synthesizes_access_fn() {
        // *p where p starts at &a + 8 and advances by 8 bytes.
        let l = loop0();
        let mut scev = EvolutionTable::new();
        scev.set_pointer(
            l,
            PtrId(0),
            PointerEvolution {
                init: Some(AddrExpr::plus(AddrExpr::AddrOf(DeclId(2)), Expr::int(8))),
                step: Some(Scalar::Int(8)),
            },
        );
        let mem = MemRef::deref(PtrId(0), 8);
        let dr = build_data_ref(&mem, StmtId(1), l, false, &scev, Some(16)).unwrap();

        assert_eq!(dr.base_address, Some(BaseAddress::Object(DeclId(2))));
        assert_eq!(dr.init, 8);
        assert_eq!(dr.step, Scalar::Int(8));
        assert_eq!(dr.access_fns[0], Evolution::affine(l, 1, 1));
        assert_eq!(dr.misalign, Some(8));
    }

    #[test]
    fn loop_invariant_pointer() {
        let l = loop0();
        let mut scev = EvolutionTable::new();
        scev.set_pointer(
            l,
            PtrId(1),
            PointerEvolution {
                init: Some(AddrExpr::Pointer(PtrId(1))),
                step: Some(Scalar::Int(0)),
            },
        );
        let mem = MemRef::deref(PtrId(1), 4);
        let dr = build_data_ref(&mem, StmtId(0), l, true, &scev, None).unwrap();
        assert_eq!(dr.access_fns[0], Evolution::int(0));
        assert_eq!(dr.base_address, Some(BaseAddress::Pointer(PtrId(1))));
        assert!(!dr.base_aligned);
    }

    #[test]
    fn unknown_pointer_evolution_fails() {
        let l = loop0();
        let scev = EvolutionTable::new();
        let mem = MemRef::deref(PtrId(9), 4);
        let err = build_data_ref(&mem, StmtId(0), l, true, &scev, None).unwrap_err();
        assert_eq!(err.reason, "pointer without a known initial value");
    }

    #[test]
    fn misaligned_pointer_step_fails() {
        let l = loop0();
        let mut scev = EvolutionTable::new();
        scev.set_pointer(
            l,
            PtrId(0),
            PointerEvolution {
                init: Some(AddrExpr::Pointer(PtrId(0))),
                step: Some(Scalar::Int(3)),
            },
        );
        let mem = MemRef::deref(PtrId(0), 4);
        assert!(build_data_ref(&mem, StmtId(0), l, true, &scev, None).is_err());
    }

    #[test]
    fn symbolic_offset_blocks_misalignment() {
        let l = loop0();
        let mut scev = EvolutionTable::new();
        scev.set_pointer(
            l,
            PtrId(0),
            PointerEvolution {
                init: Some(AddrExpr::plus(
                    AddrExpr::AddrOf(DeclId(0)),
                    Expr::plus(Expr::sym(3), Expr::int(4)),
                )),
                step: Some(Scalar::Int(4)),
            },
        );
        let mem = MemRef::deref(PtrId(0), 4);
        let dr = build_data_ref(&mem, StmtId(0), l, true, &scev, Some(16)).unwrap();
        // The symbolic part of the offset has an unknown remainder, so
        // no alignment can be claimed.
        assert_eq!(dr.misalign, None);
        assert!(dr.offset.is_some());
    }
}
