//! Memory reference expressions
//!
//! This module defines the small expression model the dependence engine
//! analyzes. It is the adapter surface between the engine and whatever IR
//! the host compiler uses: the host lowers its memory accesses into
//! `MemRef` trees (array indexing, field selection, pointer dereference)
//! and loop-invariant `Expr` offsets, and the engine never looks past
//! these shapes.

use serde::Serialize;

/// A declared object (array, struct, scalar) rooting a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DeclId(pub u32);

/// A pointer-valued name (an SSA name in the host IR).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PtrId(pub u32);

/// A loop-invariant scalar name appearing in offset expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SymbolId(pub u32);

/// A statement in the host IR. Only used as an identity for references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StmtId(pub u32);

/// Alias-analysis handle. Opaque to the engine; only ever compared by the
/// alias oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MemTag {
    /// The access is rooted at a known declaration.
    Decl(DeclId),
    /// A tag computed by the host's alias analysis (type tag, points-to
    /// set id, ...).
    Tag(u32),
}

/// A scalar integer expression used for subscripts and offsets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    /// Integer literal.
    IntConst(i128),
    /// Loop-invariant (or induction-derived) named value.
    Symbol(SymbolId),
    Plus(Box<Expr>, Box<Expr>),
    Minus(Box<Expr>, Box<Expr>),
    Mult(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn int(v: i128) -> Self {
        Expr::IntConst(v)
    }

    pub fn sym(s: u32) -> Self {
        Expr::Symbol(SymbolId(s))
    }

    pub fn plus(a: Expr, b: Expr) -> Self {
        Expr::Plus(Box::new(a), Box::new(b))
    }

    pub fn minus(a: Expr, b: Expr) -> Self {
        Expr::Minus(Box::new(a), Box::new(b))
    }

    pub fn mult(a: Expr, b: Expr) -> Self {
        Expr::Mult(Box::new(a), Box::new(b))
    }

    /// Literal value if the expression is a plain constant.
    pub fn as_int(&self) -> Option<i128> {
        match self {
            Expr::IntConst(v) => Some(*v),
            _ => None,
        }
    }
}

/// A memory reference as it appears in a statement.
///
/// The grammar mirrors what the reference builder can decompose: a chain
/// of indexing and field selections over a declaration, or a dereference
/// of a pointer whose evolution the scalar-evolution collaborator knows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemRef {
    /// A declared object used directly as the innermost base, e.g. `a`
    /// in `a[i]`.
    Decl(DeclId),

    /// One array dimension: `base[index]`, where each element spans
    /// `elem_size` bytes.
    Index {
        base: Box<MemRef>,
        index: Expr,
        elem_size: u64,
    },

    /// Field selection at a constant byte offset: `base.f`.
    Field { base: Box<MemRef>, byte_offset: i128 },

    /// Dereference of a pointer: `*p`, accessing `size` bytes.
    Deref {
        ptr: PtrId,
        size: u64,
        /// True when the pointer carries `restrict` semantics: no other
        /// pointer in scope accesses the same object.
        restrict_p: bool,
        /// Alias tag of the pointed-to memory, if the host knows one.
        tag: Option<MemTag>,
    },
}

impl MemRef {
    /// `decl[index]` with the given element size, the common 1-D case.
    pub fn index(base: MemRef, index: Expr, elem_size: u64) -> Self {
        MemRef::Index {
            base: Box::new(base),
            index,
            elem_size,
        }
    }

    pub fn field(base: MemRef, byte_offset: i128) -> Self {
        MemRef::Field {
            base: Box::new(base),
            byte_offset,
        }
    }

    pub fn deref(ptr: PtrId, size: u64) -> Self {
        MemRef::Deref {
            ptr,
            size,
            restrict_p: false,
            tag: None,
        }
    }
}

/// An address-valued expression, produced by the scalar-evolution
/// collaborator as the initial value of a pointer.
///
/// Pointer initial values are the one place the engine re-enters
/// decomposition on a computed value, so the shape is deliberately
/// narrow: a root plus invariant byte offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddrExpr {
    /// `&decl`.
    AddrOf(DeclId),
    /// An opaque pointer value with no known symbolic root.
    Pointer(PtrId),
    /// `base + offset` in bytes.
    Plus(Box<AddrExpr>, Expr),
    /// `base - offset` in bytes.
    Minus(Box<AddrExpr>, Expr),
}

impl AddrExpr {
    pub fn plus(base: AddrExpr, offset: Expr) -> Self {
        AddrExpr::Plus(Box::new(base), offset)
    }

    pub fn minus(base: AddrExpr, offset: Expr) -> Self {
        AddrExpr::Minus(Box::new(base), offset)
    }
}
