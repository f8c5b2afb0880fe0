//! Data dependence analysis for affine loop nests.
//!
//! Given the memory accesses of a loop nest and the scalar evolution of
//! their index expressions, this crate decides for each pair of
//! accesses whether they can touch the same memory location, and when
//! they can, describes the dependence by per-loop distance and
//! direction vectors. The tests are the classic ZIV, SIV and MIV
//! subscript tests over `{init, +, step}_loop` recurrences.
//!
//! The usual entry point is [`driver::analyze_dependences`].

pub mod alias;
pub mod data_ref;
pub mod driver;
pub mod dump;
pub mod expr;
pub mod logging;
pub mod loops;
pub mod relation;
pub mod scev;
pub mod solver;
pub mod subscript;

pub use alias::{AliasOracle, ConservativeAliasing, TriState};
pub use data_ref::{build_data_ref, DataRefId, DataReference, DataRefs, Unanalyzable};
pub use driver::{
    analyze_dependences, AnalysisContext, AnalysisOptions, DependenceAnalysis, DependenceStats,
    LoopAccess,
};
pub use expr::{AddrExpr, DeclId, Expr, MemRef, MemTag, PtrId, StmtId, SymbolId};
pub use loops::{LoopId, LoopNest, TripCount};
pub use relation::{DataDependenceRelation, Dependence, Direction, InvariantError};
pub use scev::{Evolution, EvolutionTable, PointerEvolution, Scalar, ScalarEvolution};
pub use subscript::{Conflicts, LastConflict, Subscript};
