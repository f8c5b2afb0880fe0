//! Dependence Dump Utility
//!
//! Pretty-prints evolutions, data references and dependence relations
//! in a human-readable format. Useful for debugging client passes.

use std::fmt::Write;

use crate::data_ref::{DataReference, DataRefs};
use crate::driver::DependenceAnalysis;
use crate::relation::{DataDependenceRelation, Dependence, Direction};
use crate::scev::{Evolution, Scalar};
use crate::subscript::{ConflictFn, Conflicts, LastConflict, Subscript};

/// Dump a scalar to a string.
pub fn dump_scalar(s: &Scalar) -> String {
    match s {
        Scalar::Int(i) => i.to_string(),
        Scalar::Sym(sym) => format!("s{}", sym.0),
        Scalar::SymOff(sym, off) => format!("(s{} + {})", sym.0, off),
        Scalar::Unknown => "?".to_string(),
    }
}

/// Dump an evolution in `{init, +, step}_loop` notation.
pub fn dump_evolution(ev: &Evolution) -> String {
    match ev {
        Evolution::Scalar(s) => dump_scalar(s),
        Evolution::Poly { loop_id, left, right } => {
            format!("{{{}, +, {}}}_{}", dump_evolution(left), dump_evolution(right), loop_id.0)
        }
    }
}

fn dump_conflict_fn(f: &ConflictFn) -> String {
    match f {
        ConflictFn::Constant(c) => c.to_string(),
        ConflictFn::Affine { base, step } => format!("{base} + {step}*k"),
    }
}

/// Dump one side of a subscript's conflicting iterations.
pub fn dump_conflicts(c: &Conflicts) -> String {
    match c {
        Conflicts::NoConflict => "no conflict".to_string(),
        Conflicts::Unknown => "unknown".to_string(),
        Conflicts::One(f) => format!("[{}]", dump_conflict_fn(f)),
        Conflicts::Pair(f, g) => {
            format!("[{}][{}]", dump_conflict_fn(f), dump_conflict_fn(g))
        }
    }
}

fn dump_last_conflict(l: &LastConflict) -> String {
    match l {
        LastConflict::Count(n) => n.to_string(),
        LastConflict::Unbounded => "unbounded".to_string(),
        LastConflict::Unknown => "unknown".to_string(),
    }
}

/// Dump a subscript analysis result to a string.
pub fn dump_subscript(sub: &Subscript) -> String {
    let mut out = String::new();
    writeln!(out, "  iterations that access here in a: {}", dump_conflicts(&sub.conflicts_a))
        .unwrap();
    writeln!(out, "  iterations that access here in b: {}", dump_conflicts(&sub.conflicts_b))
        .unwrap();
    writeln!(out, "  last conflict iteration: {}", dump_last_conflict(&sub.last_conflict))
        .unwrap();
    if let Some(d) = sub.distance {
        writeln!(out, "  distance: {d}").unwrap();
    }
    out
}

/// Dump a data reference to a string.
pub fn dump_data_ref(dr: &DataReference) -> String {
    let mut out = String::new();
    writeln!(out, "(stmt {}, {})", dr.stmt.0, if dr.is_read { "read" } else { "write" })
        .unwrap();
    writeln!(out, "  base: {:?}", dr.base_address).unwrap();
    writeln!(out, "  init: {}, step: {}", dr.init, dump_scalar(&dr.step)).unwrap();
    for (i, f) in dr.access_fns.iter().enumerate() {
        writeln!(out, "  access fn {i}: {}", dump_evolution(f)).unwrap();
    }
    out
}

fn dump_direction(d: Direction) -> &'static str {
    match d {
        Direction::Positive => "+",
        Direction::Negative => "-",
        Direction::Equal => "=",
        Direction::Star => "*",
    }
}

/// Dump a dependence relation to a string.
pub fn dump_relation(rel: &DataDependenceRelation, refs: &DataRefs) -> String {
    let mut out = String::new();
    match (rel.a, rel.b) {
        (Some(a), Some(b)) => writeln!(out, "(Data Dep {} -> {}:", a.0, b.0).unwrap(),
        _ => writeln!(out, "(Data Dep, all references:").unwrap(),
    }
    match rel.dependence {
        Dependence::Independent => writeln!(out, "  (no dependence)").unwrap(),
        Dependence::DontKnow => writeln!(out, "  (don't know)").unwrap(),
        Dependence::Described => {
            if let Some(a) = rel.a {
                let dra = refs.get(a);
                for (i, sub) in rel.subscripts.iter().enumerate() {
                    writeln!(out, " subscript {i}: {}", dump_evolution(&dra.access_fns[i]))
                        .unwrap();
                    write!(out, "{}", dump_subscript(sub)).unwrap();
                }
            }
            if let Some(dist) = &rel.dist_vect {
                let v: Vec<String> = dist.iter().map(|d| d.to_string()).collect();
                writeln!(out, " distance vector: ({})", v.join(", ")).unwrap();
            }
            if let Some(dir) = &rel.dir_vect {
                let v: Vec<&str> = dir.iter().map(|d| dump_direction(*d)).collect();
                writeln!(out, " direction vector: ({})", v.join(", ")).unwrap();
            }
            if !rel.affine {
                writeln!(out, " (not representable by a distance vector)").unwrap();
            }
        }
    }
    writeln!(out, ")").unwrap();
    out
}

/// Serialize the run counters to JSON for machine consumption.
pub fn stats_to_json(stats: &crate::driver::DependenceStats) -> serde_json::Result<String> {
    serde_json::to_string_pretty(stats)
}

/// Dump an entire analysis result to a string.
pub fn dump_analysis(analysis: &DependenceAnalysis) -> String {
    let mut out = String::new();
    writeln!(out, "; {} data references", analysis.refs.len()).unwrap();
    for (id, dr) in analysis.refs.iter() {
        write!(out, "ref {}: {}", id.0, dump_data_ref(dr)).unwrap();
    }
    if !analysis.complete {
        writeln!(out, "; some access was not analyzable, assume all pairs depend").unwrap();
    }
    for rel in &analysis.relations {
        write!(out, "{}", dump_relation(rel, &analysis.refs)).unwrap();
    }
    out
}
