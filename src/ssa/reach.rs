use indexmap::IndexSet;

use super::{Callee, FuncId, InstrKind, Member, Operand, Program};

/// Every function reachable from any package member or method set, in
/// discovery order.
pub fn all_functions(program: &Program) -> Vec<FuncId> {
    let mut seen: IndexSet<FuncId> = IndexSet::new();
    let mut work: Vec<FuncId> = Vec::new();

    let roots = program
        .packages
        .iter()
        .flat_map(|p| p.members.iter())
        .filter_map(|m| match m {
            Member::Function(f) => Some(*f),
            _ => None,
        })
        .chain(program.method_sets.iter().flat_map(|ms| ms.methods.iter().map(|m| m.func)));
    for f in roots {
        if seen.insert(f) {
            work.push(f);
        }
    }

    let mut i = 0;
    while i < work.len() {
        let f = program.function(work[i]);
        i += 1;
        for instr in f.blocks.iter().flat_map(|b| &b.instrs) {
            for callee in referenced_functions(&instr.kind) {
                if seen.insert(callee) {
                    work.push(callee);
                }
            }
        }
    }
    seen.into_iter().collect()
}

fn referenced_functions(kind: &InstrKind) -> Vec<FuncId> {
    let mut out: Vec<FuncId> = kind
        .operands()
        .into_iter()
        .filter_map(|op| match op {
            Operand::Function(f) => Some(*f),
            _ => None,
        })
        .collect();
    match kind {
        InstrKind::MakeClosure { func, .. } => out.push(*func),
        InstrKind::Call(c) | InstrKind::Defer(c) | InstrKind::Go(c) => {
            if let Callee::Value(Operand::Function(f)) = &c.callee {
                if !out.contains(f) {
                    out.push(*f);
                }
            }
        }
        _ => {}
    }
    out
}
