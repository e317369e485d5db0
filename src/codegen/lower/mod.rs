//! Per-instruction lowering.
//!
//! `Frame::instruction` dispatches on the instruction kind; the helpers live
//! in the submodules grouped by concern.

mod call;
mod collections;
mod iface;
mod memory;
mod ops;

use cranelift_codegen::ir::{InstBuilder, SourceLoc};
use tracing::trace;

use crate::diagnostics::CompileError;
use crate::ssa::{InstrKind, Instruction, Operand};

use super::abi::ResultAbi;
use super::frame::{Frame, PendingPhi};
use super::types::GoValue;

impl<'a, 'p> Frame<'a, 'p> {
    pub(crate) fn instruction(&mut self, instr: &'p Instruction) -> Result<(), CompileError> {
        self.pos = instr.pos;
        if self.unit.config.generate_debug && instr.pos.is_known() {
            self.builder.set_srcloc(SourceLoc::new(instr.pos.line));
        }
        trace!(function = %self.name, instr = instr.kind.name(), "lowering");

        match &instr.kind {
            InstrKind::Alloc { heap, .. } => self.alloc(instr, *heap),
            InstrKind::BinOp { op, x, y } => {
                let ty = self.result_type(instr)?;
                let v = self.binop(*op, x, y, ty)?;
                self.define(instr, v)
            }
            InstrKind::UnOp { op, x, comma_ok } => self.unop(instr, *op, x, *comma_ok),
            InstrKind::Call(common) => {
                let results = self.call(common)?;
                self.define_results(instr, results)
            }
            InstrKind::ChangeInterface { x } => self.change_interface(instr, x),
            InstrKind::ChangeType { x } => {
                let ty = self.result_type(instr)?;
                let v = self.value(x)?.retyped(ty);
                self.define(instr, v)
            }
            InstrKind::Convert { x } => self.convert(instr, x),
            InstrKind::DebugRef { .. } => Ok(()),
            InstrKind::Defer(common) => self.defer(common),
            InstrKind::Go(common) => self.go(common),
            InstrKind::Extract { tuple, index } => self.extract(instr, tuple, *index),
            InstrKind::Field { x, field } => self.field(instr, x, *field),
            InstrKind::FieldAddr { x, field } => self.field_addr(instr, x, *field),
            InstrKind::If { cond } => self.branch_if(cond),
            InstrKind::Index { x, index } => self.index(instr, x, index),
            InstrKind::IndexAddr { x, index } => self.index_addr(instr, x, index),
            InstrKind::Jump => self.jump(),
            InstrKind::Lookup { x, index, comma_ok } => self.lookup(instr, x, index, *comma_ok),
            InstrKind::MakeChan { size } => self.make_chan(instr, size),
            InstrKind::MakeClosure { func, bindings } => self.make_closure(instr, *func, bindings),
            InstrKind::MakeInterface { x } => self.make_interface(instr, x),
            InstrKind::MakeMap { reserve } => self.make_map(instr, reserve.as_ref()),
            InstrKind::MakeSlice { len, cap } => self.make_slice(instr, len, cap),
            InstrKind::MapUpdate { map, key, value } => self.map_update(map, key, value),
            InstrKind::Next { iter, is_string } => self.next(instr, iter, *is_string),
            InstrKind::Panic { x } => self.lower_panic(x),
            InstrKind::Phi { edges, .. } => self.phi(instr, edges),
            InstrKind::Range { x } => self.range(instr, x),
            InstrKind::Return { results } => self.ret(results),
            InstrKind::RunDefers => self.lower_run_defers(),
            InstrKind::Select { states, blocking } => self.select(instr, states, *blocking),
            InstrKind::Send { chan, x } => self.send(chan, x),
            InstrKind::Slice { x, low, high, max } => self.slice(instr, x, low.as_ref(), high.as_ref(), max.as_ref()),
            InstrKind::Store { addr, val } => self.store(addr, val),
            InstrKind::TypeAssert { x, asserted, comma_ok } => self.type_assert(instr, x, *asserted, *comma_ok),
        }
    }

    fn define_results(&mut self, instr: &Instruction, mut results: Vec<GoValue>) -> Result<(), CompileError> {
        match results.len() {
            0 => Ok(()),
            1 => {
                let ty = self.result_type(instr)?;
                let v = results.remove(0).retyped(ty);
                self.define(instr, v)
            }
            _ => self.define_tuple(instr, results),
        }
    }

    fn successors(&self) -> Result<&'p [usize], CompileError> {
        let fun = self.fun.ok_or_else(|| self.internal("branch outside a function body"))?;
        Ok(&fun.blocks[self.current].succs)
    }

    fn branch_if(&mut self, cond: &Operand) -> Result<(), CompileError> {
        let succs = self.successors()?;
        let (then, els) = match succs {
            [then, els] => (*then, *els),
            _ => {
                return Err(self.internal(format!(
                    "If in block {} needs two successors, has {}",
                    self.current,
                    succs.len()
                )));
            }
        };
        let c = self.value(cond)?.single();
        let inst = self.builder.ins().brif(c, self.blocks[then], &[], self.blocks[els], &[]);
        self.record_edge(0, inst, 0);
        self.record_edge(1, inst, 1);
        Ok(())
    }

    fn jump(&mut self) -> Result<(), CompileError> {
        let succs = self.successors()?;
        let target = match succs {
            [target] => *target,
            _ => {
                return Err(self.internal(format!(
                    "Jump in block {} needs one successor, has {}",
                    self.current,
                    succs.len()
                )));
            }
        };
        let inst = self.builder.ins().jump(self.blocks[target], &[]);
        self.record_edge(0, inst, 0);
        Ok(())
    }

    /// A phi becomes parameters of its block; operands are attached to the
    /// incoming branches once every block is lowered.
    fn phi(&mut self, instr: &'p Instruction, edges: &'p [Operand]) -> Result<(), CompileError> {
        let ty = self.result_type(instr)?;
        let layout = self.layout(ty)?;
        let block = self.blocks[self.current];
        let params: Vec<_> =
            layout.part_types().into_iter().map(|t| self.builder.append_block_param(block, t)).collect();
        self.phis.push(PendingPhi { block: self.current, instr, edges, params: params.clone() });
        self.define(instr, GoValue::new(params, ty))
    }

    fn extract(&mut self, instr: &Instruction, tuple: &Operand, index: usize) -> Result<(), CompileError> {
        let Operand::Value(t) = tuple else {
            return Err(self.internal("Extract from a non-tuple operand"));
        };
        let v = self
            .tuples
            .get(t)
            .and_then(|vs| vs.get(index))
            .cloned()
            .ok_or_else(|| self.internal(format!("tuple {} has no element {index}", self.value_name(*t))))?;
        let ty = self.result_type(instr)?;
        self.define(instr, v.retyped(ty))
    }

    fn ret(&mut self, results: &[Operand]) -> Result<(), CompileError> {
        if results.len() != self.abi.results.len() {
            return Err(self.internal(format!(
                "return of {} values from a function with {} results",
                results.len(),
                self.abi.results.len()
            )));
        }
        let values = self.values(results)?;
        match self.abi.ret.clone() {
            ResultAbi::Void => {
                self.builder.ins().return_(&[]);
            }
            ResultAbi::Direct(_) => {
                let parts: Vec<_> = values.iter().flat_map(|v| v.parts.iter().copied()).collect();
                self.builder.ins().return_(&parts);
            }
            ResultAbi::Indirect(record) => {
                let ptr = self.result_ptr.ok_or_else(|| self.internal("missing result pointer"))?;
                for (v, offset) in values.iter().zip(&record.offsets) {
                    self.store_value_at(ptr, *offset, v)?;
                }
                self.builder.ins().return_(&[]);
            }
        }
        Ok(())
    }
}
