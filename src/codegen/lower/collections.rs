//! Maps, channels, `select` and `range` iteration.

use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{InstBuilder, MemFlags, types};

use crate::diagnostics::CompileError;
use crate::ssa::{Instruction, Operand, SelectState};
use crate::types::{BasicKind, ChanDir, Type, TypeId};

use crate::codegen::frame::{Frame, RangeIter};
use crate::codegen::types::GoValue;

/// Bytes per entry of the case array handed to `__go_select`.
const SELECT_CASE_SIZE: u64 = 24;
const SELECT_SEND: i64 = 1;
const SELECT_RECV: i64 = 2;

impl<'a, 'p> Frame<'a, 'p> {
    fn map_types(&self, ty: TypeId) -> Result<(TypeId, TypeId), CompileError> {
        match self.program.types.under(ty) {
            Type::Map { key, elem } => Ok((*key, *elem)),
            _ => Err(self.internal(format!("{} is not a map type", self.program.types.type_string(ty)))),
        }
    }

    fn chan_elem(&self, ty: TypeId) -> Result<TypeId, CompileError> {
        match self.program.types.under(ty) {
            Type::Chan { elem, .. } => Ok(*elem),
            _ => Err(self.internal(format!("{} is not a channel type", self.program.types.type_string(ty)))),
        }
    }

    /// Element type `i` of the tuple produced by `instr`, or `fallback`.
    fn tuple_elem(&self, instr: &Instruction, i: usize, fallback: TypeId) -> TypeId {
        self.result_type(instr)
            .ok()
            .and_then(|t| self.program.types.tuple_elems(t).get(i).copied())
            .unwrap_or(fallback)
    }

    fn bool_type(&self) -> TypeId {
        self.program.types.basic(BasicKind::Bool)
    }

    pub(crate) fn make_map(&mut self, instr: &Instruction, reserve: Option<&Operand>) -> Result<(), CompileError> {
        let ty = self.result_type(instr)?;
        let td = self.descriptor_addr(ty)?;
        let hint = match reserve {
            Some(r) => {
                let v = self.value(r)?;
                self.to_i64(&v)
            }
            None => self.iconst(types::I64, 0),
        };
        let m = self.call_runtime("__go_new_map", &[td, hint])?[0];
        self.define(instr, GoValue::scalar(m, ty))
    }

    pub(crate) fn make_chan(&mut self, instr: &Instruction, size: &Operand) -> Result<(), CompileError> {
        let ty = self.result_type(instr)?;
        let td = self.descriptor_addr(ty)?;
        let n = self.value(size)?;
        let n = self.to_i64(&n);
        let ch = self.call_runtime("__go_new_chan", &[td, n])?[0];
        self.define(instr, GoValue::scalar(ch, ty))
    }

    /// `m[k]` on a map, or `s[i]` on a string.
    pub(crate) fn lookup(
        &mut self,
        instr: &Instruction,
        x: &Operand,
        index: &Operand,
        comma_ok: bool,
    ) -> Result<(), CompileError> {
        let xt = self.operand_type(x)?;
        let v = self.value(x)?;
        if self.program.types.is_string(xt) {
            let idx = self.value(index)?;
            let idx = self.to_i64(&idx);
            self.bounds_check(idx, v.parts[1])?;
            let addr = self.builder.ins().iadd(v.parts[0], idx);
            let byte = self.builder.ins().load(types::I8, MemFlags::new(), addr, 0);
            let ty = self.result_type(instr)?;
            return self.define(instr, GoValue::scalar(byte, ty));
        }
        let (_, elem) = self.map_types(xt)?;
        let key = self.value(index)?;
        let key = self.spill(&key)?;
        let out = self.temp(elem)?;
        let ok = self.call_runtime("__go_map_lookup", &[v.single(), key, out])?[0];
        let value = self.load_value(out, elem)?;
        if comma_ok {
            let ok_ty = self.tuple_elem(instr, 1, self.bool_type());
            self.define_tuple(instr, vec![value, GoValue::scalar(ok, ok_ty)])
        } else {
            let ty = self.result_type(instr)?;
            self.define(instr, value.retyped(ty))
        }
    }

    pub(crate) fn map_update(&mut self, map: &Operand, key: &Operand, value: &Operand) -> Result<(), CompileError> {
        let m = self.value(map)?.single();
        let k = self.value(key)?;
        let v = self.value(value)?;
        let kp = self.spill(&k)?;
        let slot = self.call_runtime("__go_map_assign", &[m, kp])?[0];
        self.store_value(slot, &v)
    }

    pub(crate) fn send(&mut self, chan: &Operand, x: &Operand) -> Result<(), CompileError> {
        let ch = self.value(chan)?.single();
        let v = self.value(x)?;
        let p = self.spill(&v)?;
        self.call_runtime("__go_chan_send", &[ch, p])?;
        Ok(())
    }

    /// `<-ch`, and `v, ok := <-ch` when `comma_ok` is set.
    pub(crate) fn recv(&mut self, instr: &Instruction, x: &Operand, comma_ok: bool) -> Result<(), CompileError> {
        let ct = self.operand_type(x)?;
        let elem = self.chan_elem(ct)?;
        let ch = self.value(x)?.single();
        let out = self.temp(elem)?;
        let ok = self.call_runtime("__go_chan_recv", &[ch, out])?[0];
        let value = self.load_value(out, elem)?;
        if comma_ok {
            let ok_ty = self.tuple_elem(instr, 1, self.bool_type());
            self.define_tuple(instr, vec![value, GoValue::scalar(ok, ok_ty)])
        } else {
            let ty = self.result_type(instr)?;
            self.define(instr, value.retyped(ty))
        }
    }

    /// Produces the tuple `(index, recvOk, r_0, ..., r_n)` with one `r` per
    /// receive case, in case order.
    pub(crate) fn select(
        &mut self,
        instr: &Instruction,
        states: &[SelectState],
        blocking: bool,
    ) -> Result<(), CompileError> {
        let n = states.len() as u64;
        let slot = self.stack_slot(SELECT_CASE_SIZE * n, 8);
        let cases = self.stack_addr(slot);
        let mut received = Vec::new();
        for (i, state) in states.iter().enumerate() {
            let base = i as i32 * SELECT_CASE_SIZE as i32;
            let ch = self.value(&state.chan)?.single();
            let (dir, buf) = match (state.dir, &state.send) {
                (ChanDir::Send, Some(x)) => {
                    let v = self.value(x)?;
                    (SELECT_SEND, self.spill(&v)?)
                }
                (ChanDir::Recv, None) => {
                    let ct = self.operand_type(&state.chan)?;
                    let elem = self.chan_elem(ct)?;
                    let out = self.temp(elem)?;
                    received.push((out, elem));
                    (SELECT_RECV, out)
                }
                _ => return Err(self.internal(format!("select case {i} has an inconsistent direction"))),
            };
            let dir = self.iconst(types::I64, dir);
            self.builder.ins().store(MemFlags::new(), ch, cases, base);
            self.builder.ins().store(MemFlags::new(), dir, cases, base + 8);
            self.builder.ins().store(MemFlags::new(), buf, cases, base + 16);
        }
        let ok_slot = self.stack_slot(1, 1);
        let ok_addr = self.stack_addr(ok_slot);
        let zero = self.iconst(types::I8, 0);
        self.builder.ins().store(MemFlags::new(), zero, ok_addr, 0);
        let count = self.iconst(types::I64, n as i64);
        let block = self.iconst(types::I8, i64::from(blocking));
        let index = self.call_runtime("__go_select", &[cases, count, block, ok_addr])?[0];
        let ok = self.builder.ins().load(types::I8, MemFlags::new(), ok_addr, 0);

        let int = self.program.types.basic(BasicKind::Int);
        let mut tuple = vec![
            GoValue::scalar(index, self.tuple_elem(instr, 0, int)),
            GoValue::scalar(ok, self.tuple_elem(instr, 1, self.bool_type())),
        ];
        for (i, (out, elem)) in received.into_iter().enumerate() {
            let ty = self.tuple_elem(instr, i + 2, elem);
            tuple.push(self.load_value(out, ty)?);
        }
        self.define_tuple(instr, tuple)
    }

    pub(crate) fn range(&mut self, instr: &Instruction, x: &Operand) -> Result<(), CompileError> {
        let v = instr.result.ok_or_else(|| self.internal("Range without a result"))?;
        let xt = self.operand_type(x)?;
        let s = self.value(x)?;
        let iter = if self.program.types.is_string(xt) {
            let offset = self.stack_slot(8, 8);
            let addr = self.stack_addr(offset);
            let zero = self.iconst(types::I64, 0);
            self.builder.ins().store(MemFlags::new(), zero, addr, 0);
            RangeIter::String { s, offset }
        } else {
            let (key, elem) = self.map_types(xt)?;
            let iter = self.call_runtime("__go_map_iter_new", &[s.single()])?[0];
            RangeIter::Map { iter, key, elem }
        };
        self.iters.insert(v, iter);
        Ok(())
    }

    /// One step of a `range` loop, producing `(ok, key, value)`.
    pub(crate) fn next(&mut self, instr: &Instruction, iter: &Operand, is_string: bool) -> Result<(), CompileError> {
        let id = iter.as_value().ok_or_else(|| self.internal("Next on a non-iterator operand"))?;
        let state = self
            .iters
            .get(&id)
            .cloned()
            .ok_or_else(|| self.internal(format!("iterator {} was never created", self.value_name(id))))?;
        let bool_ty = self.bool_type();
        let ok_ty = self.tuple_elem(instr, 0, bool_ty);
        let tuple = match state {
            RangeIter::String { s, offset } if is_string => {
                let int = self.program.types.basic(BasicKind::Int);
                let rune = self.program.types.basic(BasicKind::Int32);
                let addr = self.stack_addr(offset);
                let off = self.builder.ins().load(types::I64, MemFlags::new(), addr, 0);
                let ok = self.builder.ins().icmp(IntCC::SignedLessThan, off, s.parts[1]);

                let step = self.builder.create_block();
                let merge = self.builder.create_block();
                let key = self.builder.append_block_param(merge, types::I64);
                let value = self.builder.append_block_param(merge, types::I32);
                let zero64 = self.iconst(types::I64, 0);
                let zero32 = self.iconst(types::I32, 0);
                self.builder.ins().brif(ok, step, &[], merge, &[zero64, zero32]);

                self.builder.switch_to_block(step);
                let decoded = self.call_runtime_raw("__go_string_next", &[s.parts[0], s.parts[1], off])?;
                let addr = self.stack_addr(offset);
                self.builder.ins().store(MemFlags::new(), decoded[0], addr, 0);
                self.builder.ins().jump(merge, &[off, decoded[1]]);

                self.builder.switch_to_block(merge);
                vec![
                    GoValue::scalar(ok, ok_ty),
                    GoValue::scalar(key, self.tuple_elem(instr, 1, int)),
                    GoValue::scalar(value, self.tuple_elem(instr, 2, rune)),
                ]
            }
            RangeIter::Map { iter, key, elem } if !is_string => {
                let key_ty = self.tuple_elem(instr, 1, key);
                let elem_ty = self.tuple_elem(instr, 2, elem);
                let kp = self.temp(key_ty)?;
                let vp = self.temp(elem_ty)?;
                let ok = self.call_runtime("__go_map_iter_next", &[iter, kp, vp])?[0];
                vec![GoValue::scalar(ok, ok_ty), self.load_value(kp, key_ty)?, self.load_value(vp, elem_ty)?]
            }
            _ => return Err(self.internal("Next disagrees with its iterator about string iteration")),
        };
        self.define_tuple(instr, tuple)
    }
}
