//! Allocation, loads and stores, field and element addressing, slicing.

use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{InstBuilder, MemFlags, Value, types};

use crate::diagnostics::CompileError;
use crate::ssa::{ConstValue, Instruction, Operand};
use crate::types::{BasicKind, Type, TypeId};

use crate::codegen::frame::Frame;
use crate::codegen::types::GoValue;

/// Index of a constant operand, if it is a non-negative constant.
fn const_index(op: &Operand) -> Option<u64> {
    match op {
        Operand::Const(c) => match c.value {
            ConstValue::Int(i) => u64::try_from(i).ok(),
            ConstValue::Uint(u) => Some(u),
            _ => None,
        },
        _ => None,
    }
}

impl<'a, 'p> Frame<'a, 'p> {
    pub(crate) fn alloc(&mut self, instr: &Instruction, heap: bool) -> Result<(), CompileError> {
        let v = instr.result.ok_or_else(|| self.internal("Alloc without a result"))?;
        let pty = self.result_type(instr)?;
        let elem = self.program.types.pointer_elem(pty).unwrap_or(pty);
        if heap {
            let p = self.heap_alloc(elem)?;
            return self.define(instr, GoValue::scalar(p, pty));
        }
        let (size, align) = self.unit.lowering.size_align(elem);
        match self.env.get(&v) {
            // Locals are bound in the prologue; the slot is re-zeroed each time
            // the allocation executes.
            Some(addr) => {
                let addr = addr.single();
                self.zero_memory(addr, size);
            }
            None => {
                let slot = self.stack_slot(size, align);
                let addr = self.stack_addr(slot);
                self.zero_memory(addr, size);
                self.local_slots.insert(v, slot);
                self.define(instr, GoValue::scalar(addr, pty))?;
            }
        }
        Ok(())
    }

    pub(crate) fn store(&mut self, addr: &Operand, val: &Operand) -> Result<(), CompileError> {
        let ptr = self.value(addr)?.single();
        let v = self.value(val)?;
        self.store_value(ptr, &v)
    }

    pub(crate) fn field(&mut self, instr: &Instruction, x: &Operand, field: usize) -> Result<(), CompileError> {
        let st = self.operand_type(x)?;
        let v = self.value(x)?;
        let range = self.unit.lowering.field_parts(st, field);
        if range.end > v.parts.len() {
            return Err(self.internal(format!(
                "field {field} out of range for {}",
                self.program.types.type_string(st)
            )));
        }
        let ty = self.result_type(instr)?;
        self.define(instr, GoValue::new(v.parts[range].to_vec(), ty))
    }

    pub(crate) fn field_addr(&mut self, instr: &Instruction, x: &Operand, field: usize) -> Result<(), CompileError> {
        let pt = self.operand_type(x)?;
        let st = self
            .program
            .types
            .pointer_elem(pt)
            .ok_or_else(|| self.internal("FieldAddr on a non-pointer operand"))?;
        let p = self.value(x)?.single();
        if !matches!(x, Operand::Global(_)) {
            self.nil_check(p)?;
        }
        let offset = self.unit.lowering.field_offset(st, field);
        let addr = if offset == 0 { p } else { self.builder.ins().iadd_imm(p, offset as i64) };
        let ty = self.result_type(instr)?;
        self.define(instr, GoValue::scalar(addr, ty))
    }

    /// `base + index * elem_size`.
    fn element_addr(&mut self, base: Value, index: Value, elem_size: u64) -> Value {
        let offset = if elem_size == 1 { index } else { self.builder.ins().imul_imm(index, elem_size as i64) };
        self.builder.ins().iadd(base, offset)
    }

    pub(crate) fn index(&mut self, instr: &Instruction, x: &Operand, index: &Operand) -> Result<(), CompileError> {
        let program = self.program;
        let xt = self.operand_type(x)?;
        let ty = self.result_type(instr)?;
        let v = self.value(x)?;
        let result = match program.types.under(xt) {
            Type::Array { elem, len } => {
                let per = self.unit.lowering.part_count(*elem);
                match const_index(index).filter(|i| *i < *len) {
                    Some(i) => {
                        let start = i as usize * per;
                        GoValue::new(v.parts[start..start + per].to_vec(), ty)
                    }
                    None => {
                        let idx = self.value(index)?;
                        let idx = self.to_i64(&idx);
                        let n = self.iconst(types::I64, *len as i64);
                        self.bounds_check(idx, n)?;
                        let base = self.spill(&v)?;
                        let size = self.size_of(*elem);
                        let addr = self.element_addr(base, idx, size);
                        self.load_value(addr, ty)?
                    }
                }
            }
            Type::Basic(BasicKind::String) => {
                let idx = self.value(index)?;
                let idx = self.to_i64(&idx);
                self.bounds_check(idx, v.parts[1])?;
                let addr = self.builder.ins().iadd(v.parts[0], idx);
                GoValue::scalar(self.builder.ins().load(types::I8, MemFlags::new(), addr, 0), ty)
            }
            _ => {
                return Err(self.unsupported(format!("indexing {}", program.types.type_string(xt))));
            }
        };
        self.define(instr, result)
    }

    pub(crate) fn index_addr(&mut self, instr: &Instruction, x: &Operand, index: &Operand) -> Result<(), CompileError> {
        let program = self.program;
        let xt = self.operand_type(x)?;
        let v = self.value(x)?;
        let (base, len, elem) = match program.types.under(xt) {
            Type::Slice(elem) => (v.parts[0], v.parts[1], *elem),
            Type::Pointer(p) => match program.types.under(*p) {
                Type::Array { elem, len } => {
                    let base = v.single();
                    if !matches!(x, Operand::Global(_)) {
                        self.nil_check(base)?;
                    }
                    (base, self.iconst(types::I64, *len as i64), *elem)
                }
                _ => return Err(self.unsupported(format!("IndexAddr on {}", program.types.type_string(xt)))),
            },
            _ => return Err(self.unsupported(format!("IndexAddr on {}", program.types.type_string(xt)))),
        };
        let idx = self.value(index)?;
        let idx = self.to_i64(&idx);
        self.bounds_check(idx, len)?;
        let size = self.size_of(elem);
        let addr = self.element_addr(base, idx, size);
        let ty = self.result_type(instr)?;
        self.define(instr, GoValue::scalar(addr, ty))
    }

    fn bound(&mut self, op: Option<&Operand>, default: Value) -> Result<Value, CompileError> {
        match op {
            Some(op) => {
                let v = self.value(op)?;
                Ok(self.to_i64(&v))
            }
            None => Ok(default),
        }
    }

    /// `x[low:high:max]` on strings, slices and pointers to arrays.
    pub(crate) fn slice(
        &mut self,
        instr: &Instruction,
        x: &Operand,
        low: Option<&Operand>,
        high: Option<&Operand>,
        max: Option<&Operand>,
    ) -> Result<(), CompileError> {
        let program = self.program;
        let xt = self.operand_type(x)?;
        let v = self.value(x)?;
        let (ptr, len, cap, elem_size, is_string) = match program.types.under(xt) {
            Type::Basic(BasicKind::String) => (v.parts[0], v.parts[1], v.parts[1], 1, true),
            Type::Slice(elem) => (v.parts[0], v.parts[1], v.parts[2], self.size_of(*elem), false),
            Type::Pointer(p) => match program.types.under(*p) {
                Type::Array { elem, len } => {
                    self.nil_check(v.single())?;
                    let n = self.iconst(types::I64, *len as i64);
                    (v.single(), n, n, self.size_of(*elem), false)
                }
                _ => return Err(self.unsupported(format!("slicing {}", program.types.type_string(xt)))),
            },
            _ => return Err(self.unsupported(format!("slicing {}", program.types.type_string(xt)))),
        };
        let zero = self.iconst(types::I64, 0);
        let low = self.bound(low, zero)?;
        let high = self.bound(high, len)?;
        let max = self.bound(max, cap)?;
        if self.unit.config.runtime_checks {
            // 0 <= low <= high <= max <= cap, negatives wrap to huge unsigned values.
            let a = self.builder.ins().icmp(IntCC::UnsignedGreaterThan, low, high);
            let b = self.builder.ins().icmp(IntCC::UnsignedGreaterThan, high, max);
            let c = self.builder.ins().icmp(IntCC::UnsignedGreaterThan, max, cap);
            let ab = self.builder.ins().bor(a, b);
            let bad = self.builder.ins().bor(ab, c);
            self.guard(bad, "__go_panic_index", &[high, cap])?;
        }
        let p = self.element_addr(ptr, low, elem_size);
        let n = self.builder.ins().isub(high, low);
        let parts = if is_string {
            vec![p, n]
        } else {
            let c = self.builder.ins().isub(max, low);
            vec![p, n, c]
        };
        let ty = self.result_type(instr)?;
        self.define(instr, GoValue::new(parts, ty))
    }

    pub(crate) fn make_slice(&mut self, instr: &Instruction, len: &Operand, cap: &Operand) -> Result<(), CompileError> {
        let ty = self.result_type(instr)?;
        let elem = self.slice_elem(ty)?;
        let elem_size = self.size_of(elem);
        let l = self.value(len)?;
        let l = self.to_i64(&l);
        let c = self.value(cap)?;
        let c = self.to_i64(&c);
        let size = self.iconst(types::I64, elem_size as i64);
        let p = self.call_runtime("__go_make_slice", &[size, l, c])?[0];
        self.define(instr, GoValue::new(vec![p, l, c], ty))
    }

    pub(crate) fn slice_elem(&self, ty: TypeId) -> Result<TypeId, CompileError> {
        match self.program.types.under(ty) {
            Type::Slice(elem) => Ok(*elem),
            _ => Err(self.internal(format!("{} is not a slice type", self.program.types.type_string(ty)))),
        }
    }
}
