//! Interface construction, conversion, assertion and method dispatch.
//!
//! An interface value is `{tab, data}`. For the empty interface `tab` is the
//! dynamic type's descriptor, otherwise it is an itab whose first word is the
//! descriptor. Pointer-shaped values live directly in `data`; anything else
//! is boxed on the heap.

use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{InstBuilder, MemFlags, Value, types};

use crate::diagnostics::CompileError;
use crate::ssa::{Instruction, Operand};
use crate::types::{BasicKind, TypeId};

use crate::codegen::abi::RecvMode;
use crate::codegen::frame::Frame;
use crate::codegen::types::{GoValue, is_pointer_shaped};

impl<'a, 'p> Frame<'a, 'p> {
    pub(crate) fn make_interface(&mut self, instr: &Instruction, x: &Operand) -> Result<(), CompileError> {
        let program = self.program;
        let concrete = self.operand_type(x)?;
        let iface = self.result_type(instr)?;
        if program.types.is_interface(concrete) {
            return Err(self.internal(format!(
                "MakeInterface from interface type {}",
                program.types.type_string(concrete)
            )));
        }
        let v = self.value(x)?;
        let itab = self.unit.itab(concrete, iface)?;
        let tab = self.data_addr(itab);
        let data = self.box_value(&v)?;
        self.define(instr, GoValue::new(vec![tab, data], iface))
    }

    fn box_value(&mut self, v: &GoValue) -> Result<Value, CompileError> {
        if is_pointer_shaped(&self.program.types, v.ty) {
            return Ok(v.single());
        }
        let p = self.heap_alloc(v.ty)?;
        self.store_value(p, v)?;
        Ok(p)
    }

    fn unbox(&mut self, data: Value, ty: TypeId) -> Result<GoValue, CompileError> {
        if is_pointer_shaped(&self.program.types, ty) {
            return Ok(GoValue::scalar(data, ty));
        }
        self.load_value(data, ty)
    }

    /// Unbox when `ok` is set, otherwise produce the zero value.
    fn unbox_if(&mut self, ok: Value, data: Value, ty: TypeId) -> Result<GoValue, CompileError> {
        if is_pointer_shaped(&self.program.types, ty) {
            let zero = self.iconst(types::I64, 0);
            return Ok(GoValue::scalar(self.builder.ins().select(ok, data, zero), ty));
        }
        let layout = self.layout(ty)?;
        let zero = self.zero_value(ty)?;
        let load = self.builder.create_block();
        let merge = self.builder.create_block();
        let params: Vec<Value> =
            layout.part_types().into_iter().map(|t| self.builder.append_block_param(merge, t)).collect();
        self.builder.ins().brif(ok, load, &[], merge, &zero.parts);
        self.builder.switch_to_block(load);
        let loaded = self.load_value(data, ty)?;
        self.builder.ins().jump(merge, &loaded.parts);
        self.builder.switch_to_block(merge);
        Ok(GoValue::new(params, ty))
    }

    /// Dynamic type descriptor of an interface value, zero for nil.
    fn dynamic_type(&mut self, iface: TypeId, tab: Value) -> Value {
        if self.program.types.is_empty_interface(iface) {
            return tab;
        }
        let load = self.builder.create_block();
        let merge = self.builder.create_block();
        let td = self.builder.append_block_param(merge, types::I64);
        let zero = self.iconst(types::I64, 0);
        self.builder.ins().brif(tab, load, &[], merge, &[zero]);
        self.builder.switch_to_block(load);
        let loaded = self.builder.ins().load(types::I64, MemFlags::new(), tab, 0);
        self.builder.ins().jump(merge, &[loaded]);
        self.builder.switch_to_block(merge);
        td
    }

    pub(crate) fn descriptor_addr(&mut self, ty: TypeId) -> Result<Value, CompileError> {
        let id = self.unit.type_descriptor(ty)?;
        Ok(self.data_addr(id))
    }

    pub(crate) fn change_interface(&mut self, instr: &Instruction, x: &Operand) -> Result<(), CompileError> {
        let from = self.operand_type(x)?;
        let to = self.result_type(instr)?;
        let v = self.value(x)?;
        let td = self.dynamic_type(from, v.parts[0]);
        let tab = if self.program.types.is_empty_interface(to) {
            td
        } else {
            let target = self.descriptor_addr(to)?;
            self.call_runtime("__go_convert_interface", &[target, td])?[0]
        };
        self.define(instr, GoValue::new(vec![tab, v.parts[1]], to))
    }

    pub(crate) fn type_assert(
        &mut self,
        instr: &Instruction,
        x: &Operand,
        asserted: TypeId,
        comma_ok: bool,
    ) -> Result<(), CompileError> {
        let program = self.program;
        let xt = self.operand_type(x)?;
        let v = self.value(x)?;
        let td = self.dynamic_type(xt, v.parts[0]);
        let data = v.parts[1];
        let target = self.descriptor_addr(asserted)?;

        if !comma_ok {
            let value = if program.types.is_interface(asserted) {
                let tab = self.call_runtime("__go_assert_interface", &[target, td])?[0];
                GoValue::new(vec![tab, data], asserted)
            } else {
                self.call_runtime("__go_assert_type", &[target, td])?;
                self.unbox(data, asserted)?
            };
            return self.define(instr, value);
        }

        let ok_ty = program
            .types
            .tuple_elems(self.result_type(instr)?)
            .get(1)
            .copied()
            .unwrap_or_else(|| program.types.basic(BasicKind::Bool));
        let (value, ok) = if program.types.is_interface(asserted) {
            let tab = if program.types.is_empty_interface(asserted) {
                td
            } else {
                self.call_runtime("__go_convert_interface", &[target, td])?[0]
            };
            let ok = self.builder.ins().icmp_imm(IntCC::NotEqual, tab, 0);
            let zero = self.iconst(types::I64, 0);
            let data = self.builder.ins().select(ok, data, zero);
            (GoValue::new(vec![tab, data], asserted), ok)
        } else {
            let ok = self.call_runtime_raw("__go_type_eq", &[target, td])?[0];
            (self.unbox_if(ok, data, asserted)?, ok)
        };
        self.define_tuple(instr, vec![value, GoValue::scalar(ok, ok_ty)])
    }

    /// Code pointer of `method` in the itab of `recv`, and the receiver's data word.
    pub(crate) fn method_pointer(&mut self, recv: &Operand, method: &str) -> Result<(Value, Value), CompileError> {
        let program = self.program;
        let it = self.operand_type(recv)?;
        let index = program
            .types
            .interface_methods(it)
            .iter()
            .position(|m| m.name == method)
            .ok_or_else(|| {
                self.internal(format!("interface {} has no method {method}", program.types.type_string(it)))
            })?;
        let v = self.value(recv)?;
        let tab = v.parts[0];
        self.nil_check(tab)?;
        let fnptr = self.builder.ins().load(types::I64, MemFlags::new(), tab, 8 * (index as i32 + 1));
        Ok((fnptr, v.parts[1]))
    }

    pub(crate) fn invoke(
        &mut self,
        recv: &Operand,
        method: &str,
        args: &[Operand],
        sig: TypeId,
    ) -> Result<Vec<GoValue>, CompileError> {
        let uptr = self.program.types.basic(BasicKind::UnsafePointer);
        let args = self.values(args)?;
        let (fnptr, data) = self.method_pointer(recv, method)?;
        let abi = self.fn_abi(sig, RecvMode::Opaque)?;
        let sigref = self.builder.import_signature(abi.sig.clone());
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(GoValue::scalar(data, uptr));
        full.extend(args);
        self.emit_call(&abi, full, |fr, natives| fr.builder.ins().call_indirect(sigref, fnptr, natives))
    }

    /// `a == b` for two interface values of type `ty`.
    pub(crate) fn iface_equal(&mut self, ty: TypeId, a: &[Value], b: &[Value]) -> Result<Value, CompileError> {
        let td1 = self.dynamic_type(ty, a[0]);
        let td2 = self.dynamic_type(ty, b[0]);
        Ok(self.call_runtime("__go_iface_eq", &[td1, a[1], td2, b[1]])?[0])
    }
}
