//! Calls, builtins, closures, `go` and `defer`.

use cranelift_codegen::ir::{Inst, InstBuilder, MemFlags, Value, types};

use crate::diagnostics::CompileError;
use crate::ssa::{Builtin, CallCommon, Callee, FuncId, Instruction, Operand};
use crate::types::{BasicKind, Type, TypeId};

use crate::codegen::abi::{FnAbi, RecvMode, ResultAbi};
use crate::codegen::frame::Frame;
use crate::codegen::thunk::ThunkTarget;
use crate::codegen::types::GoValue;

impl<'a, 'p> Frame<'a, 'p> {
    pub(crate) fn call(&mut self, common: &'p CallCommon) -> Result<Vec<GoValue>, CompileError> {
        match &common.callee {
            Callee::Builtin(b) => {
                let args = self.values(&common.args)?;
                self.builtin(*b, args, common.signature)
            }
            Callee::Value(Operand::Function(f)) => self.call_static(*f, &common.args),
            Callee::Value(op) => self.call_dynamic(op, &common.args, common.signature),
            Callee::Invoke { recv, method } => self.invoke(recv, method, &common.args, common.signature),
        }
    }

    fn call_static(&mut self, f: FuncId, args: &[Operand]) -> Result<Vec<GoValue>, CompileError> {
        let callee = self.unit.resolve_function(f)?;
        let abi = self.fn_abi(self.program.function(f).signature, RecvMode::Declared)?;
        let args = self.values(args)?;
        let func_ref = self.func_ref(callee);
        self.emit_call(&abi, args, |fr, natives| fr.builder.ins().call(func_ref, natives))
    }

    /// Call through a closure: publish the context, then jump to the code
    /// pointer in the closure's first word.
    fn call_dynamic(&mut self, callee: &Operand, args: &[Operand], sig: TypeId) -> Result<Vec<GoValue>, CompileError> {
        let fv = self.value(callee)?.single();
        let args = self.values(args)?;
        self.nil_check(fv)?;
        let abi = self.fn_abi(sig, RecvMode::Omit)?;
        let sigref = self.builder.import_signature(abi.sig.clone());
        self.call_runtime_raw("__go_set_closure", &[fv])?;
        let fnptr = self.builder.ins().load(types::I64, MemFlags::new(), fv, 0);
        self.emit_call(&abi, args, |fr, natives| fr.builder.ins().call_indirect(sigref, fnptr, natives))
    }

    /// Marshal arguments per `abi`, issue the call, test for a panic and
    /// decode the results.
    pub(crate) fn emit_call(
        &mut self,
        abi: &FnAbi,
        args: Vec<GoValue>,
        issue: impl FnOnce(&mut Self, &[Value]) -> Inst,
    ) -> Result<Vec<GoValue>, CompileError> {
        if args.len() != abi.params.len() {
            return Err(self.internal(format!(
                "call passes {} arguments to a function taking {}",
                args.len(),
                abi.params.len()
            )));
        }
        let mut natives = Vec::with_capacity(abi.sig.params.len());
        let result_ptr = match &abi.ret {
            ResultAbi::Indirect(record) => {
                let slot = self.stack_slot(record.size, record.align);
                let addr = self.stack_addr(slot);
                natives.push(addr);
                Some(addr)
            }
            _ => None,
        };
        for (arg, param) in args.iter().zip(&abi.params) {
            if param.by_address {
                natives.push(self.spill(arg)?);
            } else if arg.parts.len() == param.count {
                natives.extend_from_slice(&arg.parts);
            } else {
                return Err(self.internal(format!(
                    "argument of type {} has {} parts, parameter expects {}",
                    self.program.types.type_string(arg.ty),
                    arg.parts.len(),
                    param.count
                )));
            }
        }
        let inst = issue(self, &natives);
        let returned = self.builder.inst_results(inst).to_vec();
        self.check_panic()?;

        match &abi.ret {
            ResultAbi::Void => abi.results.iter().map(|t| self.zero_value(*t)).collect(),
            ResultAbi::Direct(_) => {
                let mut out = Vec::with_capacity(abi.results.len());
                let mut at = 0;
                for &ty in &abi.results {
                    let n = self.layout(ty)?.parts();
                    out.push(GoValue::new(returned[at..at + n].to_vec(), ty));
                    at += n;
                }
                Ok(out)
            }
            ResultAbi::Indirect(record) => {
                let ptr = result_ptr.ok_or_else(|| self.internal("missing result slot"))?;
                let mut out = Vec::with_capacity(abi.results.len());
                for (i, &ty) in abi.results.iter().enumerate() {
                    out.push(self.load_value_at(ptr, record.offsets[i], ty)?);
                }
                Ok(out)
            }
        }
    }

    /// Allocate a closure record `{fnptr, bindings...}`.
    pub(crate) fn make_closure(
        &mut self,
        instr: &Instruction,
        func: FuncId,
        bindings: &[Operand],
    ) -> Result<(), CompileError> {
        let callee = self.unit.resolve_function(func)?;
        let values = self.values(bindings)?;
        let uptr = self.program.types.basic(BasicKind::UnsafePointer);
        let mut fields = vec![uptr];
        fields.extend(values.iter().map(|v| v.ty));
        let record = self.record(&fields)?;
        let p = self.heap_alloc_bytes(record.size)?;
        let fnptr = self.func_addr(callee);
        self.builder.ins().store(MemFlags::new(), fnptr, p, 0);
        for (i, v) in values.iter().enumerate() {
            self.store_value_at(p, record.offsets[i + 1], v)?;
        }
        let ty = self.result_type(instr)?;
        self.define(instr, GoValue::scalar(p, ty))
    }

    pub(crate) fn go(&mut self, common: &'p CallCommon) -> Result<(), CompileError> {
        let (thunk, record) = self.package_call(common)?;
        self.call_runtime("__go_go", &[thunk, record])?;
        Ok(())
    }

    pub(crate) fn defer(&mut self, common: &'p CallCommon) -> Result<(), CompileError> {
        let (thunk, record) = self.package_call(common)?;
        let frame = self.defer_frame_addr()?;
        self.call_runtime("__go_defer", &[frame, thunk, record])?;
        Ok(())
    }

    /// Evaluate the call's operands into a heap record and request a thunk
    /// that performs the call from it. Returns the thunk address and record.
    fn package_call(&mut self, common: &'p CallCommon) -> Result<(Value, Value), CompileError> {
        let program = self.program;
        let uptr = program.types.basic(BasicKind::UnsafePointer);
        let (target, values) = match &common.callee {
            Callee::Builtin(b) => {
                let values = self.values(&common.args)?;
                (ThunkTarget::Builtin { builtin: *b, signature: common.signature }, values)
            }
            Callee::Value(Operand::Function(f)) => {
                let callee = self.unit.resolve_function(*f)?;
                let sig = program.function(*f).signature;
                let abi = self.fn_abi(sig, RecvMode::Declared)?;
                let recv_by_address = abi.has_recv && abi.params.first().is_some_and(|p| p.by_address);
                let fnptr = self.func_addr(callee);
                let null = self.iconst(types::I64, 0);
                let mut values = vec![GoValue::scalar(fnptr, uptr), GoValue::scalar(null, uptr)];
                values.extend(self.values(&common.args)?);
                (ThunkTarget::Call { sig, mode: RecvMode::Declared, recv_by_address }, values)
            }
            Callee::Value(op) => {
                let fv = self.value(op)?.single();
                self.nil_check(fv)?;
                let fnptr = self.builder.ins().load(types::I64, MemFlags::new(), fv, 0);
                let mut values = vec![GoValue::scalar(fnptr, uptr), GoValue::scalar(fv, uptr)];
                values.extend(self.values(&common.args)?);
                let target = ThunkTarget::Call { sig: common.signature, mode: RecvMode::Omit, recv_by_address: false };
                (target, values)
            }
            Callee::Invoke { recv, method } => {
                let (fnptr, data) = self.method_pointer(recv, method)?;
                let null = self.iconst(types::I64, 0);
                let mut values = vec![
                    GoValue::scalar(fnptr, uptr),
                    GoValue::scalar(null, uptr),
                    GoValue::scalar(data, uptr),
                ];
                values.extend(self.values(&common.args)?);
                let target =
                    ThunkTarget::Call { sig: common.signature, mode: RecvMode::Opaque, recv_by_address: false };
                (target, values)
            }
        };
        let fields: Vec<TypeId> = values.iter().map(|v| v.ty).collect();
        let record = self.record(&fields)?;
        let rec = self.heap_alloc_bytes(record.size)?;
        for (v, offset) in values.iter().zip(&record.offsets) {
            self.store_value_at(rec, *offset, v)?;
        }
        let owner = self.name.clone();
        let thunk = self.unit.request_thunk(&owner, target, fields)?;
        let addr = self.func_addr(thunk);
        Ok((addr, rec))
    }

    /// Apply a builtin to already-lowered arguments.
    pub(crate) fn builtin(
        &mut self,
        builtin: Builtin,
        args: Vec<GoValue>,
        signature: TypeId,
    ) -> Result<Vec<GoValue>, CompileError> {
        let program = self.program;
        let results: Vec<TypeId> = program
            .types
            .as_signature(signature)
            .map(|s| s.results.iter().map(|r| r.ty).collect())
            .unwrap_or_default();
        let int = program.types.basic(BasicKind::Int);
        let result_ty = results.first().copied();
        let arity = match builtin {
            Builtin::Len | Builtin::Cap | Builtin::Close | Builtin::Real | Builtin::Imag | Builtin::Panic => 1,
            Builtin::Append => 1,
            Builtin::Copy | Builtin::Delete | Builtin::Complex => 2,
            Builtin::Print | Builtin::Println | Builtin::Recover => 0,
        };
        if args.len() < arity {
            return Err(self.internal(format!("{} takes {arity} arguments, got {}", builtin.name(), args.len())));
        }

        match builtin {
            Builtin::Len | Builtin::Cap => {
                let n = self.length(&args[0], builtin == Builtin::Cap)?;
                Ok(vec![GoValue::scalar(n, result_ty.unwrap_or(int))])
            }
            Builtin::Append => self.append(args, result_ty),
            Builtin::Copy => {
                let elem = match program.types.under(args[0].ty) {
                    Type::Slice(elem) => *elem,
                    _ => return Err(self.internal("copy into a non-slice")),
                };
                let size = self.iconst(types::I64, self.size_of(elem) as i64);
                let (dst, src) = (&args[0], &args[1]);
                let n = self.call_runtime("__go_copy", &[dst.parts[0], dst.parts[1], src.parts[0], src.parts[1], size])?;
                Ok(vec![GoValue::new(n, result_ty.unwrap_or(int))])
            }
            Builtin::Delete => {
                let key = self.spill(&args[1])?;
                self.call_runtime("__go_map_delete", &[args[0].single(), key])?;
                Ok(vec![])
            }
            Builtin::Real | Builtin::Imag => {
                let part = args[0].parts[usize::from(builtin == Builtin::Imag)];
                let ty = result_ty.ok_or_else(|| self.internal("real/imag without a result type"))?;
                Ok(vec![GoValue::scalar(part, ty)])
            }
            Builtin::Complex => {
                let ty = result_ty.ok_or_else(|| self.internal("complex without a result type"))?;
                Ok(vec![GoValue::new(vec![args[0].single(), args[1].single()], ty)])
            }
            Builtin::Panic => {
                if args[0].parts.len() != 2 {
                    return Err(self.internal("panic argument is not an interface value"));
                }
                self.call_runtime_raw("__go_panic", &args[0].parts)?;
                self.check_panic()?;
                Ok(vec![])
            }
            Builtin::Print | Builtin::Println => {
                let newline = builtin == Builtin::Println;
                for (i, a) in args.iter().enumerate() {
                    if newline && i > 0 {
                        self.call_runtime_raw("__go_print_space", &[])?;
                    }
                    self.print_value(a)?;
                }
                if newline {
                    self.call_runtime_raw("__go_print_nl", &[])?;
                }
                Ok(vec![])
            }
            Builtin::Recover => {
                let ty = result_ty.unwrap_or_else(|| program.types.basic(BasicKind::UnsafePointer));
                let parts = self.call_runtime_raw("__go_recover", &[])?;
                Ok(vec![GoValue::new(parts, ty)])
            }
            Builtin::Close => {
                self.call_runtime("__go_chan_close", &[args[0].single()])?;
                Ok(vec![])
            }
        }
    }

    /// `len(x)`, or `cap(x)` when `cap` is set.
    fn length(&mut self, x: &GoValue, cap: bool) -> Result<Value, CompileError> {
        let program = self.program;
        let under = match program.types.under(x.ty) {
            Type::Pointer(p) => program.types.under(*p),
            other => other,
        };
        match under {
            Type::Basic(BasicKind::String) if !cap => Ok(x.parts[1]),
            Type::Slice(_) => Ok(x.parts[if cap { 2 } else { 1 }]),
            Type::Array { len, .. } => Ok(self.iconst(types::I64, *len as i64)),
            Type::Map { .. } if !cap => Ok(self.call_runtime("__go_map_len", &[x.single()])?[0]),
            Type::Chan { .. } => {
                let func = if cap { "__go_chan_cap" } else { "__go_chan_len" };
                Ok(self.call_runtime(func, &[x.single()])?[0])
            }
            _ => Err(self.unsupported(format!(
                "{} of {}",
                if cap { "cap" } else { "len" },
                program.types.type_string(x.ty)
            ))),
        }
    }

    /// `append(s, src...)` with a slice or string source, or `append(s, a, b, ...)`
    /// with individual elements.
    fn append(&mut self, args: Vec<GoValue>, result_ty: Option<TypeId>) -> Result<Vec<GoValue>, CompileError> {
        let program = self.program;
        let s = &args[0];
        let ty = result_ty.unwrap_or(s.ty);
        if args.len() == 1 {
            return Ok(vec![s.clone().retyped(ty)]);
        }
        let elem = self.slice_elem(s.ty)?;
        let elem_size = self.size_of(elem);
        let spread = args.len() == 2
            && matches!(program.types.under(args[1].ty), Type::Slice(_) | Type::Basic(BasicKind::String));
        let (src_ptr, src_len) = if spread {
            (args[1].parts[0], args[1].parts[1])
        } else {
            let n = args.len() - 1;
            let align = self.unit.lowering.size_align(elem).1;
            let slot = self.stack_slot(elem_size * n as u64, align);
            let base = self.stack_addr(slot);
            for (i, a) in args[1..].iter().enumerate() {
                self.store_value_at(base, i as u64 * elem_size, a)?;
            }
            (base, self.iconst(types::I64, n as i64))
        };
        let out = self.temp(s.ty)?;
        let size = self.iconst(types::I64, elem_size as i64);
        self.call_runtime(
            "__go_append",
            &[out, s.parts[0], s.parts[1], s.parts[2], src_ptr, src_len, size],
        )?;
        Ok(vec![self.load_value(out, ty)?])
    }

    fn print_value(&mut self, v: &GoValue) -> Result<(), CompileError> {
        let program = self.program;
        match program.types.under(v.ty) {
            Type::Basic(k) => match k {
                BasicKind::Bool => {
                    self.call_runtime_raw("__go_print_bool", &[v.single()])?;
                }
                BasicKind::String => {
                    self.call_runtime_raw("__go_print_string", &v.parts)?;
                }
                BasicKind::UnsafePointer => {
                    self.call_runtime_raw("__go_print_pointer", &[v.single()])?;
                }
                k if k.is_integer() => {
                    let wide = self.to_i64(v);
                    let func = if k.is_unsigned() { "__go_print_uint64" } else { "__go_print_int64" };
                    self.call_runtime_raw(func, &[wide])?;
                }
                k if k.is_float() || k.is_complex() => {
                    let parts: Vec<Value> = v
                        .parts
                        .iter()
                        .map(|p| {
                            if self.builder.func.dfg.value_type(*p) == types::F32 {
                                self.builder.ins().fpromote(types::F64, *p)
                            } else {
                                *p
                            }
                        })
                        .collect();
                    let func = if k.is_complex() { "__go_print_complex128" } else { "__go_print_float64" };
                    self.call_runtime_raw(func, &parts)?;
                }
                _ => return Err(self.unsupported(format!("printing {}", program.types.type_string(v.ty)))),
            },
            Type::Pointer(_) | Type::Map { .. } | Type::Chan { .. } | Type::Signature(_) => {
                self.call_runtime_raw("__go_print_pointer", &[v.single()])?;
            }
            Type::Slice(_) => {
                self.call_runtime_raw("__go_print_slice", &v.parts)?;
            }
            Type::Interface(_) => {
                self.call_runtime_raw("__go_print_iface", &v.parts)?;
            }
            _ => return Err(self.unsupported(format!("printing {}", program.types.type_string(v.ty)))),
        }
        Ok(())
    }
}
