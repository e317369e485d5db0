//! Thunks for `go` and `defer`.
//!
//! The operands of a deferred or spawned call are evaluated at the statement
//! and packed into a heap record; the runtime later invokes a generated thunk
//! with that record. Call records are `{fnptr, closure, args...}`, builtin
//! records are just `{args...}`. Thunks are generated after the function that
//! requested them.

use cranelift_codegen::ir::{InstBuilder, MemFlags, UserFuncName, types};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_module::{FuncId, Linkage, Module};
use tracing::debug;

use crate::diagnostics::CompileError;
use crate::ssa::Builtin;
use crate::types::{BasicKind, TypeId};

use super::abi::{FnAbi, RecvMode};
use super::frame::Frame;
use super::{DefinedFunction, Unit};

#[derive(Debug, Clone)]
pub(crate) enum ThunkTarget {
    /// Call the record's function pointer with the record's closure context.
    Call { sig: TypeId, mode: RecvMode, recv_by_address: bool },
    /// Apply a builtin to the record's fields.
    Builtin { builtin: Builtin, signature: TypeId },
}

impl ThunkTarget {
    /// Fields preceding the call arguments in the record.
    pub fn header_len(&self) -> usize {
        match self {
            ThunkTarget::Call { .. } => 2,
            ThunkTarget::Builtin { .. } => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ThunkRequest {
    pub id: FuncId,
    pub name: String,
    pub target: ThunkTarget,
    /// Record field types, header included.
    pub fields: Vec<TypeId>,
}

impl<'p> Unit<'p> {
    /// Declare a thunk for `owner` and queue its definition.
    pub(crate) fn request_thunk(
        &mut self,
        owner: &str,
        target: ThunkTarget,
        fields: Vec<TypeId>,
    ) -> Result<FuncId, CompileError> {
        let name = format!("{owner}$thunk{}", self.thunk_count);
        self.thunk_count += 1;
        let uptr = self.program.types.basic(BasicKind::UnsafePointer);
        let abi = FnAbi::thunk(uptr, self.call_conv);
        let id = self
            .module
            .declare_function(&name, Linkage::Local, &abi.sig)
            .map_err(|e| CompileError::codegen(format!("declare {name} error: {e}")))?;
        self.thunks.push_back(ThunkRequest { id, name, target, fields });
        Ok(id)
    }

    pub(crate) fn drain_thunks(&mut self) -> Result<(), CompileError> {
        while let Some(req) = self.thunks.pop_front() {
            self.define_thunk(req)?;
        }
        Ok(())
    }

    fn define_thunk(&mut self, req: ThunkRequest) -> Result<(), CompileError> {
        debug!(thunk = %req.name, "defining thunk");
        let uptr = self.program.types.basic(BasicKind::UnsafePointer);
        let abi = FnAbi::thunk(uptr, self.call_conv);
        let mut ctx = self.module.make_context();
        ctx.func.signature = abi.sig.clone();
        ctx.func.name = UserFuncName::user(1, req.id.as_u32());
        let mut fb_ctx = FunctionBuilderContext::new();
        let summary = {
            let builder = FunctionBuilder::new(&mut ctx.func, &mut fb_ctx);
            let mut frame = Frame::new(self, builder, None, req.name.clone(), abi);
            frame.prologue()?;
            frame.thunk_body(&req)?;
            frame.finish()?
        };
        let ir = self.config.retain_ir.then(|| ctx.func.clone());
        self.module
            .define_function(req.id, &mut ctx)
            .map_err(|e| CompileError::codegen(format!("define thunk {} error: {e:?}", req.name)))?;
        self.defined_functions.push(DefinedFunction {
            func: None,
            name: req.name,
            linkage: Linkage::Local,
            no_inline: summary.no_inline,
            has_checkpoint: summary.has_checkpoint,
            ir,
        });
        Ok(())
    }
}

impl<'a, 'p> Frame<'a, 'p> {
    fn thunk_body(&mut self, req: &ThunkRequest) -> Result<(), CompileError> {
        let entry = self
            .builder
            .current_block()
            .ok_or_else(|| self.internal("thunk has no entry block"))?;
        let rec = self.builder.block_params(entry)[0];
        let record = self.record(&req.fields)?;
        let header = req.target.header_len();

        match &req.target {
            ThunkTarget::Call { sig, mode, recv_by_address } => {
                let fnptr = self.builder.ins().load(types::I64, MemFlags::new(), rec, 0);
                let closure = self.builder.ins().load(types::I64, MemFlags::new(), rec, record.offsets[1] as i32);
                self.call_runtime_raw("__go_set_closure", &[closure])?;
                let abi = self.fn_abi(*sig, *mode)?;
                let mut args = Vec::new();
                if let super::abi::ResultAbi::Indirect(results) = &abi.ret {
                    let slot = self.stack_slot(results.size, results.align);
                    args.push(self.stack_addr(slot));
                }
                for (i, &ty) in req.fields.iter().enumerate().skip(header) {
                    let offset = record.offsets[i];
                    if i == header && *recv_by_address {
                        args.push(self.builder.ins().iadd_imm(rec, offset as i64));
                    } else {
                        args.extend(self.load_value_at(rec, offset, ty)?.parts);
                    }
                }
                let sigref = self.builder.import_signature(abi.sig.clone());
                self.builder.ins().call_indirect(sigref, fnptr, &args);
                self.check_panic()?;
            }
            ThunkTarget::Builtin { builtin, signature } => {
                let mut args = Vec::with_capacity(req.fields.len());
                for (i, &ty) in req.fields.iter().enumerate() {
                    args.push(self.load_value_at(rec, record.offsets[i], ty)?);
                }
                self.builtin(*builtin, args, *signature)?;
            }
        }
        self.builder.ins().return_(&[]);
        Ok(())
    }
}
