//! Panics, deferred calls and recovery.
//!
//! A function with a `Defer` instruction or a recover block gets a
//! checkpoint: a defer frame on its stack registered with the runtime in the
//! prologue, plus a `rundefers` block. Every observed panic branches to
//! `rundefers`, which runs the deferred calls and then either resumes at the
//! recover block (the panic was recovered) or propagates by returning zero
//! values. Functions without a checkpoint propagate directly.

use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{Block, InstBuilder, Value, types};

use crate::diagnostics::CompileError;
use crate::ssa::{self, Operand};

use super::abi::ResultAbi;
use super::frame::Frame;

/// Opaque storage the runtime threads through a function's deferred calls.
pub const DEFER_FRAME_SIZE: u64 = 64;

impl<'a, 'p> Frame<'a, 'p> {
    /// Allocate and register the defer frame, and create the checkpoint blocks.
    pub(crate) fn setup_checkpoint(&mut self, fun: &'p ssa::Function) -> Result<(), CompileError> {
        if fun.recover.is_none() && !fun.has_defer() {
            return Ok(());
        }
        let slot = self.stack_slot(DEFER_FRAME_SIZE, 8);
        let addr = self.stack_addr(slot);
        self.zero_memory(addr, DEFER_FRAME_SIZE);
        self.call_runtime_raw("__go_push_defer_frame", &[addr])?;
        self.unwind.defer_frame = Some(slot);
        self.unwind.rundefers = Some(self.builder.create_block());
        self.unwind.recover = Some(match fun.recover {
            Some(r) => self.blocks[r],
            None => self.builder.create_block(),
        });
        Ok(())
    }

    /// Fill `rundefers` (and the synthetic recover block). Runs once the
    /// entry block has been terminated.
    pub(crate) fn fill_checkpoint_blocks(&mut self, fun: &'p ssa::Function) -> Result<(), CompileError> {
        let (Some(slot), Some(rundefers), Some(recover)) =
            (self.unwind.defer_frame, self.unwind.rundefers, self.unwind.recover)
        else {
            return Ok(());
        };
        self.builder.switch_to_block(rundefers);
        let addr = self.stack_addr(slot);
        self.call_runtime_raw("__go_run_defers", &[addr])?;
        let flag = self.call_runtime_raw("__go_panicking", &[])?[0];
        let panicking = self.builder.ins().icmp_imm(IntCC::NotEqual, flag, 0);
        let propagate = self.propagate_block();
        self.builder.ins().brif(panicking, propagate, &[], recover, &[]);

        if fun.recover.is_none() {
            self.builder.switch_to_block(recover);
            self.emit_zero_return()?;
        }
        Ok(())
    }

    fn propagate_block(&mut self) -> Block {
        match self.unwind.propagate {
            Some(b) => b,
            None => {
                let b = self.builder.create_block();
                self.unwind.propagate = Some(b);
                b
            }
        }
    }

    /// Where control goes when a panic is observed.
    pub fn unwind_target(&mut self) -> Block {
        match self.unwind.rundefers {
            Some(b) => b,
            None => self.propagate_block(),
        }
    }

    /// Branch to the unwind target if the runtime reports a panic in flight.
    pub fn check_panic(&mut self) -> Result<(), CompileError> {
        let flag = self.call_runtime_raw("__go_panicking", &[])?[0];
        let panicking = self.builder.ins().icmp_imm(IntCC::NotEqual, flag, 0);
        let target = self.unwind_target();
        let cont = self.builder.create_block();
        self.builder.ins().brif(panicking, target, &[], cont, &[]);
        self.builder.switch_to_block(cont);
        Ok(())
    }

    /// Raise a runtime panic through `raise` when `failed` is true.
    pub fn guard(&mut self, failed: Value, raise: &'static str, args: &[Value]) -> Result<(), CompileError> {
        let fail = self.builder.create_block();
        let cont = self.builder.create_block();
        self.builder.ins().brif(failed, fail, &[], cont, &[]);
        self.builder.switch_to_block(fail);
        self.call_runtime_raw(raise, args)?;
        let target = self.unwind_target();
        self.builder.ins().jump(target, &[]);
        self.builder.switch_to_block(cont);
        Ok(())
    }

    /// Panic with a nil dereference when `ptr` is zero.
    pub fn nil_check(&mut self, ptr: Value) -> Result<(), CompileError> {
        if !self.unit.config.runtime_checks {
            return Ok(());
        }
        let is_nil = self.builder.ins().icmp_imm(IntCC::Equal, ptr, 0);
        self.guard(is_nil, "__go_panic_nil", &[])
    }

    /// Panic with an index error unless `index < len` (unsigned).
    pub fn bounds_check(&mut self, index: Value, len: Value) -> Result<(), CompileError> {
        if !self.unit.config.runtime_checks {
            return Ok(());
        }
        let out = self.builder.ins().icmp(IntCC::UnsignedGreaterThanOrEqual, index, len);
        self.guard(out, "__go_panic_index", &[index, len])
    }

    pub fn emit_zero_return(&mut self) -> Result<(), CompileError> {
        match &self.abi.ret {
            ResultAbi::Void => {
                self.builder.ins().return_(&[]);
            }
            ResultAbi::Indirect(record) => {
                let size = record.size;
                let ptr = self.result_ptr.ok_or_else(|| self.internal("missing result pointer"))?;
                self.zero_memory(ptr, size);
                self.builder.ins().return_(&[]);
            }
            ResultAbi::Direct(tys) => {
                let tys = tys.clone();
                let zeros: Vec<Value> = tys
                    .into_iter()
                    .map(|t| match t {
                        types::F32 => self.builder.ins().f32const(0.0),
                        types::F64 => self.builder.ins().f64const(0.0),
                        _ => self.builder.ins().iconst(t, 0),
                    })
                    .collect();
                self.builder.ins().return_(&zeros);
            }
        }
        Ok(())
    }

    pub(crate) fn lower_panic(&mut self, x: &Operand) -> Result<(), CompileError> {
        let v = self.value(x)?;
        if v.parts.len() != 2 {
            return Err(self.internal("panic operand is not an interface value"));
        }
        self.call_runtime_raw("__go_panic", &v.parts)?;
        let target = self.unwind_target();
        self.builder.ins().jump(target, &[]);
        Ok(())
    }

    pub(crate) fn lower_run_defers(&mut self) -> Result<(), CompileError> {
        let addr = self.defer_frame_addr()?;
        self.call_runtime("__go_run_defers", &[addr])?;
        Ok(())
    }

    pub(crate) fn defer_frame_addr(&mut self) -> Result<Value, CompileError> {
        let slot = self
            .unwind
            .defer_frame
            .ok_or_else(|| self.internal("defer frame used in a function without a checkpoint"))?;
        Ok(self.stack_addr(slot))
    }
}
