//! Calling convention for Go functions.
//!
//! Native parameter order is: hidden result pointer (indirect results only),
//! receiver, then each parameter's flattened parts. A receiver is always passed
//! as a single word; receivers that are not pointer-shaped are passed by the
//! address of a copy.
//! Results of up to [`MAX_DIRECT_RESULTS`] scalars come back in registers,
//! larger result lists are written through the hidden result pointer.

use cranelift_codegen::ir::{self, AbiParam, types as cl};
use cranelift_codegen::isa::CallConv;

use crate::types::{TypeId, TypeTable};

use super::types::{LayoutError, Record, TypeLowering, is_pointer_shaped};

pub const MAX_DIRECT_RESULTS: usize = 2;

/// How the receiver (if any) enters the native signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvMode {
    /// Use the signature's declared receiver, if it has one.
    Declared,
    /// Ignore any declared receiver.
    Omit,
    /// Prepend an untyped receiver pointer (interface method calls).
    Opaque,
}

#[derive(Debug, Clone)]
pub struct ParamAbi {
    pub ty: TypeId,
    /// Passed as a pointer to the value rather than as its parts.
    pub by_address: bool,
    /// Native parameters used.
    pub count: usize,
}

#[derive(Debug, Clone)]
pub enum ResultAbi {
    Void,
    Direct(Vec<ir::Type>),
    Indirect(Record),
}

#[derive(Debug, Clone)]
pub struct FnAbi {
    pub sig: ir::Signature,
    pub params: Vec<ParamAbi>,
    pub has_recv: bool,
    pub results: Vec<TypeId>,
    pub ret: ResultAbi,
}

impl FnAbi {
    pub fn new(
        lowering: &mut TypeLowering<'_>,
        sig_ty: TypeId,
        mode: RecvMode,
        call_conv: CallConv,
    ) -> Result<Self, LayoutError> {
        let table: &TypeTable = lowering.table();
        let go_sig = table.as_signature(sig_ty).cloned().unwrap_or_default();
        let mut sig = ir::Signature::new(call_conv);
        let mut params = Vec::new();

        let results: Vec<TypeId> = go_sig.results.iter().map(|r| r.ty).collect();
        let record = lowering.record(&results)?;
        let direct: Vec<ir::Type> = record.layouts.iter().flat_map(|l| l.part_types()).collect();
        let ret = if results.is_empty() || direct.is_empty() {
            ResultAbi::Void
        } else if direct.len() <= MAX_DIRECT_RESULTS {
            for t in &direct {
                sig.returns.push(AbiParam::new(*t));
            }
            ResultAbi::Direct(direct)
        } else {
            sig.params.push(AbiParam::new(cl::I64));
            ResultAbi::Indirect(record)
        };

        let recv = match mode {
            RecvMode::Declared => go_sig.recv.as_ref().map(|r| r.ty),
            RecvMode::Omit => None,
            RecvMode::Opaque => Some(table.basic(crate::types::BasicKind::UnsafePointer)),
        };
        let has_recv = recv.is_some();
        if let Some(ty) = recv {
            sig.params.push(AbiParam::new(cl::I64));
            let by_address = mode != RecvMode::Opaque && !is_pointer_shaped(table, ty);
            params.push(ParamAbi { ty, by_address, count: 1 });
        }
        for p in &go_sig.params {
            let layout = lowering.layout(p.ty)?;
            for t in layout.part_types() {
                sig.params.push(AbiParam::new(t));
            }
            params.push(ParamAbi { ty: p.ty, by_address: false, count: layout.parts() });
        }

        Ok(FnAbi { sig, params, has_recv, results, ret })
    }

    /// `(record) -> ()`, the shape of generated `go` and `defer` thunks.
    pub fn thunk(record_ty: TypeId, call_conv: CallConv) -> Self {
        let mut sig = ir::Signature::new(call_conv);
        sig.params.push(AbiParam::new(cl::I64));
        FnAbi {
            sig,
            params: vec![ParamAbi { ty: record_ty, by_address: false, count: 1 }],
            has_recv: false,
            results: Vec::new(),
            ret: ResultAbi::Void,
        }
    }

    pub fn is_indirect(&self) -> bool {
        matches!(self.ret, ResultAbi::Indirect(_))
    }

    /// Split native block parameters into per-parameter groups, dropping the
    /// hidden result pointer.
    pub fn split_params<'v>(&self, natives: &'v [ir::Value]) -> Vec<&'v [ir::Value]> {
        let mut at = usize::from(self.is_indirect());
        let mut out = Vec::with_capacity(self.params.len());
        for p in &self.params {
            out.push(&natives[at..at + p.count]);
            at += p.count;
        }
        out
    }

    /// The hidden result pointer among native block parameters.
    pub fn result_pointer(&self, natives: &[ir::Value]) -> Option<ir::Value> {
        if self.is_indirect() { natives.first().copied() } else { None }
    }
}
