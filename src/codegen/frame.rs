//! Per-function translation state.
//!
//! A [`Frame`] lives for exactly one function definition (or one generated
//! thunk). It owns the value environment, the SSA-block to native-block
//! tables, the pending phis and the table of emitted branch edges used to
//! wire phi operands once every block has been lowered.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use cranelift_codegen::cursor::{Cursor, FuncCursor};
use cranelift_codegen::ir::{
    self, Block, FuncRef, GlobalValue, Inst, InstBuilder, MemFlags, StackSlot, StackSlotData, StackSlotKind,
    Value, types,
};
use cranelift_frontend::FunctionBuilder;
use cranelift_module::{DataId, FuncId, Module};

use crate::diagnostics::CompileError;
use crate::span::Pos;
use crate::ssa::{self, Const, ConstValue, Instruction, Operand, Program, ValueId};
use crate::types::{BasicKind, TypeId};

use super::abi::{FnAbi, RecvMode};
use super::types::{GoValue, Layout, LayoutError};
use super::{DebugLocal, Unit};

/// Zeroing larger than this goes through `memset`.
const INLINE_ZERO_LIMIT: u64 = 128;

/// Block parameters standing in for one phi, wired after all blocks are lowered.
pub(crate) struct PendingPhi<'p> {
    pub block: usize,
    pub instr: &'p Instruction,
    pub edges: &'p [Operand],
    pub params: Vec<Value>,
}

/// State of an in-progress `Range` loop.
#[derive(Debug, Clone)]
pub(crate) enum RangeIter {
    Map { iter: Value, key: TypeId, elem: TypeId },
    String { s: GoValue, offset: StackSlot },
}

/// Blocks reached when a panic is observed.
#[derive(Debug, Default)]
pub(crate) struct Unwind {
    pub defer_frame: Option<StackSlot>,
    pub rundefers: Option<Block>,
    pub recover: Option<Block>,
    pub propagate: Option<Block>,
}

/// Outcome of a finished frame.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameSummary {
    pub has_checkpoint: bool,
    pub no_inline: bool,
}

/// A constant scalar that can be emitted through any instruction builder.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ScalarConst {
    Int(ir::Type, i64),
    F32(f32),
    F64(f64),
    Addr(GlobalValue),
}

/// Narrow integer immediates must be zero-extended.
pub(crate) fn mask_imm(ty: ir::Type, v: i64) -> i64 {
    match ty.bits() {
        8 => v & 0xff,
        16 => v & 0xffff,
        32 => v & 0xffff_ffff,
        _ => v,
    }
}

pub(crate) fn emit_scalar<'f, B: InstBuilder<'f>>(ins: B, c: ScalarConst) -> Value {
    match c {
        ScalarConst::Int(ty, v) => ins.iconst(ty, mask_imm(ty, v)),
        ScalarConst::F32(f) => ins.f32const(f),
        ScalarConst::F64(f) => ins.f64const(f),
        ScalarConst::Addr(gv) => ins.global_value(types::I64, gv),
    }
}

pub(crate) struct Frame<'a, 'p> {
    pub unit: &'a mut Unit<'p>,
    pub builder: FunctionBuilder<'a>,
    pub program: &'p Program,
    pub fun: Option<&'p ssa::Function>,
    pub name: String,
    pub abi: FnAbi,
    pub env: HashMap<ValueId, GoValue>,
    pub tuples: HashMap<ValueId, Vec<GoValue>>,
    pub iters: HashMap<ValueId, RangeIter>,
    pub blocks: Vec<Block>,
    pub last_blocks: Vec<Option<Block>>,
    pub phis: Vec<PendingPhi<'p>>,
    /// (SSA predecessor, successor slot) -> (branch instruction, destination index).
    pub edges: HashMap<(usize, usize), (Inst, usize)>,
    pub local_slots: HashMap<ValueId, StackSlot>,
    pub hoisted: HashSet<ValueId>,
    pub result_ptr: Option<Value>,
    pub unwind: Unwind,
    pub pos: Pos,
    pub current: usize,
    func_refs: HashMap<FuncId, FuncRef>,
    data_refs: HashMap<DataId, GlobalValue>,
}

impl<'a, 'p> Frame<'a, 'p> {
    pub fn new(
        unit: &'a mut Unit<'p>,
        mut builder: FunctionBuilder<'a>,
        fun: Option<&'p ssa::Function>,
        name: String,
        abi: FnAbi,
    ) -> Self {
        let program = unit.program;
        let n = fun.map_or(0, |f| f.blocks.len());
        let blocks = (0..n).map(|_| builder.create_block()).collect();
        Frame {
            unit,
            builder,
            program,
            fun,
            name,
            abi,
            env: HashMap::new(),
            tuples: HashMap::new(),
            iters: HashMap::new(),
            blocks,
            last_blocks: vec![None; n],
            phis: Vec::new(),
            edges: HashMap::new(),
            local_slots: HashMap::new(),
            hoisted: HashSet::new(),
            result_ptr: None,
            unwind: Unwind::default(),
            pos: fun.map_or(Pos::dummy(), |f| f.pos),
            current: 0,
            func_refs: HashMap::new(),
            data_refs: HashMap::new(),
        }
    }

    // ---- diagnostics ----

    pub fn location(&self) -> String {
        format!("{} (in {})", self.program.render_pos(self.pos), self.name)
    }

    pub fn unsupported(&self, construct: impl Into<String>) -> CompileError {
        CompileError::unsupported(construct, self.location())
    }

    pub fn internal(&self, msg: impl Into<String>) -> CompileError {
        CompileError::internal(msg, self.location())
    }

    pub fn not_implemented(&self, feature: impl Into<String>) -> CompileError {
        CompileError::not_implemented(feature, self.location())
    }

    pub fn layout_error(&self, e: LayoutError) -> CompileError {
        match e {
            LayoutError::TooLarge(_) => self.not_implemented(e.to_string()),
            LayoutError::NoRepresentation(_) => self.unsupported(e.to_string()),
        }
    }

    // ---- types ----

    pub fn layout(&mut self, ty: TypeId) -> Result<Rc<Layout>, CompileError> {
        self.unit.lowering.layout(ty).map_err(|e| self.layout_error(e))
    }

    pub fn record(&mut self, fields: &[TypeId]) -> Result<super::types::Record, CompileError> {
        self.unit.lowering.record(fields).map_err(|e| self.layout_error(e))
    }

    pub fn fn_abi(&mut self, sig: TypeId, mode: RecvMode) -> Result<FnAbi, CompileError> {
        FnAbi::new(&mut self.unit.lowering, sig, mode, self.unit.call_conv).map_err(|e| self.layout_error(e))
    }

    pub fn size_of(&self, ty: TypeId) -> u64 {
        self.unit.lowering.size_of(ty)
    }

    pub fn value_name(&self, v: ValueId) -> String {
        match self.fun.map(|f| f.value(v)) {
            Some(def) if !def.name.is_empty() => format!("{} (v{})", def.name, v.0),
            _ => format!("v{}", v.0),
        }
    }

    pub fn operand_type(&self, op: &Operand) -> Result<TypeId, CompileError> {
        match op {
            Operand::Value(v) => self
                .fun
                .and_then(|f| f.values.get(v.index()))
                .map(|d| d.ty)
                .ok_or_else(|| self.internal(format!("unknown value v{}", v.0))),
            Operand::Const(c) => Ok(c.ty),
            Operand::Function(f) => Ok(self.program.function(*f).signature),
            Operand::Global(g) => Ok(self.program.global(*g).ty),
        }
    }

    pub fn result_type(&self, instr: &Instruction) -> Result<TypeId, CompileError> {
        match (instr.result, self.fun) {
            (Some(v), Some(f)) => Ok(f.value(v).ty),
            _ => Err(self.internal(format!("{} has no result", instr.kind.name()))),
        }
    }

    // ---- environment ----

    pub fn define(&mut self, instr: &Instruction, value: GoValue) -> Result<(), CompileError> {
        let Some(v) = instr.result else {
            return Ok(());
        };
        if self.env.insert(v, value).is_some() {
            return Err(self.internal(format!("value {} defined twice", self.value_name(v))));
        }
        Ok(())
    }

    pub fn define_tuple(&mut self, instr: &Instruction, values: Vec<GoValue>) -> Result<(), CompileError> {
        if let Some(v) = instr.result {
            self.tuples.insert(v, values);
        }
        Ok(())
    }

    /// Lower an operand to its native value.
    pub fn value(&mut self, op: &Operand) -> Result<GoValue, CompileError> {
        if let Operand::Value(v) = op {
            return self.env.get(v).cloned().ok_or_else(|| {
                self.internal(format!("value {} used before its definition was lowered", self.value_name(*v)))
            });
        }
        let ty = self.operand_type(op)?;
        let scalars = self.operand_scalars(op)?;
        let parts = scalars.into_iter().map(|s| emit_scalar(self.builder.ins(), s)).collect();
        Ok(GoValue::new(parts, ty))
    }

    pub fn values(&mut self, ops: &[Operand]) -> Result<Vec<GoValue>, CompileError> {
        ops.iter().map(|op| self.value(op)).collect()
    }

    /// Scalars of a non-`Value` operand.
    pub fn operand_scalars(&mut self, op: &Operand) -> Result<Vec<ScalarConst>, CompileError> {
        match op {
            Operand::Value(v) => Err(self.internal(format!("{} is not a constant", self.value_name(*v)))),
            Operand::Const(c) => self.const_scalars(c),
            Operand::Function(f) => {
                let id = self.unit.resolve_function_descriptor(*f)?;
                Ok(vec![ScalarConst::Addr(self.data_ref(id))])
            }
            Operand::Global(g) => {
                let id = self.unit.resolve_global(*g)?;
                Ok(vec![ScalarConst::Addr(self.data_ref(id))])
            }
        }
    }

    fn const_scalars(&mut self, c: &Const) -> Result<Vec<ScalarConst>, CompileError> {
        let layout = self.layout(c.ty)?;
        let tys = layout.part_types();
        let first = tys.first().copied().unwrap_or(types::I64);
        let number = |ty: ir::Type, i: i64, f: f64| -> ScalarConst {
            if ty == types::F32 {
                ScalarConst::F32(f as f32)
            } else if ty == types::F64 {
                ScalarConst::F64(f)
            } else {
                ScalarConst::Int(ty, i)
            }
        };
        let out = match &c.value {
            ConstValue::Nil => tys.iter().map(|t| number(*t, 0, 0.0)).collect(),
            ConstValue::Bool(b) => vec![ScalarConst::Int(types::I8, i64::from(*b))],
            ConstValue::Int(i) => Self::numeric_const(&tys, number(first, *i, *i as f64)),
            ConstValue::Uint(u) => Self::numeric_const(&tys, number(first, *u as i64, *u as f64)),
            ConstValue::Float(f) => Self::numeric_const(&tys, number(first, *f as i64, *f)),
            ConstValue::Complex(re, im) => {
                if tys.len() != 2 {
                    return Err(self.unsupported(format!(
                        "complex constant of type {}",
                        self.program.types.type_string(c.ty)
                    )));
                }
                vec![number(tys[0], 0, *re), number(tys[1], 0, *im)]
            }
            ConstValue::String(s) => {
                if s.is_empty() {
                    vec![ScalarConst::Int(types::I64, 0), ScalarConst::Int(types::I64, 0)]
                } else {
                    let id = self.unit.string_data(s)?;
                    vec![ScalarConst::Addr(self.data_ref(id)), ScalarConst::Int(types::I64, s.len() as i64)]
                }
            }
        };
        if out.len() != tys.len() {
            return Err(self.unsupported(format!(
                "constant {:?} of type {}",
                c.value,
                self.program.types.type_string(c.ty)
            )));
        }
        Ok(out)
    }

    /// Numeric constants fill a complex type's imaginary part with zero.
    fn numeric_const(tys: &[ir::Type], first: ScalarConst) -> Vec<ScalarConst> {
        let mut out = vec![first];
        for t in tys.iter().skip(1) {
            out.push(if *t == types::F32 { ScalarConst::F32(0.0) } else { ScalarConst::F64(0.0) });
        }
        out
    }

    // ---- native handles ----

    pub fn func_ref(&mut self, id: FuncId) -> FuncRef {
        if let Some(r) = self.func_refs.get(&id) {
            return *r;
        }
        let r = self.unit.module.declare_func_in_func(id, self.builder.func);
        self.func_refs.insert(id, r);
        r
    }

    pub fn data_ref(&mut self, id: DataId) -> GlobalValue {
        if let Some(gv) = self.data_refs.get(&id) {
            return *gv;
        }
        let gv = self.unit.module.declare_data_in_func(id, self.builder.func);
        self.data_refs.insert(id, gv);
        gv
    }

    pub fn data_addr(&mut self, id: DataId) -> Value {
        let gv = self.data_ref(id);
        self.builder.ins().global_value(types::I64, gv)
    }

    pub fn func_addr(&mut self, id: FuncId) -> Value {
        let r = self.func_ref(id);
        self.builder.ins().func_addr(types::I64, r)
    }

    pub fn iconst(&mut self, ty: ir::Type, v: i64) -> Value {
        self.builder.ins().iconst(ty, mask_imm(ty, v))
    }

    pub fn zero_value(&mut self, ty: TypeId) -> Result<GoValue, CompileError> {
        let layout = self.layout(ty)?;
        let parts = layout
            .part_types()
            .into_iter()
            .map(|t| match t {
                types::F32 => self.builder.ins().f32const(0.0),
                types::F64 => self.builder.ins().f64const(0.0),
                _ => self.builder.ins().iconst(t, 0),
            })
            .collect();
        Ok(GoValue::new(parts, ty))
    }

    // ---- runtime calls ----

    /// Call a runtime function; if it can panic, test the panic state after it.
    pub fn call_runtime(&mut self, name: &'static str, args: &[Value]) -> Result<Vec<Value>, CompileError> {
        let results = self.call_runtime_raw(name, args)?;
        if self.unit.runtime.may_panic(name) {
            self.check_panic()?;
        }
        Ok(results)
    }

    pub fn call_runtime_raw(&mut self, name: &'static str, args: &[Value]) -> Result<Vec<Value>, CompileError> {
        let id = self.unit.runtime.get(name)?;
        let func_ref = self.func_ref(id);
        let call = self.builder.ins().call(func_ref, args);
        Ok(self.builder.inst_results(call).to_vec())
    }

    // ---- memory ----

    pub fn stack_slot(&mut self, size: u64, align: u64) -> StackSlot {
        let align_shift = align.max(1).trailing_zeros() as u8;
        self.builder
            .create_sized_stack_slot(StackSlotData::new(StackSlotKind::ExplicitSlot, size.max(1) as u32, align_shift))
    }

    pub fn stack_addr(&mut self, slot: StackSlot) -> Value {
        self.builder.ins().stack_addr(types::I64, slot, 0)
    }

    /// A zeroed stack temporary large enough for `ty`.
    pub fn temp(&mut self, ty: TypeId) -> Result<Value, CompileError> {
        let (size, align) = self.unit.lowering.size_align(ty);
        let slot = self.stack_slot(size, align);
        let addr = self.stack_addr(slot);
        self.zero_memory(addr, size);
        Ok(addr)
    }

    pub fn zero_memory(&mut self, addr: Value, size: u64) {
        if size == 0 {
            return;
        }
        if size > INLINE_ZERO_LIMIT {
            let config = self.unit.module.target_config();
            let zero = self.builder.ins().iconst(types::I8, 0);
            let len = self.builder.ins().iconst(types::I64, size as i64);
            self.builder.call_memset(config, addr, zero, len);
            return;
        }
        let mut offset = 0u64;
        for (width, ty) in [(8u64, types::I64), (4, types::I32), (2, types::I16), (1, types::I8)] {
            while size - offset >= width {
                let zero = self.builder.ins().iconst(ty, 0);
                self.builder.ins().store(MemFlags::new(), zero, addr, offset as i32);
                offset += width;
            }
        }
    }

    pub fn load_value_at(&mut self, addr: Value, offset: u64, ty: TypeId) -> Result<GoValue, CompileError> {
        let layout = self.layout(ty)?;
        let parts = layout
            .scalars
            .iter()
            .map(|s| self.builder.ins().load(s.ty, MemFlags::new(), addr, (offset + s.offset) as i32))
            .collect();
        Ok(GoValue::new(parts, ty))
    }

    pub fn load_value(&mut self, addr: Value, ty: TypeId) -> Result<GoValue, CompileError> {
        self.load_value_at(addr, 0, ty)
    }

    pub fn store_value_at(&mut self, addr: Value, offset: u64, value: &GoValue) -> Result<(), CompileError> {
        let layout = self.layout(value.ty)?;
        if layout.parts() != value.parts.len() {
            return Err(self.internal(format!(
                "value of type {} has {} parts, expected {}",
                self.program.types.type_string(value.ty),
                value.parts.len(),
                layout.parts()
            )));
        }
        for (s, v) in layout.scalars.iter().zip(&value.parts) {
            self.builder.ins().store(MemFlags::new(), *v, addr, (offset + s.offset) as i32);
        }
        Ok(())
    }

    pub fn store_value(&mut self, addr: Value, value: &GoValue) -> Result<(), CompileError> {
        self.store_value_at(addr, 0, value)
    }

    /// Copy `value` into a fresh stack slot and return its address.
    pub fn spill(&mut self, value: &GoValue) -> Result<Value, CompileError> {
        let (size, align) = self.unit.lowering.size_align(value.ty);
        let slot = self.stack_slot(size, align);
        let addr = self.stack_addr(slot);
        self.store_value(addr, value)?;
        Ok(addr)
    }

    /// Heap-allocate zeroed storage for a value of `ty`.
    pub fn heap_alloc(&mut self, ty: TypeId) -> Result<Value, CompileError> {
        let size = self.size_of(ty);
        self.heap_alloc_bytes(size)
    }

    pub fn heap_alloc_bytes(&mut self, size: u64) -> Result<Value, CompileError> {
        let n = self.iconst(types::I64, size.max(1) as i64);
        let p = self.call_runtime("__go_new", &[n])?[0];
        self.zero_memory(p, size);
        Ok(p)
    }

    /// Widen or narrow an integer to I64 following its Go signedness.
    pub fn to_i64(&mut self, v: &GoValue) -> Value {
        let x = v.single();
        let ty = self.builder.func.dfg.value_type(x);
        if ty == types::I64 {
            return x;
        }
        let unsigned = self.program.types.basic_kind(v.ty).is_some_and(BasicKind::is_unsigned);
        if unsigned { self.builder.ins().uextend(types::I64, x) } else { self.builder.ins().sextend(types::I64, x) }
    }

    // ---- prologue ----

    /// Entry block: parameters, free variables, locals, hoisted named-result
    /// allocations and the defer checkpoint, then a jump to block 0.
    pub fn prologue(&mut self) -> Result<(), CompileError> {
        let entry = self.builder.create_block();
        self.builder.append_block_params_for_function_params(entry);
        self.builder.switch_to_block(entry);
        let natives = self.builder.block_params(entry).to_vec();
        self.result_ptr = self.abi.result_pointer(&natives);

        let Some(fun) = self.fun else {
            return Ok(());
        };
        if fun.params.len() != self.abi.params.len() {
            return Err(self.internal(format!(
                "function has {} parameters but its signature has {}",
                fun.params.len(),
                self.abi.params.len()
            )));
        }
        let groups: Vec<Vec<Value>> = self.abi.split_params(&natives).into_iter().map(<[Value]>::to_vec).collect();
        for (i, &p) in fun.params.iter().enumerate() {
            let ty = fun.value(p).ty;
            let value = if self.abi.params[i].by_address {
                self.load_value(groups[i][0], ty)?
            } else {
                GoValue::new(groups[i].clone(), ty)
            };
            self.env.insert(p, value);
        }

        if !fun.free_vars.is_empty() {
            let closure = self.call_runtime_raw("__go_get_closure", &[])?[0];
            let mut fields = vec![self.program.types.basic(BasicKind::UnsafePointer)];
            fields.extend(fun.free_vars.iter().map(|v| fun.value(*v).ty));
            let record = self.record(&fields)?;
            for (i, &fv) in fun.free_vars.iter().enumerate() {
                let value = self.load_value_at(closure, record.offsets[i + 1], fields[i + 1])?;
                self.env.insert(fv, value);
            }
        }

        let param_names: HashSet<&str> = fun.params.iter().map(|p| fun.value(*p).name.as_str()).collect();
        let comments: HashMap<ValueId, &str> = fun
            .blocks
            .iter()
            .flat_map(|b| &b.instrs)
            .filter_map(|i| match (&i.kind, i.result) {
                (ssa::InstrKind::Alloc { comment, .. }, Some(r)) => Some((r, comment.as_str())),
                _ => None,
            })
            .collect();
        for &local in &fun.locals {
            let pty = fun.value(local).ty;
            let elem = self.program.types.pointer_elem(pty).unwrap_or(pty);
            let (size, align) = self.unit.lowering.size_align(elem);
            let slot = self.stack_slot(size, align);
            let addr = self.stack_addr(slot);
            self.zero_memory(addr, size);
            self.local_slots.insert(local, slot);
            self.env.insert(local, GoValue::scalar(addr, pty));
            if self.unit.config.generate_debug {
                let name = comments.get(&local).copied().unwrap_or_default().to_string();
                self.unit.debug_locals.push(DebugLocal {
                    function: self.name.clone(),
                    is_param: param_names.contains(name.as_str()),
                    name,
                    type_name: self.program.types.type_string(elem),
                    pos: fun.value(local).pos,
                });
            }
        }

        self.hoist_named_results(fun)?;
        self.setup_checkpoint(fun)?;
        if fun.blocks.is_empty() {
            return Err(self.internal("function has no blocks"));
        }
        self.builder.ins().jump(self.blocks[0], &[]);
        self.fill_checkpoint_blocks(fun)?;
        Ok(())
    }

    /// Heap allocations of named results in block 0 are made in the prologue
    /// so the recover block can reach them.
    fn hoist_named_results(&mut self, fun: &'p ssa::Function) -> Result<(), CompileError> {
        let result_pos: HashSet<Pos> = self
            .program
            .types
            .as_signature(fun.signature)
            .map(|s| s.results.iter().filter(|r| !r.name.is_empty() && r.pos.is_known()).map(|r| r.pos).collect())
            .unwrap_or_default();
        if result_pos.is_empty() {
            return Ok(());
        }
        for instr in &fun.blocks[0].instrs {
            let (ssa::InstrKind::Alloc { heap: true, .. }, Some(v)) = (&instr.kind, instr.result) else {
                continue;
            };
            if !result_pos.contains(&fun.value(v).pos) {
                continue;
            }
            self.pos = instr.pos;
            self.alloc(instr, true)?;
            self.hoisted.insert(v);
        }
        Ok(())
    }

    // ---- blocks ----

    pub fn translate_block(&mut self, b: usize) -> Result<(), CompileError> {
        let Some(fun) = self.fun else {
            return Ok(());
        };
        let block = fun
            .blocks
            .get(b)
            .ok_or_else(|| self.internal(format!("block {b} does not exist")))?;
        self.current = b;
        self.builder.switch_to_block(self.blocks[b]);
        for instr in &block.instrs {
            if instr.result.is_some_and(|v| self.hoisted.contains(&v)) {
                continue;
            }
            self.instruction(instr)?;
        }
        if !self.block_terminated() {
            return Err(self.internal(format!("block {b} does not end in a control instruction")));
        }
        self.last_blocks[b] = self.builder.current_block();
        Ok(())
    }

    /// Whether the native block open for insertion already ends in a terminator.
    pub fn block_terminated(&self) -> bool {
        let func = &self.builder.func;
        self.builder
            .current_block()
            .and_then(|b| func.layout.last_inst(b))
            .is_some_and(|i| func.dfg.insts[i].opcode().is_terminator())
    }

    /// Record a branch leaving the current SSA block through successor slot `slot`.
    pub fn record_edge(&mut self, slot: usize, inst: Inst, dest: usize) {
        self.edges.insert((self.current, slot), (inst, dest));
    }

    /// Append the operands of every pending phi to the branches leaving the
    /// predecessors' final native blocks.
    pub fn fixup_phis(&mut self) -> Result<(), CompileError> {
        let Some(fun) = self.fun else {
            return Ok(());
        };
        let phis = std::mem::take(&mut self.phis);
        for phi in &phis {
            self.pos = phi.instr.pos;
            let block = &fun.blocks[phi.block];
            if phi.edges.len() != block.preds.len() {
                return Err(self.internal(format!(
                    "phi in block {} has {} edges but the block has {} predecessors",
                    phi.block,
                    phi.edges.len(),
                    block.preds.len()
                )));
            }
            for (i, edge) in phi.edges.iter().enumerate() {
                let pred = block.preds[i];
                let occurrence = block.preds[..i].iter().filter(|&&p| p == pred).count();
                let slot = fun.blocks[pred]
                    .succs
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| **s == phi.block)
                    .nth(occurrence)
                    .map(|(j, _)| j)
                    .ok_or_else(|| {
                        self.internal(format!("block {pred} is not a predecessor of block {}", phi.block))
                    })?;
                let (inst, dest) = *self.edges.get(&(pred, slot)).ok_or_else(|| {
                    self.internal(format!("phi references block {pred} which was never lowered"))
                })?;
                let branch_block = self.builder.func.layout.inst_block(inst);
                if branch_block != self.last_blocks[pred] {
                    return Err(self.internal(format!("branch for edge {pred} -> {} left its final block", phi.block)));
                }
                let args = self.edge_value(edge, inst)?;
                if args.len() != phi.params.len() {
                    return Err(self.internal(format!(
                        "phi operand has {} parts, expected {}",
                        args.len(),
                        phi.params.len()
                    )));
                }
                let dfg = &mut self.builder.func.dfg;
                let dests = dfg.insts[inst].branch_destination_mut(&mut dfg.jump_tables);
                for v in args {
                    dests[dest].append_argument(v, &mut dfg.value_lists);
                }
            }
        }
        Ok(())
    }

    /// Parts of a phi operand, materializing constants just before `branch`.
    fn edge_value(&mut self, edge: &Operand, branch: Inst) -> Result<Vec<Value>, CompileError> {
        if let Operand::Value(v) = edge {
            return self.env.get(v).map(|g| g.parts.clone()).ok_or_else(|| {
                self.internal(format!("phi operand {} was never defined", self.value_name(*v)))
            });
        }
        let scalars = self.operand_scalars(edge)?;
        let mut pos = FuncCursor::new(self.builder.func).at_inst(branch);
        Ok(scalars.into_iter().map(|s| emit_scalar(pos.ins(), s)).collect())
    }

    pub fn finish(mut self) -> Result<FrameSummary, CompileError> {
        if let Some(b) = self.unwind.propagate {
            self.builder.switch_to_block(b);
            self.emit_zero_return()?;
        }
        let summary = FrameSummary {
            has_checkpoint: self.unwind.defer_frame.is_some(),
            no_inline: self.fun.is_some_and(|f| f.recover.is_some()),
        };
        self.builder.seal_all_blocks();
        self.builder.finalize();
        Ok(summary)
    }
}
