//! Programmatic construction of SSA programs.
//!
//! Front-ends that live in the same process (and the test-suite) build a
//! [`Program`] with these helpers instead of going through JSON. The builder
//! keeps block predecessor and successor lists consistent with the control
//! instructions it emits.

use crate::span::Pos;
use crate::types::{Signature, Type, TypeId, TypeTable};

use super::{
    BasicBlock, BinaryOp, Builtin, CallCommon, Callee, FuncId, Function, Global, GlobalId, InstrKind,
    Instruction, Member, MethodEntry, MethodSet, Operand, Package, PkgId, Program, UnaryOp, ValueDef, ValueId,
};

pub struct ProgramBuilder {
    program: Program,
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self { program: Program::new() }
    }

    pub fn types(&mut self) -> &mut TypeTable {
        &mut self.program.types
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn file(&mut self, name: impl Into<String>) -> u32 {
        self.program.files.push(name.into());
        (self.program.files.len() - 1) as u32
    }

    pub fn package(&mut self, path: &str, name: &str) -> PkgId {
        self.program.packages.push(Package { path: path.into(), name: name.into(), members: vec![] });
        PkgId((self.program.packages.len() - 1) as u32)
    }

    pub fn add_member(&mut self, pkg: PkgId, member: Member) {
        self.program.packages[pkg.index()].members.push(member);
    }

    /// A package-level variable of type `elem`; registered as a package member.
    pub fn global(&mut self, pkg: PkgId, name: &str, elem: TypeId) -> GlobalId {
        let ty = self.program.types.pointer(elem);
        self.program.globals.push(Global { name: name.into(), pkg, ty, pos: Pos::dummy() });
        let id = GlobalId((self.program.globals.len() - 1) as u32);
        self.add_member(pkg, Member::Global(id));
        id
    }

    /// Declare a function without a body. Package membership is separate
    /// (see [`ProgramBuilder::add_member`]).
    pub fn function(&mut self, pkg: Option<PkgId>, name: &str, signature: TypeId) -> FuncId {
        self.program.functions.push(Function {
            name: name.into(),
            pkg,
            signature,
            enclosing: None,
            synthetic: None,
            pos: Pos::dummy(),
            values: vec![],
            params: vec![],
            free_vars: vec![],
            locals: vec![],
            blocks: vec![],
            recover: None,
        });
        FuncId((self.program.functions.len() - 1) as u32)
    }

    pub fn set_enclosing(&mut self, f: FuncId, enclosing: FuncId) {
        self.program.functions[f.index()].enclosing = Some(enclosing);
    }

    pub fn set_synthetic(&mut self, f: FuncId, why: &str) {
        self.program.functions[f.index()].synthetic = Some(why.into());
    }

    pub fn add_method(&mut self, recv: TypeId, name: &str, func: FuncId) {
        let entry = MethodEntry { name: name.into(), func };
        match self.program.method_sets.iter_mut().find(|m| m.recv == recv) {
            Some(set) => set.methods.push(entry),
            None => self.program.method_sets.push(MethodSet { recv, methods: vec![entry] }),
        }
    }

    pub fn body(&mut self, f: FuncId) -> FnBuilder<'_> {
        FnBuilder { pb: self, id: f, current: 0, pos: Pos::dummy() }
    }

    pub fn finish(self) -> Program {
        self.program
    }
}

pub struct FnBuilder<'b> {
    pb: &'b mut ProgramBuilder,
    id: FuncId,
    current: usize,
    pos: Pos,
}

impl<'b> FnBuilder<'b> {
    fn func(&mut self) -> &mut Function {
        &mut self.pb.program.functions[self.id.index()]
    }

    pub fn types(&mut self) -> &mut TypeTable {
        &mut self.pb.program.types
    }

    pub fn id(&self) -> FuncId {
        self.id
    }

    fn new_value(&mut self, name: &str, ty: TypeId) -> ValueId {
        let pos = self.pos;
        let f = self.func();
        f.values.push(ValueDef { name: name.into(), ty, pos });
        ValueId((f.values.len() - 1) as u32)
    }

    pub fn param(&mut self, name: &str, ty: TypeId) -> ValueId {
        let v = self.new_value(name, ty);
        self.func().params.push(v);
        v
    }

    pub fn free_var(&mut self, name: &str, ty: TypeId) -> ValueId {
        let v = self.new_value(name, ty);
        self.func().free_vars.push(v);
        v
    }

    /// Append a new block; the first block created becomes current.
    pub fn block(&mut self, comment: &str) -> usize {
        let f = self.func();
        let index = f.blocks.len();
        f.blocks.push(BasicBlock { index, comment: comment.into(), ..BasicBlock::default() });
        index
    }

    pub fn switch_to(&mut self, block: usize) {
        self.current = block;
    }

    pub fn current(&self) -> usize {
        self.current
    }

    /// Position attached to subsequently pushed instructions.
    pub fn at(&mut self, line: u32, column: u32) {
        self.pos = Pos::new(line, column);
    }

    pub fn set_recover(&mut self, block: usize) {
        self.func().recover = Some(block);
    }

    pub fn operand_type(&self, op: &Operand) -> TypeId {
        let program = &self.pb.program;
        match op {
            Operand::Value(v) => program.functions[self.id.index()].values[v.index()].ty,
            Operand::Const(c) => c.ty,
            Operand::Function(f) => program.functions[f.index()].signature,
            Operand::Global(g) => program.globals[g.index()].ty,
        }
    }

    pub fn push(&mut self, kind: InstrKind, result: Option<TypeId>) -> Option<ValueId> {
        if self.func().blocks.is_empty() {
            self.block("entry");
        }
        let result = result.map(|ty| self.new_value("", ty));
        let pos = self.pos;
        let current = self.current;
        self.func().blocks[current].instrs.push(Instruction { result, pos, kind });
        result
    }

    pub fn value(&mut self, kind: InstrKind, ty: TypeId) -> ValueId {
        let v = self.push(kind, Some(ty));
        v.unwrap_or(ValueId(u32::MAX))
    }

    pub fn effect(&mut self, kind: InstrKind) {
        self.push(kind, None);
    }

    pub fn alloc_local(&mut self, elem: TypeId, comment: &str) -> ValueId {
        let ty = self.types().pointer(elem);
        let v = self.value(InstrKind::Alloc { heap: false, comment: comment.into() }, ty);
        self.func().locals.push(v);
        v
    }

    pub fn alloc_heap(&mut self, elem: TypeId, comment: &str) -> ValueId {
        let ty = self.types().pointer(elem);
        self.value(InstrKind::Alloc { heap: true, comment: comment.into() }, ty)
    }

    pub fn binop(&mut self, op: BinaryOp, x: Operand, y: Operand, ty: TypeId) -> ValueId {
        self.value(InstrKind::BinOp { op, x, y }, ty)
    }

    pub fn unop(&mut self, op: UnaryOp, x: Operand, ty: TypeId) -> ValueId {
        self.value(InstrKind::UnOp { op, x, comma_ok: false }, ty)
    }

    /// `*addr`; the result type is the pointer's element type.
    pub fn load(&mut self, addr: Operand) -> ValueId {
        let pty = self.operand_type(&addr);
        let elem = self.pb.program.types.pointer_elem(pty).unwrap_or(pty);
        self.unop(UnaryOp::Deref, addr, elem)
    }

    pub fn store(&mut self, addr: Operand, val: Operand) {
        self.effect(InstrKind::Store { addr, val });
    }

    pub fn field_addr(&mut self, x: Operand, field: usize) -> ValueId {
        let pty = self.operand_type(&x);
        let types = &self.pb.program.types;
        let fty = types
            .pointer_elem(pty)
            .and_then(|s| match types.under(s) {
                Type::Struct(fields) => fields.get(field).map(|f| f.ty),
                _ => None,
            })
            .unwrap_or(pty);
        let ty = self.types().pointer(fty);
        self.value(InstrKind::FieldAddr { x, field }, ty)
    }

    fn results_type(&mut self, sig: TypeId) -> Option<TypeId> {
        let results: Vec<TypeId> = match self.pb.program.types.as_signature(sig) {
            Some(Signature { results, .. }) => results.iter().map(|r| r.ty).collect(),
            None => vec![],
        };
        match results.len() {
            0 => None,
            1 => Some(results[0]),
            _ => Some(self.types().tuple(results)),
        }
    }

    pub fn call(&mut self, common: CallCommon) -> Option<ValueId> {
        let result = self.results_type(common.signature);
        self.push(InstrKind::Call(common), result)
    }

    pub fn call_static(&mut self, f: FuncId, args: Vec<Operand>, signature: TypeId) -> Option<ValueId> {
        self.call(CallCommon { callee: Callee::Value(Operand::Function(f)), args, signature })
    }

    pub fn call_value(&mut self, fv: Operand, args: Vec<Operand>, signature: TypeId) -> Option<ValueId> {
        self.call(CallCommon { callee: Callee::Value(fv), args, signature })
    }

    pub fn invoke(&mut self, recv: Operand, method: &str, args: Vec<Operand>, signature: TypeId) -> Option<ValueId> {
        self.call(CallCommon { callee: Callee::Invoke { recv, method: method.into() }, args, signature })
    }

    pub fn call_builtin(&mut self, builtin: Builtin, args: Vec<Operand>, signature: TypeId) -> Option<ValueId> {
        self.call(CallCommon { callee: Callee::Builtin(builtin), args, signature })
    }

    pub fn make_closure(&mut self, func: FuncId, bindings: Vec<Operand>, ty: TypeId) -> ValueId {
        self.value(InstrKind::MakeClosure { func, bindings }, ty)
    }

    pub fn make_interface(&mut self, x: Operand, iface: TypeId) -> ValueId {
        self.value(InstrKind::MakeInterface { x }, iface)
    }

    pub fn extract(&mut self, tuple: ValueId, index: usize, ty: TypeId) -> ValueId {
        self.value(InstrKind::Extract { tuple: Operand::Value(tuple), index }, ty)
    }

    /// A phi whose edges follow the block's predecessor order.
    pub fn phi(&mut self, ty: TypeId, edges: Vec<Operand>) -> ValueId {
        self.value(InstrKind::Phi { edges, comment: String::new() }, ty)
    }

    /// Replace the edges of an earlier phi, for loops whose back edges are
    /// built after the header.
    pub fn set_phi_edges(&mut self, phi: ValueId, edges: Vec<Operand>) {
        let instr = self
            .func()
            .blocks
            .iter_mut()
            .flat_map(|b| b.instrs.iter_mut())
            .find(|i| i.result == Some(phi));
        if let Some(Instruction { kind: InstrKind::Phi { edges: old, .. }, .. }) = instr {
            *old = edges;
        }
    }

    fn link(&mut self, from: usize, to: usize) {
        let f = self.func();
        f.blocks[from].succs.push(to);
        f.blocks[to].preds.push(from);
    }

    pub fn jump(&mut self, target: usize) {
        self.effect(InstrKind::Jump);
        let from = self.current;
        self.link(from, target);
    }

    pub fn if_(&mut self, cond: Operand, then: usize, els: usize) {
        self.effect(InstrKind::If { cond });
        let from = self.current;
        self.link(from, then);
        self.link(from, els);
    }

    pub fn ret(&mut self, results: Vec<Operand>) {
        self.effect(InstrKind::Return { results });
    }

    pub fn defer(&mut self, common: CallCommon) {
        self.effect(InstrKind::Defer(common));
    }

    pub fn go(&mut self, common: CallCommon) {
        self.effect(InstrKind::Go(common));
    }

    pub fn run_defers(&mut self) {
        self.effect(InstrKind::RunDefers);
    }

    pub fn panic(&mut self, x: Operand) {
        self.effect(InstrKind::Panic { x });
    }

    pub fn finish(self) -> FuncId {
        self.id
    }
}
