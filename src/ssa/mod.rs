//! Read-only SSA program model produced by a Go front-end.
//!
//! The shapes mirror Go's SSA form: every function is a list of basic blocks,
//! block 0 is the entry, each block ends in a control instruction, and phi
//! edges are ordered like the block's predecessor list.

pub mod builder;
pub mod dom;
pub mod reach;

use serde::{Deserialize, Serialize};

use crate::diagnostics::CompileError;
use crate::span::Pos;
use crate::types::{ChanDir, TypeId, TypeTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FuncId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PkgId(pub u32);

/// Index into a function's value table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueId(pub u32);

macro_rules! id_index {
    ($($t:ty),*) => {
        $(impl $t {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        })*
    };
}
id_index!(FuncId, GlobalId, PkgId, ValueId);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    #[serde(default)]
    pub files: Vec<String>,
    pub types: TypeTable,
    pub packages: Vec<Package>,
    pub functions: Vec<Function>,
    #[serde(default)]
    pub globals: Vec<Global>,
    #[serde(default)]
    pub method_sets: Vec<MethodSet>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub path: String,
    pub name: String,
    #[serde(default)]
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Member {
    Global(GlobalId),
    Function(FuncId),
    Type(TypeId),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    pub name: String,
    pub pkg: PkgId,
    /// Always a pointer type; the global's storage holds the element.
    pub ty: TypeId,
    #[serde(default)]
    pub pos: Pos,
}

/// The concrete methods of a receiver type, used for type descriptors and itabs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodSet {
    pub recv: TypeId,
    pub methods: Vec<MethodEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodEntry {
    pub name: String,
    pub func: FuncId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueDef {
    #[serde(default)]
    pub name: String,
    pub ty: TypeId,
    #[serde(default)]
    pub pos: Pos,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    /// Owning package; `None` for synthetic wrappers.
    pub pkg: Option<PkgId>,
    pub signature: TypeId,
    #[serde(default)]
    pub enclosing: Option<FuncId>,
    /// Describes why a synthetic function exists (e.g. "wrapper for func (T).M").
    #[serde(default)]
    pub synthetic: Option<String>,
    #[serde(default)]
    pub pos: Pos,
    #[serde(default)]
    pub values: Vec<ValueDef>,
    #[serde(default)]
    pub params: Vec<ValueId>,
    #[serde(default)]
    pub free_vars: Vec<ValueId>,
    /// Stack allocations (non-heap `Alloc` results) of the function.
    #[serde(default)]
    pub locals: Vec<ValueId>,
    #[serde(default)]
    pub blocks: Vec<BasicBlock>,
    /// Block that resumes after a recovered panic.
    #[serde(default)]
    pub recover: Option<usize>,
}

impl Function {
    pub fn value(&self, v: ValueId) -> &ValueDef {
        &self.values[v.index()]
    }

    pub fn has_body(&self) -> bool {
        !self.blocks.is_empty()
    }

    pub fn has_defer(&self) -> bool {
        self.blocks
            .iter()
            .flat_map(|b| &b.instrs)
            .any(|i| matches!(i.kind, InstrKind::Defer(_)))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BasicBlock {
    pub index: usize,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub instrs: Vec<Instruction>,
    #[serde(default)]
    pub preds: Vec<usize>,
    #[serde(default)]
    pub succs: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instruction {
    #[serde(default)]
    pub result: Option<ValueId>,
    #[serde(default)]
    pub pos: Pos,
    pub kind: InstrKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstValue {
    Nil,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Complex(f64, f64),
    String(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Const {
    pub ty: TypeId,
    pub value: ConstValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Value(ValueId),
    Const(Const),
    Function(FuncId),
    Global(GlobalId),
}

impl Operand {
    pub fn int(ty: TypeId, v: i64) -> Self {
        Operand::Const(Const { ty, value: ConstValue::Int(v) })
    }

    pub fn nil(ty: TypeId) -> Self {
        Operand::Const(Const { ty, value: ConstValue::Nil })
    }

    pub fn as_value(&self) -> Option<ValueId> {
        match self {
            Operand::Value(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Builtin {
    Append,
    Cap,
    Close,
    Complex,
    Copy,
    Delete,
    Imag,
    Len,
    Panic,
    Print,
    Println,
    Real,
    Recover,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Append => "append",
            Builtin::Cap => "cap",
            Builtin::Close => "close",
            Builtin::Complex => "complex",
            Builtin::Copy => "copy",
            Builtin::Delete => "delete",
            Builtin::Imag => "imag",
            Builtin::Len => "len",
            Builtin::Panic => "panic",
            Builtin::Print => "print",
            Builtin::Println => "println",
            Builtin::Real => "real",
            Builtin::Recover => "recover",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Callee {
    Builtin(Builtin),
    /// A static function (`Operand::Function`) or a dynamic function value.
    Value(Operand),
    /// Interface method call; `recv` has interface type.
    Invoke { recv: Operand, method: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallCommon {
    pub callee: Callee,
    #[serde(default)]
    pub args: Vec<Operand>,
    /// Signature of the callee (for methods, including the receiver).
    pub signature: TypeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Quo,
    Rem,
    And,
    Or,
    Xor,
    AndNot,
    Shl,
    Shr,
    Eql,
    Neq,
    Lss,
    Leq,
    Gtr,
    Geq,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eql | BinaryOp::Neq | BinaryOp::Lss | BinaryOp::Leq | BinaryOp::Gtr | BinaryOp::Geq
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Not,
    Xor,
    /// Pointer load.
    Deref,
    /// Channel receive.
    Recv,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectState {
    pub dir: ChanDir,
    pub chan: Operand,
    #[serde(default)]
    pub send: Option<Operand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrKind {
    Alloc { heap: bool, #[serde(default)] comment: String },
    BinOp { op: BinaryOp, x: Operand, y: Operand },
    UnOp { op: UnaryOp, x: Operand, #[serde(default)] comma_ok: bool },
    Call(CallCommon),
    ChangeInterface { x: Operand },
    ChangeType { x: Operand },
    Convert { x: Operand },
    DebugRef { x: Operand },
    Defer(CallCommon),
    Extract { tuple: Operand, index: usize },
    Field { x: Operand, field: usize },
    FieldAddr { x: Operand, field: usize },
    Go(CallCommon),
    If { cond: Operand },
    Index { x: Operand, index: Operand },
    IndexAddr { x: Operand, index: Operand },
    Jump,
    Lookup { x: Operand, index: Operand, #[serde(default)] comma_ok: bool },
    MakeChan { size: Operand },
    MakeClosure { func: FuncId, bindings: Vec<Operand> },
    MakeInterface { x: Operand },
    MakeMap { #[serde(default)] reserve: Option<Operand> },
    MakeSlice { len: Operand, cap: Operand },
    MapUpdate { map: Operand, key: Operand, value: Operand },
    Next { iter: Operand, is_string: bool },
    Panic { x: Operand },
    Phi { edges: Vec<Operand>, #[serde(default)] comment: String },
    Range { x: Operand },
    Return { #[serde(default)] results: Vec<Operand> },
    RunDefers,
    Select { states: Vec<SelectState>, blocking: bool },
    Send { chan: Operand, x: Operand },
    Slice {
        x: Operand,
        #[serde(default)]
        low: Option<Operand>,
        #[serde(default)]
        high: Option<Operand>,
        #[serde(default)]
        max: Option<Operand>,
    },
    Store { addr: Operand, val: Operand },
    TypeAssert { x: Operand, asserted: TypeId, #[serde(default)] comma_ok: bool },
}

impl InstrKind {
    /// Short mnemonic used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            InstrKind::Alloc { .. } => "Alloc",
            InstrKind::BinOp { .. } => "BinOp",
            InstrKind::UnOp { .. } => "UnOp",
            InstrKind::Call(_) => "Call",
            InstrKind::ChangeInterface { .. } => "ChangeInterface",
            InstrKind::ChangeType { .. } => "ChangeType",
            InstrKind::Convert { .. } => "Convert",
            InstrKind::DebugRef { .. } => "DebugRef",
            InstrKind::Defer(_) => "Defer",
            InstrKind::Extract { .. } => "Extract",
            InstrKind::Field { .. } => "Field",
            InstrKind::FieldAddr { .. } => "FieldAddr",
            InstrKind::Go(_) => "Go",
            InstrKind::If { .. } => "If",
            InstrKind::Index { .. } => "Index",
            InstrKind::IndexAddr { .. } => "IndexAddr",
            InstrKind::Jump => "Jump",
            InstrKind::Lookup { .. } => "Lookup",
            InstrKind::MakeChan { .. } => "MakeChan",
            InstrKind::MakeClosure { .. } => "MakeClosure",
            InstrKind::MakeInterface { .. } => "MakeInterface",
            InstrKind::MakeMap { .. } => "MakeMap",
            InstrKind::MakeSlice { .. } => "MakeSlice",
            InstrKind::MapUpdate { .. } => "MapUpdate",
            InstrKind::Next { .. } => "Next",
            InstrKind::Panic { .. } => "Panic",
            InstrKind::Phi { .. } => "Phi",
            InstrKind::Range { .. } => "Range",
            InstrKind::Return { .. } => "Return",
            InstrKind::RunDefers => "RunDefers",
            InstrKind::Select { .. } => "Select",
            InstrKind::Send { .. } => "Send",
            InstrKind::Slice { .. } => "Slice",
            InstrKind::Store { .. } => "Store",
            InstrKind::TypeAssert { .. } => "TypeAssert",
        }
    }

    /// Operands read by the instruction, in evaluation order.
    pub fn operands(&self) -> Vec<&Operand> {
        fn call(c: &CallCommon) -> Vec<&Operand> {
            let mut ops = Vec::with_capacity(c.args.len() + 1);
            match &c.callee {
                Callee::Builtin(_) => {}
                Callee::Value(v) => ops.push(v),
                Callee::Invoke { recv, .. } => ops.push(recv),
            }
            ops.extend(c.args.iter());
            ops
        }
        match self {
            InstrKind::Alloc { .. } | InstrKind::Jump | InstrKind::RunDefers | InstrKind::MakeMap { reserve: None } => {
                vec![]
            }
            InstrKind::MakeMap { reserve: Some(r) } => vec![r],
            InstrKind::BinOp { x, y, .. } => vec![x, y],
            InstrKind::UnOp { x, .. }
            | InstrKind::ChangeInterface { x }
            | InstrKind::ChangeType { x }
            | InstrKind::Convert { x }
            | InstrKind::DebugRef { x }
            | InstrKind::Field { x, .. }
            | InstrKind::FieldAddr { x, .. }
            | InstrKind::MakeInterface { x }
            | InstrKind::Panic { x }
            | InstrKind::Range { x }
            | InstrKind::TypeAssert { x, .. } => vec![x],
            InstrKind::Call(c) | InstrKind::Defer(c) | InstrKind::Go(c) => call(c),
            InstrKind::Extract { tuple, .. } => vec![tuple],
            InstrKind::If { cond } => vec![cond],
            InstrKind::Index { x, index } | InstrKind::IndexAddr { x, index } | InstrKind::Lookup { x, index, .. } => {
                vec![x, index]
            }
            InstrKind::MakeChan { size } => vec![size],
            InstrKind::MakeClosure { bindings, .. } => bindings.iter().collect(),
            InstrKind::MakeSlice { len, cap } => vec![len, cap],
            InstrKind::MapUpdate { map, key, value } => vec![map, key, value],
            InstrKind::Next { iter, .. } => vec![iter],
            InstrKind::Phi { edges, .. } => edges.iter().collect(),
            InstrKind::Return { results } => results.iter().collect(),
            InstrKind::Select { states, .. } => {
                let mut ops = Vec::new();
                for s in states {
                    ops.push(&s.chan);
                    if let Some(v) = &s.send {
                        ops.push(v);
                    }
                }
                ops
            }
            InstrKind::Send { chan, x } => vec![chan, x],
            InstrKind::Slice { x, low, high, max } => {
                let mut ops = vec![x];
                ops.extend(low.iter().chain(high.iter()).chain(max.iter()));
                ops
            }
            InstrKind::Store { addr, val } => vec![addr, val],
        }
    }
}

impl Program {
    pub fn new() -> Self {
        Self {
            files: Vec::new(),
            types: TypeTable::new(),
            packages: Vec::new(),
            functions: Vec::new(),
            globals: Vec::new(),
            method_sets: Vec::new(),
        }
    }

    pub fn from_json(source: &str) -> Result<Self, CompileError> {
        let mut program: Program = serde_json::from_str(source)
            .map_err(|e| CompileError::input(format!("malformed program: {e}")))?;
        program.types.rebuild_index().map_err(CompileError::input)?;
        program.check_shape()?;
        Ok(program)
    }

    pub fn to_json(&self) -> Result<String, CompileError> {
        serde_json::to_string(self).map_err(|e| CompileError::input(format!("cannot serialize program: {e}")))
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.index()]
    }

    pub fn global(&self, id: GlobalId) -> &Global {
        &self.globals[id.index()]
    }

    pub fn package(&self, id: PkgId) -> &Package {
        &self.packages[id.index()]
    }

    pub fn package_by_path(&self, path: &str) -> Option<PkgId> {
        self.packages.iter().position(|p| p.path == path).map(|i| PkgId(i as u32))
    }

    pub fn method_set(&self, recv: TypeId) -> Option<&MethodSet> {
        self.method_sets.iter().find(|m| m.recv == recv)
    }

    /// The concrete method implementing `name` for receiver type `recv`.
    pub fn lookup_method(&self, recv: TypeId, name: &str) -> Option<FuncId> {
        self.method_set(recv)?.methods.iter().find(|m| m.name == name).map(|m| m.func)
    }

    pub fn render_pos(&self, pos: Pos) -> String {
        pos.render(&self.files)
    }

    /// Structural checks a front-end is expected to guarantee; cheap enough to
    /// run on every deserialized program. Every id must name an existing
    /// entity so that lookups during lowering cannot go out of range.
    fn check_shape(&self) -> Result<(), CompileError> {
        let refs = IdRanges {
            types: self.types.len(),
            functions: self.functions.len(),
            globals: self.globals.len(),
            packages: self.packages.len(),
        };
        for p in &self.packages {
            for m in &p.members {
                let ok = match *m {
                    Member::Global(g) => refs.global(g),
                    Member::Function(f) => refs.function(f),
                    Member::Type(t) => refs.ty(t),
                };
                if !ok {
                    return Err(CompileError::input(format!("package {}: member {m:?} does not exist", p.path)));
                }
            }
        }
        for g in &self.globals {
            if !refs.package(g.pkg) || !refs.ty(g.ty) {
                return Err(CompileError::input(format!("global {}: unknown package or type", g.name)));
            }
        }
        for ms in &self.method_sets {
            if !refs.ty(ms.recv) {
                return Err(CompileError::input(format!("method set for missing type {}", ms.recv.0)));
            }
            if let Some(m) = ms.methods.iter().find(|m| !refs.function(m.func)) {
                return Err(CompileError::input(format!("method {} refers to missing function {}", m.name, m.func.0)));
            }
        }
        for f in &self.functions {
            self.check_function(f, &refs)?;
        }
        Ok(())
    }

    fn check_function(&self, f: &Function, refs: &IdRanges) -> Result<(), CompileError> {
        let bad = |what: String| CompileError::input(format!("function {}: {what}", f.name));
        if f.pkg.is_some_and(|p| !refs.package(p)) {
            return Err(bad("unknown package".into()));
        }
        if !refs.ty(f.signature) {
            return Err(bad(format!("missing signature type {}", f.signature.0)));
        }
        if let Some(e) = f.enclosing.filter(|e| !refs.function(*e)) {
            return Err(bad(format!("missing enclosing function {}", e.0)));
        }
        if let Some(v) = f.values.iter().find(|v| !refs.ty(v.ty)) {
            return Err(bad(format!("value {} has missing type {}", v.name, v.ty.0)));
        }
        for (i, b) in f.blocks.iter().enumerate() {
            if b.index != i {
                return Err(bad(format!("block at position {i} has index {}", b.index)));
            }
            for s in b.succs.iter().chain(b.preds.iter()) {
                if *s >= f.blocks.len() {
                    return Err(bad(format!("block {i} refers to missing block {s}")));
                }
            }
        }
        if let Some(r) = f.recover {
            if r >= f.blocks.len() {
                return Err(bad(format!("missing recover block {r}")));
            }
        }
        let value_ok = |v: &ValueId| v.index() < f.values.len();
        let ids = f.params.iter().chain(&f.free_vars).chain(&f.locals);
        for v in ids.chain(f.blocks.iter().flat_map(|b| b.instrs.iter().filter_map(|i| i.result.as_ref()))) {
            if !value_ok(v) {
                return Err(bad(format!("unknown value v{}", v.0)));
            }
        }
        for instr in f.blocks.iter().flat_map(|b| &b.instrs) {
            for op in instr.kind.operands() {
                let ok = match op {
                    Operand::Value(v) => value_ok(v),
                    Operand::Const(c) => refs.ty(c.ty),
                    Operand::Function(id) => refs.function(*id),
                    Operand::Global(g) => refs.global(*g),
                };
                if !ok {
                    return Err(bad(format!("{} refers to missing {op:?}", instr.kind.name())));
                }
            }
            let ok = match &instr.kind {
                InstrKind::MakeClosure { func, .. } => refs.function(*func),
                InstrKind::TypeAssert { asserted, .. } => refs.ty(*asserted),
                InstrKind::Call(c) | InstrKind::Defer(c) | InstrKind::Go(c) => refs.ty(c.signature),
                _ => true,
            };
            if !ok {
                return Err(bad(format!("{} refers to a missing function or type", instr.kind.name())));
            }
        }
        Ok(())
    }
}

/// Sizes of the program's id spaces.
struct IdRanges {
    types: usize,
    functions: usize,
    globals: usize,
    packages: usize,
}

impl IdRanges {
    fn ty(&self, t: TypeId) -> bool {
        t.index() < self.types
    }

    fn function(&self, f: FuncId) -> bool {
        f.index() < self.functions
    }

    fn global(&self, g: GlobalId) -> bool {
        g.index() < self.globals
    }

    fn package(&self, p: PkgId) -> bool {
        p.index() < self.packages
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}
