//! The Go type-system model consumed by the backend.
//!
//! Types live in a [`TypeTable`] and are referred to by [`TypeId`]. Structural
//! types are interned, so building the same composite twice yields the same
//! id. Named types are always distinct and may be recursive: create them with
//! [`TypeTable::new_named`] and attach the underlying type afterwards.

use std::collections::HashMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::span::Pos;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeId(pub u32);

impl TypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BasicKind {
    Bool,
    Int,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Uintptr,
    Float32,
    Float64,
    Complex64,
    Complex128,
    String,
    UnsafePointer,
}

impl BasicKind {
    pub const ALL: [BasicKind; 18] = [
        BasicKind::Bool,
        BasicKind::Int,
        BasicKind::Int8,
        BasicKind::Int16,
        BasicKind::Int32,
        BasicKind::Int64,
        BasicKind::Uint,
        BasicKind::Uint8,
        BasicKind::Uint16,
        BasicKind::Uint32,
        BasicKind::Uint64,
        BasicKind::Uintptr,
        BasicKind::Float32,
        BasicKind::Float64,
        BasicKind::Complex64,
        BasicKind::Complex128,
        BasicKind::String,
        BasicKind::UnsafePointer,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BasicKind::Bool => "bool",
            BasicKind::Int => "int",
            BasicKind::Int8 => "int8",
            BasicKind::Int16 => "int16",
            BasicKind::Int32 => "int32",
            BasicKind::Int64 => "int64",
            BasicKind::Uint => "uint",
            BasicKind::Uint8 => "uint8",
            BasicKind::Uint16 => "uint16",
            BasicKind::Uint32 => "uint32",
            BasicKind::Uint64 => "uint64",
            BasicKind::Uintptr => "uintptr",
            BasicKind::Float32 => "float32",
            BasicKind::Float64 => "float64",
            BasicKind::Complex64 => "complex64",
            BasicKind::Complex128 => "complex128",
            BasicKind::String => "string",
            BasicKind::UnsafePointer => "unsafe.Pointer",
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            BasicKind::Int
                | BasicKind::Int8
                | BasicKind::Int16
                | BasicKind::Int32
                | BasicKind::Int64
                | BasicKind::Uint
                | BasicKind::Uint8
                | BasicKind::Uint16
                | BasicKind::Uint32
                | BasicKind::Uint64
                | BasicKind::Uintptr
        )
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            BasicKind::Uint
                | BasicKind::Uint8
                | BasicKind::Uint16
                | BasicKind::Uint32
                | BasicKind::Uint64
                | BasicKind::Uintptr
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, BasicKind::Float32 | BasicKind::Float64)
    }

    pub fn is_complex(self) -> bool {
        matches!(self, BasicKind::Complex64 | BasicKind::Complex128)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float() || self.is_complex()
    }

    /// Size in bytes on a 64-bit target.
    pub fn size(self) -> u32 {
        match self {
            BasicKind::Bool | BasicKind::Int8 | BasicKind::Uint8 => 1,
            BasicKind::Int16 | BasicKind::Uint16 => 2,
            BasicKind::Int32 | BasicKind::Uint32 | BasicKind::Float32 => 4,
            BasicKind::Int
            | BasicKind::Int64
            | BasicKind::Uint
            | BasicKind::Uint64
            | BasicKind::Uintptr
            | BasicKind::Float64
            | BasicKind::Complex64
            | BasicKind::UnsafePointer => 8,
            BasicKind::Complex128 | BasicKind::String => 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChanDir {
    Both,
    Send,
    Recv,
}

/// A parameter, result or receiver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Var {
    #[serde(default)]
    pub name: String,
    pub ty: TypeId,
    #[serde(default)]
    pub pos: Pos,
}

impl Var {
    pub fn new(name: impl Into<String>, ty: TypeId) -> Self {
        Self { name: name.into(), ty, pos: Pos::dummy() }
    }

    pub fn anon(ty: TypeId) -> Self {
        Self::new("", ty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Signature {
    #[serde(default)]
    pub recv: Option<Var>,
    #[serde(default)]
    pub params: Vec<Var>,
    #[serde(default)]
    pub results: Vec<Var>,
    #[serde(default)]
    pub variadic: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: TypeId,
    #[serde(default)]
    pub embedded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IfaceMethod {
    pub name: String,
    /// Signature type without receiver.
    pub sig: TypeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Named {
    pub name: String,
    /// Package path; `None` for universe-scoped types such as `error`.
    pub pkg: Option<String>,
    pub underlying: Option<TypeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    Basic(BasicKind),
    Pointer(TypeId),
    Slice(TypeId),
    Array { elem: TypeId, len: u64 },
    Map { key: TypeId, elem: TypeId },
    Chan { elem: TypeId, dir: ChanDir },
    Struct(Vec<Field>),
    /// Methods are kept sorted by name.
    Interface(Vec<IfaceMethod>),
    Signature(Signature),
    Named(Named),
    Tuple(Vec<TypeId>),
}

/// Type ids mentioned directly by `ty`.
fn type_refs(ty: &Type) -> Vec<TypeId> {
    let vars = |sig: &Signature| -> Vec<TypeId> {
        sig.recv.iter().chain(&sig.params).chain(&sig.results).map(|v| v.ty).collect()
    };
    match ty {
        Type::Basic(_) => vec![],
        Type::Pointer(t) | Type::Slice(t) | Type::Array { elem: t, .. } | Type::Chan { elem: t, .. } => vec![*t],
        Type::Map { key, elem } => vec![*key, *elem],
        Type::Struct(fields) => fields.iter().map(|f| f.ty).collect(),
        Type::Interface(methods) => methods.iter().map(|m| m.sig).collect(),
        Type::Signature(sig) => vars(sig),
        Type::Named(named) => named.underlying.into_iter().collect(),
        Type::Tuple(elems) => elems.clone(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeTable {
    types: Vec<Type>,
    error: TypeId,
    #[serde(skip)]
    interned: HashMap<Type, TypeId>,
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeTable {
    pub fn new() -> Self {
        let mut table = TypeTable { types: Vec::new(), error: TypeId(0), interned: HashMap::new() };
        for kind in BasicKind::ALL {
            table.intern(Type::Basic(kind));
        }
        let string = table.basic(BasicKind::String);
        let error_sig = table.signature(Signature {
            results: vec![Var::anon(string)],
            ..Signature::default()
        });
        let error_iface = table.interface(vec![IfaceMethod { name: "Error".into(), sig: error_sig }]);
        table.error = table.named("error", None, error_iface);
        table
    }

    /// Rebuild the interning index after deserialization and check that the
    /// basic types sit at their fixed positions.
    pub fn rebuild_index(&mut self) -> Result<(), String> {
        for (i, kind) in BasicKind::ALL.iter().enumerate() {
            if self.types.get(i) != Some(&Type::Basic(*kind)) {
                return Err(format!("type table slot {i} must hold basic type {}", kind.name()));
            }
        }
        if self.error.index() >= self.types.len() {
            return Err("type table has no error type".to_string());
        }
        let len = self.types.len();
        for (i, ty) in self.types.iter().enumerate() {
            if let Some(bad) = type_refs(ty).into_iter().find(|t| t.index() >= len) {
                return Err(format!("type {i} refers to missing type {}", bad.0));
            }
        }
        self.interned.clear();
        for (i, ty) in self.types.iter().enumerate() {
            if !matches!(ty, Type::Named(_)) {
                self.interned.entry(ty.clone()).or_insert(TypeId(i as u32));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn get(&self, id: TypeId) -> &Type {
        &self.types[id.index()]
    }

    pub fn intern(&mut self, ty: Type) -> TypeId {
        if let Some(&id) = self.interned.get(&ty) {
            return id;
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(ty.clone());
        self.interned.insert(ty, id);
        id
    }

    pub fn basic(&self, kind: BasicKind) -> TypeId {
        let index = BasicKind::ALL.iter().position(|k| *k == kind).unwrap_or(0);
        TypeId(index as u32)
    }

    pub fn error(&self) -> TypeId {
        self.error
    }

    pub fn pointer(&mut self, elem: TypeId) -> TypeId {
        self.intern(Type::Pointer(elem))
    }

    pub fn slice(&mut self, elem: TypeId) -> TypeId {
        self.intern(Type::Slice(elem))
    }

    pub fn array(&mut self, elem: TypeId, len: u64) -> TypeId {
        self.intern(Type::Array { elem, len })
    }

    pub fn map(&mut self, key: TypeId, elem: TypeId) -> TypeId {
        self.intern(Type::Map { key, elem })
    }

    pub fn chan(&mut self, elem: TypeId, dir: ChanDir) -> TypeId {
        self.intern(Type::Chan { elem, dir })
    }

    pub fn strukt(&mut self, fields: Vec<Field>) -> TypeId {
        self.intern(Type::Struct(fields))
    }

    pub fn interface(&mut self, mut methods: Vec<IfaceMethod>) -> TypeId {
        methods.sort_by(|a, b| a.name.cmp(&b.name));
        self.intern(Type::Interface(methods))
    }

    pub fn signature(&mut self, sig: Signature) -> TypeId {
        self.intern(Type::Signature(sig))
    }

    pub fn tuple(&mut self, elems: Vec<TypeId>) -> TypeId {
        self.intern(Type::Tuple(elems))
    }

    /// A named type whose underlying type is attached later.
    pub fn new_named(&mut self, name: impl Into<String>, pkg: Option<&str>) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(Type::Named(Named {
            name: name.into(),
            pkg: pkg.map(str::to_string),
            underlying: None,
        }));
        id
    }

    pub fn set_underlying(&mut self, named: TypeId, underlying: TypeId) {
        let underlying = self.underlying(underlying);
        if let Type::Named(n) = &mut self.types[named.index()] {
            n.underlying = Some(underlying);
        }
    }

    pub fn named(&mut self, name: impl Into<String>, pkg: Option<&str>, underlying: TypeId) -> TypeId {
        let id = self.new_named(name, pkg);
        self.set_underlying(id, underlying);
        id
    }

    /// Follow named types down to a structural type.
    pub fn underlying(&self, mut id: TypeId) -> TypeId {
        // Named chains are acyclic once underlying types are attached.
        for _ in 0..self.types.len() + 1 {
            match self.get(id) {
                Type::Named(Named { underlying: Some(u), .. }) => id = *u,
                _ => return id,
            }
        }
        id
    }

    pub fn under(&self, id: TypeId) -> &Type {
        self.get(self.underlying(id))
    }

    pub fn basic_kind(&self, id: TypeId) -> Option<BasicKind> {
        match self.under(id) {
            Type::Basic(kind) => Some(*kind),
            _ => None,
        }
    }

    pub fn pointer_elem(&self, id: TypeId) -> Option<TypeId> {
        match self.under(id) {
            Type::Pointer(elem) => Some(*elem),
            _ => None,
        }
    }

    pub fn is_interface(&self, id: TypeId) -> bool {
        matches!(self.under(id), Type::Interface(_))
    }

    pub fn is_empty_interface(&self, id: TypeId) -> bool {
        matches!(self.under(id), Type::Interface(m) if m.is_empty())
    }

    pub fn is_string(&self, id: TypeId) -> bool {
        self.basic_kind(id) == Some(BasicKind::String)
    }

    pub fn as_named(&self, id: TypeId) -> Option<&Named> {
        match self.get(id) {
            Type::Named(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_signature(&self, id: TypeId) -> Option<&Signature> {
        match self.under(id) {
            Type::Signature(sig) => Some(sig),
            _ => None,
        }
    }

    pub fn interface_methods(&self, id: TypeId) -> &[IfaceMethod] {
        match self.under(id) {
            Type::Interface(methods) => methods,
            _ => &[],
        }
    }

    /// Elements of a tuple type; any other type is a one-element tuple.
    pub fn tuple_elems(&self, id: TypeId) -> Vec<TypeId> {
        match self.get(id) {
            Type::Tuple(elems) => elems.clone(),
            _ => vec![id],
        }
    }

    /// The named type a method receiver belongs to, looking through one pointer.
    pub fn receiver_named(&self, recv: TypeId) -> Option<&Named> {
        let base = match self.get(recv) {
            Type::Pointer(elem) => *elem,
            _ => recv,
        };
        self.as_named(base)
    }

    /// Go-like rendering of a type, used for descriptor names and hashes.
    pub fn type_string(&self, id: TypeId) -> String {
        let mut out = String::new();
        self.write_type(&mut out, id);
        out
    }

    fn write_type(&self, out: &mut String, id: TypeId) {
        match self.get(id) {
            Type::Basic(kind) => out.push_str(kind.name()),
            Type::Pointer(elem) => {
                out.push('*');
                self.write_type(out, *elem);
            }
            Type::Slice(elem) => {
                out.push_str("[]");
                self.write_type(out, *elem);
            }
            Type::Array { elem, len } => {
                let _ = write!(out, "[{len}]");
                self.write_type(out, *elem);
            }
            Type::Map { key, elem } => {
                out.push_str("map[");
                self.write_type(out, *key);
                out.push(']');
                self.write_type(out, *elem);
            }
            Type::Chan { elem, dir } => {
                out.push_str(match dir {
                    ChanDir::Both => "chan ",
                    ChanDir::Send => "chan<- ",
                    ChanDir::Recv => "<-chan ",
                });
                self.write_type(out, *elem);
            }
            Type::Struct(fields) => {
                out.push_str("struct{");
                for (i, f) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push_str("; ");
                    }
                    if !f.embedded {
                        out.push_str(&f.name);
                        out.push(' ');
                    }
                    self.write_type(out, f.ty);
                }
                out.push('}');
            }
            Type::Interface(methods) => {
                out.push_str("interface{");
                for (i, m) in methods.iter().enumerate() {
                    if i > 0 {
                        out.push_str("; ");
                    }
                    out.push_str(&m.name);
                    self.write_signature_tail(out, m.sig);
                }
                out.push('}');
            }
            Type::Signature(_) => {
                out.push_str("func");
                self.write_signature_tail(out, id);
            }
            Type::Named(n) => {
                if let Some(pkg) = &n.pkg {
                    out.push_str(pkg);
                    out.push('.');
                }
                out.push_str(&n.name);
            }
            Type::Tuple(elems) => {
                out.push('(');
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.write_type(out, *e);
                }
                out.push(')');
            }
        }
    }

    fn write_signature_tail(&self, out: &mut String, sig: TypeId) {
        let Some(sig) = self.as_signature(sig) else {
            return;
        };
        out.push('(');
        for (i, p) in sig.params.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            if sig.variadic && i + 1 == sig.params.len() {
                out.push_str("...");
                match self.under(p.ty) {
                    Type::Slice(elem) => self.write_type(out, *elem),
                    _ => self.write_type(out, p.ty),
                }
            } else {
                self.write_type(out, p.ty);
            }
        }
        out.push(')');
        match sig.results.len() {
            0 => {}
            1 => {
                out.push(' ');
                self.write_type(out, sig.results[0].ty);
            }
            _ => {
                out.push_str(" (");
                for (i, r) in sig.results.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.write_type(out, r.ty);
                }
                out.push(')');
            }
        }
    }
}

impl std::fmt::Display for BasicKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
