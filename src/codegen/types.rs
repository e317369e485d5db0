//! Bridge between Go types and their Cranelift representation.
//!
//! A Go value is carried as a flat list of scalar Cranelift values ("parts").
//! Aggregates are flattened field by field, so a struct `{int32; string}` is
//! three parts: `[i32, i64 ptr, i64 len]`. The memory layout (offsets, size,
//! alignment) follows the gc toolchain's rules for 64-bit targets.

use std::collections::HashMap;
use std::rc::Rc;

use cranelift_codegen::ir::{self, types as cl};
use thiserror::Error;

use crate::types::{BasicKind, Type, TypeId, TypeTable};

/// Size of a pointer in bytes.
pub const POINTER_SIZE: u64 = 8;

/// Values flattening to more scalars than this are refused.
pub const MAX_FLAT_PARTS: usize = 64;

/// A lowered Go value: its scalar parts plus the Go type they represent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoValue {
    pub parts: Vec<ir::Value>,
    pub ty: TypeId,
}

impl GoValue {
    pub fn new(parts: Vec<ir::Value>, ty: TypeId) -> Self {
        Self { parts, ty }
    }

    pub fn scalar(v: ir::Value, ty: TypeId) -> Self {
        Self { parts: vec![v], ty }
    }

    /// The single part of a scalar value.
    pub fn single(&self) -> ir::Value {
        self.parts[0]
    }

    /// Same representation, different Go type.
    pub fn retyped(self, ty: TypeId) -> Self {
        Self { parts: self.parts, ty }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("type {0} flattens to more than {MAX_FLAT_PARTS} scalars")]
    TooLarge(String),
    #[error("type {0} has no runtime representation")]
    NoRepresentation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scalar {
    pub ty: ir::Type,
    pub offset: u64,
}

/// Flattened representation and memory layout of one Go type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub size: u64,
    pub align: u64,
    pub scalars: Vec<Scalar>,
}

impl Layout {
    pub fn part_types(&self) -> Vec<ir::Type> {
        self.scalars.iter().map(|s| s.ty).collect()
    }

    pub fn parts(&self) -> usize {
        self.scalars.len()
    }
}

/// Layout of an ad-hoc record: closures, thunk records, result blocks.
#[derive(Debug, Clone)]
pub struct Record {
    pub size: u64,
    pub align: u64,
    pub offsets: Vec<u64>,
    pub layouts: Vec<Rc<Layout>>,
}

impl Record {
    /// Range of flattened parts belonging to field `i`.
    pub fn part_range(&self, i: usize) -> std::ops::Range<usize> {
        let start: usize = self.layouts[..i].iter().map(|l| l.parts()).sum();
        start..start + self.layouts[i].parts()
    }
}

/// Types whose values are a single machine pointer. Interfaces hold such
/// values directly in their data word instead of boxing them.
pub fn is_pointer_shaped(types: &TypeTable, ty: TypeId) -> bool {
    match types.under(ty) {
        Type::Pointer(_) | Type::Map { .. } | Type::Chan { .. } | Type::Signature(_) => true,
        Type::Basic(kind) => *kind == BasicKind::UnsafePointer,
        _ => false,
    }
}

pub fn align_up(offset: u64, align: u64) -> u64 {
    if align <= 1 {
        offset
    } else {
        offset.div_ceil(align) * align
    }
}

pub struct TypeLowering<'p> {
    types: &'p TypeTable,
    cache: HashMap<TypeId, Rc<Layout>>,
}

impl<'p> TypeLowering<'p> {
    pub fn new(types: &'p TypeTable) -> Self {
        Self { types, cache: HashMap::new() }
    }

    pub fn table(&self) -> &'p TypeTable {
        self.types
    }

    pub fn size_align(&self, ty: TypeId) -> (u64, u64) {
        match self.types.under(ty) {
            Type::Basic(kind) => {
                let size = kind.size() as u64;
                let align = match kind {
                    BasicKind::Complex64 => 4,
                    BasicKind::Complex128 | BasicKind::String => 8,
                    _ => size,
                };
                (size, align)
            }
            Type::Pointer(_) | Type::Map { .. } | Type::Chan { .. } | Type::Signature(_) => {
                (POINTER_SIZE, POINTER_SIZE)
            }
            Type::Slice(_) => (3 * POINTER_SIZE, POINTER_SIZE),
            Type::Interface(_) => (2 * POINTER_SIZE, POINTER_SIZE),
            Type::Array { elem, len } => {
                let (size, align) = self.size_align(*elem);
                (size.saturating_mul(*len), align)
            }
            Type::Struct(fields) => {
                let tys: Vec<TypeId> = fields.iter().map(|f| f.ty).collect();
                let (size, align, _) = self.offsets(&tys);
                (size, align)
            }
            Type::Tuple(elems) => {
                let (size, align, _) = self.offsets(elems);
                (size, align)
            }
            // An unresolved named type; treat as an opaque zero-size value.
            Type::Named(_) => (0, 1),
        }
    }

    pub fn size_of(&self, ty: TypeId) -> u64 {
        self.size_align(ty).0
    }

    /// Field offsets with gc struct rules: each field at its natural
    /// alignment, total size rounded up to the largest alignment.
    pub fn offsets(&self, fields: &[TypeId]) -> (u64, u64, Vec<u64>) {
        let mut offset = 0;
        let mut max_align = 1;
        let mut offsets = Vec::with_capacity(fields.len());
        for &f in fields {
            let (size, align) = self.size_align(f);
            offset = align_up(offset, align);
            offsets.push(offset);
            offset += size;
            max_align = max_align.max(align);
        }
        (align_up(offset, max_align), max_align, offsets)
    }

    pub fn field_offset(&self, strukt: TypeId, field: usize) -> u64 {
        match self.types.under(strukt) {
            Type::Struct(fields) => {
                let tys: Vec<TypeId> = fields.iter().map(|f| f.ty).collect();
                self.offsets(&tys).2.get(field).copied().unwrap_or(0)
            }
            _ => 0,
        }
    }

    pub fn field_type(&self, strukt: TypeId, field: usize) -> Option<TypeId> {
        match self.types.under(strukt) {
            Type::Struct(fields) => fields.get(field).map(|f| f.ty),
            _ => None,
        }
    }

    /// Number of scalar parts without building the layout.
    pub fn part_count(&self, ty: TypeId) -> usize {
        match self.types.under(ty) {
            Type::Basic(kind) => match kind {
                BasicKind::Complex64 | BasicKind::Complex128 | BasicKind::String => 2,
                _ => 1,
            },
            Type::Pointer(_) | Type::Map { .. } | Type::Chan { .. } | Type::Signature(_) => 1,
            Type::Slice(_) => 3,
            Type::Interface(_) => 2,
            Type::Array { elem, len } => {
                let per = self.part_count(*elem);
                usize::try_from(*len).unwrap_or(usize::MAX).saturating_mul(per)
            }
            Type::Struct(fields) => fields.iter().map(|f| self.part_count(f.ty)).sum(),
            Type::Tuple(elems) => elems.iter().map(|e| self.part_count(*e)).sum(),
            Type::Named(_) => 0,
        }
    }

    pub fn layout(&mut self, ty: TypeId) -> Result<Rc<Layout>, LayoutError> {
        if let Some(l) = self.cache.get(&ty) {
            return Ok(l.clone());
        }
        if self.part_count(ty) > MAX_FLAT_PARTS {
            return Err(LayoutError::TooLarge(self.types.type_string(ty)));
        }
        let mut scalars = Vec::new();
        self.flatten(ty, 0, &mut scalars)?;
        let (size, align) = self.size_align(ty);
        let layout = Rc::new(Layout { size, align, scalars });
        self.cache.insert(ty, layout.clone());
        Ok(layout)
    }

    pub fn record(&mut self, fields: &[TypeId]) -> Result<Record, LayoutError> {
        let (size, align, offsets) = self.offsets(fields);
        let layouts = fields.iter().map(|&f| self.layout(f)).collect::<Result<Vec<_>, _>>()?;
        Ok(Record { size, align, offsets, layouts })
    }

    fn flatten(&self, ty: TypeId, base: u64, out: &mut Vec<Scalar>) -> Result<(), LayoutError> {
        let under = self.types.under(ty);
        let nested = matches!(under, Type::Array { .. } | Type::Struct(_) | Type::Tuple(_));
        if nested {
            return self.flatten_nested(ty, base, out);
        }
        let mut push = |ty: ir::Type, offset: u64| out.push(Scalar { ty, offset: base + offset });
        match under {
            Type::Basic(kind) => match kind {
                BasicKind::Bool | BasicKind::Int8 | BasicKind::Uint8 => push(cl::I8, 0),
                BasicKind::Int16 | BasicKind::Uint16 => push(cl::I16, 0),
                BasicKind::Int32 | BasicKind::Uint32 => push(cl::I32, 0),
                BasicKind::Int
                | BasicKind::Int64
                | BasicKind::Uint
                | BasicKind::Uint64
                | BasicKind::Uintptr
                | BasicKind::UnsafePointer => push(cl::I64, 0),
                BasicKind::Float32 => push(cl::F32, 0),
                BasicKind::Float64 => push(cl::F64, 0),
                BasicKind::Complex64 => {
                    push(cl::F32, 0);
                    push(cl::F32, 4);
                }
                BasicKind::Complex128 => {
                    push(cl::F64, 0);
                    push(cl::F64, 8);
                }
                BasicKind::String => {
                    push(cl::I64, 0);
                    push(cl::I64, 8);
                }
            },
            Type::Pointer(_) | Type::Map { .. } | Type::Chan { .. } | Type::Signature(_) => push(cl::I64, 0),
            Type::Slice(_) => {
                push(cl::I64, 0);
                push(cl::I64, 8);
                push(cl::I64, 16);
            }
            Type::Interface(_) => {
                push(cl::I64, 0);
                push(cl::I64, 8);
            }
            Type::Array { .. } | Type::Struct(_) | Type::Tuple(_) => {}
            Type::Named(_) => return Err(LayoutError::NoRepresentation(self.types.type_string(ty))),
        }
        Ok(())
    }

    fn flatten_nested(&self, ty: TypeId, base: u64, out: &mut Vec<Scalar>) -> Result<(), LayoutError> {
        match self.types.under(ty) {
            Type::Array { elem, len } => {
                let stride = self.size_of(*elem);
                for i in 0..*len {
                    self.flatten(*elem, base + i * stride, out)?;
                }
            }
            Type::Struct(fields) => {
                let tys: Vec<TypeId> = fields.iter().map(|f| f.ty).collect();
                let (_, _, offsets) = self.offsets(&tys);
                for (f, off) in tys.iter().zip(offsets) {
                    self.flatten(*f, base + off, out)?;
                }
            }
            Type::Tuple(elems) => {
                let (_, _, offsets) = self.offsets(elems);
                for (e, off) in elems.iter().zip(offsets) {
                    self.flatten(*e, base + off, out)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Range of parts of field `field` within a flattened struct value.
    pub fn field_parts(&self, strukt: TypeId, field: usize) -> std::ops::Range<usize> {
        match self.types.under(strukt) {
            Type::Struct(fields) => {
                let start: usize = fields[..field].iter().map(|f| self.part_count(f.ty)).sum();
                let count = fields.get(field).map(|f| self.part_count(f.ty)).unwrap_or(0);
                start..start + count
            }
            _ => 0..0,
        }
    }
}
