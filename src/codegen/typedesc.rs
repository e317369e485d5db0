//! Runtime type descriptors, method tables, itabs and string constants.
//!
//! Type descriptor layout (all words little-endian u64 or pointers):
//!
//! | offset | field |
//! |-------:|-------|
//! | 0  | size |
//! | 8  | alignment |
//! | 16 | kind (reflect.Kind numbering) |
//! | 24 | hash of the type string |
//! | 32 | name pointer |
//! | 40 | name length |
//! | 48 | method count |
//! | 56 | method table pointer (`{name_ptr, name_len, fn}` entries) |
//! | 64 | element type descriptor |
//! | 72 | key type descriptor |
//!
//! An itab for concrete type `T` and interface `I` is
//! `{descriptor(T), fn_1, ..., fn_n}` with methods in `I`'s name order.

use std::collections::HashMap;

use cranelift_module::{DataDescription, DataId, Module};
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::diagnostics::CompileError;
use crate::types::{BasicKind, Type, TypeId, TypeTable};

use super::Unit;

pub const DESCRIPTOR_SIZE: usize = 80;
pub const METHOD_ENTRY_SIZE: usize = 24;

#[derive(Debug, Default)]
pub struct TypeDescriptors {
    descriptors: HashMap<TypeId, DataId>,
    itabs: HashMap<(TypeId, TypeId), DataId>,
    strings: HashMap<String, DataId>,
}

impl TypeDescriptors {
    pub fn descriptor_count(&self) -> usize {
        self.descriptors.len()
    }

    pub fn itab_count(&self) -> usize {
        self.itabs.len()
    }

    pub fn string_count(&self) -> usize {
        self.strings.len()
    }
}

/// First eight bytes of the SHA-256 of the type string.
pub fn type_hash(type_string: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(type_string.as_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    let mut word = [0u8; 8];
    word.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(word)
}

/// reflect.Kind numbering.
pub fn kind_code(types: &TypeTable, ty: TypeId) -> u64 {
    match types.under(ty) {
        Type::Basic(kind) => match kind {
            BasicKind::Bool => 1,
            BasicKind::Int => 2,
            BasicKind::Int8 => 3,
            BasicKind::Int16 => 4,
            BasicKind::Int32 => 5,
            BasicKind::Int64 => 6,
            BasicKind::Uint => 7,
            BasicKind::Uint8 => 8,
            BasicKind::Uint16 => 9,
            BasicKind::Uint32 => 10,
            BasicKind::Uint64 => 11,
            BasicKind::Uintptr => 12,
            BasicKind::Float32 => 13,
            BasicKind::Float64 => 14,
            BasicKind::Complex64 => 15,
            BasicKind::Complex128 => 16,
            BasicKind::String => 24,
            BasicKind::UnsafePointer => 26,
        },
        Type::Array { .. } => 17,
        Type::Chan { .. } => 18,
        Type::Signature(_) => 19,
        Type::Interface(_) => 20,
        Type::Map { .. } => 21,
        Type::Pointer(_) => 22,
        Type::Slice(_) => 23,
        Type::Struct(_) | Type::Tuple(_) => 25,
        Type::Named(_) => 0,
    }
}

fn put_word(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

impl<'p> Unit<'p> {
    /// Read-only data holding `s` followed by a NUL byte.
    pub fn string_data(&mut self, s: &str) -> Result<DataId, CompileError> {
        if let Some(id) = self.descs.strings.get(s) {
            return Ok(*id);
        }
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        let id = self
            .module
            .declare_anonymous_data(false, false)
            .map_err(|e| CompileError::codegen(format!("declare string constant error: {e}")))?;
        let mut desc = DataDescription::new();
        desc.define(bytes.into_boxed_slice());
        self.module
            .define_data(id, &desc)
            .map_err(|e| CompileError::codegen(format!("define string constant error: {e}")))?;
        self.descs.strings.insert(s.to_string(), id);
        Ok(id)
    }

    pub fn type_descriptor(&mut self, ty: TypeId) -> Result<DataId, CompileError> {
        if let Some(id) = self.descs.descriptors.get(&ty) {
            return Ok(*id);
        }
        let id = self
            .module
            .declare_anonymous_data(false, false)
            .map_err(|e| CompileError::codegen(format!("declare type descriptor error: {e}")))?;
        // Registered before the contents so recursive types refer back to it.
        self.descs.descriptors.insert(ty, id);

        let program = self.program;
        let types = &program.types;
        let name = types.type_string(ty);
        trace!(ty = %name, "type descriptor");
        let (size, align) = self.lowering.size_align(ty);

        let (elem, key) = match types.under(ty) {
            Type::Pointer(e) | Type::Slice(e) | Type::Chan { elem: e, .. } | Type::Array { elem: e, .. } => {
                (Some(*e), None)
            }
            Type::Map { key, elem } => (Some(*elem), Some(*key)),
            _ => (None, None),
        };
        let elem = elem.map(|e| self.type_descriptor(e)).transpose()?;
        let key = key.map(|k| self.type_descriptor(k)).transpose()?;
        let name_data = self.string_data(&name)?;
        let methods = self.method_table(ty)?;

        let mut bytes = vec![0u8; DESCRIPTOR_SIZE];
        put_word(&mut bytes, 0, size);
        put_word(&mut bytes, 8, align);
        put_word(&mut bytes, 16, kind_code(types, ty));
        put_word(&mut bytes, 24, type_hash(&name));
        put_word(&mut bytes, 40, name.len() as u64);
        put_word(&mut bytes, 48, methods.as_ref().map_or(0, |(n, _)| *n as u64));

        let mut desc = DataDescription::new();
        desc.define(bytes.into_boxed_slice());
        desc.set_align(8);
        let gv = self.module.declare_data_in_data(name_data, &mut desc);
        desc.write_data_addr(32, gv, 0);
        if let Some((_, table)) = methods {
            let gv = self.module.declare_data_in_data(table, &mut desc);
            desc.write_data_addr(56, gv, 0);
        }
        if let Some(elem) = elem {
            let gv = self.module.declare_data_in_data(elem, &mut desc);
            desc.write_data_addr(64, gv, 0);
        }
        if let Some(key) = key {
            let gv = self.module.declare_data_in_data(key, &mut desc);
            desc.write_data_addr(72, gv, 0);
        }
        self.module
            .define_data(id, &desc)
            .map_err(|e| CompileError::codegen(format!("define type descriptor {name} error: {e}")))?;
        Ok(id)
    }

    /// Method table of `ty` in name order. Interface types list their method
    /// names with null function pointers.
    fn method_table(&mut self, ty: TypeId) -> Result<Option<(usize, DataId)>, CompileError> {
        let program = self.program;
        let mut entries: Vec<(String, Option<crate::ssa::FuncId>)> = if program.types.is_interface(ty) {
            program.types.interface_methods(ty).iter().map(|m| (m.name.clone(), None)).collect()
        } else {
            match program.method_set(ty) {
                Some(set) => set.methods.iter().map(|m| (m.name.clone(), Some(m.func))).collect(),
                None => Vec::new(),
            }
        };
        if entries.is_empty() {
            return Ok(None);
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut names = Vec::with_capacity(entries.len());
        let mut funcs = Vec::with_capacity(entries.len());
        for (name, func) in &entries {
            names.push(self.string_data(name)?);
            funcs.push(func.map(|f| self.resolve_function(f)).transpose()?);
        }

        let id = self
            .module
            .declare_anonymous_data(false, false)
            .map_err(|e| CompileError::codegen(format!("declare method table error: {e}")))?;
        let mut bytes = vec![0u8; METHOD_ENTRY_SIZE * entries.len()];
        for (i, (name, _)) in entries.iter().enumerate() {
            put_word(&mut bytes, i * METHOD_ENTRY_SIZE + 8, name.len() as u64);
        }
        let mut desc = DataDescription::new();
        desc.define(bytes.into_boxed_slice());
        desc.set_align(8);
        for (i, (name, func)) in names.iter().zip(&funcs).enumerate() {
            let base = (i * METHOD_ENTRY_SIZE) as u32;
            let gv = self.module.declare_data_in_data(*name, &mut desc);
            desc.write_data_addr(base, gv, 0);
            if let Some(func) = func {
                let func_ref = self.module.declare_func_in_data(*func, &mut desc);
                desc.write_function_addr(base + 16, func_ref);
            }
        }
        self.module
            .define_data(id, &desc)
            .map_err(|e| CompileError::codegen(format!("define method table error: {e}")))?;
        Ok(Some((entries.len(), id)))
    }

    /// Interface table pairing concrete type `concrete` with interface `iface`.
    /// For the empty interface the table is the type descriptor itself.
    pub fn itab(&mut self, concrete: TypeId, iface: TypeId) -> Result<DataId, CompileError> {
        if self.program.types.is_empty_interface(iface) {
            return self.type_descriptor(concrete);
        }
        if let Some(id) = self.descs.itabs.get(&(concrete, iface)) {
            return Ok(*id);
        }
        let program = self.program;
        let td = self.type_descriptor(concrete)?;
        let mut funcs = Vec::new();
        for m in program.types.interface_methods(iface) {
            let f = program.lookup_method(concrete, &m.name).ok_or_else(|| {
                CompileError::internal(
                    format!(
                        "type {} has no method {} required by {}",
                        program.types.type_string(concrete),
                        m.name,
                        program.types.type_string(iface)
                    ),
                    "interface table",
                )
            })?;
            funcs.push(self.resolve_function(f)?);
        }

        let id = self
            .module
            .declare_anonymous_data(false, false)
            .map_err(|e| CompileError::codegen(format!("declare itab error: {e}")))?;
        let mut desc = DataDescription::new();
        desc.define_zeroinit(8 * (funcs.len() + 1));
        desc.set_align(8);
        let gv = self.module.declare_data_in_data(td, &mut desc);
        desc.write_data_addr(0, gv, 0);
        for (i, f) in funcs.iter().enumerate() {
            let func_ref = self.module.declare_func_in_data(*f, &mut desc);
            desc.write_function_addr(8 * (i as u32 + 1), func_ref);
        }
        self.module
            .define_data(id, &desc)
            .map_err(|e| CompileError::codegen(format!("define itab error: {e}")))?;
        self.descs.itabs.insert((concrete, iface), id);
        Ok(id)
    }
}
