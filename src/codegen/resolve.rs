//! Lazy resolution of globals, functions and function descriptors.
//!
//! Every map here is append-only for the lifetime of a unit: once a global,
//! function or descriptor has a native handle, later requests return the same
//! handle. Functions move through two phases: declared (present in
//! `undefined`) and defined (present in `defined`).

use std::collections::HashMap;

use cranelift_module::{DataDescription, DataId, FuncId, Linkage, Module};
use indexmap::IndexSet;
use tracing::trace;

use crate::diagnostics::CompileError;
use crate::ssa::{self, GlobalId, Program};

use super::Unit;
use super::abi::{FnAbi, RecvMode};

#[derive(Debug, Default)]
pub struct Resolver {
    globals: HashMap<GlobalId, DataId>,
    functions: HashMap<ssa::FuncId, FuncId>,
    descriptors: HashMap<ssa::FuncId, DataId>,
    pub(crate) undefined: IndexSet<ssa::FuncId>,
    pub(crate) defined: IndexSet<ssa::FuncId>,
    pub(crate) declared_only: IndexSet<ssa::FuncId>,
}

impl Resolver {
    pub fn global(&self, g: GlobalId) -> Option<DataId> {
        self.globals.get(&g).copied()
    }

    pub fn function(&self, f: ssa::FuncId) -> Option<FuncId> {
        self.functions.get(&f).copied()
    }

    pub fn descriptor(&self, f: ssa::FuncId) -> Option<DataId> {
        self.descriptors.get(&f).copied()
    }

    pub fn is_undefined(&self, f: ssa::FuncId) -> bool {
        self.undefined.contains(&f)
    }

    pub fn is_defined(&self, f: ssa::FuncId) -> bool {
        self.defined.contains(&f)
    }

    pub fn undefined(&self) -> impl Iterator<Item = ssa::FuncId> + '_ {
        self.undefined.iter().copied()
    }

    pub fn descriptor_count(&self) -> usize {
        self.descriptors.len()
    }
}

/// Native symbol name of a function: its own name, `"<enclosing>:<name>"` for
/// nested anonymous functions and `"<receiver type>.<name>"` for methods.
pub fn function_name(program: &Program, f: ssa::FuncId) -> String {
    let func = program.function(f);
    if let Some(enclosing) = func.enclosing {
        return format!("{}:{}", program.function(enclosing).name, func.name);
    }
    let recv = program.types.as_signature(func.signature).and_then(|s| s.recv.as_ref());
    match recv {
        Some(r) => format!("({}).{}", program.types.type_string(r.ty), func.name),
        None => func.name.clone(),
    }
}

pub fn global_name(program: &Program, g: GlobalId) -> String {
    let global = program.global(g);
    format!("{}.{}", program.package(global.pkg).path, global.name)
}

impl<'p> Unit<'p> {
    /// Whether this unit emits the body of `f`.
    pub fn defined_here(&self, f: ssa::FuncId) -> bool {
        let func = self.program.function(f);
        if !func.has_body() {
            return false;
        }
        if let Some(pkg) = func.pkg {
            return pkg == self.pkg;
        }
        let types = &self.program.types;
        let recv = types.as_signature(func.signature).and_then(|s| s.recv.as_ref());
        match recv.and_then(|r| types.receiver_named(r.ty)) {
            None => true,
            Some(named) => match &named.pkg {
                Some(path) => *path == self.program.package(self.pkg).path,
                None => self.program.package(self.pkg).path == self.config.runtime_package,
            },
        }
    }

    pub(crate) fn linkage_for(&self, f: ssa::FuncId) -> Linkage {
        if !self.defined_here(f) {
            return Linkage::Import;
        }
        let func = self.program.function(f);
        let has_recv = self
            .program
            .types
            .as_signature(func.signature)
            .is_some_and(|s| s.recv.is_some());
        if func.pkg.is_none() && !has_recv { Linkage::Local } else { Linkage::Export }
    }

    /// Storage for package-level variable `g`.
    pub fn resolve_global(&mut self, g: GlobalId) -> Result<DataId, CompileError> {
        if let Some(id) = self.resolver.globals.get(&g) {
            return Ok(*id);
        }
        let name = global_name(self.program, g);
        let id = self
            .module
            .declare_data(&name, Linkage::Import, true, false)
            .map_err(|e| CompileError::codegen(format!("declare global {name} error: {e}")))?;
        trace!(global = %name, "declared external global");
        self.resolver.globals.insert(g, id);
        Ok(id)
    }

    /// Define zero-initialized storage for every global of this unit's package.
    pub(crate) fn define_package_globals(&mut self) -> Result<(), CompileError> {
        let program = self.program;
        for member in &program.package(self.pkg).members {
            let ssa::Member::Global(g) = *member else { continue };
            let global = program.global(g);
            let elem = program.types.pointer_elem(global.ty).unwrap_or(global.ty);
            let (size, align) = self.lowering.size_align(elem);
            let name = global_name(program, g);
            let id = self
                .module
                .declare_data(&name, Linkage::Export, true, false)
                .map_err(|e| CompileError::codegen(format!("declare global {name} error: {e}")))?;
            let mut desc = DataDescription::new();
            desc.define_zeroinit(size.max(1) as usize);
            desc.set_align(align.max(1));
            self.module
                .define_data(id, &desc)
                .map_err(|e| CompileError::codegen(format!("define global {name} error: {e}")))?;
            self.resolver.globals.insert(g, id);
        }
        Ok(())
    }

    /// Declare `f` on first use and return its handle.
    pub fn resolve_function(&mut self, f: ssa::FuncId) -> Result<FuncId, CompileError> {
        if let Some(id) = self.resolver.functions.get(&f) {
            return Ok(*id);
        }
        let func = self.program.function(f);
        let name = function_name(self.program, f);
        let abi = FnAbi::new(&mut self.lowering, func.signature, RecvMode::Declared, self.call_conv)
            .map_err(|e| CompileError::not_implemented(e.to_string(), self.program.render_pos(func.pos)))?;
        let linkage = self.linkage_for(f);
        let id = self
            .module
            .declare_function(&name, linkage, &abi.sig)
            .map_err(|e| CompileError::codegen(format!("declare {name} error: {e}")))?;
        trace!(function = %name, ?linkage, "declared function");
        self.resolver.functions.insert(f, id);
        if !self.resolver.defined.contains(&f) {
            self.resolver.undefined.insert(f);
        }
        Ok(id)
    }

    /// The address-stable descriptor for `f`: a one-word record holding the
    /// function's address, usable as a closure with no bindings.
    pub fn resolve_function_descriptor(&mut self, f: ssa::FuncId) -> Result<DataId, CompileError> {
        if let Some(id) = self.resolver.descriptors.get(&f) {
            return Ok(*id);
        }
        let func_id = self.resolve_function(f)?;
        let name = format!("{}$descriptor", function_name(self.program, f));
        let id = self
            .module
            .declare_data(&name, Linkage::Local, false, false)
            .map_err(|e| CompileError::codegen(format!("declare {name} error: {e}")))?;
        let mut desc = DataDescription::new();
        desc.define_zeroinit(8);
        desc.set_align(8);
        let func_ref = self.module.declare_func_in_data(func_id, &mut desc);
        desc.write_function_addr(0, func_ref);
        self.module
            .define_data(id, &desc)
            .map_err(|e| CompileError::codegen(format!("define {name} error: {e}")))?;
        self.resolver.descriptors.insert(f, id);
        Ok(id)
    }
}
