//! Translation of one Go package into a native object.
//!
//! A [`Unit`] owns the Cranelift object module for its package together with
//! the per-unit tables: runtime declarations, type layouts, resolved symbols,
//! type descriptors and pending `go`/`defer` thunks. Functions are lowered one
//! at a time by a [`frame::Frame`].

pub mod abi;
pub(crate) mod frame;
pub(crate) mod lower;
pub mod resolve;
pub mod runtime;
pub(crate) mod thunk;
pub mod typedesc;
pub mod types;
pub(crate) mod unwind;

use std::collections::VecDeque;
use std::sync::Arc;

use cranelift_codegen::ir::{self, UserFuncName};
use cranelift_codegen::isa::{CallConv, TargetIsa};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_module::{Linkage, Module, default_libcall_names};
use cranelift_object::{ObjectBuilder, ObjectModule};
use tracing::{debug, warn};

use crate::config::Config;
use crate::diagnostics::CompileError;
use crate::span::Pos;
use crate::ssa::{self, PkgId, Program, dom::DomTree, reach};

use abi::{FnAbi, RecvMode};
use frame::Frame;
use resolve::{Resolver, function_name};
use runtime::RuntimeRegistry;
use thunk::ThunkRequest;
use typedesc::TypeDescriptors;
use types::TypeLowering;

/// A function body emitted by a unit.
#[derive(Debug, Clone)]
pub struct DefinedFunction {
    /// `None` for generated `go`/`defer` thunks.
    pub func: Option<ssa::FuncId>,
    pub name: String,
    pub linkage: Linkage,
    /// The function contains a recover block and must not be inlined.
    pub no_inline: bool,
    pub has_checkpoint: bool,
    /// Cranelift IR as defined, kept when `retain-ir` is set.
    pub ir: Option<ir::Function>,
}

/// A local variable declaration recorded for debug info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugLocal {
    pub function: String,
    pub name: String,
    pub type_name: String,
    pub is_param: bool,
    pub pos: Pos,
}

/// The product of translating one package.
#[derive(Debug)]
pub struct PackageObject {
    pub package: String,
    pub object: Vec<u8>,
    pub functions: Vec<DefinedFunction>,
    pub debug_locals: Vec<DebugLocal>,
}

impl PackageObject {
    pub fn function(&self, name: &str) -> Option<&DefinedFunction> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// Build the target ISA: the host via `cranelift-native`, anything else by triple.
pub fn build_isa(config: &Config) -> Result<Arc<dyn TargetIsa>, CompileError> {
    let mut flag_builder = settings::builder();
    flag_builder
        .set("is_pic", "true")
        .map_err(|e| CompileError::codegen(format!("flag error: {e}")))?;
    flag_builder
        .set("opt_level", config.opt_level.as_setting())
        .map_err(|e| CompileError::codegen(format!("flag error: {e}")))?;

    let triple = config
        .triple()
        .map_err(|e| CompileError::config(format!("invalid target {}: {e}", config.target), None))?;
    let isa_builder = match triple {
        None => cranelift_native::builder().map_err(|e| CompileError::codegen(format!("host is not supported: {e}")))?,
        Some(triple) => cranelift_codegen::isa::lookup(triple)
            .map_err(|e| CompileError::codegen(format!("unsupported target {}: {e}", config.target)))?,
    };
    let isa = isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(|e| CompileError::codegen(format!("ISA error: {e}")))?;
    if isa.pointer_bits() != 64 {
        return Err(CompileError::not_implemented(
            format!("{}-bit targets", isa.pointer_bits()),
            config.target.clone(),
        ));
    }
    Ok(isa)
}

pub struct Unit<'p> {
    pub(crate) program: &'p Program,
    pub(crate) pkg: PkgId,
    pub(crate) config: &'p Config,
    pub(crate) module: ObjectModule,
    pub(crate) runtime: RuntimeRegistry,
    pub(crate) lowering: TypeLowering<'p>,
    pub(crate) resolver: Resolver,
    pub(crate) descs: TypeDescriptors,
    pub(crate) thunks: VecDeque<ThunkRequest>,
    pub(crate) thunk_count: usize,
    pub(crate) defined_functions: Vec<DefinedFunction>,
    pub(crate) debug_locals: Vec<DebugLocal>,
    pub(crate) call_conv: CallConv,
}

impl<'p> Unit<'p> {
    pub fn new(program: &'p Program, pkg: PkgId, config: &'p Config) -> Result<Self, CompileError> {
        config.validate(None)?;
        let isa = build_isa(config)?;
        let call_conv = isa.default_call_conv();
        let name = program.package(pkg).path.clone();
        let obj_builder = ObjectBuilder::new(isa, name.as_str(), default_libcall_names())
            .map_err(|e| CompileError::codegen(format!("object builder error: {e}")))?;
        let mut module = ObjectModule::new(obj_builder);
        let runtime = RuntimeRegistry::new(&mut module)?;
        Ok(Unit {
            program,
            pkg,
            config,
            module,
            runtime,
            lowering: TypeLowering::new(&program.types),
            resolver: Resolver::default(),
            descs: TypeDescriptors::default(),
            thunks: VecDeque::new(),
            thunk_count: 0,
            defined_functions: Vec::new(),
            debug_locals: Vec::new(),
            call_conv,
        })
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn descriptors(&self) -> &TypeDescriptors {
        &self.descs
    }

    pub fn defined_functions(&self) -> &[DefinedFunction] {
        &self.defined_functions
    }

    pub fn package_path(&self) -> &str {
        &self.program.package(self.pkg).path
    }

    /// Define the package's globals and every function of the package, then
    /// everything those functions pulled in that belongs to this unit.
    pub fn translate_package(&mut self) -> Result<(), CompileError> {
        let program = self.program;
        debug!(package = %self.package_path(), "translating package");
        self.define_package_globals()?;

        let mut functions: Vec<ssa::FuncId> =
            reach::all_functions(program).into_iter().filter(|f| self.defined_here(*f)).collect();
        if self.config.ordered_compilation {
            functions.sort_by_cached_key(|f| function_name(program, *f));
        }
        for f in functions {
            self.define_function(f)?;
        }
        self.drain_undefined()
    }

    /// Emit the body of `f` unless it already has one. Functions that belong
    /// to another unit stay declared only.
    pub fn define_function(&mut self, f: ssa::FuncId) -> Result<(), CompileError> {
        if self.resolver.defined.contains(&f) {
            return Ok(());
        }
        let order = DomTree::compute(self.program.function(f)).preorder().to_vec();
        self.define_function_with_block_order(f, &order)
    }

    pub(crate) fn define_function_with_block_order(
        &mut self,
        f: ssa::FuncId,
        order: &[usize],
    ) -> Result<(), CompileError> {
        if !self.defined_here(f) {
            if self.resolver.undefined.shift_remove(&f) {
                self.resolver.declared_only.insert(f);
            }
            return Ok(());
        }
        let program = self.program;
        let fun = program.function(f);
        let func_id = self.resolve_function(f)?;
        self.resolver.undefined.shift_remove(&f);
        self.resolver.defined.insert(f);

        let name = function_name(program, f);
        debug!(function = %name, blocks = fun.blocks.len(), "defining function");
        let abi = FnAbi::new(&mut self.lowering, fun.signature, RecvMode::Declared, self.call_conv)
            .map_err(|e| CompileError::not_implemented(e.to_string(), program.render_pos(fun.pos)))?;

        let mut ctx = self.module.make_context();
        ctx.func.signature = abi.sig.clone();
        ctx.func.name = UserFuncName::user(0, func_id.as_u32());
        let mut fb_ctx = FunctionBuilderContext::new();
        let summary = {
            let builder = FunctionBuilder::new(&mut ctx.func, &mut fb_ctx);
            let mut frame = Frame::new(self, builder, Some(fun), name.clone(), abi);
            frame.prologue()?;
            for &b in order {
                frame.translate_block(b)?;
            }
            frame.fixup_phis()?;
            frame.finish()?
        };

        let ir = self.config.retain_ir.then(|| ctx.func.clone());
        self.module
            .define_function(func_id, &mut ctx)
            .map_err(|e| CompileError::codegen(format!("define function {name} error: {e:?}")))?;
        let linkage = self.linkage_for(f);
        self.defined_functions.push(DefinedFunction {
            func: Some(f),
            name,
            linkage,
            no_inline: summary.no_inline,
            has_checkpoint: summary.has_checkpoint,
            ir,
        });
        self.drain_thunks()
    }

    /// Define every declared function this unit owns until none remain.
    fn drain_undefined(&mut self) -> Result<(), CompileError> {
        while let Some(f) = self.resolver.undefined.first().copied() {
            if self.defined_here(f) {
                self.define_function(f)?;
            } else {
                let fun = self.program.function(f);
                if fun.pkg == Some(self.pkg) {
                    warn!(function = %fun.name, "function of this package has no body; leaving it as an import");
                }
                self.resolver.undefined.shift_remove(&f);
                self.resolver.declared_only.insert(f);
            }
        }
        Ok(())
    }

    pub fn finish(self) -> Result<PackageObject, CompileError> {
        let package = self.package_path().to_string();
        debug!(
            package = %package,
            functions = self.defined_functions.len(),
            descriptors = self.descs.descriptor_count(),
            "emitting object"
        );
        let product = self.module.finish();
        let object = product
            .emit()
            .map_err(|e| CompileError::codegen(format!("object emit error: {e}")))?;
        Ok(PackageObject {
            package,
            object,
            functions: self.defined_functions,
            debug_locals: self.debug_locals,
        })
    }
}
