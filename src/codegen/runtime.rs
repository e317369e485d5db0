use std::collections::{HashMap, HashSet};

use cranelift_codegen::ir::{AbiParam, types};
use cranelift_module::{FuncId, Linkage, Module};

use crate::diagnostics::CompileError;

/// Registry of Go runtime entry points declared in the Cranelift module.
///
/// Booleans cross the boundary as I8, every pointer, length and handle as I64.
/// Functions that can raise a Go panic are flagged so that callers test the
/// panic state after the call.
pub struct RuntimeRegistry {
    ids: HashMap<&'static str, FuncId>,
    may_panic: HashSet<&'static str>,
}

const PANICS: bool = true;
const NO_PANIC: bool = false;

impl RuntimeRegistry {
    /// Declare all runtime functions in the module. Each entry specifies raw Cranelift
    /// types for parameters and returns.
    pub fn new(module: &mut dyn Module) -> Result<Self, CompileError> {
        let mut reg = RuntimeRegistry { ids: HashMap::new(), may_panic: HashSet::new() };
        let p = types::I64;

        // Memory and closures
        reg.declare(module, "__go_new", &[p], &[p], NO_PANIC)?;
        reg.declare(module, "__go_get_closure", &[], &[p], NO_PANIC)?;
        reg.declare(module, "__go_set_closure", &[p], &[], NO_PANIC)?;

        // Panics
        reg.declare(module, "__go_panic", &[p, p], &[], NO_PANIC)?;
        reg.declare(module, "__go_panicking", &[], &[p], NO_PANIC)?;
        reg.declare(module, "__go_recover", &[], &[p, p], NO_PANIC)?;
        reg.declare(module, "__go_panic_index", &[p, p], &[], NO_PANIC)?;
        reg.declare(module, "__go_panic_nil", &[], &[], NO_PANIC)?;
        reg.declare(module, "__go_panic_divide", &[], &[], NO_PANIC)?;
        reg.declare(module, "__go_panic_shift", &[], &[], NO_PANIC)?;

        // Defer frames
        reg.declare(module, "__go_push_defer_frame", &[p], &[], NO_PANIC)?;
        reg.declare(module, "__go_defer", &[p, p, p], &[], NO_PANIC)?;
        reg.declare(module, "__go_run_defers", &[p], &[], PANICS)?;

        // Goroutines
        reg.declare(module, "__go_go", &[p, p], &[], NO_PANIC)?;

        // Strings
        reg.declare(module, "__go_string_plus", &[p, p, p, p], &[p, p], NO_PANIC)?;
        reg.declare(module, "__go_strcmp", &[p, p, p, p], &[p], NO_PANIC)?;
        reg.declare(module, "__go_string_next", &[p, p, p], &[p, types::I32], NO_PANIC)?;
        reg.declare(module, "__go_int_to_string", &[p], &[p, p], NO_PANIC)?;
        reg.declare(module, "__go_bytes_to_string", &[p, p], &[p, p], NO_PANIC)?;
        reg.declare(module, "__go_string_to_bytes", &[p, p, p], &[], NO_PANIC)?;
        reg.declare(module, "__go_runes_to_string", &[p, p], &[p, p], NO_PANIC)?;
        reg.declare(module, "__go_string_to_runes", &[p, p, p], &[], NO_PANIC)?;

        // Slices
        reg.declare(module, "__go_make_slice", &[p, p, p], &[p], PANICS)?;
        reg.declare(module, "__go_append", &[p, p, p, p, p, p, p], &[], NO_PANIC)?;
        reg.declare(module, "__go_copy", &[p, p, p, p, p], &[p], NO_PANIC)?;

        // Maps
        reg.declare(module, "__go_new_map", &[p, p], &[p], NO_PANIC)?;
        reg.declare(module, "__go_map_lookup", &[p, p, p], &[types::I8], PANICS)?;
        reg.declare(module, "__go_map_assign", &[p, p], &[p], PANICS)?;
        reg.declare(module, "__go_map_delete", &[p, p], &[], PANICS)?;
        reg.declare(module, "__go_map_len", &[p], &[p], NO_PANIC)?;
        reg.declare(module, "__go_map_iter_new", &[p], &[p], NO_PANIC)?;
        reg.declare(module, "__go_map_iter_next", &[p, p, p], &[types::I8], NO_PANIC)?;

        // Channels
        reg.declare(module, "__go_new_chan", &[p, p], &[p], PANICS)?;
        reg.declare(module, "__go_chan_send", &[p, p], &[], PANICS)?;
        reg.declare(module, "__go_chan_recv", &[p, p], &[types::I8], NO_PANIC)?;
        reg.declare(module, "__go_chan_close", &[p], &[], PANICS)?;
        reg.declare(module, "__go_chan_len", &[p], &[p], NO_PANIC)?;
        reg.declare(module, "__go_chan_cap", &[p], &[p], NO_PANIC)?;
        reg.declare(module, "__go_select", &[p, p, types::I8, p], &[p], PANICS)?;

        // Interfaces
        reg.declare(module, "__go_type_eq", &[p, p], &[types::I8], NO_PANIC)?;
        reg.declare(module, "__go_assert_type", &[p, p], &[], PANICS)?;
        reg.declare(module, "__go_convert_interface", &[p, p], &[p], NO_PANIC)?;
        reg.declare(module, "__go_assert_interface", &[p, p], &[p], PANICS)?;
        reg.declare(module, "__go_iface_eq", &[p, p, p, p], &[types::I8], PANICS)?;

        // Printing
        reg.declare(module, "__go_print_int64", &[p], &[], NO_PANIC)?;
        reg.declare(module, "__go_print_uint64", &[p], &[], NO_PANIC)?;
        reg.declare(module, "__go_print_float64", &[types::F64], &[], NO_PANIC)?;
        reg.declare(module, "__go_print_complex128", &[types::F64, types::F64], &[], NO_PANIC)?;
        reg.declare(module, "__go_print_bool", &[types::I8], &[], NO_PANIC)?;
        reg.declare(module, "__go_print_string", &[p, p], &[], NO_PANIC)?;
        reg.declare(module, "__go_print_pointer", &[p], &[], NO_PANIC)?;
        reg.declare(module, "__go_print_slice", &[p, p, p], &[], NO_PANIC)?;
        reg.declare(module, "__go_print_iface", &[p, p], &[], NO_PANIC)?;
        reg.declare(module, "__go_print_space", &[], &[], NO_PANIC)?;
        reg.declare(module, "__go_print_nl", &[], &[], NO_PANIC)?;

        Ok(reg)
    }

    /// Look up a runtime function by its full C name.
    pub fn get(&self, name: &str) -> Result<FuncId, CompileError> {
        self.ids
            .get(name)
            .copied()
            .ok_or_else(|| CompileError::codegen(format!("unknown runtime function {name}")))
    }

    pub fn may_panic(&self, name: &str) -> bool {
        self.may_panic.contains(name)
    }

    fn declare(
        &mut self,
        module: &mut dyn Module,
        name: &'static str,
        params: &[types::Type],
        returns: &[types::Type],
        may_panic: bool,
    ) -> Result<(), CompileError> {
        let mut sig = module.make_signature();
        for &p in params {
            sig.params.push(AbiParam::new(p));
        }
        for &r in returns {
            sig.returns.push(AbiParam::new(r));
        }
        let id = module
            .declare_function(name, Linkage::Import, &sig)
            .map_err(|e| CompileError::codegen(format!("declare {name} error: {e}")))?;
        self.ids.insert(name, id);
        if may_panic {
            self.may_panic.insert(name);
        }
        Ok(())
    }
}
