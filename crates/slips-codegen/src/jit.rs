//! Host JIT module setup and the finished, runnable program.

use cranelift_codegen::settings::{self, Configurable};
use cranelift_jit::{JITBuilder, JITModule};
use log::debug;
use thiserror::Error;

use crate::CompileOptions;

#[derive(Debug, Error)]
pub enum JitError {
    /// The host ISA could not be configured.
    #[error("JIT setup failed: {0}")]
    Setup(String),
    #[error("JIT module error: {0}")]
    Module(#[from] cranelift_module::ModuleError),
}

/// Create a JIT module targeting the host machine.
pub(crate) fn host_module(options: &CompileOptions) -> Result<JITModule, JitError> {
    let mut flag_builder = settings::builder();
    flag_builder
        .set("use_colocated_libcalls", "false")
        .map_err(|e| JitError::Setup(e.to_string()))?;
    flag_builder
        .set("is_pic", "false")
        .map_err(|e| JitError::Setup(e.to_string()))?;
    flag_builder
        .set("opt_level", options.opt_level.as_str())
        .map_err(|e| JitError::Setup(e.to_string()))?;

    let isa_builder = cranelift_native::builder().map_err(|e| JitError::Setup(e.to_string()))?;
    let isa = isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(|e| JitError::Setup(e.to_string()))?;
    debug!(
        "JIT target {} (opt_level={})",
        isa.triple(),
        options.opt_level.as_str()
    );

    let builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
    Ok(JITModule::new(builder))
}

/// A compiled program. Owns the JIT module so the machine code stays mapped
/// for as long as the program can be executed.
pub struct JitProgram {
    module: Option<JITModule>,
    entry: *const u8,
    yields_int: bool,
}

impl JitProgram {
    /// `module` must already be finalized and `entry` must be the finalized
    /// address of a `() -> i64` function defined in it.
    pub(crate) fn new(module: JITModule, entry: *const u8, yields_int: bool) -> Self {
        JitProgram {
            module: Some(module),
            entry,
            yields_int,
        }
    }

    /// Whether the program's last top-level expression is an integer (or a
    /// boolean, which is widened).
    pub fn yields_int(&self) -> bool {
        self.yields_int
    }

    /// Run the entry function. `None` when the program does not produce an
    /// integer.
    pub fn execute(&self) -> Option<i64> {
        // SAFETY: `entry` was produced by `get_finalized_function` for a
        // function declared with no parameters and one i64 return, and the
        // module holding the code lives as long as `self`.
        let main: extern "C" fn() -> i64 = unsafe { std::mem::transmute(self.entry) };
        let result = main();
        debug!("entry returned {}", result);
        self.yields_int.then_some(result)
    }
}

impl Drop for JitProgram {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            // SAFETY: no function pointer into the module outlives `self`;
            // `execute` only hands out the returned integer.
            unsafe { module.free_memory() };
        }
    }
}

impl std::fmt::Debug for JitProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitProgram")
            .field("entry", &self.entry)
            .field("yields_int", &self.yields_int)
            .finish()
    }
}
