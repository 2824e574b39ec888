/// Cranelift code generation for the Slips language.
///
/// Takes a parsed program (from `slips_parser::parse`) and compiles it to
/// native code in a host JIT module. Every function literal becomes its own
/// Cranelift function; top-level expressions form the entry function, whose
/// integer result is what running the program yields.
pub mod compiler;
pub mod env;
pub mod error;
pub mod jit;

pub use compiler::compile;
pub use error::CompileError;
pub use jit::{JitError, JitProgram};

/// Cranelift optimization level for generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptLevel {
    #[default]
    None,
    Speed,
    SpeedAndSize,
}

impl OptLevel {
    /// Value of Cranelift's `opt_level` setting.
    pub fn as_str(&self) -> &'static str {
        match self {
            OptLevel::None => "none",
            OptLevel::Speed => "speed",
            OptLevel::SpeedAndSize => "speed_and_size",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub opt_level: OptLevel,
    /// Log the IR of every function at debug level before it is defined.
    pub dump_ir: bool,
}
