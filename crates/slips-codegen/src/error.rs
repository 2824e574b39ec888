use slips_types::GuessError;
use thiserror::Error;

use crate::jit::JitError;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("undefined variable `{0}`")]
    UndefinedVariable(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// The parser left an error node in the tree.
    #[error("cannot compile a malformed expression: {0}")]
    ErrorNode(String),
    #[error(transparent)]
    Guess(#[from] GuessError),
    #[error(transparent)]
    Jit(#[from] JitError),
}

impl From<cranelift_module::ModuleError> for CompileError {
    fn from(e: cranelift_module::ModuleError) -> Self {
        CompileError::Jit(JitError::Module(e))
    }
}
