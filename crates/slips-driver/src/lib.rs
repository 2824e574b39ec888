/// Execution driver for Slips programs.
///
/// `run` takes source text through the whole pipeline (lex, parse,
/// compile, JIT, execute) and reports what the program produced. Syntax
/// and compile errors are `Err`; a backend failure or a program that does
/// not end in an integer is an ordinary `Value::Error`.
use std::fmt;

use log::{info, warn};
use slips_codegen::{CompileError, CompileOptions};
use slips_lexer::LexError;
use slips_parser::ParseErrors;
use thiserror::Error;

/// Message carried by `Value::Error` when the last top-level expression is
/// not an integer.
pub const NO_INTEGER: &str = "program did not produce an integer";

/// Outcome of running a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Error(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}

#[derive(Debug, Error)]
pub enum SlipsError {
    #[error("lex error: {0}")]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseErrors),
    #[error("compile error: {0}")]
    Compile(CompileError),
}

/// Run `source` with the default compile options.
pub fn run(source: &str) -> Result<Value, SlipsError> {
    run_with(source, &CompileOptions::default())
}

pub fn run_with(source: &str, options: &CompileOptions) -> Result<Value, SlipsError> {
    let tokens = slips_lexer::lex(source)?;
    let program = slips_parser::parse(tokens)?;

    let compiled = match slips_codegen::compile(&program, options) {
        Ok(compiled) => compiled,
        Err(CompileError::Jit(e)) => {
            warn!("backend failure: {}", e);
            return Ok(Value::Error(e.to_string()));
        }
        Err(e) => return Err(SlipsError::Compile(e)),
    };

    let value = match compiled.execute() {
        Some(n) => Value::Int(n),
        None => Value::Error(NO_INTEGER.to_string()),
    };
    info!("program result: {}", value);
    Ok(value)
}
