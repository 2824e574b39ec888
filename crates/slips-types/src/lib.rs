/// Type guesser for the Slips language.
///
/// Slips has no declared types, but Cranelift needs a concrete signature
/// before a function body can be emitted. `guess` front-runs code
/// generation with a locally computed approximation of an expression's
/// representation type.
///
/// Design principles:
/// - **Heuristic, not a checker**: the guess is only used to pick function
///   signatures. The compiler coerces actual values to it or reports a
///   mismatch; nothing here rejects a program on typing grounds.
/// - **One function per rule**: every approximation is a named, public
///   function so it can be tested on its own.
/// - **Names through a trait**: the guesser asks `NameTypes` for the
///   recorded type of a variable instead of knowing the environment layout.
use std::collections::HashMap;
use std::fmt;

use slips_parser::ast::{Expr, Params};
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════
// Core type representation
// ═══════════════════════════════════════════════════════════════

/// Representation type of a compiled value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReprType {
    /// Default integer width (64 bits).
    Int,
    /// One-bit truth value, carried in a byte.
    Bool,
    /// No value (function with an empty body).
    Void,
    /// Pointer to a callable closure record.
    Func(FuncType),
}

/// Function signature as seen by Slips code (the hidden closure-record
/// parameter is not listed).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FuncType {
    pub params: Vec<ReprType>,
    pub ret: Box<ReprType>,
}

impl FuncType {
    /// A function of `arity` default-width integers returning `ret`.
    pub fn of_ints(arity: usize, ret: ReprType) -> Self {
        FuncType {
            params: vec![ReprType::Int; arity],
            ret: Box::new(ret),
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl fmt::Display for ReprType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReprType::Int => write!(f, "int"),
            ReprType::Bool => write!(f, "bool"),
            ReprType::Void => write!(f, "void"),
            ReprType::Func(ft) => write!(f, "{}", ft),
        }
    }
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "fn(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

// ═══════════════════════════════════════════════════════════════
// Guesser
// ═══════════════════════════════════════════════════════════════

/// Source of recorded types for names in the current scope.
pub trait NameTypes {
    fn type_of(&self, name: &str) -> Option<ReprType>;
}

impl NameTypes for HashMap<String, ReprType> {
    fn type_of(&self, name: &str) -> Option<ReprType> {
        self.get(name).cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GuessError {
    /// A node kind that has no guessing rule.
    #[error("cannot guess the type of {0}")]
    Unhandled(&'static str),
}

/// Guess the representation type of `expr`. Rules are tried in a fixed
/// precedence order; see the `guess_*` functions.
pub fn guess(expr: &Expr, names: &impl NameTypes) -> Result<ReprType, GuessError> {
    match expr {
        Expr::Function { params, body, .. } => guess_function(params, body, names),
        Expr::Literal(_) => Ok(guess_literal()),
        Expr::Variable(name) => Ok(guess_variable(name, names)),
        Expr::Add(..) => Ok(guess_add()),
        Expr::Define { value, .. } => guess_define(value, names),
        Expr::Call { args, .. } => guess_call(args, names),
        Expr::If { consequence, .. } => guess_if(consequence, names),
        Expr::Params(_) => Err(GuessError::Unhandled("a parameter list")),
        Expr::Error(_) => Err(GuessError::Unhandled("an error node")),
    }
}

/// Rule 1: a function is a pointer to a function whose parameters are all
/// default-width integers and whose return type is the guess for its last
/// body expression (`Void` for an empty body).
pub fn guess_function(
    params: &Params,
    body: &[Expr],
    names: &impl NameTypes,
) -> Result<ReprType, GuessError> {
    guess_signature(params, body, names).map(ReprType::Func)
}

/// The signature behind rule 1, for callers that need the `FuncType` itself.
///
/// The last body expression is guessed in the function's own scope: its
/// parameters are ints and the `def`s before it have the type of their
/// value. Other names come from `names`.
pub fn guess_signature(
    params: &Params,
    body: &[Expr],
    names: &impl NameTypes,
) -> Result<FuncType, GuessError> {
    let mut scope = BodyNames {
        locals: params
            .names
            .iter()
            .map(|name| (name.clone(), ReprType::Int))
            .collect(),
        outer: names,
    };
    let Some((last, init)) = body.split_last() else {
        return Ok(FuncType::of_ints(params.names.len(), ReprType::Void));
    };
    for expr in init {
        if let Expr::Define { name, value } = expr {
            let ty = guess(value, &scope)?;
            scope.locals.insert(name.clone(), ty);
        }
    }
    let ret = guess(last, &scope)?;
    Ok(FuncType::of_ints(params.names.len(), ret))
}

/// Names bound by a function body, layered over the enclosing names.
struct BodyNames<'a> {
    locals: HashMap<String, ReprType>,
    outer: &'a dyn NameTypes,
}

impl NameTypes for BodyNames<'_> {
    fn type_of(&self, name: &str) -> Option<ReprType> {
        self.locals
            .get(name)
            .cloned()
            .or_else(|| self.outer.type_of(name))
    }
}

/// Rule 2: every literal is a default-width integer, booleans included.
pub fn guess_literal() -> ReprType {
    ReprType::Int
}

/// Rule 3: a variable has the type recorded for it, or the one-bit
/// fallback when nothing is recorded yet.
pub fn guess_variable(name: &str, names: &impl NameTypes) -> ReprType {
    names.type_of(name).unwrap_or(ReprType::Bool)
}

/// Rule 4: addition yields a default-width integer.
pub fn guess_add() -> ReprType {
    ReprType::Int
}

/// Rule 5: a definition has the type of the value it binds.
pub fn guess_define(value: &Expr, names: &impl NameTypes) -> Result<ReprType, GuessError> {
    guess(value, names)
}

/// Rule 6: a call is assumed to return the type of its first argument.
/// This is an approximation, not the callee's real return type. A call
/// without arguments falls back to the default integer width.
pub fn guess_call(args: &[Expr], names: &impl NameTypes) -> Result<ReprType, GuessError> {
    match args.first() {
        Some(first) => guess(first, names),
        None => Ok(ReprType::Int),
    }
}

/// Rule 7: a conditional has the type of its consequence.
pub fn guess_if(consequence: &Expr, names: &impl NameTypes) -> Result<ReprType, GuessError> {
    guess(consequence, names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_names() -> HashMap<String, ReprType> {
        HashMap::new()
    }

    #[test]
    fn test_literals_are_ints() {
        assert_eq!(guess(&Expr::int(7), &no_names()), Ok(ReprType::Int));
        assert_eq!(guess(&Expr::bool(true), &no_names()), Ok(ReprType::Int));
    }

    #[test]
    fn test_unknown_variable_falls_back_to_bool() {
        assert_eq!(guess(&Expr::var("nope"), &no_names()), Ok(ReprType::Bool));
    }

    #[test]
    fn test_recorded_variable() {
        let mut names = no_names();
        names.insert("x".into(), ReprType::Int);
        assert_eq!(guess(&Expr::var("x"), &names), Ok(ReprType::Int));
    }

    #[test]
    fn test_function_type() {
        let f = Expr::function("f", &["a", "b"], vec![Expr::add(Expr::var("a"), Expr::var("b"))]);
        assert_eq!(
            guess(&f, &no_names()),
            Ok(ReprType::Func(FuncType::of_ints(2, ReprType::Int)))
        );
    }

    #[test]
    fn test_empty_function_is_void() {
        let f = Expr::function("f", &[], vec![]);
        assert_eq!(
            guess(&f, &no_names()),
            Ok(ReprType::Func(FuncType::of_ints(0, ReprType::Void)))
        );
    }

    #[test]
    fn test_nested_function_type() {
        let inner = Expr::function("fn", &["z"], vec![Expr::int(1)]);
        let outer = Expr::function("x", &["y"], vec![inner]);
        let expected = FuncType::of_ints(
            1,
            ReprType::Func(FuncType::of_ints(1, ReprType::Int)),
        );
        assert_eq!(guess(&outer, &no_names()), Ok(ReprType::Func(expected)));
    }

    #[test]
    fn test_define_takes_value_type() {
        let d = Expr::define("f", Expr::function("f", &["a"], vec![Expr::int(1)]));
        assert!(matches!(guess(&d, &no_names()), Ok(ReprType::Func(_))));
    }

    #[test]
    fn test_call_uses_first_argument() {
        let mut names = no_names();
        names.insert("flag".into(), ReprType::Bool);
        let call = Expr::call("f", vec![Expr::var("flag"), Expr::int(1)]);
        assert_eq!(guess(&call, &names), Ok(ReprType::Bool));
    }

    #[test]
    fn test_call_without_arguments() {
        assert_eq!(guess(&Expr::call("f", vec![]), &no_names()), Ok(ReprType::Int));
    }

    #[test]
    fn test_if_uses_consequence() {
        let e = Expr::if_(Expr::bool(true), Expr::var("unknown"), Expr::int(2));
        assert_eq!(guess(&e, &no_names()), Ok(ReprType::Bool));
    }

    #[test]
    fn test_unhandled_nodes() {
        assert!(guess(&Expr::Error("bad".into()), &no_names()).is_err());
        assert!(guess(&Expr::Params(Params::default()), &no_names()).is_err());
    }

    #[test]
    fn test_body_defs_are_visible_to_the_last_expression() {
        let f = Expr::function(
            "g",
            &["a"],
            vec![
                Expr::define("z", Expr::add(Expr::var("a"), Expr::int(1))),
                Expr::var("z"),
            ],
        );
        assert_eq!(
            guess(&f, &no_names()),
            Ok(ReprType::Func(FuncType::of_ints(1, ReprType::Int)))
        );
    }

    #[test]
    fn test_params_shadow_outer_names() {
        let mut names = no_names();
        names.insert("b".into(), ReprType::Bool);
        let f = Expr::function("fn", &["b"], vec![Expr::var("b")]);
        assert_eq!(
            guess(&f, &names),
            Ok(ReprType::Func(FuncType::of_ints(1, ReprType::Int)))
        );
    }

    #[test]
    fn test_nested_function_params_are_ints() {
        // `(a in (b in b))`: the inner `b` is a parameter, not an unknown name.
        let inner = Expr::function("fn", &["b"], vec![Expr::var("b")]);
        let outer = Expr::function("id", &["a"], vec![inner]);
        let expected = FuncType::of_ints(
            1,
            ReprType::Func(FuncType::of_ints(1, ReprType::Int)),
        );
        assert_eq!(guess(&outer, &no_names()), Ok(ReprType::Func(expected)));
    }

    #[test]
    fn test_display() {
        let ty = ReprType::Func(FuncType::of_ints(2, ReprType::Bool));
        assert_eq!(ty.to_string(), "fn(int, int) -> bool");
    }
}
