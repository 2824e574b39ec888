//! AST node types for the Slips language.

use std::fmt;

use slips_lexer::Token;

/// A program is a sequence of top-level expressions.
pub type Program = Vec<Expr>;

/// Literal values.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Bool(bool),
    /// Parsed but not lowered by the compiler.
    Str(String),
}

/// Parameter names of a function, in declaration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Params {
    pub names: Vec<String>,
}

/// Expression. The node set is closed: the compiler and the type guesser
/// match on it exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// Reference to a bound name.
    Variable(String),
    /// `(+ lhs rhs)`
    Add(Box<Expr>, Box<Expr>),
    /// `(op args...)`. `op` is the head token; it is `Token::LParen` when the
    /// head is itself a list, in which case the head expression is `args[0]`.
    Call { op: Token, args: Vec<Expr> },
    /// `(def name value)`
    Define { name: String, value: Box<Expr> },
    /// `(if condition consequence alternative)`
    If {
        condition: Box<Expr>,
        consequence: Box<Expr>,
        alternative: Box<Expr>,
    },
    /// Only ever appears inside `Function`.
    Params(Params),
    /// `(params... in body...)`
    Function {
        name: String,
        params: Params,
        body: Vec<Expr>,
    },
    /// A form the parser could not make sense of.
    Error(String),
}

impl Expr {
    pub fn int(n: i64) -> Self {
        Expr::Literal(Literal::Int(n))
    }

    pub fn bool(b: bool) -> Self {
        Expr::Literal(Literal::Bool(b))
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Variable(name.into())
    }

    pub fn add(lhs: Expr, rhs: Expr) -> Self {
        Expr::Add(Box::new(lhs), Box::new(rhs))
    }

    pub fn define(name: impl Into<String>, value: Expr) -> Self {
        Expr::Define {
            name: name.into(),
            value: Box::new(value),
        }
    }

    pub fn call(op: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            op: Token::Ident(op.into()),
            args,
        }
    }

    pub fn if_(condition: Expr, consequence: Expr, alternative: Expr) -> Self {
        Expr::If {
            condition: Box::new(condition),
            consequence: Box::new(consequence),
            alternative: Box::new(alternative),
        }
    }

    pub fn function(name: impl Into<String>, params: &[&str], body: Vec<Expr>) -> Self {
        Expr::Function {
            name: name.into(),
            params: Params {
                names: params.iter().map(|p| p.to_string()).collect(),
            },
            body,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Literal::Int(n) => write!(f, "{}", n),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Str(s) => write!(f, "{:?}", s),
        }
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.names.join(" "))
    }
}

/// Prints the expression back in source form.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Literal(lit) => write!(f, "{}", lit),
            Expr::Variable(name) => write!(f, "{}", name),
            Expr::Add(lhs, rhs) => write!(f, "(+ {} {})", lhs, rhs),
            Expr::Call { op, args } => {
                write!(f, "(")?;
                let mut first = true;
                if !matches!(op, Token::LParen) {
                    write!(f, "{}", op)?;
                    first = false;
                }
                for arg in args {
                    if !first {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", arg)?;
                    first = false;
                }
                write!(f, ")")
            }
            Expr::Define { name, value } => write!(f, "(def {} {})", name, value),
            Expr::If {
                condition,
                consequence,
                alternative,
            } => write!(f, "(if {} {} {})", condition, consequence, alternative),
            Expr::Params(params) => write!(f, "{}", params),
            Expr::Function { params, body, .. } => {
                write!(f, "(")?;
                if !params.names.is_empty() {
                    write!(f, "{} ", params)?;
                }
                write!(f, "in")?;
                for e in body {
                    write!(f, " {}", e)?;
                }
                write!(f, ")")
            }
            Expr::Error(msg) => write!(f, "<error: {}>", msg),
        }
    }
}
