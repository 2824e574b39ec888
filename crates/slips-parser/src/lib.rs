/// Parser for the Slips language.
///
/// `ast` holds the closed expression model consumed by the type guesser and
/// the compiler; `parser` builds it from the token stream produced by
/// `slips_lexer::lex`.
pub mod ast;
pub mod parser;

pub use parser::{parse, ParseError, ParseErrors};
