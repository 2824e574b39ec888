use crate::ast::*;
/// Recursive descent parser for the Slips language.
///
/// Converts a flat token stream from slips-lexer into a sequence of
/// expressions. Errors do not stop the parse: each malformed list is
/// recorded, replaced by an `Expr::Error` node, and skipped up to its
/// closing paren so later forms are still parsed.
use log::debug;
use slips_lexer::Token;
use thiserror::Error;

/// Name given to functions that are not bound directly by `def`.
pub const ANONYMOUS_FN: &str = "fn";

#[derive(Debug, Clone, PartialEq, Error)]
#[error("parse error at token {pos} ({token}): {msg}")]
pub struct ParseError {
    pub token: Token,
    pub msg: String,
    pub pos: usize,
}

/// Every error collected while parsing one program.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{} parse error(s); first: {}", .0.len(), .0[0])]
pub struct ParseErrors(pub Vec<ParseError>);

/// Convenience function to parse a token stream into a Program.
///
/// Fails if any error was recorded, so a program with syntax errors never
/// reaches the compiler.
pub fn parse(tokens: Vec<Token>) -> Result<Program, ParseErrors> {
    let mut parser = Parser::new(tokens);
    let program = parser.parse();
    debug!(
        "parsed {} top-level expression(s), {} error(s)",
        program.len(),
        parser.errors.len()
    );
    if parser.errors.is_empty() {
        Ok(program)
    } else {
        Err(ParseErrors(parser.errors))
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Number of currently open parens.
    depth: usize,
    pub errors: Vec<ParseError>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            pos: 0,
            depth: 0,
            errors: Vec::new(),
        }
    }

    // ---------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens.get(self.pos + offset).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        match tok {
            Token::Eof => return tok,
            Token::LParen => self.depth += 1,
            Token::RParen => self.depth = self.depth.saturating_sub(1),
            _ => {}
        }
        self.pos += 1;
        tok
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn at_close(&self) -> bool {
        matches!(self.peek(), Token::RParen | Token::Eof)
    }

    fn error(&mut self, msg: impl Into<String>) -> String {
        let msg = msg.into();
        self.errors.push(ParseError {
            token: self.peek().clone(),
            msg: msg.clone(),
            pos: self.pos,
        });
        msg
    }

    fn expect_close(&mut self) -> Result<(), String> {
        match self.peek() {
            Token::RParen => {
                self.advance();
                Ok(())
            }
            other => {
                let msg = format!("expected ')', found {}", other);
                Err(self.error(msg))
            }
        }
    }

    /// Skip tokens until the list opened at `depth` has been closed.
    fn synchronize(&mut self, depth: usize) {
        while !self.at_eof() && self.depth >= depth {
            self.advance();
        }
    }

    /// Lookahead: does the list body starting here read `IDENT* in`?
    fn at_function(&self) -> bool {
        let mut offset = 0;
        while let Token::Ident(_) = self.peek_at(offset) {
            offset += 1;
        }
        matches!(self.peek_at(offset), Token::In)
    }

    // ---------------------------------------------------------------
    // Grammar
    // ---------------------------------------------------------------

    pub fn parse(&mut self) -> Program {
        let mut program = Vec::new();
        while !self.at_eof() {
            program.push(self.parse_expr());
        }
        program
    }

    fn parse_expr(&mut self) -> Expr {
        match self.peek().clone() {
            Token::Int(n) => {
                self.advance();
                Expr::Literal(Literal::Int(n))
            }
            Token::Str(s) => {
                self.advance();
                Expr::Literal(Literal::Str(s))
            }
            Token::True => {
                self.advance();
                Expr::Literal(Literal::Bool(true))
            }
            Token::False => {
                self.advance();
                Expr::Literal(Literal::Bool(false))
            }
            Token::Ident(name) => {
                self.advance();
                Expr::Variable(name)
            }
            Token::LParen => {
                self.advance();
                let depth = self.depth;
                match self.parse_list() {
                    Ok(expr) => expr,
                    Err(msg) => {
                        self.synchronize(depth);
                        Expr::Error(msg)
                    }
                }
            }
            Token::Eof => Expr::Error(self.error("unexpected end of input")),
            other => {
                let msg = self.error(format!("unexpected {}", other));
                self.advance();
                Expr::Error(msg)
            }
        }
    }

    /// Parse expressions up to (not including) the closing paren.
    fn parse_until_close(&mut self) -> Vec<Expr> {
        let mut exprs = Vec::new();
        while !self.at_close() {
            exprs.push(self.parse_expr());
        }
        exprs
    }

    /// Parse the inside of a list; the opening paren is already consumed.
    fn parse_list(&mut self) -> Result<Expr, String> {
        if self.at_function() {
            return self.parse_function();
        }
        match self.peek().clone() {
            Token::Def => {
                self.advance();
                self.parse_define()
            }
            Token::If => {
                self.advance();
                let condition = self.parse_operand("if")?;
                let consequence = self.parse_operand("if")?;
                let alternative = self.parse_operand("if")?;
                self.expect_close()?;
                Ok(Expr::If {
                    condition: Box::new(condition),
                    consequence: Box::new(consequence),
                    alternative: Box::new(alternative),
                })
            }
            Token::Plus => {
                self.advance();
                let lhs = self.parse_operand("+")?;
                let rhs = self.parse_operand("+")?;
                self.expect_close()?;
                Ok(Expr::Add(Box::new(lhs), Box::new(rhs)))
            }
            Token::Ident(_) => {
                let op = self.advance();
                let args = self.parse_until_close();
                self.expect_close()?;
                Ok(Expr::Call { op, args })
            }
            Token::LParen => {
                let head = self.parse_expr();
                let mut args = vec![head];
                args.extend(self.parse_until_close());
                self.expect_close()?;
                Ok(Expr::Call {
                    op: Token::LParen,
                    args,
                })
            }
            Token::RParen => Err(self.error("empty list")),
            Token::Eof => Err(self.error("unexpected end of input")),
            _ => {
                // A parenthesised literal: `(1)`
                let expr = self.parse_expr();
                if !matches!(self.peek(), Token::RParen) {
                    let msg = format!("cannot call literal {}", expr);
                    return Err(self.error(msg));
                }
                self.expect_close()?;
                Ok(expr)
            }
        }
    }

    fn parse_operand(&mut self, form: &str) -> Result<Expr, String> {
        if self.at_close() {
            let msg = format!("missing operand in ({} ...)", form);
            return Err(self.error(msg));
        }
        Ok(self.parse_expr())
    }

    fn parse_define(&mut self) -> Result<Expr, String> {
        let name = match self.peek().clone() {
            Token::Ident(name) => {
                self.advance();
                name
            }
            other => {
                let msg = format!("expected a name after def, found {}", other);
                return Err(self.error(msg));
            }
        };
        let mut value = self.parse_operand("def")?;
        if let Expr::Function { name: fn_name, .. } = &mut value {
            if fn_name == ANONYMOUS_FN {
                *fn_name = name.clone();
            }
        }
        self.expect_close()?;
        Ok(Expr::Define {
            name,
            value: Box::new(value),
        })
    }

    fn parse_function(&mut self) -> Result<Expr, String> {
        let mut names = Vec::new();
        while let Token::Ident(name) = self.peek().clone() {
            self.advance();
            names.push(name);
        }
        // at_function() guarantees the `in`
        self.advance();
        let body = self.parse_until_close();
        self.expect_close()?;
        Ok(Expr::Function {
            name: ANONYMOUS_FN.to_string(),
            params: Params { names },
            body,
        })
    }
}
