/// Slips language lexer
///
/// Tokenizes Slips source code into a flat token stream.
/// Key design decisions:
/// - Everything that is not whitespace, a paren, a quote or a comment is an
///   atom; atoms that spell an integer become `Int`, keywords become their
///   own tokens, the rest are `Ident`
/// - `;` starts a comment that runs to the end of the line
/// - `call` is lexed as a plain `Ident`: whether it is the indirect-call
///   keyword is decided by the compiler, not the lexer
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Int(i64),
    Str(String),
    True,
    False,

    // Identifiers
    Ident(String),

    // Keywords
    Def, // def
    If,  // if
    In,  // in (separates parameters from a function body)

    // Operators
    Plus, // +

    // Structural
    LParen, // (
    RParen, // )

    // End
    Eof,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Token::Int(n) => write!(f, "{}", n),
            Token::Str(s) => write!(f, "\"{}\"", s),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Def => write!(f, "def"),
            Token::If => write!(f, "if"),
            Token::In => write!(f, "in"),
            Token::Plus => write!(f, "+"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Eof => write!(f, "<eof>"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{line}:{col}: {msg}")]
pub struct LexError {
    pub msg: String,
    pub line: usize,
    pub col: usize,
}

pub fn lex(source: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer::new(source);
    lexer.tokenize()
}

struct Lexer<'a> {
    source: &'a [u8],
    pos: usize,
    line: usize,
    col: usize,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Lexer {
            source: source.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let ch = self.source.get(self.pos).copied();
        if let Some(c) = ch {
            self.pos += 1;
            if c == b'\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        ch
    }

    fn err(&self, msg: impl Into<String>) -> LexError {
        LexError {
            msg: msg.into(),
            line: self.line,
            col: self.col,
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_ascii_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn tokenize(&mut self) -> Result<Vec<Token>, LexError> {
        loop {
            self.skip_whitespace();

            let ch = match self.peek() {
                None => break,
                Some(c) => c,
            };

            match ch {
                b';' => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                b'(' => {
                    self.advance();
                    self.tokens.push(Token::LParen);
                }
                b')' => {
                    self.advance();
                    self.tokens.push(Token::RParen);
                }
                b'"' => self.lex_string()?,
                _ => self.lex_atom()?,
            }
        }

        self.tokens.push(Token::Eof);
        Ok(std::mem::take(&mut self.tokens))
    }

    fn is_atom_byte(ch: u8) -> bool {
        !ch.is_ascii_whitespace() && !matches!(ch, b'(' | b')' | b'"' | b';')
    }

    fn lex_atom(&mut self) -> Result<(), LexError> {
        let (line, col) = (self.line, self.col);
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if Self::is_atom_byte(ch) {
                self.advance();
            } else {
                break;
            }
        }

        let text = String::from_utf8_lossy(&self.source[start..self.pos]).into_owned();
        let token = match text.as_str() {
            "true" => Token::True,
            "false" => Token::False,
            "def" => Token::Def,
            "if" => Token::If,
            "in" => Token::In,
            "+" => Token::Plus,
            _ if looks_numeric(&text) => {
                let val: i64 = text.parse().map_err(|_| LexError {
                    msg: format!("invalid integer: {}", text),
                    line,
                    col,
                })?;
                Token::Int(val)
            }
            _ => Token::Ident(text),
        };
        self.tokens.push(token);
        Ok(())
    }

    fn lex_string(&mut self) -> Result<(), LexError> {
        self.advance(); // consume opening "

        // Raw bytes; multi-byte characters are decoded once the literal ends.
        let mut buf = Vec::new();
        loop {
            match self.advance() {
                None => return Err(self.err("unterminated string")),
                Some(b'"') => {
                    let text = String::from_utf8(buf)
                        .map_err(|_| self.err("invalid UTF-8 in string literal"))?;
                    self.tokens.push(Token::Str(text));
                    return Ok(());
                }
                Some(b'\\') => {
                    let escaped = self.lex_escape()?;
                    buf.push(escaped);
                }
                Some(c) => buf.push(c),
            }
        }
    }

    fn lex_escape(&mut self) -> Result<u8, LexError> {
        match self.advance() {
            None => Err(self.err("unterminated escape sequence")),
            Some(b'n') => Ok(b'\n'),
            Some(b't') => Ok(b'\t'),
            Some(b'\\') => Ok(b'\\'),
            Some(b'"') => Ok(b'"'),
            Some(c) => Err(self.err(format!("unknown escape: \\{}", c as char))),
        }
    }
}

/// An atom is numeric when it starts with a digit, or with `-` followed by a digit.
fn looks_numeric(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    digits.bytes().next().is_some_and(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_tokens() {
        let tokens = lex("(+ 1 2)").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::LParen,
                Token::Plus,
                Token::Int(1),
                Token::Int(2),
                Token::RParen,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords() {
        let tokens = lex("def if in true false call").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Def,
                Token::If,
                Token::In,
                Token::True,
                Token::False,
                Token::Ident("call".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_function_literal() {
        let tokens = lex("(x y in (+ x y))").unwrap();
        assert_eq!(tokens.len(), 11);
        assert_eq!(tokens[2], Token::In);
        assert_eq!(tokens[0], Token::LParen);
    }

    #[test]
    fn test_negative_int() {
        let tokens = lex("-42").unwrap();
        assert_eq!(tokens, vec![Token::Int(-42), Token::Eof]);
    }

    #[test]
    fn test_minus_alone_is_ident() {
        let tokens = lex("-").unwrap();
        assert_eq!(tokens, vec![Token::Ident("-".into()), Token::Eof]);
    }

    #[test]
    fn test_string() {
        let tokens = lex(r#""hi\n""#).unwrap();
        assert_eq!(tokens, vec![Token::Str("hi\n".into()), Token::Eof]);
    }

    #[test]
    fn test_comment_skipped() {
        let tokens = lex("; nothing here\n7 ; trailing").unwrap();
        assert_eq!(tokens, vec![Token::Int(7), Token::Eof]);
    }

    #[test]
    fn test_invalid_integer() {
        let err = lex("(def x 12ab)").unwrap_err();
        assert_eq!(err.line, 1);
        assert_eq!(err.col, 8);
        assert!(err.msg.contains("12ab"));
    }

    #[test]
    fn test_unterminated_string() {
        let err = lex("\"open").unwrap_err();
        assert_eq!(err.msg, "unterminated string");
    }

    #[test]
    fn test_line_tracking() {
        let err = lex("1\n2\n\"x").unwrap_err();
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_string_keeps_multibyte_characters() {
        let tokens = lex("\"héllo → wörld\"").unwrap();
        assert_eq!(tokens, vec![Token::Str("héllo → wörld".into()), Token::Eof]);
    }

    #[test]
    fn test_multibyte_string_with_escape() {
        let tokens = lex(r#""ü\tß""#).unwrap();
        assert_eq!(tokens, vec![Token::Str("ü\tß".into()), Token::Eof]);
    }
}
