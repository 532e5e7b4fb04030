use crate::error::DbError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Symbol {
    LParen,
    RParen,
    Comma,
    Star,
    Plus,
    Minus,
    Slash,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Semicolon,
}

impl Symbol {
    fn as_str(&self) -> &'static str {
        match self {
            Symbol::LParen => "(",
            Symbol::RParen => ")",
            Symbol::Comma => ",",
            Symbol::Star => "*",
            Symbol::Plus => "+",
            Symbol::Minus => "-",
            Symbol::Slash => "/",
            Symbol::Eq => "=",
            Symbol::Ne => "<>",
            Symbol::Lt => "<",
            Symbol::Le => "<=",
            Symbol::Gt => ">",
            Symbol::Ge => ">=",
            Symbol::Semicolon => ";",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    /// Identifier or keyword, as written.
    Ident(String),
    Number(f64),
    Str(String),
    Symbol(Symbol),
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Ident(s) => write!(f, "'{}'", s),
            TokenKind::Number(n) => write!(f, "{}", n),
            TokenKind::Str(s) => write!(f, "string '{}'", s),
            TokenKind::Symbol(s) => write!(f, "'{}'", s.as_str()),
            TokenKind::Eof => write!(f, "end of input"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    /// Byte offset of the token's first character.
    pub pos: usize,
}

/// Builds a syntax error pointing at byte offset `pos` of `text`.
pub(crate) fn syntax_error(text: &str, pos: usize, message: impl Into<String>) -> DbError {
    let before = &text[..pos.min(text.len())];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    DbError::SyntaxError {
        line,
        column: before[line_start..].chars().count() + 1,
        message: message.into(),
    }
}

pub(crate) fn tokenize(text: &str) -> Result<Vec<Token>, DbError> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        // Line comments: `// ...` and `-- ...`.
        if (c == '/' || c == '-') && text[pos..].starts_with(if c == '/' { "//" } else { "--" }) {
            while let Some(&(_, c)) = chars.peek() {
                if c == '\n' {
                    break;
                }
                chars.next();
            }
            continue;
        }

        let kind = if c.is_alphabetic() || c == '_' {
            let mut end = pos;
            while let Some(&(i, c)) = chars.peek() {
                if c.is_alphanumeric() || c == '_' {
                    end = i + c.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            TokenKind::Ident(text[pos..end].to_string())
        } else if c.is_ascii_digit() || (c == '.' && next_is_digit(text, pos + 1)) {
            let mut end = pos;
            let mut seen_dot = false;
            while let Some(&(i, c)) = chars.peek() {
                if c.is_ascii_digit() || (c == '.' && !seen_dot) {
                    seen_dot |= c == '.';
                    end = i + 1;
                    chars.next();
                } else {
                    break;
                }
            }
            let number = text[pos..end]
                .parse::<f64>()
                .map_err(|_| syntax_error(text, pos, format!("invalid number '{}'", &text[pos..end])))?;
            TokenKind::Number(number)
        } else if c == '\'' {
            chars.next();
            let mut value = String::new();
            loop {
                match chars.next() {
                    Some((_, '\'')) => {
                        // '' inside a literal is an escaped quote.
                        if matches!(chars.peek(), Some(&(_, '\''))) {
                            chars.next();
                            value.push('\'');
                        } else {
                            break;
                        }
                    }
                    Some((_, c)) => value.push(c),
                    None => return Err(syntax_error(text, pos, "unterminated string literal")),
                }
            }
            TokenKind::Str(value)
        } else {
            chars.next();
            let next = chars.peek().map(|&(_, c)| c);
            let symbol = match (c, next) {
                ('(', _) => Symbol::LParen,
                (')', _) => Symbol::RParen,
                (',', _) => Symbol::Comma,
                ('*', _) => Symbol::Star,
                ('+', _) => Symbol::Plus,
                ('-', _) => Symbol::Minus,
                ('/', _) => Symbol::Slash,
                (';', _) => Symbol::Semicolon,
                ('=', Some('=')) => {
                    chars.next();
                    Symbol::Eq
                }
                ('=', _) => Symbol::Eq,
                ('!', Some('=')) | ('<', Some('>')) => {
                    chars.next();
                    Symbol::Ne
                }
                ('<', Some('=')) => {
                    chars.next();
                    Symbol::Le
                }
                ('<', _) => Symbol::Lt,
                ('>', Some('=')) => {
                    chars.next();
                    Symbol::Ge
                }
                ('>', _) => Symbol::Gt,
                _ => return Err(syntax_error(text, pos, format!("unexpected character '{}'", c))),
            };
            TokenKind::Symbol(symbol)
        };
        tokens.push(Token { kind, pos });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        pos: text.len(),
    });
    Ok(tokens)
}

fn next_is_digit(text: &str, pos: usize) -> bool {
    text[pos..].chars().next().is_some_and(|c| c.is_ascii_digit())
}
