//! Recursive-descent parser producing an untyped syntax tree.
//!
//! Operator precedence, loosest first: OR, AND, NOT, comparison (including LIKE, IN
//! and IS NULL), additive, multiplicative, unary minus.

use super::lexer::{syntax_error, tokenize, Symbol, Token, TokenKind};
use crate::error::DbError;
use crate::types::Scalar;

/// Deepest nesting of sub-expressions and sub-queries a statement may use. Each operator in
/// a chain such as `a + b + c` counts as one level, since it deepens the tree just the same.
const MAX_DEPTH: usize = 128;

const RESERVED: &[&str] = &[
    "SELECT", "FROM", "WHERE", "GROUP", "BY", "HAVING", "ORDER", "LIMIT", "ASOF", "UNTIL", "AS",
    "AND", "OR", "NOT", "LIKE", "IN", "IS", "NULL", "TRUE", "FALSE", "ASC", "DESC",
];

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|k| k.eq_ignore_ascii_case(word))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Literal(Scalar),
    Ident {
        name: String,
        pos: usize,
    },
    Call {
        name: String,
        args: Vec<Node>,
        pos: usize,
    },
    Neg(Box<Node>),
    Not(Box<Node>),
    Binary {
        op: BinOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    Like {
        operand: Box<Node>,
        pattern: String,
        negated: bool,
    },
    In {
        operand: Box<Node>,
        target: InTarget,
        negated: bool,
        pos: usize,
    },
    IsNull {
        operand: Box<Node>,
        negated: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum InTarget {
    List(Vec<Node>),
    SubQuery(Box<Select>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SelectItem {
    Wildcard,
    Expr { node: Node, alias: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FromClause {
    Table { name: String, pos: usize },
    SubQuery(Box<Select>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum GroupItem {
    All,
    Expr {
        node: Node,
        alias: Option<String>,
        pos: usize,
    },
}

/// A string literal along with where it appeared.
pub(crate) type Located = (String, usize);

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Select {
    pub items: Vec<SelectItem>,
    pub from: FromClause,
    pub as_of: Option<Located>,
    pub until: Option<Located>,
    pub filter: Option<Node>,
    pub group_by: Vec<GroupItem>,
    pub having: Option<Node>,
    pub order_by: Vec<(String, bool)>,
    /// (offset, count)
    pub limit: Option<(usize, usize)>,
}

pub(crate) fn parse_statement(text: &str) -> Result<Select, DbError> {
    let mut parser = Parser {
        text,
        tokens: tokenize(text)?,
        pos: 0,
        depth: 0,
    };
    let select = parser.parse_select()?;
    parser.eat_symbol(Symbol::Semicolon);
    match parser.peek() {
        TokenKind::Eof => Ok(select),
        other => Err(parser.error(format!("unexpected {} after end of query", other))),
    }
}

struct Parser<'a> {
    text: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn peek_at(&self, ahead: usize) -> &TokenKind {
        &self.tokens[(self.pos + ahead).min(self.tokens.len() - 1)].kind
    }

    fn position(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].pos
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        kind
    }

    fn error(&self, message: impl Into<String>) -> DbError {
        syntax_error(self.text, self.position(), message)
    }

    fn descend(&mut self) -> Result<(), DbError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error(format!("expression nested more than {} levels deep", MAX_DEPTH)));
        }
        self.depth += 1;
        Ok(())
    }

    /// Runs `parse` one nesting level deeper.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T, DbError>) -> Result<T, DbError> {
        self.descend()?;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn unexpected(&self, expected: &str) -> DbError {
        self.error(format!("expected {}, found {}", expected, self.peek()))
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        self.is_keyword_at(0, keyword)
    }

    fn is_keyword_at(&self, ahead: usize, keyword: &str) -> bool {
        matches!(self.peek_at(ahead), TokenKind::Ident(w) if w.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), DbError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(keyword))
        }
    }

    fn is_symbol(&self, symbol: Symbol) -> bool {
        matches!(self.peek(), TokenKind::Symbol(s) if *s == symbol)
    }

    fn eat_symbol(&mut self, symbol: Symbol) -> bool {
        if self.is_symbol(symbol) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: Symbol, what: &str) -> Result<(), DbError> {
        if self.eat_symbol(symbol) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    /// A non-reserved identifier.
    fn expect_ident(&mut self, what: &str) -> Result<String, DbError> {
        match self.peek() {
            TokenKind::Ident(w) if !is_reserved(w) => {
                let w = w.clone();
                self.advance();
                Ok(w)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn expect_string(&mut self, what: &str) -> Result<Located, DbError> {
        let pos = self.position();
        match self.peek() {
            TokenKind::Str(s) => {
                let s = s.clone();
                self.advance();
                Ok((s, pos))
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn expect_count(&mut self, what: &str) -> Result<usize, DbError> {
        match self.peek() {
            TokenKind::Number(n) if *n >= 0.0 && n.fract() == 0.0 && *n <= usize::MAX as f64 => {
                let n = *n as usize;
                self.advance();
                Ok(n)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn parse_select(&mut self) -> Result<Select, DbError> {
        self.nested(Self::parse_select_body)
    }

    fn parse_select_body(&mut self) -> Result<Select, DbError> {
        self.expect_keyword("SELECT")?;
        let items = self.parse_select_items()?;

        self.expect_keyword("FROM")?;
        let from = if self.eat_symbol(Symbol::LParen) {
            let sub = self.parse_select()?;
            self.expect_symbol(Symbol::RParen, "')' after sub-query")?;
            FromClause::SubQuery(Box::new(sub))
        } else {
            let pos = self.position();
            FromClause::Table {
                name: self.expect_ident("table name")?,
                pos,
            }
        };

        let as_of = if self.eat_keyword("ASOF") {
            Some(self.expect_string("duration literal after ASOF")?)
        } else {
            None
        };
        let until = if self.eat_keyword("UNTIL") {
            Some(self.expect_string("duration literal after UNTIL")?)
        } else {
            None
        };

        let filter = if self.eat_keyword("WHERE") {
            Some(self.parse_expr()?)
        } else {
            None
        };

        let mut group_by = Vec::new();
        if self.eat_keyword("GROUP") {
            self.expect_keyword("BY")?;
            loop {
                if self.eat_symbol(Symbol::Star) {
                    group_by.push(GroupItem::All);
                } else {
                    let pos = self.position();
                    let node = self.parse_expr()?;
                    let alias = self.parse_alias()?;
                    group_by.push(GroupItem::Expr { node, alias, pos });
                }
                if !self.eat_symbol(Symbol::Comma) {
                    break;
                }
            }
        }

        let having = if self.eat_keyword("HAVING") {
            Some(self.parse_expr()?)
        } else {
            None
        };

        let mut order_by = Vec::new();
        if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            loop {
                let field = self.expect_ident("field name in ORDER BY")?;
                let descending = if self.eat_keyword("DESC") {
                    true
                } else {
                    self.eat_keyword("ASC");
                    false
                };
                order_by.push((field, descending));
                if !self.eat_symbol(Symbol::Comma) {
                    break;
                }
            }
        }

        let limit = if self.eat_keyword("LIMIT") {
            let first = self.expect_count("row count after LIMIT")?;
            if self.eat_symbol(Symbol::Comma) {
                Some((first, self.expect_count("row count after LIMIT offset")?))
            } else {
                Some((0, first))
            }
        } else {
            None
        };

        Ok(Select {
            items,
            from,
            as_of,
            until,
            filter,
            group_by,
            having,
            order_by,
            limit,
        })
    }

    fn parse_select_items(&mut self) -> Result<Vec<SelectItem>, DbError> {
        let mut items = Vec::new();
        loop {
            let wildcard = self.is_symbol(Symbol::Star)
                || (matches!(self.peek(), TokenKind::Ident(w) if w == "_")
                    && (matches!(self.peek_at(1), TokenKind::Symbol(Symbol::Comma))
                        || self.is_keyword_at(1, "FROM")));
            if wildcard {
                self.advance();
                items.push(SelectItem::Wildcard);
            } else {
                let node = self.parse_expr()?;
                let alias = self.parse_alias()?;
                items.push(SelectItem::Expr { node, alias });
            }
            if !self.eat_symbol(Symbol::Comma) {
                return Ok(items);
            }
        }
    }

    fn parse_alias(&mut self) -> Result<Option<String>, DbError> {
        if self.eat_keyword("AS") {
            Ok(Some(self.expect_ident("alias after AS")?))
        } else {
            Ok(None)
        }
    }

    pub(crate) fn parse_expr(&mut self) -> Result<Node, DbError> {
        self.nested(|p| {
            let base = p.depth;
            let mut left = p.parse_and()?;
            while p.eat_keyword("OR") {
                p.descend()?;
                let right = p.parse_and()?;
                left = binary(BinOp::Or, left, right);
            }
            p.depth = base;
            Ok(left)
        })
    }

    fn parse_and(&mut self) -> Result<Node, DbError> {
        let base = self.depth;
        let mut left = self.parse_not()?;
        while self.eat_keyword("AND") {
            self.descend()?;
            let right = self.parse_not()?;
            left = binary(BinOp::And, left, right);
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Node, DbError> {
        if self.eat_keyword("NOT") {
            let operand = self.nested(Self::parse_not)?;
            return Ok(Node::Not(Box::new(operand)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Node, DbError> {
        let left = self.parse_additive()?;

        if let TokenKind::Symbol(s) = self.peek() {
            let op = match s {
                Symbol::Eq => Some(BinOp::Eq),
                Symbol::Ne => Some(BinOp::Ne),
                Symbol::Lt => Some(BinOp::Lt),
                Symbol::Le => Some(BinOp::Le),
                Symbol::Gt => Some(BinOp::Gt),
                Symbol::Ge => Some(BinOp::Ge),
                _ => None,
            };
            if let Some(op) = op {
                self.advance();
                let right = self.parse_additive()?;
                return Ok(binary(op, left, right));
            }
        }

        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            self.expect_keyword("NULL")?;
            return Ok(Node::IsNull {
                operand: Box::new(left),
                negated,
            });
        }

        let negated = if self.is_keyword("NOT")
            && (self.is_keyword_at(1, "LIKE") || self.is_keyword_at(1, "IN"))
        {
            self.advance();
            true
        } else {
            false
        };

        if self.eat_keyword("LIKE") {
            let (pattern, _) = self.expect_string("pattern string after LIKE")?;
            return Ok(Node::Like {
                operand: Box::new(left),
                pattern,
                negated,
            });
        }

        if self.is_keyword("IN") {
            let pos = self.position();
            self.advance();
            self.expect_symbol(Symbol::LParen, "'(' after IN")?;
            let target = if self.is_keyword("SELECT") {
                InTarget::SubQuery(Box::new(self.parse_select()?))
            } else {
                let mut values = vec![self.parse_expr()?];
                while self.eat_symbol(Symbol::Comma) {
                    values.push(self.parse_expr()?);
                }
                InTarget::List(values)
            };
            self.expect_symbol(Symbol::RParen, "')' closing IN list")?;
            return Ok(Node::In {
                operand: Box::new(left),
                target,
                negated,
                pos,
            });
        }

        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Node, DbError> {
        let base = self.depth;
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.eat_symbol(Symbol::Plus) {
                BinOp::Add
            } else if self.eat_symbol(Symbol::Minus) {
                BinOp::Sub
            } else {
                self.depth = base;
                return Ok(left);
            };
            self.descend()?;
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Node, DbError> {
        let base = self.depth;
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat_symbol(Symbol::Star) {
                BinOp::Mul
            } else if self.eat_symbol(Symbol::Slash) {
                BinOp::Div
            } else {
                self.depth = base;
                return Ok(left);
            };
            self.descend()?;
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Node, DbError> {
        if self.eat_symbol(Symbol::Minus) {
            return Ok(match self.nested(Self::parse_unary)? {
                Node::Literal(Scalar::Float(f)) => Node::Literal(Scalar::Float(-f)),
                other => Node::Neg(Box::new(other)),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Node, DbError> {
        let pos = self.position();
        match self.peek().clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Node::Literal(Scalar::Float(n)))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Node::Literal(Scalar::Str(s)))
            }
            TokenKind::Symbol(Symbol::LParen) => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect_symbol(Symbol::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::Ident(word) => {
                if word.eq_ignore_ascii_case("TRUE") || word.eq_ignore_ascii_case("FALSE") {
                    self.advance();
                    return Ok(Node::Literal(Scalar::Bool(word.eq_ignore_ascii_case("TRUE"))));
                }
                if word.eq_ignore_ascii_case("NULL") {
                    self.advance();
                    return Ok(Node::Literal(Scalar::Null));
                }
                if is_reserved(&word) {
                    return Err(self.error(format!("unexpected keyword {}", word.to_uppercase())));
                }
                self.advance();
                if self.eat_symbol(Symbol::LParen) {
                    let mut args = Vec::new();
                    if !self.eat_symbol(Symbol::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.eat_symbol(Symbol::Comma) {
                                break;
                            }
                        }
                        self.expect_symbol(Symbol::RParen, "')' closing argument list")?;
                    }
                    Ok(Node::Call {
                        name: word,
                        args,
                        pos,
                    })
                } else {
                    Ok(Node::Ident { name: word, pos })
                }
            }
            _ => Err(self.unexpected("expression")),
        }
    }
}

fn binary(op: BinOp, left: Node, right: Node) -> Node {
    Node::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
