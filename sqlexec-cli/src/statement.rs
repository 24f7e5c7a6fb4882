//! Statement parsing: tokens in, a [`Statement`] out.
//!
//! The shell speaks a small command language over the engine; the full SQL
//! frontend is a separate collaborator. One statement per line, optionally
//! terminated by `;`.

use sqlexec::error::{CResult, Error};
use sqlexec::storage::OrderBy;
use sqlexec::txn::IsolationLevel;
use sqlexec::types::{Filter, FilterOp, Row, Value};

use crate::ast::token_kind::TokenKind;
use crate::ast::tokenizer::{tokenize, Token};

/// One parsed shell statement.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Begin(IsolationLevel),
    Commit,
    Rollback,
    Tables,
    Sources,
    Schema(String),
    Scan {
        table: String,
        filters: Vec<Filter>,
        order_by: Vec<OrderBy>,
        limit: Option<u64>,
        offset: i64,
    },
    Insert {
        table: String,
        row: Row,
    },
    Update {
        table: String,
        patch: Row,
        filters: Vec<Filter>,
    },
    Delete {
        table: String,
        filters: Vec<Filter>,
    },
    Info,
    Time,
    Vacuum,
    Exit,
}

/// Parses one statement. Empty input is a parse error the callers filter
/// out beforehand.
pub fn parse(input: &str) -> CResult<Statement> {
    let tokens = tokenize(input).map_err(Error::Parse)?;
    let tokens: Vec<Token> =
        tokens.into_iter().filter(|t| t.kind != TokenKind::SemiColon).collect();
    let mut parser = Parser { tokens, pos: 0 };
    let statement = parser.parse_statement()?;
    parser.expect_end()?;
    Ok(statement)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn accept(&mut self, kind: TokenKind) -> bool {
        if self.peek().map(|t| t.kind) == Some(kind) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expect(&mut self, kind: TokenKind) -> CResult<Token> {
        match self.next() {
            Some(token) if token.kind == kind => Ok(token),
            Some(token) => Err(Error::Parse(format!(
                "expected {:?}, found '{}' at byte {}",
                kind, token.text, token.offset
            ))),
            None => Err(Error::Parse(format!("expected {:?} at end of statement", kind))),
        }
    }

    fn expect_end(&self) -> CResult<()> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(Error::Parse(format!(
                "unexpected trailing input at byte {}: '{}'",
                token.offset, token.text
            ))),
        }
    }

    fn ident(&mut self) -> CResult<String> {
        match self.next() {
            Some(token) if token.kind == TokenKind::Ident => Ok(token.text),
            Some(token) if token.kind == TokenKind::QuotedString => Ok(token.unquoted()),
            Some(token) => {
                Err(Error::Parse(format!("expected a name, found '{}'", token.text)))
            }
            None => Err(Error::Parse("expected a name at end of statement".into())),
        }
    }

    fn parse_statement(&mut self) -> CResult<Statement> {
        let Some(first) = self.next() else {
            return Err(Error::Parse("empty statement".into()));
        };
        match first.kind {
            TokenKind::BEGIN => {
                // Everything after BEGIN names the level; unknown levels
                // fall back to the REPEATABLE READ default.
                let rest: Vec<&str> =
                    self.tokens[self.pos..].iter().map(|t| t.text.as_str()).collect();
                self.pos = self.tokens.len();
                Ok(Statement::Begin(IsolationLevel::parse_or_default(&rest.join(" "))))
            }
            TokenKind::COMMIT => Ok(Statement::Commit),
            TokenKind::ROLLBACK => Ok(Statement::Rollback),
            TokenKind::TABLES => Ok(Statement::Tables),
            TokenKind::SOURCES => Ok(Statement::Sources),
            TokenKind::INFO => Ok(Statement::Info),
            TokenKind::TIME => Ok(Statement::Time),
            TokenKind::VACUUM => Ok(Statement::Vacuum),
            TokenKind::EXIT | TokenKind::QUIT => Ok(Statement::Exit),
            TokenKind::SCHEMA => Ok(Statement::Schema(self.ident()?)),
            TokenKind::SCAN => self.parse_scan(),
            TokenKind::INSERT => {
                let table = self.ident()?;
                let row = self.parse_assignments()?;
                Ok(Statement::Insert { table, row })
            }
            TokenKind::UPDATE => {
                let table = self.ident()?;
                self.expect(TokenKind::SET)?;
                let patch = self.parse_assignments()?;
                let filters = self.parse_where()?;
                Ok(Statement::Update { table, patch, filters })
            }
            TokenKind::DELETE => {
                let table = self.ident()?;
                let filters = self.parse_where()?;
                Ok(Statement::Delete { table, filters })
            }
            _ => Err(Error::Parse(format!("unknown statement '{}'", first.text))),
        }
    }

    fn parse_scan(&mut self) -> CResult<Statement> {
        let table = self.ident()?;
        let filters = self.parse_where()?;

        let mut order_by = Vec::new();
        if self.accept(TokenKind::ORDER) {
            self.expect(TokenKind::BY)?;
            loop {
                let column = self.ident()?;
                let desc = if self.accept(TokenKind::DESC) {
                    true
                } else {
                    self.accept(TokenKind::ASC);
                    false
                };
                order_by.push(if desc { OrderBy::desc(column) } else { OrderBy::asc(column) });
                if !self.accept(TokenKind::Comma) {
                    break;
                }
            }
        }

        let mut limit = None;
        if self.accept(TokenKind::LIMIT) {
            let token = self.expect(TokenKind::LiteralInteger)?;
            limit = Some(
                token.text.parse::<u64>().map_err(|e| Error::Parse(e.to_string()))?,
            );
        }
        let mut offset = 0i64;
        if self.accept(TokenKind::OFFSET) {
            let negative = self.accept(TokenKind::Minus);
            let token = self.expect(TokenKind::LiteralInteger)?;
            offset = token.text.parse::<i64>().map_err(|e| Error::Parse(e.to_string()))?;
            if negative {
                offset = -offset;
            }
        }

        Ok(Statement::Scan { table, filters, order_by, limit, offset })
    }

    /// `col = value [, col = value]...`
    fn parse_assignments(&mut self) -> CResult<Row> {
        let mut row = Row::new();
        loop {
            let column = self.ident()?;
            self.expect(TokenKind::Eq)?;
            let value = self.parse_value()?;
            row.set(column, value);
            if !self.accept(TokenKind::Comma) {
                break;
            }
        }
        if row.is_empty() {
            return Err(Error::Parse("expected at least one assignment".into()));
        }
        Ok(row)
    }

    /// `WHERE col op value [AND col op value]...`
    fn parse_where(&mut self) -> CResult<Vec<Filter>> {
        let mut filters = Vec::new();
        if !self.accept(TokenKind::WHERE) {
            return Ok(filters);
        }
        loop {
            let column = self.ident()?;
            let op = match self.next() {
                Some(token) => match token.kind {
                    TokenKind::Eq => FilterOp::Eq,
                    TokenKind::NotEq => FilterOp::Ne,
                    TokenKind::Lt => FilterOp::Lt,
                    TokenKind::Lte => FilterOp::Le,
                    TokenKind::Gt => FilterOp::Gt,
                    TokenKind::Gte => FilterOp::Ge,
                    TokenKind::LIKE => FilterOp::Like,
                    TokenKind::IN => FilterOp::In,
                    _ => {
                        return Err(Error::Parse(format!(
                            "expected a comparison operator, found '{}'",
                            token.text
                        )))
                    }
                },
                None => {
                    return Err(Error::Parse("expected a comparison operator".into()))
                }
            };
            if op == FilterOp::In {
                self.expect(TokenKind::LParen)?;
                let mut values = Vec::new();
                loop {
                    values.push(self.parse_value()?);
                    if !self.accept(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RParen)?;
                filters.push(Filter::is_in(column, values));
            } else {
                filters.push(Filter::new(column, op, self.parse_value()?));
            }
            if !self.accept(TokenKind::AND) {
                break;
            }
        }
        Ok(filters)
    }

    fn parse_value(&mut self) -> CResult<Value> {
        let Some(token) = self.next() else {
            return Err(Error::Parse("expected a value at end of statement".into()));
        };
        match token.kind {
            TokenKind::NULL => Ok(Value::Null),
            TokenKind::TRUE => Ok(Value::Boolean(true)),
            TokenKind::FALSE => Ok(Value::Boolean(false)),
            TokenKind::LiteralInteger => token
                .text
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|e| Error::Parse(e.to_string())),
            TokenKind::LiteralFloat => token
                .text
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| Error::Parse(e.to_string())),
            TokenKind::Minus => match self.parse_value()? {
                Value::Integer(i) => Ok(Value::Integer(-i)),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(Error::Parse(format!("cannot negate {}", other))),
            },
            TokenKind::QuotedString => Ok(Value::String(token.unquoted())),
            // Bare words read as strings, so `WHERE name = Alice` works.
            TokenKind::Ident => Ok(Value::String(token.text)),
            _ => Err(Error::Parse(format!("expected a value, found '{}'", token.text))),
        }
    }
}
