//! Arithmetic expressions for generated columns.
//!
//! A generated column carries an expression over sibling columns, e.g.
//! `price * qty`. The engine stores the parsed AST; Stored columns are
//! recomputed on write, Virtual columns on read. Only column references,
//! literals, and `+ - * /` are supported, which matches what the frontends
//! accept for `GENERATED ALWAYS AS (...)`.

use logos::Logos;

use crate::error::{CResult, Error};
use crate::types::row::Row;
use crate::types::value::Value;

#[derive(Logos, Clone, Copy, Debug, PartialEq, Eq)]
enum ExprToken {
    #[regex(r"[ \t\r\n]+", logos::skip)]
    Whitespace,

    #[regex(r"[_a-zA-Z][_a-zA-Z0-9]*")]
    Ident,

    #[regex(r"[0-9]+")]
    LiteralInteger,

    #[regex(r"([0-9]*\.[0-9]+)|([0-9]+\.[0-9]*)")]
    LiteralFloat,

    #[regex(r#"'([^'\\]|\\.)*'"#)]
    QuotedString,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Multiply,
    #[token("/")]
    Divide,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
}

/// Binary arithmetic operators, in increasing precedence groups.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    fn precedence(self) -> u8 {
        match self {
            BinOp::Add | BinOp::Sub => 1,
            BinOp::Mul | BinOp::Div => 2,
        }
    }
}

/// A parsed generated-column expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Column(String),
    Literal(Value),
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
}

impl Expr {
    /// Parses an expression like `price * qty` or `(total + 1) * 1.1`.
    pub fn parse(source: &str) -> CResult<Expr> {
        let mut tokens = Vec::new();
        let mut lexer = ExprToken::lexer(source);
        while let Some(token) = lexer.next() {
            match token {
                Ok(kind) => tokens.push((kind, lexer.slice().to_owned())),
                Err(_) => {
                    return Err(Error::Parse(format!(
                        "unrecognized token in expression at byte {}",
                        lexer.span().start
                    )))
                }
            }
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_binary(0)?;
        if parser.pos != parser.tokens.len() {
            return Err(Error::Parse("trailing tokens in expression".into()));
        }
        Ok(expr)
    }

    /// Evaluates against a row. NULL operands propagate NULL; non-numeric
    /// operands and division by zero are schema errors.
    pub fn eval(&self, row: &Row) -> CResult<Value> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Column(name) => match row.get(name) {
                Some(v) => Ok(v.clone()),
                None => Err(Error::NoColumn(name.clone())),
            },
            Expr::Binary { op, lhs, rhs } => {
                let lhs = lhs.eval(row)?;
                let rhs = rhs.eval(row)?;
                if lhs.is_null() || rhs.is_null() {
                    return Ok(Value::Null);
                }
                // Integer arithmetic stays integral except for division.
                if let (Value::Integer(a), Value::Integer(b), false) =
                    (&lhs, &rhs, matches!(op, BinOp::Div))
                {
                    return Ok(Value::Integer(match op {
                        BinOp::Add => a.wrapping_add(*b),
                        BinOp::Sub => a.wrapping_sub(*b),
                        BinOp::Mul => a.wrapping_mul(*b),
                        BinOp::Div => unreachable!(),
                    }));
                }
                let (a, b) = match (lhs.as_f64(), rhs.as_f64()) {
                    (Some(a), Some(b)) => (a, b),
                    _ => {
                        return Err(Error::Schema(format!(
                            "non-numeric operand in expression: {} {:?} {}",
                            lhs, op, rhs
                        )))
                    }
                };
                if matches!(op, BinOp::Div) && b == 0.0 {
                    return Err(Error::Schema("division by zero in expression".into()));
                }
                Ok(Value::Float(match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                }))
            }
        }
    }

    /// Column names this expression depends on, in first-reference order.
    pub fn dependencies(&self) -> Vec<String> {
        let mut deps = Vec::new();
        self.collect_deps(&mut deps);
        deps
    }

    fn collect_deps(&self, deps: &mut Vec<String>) {
        match self {
            Expr::Column(name) => {
                if !deps.iter().any(|d| d == name) {
                    deps.push(name.clone());
                }
            }
            Expr::Literal(_) => {}
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_deps(deps);
                rhs.collect_deps(deps);
            }
        }
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Column(name) => write!(f, "{}", name),
            Expr::Literal(v) => match v {
                Value::String(s) => write!(f, "'{}'", s),
                other => write!(f, "{}", other),
            },
            Expr::Binary { op, lhs, rhs } => {
                let op = match op {
                    BinOp::Add => "+",
                    BinOp::Sub => "-",
                    BinOp::Mul => "*",
                    BinOp::Div => "/",
                };
                write!(f, "({} {} {})", lhs, op, rhs)
            }
        }
    }
}

struct Parser {
    tokens: Vec<(ExprToken, String)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<ExprToken> {
        self.tokens.get(self.pos).map(|(kind, _)| *kind)
    }

    fn next(&mut self) -> Option<(ExprToken, String)> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_binary(&mut self, min_precedence: u8) -> CResult<Expr> {
        let mut lhs = self.parse_primary()?;
        while let Some(op) = self.peek().and_then(binop_of) {
            if op.precedence() < min_precedence {
                break;
            }
            self.next();
            let rhs = self.parse_binary(op.precedence() + 1)?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_primary(&mut self) -> CResult<Expr> {
        match self.next() {
            Some((ExprToken::Ident, slice)) => Ok(Expr::Column(slice)),
            Some((ExprToken::LiteralInteger, slice)) => slice
                .parse::<i64>()
                .map(|i| Expr::Literal(Value::Integer(i)))
                .map_err(|e| Error::Parse(e.to_string())),
            Some((ExprToken::LiteralFloat, slice)) => slice
                .parse::<f64>()
                .map(|v| Expr::Literal(Value::Float(v)))
                .map_err(|e| Error::Parse(e.to_string())),
            Some((ExprToken::QuotedString, slice)) => {
                Ok(Expr::Literal(Value::String(slice[1..slice.len() - 1].to_owned())))
            }
            Some((ExprToken::Minus, _)) => {
                // Unary minus: fold into a 0 - x subtraction.
                let inner = self.parse_primary()?;
                Ok(Expr::Binary {
                    op: BinOp::Sub,
                    lhs: Box::new(Expr::Literal(Value::Integer(0))),
                    rhs: Box::new(inner),
                })
            }
            Some((ExprToken::LParen, _)) => {
                let inner = self.parse_binary(0)?;
                match self.next() {
                    Some((ExprToken::RParen, _)) => Ok(inner),
                    _ => Err(Error::Parse("expected closing parenthesis".into())),
                }
            }
            other => Err(Error::Parse(format!("unexpected token in expression: {:?}", other))),
        }
    }
}

fn binop_of(token: ExprToken) -> Option<BinOp> {
    match token {
        ExprToken::Plus => Some(BinOp::Add),
        ExprToken::Minus => Some(BinOp::Sub),
        ExprToken::Multiply => Some(BinOp::Mul),
        ExprToken::Divide => Some(BinOp::Div),
        _ => None,
    }
}
