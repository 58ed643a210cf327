//! Pratt parser producing the condition AST.

use super::ExprError;
use super::lexer::{Spanned, Token};
use serde_json::Value;

/// Parsed condition expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// The single bound variable, `value`.
    Var,
    Member(Box<Expr>, String),
    Index(Box<Expr>, usize),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    cursor: usize,
}

pub fn parse_tokens(tokens: Vec<Spanned>) -> Result<Expr, ExprError> {
    let mut parser = Parser { tokens, cursor: 0 };
    let expr = parser.parse_or()?;
    if let Some(extra) = parser.peek() {
        return Err(ExprError::UnexpectedToken {
            found: extra.token.to_string(),
            pos: extra.pos,
        });
    }
    Ok(expr)
}

impl Parser {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.cursor)
    }

    fn advance(&mut self) -> Result<Spanned, ExprError> {
        let spanned = self
            .tokens
            .get(self.cursor)
            .cloned()
            .ok_or(ExprError::UnexpectedEof)?;
        self.cursor += 1;
        Ok(spanned)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek().map(|s| &s.token) == Some(expected) {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExprError> {
        let spanned = self.advance()?;
        if spanned.token == expected {
            Ok(())
        } else {
            Err(ExprError::UnexpectedToken {
                found: spanned.token.to_string(),
                pos: spanned.pos,
            })
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::OrOr) {
            let right = self.parse_and()?;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_comparison()?;
        while self.eat(&Token::AndAnd) {
            let right = self.parse_comparison()?;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    // Comparisons do not chain: `a < b < c` is rejected, matching the
    // restricted grammar rather than silently misparsing.
    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let left = self.parse_unary()?;
        let op = match self.peek().map(|s| &s.token) {
            Some(Token::EqEq) => Some(BinOp::Eq),
            Some(Token::NotEq) => Some(BinOp::Ne),
            Some(Token::Lt) => Some(BinOp::Lt),
            Some(Token::Le) => Some(BinOp::Le),
            Some(Token::Gt) => Some(BinOp::Gt),
            Some(Token::Ge) => Some(BinOp::Ge),
            _ => None,
        };
        match op {
            Some(op) => {
                self.cursor += 1;
                let right = self.parse_unary()?;
                Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
            }
            None => Ok(left),
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Bang) {
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        if self.eat(&Token::Minus) {
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let spanned = self.advance()?;
                match spanned.token {
                    Token::Ident(name) => {
                        expr = Expr::Member(Box::new(expr), name);
                    }
                    other => {
                        return Err(ExprError::UnexpectedToken {
                            found: other.to_string(),
                            pos: spanned.pos,
                        });
                    }
                }
            } else if self.eat(&Token::LBracket) {
                let spanned = self.advance()?;
                match spanned.token {
                    Token::Number(n) if n >= 0.0 && n.fract() == 0.0 => {
                        self.expect(Token::RBracket)?;
                        expr = Expr::Index(Box::new(expr), n as usize);
                    }
                    Token::Str(key) => {
                        self.expect(Token::RBracket)?;
                        expr = Expr::Member(Box::new(expr), key);
                    }
                    other => {
                        return Err(ExprError::UnexpectedToken {
                            found: other.to_string(),
                            pos: spanned.pos,
                        });
                    }
                }
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let spanned = self.advance()?;
        match spanned.token {
            Token::Number(n) => Ok(Expr::Literal(number_value(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Bool(b) => Ok(Expr::Literal(Value::Bool(b))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::Ident(name) if name == "value" => Ok(Expr::Var),
            Token::Ident(name) => Err(ExprError::UnknownIdentifier {
                name,
                pos: spanned.pos,
            }),
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            other => Err(ExprError::UnexpectedToken {
                found: other.to_string(),
                pos: spanned.pos,
            }),
        }
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}
