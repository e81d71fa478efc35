//! The expression language used by rule conditions and by `predicate` /
//! `counter` state items.
//!
//! A small recursive-descent parser and tree-walking interpreter over a
//! name → value environment. No function calls, no side effects.

mod eval;
mod lexer;
mod parser;

use std::str::FromStr;

use thiserror::Error;

use crate::observation::{Env, Value};
use parser::Expr;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },
    #[error("malformed number '{0}'")]
    MalformedNumber(String),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("invalid escape '\\{0}' in string literal")]
    InvalidEscape(char),
    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("cannot apply '{op}' to {lhs} and {rhs}")]
    TypeMismatch {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },
    #[error("cannot apply '{op}' to {operand}")]
    BadOperand {
        op: &'static str,
        operand: &'static str,
    },
}

/// A parsed, reusable predicate expression.
#[derive(Debug, Clone)]
pub struct Predicate {
    source: String,
    expr: Expr,
}

impl Predicate {
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let tokens = lexer::tokenize(source)?;
        let expr = parser::parse(tokens)?;
        Ok(Self {
            source: source.to_owned(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate to a value. Unknown identifiers resolve to integer zero.
    pub fn eval(&self, env: &Env) -> Result<Value, EvalError> {
        eval::eval(&self.expr, env)
    }

    pub fn eval_bool(&self, env: &Env) -> Result<bool, EvalError> {
        Ok(self.eval(env)?.is_truthy())
    }

    /// Total evaluation: an erroring predicate does not hold.
    pub fn holds(&self, env: &Env) -> bool {
        self.eval_bool(env).unwrap_or(false)
    }
}

impl FromStr for Predicate {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Predicate::parse(s)
    }
}
