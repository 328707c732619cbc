//! Expression Mini-Language
//!
//! Templates embed expressions (`{{ count * 2 }}`, `:class="item.kind"`,
//! `@click="add(item, $event)"`). The source framework compiled these to
//! host-language source text and evaluated it dynamically; here they are
//! parsed once into a typed AST and interpreted against a scope chain.
//!
//! Surface: literals, dotted paths with indexing, method calls, unary
//! `! -`, the usual binary operators, and — for inline event handlers —
//! statements (an expression, or an assignment `path = expr`).
//!
//! Scope resolution order: v-for loop frames innermost-first, then the
//! owning instance (data fields read through their reactive cells, so
//! evaluation performs dependency registration as a side effect), then
//! computed properties. `$event` is bound in a frame during dispatch.

use std::fmt;

use indexmap::IndexMap;
use thiserror::Error;

use crate::reactive::{observe, ObservedValue};
use crate::value::Value;

/// Runtime failure while evaluating an expression. Render-boundary code
/// logs these and degrades; they never unwind through the framework.
#[derive(Debug, Clone, Error)]
pub enum EvalError {
    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(String),
    #[error("`{0}` is not a method of this component")]
    UnknownMethod(String),
    #[error("expression is not callable")]
    NotCallable,
    #[error("invalid assignment target")]
    InvalidAssignmentTarget,
    #[error("unknown component tag `{0}`")]
    UnknownComponent(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Ident(String),
    /// `base.field`
    Member(Box<Expr>, String),
    /// `base[index]`
    Index(Box<Expr>, Box<Expr>),
    /// `callee(args...)` — the callee must name a component method.
    Call(Box<Expr>, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

/// An inline-handler statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    /// `path = expr`
    Assign(Expr, Expr),
}

/// Parse failure, with a byte offset into the expression source.
#[derive(Debug, Clone, Error)]
#[error("{message} (offset {offset})")]
pub struct ExprError {
    pub message: String,
    pub offset: usize,
}

fn err<T>(message: impl Into<String>, offset: usize) -> Result<T, ExprError> {
    Err(ExprError {
        message: message.into(),
        offset,
    })
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    tokens: Vec<(Tok, usize)>,
}

const PUNCTS: &[&str] = &[
    "==", "!=", "<=", ">=", "&&", "||", "(", ")", "[", "]", ".", ",", "+", "-", "*", "/", "%",
    "<", ">", "!", "=",
];

impl<'a> Lexer<'a> {
    fn tokenize(src: &'a str) -> Result<Vec<(Tok, usize)>, ExprError> {
        let mut lexer = Lexer {
            src,
            pos: 0,
            tokens: Vec::new(),
        };
        lexer.run()?;
        Ok(lexer.tokens)
    }

    fn run(&mut self) -> Result<(), ExprError> {
        while self.pos < self.src.len() {
            let rest = &self.src[self.pos..];
            let c = rest.chars().next().unwrap_or('\0');
            if c.is_whitespace() {
                self.pos += c.len_utf8();
                continue;
            }
            if c.is_ascii_digit() {
                self.number()?;
                continue;
            }
            if c == '"' || c == '\'' {
                self.string(c)?;
                continue;
            }
            if c.is_alphabetic() || c == '_' || c == '$' {
                self.ident();
                continue;
            }
            if let Some(p) = PUNCTS.iter().find(|p| rest.starts_with(**p)) {
                self.tokens.push((Tok::Punct(p), self.pos));
                self.pos += p.len();
                continue;
            }
            return err(format!("unexpected character `{c}`"), self.pos);
        }
        Ok(())
    }

    fn number(&mut self) -> Result<(), ExprError> {
        let start = self.pos;
        let bytes = self.src.as_bytes();
        while self.pos < bytes.len() && (bytes[self.pos].is_ascii_digit() || bytes[self.pos] == b'.')
        {
            // A dot followed by a non-digit is member access, not a decimal
            // point.
            if bytes[self.pos] == b'.'
                && !bytes
                    .get(self.pos + 1)
                    .is_some_and(|b| b.is_ascii_digit())
            {
                break;
            }
            self.pos += 1;
        }
        let text = &self.src[start..self.pos];
        match text.parse::<f64>() {
            Ok(n) => {
                self.tokens.push((Tok::Num(n), start));
                Ok(())
            }
            Err(_) => err(format!("invalid number `{text}`"), start),
        }
    }

    fn string(&mut self, quote: char) -> Result<(), ExprError> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        let mut chars = self.src[self.pos..].char_indices();
        while let Some((i, c)) = chars.next() {
            if c == quote {
                self.pos += i + 1;
                self.tokens.push((Tok::Str(out), start));
                return Ok(());
            }
            if c == '\\' {
                match chars.next() {
                    Some((_, esc)) => {
                        out.push(match esc {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                    }
                    None => break,
                }
            } else {
                out.push(c);
            }
        }
        err("unterminated string literal", start)
    }

    fn ident(&mut self) {
        let start = self.pos;
        let rest = &self.src[self.pos..];
        let end = rest
            .char_indices()
            .find(|(_, c)| !(c.is_alphanumeric() || *c == '_' || *c == '$'))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        self.pos += end;
        self.tokens
            .push((Tok::Ident(rest[..end].to_string()), start));
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<(Tok, usize)>,
    pos: usize,
    src_len: usize,
}

/// Parse one expression; trailing input is an error.
pub fn parse_expr(src: &str) -> Result<Expr, ExprError> {
    let mut parser = Parser::new(src)?;
    let expr = parser.expression()?;
    parser.expect_eof()?;
    Ok(expr)
}

/// Parse an inline-handler statement (expression or assignment).
pub fn parse_stmt(src: &str) -> Result<Stmt, ExprError> {
    let mut parser = Parser::new(src)?;
    let expr = parser.expression()?;
    let stmt = if parser.eat_punct("=") {
        if !is_assignable(&expr) {
            return err("invalid assignment target", 0);
        }
        let rhs = parser.expression()?;
        Stmt::Assign(expr, rhs)
    } else {
        Stmt::Expr(expr)
    };
    parser.expect_eof()?;
    Ok(stmt)
}

fn is_assignable(expr: &Expr) -> bool {
    matches!(expr, Expr::Ident(_) | Expr::Member(..) | Expr::Index(..))
}

impl Parser {
    fn new(src: &str) -> Result<Self, ExprError> {
        Ok(Self {
            tokens: Lexer::tokenize(src)?,
            pos: 0,
            src_len: src.len(),
        })
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, o)| *o)
            .unwrap_or(self.src_len)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Punct(q)) if *q == p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &'static str) -> Result<(), ExprError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            err(format!("expected `{p}`"), self.offset())
        }
    }

    fn expect_eof(&self) -> Result<(), ExprError> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            err("unexpected trailing input", self.offset())
        }
    }

    fn expression(&mut self) -> Result<Expr, ExprError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.and_expr()?;
        while self.eat_punct("||") {
            let rhs = self.and_expr()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.equality()?;
        while self.eat_punct("&&") {
            let rhs = self.equality()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.comparison()?;
        loop {
            let op = if self.eat_punct("==") {
                BinOp::Eq
            } else if self.eat_punct("!=") {
                BinOp::Ne
            } else {
                break;
            };
            let rhs = self.comparison()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.additive()?;
        loop {
            let op = if self.eat_punct("<=") {
                BinOp::Le
            } else if self.eat_punct(">=") {
                BinOp::Ge
            } else if self.eat_punct("<") {
                BinOp::Lt
            } else if self.eat_punct(">") {
                BinOp::Gt
            } else {
                break;
            };
            let rhs = self.additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = if self.eat_punct("+") {
                BinOp::Add
            } else if self.eat_punct("-") {
                BinOp::Sub
            } else {
                break;
            };
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.unary()?;
        loop {
            let op = if self.eat_punct("*") {
                BinOp::Mul
            } else if self.eat_punct("/") {
                BinOp::Div
            } else if self.eat_punct("%") {
                BinOp::Rem
            } else {
                break;
            };
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat_punct("!") {
            let inner = self.unary()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        if self.eat_punct("-") {
            let inner = self.unary()?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(inner)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_punct(".") {
                match self.next() {
                    Some(Tok::Ident(name)) => {
                        expr = Expr::Member(Box::new(expr), name);
                    }
                    _ => return err("expected field name after `.`", self.offset()),
                }
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat_punct("(") {
                let mut args = Vec::new();
                if !self.eat_punct(")") {
                    loop {
                        args.push(self.expression()?);
                        if self.eat_punct(")") {
                            break;
                        }
                        self.expect_punct(",")?;
                    }
                }
                expr = Expr::Call(Box::new(expr), args);
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        let offset = self.offset();
        match self.next() {
            Some(Tok::Num(n)) => Ok(Expr::Num(n)),
            Some(Tok::Str(s)) => Ok(Expr::Str(s)),
            Some(Tok::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" | "undefined" => Ok(Expr::Null),
                _ => Ok(Expr::Ident(name)),
            },
            Some(Tok::Punct("(")) => {
                let inner = self.expression()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            Some(other) => err(format!("unexpected token {other:?}"), offset),
            None => err("unexpected end of expression", offset),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// The instance-side half of name resolution. Implemented by the component
/// instance; kept as a trait so the expression layer stays independent of
/// the instance layer.
pub trait ScopeResolver {
    /// Resolve a root name: data field (through its reactive cell) or
    /// computed property. `None` means unknown.
    fn resolve_root(&self, name: &str) -> Option<ObservedValue>;

    /// Whether a component method with this name exists.
    fn has_method(&self, name: &str) -> bool;

    /// Invoke a component method with plain-value arguments.
    fn call_method(&self, name: &str, args: &[Value]) -> Result<Value, EvalError>;

    /// Assign to a root name (data field, adding one reactively if new).
    fn assign_root(&self, name: &str, value: Value) -> Result<(), EvalError>;
}

/// Scope chain for one evaluation: the instance resolver plus a stack of
/// loop/handler frames.
pub struct Scope<'a> {
    resolver: &'a dyn ScopeResolver,
    frames: Vec<IndexMap<String, ObservedValue>>,
}

impl<'a> Scope<'a> {
    pub fn new(resolver: &'a dyn ScopeResolver) -> Self {
        Self {
            resolver,
            frames: Vec::new(),
        }
    }

    pub fn with_frames(
        resolver: &'a dyn ScopeResolver,
        frames: Vec<IndexMap<String, ObservedValue>>,
    ) -> Self {
        Self { resolver, frames }
    }

    pub fn push_frame(&mut self, frame: IndexMap<String, ObservedValue>) {
        self.frames.push(frame);
    }

    pub fn pop_frame(&mut self) {
        self.frames.pop();
    }

    pub fn frames(&self) -> &[IndexMap<String, ObservedValue>] {
        &self.frames
    }

    fn lookup(&self, name: &str) -> Option<ObservedValue> {
        for frame in self.frames.iter().rev() {
            if let Some(v) = frame.get(name) {
                return Some(v.clone());
            }
        }
        self.resolver.resolve_root(name)
    }
}

/// Evaluate an expression against a scope.
pub fn eval(expr: &Expr, scope: &Scope<'_>) -> Result<ObservedValue, EvalError> {
    match expr {
        Expr::Null => Ok(ObservedValue::Scalar(Value::Null)),
        Expr::Bool(b) => Ok(ObservedValue::Scalar(Value::Bool(*b))),
        Expr::Num(n) => Ok(ObservedValue::Scalar(Value::Num(*n))),
        Expr::Str(s) => Ok(ObservedValue::Scalar(Value::Str(s.clone()))),
        Expr::Ident(name) => scope
            .lookup(name)
            .ok_or_else(|| EvalError::UnknownIdentifier(name.clone())),
        Expr::Member(base, field) => {
            let base = eval(base, scope)?;
            Ok(member(&base, field))
        }
        Expr::Index(base, index) => {
            let base = eval(base, scope)?;
            let index = eval(index, scope)?.snapshot();
            Ok(index_value(&base, &index))
        }
        Expr::Call(callee, args) => {
            let name = match &**callee {
                Expr::Ident(name) => name.clone(),
                _ => return Err(EvalError::NotCallable),
            };
            if !scope.resolver.has_method(&name) {
                return Err(EvalError::UnknownMethod(name));
            }
            let mut plain_args = Vec::with_capacity(args.len());
            for arg in args {
                plain_args.push(eval(arg, scope)?.snapshot());
            }
            let result = scope.resolver.call_method(&name, &plain_args)?;
            Ok(observe(result))
        }
        Expr::Unary(op, inner) => {
            let inner = eval(inner, scope)?;
            Ok(ObservedValue::Scalar(match op {
                UnaryOp::Not => Value::Bool(!inner.is_truthy()),
                UnaryOp::Neg => Value::Num(-inner.snapshot().as_number()),
            }))
        }
        Expr::Binary(op, lhs, rhs) => binary(*op, lhs, rhs, scope),
    }
}

fn member(base: &ObservedValue, field: &str) -> ObservedValue {
    match base {
        ObservedValue::Object(obj) => match obj.field(field) {
            Some(cell) => cell.get(),
            None => ObservedValue::Scalar(Value::Null),
        },
        ObservedValue::List(list) if field == "length" => {
            ObservedValue::Scalar(Value::Num(list.len() as f64))
        }
        ObservedValue::Scalar(Value::Str(s)) if field == "length" => {
            ObservedValue::Scalar(Value::Num(s.chars().count() as f64))
        }
        _ => ObservedValue::Scalar(Value::Null),
    }
}

fn index_value(base: &ObservedValue, index: &Value) -> ObservedValue {
    match base {
        ObservedValue::List(list) => {
            let i = index.as_number();
            if i.is_finite() && i >= 0.0 {
                list.get(i as usize)
                    .unwrap_or(ObservedValue::Scalar(Value::Null))
            } else {
                ObservedValue::Scalar(Value::Null)
            }
        }
        ObservedValue::Object(_) => member(base, &index.stringify()),
        ObservedValue::Scalar(_) => ObservedValue::Scalar(Value::Null),
    }
}

fn binary(op: BinOp, lhs: &Expr, rhs: &Expr, scope: &Scope<'_>) -> Result<ObservedValue, EvalError> {
    // Logical operators short-circuit and yield the deciding operand.
    if matches!(op, BinOp::And | BinOp::Or) {
        let left = eval(lhs, scope)?;
        let take_right = match op {
            BinOp::And => left.is_truthy(),
            _ => !left.is_truthy(),
        };
        return if take_right { eval(rhs, scope) } else { Ok(left) };
    }

    let left = eval(lhs, scope)?.snapshot();
    let right = eval(rhs, scope)?.snapshot();
    let out = match op {
        BinOp::Add => match (&left, &right) {
            (Value::Str(_), _) | (_, Value::Str(_)) => {
                Value::Str(format!("{}{}", left.stringify(), right.stringify()))
            }
            _ => Value::Num(left.as_number() + right.as_number()),
        },
        BinOp::Sub => Value::Num(left.as_number() - right.as_number()),
        BinOp::Mul => Value::Num(left.as_number() * right.as_number()),
        BinOp::Div => Value::Num(left.as_number() / right.as_number()),
        BinOp::Rem => Value::Num(left.as_number() % right.as_number()),
        BinOp::Eq => Value::Bool(left == right),
        BinOp::Ne => Value::Bool(left != right),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            Value::Bool(compare(op, &left, &right))
        }
        BinOp::And | BinOp::Or => unreachable!("handled above"),
    };
    Ok(ObservedValue::Scalar(out))
}

fn compare(op: BinOp, left: &Value, right: &Value) -> bool {
    if let (Value::Str(a), Value::Str(b)) = (left, right) {
        return match op {
            BinOp::Lt => a < b,
            BinOp::Le => a <= b,
            BinOp::Gt => a > b,
            _ => a >= b,
        };
    }
    let (a, b) = (left.as_number(), right.as_number());
    match op {
        BinOp::Lt => a < b,
        BinOp::Le => a <= b,
        BinOp::Gt => a > b,
        _ => a >= b,
    }
}

/// Execute an inline-handler statement.
pub fn exec(stmt: &Stmt, scope: &Scope<'_>) -> Result<ObservedValue, EvalError> {
    match stmt {
        Stmt::Expr(expr) => eval(expr, scope),
        Stmt::Assign(target, rhs) => {
            let value = eval(rhs, scope)?.snapshot();
            assign(target, value.clone(), scope)?;
            Ok(ObservedValue::Scalar(value))
        }
    }
}

pub(crate) fn assign(target: &Expr, value: Value, scope: &Scope<'_>) -> Result<(), EvalError> {
    match target {
        Expr::Ident(name) => scope.resolver.assign_root(name, value),
        Expr::Member(base, field) => {
            let base = eval(base, scope)?;
            crate::reactive::set(&base, field, value);
            Ok(())
        }
        Expr::Index(base, index) => {
            let base = eval(base, scope)?;
            let key = eval(index, scope)?.snapshot().stringify();
            crate::reactive::set(&base, &key, value);
            Ok(())
        }
        _ => Err(EvalError::InvalidAssignmentTarget),
    }
}

impl fmt::Display for Expr {
    /// Debug-oriented rendering; not guaranteed to round-trip.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
