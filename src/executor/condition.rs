//! Sandboxed evaluator for edge guard expressions.
//!
//! Conditional edges carry a boolean expression over the source node's output
//! and shared memory, e.g. `status == "ok" && attempts < 3`. The evaluator is
//! deliberately small and closed: no function calls, no assignment, no
//! user-extensible operators. Exponentiation is bounded so a hostile
//! expression cannot trigger computational blow-up, and values under
//! secret-looking keys are redacted before they can appear in logs.
//!
//! Grammar (precedence low to high):
//!
//! ```text
//! expr  := or
//! or    := and ( "||" and )*
//! and   := not ( "&&" not )*
//! not   := "!" not | cmp
//! cmp   := sum ( ("==" | "!=" | "<=" | ">=" | "<" | ">") sum )?
//! sum   := term ( ("+" | "-") term )*
//! term  := pow ( ("*" | "/" | "%") pow )*
//! pow   := unary ( "^" pow )?            // right-assoc, bounded
//! unary := "-" unary | atom
//! atom  := number | string | true | false | null
//!        | ident ( "." ident )* | "(" expr ")"
//! ```
//!
//! Identifiers resolve against the node output first, then shared memory;
//! the roots `output` and `memory` address each map explicitly. Missing keys
//! resolve to `null` so routing expressions stay total.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

/// Largest exponent magnitude the `^` operator accepts.
const MAX_EXPONENT: f64 = 32.0;
/// Largest base magnitude the `^` operator accepts.
const MAX_POW_BASE: f64 = 1e9;

/// Key fragments that mark a value as secret for logging purposes.
const SECRET_KEY_MARKERS: [&str; 5] = ["secret", "token", "password", "api_key", "credential"];

/// Errors from parsing or evaluating a guard expression.
#[derive(Debug, Error, Diagnostic)]
pub enum ConditionError {
    #[error("parse error at byte {position}: {message}")]
    #[diagnostic(code(skeinrun::condition::parse))]
    Parse { position: usize, message: String },

    #[error("type error: {0}")]
    #[diagnostic(code(skeinrun::condition::type_error))]
    Type(String),

    #[error("division by zero")]
    #[diagnostic(code(skeinrun::condition::division_by_zero))]
    DivisionByZero,

    #[error("exponentiation out of bounds (|base| <= 1e9, |exponent| <= 32)")]
    #[diagnostic(
        code(skeinrun::condition::exponent_bounds),
        help("The evaluator bounds `^` to prevent computational blow-up.")
    )]
    ExponentOutOfBounds,
}

/// Resolution scope for identifiers: node output shadows shared memory.
#[derive(Clone, Copy, Debug)]
pub struct ConditionScope<'a> {
    pub output: &'a FxHashMap<String, Value>,
    pub memory: &'a FxHashMap<String, Value>,
}

impl<'a> ConditionScope<'a> {
    #[must_use]
    pub fn new(output: &'a FxHashMap<String, Value>, memory: &'a FxHashMap<String, Value>) -> Self {
        Self { output, memory }
    }

    fn resolve_root(&self, name: &str) -> Value {
        match name {
            "output" => Value::Object(to_object(self.output)),
            "memory" => Value::Object(to_object(self.memory)),
            _ => self
                .output
                .get(name)
                .or_else(|| self.memory.get(name))
                .cloned()
                .unwrap_or(Value::Null),
        }
    }
}

fn to_object(map: &FxHashMap<String, Value>) -> serde_json::Map<String, Value> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

/// Evaluate a guard expression to a boolean.
///
/// Truthiness of non-boolean results follows JSON conventions: zero, empty
/// strings/containers, and null are false; everything else is true.
pub fn evaluate(expr: &str, scope: &ConditionScope<'_>) -> Result<bool, ConditionError> {
    let value = evaluate_value(expr, scope)?;
    Ok(truthy(&value))
}

/// Evaluate a guard expression to its raw value.
pub fn evaluate_value(expr: &str, scope: &ConditionScope<'_>) -> Result<Value, ConditionError> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser { tokens, cursor: 0 };
    let ast = parser.parse_expr()?;
    parser.expect_end()?;
    eval(&ast, scope)
}

/// Whether a key looks like it holds a secret.
#[must_use]
pub fn is_secret_key(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    SECRET_KEY_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Copy of a map with secret-looking values replaced, safe to log.
#[must_use]
pub fn redact_map(map: &FxHashMap<String, Value>) -> FxHashMap<String, Value> {
    map.iter()
        .map(|(key, value)| {
            let rendered = if is_secret_key(key) {
                Value::String("[redacted]".to_string())
            } else {
                value.clone()
            };
            (key.clone(), rendered)
        })
        .collect()
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(entries) => !entries.is_empty(),
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    LParen,
    RParen,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Not,
    AndAnd,
    OrOr,
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, ConditionError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0usize;

    let at = |i: usize| chars.get(i).map(|&(_, c)| c);
    let pos = |i: usize| chars.get(i).map_or(input.len(), |&(p, _)| p);

    while i < chars.len() {
        let c = chars[i].1;
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push((pos(i), Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((pos(i), Token::RParen));
                i += 1;
            }
            '.' => {
                tokens.push((pos(i), Token::Dot));
                i += 1;
            }
            '+' => {
                tokens.push((pos(i), Token::Plus));
                i += 1;
            }
            '-' => {
                tokens.push((pos(i), Token::Minus));
                i += 1;
            }
            '*' => {
                tokens.push((pos(i), Token::Star));
                i += 1;
            }
            '/' => {
                tokens.push((pos(i), Token::Slash));
                i += 1;
            }
            '%' => {
                tokens.push((pos(i), Token::Percent));
                i += 1;
            }
            '^' => {
                tokens.push((pos(i), Token::Caret));
                i += 1;
            }
            '&' => {
                if at(i + 1) == Some('&') {
                    tokens.push((pos(i), Token::AndAnd));
                    i += 2;
                } else {
                    return Err(parse_err(pos(i), "expected '&&'"));
                }
            }
            '|' => {
                if at(i + 1) == Some('|') {
                    tokens.push((pos(i), Token::OrOr));
                    i += 2;
                } else {
                    return Err(parse_err(pos(i), "expected '||'"));
                }
            }
            '=' => {
                if at(i + 1) == Some('=') {
                    tokens.push((pos(i), Token::Eq));
                    i += 2;
                } else {
                    return Err(parse_err(
                        pos(i),
                        "expected '==' (assignment is not supported)",
                    ));
                }
            }
            '!' => {
                if at(i + 1) == Some('=') {
                    tokens.push((pos(i), Token::Ne));
                    i += 2;
                } else {
                    tokens.push((pos(i), Token::Not));
                    i += 1;
                }
            }
            '<' => {
                if at(i + 1) == Some('=') {
                    tokens.push((pos(i), Token::Le));
                    i += 2;
                } else {
                    tokens.push((pos(i), Token::Lt));
                    i += 1;
                }
            }
            '>' => {
                if at(i + 1) == Some('=') {
                    tokens.push((pos(i), Token::Ge));
                    i += 2;
                } else {
                    tokens.push((pos(i), Token::Gt));
                    i += 1;
                }
            }
            '"' | '\'' => {
                let quote = c;
                let start = pos(i);
                i += 1;
                let mut literal = String::new();
                loop {
                    match at(i) {
                        None => return Err(parse_err(start, "unterminated string literal")),
                        Some(ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            match at(i + 1) {
                                Some(esc) => literal.push(esc),
                                None => {
                                    return Err(parse_err(start, "unterminated string literal"));
                                }
                            }
                            i += 2;
                        }
                        Some(ch) => {
                            literal.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push((start, Token::Str(literal)));
            }
            '0'..='9' => {
                let start = pos(i);
                while at(i).is_some_and(|ch| ch.is_ascii_digit() || ch == '.') {
                    i += 1;
                }
                let text = &input[start..pos(i)];
                let number = text
                    .parse::<f64>()
                    .map_err(|_| parse_err(start, format!("invalid number {text:?}")))?;
                tokens.push((start, Token::Number(number)));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = pos(i);
                while at(i).is_some_and(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
                    i += 1;
                }
                let word = &input[start..pos(i)];
                let token = match word {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    "and" => Token::AndAnd,
                    "or" => Token::OrOr,
                    "not" => Token::Not,
                    _ => Token::Ident(word.to_string()),
                };
                tokens.push((start, token));
            }
            other => return Err(parse_err(pos(i), format!("unexpected character {other:?}"))),
        }
    }

    Ok(tokens)
}

fn parse_err(position: usize, message: impl Into<String>) -> ConditionError {
    ConditionError::Parse {
        position,
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
enum Ast {
    Literal(Value),
    /// Identifier path, e.g. `memory.user.name` → ["memory", "user", "name"].
    Path(Vec<String>),
    Unary(UnaryOp, Box<Ast>),
    Binary(BinaryOp, Box<Ast>, Box<Ast>),
}

#[derive(Clone, Copy, Debug)]
enum UnaryOp {
    Not,
    Neg,
}

#[derive(Clone, Copy, Debug)]
enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    cursor: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(|(_, t)| t)
    }

    fn next(&mut self) -> Option<(usize, Token)> {
        let item = self.tokens.get(self.cursor).cloned();
        if item.is_some() {
            self.cursor += 1;
        }
        item
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.cursor)
            .or_else(|| self.tokens.last())
            .map_or(0, |(pos, _)| *pos)
    }

    fn expect_end(&self) -> Result<(), ConditionError> {
        if self.cursor == self.tokens.len() {
            Ok(())
        } else {
            Err(parse_err(self.position(), "trailing tokens"))
        }
    }

    fn parse_expr(&mut self) -> Result<Ast, ConditionError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Ast, ConditionError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::OrOr) {
            self.next();
            let right = self.parse_and()?;
            left = Ast::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Ast, ConditionError> {
        let mut left = self.parse_not()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.next();
            let right = self.parse_not()?;
            left = Ast::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Ast, ConditionError> {
        if self.peek() == Some(&Token::Not) {
            self.next();
            let operand = self.parse_not()?;
            return Ok(Ast::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<Ast, ConditionError> {
        let left = self.parse_sum()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Ge) => BinaryOp::Ge,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Gt) => BinaryOp::Gt,
            _ => return Ok(left),
        };
        self.next();
        let right = self.parse_sum()?;
        Ok(Ast::Binary(op, Box::new(left), Box::new(right)))
    }

    fn parse_sum(&mut self) -> Result<Ast, ConditionError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.next();
            let right = self.parse_term()?;
            left = Ast::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_term(&mut self) -> Result<Ast, ConditionError> {
        let mut left = self.parse_pow()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.next();
            let right = self.parse_pow()?;
            left = Ast::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_pow(&mut self) -> Result<Ast, ConditionError> {
        let base = self.parse_unary()?;
        if self.peek() == Some(&Token::Caret) {
            self.next();
            // Right associative: 2 ^ 3 ^ 2 is 2 ^ (3 ^ 2).
            let exponent = self.parse_pow()?;
            return Ok(Ast::Binary(
                BinaryOp::Pow,
                Box::new(base),
                Box::new(exponent),
            ));
        }
        Ok(base)
    }

    fn parse_unary(&mut self) -> Result<Ast, ConditionError> {
        if self.peek() == Some(&Token::Minus) {
            self.next();
            let operand = self.parse_unary()?;
            return Ok(Ast::Unary(UnaryOp::Neg, Box::new(operand)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Ast, ConditionError> {
        let position = self.position();
        match self.next() {
            Some((_, Token::Number(n))) => Ok(Ast::Literal(
                serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number),
            )),
            Some((_, Token::Str(s))) => Ok(Ast::Literal(Value::String(s))),
            Some((_, Token::True)) => Ok(Ast::Literal(Value::Bool(true))),
            Some((_, Token::False)) => Ok(Ast::Literal(Value::Bool(false))),
            Some((_, Token::Null)) => Ok(Ast::Literal(Value::Null)),
            Some((_, Token::LParen)) => {
                let inner = self.parse_expr()?;
                match self.next() {
                    Some((_, Token::RParen)) => Ok(inner),
                    _ => Err(parse_err(position, "expected ')'")),
                }
            }
            Some((_, Token::Ident(first))) => {
                let mut path = vec![first];
                while self.peek() == Some(&Token::Dot) {
                    self.next();
                    match self.next() {
                        Some((_, Token::Ident(segment))) => path.push(segment),
                        _ => return Err(parse_err(position, "expected identifier after '.'")),
                    }
                }
                Ok(Ast::Path(path))
            }
            other => Err(parse_err(
                position,
                format!("expected a value, found {other:?}"),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn eval(ast: &Ast, scope: &ConditionScope<'_>) -> Result<Value, ConditionError> {
    match ast {
        Ast::Literal(value) => Ok(value.clone()),
        Ast::Path(path) => {
            let mut current = scope.resolve_root(&path[0]);
            for segment in &path[1..] {
                current = match current {
                    Value::Object(mut entries) => entries.remove(segment).unwrap_or(Value::Null),
                    _ => Value::Null,
                };
            }
            Ok(current)
        }
        Ast::Unary(op, operand) => {
            let value = eval(operand, scope)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                UnaryOp::Neg => {
                    let n = as_number(&value)?;
                    Ok(number(-n))
                }
            }
        }
        Ast::Binary(op, left, right) => eval_binary(*op, left, right, scope),
    }
}

fn eval_binary(
    op: BinaryOp,
    left: &Ast,
    right: &Ast,
    scope: &ConditionScope<'_>,
) -> Result<Value, ConditionError> {
    // Short-circuit the logical operators before evaluating the right side.
    match op {
        BinaryOp::And => {
            let lhs = eval(left, scope)?;
            if !truthy(&lhs) {
                return Ok(Value::Bool(false));
            }
            let rhs = eval(right, scope)?;
            return Ok(Value::Bool(truthy(&rhs)));
        }
        BinaryOp::Or => {
            let lhs = eval(left, scope)?;
            if truthy(&lhs) {
                return Ok(Value::Bool(true));
            }
            let rhs = eval(right, scope)?;
            return Ok(Value::Bool(truthy(&rhs)));
        }
        _ => {}
    }

    let lhs = eval(left, scope)?;
    let rhs = eval(right, scope)?;
    match op {
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(&lhs, &rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!loose_eq(&lhs, &rhs))),
        BinaryOp::Lt => compare(&lhs, &rhs).map(|ord| Value::Bool(ord.is_lt())),
        BinaryOp::Le => compare(&lhs, &rhs).map(|ord| Value::Bool(ord.is_le())),
        BinaryOp::Gt => compare(&lhs, &rhs).map(|ord| Value::Bool(ord.is_gt())),
        BinaryOp::Ge => compare(&lhs, &rhs).map(|ord| Value::Bool(ord.is_ge())),
        BinaryOp::Add => {
            // String concatenation when either side is a string.
            if let (Value::String(a), b) = (&lhs, &rhs) {
                return Ok(Value::String(format!("{a}{}", render(b))));
            }
            if let (a, Value::String(b)) = (&lhs, &rhs) {
                return Ok(Value::String(format!("{}{b}", render(a))));
            }
            Ok(number(as_number(&lhs)? + as_number(&rhs)?))
        }
        BinaryOp::Sub => Ok(number(as_number(&lhs)? - as_number(&rhs)?)),
        BinaryOp::Mul => Ok(number(as_number(&lhs)? * as_number(&rhs)?)),
        BinaryOp::Div => {
            let divisor = as_number(&rhs)?;
            if divisor == 0.0 {
                return Err(ConditionError::DivisionByZero);
            }
            Ok(number(as_number(&lhs)? / divisor))
        }
        BinaryOp::Rem => {
            let divisor = as_number(&rhs)?;
            if divisor == 0.0 {
                return Err(ConditionError::DivisionByZero);
            }
            Ok(number(as_number(&lhs)? % divisor))
        }
        BinaryOp::Pow => {
            let base = as_number(&lhs)?;
            let exponent = as_number(&rhs)?;
            if base.abs() > MAX_POW_BASE || exponent.abs() > MAX_EXPONENT {
                return Err(ConditionError::ExponentOutOfBounds);
            }
            Ok(number(base.powf(exponent)))
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Result<std::cmp::Ordering, ConditionError> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => {
            let (x, y) = (as_number(a)?, as_number(b)?);
            x.partial_cmp(&y)
                .ok_or_else(|| ConditionError::Type("cannot order NaN".to_string()))
        }
    }
}

fn as_number(value: &Value) -> Result<f64, ConditionError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ConditionError::Type("non-finite number".to_string())),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Null => Ok(0.0),
        other => Err(ConditionError::Type(format!(
            "expected a number, found {}",
            type_name(other)
        ))),
    }
}

fn number(n: f64) -> Value {
    serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope_with(
        output: &[(&str, Value)],
        memory: &[(&str, Value)],
    ) -> (FxHashMap<String, Value>, FxHashMap<String, Value>) {
        let to_map = |entries: &[(&str, Value)]| {
            entries
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect::<FxHashMap<_, _>>()
        };
        (to_map(output), to_map(memory))
    }

    fn check(expr: &str, output: &[(&str, Value)], memory: &[(&str, Value)]) -> bool {
        let (output, memory) = scope_with(output, memory);
        evaluate(expr, &ConditionScope::new(&output, &memory)).unwrap()
    }

    #[test]
    fn comparisons_and_logic() {
        assert!(check(
            "status == \"ok\" && attempts < 3",
            &[("status", json!("ok"))],
            &[("attempts", json!(2))],
        ));
        assert!(!check(
            "status == \"ok\" && attempts < 3",
            &[("status", json!("ok"))],
            &[("attempts", json!(5))],
        ));
        assert!(check("1 + 2 * 3 == 7", &[], &[]));
        assert!(check("not (false or false)", &[], &[]));
    }

    #[test]
    fn output_shadows_memory() {
        assert!(check(
            "flag == \"from_output\"",
            &[("flag", json!("from_output"))],
            &[("flag", json!("from_memory"))],
        ));
        assert!(check(
            "memory.flag == \"from_memory\"",
            &[("flag", json!("from_output"))],
            &[("flag", json!("from_memory"))],
        ));
    }

    #[test]
    fn missing_keys_resolve_to_null() {
        assert!(!check("nonexistent", &[], &[]));
        assert!(check("nonexistent == null", &[], &[]));
    }

    #[test]
    fn dotted_paths_descend_objects() {
        assert!(check(
            "user.role == \"admin\"",
            &[],
            &[("user", json!({"role": "admin"}))],
        ));
    }

    #[test]
    fn exponentiation_is_bounded() {
        let (output, memory) = scope_with(&[], &[]);
        let scope = ConditionScope::new(&output, &memory);
        assert!(evaluate("2 ^ 8 == 256", &scope).unwrap());
        let err = evaluate("2 ^ 64", &scope).unwrap_err();
        assert!(matches!(err, ConditionError::ExponentOutOfBounds));
        let err = evaluate("9999999999 ^ 2", &scope).unwrap_err();
        assert!(matches!(err, ConditionError::ExponentOutOfBounds));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let (output, memory) = scope_with(&[], &[]);
        let scope = ConditionScope::new(&output, &memory);
        assert!(matches!(
            evaluate("1 / 0", &scope).unwrap_err(),
            ConditionError::DivisionByZero
        ));
    }

    #[test]
    fn secret_keys_are_redacted() {
        let mut map = FxHashMap::default();
        map.insert("api_key".to_string(), json!("sk-12345"));
        map.insert("plain".to_string(), json!("visible"));
        let redacted = redact_map(&map);
        assert_eq!(redacted["api_key"], json!("[redacted]"));
        assert_eq!(redacted["plain"], json!("visible"));
    }

    #[test]
    fn parse_errors_carry_position() {
        let (output, memory) = scope_with(&[], &[]);
        let scope = ConditionScope::new(&output, &memory);
        assert!(matches!(
            evaluate("a = 1", &scope).unwrap_err(),
            ConditionError::Parse { .. }
        ));
        assert!(matches!(
            evaluate("(1 + 2", &scope).unwrap_err(),
            ConditionError::Parse { .. }
        ));
    }
}
