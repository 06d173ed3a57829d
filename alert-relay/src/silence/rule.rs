//! Boolean rule expressions for subscription silences.
//!
//! A rule is evaluated against a JSON object environment built from a
//! receiver's attributes, e.g. `(ID == 12) and (Type == 'pagerduty')`.
//!
//! Supported syntax:
//! - literals: numbers, `'single'` / `"double"` quoted strings, `true`,
//!   `false`, `nil`, array literals `[1, 2]`
//! - identifiers resolved from the environment (unknown names are `nil`),
//!   member access `a.b` and indexing `a[0]`, `a['key']`
//! - `not` / `!`, unary `-`
//! - `* / %`, `+ -` (`+` also concatenates strings)
//! - `== != < <= > >=`, `in`, `contains`, `startsWith`, `endsWith`
//! - `and` / `&&`, `or` / `||` with short-circuit evaluation
//!
//! `not` binds looser than comparisons: `not ID == 1` is `not (ID == 1)`.
//!
//! Expressions nest at most [`MAX_DEPTH`] levels. Deeper rules are rejected
//! while parsing.

use serde_json::{Number, Value};

/// Maximum nesting of a parsed rule: parentheses, unary operators, indexing
/// and each operator of a binary chain count one level.
pub const MAX_DEPTH: usize = 100;

/// Error type for rule parsing and evaluation failures.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RuleError {
    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unterminated string literal starting at position {0}")]
    UnterminatedString(usize),

    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("invalid operation: {op} on {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: String,
        right: String,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("rule evaluation result is not boolean: {0}")]
    NotBoolean(String),

    #[error("rule nesting exceeds {0} levels")]
    TooDeep(usize),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Str(String),
    Ident(String),
    Sym(&'static str),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Num(n) => n.to_string(),
            Token::Str(s) => format!("'{s}'"),
            Token::Ident(s) => s.clone(),
            Token::Sym(s) => (*s).to_string(),
        }
    }
}

const SYMBOLS: &[&str] = &[
    "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "+", "-", "*", "/", "%", "(", ")", "[",
    "]", ",", ".",
];

fn tokenize(input: &str) -> Result<Vec<Token>, RuleError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            if i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let text: String = chars[start..i].iter().collect();
            let num = text
                .parse::<f64>()
                .map_err(|_| RuleError::UnexpectedToken(text.clone()))?;
            tokens.push(Token::Num(num));
            continue;
        }

        if c == '\'' || c == '"' {
            let start = i;
            let mut s = String::new();
            i += 1;
            loop {
                let Some(&ch) = chars.get(i) else {
                    return Err(RuleError::UnterminatedString(start));
                };
                i += 1;
                match ch {
                    '\\' => {
                        let Some(&escaped) = chars.get(i) else {
                            return Err(RuleError::UnterminatedString(start));
                        };
                        i += 1;
                        s.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            'r' => '\r',
                            other => other,
                        });
                    }
                    ch if ch == c => break,
                    ch => s.push(ch),
                }
            }
            tokens.push(Token::Str(s));
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
        let Some(sym) = SYMBOLS.iter().find(|s| rest.starts_with(**s)) else {
            return Err(RuleError::UnexpectedChar { ch: c, pos: i });
        };
        tokens.push(Token::Sym(sym));
        i += sym.len();
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Contains,
    StartsWith,
    EndsWith,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
            BinaryOp::Contains => "contains",
            BinaryOp::StartsWith => "startsWith",
            BinaryOp::EndsWith => "endsWith",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Array(Vec<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn enter(&mut self) -> Result<(), RuleError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(RuleError::TooDeep(MAX_DEPTH));
        }
        Ok(())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat_sym(&mut self, sym: &str) -> bool {
        if matches!(self.peek(), Some(Token::Sym(s)) if *s == sym) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(s)) if s == word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_sym(&mut self, sym: &'static str) -> Result<(), RuleError> {
        match self.next() {
            Some(Token::Sym(s)) if s == sym => Ok(()),
            Some(other) => Err(RuleError::UnexpectedToken(other.describe())),
            None => Err(RuleError::UnexpectedEnd),
        }
    }

    fn parse(mut self) -> Result<Expr, RuleError> {
        let expr = self.parse_or()?;
        match self.next() {
            None => Ok(expr),
            Some(token) => Err(RuleError::UnexpectedToken(token.describe())),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, RuleError> {
        let mut left = self.parse_and()?;
        let depth = self.depth;
        while self.eat_word("or") || self.eat_sym("||") {
            self.enter()?;
            let right = self.parse_and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        self.depth = depth;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, RuleError> {
        let mut left = self.parse_not()?;
        let depth = self.depth;
        while self.eat_word("and") || self.eat_sym("&&") {
            self.enter()?;
            let right = self.parse_not()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        self.depth = depth;
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, RuleError> {
        if self.eat_word("not") || self.eat_sym("!") {
            self.enter()?;
            let inner = self.parse_not()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn comparison_op(&self) -> Option<BinaryOp> {
        match self.peek()? {
            Token::Sym("==") => Some(BinaryOp::Eq),
            Token::Sym("!=") => Some(BinaryOp::Ne),
            Token::Sym("<") => Some(BinaryOp::Lt),
            Token::Sym("<=") => Some(BinaryOp::Le),
            Token::Sym(">") => Some(BinaryOp::Gt),
            Token::Sym(">=") => Some(BinaryOp::Ge),
            Token::Ident(word) => match word.as_str() {
                "in" => Some(BinaryOp::In),
                "contains" => Some(BinaryOp::Contains),
                "startsWith" => Some(BinaryOp::StartsWith),
                "endsWith" => Some(BinaryOp::EndsWith),
                _ => None,
            },
            _ => None,
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, RuleError> {
        let mut left = self.parse_additive()?;
        let depth = self.depth;
        while let Some(op) = self.comparison_op() {
            self.pos += 1;
            self.enter()?;
            let right = self.parse_additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        self.depth = depth;
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, RuleError> {
        let mut left = self.parse_multiplicative()?;
        let depth = self.depth;
        loop {
            let op = if self.eat_sym("+") {
                BinaryOp::Add
            } else if self.eat_sym("-") {
                BinaryOp::Sub
            } else {
                self.depth = depth;
                return Ok(left);
            };
            self.enter()?;
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, RuleError> {
        let mut left = self.parse_unary()?;
        let depth = self.depth;
        loop {
            let op = if self.eat_sym("*") {
                BinaryOp::Mul
            } else if self.eat_sym("/") {
                BinaryOp::Div
            } else if self.eat_sym("%") {
                BinaryOp::Rem
            } else {
                self.depth = depth;
                return Ok(left);
            };
            self.enter()?;
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, RuleError> {
        if self.eat_sym("-") {
            self.enter()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, RuleError> {
        let mut expr = self.parse_primary()?;
        let depth = self.depth;
        loop {
            if self.eat_sym(".") {
                self.enter()?;
                match self.next() {
                    Some(Token::Ident(field)) => expr = Expr::Member(Box::new(expr), field),
                    Some(other) => return Err(RuleError::UnexpectedToken(other.describe())),
                    None => return Err(RuleError::UnexpectedEnd),
                }
            } else if self.eat_sym("[") {
                self.enter()?;
                let index = self.parse_or()?;
                self.expect_sym("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                self.depth = depth;
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, RuleError> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Expr::Literal(number(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Ident(word)) => Ok(match word.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "nil" | "null" => Expr::Literal(Value::Null),
                _ => Expr::Ident(word),
            }),
            Some(Token::Sym("(")) => {
                self.enter()?;
                let inner = self.parse_or()?;
                self.expect_sym(")")?;
                self.depth -= 1;
                Ok(inner)
            }
            Some(Token::Sym("[")) => {
                self.enter()?;
                let mut items = Vec::new();
                if !self.eat_sym("]") {
                    loop {
                        items.push(self.parse_or()?);
                        if self.eat_sym("]") {
                            break;
                        }
                        self.expect_sym(",")?;
                    }
                }
                self.depth -= 1;
                Ok(Expr::Array(items))
            }
            Some(other) => Err(RuleError::UnexpectedToken(other.describe())),
            None => Err(RuleError::UnexpectedEnd),
        }
    }
}

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "nil".to_string(),
        other => other.to_string(),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

fn mismatch(op: BinaryOp, left: &Value, right: &Value) -> RuleError {
    RuleError::TypeMismatch {
        op: op.symbol(),
        left: describe(left),
        right: describe(right),
    }
}

fn as_bool(op: BinaryOp, value: &Value, other: &Value) -> Result<bool, RuleError> {
    value.as_bool().ok_or_else(|| mismatch(op, value, other))
}

fn eval(expr: &Expr, env: &Value) -> Result<Value, RuleError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Ident(name) => Ok(env.get(name).cloned().unwrap_or(Value::Null)),
        Expr::Member(target, field) => {
            let target = eval(target, env)?;
            Ok(target.get(field).cloned().unwrap_or(Value::Null))
        }
        Expr::Index(target, index) => {
            let target = eval(target, env)?;
            let index = eval(index, env)?;
            let found = match (&target, &index) {
                (Value::Array(items), Value::Number(n)) => n
                    .as_u64()
                    .and_then(|i| usize::try_from(i).ok())
                    .and_then(|i| items.get(i)),
                (Value::Object(map), Value::String(key)) => map.get(key),
                _ => None,
            };
            Ok(found.cloned().unwrap_or(Value::Null))
        }
        Expr::Array(items) => items
            .iter()
            .map(|item| eval(item, env))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Expr::Not(inner) => {
            let value = eval(inner, env)?;
            value
                .as_bool()
                .map(|b| Value::Bool(!b))
                .ok_or_else(|| RuleError::TypeMismatch {
                    op: "not",
                    left: describe(&value),
                    right: "nothing".to_string(),
                })
        }
        Expr::Neg(inner) => {
            let value = eval(inner, env)?;
            value
                .as_f64()
                .map(|n| number(-n))
                .ok_or_else(|| RuleError::TypeMismatch {
                    op: "-",
                    left: describe(&value),
                    right: "nothing".to_string(),
                })
        }
        Expr::Binary(op @ (BinaryOp::And | BinaryOp::Or), left, right) => {
            let lhs = eval(left, env)?;
            let lhs_bool = as_bool(*op, &lhs, &Value::Null)?;
            match (op, lhs_bool) {
                (BinaryOp::And, false) => return Ok(Value::Bool(false)),
                (BinaryOp::Or, true) => return Ok(Value::Bool(true)),
                _ => {}
            }
            let rhs = eval(right, env)?;
            Ok(Value::Bool(as_bool(*op, &rhs, &lhs)?))
        }
        Expr::Binary(op, left, right) => {
            let lhs = eval(left, env)?;
            let rhs = eval(right, env)?;
            apply_binary(*op, &lhs, &rhs)
        }
    }
}

fn apply_binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, RuleError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(lhs, rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(lhs, rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (lhs, rhs) {
                (Value::String(l), Value::String(r)) => l.partial_cmp(r),
                _ => match (lhs.as_f64(), rhs.as_f64()) {
                    (Some(l), Some(r)) => l.partial_cmp(&r),
                    _ => None,
                },
            };
            let ordering = ordering.ok_or_else(|| mismatch(op, lhs, rhs))?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::In => match rhs {
            Value::Array(items) => Ok(Value::Bool(items.iter().any(|i| values_equal(lhs, i)))),
            Value::Object(map) => match lhs {
                Value::String(key) => Ok(Value::Bool(map.contains_key(key))),
                _ => Err(mismatch(op, lhs, rhs)),
            },
            Value::Null => Ok(Value::Bool(false)),
            _ => Err(mismatch(op, lhs, rhs)),
        },
        BinaryOp::Contains | BinaryOp::StartsWith | BinaryOp::EndsWith => {
            let (Value::String(l), Value::String(r)) = (lhs, rhs) else {
                return Err(mismatch(op, lhs, rhs));
            };
            Ok(Value::Bool(match op {
                BinaryOp::Contains => l.contains(r.as_str()),
                BinaryOp::StartsWith => l.starts_with(r.as_str()),
                _ => l.ends_with(r.as_str()),
            }))
        }
        BinaryOp::Add => match (lhs, rhs) {
            (Value::String(l), Value::String(r)) => Ok(Value::String(format!("{l}{r}"))),
            _ => arithmetic(op, lhs, rhs),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, lhs, rhs)
        }
        BinaryOp::And | BinaryOp::Or => Err(mismatch(op, lhs, rhs)),
    }
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, RuleError> {
    let (Some(l), Some(r)) = (lhs.as_f64(), rhs.as_f64()) else {
        return Err(mismatch(op, lhs, rhs));
    };
    let result = match op {
        BinaryOp::Add => l + r,
        BinaryOp::Sub => l - r,
        BinaryOp::Mul => l * r,
        BinaryOp::Div | BinaryOp::Rem if r == 0.0 => return Err(RuleError::DivisionByZero),
        BinaryOp::Div => l / r,
        BinaryOp::Rem => l % r,
        _ => return Err(mismatch(op, lhs, rhs)),
    };
    Ok(number(result))
}

/// Evaluate `rule` against `env` and return the resulting value.
pub fn evaluate(rule: &str, env: &Value) -> Result<Value, RuleError> {
    let expr = Parser::new(tokenize(rule)?).parse()?;
    eval(&expr, env)
}

/// Evaluate `rule` against `env`, requiring a boolean result.
pub fn evaluate_bool(rule: &str, env: &Value) -> Result<bool, RuleError> {
    let value = evaluate(rule, env)?;
    value
        .as_bool()
        .ok_or_else(|| RuleError::NotBoolean(describe(&value)))
}
