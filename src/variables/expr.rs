//! Deferred expression language
//!
//! The body of a `lambda:` assignment is parsed by this small, closed
//! grammar instead of being executed as code:
//!
//! ```text
//! expr  := term (('+' | '-') term)*
//! term  := unary (('*' | '/' | '//' | '%') unary)*
//! unary := '-' unary | power
//! power := atom ('**' unary)?
//! atom  := INT | FLOAT | STRING | '(' expr ')' | '[' expr (',' expr)* ']' | call
//! call  := NAME ('.' NAME)? '(' args? ')'
//! ```
//!
//! Only the functions in `ALLOWED_FUNCTIONS` exist. Numeric semantics follow the
//! usual scripting conventions: `/` is true division, `//` floors, `%` takes
//! the sign of the divisor, and integer overflow is an error.

use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

use rand::Rng;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ExprError {
    #[error("unexpected character '{ch}' at position {position}")]
    UnexpectedChar { ch: char, position: usize },

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("invalid number literal '{literal}'")]
    InvalidNumber { literal: String },

    #[error("expected {expected}, found {found}")]
    Syntax { expected: String, found: String },

    #[error("unknown function '{name}' (allowed: {})", ALLOWED_FUNCTIONS.join(", "))]
    UnknownFunction { name: String },

    #[error("{function}() {details}")]
    BadArguments { function: String, details: String },

    #[error("unsupported operand types for {op}: {left} and {right}")]
    OperandTypes {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow")]
    Overflow,

    #[error("result is not a finite number")]
    NonFinite,

    #[error("expression nested deeper than {limit} levels")]
    TooDeep { limit: usize },
}

/// Nesting limit for parentheses, lists, calls, unary signs and operator
/// chains. Parsing and evaluation recurse once per level.
const MAX_DEPTH: usize = 128;

const ALLOWED_FUNCTIONS: &[&str] = &[
    "random.randint",
    "random.randrange",
    "random.uniform",
    "random.random",
    "random.choice",
    "min",
    "max",
    "abs",
    "round",
    "int",
    "float",
    "str",
];

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ExprValue>),
}

impl ExprValue {
    fn type_name(&self) -> &'static str {
        match self {
            ExprValue::Int(_) => "int",
            ExprValue::Float(_) => "float",
            ExprValue::Str(_) => "str",
            ExprValue::List(_) => "list",
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            ExprValue::Int(i) => Some(*i as f64),
            ExprValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for ExprValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprValue::Int(i) => write!(f, "{}", i),
            ExprValue::Float(x) => write!(f, "{}", format_float(*x)),
            ExprValue::Str(s) => f.write_str(s),
            ExprValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Whole floats keep a trailing `.0` so they stay distinguishable from ints.
pub(crate) fn format_float(x: f64) -> String {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e16 {
        format!("{:.1}", x)
    } else {
        format!("{}", x)
    }
}

// ============================================================================
// TOKENIZER
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Int(i) => write!(f, "{}", i),
            Token::Float(x) => write!(f, "{}", x),
            Token::Str(s) => write!(f, "'{}'", s),
            Token::Name(n) => f.write_str(n),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::LBracket => f.write_str("'['"),
            Token::RBracket => f.write_str("']'"),
            Token::Comma => f.write_str("','"),
            Token::Dot => f.write_str("'.'"),
            Token::Plus => f.write_str("'+'"),
            Token::Minus => f.write_str("'-'"),
            Token::Star => f.write_str("'*'"),
            Token::StarStar => f.write_str("'**'"),
            Token::Slash => f.write_str("'/'"),
            Token::SlashSlash => f.write_str("'//'"),
            Token::Percent => f.write_str("'%'"),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(i, ch)) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' => tokens.push(lex_number(&mut chars, source)?),
            '.' => {
                // ".5" is a float, a lone '.' is attribute access
                let next_is_digit = source[i + 1..].starts_with(|c: char| c.is_ascii_digit());
                if next_is_digit {
                    tokens.push(lex_number(&mut chars, source)?);
                } else {
                    chars.next();
                    tokens.push(Token::Dot);
                }
            }
            '\'' | '"' => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == ch {
                        closed = true;
                        break;
                    }
                    text.push(c);
                }
                if !closed {
                    return Err(ExprError::UnterminatedString);
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                let mut end = i;
                while let Some(&(j, c)) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        end = j + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Name(source[start..end].to_string()));
            }
            '(' | ')' | '[' | ']' | ',' | '+' | '-' | '%' => {
                chars.next();
                tokens.push(match ch {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    ',' => Token::Comma,
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    _ => Token::Percent,
                });
            }
            '*' | '/' => {
                chars.next();
                let doubled = chars.peek().map(|(_, c)| *c) == Some(ch);
                if doubled {
                    chars.next();
                }
                tokens.push(match (ch, doubled) {
                    ('*', false) => Token::Star,
                    ('*', true) => Token::StarStar,
                    ('/', false) => Token::Slash,
                    _ => Token::SlashSlash,
                });
            }
            other => {
                return Err(ExprError::UnexpectedChar {
                    ch: other,
                    position: i,
                })
            }
        }
    }

    Ok(tokens)
}

fn lex_number(chars: &mut Peekable<CharIndices>, source: &str) -> Result<Token, ExprError> {
    let start = chars.peek().map(|(i, _)| *i).unwrap_or(source.len());
    let mut end = start;
    let mut is_float = false;

    while let Some(&(j, c)) = chars.peek() {
        let exponent_sign = (c == '-' || c == '+')
            && matches!(source[..j].chars().last(), Some('e') | Some('E'));
        if c.is_ascii_digit() || c == '_' || exponent_sign {
            end = j + 1;
            chars.next();
        } else if c == '.' || c == 'e' || c == 'E' {
            is_float = true;
            end = j + 1;
            chars.next();
        } else {
            break;
        }
    }

    let literal = &source[start..end];
    let cleaned = literal.replace('_', "");
    let invalid = || ExprError::InvalidNumber {
        literal: literal.to_string(),
    };
    if literal.contains("__") || literal.ends_with('_') {
        return Err(invalid());
    }
    if is_float {
        cleaned.parse::<f64>().map(Token::Float).map_err(|_| invalid())
    } else {
        cleaned.parse::<i64>().map(Token::Int).map_err(|_| invalid())
    }
}

// ============================================================================
// PARSER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
        }
    }
}

/// Parsed deferred expression, ready to be evaluated any number of times.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call { name: String, args: Vec<Expr> },
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn descend(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::TooDeep { limit: MAX_DEPTH });
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

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), ExprError> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.syntax(&token.to_string()))
        }
    }

    fn syntax(&self, expected: &str) -> ExprError {
        ExprError::Syntax {
            expected: expected.to_string(),
            found: self
                .peek()
                .map(|t| t.to_string())
                .unwrap_or_else(|| "end of input".to_string()),
        }
    }

    fn expr(&mut self) -> Result<Expr, ExprError> {
        let depth = self.depth;
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => {
                    self.depth = depth;
                    return Ok(left);
                }
            };
            self.pos += 1;
            // Each operator deepens the left-leaning tree
            self.descend()?;
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn term(&mut self) -> Result<Expr, ExprError> {
        let depth = self.depth;
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::SlashSlash) => BinOp::FloorDiv,
                Some(Token::Percent) => BinOp::Mod,
                _ => {
                    self.depth = depth;
                    return Ok(left);
                }
            };
            self.pos += 1;
            self.descend()?;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Minus) {
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        if self.eat(&Token::Plus) {
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(inner);
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, ExprError> {
        let base = self.atom()?;
        if self.eat(&Token::StarStar) {
            self.descend()?;
            let exponent = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            Some(Token::Int(i)) => Ok(Expr::Int(i)),
            Some(Token::Float(x)) => Ok(Expr::Float(x)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                self.depth -= 1;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let items = self.list_until(Token::RBracket)?;
                Ok(Expr::List(items))
            }
            Some(Token::Name(first)) => {
                let name = if self.eat(&Token::Dot) {
                    match self.next() {
                        Some(Token::Name(attr)) => format!("{}.{}", first, attr),
                        _ => {
                            self.pos -= 1;
                            return Err(self.syntax("attribute name"));
                        }
                    }
                } else {
                    first
                };
                self.expect(Token::LParen)?;
                let args = self.list_until(Token::RParen)?;
                Ok(Expr::Call { name, args })
            }
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.syntax("a value"))
            }
        }
    }

    /// Comma-separated expressions up to `close` (consumed). Trailing comma ok.
    fn list_until(&mut self, close: Token) -> Result<Vec<Expr>, ExprError> {
        self.descend()?;
        let mut items = Vec::new();
        loop {
            if self.eat(&close) {
                break;
            }
            items.push(self.expr()?);
            if !self.eat(&Token::Comma) {
                self.expect(close)?;
                break;
            }
        }
        self.depth -= 1;
        Ok(items)
    }
}

/// Parse an expression body (the text after `lambda:`).
pub fn parse(source: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.syntax("end of input"));
    }
    Ok(expr)
}

// ============================================================================
// EVALUATION
// ============================================================================

impl Expr {
    /// Evaluate with a fresh draw from `rng` for every random call.
    pub fn eval<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<ExprValue, ExprError> {
        match self {
            Expr::Int(i) => Ok(ExprValue::Int(*i)),
            Expr::Float(x) => Ok(ExprValue::Float(*x)),
            Expr::Str(s) => Ok(ExprValue::Str(s.clone())),
            Expr::List(items) => items
                .iter()
                .map(|item| item.eval(rng))
                .collect::<Result<Vec<_>, _>>()
                .map(ExprValue::List),
            Expr::Neg(inner) => match inner.eval(rng)? {
                ExprValue::Int(i) => i.checked_neg().map(ExprValue::Int).ok_or(ExprError::Overflow),
                ExprValue::Float(x) => Ok(ExprValue::Float(-x)),
                other => Err(ExprError::OperandTypes {
                    op: "unary -",
                    left: other.type_name(),
                    right: other.type_name(),
                }),
            },
            Expr::Binary(op, left, right) => binary(*op, left.eval(rng)?, right.eval(rng)?),
            Expr::Call { name, args } => {
                let args = args
                    .iter()
                    .map(|a| a.eval(rng))
                    .collect::<Result<Vec<_>, _>>()?;
                call(name, args, rng)
            }
        }
    }
}

fn binary(op: BinOp, left: ExprValue, right: ExprValue) -> Result<ExprValue, ExprError> {
    use ExprValue::{Float, Int, Str};

    match (op, &left, &right) {
        (BinOp::Add, Str(a), Str(b)) => return Ok(Str(format!("{}{}", a, b))),
        (_, Int(a), Int(b)) => return int_binary(op, *a, *b),
        _ => {}
    }

    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Err(ExprError::OperandTypes {
            op: op.symbol(),
            left: left.type_name(),
            right: right.type_name(),
        });
    };

    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Pow if a == 0.0 && b < 0.0 => return Err(ExprError::DivisionByZero),
        BinOp::Pow => {
            let result = a.powf(b);
            if !result.is_finite() {
                return Err(ExprError::NonFinite);
            }
            result
        }
        BinOp::Div | BinOp::FloorDiv | BinOp::Mod if b == 0.0 => {
            return Err(ExprError::DivisionByZero)
        }
        BinOp::Div => a / b,
        BinOp::FloorDiv => (a / b).floor(),
        BinOp::Mod => a - b * (a / b).floor(),
    };
    Ok(Float(result))
}

fn int_binary(op: BinOp, a: i64, b: i64) -> Result<ExprValue, ExprError> {
    let int = |v: Option<i64>| v.map(ExprValue::Int).ok_or(ExprError::Overflow);
    match op {
        BinOp::Add => int(a.checked_add(b)),
        BinOp::Sub => int(a.checked_sub(b)),
        BinOp::Mul => int(a.checked_mul(b)),
        BinOp::Div if b == 0 => Err(ExprError::DivisionByZero),
        BinOp::Div => Ok(ExprValue::Float(a as f64 / b as f64)),
        BinOp::FloorDiv | BinOp::Mod if b == 0 => Err(ExprError::DivisionByZero),
        BinOp::FloorDiv => {
            let q = a.checked_div(b).ok_or(ExprError::Overflow)?;
            let floored = if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q };
            Ok(ExprValue::Int(floored))
        }
        BinOp::Mod => {
            let r = a.checked_rem(b).ok_or(ExprError::Overflow)?;
            let r = if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r };
            Ok(ExprValue::Int(r))
        }
        BinOp::Pow if b < 0 && a == 0 => Err(ExprError::DivisionByZero),
        BinOp::Pow if b < 0 => Ok(ExprValue::Float((a as f64).powf(b as f64))),
        BinOp::Pow => {
            let exp = u32::try_from(b).map_err(|_| ExprError::Overflow)?;
            int(a.checked_pow(exp))
        }
    }
}

fn call<R: Rng + ?Sized>(name: &str, args: Vec<ExprValue>, rng: &mut R) -> Result<ExprValue, ExprError> {
    let unknown = || ExprError::UnknownFunction {
        name: name.to_string(),
    };
    let (qualified, function) = match name.split_once('.') {
        Some(("random", function)) => (true, function),
        Some(_) => return Err(unknown()),
        None => (false, name),
    };

    if let Some(result) = random_call(function, &args, rng) {
        return result;
    }
    if qualified {
        return Err(unknown());
    }
    builtin_call(function, args).unwrap_or_else(|| Err(unknown()))
}

fn bad_arguments(function: &str, details: &str) -> ExprError {
    ExprError::BadArguments {
        function: function.to_string(),
        details: details.to_string(),
    }
}

/// `random.*` functions; `None` when `function` is not one of them.
fn random_call<R: Rng + ?Sized>(
    function: &str,
    args: &[ExprValue],
    rng: &mut R,
) -> Option<Result<ExprValue, ExprError>> {
    let bad = |details: &str| -> Result<ExprValue, ExprError> { Err(bad_arguments(function, details)) };

    let result = match (function, args) {
        ("randint", [ExprValue::Int(a), ExprValue::Int(b)]) if a <= b => {
            Ok(ExprValue::Int(rng.gen_range(*a..=*b)))
        }
        ("randint", [ExprValue::Int(_), ExprValue::Int(_)]) => bad("requires a <= b"),
        ("randint", _) => bad("takes two integers"),
        ("randrange", [ExprValue::Int(stop)]) => randrange(0, *stop, rng),
        ("randrange", [ExprValue::Int(start), ExprValue::Int(stop)]) => randrange(*start, *stop, rng),
        ("randrange", _) => bad("takes one or two integers"),
        ("uniform", [a, b]) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => Ok(ExprValue::Float(a + (b - a) * rng.gen::<f64>())),
            _ => bad("takes two numbers"),
        },
        ("uniform", _) => bad("takes two numbers"),
        ("random", []) => Ok(ExprValue::Float(rng.gen::<f64>())),
        ("random", _) => bad("takes no arguments"),
        ("choice", [ExprValue::List(items)]) if !items.is_empty() => {
            Ok(items[rng.gen_range(0..items.len())].clone())
        }
        ("choice", _) => bad("takes one non-empty list"),
        _ => return None,
    };
    Some(result)
}

/// Unqualified helpers; `None` when `function` is not one of them.
fn builtin_call(function: &str, args: Vec<ExprValue>) -> Option<Result<ExprValue, ExprError>> {
    let bad = |details: &str| -> Result<ExprValue, ExprError> { Err(bad_arguments(function, details)) };

    let result = match (function, args.as_slice()) {
        ("min" | "max", _) => match extremum(function == "max", &args) {
            Some(v) => Ok(v),
            None => bad("takes numbers or one non-empty list of numbers"),
        },
        ("abs", [ExprValue::Int(i)]) => i.checked_abs().map(ExprValue::Int).ok_or(ExprError::Overflow),
        ("abs", [ExprValue::Float(x)]) => Ok(ExprValue::Float(x.abs())),
        ("round", [ExprValue::Int(i)]) => Ok(ExprValue::Int(*i)),
        ("round", [ExprValue::Float(x)]) => float_to_int(x.round_ties_even()),
        ("int", [ExprValue::Int(i)]) => Ok(ExprValue::Int(*i)),
        ("int", [ExprValue::Float(x)]) => float_to_int(x.trunc()),
        ("int", [ExprValue::Str(s)]) => match s.trim().parse::<i64>() {
            Ok(i) => Ok(ExprValue::Int(i)),
            Err(_) => bad("cannot parse the string as an integer"),
        },
        ("float", [ExprValue::Str(s)]) => match s.trim().parse::<f64>() {
            Ok(x) => Ok(ExprValue::Float(x)),
            Err(_) => bad("cannot parse the string as a float"),
        },
        ("float", [v]) => match v.as_f64() {
            Some(x) => Ok(ExprValue::Float(x)),
            None => bad("takes a number or string"),
        },
        ("str", [v]) => Ok(ExprValue::Str(v.to_string())),
        ("abs" | "round" | "int" | "float" | "str", _) => {
            bad("takes exactly one argument of a supported type")
        }
        _ => return None,
    };
    Some(result)
}

fn randrange<R: Rng + ?Sized>(start: i64, stop: i64, rng: &mut R) -> Result<ExprValue, ExprError> {
    if start >= stop {
        return Err(bad_arguments("randrange", "empty range"));
    }
    Ok(ExprValue::Int(rng.gen_range(start..stop)))
}

fn float_to_int(x: f64) -> Result<ExprValue, ExprError> {
    if x.is_finite() && x >= i64::MIN as f64 && x < i64::MAX as f64 {
        Ok(ExprValue::Int(x as i64))
    } else {
        Err(ExprError::Overflow)
    }
}

fn extremum(want_max: bool, args: &[ExprValue]) -> Option<ExprValue> {
    let items = match args {
        [ExprValue::List(items)] => items.as_slice(),
        [_, _, ..] => args,
        _ => return None,
    };
    let mut best: Option<ExprValue> = None;
    for item in items {
        let x = item.as_f64()?;
        let replace = match &best {
            None => true,
            Some(current) => {
                let y = current.as_f64()?;
                if want_max {
                    x > y
                } else {
                    x < y
                }
            }
        };
        if replace {
            best = Some(item.clone());
        }
    }
    best
}
