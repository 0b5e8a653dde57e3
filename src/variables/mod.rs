//! Variable evaluation
//!
//! Turns `--var` assignments into a [`VariableTable`] once per run:
//!
//! - `seed=42`: integer literal
//! - `seed=lambda: random.randint(0, 1000)`: deferred expression, evaluated
//!   again on every call (see [`expr`] for the grammar)
//!
//! A variable that fails to evaluate is logged, reported and left out of the
//! table; the other variables are unaffected.

pub mod expr;

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;

use crate::error::PatchError;
use expr::{format_float, ExprValue};

/// `lambda:` marker of a deferred expression; captures the body.
static DEFERRED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*lambda\s*:(.*)$").expect("valid regex"));

/// Evaluated value of one variable.
#[derive(Debug, Clone, PartialEq)]
pub enum VarValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for VarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarValue::Int(i) => write!(f, "{}", i),
            VarValue::Float(x) => f.write_str(&format_float(*x)),
            VarValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<ExprValue> for VarValue {
    fn from(value: ExprValue) -> Self {
        match value {
            ExprValue::Int(i) => VarValue::Int(i),
            ExprValue::Float(x) => VarValue::Float(x),
            ExprValue::Str(s) => VarValue::Str(s),
            list @ ExprValue::List(_) => VarValue::Str(list.to_string()),
        }
    }
}

/// Variable name → value for a single run.
pub type VariableTable = BTreeMap<String, VarValue>;

/// Outcome of one evaluation pass.
#[derive(Debug, Default)]
pub struct Evaluation {
    pub table: VariableTable,
    /// Non-fatal failures, one per omitted variable
    pub failures: Vec<PatchError>,
}

/// Evaluates assignments with an owned random source.
pub struct Evaluator<R = StdRng> {
    rng: R,
}

impl Evaluator<StdRng> {
    /// Evaluator seeded from OS entropy
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl Default for Evaluator<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> Evaluator<R> {
    /// Evaluator drawing from `rng` (seed it for reproducible runs)
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }

    /// Evaluate every assignment from scratch.
    ///
    /// Later assignments of the same name overwrite earlier ones.
    pub fn evaluate(&mut self, assignments: &[String]) -> Evaluation {
        let mut evaluation = Evaluation::default();

        for assignment in assignments {
            match self.evaluate_one(assignment) {
                Ok((name, value)) => {
                    tracing::debug!(name = %name, value = %value, "variable evaluated");
                    evaluation.table.insert(name, value);
                }
                Err(err) => {
                    tracing::error!("{}", err);
                    evaluation.failures.push(err);
                }
            }
        }

        evaluation
    }

    fn evaluate_one(&mut self, assignment: &str) -> Result<(String, VarValue), PatchError> {
        let Some((name, expression)) = assignment.split_once('=') else {
            return Err(PatchError::InvalidAssignment {
                assignment: assignment.to_string(),
            });
        };
        let failure = |details: String| PatchError::VariableEvaluation {
            name: name.to_string(),
            expression: expression.to_string(),
            details,
        };

        let value = if let Some(captures) = DEFERRED_RE.captures(expression) {
            let body = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            let parsed = expr::parse(body).map_err(|e| failure(e.to_string()))?;
            parsed
                .eval(&mut self.rng)
                .map_err(|e| failure(e.to_string()))?
                .into()
        } else {
            parse_int_literal(expression)
                .map(VarValue::Int)
                .ok_or_else(|| failure("not an integer literal or lambda expression".to_string()))?
        };

        Ok((name.to_string(), value))
    }
}

/// Integer literal with optional sign, surrounding whitespace and single `_`
/// separators between digits (`" -1_000 "` → `-1000`).
pub fn parse_int_literal(text: &str) -> Option<i64> {
    let text = text.trim();
    let digits = text.strip_prefix(['+', '-']).unwrap_or(text);
    let well_formed = !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit() || c == '_')
        && !digits.starts_with('_')
        && !digits.ends_with('_')
        && !digits.contains("__");
    if !well_formed {
        return None;
    }
    text.replace('_', "").parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn seeded() -> Evaluator<StdRng> {
        Evaluator::with_rng(StdRng::seed_from_u64(42))
    }

    #[test]
    fn integer_literals() {
        let eval = seeded().evaluate(&args(&["x=5", "y= -12 ", "z=1_000"]));
        assert!(eval.failures.is_empty());
        assert_eq!(eval.table["x"], VarValue::Int(5));
        assert_eq!(eval.table["y"], VarValue::Int(-12));
        assert_eq!(eval.table["z"], VarValue::Int(1000));
    }

    #[test]
    fn literal_evaluation_is_idempotent() {
        let mut evaluator = seeded();
        let first = evaluator.evaluate(&args(&["x=5"]));
        let second = evaluator.evaluate(&args(&["x=5"]));
        assert_eq!(first.table, second.table);
    }

    #[test]
    fn split_on_first_equals_only() {
        let eval = seeded().evaluate(&args(&["x=lambda: 1 == 1"]));
        match &eval.failures[0] {
            PatchError::VariableEvaluation { name, expression, .. } => {
                assert_eq!(name, "x");
                assert_eq!(expression, "lambda: 1 == 1");
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn name_is_used_verbatim() {
        let eval = seeded().evaluate(&args(&["Erosion Seed=3"]));
        assert_eq!(eval.table["Erosion Seed"], VarValue::Int(3));
    }

    #[test]
    fn deferred_constant() {
        let mut evaluator = seeded();
        for _ in 0..2 {
            let eval = evaluator.evaluate(&args(&["s=lambda: 7"]));
            assert_eq!(eval.table["s"], VarValue::Int(7));
        }
    }

    #[test]
    fn deferred_random_draws_fresh_each_call() {
        let mut evaluator = seeded();
        let mut probe = StdRng::seed_from_u64(42);
        let expected_first: i64 = probe.gen_range(0..=1000);
        let expected_second: i64 = probe.gen_range(0..=1000);

        let assignments = args(&["s=lambda: random.randint(0, 1000)"]);
        let first = evaluator.evaluate(&assignments);
        let second = evaluator.evaluate(&assignments);
        assert_eq!(first.table["s"], VarValue::Int(expected_first));
        assert_eq!(second.table["s"], VarValue::Int(expected_second));
    }

    #[test]
    fn failures_are_isolated() {
        let eval = seeded().evaluate(&args(&["a=abc", "b=2", "c=lambda: 1 // 0", "noequals"]));
        assert_eq!(eval.table.len(), 1);
        assert_eq!(eval.table["b"], VarValue::Int(2));
        assert_eq!(eval.failures.len(), 3);
        assert!(eval.failures.iter().all(|f| f.is_recoverable()));
        assert!(matches!(eval.failures[2], PatchError::InvalidAssignment { .. }));
    }

    #[test]
    fn deeply_nested_expression_is_a_recorded_failure() {
        let nested = format!("s=lambda: {}1{}", "(".repeat(200_000), ")".repeat(200_000));
        let signs = format!("u=lambda: {}1", "-".repeat(200_000));
        let eval = seeded().evaluate(&[nested, "t=3".to_string(), signs]);

        assert_eq!(eval.table.len(), 1);
        assert_eq!(eval.table["t"], VarValue::Int(3));
        assert_eq!(eval.failures.len(), 2);
        for failure in &eval.failures {
            match failure {
                PatchError::VariableEvaluation { details, .. } => assert!(details.contains("nested deeper")),
                other => panic!("unexpected failure: {other}"),
            }
        }
    }

    #[test]
    fn lambda_with_parameters_is_rejected() {
        let eval = seeded().evaluate(&args(&["s=lambda x: x"]));
        assert!(eval.table.is_empty());
        assert_eq!(eval.failures.len(), 1);
    }

    #[test]
    fn display_forms() {
        assert_eq!(VarValue::Int(42).to_string(), "42");
        assert_eq!(VarValue::Float(0.5).to_string(), "0.5");
        assert_eq!(VarValue::Float(3.0).to_string(), "3.0");
        assert_eq!(VarValue::Str("x".into()).to_string(), "x");
    }

    #[test]
    fn int_literal_parser() {
        assert_eq!(parse_int_literal("+7"), Some(7));
        assert_eq!(parse_int_literal("1__0"), None);
        assert_eq!(parse_int_literal("_1"), None);
        assert_eq!(parse_int_literal("1.0"), None);
        assert_eq!(parse_int_literal(""), None);
        assert_eq!(parse_int_literal("-"), None);
    }
}
