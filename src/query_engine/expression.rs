//! JSON-encoded expressions evaluated against a single row.
//!
//! Grammar:
//!
//! * `true`, `false`, numbers and `null` are literals,
//! * a bare string names a column,
//! * `{"literal": v}` is a literal of any scalar, `{"column": "c"}` a column,
//! * `{"eq" | "ne" | "lt" | "le" | "gt" | "ge": [a, b]}` compare two operands,
//! * `{"and" | "or": [e, ...]}` and `{"not": e}` combine predicates,
//! * `{"add" | "sub" | "mul" | "div": [a, b]}` compute values.
//!
//! Evaluation never fails. Unknown columns read as null, as do comparisons
//! between values of different kinds and arithmetic that has no result.

use std::cmp::Ordering;

use serde_json::{Number, Value};

use crate::common::error::{JsonQlException, Result};
use crate::common::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Value),
    Column(String),
    Compare(CompareOp, Box<Expression>, Box<Expression>),
    Arithmetic(ArithmeticOp, Box<Expression>, Box<Expression>),
    And(Vec<Expression>),
    Or(Vec<Expression>),
    Not(Box<Expression>),
}

impl Default for Expression {
    /// The match-everything filter.
    fn default() -> Self {
        Expression::Literal(Value::Bool(true))
    }
}

impl Expression {
    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal(value.into())
    }

    pub fn column(name: impl Into<String>) -> Self {
        Expression::Column(name.into())
    }

    pub fn compare(op: CompareOp, left: Expression, right: Expression) -> Self {
        Expression::Compare(op, Box::new(left), Box::new(right))
    }

    /// `column == value`, the most common filter.
    pub fn column_eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(CompareOp::Eq, Self::column(column), Self::literal(value))
    }

    pub fn from_json(json: &Value) -> Result<Self> {
        let mut violations = Vec::new();
        match Self::parse(json, "$", &mut violations) {
            Some(expression) if violations.is_empty() => Ok(expression),
            _ => Err(JsonQlException::new(violations).into()),
        }
    }

    /// Parses `json`, pushing one violation per malformed node instead of
    /// stopping at the first.
    pub(crate) fn parse(json: &Value, path: &str, violations: &mut Vec<String>) -> Option<Self> {
        match json {
            Value::Null | Value::Bool(_) | Value::Number(_) => Some(Expression::Literal(json.clone())),
            Value::String(column) => Some(Expression::Column(column.clone())),
            Value::Array(_) => {
                violations.push(format!("{path}: an expression cannot be an array"));
                None
            }
            Value::Object(object) => {
                if object.len() != 1 {
                    violations.push(format!(
                        "{path}: an expression object needs exactly one operator, got {}",
                        object.len()
                    ));
                    return None;
                }
                let (operator, operand) = object.iter().next()?;
                let child = format!("{path}.{operator}");
                Self::parse_operator(operator, operand, &child, violations)
            }
        }
    }

    fn parse_operator(
        operator: &str,
        operand: &Value,
        path: &str,
        violations: &mut Vec<String>,
    ) -> Option<Self> {
        let compare = match operator {
            "eq" => Some(CompareOp::Eq),
            "ne" => Some(CompareOp::Ne),
            "lt" => Some(CompareOp::Lt),
            "le" => Some(CompareOp::Le),
            "gt" => Some(CompareOp::Gt),
            "ge" => Some(CompareOp::Ge),
            _ => None,
        };
        if let Some(op) = compare {
            let (left, right) = Self::parse_pair(operand, path, violations)?;
            return Some(Expression::Compare(op, Box::new(left), Box::new(right)));
        }

        let arithmetic = match operator {
            "add" => Some(ArithmeticOp::Add),
            "sub" => Some(ArithmeticOp::Sub),
            "mul" => Some(ArithmeticOp::Mul),
            "div" => Some(ArithmeticOp::Div),
            _ => None,
        };
        if let Some(op) = arithmetic {
            let (left, right) = Self::parse_pair(operand, path, violations)?;
            return Some(Expression::Arithmetic(op, Box::new(left), Box::new(right)));
        }

        match operator {
            "literal" => match operand {
                Value::Array(_) | Value::Object(_) => {
                    violations.push(format!("{path}: literal must be a scalar"));
                    None
                }
                scalar => Some(Expression::Literal(scalar.clone())),
            },
            "column" => match operand {
                Value::String(name) => Some(Expression::Column(name.clone())),
                _ => {
                    violations.push(format!("{path}: column must be a string"));
                    None
                }
            },
            "not" => Self::parse(operand, path, violations).map(|inner| Expression::Not(Box::new(inner))),
            "and" | "or" => {
                let Some(items) = operand.as_array().filter(|items| !items.is_empty()) else {
                    violations.push(format!("{path}: expected a non-empty array of expressions"));
                    return None;
                };
                let mut parsed = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    if let Some(expression) = Self::parse(item, &format!("{path}[{index}]"), violations) {
                        parsed.push(expression);
                    }
                }
                if parsed.len() != items.len() {
                    return None;
                }
                Some(if operator == "and" {
                    Expression::And(parsed)
                } else {
                    Expression::Or(parsed)
                })
            }
            unknown => {
                violations.push(format!("{path}: unknown operator {unknown:?}"));
                None
            }
        }
    }

    fn parse_pair(
        operand: &Value,
        path: &str,
        violations: &mut Vec<String>,
    ) -> Option<(Expression, Expression)> {
        match operand.as_array().map(Vec::as_slice) {
            Some([left, right]) => {
                let left = Self::parse(left, &format!("{path}[0]"), violations);
                let right = Self::parse(right, &format!("{path}[1]"), violations);
                Some((left?, right?))
            }
            _ => {
                violations.push(format!("{path}: expected an array of two operands"));
                None
            }
        }
    }

    /// The value of this expression for `row`.
    pub fn value(&self, row: &Row) -> Value {
        match self {
            Expression::Literal(value) => value.clone(),
            Expression::Column(name) => row.get(name).cloned().unwrap_or(Value::Null),
            Expression::Compare(op, left, right) => compare(*op, &left.value(row), &right.value(row)),
            Expression::Arithmetic(op, left, right) => {
                arithmetic(*op, &left.value(row), &right.value(row))
            }
            Expression::And(items) => Value::Bool(items.iter().all(|item| item.evaluate(row))),
            Expression::Or(items) => Value::Bool(items.iter().any(|item| item.evaluate(row))),
            Expression::Not(inner) => match inner.value(row) {
                Value::Bool(value) => Value::Bool(!value),
                _ => Value::Null,
            },
        }
    }

    /// Whether `row` satisfies this expression as a predicate. Only boolean
    /// `true` counts.
    pub fn evaluate(&self, row: &Row) -> bool {
        matches!(self.value(row), Value::Bool(true))
    }
}

fn order(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Value {
    let ordering = order(left, right);
    let result = match op {
        CompareOp::Eq => ordering == Some(Ordering::Equal),
        CompareOp::Ne => ordering != Some(Ordering::Equal),
        _ if left.is_null() || right.is_null() => return Value::Null,
        CompareOp::Lt => match ordering {
            Some(ordering) => ordering == Ordering::Less,
            None => return Value::Null,
        },
        CompareOp::Le => match ordering {
            Some(ordering) => ordering != Ordering::Greater,
            None => return Value::Null,
        },
        CompareOp::Gt => match ordering {
            Some(ordering) => ordering == Ordering::Greater,
            None => return Value::Null,
        },
        CompareOp::Ge => match ordering {
            Some(ordering) => ordering != Ordering::Less,
            None => return Value::Null,
        },
    };
    Value::Bool(result)
}

fn arithmetic(op: ArithmeticOp, left: &Value, right: &Value) -> Value {
    if let (ArithmeticOp::Add, Value::String(a), Value::String(b)) = (op, left, right) {
        return Value::String(format!("{a}{b}"));
    }
    let (Value::Number(a), Value::Number(b)) = (left, right) else {
        return Value::Null;
    };

    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        let exact = match op {
            ArithmeticOp::Add => a.checked_add(b),
            ArithmeticOp::Sub => a.checked_sub(b),
            ArithmeticOp::Mul => a.checked_mul(b),
            ArithmeticOp::Div if b != 0 && a.checked_rem(b) == Some(0) => a.checked_div(b),
            ArithmeticOp::Div => None,
        };
        if let Some(exact) = exact {
            return Value::from(exact);
        }
        if op == ArithmeticOp::Div && b == 0 {
            return Value::Null;
        }
    }

    let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
        return Value::Null;
    };
    let result = match op {
        ArithmeticOp::Add => a + b,
        ArithmeticOp::Sub => a - b,
        ArithmeticOp::Mul => a * b,
        ArithmeticOp::Div if b == 0.0 => return Value::Null,
        ArithmeticOp::Div => a / b,
    };
    Number::from_f64(result).map_or(Value::Null, Value::Number)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::common::error::Error;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn eval(expression: Value, row_value: Value) -> bool {
        Expression::from_json(&expression).unwrap().evaluate(&row(row_value))
    }

    #[test]
    fn literal_true_matches_everything() {
        assert!(Expression::default().evaluate(&Row::new()));
        assert!(eval(json!(true), json!({"id": 1})));
        assert!(!eval(json!(false), json!({"id": 1})));
    }

    #[test]
    fn equality_against_columns() {
        assert!(eval(json!({"eq": ["id", 1]}), json!({"id": 1})));
        assert!(!eval(json!({"eq": ["id", 1]}), json!({"id": 2})));
        assert!(eval(json!({"eq": ["id", 1.0]}), json!({"id": 1})));
        assert!(eval(json!({"eq": ["name", {"literal": "a"}]}), json!({"name": "a"})));
        assert!(eval(json!({"ne": ["name", {"literal": "a"}]}), json!({"name": 3})));
        assert!(eval(json!({"eq": ["missing", null]}), json!({})));
    }

    #[test]
    fn ordering_comparisons() {
        let r = json!({"age": 30, "name": "m"});
        assert!(eval(json!({"gt": ["age", 18]}), r.clone()));
        assert!(eval(json!({"le": ["age", 30]}), r.clone()));
        assert!(!eval(json!({"lt": ["age", 30]}), r.clone()));
        assert!(eval(json!({"ge": ["name", {"literal": "a"}]}), r.clone()));
        // incomparable kinds never match
        assert!(!eval(json!({"lt": ["name", 5]}), r.clone()));
        assert!(!eval(json!({"ge": ["name", 5]}), r));
    }

    #[test]
    fn boolean_combinators() {
        let r = json!({"a": 1, "b": 2});
        assert!(eval(json!({"and": [{"eq": ["a", 1]}, {"eq": ["b", 2]}]}), r.clone()));
        assert!(!eval(json!({"and": [{"eq": ["a", 1]}, {"eq": ["b", 3]}]}), r.clone()));
        assert!(eval(json!({"or": [{"eq": ["a", 5]}, {"eq": ["b", 2]}]}), r.clone()));
        assert!(eval(json!({"not": {"eq": ["a", 5]}}), r.clone()));
        // not over a non-boolean stays null and so does not match
        assert!(!eval(json!({"not": "a"}), r));
    }

    #[test]
    fn arithmetic_values() {
        let r = row(json!({"count": 7, "price": 1.5, "name": "ab"}));
        let value = |e: Value| Expression::from_json(&e).unwrap().value(&r);
        assert_eq!(value(json!({"add": ["count", 1]})), json!(8));
        assert_eq!(value(json!({"mul": ["price", 2]})), json!(3.0));
        assert_eq!(value(json!({"div": ["count", 2]})), json!(3.5));
        assert_eq!(value(json!({"div": [8, 2]})), json!(4));
        assert_eq!(value(json!({"div": ["count", 0]})), Value::Null);
        assert_eq!(value(json!({"add": ["name", {"literal": "c"}]})), json!("abc"));
        assert_eq!(value(json!({"sub": ["name", 1]})), Value::Null);
    }

    #[test]
    fn malformed_expressions_report_every_problem() {
        let err = Expression::from_json(&json!({"and": [{"eq": ["a"]}, {"bogus": 1}, [1]]})).unwrap_err();
        let Error::JsonQl(exception) = err else {
            panic!("expected a JSONQL error");
        };
        assert_eq!(
            exception.violations,
            vec![
                "$.and[0].eq: expected an array of two operands",
                "$.and[1].bogus: unknown operator \"bogus\"",
                "$.and[2]: an expression cannot be an array",
            ]
        );
    }

    #[test]
    fn builders_match_parsed_form() {
        assert_eq!(
            Expression::from_json(&json!({"eq": ["id", 1]})).unwrap(),
            Expression::column_eq("id", 1)
        );
    }
}
