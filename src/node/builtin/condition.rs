// src/node/builtin/condition.rs

//! Predicate node for conditional branching.
//!
//! Reads one field of the payload (JSON pointer), compares it with a
//! configured value and emits `true_label` or `false_label`. The data is
//! passed on unchanged.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::node::{Node, NodeBuildError, NodeContext, NodeData, NodeFuture, NodeOutput, NodeVariant};

pub const KIND: &str = "condition";

/// Comparison applied to the selected field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Matches,
    Exists,
}

impl FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "eq" | "==" => Ok(CompareOp::Eq),
            "ne" | "!=" => Ok(CompareOp::Ne),
            "gt" | ">" => Ok(CompareOp::Gt),
            "ge" | ">=" => Ok(CompareOp::Ge),
            "lt" | "<" => Ok(CompareOp::Lt),
            "le" | "<=" => Ok(CompareOp::Le),
            "matches" => Ok(CompareOp::Matches),
            "exists" => Ok(CompareOp::Exists),
            other => Err(format!(
                "invalid op: {other} (expected eq, ne, gt, ge, lt, le, matches or exists)"
            )),
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
            CompareOp::Gt => "gt",
            CompareOp::Ge => "ge",
            CompareOp::Lt => "lt",
            CompareOp::Le => "le",
            CompareOp::Matches => "matches",
            CompareOp::Exists => "exists",
        };
        f.write_str(s)
    }
}

fn default_true_label() -> String {
    "yes".to_string()
}

fn default_false_label() -> String {
    "no".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    field: String,
    op: String,
    #[serde(default)]
    value: Option<toml::Value>,
    #[serde(default = "default_true_label")]
    true_label: String,
    #[serde(default = "default_false_label")]
    false_label: String,
}

#[derive(Debug)]
enum Predicate {
    Compare(CompareOp, Value),
    Matches(Regex),
    Exists,
}

#[derive(Debug)]
pub struct ConditionNode {
    field: String,
    predicate: Predicate,
    true_label: String,
    false_label: String,
}

impl ConditionNode {
    /// Evaluate the predicate against `data`.
    ///
    /// A missing field is false for every op (including `ne`).
    pub fn evaluate(&self, data: &NodeData) -> bool {
        let Some(actual) = data.pointer(&self.field) else {
            return false;
        };

        match &self.predicate {
            Predicate::Exists => true,
            Predicate::Matches(re) => match actual {
                Value::String(s) => re.is_match(s),
                other => re.is_match(&other.to_string()),
            },
            Predicate::Compare(op, expected) => match op {
                CompareOp::Eq => values_equal(actual, expected),
                CompareOp::Ne => !values_equal(actual, expected),
                _ => match compare(actual, expected) {
                    Some(ord) => match op {
                        CompareOp::Gt => ord == Ordering::Greater,
                        CompareOp::Ge => ord != Ordering::Less,
                        CompareOp::Lt => ord == Ordering::Less,
                        CompareOp::Le => ord != Ordering::Greater,
                        _ => false,
                    },
                    None => false,
                },
            },
        }
    }
}

/// Numbers compare by value so `2` equals `2.0`.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn toml_to_json(value: toml::Value) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

pub(super) fn build(ctx: &NodeContext) -> Result<Box<dyn Node>, NodeBuildError> {
    ctx.require_variant(KIND, &[NodeVariant::ConditionalBlocking])?;
    let params: Params = ctx.params()?;
    let invalid = |message: String| NodeBuildError::InvalidParams {
        node: ctx.id.clone(),
        message,
    };

    let op = CompareOp::from_str(&params.op).map_err(invalid)?;
    if !params.field.is_empty() && !params.field.starts_with('/') {
        return Err(invalid(format!(
            "field must be a JSON pointer such as '/{}'",
            params.field
        )));
    }

    let predicate = match op {
        CompareOp::Exists => Predicate::Exists,
        CompareOp::Matches => {
            let pattern = match params.value {
                Some(toml::Value::String(s)) => s,
                _ => return Err(invalid("`matches` needs a string `value`".to_string())),
            };
            let re = Regex::new(&pattern).map_err(|e| invalid(e.to_string()))?;
            Predicate::Matches(re)
        }
        op => {
            let value = params
                .value
                .ok_or_else(|| invalid(format!("op `{op}` needs a `value`")))?;
            Predicate::Compare(op, toml_to_json(value).map_err(invalid)?)
        }
    };

    Ok(Box::new(ConditionNode {
        field: params.field,
        predicate,
        true_label: params.true_label,
        false_label: params.false_label,
    }))
}

impl Node for ConditionNode {
    fn execute<'a>(&'a mut self, input: &'a NodeData) -> NodeFuture<'a> {
        let label = if self.evaluate(input) {
            &self.true_label
        } else {
            &self.false_label
        };
        let out = NodeOutput::branch(input.clone(), label.clone());
        Box::pin(async move { Ok(out) })
    }
}
