// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Attribute expressions.

An expression tree evaluates to an [`AttributeValue`] against an
[`EvaluationContext`]. Arithmetic follows IEEE-754 double semantics;
division by zero yields the native infinite or NaN result. Errors are
recoverable: callers treat a failed evaluation as "does not apply".
*/

use crate::attribute_value::AttributeValue;
use crate::context::EvaluationContext;
use crate::error::{GraphError, Result};
use crate::steady_state;

/// Unary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Sqrt,
}

/// Binary arithmetic operators. `Pow` is right-associative in the grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Min,
    Max,
}

/// Built-in expression functions beyond plain arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprFunction {
    /// `syncError(q, syncEdge, refEdge)`: variance of pulling `syncEdge`
    /// at `refEdge`'s latency under a constant-velocity motion model.
    SyncError,
    /// `steadyState(q, (A|R, dt, r)+)`: steady-state variance of a
    /// two-state Kalman filter over the given measurement mix.
    SteadyState,
    /// `sourceCount([prefix])`: number of information sources starting
    /// with `prefix`, or all of them.
    SourceCount,
}

/// An attribute expression tree.
#[derive(Debug, Clone)]
pub enum AttributeExpression {
    Constant(AttributeValue),
    /// Reference to an attribute, optionally qualified with the local name
    /// of a matched input node or edge (`edge.latency`).
    Attribute {
        qualifier: Option<String>,
        name: String,
    },
    Unary {
        op: UnaryOp,
        child: Box<AttributeExpression>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<AttributeExpression>,
        rhs: Box<AttributeExpression>,
    },
    Function {
        function: ExprFunction,
        args: Vec<AttributeExpression>,
    },
}

impl AttributeExpression {
    /// Convenience constructor for a textual constant.
    pub fn constant(text: impl Into<String>) -> Self {
        AttributeExpression::Constant(AttributeValue::text(text))
    }

    /// Convenience constructor for an unqualified attribute reference.
    pub fn attribute(name: impl Into<String>) -> Self {
        AttributeExpression::Attribute { qualifier: None, name: name.into() }
    }

    /// Evaluates the expression against a context.
    pub fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<AttributeValue> {
        match self {
            AttributeExpression::Constant(value) => Ok(value.clone()),

            AttributeExpression::Attribute { qualifier, name } => {
                let attributes = if ctx.is_global() {
                    let Some(attrs) = ctx.lookup(qualifier.as_deref().unwrap_or("")) else {
                        return Ok(AttributeValue::empty());
                    };
                    attrs
                } else {
                    ctx.attributes()
                        .ok_or_else(|| GraphError::Evaluation("no attributes in context".into()))?
                };
                Ok(attributes.try_get(name).cloned().unwrap_or_default())
            }

            AttributeExpression::Unary { op, child } => {
                let v = child.evaluate(ctx)?.as_number()?;
                let result = match op {
                    UnaryOp::Neg => -v,
                    UnaryOp::Sqrt => v.sqrt(),
                };
                Ok(AttributeValue::number(result))
            }

            AttributeExpression::Binary { op, lhs, rhs } => {
                let a = lhs.evaluate(ctx)?.as_number()?;
                let b = rhs.evaluate(ctx)?.as_number()?;
                let result = match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    BinaryOp::Pow => a.powf(b),
                    BinaryOp::Min => a.min(b),
                    BinaryOp::Max => a.max(b),
                };
                Ok(AttributeValue::number(result))
            }

            AttributeExpression::Function { function, args } => {
                self.evaluate_function(*function, args, ctx)
            }
        }
    }

    fn evaluate_function(
        &self,
        function: ExprFunction,
        args: &[AttributeExpression],
        ctx: &EvaluationContext<'_>,
    ) -> Result<AttributeValue> {
        check_function_arity(function, args.len())?;
        match function {
            ExprFunction::SyncError => {
                if !ctx.is_global() {
                    return Err(GraphError::Evaluation(
                        "syncError requires a pattern matching context".into(),
                    ));
                }
                let q = args[0].evaluate(ctx)?.as_number()?;
                let sync_edge = args[1].evaluate(ctx)?;
                let ref_edge = args[2].evaluate(ctx)?;

                let sync = ctx
                    .lookup(sync_edge.as_text())
                    .ok_or_else(|| GraphError::UnknownAttribute(sync_edge.as_text().into()))?;
                let reference = ctx
                    .lookup(ref_edge.as_text())
                    .ok_or_else(|| GraphError::UnknownAttribute(ref_edge.as_text().into()))?;

                let sync_update_time = sync.get("updateTime")?.as_number()?;
                let sync_latency = sync.get("latency")?.as_number()?;
                let ref_latency = reference.get("latency")?.as_number()?;

                // closed-form variance of a constant-velocity model sampled
                // at the reference latency; degenerates to 0 for a
                // (near-)continuous input
                let result = if sync_update_time < 1e-10 {
                    0.0
                } else {
                    let t1 = (sync_latency - ref_latency + sync_update_time).max(0.0);
                    let t2 = (sync_latency - ref_latency).max(0.0);
                    q / (12.0 * sync_update_time) * (t1.powi(4) - t2.powi(4))
                };
                Ok(AttributeValue::number(result))
            }

            ExprFunction::SteadyState => {
                if !ctx.is_global() {
                    return Err(GraphError::Evaluation(
                        "steadyState requires a pattern matching context".into(),
                    ));
                }
                let q = args[0].evaluate(ctx)?.as_number()?;
                let mut measurements = Vec::with_capacity((args.len() - 1) / 3);
                for triple in args[1..].chunks(3) {
                    let kind = triple[0].evaluate(ctx)?;
                    let dt = triple[1].evaluate(ctx)?.as_number()?;
                    let r = triple[2].evaluate(ctx)?.as_number()?;
                    let kind = match kind.as_text() {
                        "A" => steady_state::MeasurementKind::Absolute,
                        "R" => steady_state::MeasurementKind::Relative,
                        other => {
                            return Err(GraphError::Evaluation(format!(
                                "steadyState: unknown measurement type {}",
                                other
                            )))
                        }
                    };
                    measurements.push(steady_state::MeasurementModel { kind, dt, r });
                }
                let variance = steady_state::steady_state_variance(q, &measurements)?;
                Ok(AttributeValue::number(variance))
            }

            ExprFunction::SourceCount => {
                let sources = ctx.sources();
                if args.is_empty() {
                    return Ok(AttributeValue::number(sources.len() as f64));
                }
                let prefix = args[0].evaluate(ctx)?;
                let prefix = prefix.as_text();
                let count = sources
                    .range(prefix.to_string()..)
                    .take_while(|s| s.starts_with(prefix))
                    .count();
                Ok(AttributeValue::number(count as f64))
            }
        }
    }
}

impl std::fmt::Display for AttributeExpression {
    /// Renders the expression in the text grammar. Binary terms are
    /// parenthesized, so the output re-parses to the same tree.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeExpression::Constant(value) => {
                if value.is_number() {
                    write!(f, "{}", value.as_text())
                } else {
                    write!(f, "'{}'", value.as_text().replace('\\', "\\\\").replace('\'', "\\'"))
                }
            }
            AttributeExpression::Attribute { qualifier, name } => match qualifier {
                Some(qualifier) => write!(f, "{}.{}", qualifier, name),
                None => write!(f, "{}", name),
            },
            AttributeExpression::Unary { op, child } => match op {
                UnaryOp::Neg => write!(f, "-({})", child),
                UnaryOp::Sqrt => write!(f, "sqrt({})", child),
            },
            AttributeExpression::Binary { op, lhs, rhs } => match op {
                BinaryOp::Add => write!(f, "({} + {})", lhs, rhs),
                BinaryOp::Sub => write!(f, "({} - {})", lhs, rhs),
                BinaryOp::Mul => write!(f, "({} * {})", lhs, rhs),
                BinaryOp::Div => write!(f, "({} / {})", lhs, rhs),
                BinaryOp::Pow => write!(f, "({} ^ {})", lhs, rhs),
                BinaryOp::Min => write!(f, "min({}, {})", lhs, rhs),
                BinaryOp::Max => write!(f, "max({}, {})", lhs, rhs),
            },
            AttributeExpression::Function { function, args } => {
                let name = match function {
                    ExprFunction::SyncError => "syncError",
                    ExprFunction::SteadyState => "steadyState",
                    ExprFunction::SourceCount => "sourceCount",
                };
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Checks the argument count for a named expression function.
pub(crate) fn check_function_arity(function: ExprFunction, arg_count: usize) -> Result<()> {
    let ok = match function {
        ExprFunction::SyncError => arg_count == 3,
        ExprFunction::SteadyState => arg_count >= 4 && (arg_count - 1) % 3 == 0,
        ExprFunction::SourceCount => arg_count <= 1,
    };
    if ok {
        Ok(())
    } else {
        Err(GraphError::Evaluation(format!(
            "illegal number of arguments ({}) for function {:?}",
            arg_count, function
        )))
    }
}
