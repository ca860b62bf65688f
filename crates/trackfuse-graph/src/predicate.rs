// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Predicates on nodes, edges and matchings.

A predicate tree evaluates to a boolean against an [`EvaluationContext`].
Evaluation errors are recoverable and callers treat them as "does not
match".
*/

use crate::attribute_value::AttributeValue;
use crate::context::EvaluationContext;
use crate::error::{GraphError, Result};
use crate::expression::AttributeExpression;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equals,
    NotEquals,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
}

impl CompareOp {
    /// Parses an operator token.
    pub fn from_token(token: &str) -> Result<Self> {
        Ok(match token {
            "==" => CompareOp::Equals,
            "!=" => CompareOp::NotEquals,
            "<" => CompareOp::Less,
            "<=" => CompareOp::LessEquals,
            ">" => CompareOp::Greater,
            ">=" => CompareOp::GreaterEquals,
            other => {
                return Err(GraphError::Evaluation(format!("bad comparison operator: {}", other)))
            }
        })
    }
}

/// Predicate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateFunction {
    /// `inSourceSet(prefix)`: true if any information source of the
    /// current node/edge starts with `prefix`.
    InSourceSet,
}

/// A predicate tree.
#[derive(Debug, Clone)]
pub enum Predicate {
    Not(Box<Predicate>),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Compare {
        op: CompareOp,
        lhs: AttributeExpression,
        rhs: AttributeExpression,
    },
    Function {
        function: PredicateFunction,
        args: Vec<AttributeExpression>,
    },
}

impl Predicate {
    /// Evaluates the predicate against a context.
    ///
    /// Callers that use predicates as match filters treat `Err` as `false`.
    pub fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<bool> {
        match self {
            Predicate::Not(child) => Ok(!child.evaluate(ctx)?),
            Predicate::And(a, b) => Ok(a.evaluate(ctx)? && b.evaluate(ctx)?),
            Predicate::Or(a, b) => Ok(a.evaluate(ctx)? || b.evaluate(ctx)?),
            Predicate::Compare { op, lhs, rhs } => {
                compare(*op, &lhs.evaluate(ctx)?, &rhs.evaluate(ctx)?)
            }
            Predicate::Function { function, args } => match function {
                PredicateFunction::InSourceSet => {
                    if ctx.is_global() {
                        return Err(GraphError::Evaluation(
                            "inSourceSet can only be used in node/edge predicates".into(),
                        ));
                    }
                    let [prefix] = args.as_slice() else {
                        return Err(GraphError::Evaluation(
                            "inSourceSet takes exactly one argument".into(),
                        ));
                    };
                    let prefix = prefix.evaluate(ctx)?;
                    let prefix = prefix.as_text();
                    Ok(ctx
                        .sources()
                        .range(prefix.to_string()..)
                        .next()
                        .is_some_and(|s| s.starts_with(prefix)))
                }
            },
        }
    }

    /// Returns the `(attribute, literal)` pairs implied by top-level
    /// equality conjuncts of the form `<attribute> == <constant>`.
    ///
    /// The search-plan builder reads this to find id-pinned input nodes.
    pub fn conjunctive_equalities(&self) -> Vec<(String, String)> {
        match self {
            Predicate::And(a, b) => {
                let mut pairs = a.conjunctive_equalities();
                pairs.extend(b.conjunctive_equalities());
                pairs
            }
            Predicate::Compare { op: CompareOp::Equals, lhs, rhs } => {
                // only "<attribute> == <constant>" shapes contribute
                if let (
                    AttributeExpression::Attribute { qualifier: None, name },
                    AttributeExpression::Constant(value),
                ) = (lhs, rhs)
                {
                    vec![(name.clone(), value.as_text().to_string())]
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = match self {
            CompareOp::Equals => "==",
            CompareOp::NotEquals => "!=",
            CompareOp::Less => "<",
            CompareOp::LessEquals => "<=",
            CompareOp::Greater => ">",
            CompareOp::GreaterEquals => ">=",
        };
        f.write_str(token)
    }
}

impl std::fmt::Display for Predicate {
    /// Renders the predicate in the text grammar; re-parses to the same
    /// tree.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Predicate::Not(child) => write!(f, "!({})", child),
            Predicate::And(a, b) => write!(f, "({}) && ({})", a, b),
            Predicate::Or(a, b) => write!(f, "({}) || ({})", a, b),
            Predicate::Compare { op, lhs, rhs } => write!(f, "{} {} {}", lhs, op, rhs),
            Predicate::Function { function, args } => {
                let name = match function {
                    PredicateFunction::InSourceSet => "inSourceSet",
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

fn compare(op: CompareOp, a: &AttributeValue, b: &AttributeValue) -> Result<bool> {
    match op {
        CompareOp::Equals => Ok(match (a.is_number(), b.is_number()) {
            (true, true) => a.as_number()? == b.as_number()?,
            (true, false) | (false, true) => false,
            (false, false) => a.as_text() == b.as_text(),
        }),
        CompareOp::NotEquals => Ok(match (a.is_number(), b.is_number()) {
            (true, true) => a.as_number()? != b.as_number()?,
            (true, false) | (false, true) => true,
            (false, false) => a.as_text() != b.as_text(),
        }),
        // ordering comparisons are numeric only; non-numbers propagate an
        // error which match filters treat as "does not match"
        CompareOp::Less => Ok(a.as_number()? < b.as_number()?),
        CompareOp::LessEquals => Ok(a.as_number()? <= b.as_number()?),
        CompareOp::Greater => Ok(a.as_number()? > b.as_number()?),
        CompareOp::GreaterEquals => Ok(a.as_number()? >= b.as_number()?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::KeyValueAttributes;
    use std::collections::BTreeSet;

    fn pred(op: CompareOp, attr: &str, value: &str) -> Predicate {
        Predicate::Compare {
            op,
            lhs: AttributeExpression::attribute(attr),
            rhs: AttributeExpression::constant(value),
        }
    }

    #[test]
    fn test_compare_numeric_and_text() {
        let attrs: KeyValueAttributes =
            [("type", "6D"), ("latency", "10")].into_iter().collect();
        let ctx = EvaluationContext::local_attributes(&attrs);

        assert!(pred(CompareOp::Equals, "type", "6D").evaluate(&ctx).unwrap());
        assert!(!pred(CompareOp::Equals, "type", "3D").evaluate(&ctx).unwrap());
        assert!(pred(CompareOp::Less, "latency", "20").evaluate(&ctx).unwrap());
        assert!(pred(CompareOp::GreaterEquals, "latency", "10").evaluate(&ctx).unwrap());
        // ordering on a non-number is an evaluation error, not a panic
        assert!(pred(CompareOp::Less, "type", "20").evaluate(&ctx).is_err());
    }

    #[test]
    fn test_number_never_equals_text() {
        let attrs: KeyValueAttributes = [("v", "10")].into_iter().collect();
        let ctx = EvaluationContext::local_attributes(&attrs);
        assert!(!pred(CompareOp::Equals, "v", "ten").evaluate(&ctx).unwrap());
        assert!(pred(CompareOp::NotEquals, "v", "ten").evaluate(&ctx).unwrap());
    }

    #[test]
    fn test_boolean_connectives() {
        let attrs: KeyValueAttributes = [("a", "1"), ("b", "2")].into_iter().collect();
        let ctx = EvaluationContext::local_attributes(&attrs);
        let p = Predicate::And(
            Box::new(pred(CompareOp::Equals, "a", "1")),
            Box::new(Predicate::Not(Box::new(pred(CompareOp::Equals, "b", "3")))),
        );
        assert!(p.evaluate(&ctx).unwrap());
        let q = Predicate::Or(
            Box::new(pred(CompareOp::Equals, "a", "9")),
            Box::new(pred(CompareOp::Equals, "b", "2")),
        );
        assert!(q.evaluate(&ctx).unwrap());
    }

    #[test]
    fn test_conjunctive_equalities() {
        let p = Predicate::And(
            Box::new(pred(CompareOp::Equals, "id", "Art1")),
            Box::new(pred(CompareOp::Less, "latency", "10")),
        );
        assert_eq!(p.conjunctive_equalities(), vec![("id".to_string(), "Art1".to_string())]);
        // disjunctions contribute nothing
        let q = Predicate::Or(
            Box::new(pred(CompareOp::Equals, "id", "Art1")),
            Box::new(pred(CompareOp::Equals, "id", "Art2")),
        );
        assert!(q.conjunctive_equalities().is_empty());
    }

    #[test]
    fn test_in_source_set() {
        let attrs = KeyValueAttributes::new();
        let sources: BTreeSet<String> = ["cam1:pose"].iter().map(|s| s.to_string()).collect();
        let ctx = EvaluationContext::local(&attrs, &sources);
        let hit = Predicate::Function {
            function: PredicateFunction::InSourceSet,
            args: vec![AttributeExpression::constant("cam")],
        };
        assert!(hit.evaluate(&ctx).unwrap());
        let miss = Predicate::Function {
            function: PredicateFunction::InSourceSet,
            args: vec![AttributeExpression::constant("gps")],
        };
        assert!(!miss.evaluate(&ctx).unwrap());
    }
}
