// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Text grammar for predicates and attribute expressions.

```text
predicate   = statement { ("&&" | "||") statement }
statement   = expression compOp expression
            | predicateFunction
            | "(" predicate ")"
            | "!" statement
expression  = multExpr { ("+" | "-") multExpr }
multExpr    = "-" multExpr | expExpr { ("*" | "/") expExpr }
expExpr     = value [ "^" expExpr ]          (right-associative)
value       = function | attribute | constant | "(" expression ")"
attribute   = [ident "."] ident
constant    = number | quoted string (C escapes, single or double quotes)
compOp      = "==" | "!=" | "<" | "<=" | ">" | ">="
```

`&&` and `||` bind with equal strength and associate to the left.

The grammar is built from `nom` combinators; a comparison and a
parenthesized predicate both may start with `(`, so `statement` relies on
`alt` backtracking to disambiguate.
*/

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, tag, take_while, take_while1},
    character::complete::{anychar, char as pchar, multispace0},
    combinator::{all_consuming, map, opt, recognize, value},
    multi::separated_list0,
    number::complete::recognize_float,
    sequence::{delimited, pair, preceded, terminated},
    IResult,
};

use crate::attribute_value::AttributeValue;
use crate::error::{GraphError, Result};
use crate::expression::{check_function_arity, AttributeExpression, BinaryOp, ExprFunction, UnaryOp};
use crate::predicate::{CompareOp, Predicate, PredicateFunction};

/// Parses a predicate from text.
pub fn parse_predicate(input: &str) -> Result<Predicate> {
    match all_consuming(terminated(predicate, multispace0))(input) {
        Ok((_, predicate)) => Ok(predicate),
        Err(e) => Err(to_parse_error(input, e)),
    }
}

/// Parses an attribute expression from text.
pub fn parse_expression(input: &str) -> Result<AttributeExpression> {
    match all_consuming(terminated(expression, multispace0))(input) {
        Ok((_, expression)) => Ok(expression),
        Err(e) => Err(to_parse_error(input, e)),
    }
}

fn to_parse_error(input: &str, err: nom::Err<nom::error::Error<&str>>) -> GraphError {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => GraphError::Parse {
            position: input.len() - e.input.len(),
            message: format!("expected {:?}", e.code),
        },
        nom::Err::Incomplete(_) => GraphError::Parse {
            position: input.len(),
            message: "incomplete input".into(),
        },
    }
}

/// A hard failure that stops `alt` backtracking, used for arity errors on
/// otherwise well-formed function calls.
fn arity_failure(input: &str) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Verify))
}

fn unknown_name(input: &str) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag))
}

// ============================================================================
// Predicates
// ============================================================================

fn predicate(input: &str) -> IResult<&str, Predicate> {
    let (mut input, mut lhs) = statement(input)?;
    loop {
        let connective: IResult<&str, &str> =
            preceded(multispace0, alt((tag("&&"), tag("||"))))(input);
        match connective {
            Ok((rest, op)) => {
                let (rest, rhs) = statement(rest)?;
                lhs = if op == "&&" {
                    Predicate::And(Box::new(lhs), Box::new(rhs))
                } else {
                    Predicate::Or(Box::new(lhs), Box::new(rhs))
                };
                input = rest;
            }
            Err(_) => return Ok((input, lhs)),
        }
    }
}

fn statement(input: &str) -> IResult<&str, Predicate> {
    preceded(
        multispace0,
        alt((negation, comparison, predicate_function, parenthesized_predicate)),
    )(input)
}

fn negation(input: &str) -> IResult<&str, Predicate> {
    let (input, _) = pchar('!')(input)?;
    let (input, inner) = statement(input)?;
    Ok((input, Predicate::Not(Box::new(inner))))
}

fn comparison(input: &str) -> IResult<&str, Predicate> {
    let (input, lhs) = expression(input)?;
    let (input, _) = multispace0(input)?;
    let (input, op) = comparison_op(input)?;
    let (input, rhs) = expression(input)?;
    Ok((input, Predicate::Compare { op, lhs, rhs }))
}

fn comparison_op(input: &str) -> IResult<&str, CompareOp> {
    alt((
        value(CompareOp::Equals, tag("==")),
        value(CompareOp::NotEquals, tag("!=")),
        value(CompareOp::LessEquals, tag("<=")),
        value(CompareOp::GreaterEquals, tag(">=")),
        value(CompareOp::Less, tag("<")),
        value(CompareOp::Greater, tag(">")),
    ))(input)
}

fn predicate_function(input: &str) -> IResult<&str, Predicate> {
    let (rest, name) = parse_ident(input)?;
    let (rest, args) = argument_list(rest)?;
    match name {
        "inSourceSet" => {
            if args.len() != 1 {
                return Err(arity_failure(input));
            }
            Ok((rest, Predicate::Function { function: PredicateFunction::InSourceSet, args }))
        }
        _ => Err(unknown_name(input)),
    }
}

fn parenthesized_predicate(input: &str) -> IResult<&str, Predicate> {
    delimited(pchar('('), predicate, preceded(multispace0, pchar(')')))(input)
}

// ============================================================================
// Expressions
// ============================================================================

fn expression(input: &str) -> IResult<&str, AttributeExpression> {
    let (mut input, mut lhs) = mult_expression(input)?;
    loop {
        let operator: IResult<&str, char> =
            preceded(multispace0, alt((pchar('+'), pchar('-'))))(input);
        match operator {
            Ok((rest, op)) => {
                let (rest, rhs) = mult_expression(rest)?;
                let op = if op == '+' { BinaryOp::Add } else { BinaryOp::Sub };
                lhs = AttributeExpression::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
                input = rest;
            }
            Err(_) => return Ok((input, lhs)),
        }
    }
}

fn mult_expression(input: &str) -> IResult<&str, AttributeExpression> {
    let (input, _) = multispace0(input)?;

    let negated: IResult<&str, char> = pchar('-')(input);
    if let Ok((rest, _)) = negated {
        let (rest, child) = mult_expression(rest)?;
        return Ok((rest, AttributeExpression::Unary { op: UnaryOp::Neg, child: Box::new(child) }));
    }

    let (mut input, mut lhs) = exp_expression(input)?;
    loop {
        let operator: IResult<&str, char> =
            preceded(multispace0, alt((pchar('*'), pchar('/'))))(input);
        match operator {
            Ok((rest, op)) => {
                let (rest, rhs) = exp_expression(rest)?;
                let op = if op == '*' { BinaryOp::Mul } else { BinaryOp::Div };
                lhs = AttributeExpression::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
                input = rest;
            }
            Err(_) => return Ok((input, lhs)),
        }
    }
}

fn exp_expression(input: &str) -> IResult<&str, AttributeExpression> {
    let (input, base) = value_term(input)?;
    let caret: IResult<&str, char> = preceded(multispace0, pchar('^'))(input);
    match caret {
        Ok((rest, _)) => {
            let (rest, exponent) = exp_expression(rest)?;
            Ok((
                rest,
                AttributeExpression::Binary {
                    op: BinaryOp::Pow,
                    lhs: Box::new(base),
                    rhs: Box::new(exponent),
                },
            ))
        }
        Err(_) => Ok((input, base)),
    }
}

fn value_term(input: &str) -> IResult<&str, AttributeExpression> {
    preceded(
        multispace0,
        alt((function_call, attribute_ref, constant, parenthesized_expression)),
    )(input)
}

fn parenthesized_expression(input: &str) -> IResult<&str, AttributeExpression> {
    delimited(pchar('('), expression, preceded(multispace0, pchar(')')))(input)
}

fn function_call(input: &str) -> IResult<&str, AttributeExpression> {
    let (rest, name) = parse_ident(input)?;
    let (rest, mut args) = argument_list(rest)?;
    match name {
        "sqrt" => {
            if args.len() != 1 {
                return Err(arity_failure(input));
            }
            Ok((
                rest,
                AttributeExpression::Unary { op: UnaryOp::Sqrt, child: Box::new(args.remove(0)) },
            ))
        }
        "min" | "max" => {
            if args.len() != 2 {
                return Err(arity_failure(input));
            }
            let rhs = Box::new(args.remove(1));
            let lhs = Box::new(args.remove(0));
            let op = if name == "min" { BinaryOp::Min } else { BinaryOp::Max };
            Ok((rest, AttributeExpression::Binary { op, lhs, rhs }))
        }
        "syncError" | "steadyState" | "sourceCount" => {
            let function = match name {
                "syncError" => ExprFunction::SyncError,
                "steadyState" => ExprFunction::SteadyState,
                _ => ExprFunction::SourceCount,
            };
            if check_function_arity(function, args.len()).is_err() {
                return Err(arity_failure(input));
            }
            Ok((rest, AttributeExpression::Function { function, args }))
        }
        _ => Err(unknown_name(input)),
    }
}

fn attribute_ref(input: &str) -> IResult<&str, AttributeExpression> {
    // a qualified reference is ident '.' ident with no whitespace inside
    let (input, first) = parse_ident(input)?;
    let (input, qualified) = opt(preceded(pchar('.'), parse_ident))(input)?;
    let expression = match qualified {
        Some(name) => AttributeExpression::Attribute {
            qualifier: Some(first.to_string()),
            name: name.to_string(),
        },
        None => AttributeExpression::Attribute { qualifier: None, name: first.to_string() },
    };
    Ok((input, expression))
}

fn constant(input: &str) -> IResult<&str, AttributeExpression> {
    alt((
        map(alt((quoted('\''), quoted('"'))), |text| {
            AttributeExpression::Constant(AttributeValue::text(text))
        }),
        map(recognize_float, |text: &str| AttributeExpression::constant(text)),
    ))(input)
}

fn argument_list(input: &str) -> IResult<&str, Vec<AttributeExpression>> {
    let (input, _) = multispace0(input)?;
    delimited(
        pchar('('),
        separated_list0(preceded(multispace0, pchar(',')), expression),
        preceded(multispace0, pchar(')')),
    )(input)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn parse_ident(input: &str) -> IResult<&str, &str> {
    recognize(pair(take_while1(is_ident_start), take_while(is_ident_continue)))(input)
}

/// A quoted string with C escapes.
fn quoted(quote: char) -> impl FnMut(&str) -> IResult<&str, String> {
    move |input: &str| {
        let (input, _) = pchar(quote)(input)?;
        let (input, content) = opt(escaped_transform(
            take_while1(move |c: char| c != quote && c != '\\'),
            '\\',
            alt((
                value('\n', pchar('n')),
                value('\t', pchar('t')),
                value('\r', pchar('r')),
                value('\0', pchar('0')),
                anychar,
            )),
        ))(input)?;
        let (input, _) = pchar(quote)(input)?;
        Ok((input, content.unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::KeyValueAttributes;
    use crate::context::EvaluationContext;

    fn eval_pred(text: &str, attrs: &KeyValueAttributes) -> bool {
        parse_predicate(text)
            .unwrap()
            .evaluate(&EvaluationContext::local_attributes(attrs))
            .unwrap_or(false)
    }

    fn eval_expr(text: &str) -> f64 {
        let attrs = KeyValueAttributes::new();
        parse_expression(text)
            .unwrap()
            .evaluate(&EvaluationContext::local_attributes(&attrs))
            .unwrap()
            .as_number()
            .unwrap()
    }

    #[test]
    fn test_comparisons() {
        let attrs: KeyValueAttributes =
            [("type", "6D"), ("latency", "10")].into_iter().collect();
        assert!(eval_pred("type=='6D'", &attrs));
        assert!(eval_pred("type == \"6D\"", &attrs));
        assert!(!eval_pred("type=='3D'", &attrs));
        assert!(eval_pred("latency < 20 && type == '6D'", &attrs));
        assert!(eval_pred("latency > 20 || type == '6D'", &attrs));
        assert!(eval_pred("!(latency > 20)", &attrs));
        assert!(eval_pred("latency != 11", &attrs));
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(eval_expr("1 + 2 * 3"), 7.0);
        assert_eq!(eval_expr("(1 + 2) * 3"), 9.0);
        assert_eq!(eval_expr("10 - 2 - 3"), 5.0);
        assert_eq!(eval_expr("-2 * 3"), -6.0);
        assert_eq!(eval_expr("2 ^ 3 ^ 2"), 512.0); // right-associative
        assert_eq!(eval_expr("sqrt(16)"), 4.0);
        assert_eq!(eval_expr("min(3, max(1, 7))"), 3.0);
    }

    #[test]
    fn test_qualified_attribute() {
        let e = parse_expression("AB.latency + 1").unwrap();
        match e {
            AttributeExpression::Binary { lhs, .. } => match *lhs {
                AttributeExpression::Attribute { qualifier, name } => {
                    assert_eq!(qualifier.as_deref(), Some("AB"));
                    assert_eq!(name, "latency");
                }
                other => panic!("unexpected lhs {:?}", other),
            },
            other => panic!("unexpected expression {:?}", other),
        }
    }

    #[test]
    fn test_id_equality_surfaces_in_plan_hook() {
        let p = parse_predicate("id == 'Art1' && latency < 10").unwrap();
        assert_eq!(p.conjunctive_equalities(), vec![("id".into(), "Art1".into())]);
    }

    #[test]
    fn test_string_escapes() {
        let attrs: KeyValueAttributes = [("name", "a\"b")].into_iter().collect();
        assert!(eval_pred("name == \"a\\\"b\"", &attrs));
    }

    #[test]
    fn test_empty_string_constant() {
        let attrs = KeyValueAttributes::new();
        // an absent attribute evaluates to the empty value
        assert!(eval_pred("room == ''", &attrs));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_predicate("latency <").is_err());
        assert!(parse_predicate("type == '6D").is_err());
        assert!(parse_predicate("bogusFn(1) == 2").is_err());
        assert!(parse_expression("1 + ").is_err());
        assert!(parse_expression("1 2").is_err());
    }

    #[test]
    fn test_function_arity_enforced() {
        assert!(parse_expression("syncError(1, 'a')").is_err());
        assert!(parse_expression("syncError(1, 'a', 'b')").is_ok());
        assert!(parse_expression("steadyState(0.1, 'A', 0.03, 0.01)").is_ok());
        assert!(parse_expression("steadyState(0.1, 'A', 0.03)").is_err());
        assert!(parse_expression("sourceCount()").is_ok());
        assert!(parse_expression("sourceCount('cam')").is_ok());
        assert!(parse_expression("sourceCount('a', 'b')").is_err());
    }

    #[test]
    fn test_predicate_function() {
        let p = parse_predicate("inSourceSet('cam')").unwrap();
        assert!(matches!(p, Predicate::Function { .. }));
    }
}
