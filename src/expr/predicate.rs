use std::fmt;
use std::str::FromStr;

use crate::data::model::{EventRecord, Schema};
use crate::error::{PipelineError, Result};

use super::arith::parse_additive;
use super::lexer::{Token, TokenStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

impl CmpOp {
    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ge => lhs >= rhs,
            CmpOp::Gt => lhs > rhs,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Eq => "==",
            CmpOp::Ge => ">=",
            CmpOp::Gt => ">",
        }
    }

    fn from_token(tok: &Token) -> Option<Self> {
        match tok {
            Token::Lt => Some(CmpOp::Lt),
            Token::Le => Some(CmpOp::Le),
            Token::EqEq => Some(CmpOp::Eq),
            Token::Ge => Some(CmpOp::Ge),
            Token::Gt => Some(CmpOp::Gt),
            _ => None,
        }
    }
}

/// Boolean cut over record fields.
///
/// The textual form mirrors the usual selection-string syntax:
///
/// ```text
/// JpsiTriggers == 1 && dr0 < 0.1 && (Q2 < 8 || Q2 > 11) && !(Bmass > 5.6)
/// ```
///
/// The right-hand side of a comparison may be constant arithmetic
/// (`Phimass < 1.525+2.5*0.079`); it is folded when parsed. `Display` writes
/// the canonical form, which parses back to an equal tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Literal(bool),
    Compare { field: String, op: CmpOp, value: f64 },
    /// Vacuously true when empty.
    And(Vec<Predicate>),
    /// Vacuously false when empty.
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn compare(field: impl Into<String>, op: CmpOp, value: f64) -> Self {
        Predicate::Compare {
            field: field.into(),
            op,
            value,
        }
    }

    /// Conjunction, flattening nested `And`s.
    pub fn and(self, other: Predicate) -> Self {
        let mut children = match self {
            Predicate::And(c) => c,
            p => vec![p],
        };
        match other {
            Predicate::And(c) => children.extend(c),
            p => children.push(p),
        }
        Predicate::And(children)
    }

    /// Every field referenced, in first-seen order.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Predicate::Literal(_) => {}
            Predicate::Compare { field, .. } => {
                if !out.contains(&field.as_str()) {
                    out.push(field);
                }
            }
            Predicate::And(children) | Predicate::Or(children) => {
                children.iter().for_each(|c| c.collect_fields(out));
            }
            Predicate::Not(inner) => inner.collect_fields(out),
        }
    }

    /// Resolve field names against `schema`.
    pub fn bind(&self, schema: &Schema) -> Result<BoundPredicate> {
        let bound = match self {
            Predicate::Literal(b) => BoundPredicate::Literal(*b),
            Predicate::Compare { field, op, value } => BoundPredicate::Compare {
                column: schema.index_of(field).ok_or_else(|| {
                    PipelineError::PredicateFieldUnknown {
                        field: field.clone(),
                    }
                })?,
                op: *op,
                value: *value,
            },
            Predicate::And(children) => BoundPredicate::And(
                children
                    .iter()
                    .map(|c| c.bind(schema))
                    .collect::<Result<_>>()?,
            ),
            Predicate::Or(children) => BoundPredicate::Or(
                children
                    .iter()
                    .map(|c| c.bind(schema))
                    .collect::<Result<_>>()?,
            ),
            Predicate::Not(inner) => BoundPredicate::Not(Box::new(inner.bind(schema)?)),
        };
        Ok(bound)
    }

    /// Evaluate against a single record. Fails when a field is not in `schema`.
    pub fn evaluate(&self, schema: &Schema, record: &EventRecord) -> Result<bool> {
        Ok(self.bind(schema)?.matches(record))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Literal(b) => write!(f, "{b}"),
            Predicate::Compare { field, op, value } => {
                write!(f, "{field} {} {value}", op.symbol())
            }
            Predicate::And(children) if children.is_empty() => f.write_str("true"),
            Predicate::Or(children) if children.is_empty() => f.write_str("false"),
            Predicate::And(children) => write_joined(f, children, " && "),
            Predicate::Or(children) => write_joined(f, children, " || "),
            Predicate::Not(inner) => write!(f, "!({inner})"),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, children: &[Predicate], sep: &str) -> fmt::Result {
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        match child {
            Predicate::And(c) | Predicate::Or(c) if !c.is_empty() => write!(f, "({child})")?,
            _ => write!(f, "{child}")?,
        }
    }
    Ok(())
}

impl FromStr for Predicate {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let mut ts = TokenStream::new(s)?;
        let pred = parse_or(&mut ts)?;
        ts.expect_end()?;
        Ok(pred)
    }
}

// ---------------------------------------------------------------------------
// Parser: or := and ('||' and)* ; and := unary ('&&' unary)*
// ---------------------------------------------------------------------------

fn parse_or(ts: &mut TokenStream) -> Result<Predicate> {
    let mut children = vec![parse_and(ts)?];
    while ts.eat(&Token::OrOr) {
        children.push(parse_and(ts)?);
    }
    Ok(if children.len() == 1 {
        children.remove(0)
    } else {
        Predicate::Or(children)
    })
}

fn parse_and(ts: &mut TokenStream) -> Result<Predicate> {
    let mut children = vec![parse_unary(ts)?];
    while ts.eat(&Token::AndAnd) {
        children.push(parse_unary(ts)?);
    }
    Ok(if children.len() == 1 {
        children.remove(0)
    } else {
        Predicate::And(children)
    })
}

fn parse_unary(ts: &mut TokenStream) -> Result<Predicate> {
    if ts.eat(&Token::Bang) {
        return Ok(Predicate::Not(Box::new(parse_unary(ts)?)));
    }
    if ts.eat(&Token::LParen) {
        let inner = parse_or(ts)?;
        ts.expect(&Token::RParen, "')'")?;
        return Ok(inner);
    }
    let offset = ts.offset();
    match ts.next() {
        Some(Token::Ident(word)) if word == "true" => Ok(Predicate::Literal(true)),
        Some(Token::Ident(word)) if word == "false" => Ok(Predicate::Literal(false)),
        Some(Token::Ident(field)) => {
            let op_offset = ts.offset();
            let op = ts
                .next()
                .as_ref()
                .and_then(CmpOp::from_token)
                .ok_or_else(|| PipelineError::parse(op_offset, "expected comparison operator"))?;
            let rhs_offset = ts.offset();
            let rhs = parse_additive(ts)?;
            let value = rhs.constant_value().ok_or_else(|| {
                PipelineError::parse(rhs_offset, "right-hand side must be a constant")
            })?;
            if !value.is_finite() {
                return Err(PipelineError::parse(
                    rhs_offset,
                    format!("right-hand side {rhs} is not a finite number"),
                ));
            }
            Ok(Predicate::compare(field, op, value))
        }
        Some(tok) => Err(PipelineError::parse(offset, format!("unexpected {tok:?}"))),
        None => Err(PipelineError::parse(offset, "unexpected end of predicate")),
    }
}

// ---------------------------------------------------------------------------
// BoundPredicate – column indices resolved once, evaluated per record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum BoundPredicate {
    Literal(bool),
    Compare { column: usize, op: CmpOp, value: f64 },
    And(Vec<BoundPredicate>),
    Or(Vec<BoundPredicate>),
    Not(Box<BoundPredicate>),
}

impl BoundPredicate {
    /// Comparisons against an undefined value are false.
    pub fn matches(&self, record: &EventRecord) -> bool {
        match self {
            BoundPredicate::Literal(b) => *b,
            BoundPredicate::Compare { column, op, value } => {
                let lhs = record.get(*column).map_or(f64::NAN, |v| v.as_f64());
                op.apply(lhs, *value)
            }
            BoundPredicate::And(children) => children.iter().all(|c| c.matches(record)),
            BoundPredicate::Or(children) => children.iter().any(|c| c.matches(record)),
            BoundPredicate::Not(inner) => !inner.matches(record),
        }
    }
}
