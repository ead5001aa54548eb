use std::fmt;

use crate::data::model::{EventRecord, Schema};
use crate::error::{PipelineError, Result};

use super::lexer::{Token, TokenStream};

/// Arithmetic over record fields, used for derived features
/// (`max(MumMinIP/MumMinIPE, MupMinIP/MupMinIPE)`) and for folding cut
/// constants (`1.525-2.5*0.079`).
#[derive(Debug, Clone, PartialEq)]
pub enum ArithExpr {
    Const(f64),
    Field(String),
    Neg(Box<ArithExpr>),
    Add(Box<ArithExpr>, Box<ArithExpr>),
    Sub(Box<ArithExpr>, Box<ArithExpr>),
    Mul(Box<ArithExpr>, Box<ArithExpr>),
    Div(Box<ArithExpr>, Box<ArithExpr>),
    Max(Box<ArithExpr>, Box<ArithExpr>),
    Min(Box<ArithExpr>, Box<ArithExpr>),
    Abs(Box<ArithExpr>),
}

impl ArithExpr {
    pub fn parse(input: &str) -> Result<Self> {
        let mut ts = TokenStream::new(input)?;
        let expr = parse_additive(&mut ts)?;
        ts.expect_end()?;
        Ok(expr)
    }

    /// Field names referenced, in first-seen order, without repeats.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            ArithExpr::Const(_) => {}
            ArithExpr::Field(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            ArithExpr::Neg(a) | ArithExpr::Abs(a) => a.collect_fields(out),
            ArithExpr::Add(a, b)
            | ArithExpr::Sub(a, b)
            | ArithExpr::Mul(a, b)
            | ArithExpr::Div(a, b)
            | ArithExpr::Max(a, b)
            | ArithExpr::Min(a, b) => {
                a.collect_fields(out);
                b.collect_fields(out);
            }
        }
    }

    /// Value when the expression references no fields.
    pub fn constant_value(&self) -> Option<f64> {
        if self.fields().is_empty() {
            Some(self.eval_with(&|_| f64::NAN))
        } else {
            None
        }
    }

    /// Resolve field names to column indices.
    pub fn bind(&self, schema: &Schema) -> Result<BoundArith> {
        let bound = match self {
            ArithExpr::Const(v) => BoundArith::Const(*v),
            ArithExpr::Field(name) => BoundArith::Column(schema.index_of(name).ok_or_else(
                || PipelineError::SchemaMismatch(format!("feature input '{name}' not in schema")),
            )?),
            ArithExpr::Neg(a) => BoundArith::Neg(Box::new(a.bind(schema)?)),
            ArithExpr::Abs(a) => BoundArith::Abs(Box::new(a.bind(schema)?)),
            ArithExpr::Add(a, b) => BoundArith::Add(Box::new(a.bind(schema)?), Box::new(b.bind(schema)?)),
            ArithExpr::Sub(a, b) => BoundArith::Sub(Box::new(a.bind(schema)?), Box::new(b.bind(schema)?)),
            ArithExpr::Mul(a, b) => BoundArith::Mul(Box::new(a.bind(schema)?), Box::new(b.bind(schema)?)),
            ArithExpr::Div(a, b) => BoundArith::Div(Box::new(a.bind(schema)?), Box::new(b.bind(schema)?)),
            ArithExpr::Max(a, b) => BoundArith::Max(Box::new(a.bind(schema)?), Box::new(b.bind(schema)?)),
            ArithExpr::Min(a, b) => BoundArith::Min(Box::new(a.bind(schema)?), Box::new(b.bind(schema)?)),
        };
        Ok(bound)
    }

    fn eval_with(&self, lookup: &dyn Fn(&str) -> f64) -> f64 {
        match self {
            ArithExpr::Const(v) => *v,
            ArithExpr::Field(name) => lookup(name),
            ArithExpr::Neg(a) => -a.eval_with(lookup),
            ArithExpr::Abs(a) => a.eval_with(lookup).abs(),
            ArithExpr::Add(a, b) => a.eval_with(lookup) + b.eval_with(lookup),
            ArithExpr::Sub(a, b) => a.eval_with(lookup) - b.eval_with(lookup),
            ArithExpr::Mul(a, b) => a.eval_with(lookup) * b.eval_with(lookup),
            ArithExpr::Div(a, b) => a.eval_with(lookup) / b.eval_with(lookup),
            ArithExpr::Max(a, b) => nan_max(a.eval_with(lookup), b.eval_with(lookup)),
            ArithExpr::Min(a, b) => nan_min(a.eval_with(lookup), b.eval_with(lookup)),
        }
    }
}

impl fmt::Display for ArithExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArithExpr::Const(v) => write!(f, "{v}"),
            ArithExpr::Field(name) => f.write_str(name),
            ArithExpr::Neg(a) => write!(f, "-({a})"),
            ArithExpr::Abs(a) => write!(f, "abs({a})"),
            ArithExpr::Add(a, b) => write!(f, "({a} + {b})"),
            ArithExpr::Sub(a, b) => write!(f, "({a} - {b})"),
            ArithExpr::Mul(a, b) => write!(f, "({a} * {b})"),
            ArithExpr::Div(a, b) => write!(f, "({a} / {b})"),
            ArithExpr::Max(a, b) => write!(f, "max({a}, {b})"),
            ArithExpr::Min(a, b) => write!(f, "min({a}, {b})"),
        }
    }
}

// f64::max/min drop a NaN operand; an undefined input must stay undefined.
fn nan_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.max(b)
    }
}

fn nan_min(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.min(b)
    }
}

/// An [`ArithExpr`] with fields resolved to column indices.
#[derive(Debug, Clone)]
pub enum BoundArith {
    Const(f64),
    Column(usize),
    Neg(Box<BoundArith>),
    Add(Box<BoundArith>, Box<BoundArith>),
    Sub(Box<BoundArith>, Box<BoundArith>),
    Mul(Box<BoundArith>, Box<BoundArith>),
    Div(Box<BoundArith>, Box<BoundArith>),
    Max(Box<BoundArith>, Box<BoundArith>),
    Min(Box<BoundArith>, Box<BoundArith>),
    Abs(Box<BoundArith>),
}

impl BoundArith {
    pub fn eval(&self, record: &EventRecord) -> f64 {
        match self {
            BoundArith::Const(v) => *v,
            BoundArith::Column(i) => record.get(*i).map_or(f64::NAN, |v| v.as_f64()),
            BoundArith::Neg(a) => -a.eval(record),
            BoundArith::Abs(a) => a.eval(record).abs(),
            BoundArith::Add(a, b) => a.eval(record) + b.eval(record),
            BoundArith::Sub(a, b) => a.eval(record) - b.eval(record),
            BoundArith::Mul(a, b) => a.eval(record) * b.eval(record),
            BoundArith::Div(a, b) => a.eval(record) / b.eval(record),
            BoundArith::Max(a, b) => nan_max(a.eval(record), b.eval(record)),
            BoundArith::Min(a, b) => nan_min(a.eval(record), b.eval(record)),
        }
    }
}

// ---------------------------------------------------------------------------
// Recursive-descent parser
// ---------------------------------------------------------------------------

pub(crate) fn parse_additive(ts: &mut TokenStream) -> Result<ArithExpr> {
    let mut lhs = parse_multiplicative(ts)?;
    loop {
        if ts.eat(&Token::Plus) {
            lhs = ArithExpr::Add(Box::new(lhs), Box::new(parse_multiplicative(ts)?));
        } else if ts.eat(&Token::Minus) {
            lhs = ArithExpr::Sub(Box::new(lhs), Box::new(parse_multiplicative(ts)?));
        } else {
            return Ok(lhs);
        }
    }
}

fn parse_multiplicative(ts: &mut TokenStream) -> Result<ArithExpr> {
    let mut lhs = parse_unary(ts)?;
    loop {
        if ts.eat(&Token::Star) {
            lhs = ArithExpr::Mul(Box::new(lhs), Box::new(parse_unary(ts)?));
        } else if ts.eat(&Token::Slash) {
            lhs = ArithExpr::Div(Box::new(lhs), Box::new(parse_unary(ts)?));
        } else {
            return Ok(lhs);
        }
    }
}

fn parse_unary(ts: &mut TokenStream) -> Result<ArithExpr> {
    if ts.eat(&Token::Minus) {
        return match parse_unary(ts)? {
            ArithExpr::Const(v) => Ok(ArithExpr::Const(-v)),
            other => Ok(ArithExpr::Neg(Box::new(other))),
        };
    }
    if ts.eat(&Token::Plus) {
        return parse_unary(ts);
    }
    parse_primary(ts)
}

fn parse_primary(ts: &mut TokenStream) -> Result<ArithExpr> {
    let offset = ts.offset();
    match ts.next() {
        Some(Token::Number(v)) => Ok(ArithExpr::Const(v)),
        Some(Token::LParen) => {
            let inner = parse_additive(ts)?;
            ts.expect(&Token::RParen, "')'")?;
            Ok(inner)
        }
        Some(Token::Ident(name)) if ts.peek() == Some(&Token::LParen) => {
            ts.next();
            let func = name.to_ascii_lowercase();
            let first = parse_additive(ts)?;
            let expr = match func.as_str() {
                "abs" => ArithExpr::Abs(Box::new(first)),
                "max" | "min" => {
                    ts.expect(&Token::Comma, "','")?;
                    let second = parse_additive(ts)?;
                    if func == "max" {
                        ArithExpr::Max(Box::new(first), Box::new(second))
                    } else {
                        ArithExpr::Min(Box::new(first), Box::new(second))
                    }
                }
                _ => return Err(PipelineError::parse(offset, format!("unknown function '{name}'"))),
            };
            ts.expect(&Token::RParen, "')'")?;
            Ok(expr)
        }
        Some(Token::Ident(name)) => Ok(ArithExpr::Field(name)),
        Some(tok) => Err(PipelineError::parse(offset, format!("unexpected {tok:?}"))),
        None => Err(PipelineError::parse(offset, "unexpected end of expression")),
    }
}
