//! Expression model shared by filters, group-by keys and query fields.
//!
//! [`Expr`] is a closed tree: constants, dimension lookups ([`Expr::Param`]), arithmetic,
//! comparisons, boolean combinators, conditionals, aggregates, the BOUNDED clamp and calls
//! to functions resolved through a [`FunctionRegistry`]. Expressions render back to a
//! canonical SQL-like form through `Display`.

pub mod functions;

pub use functions::{Arity, FunctionDef, FunctionRegistry};

use crate::bytemap::ByteMap;
use crate::error::DbError;
use crate::sql::Query;
use crate::types::Scalar;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Source of dimension values during evaluation.
pub trait Params {
    fn get_param(&self, name: &str) -> Option<Scalar>;
}

impl Params for ByteMap {
    fn get_param(&self, name: &str) -> Option<Scalar> {
        self.get(name)
    }
}

impl Params for BTreeMap<String, Scalar> {
    fn get_param(&self, name: &str) -> Option<Scalar> {
        self.get(name).cloned()
    }
}

impl Params for HashMap<String, Scalar> {
    fn get_param(&self, name: &str) -> Option<Scalar> {
        self.get(name).cloned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    fn symbol(&self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }

    fn holds(&self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        }
    }
}

/// Aggregation applied across the points of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Avg,
    Sum,
    Max,
    Min,
    Count,
}

impl AggFunc {
    pub fn name(&self) -> &'static str {
        match self {
            AggFunc::Avg => "AVG",
            AggFunc::Sum => "SUM",
            AggFunc::Max => "MAX",
            AggFunc::Min => "MIN",
            AggFunc::Count => "COUNT",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "AVG" => Some(AggFunc::Avg),
            "SUM" => Some(AggFunc::Sum),
            "MAX" => Some(AggFunc::Max),
            "MIN" => Some(AggFunc::Min),
            "COUNT" => Some(AggFunc::Count),
            _ => None,
        }
    }
}

/// LIKE pattern, matched anywhere in the value. `%` matches any run of characters
/// and `_` a single character, so `'web-_'` matches `"old web-1 pool"`.
#[derive(Clone)]
pub struct LikePattern {
    raw: String,
    regex: Option<Regex>,
}

impl LikePattern {
    pub fn new(raw: &str) -> Result<Self, DbError> {
        if !raw.contains(['%', '_']) {
            return Ok(LikePattern {
                raw: raw.to_string(),
                regex: None,
            });
        }
        let mut re = String::with_capacity(raw.len() + 8);
        re.push_str("(?s)");
        for c in raw.chars() {
            match c {
                '%' => re.push_str(".*"),
                '_' => re.push('.'),
                other => re.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
            }
        }
        let regex = Regex::new(&re)
            .map_err(|e| DbError::TypeMismatch(format!("invalid LIKE pattern '{}': {}", raw, e)))?;
        Ok(LikePattern {
            raw: raw.to_string(),
            regex: Some(regex),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, value: &str) -> bool {
        match &self.regex {
            Some(re) => re.is_match(value),
            None => value.contains(self.raw.as_str()),
        }
    }
}

impl PartialEq for LikePattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl fmt::Debug for LikePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LikePattern({:?})", self.raw)
    }
}

/// Right-hand side of an IN test.
#[derive(Debug, Clone, PartialEq)]
pub enum InList {
    Values(Vec<Scalar>),
    /// Resolved by the execution engine before the expression is evaluated.
    SubQuery(Box<Query>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant(Scalar),
    /// Looks up a dimension by name.
    Param(String),
    Negate(Box<Expr>),
    Arithmetic {
        op: ArithOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Like {
        operand: Box<Expr>,
        pattern: LikePattern,
        negated: bool,
    },
    In {
        operand: Box<Expr>,
        list: InList,
    },
    IsNull {
        operand: Box<Expr>,
        negated: bool,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    /// Yields `value` when `condition` holds, null otherwise.
    If {
        condition: Box<Expr>,
        value: Box<Expr>,
    },
    Aggregate {
        func: AggFunc,
        operand: Box<Expr>,
    },
    /// Passes `operand` through only when it lies within `[min, max]`.
    Bounded {
        operand: Box<Expr>,
        min: f64,
        max: f64,
    },
    Function {
        func: Arc<FunctionDef>,
        args: Vec<Expr>,
    },
}

impl From<&str> for Expr {
    fn from(name: &str) -> Self {
        Expr::Param(name.to_string())
    }
}

impl From<f64> for Expr {
    fn from(v: f64) -> Self {
        Expr::Constant(Scalar::Float(v))
    }
}

impl From<i32> for Expr {
    fn from(v: i32) -> Self {
        Expr::Constant(Scalar::Float(v as f64))
    }
}

impl From<Scalar> for Expr {
    fn from(v: Scalar) -> Self {
        Expr::Constant(v)
    }
}

fn boxed(e: impl Into<Expr>) -> Box<Expr> {
    Box::new(e.into())
}

// Constructors, mostly used when building expressions by hand.
impl Expr {
    pub fn param(name: &str) -> Expr {
        Expr::Param(name.to_string())
    }

    pub fn constant(v: impl Into<Scalar>) -> Expr {
        Expr::Constant(v.into())
    }

    pub fn aggregate(func: AggFunc, operand: impl Into<Expr>) -> Expr {
        Expr::Aggregate {
            func,
            operand: boxed(operand),
        }
    }

    pub fn sum(operand: impl Into<Expr>) -> Expr {
        Expr::aggregate(AggFunc::Sum, operand)
    }

    pub fn avg(operand: impl Into<Expr>) -> Expr {
        Expr::aggregate(AggFunc::Avg, operand)
    }

    pub fn min(operand: impl Into<Expr>) -> Expr {
        Expr::aggregate(AggFunc::Min, operand)
    }

    pub fn max(operand: impl Into<Expr>) -> Expr {
        Expr::aggregate(AggFunc::Max, operand)
    }

    pub fn count(operand: impl Into<Expr>) -> Expr {
        Expr::aggregate(AggFunc::Count, operand)
    }

    pub fn bounded(operand: impl Into<Expr>, min: f64, max: f64) -> Expr {
        Expr::Bounded {
            operand: boxed(operand),
            min,
            max,
        }
    }

    pub fn arithmetic(op: ArithOp, left: impl Into<Expr>, right: impl Into<Expr>) -> Expr {
        Expr::Arithmetic {
            op,
            left: boxed(left),
            right: boxed(right),
        }
    }

    pub fn add(left: impl Into<Expr>, right: impl Into<Expr>) -> Expr {
        Expr::arithmetic(ArithOp::Add, left, right)
    }

    pub fn sub(left: impl Into<Expr>, right: impl Into<Expr>) -> Expr {
        Expr::arithmetic(ArithOp::Sub, left, right)
    }

    pub fn mul(left: impl Into<Expr>, right: impl Into<Expr>) -> Expr {
        Expr::arithmetic(ArithOp::Mul, left, right)
    }

    pub fn div(left: impl Into<Expr>, right: impl Into<Expr>) -> Expr {
        Expr::arithmetic(ArithOp::Div, left, right)
    }

    pub fn compare(op: CmpOp, left: impl Into<Expr>, right: impl Into<Expr>) -> Expr {
        Expr::Compare {
            op,
            left: boxed(left),
            right: boxed(right),
        }
    }

    pub fn eq(left: impl Into<Expr>, right: impl Into<Expr>) -> Expr {
        Expr::compare(CmpOp::Eq, left, right)
    }

    pub fn ne(left: impl Into<Expr>, right: impl Into<Expr>) -> Expr {
        Expr::compare(CmpOp::Ne, left, right)
    }

    pub fn lt(left: impl Into<Expr>, right: impl Into<Expr>) -> Expr {
        Expr::compare(CmpOp::Lt, left, right)
    }

    pub fn gt(left: impl Into<Expr>, right: impl Into<Expr>) -> Expr {
        Expr::compare(CmpOp::Gt, left, right)
    }

    pub fn and(left: impl Into<Expr>, right: impl Into<Expr>) -> Expr {
        Expr::And(boxed(left), boxed(right))
    }

    pub fn or(left: impl Into<Expr>, right: impl Into<Expr>) -> Expr {
        Expr::Or(boxed(left), boxed(right))
    }

    pub fn not(operand: impl Into<Expr>) -> Expr {
        Expr::Not(boxed(operand))
    }

    pub fn if_then(condition: impl Into<Expr>, value: impl Into<Expr>) -> Expr {
        Expr::If {
            condition: boxed(condition),
            value: boxed(value),
        }
    }
}

impl Expr {
    /// Evaluates the expression against one point's dimensions.
    ///
    /// Missing dimensions read as null, and null propagates through arithmetic and
    /// comparisons. Aggregates and IN sub-queries cannot be evaluated per point.
    pub fn evaluate<P: Params + ?Sized>(&self, params: &P) -> Result<Scalar, DbError> {
        match self {
            Expr::Constant(v) => Ok(v.clone()),
            Expr::Param(name) => Ok(params.get_param(name).unwrap_or_default()),
            Expr::Negate(operand) => match operand.evaluate(params)? {
                Scalar::Null => Ok(Scalar::Null),
                Scalar::Float(f) => Ok(Scalar::Float(-f)),
                other => Err(mismatch("negate", &other)),
            },
            Expr::Arithmetic { op, left, right } => {
                let (l, r) = (left.evaluate(params)?, right.evaluate(params)?);
                let (l, r) = match (l, r) {
                    (Scalar::Null, _) | (_, Scalar::Null) => return Ok(Scalar::Null),
                    (Scalar::Float(l), Scalar::Float(r)) => (l, r),
                    (Scalar::Float(_), other) | (other, _) => {
                        return Err(mismatch(op.symbol(), &other))
                    }
                };
                Ok(match op {
                    ArithOp::Add => Scalar::Float(l + r),
                    ArithOp::Sub => Scalar::Float(l - r),
                    ArithOp::Mul => Scalar::Float(l * r),
                    ArithOp::Div if r == 0.0 => Scalar::Null,
                    ArithOp::Div => Scalar::Float(l / r),
                })
            }
            Expr::Compare { op, left, right } => {
                let (l, r) = (left.evaluate(params)?, right.evaluate(params)?);
                if l.is_null() || r.is_null() {
                    return Ok(Scalar::Null);
                }
                match compare_scalars(&l, &r) {
                    Some(ord) => Ok(Scalar::Bool(op.holds(ord))),
                    // Values of different kinds are never equal and have no order.
                    None => Ok(match op {
                        CmpOp::Eq => Scalar::Bool(false),
                        CmpOp::Ne => Scalar::Bool(true),
                        _ => Scalar::Null,
                    }),
                }
            }
            Expr::Like {
                operand,
                pattern,
                negated,
            } => match operand.evaluate(params)? {
                Scalar::Null => Ok(Scalar::Null),
                Scalar::Str(s) => Ok(Scalar::Bool(pattern.matches(&s) != *negated)),
                other => Ok(Scalar::Bool(pattern.matches(&other.to_string()) != *negated)),
            },
            Expr::In { operand, list } => {
                let value = operand.evaluate(params)?;
                if value.is_null() {
                    return Ok(Scalar::Null);
                }
                match list {
                    InList::Values(values) => Ok(Scalar::Bool(
                        values
                            .iter()
                            .any(|v| compare_scalars(&value, v) == Some(Ordering::Equal)),
                    )),
                    InList::SubQuery(_) => Err(DbError::TypeMismatch(format!(
                        "{} requires its sub-query to be executed first",
                        self
                    ))),
                }
            }
            Expr::IsNull { operand, negated } => {
                Ok(Scalar::Bool(operand.evaluate(params)?.is_null() != *negated))
            }
            Expr::And(left, right) => {
                if !truthy(left.evaluate(params)?)? {
                    return Ok(Scalar::Bool(false));
                }
                Ok(Scalar::Bool(truthy(right.evaluate(params)?)?))
            }
            Expr::Or(left, right) => {
                if truthy(left.evaluate(params)?)? {
                    return Ok(Scalar::Bool(true));
                }
                Ok(Scalar::Bool(truthy(right.evaluate(params)?)?))
            }
            Expr::Not(operand) => match operand.evaluate(params)? {
                Scalar::Null => Ok(Scalar::Null),
                Scalar::Bool(b) => Ok(Scalar::Bool(!b)),
                other => Err(mismatch("NOT", &other)),
            },
            Expr::If { condition, value } => {
                if truthy(condition.evaluate(params)?)? {
                    value.evaluate(params)
                } else {
                    Ok(Scalar::Null)
                }
            }
            Expr::Aggregate { .. } => Err(DbError::TypeMismatch(format!(
                "aggregate {} cannot be evaluated against a single point",
                self
            ))),
            Expr::Bounded { operand, min, max } => match operand.evaluate(params)? {
                Scalar::Null => Ok(Scalar::Null),
                Scalar::Float(f) if f >= *min && f <= *max => Ok(Scalar::Float(f)),
                Scalar::Float(_) => Ok(Scalar::Null),
                other => Err(mismatch("BOUNDED", &other)),
            },
            Expr::Function { func, args } => {
                let args = args
                    .iter()
                    .map(|a| a.evaluate(params))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(func.call(&args))
            }
        }
    }

    /// Whether this expression or any sub-expression is an aggregate.
    pub fn contains_aggregate(&self) -> bool {
        self.first_aggregate().is_some()
    }

    /// The outermost aggregate in this expression, searching left to right.
    pub fn first_aggregate(&self) -> Option<&Expr> {
        match self {
            Expr::Aggregate { .. } => Some(self),
            Expr::Constant(_) | Expr::Param(_) => None,
            Expr::Negate(e)
            | Expr::Not(e)
            | Expr::Like { operand: e, .. }
            | Expr::In { operand: e, .. }
            | Expr::IsNull { operand: e, .. }
            | Expr::Bounded { operand: e, .. } => e.first_aggregate(),
            Expr::Arithmetic { left, right, .. }
            | Expr::Compare { left, right, .. }
            | Expr::And(left, right)
            | Expr::Or(left, right)
            | Expr::If {
                condition: left,
                value: right,
            } => left.first_aggregate().or_else(|| right.first_aggregate()),
            Expr::Function { args, .. } => args.iter().find_map(|a| a.first_aggregate()),
        }
    }

    /// Whether an IN test anywhere in this expression reads from a sub-query.
    pub fn contains_sub_query(&self) -> bool {
        match self {
            Expr::In {
                list: InList::SubQuery(_),
                ..
            } => true,
            Expr::Constant(_) | Expr::Param(_) => false,
            Expr::Negate(e)
            | Expr::Not(e)
            | Expr::Like { operand: e, .. }
            | Expr::In { operand: e, .. }
            | Expr::IsNull { operand: e, .. }
            | Expr::Aggregate { operand: e, .. }
            | Expr::Bounded { operand: e, .. } => e.contains_sub_query(),
            Expr::Arithmetic { left, right, .. }
            | Expr::Compare { left, right, .. }
            | Expr::And(left, right)
            | Expr::Or(left, right)
            | Expr::If {
                condition: left,
                value: right,
            } => left.contains_sub_query() || right.contains_sub_query(),
            Expr::Function { args, .. } => args.iter().any(Expr::contains_sub_query),
        }
    }

    /// Whether the expression can produce a boolean at all. Used to reject filters
    /// like `WHERE a + 1` before any data flows through them.
    pub fn may_be_boolean(&self) -> bool {
        match self {
            Expr::Constant(v) => matches!(v, Scalar::Bool(_) | Scalar::Null),
            Expr::Param(_) | Expr::Function { .. } => true,
            Expr::If { value, .. } => value.may_be_boolean(),
            Expr::Compare { .. }
            | Expr::Like { .. }
            | Expr::In { .. }
            | Expr::IsNull { .. }
            | Expr::And(..)
            | Expr::Or(..)
            | Expr::Not(_) => true,
            Expr::Negate(_)
            | Expr::Arithmetic { .. }
            | Expr::Aggregate { .. }
            | Expr::Bounded { .. } => false,
        }
    }
}

fn truthy(v: Scalar) -> Result<bool, DbError> {
    match v {
        Scalar::Bool(b) => Ok(b),
        Scalar::Null => Ok(false),
        other => Err(mismatch("boolean operator", &other)),
    }
}

fn mismatch(what: &str, value: &Scalar) -> DbError {
    DbError::TypeMismatch(format!("{} cannot be applied to {} value {}", what, value.kind(), value))
}

/// Orders two non-null scalars of the same kind; `None` for mismatched kinds.
pub fn compare_scalars(a: &Scalar, b: &Scalar) -> Option<Ordering> {
    match (a, b) {
        (Scalar::Null, Scalar::Null) => Some(Ordering::Equal),
        (Scalar::Bool(a), Scalar::Bool(b)) => Some(a.cmp(b)),
        (Scalar::Float(a), Scalar::Float(b)) => a.partial_cmp(b),
        (Scalar::Str(a), Scalar::Str(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

pub(crate) fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn write_constant(f: &mut fmt::Formatter<'_>, v: &Scalar) -> fmt::Result {
    match v {
        Scalar::Str(s) => f.write_str(&quote(s)),
        Scalar::Bool(true) => f.write_str("TRUE"),
        Scalar::Bool(false) => f.write_str("FALSE"),
        other => write!(f, "{}", other),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant(v) => write_constant(f, v),
            Expr::Param(name) => f.write_str(name),
            Expr::Negate(e) => write!(f, "(-{})", e),
            Expr::Arithmetic { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            Expr::Compare { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            Expr::Like {
                operand,
                pattern,
                negated,
            } => {
                let not = if *negated { "NOT " } else { "" };
                write!(f, "({} {}LIKE {})", operand, not, quote(pattern.as_str()))
            }
            Expr::In { operand, list } => match list {
                InList::Values(values) => {
                    write!(f, "({} IN (", operand)?;
                    for (i, v) in values.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write_constant(f, v)?;
                    }
                    f.write_str("))")
                }
                InList::SubQuery(query) => write!(f, "({} IN ({}))", operand, query),
            },
            Expr::IsNull { operand, negated } => {
                let not = if *negated { "NOT " } else { "" };
                write!(f, "({} IS {}NULL)", operand, not)
            }
            Expr::And(l, r) => write!(f, "({} AND {})", l, r),
            Expr::Or(l, r) => write!(f, "({} OR {})", l, r),
            Expr::Not(e) => write!(f, "(NOT {})", e),
            Expr::If { condition, value } => write!(f, "IF({}, {})", condition, value),
            Expr::Aggregate { func, operand } => write!(f, "{}({})", func.name(), operand),
            Expr::Bounded { operand, min, max } => {
                write!(f, "BOUNDED({}, {}, {})", operand, min, max)
            }
            Expr::Function { func, args } => {
                write!(f, "{}(", func.name())?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims() -> ByteMap {
        ByteMap::new(vec![
            ("host", Scalar::from("web-01")),
            ("port", Scalar::from(443)),
            ("secure", Scalar::from(true)),
        ])
        .unwrap()
    }

    #[test]
    fn test_missing_param_is_null() {
        assert_eq!(Expr::param("absent").evaluate(&dims()).unwrap(), Scalar::Null);
        let e = Expr::add("absent", 1);
        assert_eq!(e.evaluate(&dims()).unwrap(), Scalar::Null);
        let e = Expr::gt("absent", 1);
        assert_eq!(e.evaluate(&dims()).unwrap(), Scalar::Null);
    }

    #[test]
    fn test_comparisons() {
        let d = dims();
        assert_eq!(Expr::eq("host", Expr::constant("web-01")).evaluate(&d).unwrap(), Scalar::Bool(true));
        assert_eq!(Expr::gt("port", 80).evaluate(&d).unwrap(), Scalar::Bool(true));
        // Mixed kinds: never equal, not ordered.
        assert_eq!(Expr::eq("port", Expr::constant("443")).evaluate(&d).unwrap(), Scalar::Bool(false));
        assert_eq!(Expr::ne("port", Expr::constant("443")).evaluate(&d).unwrap(), Scalar::Bool(true));
        assert_eq!(Expr::lt("port", Expr::constant("443")).evaluate(&d).unwrap(), Scalar::Null);
    }

    #[test]
    fn test_boolean_combinators_treat_null_as_false() {
        let d = dims();
        let e = Expr::or(Expr::eq("absent", 1), "secure");
        assert_eq!(e.evaluate(&d).unwrap(), Scalar::Bool(true));
        let e = Expr::and("secure", Expr::eq("absent", 1));
        assert_eq!(e.evaluate(&d).unwrap(), Scalar::Bool(false));
        let e = Expr::and("host", "secure");
        assert!(matches!(e.evaluate(&d).unwrap_err(), DbError::TypeMismatch(_)));
    }

    #[test]
    fn test_like_and_in() {
        let d = dims();
        let e = Expr::Like {
            operand: boxed("host"),
            pattern: LikePattern::new("web-%").unwrap(),
            negated: false,
        };
        assert_eq!(e.evaluate(&d).unwrap(), Scalar::Bool(true));
        let e = Expr::Like {
            operand: boxed("host"),
            pattern: LikePattern::new("eb").unwrap(),
            negated: true,
        };
        assert_eq!(e.evaluate(&d).unwrap(), Scalar::Bool(false));
        let e = Expr::In {
            operand: boxed("port"),
            list: InList::Values(vec![Scalar::from(80), Scalar::from(443)]),
        };
        assert_eq!(e.evaluate(&d).unwrap(), Scalar::Bool(true));
        assert_eq!(e.to_string(), "(port IN (80, 443))");
    }

    #[test]
    fn test_like_wildcards_match_anywhere() {
        let cases = [
            ("no_such", "is no_such host", true),
            ("no_such", "no such", true),
            ("no_such", "nosuch", false),
            ("172.56.%", "x172.56.1", true),
            ("172.56.%", "172.57.1", false),
            ("web-_", "old web-1 pool", true),
            ("%", "", true),
        ];
        for (pattern, value, expected) in cases {
            assert_eq!(LikePattern::new(pattern).unwrap().matches(value), expected, "{} LIKE {}", value, pattern);
        }
    }

    #[test]
    fn test_bounded_and_if() {
        let d = ByteMap::new(vec![("v", Scalar::from(150)), ("w", Scalar::from(50))]).unwrap();
        assert_eq!(Expr::bounded("v", 0.0, 100.0).evaluate(&d).unwrap(), Scalar::Null);
        assert_eq!(Expr::bounded("w", 0.0, 100.0).evaluate(&d).unwrap(), Scalar::Float(50.0));
        let e = Expr::if_then(Expr::gt("w", 10), "v");
        assert_eq!(e.evaluate(&d).unwrap(), Scalar::Float(150.0));
        let e = Expr::if_then(Expr::gt("w", 100), "v");
        assert_eq!(e.evaluate(&d).unwrap(), Scalar::Null);
    }

    #[test]
    fn test_aggregates_do_not_evaluate() {
        let e = Expr::sum("requests");
        assert!(e.contains_aggregate());
        assert!(matches!(e.evaluate(&dims()).unwrap_err(), DbError::TypeMismatch(_)));
        let e = Expr::if_then(Expr::eq("dim", Expr::constant("test")), Expr::avg("f"));
        assert_eq!(e.first_aggregate().map(|a| a.to_string()), Some("AVG(f)".to_string()));
    }

    #[test]
    fn test_rendering() {
        let e = Expr::if_then(Expr::eq("dim", Expr::constant("it's")), Expr::avg("myfield"));
        assert_eq!(e.to_string(), "IF((dim = 'it''s'), AVG(myfield))");
        let e = Expr::sum(Expr::bounded("bfield", 0.0, 100.0));
        assert_eq!(e.to_string(), "SUM(BOUNDED(bfield, 0, 100))");
        let e = Expr::div(Expr::sum("a"), Expr::count("b"));
        assert_eq!(e.to_string(), "(SUM(a) / COUNT(b))");
        let e = Expr::Negate(boxed(Expr::Negate(boxed(Expr::sum("x")))));
        assert_eq!(e.to_string(), "(-(-SUM(x)))");
        let e = Expr::eq(Expr::not("a"), "b");
        assert_eq!(e.to_string(), "((NOT a) = b)");
    }

    #[test]
    fn test_contains_sub_query() {
        let query = |sql: &str| {
            let no_fields = |_: &str| -> Result<Vec<crate::Field>, DbError> { Ok(Vec::new()) };
            crate::sql::parse(sql, &FunctionRegistry::new(), &no_fields).unwrap()
        };
        let in_sub_query = Expr::In {
            operand: boxed("host"),
            list: InList::SubQuery(Box::new(query("SELECT host FROM s"))),
        };
        assert!(Expr::and(Expr::gt("port", 1), Expr::not(in_sub_query)).contains_sub_query());
        let in_values = Expr::In {
            operand: boxed("host"),
            list: InList::Values(vec![Scalar::from("a")]),
        };
        assert!(!Expr::or(in_values, "secure").contains_sub_query());
    }

    #[test]
    fn test_may_be_boolean() {
        assert!(Expr::gt("a", 1).may_be_boolean());
        assert!(Expr::param("flag").may_be_boolean());
        assert!(!Expr::add("a", 1).may_be_boolean());
        assert!(!Expr::constant("text").may_be_boolean());
    }
}
