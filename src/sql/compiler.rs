use super::duration::parse_duration;
use super::lexer::syntax_error;
use super::parser::{parse_statement, BinOp, FromClause, GroupItem, InTarget, Node, Select, SelectItem};
use super::query::{Field, GroupBy, OrderBy, Query, QuerySource};
use super::normalize;
use crate::error::DbError;
use crate::expr::{AggFunc, ArithOp, CmpOp, Expr, FunctionRegistry, InList, LikePattern};
use crate::types::Scalar;
use chrono::TimeDelta;
use std::collections::HashSet;

/// Supplies the known fields of a table.
pub trait FieldSource {
    fn fields(&self, table: &str) -> Result<Vec<Field>, DbError>;
}

impl<F> FieldSource for F
where
    F: Fn(&str) -> Result<Vec<Field>, DbError>,
{
    fn fields(&self, table: &str) -> Result<Vec<Field>, DbError> {
        self(table)
    }
}

/// Where an expression is being compiled.
#[derive(Clone, Copy)]
enum Scope<'q> {
    /// Aggregated values: SELECT and HAVING. Bare identifiers resolve to
    /// aliases (HAVING only), then known fields, then `SUM(identifier)`.
    Value {
        aliases: &'q [Field],
        known: &'q [Field],
    },
    /// Per-point dimension values. Identifiers are dimension lookups.
    Dimension { clause: &'static str },
    /// Operand of an aggregate: identifiers are raw per-point values.
    Aggregated,
}

/// Compiles query text against a function registry and a table catalog.
pub struct Compiler<'a> {
    text: &'a str,
    functions: &'a FunctionRegistry,
    field_source: &'a dyn FieldSource,
}

impl<'a> Compiler<'a> {
    pub fn new(text: &'a str, functions: &'a FunctionRegistry, field_source: &'a dyn FieldSource) -> Self {
        Compiler {
            text,
            functions,
            field_source,
        }
    }

    pub fn compile(&self) -> Result<Query, DbError> {
        let select = parse_statement(self.text)?;
        self.compile_select(&select)
    }

    fn error(&self, pos: usize, message: impl Into<String>) -> DbError {
        syntax_error(self.text, pos, message)
    }

    fn compile_select(&self, select: &Select) -> Result<Query, DbError> {
        let (from, known, inherited) = match &select.from {
            FromClause::Table { name, .. } => {
                let table = normalize(name);
                let known = self.field_source.fields(&table).map_err(|e| match e {
                    e @ DbError::UnknownTable { .. } => e,
                    other => DbError::UnknownTable {
                        table: table.clone(),
                        reason: other.to_string(),
                    },
                })?;
                (QuerySource::Table(table), known, None)
            }
            FromClause::SubQuery(inner) => {
                let sub = self.compile_select(inner)?;
                let known = sub.fields.clone();
                let window = (sub.as_of_offset, sub.until_offset);
                (QuerySource::SubQuery(Box::new(sub)), known, Some(window))
            }
        };

        let mut as_of_offset = self.window_bound(select.as_of.as_ref(), "ASOF")?;
        let mut until_offset = self.window_bound(select.until.as_ref(), "UNTIL")?;
        if as_of_offset.is_some() && until_offset.is_none() {
            until_offset = Some(TimeDelta::zero());
        }
        if as_of_offset.is_none() && until_offset.is_none() {
            if let Some((as_of, until)) = inherited {
                as_of_offset = as_of;
                until_offset = until;
            }
        }

        let fields = self.compile_fields(&select.items, &known)?;

        let filter = select
            .filter
            .as_ref()
            .map(|n| self.compile_node(n, Scope::Dimension { clause: "WHERE" }))
            .transpose()?;

        let mut group_by: Vec<GroupBy> = Vec::new();
        let mut saw_all = false;
        let mut crosstab = None;
        let mut resolution = None;
        for item in &select.group_by {
            let (node, alias, pos) = match item {
                GroupItem::All => {
                    saw_all = true;
                    continue;
                }
                GroupItem::Expr { node, alias, pos } => (node, alias, *pos),
            };
            if let Node::Call { name, args, .. } = node {
                if name.eq_ignore_ascii_case("period") {
                    if resolution.is_some() {
                        return Err(DbError::ConflictingGroupBy("period() given more than once".into()));
                    }
                    resolution = Some(self.period(args, pos)?);
                    continue;
                }
                if name.eq_ignore_ascii_case("crosstab") {
                    if crosstab.is_some() {
                        return Err(DbError::ConflictingGroupBy("CROSSTAB given more than once".into()));
                    }
                    let [arg] = args.as_slice() else {
                        return Err(DbError::TypeMismatch("CROSSTAB takes exactly 1 argument".into()));
                    };
                    crosstab = Some(self.compile_node(arg, Scope::Dimension { clause: "GROUP BY" })?);
                    continue;
                }
            }
            let expr = self.compile_node(node, Scope::Dimension { clause: "GROUP BY" })?;
            let name = match (alias, node) {
                (Some(alias), _) => normalize(alias),
                (None, Node::Ident { name, .. }) => normalize(name),
                (None, _) => expr.to_string().to_lowercase(),
            };
            if group_by.iter().any(|g| g.name == name) {
                return Err(DbError::ConflictingGroupBy(format!("dimension {} grouped more than once", name)));
            }
            group_by.push(GroupBy { name, expr });
        }
        if saw_all && !group_by.is_empty() {
            return Err(DbError::ConflictingGroupBy(
                "GROUP BY * cannot be combined with explicit dimensions".into(),
            ));
        }
        group_by.sort_by(|a, b| a.name.cmp(&b.name));
        let group_by_all = group_by.is_empty();

        let having = select
            .having
            .as_ref()
            .map(|n| {
                self.compile_node(
                    n,
                    Scope::Value {
                        aliases: &fields,
                        known: &known,
                    },
                )
            })
            .transpose()?;

        let order_by = select
            .order_by
            .iter()
            .map(|(field, descending)| OrderBy {
                field: normalize(field),
                descending: *descending,
            })
            .collect();

        let (offset, limit) = match select.limit {
            Some((offset, count)) => (offset, Some(count)),
            None => (0, None),
        };

        Ok(Query {
            fields,
            from,
            filter,
            having,
            group_by,
            group_by_all,
            crosstab,
            as_of_offset,
            until_offset,
            resolution,
            order_by,
            limit,
            offset,
        })
    }

    fn window_bound(&self, literal: Option<&(String, usize)>, clause: &str) -> Result<Option<TimeDelta>, DbError> {
        let Some((text, pos)) = literal else {
            return Ok(None);
        };
        let d = parse_duration(text).map_err(|e| self.error(*pos, e))?;
        if d > TimeDelta::zero() {
            return Err(self.error(*pos, format!("{} offset must not be positive, got '{}'", clause, text)));
        }
        Ok(Some(d))
    }

    fn period(&self, args: &[Node], pos: usize) -> Result<TimeDelta, DbError> {
        let [Node::Literal(Scalar::Str(text))] = args else {
            return Err(self.error(pos, "period() takes a single duration string"));
        };
        let d = parse_duration(text).map_err(|e| self.error(pos, e))?;
        if d <= TimeDelta::zero() {
            return Err(self.error(pos, format!("period must be positive, got '{}'", text)));
        }
        Ok(d)
    }

    fn compile_fields(&self, items: &[SelectItem], known: &[Field]) -> Result<Vec<Field>, DbError> {
        let mut explicit: Vec<Option<Field>> = Vec::with_capacity(items.len());
        for item in items {
            let SelectItem::Expr { node, alias } = item else {
                explicit.push(None);
                continue;
            };
            let field = match (node, alias) {
                (Node::Ident { name, .. }, None) => {
                    let name = normalize(name);
                    match known.iter().find(|f| f.name.eq_ignore_ascii_case(&name)) {
                        Some(k) => k.clone(),
                        None => Field {
                            expr: Expr::sum(Expr::Param(name.clone())),
                            name,
                        },
                    }
                }
                (node, alias) => {
                    let expr = self.compile_node(node, Scope::Value { aliases: &[], known })?;
                    let name = match alias {
                        Some(alias) => alias.trim().to_string(),
                        None => expr.to_string(),
                    };
                    Field { name, expr }
                }
            };
            explicit.push(Some(field));
        }

        let mut taken: HashSet<String> = explicit
            .iter()
            .flatten()
            .map(|f| f.name.to_lowercase())
            .collect();
        let mut fields = Vec::new();
        for slot in explicit {
            match slot {
                Some(field) => fields.push(field),
                None => {
                    for k in known {
                        if taken.insert(k.name.to_lowercase()) {
                            fields.push(k.clone());
                        }
                    }
                }
            }
        }
        Ok(fields)
    }

    fn compile_node(&self, node: &Node, scope: Scope<'_>) -> Result<Expr, DbError> {
        let sub = |n: &Node| self.compile_node(n, scope);
        match node {
            Node::Literal(v) => Ok(Expr::Constant(v.clone())),
            Node::Ident { name, .. } => {
                let name = normalize(name);
                match scope {
                    Scope::Value { aliases, known } => {
                        let found = aliases
                            .iter()
                            .chain(known.iter())
                            .find(|f| f.name.eq_ignore_ascii_case(&name));
                        Ok(match found {
                            Some(f) => f.expr.clone(),
                            None => Expr::sum(Expr::Param(name)),
                        })
                    }
                    Scope::Dimension { .. } | Scope::Aggregated => Ok(Expr::Param(name)),
                }
            }
            Node::Neg(inner) => Ok(Expr::Negate(Box::new(sub(inner)?))),
            Node::Not(inner) => Ok(Expr::Not(Box::new(sub(inner)?))),
            Node::Binary { op, left, right } => {
                let (l, r) = (sub(left)?, sub(right)?);
                Ok(match op {
                    BinOp::Add => Expr::arithmetic(ArithOp::Add, l, r),
                    BinOp::Sub => Expr::arithmetic(ArithOp::Sub, l, r),
                    BinOp::Mul => Expr::arithmetic(ArithOp::Mul, l, r),
                    BinOp::Div => Expr::arithmetic(ArithOp::Div, l, r),
                    BinOp::Eq => Expr::compare(CmpOp::Eq, l, r),
                    BinOp::Ne => Expr::compare(CmpOp::Ne, l, r),
                    BinOp::Lt => Expr::compare(CmpOp::Lt, l, r),
                    BinOp::Le => Expr::compare(CmpOp::Le, l, r),
                    BinOp::Gt => Expr::compare(CmpOp::Gt, l, r),
                    BinOp::Ge => Expr::compare(CmpOp::Ge, l, r),
                    BinOp::And => Expr::And(Box::new(l), Box::new(r)),
                    BinOp::Or => Expr::Or(Box::new(l), Box::new(r)),
                })
            }
            Node::Like {
                operand,
                pattern,
                negated,
            } => Ok(Expr::Like {
                operand: Box::new(sub(operand)?),
                pattern: LikePattern::new(pattern)?,
                negated: *negated,
            }),
            Node::In {
                operand,
                target,
                negated,
                pos,
            } => {
                let list = match target {
                    InTarget::List(nodes) => {
                        let mut values = Vec::with_capacity(nodes.len());
                        for n in nodes {
                            match n {
                                Node::Literal(v) => values.push(v.clone()),
                                _ => return Err(self.error(*pos, "IN list may only contain literals")),
                            }
                        }
                        InList::Values(values)
                    }
                    InTarget::SubQuery(select) => InList::SubQuery(Box::new(self.compile_select(select)?)),
                };
                let e = Expr::In {
                    operand: Box::new(sub(operand)?),
                    list,
                };
                Ok(if *negated { Expr::Not(Box::new(e)) } else { e })
            }
            Node::IsNull { operand, negated } => Ok(Expr::IsNull {
                operand: Box::new(sub(operand)?),
                negated: *negated,
            }),
            Node::Call { name, args, pos } => self.compile_call(name, args, *pos, scope),
        }
    }

    fn compile_call(&self, name: &str, args: &[Node], pos: usize, scope: Scope<'_>) -> Result<Expr, DbError> {
        let upper = name.to_uppercase();

        if let Some(func) = AggFunc::from_name(&upper) {
            let [arg] = args else {
                return Err(DbError::TypeMismatch(format!("{} takes exactly 1 argument", upper)));
            };
            let operand = self.compile_node(arg, Scope::Aggregated)?;
            let agg = Expr::aggregate(func, operand);
            return match scope {
                Scope::Value { .. } => Ok(agg),
                Scope::Dimension { clause } => Err(DbError::AggregateInPredicate {
                    clause: clause.to_string(),
                    expr: agg.to_string(),
                }),
                Scope::Aggregated => Err(DbError::TypeMismatch(format!(
                    "aggregate {} cannot be nested inside another aggregate",
                    agg
                ))),
            };
        }

        match upper.as_str() {
            "BOUNDED" => {
                let [operand, min, max] = args else {
                    return Err(DbError::TypeMismatch("BOUNDED takes exactly 3 arguments".into()));
                };
                let (Some(min), Some(max)) = (numeric_literal(min), numeric_literal(max)) else {
                    return Err(self.error(pos, "BOUNDED limits must be numeric literals"));
                };
                Ok(Expr::bounded(self.compile_node(operand, scope)?, min, max))
            }
            "IF" => {
                let [condition, value] = args else {
                    return Err(DbError::TypeMismatch("IF takes exactly 2 arguments".into()));
                };
                let condition_scope = match scope {
                    Scope::Value { .. } => Scope::Dimension { clause: "IF condition" },
                    other => other,
                };
                Ok(Expr::if_then(
                    self.compile_node(condition, condition_scope)?,
                    self.compile_node(value, scope)?,
                ))
            }
            "PERIOD" | "CROSSTAB" => Err(self.error(pos, format!("{} is only allowed in GROUP BY", upper))),
            _ => {
                let arg_scope = match scope {
                    Scope::Value { .. } => Scope::Dimension { clause: "function argument" },
                    other => other,
                };
                let args = args
                    .iter()
                    .map(|a| self.compile_node(a, arg_scope))
                    .collect::<Result<Vec<_>, _>>()?;
                self.functions.call(&upper, args)
            }
        }
    }
}

fn numeric_literal(node: &Node) -> Option<f64> {
    match node {
        Node::Literal(Scalar::Float(f)) => Some(*f),
        _ => None,
    }
}
