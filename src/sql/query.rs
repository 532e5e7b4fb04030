use super::duration::format_duration;
use crate::expr::{quote, Expr};
use chrono::TimeDelta;
use std::fmt;

/// A named output column.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub expr: Expr,
}

impl Field {
    pub fn new(name: &str, expr: Expr) -> Self {
        Field {
            name: name.to_string(),
            expr,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} AS {}", self.expr, self.name)
    }
}

/// A named grouping dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupBy {
    pub name: String,
    pub expr: Expr,
}

impl GroupBy {
    pub fn new(name: &str, expr: Expr) -> Self {
        GroupBy {
            name: name.to_string(),
            expr,
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} AS {}", self.expr, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QuerySource {
    Table(String),
    SubQuery(Box<Query>),
}

/// A compiled query, ready for planning.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub fields: Vec<Field>,
    pub from: QuerySource,
    pub filter: Option<Expr>,
    pub having: Option<Expr>,
    /// Explicit grouping dimensions, sorted by name. Empty when `group_by_all` is set.
    pub group_by: Vec<GroupBy>,
    /// Group by every dimension present on the points.
    pub group_by_all: bool,
    pub crosstab: Option<Expr>,
    /// Start of the time window relative to now; never positive.
    pub as_of_offset: Option<TimeDelta>,
    /// End of the time window relative to now; never positive.
    pub until_offset: Option<TimeDelta>,
    pub resolution: Option<TimeDelta>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Query {
    /// The table read by this query, `None` when reading from a sub-query.
    pub fn table(&self) -> Option<&str> {
        match &self.from {
            QuerySource::Table(name) => Some(name),
            QuerySource::SubQuery(_) => None,
        }
    }

    pub fn sub_query(&self) -> Option<&Query> {
        match &self.from {
            QuerySource::Table(_) => None,
            QuerySource::SubQuery(q) => Some(q),
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }
}

/// Renders the query as SQL that compiles back to an equivalent query.
impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SELECT ")?;
        if self.fields.is_empty() {
            f.write_str("_")?;
        }
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", field)?;
        }
        match &self.from {
            QuerySource::Table(name) => write!(f, " FROM {}", name)?,
            QuerySource::SubQuery(q) => write!(f, " FROM ({})", q)?,
        }
        if let Some(d) = self.as_of_offset {
            write!(f, " ASOF {}", quote(&format_duration(d)))?;
        }
        if let Some(d) = self.until_offset {
            write!(f, " UNTIL {}", quote(&format_duration(d)))?;
        }
        if let Some(filter) = &self.filter {
            write!(f, " WHERE {}", filter)?;
        }

        let mut groups: Vec<String> = if self.group_by_all {
            vec!["*".to_string()]
        } else {
            self.group_by.iter().map(|g| g.to_string()).collect()
        };
        if let Some(crosstab) = &self.crosstab {
            groups.push(format!("CROSSTAB({})", crosstab));
        }
        if let Some(res) = self.resolution {
            groups.push(format!("period({})", quote(&format_duration(res))));
        }
        if !(groups.len() == 1 && self.group_by_all) {
            write!(f, " GROUP BY {}", groups.join(", "))?;
        }

        if let Some(having) = &self.having {
            write!(f, " HAVING {}", having)?;
        }
        if !self.order_by.is_empty() {
            let order: Vec<String> = self
                .order_by
                .iter()
                .map(|o| {
                    if o.descending {
                        format!("{} DESC", o.field)
                    } else {
                        o.field.clone()
                    }
                })
                .collect();
            write!(f, " ORDER BY {}", order.join(", "))?;
        }
        match (self.limit, self.offset) {
            (Some(limit), 0) => write!(f, " LIMIT {}", limit),
            (Some(limit), offset) => write!(f, " LIMIT {}, {}", offset, limit),
            (None, _) => Ok(()),
        }
    }
}
