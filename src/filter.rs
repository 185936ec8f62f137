//! Filter trees and their rendering into SQL `WHERE` clauses.
//!
//! Every value is bound as a positional parameter. Columns are qualified with
//! a per-depth alias (`t0` for the queried table, `t1` for a relation subquery
//! nested one level down, and so on) so relation filters can nest freely.

use crate::sqlite::Value;

/// Alias the root table of a read, update or delete is bound to.
pub const ROOT_ALIAS: &str = "t0";

/// Comparison applied to a single column.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOperator {
    Equal(Value),
    NotEqual(Value),
    GreaterThan(Value),
    GreaterThanOrEqual(Value),
    LessThan(Value),
    LessThanOrEqual(Value),
    /// Raw `LIKE` pattern, wildcards included.
    Like(String),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
}

impl QueryOperator {
    pub fn eq(value: impl Into<Value>) -> Self {
        QueryOperator::Equal(value.into())
    }

    pub fn lt(value: impl Into<Value>) -> Self {
        QueryOperator::LessThan(value.into())
    }

    pub fn gt(value: impl Into<Value>) -> Self {
        QueryOperator::GreaterThan(value.into())
    }

    pub fn contains(needle: impl Into<String>) -> Self {
        QueryOperator::Contains(needle.into())
    }

    pub fn starts_with(prefix: impl Into<String>) -> Self {
        QueryOperator::StartsWith(prefix.into())
    }

    pub fn ends_with(suffix: impl Into<String>) -> Self {
        QueryOperator::EndsWith(suffix.into())
    }

    pub fn is_in<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        QueryOperator::In(values.into_iter().map(Into::into).collect())
    }

    pub fn not_in<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        QueryOperator::NotIn(values.into_iter().map(Into::into).collect())
    }

    fn render(&self, column: &str, params: &mut Vec<Value>) -> String {
        let mut bind = |value: &Value| {
            params.push(value.clone());
            "?"
        };
        match self {
            QueryOperator::Equal(Value::Null) => format!("{column} IS NULL"),
            QueryOperator::NotEqual(Value::Null) => format!("{column} IS NOT NULL"),
            QueryOperator::Equal(value) => format!("{column} = {}", bind(value)),
            QueryOperator::NotEqual(value) => format!("{column} <> {}", bind(value)),
            QueryOperator::GreaterThan(value) => format!("{column} > {}", bind(value)),
            QueryOperator::GreaterThanOrEqual(value) => format!("{column} >= {}", bind(value)),
            QueryOperator::LessThan(value) => format!("{column} < {}", bind(value)),
            QueryOperator::LessThanOrEqual(value) => format!("{column} <= {}", bind(value)),
            QueryOperator::Like(pattern) => {
                format!("{column} LIKE {}", bind(&Value::Text(pattern.clone())))
            }
            QueryOperator::In(values) if values.is_empty() => "1 = 0".to_string(),
            QueryOperator::NotIn(values) if values.is_empty() => "1 = 1".to_string(),
            QueryOperator::In(values) => {
                let slots: Vec<&str> = values.iter().map(&mut bind).collect();
                format!("{column} IN ({})", slots.join(", "))
            }
            QueryOperator::NotIn(values) => {
                let slots: Vec<&str> = values.iter().map(&mut bind).collect();
                format!("{column} NOT IN ({})", slots.join(", "))
            }
            QueryOperator::Contains(needle) => {
                let pattern = format!("%{}%", escape_like(needle));
                format!("{column} LIKE {} ESCAPE '\\'", bind(&Value::Text(pattern)))
            }
            QueryOperator::StartsWith(prefix) => {
                let pattern = format!("{}%", escape_like(prefix));
                format!("{column} LIKE {} ESCAPE '\\'", bind(&Value::Text(pattern)))
            }
            QueryOperator::EndsWith(suffix) => {
                let pattern = format!("%{}", escape_like(suffix));
                format!("{column} LIKE {} ESCAPE '\\'", bind(&Value::Text(pattern)))
            }
        }
    }
}

/// How a relation filter quantifies over the related rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    /// The related row exists and matches.
    Is,
    /// No related row matches.
    IsNot,
    /// At least one related row matches.
    Some,
    /// Every related row matches; true when there are none.
    Every,
    /// No related row matches.
    None,
}

/// Composable filter over one table and, through `Related`, its relations.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Filter {
    #[default]
    All,
    Field {
        column: String,
        op: QueryOperator,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    /// Every listed filter must be false.
    Not(Vec<Filter>),
    /// Rows of `table` whose `foreign_column` equals this row's `local_column`.
    Related {
        table: String,
        foreign_column: String,
        local_column: String,
        quantifier: Quantifier,
        filter: Box<Filter>,
    },
}

impl Filter {
    pub fn field(column: &str, op: QueryOperator) -> Self {
        Filter::Field {
            column: column.to_string(),
            op,
        }
    }

    pub fn related(
        table: &str,
        foreign_column: &str,
        local_column: &str,
        quantifier: Quantifier,
        filter: Filter,
    ) -> Self {
        Filter::Related {
            table: table.to_string(),
            foreign_column: foreign_column.to_string(),
            local_column: local_column.to_string(),
            quantifier,
            filter: Box::new(filter),
        }
    }

    /// Combines two filters, flattening nested `And`s.
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, other) => other,
            (this, Filter::All) => this,
            (Filter::And(mut left), Filter::And(right)) => {
                left.extend(right);
                Filter::And(left)
            }
            (Filter::And(mut left), other) => {
                left.push(other);
                Filter::And(left)
            }
            (this, other) => Filter::And(vec![this, other]),
        }
    }

    /// Renders the filter against the root alias, returning the SQL and its
    /// parameters in binding order.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = self.render(ROOT_ALIAS, 0, &mut params);
        (sql, params)
    }

    fn render(&self, alias: &str, depth: usize, params: &mut Vec<Value>) -> String {
        match self {
            Filter::All => "1 = 1".to_string(),
            Filter::Field { column, op } => op.render(&qualify(alias, column), params),
            Filter::And(filters) if filters.is_empty() => "1 = 1".to_string(),
            Filter::Or(filters) if filters.is_empty() => "1 = 0".to_string(),
            Filter::Not(filters) if filters.is_empty() => "1 = 1".to_string(),
            Filter::And(filters) => join(filters, " AND ", alias, depth, params),
            Filter::Or(filters) => join(filters, " OR ", alias, depth, params),
            Filter::Not(filters) => {
                format!("NOT ({})", join(filters, " OR ", alias, depth, params))
            }
            Filter::Related {
                table,
                foreign_column,
                local_column,
                quantifier,
                filter,
            } => {
                let inner = format!("t{}", depth + 1);
                let condition = filter.render(&inner, depth + 1, params);
                let subquery = format!(
                    "SELECT 1 FROM {} AS {inner} WHERE {} = {} AND",
                    quote_ident(table),
                    qualify(&inner, foreign_column),
                    qualify(alias, local_column),
                );
                match quantifier {
                    Quantifier::Is | Quantifier::Some => {
                        format!("EXISTS ({subquery} ({condition}))")
                    }
                    Quantifier::IsNot | Quantifier::None => {
                        format!("NOT EXISTS ({subquery} ({condition}))")
                    }
                    Quantifier::Every => format!("NOT EXISTS ({subquery} NOT ({condition}))"),
                }
            }
        }
    }
}

fn join(
    filters: &[Filter],
    separator: &str,
    alias: &str,
    depth: usize,
    params: &mut Vec<Value>,
) -> String {
    filters
        .iter()
        .map(|filter| format!("({})", filter.render(alias, depth, params)))
        .collect::<Vec<_>>()
        .join(separator)
}

/// Double-quotes an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn qualify(alias: &str, column: &str) -> String {
    format!("{alias}.{}", quote_ident(column))
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
