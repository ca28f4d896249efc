//! Filtered List Queries
//!
//! `ListQuery` composes the `WHERE`, `ORDER BY` and `LIMIT/OFFSET` parts of a
//! listing query from typed filters and renders both the row query and the
//! matching `COUNT(*)` query, so a page and its total always agree.
//!
//! Column names are `&'static str` picked by the calling service (usually
//! through a sort enum), never caller-supplied text. Every value is bound.

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::pagination::{Page, PageRequest};

/// A bound filter value
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Uuid(Uuid),
    Int(i64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<Uuid> for FilterValue {
    fn from(value: Uuid) -> Self {
        FilterValue::Uuid(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Int(value)
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        FilterValue::Int(i64::from(value))
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        FilterValue::Timestamp(value)
    }
}

/// Sort direction for `ORDER BY`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone)]
enum Condition {
    Compare {
        column: &'static str,
        operator: &'static str,
        value: FilterValue,
    },
    Search {
        columns: &'static [&'static str],
        pattern: String,
    },
}

/// Builder for paginated, filtered listing queries
#[derive(Debug, Clone)]
pub struct ListQuery {
    select: &'static str,
    count: &'static str,
    conditions: Vec<Condition>,
    order: Vec<(&'static str, SortDirection)>,
    tiebreak: &'static str,
}

impl ListQuery {
    /// `select` is the `SELECT ... FROM ...` head, `count` the matching
    /// `SELECT COUNT(*) FROM ...` head. Neither may contain a `WHERE`.
    pub fn new(select: &'static str, count: &'static str) -> Self {
        Self {
            select,
            count,
            conditions: Vec::new(),
            order: Vec::new(),
            tiebreak: "id",
        }
    }

    /// Column appended last to `ORDER BY` so pages are stable
    pub fn tiebreak(mut self, column: &'static str) -> Self {
        self.tiebreak = column;
        self
    }

    pub fn eq(self, column: &'static str, value: impl Into<FilterValue>) -> Self {
        self.compare(column, "=", value.into())
    }

    pub fn eq_opt<V: Into<FilterValue>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.eq(column, value),
            None => self,
        }
    }

    pub fn gte_opt<V: Into<FilterValue>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.compare(column, ">=", value.into()),
            None => self,
        }
    }

    pub fn lte_opt<V: Into<FilterValue>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.compare(column, "<=", value.into()),
            None => self,
        }
    }

    /// Case-insensitive substring match over any of `columns`; blank terms are ignored
    pub fn search(mut self, columns: &'static [&'static str], term: Option<&str>) -> Self {
        if let Some(term) = term.map(str::trim).filter(|t| !t.is_empty()) {
            if !columns.is_empty() {
                self.conditions.push(Condition::Search {
                    columns,
                    pattern: format!("%{}%", escape_like(term)),
                });
            }
        }
        self
    }

    pub fn order_by(mut self, column: &'static str, direction: SortDirection) -> Self {
        self.order.push((column, direction));
        self
    }

    fn compare(mut self, column: &'static str, operator: &'static str, value: FilterValue) -> Self {
        self.conditions.push(Condition::Compare {
            column,
            operator,
            value,
        });
        self
    }

    fn push_conditions(&self, builder: &mut QueryBuilder<'static, Postgres>) {
        for (index, condition) in self.conditions.iter().enumerate() {
            builder.push(if index == 0 { " WHERE " } else { " AND " });

            match condition {
                Condition::Compare {
                    column,
                    operator,
                    value,
                } => {
                    builder.push(*column).push(" ").push(*operator).push(" ");
                    push_value(builder, value);
                }
                Condition::Search { columns, pattern } => {
                    builder.push("(");
                    for (i, column) in columns.iter().enumerate() {
                        if i > 0 {
                            builder.push(" OR ");
                        }
                        builder.push(*column).push(" ILIKE ");
                        builder.push_bind(pattern.clone());
                    }
                    builder.push(")");
                }
            }
        }
    }

    /// Row query for one page
    pub fn build_select(&self, page: PageRequest) -> QueryBuilder<'static, Postgres> {
        let mut builder = QueryBuilder::new(self.select);
        self.push_conditions(&mut builder);

        builder.push(" ORDER BY ");
        for (column, direction) in &self.order {
            builder.push(*column).push(" ").push(direction.as_sql()).push(", ");
        }
        builder.push(self.tiebreak).push(" ASC");

        builder.push(" LIMIT ");
        builder.push_bind(page.limit());
        builder.push(" OFFSET ");
        builder.push_bind(page.offset());

        builder
    }

    /// `COUNT(*)` query over the same filters
    pub fn build_count(&self) -> QueryBuilder<'static, Postgres> {
        let mut builder = QueryBuilder::new(self.count);
        self.push_conditions(&mut builder);
        builder
    }

    /// Runs the count and row queries and assembles the page
    pub async fn fetch_page<T>(&self, pool: &PgPool, page: PageRequest) -> Result<Page<T>, sqlx::Error>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let total_count: i64 = self
            .build_count()
            .build_query_scalar::<i64>()
            .fetch_one(pool)
            .await?;

        if total_count <= page.offset() {
            return Ok(Page::new(Vec::new(), total_count, page));
        }

        let items = self
            .build_select(page)
            .build_query_as::<T>()
            .fetch_all(pool)
            .await?;

        Ok(Page::new(items, total_count, page))
    }
}

fn push_value(builder: &mut QueryBuilder<'static, Postgres>, value: &FilterValue) {
    match value.clone() {
        FilterValue::Text(v) => {
            builder.push_bind(v);
        }
        FilterValue::Uuid(v) => {
            builder.push_bind(v);
        }
        FilterValue::Int(v) => {
            builder.push_bind(v);
        }
        FilterValue::Bool(v) => {
            builder.push_bind(v);
        }
        FilterValue::Timestamp(v) => {
            builder.push_bind(v);
        }
    }
}

/// Escapes `LIKE` metacharacters so the term matches literally
pub fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
