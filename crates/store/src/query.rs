//! Filter, ordering and paging parameters for PostgREST requests

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "desc",
        }
    }
}

/// Query string builder.
///
/// Parameters are kept as an ordered list because a range filter repeats the
/// same column (`expiry_ts=gte.…&expiry_ts=lte.…`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    params: Vec<(String, String)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Columns to return
    pub fn select(mut self, columns: &str) -> Self {
        self.params.push(("select".to_string(), columns.to_string()));
        self
    }

    /// Equality filter
    pub fn eq(self, column: &str, value: &str) -> Self {
        self.filter(column, "eq", value)
    }

    /// Greater than or equal filter
    pub fn gte(self, column: &str, value: &str) -> Self {
        self.filter(column, "gte", value)
    }

    /// Less than or equal filter
    pub fn lte(self, column: &str, value: &str) -> Self {
        self.filter(column, "lte", value)
    }

    /// Matches rows where `column` is NULL
    pub fn is_null(self, column: &str) -> Self {
        self.filter(column, "is", "null")
    }

    /// Sort order. NULLs always sort last so an ordered window never fills
    /// up with rows that lack the sort column. A second call adds a
    /// tie-breaking column.
    pub fn order(mut self, column: &str, order: SortOrder) -> Self {
        let term = format!("{}.{}.nullslast", column, order.as_str());
        match self.params.iter_mut().find(|(key, _)| key == "order") {
            Some((_, value)) => {
                value.push(',');
                value.push_str(&term);
            }
            None => self.params.push(("order".to_string(), term)),
        }
        self
    }

    /// Maximum number of rows
    pub fn limit(mut self, count: usize) -> Self {
        self.params.push(("limit".to_string(), count.to_string()));
        self
    }

    /// Number of rows to skip
    pub fn offset(mut self, count: usize) -> Self {
        self.params.push(("offset".to_string(), count.to_string()));
        self
    }

    /// Conflict target for upserts
    pub fn on_conflict(mut self, columns: &str) -> Self {
        self.params.push(("on_conflict".to_string(), columns.to_string()));
        self
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.params
    }

    fn filter(mut self, column: &str, operator: &str, value: &str) -> Self {
        self.params
            .push((column.to_string(), format!("{}.{}", operator, value)));
        self
    }
}
