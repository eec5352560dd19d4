use std::fmt;

use crate::dataset::Field;

pub type DatasetId = String;
pub type ApplyKey = String;

/// A `<dataset>_<field>` reference.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    pub dataset: DatasetId,
    pub field: Field,
}

impl Key {
    pub fn parse(s: &str) -> Option<Self> {
        let (dataset, field) = s.split_once('_')?;
        if dataset.trim().is_empty() {
            return None;
        }
        Some(Self {
            dataset: dataset.to_owned(),
            field: Field::from_name(field)?,
        })
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.dataset, self.field)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparator {
    Lt,
    Gt,
    Eq,
}

impl Comparator {
    pub fn token(self) -> &'static str {
        match self {
            Comparator::Lt => "LT",
            Comparator::Gt => "GT",
            Comparator::Eq => "EQ",
        }
    }
}

/// `IS` pattern with an optional `*` at either end.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    pub text: String,
    pub leading_wildcard: bool,
    pub trailing_wildcard: bool,
}

impl Pattern {
    /// `None` if a `*` appears anywhere but the ends.
    pub fn parse(raw: &str) -> Option<Self> {
        let (rest, leading_wildcard) = match raw.strip_prefix('*') {
            Some(rest) => (rest, true),
            None => (raw, false),
        };
        let (text, trailing_wildcard) = match rest.strip_suffix('*') {
            Some(text) => (text, true),
            None => (rest, false),
        };
        if text.contains('*') {
            return None;
        }
        Some(Self {
            text: text.to_owned(),
            leading_wildcard,
            trailing_wildcard,
        })
    }

    pub fn matches(&self, value: &str) -> bool {
        match (self.leading_wildcard, self.trailing_wildcard) {
            (false, false) => value == self.text,
            (true, false) => value.ends_with(&self.text),
            (false, true) => value.starts_with(&self.text),
            (true, true) => value.contains(&self.text),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    All,
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Compare {
        op: Comparator,
        field: Field,
        value: f64,
    },
    Is {
        field: Field,
        pattern: Pattern,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregateOp {
    Max,
    Min,
    Avg,
    Count,
    Sum,
}

impl AggregateOp {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "MAX" => Some(Self::Max),
            "MIN" => Some(Self::Min),
            "AVG" => Some(Self::Avg),
            "COUNT" => Some(Self::Count),
            "SUM" => Some(Self::Sum),
            _ => None,
        }
    }

    pub fn requires_number(self) -> bool {
        !matches!(self, Self::Count)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Aggregation {
    pub name: ApplyKey,
    pub op: AggregateOp,
    pub field: Field,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Grouping {
    pub keys: Vec<Field>,
    pub aggregations: Vec<Aggregation>,
}

/// Where an output column takes its value from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnSource {
    /// A record field; only without grouping.
    Field(Field),
    /// Position in [`Grouping::keys`].
    GroupKey(usize),
    /// Position in [`Grouping::aggregations`].
    Aggregate(usize),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub name: String,
    pub source: ColumnSource,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Order {
    pub direction: Direction,
    /// Positions in [`Query::columns`], most significant first.
    pub keys: Vec<usize>,
}

/// A query that passed validation against the store.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub dataset: DatasetId,
    pub filter: Filter,
    pub columns: Vec<Column>,
    pub order: Option<Order>,
    pub grouping: Option<Grouping>,
}
