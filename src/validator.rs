//! Checks a raw JSON query and lowers it into a [`Query`].
//!
//! Validation is total: every section is checked, and the dataset is looked
//! up in the store, before anything is evaluated.

use itertools::Itertools;
use serde_json::{Map, Value as JsonValue};

use crate::{
    ast::{
        AggregateOp, Aggregation, Column, ColumnSource, Comparator, DatasetId, Direction, Filter,
        Grouping, Key, Order, Pattern, Query,
    },
    dataset::Field,
    error::QueryError,
    store::DatasetStore,
};

const WHERE: &str = "WHERE";
const OPTIONS: &str = "OPTIONS";
const TRANSFORMATIONS: &str = "TRANSFORMATIONS";
const COLUMNS: &str = "COLUMNS";
const ORDER: &str = "ORDER";
const GROUP: &str = "GROUP";
const APPLY: &str = "APPLY";
const DIR: &str = "dir";
const KEYS: &str = "keys";

type Object = Map<String, JsonValue>;

pub fn validate(raw: &JsonValue, store: &DatasetStore) -> Result<Query, QueryError> {
    let query = object(raw, "query")?;
    check_members(query, "query", &[WHERE, OPTIONS, TRANSFORMATIONS])?;
    let where_clause = required(query, "query", WHERE)?;
    let options = object(required(query, "query", OPTIONS)?, OPTIONS)?;
    check_members(options, OPTIONS, &[COLUMNS, ORDER])?;

    let mut scope = Scope::default();
    let filter = scope.filter(where_clause)?;
    let grouping = query
        .get(TRANSFORMATIONS)
        .map(|raw| scope.transformations(raw))
        .transpose()?;
    let columns = scope.columns(required(options, OPTIONS, COLUMNS)?, grouping.as_ref())?;
    let order = options
        .get(ORDER)
        .map(|raw| order(raw, &columns))
        .transpose()?;

    let dataset = scope.dataset.ok_or(QueryError::NoDataset)?;
    if !store.contains(&dataset) {
        return Err(QueryError::UnknownDataset(dataset));
    }

    Ok(Query {
        dataset,
        filter,
        columns,
        order,
        grouping,
    })
}

fn object<'a>(raw: &'a JsonValue, section: &'static str) -> Result<&'a Object, QueryError> {
    raw.as_object().ok_or(QueryError::NotAnObject(section))
}

fn array<'a>(raw: &'a JsonValue, section: &'static str) -> Result<&'a Vec<JsonValue>, QueryError> {
    raw.as_array().ok_or(QueryError::NotAnArray(section))
}

fn required<'a>(
    object: &'a Object,
    section: &'static str,
    key: &'static str,
) -> Result<&'a JsonValue, QueryError> {
    object
        .get(key)
        .ok_or(QueryError::MissingKey { section, key })
}

fn check_members(object: &Object, section: &'static str, allowed: &[&str]) -> Result<(), QueryError> {
    match object.keys().find(|key| !allowed.contains(&key.as_str())) {
        Some(key) => Err(QueryError::UnexpectedKey {
            section,
            key: key.clone(),
        }),
        None => Ok(()),
    }
}

fn single_member<'a>(
    object: &'a Object,
    section: &'static str,
) -> Result<(&'a String, &'a JsonValue), QueryError> {
    object
        .iter()
        .exactly_one()
        .map_err(|_| QueryError::NotSingleMember(section))
}

fn string<'a>(raw: &'a JsonValue, section: &'static str) -> Result<&'a str, QueryError> {
    raw.as_str().ok_or(QueryError::WrongValueType {
        op: section,
        expected: "string",
    })
}

/// Tracks the one dataset a query may reference.
#[derive(Default)]
struct Scope {
    dataset: Option<DatasetId>,
}

impl Scope {
    fn key(&mut self, raw: &str) -> Result<Field, QueryError> {
        let key = Key::parse(raw).ok_or_else(|| QueryError::InvalidKey(raw.to_owned()))?;
        match &self.dataset {
            None => self.dataset = Some(key.dataset),
            Some(first) if *first != key.dataset => {
                return Err(QueryError::MixedDatasets {
                    first: first.clone(),
                    second: key.dataset,
                })
            }
            Some(_) => {}
        }
        Ok(key.field)
    }

    fn filter(&mut self, raw: &JsonValue) -> Result<Filter, QueryError> {
        let node = object(raw, "filter")?;
        if node.is_empty() {
            return Ok(Filter::All);
        }

        let (op, body) = single_member(node, "filter")?;
        match op.as_str() {
            "AND" => Ok(Filter::And(self.children("AND", body)?)),
            "OR" => Ok(Filter::Or(self.children("OR", body)?)),
            "NOT" => Ok(Filter::Not(Box::new(self.filter(body)?))),
            "LT" => self.comparison(Comparator::Lt, body),
            "GT" => self.comparison(Comparator::Gt, body),
            "EQ" => self.comparison(Comparator::Eq, body),
            "IS" => self.is(body),
            other => Err(QueryError::UnknownOperator(other.to_owned())),
        }
    }

    fn children(&mut self, op: &'static str, raw: &JsonValue) -> Result<Vec<Filter>, QueryError> {
        let children = array(raw, op)?;
        if children.is_empty() {
            return Err(QueryError::Empty(op));
        }
        children.iter().map(|child| self.filter(child)).collect()
    }

    fn comparison(&mut self, op: Comparator, raw: &JsonValue) -> Result<Filter, QueryError> {
        let (key, value) = single_member(object(raw, op.token())?, op.token())?;
        let field = self.key(key)?;
        if !field.is_numeric() {
            return Err(QueryError::FieldTypeMismatch {
                op: op.token().to_owned(),
                key: key.clone(),
            });
        }
        let value = value.as_f64().ok_or(QueryError::WrongValueType {
            op: op.token(),
            expected: "number",
        })?;
        Ok(Filter::Compare { op, field, value })
    }

    fn is(&mut self, raw: &JsonValue) -> Result<Filter, QueryError> {
        let (key, value) = single_member(object(raw, "IS")?, "IS")?;
        let field = self.key(key)?;
        if field.is_numeric() {
            return Err(QueryError::FieldTypeMismatch {
                op: "IS".to_owned(),
                key: key.clone(),
            });
        }
        let value = string(value, "IS")?;
        let pattern =
            Pattern::parse(value).ok_or_else(|| QueryError::InteriorWildcard(value.to_owned()))?;
        Ok(Filter::Is { field, pattern })
    }

    fn transformations(&mut self, raw: &JsonValue) -> Result<Grouping, QueryError> {
        let transformations = object(raw, TRANSFORMATIONS)?;
        check_members(transformations, TRANSFORMATIONS, &[GROUP, APPLY])?;

        let group = array(required(transformations, TRANSFORMATIONS, GROUP)?, GROUP)?;
        if group.is_empty() {
            return Err(QueryError::Empty(GROUP));
        }
        let keys = group
            .iter()
            .map(|key| self.key(string(key, GROUP)?))
            .collect::<Result<Vec<_>, _>>()?;

        let apply = array(required(transformations, TRANSFORMATIONS, APPLY)?, APPLY)?;
        let mut aggregations: Vec<Aggregation> = Vec::with_capacity(apply.len());
        for rule in apply {
            let aggregation = self.apply_rule(rule)?;
            if aggregations.iter().any(|a| a.name == aggregation.name) {
                return Err(QueryError::DuplicateApplyKey(aggregation.name));
            }
            aggregations.push(aggregation);
        }

        Ok(Grouping { keys, aggregations })
    }

    fn apply_rule(&mut self, raw: &JsonValue) -> Result<Aggregation, QueryError> {
        let (name, body) = single_member(object(raw, APPLY)?, APPLY)?;
        if name.is_empty() || name.contains('_') {
            return Err(QueryError::InvalidApplyKey(name.clone()));
        }

        let (token, target) = single_member(object(body, "apply rule")?, "apply rule")?;
        let op = AggregateOp::from_token(token)
            .ok_or_else(|| QueryError::UnknownApplyToken(token.clone()))?;
        let target = string(target, "apply rule")?;
        let field = self.key(target)?;
        if op.requires_number() && !field.is_numeric() {
            return Err(QueryError::FieldTypeMismatch {
                op: token.clone(),
                key: target.to_owned(),
            });
        }

        Ok(Aggregation {
            name: name.clone(),
            op,
            field,
        })
    }

    fn columns(&mut self, raw: &JsonValue, grouping: Option<&Grouping>) -> Result<Vec<Column>, QueryError> {
        let columns = array(raw, COLUMNS)?;
        if columns.is_empty() {
            return Err(QueryError::Empty(COLUMNS));
        }

        columns
            .iter()
            .map(|raw| -> Result<Column, QueryError> {
                let name = string(raw, COLUMNS)?;
                let source = match grouping {
                    None => ColumnSource::Field(self.key(name)?),
                    Some(grouping) => self.grouped_source(name, grouping)?,
                };
                Ok(Column {
                    name: name.to_owned(),
                    source,
                })
            })
            .collect()
    }

    fn grouped_source(&mut self, name: &str, grouping: &Grouping) -> Result<ColumnSource, QueryError> {
        let ungrouped = || QueryError::UngroupedColumn(name.to_owned());
        if name.contains('_') {
            let field = self.key(name)?;
            grouping
                .keys
                .iter()
                .position(|key| *key == field)
                .map(ColumnSource::GroupKey)
                .ok_or_else(ungrouped)
        } else {
            grouping
                .aggregations
                .iter()
                .position(|aggregation| aggregation.name == name)
                .map(ColumnSource::Aggregate)
                .ok_or_else(ungrouped)
        }
    }
}

fn order(raw: &JsonValue, columns: &[Column]) -> Result<Order, QueryError> {
    let column_index = |raw: &JsonValue| -> Result<usize, QueryError> {
        let name = string(raw, ORDER)?;
        columns
            .iter()
            .position(|column| column.name == name)
            .ok_or_else(|| QueryError::OrderKeyNotInColumns(name.to_owned()))
    };

    if raw.is_string() {
        return Ok(Order {
            direction: Direction::Up,
            keys: vec![column_index(raw)?],
        });
    }

    let order = object(raw, ORDER)?;
    check_members(order, ORDER, &[DIR, KEYS])?;
    let direction = match string(required(order, ORDER, DIR)?, ORDER)? {
        "UP" => Direction::Up,
        "DOWN" => Direction::Down,
        other => return Err(QueryError::InvalidDirection(other.to_owned())),
    };
    let keys = array(required(order, ORDER, KEYS)?, ORDER)?;
    if keys.is_empty() {
        return Err(QueryError::Empty(ORDER));
    }

    Ok(Order {
        direction,
        keys: keys.iter().map(column_index).collect::<Result<_, _>>()?,
    })
}
