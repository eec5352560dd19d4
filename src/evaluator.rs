use std::{
    cmp::Ordering,
    collections::{hash_map, HashMap, HashSet},
};

use serde_json::{Map, Value as JsonValue};

use crate::{
    ast::{AggregateOp, ColumnSource, Comparator, Direction, Filter, Grouping, Order, Query},
    dataset::{Dataset, Record, Value},
    decimal::Decimal,
    error::InsightError,
};

/// Upper bound on the rows a query may return.
pub const MAX_RESULT_ROWS: usize = 5000;

const DECIMAL_PLACES: u32 = 2;

/// One output row, keyed by column name in `COLUMNS` order.
pub type ResultRow = Map<String, JsonValue>;

impl Filter {
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::All => true,
            Filter::And(children) => children.iter().all(|child| child.matches(record)),
            Filter::Or(children) => children.iter().any(|child| child.matches(record)),
            Filter::Not(child) => !child.matches(record),
            Filter::Compare { op, field, value } => match record.get(*field).as_number() {
                Some(actual) => match op {
                    Comparator::Lt => actual < *value,
                    Comparator::Gt => actual > *value,
                    Comparator::Eq => actual == *value,
                },
                None => false,
            },
            Filter::Is { field, pattern } => record
                .get(*field)
                .as_text()
                .map_or(false, |text| pattern.matches(text)),
        }
    }
}

/// Runs a validated query over `dataset`.
///
/// Fails with [`InsightError::ResultTooLarge`] rather than truncating when
/// more than `max_rows` rows would be returned.
pub fn execute(query: &Query, dataset: &Dataset, max_rows: usize) -> Result<Vec<ResultRow>, InsightError> {
    let matching = dataset
        .rows()
        .iter()
        .filter(|record| query.filter.matches(record));

    let mut rows: Vec<Vec<Value>> = match &query.grouping {
        None => {
            let matching: Vec<&Record> = matching.collect();
            check_size(matching.len(), max_rows)?;
            matching
                .into_iter()
                .map(|record| {
                    query
                        .columns
                        .iter()
                        .map(|column| match column.source {
                            ColumnSource::Field(field) => Some(record.get(field).clone()),
                            ColumnSource::GroupKey(_) | ColumnSource::Aggregate(_) => None,
                        })
                        .collect::<Option<Vec<_>>>()
                        .ok_or_else(|| malformed(query))
                })
                .collect::<Result<_, _>>()?
        }
        Some(grouping) => {
            let groups = group(grouping, matching);
            check_size(groups.len(), max_rows)?;
            groups
                .into_iter()
                .map(|(key, aggregates)| {
                    query
                        .columns
                        .iter()
                        .map(|column| match column.source {
                            ColumnSource::GroupKey(i) => key.get(i).cloned(),
                            ColumnSource::Aggregate(i) => aggregates.get(i).cloned(),
                            ColumnSource::Field(_) => None,
                        })
                        .collect::<Option<Vec<_>>>()
                        .ok_or_else(|| malformed(query))
                })
                .collect::<Result<_, _>>()?
        }
    };

    if let Some(order) = &query.order {
        if order.keys.iter().any(|&i| i >= query.columns.len()) {
            return Err(malformed(query));
        }
        sort(&mut rows, order);
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            query
                .columns
                .iter()
                .zip(row)
                .map(|(column, value)| (column.name.clone(), value.to_json()))
                .collect()
        })
        .collect())
}

/// A hand-built query whose columns or order disagree with its grouping.
fn malformed(query: &Query) -> InsightError {
    InsightError::Internal(format!(
        "query over {:?} has columns that do not fit its grouping",
        query.dataset
    ))
}

fn check_size(rows: usize, limit: usize) -> Result<(), InsightError> {
    if rows > limit {
        return Err(InsightError::ResultTooLarge { rows, limit });
    }
    Ok(())
}

/// Stable multi-key sort; ties keep their incoming order in both directions.
fn sort(rows: &mut [Vec<Value>], order: &Order) {
    rows.sort_by(|a, b| {
        let ordering = order
            .keys
            .iter()
            .map(|&i| a[i].natural_cmp(&b[i]))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal);
        match order.direction {
            Direction::Up => ordering,
            Direction::Down => ordering.reverse(),
        }
    });
}

enum Accumulator {
    Max(f64),
    Min(f64),
    Sum(Decimal),
    Avg { sum: Decimal, rows: u64 },
    Count(HashSet<Value>),
}

impl Accumulator {
    fn new(op: AggregateOp) -> Self {
        match op {
            AggregateOp::Max => Self::Max(f64::NEG_INFINITY),
            AggregateOp::Min => Self::Min(f64::INFINITY),
            AggregateOp::Sum => Self::Sum(Decimal::default()),
            AggregateOp::Avg => Self::Avg {
                sum: Decimal::default(),
                rows: 0,
            },
            AggregateOp::Count => Self::Count(HashSet::new()),
        }
    }

    fn add(&mut self, value: &Value) {
        match self {
            Self::Max(max) => *max = max.max(value.as_number().unwrap_or(f64::NEG_INFINITY)),
            Self::Min(min) => *min = min.min(value.as_number().unwrap_or(f64::INFINITY)),
            Self::Sum(sum) => {
                if let Some(value) = value.as_number().and_then(Decimal::from_f64) {
                    *sum += &value;
                }
            }
            Self::Avg { sum, rows } => {
                if let Some(value) = value.as_number().and_then(Decimal::from_f64) {
                    *sum += &value;
                }
                *rows += 1;
            }
            Self::Count(seen) => {
                if !seen.contains(value) {
                    seen.insert(value.clone());
                }
            }
        }
    }

    fn finish(self) -> Value {
        let number = match self {
            Self::Max(max) => max,
            Self::Min(min) => min,
            Self::Sum(sum) => sum.round(DECIMAL_PLACES).to_f64(),
            Self::Avg { sum, rows } => sum.div_rounded(rows.max(1), DECIMAL_PLACES).to_f64(),
            Self::Count(seen) => seen.len() as f64,
        };
        Value::Number(number)
    }
}

/// Partitions records by their group-key tuple, folding every aggregation
/// as records arrive. Groups come back in first-seen order.
fn group<'a>(
    grouping: &Grouping,
    records: impl Iterator<Item = &'a Record>,
) -> Vec<(Vec<Value>, Vec<Value>)> {
    let mut index: HashMap<Vec<Value>, usize> = HashMap::new();
    let mut groups: Vec<(Vec<Value>, Vec<Accumulator>)> = vec![];

    for record in records {
        let key: Vec<Value> = grouping
            .keys
            .iter()
            .map(|field| record.get(*field).clone())
            .collect();
        let slot = match index.entry(key) {
            hash_map::Entry::Occupied(occupied) => *occupied.get(),
            hash_map::Entry::Vacant(vacant) => {
                let accumulators = grouping
                    .aggregations
                    .iter()
                    .map(|aggregation| Accumulator::new(aggregation.op))
                    .collect();
                groups.push((vacant.key().clone(), accumulators));
                *vacant.insert(groups.len() - 1)
            }
        };

        let accumulators = &mut groups[slot].1;
        for (accumulator, aggregation) in accumulators.iter_mut().zip(&grouping.aggregations) {
            accumulator.add(record.get(aggregation.field));
        }
    }

    groups
        .into_iter()
        .map(|(key, accumulators)| {
            let aggregates = accumulators.into_iter().map(Accumulator::finish).collect();
            (key, aggregates)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        ast::{Aggregation, Column, Pattern},
        dataset::{course_record, DatasetKind, Field},
    };

    fn dataset() -> Dataset {
        Dataset::new(
            "courses",
            DatasetKind::Courses,
            vec![
                course_record("cpsc", "310", 80.0, "holmes", 2015.0),
                course_record("cpsc", "110", 70.0, "kiczales", 2015.0),
                course_record("math", "100", 70.0, "", 1900.0),
                course_record("cpsc", "310", 90.0, "holmes", 2016.0),
                course_record("math", "200", 65.5, "loewen", 2016.0),
            ],
        )
    }

    fn column(field: Field) -> Column {
        Column {
            name: format!("courses_{}", field),
            source: ColumnSource::Field(field),
        }
    }

    fn query(filter: Filter, columns: Vec<Column>) -> Query {
        Query {
            dataset: "courses".to_owned(),
            filter,
            columns,
            order: None,
            grouping: None,
        }
    }

    fn gt(field: Field, value: f64) -> Filter {
        Filter::Compare {
            op: Comparator::Gt,
            field,
            value,
        }
    }

    fn is(field: Field, pattern: &str) -> Filter {
        Filter::Is {
            field,
            pattern: Pattern::parse(pattern).unwrap(),
        }
    }

    fn ids(rows: &[ResultRow]) -> Vec<&str> {
        rows.iter()
            .map(|row| row["courses_uuid"].as_str().unwrap())
            .collect()
    }

    fn run(query: &Query) -> Vec<ResultRow> {
        execute(query, &dataset(), MAX_RESULT_ROWS).unwrap()
    }

    #[test]
    fn empty_filter_returns_everything_in_order() {
        let rows = run(&query(Filter::All, vec![column(Field::Id)]));

        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0], json!({ "courses_id": "310" }).as_object().unwrap().clone());
        assert_eq!(rows[4]["courses_id"], json!("200"));
    }

    #[test]
    fn columns_keep_requested_order() {
        let rows = run(&query(
            Filter::All,
            vec![column(Field::Year), column(Field::Dept), column(Field::Avg)],
        ));

        let keys: Vec<_> = rows[0].keys().cloned().collect();
        assert_eq!(keys, ["courses_year", "courses_dept", "courses_avg"]);
        assert_eq!(rows[4]["courses_avg"], json!(65.5));
    }

    #[test]
    fn logic_combinators() {
        let uuid = || vec![column(Field::Uuid)];

        let and = run(&query(
            Filter::And(vec![gt(Field::Avg, 69.0), is(Field::Dept, "cpsc")]),
            uuid(),
        ));
        assert_eq!(ids(&and), ["cpsc-310-holmes", "cpsc-110-kiczales", "cpsc-310-holmes"]);

        let swapped = run(&query(
            Filter::And(vec![is(Field::Dept, "cpsc"), gt(Field::Avg, 69.0)]),
            uuid(),
        ));
        assert_eq!(and, swapped);

        let or = run(&query(
            Filter::Or(vec![gt(Field::Avg, 85.0), is(Field::Instructor, "")]),
            uuid(),
        ));
        assert_eq!(ids(&or), ["math-100-", "cpsc-310-holmes"]);

        let double_not = run(&query(
            Filter::Not(Box::new(Filter::Not(Box::new(gt(Field::Avg, 75.0))))),
            uuid(),
        ));
        assert_eq!(double_not, run(&query(gt(Field::Avg, 75.0), uuid())));

        let not = run(&query(Filter::Not(Box::new(is(Field::Dept, "*s*"))), uuid()));
        assert_eq!(ids(&not), ["math-100-", "math-200-loewen"]);
    }

    #[test]
    fn comparisons_are_strict() {
        let uuid = vec![column(Field::Uuid)];
        let eq = Filter::Compare {
            op: Comparator::Eq,
            field: Field::Avg,
            value: 70.0,
        };
        let lt = Filter::Compare {
            op: Comparator::Lt,
            field: Field::Avg,
            value: 70.0,
        };

        assert_eq!(run(&query(eq, uuid.clone())).len(), 2);
        assert_eq!(ids(&run(&query(lt, uuid))), ["math-200-loewen"]);
    }

    #[test]
    fn sort_single_key_is_stable() {
        let mut q = query(Filter::All, vec![column(Field::Avg), column(Field::Uuid)]);
        q.order = Some(Order {
            direction: Direction::Up,
            keys: vec![0],
        });

        let rows = run(&q);

        assert_eq!(
            ids(&rows),
            ["math-200-loewen", "cpsc-110-kiczales", "math-100-", "cpsc-310-holmes", "cpsc-310-holmes"]
        );
    }

    #[test]
    fn sort_down_by_multiple_keys() {
        let mut q = query(
            Filter::All,
            vec![column(Field::Dept), column(Field::Avg), column(Field::Uuid)],
        );
        q.order = Some(Order {
            direction: Direction::Down,
            keys: vec![0, 1],
        });

        let rows = run(&q);

        assert_eq!(
            ids(&rows),
            ["math-100-", "math-200-loewen", "cpsc-310-holmes", "cpsc-310-holmes", "cpsc-110-kiczales"]
        );
        assert_eq!(rows[2]["courses_avg"], json!(90));
    }

    #[test]
    fn grouping_and_aggregation() {
        let grouping = Grouping {
            keys: vec![Field::Dept],
            aggregations: vec![
                Aggregation {
                    name: "best".to_owned(),
                    op: AggregateOp::Max,
                    field: Field::Avg,
                },
                Aggregation {
                    name: "worst".to_owned(),
                    op: AggregateOp::Min,
                    field: Field::Avg,
                },
                Aggregation {
                    name: "mean".to_owned(),
                    op: AggregateOp::Avg,
                    field: Field::Avg,
                },
                Aggregation {
                    name: "total".to_owned(),
                    op: AggregateOp::Sum,
                    field: Field::Avg,
                },
                Aggregation {
                    name: "teachers".to_owned(),
                    op: AggregateOp::Count,
                    field: Field::Instructor,
                },
            ],
        };
        let mut columns = vec![Column {
            name: "courses_dept".to_owned(),
            source: ColumnSource::GroupKey(0),
        }];
        columns.extend(grouping.aggregations.iter().enumerate().map(|(i, a)| Column {
            name: a.name.clone(),
            source: ColumnSource::Aggregate(i),
        }));
        let q = Query {
            grouping: Some(grouping),
            ..query(Filter::All, columns)
        };

        let rows = run(&q);

        assert_eq!(
            rows,
            vec![
                json!({ "courses_dept": "cpsc", "best": 90, "worst": 70, "mean": 80, "total": 240, "teachers": 2 }),
                json!({ "courses_dept": "math", "best": 70, "worst": 65.5, "mean": 67.75, "total": 135.5, "teachers": 2 }),
            ]
            .into_iter()
            .map(|row| row.as_object().unwrap().clone())
            .collect::<Vec<_>>()
        );
    }

    #[test]
    fn average_and_sum_round_half_away_from_zero() {
        let data = Dataset::new(
            "courses",
            DatasetKind::Courses,
            vec![
                course_record("cpsc", "310", 1.005, "", 2015.0),
                course_record("cpsc", "310", 1.005, "", 2015.0),
                course_record("cpsc", "310", 1.0, "", 2015.0),
            ],
        );
        let grouping = Grouping {
            keys: vec![Field::Id],
            aggregations: vec![
                Aggregation {
                    name: "total".to_owned(),
                    op: AggregateOp::Sum,
                    field: Field::Avg,
                },
                Aggregation {
                    name: "mean".to_owned(),
                    op: AggregateOp::Avg,
                    field: Field::Avg,
                },
            ],
        };
        let q = Query {
            grouping: Some(grouping),
            ..query(
                Filter::All,
                vec![
                    Column {
                        name: "total".to_owned(),
                        source: ColumnSource::Aggregate(0),
                    },
                    Column {
                        name: "mean".to_owned(),
                        source: ColumnSource::Aggregate(1),
                    },
                ],
            )
        };

        let rows = execute(&q, &data, MAX_RESULT_ROWS).unwrap();

        assert_eq!(rows[0]["total"], json!(3.01));
        assert_eq!(rows[0]["mean"], json!(1));
    }

    #[test]
    fn oversized_results_fail() {
        let q = query(Filter::All, vec![column(Field::Uuid)]);

        assert!(matches!(
            execute(&q, &dataset(), 4),
            Err(InsightError::ResultTooLarge { rows: 5, limit: 4 })
        ));
        assert_eq!(execute(&q, &dataset(), 5).unwrap().len(), 5);
    }

    #[test]
    fn inconsistent_queries_are_internal_errors() {
        let grouped_column = query(
            Filter::All,
            vec![Column {
                name: "best".to_owned(),
                source: ColumnSource::Aggregate(0),
            }],
        );
        assert!(matches!(
            execute(&grouped_column, &dataset(), MAX_RESULT_ROWS),
            Err(InsightError::Internal(_))
        ));

        let missing_key = Query {
            grouping: Some(Grouping {
                keys: vec![Field::Dept],
                aggregations: vec![],
            }),
            ..query(
                Filter::All,
                vec![Column {
                    name: "courses_dept".to_owned(),
                    source: ColumnSource::GroupKey(3),
                }],
            )
        };
        assert!(matches!(
            execute(&missing_key, &dataset(), MAX_RESULT_ROWS),
            Err(InsightError::Internal(_))
        ));

        let mut order_out_of_range = query(Filter::All, vec![column(Field::Uuid)]);
        order_out_of_range.order = Some(Order {
            direction: Direction::Up,
            keys: vec![1],
        });
        assert!(matches!(
            execute(&order_out_of_range, &dataset(), MAX_RESULT_ROWS),
            Err(InsightError::Internal(_))
        ));
    }
}
