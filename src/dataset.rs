use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::InsightError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Courses,
    Rooms,
}

impl DatasetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Courses => "courses",
            Self::Rooms => "rooms",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetKind {
    type Err = InsightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "courses" => Ok(Self::Courses),
            "rooms" => Ok(Self::Rooms),
            _ => Err(InsightError::UnsupportedKind(s.to_owned())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    Number,
    Text,
}

/// A column of the courses record schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    Dept,
    Id,
    Avg,
    Instructor,
    Title,
    Pass,
    Fail,
    Audit,
    Uuid,
    Year,
}

pub const FIELD_COUNT: usize = 10;

impl Field {
    pub const ALL: [Field; FIELD_COUNT] = [
        Field::Dept,
        Field::Id,
        Field::Avg,
        Field::Instructor,
        Field::Title,
        Field::Pass,
        Field::Fail,
        Field::Audit,
        Field::Uuid,
        Field::Year,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::Dept => "dept",
            Field::Id => "id",
            Field::Avg => "avg",
            Field::Instructor => "instructor",
            Field::Title => "title",
            Field::Pass => "pass",
            Field::Fail => "fail",
            Field::Audit => "audit",
            Field::Uuid => "uuid",
            Field::Year => "year",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|field| field.name() == name)
    }

    pub fn field_type(self) -> FieldType {
        match self {
            Field::Avg | Field::Pass | Field::Fail | Field::Audit | Field::Year => {
                FieldType::Number
            }
            Field::Dept | Field::Id | Field::Instructor | Field::Title | Field::Uuid => {
                FieldType::Text
            }
        }
    }

    pub fn is_numeric(self) -> bool {
        self.field_type() == FieldType::Number
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single cell of a record.
///
/// Equality and hashing treat numbers by their bit pattern (with `-0.0`
/// folded into `0.0`) so values can key group maps and distinct sets.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Number(_) => None,
            Value::Text(s) => Some(s),
        }
    }

    pub fn field_type(&self) -> FieldType {
        match self {
            Value::Number(_) => FieldType::Number,
            Value::Text(_) => FieldType::Text,
        }
    }

    /// Numbers compare numerically (`-0.0` equals `0.0`), text by code
    /// point. Numbers sort before text, which never happens within one
    /// column.
    pub fn natural_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => {
                Self::fold_zero(*a).total_cmp(&Self::fold_zero(*b))
            }
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Number(_), Value::Text(_)) => Ordering::Less,
            (Value::Text(_), Value::Number(_)) => Ordering::Greater,
        }
    }

    /// Integral numbers render as JSON integers, like the records they came
    /// from.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 => {
                JsonValue::from(*n as i64)
            }
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Text(s) => JsonValue::String(s.clone()),
        }
    }

    fn fold_zero(n: f64) -> f64 {
        if n == 0.0 {
            0.0
        } else {
            n
        }
    }

    fn number_bits(n: f64) -> u64 {
        Self::fold_zero(n).to_bits()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => Self::number_bits(*a) == Self::number_bits(*b),
            (Value::Text(a), Value::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Number(n) => {
                0u8.hash(state);
                Self::number_bits(*n).hash(state);
            }
            Value::Text(s) => {
                1u8.hash(state);
                s.hash(state);
            }
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// One flattened course section. Holds exactly one value per [`Field`],
/// each of the field's declared type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Value>", into = "Vec<Value>")]
pub struct Record {
    values: Vec<Value>,
}

impl Record {
    pub fn get(&self, field: Field) -> &Value {
        &self.values[field.index()]
    }
}

impl TryFrom<Vec<Value>> for Record {
    type Error = String;

    fn try_from(values: Vec<Value>) -> Result<Self, Self::Error> {
        if values.len() != FIELD_COUNT {
            return Err(format!(
                "expected {} values, found {}",
                FIELD_COUNT,
                values.len()
            ));
        }
        for (field, value) in Field::ALL.iter().zip(&values) {
            if field.field_type() != value.field_type() {
                return Err(format!("field {} has the wrong type", field));
            }
        }
        Ok(Self { values })
    }
}

impl From<Record> for Vec<Value> {
    fn from(record: Record) -> Self {
        record.values
    }
}

#[derive(Clone, Debug)]
pub struct Dataset {
    pub id: String,
    pub kind: DatasetKind,
    rows: Vec<Record>,
}

impl Dataset {
    pub fn new(id: impl Into<String>, kind: DatasetKind, rows: Vec<Record>) -> Self {
        Self {
            id: id.into(),
            kind,
            rows,
        }
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn info(&self) -> InsightDataset {
        InsightDataset {
            id: self.id.clone(),
            kind: self.kind,
            num_rows: self.num_rows(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightDataset {
    pub id: String,
    pub kind: DatasetKind,
    #[serde(rename = "numRows")]
    pub num_rows: usize,
}

#[cfg(test)]
pub(crate) fn course_record(
    dept: &str,
    id: &str,
    avg: f64,
    instructor: &str,
    year: f64,
) -> Record {
    Record::try_from(vec![
        Value::from(dept),
        Value::from(id),
        Value::from(avg),
        Value::from(instructor),
        Value::from(format!("{} {}", dept, id)),
        Value::from(10.0),
        Value::from(1.0),
        Value::from(0.0),
        Value::from(format!("{}-{}-{}", dept, id, instructor)),
        Value::from(year),
    ])
    .unwrap()
}
