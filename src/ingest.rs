//! Turns archive files into validated course records.
//!
//! Each file must sit under the `courses/` root folder and be a JSON object
//! with a `result` array of section objects.
//! Files that fail to parse, and sections that miss a member, are dropped
//! one at a time; only an archive with no surviving record at all is an
//! error.

use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::{
    archive::ArchiveEntry,
    dataset::{DatasetKind, Field, Record, Value},
    error::InsightError,
};

const ROOT_FOLDER: &str = "courses/";
const RESULT_MEMBER: &str = "result";
const OVERALL_SECTION: &str = "overall";
const OVERALL_YEAR: f64 = 1900.0;

pub fn extract_records(
    kind: DatasetKind,
    entries: &[ArchiveEntry],
) -> Result<Vec<Record>, InsightError> {
    if kind != DatasetKind::Courses {
        return Err(InsightError::UnsupportedKind(kind.to_string()));
    }

    let mut records = vec![];
    for entry in entries {
        if entry.is_directory() {
            continue;
        }
        if !entry.path.trim_start_matches("./").starts_with(ROOT_FOLDER) {
            debug!(path = %entry.path, "skipping file outside {}", ROOT_FOLDER);
            continue;
        }

        let sections = match result_sections(&entry.contents) {
            Some(sections) => sections,
            None => {
                debug!(path = %entry.path, "skipping file without a result array");
                continue;
            }
        };

        let before = records.len();
        records.extend(sections.iter().filter_map(course_record));
        let dropped = sections.len() - (records.len() - before);
        if dropped > 0 {
            debug!(path = %entry.path, dropped, "dropped malformed sections");
        }
    }

    if records.is_empty() {
        return Err(InsightError::NoValidRecords);
    }
    Ok(records)
}

fn result_sections(contents: &[u8]) -> Option<Vec<JsonValue>> {
    match serde_json::from_slice(contents).ok()? {
        JsonValue::Object(mut file) => match file.remove(RESULT_MEMBER)? {
            JsonValue::Array(sections) => Some(sections),
            _ => None,
        },
        _ => None,
    }
}

/// Source member holding each field.
fn source_member(field: Field) -> &'static str {
    match field {
        Field::Dept => "Subject",
        Field::Id => "Course",
        Field::Avg => "Avg",
        Field::Instructor => "Professor",
        Field::Title => "Title",
        Field::Pass => "Pass",
        Field::Fail => "Fail",
        Field::Audit => "Audit",
        Field::Uuid => "id",
        Field::Year => "Year",
    }
}

fn course_record(section: &JsonValue) -> Option<Record> {
    let section = section.as_object()?;
    let overall = section.get("Section").and_then(JsonValue::as_str) == Some(OVERALL_SECTION);

    let values = Field::ALL
        .iter()
        .map(|&field| {
            let value = coerce(section, field)?;
            if field == Field::Year && overall {
                return Some(Value::Number(OVERALL_YEAR));
            }
            Some(value)
        })
        .collect::<Option<Vec<_>>>()?;

    Record::try_from(values).ok()
}

fn coerce(section: &Map<String, JsonValue>, field: Field) -> Option<Value> {
    let raw = section.get(source_member(field))?;
    if field.is_numeric() {
        let number = match raw {
            JsonValue::Number(n) => n.as_f64(),
            JsonValue::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        number.filter(|n| n.is_finite()).map(Value::Number)
    } else {
        match raw {
            JsonValue::String(s) => Some(Value::Text(s.clone())),
            JsonValue::Number(n) => Some(Value::Text(n.to_string())),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) fn section_json(dept: &str, course: &str, avg: f64, professor: &str, uuid: u64) -> JsonValue {
    serde_json::json!({
        "Subject": dept,
        "Course": course,
        "Avg": avg,
        "Professor": professor,
        "Title": format!("{} {}", dept, course),
        "Pass": 40,
        "Fail": 2,
        "Audit": 1,
        "id": uuid,
        "Year": "2015",
        "Section": "101",
    })
}
