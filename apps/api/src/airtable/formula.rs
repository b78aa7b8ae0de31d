//! Airtable formula construction.
//!
//! Builders return plain formula strings suitable for `filterByFormula`.
//! Combinators drop empty parts, so optional filters compose without
//! special-casing.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pipeline::{tables, PipelineStage};

/// Renders a JSON value as a formula literal.
pub fn literal(value: &Value) -> String {
    match value {
        Value::Null => "BLANK()".to_string(),
        Value::Bool(true) => "TRUE()".to_string(),
        Value::Bool(false) => "FALSE()".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        other => quote(&other.to_string()),
    }
}

/// Single-quotes a string, escaping embedded quotes.
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn field(name: &str) -> String {
    format!("{{{name}}}")
}

pub fn equals(field_name: &str, value: &Value) -> String {
    format!("{} = {}", field(field_name), literal(value))
}

pub fn equals_str(field_name: &str, value: &str) -> String {
    format!("{} = {}", field(field_name), quote(value))
}

pub fn not_equals(field_name: &str, value: &Value) -> String {
    format!("{} != {}", field(field_name), literal(value))
}

pub fn contains(field_name: &str, text: &str) -> String {
    format!("FIND({}, {}) > 0", quote(text), field(field_name))
}

pub fn greater_than(field_name: &str, value: &Value) -> String {
    format!("{} > {}", field(field_name), literal(value))
}

pub fn less_than(field_name: &str, value: &Value) -> String {
    format!("{} < {}", field(field_name), literal(value))
}

pub fn greater_or_equal(field_name: &str, value: &Value) -> String {
    format!("{} >= {}", field(field_name), literal(value))
}

pub fn less_or_equal(field_name: &str, value: &Value) -> String {
    format!("{} <= {}", field(field_name), literal(value))
}

pub fn is_empty(field_name: &str) -> String {
    format!("{} = BLANK()", field(field_name))
}

pub fn is_not_empty(field_name: &str) -> String {
    format!("{} != BLANK()", field(field_name))
}

/// `OR` of equality checks, one per value.
pub fn in_list(field_name: &str, values: &[Value]) -> String {
    let parts: Vec<String> = values.iter().map(|v| equals(field_name, v)).collect();
    or(&parts)
}

fn combine(op: &str, conditions: &[String]) -> String {
    let parts: Vec<&str> = conditions
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect();
    match parts.len() {
        0 => String::new(),
        1 => parts[0].to_string(),
        _ => format!("{op}({})", parts.join(", ")),
    }
}

pub fn and(conditions: &[String]) -> String {
    combine("AND", conditions)
}

pub fn or(conditions: &[String]) -> String {
    combine("OR", conditions)
}

pub fn not(condition: &str) -> String {
    format!("NOT({condition})")
}

pub fn date_is_after(field_name: &str, date: NaiveDate) -> String {
    format!("IS_AFTER({}, '{}')", field(field_name), date.format("%Y-%m-%d"))
}

pub fn date_is_before(field_name: &str, date: NaiveDate) -> String {
    format!("IS_BEFORE({}, '{}')", field(field_name), date.format("%Y-%m-%d"))
}

pub fn date_is_same(field_name: &str, date: NaiveDate, unit: &str) -> String {
    format!(
        "IS_SAME({}, '{}', '{unit}')",
        field(field_name),
        date.format("%Y-%m-%d")
    )
}

// ────────────────────────────────────────────────────────────────────────────
// Pipeline-specific helpers
// ────────────────────────────────────────────────────────────────────────────

pub fn find_by_email(email: &str) -> String {
    equals_str("Email", email)
}

pub fn find_by_name(name: &str, exact: bool) -> String {
    if exact {
        equals_str("Applicant Name", name)
    } else {
        contains("Applicant Name", name)
    }
}

pub fn find_by_pipeline_stage(stage: PipelineStage) -> String {
    equals_str("Pipeline Stage", stage.as_str())
}

pub fn find_active_applicants() -> String {
    let stages: Vec<String> = PipelineStage::ALL
        .iter()
        .filter(|s| s.is_active())
        .map(|s| equals_str("Pipeline Stage", s.as_str()))
        .collect();
    or(&stages)
}

pub fn find_with_faa_ap() -> String {
    equals("Has FAA A&P", &Value::Bool(true))
}

pub fn find_contractors_by_status(status: &str) -> String {
    equals_str("Contractor Status", status)
}

pub fn find_recent_interactions(days: u32) -> String {
    format!("IS_AFTER({{Timestamp}}, DATEADD(TODAY(), -{days}, 'days'))")
}

/// Default text fields searched per table when the caller names none.
pub fn default_search_fields(table: &str) -> &'static [&'static str] {
    match table {
        tables::APPLICANTS => &["Applicant Name", "Email", "Location"],
        tables::APPLICANT_PIPELINE => &["Applicant Name", "Primary Email"],
        tables::CONTRACTORS => &["Contractor ID", "Name", "Email"],
        tables::INTERACTIONS => &["Summary"],
        _ => &["Name"],
    }
}

/// `OR` of `FIND` checks for `term` across `fields` (or the table defaults).
pub fn build_search_query(table: &str, term: &str, fields: &[String]) -> String {
    let parts: Vec<String> = if fields.is_empty() {
        default_search_fields(table)
            .iter()
            .map(|f| contains(f, term))
            .collect()
    } else {
        fields.iter().map(|f| contains(f, term)).collect()
    };
    or(&parts)
}

/// A single `{field, op, value}` filter as accepted from agents and commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    #[serde(alias = "operator")]
    pub op: String,
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(field: &str, op: &str, value: Value) -> Self {
        Self {
            field: field.to_string(),
            op: op.to_string(),
            value,
        }
    }

    /// Formula for this condition, or `None` for unknown operators.
    pub fn to_formula(&self) -> Option<String> {
        let f = self.field.as_str();
        let v = &self.value;
        let formula = match self.op.trim().to_lowercase().as_str() {
            "equals" | "==" | "=" => equals(f, v),
            "not_equals" | "!=" | "≠" => not_equals(f, v),
            "contains" => contains(f, &value_text(v)),
            ">" | "greater_than" => greater_than(f, v),
            "<" | "less_than" => less_than(f, v),
            ">=" => greater_or_equal(f, v),
            "<=" => less_or_equal(f, v),
            "is_empty" => is_empty(f),
            "is_not_empty" => is_not_empty(f),
            "in" => match v {
                Value::Array(items) => in_list(f, items),
                other => equals(f, other),
            },
            "date_after" => date_is_after(f, parse_date(v)?),
            "date_before" => date_is_before(f, parse_date(v)?),
            _ => return None,
        };
        Some(formula)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Logic {
    #[default]
    And,
    Or,
}

impl Logic {
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("or") {
            Logic::Or
        } else {
            Logic::And
        }
    }
}

/// Combines conditions with AND/OR, skipping unknown operators.
pub fn build_complex_query(conditions: &[Condition], logic: Logic) -> String {
    let parts: Vec<String> = conditions.iter().filter_map(Condition::to_formula).collect();
    match logic {
        Logic::And => and(&parts),
        Logic::Or => or(&parts),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn parse_date(value: &Value) -> Option<NaiveDate> {
    let s = value.as_str()?;
    let day = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}
