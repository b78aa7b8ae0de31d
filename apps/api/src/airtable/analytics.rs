//! Aggregations over in-memory record lists.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;

use super::Record;

const EMPTY_BUCKET: &str = "(empty)";

/// Numeric reading of a field: JSON numbers and numeric strings.
pub fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn numeric_values<'a>(records: &'a [Record], field: &'a str) -> impl Iterator<Item = f64> + 'a {
    records
        .iter()
        .filter_map(move |r| r.field(field).and_then(numeric))
}

/// Group keys for a record: lists fan out to one key per item, missing or
/// empty values land in `(empty)`.
fn group_keys(value: Option<&Value>) -> Vec<String> {
    match value {
        None | Some(Value::Null) => vec![EMPTY_BUCKET.to_string()],
        Some(Value::String(s)) if s.is_empty() => vec![EMPTY_BUCKET.to_string()],
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
            .collect(),
        Some(other) => vec![other.to_string()],
    }
}

pub fn count_by_field(records: &[Record], field: &str) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        for key in group_keys(record.field(field)) {
            *counts.entry(key).or_insert(0) += 1;
        }
    }
    counts
}

pub fn sum_field(records: &[Record], field: &str) -> f64 {
    numeric_values(records, field).sum()
}

pub fn average_field(records: &[Record], field: &str) -> Option<f64> {
    let values: Vec<f64> = numeric_values(records, field).collect();
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn min_field(records: &[Record], field: &str) -> Option<f64> {
    numeric_values(records, field).reduce(f64::min)
}

pub fn max_field(records: &[Record], field: &str) -> Option<f64> {
    numeric_values(records, field).reduce(f64::max)
}

pub fn group_by<'a>(records: &'a [Record], field: &str) -> BTreeMap<String, Vec<&'a Record>> {
    let mut groups: BTreeMap<String, Vec<&Record>> = BTreeMap::new();
    for record in records {
        for key in group_keys(record.field(field)) {
            groups.entry(key).or_default().push(record);
        }
    }
    groups
}

fn owned(group: Vec<&Record>) -> Vec<Record> {
    group.into_iter().cloned().collect()
}

pub fn group_and_sum(records: &[Record], group_field: &str, sum: &str) -> BTreeMap<String, f64> {
    group_by(records, group_field)
        .into_iter()
        .map(|(k, group)| (k, sum_field(&owned(group), sum)))
        .collect()
}

pub fn group_and_average(
    records: &[Record],
    group_field: &str,
    avg: &str,
) -> BTreeMap<String, Option<f64>> {
    group_by(records, group_field)
        .into_iter()
        .map(|(k, group)| (k, average_field(&owned(group), avg)))
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct DateRangeReport {
    pub total_records: usize,
    pub recent_count: usize,
    pub older_count: usize,
    pub no_date_count: usize,
    pub date_range_days: i64,
    pub cutoff_date: DateTime<Utc>,
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Splits records into recent (on or after `now - days`), older and undated.
pub fn date_range_analysis(
    records: &[Record],
    date_field: &str,
    days: i64,
    now: DateTime<Utc>,
) -> DateRangeReport {
    let cutoff = now - Duration::days(days);
    let (mut recent, mut older, mut no_date) = (0, 0, 0);
    for record in records {
        match record.str_field(date_field).and_then(parse_timestamp) {
            Some(ts) if ts >= cutoff => recent += 1,
            Some(_) => older += 1,
            None => no_date += 1,
        }
    }
    DateRangeReport {
        total_records: records.len(),
        recent_count: recent,
        older_count: older,
        no_date_count: no_date,
        date_range_days: days,
        cutoff_date: cutoff,
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().map(|x| x != 0.0).unwrap_or(false),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Pipeline analytics
// ────────────────────────────────────────────────────────────────────────────

pub struct PipelineAnalytics;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseRate {
    pub emails_sent: usize,
    pub responses_received: usize,
    pub response_rate_percent: f64,
}

impl PipelineAnalytics {
    pub fn stage_funnel(records: &[Record]) -> BTreeMap<String, usize> {
        count_by_field(records, "Pipeline Stage")
    }

    /// `to` count over `from` count as a percentage.
    pub fn conversion_rate(records: &[Record], from_stage: &str, to_stage: &str) -> f64 {
        let counts = Self::stage_funnel(records);
        let from = counts.get(from_stage).copied().unwrap_or(0);
        let to = counts.get(to_stage).copied().unwrap_or(0);
        if from == 0 {
            return 0.0;
        }
        to as f64 / from as f64 * 100.0
    }

    pub fn response_rate(records: &[Record]) -> ResponseRate {
        let sent = records
            .iter()
            .filter(|r| truthy(r.field("Initial Email Sent At")))
            .count();
        let responded = records
            .iter()
            .filter(|r| truthy(r.field("Last Reply Received At")))
            .count();
        let rate = if sent > 0 {
            responded as f64 / sent as f64 * 100.0
        } else {
            0.0
        };
        ResponseRate {
            emails_sent: sent,
            responses_received: responded,
            response_rate_percent: round1(rate),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Applicant analytics
// ────────────────────────────────────────────────────────────────────────────

pub struct ApplicantAnalytics;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CertificationStats {
    pub total_applicants: usize,
    pub with_faa_ap: usize,
    pub without_faa_ap: usize,
    pub ap_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperienceStats {
    pub average_years: Option<f64>,
    pub min_years: Option<f64>,
    pub max_years: Option<f64>,
    pub with_aog_experience: usize,
    pub total_applicants: usize,
}

impl ApplicantAnalytics {
    pub fn certification_stats(records: &[Record]) -> CertificationStats {
        let total = records.len();
        let with_ap = records
            .iter()
            .filter(|r| truthy(r.field("Has FAA A&P")))
            .count();
        let pct = if total > 0 {
            with_ap as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        CertificationStats {
            total_applicants: total,
            with_faa_ap: with_ap,
            without_faa_ap: total - with_ap,
            ap_percentage: round1(pct),
        }
    }

    pub fn experience_stats(records: &[Record]) -> ExperienceStats {
        ExperienceStats {
            average_years: average_field(records, "Years in Aviation").map(round1),
            min_years: min_field(records, "Years in Aviation"),
            max_years: max_field(records, "Years in Aviation"),
            with_aog_experience: records
                .iter()
                .filter(|r| truthy(r.field("AOG / Field Experience")))
                .count(),
            total_applicants: records.len(),
        }
    }

    pub fn geographic_distribution(records: &[Record]) -> BTreeMap<String, usize> {
        count_by_field(records, "Geographic Flexibility")
    }
}
