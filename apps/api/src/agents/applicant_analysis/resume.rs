//! Resume text extraction and keyword heuristics.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agents::AgentError;

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

static PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+?1[-.\s]?)?\(?(\d{3})\)?[-.\s]?(\d{3})[-.\s]?(\d{4})\b").unwrap()
});

static LOCATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Z][a-z]+(?:[ \t]+[A-Z][a-z]+)*),[ \t]*([A-Z]{2})\b").unwrap());

static NAME_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Z][A-Za-z'.-]+(?:\s+[A-Z][A-Za-z'.-]*){1,3}$").unwrap()
});

static AP_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:a\s*&\s*p|certificate|license|cert)(?:\s*(?:no\.?|number))?[\s:#]*([A-Z0-9]{6,10})\b")
        .unwrap()
});

static DATE_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b((?:19|20)\d{2})\s*[-–—]\s*((?:19|20)\d{2}|present|current)\b").unwrap()
});

const AP_KEYWORDS: [&str; 6] = [
    "a&p",
    "a & p",
    "airframe and powerplant",
    "airframe & powerplant",
    "faa mechanic",
    "airframe powerplant",
];

const BUSINESS_AVIATION_KEYWORDS: [&str; 16] = [
    "business aviation",
    "corporate aviation",
    "private jet",
    "business jet",
    "corporate jet",
    "charter",
    "fractional",
    "netjets",
    "flexjet",
    "gulfstream",
    "bombardier",
    "citation",
    "hawker",
    "falcon",
    "embraer phenom",
    "embraer praetor",
];

const AOG_KEYWORDS: [&str; 10] = [
    "aog",
    "aircraft on ground",
    "field service",
    "mobile maintenance",
    "on-call",
    "emergency",
    "rapid response",
    "line maintenance",
    "ramp service",
    "remote service",
];

const NAME_STOPWORDS: [&str; 6] = ["resume", "curriculum", "vitae", "objective", "summary", "experience"];

/// Date ranges counted toward years of experience.
const MAX_DATE_RANGES: usize = 5;
const MAX_YEARS: i32 = 50;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedResume {
    pub raw_text: String,
    pub applicant_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub has_faa_ap: bool,
    pub faa_ap_number: Option<String>,
    pub years_in_aviation: Option<f64>,
    pub business_aviation_experience: bool,
    pub aog_field_experience: bool,
    pub text_length: usize,
}

/// Extracts text from PDF bytes. Malformed files can panic inside the
/// extractor, so the call is isolated with `catch_unwind`.
pub fn extract_text_from_pdf(bytes: &[u8]) -> Result<String, AgentError> {
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(Ok(text)) => {
            info!(chars = text.len(), "Extracted resume text");
            Ok(text)
        }
        Ok(Err(e)) => Err(AgentError::Document(format!("PDF extraction failed: {e}"))),
        Err(_) => Err(AgentError::Document(
            "PDF extraction panicked (malformed file)".to_string(),
        )),
    }
}

pub fn parse_resume(bytes: &[u8], current_year: i32) -> Result<ParsedResume, AgentError> {
    let text = extract_text_from_pdf(bytes)?;
    if text.trim().is_empty() {
        return Err(AgentError::Document("no text extracted from resume".to_string()));
    }
    Ok(parse_resume_text(&text, current_year))
}

pub fn parse_resume_text(text: &str, current_year: i32) -> ParsedResume {
    let lower = text.to_lowercase();
    let (has_faa_ap, faa_ap_number) = extract_ap_license(text);
    let parsed = ParsedResume {
        raw_text: text.to_string(),
        applicant_name: extract_name(text),
        email: EMAIL.find(text).map(|m| m.as_str().to_string()),
        phone: PHONE
            .captures(text)
            .map(|c| format!("({}) {}-{}", &c[1], &c[2], &c[3])),
        location: LOCATION
            .captures(text)
            .map(|c| format!("{}, {}", &c[1], &c[2])),
        has_faa_ap,
        faa_ap_number,
        years_in_aviation: years_in_aviation(text, current_year),
        business_aviation_experience: contains_any(&lower, &BUSINESS_AVIATION_KEYWORDS),
        aog_field_experience: contains_any(&lower, &AOG_KEYWORDS),
        text_length: text.chars().count(),
    };
    match &parsed.email {
        Some(email) => info!(email = %email, "Parsed resume"),
        None => warn!("Parsed resume without an email address"),
    }
    parsed
}

fn contains_any(haystack: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| haystack.contains(k))
}

/// First short capitalised line near the top of the document.
fn extract_name(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(5)
        .find(|line| {
            let lower = line.to_lowercase();
            NAME_LINE.is_match(line) && !NAME_STOPWORDS.iter().any(|w| lower.contains(w))
        })
        .map(str::to_string)
}

/// A&P keyword presence and the first certificate number containing a digit.
pub fn extract_ap_license(text: &str) -> (bool, Option<String>) {
    let lower = text.to_lowercase();
    let has_ap = contains_any(&lower, &AP_KEYWORDS);
    let number = AP_NUMBER
        .captures_iter(text)
        .map(|c| c[1].to_uppercase())
        .find(|n| n.chars().any(|ch| ch.is_ascii_digit()));
    (has_ap, number)
}

/// Sum of the first few year ranges ("2015 - 2020", "2018 - Present"),
/// capped at 50. `None` when no ranges appear.
pub fn years_in_aviation(text: &str, current_year: i32) -> Option<f64> {
    let mut found = false;
    let mut total = 0;
    for caps in DATE_RANGE.captures_iter(text).take(MAX_DATE_RANGES) {
        found = true;
        let Ok(start) = caps[1].parse::<i32>() else {
            continue;
        };
        let end = caps[2].parse::<i32>().unwrap_or(current_year);
        if end >= start {
            total += end - start;
        }
    }
    found.then(|| f64::from(total.min(MAX_YEARS)))
}
