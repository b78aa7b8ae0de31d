//! Extracts phone, availability and scheduling constraints from applicant
//! email replies and turns availability into concrete probe-call slots.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Weekday};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::google::chat::ProposedTime;

static PHONE_PATTERNS: Lazy<[Regex; 2]> = Lazy::new(|| {
    [
        Regex::new(r"\+?1?\s*\(?(\d{3})\)?[\s.-]?(\d{3})[\s.-]?(\d{4})").unwrap(),
        Regex::new(r"(\d{3})[\s.-]?(\d{3})[\s.-]?(\d{4})").unwrap(),
    ]
});

static DAY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(Monday|Tuesday|Wednesday|Thursday|Friday|Saturday|Sunday|Mon|Tue|Wed|Thu|Fri|Sat|Sun)\b")
        .unwrap()
});

static TIME_PATTERNS: Lazy<[Regex; 4]> = Lazy::new(|| {
    [
        Regex::new(r"(?i)(\d{1,2}):(\d{2})\s*(?:am|pm)").unwrap(),
        Regex::new(r"(?i)(\d{1,2})\s*(?:am|pm)").unwrap(),
        Regex::new(r"(?i)\b(morning|afternoon|evening)\b").unwrap(),
        Regex::new(
            r"(?i)between\s+(\d{1,2}(?::\d{2})?)\s*(?:am|pm)?\s*(?:and|-)\s*(\d{1,2}(?::\d{2})?)\s*(?:am|pm)?",
        )
        .unwrap(),
    ]
});

static SENTENCE_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?\n]").unwrap());

static NEGATIVE_PATTERNS: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r"(?i)(?:not available|can't|cannot|unable)\s+(?:on|during|at)?\s*([^.!?\n]+)").unwrap(),
        Regex::new(r"(?i)(?:prefer not|would prefer not|don't want)\s+(?:to)?\s*([^.!?\n]+)").unwrap(),
        Regex::new(r"(?i)(?:avoid|can't do|won't work)\s+([^.!?\n]+)").unwrap(),
    ]
});

static TZ_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Z]{2,4}T|Eastern|Central|Mountain|Pacific|EST|CST|MST|PST|EDT|CDT|MDT|PDT)\b").unwrap()
});

static CLOCK_TIME: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(\d{1,2})(?::(\d{2}))?\s*(am|pm)").unwrap());

const AVAILABILITY_INDICATORS: [&str; 9] = [
    "available",
    "free",
    "work",
    "can do",
    "good for me",
    "open",
    "flexible",
    "prefer",
    "best",
];

const DAY_NAMES: [(&str, Weekday); 14] = [
    ("monday", Weekday::Mon),
    ("mon", Weekday::Mon),
    ("tuesday", Weekday::Tue),
    ("tue", Weekday::Tue),
    ("wednesday", Weekday::Wed),
    ("wed", Weekday::Wed),
    ("thursday", Weekday::Thu),
    ("thu", Weekday::Thu),
    ("friday", Weekday::Fri),
    ("fri", Weekday::Fri),
    ("saturday", Weekday::Sat),
    ("sat", Weekday::Sat),
    ("sunday", Weekday::Sun),
    ("sun", Weekday::Sun),
];

pub const DEFAULT_PROPOSALS: usize = 3;
pub const DEFAULT_CALL_MINUTES: i64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedReply {
    pub phone: Option<String>,
    pub availability_windows: Vec<String>,
    pub constraints: Option<String>,
    pub proposed_times: Vec<ProposedTime>,
    pub raw_summary: String,
}

/// First US phone number in the text, normalised to `(XXX) XXX-XXXX`.
pub fn extract_phone_number(body: &str) -> Option<String> {
    let phone = PHONE_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(body)
            .map(|c| format!("({}) {}-{}", &c[1], &c[2], &c[3]))
    });
    match &phone {
        Some(p) => info!(phone = %p, "Extracted phone number"),
        None => warn!("No phone number found in email body"),
    }
    phone
}

/// `"Day [time]"` windows from sentences that mention both an availability
/// indicator and a day. Deduplicated, first-seen order.
pub fn extract_availability(body: &str) -> Vec<String> {
    let mut windows: Vec<String> = Vec::new();
    for sentence in SENTENCE_SPLIT.split(body) {
        let lower = sentence.to_lowercase();
        if !AVAILABILITY_INDICATORS.iter().any(|i| lower.contains(i)) {
            continue;
        }
        let Some(day) = DAY_PATTERN.captures(sentence).map(|c| c[1].to_string()) else {
            continue;
        };
        let time = TIME_PATTERNS
            .iter()
            .find_map(|p| p.find(sentence).map(|m| m.as_str().to_string()));
        let window = match time {
            Some(t) => format!("{day} {t}"),
            None => day,
        };
        let window = window.trim().to_string();
        if !windows.contains(&window) {
            windows.push(window);
        }
    }
    if windows.is_empty() {
        warn!("No availability windows found in email");
    } else {
        info!(count = windows.len(), ?windows, "Extracted availability windows");
    }
    windows
}

/// Negative scheduling phrases and any timezone mention, joined with `"; "`.
pub fn extract_constraints(body: &str) -> Option<String> {
    let mut constraints: Vec<String> = NEGATIVE_PATTERNS
        .iter()
        .flat_map(|p| p.find_iter(body))
        .map(|m| m.as_str().trim().to_string())
        .filter(|c| c.len() < 100)
        .collect();
    if let Some(tz) = TZ_PATTERN.find(body) {
        constraints.push(format!("Mentioned timezone: {}", tz.as_str()));
    }
    (!constraints.is_empty()).then(|| constraints.join("; "))
}

fn weekday_in(window: &str) -> Option<Weekday> {
    let lower = window.to_lowercase();
    DAY_NAMES
        .iter()
        .find(|(name, _)| lower.contains(name))
        .map(|(_, day)| *day)
}

fn hour_and_minute(window: &str) -> (u32, u32) {
    let lower = window.to_lowercase();
    if let Some(c) = CLOCK_TIME.captures(window) {
        let mut hour: u32 = c[1].parse().unwrap_or(14);
        let minute: u32 = c.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let pm = c[3].eq_ignore_ascii_case("pm");
        if pm && hour != 12 {
            hour += 12;
        } else if !pm && hour == 12 {
            hour = 0;
        }
        (hour.min(23), minute.min(59))
    } else if lower.contains("morning") {
        (10, 0)
    } else if lower.contains("evening") {
        (17, 0)
    } else {
        (14, 0)
    }
}

fn slot_at(date: NaiveDate, hour: u32, minute: u32, duration: Duration, tz: &Tz) -> Option<ProposedTime> {
    let start = tz
        .with_ymd_and_hms(date.year(), date.month(), date.day(), hour, minute, 0)
        .earliest()?;
    let end = start + duration;
    Some(ProposedTime {
        start_time: start.to_rfc3339(),
        end_time: end.to_rfc3339(),
        display_text: start.format("%A, %B %d at %I:%M %p ET").to_string(),
    })
}

/// Slot on the next occurrence of the window's weekday (never today).
/// Time defaults to 14:00; morning is 10:00 and evening 17:00.
pub fn parse_window_to_time(window: &str, duration: Duration, now: DateTime<Tz>) -> Option<ProposedTime> {
    let target = weekday_in(window)?;
    let today = now.weekday().num_days_from_monday() as i64;
    let mut days_ahead = (target.num_days_from_monday() as i64 - today).rem_euclid(7);
    if days_ahead == 0 {
        days_ahead = 7;
    }
    let date = now.date_naive() + Duration::days(days_ahead);
    let (hour, minute) = hour_and_minute(window);
    slot_at(date, hour, minute, duration, &now.timezone())
}

/// Up to `count` slots from the windows, topped up with 10:00 slots on the
/// following business days.
pub fn generate_proposed_times(
    windows: &[String],
    count: usize,
    duration: Duration,
    now: DateTime<Tz>,
) -> Vec<ProposedTime> {
    let mut proposals: Vec<ProposedTime> = windows
        .iter()
        .take(count)
        .filter_map(|w| parse_window_to_time(w, duration, now))
        .collect();

    let mut offset = proposals.len() as i64 + 1;
    while proposals.len() < count {
        let mut date = now.date_naive() + Duration::days(offset);
        while matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            date += Duration::days(1);
        }
        offset += 1;
        if let Some(slot) = slot_at(date, 10, 0, duration, &now.timezone()) {
            proposals.push(slot);
        }
    }
    info!(count = proposals.len(), "Generated proposed times");
    proposals
}

pub fn parse_applicant_reply(body: &str, now: DateTime<Tz>) -> ParsedReply {
    let phone = extract_phone_number(body);
    let availability_windows = extract_availability(body);
    let constraints = extract_constraints(body);
    let proposed_times = generate_proposed_times(
        &availability_windows,
        DEFAULT_PROPOSALS,
        Duration::minutes(DEFAULT_CALL_MINUTES),
        now,
    );
    ParsedReply {
        phone,
        availability_windows,
        constraints,
        proposed_times,
        raw_summary: body.chars().take(500).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::New_York;

    // Wednesday 2024-06-05 09:00 Eastern
    fn wednesday() -> DateTime<Tz> {
        New_York.with_ymd_and_hms(2024, 6, 5, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_extract_phone_number_formats() {
        assert_eq!(extract_phone_number("Call me at 555.123.4567").as_deref(), Some("(555) 123-4567"));
        assert_eq!(extract_phone_number("+1 (555) 123 4567 anytime").as_deref(), Some("(555) 123-4567"));
        assert_eq!(extract_phone_number("5551234567").as_deref(), Some("(555) 123-4567"));
        assert_eq!(extract_phone_number("no number here"), None);
    }

    #[test]
    fn test_extract_availability_dedupes_in_order() {
        let body = "I'm available Tuesday at 2:30pm. Thursday morning works too! \
                    Also free Tuesday at 2:30pm. I fly on Friday.";
        assert_eq!(
            extract_availability(body),
            vec!["Tuesday 2:30pm".to_string(), "Thursday morning".to_string()]
        );
    }

    #[test]
    fn test_extract_constraints() {
        let body = "I'm not available on Mondays. I'm on Pacific time.";
        let constraints = extract_constraints(body).unwrap();
        assert!(constraints.starts_with("not available on Mondays"));
        assert!(constraints.ends_with("Mentioned timezone: Pacific"));
        assert_eq!(extract_constraints("Any time is fine"), None);
    }

    #[test]
    fn test_parse_window_never_today() {
        let slot = parse_window_to_time("Wednesday", Duration::minutes(30), wednesday()).unwrap();
        assert!(slot.start_time.starts_with("2024-06-12T14:00:00"));
        assert!(slot.end_time.starts_with("2024-06-12T14:30:00"));
        assert_eq!(slot.display_text, "Wednesday, June 12 at 02:00 PM ET");
    }

    #[test]
    fn test_parse_window_periods_and_clock_times() {
        let now = wednesday();
        let morning = parse_window_to_time("Thu morning", Duration::minutes(30), now).unwrap();
        assert!(morning.start_time.starts_with("2024-06-06T10:00:00-04:00"));
        let evening = parse_window_to_time("Friday evening", Duration::minutes(30), now).unwrap();
        assert!(evening.start_time.starts_with("2024-06-07T17:00:00"));
        let noon = parse_window_to_time("Monday 12pm", Duration::minutes(30), now).unwrap();
        assert!(noon.start_time.starts_with("2024-06-10T12:00:00"));
        assert!(parse_window_to_time("whenever", Duration::minutes(30), now).is_none());
    }

    #[test]
    fn test_generate_proposed_times_fills_business_days() {
        let windows = vec!["Thursday 3pm".to_string()];
        let slots = generate_proposed_times(&windows, 3, Duration::minutes(30), wednesday());
        assert_eq!(slots.len(), 3);
        assert!(slots[0].start_time.starts_with("2024-06-06T15:00:00"));
        // now + 2 days is Friday, now + 3 days is Saturday and rolls to Monday
        assert!(slots[1].start_time.starts_with("2024-06-07T10:00:00"));
        assert!(slots[2].start_time.starts_with("2024-06-10T10:00:00"));
    }

    #[test]
    fn test_parse_applicant_reply_summary_is_truncated() {
        let body = format!("Available Monday afternoon. {}", "x".repeat(600));
        let parsed = parse_applicant_reply(&body, wednesday());
        assert_eq!(parsed.raw_summary.chars().count(), 500);
        assert_eq!(parsed.availability_windows, vec!["Monday afternoon".to_string()]);
        assert_eq!(parsed.proposed_times.len(), 3);
    }
}
