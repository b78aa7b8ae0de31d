//! Google Calendar: events with Meet conferencing, free/busy and free-slot
//! search.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

use super::{GoogleApiError, GoogleClient};
use crate::audit::AuditLogger;

const CALENDAR_API_URL: &str = "https://www.googleapis.com/calendar/v3";
const DEFAULT_TIME_ZONE: &str = "America/New_York";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedEvent {
    pub event_id: String,
    pub html_link: Option<String>,
    pub meet_link: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewEvent<'a> {
    pub summary: &'a str,
    pub start: &'a str,
    pub end: &'a str,
    pub attendees: &'a [String],
    pub description: Option<&'a str>,
    pub conference: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct EventList {
    #[serde(default)]
    items: Vec<Value>,
}

/// First video entry point of an event's conference data.
pub fn extract_meet_link(event: &Value) -> Option<String> {
    event
        .get("conferenceData")?
        .get("entryPoints")?
        .as_array()?
        .iter()
        .find(|ep| ep.get("entryPointType").and_then(Value::as_str) == Some("video"))
        .and_then(|ep| ep.get("uri"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Gaps of at least `duration` inside `[window_start, window_end]` that do
/// not overlap any busy period. Busy periods may overlap and arrive in any
/// order.
pub fn free_slots(
    busy: &[TimeSlot],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    duration: Duration,
) -> Vec<TimeSlot> {
    let mut busy: Vec<&TimeSlot> = busy.iter().collect();
    busy.sort_by_key(|b| b.start);

    let mut slots = Vec::new();
    let mut cursor = window_start;
    for period in busy {
        if period.start - cursor >= duration {
            slots.push(TimeSlot {
                start: cursor,
                end: period.start,
            });
        }
        cursor = cursor.max(period.end);
    }
    if window_end - cursor >= duration {
        slots.push(TimeSlot {
            start: cursor,
            end: window_end,
        });
    }
    slots
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn event_body(event: &NewEvent<'_>) -> Value {
    let mut body = json!({
        "summary": event.summary,
        "start": { "dateTime": event.start, "timeZone": DEFAULT_TIME_ZONE },
        "end": { "dateTime": event.end, "timeZone": DEFAULT_TIME_ZONE },
    });
    if let Some(description) = event.description {
        body["description"] = json!(description);
    }
    if !event.attendees.is_empty() {
        body["attendees"] = event
            .attendees
            .iter()
            .map(|email| json!({ "email": email }))
            .collect();
    }
    if event.conference {
        body["conferenceData"] = json!({
            "createRequest": {
                "requestId": Uuid::new_v4().to_string(),
                "conferenceSolutionKey": { "type": "hangoutsMeet" },
            }
        });
    }
    body
}

#[derive(Clone)]
pub struct CalendarService {
    google: GoogleClient,
    audit: AuditLogger,
    calendar_id: String,
}

impl CalendarService {
    pub fn new(google: GoogleClient, audit: AuditLogger, calendar_id: impl Into<String>) -> Self {
        Self {
            google,
            audit,
            calendar_id: calendar_id.into(),
        }
    }

    fn events_url(&self) -> String {
        format!(
            "{}/calendars/{}/events",
            self.google.endpoint(CALENDAR_API_URL),
            self.calendar_id
        )
    }

    pub async fn create_event(&self, event: NewEvent<'_>, initiated_by: &str) -> Result<CreatedEvent, GoogleApiError> {
        let conference_version = if event.conference { "1" } else { "0" };
        let created: Value = self
            .google
            .send_json(
                self.google
                    .http()
                    .post(self.events_url())
                    .query(&[("conferenceDataVersion", conference_version), ("sendUpdates", "all")])
                    .json(&event_body(&event)),
            )
            .await
            .map_err(|e| {
                error!(summary = event.summary, error = %e, "Failed to create calendar event");
                e
            })?;

        let event_id = created
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| GoogleApiError::Decode("created event has no id".to_string()))?
            .to_string();
        let result = CreatedEvent {
            html_link: created
                .get("htmlLink")
                .and_then(Value::as_str)
                .map(str::to_string),
            meet_link: extract_meet_link(&created),
            event_id,
        };
        info!(event_id = %result.event_id, summary = event.summary, "Created calendar event");
        self.audit
            .log_calendar_event_created(
                &result.event_id,
                event.summary,
                event.start,
                event.attendees,
                initiated_by,
            )
            .await;
        Ok(result)
    }

    pub async fn get_event(&self, event_id: &str) -> Result<Value, GoogleApiError> {
        self.google
            .send_json(
                self.google
                    .http()
                    .get(format!("{}/{event_id}", self.events_url())),
            )
            .await
    }

    /// Patches the given top-level event properties.
    pub async fn update_event(&self, event_id: &str, updates: &Value) -> Result<Value, GoogleApiError> {
        let updated: Value = self
            .google
            .send_json(
                self.google
                    .http()
                    .patch(format!("{}/{event_id}", self.events_url()))
                    .json(updates),
            )
            .await?;
        info!(event_id, "Updated calendar event");
        Ok(updated)
    }

    pub async fn delete_event(&self, event_id: &str) -> Result<(), GoogleApiError> {
        self.google
            .send_empty(
                self.google
                    .http()
                    .delete(format!("{}/{event_id}", self.events_url())),
            )
            .await?;
        info!(event_id, "Deleted calendar event");
        Ok(())
    }

    /// Single events ordered by start time. `time_min` defaults to now.
    pub async fn list_events(
        &self,
        time_min: Option<&str>,
        time_max: Option<&str>,
        max_results: u32,
    ) -> Result<Vec<Value>, GoogleApiError> {
        let now = rfc3339(Utc::now());
        let mut params = vec![
            ("timeMin".to_string(), time_min.unwrap_or(&now).to_string()),
            ("maxResults".to_string(), max_results.to_string()),
            ("singleEvents".to_string(), "true".to_string()),
            ("orderBy".to_string(), "startTime".to_string()),
        ];
        if let Some(max) = time_max {
            params.push(("timeMax".to_string(), max.to_string()));
        }
        let list: EventList = self
            .google
            .send_json(self.google.http().get(self.events_url()).query(&params))
            .await?;
        info!(count = list.items.len(), "Listed calendar events");
        Ok(list.items)
    }

    pub async fn query_freebusy(
        &self,
        calendars: &[&str],
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Value, GoogleApiError> {
        let body = json!({
            "timeMin": rfc3339(time_min),
            "timeMax": rfc3339(time_max),
            "items": calendars.iter().map(|id| json!({ "id": id })).collect::<Vec<_>>(),
        });
        self.google
            .send_json(
                self.google
                    .http()
                    .post(format!("{}/freeBusy", self.google.endpoint(CALENDAR_API_URL)))
                    .json(&body),
            )
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to query free/busy");
                e
            })
    }

    /// Free slots of at least `duration` on the configured calendar from now
    /// until `window_days` ahead.
    pub async fn find_free_slots(&self, duration: Duration, window_days: i64) -> Result<Vec<TimeSlot>, GoogleApiError> {
        let start = Utc::now();
        let end = start + Duration::days(window_days);
        let response = self
            .query_freebusy(&[self.calendar_id.as_str()], start, end)
            .await?;
        let busy: Vec<TimeSlot> = response
            .pointer(&format!("/calendars/{}/busy", self.calendar_id.replace('/', "~1")))
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        let slots = free_slots(&busy, start, end, duration);
        info!(count = slots.len(), "Found free slots");
        Ok(slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, h, m, 0).unwrap()
    }

    #[test]
    fn test_free_slots_between_busy_periods() {
        let busy = vec![
            TimeSlot { start: at(13, 0), end: at(14, 0) },
            TimeSlot { start: at(10, 0), end: at(11, 0) },
            TimeSlot { start: at(10, 30), end: at(11, 15) },
        ];
        let slots = free_slots(&busy, at(9, 0), at(17, 0), Duration::minutes(30));
        assert_eq!(
            slots,
            vec![
                TimeSlot { start: at(9, 0), end: at(10, 0) },
                TimeSlot { start: at(11, 15), end: at(13, 0) },
                TimeSlot { start: at(14, 0), end: at(17, 0) },
            ]
        );
    }

    #[test]
    fn test_free_slots_skip_short_gaps() {
        let busy = vec![
            TimeSlot { start: at(9, 20), end: at(16, 50) },
        ];
        let slots = free_slots(&busy, at(9, 0), at(17, 0), Duration::minutes(30));
        assert!(slots.is_empty());
    }

    #[test]
    fn test_extract_meet_link_prefers_video_entry() {
        let event = json!({
            "conferenceData": {
                "entryPoints": [
                    {"entryPointType": "phone", "uri": "tel:+1-555"},
                    {"entryPointType": "video", "uri": "https://meet.google.com/abc-defg-hij"}
                ]
            }
        });
        assert_eq!(
            extract_meet_link(&event).as_deref(),
            Some("https://meet.google.com/abc-defg-hij")
        );
        assert_eq!(extract_meet_link(&json!({})), None);
    }

    #[test]
    fn test_event_body_with_conference() {
        let attendees = vec!["a@x.com".to_string()];
        let body = event_body(&NewEvent {
            summary: "Phone Probe",
            start: "2024-06-03T10:00:00-04:00",
            end: "2024-06-03T10:30:00-04:00",
            attendees: &attendees,
            description: Some("call"),
            conference: true,
        });
        assert_eq!(body["attendees"], json!([{"email": "a@x.com"}]));
        assert_eq!(
            body["conferenceData"]["createRequest"]["conferenceSolutionKey"]["type"],
            json!("hangoutsMeet")
        );
        assert_eq!(body["start"]["timeZone"], json!(DEFAULT_TIME_ZONE));
    }
}
