// Templates for HR pipeline communications.

pub const OUTREACH_SUBJECT: &str = "Aviation Maintenance Opportunity - JetsMX";

const OUTREACH_BODY: &str = "Hi {applicant_name},

Thank you for your interest in JetsMX! We're a mobile AOG and line maintenance provider serving business aviation across the Northeast.

I've reviewed your background in {aircraft_types}, and I'd like to learn more about your experience and discuss potential opportunities with our team.

Would you be available for a brief phone conversation this week or next? I'm flexible and happy to work around your schedule.

Looking forward to connecting!

Best regards,
Tyler Fitzgerald
Chief Pilot / Operations
JetsMX LLC
jobs@jetstreammx.com
";

const PROBE_DESCRIPTION: &str = "Phone Probe Call with {applicant_name}

Contact: {phone}

This is an initial screening call to discuss:
- Aviation experience and background
- A&P license details
- On-call availability and constraints
- Geographic flexibility
- Compensation expectations

Pipeline ID: {pipeline_id}

Prepare to update Airtable with notes after the call.
";

const PROBE_CONFIRMATION_BODY: &str = "Hi {applicant_name},

Thanks for getting back to us. Your phone call with JetsMX is confirmed for {when}.

{meet_line}

If that time no longer works, just reply to this email.

Best regards,
Tyler Fitzgerald
Chief Pilot / Operations
JetsMX LLC
";

#[derive(Debug, Clone, PartialEq)]
pub struct EmailContent {
    pub subject: String,
    pub body: String,
}

/// Blank values fall back to "there" and "aviation maintenance".
pub fn build_outreach_email(applicant_name: &str, aircraft_types: &str) -> EmailContent {
    let name = if applicant_name.trim().is_empty() { "there" } else { applicant_name };
    let aircraft = if aircraft_types.trim().is_empty() {
        "aviation maintenance"
    } else {
        aircraft_types
    };
    EmailContent {
        subject: OUTREACH_SUBJECT.to_string(),
        body: OUTREACH_BODY
            .replace("{applicant_name}", name)
            .replace("{aircraft_types}", aircraft),
    }
}

/// `when` is already formatted for the applicant's timezone.
pub fn build_probe_confirmation(applicant_name: &str, when: &str, meet_link: Option<&str>) -> String {
    let meet_line = match meet_link {
        Some(link) => format!("You can also join by video: {link}"),
        None => "We'll call you at the number you provided.".to_string(),
    };
    PROBE_CONFIRMATION_BODY
        .replace("{applicant_name}", applicant_name)
        .replace("{when}", when)
        .replace("{meet_line}", &meet_line)
}

pub fn probe_call_description(applicant_name: &str, phone: &str, pipeline_id: &str) -> String {
    PROBE_DESCRIPTION
        .replace("{applicant_name}", applicant_name)
        .replace("{phone}", phone)
        .replace("{pipeline_id}", pipeline_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outreach_email_personalised() {
        let email = build_outreach_email("Jane Smith", "Gulfstream G450");
        assert_eq!(email.subject, "Aviation Maintenance Opportunity - JetsMX");
        assert!(email.body.starts_with("Hi Jane Smith,"));
        assert!(email.body.contains("background in Gulfstream G450"));
    }

    #[test]
    fn test_outreach_email_defaults() {
        let email = build_outreach_email("", "");
        assert!(email.body.starts_with("Hi there,"));
        assert!(email.body.contains("background in aviation maintenance"));
    }

    #[test]
    fn test_probe_description_fields() {
        let text = probe_call_description("Jane", "(555) 123-4567", "recP1");
        assert!(text.starts_with("Phone Probe Call with Jane"));
        assert!(text.contains("Contact: (555) 123-4567"));
        assert!(text.contains("Pipeline ID: recP1"));
    }

    #[test]
    fn test_probe_confirmation_mentions_meet_link_when_present() {
        let text = build_probe_confirmation("Jane", "Thursday, June 6 at 10:00 AM EDT", Some("https://meet.google.com/abc"));
        assert!(text.contains("confirmed for Thursday, June 6 at 10:00 AM EDT."));
        assert!(text.contains("https://meet.google.com/abc"));
        let text = build_probe_confirmation("Jane", "soon", None);
        assert!(text.contains("We'll call you"));
    }
}
