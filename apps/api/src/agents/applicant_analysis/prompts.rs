use serde::{Deserialize, Deserializer, Serialize};

use super::resume::ParsedResume;
use crate::pipeline::verdict;

/// Resume text beyond this many characters is left out of the prompt.
const RESUME_PROMPT_CHARS: usize = 3000;

pub const AGENT_SYSTEM_PROMPT: &str = "You are the Applicant Analysis Agent for JetsMX, an AOG \
(Aircraft On Ground) aviation maintenance company. You process resumes for on-call A&P \
technician positions.

For each resume, call these tools in order:
1. download_resume
2. parse_resume_text
3. analyze_candidate_fit
4. create_applicant_records
5. generate_icc
6. upload_icc
7. publish_completion_event

Each tool keeps its output for the next one, so you only pass the arguments each tool asks for. \
If a step fails, report the error and stop. When all steps are done, reply with a short summary \
naming the applicant, the baseline verdict and the record IDs.";

pub const ANALYSIS_SYSTEM_PROMPT: &str = "You are an expert aviation maintenance recruiter and \
technical assessor for JetsMX, a mobile AOG and line maintenance company serving business \
aviation in the U.S. Northeast.

Key requirements for JetsMX candidates:
- FAA A&P license (required)
- Business aviation experience (strongly preferred)
- AOG/field service experience (highly valuable)
- Mobile/on-call availability
- Geographic flexibility within the NE corridor
- Relevant aircraft type experience (Gulfstream, Citation, Hawker, Falcon, etc.)
- Strong troubleshooting and diagnostic skills

Be objective and focus on technical competency and operational fit for AOG work. \
Respond with JSON only.";

const ANALYSIS_PROMPT_TEMPLATE: &str = "Based on the following resume data, provide a structured \
analysis of this candidate's fit for JetsMX.

Resume Text:
{resume_text}

Parsed Data:
- Email: {email}
- Phone: {phone}
- Location: {location}
- Has A&P: {has_ap}
- A&P Number: {ap_number}
- Years in Aviation: {years}
- Business Aviation Experience: {biz_av}
- AOG Experience: {aog_exp}

Respond with this JSON structure:
{
  \"applicant_name\": \"Full name extracted from resume\",
  \"aircraft_experience\": \"Aircraft families/types with experience\",
  \"engine_experience\": \"Engine families with experience\",
  \"systems_strengths\": \"Key system areas of strength (avionics, hydraulics, etc.)\",
  \"aog_suitability_score\": <0-10>,
  \"geographic_flexibility\": \"Local-only, NE Corridor, or US-wide\",
  \"baseline_verdict\": \"Strong Fit | Maybe | Not a Fit | Needs Review\",
  \"missing_info\": \"Missing critical information\",
  \"follow_up_questions\": \"Specific questions to ask in the probe call\"
}";

/// The model's assessment of a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateAnalysis {
    #[serde(default = "unknown")]
    pub applicant_name: String,
    #[serde(default = "not_specified")]
    pub aircraft_experience: String,
    #[serde(default = "not_specified")]
    pub engine_experience: String,
    #[serde(default = "not_specified")]
    pub systems_strengths: String,
    #[serde(default, deserialize_with = "score")]
    pub aog_suitability_score: f64,
    #[serde(default)]
    pub geographic_flexibility: Option<String>,
    #[serde(default = "needs_review")]
    pub baseline_verdict: String,
    #[serde(default)]
    pub missing_info: String,
    #[serde(default)]
    pub follow_up_questions: String,
}

impl CandidateAnalysis {
    /// Used when the model call or its JSON fails.
    pub fn fallback(name: Option<&str>, reason: &str) -> Self {
        Self {
            applicant_name: name.unwrap_or("Unknown").to_string(),
            aircraft_experience: not_specified(),
            engine_experience: not_specified(),
            systems_strengths: not_specified(),
            aog_suitability_score: 0.0,
            geographic_flexibility: None,
            baseline_verdict: needs_review(),
            missing_info: format!("Automated analysis failed: {reason}"),
            follow_up_questions: String::new(),
        }
    }
}

fn unknown() -> String {
    "Unknown".to_string()
}

fn not_specified() -> String {
    "Not specified".to_string()
}

fn needs_review() -> String {
    verdict::NEEDS_REVIEW.to_string()
}

/// Accepts a number or numeric string and clamps it to 0..=10.
fn score<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    let n = match &value {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    Ok(n.clamp(0.0, 10.0))
}

fn or_na(value: Option<&str>) -> &str {
    value.unwrap_or("N/A")
}

pub fn build_analysis_prompt(parsed: &ParsedResume) -> String {
    let resume_text: String = parsed.raw_text.chars().take(RESUME_PROMPT_CHARS).collect();
    let years = parsed
        .years_in_aviation
        .map(|y| y.to_string())
        .unwrap_or_else(|| "Unknown".to_string());
    ANALYSIS_PROMPT_TEMPLATE
        .replace("{resume_text}", &resume_text)
        .replace("{email}", or_na(parsed.email.as_deref()))
        .replace("{phone}", or_na(parsed.phone.as_deref()))
        .replace("{location}", or_na(parsed.location.as_deref()))
        .replace("{has_ap}", &parsed.has_faa_ap.to_string())
        .replace("{ap_number}", parsed.faa_ap_number.as_deref().unwrap_or("Not found"))
        .replace("{years}", &years)
        .replace("{biz_av}", &parsed.business_aviation_experience.to_string())
        .replace("{aog_exp}", &parsed.aog_field_experience.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_analysis_defaults_and_score_clamp() {
        let analysis: CandidateAnalysis =
            serde_json::from_value(json!({"applicant_name": "Jane", "aog_suitability_score": "14"})).unwrap();
        assert_eq!(analysis.aog_suitability_score, 10.0);
        assert_eq!(analysis.baseline_verdict, "Needs Review");
        assert_eq!(analysis.engine_experience, "Not specified");
    }

    #[test]
    fn test_prompt_truncates_resume_text() {
        let parsed = ParsedResume {
            raw_text: "x".repeat(5000),
            email: Some("a@b.com".into()),
            ..Default::default()
        };
        let prompt = build_analysis_prompt(&parsed);
        assert!(prompt.contains(&"x".repeat(3000)));
        assert!(!prompt.contains(&"x".repeat(3001)));
        assert!(prompt.contains("- Email: a@b.com"));
        assert!(prompt.contains("- Years in Aviation: Unknown"));
    }
}
