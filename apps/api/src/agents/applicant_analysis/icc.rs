//! Initial Candidate Coverage report: a plain-text summary laid out as a
//! monospaced PDF.

use chrono::{DateTime, Utc};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use tracing::info;

use super::prompts::CandidateAnalysis;
use super::resume::ParsedResume;
use crate::agents::AgentError;

// US Letter in points; 10pt Courier with 12pt leading.
const PAGE_WIDTH: i64 = 612;
const PAGE_HEIGHT: i64 = 792;
const MARGIN: i64 = 54;
const FONT_SIZE: i64 = 10;
const LEADING: i64 = 12;
const LINES_PER_PAGE: usize = ((PAGE_HEIGHT - 2 * MARGIN) / LEADING) as usize;
/// Courier at 10pt fits 84 columns between the margins.
const MAX_COLUMNS: usize = 84;

const RULE: &str = "============================================================";
const SECTION_RULE: &str = "------------------------------------------------------------";

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "YES"
    } else {
        "NO"
    }
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.trim().is_empty() {
        default
    } else {
        value
    }
}

pub fn render_icc_text(parsed: &ParsedResume, analysis: &CandidateAnalysis, generated_at: DateTime<Utc>) -> String {
    let na = "N/A";
    let years = parsed
        .years_in_aviation
        .map(|y| y.to_string())
        .unwrap_or_else(|| "Unknown".to_string());
    format!(
        "{RULE}
JETSTREAMMX LLC - INITIAL CANDIDATE COVERAGE (ICC)
{RULE}

Generated: {generated}

CANDIDATE INFORMATION
{SECTION_RULE}
Name:           {name}
Email:          {email}
Phone:          {phone}
Location:       {location}

LICENSING & COMPLIANCE
{SECTION_RULE}
FAA A&P:        {has_ap}
A&P Number:     {ap_number}
Years in Aviation: {years}

EXPERIENCE SUMMARY
{SECTION_RULE}
Aircraft Families:
{aircraft}

Engine Families:
{engines}

Systems Strengths:
{systems}

SUITABILITY ASSESSMENT
{SECTION_RULE}
Baseline Verdict:       {verdict}
AOG Suitability Score:  {score}/10

Business Aviation:      {biz_av}
AOG/Field Experience:   {aog}

MISSING INFORMATION
{SECTION_RULE}
{missing}

RECOMMENDED FOLLOW-UP QUESTIONS
{SECTION_RULE}
{questions}

{RULE}
END OF ICC - JetsMX Hiring Process
{RULE}
",
        generated = generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        name = or_default(&analysis.applicant_name, "Unknown"),
        email = parsed.email.as_deref().unwrap_or(na),
        phone = parsed.phone.as_deref().unwrap_or(na),
        location = parsed.location.as_deref().unwrap_or(na),
        has_ap = yes_no(parsed.has_faa_ap),
        ap_number = parsed.faa_ap_number.as_deref().unwrap_or("Not found"),
        aircraft = or_default(&analysis.aircraft_experience, "Not specified"),
        engines = or_default(&analysis.engine_experience, "Not specified"),
        systems = or_default(&analysis.systems_strengths, "Not specified"),
        verdict = analysis.baseline_verdict,
        score = analysis.aog_suitability_score,
        biz_av = yes_no(parsed.business_aviation_experience),
        aog = yes_no(parsed.aog_field_experience),
        missing = or_default(&analysis.missing_info, "None identified"),
        questions = or_default(&analysis.follow_up_questions, "None at this time"),
    )
}

/// `ICC_Jane_Smith_20240605.pdf`
pub fn icc_filename(applicant_name: &str, date: DateTime<Utc>) -> String {
    let name: String = applicant_name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("ICC_{}_{}.pdf", name, date.format("%Y%m%d"))
}

/// Wraps long lines and replaces characters the standard Courier font
/// cannot encode.
fn layout_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    for raw in text.lines() {
        let clean: String = raw
            .chars()
            .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
            .collect();
        if clean.is_empty() {
            lines.push(String::new());
            continue;
        }
        let chars: Vec<char> = clean.chars().collect();
        for chunk in chars.chunks(MAX_COLUMNS) {
            lines.push(chunk.iter().collect());
        }
    }
    lines
}

fn page_content(lines: &[String]) -> Content {
    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), FONT_SIZE.into()]),
        Operation::new("TL", vec![LEADING.into()]),
        Operation::new("Td", vec![MARGIN.into(), (PAGE_HEIGHT - MARGIN).into()]),
    ];
    for line in lines {
        operations.push(Operation::new("Tj", vec![Object::string_literal(line.as_str())]));
        operations.push(Operation::new("T*", vec![]));
    }
    operations.push(Operation::new("ET", vec![]));
    Content { operations }
}

/// Renders text into a paginated PDF.
pub fn render_pdf(text: &str) -> Result<Vec<u8>, AgentError> {
    let lines = layout_lines(text);
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    let chunks: Vec<&[String]> = if lines.is_empty() {
        vec![&lines[..]]
    } else {
        lines.chunks(LINES_PER_PAGE).collect()
    };
    for chunk in chunks {
        let encoded = page_content(chunk)
            .encode()
            .map_err(|e| AgentError::Document(format!("PDF content encoding failed: {e}")))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    let media_box: Vec<Object> = vec![0_i64.into(), 0_i64.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()];
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => media_box,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| AgentError::Document(format!("PDF write failed: {e}")))?;
    info!(bytes = bytes.len(), pages = count, "Rendered ICC PDF");
    Ok(bytes)
}

pub fn generate_icc_pdf(
    parsed: &ParsedResume,
    analysis: &CandidateAnalysis,
    generated_at: DateTime<Utc>,
) -> Result<Vec<u8>, AgentError> {
    render_pdf(&render_icc_text(parsed, analysis, generated_at))
}
