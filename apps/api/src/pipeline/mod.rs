//! Hiring-pipeline domain: table names, stage vocabulary, typed records and
//! the repository that reads and writes them through a `RecordStore`.

pub mod models;
pub mod repository;

use serde::{Deserialize, Serialize};

/// Airtable table names.
pub mod tables {
    pub const APPLICANTS: &str = "applicants";
    pub const APPLICANT_PIPELINE: &str = "applicant_pipeline";
    pub const INTERACTIONS: &str = "interactions";
    pub const CONTRACTORS: &str = "contractors";
    pub const AIRCRAFT_TYPES: &str = "aircraft_types";
    pub const ENGINE_FAMILIES: &str = "engine_families";
    pub const AIRPORTS: &str = "airports";

    pub const ALL: &[&str] = &[
        APPLICANTS,
        APPLICANT_PIPELINE,
        INTERACTIONS,
        CONTRACTORS,
        AIRCRAFT_TYPES,
        ENGINE_FAMILIES,
        AIRPORTS,
    ];
}

/// Ordered hiring stages. Serialized with their Airtable display strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PipelineStage {
    #[serde(rename = "New")]
    New,
    #[serde(rename = "Profile Generated")]
    ProfileGenerated,
    #[serde(rename = "HR Screen – Approved")]
    HrScreenApproved,
    #[serde(rename = "HR Screen – Denied")]
    HrScreenDenied,
    #[serde(rename = "Outreach Draft Created")]
    OutreachDraftCreated,
    #[serde(rename = "Initial Email Sent")]
    InitialEmailSent,
    #[serde(rename = "Awaiting Applicant Reply")]
    AwaitingApplicantReply,
    #[serde(rename = "Applicant Responded")]
    ApplicantResponded,
    #[serde(rename = "Phone Probe Scheduled")]
    PhoneProbeScheduled,
    #[serde(rename = "Phone Probe Complete")]
    PhoneProbeComplete,
    #[serde(rename = "Video Interview Scheduled")]
    VideoInterviewScheduled,
    #[serde(rename = "Interview Complete")]
    InterviewComplete,
    #[serde(rename = "Background Check – Pending")]
    BackgroundCheckPending,
    #[serde(rename = "Background Check – Passed")]
    BackgroundCheckPassed,
    #[serde(rename = "Background Check – Failed")]
    BackgroundCheckFailed,
    #[serde(rename = "Ready for Contractor Onboarding")]
    ReadyForContractorOnboarding,
    #[serde(rename = "Archived / Not a Fit")]
    Archived,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 17] = [
        PipelineStage::New,
        PipelineStage::ProfileGenerated,
        PipelineStage::HrScreenApproved,
        PipelineStage::HrScreenDenied,
        PipelineStage::OutreachDraftCreated,
        PipelineStage::InitialEmailSent,
        PipelineStage::AwaitingApplicantReply,
        PipelineStage::ApplicantResponded,
        PipelineStage::PhoneProbeScheduled,
        PipelineStage::PhoneProbeComplete,
        PipelineStage::VideoInterviewScheduled,
        PipelineStage::InterviewComplete,
        PipelineStage::BackgroundCheckPending,
        PipelineStage::BackgroundCheckPassed,
        PipelineStage::BackgroundCheckFailed,
        PipelineStage::ReadyForContractorOnboarding,
        PipelineStage::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::New => "New",
            PipelineStage::ProfileGenerated => "Profile Generated",
            PipelineStage::HrScreenApproved => "HR Screen – Approved",
            PipelineStage::HrScreenDenied => "HR Screen – Denied",
            PipelineStage::OutreachDraftCreated => "Outreach Draft Created",
            PipelineStage::InitialEmailSent => "Initial Email Sent",
            PipelineStage::AwaitingApplicantReply => "Awaiting Applicant Reply",
            PipelineStage::ApplicantResponded => "Applicant Responded",
            PipelineStage::PhoneProbeScheduled => "Phone Probe Scheduled",
            PipelineStage::PhoneProbeComplete => "Phone Probe Complete",
            PipelineStage::VideoInterviewScheduled => "Video Interview Scheduled",
            PipelineStage::InterviewComplete => "Interview Complete",
            PipelineStage::BackgroundCheckPending => "Background Check – Pending",
            PipelineStage::BackgroundCheckPassed => "Background Check – Passed",
            PipelineStage::BackgroundCheckFailed => "Background Check – Failed",
            PipelineStage::ReadyForContractorOnboarding => "Ready for Contractor Onboarding",
            PipelineStage::Archived => "Archived / Not a Fit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.as_str() == s)
    }

    /// Stages in which an applicant is still moving through hiring.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PipelineStage::New
                | PipelineStage::ProfileGenerated
                | PipelineStage::HrScreenApproved
                | PipelineStage::OutreachDraftCreated
                | PipelineStage::InitialEmailSent
                | PipelineStage::AwaitingApplicantReply
                | PipelineStage::ApplicantResponded
                | PipelineStage::PhoneProbeScheduled
                | PipelineStage::PhoneProbeComplete
                | PipelineStage::VideoInterviewScheduled
                | PipelineStage::InterviewComplete
        )
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub mod screening {
    pub const APPROVE: &str = "Approve";
    pub const DENY: &str = "Deny";
    pub const NEEDS_REVIEW: &str = "Needs Review";
}

pub mod verdict {
    pub const STRONG_FIT: &str = "Strong Fit";
    pub const MAYBE: &str = "Maybe";
    pub const NOT_A_FIT: &str = "Not a Fit";
    pub const NEEDS_REVIEW: &str = "Needs Review";
}

pub mod interaction {
    pub const TYPE_SYSTEM: &str = "System";
    pub const TYPE_EMAIL: &str = "Email";
    pub const TYPE_PHONE_CALL: &str = "Phone Call";
    pub const TYPE_VIDEO_INTERVIEW: &str = "Video Interview";
    pub const TYPE_CHAT_NOTE: &str = "Chat Note";

    pub const DIRECTION_INBOUND: &str = "Inbound";
    pub const DIRECTION_OUTBOUND: &str = "Outbound";
    pub const DIRECTION_SYSTEM: &str = "System";

    pub const CHANNEL_GMAIL: &str = "Gmail";
    pub const CHANNEL_CALENDAR: &str = "Calendar";
    pub const CHANNEL_DRIVE: &str = "Drive";
    pub const CHANNEL_CHAT: &str = "Chat";
    pub const CHANNEL_MANUAL: &str = "Manual";
}
