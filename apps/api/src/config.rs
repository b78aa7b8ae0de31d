use anyhow::{Context, Result};

use crate::google::pubsub::Topics;

/// Application configuration loaded from environment variables.
/// Startup fails with the variable's name if a required one is missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub airtable_api_key: String,
    pub airtable_base_id: String,
    pub airtable_schema_path: String,
    pub openai_api_key: String,
    pub openai_model: String,
    pub gcp_project_id: String,
    /// Unset on Cloud Run, where tokens come from the metadata server.
    pub google_access_token: Option<String>,
    /// Emulator root that replaces the Google API hosts, e.g. `http://localhost:8085`.
    pub google_api_root: Option<String>,
    pub calendar_id: String,
    pub chat_space_id: Option<String>,
    pub topics: Topics,
    pub gmail_watch_topic: Option<String>,
    pub drive_folder_resumes_incoming: Option<String>,
    pub drive_folder_resumes_processed: Option<String>,
    pub drive_folder_icc_reports: Option<String>,
    /// Public URL of `/webhooks/drive`, registered when the folder watch is renewed.
    pub drive_watch_address: Option<String>,
    pub webhook_secret: Option<String>,
    pub airtable_webhook_mac_secret: Option<String>,
    pub port: u16,
    pub rust_log: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let defaults = Topics::default();
        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: require_env("REDIS_URL")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            airtable_api_key: require_env("AIRTABLE_API_KEY")?,
            airtable_base_id: require_env("AIRTABLE_BASE_ID")?,
            airtable_schema_path: env_or("AIRTABLE_SCHEMA_PATH", "config/airtable_schema.yaml"),
            openai_api_key: require_env("OPENAI_API_KEY")?,
            openai_model: env_or("OPENAI_MODEL", "gpt-4o"),
            gcp_project_id: require_env("GCP_PROJECT_ID")?,
            google_access_token: optional_env("GOOGLE_ACCESS_TOKEN"),
            google_api_root: optional_env("GOOGLE_API_ROOT"),
            calendar_id: env_or("CALENDAR_ID", "primary"),
            chat_space_id: optional_env("GOOGLE_CHAT_SPACE_ID"),
            topics: Topics {
                airtable: env_or("PUBSUB_TOPIC_AIRTABLE", &defaults.airtable),
                gmail: env_or("PUBSUB_TOPIC_GMAIL", &defaults.gmail),
                drive: env_or("PUBSUB_TOPIC_DRIVE", &defaults.drive),
                chat: env_or("PUBSUB_TOPIC_CHAT", &defaults.chat),
                applicant: env_or("PUBSUB_TOPIC_APPLICANT", &defaults.applicant),
            },
            gmail_watch_topic: optional_env("GMAIL_WATCH_TOPIC"),
            drive_folder_resumes_incoming: optional_env("DRIVE_FOLDER_RESUMES_INCOMING"),
            drive_folder_resumes_processed: optional_env("DRIVE_FOLDER_RESUMES_PROCESSED"),
            drive_folder_icc_reports: optional_env("DRIVE_FOLDER_ICC_REPORTS"),
            drive_watch_address: optional_env("DRIVE_WATCH_ADDRESS"),
            webhook_secret: optional_env("WEBHOOK_SECRET"),
            airtable_webhook_mac_secret: optional_env("AIRTABLE_WEBHOOK_MAC_SECRET"),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: env_or("RUST_LOG", "info"),
            log_format: parse_log_format(&env_or("LOG_FORMAT", "text")),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

/// Unset and empty both count as absent.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    optional_env(key).unwrap_or_else(|| default.to_string())
}

fn parse_log_format(value: &str) -> LogFormat {
    if value.eq_ignore_ascii_case("json") {
        LogFormat::Json
    } else {
        LogFormat::Text
    }
}

#[cfg(test)]
impl Config {
    /// Configuration for router tests; nothing here is contacted.
    pub fn for_tests() -> Self {
        Config {
            database_url: "postgres://localhost/jetsmx_test".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            s3_bucket: "jetsmx-test".to_string(),
            s3_endpoint: "http://127.0.0.1:9000".to_string(),
            aws_access_key_id: "test".to_string(),
            aws_secret_access_key: "test".to_string(),
            airtable_api_key: "key".to_string(),
            airtable_base_id: "appTest".to_string(),
            airtable_schema_path: "config/airtable_schema.yaml".to_string(),
            openai_api_key: "sk-test".to_string(),
            openai_model: "gpt-4o".to_string(),
            gcp_project_id: "jetsmx-test".to_string(),
            google_access_token: None,
            google_api_root: None,
            calendar_id: "primary".to_string(),
            chat_space_id: None,
            topics: Topics::default(),
            gmail_watch_topic: None,
            drive_folder_resumes_incoming: None,
            drive_folder_resumes_processed: None,
            drive_folder_icc_reports: None,
            drive_watch_address: None,
            webhook_secret: None,
            airtable_webhook_mac_secret: None,
            port: 8080,
            rust_log: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}
