use std::sync::Arc;

use aws_sdk_s3::Client as S3Client;

use crate::agents::airtable_agent::AirtableAgent;
use crate::agents::applicant_analysis::ApplicantAnalysisAgent;
use crate::agents::company_kb::CompanyKbAgent;
use crate::agents::hr_pipeline::HrPipelineAgent;
use crate::airtable::schema::SchemaManager;
use crate::airtable::client::AirtableClient;
use crate::airtable::webhooks::PayloadFeed;
use crate::airtable::RecordStore;
use crate::audit::AuditLogger;
use crate::config::Config;
use crate::db::CursorStore;
use crate::google::pubsub::EventBus;
use crate::google::GoogleServices;
use crate::idempotency::IdempotencyStore;
use crate::webhooks::handlers::HandlerRegistry;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn RecordStore>,
    pub schema: Arc<SchemaManager>,
    pub audit: AuditLogger,
    pub google: GoogleServices,
    pub events: EventBus,
    /// Queued Airtable webhook payloads, read when a notification ping arrives.
    pub airtable_payloads: Arc<dyn PayloadFeed>,
    /// Direct API access for base administration; absent in tests.
    pub airtable_api: Option<AirtableClient>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub cursors: Arc<dyn CursorStore>,
    pub s3: S3Client,
    /// Outbound client for command callbacks.
    pub http: reqwest::Client,
    pub webhook_handlers: Arc<HandlerRegistry>,
    pub airtable_agent: AirtableAgent,
    pub company_kb: CompanyKbAgent,
    pub hr_pipeline: HrPipelineAgent,
    pub applicant_analysis: ApplicantAnalysisAgent,
}

impl AppState {
    /// Wires the agents and webhook handlers on top of the given services.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        store: Arc<dyn RecordStore>,
        schema: Arc<SchemaManager>,
        audit: AuditLogger,
        google: GoogleServices,
        events: EventBus,
        model: Arc<dyn crate::llm_client::ChatModel>,
        airtable_payloads: Arc<dyn PayloadFeed>,
        idempotency: Arc<dyn IdempotencyStore>,
        cursors: Arc<dyn CursorStore>,
        s3: S3Client,
    ) -> Self {
        let airtable_agent = AirtableAgent::new(store.clone(), schema.clone(), audit.clone(), model.clone());
        let company_kb = CompanyKbAgent::new(
            store.clone(),
            google.gmail.clone(),
            google.calendar.clone(),
            google.drive.clone(),
            model.clone(),
        );
        let hr_pipeline = HrPipelineAgent::new(
            store.clone(),
            audit.clone(),
            google.clone(),
            config.chat_space_id.clone(),
        );
        let applicant_analysis = ApplicantAnalysisAgent::new(
            store.clone(),
            audit.clone(),
            google.drive.clone(),
            events.clone(),
            model,
            config.drive_folder_icc_reports.clone(),
        );
        let webhook_handlers = Arc::new(HandlerRegistry::with_defaults(events.clone(), schema.clone()));

        Self {
            config,
            store,
            schema,
            audit,
            google,
            events,
            airtable_payloads,
            airtable_api: None,
            idempotency,
            cursors,
            s3,
            http: reqwest::Client::new(),
            webhook_handlers,
            airtable_agent,
            company_kb,
            hr_pipeline,
            applicant_analysis,
        }
    }

    pub fn with_airtable_api(mut self, client: AirtableClient) -> Self {
        self.airtable_api = Some(client);
        self
    }
}
