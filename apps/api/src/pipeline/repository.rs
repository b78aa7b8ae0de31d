use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use crate::airtable::{formula, AirtableError, Fields, RecordStore};
use crate::audit::AuditLogger;

use super::interaction;
use super::models::{
    to_fields, Applicant, ApplicantCreate, ApplicantUpdate, InteractionCreate, Pipeline,
    PipelineCreate, PipelineUpdate,
};
use super::tables;

/// Typed access to the applicants, pipeline and interactions tables.
/// Every write is mirrored to the audit trail.
pub struct PipelineRepository<'a> {
    store: &'a dyn RecordStore,
    audit: &'a AuditLogger,
}

impl<'a> PipelineRepository<'a> {
    pub fn new(store: &'a dyn RecordStore, audit: &'a AuditLogger) -> Self {
        Self { store, audit }
    }

    pub async fn get_pipeline(&self, record_id: &str) -> Result<Pipeline, AirtableError> {
        let record = self.store.get(tables::APPLICANT_PIPELINE, record_id).await?;
        Ok(Pipeline::from_record(&record)?)
    }

    pub async fn create_pipeline(
        &self,
        data: &PipelineCreate,
        initiated_by: &str,
        reason: &str,
    ) -> Result<String, AirtableError> {
        let fields = to_fields(data);
        let record = self
            .store
            .create(tables::APPLICANT_PIPELINE, fields.clone(), false)
            .await?;
        info!(record_id = %record.id, "Created pipeline record");
        self.audit
            .log_airtable_created(tables::APPLICANT_PIPELINE, &record.id, &fields, initiated_by, reason)
            .await;
        Ok(record.id)
    }

    /// Applies a partial update. Returns `false` without calling Airtable
    /// when the update carries no fields.
    pub async fn update_pipeline(
        &self,
        record_id: &str,
        update: &PipelineUpdate,
        initiated_by: &str,
        reason: &str,
    ) -> Result<bool, AirtableError> {
        let fields = to_fields(update);
        if fields.is_empty() {
            warn!(record_id, "No fields to update");
            return Ok(false);
        }

        let current = self.store.get(tables::APPLICANT_PIPELINE, record_id).await?;
        let before: Fields = fields
            .keys()
            .map(|k| (k.clone(), current.fields.get(k).cloned().unwrap_or(Value::Null)))
            .collect();

        self.store
            .update(tables::APPLICANT_PIPELINE, record_id, fields.clone(), false)
            .await?;
        info!(record_id, "Updated pipeline record");

        self.audit
            .log_airtable_update(
                tables::APPLICANT_PIPELINE,
                record_id,
                &fields,
                Some(before),
                initiated_by,
                reason,
            )
            .await;
        Ok(true)
    }

    pub async fn find_pipeline_by_thread_id(&self, thread_id: &str) -> Result<Option<Pipeline>, AirtableError> {
        let formula = formula::equals_str("Outreach Thread ID", thread_id);
        match self.store.find_first(tables::APPLICANT_PIPELINE, &formula).await? {
            Some(record) => Ok(Some(Pipeline::from_record(&record)?)),
            None => Ok(None),
        }
    }

    pub async fn find_pipelines(&self, formula: Option<&str>) -> Result<Vec<Pipeline>, AirtableError> {
        let records = self.store.all(tables::APPLICANT_PIPELINE, formula).await?;
        records
            .iter()
            .map(|r| Pipeline::from_record(r).map_err(AirtableError::from))
            .collect()
    }

    pub async fn create_applicant(
        &self,
        data: &ApplicantCreate,
        initiated_by: &str,
        reason: &str,
    ) -> Result<String, AirtableError> {
        let fields = to_fields(data);
        let record = self.store.create(tables::APPLICANTS, fields.clone(), false).await?;
        info!(record_id = %record.id, applicant = %data.applicant_name, "Created applicant record");
        self.audit
            .log_airtable_created(tables::APPLICANTS, &record.id, &fields, initiated_by, reason)
            .await;
        Ok(record.id)
    }

    pub async fn get_applicant(&self, record_id: &str) -> Result<Applicant, AirtableError> {
        let record = self.store.get(tables::APPLICANTS, record_id).await?;
        Ok(Applicant::from_record(&record)?)
    }

    pub async fn update_applicant(
        &self,
        record_id: &str,
        update: &ApplicantUpdate,
        initiated_by: &str,
        reason: &str,
    ) -> Result<(), AirtableError> {
        let fields = to_fields(update);
        if fields.is_empty() {
            return Ok(());
        }
        self.store
            .update(tables::APPLICANTS, record_id, fields.clone(), false)
            .await?;
        self.audit
            .log_airtable_update(tables::APPLICANTS, record_id, &fields, None, initiated_by, reason)
            .await;
        Ok(())
    }

    pub async fn find_applicant_by_email(&self, email: &str) -> Result<Option<Applicant>, AirtableError> {
        let formula = formula::find_by_email(email);
        match self.store.find_first(tables::APPLICANTS, &formula).await? {
            Some(record) => Ok(Some(Applicant::from_record(&record)?)),
            None => Ok(None),
        }
    }

    /// Appends a row to the interactions log.
    pub async fn log_interaction(
        &self,
        applicant_id: &str,
        interaction_type: &str,
        direction: &str,
        channel: &str,
        summary: &str,
        gmail: Option<(&str, &str)>,
    ) -> Result<String, AirtableError> {
        let data = InteractionCreate {
            applicant: vec![applicant_id.to_string()],
            interaction_type: interaction_type.to_string(),
            direction: direction.to_string(),
            channel: channel.to_string(),
            summary: summary.to_string(),
            timestamp: Utc::now(),
            gmail_message_id: gmail.map(|(message_id, _)| message_id.to_string()),
            gmail_thread_id: gmail.map(|(_, thread_id)| thread_id.to_string()),
        };
        let record = self
            .store
            .create(tables::INTERACTIONS, to_fields(&data), false)
            .await?;
        info!(record_id = %record.id, applicant_id, channel, "Logged interaction");
        Ok(record.id)
    }

    pub async fn log_system_interaction(&self, applicant_id: &str, channel: &str, summary: &str) -> Result<String, AirtableError> {
        self.log_interaction(
            applicant_id,
            interaction::TYPE_SYSTEM,
            interaction::DIRECTION_SYSTEM,
            channel,
            summary,
            None,
        )
        .await
    }
}
