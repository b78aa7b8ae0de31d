pub mod admin;
pub mod agents;
pub mod health;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::events;
use crate::state::AppState;
use crate::webhooks::routes as webhooks;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Inbound webhooks
        .route("/webhooks/airtable", post(webhooks::handle_airtable))
        .route(
            "/webhooks/airtable/:table_name",
            post(webhooks::handle_airtable_legacy),
        )
        .route("/webhooks/gmail", post(webhooks::handle_gmail))
        .route("/webhooks/drive", post(webhooks::handle_drive))
        .route("/webhooks/chat/command", post(webhooks::handle_chat_command))
        .route(
            "/webhooks/chat/interaction",
            post(webhooks::handle_chat_interaction),
        )
        // Cloud Scheduler
        .route(
            "/scheduler/renew-gmail-watch",
            post(webhooks::handle_renew_gmail_watch),
        )
        .route(
            "/scheduler/renew-drive-watch",
            post(webhooks::handle_renew_drive_watch),
        )
        .route(
            "/scheduler/stop-gmail-watch",
            post(webhooks::handle_stop_gmail_watch),
        )
        .route("/scheduler/poll-drive", post(webhooks::handle_poll_drive))
        // Pub/Sub push subscriptions
        .route("/pubsub/:source", post(events::handle_pubsub))
        // Agents
        .route("/agents/airtable/chat", post(agents::handle_airtable_chat))
        .route(
            "/agents/airtable/command",
            post(agents::handle_airtable_command),
        )
        .route(
            "/agents/company-kb/chat",
            post(agents::handle_company_kb_chat),
        )
        .route(
            "/agents/applicant-analysis/process",
            post(agents::handle_process_resume),
        )
        // Airtable base administration
        .route("/admin/airtable/schema", get(admin::check_airtable_schema))
        .route(
            "/admin/airtable/webhooks",
            get(admin::list_airtable_webhooks).post(admin::create_airtable_webhook),
        )
        .route(
            "/admin/airtable/webhooks/:webhook_id",
            delete(admin::delete_airtable_webhook),
        )
        .route(
            "/admin/airtable/webhooks/:webhook_id/refresh",
            post(admin::refresh_airtable_webhook),
        )
        .with_state(state)
}
