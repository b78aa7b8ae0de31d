mod agents;
mod airtable;
mod audit;
mod config;
mod db;
mod errors;
mod events;
mod google;
mod idempotency;
mod llm_client;
mod pipeline;
mod routes;
mod state;
mod webhooks;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::airtable::client::AirtableClient;
use crate::airtable::schema::SchemaManager;
use crate::airtable::webhooks::AirtableWebhookClient;
use crate::audit::AuditLogger;
use crate::config::{Config, LogFormat};
use crate::db::{create_pool, run_migrations, PgCursorStore};
use crate::google::pubsub::{EventBus, PubSubPublisher};
use crate::google::{GoogleClient, GoogleServices, MetadataTokenProvider, StaticTokenProvider, TokenProvider};
use crate::idempotency::RedisIdempotency;
use crate::llm_client::LlmClient;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{}={}",
            env!("CARGO_PKG_NAME").replace('-', "_"),
            &config.rust_log
        ))
    });
    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    info!("Starting JetsMX API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;
    run_migrations(&db).await?;
    let audit = AuditLogger::new(db.clone());

    // Initialize Redis
    let redis = redis::Client::open(config.redis_url.clone())?;
    info!("Redis client initialized");

    // Initialize S3-compatible storage for exports
    let s3 = build_s3_client(&config).await;
    info!("S3 client initialized");

    // Initialize Airtable
    let airtable = AirtableClient::new(config.airtable_api_key.clone(), config.airtable_base_id.clone())?;
    let schema = Arc::new(SchemaManager::from_path(&config.airtable_schema_path)?);
    info!(
        base = %config.airtable_base_id,
        tables = schema.tables().len(),
        "Airtable client initialized"
    );

    // Initialize Google Workspace and Pub/Sub
    let http = reqwest::Client::new();
    let tokens: Arc<dyn TokenProvider> = match &config.google_access_token {
        Some(token) => Arc::new(StaticTokenProvider::new(token.clone())),
        None => Arc::new(MetadataTokenProvider::new(http.clone())),
    };
    let mut google_client = GoogleClient::new(http, tokens);
    if let Some(root) = &config.google_api_root {
        info!(root = %root, "Routing Google API calls to emulator");
        google_client = google_client.with_api_root(root.clone());
    }
    let google = GoogleServices::new(google_client.clone(), audit.clone(), &config.calendar_id);
    let publisher = Arc::new(PubSubPublisher::new(google_client, config.gcp_project_id.clone()));
    let events = EventBus::new(publisher, config.topics.clone());
    info!(project = %config.gcp_project_id, "Google clients initialized");

    // Initialize LLM client
    let llm = LlmClient::new(config.openai_api_key.clone(), config.openai_model.clone())?;
    info!("LLM client initialized (model: {})", config.openai_model);

    // Build app state
    let state = AppState::new(
        config.clone(),
        Arc::new(airtable.clone()),
        schema,
        audit,
        google,
        events,
        Arc::new(llm),
        Arc::new(AirtableWebhookClient::new(airtable.clone())),
        Arc::new(RedisIdempotency::new(redis)),
        Arc::new(PgCursorStore::new(db)),
        s3,
    )
    .with_airtable_api(airtable);

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client for MinIO (local) or an S3-compatible endpoint
/// such as GCS interoperability (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "jetsmx-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    aws_sdk_s3::Client::new(&s3_config)
}
