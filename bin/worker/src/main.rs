use keel_entity::{EntityStore, QueryIndex};
use keel_scheduler::{ScheduledWork, Scheduler};
use keel_worker::{
    config::WorkerConfig,
    db::{PgEntityStore, PgWorkflowStore},
    mail::SmtpMailSender,
    webhook::HttpWebhookSender,
};
use keel_workflow::{
    ActionExecutorRegistry, BuiltinServices, MailSender, MergeFields, WebhookSender,
    WorkflowDataMapper, WorkflowService,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = WorkerConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    // Create database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("failed to run migrations");

    let entities = Arc::new(PgEntityStore::new(db_pool.clone()));
    let mapper: Arc<dyn WorkflowDataMapper> = Arc::new(PgWorkflowStore::new(db_pool));

    let mail = config.smtp.as_ref().map(|smtp| {
        tracing::info!(host = %smtp.host, port = smtp.port, "SMTP relay configured");
        Arc::new(SmtpMailSender::new(smtp)) as Arc<dyn MailSender>
    });
    if mail.is_none() {
        tracing::warn!("No SMTP relay configured; send_email actions will fail");
    }
    let webhooks: Arc<dyn WebhookSender> =
        Arc::new(HttpWebhookSender::new().expect("failed to build HTTP client"));

    let services = BuiltinServices {
        entities: entities.clone() as Arc<dyn EntityStore>,
        index: entities.clone() as Arc<dyn QueryIndex>,
        merge: MergeFields::new(entities.clone(), &config.application_url),
        mail,
        webhooks: Some(webhooks),
    };
    let service = WorkflowService::new(
        mapper,
        entities.clone(),
        entities,
        ActionExecutorRegistry::with_builtins(&services),
    );

    let work: Arc<dyn ScheduledWork> = Arc::new(service);
    let scheduler = Scheduler::new(work, &config.scheduler);
    scheduler
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await;
}
