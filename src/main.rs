use std::sync::Arc;

use outreach_assist::api::{self, AppState};
use outreach_assist::compose::{CallLimiter, ContentGenerator};
use outreach_assist::config::AppConfig;
use outreach_assist::gateway::create_gateway;
use outreach_assist::llm::create_provider;
use outreach_assist::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "Failed to install rustls crypto provider")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export LLM_API_KEY=... and SENDGRID_API_KEY=... (or EMAIL_SMTP_HOST=...)");
        std::process::exit(1);
    });

    eprintln!("📬 Outreach Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!(
        "   LLM cap: {}/min ({:?})",
        config.rate_limit.calls_per_minute, config.rate_limit.mode
    );

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.database_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {}",
                    config.database_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", config.database_path.display());

    // ── Collaborators ────────────────────────────────────────────────────
    let llm = create_provider(&config.llm)?;
    let limiter = CallLimiter::per_minute(config.rate_limit.calls_per_minute, config.rate_limit.mode);
    let generator = Arc::new(ContentGenerator::new(llm, limiter, config.generator.clone()));
    let gateway = create_gateway(&config.gateway)?;
    eprintln!("   Gateway: {}", gateway.name());

    // ── HTTP ─────────────────────────────────────────────────────────────
    let state = AppState::new(db, generator, gateway);
    let app = api::router(state).layer(api::cors_layer(&config.server.cors_origins));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.server.port)).await?;
    eprintln!("   API: http://0.0.0.0:{}/api\n", config.server.port);
    tracing::info!(port = config.server.port, "HTTP server started");
    axum::serve(listener, app).await?;

    Ok(())
}
