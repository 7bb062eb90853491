use hubmatrix::api::{self, AppState};
use hubmatrix::config::Config;
use hubmatrix::db::init_db;
use hubmatrix::engine::{ActiveCountPropagator, CommissionEngine, PositionAllocator};
use hubmatrix::notify::{HttpNotifier, LogNotifier, Notifier};
use hubmatrix::orchestration::{MonthlyCycleProcessor, PaymentProcessor, PayoutOrchestrator};
use hubmatrix::rail::{HttpPaymentRail, PaymentRail};
use hubmatrix::Repository;
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let port = config.port;

    // Initialize database and dependencies
    let pool = match init_db(&config.database_path).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let repo = Arc::new(Repository::new(pool));
    let rail: Arc<dyn PaymentRail> = Arc::new(HttpPaymentRail::new(config.rail_api_url.clone()));
    let notifier: Arc<dyn Notifier> = match config.notify_webhook_url.clone() {
        Some(url) => Arc::new(HttpNotifier::new(url)),
        None => Arc::new(LogNotifier),
    };

    let engine = CommissionEngine::new(config.schedule.clone(), config.distribution.clone());
    let allocator = PositionAllocator::new(repo.clone());
    let propagator = ActiveCountPropagator::new(repo.clone(), config.schedule.clone());
    let payments = PaymentProcessor::new(
        repo.clone(),
        engine.clone(),
        propagator.clone(),
        notifier.clone(),
    );
    let payouts = PayoutOrchestrator::new(
        repo.clone(),
        rail,
        notifier.clone(),
        config.payout.clone(),
    );
    let cycle = MonthlyCycleProcessor::new(
        repo.clone(),
        engine,
        config.payout.qualification_min_directs,
    );

    // Create router
    let app = api::create_router(AppState::new(
        repo,
        allocator,
        propagator,
        payments,
        payouts,
        cycle,
        config.admin_tokens.clone(),
    ));

    // Bind to address
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on {}", addr);

    // Run server
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
