/// Breakwater - Marketplace Risk & Enforcement Engine
///
/// HTTP service entry point. Loads configuration from the environment,
/// builds the application context, starts the background jobs, and
/// serves the API.
use breakwater::{config::EngineConfig, context::AppContext, error::EngineResult, jobs, server};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> EngineResult<()> {
    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "breakwater=debug,tower_http=debug".into());

    if std::env::var("BW_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // Print banner
    print_banner();

    // Load configuration
    let config = EngineConfig::from_env()?;

    // Create application context
    let ctx = AppContext::new(config).await?;
    let ctx = Arc::new(ctx);

    // Start background jobs
    if ctx.config.jobs.enabled {
        let scheduler = Arc::new(jobs::JobScheduler::new(Arc::clone(&ctx)));
        scheduler.start();
    }

    // Start server
    server::serve((*ctx).clone()).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
    ____                 __                  __
   / __ )________  ____ _/ /___      ______ _/ /____  _____
  / __  / ___/ _ \/ __ `/ //_/ | /| / / __ `/ __/ _ \/ ___/
 / /_/ / /  /  __/ /_/ / ,<  | |/ |/ / /_/ / /_/  __/ /
/_____/_/   \___/\__,_/_/|_| |__/|__/\__,_/\__/\___/_/

        Marketplace Risk & Enforcement Engine v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
