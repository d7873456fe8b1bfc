use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};

use storefront_api as api;
use storefront_api::services::{
    printful_integration::{PrintfulClient, PrintfulConfig},
    stripe_integration::{StripeClient, StripeConfig},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to database")?;
    api::db::run_migrations(&db_pool).await.map_err(|e| {
        error!("Failed running migrations: {}", e);
        e
    })?;
    let db_arc = Arc::new(db_pool);

    if cfg.stripe_secret_key.is_none() || cfg.stripe_webhook_secret.is_none() {
        warn!("Stripe credentials missing; checkout and payment webhooks will be rejected");
    }
    if cfg.printful_api_key.is_none() {
        warn!("Printful API key missing; catalog and fulfillment calls will fail");
    }

    let payments = Arc::new(
        StripeClient::new(StripeConfig::from_app_config(&cfg))
            .context("failed to build Stripe client")?,
    );
    let fulfillment = Arc::new(
        PrintfulClient::new(PrintfulConfig::from_app_config(&cfg))
            .context("failed to build Printful client")?,
    );

    let services = api::handlers::AppServices::new(db_arc.clone(), &cfg, payments, fulfillment);

    let app_state = api::AppState {
        db: db_arc,
        config: cfg.clone(),
        services,
    };
    let app = api::build_router(app_state);

    // Bind and serve
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    info!(
        environment = %cfg.environment,
        live_mode = cfg.stripe_live_mode(),
        "storefront-api listening on http://{}",
        addr
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("storefront-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
