use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chat_billing_backend::config::Config;
use chat_billing_backend::responses::JsonResponse;
use chat_billing_backend::routes;
use chat_billing_backend::services::stripe::LiveStripeService;
use chat_billing_backend::services::webhook_redelivery::HttpWebhookRedelivery;
use chat_billing_backend::state::{AppState, Repositories};
use chat_billing_backend::worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    let _sentry = init_tracing(config.sentry_dsn.as_deref());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        stripe_test_mode = config.stripe.is_test_mode(),
        "starting billing backend"
    );

    let pool = establish_connection(&config.database_url).await?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run database migrations")?;

    let stripe = Arc::new(LiveStripeService::from_settings(&config.stripe));
    let redelivery = Arc::new(
        HttpWebhookRedelivery::new(
            config.retry.intake_url.clone(),
            config.service_api_key.clone(),
            config.retry.http_timeout,
        )
        .context("failed to build redelivery client")?,
    );

    let bind_addr = config.bind_addr.clone();
    let cors = CorsLayer::new()
        .allow_origin(
            config
                .frontend_origin
                .parse::<HeaderValue>()
                .context("FRONTEND_ORIGIN is not a valid header value")?,
        )
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    let state = AppState::new(config, Repositories::postgres(&pool), stripe, redelivery)
        .context("invalid SUPABASE_JWT_SECRET")?;

    let rate_limit_ms: u64 = std::env::var("RATE_LIMITER_MILLISECONDS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(200);
    let rate_limit_burst: u32 = std::env::var("RATE_LIMITER_BURST")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(20);
    let user_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(rate_limit_ms)
            .burst_size(rate_limit_burst)
            .use_headers()
            .error_handler(|_err| {
                JsonResponse::too_many_requests(
                    "Too many requests. Please wait a moment and try again.",
                )
            })
            .finish()
            .context("invalid rate limiter configuration")?,
    );

    let limiter = user_governor_conf.limiter().clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            limiter.retain_recent();
        }
    });

    let app = routes::user_routes()
        .layer(GovernorLayer {
            config: user_governor_conf,
        })
        .merge(routes::service_routes())
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let workers = worker::start_background_workers(state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(%bind_addr, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    for handle in workers {
        handle.abort();
    }
    Ok(())
}

/// Console logging filtered by `RUST_LOG`, JSON when `LOG_FORMAT=json`, and
/// error events forwarded to Sentry when a DSN is configured.
fn init_tracing(sentry_dsn: Option<&str>) -> Option<sentry::ClientInitGuard> {
    let guard = sentry_dsn.map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chat_billing_backend=debug"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(sentry_tracing::layer());
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    guard
}

async fn establish_connection(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .context("failed to connect to the database")?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .context("failed to verify database connection")?;

    info!("connected to the database");
    Ok(pool)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(?err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
