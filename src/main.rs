//! Credential Service server
//!
//! Loads configuration from the environment, prepares the PostgreSQL schema
//! and serves the authentication API.

use credential_service::{
    create_routes, middleware, store::postgres::run_migrations, AppState, AuthConfig,
    AuthService, CredentialStores, RateLimiter, ServerConfig,
};

use axum::http::{header, HeaderValue, Method};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const RATE_LIMIT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Credential service failed");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("credential_service=info,tower_http=info"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let auth_config = AuthConfig::from_env()?;
    let server_config = ServerConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(server_config.database_max_connections)
        .connect(&server_config.database_url)
        .await?;

    run_migrations(&pool).await?;

    let auth = Arc::new(AuthService::from_config(
        CredentialStores::postgres(pool),
        auth_config,
    )?);

    let limiter = Arc::new(
        RateLimiter::per_minute(server_config.rate_limit_per_minute)
            .with_trusted_proxy(server_config.trusted_proxy),
    );
    let _limiter_sweeper = limiter.spawn_sweeper(RATE_LIMIT_SWEEP_INTERVAL);
    let _token_sweeper = spawn_token_sweeper(
        auth.clone(),
        Duration::from_secs(server_config.token_sweep_interval),
    );

    let state = AppState::new(auth, server_config.refresh_cookie.clone(), limiter);

    let app = create_routes(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(&server_config.allowed_origins))
            .layer(CatchPanicLayer::custom(middleware::handle_panic)),
    );

    let listener = tokio::net::TcpListener::bind(&server_config.bind_address).await?;
    tracing::info!(address = %server_config.bind_address, "Credential service listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Credential service stopped");
    Ok(())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::ORIGIN, header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION])
        // Browsers only send the refresh cookie cross-origin with credentials
        .allow_credentials(true)
}

fn spawn_token_sweeper(auth: Arc<AuthService>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = auth.purge_expired_tokens().await {
                tracing::warn!(error = %e, "Expired token sweep failed");
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
