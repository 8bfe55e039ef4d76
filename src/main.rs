use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kyc_vault::{
    config::Config,
    db,
    repository::Repositories,
    routes,
    services::{
        encryption::PiiCipher,
        storage::{FsBlobStore, UrlSigner},
        tenants::TenantRegistry,
    },
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    // Key material is checked before anything serves traffic.
    let cipher = PiiCipher::from_config(&config)?;
    let signer = UrlSigner::new(&config.storage_signing_key, &config.public_base_url)?;
    info!(key_version = cipher.current_version(), "PII cipher ready");

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    info!("Database connected and migrations applied");

    let blobs = FsBlobStore::new(&config.storage_dir, signer.clone());
    blobs.ensure_root().await?;
    info!(dir = %config.storage_dir, "Evidence storage ready");

    let redis = match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str())?;
            let conn = client.get_multiplexed_async_connection().await?;
            info!("Redis connected");
            Some(conn)
        }
        None => {
            info!("REDIS_URL not set, login throttling disabled");
            None
        }
    };

    let repos = Repositories::postgres(pool.clone());

    if let Some(name) = &config.default_tenant_name {
        let tenant = TenantRegistry::resolve_or_create_default(&repos, name).await?;
        info!(tenant_id = %tenant.id, name = %tenant.name, "Default tenant resolved");
    }

    let config = Arc::new(config);
    let state = AppState {
        config: config.clone(),
        repos,
        cipher: Arc::new(cipher),
        blobs: Arc::new(blobs),
        signer,
        db: Some(pool),
        redis,
    };

    // Development origins plus the configured public URL.
    let base = config.public_base_url.trim_end_matches('/').to_string();
    let cors_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let Ok(o) = origin.to_str() else {
            return false;
        };
        o.starts_with("http://localhost") || o.starts_with("http://127.0.0.1") || o == base
    });

    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(AllowHeaders::list([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::HeaderName::from_static("x-tenant"),
        ]))
        .allow_origin(cors_origin);

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = format!("{}:{}", config.host, config.port);
    info!("kyc-vault API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
