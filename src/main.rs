use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tollgate::{
    api,
    config::Settings,
    service::ServiceContext,
    wechat::{GatewayClient, MerchantSigner, WebhookVerifier},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tollgate=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let settings = Settings::new().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}. Using defaults.", e);
        Settings::default()
    });

    tracing::info!(
        "Starting Tollgate server on {}:{}",
        settings.server.host,
        settings.server.port
    );

    // Initialize database
    let db_pool = SqlitePoolOptions::new()
        .max_connections(settings.database.max_connections)
        .connect(&settings.database.url)
        .await?;

    // Run migrations
    sqlx::migrate!("./migrations").run(&db_pool).await?;

    // Initialize the payment gateway when fully configured
    let (gateway, verifier) = build_gateway(&settings)?;

    let services = Arc::new(ServiceContext::new(
        &settings,
        db_pool.clone(),
        gateway,
        verifier,
    ));

    // In-process reconciliation ticker; external schedulers can also drive
    // the /api/reconcile endpoint.
    if let (Some(interval_secs), Some(reconciler)) = (
        settings.scheduler.interval_secs,
        services.reconciler.clone(),
    ) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                ticker.tick().await;
                if let Err(e) = reconciler.reconcile().await {
                    tracing::warn!("Scheduled reconciliation failed: {}", e);
                }
            }
        });
        tracing::info!("Reconciliation ticker running every {}s", interval_secs);
    }

    let settings = Arc::new(settings);
    let app = api::create_app(services, settings.clone());

    let listener = tokio::net::TcpListener::bind(format!(
        "{}:{}",
        settings.server.host, settings.server.port
    ))
    .await?;

    tracing::info!(
        "Server listening on http://{}:{}",
        settings.server.host,
        settings.server.port
    );

    axum::serve(listener, app).await?;

    Ok(())
}

fn build_gateway(
    settings: &Settings,
) -> anyhow::Result<(Option<Arc<GatewayClient>>, Option<Arc<WebhookVerifier>>)> {
    if !settings.wechat.enabled {
        tracing::info!("WeChat payment processing disabled");
        return Ok((None, None));
    }

    let wc = &settings.wechat;
    let (Some(mchid), Some(appid), Some(api_v3_key), Some(serial), Some(key_pem), Some(notify)) = (
        wc.mchid.clone(),
        wc.appid.clone(),
        wc.api_v3_key.clone(),
        wc.merchant_serial.clone(),
        wc.private_key_pem.clone(),
        wc.notify_url.clone(),
    ) else {
        tracing::warn!("WeChat payments enabled but missing configuration");
        return Ok((None, None));
    };

    let signer = MerchantSigner::new(mchid, serial, &key_pem)?;
    let gateway = Arc::new(GatewayClient::new(
        wc.api_base.clone(),
        appid,
        notify,
        api_v3_key.clone().into_bytes(),
        signer,
    )?);
    let verifier = Arc::new(WebhookVerifier::new(
        gateway.clone(),
        api_v3_key.into_bytes(),
    ));

    tracing::info!("WeChat payment processing enabled");
    Ok((Some(gateway), Some(verifier)))
}
