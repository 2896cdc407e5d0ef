use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use broker_client::{KafkaBrokerClient, KafkaMessageSource};
use delivery_service::cache::RedisCacheStore;
use delivery_service::config::Config;
use delivery_service::db;
use delivery_service::routes;
use delivery_service::services::coordinator::{DeliveryCoordinator, PublishRetryConfig};
use delivery_service::services::dispatcher::InboundDispatcher;
use delivery_service::services::encryption::EncryptionService;
use delivery_service::services::inbox::ReceiverInbox;
use delivery_service::services::user_store::PostgresUserStore;
use delivery_service::state::AppState;

const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[actix_web::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=debug,delivery_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting delivery-service");

    let config = Arc::new(Config::from_env().context("failed to load configuration")?);

    // Postgres: external user-store collaborator
    let db_pool = db::init_pool(&config.database_url)
        .await
        .context("failed to create database pool")?;
    db::MIGRATOR
        .run(&db_pool)
        .await
        .context("failed to run migrations")?;
    tracing::info!("Database pool ready, migrations applied");

    // Redis: durability cache and receiver inboxes
    let redis_client =
        redis::Client::open(config.redis_url.as_str()).context("invalid REDIS_URL")?;
    let redis_conn = ConnectionManager::new(redis_client)
        .await
        .context("failed to initialize Redis connection manager")?;
    tracing::info!("Redis connection manager ready");

    // Kafka: broker client and consumer, constructed once at process start
    // and injected everywhere (no module-level singletons).
    let broker = Arc::new(
        KafkaBrokerClient::new(&config.kafka_brokers)
            .context("failed to create Kafka producer")?,
    );
    let source = Arc::new(
        KafkaMessageSource::new(
            &config.kafka_brokers,
            &config.message_topic,
            &config.consumer_group,
        )
        .context("failed to create Kafka consumer")?,
    );

    let encryption = Arc::new(EncryptionService::new(config.encryption_master_key));
    let cache = Arc::new(RedisCacheStore::new(redis_conn.clone()));
    let users = Arc::new(PostgresUserStore::new(db_pool.clone()));

    let retry = PublishRetryConfig {
        max_attempts: config.publish_max_attempts,
        base_delay: config.publish_base_delay,
        max_delay: config.publish_max_delay,
        ..Default::default()
    };
    let coordinator = Arc::new(DeliveryCoordinator::new(
        broker,
        cache.clone(),
        users,
        encryption.clone(),
        config.message_topic.clone(),
        retry,
        config.submit_timeout,
    ));

    // Inbound side: consume, dedup, deliver to receiver inboxes
    let callback = Arc::new(ReceiverInbox::new(redis_conn));
    let dispatcher = InboundDispatcher::new(
        source.clone(),
        source,
        callback,
        config.dedup_window_size,
    );
    tokio::spawn(async move {
        dispatcher.run().await;
        tracing::error!("inbound dispatcher exited");
    });

    let sweep_coordinator = Arc::clone(&coordinator);
    let retention = config.message_retention;
    tokio::spawn(async move {
        sweep_coordinator
            .run_retention_sweep(RETENTION_SWEEP_INTERVAL, retention)
            .await;
    });

    let state = AppState {
        coordinator,
        cache,
        encryption,
    };

    let port = config.port;
    tracing::info!(port, "HTTP server listening");
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure)
    })
    .bind(("0.0.0.0", port))
    .context("failed to bind HTTP server")?
    .run()
    .await
    .context("HTTP server failed")
}
