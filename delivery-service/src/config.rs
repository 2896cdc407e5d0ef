use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

use crate::error::DeliveryError;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub kafka_brokers: String,
    pub port: u16,
    pub message_topic: String,
    pub consumer_group: String,
    pub publish_max_attempts: u32,
    pub publish_base_delay: Duration,
    pub publish_max_delay: Duration,
    pub submit_timeout: Duration,
    pub dedup_window_size: usize,
    pub message_retention: Duration,
    pub encryption_master_key: [u8; 32],
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, DeliveryError> {
        dotenv().ok();
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| DeliveryError::Config("DATABASE_URL missing".into()))?;
        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let kafka_brokers = env::var("KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".into());
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);

        let message_topic = env::var("MESSAGE_TOPIC").unwrap_or_else(|_| "messages".into());
        let consumer_group =
            env::var("CONSUMER_GROUP").unwrap_or_else(|_| "message-group".into());

        let publish_max_attempts = env_u64("PUBLISH_MAX_ATTEMPTS", 5) as u32;
        let publish_base_delay = Duration::from_millis(env_u64("PUBLISH_BASE_DELAY_MS", 200));
        let publish_max_delay = Duration::from_millis(env_u64("PUBLISH_MAX_DELAY_MS", 5_000));
        let submit_timeout = Duration::from_millis(env_u64("SUBMIT_TIMEOUT_MS", 30_000));
        let dedup_window_size = env_u64("DEDUP_WINDOW_SIZE", 4_096) as usize;
        let message_retention = Duration::from_secs(env_u64("MESSAGE_RETENTION_SECS", 24 * 3600));

        let master_key_b64 = env::var("MESSAGE_ENCRYPTION_MASTER_KEY")
            .map_err(|_| DeliveryError::Config("MESSAGE_ENCRYPTION_MASTER_KEY missing".into()))?;
        let master_key_bytes = STANDARD.decode(master_key_b64.trim()).map_err(|_| {
            DeliveryError::Config("MESSAGE_ENCRYPTION_MASTER_KEY invalid base64".into())
        })?;
        if master_key_bytes.len() != 32 {
            return Err(DeliveryError::Config(
                "MESSAGE_ENCRYPTION_MASTER_KEY must decode to 32 bytes".into(),
            ));
        }
        let mut encryption_master_key = [0u8; 32];
        encryption_master_key.copy_from_slice(&master_key_bytes);

        if publish_max_attempts == 0 {
            return Err(DeliveryError::Config(
                "PUBLISH_MAX_ATTEMPTS must be at least 1".into(),
            ));
        }

        Ok(Self {
            database_url,
            redis_url,
            kafka_brokers,
            port,
            message_topic,
            consumer_group,
            publish_max_attempts,
            publish_base_delay,
            publish_max_delay,
            submit_timeout,
            dedup_window_size,
            message_retention,
            encryption_master_key,
        })
    }

    #[cfg(test)]
    pub fn test_defaults() -> Self {
        Self {
            database_url: "postgres://localhost/test".into(),
            redis_url: "redis://127.0.0.1:6379/0".into(),
            kafka_brokers: "localhost:9092".into(),
            port: 3000,
            message_topic: "messages".into(),
            consumer_group: "message-group".into(),
            publish_max_attempts: 5,
            publish_base_delay: Duration::from_millis(200),
            publish_max_delay: Duration::from_secs(5),
            submit_timeout: Duration::from_secs(30),
            dedup_window_size: 4_096,
            message_retention: Duration::from_secs(24 * 3600),
            encryption_master_key: [0u8; 32],
        }
    }
}
