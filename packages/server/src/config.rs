use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

/// Deployment environment, from `NODE_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimeEnv {
    #[default]
    Development,
    Test,
    Production,
}

impl RuntimeEnv {
    fn parse(value: &str) -> Self {
        match value {
            "production" => RuntimeEnv::Production,
            "test" => RuntimeEnv::Test,
            _ => RuntimeEnv::Development,
        }
    }
}

/// Object store credentials; all four must be present to enable uploads.
#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Backing DSN for an out-of-process queue bus adapter. The in-process
    /// tier queues are used when unset.
    pub redis_url: Option<String>,
    pub object_store: Option<ObjectStoreConfig>,
    /// Hard wall-clock budget per job.
    pub job_timeout: Duration,
    /// In-process worker fan-out, clamped to 1..=4.
    pub worker_concurrency: usize,
    pub health_port: u16,
    pub env: RuntimeEnv,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let object_store = match (
            env::var("OBJECT_STORE_ENDPOINT").ok(),
            env::var("OBJECT_STORE_ACCESS").ok(),
            env::var("OBJECT_STORE_SECRET").ok(),
            env::var("OBJECT_STORE_BUCKET").ok(),
        ) {
            (Some(endpoint), Some(access_key), Some(secret_key), Some(bucket)) => {
                Some(ObjectStoreConfig {
                    endpoint,
                    access_key,
                    secret_key,
                    bucket,
                })
            }
            _ => None,
        };

        let job_timeout_ms: u64 = env::var("JOB_TIMEOUT_MS")
            .unwrap_or_else(|_| "1800000".to_string())
            .parse()
            .context("JOB_TIMEOUT_MS must be a valid number of milliseconds")?;

        let worker_concurrency: usize = env::var("WORKER_CONCURRENCY")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .context("WORKER_CONCURRENCY must be a valid number")?;

        Ok(Self {
            redis_url: env::var("REDIS_URL").ok(),
            object_store,
            job_timeout: Duration::from_millis(job_timeout_ms),
            worker_concurrency: worker_concurrency.clamp(1, 4),
            health_port: env::var("HEALTH_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("HEALTH_PORT must be a valid port number")?,
            env: RuntimeEnv::parse(&env::var("NODE_ENV").unwrap_or_default()),
        })
    }
}
