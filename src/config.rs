use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// When the startup backfill generator is allowed to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackfillPolicy {
    Off,
    IfEmpty,
    Always,
}

impl FromStr for BackfillPolicy {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "off" | "false" | "0" | "never" => Ok(Self::Off),
            "if_empty" | "if-empty" | "empty" => Ok(Self::IfEmpty),
            "always" | "true" | "1" => Ok(Self::Always),
            other => Err(anyhow!("unknown backfill policy {other:?}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: Option<String>,
    pub db_pool_size: u32,
    pub http_bind: String,
    pub enable_mqtt_listener: bool,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_topic_prefix: String,
    pub mqtt_keepalive_secs: u64,
    pub mqtt_client_id: String,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub max_queue: usize,
    pub live_capacity: usize,
    pub query_limit: usize,
    pub backfill: BackfillPolicy,
    pub substitute_placeholders: bool,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let database_url = env_optional("WEATHER_DATABASE_URL")
            .or_else(|| env_optional("DATABASE_URL"))
            .map(normalize_database_url);
        let db_pool_size = env_parse("WEATHER_DB_POOL_SIZE", 5u32)?;
        let http_bind = env_optional("WEATHER_HTTP_BIND").unwrap_or_else(|| "0.0.0.0:7000".to_string());

        let enable_mqtt_listener = env_optional("WEATHER_ENABLE_MQTT")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let mqtt_host = env_optional("WEATHER_MQTT_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let mqtt_port = env_parse("WEATHER_MQTT_PORT", 1883u16)?;
        let mqtt_username = env_optional("WEATHER_MQTT_USERNAME");
        let mqtt_password = env_optional("WEATHER_MQTT_PASSWORD");
        let mqtt_topic_prefix =
            env_optional("WEATHER_MQTT_TOPIC_PREFIX").unwrap_or_else(|| "weather".to_string());
        let mqtt_keepalive_secs = env_parse("WEATHER_MQTT_KEEPALIVE_SECS", 30u64)?;
        let mqtt_client_id = env_optional("WEATHER_MQTT_CLIENT_ID")
            .unwrap_or_else(|| format!("weather-station-{}", std::process::id()));

        let batch_size = env_parse("WEATHER_BATCH_SIZE", 200usize)?.max(1);
        let flush_interval_ms = env_parse("WEATHER_FLUSH_INTERVAL_MS", 500u64)?.max(1);
        let max_queue = env_parse("WEATHER_MAX_QUEUE", batch_size.saturating_mul(10))?.max(1);
        let live_capacity = env_parse("WEATHER_LIVE_CAPACITY", 256usize)?.max(1);
        let query_limit = env_parse("WEATHER_QUERY_LIMIT", 180usize)?.max(1);

        let backfill = match env_optional("WEATHER_BACKFILL") {
            Some(raw) => raw.parse::<BackfillPolicy>().context("invalid WEATHER_BACKFILL")?,
            None => BackfillPolicy::IfEmpty,
        };
        let substitute_placeholders = env_optional("WEATHER_SUBSTITUTE_PLACEHOLDERS")
            .map(|v| !(v == "0" || v.eq_ignore_ascii_case("false")))
            .unwrap_or(true);
        let otlp_endpoint = env_optional("OTEL_EXPORTER_OTLP_ENDPOINT");

        Ok(Self {
            database_url,
            db_pool_size,
            http_bind,
            enable_mqtt_listener,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_topic_prefix,
            mqtt_keepalive_secs,
            mqtt_client_id,
            batch_size,
            flush_interval_ms,
            max_queue,
            live_capacity,
            query_limit,
            backfill,
            substitute_placeholders,
            otlp_endpoint,
        })
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn mqtt_keepalive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keepalive_secs)
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_optional(key) {
        Some(raw) => raw.parse::<T>().with_context(|| format!("invalid {key}")),
        None => Ok(default),
    }
}

fn normalize_database_url(url: String) -> String {
    if let Some(stripped) = url.strip_prefix("postgresql+psycopg://") {
        return format!("postgresql://{stripped}");
    }
    if let Some(stripped) = url.strip_prefix("postgresql+asyncpg://") {
        return format!("postgresql://{stripped}");
    }
    url
}
