mod backfill;
mod config;
mod error;
mod history;
mod http;
mod ingest;
mod live;
mod mqtt;
mod pipeline;
mod store;
mod telemetry;

use crate::config::Config;
use crate::history::HistoryService;
use crate::http::HttpState;
use crate::ingest::SensorIngestor;
use crate::live::LiveFeed;
use crate::pipeline::IngestStats;
use crate::store::SampleStore;
use anyhow::{Context, Result};
use chrono::Utc;
use futures::future;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

fn init_tracing(config: &Config) -> Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as OTelTraceConfig, Resource};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,weather_station=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    if let Some(endpoint) = &config.otlp_endpoint {
        let endpoint = normalize_otlp_http_endpoint(endpoint);
        let exporter = opentelemetry_otlp::new_exporter()
            .http()
            .with_endpoint(endpoint);
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(OTelTraceConfig::default().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "weather-station"),
            ])))
            .install_batch(Tokio)?;

        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

fn normalize_otlp_http_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.contains("/v1/traces") {
        return trimmed.to_string();
    }
    format!("{}/v1/traces", trimmed.trim_end_matches('/'))
}

async fn build_store(config: &Config) -> Result<SampleStore> {
    match &config.database_url {
        Some(url) => SampleStore::connect(url, config.db_pool_size)
            .await
            .context("failed to connect to sample database"),
        None => {
            tracing::warn!("no database configured; samples are kept in memory only");
            Ok(SampleStore::memory())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config)?;

    let store = build_store(&config).await?;
    let mut backfill_rng = StdRng::from_entropy();
    if let Err(err) = backfill::run(
        &store,
        config.backfill,
        Utc::now().timestamp_millis(),
        &mut backfill_rng,
    )
    .await
    {
        tracing::warn!(error=%err, "startup backfill failed");
    }

    let stats = Arc::new(IngestStats::new());
    let (pipeline, _worker_handle) = pipeline::start(
        store.clone(),
        stats,
        config.max_queue,
        config.batch_size,
        config.flush_interval(),
    );
    let live = LiveFeed::new(config.live_capacity);
    let ingestor = SensorIngestor::new(pipeline.clone(), live, config.substitute_placeholders);

    let mqtt_handle = if config.enable_mqtt_listener {
        let config_clone = config.clone();
        let ingestor_clone = ingestor.clone();
        Some(tokio::spawn(async move {
            mqtt::run_listener(config_clone, ingestor_clone).await
        }))
    } else {
        None
    };

    let state = HttpState {
        ingestor: ingestor.clone(),
        history: HistoryService::new(store.clone(), config.query_limit),
        backend: store.backend(),
    };
    let listener = tokio::net::TcpListener::bind(&config.http_bind)
        .await
        .with_context(|| format!("failed to bind {}", config.http_bind))?;
    tracing::info!(bind=%config.http_bind, store = store.backend(), "weather station listening");
    let http_handle = tokio::spawn(async move { axum::serve(listener, http::router(state)).await });

    tokio::select! {
        res = http_handle => {
            match res {
                Ok(Err(err)) => tracing::error!(error=%err, "HTTP server exited"),
                Err(err) => tracing::error!(error=%err, "HTTP task failed"),
                Ok(Ok(())) => {}
            }
        }
        _ = async {
            if let Some(handle) = mqtt_handle {
                match handle.await {
                    Ok(Err(err)) => tracing::warn!(error=%err, "MQTT listener exited"),
                    Err(err) => tracing::warn!(error=%err, "MQTT task failed"),
                    Ok(Ok(())) => {}
                }
            } else {
                future::pending::<()>().await;
            }
        } => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    if let Err(err) = ingestor.flush().await {
        tracing::warn!(error=%err, "final flush failed");
    }
    drop(pipeline);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::normalize_otlp_http_endpoint;

    #[test]
    fn otlp_endpoint_gets_traces_path() {
        assert_eq!(
            normalize_otlp_http_endpoint("http://collector:4318/"),
            "http://collector:4318/v1/traces"
        );
        assert_eq!(
            normalize_otlp_http_endpoint("http://collector:4318/v1/traces"),
            "http://collector:4318/v1/traces"
        );
        assert_eq!(normalize_otlp_http_endpoint("  "), "");
    }
}
