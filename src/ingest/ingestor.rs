use super::derived::DerivedMetrics;
use super::sanitize::sanitize;
use super::types::{Measure, RawReading, Sample};
use super::SensorIngestor;
use crate::live::LiveFeed;
use crate::pipeline::{IngestStats, PipelineHandle};
use anyhow::Result;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

impl SensorIngestor {
    pub fn new(pipeline: PipelineHandle, live: LiveFeed, substitute_placeholders: bool) -> Self {
        Self::with_rng(
            pipeline,
            live,
            substitute_placeholders,
            StdRng::from_entropy(),
        )
    }

    pub fn with_rng(
        pipeline: PipelineHandle,
        live: LiveFeed,
        substitute_placeholders: bool,
        rng: StdRng,
    ) -> Self {
        Self {
            pipeline,
            live,
            rng: Arc::new(Mutex::new(rng)),
            substitute_placeholders,
        }
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.pipeline.stats()
    }

    pub fn live(&self) -> &LiveFeed {
        &self.live
    }

    pub async fn flush(&self) -> Result<()> {
        self.pipeline.flush().await
    }

    /// Handles one reading batch stamped with the current time.
    pub fn record(&self, reading: RawReading) -> Vec<Sample> {
        self.record_at(reading, Utc::now().timestamp_millis())
    }

    /// Handles one reading batch. Every emitted sample, raw and derived, carries `timestamp_ms`.
    ///
    /// Returns the emitted samples; a rejected batch returns nothing and has no side effects.
    pub fn record_at(&self, mut reading: RawReading, timestamp_ms: i64) -> Vec<Sample> {
        let stats = self.pipeline.stats();
        let (Some(celsius), Some(humidity)) = (reading.celsius, reading.humidity) else {
            stats.rejected_batches.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                celsius = ?reading.celsius,
                humidity = ?reading.humidity,
                "received invalid sensor samples"
            );
            return Vec::new();
        };

        if self.substitute_placeholders {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            sanitize(&mut reading, &mut *rng);
        }

        let mut raw = vec![
            Sample::new(Measure::Temperature, celsius, timestamp_ms),
            Sample::new(Measure::Humidity, humidity, timestamp_ms),
        ];
        raw.extend(
            reading
                .optional_channels()
                .into_iter()
                .filter_map(|(measure, value)| value.map(|v| Sample::new(measure, v, timestamp_ms))),
        );
        for sample in &raw {
            self.pipeline.enqueue(*sample);
        }

        let derived = DerivedMetrics::compute(celsius, humidity).samples(timestamp_ms);
        for sample in &derived {
            self.pipeline.enqueue(*sample);
            self.live.publish_sample(sample);
        }

        for sample in &raw {
            self.live.publish_sample(sample);
        }

        stats.accepted_batches.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            ts = timestamp_ms,
            raw = raw.len(),
            derived = derived.len(),
            "recorded sensor samples"
        );

        raw.extend(derived);
        raw
    }
}
