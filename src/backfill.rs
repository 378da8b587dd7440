use crate::config::BackfillPolicy;
use crate::ingest::{draw, Measure, Sample};
use crate::store::SampleStore;
use anyhow::Result;
use rand::Rng;

pub const LOOKBACK_POINTS: i64 = 180;
pub const STEP_MS: i64 = 60_000;

/// One synthetic sample per minute for the last three hours on every raw channel, newest first.
/// Derived metrics are not generated.
pub fn generate<R: Rng + ?Sized>(now_ms: i64, rng: &mut R) -> Vec<Sample> {
    let mut samples = Vec::with_capacity((LOOKBACK_POINTS as usize) * Measure::RAW.len());
    for i in 0..LOOKBACK_POINTS {
        let ts = now_ms - i * STEP_MS;
        for measure in Measure::RAW {
            let Some(value) = draw(measure, rng) else {
                continue;
            };
            samples.push(Sample::new(measure, round_2(value), ts));
        }
    }
    samples
}

fn round_2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Applies `policy` and writes the synthetic history straight to the store. Returns the number
/// of samples written (0 when skipped).
pub async fn run<R: Rng + ?Sized>(
    store: &SampleStore,
    policy: BackfillPolicy,
    now_ms: i64,
    rng: &mut R,
) -> Result<u64> {
    match policy {
        BackfillPolicy::Off => {
            tracing::debug!("startup backfill disabled");
            return Ok(0);
        }
        BackfillPolicy::IfEmpty => {
            let window_start = now_ms - LOOKBACK_POINTS * STEP_MS;
            if store
                .has_samples_since(Measure::Temperature.as_str(), window_start)
                .await?
            {
                tracing::info!("history already present; skipping startup backfill");
                return Ok(0);
            }
        }
        BackfillPolicy::Always => {}
    }

    let samples = generate(now_ms, rng);
    let written = store.write_batch(&samples).await?;
    tracing::info!(
        written,
        channels = Measure::RAW.len(),
        backend = store.backend(),
        "generated synthetic history"
    );
    Ok(written)
}
