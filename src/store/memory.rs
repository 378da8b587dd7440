use super::{HistoryQuery, StoredBucket};
use crate::ingest::Sample;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// In-process store used when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    series: RwLock<HashMap<String, BTreeMap<i64, Vec<f64>>>>,
}

impl MemoryStore {
    pub fn write_batch(&self, samples: &[Sample]) -> u64 {
        let mut series = self.series.write().unwrap_or_else(|e| e.into_inner());
        for sample in samples {
            series
                .entry(sample.measure.as_str().to_string())
                .or_default()
                .entry(sample.timestamp_ms)
                .or_default()
                .push(sample.value);
        }
        samples.len() as u64
    }

    pub fn read(&self, query: &HistoryQuery) -> Vec<StoredBucket> {
        let series = self.series.read().unwrap_or_else(|e| e.into_inner());
        let Some(points) = series.get(&query.measure) else {
            return Vec::new();
        };

        let mut buckets: BTreeMap<i64, (f64, u64)> = BTreeMap::new();
        for (ts, values) in points.range(query.start_ms..) {
            let bucket = ts.div_euclid(query.window_ms) * query.window_ms;
            let entry = buckets.entry(bucket).or_insert((0.0, 0));
            for value in values {
                entry.0 += value;
                entry.1 += 1;
            }
        }

        buckets
            .into_iter()
            .take(query.limit)
            .enumerate()
            .map(|(idx, (timestamp_ms, (sum, count)))| StoredBucket {
                id: idx as i64 + 1,
                timestamp_ms,
                value: sum / count as f64,
            })
            .collect()
    }

    pub fn has_samples_since(&self, measure: &str, start_ms: i64) -> bool {
        let series = self.series.read().unwrap_or_else(|e| e.into_inner());
        series
            .get(measure)
            .map(|points| points.range(start_ms..).next().is_some())
            .unwrap_or(false)
    }

    /// Raw samples for one measure in timestamp order; duplicates are kept.
    #[cfg(test)]
    pub fn samples(&self, measure: &str) -> Vec<(i64, f64)> {
        let series = self.series.read().unwrap_or_else(|e| e.into_inner());
        series
            .get(measure)
            .map(|points| {
                points
                    .iter()
                    .flat_map(|(ts, values)| values.iter().map(move |v| (*ts, *v)))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        let series = self.series.read().unwrap_or_else(|e| e.into_inner());
        series
            .values()
            .flat_map(|points| points.values())
            .map(Vec::len)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Measure;

    fn query(measure: &str, start_ms: i64, window_ms: i64, limit: usize) -> HistoryQuery {
        HistoryQuery {
            measure: measure.to_string(),
            start_ms,
            window_ms,
            limit,
        }
    }

    #[test]
    fn read_averages_each_window_in_ascending_order() {
        let store = MemoryStore::default();
        store.write_batch(&[
            Sample::new(Measure::Temperature, 30.0, 125_000),
            Sample::new(Measure::Temperature, 10.0, 60_000),
            Sample::new(Measure::Temperature, 20.0, 119_999),
            Sample::new(Measure::Temperature, 40.0, 120_000),
        ]);

        let rows = store.read(&query("temperature", 0, 60_000, 10));
        assert_eq!(
            rows,
            vec![
                StoredBucket { id: 1, timestamp_ms: 60_000, value: 15.0 },
                StoredBucket { id: 2, timestamp_ms: 120_000, value: 35.0 },
            ]
        );
    }

    #[test]
    fn read_respects_start_and_limit() {
        let store = MemoryStore::default();
        let samples: Vec<Sample> = (0..10)
            .map(|i| Sample::new(Measure::Humidity, i as f64, i * 60_000))
            .collect();
        store.write_batch(&samples);

        let rows = store.read(&query("humidity", 3 * 60_000, 60_000, 4));
        let stamps: Vec<i64> = rows.iter().map(|r| r.timestamp_ms).collect();
        assert_eq!(stamps, vec![180_000, 240_000, 300_000, 360_000]);
    }

    #[test]
    fn duplicate_timestamps_are_kept() {
        let store = MemoryStore::default();
        store.write_batch(&[
            Sample::new(Measure::Lux, 100.0, 5_000),
            Sample::new(Measure::Lux, 300.0, 5_000),
        ]);
        assert_eq!(store.samples("lux"), vec![(5_000, 100.0), (5_000, 300.0)]);
        assert_eq!(store.read(&query("lux", 0, 60_000, 10))[0].value, 200.0);
    }

    #[test]
    fn unknown_measure_reads_empty() {
        let store = MemoryStore::default();
        assert!(store.read(&query("wind_speed", 0, 60_000, 10)).is_empty());
        assert!(!store.has_samples_since("wind_speed", 0));
    }
}
