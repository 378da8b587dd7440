mod derived;
mod ingestor;
mod sanitize;
mod types;


#[cfg(test)]
pub use sanitize::channel_range;
pub use sanitize::draw;
pub use types::{Measure, RawReading, Sample};

use crate::live::LiveFeed;
use crate::pipeline::PipelineHandle;
use rand::rngs::StdRng;
use std::sync::{Arc, Mutex};

/// Synchronous ingestion handler shared by every device transport.
#[derive(Clone)]
pub struct SensorIngestor {
    pipeline: PipelineHandle,
    live: LiveFeed,
    rng: Arc<Mutex<StdRng>>,
    substitute_placeholders: bool,
}
