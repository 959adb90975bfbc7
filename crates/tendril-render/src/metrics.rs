//! Aggregate render counters

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderMetrics {
    /// Renderer invocations, successful or not.
    pub render_count: u64,
    pub total_render_ms: u64,
    pub average_render_ms: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hit_rate: f64,
    pub timeouts: u64,
    pub errors: u64,
}

impl RenderMetrics {
    pub(crate) fn record_hit(&mut self) {
        self.cache_hits += 1;
        self.refresh();
    }

    pub(crate) fn record_miss(&mut self) {
        self.cache_misses += 1;
        self.refresh();
    }

    pub(crate) fn record_render(&mut self, elapsed_ms: u64) {
        self.render_count += 1;
        self.total_render_ms += elapsed_ms;
        self.refresh();
    }

    pub(crate) fn record_timeout(&mut self) {
        self.timeouts += 1;
    }

    pub(crate) fn record_error(&mut self) {
        self.errors += 1;
    }

    fn refresh(&mut self) {
        self.average_render_ms = if self.render_count == 0 {
            0.0
        } else {
            self.total_render_ms as f64 / self.render_count as f64
        };
        let lookups = self.cache_hits + self.cache_misses;
        self.hit_rate = if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        };
    }
}
