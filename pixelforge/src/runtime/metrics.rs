//! Renderer-wide counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Snapshot of renderer activity. Counters never reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RenderMetrics {
    pub renders_total: u64,
    pub render_errors: u64,
    pub builds_total: u64,
    pub cache_hits: u64,
    pub last_render_ms: u64,
}

/// Lock-free storage behind [`RenderMetrics`].
#[derive(Debug, Default)]
pub(crate) struct RenderMetricsStorage {
    renders_total: AtomicU64,
    render_errors: AtomicU64,
    builds_total: AtomicU64,
    cache_hits: AtomicU64,
    last_render_ms: AtomicU64,
}

impl RenderMetricsStorage {
    pub(crate) fn record_build(&self, rebuilt: bool) {
        if rebuilt {
            self.builds_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_render(&self, is_error: bool, elapsed_ms: u64) {
        self.renders_total.fetch_add(1, Ordering::Relaxed);
        if is_error {
            self.render_errors.fetch_add(1, Ordering::Relaxed);
        } else {
            self.last_render_ms.store(elapsed_ms, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> RenderMetrics {
        RenderMetrics {
            renders_total: self.renders_total.load(Ordering::Relaxed),
            render_errors: self.render_errors.load(Ordering::Relaxed),
            builds_total: self.builds_total.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            last_render_ms: self.last_render_ms.load(Ordering::Relaxed),
        }
    }
}

/// Whole milliseconds in `elapsed`, saturating at `u64::MAX`.
pub(crate) fn saturating_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
