//! Session metrics.
//!
//! Each attempted session produces exactly one `Metric` registration:
//! completed sessions register their counts, skipped sessions register
//! `None`. Cumulative counters back the Prometheus text exposition served
//! by the metrics endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one update session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Metric {
    pub scanned: u64,
    pub updated: u64,
    pub failed: u64,
}

/// Process-wide cumulative counters.
#[derive(Default)]
pub struct MetricsRegistry {
    scans: AtomicU64,
    skipped: AtomicU64,
    scanned: AtomicU64,
    updated: AtomicU64,
    failed: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one session attempt. `None` means the attempt was skipped
    /// because another session held the update lock.
    pub fn register(&self, metric: Option<&Metric>) {
        self.scans.fetch_add(1, Ordering::Relaxed);
        match metric {
            Some(m) => {
                self.scanned.fetch_add(m.scanned, Ordering::Relaxed);
                self.updated.fetch_add(m.updated, Ordering::Relaxed);
                self.failed.fetch_add(m.failed, Ordering::Relaxed);
            }
            None => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn skipped_scans(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Render the counters in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let counters = [
            (
                "vigil_scans_total",
                "Total number of update sessions attempted",
                self.scans.load(Ordering::Relaxed),
            ),
            (
                "vigil_scans_skipped_total",
                "Sessions skipped because an update was already running",
                self.skipped.load(Ordering::Relaxed),
            ),
            (
                "vigil_containers_scanned_total",
                "Containers scanned across all sessions",
                self.scanned.load(Ordering::Relaxed),
            ),
            (
                "vigil_containers_updated_total",
                "Containers updated across all sessions",
                self.updated.load(Ordering::Relaxed),
            ),
            (
                "vigil_containers_failed_total",
                "Containers that failed to update across all sessions",
                self.failed.load(Ordering::Relaxed),
            ),
        ];
        for (name, help, value) in counters {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skipped_sessions_count_as_scans() {
        let registry = MetricsRegistry::new();
        registry.register(Some(&Metric {
            scanned: 3,
            updated: 1,
            failed: 0,
        }));
        registry.register(None);

        assert_eq!(registry.skipped_scans(), 1);
        let text = registry.render();
        assert!(text.contains("vigil_scans_total 2"));
        assert!(text.contains("vigil_scans_skipped_total 1"));
        assert!(text.contains("vigil_containers_scanned_total 3"));
        assert!(text.contains("vigil_containers_updated_total 1"));
    }

    #[test]
    fn render_is_valid_exposition() {
        let registry = MetricsRegistry::new();
        registry.register(None);
        for line in registry.render().lines() {
            assert!(line.starts_with("# HELP") || line.starts_with("# TYPE") || {
                let mut parts = line.split(' ');
                parts.next().map(|n| n.starts_with("vigil_")).unwrap_or(false)
                    && parts.next().map(|v| v.parse::<u64>().is_ok()).unwrap_or(false)
            });
        }
    }
}
