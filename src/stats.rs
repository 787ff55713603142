//! Per-cycle refresh statistics.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::base::RefreshType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshStats {
    pub refresh_type: RefreshType,
    /// Tickers attempted
    pub total: usize,
    /// Observations appended
    pub success: usize,
    /// Tickers with no price this cycle
    pub failed: usize,
    /// Whether the archive write succeeded
    pub persisted: bool,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl RefreshStats {
    pub fn new(refresh_type: RefreshType) -> Self {
        RefreshStats {
            refresh_type,
            total: 0,
            success: 0,
            failed: 0,
            persisted: false,
            elapsed: Duration::ZERO,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.success as f64 / self.total as f64) * 100.0
        }
    }

    pub fn log_summary(&self) {
        tracing::info!(
            refresh_type = %self.refresh_type,
            total = self.total,
            success = self.success,
            failed = self.failed,
            persisted = self.persisted,
            success_rate = format!("{:.1}%", self.success_rate()),
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "Refresh complete"
        );
    }
}
