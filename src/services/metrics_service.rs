use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::store::KvStore;
use crate::utils::error::ApiError;

const KEY_ACTIVE_SESSIONS: &str = "metrics:active_sessions";
const KEY_TOTAL_MESSAGES: &str = "metrics:total_messages";
const KEY_SUCCESSFUL_MESSAGES: &str = "metrics:successful_messages";
const KEY_FAILED_MESSAGES: &str = "metrics:failed_messages";
const KEY_RESPONSE_TIMES: &str = "metrics:response_times";

/// Sliding window of latency samples kept for averaging.
pub const RESPONSE_TIME_WINDOW: usize = 100;

/// Point-in-time view combining the independent counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub active_sessions: i64,
    pub total_messages: i64,
    pub avg_response_time_ms: f64,
    /// Failed messages as a percentage of total, 0 when nothing was recorded.
    pub error_rate: f64,
    pub uptime_seconds: u64,
}

/// Aggregates usage counters and recent response times in the store.
pub struct MetricsService {
    store: Arc<dyn KvStore>,
    /// Uptime origin; `reset` moves it to now.
    started_at: Mutex<Instant>,
}

impl MetricsService {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            started_at: Mutex::new(Instant::now()),
        }
    }

    async fn counter(&self, key: &str) -> Result<i64, ApiError> {
        let raw = self.store.get(key).await?;
        Ok(raw.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    pub async fn increment_active_sessions(&self) -> Result<(), ApiError> {
        self.store.incr(KEY_ACTIVE_SESSIONS).await?;
        Ok(())
    }

    /// Clamped at zero by the store contract.
    pub async fn decrement_active_sessions(&self) -> Result<(), ApiError> {
        self.store.decr(KEY_ACTIVE_SESSIONS).await?;
        Ok(())
    }

    /// Record one completed message-processing attempt: bump `total` plus
    /// exactly one of success/failed, and push the latency sample into the
    /// bounded window.
    pub async fn record_message(
        &self,
        response_time_ms: f64,
        success: bool,
    ) -> Result<(), ApiError> {
        self.store.incr(KEY_TOTAL_MESSAGES).await?;
        if success {
            self.store.incr(KEY_SUCCESSFUL_MESSAGES).await?;
        } else {
            self.store.incr(KEY_FAILED_MESSAGES).await?;
        }

        let mut times: Vec<f64> = match self.store.get(KEY_RESPONSE_TIMES).await? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            None => Vec::new(),
        };
        times.push(response_time_ms);
        if times.len() > RESPONSE_TIME_WINDOW {
            let excess = times.len() - RESPONSE_TIME_WINDOW;
            times.drain(..excess);
        }

        let payload = serde_json::to_string(&times)
            .map_err(|e| ApiError::InternalError(format!("failed to serialize samples: {e}")))?;
        self.store.set(KEY_RESPONSE_TIMES, &payload).await?;

        debug!(
            "Recorded message: {:.1}ms, success={}, window={}",
            response_time_ms,
            success,
            times.len()
        );
        Ok(())
    }

    /// Combine the counters into a snapshot. Zero-valued fields when no
    /// data has been recorded yet.
    pub async fn snapshot(&self) -> Result<MetricsSnapshot, ApiError> {
        let active_sessions = self.counter(KEY_ACTIVE_SESSIONS).await?.max(0);
        let total_messages = self.counter(KEY_TOTAL_MESSAGES).await?;
        let failed_messages = self.counter(KEY_FAILED_MESSAGES).await?;

        let avg_response_time_ms = match self.store.get(KEY_RESPONSE_TIMES).await? {
            Some(raw) => {
                let times: Vec<f64> = serde_json::from_str(&raw).unwrap_or_default();
                if times.is_empty() {
                    0.0
                } else {
                    let avg = times.iter().sum::<f64>() / times.len() as f64;
                    (avg * 100.0).round() / 100.0
                }
            }
            None => 0.0,
        };

        let error_rate = if total_messages > 0 {
            let rate = failed_messages as f64 / total_messages as f64 * 100.0;
            (rate * 10.0).round() / 10.0
        } else {
            0.0
        };

        Ok(MetricsSnapshot {
            active_sessions,
            total_messages,
            avg_response_time_ms,
            error_rate,
            uptime_seconds: self.started_at.lock().elapsed().as_secs(),
        })
    }

    /// Clear every metric key and restart the uptime clock. Admin/test use.
    pub async fn reset(&self) -> Result<(), ApiError> {
        for key in [
            KEY_ACTIVE_SESSIONS,
            KEY_TOTAL_MESSAGES,
            KEY_SUCCESSFUL_MESSAGES,
            KEY_FAILED_MESSAGES,
            KEY_RESPONSE_TIMES,
        ] {
            self.store.delete(key).await?;
        }
        *self.started_at.lock() = Instant::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn service() -> MetricsService {
        MetricsService::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_empty_snapshot_is_all_zero() {
        let metrics = service();
        let snapshot = metrics.snapshot().await.unwrap();

        assert_eq!(snapshot.active_sessions, 0);
        assert_eq!(snapshot.total_messages, 0);
        assert_eq!(snapshot.avg_response_time_ms, 0.0);
        assert_eq!(snapshot.error_rate, 0.0);
    }

    #[tokio::test]
    async fn test_error_rate_arithmetic() {
        let metrics = service();

        for _ in 0..3 {
            metrics.record_message(100.0, true).await.unwrap();
        }
        metrics.record_message(100.0, false).await.unwrap();

        let snapshot = metrics.snapshot().await.unwrap();
        assert_eq!(snapshot.total_messages, 4);
        assert_eq!(snapshot.error_rate, 25.0);
    }

    #[tokio::test]
    async fn test_window_keeps_last_100_samples() {
        let metrics = service();

        // 101 samples with latencies 0..=100; the window drops the first.
        for i in 0..=100 {
            metrics.record_message(i as f64, true).await.unwrap();
        }

        let snapshot = metrics.snapshot().await.unwrap();
        // mean of 1..=100
        assert_eq!(snapshot.avg_response_time_ms, 50.5);
    }

    #[tokio::test]
    async fn test_active_sessions_never_go_negative() {
        let metrics = service();

        metrics.decrement_active_sessions().await.unwrap();
        let snapshot = metrics.snapshot().await.unwrap();
        assert_eq!(snapshot.active_sessions, 0);

        metrics.increment_active_sessions().await.unwrap();
        metrics.increment_active_sessions().await.unwrap();
        metrics.decrement_active_sessions().await.unwrap();
        let snapshot = metrics.snapshot().await.unwrap();
        assert_eq!(snapshot.active_sessions, 1);
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let metrics = service();

        metrics.increment_active_sessions().await.unwrap();
        metrics.record_message(250.0, false).await.unwrap();
        metrics.reset().await.unwrap();

        let snapshot = metrics.snapshot().await.unwrap();
        assert_eq!(snapshot.active_sessions, 0);
        assert_eq!(snapshot.total_messages, 0);
        assert_eq!(snapshot.avg_response_time_ms, 0.0);
        assert_eq!(snapshot.error_rate, 0.0);
    }
}
