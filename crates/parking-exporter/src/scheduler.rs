//! Wall-clock aligned scheduling of refresh cycles.

use chrono::{DateTime, Utc};

use std::{
    fmt,
    future::{self, Future},
    pin::Pin,
    sync::Arc,
    time::Duration,
};

use crate::{config::ConfigError, refresh::Refresher, upstream::RecordSource};

/// Recurring wall-clock schedule: ticks happen each `interval` with the specified `offset`
/// after the interval boundary (counted from the Unix epoch, i.e., in UTC).
///
/// For example, the [default](Self::default()) schedule ticks at `00:00:15`, `00:05:15`, `00:10:15`, etc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    interval: Duration,
    offset: Duration,
}

/// Every 5 minutes, 15 seconds past the mark. The offset accounts for update delays
/// on the open data platform.
impl Default for Schedule {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            offset: Duration::from_secs(15),
        }
    }
}

impl Schedule {
    /// Creates a schedule with the specified parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if `interval` is shorter than 1ms, or if `offset` is not less than `interval`.
    pub fn new(interval: Duration, offset: Duration) -> Result<Self, ConfigError> {
        if interval < Duration::from_millis(1) {
            return Err(ConfigError::Schedule("refresh interval must be at least 1ms"));
        }
        if offset >= interval {
            return Err(ConfigError::Schedule(
                "schedule offset must be less than the refresh interval",
            ));
        }
        Ok(Self { interval, offset })
    }

    /// Returns the interval between ticks.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the offset of ticks relative to interval boundaries.
    pub fn offset(&self) -> Duration {
        self.offset
    }

    /// Returns the first tick strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let interval = i64::try_from(self.interval.as_millis()).unwrap_or(i64::MAX);
        let offset = i64::try_from(self.offset.as_millis()).unwrap_or(0);

        let shifted = now.timestamp_millis() - offset;
        let next = shifted
            .div_euclid(interval)
            .checked_add(1)
            .and_then(|ticks| ticks.checked_mul(interval))
            .and_then(|millis| millis.checked_add(offset))
            .and_then(DateTime::from_timestamp_millis);
        // Overflow is only possible for absurdly long intervals.
        next.unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Returns the delay from `now` until the next tick.
    pub fn delay_after(&self, now: DateTime<Utc>) -> Duration {
        (self.next_after(now) - now).to_std().unwrap_or_default()
    }
}

/// Task running refresh cycles according to a [`Schedule`].
///
/// Cycles run sequentially. If a cycle takes longer than the interval, the ticks that passed
/// while it was running are skipped. Failed cycles do not influence subsequent ones.
pub struct RefreshScheduler<'a, S> {
    refresher: Arc<Refresher<S>>,
    schedule: Schedule,
    run_on_start: bool,
    shutdown_future: Pin<Box<dyn Future<Output = ()> + Send + 'a>>,
}

impl<S> fmt::Debug for RefreshScheduler<'_, S> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RefreshScheduler")
            .field("refresher", &self.refresher)
            .field("schedule", &self.schedule)
            .field("run_on_start", &self.run_on_start)
            .finish_non_exhaustive()
    }
}

impl<'a, S: RecordSource> RefreshScheduler<'a, S> {
    /// Creates a scheduler for the specified refresher. By default, the scheduler runs a cycle
    /// immediately on start and never stops.
    pub fn new(refresher: Arc<Refresher<S>>, schedule: Schedule) -> Self {
        Self {
            refresher,
            schedule,
            run_on_start: true,
            shutdown_future: Box::pin(future::pending()),
        }
    }

    /// Sets whether a cycle should run immediately on start, in addition to scheduled ones.
    #[must_use]
    pub fn with_run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }

    /// Configures graceful shutdown for the scheduler. Once `shutdown` resolves, the scheduler
    /// finishes the current cycle (if any) and stops.
    #[must_use]
    pub fn with_graceful_shutdown<F>(mut self, shutdown: F) -> Self
    where
        F: Future<Output = ()> + Send + 'a,
    {
        self.shutdown_future = Box::pin(shutdown);
        self
    }

    /// Runs the scheduler. Resolves once the scheduler is shut down.
    pub async fn run(mut self) {
        tracing::info!(
            interval = ?self.schedule.interval,
            offset = ?self.schedule.offset,
            "Enabled scheduled fetching of parking data"
        );

        if self.run_on_start {
            self.refresher.refresh().await.ok();
        }

        loop {
            let now = Utc::now();
            let next_tick = self.schedule.next_after(now);
            let delay = (next_tick - now).to_std().unwrap_or_default();
            tracing::debug!(%next_tick, ?delay, "Waiting for the next refresh cycle");

            tokio::select! {
                () = &mut self.shutdown_future => break,
                () = tokio::time::sleep(delay) => {}
            }
            // Errors are logged by the refresher; the next cycle runs regardless.
            self.refresher.refresh().await.ok();
        }
        tracing::info!("Stop signal received, refresh scheduler is shutting down");
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tokio::sync::watch;

    use super::*;
    use crate::{testonly::MockUpstream, upstream::UpstreamClient};
    use parking_metrics::MetricStore;

    fn datetime(raw: &str) -> DateTime<Utc> {
        raw.parse().unwrap()
    }

    #[test]
    fn default_schedule_ticks() {
        let schedule = Schedule::default();
        let cases = [
            ("2024-03-01T10:00:00Z", "2024-03-01T10:00:15Z"),
            ("2024-03-01T10:00:14.999Z", "2024-03-01T10:00:15Z"),
            ("2024-03-01T10:00:15Z", "2024-03-01T10:05:15Z"),
            ("2024-03-01T10:03:00Z", "2024-03-01T10:05:15Z"),
            ("2024-03-01T10:05:15.001Z", "2024-03-01T10:10:15Z"),
            ("2024-03-01T23:59:59Z", "2024-03-02T00:00:15Z"),
        ];
        for (now, expected) in cases {
            assert_eq!(
                schedule.next_after(datetime(now)),
                datetime(expected),
                "now = {now}"
            );
        }
    }

    #[test]
    fn delay_until_next_tick() {
        let schedule = Schedule::default();
        let delay = schedule.delay_after(datetime("2024-03-01T10:04:15Z"));
        assert_eq!(delay, Duration::from_secs(60));
    }

    #[test]
    fn custom_schedule_ticks() {
        let schedule = Schedule::new(Duration::from_secs(60), Duration::ZERO).unwrap();
        assert_eq!(
            schedule.next_after(datetime("2024-03-01T10:00:00Z")),
            datetime("2024-03-01T10:01:00Z")
        );
        assert_eq!(
            schedule.next_after(datetime("1969-12-31T23:59:30Z")),
            datetime("1970-01-01T00:00:00Z")
        );
    }

    #[test]
    fn invalid_schedules() {
        let err = Schedule::new(Duration::ZERO, Duration::ZERO).unwrap_err();
        assert_matches!(err, ConfigError::Schedule(_));
        let err = Schedule::new(Duration::from_secs(60), Duration::from_secs(60)).unwrap_err();
        assert_matches!(err, ConfigError::Schedule(msg) if msg.contains("offset"));
    }

    const RESPONSE: &str = r#"{ "features": [
        { "attributes": { "OBJECTID": 1, "name": "Marktstätte", "real_fcap": 45, "real_capa": 300 } }
    ] }"#;

    #[tokio::test]
    async fn scheduler_runs_cycles_until_shutdown() {
        let upstream = MockUpstream::spawn(RESPONSE).await;
        let client = UpstreamClient::new(upstream.url(), Duration::from_secs(1)).unwrap();
        let store = Arc::new(MetricStore::new());
        let refresher = Arc::new(Refresher::new(client, store.clone()));
        let schedule = Schedule::new(Duration::from_millis(50), Duration::ZERO).unwrap();

        let (stop_sender, mut stop_receiver) = watch::channel(());
        let scheduler = RefreshScheduler::new(refresher, schedule).with_graceful_shutdown(async move {
            stop_receiver.changed().await.ok();
        });
        let scheduler_task = tokio::spawn(scheduler.run());

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.snapshot().update_frame_count() < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for refresh cycles");

        stop_sender.send_replace(());
        tokio::time::timeout(Duration::from_secs(5), scheduler_task)
            .await
            .expect("scheduler did not stop")
            .unwrap();

        let frame_count = store.snapshot().update_frame_count();
        assert!(upstream.request_count() >= 3);
        assert_eq!(frame_count, u64::try_from(upstream.request_count()).unwrap());
    }

    #[tokio::test]
    async fn scheduler_survives_failed_cycles() {
        let upstream = MockUpstream::spawn(RESPONSE).await;
        upstream.set_status(500);
        let client = UpstreamClient::new(upstream.url(), Duration::from_secs(1)).unwrap();
        let store = Arc::new(MetricStore::new());
        let refresher = Arc::new(Refresher::new(client, store.clone()));
        let schedule = Schedule::new(Duration::from_millis(50), Duration::ZERO).unwrap();
        tokio::spawn(RefreshScheduler::new(refresher, schedule).run());

        tokio::time::timeout(Duration::from_secs(5), async {
            while upstream.request_count() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for refresh cycles");
        assert_eq!(store.snapshot().update_frame_count(), 0);

        upstream.set_status(200);
        tokio::time::timeout(Duration::from_secs(5), async {
            while store.snapshot().update_frame_count() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("scheduler stopped after failed cycles");
        assert!(store.snapshot().get("Marktstätte").is_some());
    }

    #[tokio::test]
    async fn scheduler_without_run_on_start_waits_for_first_tick() {
        let upstream = MockUpstream::spawn(RESPONSE).await;
        let client = UpstreamClient::new(upstream.url(), Duration::from_secs(1)).unwrap();
        let store = Arc::new(MetricStore::new());
        let refresher = Arc::new(Refresher::new(client, store.clone()));
        // Place the first tick half an hour from now.
        let now_secs = u64::try_from(Utc::now().timestamp()).unwrap();
        let offset = Duration::from_secs((now_secs + 1_800) % 3_600);
        let schedule = Schedule::new(Duration::from_secs(3_600), offset).unwrap();

        let delayed_task = tokio::spawn(
            RefreshScheduler::new(refresher.clone(), schedule)
                .with_run_on_start(false)
                .run(),
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(upstream.request_count(), 0);
        assert_eq!(store.snapshot().update_frame_count(), 0);
        delayed_task.abort();

        let eager_task = tokio::spawn(RefreshScheduler::new(refresher, schedule).run());
        tokio::time::timeout(Duration::from_secs(5), async {
            while store.snapshot().update_frame_count() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("no cycle on start");
        assert_eq!(upstream.request_count(), 1);
        eager_task.abort();
    }
}
